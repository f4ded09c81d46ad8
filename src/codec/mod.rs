//! glTF container codec: GLB / `.gltf` bytes to [`Document`] and back.

mod read;
mod write;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::validate::is_valid_container;

pub use write::encode_glb;

/// Extensions whose data survives a decode/encode round trip.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["KHR_mesh_quantization"];

/// A companion file of a textual scene (texture image or `.bin` buffer).
#[derive(Debug, Clone)]
pub struct ExternalFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ExternalFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Decodes a binary container.
pub fn decode_glb(bytes: &[u8]) -> Result<Document> {
    if !is_valid_container(bytes) {
        return Err(Error::InvalidFormat("missing glTF binary header".into()));
    }
    let gltf = gltf::Gltf::from_slice_without_validation(bytes)
        .map_err(|e| Error::Decode(e.to_string()))?;
    read::Reader::new(gltf.as_json(), gltf.blob.as_deref(), &[])?.read()
}

/// Decodes a textual scene whose buffers and images are `data:` URIs or
/// files from `resources`, matched by file name.
pub fn decode_gltf(text: &str, resources: &[ExternalFile]) -> Result<Document> {
    let gltf = gltf::Gltf::from_slice_without_validation(text.as_bytes())
        .map_err(|e| Error::Decode(e.to_string()))?;
    read::Reader::new(gltf.as_json(), None, resources)?.read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{
        Accessor, AccessorData, ElementType, Material, Mesh, Node, Primitive, Scene, Texture,
        TextureSlot,
    };

    fn sample_document() -> Document {
        let mut doc = Document::new();
        let positions = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec3,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        ));
        let indices = doc.accessors.insert(Accessor::from_indices(vec![0, 1, 2]));
        let texture = doc
            .textures
            .insert(Texture::embedded(vec![0x89, b'P', b'N', b'G', 1, 2, 3], "image/png"));
        let mut material = Material::default();
        material.set_texture(TextureSlot::BaseColor, Some(texture));
        let material = doc.materials.insert(material);

        let mut primitive = Primitive::new(positions);
        primitive.indices = Some(indices);
        primitive.material = Some(material);
        let mesh = doc.meshes.insert(Mesh {
            name: Some("tri".into()),
            weights: None,
            primitives: vec![primitive],
        });
        let node = doc.nodes.insert(Node::with_mesh(mesh));
        let scene = doc.scenes.insert(Scene {
            name: None,
            nodes: vec![node],
        });
        doc.default_scene = Some(scene);
        doc
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let doc = sample_document();
        let bytes = encode_glb(&doc).unwrap();
        assert!(is_valid_container(&bytes));

        let decoded = decode_glb(&bytes).unwrap();
        assert!(decoded.check_references().is_ok());
        assert_eq!(decoded.meshes.len(), 1);
        assert_eq!(decoded.textures.len(), 1);

        let (_, mesh) = decoded.meshes.iter().next().unwrap();
        assert_eq!(mesh.name.as_deref(), Some("tri"));
        let primitive = &mesh.primitives[0];
        let indices = decoded.accessors[primitive.indices.unwrap()].read_indices().unwrap();
        assert_eq!(indices, vec![0, 1, 2]);
        let positions = decoded.accessors[primitive.position().unwrap()].read_f32();
        assert_eq!(positions[3], 1.0);

        let (_, texture) = decoded.textures.iter().next().unwrap();
        assert_eq!(texture.bytes, vec![0x89, b'P', b'N', b'G', 1, 2, 3]);
        assert_eq!(texture.mime_type, "image/png");
    }

    #[test]
    fn test_rejects_non_container() {
        assert!(matches!(decode_glb(b"not a glb at all"), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_glb_is_decode_error() {
        let bytes = encode_glb(&sample_document()).unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(decode_glb(truncated), Err(Error::Decode(_))));
    }

    #[test]
    fn test_text_scene_with_external_image() {
        let text = r#"{
            "asset": { "version": "2.0" },
            "images": [ { "uri": "textures/wood%20grain.png" } ],
            "textures": [ { "source": 0 } ],
            "materials": [ { "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } } ]
        }"#;
        let files = vec![ExternalFile::new("wood grain.png", vec![0x89, b'P', b'N', b'G'])];
        let doc = decode_gltf(text, &files).unwrap();

        let (_, texture) = doc.textures.iter().next().unwrap();
        assert_eq!(texture.bytes.len(), 4);
        assert_eq!(texture.mime_type, "image/png");
        assert_eq!(
            texture.origin,
            crate::document::ImageOrigin::External {
                file_name: "wood grain.png".into()
            }
        );
    }

    #[test]
    fn test_text_scene_missing_resource() {
        let text = r#"{
            "asset": { "version": "2.0" },
            "buffers": [ { "uri": "scene.bin", "byteLength": 4 } ]
        }"#;
        assert!(matches!(decode_gltf(text, &[]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_unsupported_required_extension() {
        let text = r#"{
            "asset": { "version": "2.0" },
            "extensionsUsed": [ "KHR_draco_mesh_compression" ],
            "extensionsRequired": [ "KHR_draco_mesh_compression" ]
        }"#;
        assert!(matches!(decode_gltf(text, &[]), Err(Error::Decode(_))));
    }

    /// Twelve zero bytes behind one view, with `accessor` spliced in.
    fn scene_with_accessor(accessor: &str, view: &str) -> String {
        format!(
            r#"{{
                "asset": {{ "version": "2.0" }},
                "buffers": [ {{ "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAA", "byteLength": 12 }} ],
                "bufferViews": [ {view} ],
                "accessors": [ {accessor} ]
            }}"#
        )
    }

    #[test]
    fn test_oversized_count_is_decode_error() {
        let text = scene_with_accessor(
            r#"{ "bufferView": 0, "componentType": 5126, "count": 2305843009213693952, "type": "VEC3" }"#,
            r#"{ "buffer": 0, "byteLength": 12 }"#,
        );
        assert!(matches!(decode_gltf(&text, &[]), Err(Error::Decode(_))));

        let text = scene_with_accessor(
            r#"{ "componentType": 5126, "count": 2305843009213693952, "type": "VEC3" }"#,
            r#"{ "buffer": 0, "byteLength": 12 }"#,
        );
        assert!(matches!(decode_gltf(&text, &[]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_overflowing_view_offset_is_decode_error() {
        let text = scene_with_accessor(
            r#"{ "bufferView": 0, "componentType": 5126, "count": 1, "type": "VEC3" }"#,
            r#"{ "buffer": 0, "byteOffset": 18446744073709551615, "byteLength": 12 }"#,
        );
        assert!(matches!(decode_gltf(&text, &[]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_small_zero_filled_accessor_is_accepted() {
        let text = scene_with_accessor(
            r#"{ "componentType": 5126, "count": 4, "type": "VEC3" }"#,
            r#"{ "buffer": 0, "byteLength": 12 }"#,
        );
        let doc = decode_gltf(&text, &[]).unwrap();
        let (_, accessor) = doc.accessors.iter().next().unwrap();
        assert_eq!(accessor.read_f32(), vec![0.0; 12]);
    }

    #[test]
    fn test_two_component_position_is_decode_error() {
        let mut doc = sample_document();
        for (_, accessor) in doc.accessors.iter_mut() {
            if accessor.element_type == ElementType::Vec3 {
                // Three two-component positions.
                accessor.element_type = ElementType::Vec2;
                accessor.data = AccessorData::F32(vec![0.0; 6]);
            }
        }
        let bytes = encode_glb(&doc).unwrap();
        assert!(matches!(decode_glb(&bytes), Err(Error::Decode(_))));
    }
}
