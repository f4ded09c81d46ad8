use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use gltf::json::{self, validation::Checked};

use super::{ExternalFile, SUPPORTED_EXTENSIONS};
use crate::document::{
    Accessor, AccessorData, Animation, AnimationSampler, Camera, Channel, Document, ElementType,
    Handle, ImageOrigin, Material, Mesh, MorphTarget, Node, NodeTransform, Primitive, Sampler,
    Scene, Semantic, Skin, Texture, TextureSlot,
};
use crate::error::{Error, Result};

fn decode_err(message: impl Into<String>) -> Error {
    Error::Decode(message.into())
}

fn checked<T: Clone>(value: &Checked<T>, what: &str) -> Result<T> {
    match value {
        Checked::Valid(v) => Ok(v.clone()),
        Checked::Invalid => Err(decode_err(format!("invalid {what}"))),
    }
}

/// Last path segment of a URI with `%XX` escapes decoded.
fn file_name_of(uri: &str) -> String {
    let name = uri.rsplit(['/', '\\']).next().unwrap_or(uri);
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .filter(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(v) = escaped {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decodes a `data:[<mime>][;base64],<payload>` URI.
fn decode_data_uri(uri: &str) -> Result<(Option<String>, Vec<u8>)> {
    let rest = &uri["data:".len()..];
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| decode_err("malformed data URI"))?;
    let mime = header.split(';').next().filter(|m| !m.is_empty()).map(str::to_string);
    if !header.ends_with(";base64") {
        return Err(decode_err("only base64 data URIs are supported"));
    }
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| decode_err(format!("bad base64 payload: {e}")))?;
    Ok((mime, bytes))
}

/// Best-effort MIME type from the leading bytes of an image.
pub(crate) fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(&[0xAB, b'K', b'T', b'X', b' ', b'2', b'0']) {
        Some("image/ktx2")
    } else {
        None
    }
}

fn element_type(ty: json::accessor::Type) -> ElementType {
    match ty {
        json::accessor::Type::Scalar => ElementType::Scalar,
        json::accessor::Type::Vec2 => ElementType::Vec2,
        json::accessor::Type::Vec3 => ElementType::Vec3,
        json::accessor::Type::Vec4 => ElementType::Vec4,
        json::accessor::Type::Mat2 => ElementType::Mat2,
        json::accessor::Type::Mat3 => ElementType::Mat3,
        json::accessor::Type::Mat4 => ElementType::Mat4,
    }
}

/// Zero-filled accessors may always reach this many bytes.
const ZERO_FILL_FLOOR: usize = 16 << 20;

#[derive(Debug, Clone, Copy)]
struct Layout {
    offset: usize,
    stride: usize,
    count: usize,
    components: usize,
}

fn read_components<T, const N: usize>(
    data: &[u8],
    layout: Layout,
    convert: fn([u8; N]) -> T,
) -> Result<Vec<T>> {
    let overflow = || decode_err("accessor layout overflows");
    let total = layout.count.checked_mul(layout.components).ok_or_else(overflow)?;
    if let Some(last) = layout.count.checked_sub(1) {
        // One past the last byte the final element touches.
        let end = last
            .checked_mul(layout.stride)
            .and_then(|start| start.checked_add(layout.offset))
            .and_then(|start| start.checked_add(layout.components * N))
            .ok_or_else(overflow)?;
        if end > data.len() {
            return Err(decode_err("accessor reads past the end of its buffer view"));
        }
    }

    let mut out = Vec::with_capacity(total);
    for element in 0..layout.count {
        let start = layout.offset + element * layout.stride;
        for c in 0..layout.components {
            let at = start + c * N;
            let bytes: [u8; N] = data
                .get(at..at + N)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| decode_err("accessor reads past the end of its buffer view"))?;
            out.push(convert(bytes));
        }
    }
    Ok(out)
}

/// Converts a parsed glTF root plus its resources into a [`Document`].
pub(crate) struct Reader<'a> {
    root: &'a json::Root,
    buffers: Vec<Vec<u8>>,
    resources: &'a [ExternalFile],
}

impl<'a> Reader<'a> {
    pub fn new(
        root: &'a json::Root,
        blob: Option<&[u8]>,
        resources: &'a [ExternalFile],
    ) -> Result<Self> {
        for ext in &root.extensions_required {
            if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                return Err(decode_err(format!("unsupported required extension {ext}")));
            }
        }

        let mut buffers = Vec::with_capacity(root.buffers.len());
        for (i, buffer) in root.buffers.iter().enumerate() {
            let data = match &buffer.uri {
                None if i == 0 => blob
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| decode_err("buffer 0 has no URI and there is no binary chunk"))?,
                None => return Err(decode_err(format!("buffer {i} has no data"))),
                Some(uri) if uri.starts_with("data:") => decode_data_uri(uri)?.1,
                Some(uri) => Self::resolve(resources, uri)?.bytes.clone(),
            };
            if (data.len() as u64) < buffer.byte_length.0 {
                return Err(decode_err(format!(
                    "buffer {i} holds {} bytes, {} declared",
                    data.len(),
                    buffer.byte_length.0
                )));
            }
            buffers.push(data);
        }

        Ok(Self {
            root,
            buffers,
            resources,
        })
    }

    fn resolve<'r>(resources: &'r [ExternalFile], uri: &str) -> Result<&'r ExternalFile> {
        let wanted = file_name_of(uri);
        resources
            .iter()
            .find(|file| file_name_of(&file.name) == wanted)
            .ok_or_else(|| decode_err(format!("missing external resource '{wanted}'")))
    }

    /// Largest zero-filled accessor, in bytes, a document may declare.
    fn zero_fill_limit(&self) -> usize {
        let loaded: usize = self.buffers.iter().map(Vec::len).sum();
        loaded.max(ZERO_FILL_FLOOR)
    }

    fn view_bytes(&self, index: usize) -> Result<&[u8]> {
        let view = self
            .root
            .buffer_views
            .get(index)
            .ok_or_else(|| decode_err(format!("buffer view {index} out of range")))?;
        let buffer = self
            .buffers
            .get(view.buffer.value())
            .ok_or_else(|| decode_err(format!("buffer {} out of range", view.buffer.value())))?;
        let offset = match view.byte_offset {
            Some(o) => o.0 as usize,
            None => 0,
        };
        let length = view.byte_length.0 as usize;
        offset
            .checked_add(length)
            .and_then(|end| buffer.get(offset..end))
            .ok_or_else(|| decode_err(format!("buffer view {index} exceeds its buffer")))
    }

    fn read_accessor(&self, accessor: &json::Accessor) -> Result<Accessor> {
        let element_type = element_type(checked(&accessor.type_, "accessor type")?);
        let component_type = checked(&accessor.component_type, "component type")?.0;
        if accessor.sparse.is_some() {
            return Err(decode_err("sparse accessors are not supported"));
        }

        use json::accessor::ComponentType as C;
        let components = element_type.multiplicity();
        let size = match component_type {
            C::F32 | C::U32 => 4,
            C::U16 | C::I16 => 2,
            C::U8 | C::I8 => 1,
        };
        if element_type.is_matrix() && size < 4 {
            return Err(decode_err("matrix accessors with 8/16-bit components are not supported"));
        }

        let count = accessor.count.0 as usize;
        let data = match accessor.buffer_view {
            Some(view_index) => {
                let bytes = self.view_bytes(view_index.value())?;
                let stride = self
                    .root
                    .buffer_views
                    .get(view_index.value())
                    .and_then(|view| view.byte_stride)
                    .map(|s| s.0)
                    .unwrap_or(size * components);
                let layout = Layout {
                    offset: accessor.byte_offset.map(|o| o.0 as usize).unwrap_or(0),
                    stride,
                    count,
                    components,
                };
                match component_type {
                    C::F32 => AccessorData::F32(read_components(bytes, layout, f32::from_le_bytes)?),
                    C::U32 => AccessorData::U32(read_components(bytes, layout, u32::from_le_bytes)?),
                    C::U16 => AccessorData::U16(read_components(bytes, layout, u16::from_le_bytes)?),
                    C::U8 => AccessorData::U8(read_components(bytes, layout, u8::from_le_bytes)?),
                    C::I16 => AccessorData::I16(read_components(bytes, layout, i16::from_le_bytes)?),
                    C::I8 => AccessorData::I8(read_components(bytes, layout, i8::from_le_bytes)?),
                }
            }
            None => {
                // Zero-filled: nothing in the file backs the size, so cap it.
                let n = count
                    .checked_mul(components)
                    .filter(|n| n.saturating_mul(size) <= self.zero_fill_limit())
                    .ok_or_else(|| {
                        decode_err(format!("accessor without data claims {count} elements"))
                    })?;
                match component_type {
                    C::F32 => AccessorData::F32(vec![0.0; n]),
                    C::U32 => AccessorData::U32(vec![0; n]),
                    C::U16 => AccessorData::U16(vec![0; n]),
                    C::U8 => AccessorData::U8(vec![0; n]),
                    C::I16 => AccessorData::I16(vec![0; n]),
                    C::I8 => AccessorData::I8(vec![0; n]),
                }
            }
        };

        Ok(Accessor {
            name: accessor.name.clone(),
            element_type,
            normalized: accessor.normalized,
            data,
        })
    }

    fn read_image(&self, index: usize) -> Result<(Vec<u8>, String, ImageOrigin, Option<String>)> {
        let image = self
            .root
            .images
            .get(index)
            .ok_or_else(|| decode_err(format!("image {index} out of range")))?;
        let declared = image.mime_type.as_ref().map(|m| m.0.clone());

        let (bytes, uri_mime, origin) = match (&image.buffer_view, &image.uri) {
            (Some(view), _) => (self.view_bytes(view.value())?.to_vec(), None, ImageOrigin::Embedded),
            (None, Some(uri)) if uri.starts_with("data:") => {
                let (mime, bytes) = decode_data_uri(uri)?;
                (bytes, mime, ImageOrigin::Embedded)
            }
            (None, Some(uri)) => {
                let file = Self::resolve(self.resources, uri)?;
                let origin = ImageOrigin::External {
                    file_name: file_name_of(&file.name),
                };
                (file.bytes.clone(), None, origin)
            }
            (None, None) => return Err(decode_err(format!("image {index} has no data"))),
        };

        let mime = declared
            .or(uri_mime)
            .or_else(|| sniff_mime(&bytes).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok((bytes, mime, origin, image.name.clone()))
    }

    fn lookup<T>(handles: &[Handle<T>], index: usize, what: &str) -> Result<Handle<T>> {
        handles
            .get(index)
            .copied()
            .ok_or_else(|| decode_err(format!("{what} {index} out of range")))
    }

    pub fn read(self) -> Result<Document> {
        let root = self.root;
        let mut doc = Document {
            asset: root.asset.clone(),
            extensions_used: root
                .extensions_used
                .iter()
                .filter(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
                .cloned()
                .collect(),
            extensions_required: root.extensions_required.clone(),
            ..Default::default()
        };

        let mut accessors = Vec::with_capacity(root.accessors.len());
        for accessor in &root.accessors {
            accessors.push(doc.accessors.insert(self.read_accessor(accessor)?));
        }

        let samplers: Vec<_> = root
            .samplers
            .iter()
            .map(|json| doc.samplers.insert(Sampler { json: json.clone() }))
            .collect();

        let mut textures = Vec::with_capacity(root.textures.len());
        for texture in &root.textures {
            let (bytes, mime_type, origin, image_name) = self.read_image(texture.source.value())?;
            let sampler = match texture.sampler {
                Some(s) => Some(Self::lookup(&samplers, s.value(), "sampler")?),
                None => None,
            };
            textures.push(doc.textures.insert(Texture {
                name: texture.name.clone(),
                sampler,
                image_name,
                bytes,
                mime_type,
                origin,
            }));
        }

        let mut materials = Vec::with_capacity(root.materials.len());
        for json in &root.materials {
            let mut material = Material::new(json.clone());
            let pbr = &json.pbr_metallic_roughness;
            let slots = [
                (TextureSlot::BaseColor, pbr.base_color_texture.as_ref().map(|i| i.index.value())),
                (
                    TextureSlot::MetallicRoughness,
                    pbr.metallic_roughness_texture.as_ref().map(|i| i.index.value()),
                ),
                (TextureSlot::Normal, json.normal_texture.as_ref().map(|i| i.index.value())),
                (TextureSlot::Occlusion, json.occlusion_texture.as_ref().map(|i| i.index.value())),
                (TextureSlot::Emissive, json.emissive_texture.as_ref().map(|i| i.index.value())),
            ];
            for (slot, index) in slots {
                if let Some(index) = index {
                    material.set_texture(slot, Some(Self::lookup(&textures, index, "texture")?));
                }
            }
            materials.push(doc.materials.insert(material));
        }

        let mut meshes = Vec::with_capacity(root.meshes.len());
        for mesh in &root.meshes {
            let mut primitives = Vec::with_capacity(mesh.primitives.len());
            for p in &mesh.primitives {
                let mut attributes = BTreeMap::new();
                for (semantic, index) in &p.attributes {
                    let semantic = checked(semantic, "attribute semantic")?;
                    let handle = Self::lookup(&accessors, index.value(), "accessor")?;
                    if matches!(semantic, Semantic::Positions | Semantic::Normals)
                        && doc.accessors[handle].element_type != ElementType::Vec3
                    {
                        return Err(decode_err(format!(
                            "{semantic:?} accessor must be VEC3, found {:?}",
                            doc.accessors[handle].element_type
                        )));
                    }
                    attributes.insert(semantic, handle);
                }
                let mut targets = Vec::new();
                for target in p.targets.iter().flatten() {
                    let mut morph = MorphTarget::new();
                    for (semantic, index) in [
                        (Semantic::Positions, target.positions),
                        (Semantic::Normals, target.normals),
                        (Semantic::Tangents, target.tangents),
                    ] {
                        if let Some(index) = index {
                            morph.insert(semantic, Self::lookup(&accessors, index.value(), "accessor")?);
                        }
                    }
                    targets.push(morph);
                }
                primitives.push(Primitive {
                    mode: checked(&p.mode, "primitive mode")?,
                    attributes,
                    indices: match p.indices {
                        Some(i) => Some(Self::lookup(&accessors, i.value(), "accessor")?),
                        None => None,
                    },
                    material: match p.material {
                        Some(m) => Some(Self::lookup(&materials, m.value(), "material")?),
                        None => None,
                    },
                    targets,
                });
            }
            meshes.push(doc.meshes.insert(Mesh {
                name: mesh.name.clone(),
                weights: mesh.weights.clone(),
                primitives,
            }));
        }

        let cameras: Vec<_> = root
            .cameras
            .iter()
            .map(|json| doc.cameras.insert(Camera { json: json.clone() }))
            .collect();

        // Nodes and skins refer to each other, so reserve node handles first.
        let nodes: Vec<Handle<Node>> = root
            .nodes
            .iter()
            .map(|_| doc.nodes.insert(Node::default()))
            .collect();

        let mut skins = Vec::with_capacity(root.skins.len());
        for skin in &root.skins {
            let mut joints = Vec::with_capacity(skin.joints.len());
            for joint in &skin.joints {
                joints.push(Self::lookup(&nodes, joint.value(), "joint node")?);
            }
            skins.push(doc.skins.insert(Skin {
                name: skin.name.clone(),
                inverse_bind_matrices: match skin.inverse_bind_matrices {
                    Some(i) => Some(Self::lookup(&accessors, i.value(), "accessor")?),
                    None => None,
                },
                joints,
                skeleton: match skin.skeleton {
                    Some(n) => Some(Self::lookup(&nodes, n.value(), "skeleton node")?),
                    None => None,
                },
            }));
        }

        for (json, &handle) in root.nodes.iter().zip(&nodes) {
            let transform = match json.matrix {
                Some(matrix) => NodeTransform::Matrix(matrix),
                None => NodeTransform::Trs {
                    translation: json.translation.unwrap_or([0.0; 3]),
                    rotation: json.rotation.as_ref().map(|r| r.0).unwrap_or([0.0, 0.0, 0.0, 1.0]),
                    scale: json.scale.unwrap_or([1.0; 3]),
                },
            };
            let mut children = Vec::new();
            for child in json.children.iter().flatten() {
                children.push(Self::lookup(&nodes, child.value(), "child node")?);
            }
            doc.nodes[handle] = Node {
                name: json.name.clone(),
                transform,
                weights: json.weights.clone(),
                mesh: match json.mesh {
                    Some(m) => Some(Self::lookup(&meshes, m.value(), "mesh")?),
                    None => None,
                },
                skin: match json.skin {
                    Some(s) => Some(Self::lookup(&skins, s.value(), "skin")?),
                    None => None,
                },
                camera: match json.camera {
                    Some(c) => Some(Self::lookup(&cameras, c.value(), "camera")?),
                    None => None,
                },
                children,
            };
        }

        for animation in &root.animations {
            let mut samplers = Vec::with_capacity(animation.samplers.len());
            for sampler in &animation.samplers {
                samplers.push(AnimationSampler {
                    input: Self::lookup(&accessors, sampler.input.value(), "accessor")?,
                    output: Self::lookup(&accessors, sampler.output.value(), "accessor")?,
                    interpolation: checked(&sampler.interpolation, "interpolation")?,
                });
            }
            let mut channels = Vec::with_capacity(animation.channels.len());
            for channel in &animation.channels {
                let sampler = channel.sampler.value();
                if sampler >= samplers.len() {
                    return Err(decode_err(format!("animation sampler {sampler} out of range")));
                }
                channels.push(Channel {
                    target: Self::lookup(&nodes, channel.target.node.value(), "animated node")?,
                    path: checked(&channel.target.path, "animation path")?,
                    sampler,
                });
            }
            doc.animations.insert(Animation {
                name: animation.name.clone(),
                channels,
                samplers,
            });
        }

        let mut scenes = Vec::with_capacity(root.scenes.len());
        for scene in &root.scenes {
            let mut roots = Vec::with_capacity(scene.nodes.len());
            for node in &scene.nodes {
                roots.push(Self::lookup(&nodes, node.value(), "scene node")?);
            }
            scenes.push(doc.scenes.insert(Scene {
                name: scene.name.clone(),
                nodes: roots,
            }));
        }
        doc.default_scene = match root.scene {
            Some(s) => Some(Self::lookup(&scenes, s.value(), "scene")?),
            None => None,
        };

        log::debug!(
            "decoded {} meshes, {} accessors, {} textures",
            doc.meshes.len(),
            doc.accessors.len(),
            doc.textures.len()
        );
        Ok(doc)
    }
}
