use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap, HashSet},
    io::Cursor,
};

use gltf::json::{self, Index, Root, image::MimeType, validation::Checked};

use crate::document::{
    Accessor, AccessorData, Arena, Camera, Document, ElementType, Handle, Material, Mesh, Node,
    NodeTransform, Sampler, Scene, Semantic, Skin, Texture, TextureSlot,
};
use crate::error::{Error, Result};

fn encode_err(message: impl Into<String>) -> Error {
    Error::Encode(message.into())
}

/// Dense JSON index for every live handle, in arena order.
fn dense<T, J>(arena: &Arena<T>) -> HashMap<Handle<T>, Index<J>> {
    arena
        .handles()
        .into_iter()
        .enumerate()
        .map(|(i, handle)| (handle, Index::new(i as u32)))
        .collect()
}

fn pad_to_4bytes(data: &mut Vec<u8>) {
    while data.len() % 4 != 0 {
        data.push(0);
    }
}

fn json_element_type(ty: ElementType) -> json::accessor::Type {
    match ty {
        ElementType::Scalar => json::accessor::Type::Scalar,
        ElementType::Vec2 => json::accessor::Type::Vec2,
        ElementType::Vec3 => json::accessor::Type::Vec3,
        ElementType::Vec4 => json::accessor::Type::Vec4,
        ElementType::Mat2 => json::accessor::Type::Mat2,
        ElementType::Mat3 => json::accessor::Type::Mat3,
        ElementType::Mat4 => json::accessor::Type::Mat4,
    }
}

fn json_component_type(data: &AccessorData) -> json::accessor::ComponentType {
    use json::accessor::ComponentType as C;
    match data {
        AccessorData::F32(_) => C::F32,
        AccessorData::U32(_) => C::U32,
        AccessorData::U16(_) => C::U16,
        AccessorData::U8(_) => C::U8,
        AccessorData::I16(_) => C::I16,
        AccessorData::I8(_) => C::I8,
    }
}

fn bound_values(values: &[f64], float: bool) -> json::Value {
    let items: Vec<json::Value> = values
        .iter()
        .map(|&v| {
            if float {
                json::Value::from(v)
            } else {
                json::Value::from(v as i64)
            }
        })
        .collect();
    json::Value::from(items)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Vertex,
    Index,
    Other,
}

fn add_accessor(
    n_blob: &mut Vec<u8>,
    n_json: &mut Root,
    acc: &Accessor,
    usage: Usage,
) -> Index<json::Accessor> {
    let (min, max) = match acc.bounds() {
        Some((min, max)) if usage != Usage::Index => {
            let float = acc.data.is_float();
            (Some(bound_values(&min, float)), Some(bound_values(&max, float)))
        }
        _ => (None, None),
    };
    let mut n_acc = json::Accessor {
        buffer_view: None,
        byte_offset: None,
        count: acc.count().into(),
        component_type: Checked::Valid(json::accessor::GenericComponentType(json_component_type(
            &acc.data,
        ))),
        extensions: None,
        extras: Default::default(),
        type_: Checked::Valid(json_element_type(acc.element_type)),
        min,
        max,
        name: acc.name.clone(),
        normalized: acc.normalized,
        sparse: None,
    };
    if acc.count() == 0 {
        return n_json.push(n_acc);
    }

    pad_to_4bytes(n_blob);
    let offset = n_blob.len();

    // vertex attributes must start every element on a 4-byte boundary
    let element_size = acc.element_size();
    let stride = if usage == Usage::Vertex && element_size % 4 != 0 {
        element_size.next_multiple_of(4)
    } else {
        element_size
    };

    let components = acc.element_type.multiplicity();
    for element in 0..acc.count() {
        for c in 0..components {
            acc.data.write_component(element * components + c, n_blob);
        }
        n_blob.resize(n_blob.len() + (stride - element_size), 0);
    }
    let length = n_blob.len() - offset;

    let view = json::buffer::View {
        buffer: Index::<json::Buffer>::new(0),
        byte_length: length.into(),
        byte_offset: if offset == 0 {
            None
        } else {
            Some(offset.into())
        },
        byte_stride: if stride != element_size {
            Some(json::buffer::Stride(stride))
        } else {
            None
        },
        name: None,
        target: match usage {
            Usage::Vertex => Some(Checked::Valid(json::buffer::Target::ArrayBuffer)),
            Usage::Index => Some(Checked::Valid(json::buffer::Target::ElementArrayBuffer)),
            Usage::Other => None,
        },
        extensions: None,
        extras: Default::default(),
    };
    n_acc.buffer_view = Some(n_json.push(view));
    n_json.push(n_acc)
}

fn add_image(
    n_blob: &mut Vec<u8>,
    n_json: &mut Root,
    name: Option<String>,
    b: &[u8],
    mime_type: &str,
) -> Index<json::Image> {
    pad_to_4bytes(n_blob);
    let offset = n_blob.len();
    let length = b.len();

    n_blob.extend_from_slice(b);

    let view = json::buffer::View {
        buffer: Index::<json::Buffer>::new(0),
        byte_length: length.into(),
        byte_offset: if offset == 0 {
            None
        } else {
            Some(offset.into())
        },
        byte_stride: None,
        name: None,
        target: None,
        extensions: None,
        extras: Default::default(),
    };

    let view_idx = n_json.push(view);

    n_json.push(json::Image {
        buffer_view: Some(view_idx),
        mime_type: Some(MimeType(mime_type.to_string())),
        name,
        uri: None,
        extensions: None,
        extras: Default::default(),
    })
}

/// Writes texture slot handles back into a cloned material JSON.
fn material_json(
    material: &Material,
    textures: &HashMap<Handle<Texture>, Index<json::Texture>>,
) -> json::Material {
    let mut n_mat = material.json.clone();
    let index_of = |slot| material.texture(slot).and_then(|h| textures.get(&h).copied());

    let pbr = &n_mat.pbr_metallic_roughness;
    let base_color = index_of(TextureSlot::BaseColor).map(|index| json::texture::Info {
        index,
        ..pbr.base_color_texture.clone().unwrap_or_else(|| texture_info(index))
    });
    let metallic_roughness = index_of(TextureSlot::MetallicRoughness).map(|index| json::texture::Info {
        index,
        ..pbr.metallic_roughness_texture.clone().unwrap_or_else(|| texture_info(index))
    });
    let emissive = index_of(TextureSlot::Emissive).map(|index| json::texture::Info {
        index,
        ..n_mat.emissive_texture.clone().unwrap_or_else(|| texture_info(index))
    });
    let normal = index_of(TextureSlot::Normal).map(|index| {
        let mut normal = n_mat.normal_texture.clone().unwrap_or_else(|| json::material::NormalTexture {
            index,
            scale: 1.0,
            tex_coord: 0,
            extensions: None,
            extras: Default::default(),
        });
        normal.index = index;
        normal
    });
    let occlusion = index_of(TextureSlot::Occlusion).map(|index| {
        let mut occlusion =
            n_mat.occlusion_texture.clone().unwrap_or_else(|| json::material::OcclusionTexture {
                index,
                strength: json::material::StrengthFactor(1.0),
                tex_coord: 0,
                extensions: None,
                extras: Default::default(),
            });
        occlusion.index = index;
        occlusion
    });

    n_mat.pbr_metallic_roughness.base_color_texture = base_color;
    n_mat.pbr_metallic_roughness.metallic_roughness_texture = metallic_roughness;
    n_mat.emissive_texture = emissive;
    n_mat.normal_texture = normal;
    n_mat.occlusion_texture = occlusion;
    n_mat
}

fn texture_info(index: Index<json::Texture>) -> json::texture::Info {
    json::texture::Info {
        index,
        tex_coord: 0,
        extensions: None,
        extras: Default::default(),
    }
}

/// Serializes `doc` into a single-buffer GLB.
pub fn encode_glb(doc: &Document) -> Result<Vec<u8>> {
    doc.check_references().map_err(encode_err)?;

    let accessors: HashMap<Handle<Accessor>, Index<json::Accessor>> = dense(&doc.accessors);
    let materials: HashMap<Handle<Material>, Index<json::Material>> = dense(&doc.materials);
    let textures: HashMap<Handle<Texture>, Index<json::Texture>> = dense(&doc.textures);
    let samplers: HashMap<Handle<Sampler>, Index<json::texture::Sampler>> = dense(&doc.samplers);
    let meshes: HashMap<Handle<Mesh>, Index<json::Mesh>> = dense(&doc.meshes);
    let nodes: HashMap<Handle<Node>, Index<json::Node>> = dense(&doc.nodes);
    let skins: HashMap<Handle<Skin>, Index<json::Skin>> = dense(&doc.skins);
    let cameras: HashMap<Handle<Camera>, Index<json::Camera>> = dense(&doc.cameras);
    let scenes: HashMap<Handle<Scene>, Index<json::Scene>> = dense(&doc.scenes);

    let mut vertex_accessors = HashSet::new();
    let mut index_accessors = HashSet::new();
    for (_, mesh) in doc.meshes.iter() {
        for p in &mesh.primitives {
            vertex_accessors.extend(p.attributes.values().copied());
            vertex_accessors.extend(p.targets.iter().flat_map(|t| t.values().copied()));
            index_accessors.extend(p.indices);
        }
    }

    let mut n_blob: Vec<u8> = Vec::new();
    let mut n_json = Root {
        asset: doc.asset.clone(),
        scene: doc.default_scene.and_then(|s| scenes.get(&s).copied()),
        extensions_used: doc.extensions_used.clone(),
        extensions_required: doc.extensions_required.clone(),
        ..Default::default()
    };

    for (handle, acc) in doc.accessors.iter() {
        let usage = if vertex_accessors.contains(&handle) {
            Usage::Vertex
        } else if index_accessors.contains(&handle) {
            Usage::Index
        } else {
            Usage::Other
        };
        add_accessor(&mut n_blob, &mut n_json, acc, usage);
    }

    for (_, sampler) in doc.samplers.iter() {
        n_json.push(sampler.json.clone());
    }

    // byte-identical images are stored once even when several textures use them
    let mut images: HashMap<(&[u8], &str), Index<json::Image>> = HashMap::new();
    for (_, texture) in doc.textures.iter() {
        let key = (texture.bytes.as_slice(), texture.mime_type.as_str());
        let source = match images.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = add_image(
                    &mut n_blob,
                    &mut n_json,
                    texture.image_name.clone(),
                    &texture.bytes,
                    &texture.mime_type,
                );
                images.insert(key, idx);
                idx
            }
        };
        n_json.push(json::Texture {
            name: texture.name.clone(),
            sampler: texture.sampler.and_then(|s| samplers.get(&s).copied()),
            source,
            extensions: None,
            extras: Default::default(),
        });
    }

    for (_, material) in doc.materials.iter() {
        n_json.push(material_json(material, &textures));
    }

    for (_, mesh) in doc.meshes.iter() {
        let primitives = mesh
            .primitives
            .iter()
            .map(|p| {
                let attributes: BTreeMap<Checked<Semantic>, Index<json::Accessor>> = p
                    .attributes
                    .iter()
                    .map(|(semantic, h)| (Checked::Valid(semantic.clone()), accessors[h]))
                    .collect();
                let targets: Vec<json::mesh::MorphTarget> = p
                    .targets
                    .iter()
                    .map(|t| json::mesh::MorphTarget {
                        positions: t.get(&Semantic::Positions).map(|h| accessors[h]),
                        normals: t.get(&Semantic::Normals).map(|h| accessors[h]),
                        tangents: t.get(&Semantic::Tangents).map(|h| accessors[h]),
                    })
                    .collect();
                json::mesh::Primitive {
                    attributes,
                    extensions: None,
                    extras: Default::default(),
                    indices: p.indices.map(|h| accessors[&h]),
                    material: p.material.map(|h| materials[&h]),
                    mode: Checked::Valid(p.mode.clone()),
                    targets: if targets.is_empty() { None } else { Some(targets) },
                }
            })
            .collect();
        n_json.push(json::Mesh {
            extensions: None,
            extras: Default::default(),
            name: mesh.name.clone(),
            primitives,
            weights: mesh.weights.clone(),
        });
    }

    for (_, camera) in doc.cameras.iter() {
        n_json.push(camera.json.clone());
    }

    for (_, node) in doc.nodes.iter() {
        let (matrix, translation, rotation, scale) = match node.transform {
            NodeTransform::Matrix(m) => (Some(m), None, None, None),
            NodeTransform::Trs {
                translation,
                rotation,
                scale,
            } => (
                None,
                Some(translation).filter(|t| *t != [0.0; 3]),
                Some(rotation)
                    .filter(|r| *r != [0.0, 0.0, 0.0, 1.0])
                    .map(json::scene::UnitQuaternion),
                Some(scale).filter(|s| *s != [1.0; 3]),
            ),
        };
        n_json.push(json::Node {
            camera: node.camera.map(|h| cameras[&h]),
            children: if node.children.is_empty() {
                None
            } else {
                Some(node.children.iter().map(|h| nodes[h]).collect())
            },
            extensions: None,
            extras: Default::default(),
            matrix,
            mesh: node.mesh.map(|h| meshes[&h]),
            name: node.name.clone(),
            rotation,
            scale,
            translation,
            skin: node.skin.map(|h| skins[&h]),
            weights: node.weights.clone(),
        });
    }

    for (_, skin) in doc.skins.iter() {
        n_json.push(json::Skin {
            extensions: None,
            extras: Default::default(),
            inverse_bind_matrices: skin.inverse_bind_matrices.map(|h| accessors[&h]),
            joints: skin.joints.iter().map(|h| nodes[h]).collect(),
            name: skin.name.clone(),
            skeleton: skin.skeleton.map(|h| nodes[&h]),
        });
    }

    for (_, animation) in doc.animations.iter() {
        let samplers = animation
            .samplers
            .iter()
            .map(|s| json::animation::Sampler {
                extensions: None,
                extras: Default::default(),
                input: accessors[&s.input],
                interpolation: Checked::Valid(s.interpolation.clone()),
                output: accessors[&s.output],
            })
            .collect();
        let channels = animation
            .channels
            .iter()
            .map(|c| json::animation::Channel {
                sampler: Index::new(c.sampler as u32),
                target: json::animation::Target {
                    extensions: None,
                    extras: Default::default(),
                    node: nodes[&c.target],
                    path: Checked::Valid(c.path.clone()),
                },
                extensions: None,
                extras: Default::default(),
            })
            .collect();
        n_json.push(json::Animation {
            extensions: None,
            extras: Default::default(),
            channels,
            name: animation.name.clone(),
            samplers,
        });
    }

    for (_, scene) in doc.scenes.iter() {
        n_json.push(json::Scene {
            extensions: None,
            extras: Default::default(),
            name: scene.name.clone(),
            nodes: scene.nodes.iter().map(|h| nodes[h]).collect(),
        });
    }

    pad_to_4bytes(&mut n_blob);

    let bin: Option<Cow<'_, [u8]>> = if n_blob.is_empty() {
        None
    } else {
        n_json.push(json::Buffer {
            byte_length: n_blob.len().into(),
            name: None,
            uri: None,
            extensions: None,
            extras: Default::default(),
        });
        Some(Cow::Owned(n_blob))
    };

    let json_bytes =
        json::serialize::to_vec(&n_json).map_err(|e| encode_err(format!("json: {e}")))?;
    let bin_len = bin.as_ref().map_or(0, |b| b.len());

    let n_glb = gltf::binary::Glb {
        header: gltf::binary::Header {
            magic: *b"glTF",
            version: 2,
            length: (json_bytes.len() + bin_len) as u32,
        },
        json: Cow::Owned(json_bytes),
        bin,
    };

    let mut result: Vec<u8> = Vec::new();
    let writer = Cursor::new(&mut result);

    n_glb
        .to_writer(writer)
        .map_err(|e| encode_err(format!("glb: {e}")))?;

    Ok(result)
}
