#![allow(dead_code)]

use std::io::Cursor;
use std::time::Duration;

use gltf_shrink::codec::encode_glb;
use gltf_shrink::document::{
    Accessor, Animation, AnimationSampler, Channel, Document, ElementType, Handle, Interpolation,
    Material, Mesh, Node, Primitive, Property, Scene, Semantic, Texture, TextureSlot,
};
use gltf_shrink::pipeline::{Pipeline, PipelineOptions};
use rand::Rng;
use rand::rngs::StdRng;

/// Pipeline without the fallback pacing.
pub fn quick_pipeline() -> Pipeline {
    Pipeline::new(PipelineOptions {
        fallback_stage_delay: Duration::ZERO,
        texture_workers: 2,
    })
}

pub fn glb(doc: &Document) -> Vec<u8> {
    encode_glb(doc).expect("fixture encodes")
}

/// One scene, one node, one mesh with a single primitive.
pub fn single_mesh(positions: Vec<f32>, indices: Option<Vec<u32>>) -> Document {
    let mut doc = Document::new();
    let position = doc
        .accessors
        .insert(Accessor::from_f32(ElementType::Vec3, positions));
    let mut primitive = Primitive::new(position);
    primitive.indices = indices.map(|i| doc.accessors.insert(Accessor::from_indices(i)));
    let mesh = doc.meshes.insert(Mesh {
        name: Some("fixture".into()),
        primitives: vec![primitive],
        ..Default::default()
    });
    let node = doc.nodes.insert(Node::with_mesh(mesh));
    let scene = doc.scenes.insert(Scene {
        name: None,
        nodes: vec![node],
    });
    doc.default_scene = Some(scene);
    doc
}

/// Two triangles over four distinct vertices.
pub fn quad() -> Document {
    single_mesh(
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
        Some(vec![0, 1, 2, 0, 2, 3]),
    )
}

/// The same quad with three extra vertices coinciding with existing ones.
pub fn quad_with_duplicates() -> Document {
    single_mesh(
        vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
        ],
        Some(vec![0, 1, 2, 4, 5, 6]),
    )
}

/// `n` x `n` quads in the XY plane, optionally with a gentle bump.
pub fn grid(n: u32, bump: f32) -> Document {
    let mut positions = Vec::new();
    for y in 0..=n {
        for x in 0..=n {
            let (fx, fy) = (x as f32 / n as f32, y as f32 / n as f32);
            let z = bump * (fx * std::f32::consts::PI).sin() * (fy * std::f32::consts::PI).sin();
            positions.extend_from_slice(&[fx, fy, z]);
        }
    }
    let row = n + 1;
    let mut indices = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let i = y * row + x;
            indices.extend_from_slice(&[i, i + 1, i + row + 1, i, i + row + 1, i + row]);
        }
    }
    single_mesh(positions, Some(indices))
}

/// Hand-assembled GLB around arbitrary JSON, for documents the encoder
/// would never produce.
pub fn raw_glb(json: &str, bin: &[u8]) -> Vec<u8> {
    let mut json = json.as_bytes().to_vec();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let mut bin = bin.to_vec();
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    let total = 12 + 8 + json.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(b"JSON");
    out.extend_from_slice(&json);
    if !bin.is_empty() {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.extend_from_slice(&bin);
    }
    out
}

/// One triangle whose position accessor and view are spliced in verbatim.
pub fn raw_triangle_glb(accessor: &str, view: &str) -> Vec<u8> {
    let json = format!(
        r#"{{
            "asset": {{ "version": "2.0" }},
            "scene": 0,
            "scenes": [ {{ "nodes": [0] }} ],
            "nodes": [ {{ "mesh": 0 }} ],
            "meshes": [ {{ "primitives": [ {{ "attributes": {{ "POSITION": 0 }} }} ] }} ],
            "buffers": [ {{ "byteLength": 36 }} ],
            "bufferViews": [ {view} ],
            "accessors": [ {accessor} ]
        }}"#
    );
    let bin: Vec<u8> = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    raw_glb(&json, &bin)
}

pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729)) as u8;
        image::Rgb([v, v.rotate_left(3), v.wrapping_add(x as u8)])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("png encodes");
    out
}

fn random_f32s(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-10.0..10.0)).collect()
}

/// Small random but well-formed document: shared accessors, optional
/// indices and normals, materials over a texture pool, a node hierarchy and
/// sometimes an animation.
pub fn random_document(rng: &mut StdRng) -> Document {
    let mut doc = Document::new();

    let textures: Vec<Handle<Texture>> = (0..rng.gen_range(0..3))
        .map(|i| {
            let mut bytes = vec![0x89, b'P', b'N', b'G'];
            bytes.extend((0..rng.gen_range(1..16)).map(|_| rng.r#gen::<u8>()));
            bytes.push(i as u8);
            doc.textures.insert(Texture::embedded(bytes, "image/png"))
        })
        .collect();
    let materials: Vec<Handle<Material>> = (0..rng.gen_range(0..3))
        .map(|_| {
            let mut material = Material::default();
            for slot in TextureSlot::ALL {
                if !textures.is_empty() && rng.gen_bool(0.4) {
                    let texture = textures[rng.gen_range(0..textures.len())];
                    material.set_texture(slot, Some(texture));
                }
            }
            doc.materials.insert(material)
        })
        .collect();

    let mut meshes = Vec::new();
    for _ in 0..rng.gen_range(1..4) {
        let mut primitives = Vec::new();
        for _ in 0..rng.gen_range(1..3) {
            let vertices = rng.gen_range(3..24);
            let position = doc
                .accessors
                .insert(Accessor::from_f32(ElementType::Vec3, random_f32s(rng, vertices * 3)));
            let mut primitive = Primitive::new(position);
            if rng.gen_bool(0.5) {
                let normals = doc
                    .accessors
                    .insert(Accessor::from_f32(ElementType::Vec3, random_f32s(rng, vertices * 3)));
                primitive.attributes.insert(Semantic::Normals, normals);
            }
            if rng.gen_bool(0.7) {
                let indices = (0..rng.gen_range(1..10) * 3)
                    .map(|_| rng.gen_range(0..vertices as u32))
                    .collect();
                primitive.indices = Some(doc.accessors.insert(Accessor::from_indices(indices)));
            }
            if !materials.is_empty() && rng.gen_bool(0.8) {
                primitive.material = Some(materials[rng.gen_range(0..materials.len())]);
            }
            primitives.push(primitive);
        }
        meshes.push(doc.meshes.insert(Mesh {
            primitives,
            ..Default::default()
        }));
    }

    let nodes: Vec<Handle<Node>> = meshes
        .iter()
        .map(|&mesh| doc.nodes.insert(Node::with_mesh(mesh)))
        .collect();
    // Each node may adopt later nodes that have no parent yet.
    let mut has_parent = vec![false; nodes.len()];
    for i in 0..nodes.len() {
        for j in i + 1..nodes.len() {
            if !has_parent[j] && rng.gen_bool(0.3) {
                has_parent[j] = true;
                doc.nodes[nodes[i]].children.push(nodes[j]);
            }
        }
    }
    let roots = nodes
        .iter()
        .zip(&has_parent)
        .filter(|(_, parented)| !**parented)
        .map(|(&n, _)| n)
        .collect();
    let scene = doc.scenes.insert(Scene { name: None, nodes: roots });
    doc.default_scene = Some(scene);

    if rng.gen_bool(0.5) {
        let keys = rng.gen_range(2..6);
        let times = (0..keys).map(|k| k as f32 * 0.5).collect();
        let input = doc.accessors.insert(Accessor::from_f32(ElementType::Scalar, times));
        let output = doc
            .accessors
            .insert(Accessor::from_f32(ElementType::Vec3, random_f32s(rng, keys * 3)));
        doc.animations.insert(Animation {
            name: Some("wobble".into()),
            channels: vec![Channel {
                target: nodes[rng.gen_range(0..nodes.len())],
                path: Property::Translation,
                sampler: 0,
            }],
            samplers: vec![AnimationSampler {
                input,
                output,
                interpolation: Interpolation::Linear,
            }],
        });
    }
    doc
}
