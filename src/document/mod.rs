//! In-memory scene graph decoded from a glTF container.
//!
//! Entities live in per-type [`Arena`]s and refer to each other through
//! [`Handle`]s, so passes can delete entities without chasing owners.

mod accessor;
mod arena;

use std::collections::BTreeMap;

use gltf::json;

pub use accessor::{Accessor, AccessorData, ElementType};
pub use arena::{Arena, Handle};
pub use json::animation::{Interpolation, Property};
pub use json::mesh::{Mode, Semantic};

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub name: Option<String>,
    pub nodes: Vec<Handle<Node>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeTransform {
    Matrix([f32; 16]),
    Trs {
        translation: [f32; 3],
        rotation: [f32; 4],
        scale: [f32; 3],
    },
}

impl Default for NodeTransform {
    fn default() -> Self {
        NodeTransform::Trs {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: Option<String>,
    pub transform: NodeTransform,
    pub weights: Option<Vec<f32>>,
    pub mesh: Option<Handle<Mesh>>,
    pub skin: Option<Handle<Skin>>,
    pub camera: Option<Handle<Camera>>,
    pub children: Vec<Handle<Node>>,
}

impl Node {
    pub fn with_mesh(mesh: Handle<Mesh>) -> Self {
        Self {
            mesh: Some(mesh),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: Option<String>,
    pub weights: Option<Vec<f32>>,
    pub primitives: Vec<Primitive>,
}

/// Morph target: attribute deltas keyed by semantic.
pub type MorphTarget = BTreeMap<Semantic, Handle<Accessor>>;

#[derive(Debug, Clone)]
pub struct Primitive {
    pub mode: Mode,
    pub attributes: BTreeMap<Semantic, Handle<Accessor>>,
    pub indices: Option<Handle<Accessor>>,
    pub material: Option<Handle<Material>>,
    pub targets: Vec<MorphTarget>,
}

impl Primitive {
    pub fn new(position: Handle<Accessor>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(Semantic::Positions, position);
        Self {
            mode: Mode::Triangles,
            attributes,
            indices: None,
            material: None,
            targets: Vec::new(),
        }
    }

    pub fn position(&self) -> Option<Handle<Accessor>> {
        self.attributes.get(&Semantic::Positions).copied()
    }

    /// Every accessor this primitive reads, indices included.
    pub fn accessors(&self) -> impl Iterator<Item = Handle<Accessor>> + '_ {
        self.attributes
            .values()
            .chain(self.indices.iter())
            .chain(self.targets.iter().flat_map(|t| t.values()))
            .copied()
    }
}

/// One of the five standard material texture slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    BaseColor,
    MetallicRoughness,
    Normal,
    Occlusion,
    Emissive,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 5] = [
        TextureSlot::BaseColor,
        TextureSlot::MetallicRoughness,
        TextureSlot::Normal,
        TextureSlot::Occlusion,
        TextureSlot::Emissive,
    ];

    fn position(self) -> usize {
        self as usize
    }
}

/// Material parameters plus texture slot handles.
///
/// Texture indices stored inside `json` are stale; `textures` is authoritative
/// and is written back into the JSON on encode.
#[derive(Debug, Clone, Default)]
pub struct Material {
    pub json: json::Material,
    textures: [Option<Handle<Texture>>; 5],
}

impl Material {
    pub fn new(json: json::Material) -> Self {
        Self {
            json,
            textures: [None; 5],
        }
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<Handle<Texture>> {
        self.textures[slot.position()]
    }

    pub fn set_texture(&mut self, slot: TextureSlot, texture: Option<Handle<Texture>>) {
        self.textures[slot.position()] = texture;
    }

    pub fn textures(&self) -> impl Iterator<Item = Handle<Texture>> + '_ {
        self.textures.iter().flatten().copied()
    }

    /// Rewrites every slot through `remap`; slots mapped to `None` are cleared.
    pub fn remap_textures(&mut self, mut remap: impl FnMut(Handle<Texture>) -> Option<Handle<Texture>>) {
        for slot in self.textures.iter_mut() {
            *slot = slot.and_then(&mut remap);
        }
    }

    /// JSON parameters identical and slots pointing at the same textures.
    pub fn same_content(&self, other: &Self) -> bool {
        if self.textures != other.textures {
            return false;
        }
        match (serde_json::to_value(&self.json), serde_json::to_value(&other.json)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Bytes came from the container itself (GLB chunk or `data:` URI).
    Embedded,
    /// Bytes were supplied alongside a textual scene, matched by file name.
    External { file_name: String },
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub name: Option<String>,
    pub sampler: Option<Handle<Sampler>>,
    pub image_name: Option<String>,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub origin: ImageOrigin,
}

impl Texture {
    pub fn embedded(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            name: None,
            sampler: None,
            image_name: None,
            bytes,
            mime_type: mime_type.into(),
            origin: ImageOrigin::Embedded,
        }
    }

    pub fn same_content(&self, other: &Self) -> bool {
        self.sampler == other.sampler && self.mime_type == other.mime_type && self.bytes == other.bytes
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    pub json: json::texture::Sampler,
}

impl Sampler {
    pub fn same_content(&self, other: &Self) -> bool {
        match (serde_json::to_value(&self.json), serde_json::to_value(&other.json)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub json: json::Camera,
}

#[derive(Debug, Clone, Default)]
pub struct Skin {
    pub name: Option<String>,
    pub inverse_bind_matrices: Option<Handle<Accessor>>,
    pub joints: Vec<Handle<Node>>,
    pub skeleton: Option<Handle<Node>>,
}

#[derive(Debug, Clone)]
pub struct AnimationSampler {
    pub input: Handle<Accessor>,
    pub output: Handle<Accessor>,
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub target: Handle<Node>,
    pub path: Property,
    /// Index into the owning animation's `samplers`.
    pub sampler: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub name: Option<String>,
    pub channels: Vec<Channel>,
    pub samplers: Vec<AnimationSampler>,
}

/// Decoded scene graph. One per optimization call, mutated in place by the passes.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub asset: json::Asset,
    pub extensions_used: Vec<String>,
    pub extensions_required: Vec<String>,
    pub default_scene: Option<Handle<Scene>>,
    pub scenes: Arena<Scene>,
    pub nodes: Arena<Node>,
    pub meshes: Arena<Mesh>,
    pub accessors: Arena<Accessor>,
    pub materials: Arena<Material>,
    pub textures: Arena<Texture>,
    pub samplers: Arena<Sampler>,
    pub cameras: Arena<Camera>,
    pub skins: Arena<Skin>,
    pub animations: Arena<Animation>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extension(&mut self, name: &str, required: bool) {
        if !self.extensions_used.iter().any(|e| e == name) {
            self.extensions_used.push(name.to_string());
        }
        if required && !self.extensions_required.iter().any(|e| e == name) {
            self.extensions_required.push(name.to_string());
        }
    }

    /// Textures referenced by at least one material slot.
    pub fn referenced_textures(&self) -> Vec<Handle<Texture>> {
        let mut used: Vec<Handle<Texture>> = self
            .materials
            .iter()
            .flat_map(|(_, material)| material.textures())
            .collect();
        used.sort();
        used.dedup();
        used
    }

    /// Nodes that are nobody's child.
    pub fn parentless_nodes(&self) -> Vec<Handle<Node>> {
        let mut is_child = vec![false; self.nodes.handles().last().map_or(0, |h| h.index() + 1)];
        for (_, node) in self.nodes.iter() {
            for child in &node.children {
                if let Some(flag) = is_child.get_mut(child.index()) {
                    *flag = true;
                }
            }
        }
        self.nodes
            .handles()
            .into_iter()
            .filter(|h| !is_child[h.index()])
            .collect()
    }

    /// Describes the first handle that points at a vacant slot, if any.
    pub fn check_references(&self) -> Result<(), String> {
        fn check<T>(arena: &Arena<T>, handle: Handle<T>, what: &str) -> Result<(), String> {
            if arena.contains(handle) {
                Ok(())
            } else {
                Err(format!("dangling {what} reference {handle:?}"))
            }
        }

        if let Some(scene) = self.default_scene {
            check(&self.scenes, scene, "scene")?;
        }
        for (_, scene) in self.scenes.iter() {
            for &node in &scene.nodes {
                check(&self.nodes, node, "node")?;
            }
        }
        for (_, node) in self.nodes.iter() {
            for &child in &node.children {
                check(&self.nodes, child, "node")?;
            }
            if let Some(mesh) = node.mesh {
                check(&self.meshes, mesh, "mesh")?;
            }
            if let Some(skin) = node.skin {
                check(&self.skins, skin, "skin")?;
            }
            if let Some(camera) = node.camera {
                check(&self.cameras, camera, "camera")?;
            }
        }
        for (_, mesh) in self.meshes.iter() {
            for primitive in &mesh.primitives {
                for accessor in primitive.accessors() {
                    check(&self.accessors, accessor, "accessor")?;
                }
                if let Some(material) = primitive.material {
                    check(&self.materials, material, "material")?;
                }
            }
        }
        for (_, material) in self.materials.iter() {
            for texture in material.textures() {
                check(&self.textures, texture, "texture")?;
            }
        }
        for (_, texture) in self.textures.iter() {
            if let Some(sampler) = texture.sampler {
                check(&self.samplers, sampler, "sampler")?;
            }
        }
        for (_, skin) in self.skins.iter() {
            for &joint in &skin.joints {
                check(&self.nodes, joint, "joint node")?;
            }
            if let Some(skeleton) = skin.skeleton {
                check(&self.nodes, skeleton, "skeleton node")?;
            }
            if let Some(ibm) = skin.inverse_bind_matrices {
                check(&self.accessors, ibm, "accessor")?;
            }
        }
        for (_, animation) in self.animations.iter() {
            for sampler in &animation.samplers {
                check(&self.accessors, sampler.input, "accessor")?;
                check(&self.accessors, sampler.output, "accessor")?;
            }
            for channel in &animation.channels {
                check(&self.nodes, channel.target, "animated node")?;
                if channel.sampler >= animation.samplers.len() {
                    return Err(format!("channel sampler {} out of range", channel.sampler));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_reference_detected() {
        let mut doc = Document::new();
        let position = doc
            .accessors
            .insert(Accessor::from_f32(ElementType::Vec3, vec![0.0; 9]));
        let mesh = doc.meshes.insert(Mesh {
            primitives: vec![Primitive::new(position)],
            ..Default::default()
        });
        let node = doc.nodes.insert(Node::with_mesh(mesh));
        doc.scenes.insert(Scene {
            name: None,
            nodes: vec![node],
        });
        assert!(doc.check_references().is_ok());

        doc.accessors.remove(position);
        let err = doc.check_references().unwrap_err();
        assert!(err.contains("accessor"));
    }

    #[test]
    fn test_referenced_textures_deduplicated() {
        let mut doc = Document::new();
        let tex = doc.textures.insert(Texture::embedded(vec![1, 2, 3], "image/png"));
        doc.textures.insert(Texture::embedded(vec![4], "image/png"));
        let mut material = Material::default();
        material.set_texture(TextureSlot::BaseColor, Some(tex));
        material.set_texture(TextureSlot::Emissive, Some(tex));
        doc.materials.insert(material);

        assert_eq!(doc.referenced_textures(), vec![tex]);
    }

    #[test]
    fn test_parentless_nodes() {
        let mut doc = Document::new();
        let child = doc.nodes.insert(Node::default());
        let root = doc.nodes.insert(Node {
            children: vec![child],
            ..Default::default()
        });
        assert_eq!(doc.parentless_nodes(), vec![root]);
    }
}
