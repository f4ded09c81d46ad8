//! Final rewrite: merge identical resources, then drop everything unreachable.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::document::{
    Accessor, Arena, Camera, Document, Handle, Material, Mesh, Node, Sampler, Skin, Texture,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub duplicates_merged: usize,
    pub entities_pruned: usize,
}

pub fn cleanup(doc: &mut Document) -> CleanupReport {
    let report = CleanupReport {
        duplicates_merged: dedup(doc),
        entities_pruned: prune(doc),
    };
    log::debug!(
        "cleanup merged {} duplicates, pruned {} entities",
        report.duplicates_merged,
        report.entities_pruned
    );
    report
}

fn accessor_hash(accessor: &Accessor) -> u64 {
    let mut bytes = Vec::with_capacity(accessor.data.len() * accessor.data.component_size());
    for i in 0..accessor.data.len() {
        accessor.data.write_component(i, &mut bytes);
    }
    let mut hasher = DefaultHasher::new();
    accessor.element_type.hash(&mut hasher);
    accessor.normalized.hash(&mut hasher);
    accessor.data.component_size().hash(&mut hasher);
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Maps every duplicate to the first equal entity, linear scan.
fn duplicates<T>(arena: &Arena<T>, same: impl Fn(&T, &T) -> bool) -> HashMap<Handle<T>, Handle<T>> {
    let mut survivors: Vec<Handle<T>> = Vec::new();
    let mut remap = HashMap::new();
    for (handle, value) in arena.iter() {
        match survivors.iter().find(|&&s| same(&arena[s], value)) {
            Some(&survivor) => {
                remap.insert(handle, survivor);
            }
            None => survivors.push(handle),
        }
    }
    remap
}

fn remove_all<T>(arena: &mut Arena<T>, remap: &HashMap<Handle<T>, Handle<T>>) {
    for &handle in remap.keys() {
        arena.remove(handle);
    }
}

/// Merges byte-identical accessors, samplers, textures and materials and
/// points every reference at the survivor. Returns how many were merged.
pub fn dedup(doc: &mut Document) -> usize {
    let mut merged = 0;

    // Accessors are bucketed by content hash before the exact comparison.
    let mut buckets: HashMap<u64, Vec<Handle<Accessor>>> = HashMap::new();
    let mut accessors = HashMap::new();
    for (handle, accessor) in doc.accessors.iter() {
        let bucket = buckets.entry(accessor_hash(accessor)).or_default();
        match bucket
            .iter()
            .find(|&&s| doc.accessors[s].same_content(accessor))
        {
            Some(&survivor) => {
                accessors.insert(handle, survivor);
            }
            None => bucket.push(handle),
        }
    }
    let swap = |h: &mut Handle<Accessor>| {
        if let Some(&survivor) = accessors.get(h) {
            *h = survivor;
        }
    };
    for (_, mesh) in doc.meshes.iter_mut() {
        for primitive in mesh.primitives.iter_mut() {
            primitive.attributes.values_mut().for_each(swap);
            primitive.indices.iter_mut().for_each(swap);
            for target in primitive.targets.iter_mut() {
                target.values_mut().for_each(swap);
            }
        }
    }
    for (_, skin) in doc.skins.iter_mut() {
        skin.inverse_bind_matrices.iter_mut().for_each(swap);
    }
    for (_, animation) in doc.animations.iter_mut() {
        for sampler in animation.samplers.iter_mut() {
            swap(&mut sampler.input);
            swap(&mut sampler.output);
        }
    }
    remove_all(&mut doc.accessors, &accessors);
    merged += accessors.len();

    let samplers = duplicates(&doc.samplers, |a, b| a.same_content(b));
    for (_, texture) in doc.textures.iter_mut() {
        if let Some(s) = texture.sampler.and_then(|s| samplers.get(&s)) {
            texture.sampler = Some(*s);
        }
    }
    remove_all(&mut doc.samplers, &samplers);
    merged += samplers.len();

    let textures = duplicates(&doc.textures, |a, b| a.same_content(b));
    for (_, material) in doc.materials.iter_mut() {
        material.remap_textures(|t| Some(textures.get(&t).copied().unwrap_or(t)));
    }
    remove_all(&mut doc.textures, &textures);
    merged += textures.len();

    let materials = duplicates(&doc.materials, |a, b| a.same_content(b));
    for (_, mesh) in doc.meshes.iter_mut() {
        for primitive in mesh.primitives.iter_mut() {
            if let Some(m) = primitive.material.and_then(|m| materials.get(&m)) {
                primitive.material = Some(*m);
            }
        }
    }
    remove_all(&mut doc.materials, &materials);
    merged += materials.len();

    merged
}

#[derive(Default)]
struct Marks {
    nodes: HashSet<Handle<Node>>,
    meshes: HashSet<Handle<Mesh>>,
    accessors: HashSet<Handle<Accessor>>,
    materials: HashSet<Handle<Material>>,
    textures: HashSet<Handle<Texture>>,
    samplers: HashSet<Handle<Sampler>>,
    cameras: HashSet<Handle<Camera>>,
    skins: HashSet<Handle<Skin>>,
}

fn mark(doc: &Document) -> Marks {
    let mut marks = Marks::default();
    let mut pending: Vec<Handle<Node>> = if doc.scenes.is_empty() {
        doc.parentless_nodes()
    } else {
        doc.scenes
            .iter()
            .flat_map(|(_, scene)| scene.nodes.iter().copied())
            .collect()
    };

    while let Some(handle) = pending.pop() {
        let Some(node) = doc.nodes.get(handle) else {
            continue;
        };
        if !marks.nodes.insert(handle) {
            continue;
        }
        pending.extend(node.children.iter().copied());
        marks.cameras.extend(node.camera);
        if let Some(skin) = node.skin.filter(|&s| marks.skins.insert(s)) {
            let skin = &doc.skins[skin];
            pending.extend(skin.joints.iter().copied());
            pending.extend(skin.skeleton);
            marks.accessors.extend(skin.inverse_bind_matrices);
        }
        if let Some(mesh) = node.mesh.filter(|&m| marks.meshes.insert(m)) {
            for primitive in &doc.meshes[mesh].primitives {
                marks.accessors.extend(primitive.accessors());
                if let Some(material) = primitive.material.filter(|&m| marks.materials.insert(m)) {
                    for texture in doc.materials[material].textures() {
                        if marks.textures.insert(texture) {
                            marks.samplers.extend(doc.textures[texture].sampler);
                        }
                    }
                }
            }
        }
    }
    marks
}

/// Mark-and-sweep from the scene roots (or, without scenes, every
/// parentless node). Returns how many entities were removed.
pub fn prune(doc: &mut Document) -> usize {
    let mut marks = mark(doc);

    // Channels whose target died go away, then samplers nobody plays.
    let mut animations_removed = 0;
    for (_, animation) in doc.animations.iter_mut() {
        let sampler_count = animation.samplers.len();
        animation
            .channels
            .retain(|c| c.sampler < sampler_count && marks.nodes.contains(&c.target));
        let mut used: Vec<usize> = animation.channels.iter().map(|c| c.sampler).collect();
        used.sort_unstable();
        used.dedup();
        let samplers = std::mem::take(&mut animation.samplers);
        let mut renumber = vec![usize::MAX; samplers.len()];
        for (new, &old) in used.iter().enumerate() {
            renumber[old] = new;
        }
        animation.samplers = samplers
            .into_iter()
            .enumerate()
            .filter(|(i, _)| renumber[*i] != usize::MAX)
            .map(|(_, s)| s)
            .collect();
        for channel in animation.channels.iter_mut() {
            channel.sampler = renumber[channel.sampler];
        }
        for sampler in &animation.samplers {
            marks.accessors.insert(sampler.input);
            marks.accessors.insert(sampler.output);
        }
    }
    doc.animations.retain(|_, a| {
        let keep = !a.channels.is_empty();
        if !keep {
            animations_removed += 1;
        }
        keep
    });

    let before = doc.nodes.len()
        + doc.meshes.len()
        + doc.accessors.len()
        + doc.materials.len()
        + doc.textures.len()
        + doc.samplers.len()
        + doc.cameras.len()
        + doc.skins.len();
    doc.nodes.retain(|h, _| marks.nodes.contains(&h));
    doc.meshes.retain(|h, _| marks.meshes.contains(&h));
    doc.accessors.retain(|h, _| marks.accessors.contains(&h));
    doc.materials.retain(|h, _| marks.materials.contains(&h));
    doc.textures.retain(|h, _| marks.textures.contains(&h));
    doc.samplers.retain(|h, _| marks.samplers.contains(&h));
    doc.cameras.retain(|h, _| marks.cameras.contains(&h));
    doc.skins.retain(|h, _| marks.skins.contains(&h));
    let after = doc.nodes.len()
        + doc.meshes.len()
        + doc.accessors.len()
        + doc.materials.len()
        + doc.textures.len()
        + doc.samplers.len()
        + doc.cameras.len()
        + doc.skins.len();

    before - after + animations_removed
}
