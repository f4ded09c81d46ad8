//! Aggregate statistics over a [`Document`].

use serde::Serialize;

use crate::document::{Document, Primitive};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub scenes: usize,
    pub meshes: usize,
    pub materials: usize,
    pub textures: usize,
    pub animations: usize,
    pub vertices: usize,
    pub triangles: usize,
}

/// Statistics, or an explicit marker that they could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ModelInfo {
    Available(ModelStats),
    Unavailable { reason: String },
}

impl ModelInfo {
    pub fn stats(&self) -> Option<&ModelStats> {
        match self {
            ModelInfo::Available(stats) => Some(stats),
            ModelInfo::Unavailable { .. } => None,
        }
    }
}

/// `index_count / 3` when indexed, else `vertex_count / 3`, truncated.
pub fn triangle_count(index_count: Option<usize>, vertex_count: usize) -> usize {
    index_count.unwrap_or(vertex_count) / 3
}

fn primitive_counts(doc: &Document, primitive: &Primitive) -> (usize, usize) {
    let vertices = primitive
        .position()
        .and_then(|h| doc.accessors.get(h))
        .map_or(0, |a| a.count());
    let indices = primitive
        .indices
        .and_then(|h| doc.accessors.get(h))
        .map(|a| a.count());
    (vertices, triangle_count(indices, vertices))
}

/// Read-only traversal; the same function yields the baseline and the final numbers.
pub fn stats(doc: &Document) -> ModelStats {
    let mut stats = ModelStats {
        scenes: doc.scenes.len(),
        meshes: doc.meshes.len(),
        materials: doc.materials.len(),
        textures: doc.textures.len(),
        animations: doc.animations.len(),
        ..Default::default()
    };
    for (_, mesh) in doc.meshes.iter() {
        for primitive in &mesh.primitives {
            let (vertices, triangles) = primitive_counts(doc, primitive);
            stats.vertices += vertices;
            stats.triangles += triangles;
        }
    }
    stats
}
