//! Geometry pass: vertex welding, simplification and keyframe resampling.

mod resample;
mod simplify;
mod weld;

use serde::Serialize;

use crate::document::{Accessor, Document, Handle, Mode, Primitive};
use crate::error::{Error, Pass, Result};
use crate::settings::OptimizationSettings;

pub use resample::resample_animations;
pub use simplify::simplify;
pub use weld::{Welded, weld};

/// Vertices closer than this on every attribute component are merged.
pub const WELD_TOLERANCE: f32 = 1e-5;

/// Largest per-component deviation a dropped keyframe may introduce.
pub const RESAMPLE_TOLERANCE: f32 = 1e-4;

/// Collapses are rejected once their error passes this fraction of the
/// primitive's bounding box diagonal.
const SIMPLIFY_ERROR_FRACTION: f64 = 0.01;

const MIN_RATIO: f32 = 0.3;
const MAX_REDUCTION: f32 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryReport {
    pub primitives_welded: usize,
    pub primitives_simplified: usize,
    pub vertices_removed: usize,
    pub triangles_removed: usize,
    pub keyframes_removed: usize,
}

/// Weld and simplify only run for `0 < decimation < 80`.
pub fn simplification_enabled(mesh_decimation: u8) -> bool {
    mesh_decimation > 0 && mesh_decimation < 80
}

/// Fraction of triangles to keep: `max(0.3, 1 - d / 100 * 0.7)`.
pub fn simplify_ratio(mesh_decimation: u8) -> f32 {
    (1.0 - f32::from(mesh_decimation) / 100.0 * MAX_REDUCTION).max(MIN_RATIO)
}

/// Runs the geometry sub-passes in place.
pub fn optimize_geometry(
    doc: &mut Document,
    settings: &OptimizationSettings,
) -> Result<GeometryReport> {
    let mut report = GeometryReport::default();

    if simplification_enabled(settings.mesh_decimation) {
        let ratio = simplify_ratio(settings.mesh_decimation);
        for mesh in doc.meshes.handles() {
            for i in 0..doc.meshes[mesh].primitives.len() {
                let mut primitive = doc.meshes[mesh].primitives[i].clone();
                if !matches!(primitive.mode, Mode::Triangles) {
                    continue;
                }
                weld_primitive(doc, &mut primitive, &mut report)?;
                simplify_primitive(doc, &mut primitive, ratio, &mut report)?;
                doc.meshes[mesh].primitives[i] = primitive;
            }
        }
    } else {
        log::debug!(
            "mesh decimation {} outside the simplification band, skipping weld/simplify",
            settings.mesh_decimation
        );
    }

    report.keyframes_removed = resample_animations(doc, RESAMPLE_TOLERANCE);

    log::info!(
        "geometry: welded {} primitives, simplified {}, removed {} vertices, {} triangles, {} keyframes",
        report.primitives_welded,
        report.primitives_simplified,
        report.vertices_removed,
        report.triangles_removed,
        report.keyframes_removed
    );
    Ok(report)
}

fn weld_primitive(
    doc: &mut Document,
    primitive: &mut Primitive,
    report: &mut GeometryReport,
) -> Result<()> {
    let vertex_count = vertex_count(doc, primitive, Pass::Weld)?;
    let triangles_before = triangle_indices(doc, primitive, vertex_count, Pass::Weld)?.len() / 3;
    if let Some(welded) = weld(doc, primitive, WELD_TOLERANCE)? {
        report.primitives_welded += 1;
        report.vertices_removed += vertex_count - welded.kept.len();
        report.triangles_removed += triangles_before - welded.indices.len() / 3;
        rebuild(doc, primitive, &welded.kept, welded.indices);
    }
    Ok(())
}

fn simplify_primitive(
    doc: &mut Document,
    primitive: &mut Primitive,
    ratio: f32,
    report: &mut GeometryReport,
) -> Result<()> {
    let vertex_count = vertex_count(doc, primitive, Pass::Simplify)?;
    let indices = triangle_indices(doc, primitive, vertex_count, Pass::Simplify)?;
    let triangles = indices.len() / 3;
    let target = (triangles as f32 * ratio).ceil() as usize;
    if target >= triangles {
        return Ok(());
    }

    let Some(position) = primitive.position() else {
        return Ok(());
    };
    let positions: Vec<[f32; 3]> = doc.accessors[position]
        .read_f32()
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect();
    if positions.len() != vertex_count {
        return Err(Error::pass(
            Pass::Simplify,
            format!("{} positions for {vertex_count} vertices", positions.len()),
        ));
    }
    let max_error = (extent(&positions) * SIMPLIFY_ERROR_FRACTION).powi(2);

    let simplified = simplify(&positions, &indices, target, max_error);
    if simplified.len() == indices.len() {
        return Ok(());
    }

    // Compact away vertices no triangle references any more.
    let mut remap = vec![u32::MAX; vertex_count];
    let mut kept = Vec::new();
    let indices: Vec<u32> = simplified
        .iter()
        .map(|&v| {
            let slot = &mut remap[v as usize];
            if *slot == u32::MAX {
                *slot = kept.len() as u32;
                kept.push(v);
            }
            *slot
        })
        .collect();

    report.primitives_simplified += 1;
    report.vertices_removed += vertex_count - kept.len();
    report.triangles_removed += triangles - indices.len() / 3;
    rebuild(doc, primitive, &kept, indices);
    Ok(())
}

/// Shared element count of every attribute and morph target accessor.
fn vertex_count(doc: &Document, primitive: &Primitive, pass: Pass) -> Result<usize> {
    let mut count = None;
    let handles = primitive
        .attributes
        .values()
        .chain(primitive.targets.iter().flat_map(|t| t.values()));
    for &handle in handles {
        let n = doc.accessors[handle].count();
        match count {
            None => count = Some(n),
            Some(c) if c != n => {
                return Err(Error::pass(
                    pass,
                    format!("attribute counts disagree ({c} vs {n})"),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(count.unwrap_or(0))
}

/// Triangle list indices, synthesised for unindexed primitives. Trailing
/// partial triangles are dropped.
fn triangle_indices(
    doc: &Document,
    primitive: &Primitive,
    vertex_count: usize,
    pass: Pass,
) -> Result<Vec<u32>> {
    let mut indices = match primitive.indices {
        Some(handle) => doc.accessors[handle]
            .read_indices()
            .ok_or_else(|| Error::pass(pass, "index accessor is not unsigned integer"))?,
        None => (0..vertex_count as u32).collect(),
    };
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(Error::pass(
            pass,
            format!("index {bad} out of range for {vertex_count} vertices"),
        ));
    }
    indices.truncate(indices.len() / 3 * 3);
    Ok(indices)
}

fn extent(positions: &[[f32; 3]]) -> f64 {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for p in positions {
        for c in 0..3 {
            min[c] = min[c].min(f64::from(p[c]));
            max[c] = max[c].max(f64::from(p[c]));
        }
    }
    if positions.is_empty() {
        return 0.0;
    }
    (0..3).map(|c| (max[c] - min[c]).powi(2)).sum::<f64>().sqrt()
}

/// Points `primitive` at fresh accessors holding only `kept` vertices.
/// The previous accessors may be shared, so they are left for cleanup.
fn rebuild(doc: &mut Document, primitive: &mut Primitive, kept: &[u32], indices: Vec<u32>) {
    let regather = |doc: &mut Document, handle: &mut Handle<Accessor>| {
        let gathered = doc.accessors[*handle].gather(kept);
        *handle = doc.accessors.insert(gathered);
    };
    for handle in primitive.attributes.values_mut() {
        regather(doc, handle);
    }
    for target in primitive.targets.iter_mut() {
        for handle in target.values_mut() {
            regather(doc, handle);
        }
    }
    primitive.indices = Some(doc.accessors.insert(Accessor::from_indices(indices)));
}
