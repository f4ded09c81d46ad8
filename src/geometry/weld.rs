use std::collections::HashMap;

use crate::document::{Document, Primitive};
use crate::error::{Error, Pass, Result};

use super::{triangle_indices, vertex_count};

/// Outcome of welding one primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welded {
    /// Surviving source vertices, in first-use order.
    pub kept: Vec<u32>,
    /// Triangle indices in the new vertex numbering.
    pub indices: Vec<u32>,
}

fn cell(value: f32, tolerance: f32) -> i64 {
    (f64::from(value) / f64::from(tolerance)).floor() as i64
}

/// Grid cell over the first (up to) three components of a vertex.
fn cell_of(values: &[f32], tolerance: f32) -> [i64; 3] {
    let mut key = [0; 3];
    for (k, &v) in key.iter_mut().zip(values) {
        *k = cell(v, tolerance);
    }
    key
}

/// Merges each vertex into the first earlier vertex whose attributes (and
/// morph target deltas) all lie within `tolerance`. Returns `None` when
/// nothing merges.
pub fn weld(doc: &Document, primitive: &Primitive, tolerance: f32) -> Result<Option<Welded>> {
    let vertex_count = vertex_count(doc, primitive, Pass::Weld)?;
    let streams: Vec<(Vec<f32>, usize)> = primitive
        .attributes
        .values()
        .chain(primitive.targets.iter().flat_map(|t| t.values()))
        .map(|&h| {
            let accessor = &doc.accessors[h];
            (accessor.read_f32(), accessor.element_type.multiplicity())
        })
        .collect();

    // Interleave every stream so one vertex is one contiguous row.
    let width: usize = streams.iter().map(|(_, n)| n).sum();
    let mut rows = Vec::with_capacity(vertex_count * width);
    for v in 0..vertex_count {
        for (values, n) in &streams {
            let row = values.get(v * n..(v + 1) * n).ok_or_else(|| {
                Error::pass(Pass::Weld, "attribute holds fewer values than vertices")
            })?;
            rows.extend_from_slice(row);
        }
    }
    let row = |v: usize| &rows[v * width..(v + 1) * width];
    let close = |a: &[f32], b: &[f32]| a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance);

    // Representatives bucketed by cell; a match within tolerance is at most
    // one cell away along each bucketed axis.
    let axes = width.min(3);
    let mut buckets: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
    let mut kept: Vec<u32> = Vec::new();
    let mut remap = Vec::with_capacity(vertex_count);
    for v in 0..vertex_count {
        let values = row(v);
        let home = cell_of(values, tolerance);
        let mut found = None;
        'search: for offset in 0..3usize.pow(axes as u32) {
            let mut key = home;
            let mut rest = offset;
            for k in key.iter_mut().take(axes) {
                *k += (rest % 3) as i64 - 1;
                rest /= 3;
            }
            for &slot in buckets.get(&key).into_iter().flatten() {
                if close(row(kept[slot as usize] as usize), values) {
                    found = Some(slot);
                    break 'search;
                }
            }
        }
        let slot = found.unwrap_or_else(|| {
            let slot = kept.len() as u32;
            kept.push(v as u32);
            buckets.entry(home).or_default().push(slot);
            slot
        });
        remap.push(slot);
    }

    if kept.len() == vertex_count {
        return Ok(None);
    }

    let indices = triangle_indices(doc, primitive, vertex_count, Pass::Weld)?
        .chunks_exact(3)
        .map(|t| [remap[t[0] as usize], remap[t[1] as usize], remap[t[2] as usize]])
        .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
        .flatten()
        .collect();

    Ok(Some(Welded { kept, indices }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Accessor, ElementType, Semantic};

    fn quad_as_two_triangles(doc: &mut Document) -> Primitive {
        // Unindexed quad: the shared diagonal appears twice.
        let positions = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec3,
            vec![
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
            ],
        ));
        Primitive::new(positions)
    }

    #[test]
    fn test_duplicate_vertices_merge() {
        let mut doc = Document::new();
        let primitive = quad_as_two_triangles(&mut doc);
        let welded = weld(&doc, &primitive, 1e-5).unwrap().unwrap();
        assert_eq!(welded.kept, vec![0, 1, 2, 5]);
        assert_eq!(welded.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_near_duplicates_within_tolerance_merge() {
        let mut doc = Document::new();
        let positions = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec3,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.000_001, 0.0, 0.0],
        ));
        let mut primitive = Primitive::new(positions);
        primitive.indices = Some(doc.accessors.insert(Accessor::from_indices(vec![0, 1, 2, 0, 3, 2])));
        let welded = weld(&doc, &primitive, 1e-5).unwrap().unwrap();
        assert_eq!(welded.kept.len(), 3);
    }

    #[test]
    fn test_values_straddling_a_cell_edge_merge() {
        let mut doc = Document::new();
        let positions = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec3,
            vec![
                9.999_99e-6, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
                1.000_001e-5, 0.0, 0.0,
            ],
        ));
        let mut primitive = Primitive::new(positions);
        primitive.indices = Some(doc.accessors.insert(Accessor::from_indices(vec![0, 1, 2, 3, 1, 2])));
        let welded = weld(&doc, &primitive, 1e-5).unwrap().unwrap();
        assert_eq!(welded.kept, vec![0, 1, 2]);
        // The second triangle collapses onto the first but is not degenerate.
        assert_eq!(welded.indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_values_beyond_tolerance_stay_apart() {
        let mut doc = Document::new();
        let positions = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec3,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 3e-5, 0.0, 0.0],
        ));
        assert_eq!(weld(&doc, &Primitive::new(positions), 1e-5).unwrap(), None);
    }

    #[test]
    fn test_uv_seam_stays_split() {
        let mut doc = Document::new();
        let mut primitive = quad_as_two_triangles(&mut doc);
        let uvs = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec2,
            vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.5, 0.0, 1.0, 1.0, 0.0, 1.0],
        ));
        primitive.attributes.insert(Semantic::TexCoords(0), uvs);

        let welded = weld(&doc, &primitive, 1e-5).unwrap().unwrap();
        // Vertex 3 shares its position with vertex 0 but not its UV.
        assert_eq!(welded.kept, vec![0, 1, 2, 3, 5]);
    }

    #[test]
    fn test_unique_vertices_untouched() {
        let mut doc = Document::new();
        let positions = doc.accessors.insert(Accessor::from_f32(
            ElementType::Vec3,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        ));
        assert_eq!(weld(&doc, &Primitive::new(positions), 1e-5).unwrap(), None);
    }
}
