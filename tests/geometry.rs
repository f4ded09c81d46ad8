mod common;

use gltf_shrink::geometry::{optimize_geometry, simplify_ratio};
use gltf_shrink::inspect;
use gltf_shrink::settings::OptimizationSettings;

fn with_decimation(mesh_decimation: u8) -> OptimizationSettings {
    OptimizationSettings {
        mesh_decimation,
        ..Default::default()
    }
}

#[test]
fn simplification_keeps_at_least_the_floor_ratio() {
    for d in [1, 10, 25, 50, 70, 79] {
        let mut doc = common::grid(16, 0.0);
        let before = inspect::stats(&doc).triangles;

        optimize_geometry(&mut doc, &with_decimation(d)).unwrap();
        let after = inspect::stats(&doc).triangles;

        assert!(after <= before, "d={d}: {after} > {before}");
        assert!(after as f32 >= 0.3 * before as f32, "d={d}: {after} < 0.3 * {before}");
        let target = (before as f32 * simplify_ratio(d)).ceil() as usize;
        assert!(after >= target, "d={d}: {after} below target {target}");
        assert!(doc.check_references().is_ok());
    }
}

#[test]
fn flat_grid_is_reduced_at_moderate_decimation() {
    let mut doc = common::grid(16, 0.0);
    let before = inspect::stats(&doc).triangles;
    let report = optimize_geometry(&mut doc, &with_decimation(50)).unwrap();

    assert_eq!(report.primitives_simplified, 1);
    assert!(inspect::stats(&doc).triangles < before);
}

#[test]
fn decimation_outside_band_leaves_meshes_alone() {
    for d in [0, 80, 90, 100] {
        let mut doc = common::grid(8, 0.2);
        let before = inspect::stats(&doc);

        let report = optimize_geometry(&mut doc, &with_decimation(d)).unwrap();

        assert_eq!(inspect::stats(&doc), before, "d={d}");
        assert_eq!(report.primitives_simplified, 0);
        assert_eq!(report.primitives_welded, 0);
    }
}

#[test]
fn coincident_vertices_are_welded() {
    let mut doc = common::quad_with_duplicates();
    assert_eq!(inspect::stats(&doc).vertices, 7);

    let report = optimize_geometry(&mut doc, &with_decimation(50)).unwrap();

    assert_eq!(report.primitives_welded, 1);
    let stats = inspect::stats(&doc);
    assert_eq!(stats.vertices, 4);
    assert_eq!(stats.triangles, 2);
}
