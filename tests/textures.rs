mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gltf_shrink::codec::{ExternalFile, decode_glb};
use gltf_shrink::document::{Material, Texture, TextureSlot};
use gltf_shrink::prelude::*;
use gltf_shrink::texture::{TextureOutcome, probe};

fn textured_quad(textures: usize, referenced: usize) -> Vec<u8> {
    let mut doc = common::quad();
    let handles: Vec<_> = (0..textures)
        .map(|i| {
            let bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, i as u8];
            doc.textures.insert(Texture::embedded(bytes, "image/png"))
        })
        .collect();
    let mut material = Material::default();
    for (slot, &texture) in TextureSlot::ALL.iter().zip(&handles[..referenced]) {
        material.set_texture(*slot, Some(texture));
    }
    let material = doc.materials.insert(material);
    for (_, mesh) in doc.meshes.iter_mut() {
        for primitive in &mut mesh.primitives {
            primitive.material = Some(material);
        }
    }
    common::glb(&doc)
}

#[test]
fn unreferenced_embedded_textures_are_pruned() {
    let input = textured_quad(5, 2);
    let settings = OptimizationSettings {
        texture_quality: TextureQuality::Medium,
        ..Default::default()
    };

    let outcome = common::quick_pipeline().optimize(&input, &settings, |_, _| {});
    assert!(!outcome.is_fallback(), "{:?}", outcome.error());
    let result = outcome.into_result();
    assert_eq!(result.report.textures.pruned, 3);

    let output = decode_glb(&result.optimized_bytes).unwrap();
    let mut kept: Vec<Vec<u8>> = output.textures.iter().map(|(_, t)| t.bytes.clone()).collect();
    kept.sort();
    assert_eq!(kept.len(), 2);
    for (i, bytes) in kept.iter().enumerate() {
        // Embedded images are never re-encoded.
        assert_eq!(bytes, &vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, i as u8]);
    }
}

#[test]
fn high_quality_skips_the_texture_pass() {
    let input = textured_quad(5, 2);
    let result = common::quick_pipeline()
        .optimize(&input, &OptimizationSettings::default(), |_, _| {})
        .into_result();

    // The texture pass reports nothing; unreferenced textures still go in cleanup.
    assert_eq!(result.report.textures.pruned, 0);
    assert!(result.report.textures.entries.is_empty());
    assert_eq!(result.model_info.original.stats().map(|s| s.textures), Some(5));
    assert_eq!(result.model_info.optimized.stats().map(|s| s.textures), Some(2));
}

fn scene_text(positions: &[f32]) -> String {
    let buffer: Vec<u8> = positions.iter().flat_map(|p| p.to_le_bytes()).collect();
    format!(
        r#"{{
            "asset": {{ "version": "2.0" }},
            "scene": 0,
            "scenes": [ {{ "nodes": [0] }} ],
            "nodes": [ {{ "mesh": 0 }} ],
            "meshes": [ {{ "primitives": [ {{ "attributes": {{ "POSITION": 0 }}, "material": 0 }} ] }} ],
            "materials": [ {{ "pbrMetallicRoughness": {{ "baseColorTexture": {{ "index": 0 }} }} }} ],
            "textures": [ {{ "source": 0 }} ],
            "images": [ {{ "uri": "albedo.png" }} ],
            "buffers": [ {{ "uri": "data:application/octet-stream;base64,{}", "byteLength": {} }} ],
            "bufferViews": [ {{ "buffer": 0, "byteLength": {} }} ],
            "accessors": [ {{
                "bufferView": 0, "componentType": 5126, "count": {}, "type": "VEC3",
                "min": [0, 0, 0], "max": [1, 1, 0]
            }} ]
        }}"#,
        STANDARD.encode(&buffer),
        buffer.len(),
        buffer.len(),
        positions.len() / 3
    )
}

#[test]
fn external_texture_is_downscaled_to_the_quality_tier() {
    let text = scene_text(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    let files = vec![ExternalFile::new("albedo.png", common::noise_png(1024, 1024))];
    let settings = OptimizationSettings {
        texture_quality: TextureQuality::Low,
        ..Default::default()
    };

    let mut progress = Vec::new();
    let result = common::quick_pipeline()
        .optimize_with_external_textures(&text, &files, &settings, |p, s| progress.push((p, s)))
        .unwrap();

    assert_eq!(progress.last(), Some(&(100, Stage::Completed)));
    assert!(is_valid_container(&result.optimized_bytes));
    let entry = &result.report.textures.entries[0];
    assert!(matches!(
        entry.outcome,
        TextureOutcome::Recompressed { width: 512, height: 512, .. }
    ));

    let output = decode_glb(&result.optimized_bytes).unwrap();
    let (_, texture) = output.textures.iter().next().unwrap();
    assert_eq!(probe(&texture.bytes), Some((512, 512)));
    assert_eq!(result.model_info.optimized.stats().map(|s| s.triangles), Some(1));
}

#[test]
fn unreadable_external_texture_keeps_its_bytes() {
    let text = scene_text(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    let garbage = b"not an image".to_vec();
    let files = vec![ExternalFile::new("albedo.png", garbage.clone())];

    let result = common::quick_pipeline()
        .optimize_with_external_textures(
            &text,
            &files,
            &OptimizationSettings::default(),
            |_, _| {},
        )
        .unwrap();

    assert!(matches!(
        result.report.textures.entries[0].outcome,
        TextureOutcome::Skipped { .. }
    ));
    let output = decode_glb(&result.optimized_bytes).unwrap();
    let (_, texture) = output.textures.iter().next().unwrap();
    assert_eq!(texture.bytes, garbage);
}
