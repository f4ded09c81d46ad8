//! Texture pass.
//!
//! Embedded images are only pruned when unreferenced; externally supplied
//! images are decoded, downscaled to the quality tier and re-encoded. Each
//! texture is processed in isolation and reports its own outcome.

mod resize;

use std::collections::HashSet;
use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat};
use rayon::prelude::*;
use serde::Serialize;

use crate::document::{Document, Handle, Texture};
use crate::error::{Error, Pass, Result};
use crate::settings::TextureQuality;

pub use resize::{probe, target_size};

/// Why a texture was left as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Empty,
    UnsupportedFormat,
    DecodeFailed,
    EncodeFailed,
    /// Re-encoding did not shrink an image that needed no resize.
    NoGain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TextureOutcome {
    #[serde(rename_all = "camelCase")]
    Recompressed {
        original_size: usize,
        new_size: usize,
        width: u32,
        height: u32,
        mime_type: String,
    },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextureEntry {
    pub texture: Handle<Texture>,
    pub outcome: TextureOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureReport {
    pub pruned: usize,
    pub entries: Vec<TextureEntry>,
}

impl TextureReport {
    pub fn outcome(&self, texture: Handle<Texture>) -> Option<&TextureOutcome> {
        self.entries
            .iter()
            .find(|e| e.texture == texture)
            .map(|e| &e.outcome)
    }

    pub fn recompressed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TextureOutcome::Recompressed { .. }))
            .count()
    }
}

/// Deletes every texture no material slot references. Surviving textures
/// are not touched. Returns how many were removed.
pub fn prune_unused_textures(doc: &mut Document) -> usize {
    let used: HashSet<Handle<Texture>> = doc.referenced_textures().into_iter().collect();
    let before = doc.textures.len();
    doc.textures.retain(|handle, _| used.contains(&handle));
    let pruned = before - doc.textures.len();
    if pruned > 0 {
        log::info!("pruned {pruned} unreferenced textures");
    }
    pruned
}

struct Recompressed {
    bytes: Vec<u8>,
    mime_type: &'static str,
    width: u32,
    height: u32,
}

fn has_transparency(img: &DynamicImage) -> bool {
    img.color().has_alpha() && img.pixels().any(|(_, _, px)| px.0[3] < u8::MAX)
}

fn recompress(bytes: &[u8], quality: TextureQuality) -> std::result::Result<Recompressed, SkipReason> {
    if bytes.is_empty() {
        return Err(SkipReason::Empty);
    }
    let format = match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP)) => format,
        _ => return Err(SkipReason::UnsupportedFormat),
    };
    let (width, height) = resize::probe(bytes).ok_or(SkipReason::DecodeFailed)?;
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        log::debug!("texture decode failed: {e}");
        SkipReason::DecodeFailed
    })?;

    let (new_width, new_height) = target_size(width, height, quality.max_dimension());
    let encode_quality = (quality.encode_quality() * 100.0).round() as u8;

    let mut out = Vec::new();
    let writer = Cursor::new(&mut out);
    let (encoded, mime_type) = if has_transparency(&img) {
        (resize::resize_to_png(&img, new_width, new_height, writer), "image/png")
    } else {
        (
            resize::resize_to_jpg(&img, new_width, new_height, encode_quality, writer),
            "image/jpeg",
        )
    };
    encoded.map_err(|e| {
        log::debug!("texture encode failed: {e}");
        SkipReason::EncodeFailed
    })?;

    if out.len() >= bytes.len() && (new_width, new_height) == (width, height) {
        return Err(SkipReason::NoGain);
    }
    Ok(Recompressed {
        bytes: out,
        mime_type,
        width: new_width,
        height: new_height,
    })
}

/// Decodes, downscales and re-encodes every texture on a pool of `workers`
/// threads. A texture that cannot be processed keeps its original bytes.
pub fn recompress_external_textures(
    doc: &mut Document,
    quality: TextureQuality,
    workers: usize,
) -> Result<TextureReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| Error::pass(Pass::Texture, e.to_string()))?;

    let jobs: Vec<(Handle<Texture>, &[u8])> = doc
        .textures
        .iter()
        .map(|(handle, texture)| (handle, texture.bytes.as_slice()))
        .collect();
    let results: Vec<_> = pool.install(|| {
        jobs.par_iter()
            .map(|&(handle, bytes)| (handle, bytes.len(), recompress(bytes, quality)))
            .collect()
    });

    let mut report = TextureReport::default();
    for (handle, original_size, result) in results {
        let outcome = match result {
            Ok(done) => {
                let texture = &mut doc.textures[handle];
                let outcome = TextureOutcome::Recompressed {
                    original_size,
                    new_size: done.bytes.len(),
                    width: done.width,
                    height: done.height,
                    mime_type: done.mime_type.to_string(),
                };
                texture.bytes = done.bytes;
                texture.mime_type = done.mime_type.to_string();
                outcome
            }
            Err(reason) => {
                if reason == SkipReason::NoGain {
                    log::debug!("texture {handle:?} kept: re-encode gave no gain");
                } else {
                    log::warn!("texture {handle:?} skipped: {reason:?}");
                }
                TextureOutcome::Skipped { reason }
            }
        };
        report.entries.push(TextureEntry {
            texture: handle,
            outcome,
        });
    }

    log::info!(
        "recompressed {} of {} textures at {:?} quality",
        report.recompressed(),
        report.entries.len(),
        quality
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Material, TextureSlot};

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), format).unwrap();
        out
    }

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)) as u8;
            image::Rgb([v, v.wrapping_add(40), v.wrapping_mul(3)])
        });
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
    }

    #[test]
    fn test_prune_keeps_only_referenced() {
        let mut doc = Document::new();
        let a = doc.textures.insert(Texture::embedded(vec![1, 2, 3], "image/png"));
        let b = doc.textures.insert(Texture::embedded(vec![4, 5, 6], "image/png"));
        let c = doc.textures.insert(Texture::embedded(vec![7, 8, 9], "image/png"));
        let mut material = Material::default();
        material.set_texture(TextureSlot::BaseColor, Some(a));
        material.set_texture(TextureSlot::Occlusion, Some(c));
        doc.materials.insert(material);

        assert_eq!(prune_unused_textures(&mut doc), 1);
        assert_eq!(doc.textures.len(), 2);
        assert!(!doc.textures.contains(b));
        assert_eq!(doc.textures[a].bytes, vec![1, 2, 3]);
        assert_eq!(doc.textures[c].bytes, vec![7, 8, 9]);
    }

    #[test]
    fn test_recompress_downscales_to_tier() {
        let mut doc = Document::new();
        let tex = doc.textures.insert(Texture::embedded(noisy_png(1024, 512), "image/png"));

        let report = recompress_external_textures(&mut doc, TextureQuality::Low, 2).unwrap();
        assert!(matches!(
            report.outcome(tex),
            Some(TextureOutcome::Recompressed { width: 512, height: 256, .. })
        ));
        assert_eq!(doc.textures[tex].mime_type, "image/jpeg");
        assert_eq!(probe(&doc.textures[tex].bytes), Some((512, 256)));
    }

    #[test]
    fn test_bad_texture_is_isolated() {
        let mut doc = Document::new();
        let empty = doc.textures.insert(Texture::embedded(Vec::new(), "image/png"));
        let garbage = doc.textures.insert(Texture::embedded(vec![0xde, 0xad, 0xbe, 0xef], "image/png"));
        let good = doc.textures.insert(Texture::embedded(noisy_png(600, 600), "image/png"));

        let report = recompress_external_textures(&mut doc, TextureQuality::Low, 4).unwrap();
        assert_eq!(
            report.outcome(empty),
            Some(&TextureOutcome::Skipped { reason: SkipReason::Empty })
        );
        assert_eq!(
            report.outcome(garbage),
            Some(&TextureOutcome::Skipped {
                reason: SkipReason::UnsupportedFormat
            })
        );
        assert_eq!(doc.textures[garbage].bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(report.recompressed(), 1);
        assert_eq!(probe(&doc.textures[good].bytes), Some((512, 512)));
    }

    #[test]
    fn test_transparency_kept_as_png() {
        let img = image::RgbaImage::from_fn(700, 300, |x, _| image::Rgba([200, 10, 10, (x % 256) as u8]));
        let mut doc = Document::new();
        let tex = doc
            .textures
            .insert(Texture::embedded(encode(DynamicImage::ImageRgba8(img), ImageFormat::Png), "image/png"));

        recompress_external_textures(&mut doc, TextureQuality::Low, 1).unwrap();
        assert_eq!(doc.textures[tex].mime_type, "image/png");
        assert_eq!(probe(&doc.textures[tex].bytes), Some((512, 219)));
    }

    #[test]
    fn test_tiny_image_reports_no_gain() {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let original = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let mut doc = Document::new();
        let tex = doc.textures.insert(Texture::embedded(original.clone(), "image/png"));

        let report = recompress_external_textures(&mut doc, TextureQuality::High, 1).unwrap();
        assert_eq!(
            report.outcome(tex),
            Some(&TextureOutcome::Skipped { reason: SkipReason::NoGain })
        );
        assert_eq!(doc.textures[tex].bytes, original);
    }
}
