//! Pass sequencing, staged progress and the single-file safe fallback.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::cleanup::{self, CleanupReport};
use crate::codec::{self, ExternalFile};
use crate::compress::{self, CompressionReport};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::geometry::{self, GeometryReport};
use crate::inspect::{self, ModelInfo, ModelStats};
use crate::settings::{OptimizationSettings, TextureQuality};
use crate::texture::{self, TextureReport};
use crate::validate::is_valid_container;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Idle,
    Analyzing,
    Optimizing,
    Compressing,
    Finalizing,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Analyzing => "analyzing",
            Stage::Optimizing => "optimizing",
            Stage::Compressing => "compressing",
            Stage::Finalizing => "finalizing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forwards progress to a callback, never letting the percentage go down.
pub struct ProgressTracker<F: FnMut(u8, Stage)> {
    on_progress: F,
    percent: u8,
    stage: Stage,
}

impl<F: FnMut(u8, Stage)> ProgressTracker<F> {
    pub fn new(on_progress: F) -> Self {
        Self {
            on_progress,
            percent: 0,
            stage: Stage::Idle,
        }
    }

    pub fn report(&mut self, percent: u8, stage: Stage) {
        self.percent = percent.min(100).max(self.percent);
        self.stage = stage;
        log::debug!("progress {}% ({stage})", self.percent);
        (self.on_progress)(self.percent, stage);
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Pause between the simulated stages of the fallback path.
    pub fallback_stage_delay: Duration,
    /// Threads used to recompress external textures.
    pub texture_workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fallback_stage_delay: Duration::from_millis(200),
            texture_workers: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStats {
    pub original_size: usize,
    pub optimized_size: usize,
    /// Percentage saved, rounded; negative when the output grew.
    pub reduction: i32,
}

impl SizeStats {
    pub fn new(original_size: usize, optimized_size: usize) -> Self {
        let reduction = if original_size == 0 {
            0
        } else {
            ((1.0 - optimized_size as f64 / original_size as f64) * 100.0).round() as i32
        };
        Self {
            original_size,
            optimized_size,
            reduction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelComparison {
    pub original: ModelInfo,
    pub optimized: ModelInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub geometry: GeometryReport,
    pub textures: TextureReport,
    pub compression: CompressionReport,
    pub cleanup: CleanupReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    #[serde(skip)]
    pub optimized_bytes: Vec<u8>,
    pub stats: SizeStats,
    pub model_info: ModelComparison,
    pub report: PassReport,
}

impl OptimizationResult {
    /// Original bytes returned untouched, statistics marked unavailable.
    fn fallback(original: &[u8], reason: &str) -> Self {
        let unavailable = ModelInfo::Unavailable {
            reason: reason.to_string(),
        };
        Self {
            optimized_bytes: original.to_vec(),
            stats: SizeStats::new(original.len(), original.len()),
            model_info: ModelComparison {
                original: unavailable.clone(),
                optimized: unavailable,
            },
            report: PassReport::default(),
        }
    }
}

/// Outcome of the single-file entry point, which always produces a result.
#[derive(Debug)]
pub enum PipelineOutcome {
    Optimized(OptimizationResult),
    Fallback {
        result: OptimizationResult,
        error: Error,
    },
}

impl PipelineOutcome {
    pub fn result(&self) -> &OptimizationResult {
        match self {
            PipelineOutcome::Optimized(result) | PipelineOutcome::Fallback { result, .. } => result,
        }
    }

    pub fn into_result(self) -> OptimizationResult {
        match self {
            PipelineOutcome::Optimized(result) | PipelineOutcome::Fallback { result, .. } => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PipelineOutcome::Fallback { .. })
    }

    /// The failure that triggered the fallback.
    pub fn error(&self) -> Option<&Error> {
        match self {
            PipelineOutcome::Optimized(_) => None,
            PipelineOutcome::Fallback { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Optimizes one binary container. Any failure after the progress
    /// contract starts is absorbed into [`PipelineOutcome::Fallback`].
    pub fn optimize(
        &self,
        bytes: &[u8],
        settings: &OptimizationSettings,
        on_progress: impl FnMut(u8, Stage),
    ) -> PipelineOutcome {
        let mut tracker = ProgressTracker::new(on_progress);
        match self.run_single(bytes, settings, &mut tracker) {
            Ok(result) => PipelineOutcome::Optimized(result),
            Err(error) => {
                log::warn!("optimization failed, returning original bytes: {error}");
                let result = self.fallback(bytes, &error, &mut tracker);
                PipelineOutcome::Fallback { result, error }
            }
        }
    }

    /// Optimizes a textual scene plus its companion files into a binary
    /// container. Failures are returned to the caller.
    pub fn optimize_with_external_textures(
        &self,
        scene_text: &str,
        files: &[ExternalFile],
        settings: &OptimizationSettings,
        on_progress: impl FnMut(u8, Stage),
    ) -> Result<OptimizationResult> {
        let mut tracker = ProgressTracker::new(on_progress);
        self.run_external(scene_text, files, settings, &mut tracker)
            .inspect_err(|e| {
                log::error!("optimization with external textures failed: {e}");
                let percent = tracker.percent();
                tracker.report(percent, Stage::Failed);
            })
    }

    fn run_single<F: FnMut(u8, Stage)>(
        &self,
        bytes: &[u8],
        settings: &OptimizationSettings,
        tracker: &mut ProgressTracker<F>,
    ) -> Result<OptimizationResult> {
        tracker.report(10, Stage::Analyzing);
        settings.validate()?;
        if !is_valid_container(bytes) {
            return Err(Error::InvalidFormat(
                "input does not start with a glTF binary header".into(),
            ));
        }
        let mut doc = codec::decode_glb(bytes)?;
        let original = inspect::stats(&doc);
        tracker.report(20, Stage::Analyzing);

        let mut report = PassReport::default();
        tracker.report(30, Stage::Optimizing);
        report.geometry = geometry::optimize_geometry(&mut doc, settings)?;
        tracker.report(50, Stage::Optimizing);

        if settings.texture_quality != TextureQuality::High {
            report.textures.pruned = texture::prune_unused_textures(&mut doc);
        }
        tracker.report(60, Stage::Optimizing);

        self.compress_and_finish(doc, bytes.len(), original, settings, report, tracker)
    }

    fn run_external<F: FnMut(u8, Stage)>(
        &self,
        scene_text: &str,
        files: &[ExternalFile],
        settings: &OptimizationSettings,
        tracker: &mut ProgressTracker<F>,
    ) -> Result<OptimizationResult> {
        tracker.report(10, Stage::Analyzing);
        settings.validate()?;
        let mut doc = codec::decode_gltf(scene_text, files)?;
        let original = inspect::stats(&doc);
        let original_size = scene_text.len() + files.iter().map(|f| f.bytes.len()).sum::<usize>();
        tracker.report(20, Stage::Analyzing);

        let mut report = PassReport::default();
        tracker.report(30, Stage::Optimizing);
        report.geometry = geometry::optimize_geometry(&mut doc, settings)?;
        tracker.report(50, Stage::Optimizing);

        report.textures = texture::recompress_external_textures(
            &mut doc,
            settings.texture_quality,
            self.options.texture_workers,
        )?;
        tracker.report(60, Stage::Optimizing);

        self.compress_and_finish(doc, original_size, original, settings, report, tracker)
    }

    fn compress_and_finish<F: FnMut(u8, Stage)>(
        &self,
        mut doc: Document,
        original_size: usize,
        original: ModelStats,
        settings: &OptimizationSettings,
        mut report: PassReport,
        tracker: &mut ProgressTracker<F>,
    ) -> Result<OptimizationResult> {
        tracker.report(75, Stage::Compressing);
        report.compression = compress::compress(&mut doc, settings);
        tracker.report(80, Stage::Compressing);

        tracker.report(90, Stage::Finalizing);
        report.cleanup = cleanup::cleanup(&mut doc);
        let optimized_bytes = codec::encode_glb(&doc)?;
        if !is_valid_container(&optimized_bytes) {
            return Err(Error::InvalidFormat(
                "optimized output failed the container check".into(),
            ));
        }
        tracker.report(95, Stage::Finalizing);

        let optimized = inspect::stats(&doc);
        let stats = SizeStats::new(original_size, optimized_bytes.len());
        log::info!(
            "optimized {} -> {} bytes ({}%), triangles {} -> {}",
            stats.original_size,
            stats.optimized_size,
            stats.reduction,
            original.triangles,
            optimized.triangles
        );
        tracker.report(100, Stage::Completed);

        Ok(OptimizationResult {
            optimized_bytes,
            stats,
            model_info: ModelComparison {
                original: ModelInfo::Available(original),
                optimized: ModelInfo::Available(optimized),
            },
            report,
        })
    }

    /// Walks the remaining stages with simulated pacing and hands the input back.
    fn fallback<F: FnMut(u8, Stage)>(
        &self,
        bytes: &[u8],
        error: &Error,
        tracker: &mut ProgressTracker<F>,
    ) -> OptimizationResult {
        for (percent, stage) in [
            (30, Stage::Optimizing),
            (75, Stage::Compressing),
            (90, Stage::Finalizing),
        ] {
            if tracker.percent() < percent {
                std::thread::sleep(self.options.fallback_stage_delay);
                tracker.report(percent, stage);
            }
        }
        let result = OptimizationResult::fallback(bytes, &error.to_string());
        tracker.report(100, Stage::Completed);
        result
    }
}

/// Single-file entry point with default options.
pub fn optimize(
    bytes: &[u8],
    settings: &OptimizationSettings,
    on_progress: impl FnMut(u8, Stage),
) -> PipelineOutcome {
    Pipeline::default().optimize(bytes, settings, on_progress)
}

/// Multi-file entry point with default options.
pub fn optimize_with_external_textures(
    scene_text: &str,
    files: &[ExternalFile],
    settings: &OptimizationSettings,
    on_progress: impl FnMut(u8, Stage),
) -> Result<OptimizationResult> {
    Pipeline::default().optimize_with_external_textures(scene_text, files, settings, on_progress)
}

/// Statistics for display before optimizing. Decode failures are reported
/// as [`ModelInfo::Unavailable`].
pub fn analyze(bytes: &[u8]) -> ModelInfo {
    if !is_valid_container(bytes) {
        return ModelInfo::Unavailable {
            reason: "input does not start with a glTF binary header".into(),
        };
    }
    match codec::decode_glb(bytes) {
        Ok(doc) => ModelInfo::Available(inspect::stats(&doc)),
        Err(e) => {
            log::warn!("analysis failed: {e}");
            ModelInfo::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}
