pub mod cleanup;
pub mod codec;
pub mod compress;
pub mod document;
pub mod error;
pub mod geometry;
pub mod inspect;
pub mod pipeline;
pub mod settings;
pub mod texture;
pub mod validate;

pub mod prelude {
    pub use crate::codec::ExternalFile;
    pub use crate::error::{Error, Result};
    pub use crate::inspect::{ModelInfo, ModelStats};
    pub use crate::pipeline::{
        OptimizationResult, PipelineOptions, PipelineOutcome, Stage, analyze, optimize,
        optimize_with_external_textures,
    };
    pub use crate::settings::{DracoCompression, OptimizationSettings, TextureQuality};
    pub use crate::validate::is_valid_container;
}
