use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use gltf_shrink::prelude::*;

#[derive(Parser)]
#[command(name = "gltf-shrink")]
#[command(about = "Shrink .glb/.gltf scenes into an optimized .glb")]
#[command(version)]
struct Cli {
    /// Input scene (.glb, or .gltf with --texture companions)
    input: PathBuf,

    /// Output path (defaults to <input>.opt.glb)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON settings file (camelCase keys)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Mesh decimation, 0-100
    #[arg(long)]
    decimation: Option<u8>,

    #[arg(long, value_enum)]
    quality: Option<TextureQuality>,

    /// Enables geometry compression at this level, 1-10
    #[arg(long)]
    draco_level: Option<u8>,

    /// Companion file of a .gltf input (texture image or .bin buffer); repeatable
    #[arg(long = "texture")]
    textures: Vec<PathBuf>,

    /// Print model statistics and exit
    #[arg(long)]
    analyze: bool,
}

impl Cli {
    fn settings(&self) -> Result<OptimizationSettings> {
        let mut settings = match &self.settings {
            Some(path) => OptimizationSettings::from_file(path)
                .with_context(|| format!("reading settings from {}", path.display()))?,
            None => OptimizationSettings::default(),
        };
        if let Some(decimation) = self.decimation {
            settings.mesh_decimation = decimation;
        }
        if let Some(quality) = self.quality {
            settings.texture_quality = quality;
        }
        if let Some(level) = self.draco_level {
            settings.draco_compression = DracoCompression {
                enabled: true,
                level,
            };
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn is_text_scene(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gltf")
}

fn read_companion(path: &Path) -> Result<ExternalFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("no file name in {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(ExternalFile::new(name, bytes))
}

fn report_progress(percent: u8, stage: Stage) {
    log::info!("[{percent:>3}%] {stage}");
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    if cli.analyze {
        if is_text_scene(&cli.input) {
            bail!("--analyze expects a .glb input");
        }
        let bytes = std::fs::read(&cli.input)
            .with_context(|| format!("reading {}", cli.input.display()))?;
        println!("{}", serde_json::to_string_pretty(&analyze(&bytes))?);
        return Ok(());
    }

    let settings = cli.settings()?;
    let result = if is_text_scene(&cli.input) {
        let text = std::fs::read_to_string(&cli.input)
            .with_context(|| format!("reading {}", cli.input.display()))?;
        let files = cli
            .textures
            .iter()
            .map(|p| read_companion(p))
            .collect::<Result<Vec<_>>>()?;
        optimize_with_external_textures(&text, &files, &settings, report_progress)?
    } else {
        if !cli.textures.is_empty() {
            log::warn!("--texture is ignored for .glb input");
        }
        let bytes = std::fs::read(&cli.input)
            .with_context(|| format!("reading {}", cli.input.display()))?;
        let outcome = optimize(&bytes, &settings, report_progress);
        if let Some(error) = outcome.error() {
            log::warn!("kept the original file: {error}");
        }
        outcome.into_result()
    };

    let output = cli
        .output
        .unwrap_or_else(|| cli.input.with_extension("opt.glb"));
    std::fs::write(&output, &result.optimized_bytes)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!("wrote {}", output.display());

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
