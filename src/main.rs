//! ゴミ画像分類器のコマンドライン

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use waste_classifier::backend::{cpu_device, CpuTrainingBackend};
use waste_classifier::logging::{init_logging, LogConfig};
use waste_classifier::ml::BurnEngine;
use waste_classifier::model::{load_metadata, AppConfig, DeviceType};
use waste_classifier::pipeline::{self, console_progress};

#[derive(Parser, Debug)]
#[command(name = "waste_classifier", about = "Waste image classifier: train, evaluate and batch-predict")]
struct Cli {
    /// Configuration file (JSON). Defaults apply when it does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Force the CPU (NdArray) backend.
    #[arg(long, global = true)]
    cpu: bool,
    #[command(flatten)]
    paths: PathArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Default)]
struct PathArgs {
    /// Dataset root (one subdirectory per class).
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,
    /// Folder of images to predict.
    #[arg(long, global = true)]
    test_images: Option<PathBuf>,
    /// Model file (zip).
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Predictions CSV.
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    /// Directory for the backbone and bottleneck caches.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Pretrained ResNetV2 backbone weights (.safetensors, .pt or .pth, timm key layout).
    #[arg(long, global = true)]
    pretrained: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Train, evaluate, save, batch-predict and report (default).
    Run,
    /// Train, evaluate and save the model.
    Train,
    /// Batch-predict with a saved model.
    Predict,
    /// Evaluate a saved model on the test split.
    Evaluate,
    /// Print the metadata and schema of a saved model.
    Inspect,
    /// Write the effective configuration to the config file.
    InitConfig,
}

impl PathArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dataset) = &self.dataset {
            config.paths.dataset_dir = dataset.clone();
        }
        if let Some(test_images) = &self.test_images {
            config.paths.test_images_dir = test_images.clone();
        }
        if let Some(model) = &self.model {
            config.paths.model_path = model.clone();
        }
        if let Some(output) = &self.output {
            config.paths.predictions_csv = output.clone();
        }
        if let Some(workspace) = &self.workspace {
            config.paths.workspace_dir = workspace.clone();
        }
        if let Some(pretrained) = &self.pretrained {
            config.training.pretrained_weights = Some(pretrained.clone());
        }
    }
}

fn execute<B: AutodiffBackend>(command: Command, config: &AppConfig, device: B::Device) -> Result<()> {
    let engine = BurnEngine::<B>::new(device).with_batch_size(config.training.batch_size);
    let mut progress = console_progress;

    match command {
        Command::Run => {
            pipeline::run(&engine, config, &mut progress).context("pipeline failed")?;
        }
        Command::Train => {
            pipeline::train(&engine, config, &mut progress).context("training failed")?;
        }
        Command::Predict => {
            pipeline::predict_with_saved_model(&engine, config).context("prediction failed")?;
        }
        Command::Evaluate => {
            pipeline::evaluate_saved_model(&engine, config).context("evaluation failed")?;
        }
        Command::Inspect | Command::InitConfig => {}
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("logging disabled: {}", e);
    }

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    cli.paths.apply(&mut config);
    if cli.cpu {
        config.set_device_type(DeviceType::Cpu);
    }
    if cli.verbose {
        config.detailed_metrics = true;
    }
    config
        .training
        .validate()
        .context("invalid training settings")?;

    let command = cli.command.unwrap_or(Command::Run);
    match command {
        Command::Inspect => {
            let (metadata, schema) = load_metadata(&config.paths.model_path)
                .with_context(|| format!("failed to read {}", config.paths.model_path.display()))?;
            metadata.print_info();
            println!("Schema:");
            for column in &schema.columns {
                println!("  {}: {:?}", column.name, column.column_type);
            }
            return Ok(());
        }
        Command::InitConfig => {
            config
                .save(&config_path)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
            println!("Configuration written to {}", config_path.display());
            return Ok(());
        }
        _ => {}
    }

    if cli.verbose {
        config.display();
    }
    info!("Using {}", config.device_type);

    match config.device_type {
        DeviceType::Cpu => execute::<CpuTrainingBackend>(command, &config, cpu_device()),
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => execute::<waste_classifier::backend::GpuTrainingBackend>(
            command,
            &config,
            waste_classifier::backend::gpu_device(),
        ),
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            tracing::warn!("Built without the wgpu feature, falling back to the CPU backend");
            execute::<CpuTrainingBackend>(command, &config, cpu_device())
        }
    }
}
