#![recursion_limit = "512"]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use burn_wgpu::Wgpu;

#[cfg(feature = "cuda")]
use burn_cuda::Cuda;

use burn_vit::{
    CLASS_NAMES, CifarBatch, CifarBatcher, CifarDataset, MODEL_FILE_STEM,
    TrainingConfig, VisionTransformer, evaluate_accuracy, load_training_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Evaluate a trained Vision Transformer on CIFAR-10")]
struct Args {
    /// Additional configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Backend to use for evaluation.
    #[arg(long, value_enum, default_value_t = BackendArg::Wgpu)]
    backend: BackendArg,
    /// Model record to load (without the `.bin` extension); defaults to the checkpoint directory.
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,
    /// Number of test images whose predictions are printed.
    #[arg(long, default_value_t = 8)]
    samples: usize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Cuda,
    Wgpu,
    Ndarray,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mut config_paths = vec![PathBuf::from("config/base.toml")];
    config_paths.extend(args.config.clone());
    let config = load_training_config(&config_paths)?;

    match args.backend {
        BackendArg::Wgpu => eval_backend::<Wgpu<f32>>(&config, &args, "wgpu"),
        BackendArg::Ndarray => eval_backend::<NdArray<f32>>(&config, &args, "ndarray"),
        BackendArg::Cuda => {
            #[cfg(feature = "cuda")]
            {
                eval_backend::<Cuda<f32>>(&config, &args, "cuda")
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(anyhow!(
                    "cuda backend selected but this build lacks `cuda` feature; rebuild with `--features cuda`"
                ))
            }
        }
    }
}

fn eval_backend<B>(config: &TrainingConfig, args: &Args, backend_name: &str) -> Result<()>
where
    B: Backend + 'static,
    B::Device: Clone,
{
    B::seed(config.training.seed);
    let device = B::Device::default();

    let model_path = args
        .model
        .clone()
        .unwrap_or_else(|| config.training.checkpoint_dir.join(MODEL_FILE_STEM));
    let model = load_model::<B>(config, &model_path, &device)?;
    eprintln!(
        "Loaded {} using {backend_name} backend.",
        model_path.with_extension("bin").display()
    );

    let dataset = &config.dataset;
    let (_, val) =
        CifarDataset::train_val(&dataset.cache_dir, dataset.validation_size, dataset.split_seed)
            .context("failed to prepare CIFAR-10 validation data")?;
    let test = CifarDataset::test(&dataset.cache_dir)
        .context("failed to prepare CIFAR-10 test data")?;

    let batcher = CifarBatcher::eval(&config.augmentation);
    let val_loader: Arc<dyn DataLoader<B, CifarBatch<B>>> =
        DataLoaderBuilder::new(batcher.clone())
            .batch_size(config.training.batch_size)
            .build(val);
    let test_loader: Arc<dyn DataLoader<B, CifarBatch<B>>> =
        DataLoaderBuilder::new(batcher.clone())
            .batch_size(config.training.batch_size)
            .build(test.clone());

    println!("val: {:.2}%", evaluate_accuracy(&model, &val_loader) * 100.0);
    println!("test: {:.2}%", evaluate_accuracy(&model, &test_loader) * 100.0);

    print_samples(&model, &batcher, &test, args.samples, &device)
}

fn load_model<B: Backend>(
    config: &TrainingConfig,
    path: &Path,
    device: &B::Device,
) -> Result<VisionTransformer<B>> {
    let model_config = config.model_config()?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    VisionTransformer::new(&model_config, device)
        .load_file(path, &recorder, device)
        .map_err(|err| anyhow!("failed to load model {}: {err:?}", path.display()))
}

fn print_samples<B: Backend>(
    model: &VisionTransformer<B>,
    batcher: &CifarBatcher,
    test: &CifarDataset,
    samples: usize,
    device: &B::Device,
) -> Result<()> {
    let count = samples.min(test.len());
    if count == 0 {
        return Ok(());
    }

    let items = (0..count).filter_map(|idx| test.get(idx)).collect::<Vec<_>>();
    let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
    let batch: CifarBatch<B> = batcher.batch(items, device);
    let predictions = model
        .forward(batch.images)
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .into_vec::<i64>()
        .map_err(|err| anyhow!("{err:?}"))?;

    for (idx, (predicted, label)) in predictions.iter().zip(labels).enumerate() {
        let predicted_name = usize::try_from(*predicted)
            .ok()
            .and_then(|class| CLASS_NAMES.get(class))
            .copied()
            .unwrap_or("?");
        println!(
            "#{idx:<3} predicted {predicted_name:<10} actual {}",
            CLASS_NAMES[label]
        );
    }
    Ok(())
}
