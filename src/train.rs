#![recursion_limit = "512"]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};

use burn::LearningRate;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::lr_scheduler::{
    LrScheduler,
    cosine::{CosineAnnealingLrScheduler, CosineAnnealingLrSchedulerConfig},
    step::{StepLrScheduler, StepLrSchedulerConfig},
};
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamWConfig, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_train::LearnerBuilder;
use burn_train::metric::{AccuracyMetric, LearningRateMetric, LossMetric};
use burn_wgpu::Wgpu;
use tracing::info;

#[cfg(feature = "cuda")]
use burn_cuda::Cuda;

use burn_vit::{
    CifarBatch, CifarBatcher, CifarDataset, LearningRateScheduleConfig,
    MODEL_FILE_STEM, MultiStepLrScheduler, OptimizerConfig, TrainingConfig,
    TrainingHyperparameters, VisionTransformer, VisionTransformerConfig, evaluate_accuracy,
    load_training_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a Vision Transformer on CIFAR-10")]
struct Args {
    /// Additional configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Backend to use for training.
    #[arg(long, value_enum, default_value_t = BackendArg::Wgpu)]
    backend: BackendArg,
    /// Train even when a saved model exists in the checkpoint directory.
    #[arg(long)]
    retrain: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Cuda,
    Wgpu,
    Ndarray,
}

type ValidBackend<B> = <B as AutodiffBackend>::InnerBackend;
type Loader<B> = Arc<dyn DataLoader<B, CifarBatch<B>>>;

struct Splits {
    train: CifarDataset,
    val: CifarDataset,
    test: CifarDataset,
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
    config_paths.extend(args.config);
    let config = load_training_config(&config_paths)?;
    let model_config = config.model_config()?;

    let splits = prepare_splits(&config)?;

    match args.backend {
        BackendArg::Wgpu => {
            train_backend::<Autodiff<Wgpu<f32>>>(&config, &model_config, &splits, "wgpu", args.retrain)
        }
        BackendArg::Ndarray => train_backend::<Autodiff<NdArray<f32>>>(
            &config,
            &model_config,
            &splits,
            "ndarray",
            args.retrain,
        ),
        BackendArg::Cuda => {
            #[cfg(feature = "cuda")]
            {
                train_backend::<Autodiff<Cuda<f32>>>(
                    &config,
                    &model_config,
                    &splits,
                    "cuda",
                    args.retrain,
                )
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

fn prepare_splits(config: &TrainingConfig) -> Result<Splits> {
    let dataset = &config.dataset;
    let (train, val) =
        CifarDataset::train_val(&dataset.cache_dir, dataset.validation_size, dataset.split_seed)
            .with_context(|| "failed to prepare CIFAR-10 training data")?;
    let test = CifarDataset::test(&dataset.cache_dir)
        .with_context(|| "failed to prepare CIFAR-10 test data")?;

    Ok(Splits { train, val, test })
}

fn train_backend<B>(
    config: &TrainingConfig,
    model_config: &VisionTransformerConfig,
    splits: &Splits,
    backend_name: &str,
    retrain: bool,
) -> Result<()>
where
    B: AutodiffBackend + Clone + 'static,
    B::Device: Clone,
{
    let training = &config.training;
    B::seed(training.seed);
    let device = B::Device::default();

    let train_loader: Loader<B> =
        DataLoaderBuilder::new(CifarBatcher::train(&config.augmentation, training.seed))
            .batch_size(training.batch_size)
            .shuffle(training.seed)
            .num_workers(training.num_workers)
            .build(splits.train.clone());
    let valid_loader: Loader<ValidBackend<B>> = eval_loader(config, splits.val.clone());
    let test_loader: Loader<ValidBackend<B>> = eval_loader(config, splits.test.clone());

    log_theoretical_profile(model_config, training.batch_size, backend_name);

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model_path = training.checkpoint_dir.join(MODEL_FILE_STEM);

    let model: VisionTransformer<ValidBackend<B>> =
        if model_path.with_extension("bin").is_file() && !retrain {
            info!(
                "found saved model at {}, skipping training",
                model_path.display()
            );
            VisionTransformer::new(model_config, &device)
                .load_file(&model_path, &recorder, &device)
                .map_err(|err| anyhow!("failed to load {}: {err:?}", model_path.display()))?
        } else {
            let session = TrainingSession {
                run_dir: training.checkpoint_dir.clone(),
                training,
                device: device.clone(),
                train_loader,
                valid_loader: Arc::clone(&valid_loader),
            };
            let iterations_per_epoch = splits.train.len().div_ceil(training.batch_size.max(1));
            let trained = fit_with_resolved_scheduler(
                &session,
                VisionTransformer::new(model_config, &device),
                &config.optimizer,
                iterations_per_epoch,
            )?;
            trained
                .clone()
                .save_file(&model_path, &recorder)
                .map_err(|err| anyhow!("failed to save {}: {err:?}", model_path.display()))?;
            info!("saved trained model to {}", model_path.display());
            trained.valid()
        };

    let val_accuracy = evaluate_accuracy(&model, &valid_loader);
    let test_accuracy = evaluate_accuracy(&model, &test_loader);
    info!("[train:{backend_name}] val accuracy {val_accuracy:.4}, test accuracy {test_accuracy:.4}");
    println!("val: {:.2}%", val_accuracy * 100.0);
    println!("test: {:.2}%", test_accuracy * 100.0);

    Ok(())
}

fn eval_loader<B: Backend>(
    config: &TrainingConfig,
    dataset: CifarDataset,
) -> Loader<B> {
    DataLoaderBuilder::new(CifarBatcher::eval(&config.augmentation))
        .batch_size(config.training.batch_size)
        .num_workers(config.training.num_workers)
        .build(dataset)
}

struct TrainingSession<'a, B: AutodiffBackend> {
    run_dir: PathBuf,
    training: &'a TrainingHyperparameters,
    device: B::Device,
    train_loader: Loader<B>,
    valid_loader: Loader<ValidBackend<B>>,
}

impl<B> TrainingSession<'_, B>
where
    B: AutodiffBackend + Clone + 'static,
    B::Device: Clone,
{
    fn fit<O, S>(
        &self,
        model: VisionTransformer<B>,
        optimizer: O,
        scheduler: S,
    ) -> Result<VisionTransformer<B>>
    where
        O: Optimizer<VisionTransformer<B>, B> + 'static,
        S: LrScheduler + 'static,
    {
        fs::create_dir_all(&self.run_dir).with_context(|| {
            format!("failed to create checkpoint directory {}", self.run_dir.display())
        })?;
        info!(
            "training {} parameters for {} epochs",
            model.num_params(),
            self.training.num_epochs
        );

        let learner = LearnerBuilder::new(&self.run_dir)
            .metric_train_numeric(AccuracyMetric::new())
            .metric_valid_numeric(AccuracyMetric::new())
            .metric_train_numeric(LossMetric::new())
            .metric_valid_numeric(LossMetric::new())
            .metric_train_numeric(LearningRateMetric::new())
            .with_file_checkpointer(BinFileRecorder::<FullPrecisionSettings>::new())
            .devices(vec![self.device.clone()])
            .num_epochs(self.training.num_epochs)
            .summary()
            .build(model, optimizer, scheduler);

        Ok(learner.fit(
            Arc::clone(&self.train_loader),
            Arc::clone(&self.valid_loader),
        ))
    }
}

enum ResolvedLrScheduler {
    Constant(LearningRate),
    Cosine(CosineAnnealingLrScheduler),
    Step(StepLrScheduler),
    MultiStep(MultiStepLrScheduler),
}

fn fit_with_resolved_scheduler<B>(
    session: &TrainingSession<'_, B>,
    model: VisionTransformer<B>,
    optimizer_cfg: &OptimizerConfig,
    iterations_per_epoch: usize,
) -> Result<VisionTransformer<B>>
where
    B: AutodiffBackend + Clone + 'static,
    B::Device: Clone,
{
    let optimizer = AdamWConfig::new()
        .with_weight_decay(optimizer_cfg.weight_decay)
        .init::<B, VisionTransformer<B>>();
    let scheduler =
        resolve_lr_scheduler(optimizer_cfg, session.training, iterations_per_epoch)?;

    match scheduler {
        ResolvedLrScheduler::Constant(lr) => session.fit(model, optimizer, lr),
        ResolvedLrScheduler::Cosine(scheduler) => session.fit(model, optimizer, scheduler),
        ResolvedLrScheduler::Step(scheduler) => session.fit(model, optimizer, scheduler),
        ResolvedLrScheduler::MultiStep(scheduler) => session.fit(model, optimizer, scheduler),
    }
}

fn resolve_lr_scheduler(
    optimizer_cfg: &OptimizerConfig,
    training: &TrainingHyperparameters,
    iterations_per_epoch: usize,
) -> Result<ResolvedLrScheduler> {
    let base_lr = optimizer_cfg.learning_rate;
    let per_epoch = iterations_per_epoch.max(1);
    let total_iters = (training.num_epochs * per_epoch).max(1);

    let schedule = match &optimizer_cfg.lr_schedule {
        None => ResolvedLrScheduler::Constant(base_lr),
        Some(LearningRateScheduleConfig::Constant { initial_lr }) => {
            ResolvedLrScheduler::Constant(initial_lr.unwrap_or(base_lr))
        }
        Some(LearningRateScheduleConfig::Cosine {
            initial_lr,
            min_lr,
            num_epochs,
        }) => {
            let num_iters = num_epochs
                .map(|epochs| epochs * per_epoch)
                .unwrap_or(total_iters)
                .max(1);
            let scheduler =
                CosineAnnealingLrSchedulerConfig::new(initial_lr.unwrap_or(base_lr), num_iters)
                    .with_min_lr(min_lr.unwrap_or(0.0))
                    .init()
                    .map_err(|err| anyhow!("failed to initialize cosine lr scheduler: {err}"))?;
            ResolvedLrScheduler::Cosine(scheduler)
        }
        Some(LearningRateScheduleConfig::Step {
            initial_lr,
            gamma,
            step_epochs,
        }) => {
            let scheduler = StepLrSchedulerConfig::new(
                initial_lr.unwrap_or(base_lr),
                (step_epochs * per_epoch).max(1),
            )
            .with_gamma(*gamma)
            .init()
            .map_err(|err| anyhow!("failed to initialize step lr scheduler: {err}"))?;
            ResolvedLrScheduler::Step(scheduler)
        }
        Some(LearningRateScheduleConfig::MultiStep {
            initial_lr,
            milestones,
            gamma,
        }) => ResolvedLrScheduler::MultiStep(MultiStepLrScheduler::from_epochs(
            initial_lr.unwrap_or(base_lr),
            *gamma,
            milestones,
            per_epoch,
        )),
    };

    Ok(schedule)
}

fn log_theoretical_profile(config: &VisionTransformerConfig, batch: usize, backend: &str) {
    let batch = batch as u64;
    let tokens = config.patch_grid().map_or(0, |grid| grid.num_patches() as u64) + 1;
    let embed = config.embed_dim as u64;
    let hidden = config.hidden_dim as u64;
    let features = (config.num_channels * config.patch_size * config.patch_size) as u64;
    let layers = config.num_layers as u64;
    let bt = batch * tokens;

    let patch_proj = 2 * bt * features * embed;
    let attn_proj = layers * 2 * bt * 4 * embed * embed;
    let attn_mix = layers * 2 * 2 * batch * tokens * tokens * embed;
    let mlp = layers * 2 * 2 * bt * embed * hidden;
    let total = patch_proj + attn_proj + attn_mix + mlp;

    info!(
        "[train:{backend}] approx forward GFLOPs per batch: total={total_gflops:.3}, \
         patch_proj={patch:.3}, attn_proj={proj:.3}, attn_mix={mix:.3}, mlp={mlp_gflops:.3} \
         (backward ~2x forward)",
        total_gflops = total as f64 / 1e9,
        patch = patch_proj as f64 / 1e9,
        proj = attn_proj as f64 / 1e9,
        mix = attn_mix as f64 / 1e9,
        mlp_gflops = mlp as f64 / 1e9,
    );
}
