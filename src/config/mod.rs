use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;

use crate::model::VisionTransformerConfig;

/// Overrides [`DatasetConfig::cache_dir`].
pub const DATASET_PATH_ENV: &str = "DATASET_PATH";
/// Overrides [`TrainingHyperparameters::checkpoint_dir`].
pub const CHECKPOINT_PATH_ENV: &str = "CHECKPOINT_PATH";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatasetConfig {
    pub cache_dir: PathBuf,
    #[serde(default = "default_validation_size")]
    pub validation_size: usize,
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AugmentationConfig {
    #[serde(default = "default_true")]
    pub horizontal_flip: bool,
    #[serde(default = "default_crop_scale")]
    pub crop_scale: [f32; 2],
    #[serde(default = "default_crop_ratio")]
    pub crop_ratio: [f32; 2],
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            crop_scale: default_crop_scale(),
            crop_ratio: default_crop_ratio(),
            mean: default_mean(),
            std: default_std(),
        }
    }
}

impl AugmentationConfig {
    /// Rejects crop ranges and normalization statistics that would panic or produce non-finite pixels.
    pub fn validate(&self) -> Result<()> {
        for scale in self.crop_scale {
            if !(scale > 0.0 && scale <= 1.0) {
                return Err(anyhow!(
                    "crop_scale entries must lie in (0, 1], got {:?}",
                    self.crop_scale
                ));
            }
        }
        for ratio in self.crop_ratio {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(anyhow!(
                    "crop_ratio entries must be finite and positive, got {:?}",
                    self.crop_ratio
                ));
            }
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(anyhow!("mean must be finite, got {:?}", self.mean));
        }
        if self.std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(anyhow!(
                "std entries must be finite and positive, got {:?}",
                self.std
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingHyperparameters {
    pub batch_size: usize,
    pub num_epochs: usize,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub checkpoint_dir: PathBuf,
}

impl TrainingHyperparameters {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub weight_decay: f32,
    #[serde(default)]
    pub lr_schedule: Option<LearningRateScheduleConfig>,
}

/// Learning-rate schedules. Step counts are expressed in epochs and converted
/// to optimizer iterations by the training harness.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningRateScheduleConfig {
    Constant {
        #[serde(default)]
        initial_lr: Option<f64>,
    },
    Cosine {
        #[serde(default)]
        initial_lr: Option<f64>,
        #[serde(default)]
        min_lr: Option<f64>,
        #[serde(default)]
        num_epochs: Option<usize>,
    },
    Step {
        #[serde(default)]
        initial_lr: Option<f64>,
        gamma: f64,
        step_epochs: usize,
    },
    MultiStep {
        #[serde(default)]
        initial_lr: Option<f64>,
        milestones: Vec<usize>,
        #[serde(default = "default_gamma")]
        gamma: f64,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ModelOverrides {
    pub embed_dim: Option<usize>,
    pub hidden_dim: Option<usize>,
    pub num_heads: Option<usize>,
    pub num_layers: Option<usize>,
    pub patch_size: Option<usize>,
    pub num_channels: Option<usize>,
    pub image_size: Option<usize>,
    pub num_classes: Option<usize>,
    pub dropout: Option<f64>,
}

impl ModelOverrides {
    pub fn apply(&self, mut config: VisionTransformerConfig) -> VisionTransformerConfig {
        if let Some(embed_dim) = self.embed_dim {
            config.embed_dim = embed_dim;
        }
        if let Some(hidden_dim) = self.hidden_dim {
            config.hidden_dim = hidden_dim;
        }
        if let Some(num_heads) = self.num_heads {
            config.num_heads = num_heads;
        }
        if let Some(num_layers) = self.num_layers {
            config.num_layers = num_layers;
        }
        if let Some(patch_size) = self.patch_size {
            config.patch_size = patch_size;
        }
        if let Some(num_channels) = self.num_channels {
            config.num_channels = num_channels;
        }
        if let Some(image_size) = self.image_size {
            config.image_size = image_size;
        }
        if let Some(num_classes) = self.num_classes {
            config.num_classes = num_classes;
        }
        if let Some(dropout) = self.dropout {
            config.dropout = dropout;
        }
        config
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    pub training: TrainingHyperparameters,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub model: ModelOverrides,
}

impl TrainingConfig {
    /// Model configuration with the `[model]` overrides applied and validated.
    pub fn model_config(&self) -> Result<VisionTransformerConfig> {
        let config = self.model.apply(VisionTransformerConfig::default());
        config
            .validate()
            .context("invalid model configuration")?;
        Ok(config)
    }

    /// Checks the data pipeline and loop settings; model settings are checked by [`Self::model_config`].
    pub fn validate(&self) -> Result<()> {
        self.augmentation
            .validate()
            .context("invalid augmentation configuration")?;
        self.training
            .validate()
            .context("invalid training configuration")?;
        Ok(())
    }
}

/// Loads and deep-merges TOML files in order, applies environment overrides, then validates.
pub fn load_training_config(paths: &[PathBuf]) -> Result<TrainingConfig> {
    let mut config = load_layered(paths)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn load_layered(paths: &[PathBuf]) -> Result<TrainingConfig> {
    if paths.is_empty() {
        return Err(anyhow!("at least one configuration path is required"));
    }

    let mut iter = paths.iter();
    let first_path = iter
        .next()
        .ok_or_else(|| anyhow!("configuration iterator unexpectedly empty"))?;
    let mut value = load_value(first_path)?;

    for path in iter {
        let overlay = load_value(path)?;
        merge_values(&mut value, overlay);
    }

    value
        .try_into::<TrainingConfig>()
        .map_err(|err| anyhow!(err))
}

/// Replaces the dataset and checkpoint directories with values from `lookup`, when set.
pub fn apply_env_overrides<F>(config: &mut TrainingConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(DATASET_PATH_ENV).filter(|value| !value.is_empty()) {
        config.dataset.cache_dir = PathBuf::from(path);
    }
    if let Some(path) = lookup(CHECKPOINT_PATH_ENV).filter(|value| !value.is_empty()) {
        config.training.checkpoint_dir = PathBuf::from(path);
    }
}

fn load_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let table: toml::value::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;
    Ok(Value::Table(table))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn default_validation_size() -> usize {
    5_000
}

fn default_split_seed() -> u64 {
    42
}

fn default_seed() -> u64 {
    42
}

fn default_num_workers() -> usize {
    4
}

fn default_gamma() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_crop_scale() -> [f32; 2] {
    [0.8, 1.0]
}

fn default_crop_ratio() -> [f32; 2] {
    [0.9, 1.1]
}

fn default_mean() -> [f32; 3] {
    [0.491_399_68, 0.482_158_4, 0.446_530_9]
}

fn default_std() -> [f32; 3] {
    [0.247_032_23, 0.243_485_13, 0.261_587_84]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write config");
        path
    }

    fn base_contents() -> String {
        [
            "[dataset]",
            "cache_dir = \"data\"",
            "",
            "[training]",
            "batch_size = 128",
            "num_epochs = 180",
            "checkpoint_dir = \"saved_models/vit\"",
            "",
            "[optimizer]",
            "learning_rate = 0.0003",
            "weight_decay = 0.01",
            "",
            "[optimizer.lr_schedule]",
            "type = \"multi_step\"",
            "milestones = [100, 150]",
            "",
            "[model]",
            "embed_dim = 256",
            "num_heads = 8",
        ]
        .join("\n")
    }

    #[test]
    fn load_merges_in_order() {
        let dir = tempdir().expect("tempdir");
        let base = write_config(dir.path(), "base.toml", &base_contents());

        let override_contents = [
            "[training]",
            "num_epochs = 5",
            "",
            "[optimizer]",
            "learning_rate = 0.001",
            "",
            "[augmentation]",
            "horizontal_flip = false",
            "",
            "[model]",
            "embed_dim = 128",
            "dropout = 0.0",
        ]
        .join("\n");
        let override_cfg = write_config(dir.path(), "override.toml", &override_contents);

        let config = load_layered(&[base, override_cfg]).expect("load config");

        assert_eq!(
            config.training,
            TrainingHyperparameters {
                batch_size: 128,
                num_epochs: 5,
                num_workers: 4,
                seed: 42,
                checkpoint_dir: PathBuf::from("saved_models/vit"),
            }
        );
        assert!((config.optimizer.learning_rate - 0.001).abs() < f64::EPSILON);
        assert_eq!(
            config.optimizer.lr_schedule,
            Some(LearningRateScheduleConfig::MultiStep {
                initial_lr: None,
                milestones: vec![100, 150],
                gamma: 0.1,
            })
        );
        assert_eq!(config.dataset.validation_size, 5_000);
        assert_eq!(config.dataset.split_seed, 42);
        assert!(!config.augmentation.horizontal_flip);
        assert_eq!(config.augmentation.crop_scale, [0.8, 1.0]);
        assert_eq!(config.model.embed_dim, Some(128));
        assert_eq!(config.model.num_heads, Some(8));
        assert_eq!(config.model.dropout, Some(0.0));
    }

    #[test]
    fn env_overrides_replace_paths() {
        let dir = tempdir().expect("tempdir");
        let base = write_config(dir.path(), "base.toml", &base_contents());
        let mut config = load_layered(&[base]).expect("load config");

        apply_env_overrides(&mut config, |key| match key {
            DATASET_PATH_ENV => Some("/tmp/cifar".to_string()),
            CHECKPOINT_PATH_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.dataset.cache_dir, PathBuf::from("/tmp/cifar"));
        assert_eq!(
            config.training.checkpoint_dir,
            PathBuf::from("saved_models/vit")
        );
    }

    #[test]
    fn model_overrides_are_validated() {
        let dir = tempdir().expect("tempdir");
        let base = write_config(dir.path(), "base.toml", &base_contents());
        let overlay = write_config(dir.path(), "bad.toml", "[model]\nnum_heads = 7\n");
        let config = load_layered(&[base, overlay]).expect("load config");

        assert!(config.model_config().is_err());
    }

    #[test]
    fn augmentation_settings_are_validated() {
        let dir = tempdir().expect("tempdir");
        let base = write_config(dir.path(), "base.toml", &base_contents());
        assert!(load_training_config(&[base.clone()]).is_ok());

        let overlays = [
            "[augmentation]\ncrop_ratio = [0.0, 1.1]\n",
            "[augmentation]\ncrop_scale = [0.0, 1.0]\n",
            "[augmentation]\ncrop_scale = [0.8, 1.5]\n",
            "[augmentation]\nstd = [0.25, 0.0, 0.25]\n",
            "[training]\nbatch_size = 0\n",
        ];
        for (idx, contents) in overlays.iter().enumerate() {
            let overlay = write_config(dir.path(), &format!("bad_{idx}.toml"), contents);
            let config = load_layered(&[base.clone(), overlay.clone()]).expect("load config");
            assert!(config.validate().is_err(), "accepted {contents:?}");
            assert!(
                load_training_config(&[base.clone(), overlay]).is_err(),
                "loaded {contents:?}"
            );
        }
    }

    #[test]
    fn default_augmentation_is_valid() {
        assert!(AugmentationConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_path_list_is_rejected() {
        assert!(load_training_config(&[]).is_err());
    }
}
