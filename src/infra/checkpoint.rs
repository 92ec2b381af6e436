// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder,
// next to the configuration needed to rebuild the module.
//
// Directory layout:
//   checkpoints/
//     model_config.json        ← ModelConfig (which model + all hyperparameters)
//     train_config.json        ← run options (epochs, lr, data settings)
//     model_epoch_1.mpk.gz     ← weights after epoch 1
//     model_epoch_2.mpk.gz
//     ...
//     latest_epoch.json        ← number of the last saved epoch
//     metrics.csv              ← see metrics.rs
//
// Loading is always: read model_config.json → build the module
// from it → load the recorded weights into that module. The
// recorder refuses records whose structure does not match.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::ml::models::ModelConfig;

const MODEL_CONFIG: &str = "model_config.json";
const LATEST_EPOCH: &str = "latest_epoch.json";

/// Manages saving and loading of model checkpoints in one directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Open (creating if needed) a checkpoint directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Open an existing checkpoint directory for reading.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            anyhow::bail!("Checkpoint directory '{}' does not exist", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save model weights for a given epoch and advance latest_epoch.json.
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, epoch: usize) -> Result<()> {
        let path = self.epoch_path(epoch);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        self.write_json(LATEST_EPOCH, &epoch)?;
        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Load the latest saved weights into `model`.
    pub fn load_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        let epoch = self.latest_epoch()?;
        self.load_epoch(model, epoch, device)
    }

    /// Load the weights of a specific epoch into `model`.
    pub fn load_epoch<B: Backend, M: Module<B>>(&self, model: M, epoch: usize, device: &B::Device) -> Result<M> {
        let path = self.epoch_path(epoch);
        tracing::info!("Loading checkpoint '{}'", path.display());

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'. Was it trained with this config?", path.display()))?;
        Ok(model.load_record(record))
    }

    pub fn save_config(&self, config: &ModelConfig) -> Result<()> {
        let path = self.dir.join(MODEL_CONFIG);
        fs::write(&path, config.to_json()?).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved {} config to '{}'", config.name(), path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<ModelConfig> {
        let path = self.dir.join(MODEL_CONFIG);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'. Has this model been trained?", path.display()))?;
        ModelConfig::from_json(&json).with_context(|| format!("Invalid model config in '{}'", path.display()))
    }

    /// Write any serialisable value as pretty JSON in the directory.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(value)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let json = fs::read_to_string(&path).with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed JSON in '{}'", path.display()))
    }

    /// Last saved epoch number.
    pub fn latest_epoch(&self) -> Result<usize> {
        self.read_json(LATEST_EPOCH)
            .context("No saved epoch found. Has this model been trained?")
    }

    fn epoch_path(&self, epoch: usize) -> PathBuf {
        // the recorder adds the extension
        self.dir.join(format!("model_epoch_{epoch}"))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::token_encoder::tests::{raw_tokens, small_config, TestBackend};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("deepdna-ckpt-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_weights_round_trip_through_rebuilt_module() {
        let dir = scratch_dir("weights");
        let device = Default::default();
        let ckpt = CheckpointManager::new(&dir).unwrap();
        let config = ModelConfig::TokenEncoder(small_config());
        ckpt.save_config(&config).unwrap();

        let trained = small_config().init::<TestBackend>(&device).unwrap();
        ckpt.save_model(&trained, 3).unwrap();
        assert_eq!(ckpt.latest_epoch().unwrap(), 3);

        let rebuilt = match ckpt.load_config().unwrap() {
            ModelConfig::TokenEncoder(c) => c.init::<TestBackend>(&device).unwrap(),
            other => panic!("unexpected variant {}", other.name()),
        };
        let restored = ckpt.load_model(rebuilt, &device).unwrap();

        // CompactRecorder stores half precision
        let values = |m: &crate::ml::token_encoder::TokenEncoder<TestBackend>| -> Vec<f32> {
            m.class_token.val().into_data().convert::<f32>().to_vec().unwrap()
        };
        for (a, b) in values(&trained).iter().zip(values(&restored)) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
        let tokens = raw_tokens::<TestBackend>(2, 10, 64, &device).add_scalar(1);
        assert_eq!(restored.forward(tokens).unwrap().dims(), [2, 11, 8]);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir = scratch_dir("missing");
        let ckpt = CheckpointManager::new(&dir).unwrap();
        assert!(ckpt.latest_epoch().is_err());
        assert!(ckpt.load_config().is_err());
        assert!(CheckpointManager::open(dir.join("nope")).is_err());
        fs::remove_dir_all(dir).ok();
    }
}
