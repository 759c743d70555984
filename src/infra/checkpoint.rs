// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores everything a later evaluate / predict /
// calibrate run needs, using Burn's CompactRecorder for the
// weights:
//
//   checkpoints/
//     model_epoch_1.mpk.gz   ← weights after epoch 1
//     ...
//     latest_epoch.json      ← last epoch written
//     best_epoch.json        ← epoch with the lowest val loss
//     train_config.json      ← TrainConfig (task, exits, sizes)
//     bert_config.json       ← resolved encoder architecture
//     labels.json            ← label vocabulary (classification)
//     tokenizer.json         ← see TokenizerStore
//
// Exit heads can also be exported to / imported from their own
// record file (or one file per head), so heads trained once can
// be reused on top of a different encoder run (the linear_layers
// option).
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::CompactRecorder,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::encoder::BertConfig;

const LATEST_FILE:      &str = "latest_epoch.json";
const BEST_FILE:        &str = "best_epoch.json";
const TRAIN_CONFIG:     &str = "train_config.json";
const BERT_CONFIG:      &str = "bert_config.json";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Manager over an existing directory (inference side).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        anyhow::ensure!(
            dir.is_dir(),
            "Checkpoint directory '{}' does not exist. Have you run 'train' first?",
            dir.display()
        );
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn epoch_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("model_epoch_{epoch}"))
    }

    /// Save model weights for `epoch` and move the latest pointer.
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, epoch: usize) -> Result<()> {
        let path = self.epoch_path(epoch);
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        write_json(&self.dir.join(LATEST_FILE), &epoch)?;
        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Load weights into `model`: the given epoch, else the best one,
    /// else the latest one.
    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        epoch:  Option<usize>,
        device: &B::Device,
    ) -> Result<M> {
        let epoch = match epoch {
            Some(e) => e,
            None    => self.best_epoch()?.map_or_else(|| self.latest_epoch(), Ok)?,
        };
        let path = self.epoch_path(epoch);
        tracing::info!("Loading checkpoint from epoch {}", epoch);

        model
            .load_file(path.clone(), &CompactRecorder::new(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?", path.display())
            })
    }

    pub fn mark_best(&self, epoch: usize) -> Result<()> {
        write_json(&self.dir.join(BEST_FILE), &epoch)
    }

    pub fn best_epoch(&self) -> Result<Option<usize>> {
        let path = self.dir.join(BEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn latest_epoch(&self) -> Result<usize> {
        read_json(&self.dir.join(LATEST_FILE))
            .context("Cannot find 'latest_epoch.json'. Have you run 'train' first?")
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        write_json(&self.dir.join(TRAIN_CONFIG), cfg)
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        read_json(&self.dir.join(TRAIN_CONFIG))
            .context("Cannot read 'train_config.json'. Make sure you have run 'train' first.")
    }

    pub fn save_bert_config(&self, cfg: &BertConfig) -> Result<()> {
        let path = self.dir.join(BERT_CONFIG);
        cfg.save(&path)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }

    pub fn load_bert_config(&self) -> Result<BertConfig> {
        let path = self.dir.join(BERT_CONFIG);
        BertConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read '{}': {e}", path.display()))
    }

    /// Write exit heads to `path` (an .mpk.gz is appended).
    pub fn export_heads<B: Backend, M: Module<B>>(&self, heads: &M, path: &Path) -> Result<()> {
        heads
            .clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())
            .with_context(|| format!("Cannot export exit heads to '{}'", path.display()))?;
        tracing::info!("Exported exit heads to '{}'", path.display());
        Ok(())
    }

    /// Replace the weights of `heads` with the ones stored at `path`.
    pub fn import_heads<B: Backend, M: Module<B>>(&self, heads: M, path: &Path, device: &B::Device) -> Result<M> {
        heads
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .with_context(|| {
                format!("Cannot load exit heads from '{}'; do the layer indices match?", path.display())
            })
    }

    /// Write head i to `paths[i]`.
    pub fn export_head_files<B: Backend, M: Module<B>>(&self, heads: &[M], paths: &[PathBuf]) -> Result<()> {
        check_head_count(heads.len(), paths.len())?;
        for (head, path) in heads.iter().zip(paths) {
            self.export_heads(head, path)?;
        }
        Ok(())
    }

    /// Load head i from `paths[i]`.
    pub fn import_head_files<B: Backend, M: Module<B>>(
        &self,
        heads:  Vec<M>,
        paths:  &[PathBuf],
        device: &B::Device,
    ) -> Result<Vec<M>> {
        check_head_count(heads.len(), paths.len())?;
        heads
            .into_iter()
            .zip(paths)
            .map(|(head, path)| self.import_heads(head, path, device))
            .collect()
    }
}

fn check_head_count(heads: usize, files: usize) -> Result<()> {
    anyhow::ensure!(heads == files, "{files} head files given for {heads} exit heads");
    Ok(())
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid JSON in '{}'", path.display()))
}
