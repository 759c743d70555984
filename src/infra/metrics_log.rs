// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row per training epoch:
//
//   epoch,train_loss,val_loss,val_accuracy,avg_exit_layer
//   1,1.098612,1.052331,0.512000,11.000000
//   2,0.873020,0.901554,0.634000,9.412000
//
// avg_exit_layer is the mean encoder depth (1-based) at which
// validation instances stopped, so it drops as more of them
// leave early.
//
// Output file: <checkpoint_dir>/metrics.csv

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "epoch,train_loss,val_loss,val_accuracy,avg_exit_layer";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:          usize,
    pub train_loss:     f64,
    pub val_loss:       f64,
    pub val_accuracy:   f64,
    pub avg_exit_layer: f64,
}

impl EpochMetrics {
    /// Returns true if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6}",
            m.epoch, m.train_loss, m.val_loss, m.val_accuracy, m.avg_exit_layer,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch, m.train_loss, m.val_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
