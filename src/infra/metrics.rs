// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Columns: epoch, train_loss, val_loss, then one accuracy column
// per tracked quantity. Taxonomy runs track one column per rank,
// token pretraining tracks masked-token accuracy and set
// pretraining tracks none.
//
// Example (3-rank taxonomy run):
//   epoch,train_loss,val_loss,acc_kingdom,acc_phylum,acc_class
//   1,2.904100,2.871300,0.812000,0.450000,0.215000
//
// Output file: <checkpoint_dir>/metrics.csv. An existing file is
// appended to, so resumed runs extend the same log.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean loss over training batches that produced a loss
    pub train_loss: f64,
    pub val_loss: f64,
    /// Validation accuracy per tracked column, in [0, 1]
    pub accuracy: Vec<f64>,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, accuracy: Vec<f64>) -> Self {
        Self { epoch, train_loss, val_loss, accuracy }
    }

    /// True if this epoch beat the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }

    /// CSV row matching the logger's header.
    fn csv_row(&self) -> String {
        let mut fields = vec![
            self.epoch.to_string(),
            format!("{:.6}", self.train_loss),
            format!("{:.6}", self.val_loss),
        ];
        fields.extend(self.accuracy.iter().map(|a| format!("{a:.6}")));
        fields.join(",")
    }
}

/// Appends epoch metrics to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
    columns: Vec<String>,
}

impl MetricsLogger {
    /// Create the logger, writing the header when the file is new.
    /// `accuracy_columns` names the accuracy fields (without prefix).
    pub fn new(dir: impl AsRef<Path>, accuracy_columns: &[String]) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        let columns: Vec<String> = accuracy_columns.iter().map(|c| format!("acc_{c}")).collect();

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            let mut header = vec!["epoch".to_string(), "train_loss".into(), "val_loss".into()];
            header.extend(columns.iter().cloned());
            writeln!(f, "{}", header.join(","))?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path, columns })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        if m.accuracy.len() != self.columns.len() {
            anyhow::bail!(
                "epoch {} has {} accuracy values for {} columns",
                m.epoch,
                m.accuracy.len(),
                self.columns.len()
            );
        }
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", m.csv_row())?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );
        Ok(())
    }

    /// Accuracy column names, with the `acc_` prefix.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
