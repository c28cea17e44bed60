// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Records training and validation metrics to a CSV file.
//
// One row per train-batch log and per validation:
//
//   phase,step,seen_instances,opt_loss,dec_loss,accuracy,bleu
//   train,1,64,4.812300,5.019200,0.031000,0.000000
//   val,1,64,4.790100,4.998700,0.029000,0.000000
//   ...
//
// The metric columns follow the configured evaluators, so the
// header is fixed when the logger is created. An existing file
// is appended to only if its header matches.
//
// Output file: <output dir>/metrics.csv

use anyhow::{bail, Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const CSV_FILE: &str = "metrics.csv";

/// Appends metric rows to `metrics.csv`.
#[derive(Debug, Clone)]
pub struct MetricsLogger {
    csv_path: PathBuf,
    columns:  usize,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>, metric_names: &[String]) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join(CSV_FILE);
        let header   = header(metric_names);

        if csv_path.exists() {
            let existing = fs::read_to_string(&csv_path)
                .with_context(|| format!("Cannot read '{}'", csv_path.display()))?;
            if existing.lines().next().is_some_and(|line| line != header) {
                bail!(
                    "'{}' was written with different metrics, use a new output directory",
                    csv_path.display()
                );
            }
        } else {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{header}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path, columns: metric_names.len() })
    }

    /// Append one row; `values` follow the header's metric order.
    pub fn log(&self, phase: &str, step: usize, seen_instances: usize, values: &[f64]) -> Result<()> {
        if values.len() != self.columns {
            bail!("expected {} metric values, got {}", self.columns, values.len());
        }

        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let mut row = format!("{phase},{step},{seen_instances}");
        for v in values {
            row.push_str(&format!(",{v:.6}"));
        }
        writeln!(f, "{row}")?;

        tracing::debug!("Logged {} metrics at step {}", phase, step);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

fn header(metric_names: &[String]) -> String {
    let mut header = String::from("phase,step,seen_instances");
    for name in metric_names {
        header.push(',');
        header.push_str(name);
    }
    header
}
