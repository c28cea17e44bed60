// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder
// in a fixed set of N slots.
//
// File naming convention (prefix "variables.data"):
//
//   N = 1                       N > 1
//   variables.data.mpk          variables.data.0.mpk
//                               variables.data.1.mpk
//                               ...
//   variables.data.best.mpk     → symlink to the slot holding
//                                 the best validation score
//   train_config.json           training configuration, needed
//                               to rebuild the architecture
//
// The extension is whatever the recorder writes
// (FileRecorder::file_extension). The recorder replaces the last
// extension of the path it is given, so it always receives the
// full file name; "variables.data.0" alone would turn into
// "variables.data.mpk".
//
// A slot is simply overwritten when the training driver
// reuses it. Writes are not atomic: a crash in the middle of
// a save leaves a broken slot file.
//
// On platforms without symlinks the best slot is copied to the
// link path instead.

use anyhow::{bail, Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, FileRecorder, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::Seq2SeqModel;

const CONFIG_FILE: &str = "train_config.json";

/// Manages the checkpoint slots of one training run.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir:    PathBuf,
    prefix: String,
    slots:  usize,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>, slots: usize) -> Result<Self> {
        if slots < 1 {
            bail!("at least one checkpoint slot is needed");
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir, prefix: prefix.into(), slots })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// `<prefix>` for a single slot, `<prefix>.<i>` otherwise
    pub fn slot_name(&self, slot: usize) -> String {
        if self.slots == 1 {
            self.prefix.clone()
        } else {
            format!("{}.{}", self.prefix, slot)
        }
    }

    pub fn slot_file<B: Backend>(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("{}.{}", self.slot_name(slot), record_extension::<B>()))
    }

    pub fn best_file<B: Backend>(&self) -> PathBuf {
        self.dir.join(format!("{}.best.{}", self.prefix, record_extension::<B>()))
    }

    /// Write the model weights into `slot`, replacing what was there.
    pub fn save_slot<B: Backend>(&self, model: &Seq2SeqModel<B>, slot: usize) -> Result<PathBuf> {
        if slot >= self.slots {
            bail!("checkpoint slot {} out of range (have {})", slot, self.slots);
        }
        let file = self.slot_file::<B>(slot);

        CompactRecorder::new()
            .record(model.clone().into_record(), file.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", file.display()))?;

        tracing::debug!("Saved checkpoint slot {} to '{}'", slot, file.display());
        Ok(file)
    }

    /// Point the best link at `slot`.
    pub fn link_best<B: Backend>(&self, slot: usize) -> Result<()> {
        if slot >= self.slots {
            bail!("checkpoint slot {} out of range (have {})", slot, self.slots);
        }
        let link   = self.best_file::<B>();
        let target = self.slot_file::<B>(slot);
        if !target.exists() {
            bail!("checkpoint slot {} has not been written ('{}')", slot, target.display());
        }

        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)
                .with_context(|| format!("Cannot remove old best link '{}'", link.display()))?;
        }

        #[cfg(unix)]
        {
            // Relative target so the output directory can be moved
            let name = target
                .file_name()
                .with_context(|| format!("Invalid checkpoint path '{}'", target.display()))?;
            std::os::unix::fs::symlink(name, &link)
                .with_context(|| format!("Cannot link '{}'", link.display()))?;
        }
        #[cfg(not(unix))]
        {
            fs::copy(&target, &link)
                .with_context(|| format!("Cannot copy best checkpoint to '{}'", link.display()))?;
        }

        tracing::debug!("Best checkpoint is now slot {}", slot);
        Ok(())
    }

    pub fn has_best<B: Backend>(&self) -> bool {
        self.best_file::<B>().symlink_metadata().is_ok()
    }

    /// Load the weights the best link points to into `model`.
    pub fn load_best<B: Backend>(
        &self,
        model:  Seq2SeqModel<B>,
        device: &B::Device,
    ) -> Result<Seq2SeqModel<B>> {
        let file = self.best_file::<B>();
        tracing::info!("Restoring best checkpoint from '{}'", file.display());

        let record = CompactRecorder::new()
            .load(file.clone(), device)
            .with_context(|| {
                format!(
                    "Cannot load checkpoint '{}'. Have you trained the model first?",
                    file.display()
                )
            })?;

        Ok(model.load_record(record))
    }

    /// Save the training configuration to JSON.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);

        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. \
                 Make sure you have run 'train' before 'evaluate'.",
                path.display()
            )
        })?;

        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config '{}'", path.display()))
    }
}

fn record_extension<B: Backend>() -> &'static str {
    <CompactRecorder as FileRecorder<B>>::file_extension()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::ml::model::Seq2SeqConfig;

    type B = NdArray;

    fn model(source_vocab: usize) -> Seq2SeqModel<B> {
        Seq2SeqConfig::new(vec![source_vocab], 7, 3, 4, 4, 2)
            .with_attention_dim(2)
            .init(&Default::default())
    }

    fn weights(model: &Seq2SeqModel<B>) -> Vec<f32> {
        model.decoder.output.weight.val().into_data().iter::<f32>().collect()
    }

    // Records are stored in half precision
    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-3, "{x} vs {y}");
        }
    }

    #[test]
    fn test_slot_names() {
        let dir    = tempfile::tempdir().unwrap();
        let single = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        assert_eq!(single.slot_name(0), "variables.data");
        assert!(single.slot_file::<B>(0).ends_with("variables.data.mpk"));

        let many = CheckpointManager::new(dir.path(), "variables.data", 3).unwrap();
        assert_eq!(many.slot_name(2), "variables.data.2");
        assert!(many.slot_file::<B>(2).ends_with("variables.data.2.mpk"));
        assert!(many.best_file::<B>().ends_with("variables.data.best.mpk"));
    }

    #[test]
    fn test_zero_slots_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CheckpointManager::new(dir.path(), "v", 0).is_err());
    }

    #[test]
    fn test_save_link_and_restore_best() {
        let dir  = tempfile::tempdir().unwrap();
        let mgr  = CheckpointManager::new(dir.path(), "variables.data", 2).unwrap();
        let a    = model(5);
        let b    = model(5);

        let saved = mgr.save_slot(&a, 0).unwrap();
        assert_eq!(saved, mgr.slot_file::<B>(0));
        mgr.save_slot(&b, 1).unwrap();
        assert!(mgr.slot_file::<B>(0).exists());
        assert!(mgr.slot_file::<B>(1).exists());
        assert!(!mgr.has_best::<B>());

        // Nothing else lands in the directory
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["variables.data.0.mpk", "variables.data.1.mpk"]);

        mgr.link_best::<B>(1).unwrap();
        assert!(mgr.has_best::<B>());
        let restored = mgr.load_best(model(5), &Default::default()).unwrap();
        assert_close(&weights(&restored), &weights(&b));

        // Re-pointing replaces the old link
        mgr.link_best::<B>(0).unwrap();
        let restored = mgr.load_best(model(5), &Default::default()).unwrap();
        assert_close(&weights(&restored), &weights(&a));
    }

    #[test]
    fn test_slot_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "v", 1).unwrap();
        assert!(mgr.save_slot(&model(5), 1).is_err());
        assert!(mgr.link_best::<B>(1).is_err());
    }

    #[test]
    fn test_link_to_unwritten_slot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "v", 2).unwrap();
        assert!(mgr.link_best::<B>(0).is_err());
        assert!(!mgr.has_best::<B>());
    }

    #[test]
    fn test_single_slot_round_trip_through_best_link() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        let a   = model(5);

        mgr.save_slot(&a, 0).unwrap();
        assert!(dir.path().join("variables.data.mpk").exists());
        mgr.link_best::<B>(0).unwrap();

        let restored = mgr.load_best(model(5), &Default::default()).unwrap();
        assert_close(&weights(&restored), &weights(&a));
    }
}
