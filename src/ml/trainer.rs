// ============================================================
// Layer 5 - Training Driver
// ============================================================
// Epoch/batch loop with Adam, periodic train-batch metrics,
// periodic validation and best-N checkpoint retention.
//
//   start        save the initial parameters to slot 0 and
//                point `best` at it
//   every batch  check the interrupt flag, step += 1, one
//                optimizer update
//   logging      step % logging_period == logging_period - 1
//                → evaluate the batch just trained on
//   validation   step % validation_period == validation_period - 1
//                → score the validation set; a score that beats
//                the worst retained one overwrites that slot, and
//                `best` is re-pointed when it is the best ever
//   end          restore `best`, then decode every test set and
//                write its output file
//
// Interruption abandons the current batch and still runs the
// end phase.
//
// Burn notes:
//   - Training runs on an AutodiffBackend
//   - model.valid() returns the model on B::InnerBackend with
//     dropout and activation noise disabled; every evaluation
//     uses it together with an InnerBackend batcher

use anyhow::{bail, Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::backend::{AutodiffBackend, Backend},
};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::data::{
    batcher::{BatchLayout, Seq2SeqBatcher},
    dataset::Seq2SeqDataset,
};
use crate::domain::ledger::{BestScoreLedger, LedgerUpdate, MetricGoal};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::evaluation::{
    log_dataset_evaluation, log_evaluation, log_examples, run_on_dataset, Evaluation, Scoring,
};
use crate::ml::model::Seq2SeqModel;

pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;
pub type EvalBackend  = burn::backend::Wgpu;

#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub epochs:            usize,
    pub batch_size:        usize,
    pub learning_rate:     f64,
    pub logging_period:    usize,
    pub validation_period: usize,
    /// Number of checkpoints retained (N)
    pub keep_best:         usize,
    pub minimize_metric:   bool,
    pub seed:              u64,
}

pub struct TrainingData {
    pub train: Seq2SeqDataset,
    pub val:   Seq2SeqDataset,
    pub tests: Vec<Seq2SeqDataset>,
}

/// Where the loop persists its results and how it is stopped.
pub struct TrainingSinks<'a> {
    pub checkpoints: &'a CheckpointManager,
    pub metrics:     &'a MetricsLogger,
    pub interrupt:   Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub steps:          usize,
    pub seen_instances: usize,
    pub interrupted:    bool,
    pub best_score:     f64,
    pub best_epoch:     usize,
    pub best_batch:     usize,
    /// (slot, score) of every retained checkpoint, best first
    pub retained:       Vec<(usize, f64)>,
    pub test_results:   Vec<(String, Option<Evaluation>)>,
}

pub fn training_loop<B: AutodiffBackend>(
    mut model: Seq2SeqModel<B>,
    settings:  &TrainingSettings,
    data:      TrainingData,
    layout:    Arc<BatchLayout>,
    scoring:   Scoring<'_>,
    sinks:     &TrainingSinks<'_>,
    device:    &B::Device,
) -> Result<(Seq2SeqModel<B>, TrainingReport)> {
    if settings.batch_size == 0 {
        bail!("batch size must be at least 1");
    }
    if settings.logging_period == 0 || settings.validation_period == 0 {
        bail!("logging and validation periods must be at least 1");
    }
    let logging_period    = settings.logging_period;
    let validation_period = settings.validation_period;
    let batch_size        = settings.batch_size;

    // Without evaluators the primary score is the optimized loss
    let goal = match scoring.primary_name() {
        Some(_) => MetricGoal::from_minimize(settings.minimize_metric),
        None    => MetricGoal::Minimize,
    };
    let mut ledger = BestScoreLedger::new(settings.keep_best, goal)?;
    let metric     = scoring.primary_name().unwrap_or("opt_loss").to_string();

    // ── Slot 0 holds the initial parameters until something beats it ────────
    sinks.checkpoints.save_slot(&model, 0)?;
    sinks.checkpoints.link_best::<B>(0)?;

    let train_batcher = Seq2SeqBatcher::<B>::new(layout.clone(), device.clone());
    let valid_batcher = Seq2SeqBatcher::<B::InnerBackend>::new(layout, device.clone());

    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
    let mut rng   = StdRng::seed_from_u64(settings.seed);

    let TrainingData { mut train, val, tests } = data;

    let mut step           = 0usize;
    let mut seen_instances = 0usize;
    let mut best_epoch     = 0usize;
    let mut best_batch     = 0usize;
    let mut interrupted    = false;

    tracing::info!("Starting training");
    'epochs: for epoch in 1..=settings.epochs {
        tracing::info!("Epoch {} starts", epoch);

        train.shuffle(&mut rng);
        for (batch_n, batch_data) in train.batch_dataset(batch_size).into_iter().enumerate() {
            if sinks.interrupt.load(Ordering::SeqCst) {
                tracing::info!("Training interrupted by user.");
                interrupted = true;
                break 'epochs;
            }

            // ── Optimization step ────────────────────────────────────────────
            let global_step = step;
            step           += 1;
            seen_instances += batch_data.len();

            let batch  = train_batcher.batch(batch_data.samples().to_vec());
            let output = model.forward(&batch, global_step);
            let grads  = GradientsParams::from_grads(output.cost.backward(), &model);
            model      = optim.step(settings.learning_rate, model, grads);

            // ── Train-batch metrics ──────────────────────────────────────────
            if step % logging_period == logging_period - 1 {
                let run = run_on_dataset(
                    &model.valid(),
                    &valid_batcher,
                    &batch_data,
                    batch_size,
                    step,
                    scoring,
                    false,
                )?;
                if let Some(evaluation) = run.evaluation {
                    log_evaluation(&evaluation, true);
                    sinks.metrics.log("train", step, seen_instances, &evaluation.values())?;
                }
            }

            // ── Validation ───────────────────────────────────────────────────
            if step % validation_period == validation_period - 1 {
                let run = run_on_dataset(
                    &model.valid(),
                    &valid_batcher,
                    &val,
                    batch_size,
                    step,
                    scoring,
                    false,
                )?;
                let evaluation = run
                    .evaluation
                    .clone()
                    .with_context(|| format!("Validation set '{}' has no targets", val.name()))?;
                let score = evaluation.primary();

                if goal.is_better(score, ledger.best()) {
                    best_epoch = epoch;
                    best_batch = batch_n;
                }

                retain_checkpoint(&mut ledger, score, &model, sinks.checkpoints)?;

                tracing::info!("Validation (epoch {}, batch number {}):", epoch, batch_n);
                log_evaluation(&evaluation, false);
                sinks.metrics.log("val", step, seen_instances, &evaluation.values())?;
                tracing::info!(
                    "best {} on validation: {:.2} (in epoch {}, after batch number {})",
                    metric,
                    ledger.best(),
                    best_epoch,
                    best_batch,
                );
                log_examples(&val, &run);
            }
        }
    }

    // ── Restore best and run the test sets ───────────────────────────────────
    if sinks.checkpoints.has_best::<B>() {
        model = sinks.checkpoints.load_best(model, device)?;
    }
    tracing::info!(
        "Training finished. Maximum {} on validation data: {:.2}, epoch {}",
        metric,
        ledger.best(),
        best_epoch,
    );

    let final_model  = model.valid();
    let mut results  = Vec::with_capacity(tests.len());
    for dataset in &tests {
        let run = run_on_dataset(
            &final_model,
            &valid_batcher,
            dataset,
            batch_size,
            step,
            scoring,
            true,
        )?;
        if let Some(evaluation) = &run.evaluation {
            log_dataset_evaluation(dataset.name(), evaluation);
        }
        results.push((dataset.name().to_string(), run.evaluation));
    }
    tracing::info!("Finished.");

    let report = TrainingReport {
        steps: step,
        seen_instances,
        interrupted,
        best_score: ledger.best(),
        best_epoch,
        best_batch,
        retained: ledger.entries(),
        test_results: results,
    };
    Ok((model, report))
}

/// Records a validation score; a stored score writes the model into its
/// slot, and a new best re-points the best link.
fn retain_checkpoint<B: Backend>(
    ledger:      &mut BestScoreLedger,
    score:       f64,
    model:       &Seq2SeqModel<B>,
    checkpoints: &CheckpointManager,
) -> Result<LedgerUpdate> {
    let update = ledger.record(score);
    if let LedgerUpdate::Stored { slot, new_best } = update {
        let path = checkpoints.save_slot(model, slot)?;
        tracing::info!("Variable file saved in {}", path.display());
        if new_best {
            checkpoints.link_best::<B>(slot)?;
        }
        tracing::info!("Best scores saved so far: {:?}", ledger.slots());
    }
    Ok(update)
}

/// Installs a Ctrl-C handler that raises the returned flag.
pub fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag    = Arc::new(AtomicBool::new(false));
    let handler = flag.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, stopping after the current batch.");
        handler.store(true, Ordering::SeqCst);
    })
    .context("Cannot install the interrupt handler")?;
    Ok(flag)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::domain::{
        evaluators::{Bleu, TokenAccuracy},
        postprocess::Identity,
        traits::Evaluator,
        vocabulary::Vocabulary,
    };
    use crate::ml::model::Seq2SeqConfig;

    type B = Autodiff<NdArray>;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn corpus() -> (Vec<Vec<String>>, Vec<Vec<String>>) {
        let src = ["a b", "b c", "c d", "d a", "a c", "b d"].map(words).to_vec();
        let tgt = ["x y", "y z", "z w", "w x", "x z", "y w"].map(words).to_vec();
        (src, tgt)
    }

    fn layout() -> Arc<BatchLayout> {
        let (src, tgt) = corpus();
        Arc::new(BatchLayout {
            source_vocabs:  vec![Vocabulary::from_sentences(&src, 50)],
            target_vocab:   Vocabulary::from_sentences(&tgt, 50),
            max_input_len:  5,
            max_output_len: 3,
            copy_from:      None,
        })
    }

    fn model(layout: &BatchLayout) -> Seq2SeqModel<B> {
        Seq2SeqConfig::new(
            vec![layout.source_vocabs[0].len()],
            layout.target_vocab.len(),
            4,
            6,
            6,
            layout.max_output_len,
        )
        .with_attention_dim(4)
        .init(&Default::default())
    }

    fn data(test_output: &std::path::Path) -> TrainingData {
        let (src, tgt) = corpus();
        TrainingData {
            train: Seq2SeqDataset::from_series("train", vec![src.clone()], Some(tgt.clone())),
            val:   Seq2SeqDataset::from_series("val", vec![src[..3].to_vec()], Some(tgt[..3].to_vec())),
            tests: vec![Seq2SeqDataset::from_series("test", vec![src[3..].to_vec()], None)
                .with_output(test_output)],
        }
    }

    fn settings(keep_best: usize) -> TrainingSettings {
        TrainingSettings {
            epochs:            2,
            batch_size:        2,
            learning_rate:     1e-2,
            logging_period:    2,
            validation_period: 1,
            keep_best,
            minimize_metric:   false,
            seed:              7,
        }
    }

    fn evaluators() -> Vec<Box<dyn Evaluator>> {
        vec![Box::new(TokenAccuracy), Box::new(Bleu::new(4))]
    }

    #[test]
    fn test_full_run_retains_checkpoints_and_writes_test_output() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 2).unwrap();
        let evaluators  = evaluators();
        let scoring     = Scoring { evaluators: &evaluators, postprocess: &Identity };
        let metrics     = MetricsLogger::new(dir.path(), &scoring.metric_names()).unwrap();
        let sinks       = TrainingSinks {
            checkpoints: &checkpoints,
            metrics:     &metrics,
            interrupt:   Arc::new(AtomicBool::new(false)),
        };
        let layout      = layout();
        let output      = dir.path().join("test.out");

        let (_, report) = training_loop(
            model(&layout),
            &settings(2),
            data(&output),
            layout,
            scoring,
            &sinks,
            &Default::default(),
        )
        .unwrap();

        // 6 sentences, batches of 2, 2 epochs
        assert_eq!(report.steps, 6);
        assert_eq!(report.seen_instances, 12);
        assert!(!report.interrupted);
        assert!(!report.retained.is_empty() && report.retained.len() <= 2);
        assert_eq!(report.retained[0].1, report.best_score);

        assert!(checkpoints.has_best::<B>());
        assert!(checkpoints.slot_file::<B>(0).exists());
        assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 3);
        assert_eq!(report.test_results.len(), 1);
        assert!(report.test_results[0].1.is_none());

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        // header + 6 validation rows + 3 train rows (steps 1, 3, 5)
        assert_eq!(csv.lines().count(), 1 + 6 + 3);
    }

    #[test]
    fn test_interrupt_still_restores_and_tests() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        let evaluators  = evaluators();
        let scoring     = Scoring { evaluators: &evaluators, postprocess: &Identity };
        let metrics     = MetricsLogger::new(dir.path(), &scoring.metric_names()).unwrap();
        let sinks       = TrainingSinks {
            checkpoints: &checkpoints,
            metrics:     &metrics,
            interrupt:   Arc::new(AtomicBool::new(true)),
        };
        let layout      = layout();
        let output      = dir.path().join("test.out");

        let (_, report) = training_loop(
            model(&layout),
            &settings(1),
            data(&output),
            layout,
            scoring,
            &sinks,
            &Default::default(),
        )
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.steps, 0);
        assert!(report.retained.is_empty());
        assert!(checkpoints.has_best::<B>());
        assert!(output.exists());
    }

    fn sinks<'a>(
        checkpoints: &'a CheckpointManager,
        metrics:     &'a MetricsLogger,
    ) -> TrainingSinks<'a> {
        TrainingSinks { checkpoints, metrics, interrupt: Arc::new(AtomicBool::new(false)) }
    }

    fn output_weights(model: &Seq2SeqModel<B>) -> Vec<f32> {
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
    fn test_best_link_follows_retained_best_after_training() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 3).unwrap();
        let evaluators  = evaluators();
        let scoring     = Scoring { evaluators: &evaluators, postprocess: &Identity };
        let metrics     = MetricsLogger::new(dir.path(), &scoring.metric_names()).unwrap();
        let layout      = layout();

        let (restored, report) = training_loop(
            model(&layout),
            &settings(3),
            data(&dir.path().join("test.out")),
            layout.clone(),
            scoring,
            &sinks(&checkpoints, &metrics),
            &Default::default(),
        )
        .unwrap();

        for (slot, _) in &report.retained {
            assert!(checkpoints.slot_file::<B>(*slot).exists(), "slot {slot} missing");
        }

        // The best link names a slot file holding the best score
        let link_target = std::fs::read_link(checkpoints.best_file::<B>()).unwrap();
        let best_slot   = (0..3)
            .find(|&i| checkpoints.slot_file::<B>(i).file_name() == Some(link_target.as_os_str()))
            .expect("best link points at a slot file");
        assert!(report.retained.contains(&(best_slot, report.best_score)));

        // The returned model is the one in that slot
        let reloaded = checkpoints.load_best(model(&layout), &Default::default()).unwrap();
        assert_close(&output_weights(&reloaded), &output_weights(&restored));
    }

    #[test]
    fn test_single_slot_is_overwritten_only_on_improvement() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        let layout      = layout();
        let mut ledger  = BestScoreLedger::new(1, MetricGoal::Maximize).unwrap();

        let models: Vec<Seq2SeqModel<B>> = (0..4).map(|_| model(&layout)).collect();
        let scores = [0.2, 0.5, 0.3, 0.7];
        let mut restored_after = Vec::new();

        for (model, score) in models.iter().zip(scores) {
            retain_checkpoint(&mut ledger, score, model, &checkpoints).unwrap();
            let reloaded = checkpoints.load_best(model.clone(), &Default::default()).unwrap();
            restored_after.push(output_weights(&reloaded));
        }

        // Stored at validations 1, 2 and 4; the third keeps the second's weights
        assert_close(&restored_after[0], &output_weights(&models[0]));
        assert_close(&restored_after[1], &output_weights(&models[1]));
        assert_close(&restored_after[2], &output_weights(&models[1]));
        assert_close(&restored_after[3], &output_weights(&models[3]));
        assert_eq!(ledger.best(), 0.7);
    }

    #[test]
    fn test_without_evaluators_the_lowest_loss_is_kept() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        let scoring     = Scoring { evaluators: &[], postprocess: &Identity };
        let metrics     = MetricsLogger::new(dir.path(), &scoring.metric_names()).unwrap();
        let layout      = layout();

        // minimize_metric is false, the loss still has to go down
        let (_, report) = training_loop(
            model(&layout),
            &settings(1),
            data(&dir.path().join("test.out")),
            layout,
            scoring,
            &sinks(&checkpoints, &metrics),
            &Default::default(),
        )
        .unwrap();

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        let lowest = csv
            .lines()
            .filter(|line| line.starts_with("val,"))
            .map(|line| line.split(',').nth(3).unwrap().parse::<f64>().unwrap())
            .fold(f64::INFINITY, f64::min);
        assert!(lowest.is_finite());
        assert!((report.best_score - lowest).abs() < 1e-5);
    }

    #[test]
    fn test_zero_periods_and_batch_size_are_rejected() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        let evaluators  = evaluators();
        let scoring     = Scoring { evaluators: &evaluators, postprocess: &Identity };
        let metrics     = MetricsLogger::new(dir.path(), &scoring.metric_names()).unwrap();

        let broken = [
            TrainingSettings { logging_period: 0, ..settings(1) },
            TrainingSettings { validation_period: 0, ..settings(1) },
            TrainingSettings { batch_size: 0, ..settings(1) },
        ];
        for bad in broken {
            let layout = layout();
            let result = training_loop(
                model(&layout),
                &bad,
                data(&dir.path().join("out")),
                layout,
                scoring,
                &sinks(&checkpoints, &metrics),
                &Default::default(),
            );
            assert!(result.is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_zero_keep_best_is_rejected() {
        let dir         = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), "variables.data", 1).unwrap();
        let scoring     = Scoring { evaluators: &[], postprocess: &Identity };
        let metrics     = MetricsLogger::new(dir.path(), &scoring.metric_names()).unwrap();
        let sinks       = TrainingSinks {
            checkpoints: &checkpoints,
            metrics:     &metrics,
            interrupt:   Arc::new(AtomicBool::new(false)),
        };
        let layout      = layout();

        let result = training_loop(
            model(&layout),
            &settings(0),
            data(&dir.path().join("out")),
            layout,
            scoring,
            &sinks,
            &Default::default(),
        );
        assert!(result.is_err());
    }
}
