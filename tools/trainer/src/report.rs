use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, warn};

use digits_model::{evaluate::Evaluation, metrics::EpochSummary};
use digits_tracking::{Metric, Param, Tracker};

use crate::learn::TrainingConfig;

pub const OPTIMIZER: &str = "adam";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
// Grace period for summaries still in flight when `fit` returns.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn training_params(
    config: &TrainingConfig,
    train_samples: usize,
    test_samples: usize,
) -> Vec<Param> {
    vec![
        Param::new("batch_size", config.batch_size),
        Param::new("epochs", config.num_epochs),
        Param::new("training samples", train_samples),
        Param::new("test samples", test_samples),
        Param::new("learning_rate", config.learning_rate),
        Param::new("optimizer", OPTIMIZER),
        Param::new("seed", config.seed),
    ]
}

pub fn log_params(tracker: &dyn Tracker, params: &[Param]) -> Result<()> {
    for param in params {
        tracker
            .log_param(&param.key, &param.value)
            .with_context(|| format!("logging param `{}`", param.key))?;
    }
    Ok(())
}

pub fn epoch_metrics(summaries: &[EpochSummary], timestamp: i64) -> Vec<Metric> {
    summaries
        .iter()
        .flat_map(|summary| {
            summary
                .tracking_entries()
                .into_iter()
                .map(move |(key, value)| Metric {
                    key,
                    value,
                    timestamp,
                    step: summary.step(),
                })
        })
        .collect()
}

pub fn log_epoch_metrics(tracker: &dyn Tracker, summaries: &[EpochSummary]) -> Result<()> {
    let metrics = epoch_metrics(summaries, Utc::now().timestamp_millis());
    if metrics.is_empty() {
        return Ok(());
    }
    tracker
        .log_batch(&metrics, &[], &[])
        .context("logging epoch metrics")
}

// Logs every summary as soon as the learner finishes the epoch. After the first
// failed upload the remaining summaries are only drained, and the error is
// returned once training is done.
pub fn forward_epochs(
    tracker: &(dyn Tracker + Sync),
    epochs: Receiver<EpochSummary>,
    training_done: &AtomicBool,
) -> Result<usize> {
    let mut forwarded = 0;
    let mut first_error = None;
    loop {
        let draining = training_done.load(Ordering::Acquire);
        let timeout = if draining { DRAIN_TIMEOUT } else { POLL_INTERVAL };
        let summary = match epochs.recv_timeout(timeout) {
            Ok(summary) => summary,
            Err(RecvTimeoutError::Timeout) if !draining => continue,
            Err(_) => break,
        };
        if first_error.is_some() {
            warn!(split = summary.split.prefix(), epoch = summary.epoch, "skipping epoch metrics");
            continue;
        }
        match log_epoch_metrics(tracker, std::slice::from_ref(&summary)) {
            Ok(()) => {
                forwarded += 1;
                debug!(split = summary.split.prefix(), epoch = summary.epoch, "forwarded epoch metrics");
            }
            Err(err) => {
                error!(error = %err, epoch = summary.epoch, "cannot forward epoch metrics");
                first_error = Some(err.context(format!(
                    "forwarding {} metrics of epoch {}",
                    summary.split.prefix(),
                    summary.epoch
                )));
            }
        }
    }
    first_error.map_or(Ok(forwarded), Err)
}

pub fn log_evaluation(tracker: &dyn Tracker, score: &Evaluation) -> Result<()> {
    tracker
        .log_metric("test_loss", score.loss, 0)
        .context("logging test loss")?;
    tracker
        .log_metric("test_accuracy", score.accuracy, 0)
        .context("logging test accuracy")
}
