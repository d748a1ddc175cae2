use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use digits_tracking::{Metric, Param, RunTag, Tracker, TrackingError};

#[derive(Default)]
struct Recorded {
    params: Vec<Param>,
    metrics: Vec<Metric>,
    tags: Vec<RunTag>,
    artifacts: Vec<(PathBuf, String)>,
    batches: usize,
}

#[derive(Default)]
pub struct RecordingTracker {
    recorded: Mutex<Recorded>,
    // 1-based number of the first `log_batch` call that fails.
    failing_batch: Option<usize>,
}

impl RecordingTracker {
    pub fn failing_from_batch(batch: usize) -> Self {
        Self {
            failing_batch: Some(batch),
            ..Self::default()
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap()
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.recorded()
            .params
            .iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.value.clone())
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.recorded()
            .metrics
            .iter()
            .rev()
            .find(|m| m.key == key)
            .map(|m| m.value)
    }

    pub fn metrics(&self) -> Vec<Metric> {
        self.recorded().metrics.clone()
    }

    pub fn metric_keys(&self) -> Vec<String> {
        self.recorded().metrics.iter().map(|m| m.key.clone()).collect()
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        self.recorded()
            .tags
            .iter()
            .rev()
            .find(|t| t.key == key)
            .map(|t| t.value.clone())
    }

    pub fn artifacts(&self) -> Vec<(PathBuf, String)> {
        self.recorded().artifacts.clone()
    }

    pub fn batches(&self) -> usize {
        self.recorded().batches
    }
}

impl Tracker for RecordingTracker {
    fn log_param(&self, key: &str, value: &str) -> digits_tracking::Result<()> {
        self.recorded().params.push(Param::new(key, value));
        Ok(())
    }

    fn log_metric(&self, key: &str, value: f64, step: i64) -> digits_tracking::Result<()> {
        self.recorded().metrics.push(Metric {
            key: key.to_string(),
            value,
            timestamp: 0,
            step,
        });
        Ok(())
    }

    fn log_batch(
        &self,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> digits_tracking::Result<()> {
        let mut recorded = self.recorded();
        recorded.batches += 1;
        if self.failing_batch.is_some_and(|n| recorded.batches >= n) {
            return Err(TrackingError::Server {
                endpoint: "runs/log-batch".to_string(),
                status: 503,
                error_code: "TEMPORARILY_UNAVAILABLE".to_string(),
                message: format!("batch {} rejected", recorded.batches),
            });
        }
        recorded.metrics.extend_from_slice(metrics);
        recorded.params.extend_from_slice(params);
        recorded.tags.extend_from_slice(tags);
        Ok(())
    }

    fn set_tag(&self, key: &str, value: &str) -> digits_tracking::Result<()> {
        self.recorded().tags.push(RunTag::new(key, value));
        Ok(())
    }

    fn log_artifacts(&self, local_dir: &Path, artifact_path: &str) -> digits_tracking::Result<()> {
        assert!(local_dir.is_dir(), "{} is not a directory", local_dir.display());
        self.recorded()
            .artifacts
            .push((local_dir.to_path_buf(), artifact_path.to_string()));
        Ok(())
    }

    fn artifact_uri(&self, artifact_path: &str) -> String {
        format!("mlflow-artifacts:/0/r1/artifacts/{artifact_path}")
    }
}
