use std::path::Path;

use chrono::Utc;
use scopeguard::ScopeGuard;
use tracing::{error, info};

use crate::{
    api::{ExperimentId, Metric, Param, RunId, RunInfo, RunStatus, RunTag},
    artifacts::{self, ArtifactStore},
    client::MlflowClient,
    error::Result,
};

pub const TAG_SOURCE_NAME: &str = "mlflow.source.name";
pub const TAG_SOURCE_TYPE: &str = "mlflow.source.type";
pub const TAG_USER: &str = "mlflow.user";

pub trait Tracker {
    fn log_param(&self, key: &str, value: &str) -> Result<()>;
    fn log_metric(&self, key: &str, value: f64, step: i64) -> Result<()>;
    fn log_batch(&self, metrics: &[Metric], params: &[Param], tags: &[RunTag]) -> Result<()>;
    fn set_tag(&self, key: &str, value: &str) -> Result<()>;
    fn log_artifacts(&self, local_dir: &Path, artifact_path: &str) -> Result<()>;
    fn artifact_uri(&self, artifact_path: &str) -> String;
}

pub struct ActiveRun {
    client: MlflowClient,
    info: RunInfo,
    store: Box<dyn ArtifactStore>,
}

impl ActiveRun {
    pub fn start(
        client: MlflowClient,
        experiment_id: &ExperimentId,
        run_name: Option<&str>,
        tags: &[RunTag],
    ) -> Result<Self> {
        let info = client.create_run(experiment_id, run_name, tags)?;
        let store = artifacts::store_for(&client, &info.artifact_uri)?;
        info!(run_id = %info.run_id, artifact_uri = %info.artifact_uri, "started run");
        Ok(Self {
            client,
            info,
            store,
        })
    }

    #[inline]
    pub fn run_id(&self) -> &RunId {
        &self.info.run_id
    }

    #[inline]
    pub fn experiment_id(&self) -> &ExperimentId {
        &self.info.experiment_id
    }

    pub fn end(self, status: RunStatus) -> Result<()> {
        self.client.update_run(&self.info.run_id, status)?;
        info!(run_id = %self.info.run_id, ?status, "ended run");
        Ok(())
    }

    // Until `finish` is called, dropping the guard ends the run as failed.
    pub fn fail_on_drop(self) -> RunGuard {
        scopeguard::guard(self, end_failed as fn(ActiveRun))
    }

    pub fn finish(guard: RunGuard) -> Result<()> {
        ScopeGuard::into_inner(guard).end(RunStatus::Finished)
    }
}

pub type RunGuard = ScopeGuard<ActiveRun, fn(ActiveRun)>;

fn end_failed(run: ActiveRun) {
    let run_id = run.run_id().clone();
    if let Err(err) = run.end(RunStatus::Failed) {
        error!(%run_id, error = %err, "cannot mark run as failed");
    }
}

impl Tracker for ActiveRun {
    fn log_param(&self, key: &str, value: &str) -> Result<()> {
        self.client.log_param(&self.info.run_id, key, value)
    }

    fn log_metric(&self, key: &str, value: f64, step: i64) -> Result<()> {
        let metric = Metric {
            key: key.to_string(),
            value,
            timestamp: Utc::now().timestamp_millis(),
            step,
        };
        self.client.log_metric(&self.info.run_id, &metric)
    }

    fn log_batch(&self, metrics: &[Metric], params: &[Param], tags: &[RunTag]) -> Result<()> {
        self.client.log_batch(&self.info.run_id, metrics, params, tags)
    }

    fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.client.set_tag(&self.info.run_id, key, value)
    }

    fn log_artifacts(&self, local_dir: &Path, artifact_path: &str) -> Result<()> {
        self.store.log_artifacts(local_dir, artifact_path)?;
        info!(artifact_path, "logged artifacts");
        Ok(())
    }

    fn artifact_uri(&self, artifact_path: &str) -> String {
        let root = self.info.artifact_uri.trim_end_matches('/');
        match artifacts::join_artifact_path(&[artifact_path]) {
            path if path.is_empty() => root.to_string(),
            path => format!("{root}/{path}"),
        }
    }
}

pub fn source_tags(source_name: &str) -> Vec<RunTag> {
    let mut tags = vec![
        RunTag::new(TAG_SOURCE_NAME, source_name),
        RunTag::new(TAG_SOURCE_TYPE, "LOCAL"),
    ];
    if let Ok(user) = std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
        tags.push(RunTag::new(TAG_USER, user));
    }
    tags
}
