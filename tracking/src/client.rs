use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::{
    api::{
        CreateExperiment, CreateExperimentResponse, CreateRun, CreateRunResponse, Empty,
        Experiment, ExperimentId, GetExperimentResponse, LogBatch, LogMetric, LogParam, Metric,
        Param, RunId, RunInfo, RunStatus, RunTag, SetTag, UpdateRun,
    },
    error::{Result, TrackingError},
};

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub const MAX_BATCH_METRICS: usize = 1000;
pub const MAX_BATCH_PARAMS: usize = 100;
pub const MAX_BATCH_TAGS: usize = 100;

#[derive(Clone, Debug)]
pub struct MlflowClient {
    http: Client,
    base: String,
    token: Option<String>,
}

impl MlflowClient {
    pub fn new(tracking_uri: &str) -> Result<Self> {
        let base = tracking_uri.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(TrackingError::UnsupportedTrackingUri(tracking_uri.to_string()));
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| TrackingError::Http {
                endpoint: base.to_string(),
                source,
            })?;
        Ok(Self {
            http,
            base: base.to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    #[inline]
    pub fn tracking_uri(&self) -> &str {
        &self.base
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base, API_PREFIX, endpoint)
    }

    pub fn artifacts_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base,
            ARTIFACTS_PREFIX,
            path.trim_start_matches('/')
        )
    }

    pub fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        match self.get::<GetExperimentResponse>(
            "experiments/get-by-name",
            &[("experiment_name", name)],
        ) {
            Ok(resp) => Ok(Some(resp.experiment)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn create_experiment(&self, name: &str) -> Result<ExperimentId> {
        let resp: CreateExperimentResponse =
            self.post("experiments/create", &CreateExperiment { name })?;
        Ok(resp.experiment_id)
    }

    pub fn set_experiment(&self, name: &str) -> Result<ExperimentId> {
        if let Some(exp) = self.get_experiment_by_name(name)? {
            if exp.is_deleted() {
                return Err(TrackingError::DeletedExperiment(name.to_string()));
            }
            return Ok(exp.experiment_id);
        }
        match self.create_experiment(name) {
            Ok(id) => {
                info!(experiment = name, id = %id, "created experiment");
                Ok(id)
            }
            // Somebody else created it in the meantime.
            Err(err) if err.is_already_exists() => self
                .get_experiment_by_name(name)?
                .map(|exp| exp.experiment_id)
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    pub fn create_run(
        &self,
        experiment_id: &ExperimentId,
        run_name: Option<&str>,
        tags: &[RunTag],
    ) -> Result<RunInfo> {
        let resp: CreateRunResponse = self.post(
            "runs/create",
            &CreateRun {
                experiment_id,
                start_time: Utc::now().timestamp_millis(),
                run_name,
                tags,
            },
        )?;
        Ok(resp.run.info)
    }

    pub fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Result<()> {
        let _: Empty = self.post("runs/log-parameter", &LogParam { run_id, key, value })?;
        Ok(())
    }

    pub fn log_metric(&self, run_id: &RunId, metric: &Metric) -> Result<()> {
        let _: Empty = self.post("runs/log-metric", &LogMetric { run_id, metric })?;
        Ok(())
    }

    pub fn log_batch(
        &self,
        run_id: &RunId,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        for metrics in metrics.chunks(MAX_BATCH_METRICS) {
            self.post_batch(run_id, metrics, &[], &[])?;
        }
        for params in params.chunks(MAX_BATCH_PARAMS) {
            self.post_batch(run_id, &[], params, &[])?;
        }
        for tags in tags.chunks(MAX_BATCH_TAGS) {
            self.post_batch(run_id, &[], &[], tags)?;
        }
        Ok(())
    }

    fn post_batch(
        &self,
        run_id: &RunId,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        let _: Empty = self.post(
            "runs/log-batch",
            &LogBatch {
                run_id,
                metrics,
                params,
                tags,
            },
        )?;
        Ok(())
    }

    pub fn set_tag(&self, run_id: &RunId, key: &str, value: &str) -> Result<()> {
        let _: Empty = self.post("runs/set-tag", &SetTag { run_id, key, value })?;
        Ok(())
    }

    pub fn update_run(&self, run_id: &RunId, status: RunStatus) -> Result<()> {
        let _: Empty = self.post(
            "runs/update",
            &UpdateRun {
                run_id,
                status,
                end_time: Utc::now().timestamp_millis(),
            },
        )?;
        Ok(())
    }

    pub fn put_bytes(&self, url: &str, body: Vec<u8>) -> Result<()> {
        debug!(url, bytes = body.len(), "uploading artifact");
        let request = self.http.put(url).body(body);
        let _: Empty = self.send(url, request)?;
        Ok(())
    }

    fn post<Q: Serialize + ?Sized, R: DeserializeOwned>(&self, endpoint: &str, body: &Q) -> Result<R> {
        let request = self.http.post(self.endpoint_url(endpoint)).json(body);
        self.send(endpoint, request)
    }

    fn get<R: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<R> {
        let request = self.http.get(self.endpoint_url(endpoint)).query(query);
        self.send(endpoint, request)
    }

    fn send<R: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<R> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let http_err = |source| TrackingError::Http {
            endpoint: endpoint.to_string(),
            source,
        };
        let response = request.send().map_err(http_err)?;
        let status = response.status();
        let text = response.text().map_err(http_err)?;
        if !status.is_success() {
            return Err(TrackingError::from_response(endpoint, status.as_u16(), &text));
        }
        // Some endpoints answer with an empty body.
        let text = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(text).map_err(|source| TrackingError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_uris() {
        for uri in ["file:///tmp/mlruns", "./mlruns", "databricks"] {
            assert!(matches!(
                MlflowClient::new(uri),
                Err(TrackingError::UnsupportedTrackingUri(_))
            ));
        }
    }

    #[test]
    fn test_urls() {
        let client = MlflowClient::new("http://localhost:7000/").unwrap();
        assert_eq!(client.tracking_uri(), "http://localhost:7000");
        assert_eq!(
            client.endpoint_url("runs/log-metric"),
            "http://localhost:7000/api/2.0/mlflow/runs/log-metric"
        );
        assert_eq!(
            client.artifacts_url("/1/abc/artifacts/burn-model/MLmodel"),
            "http://localhost:7000/api/2.0/mlflow-artifacts/artifacts/1/abc/artifacts/burn-model/MLmodel"
        );
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let client = MlflowClient::new("https://mlflow.example.com")
            .unwrap()
            .with_token(Some(String::new()));
        assert!(client.token.is_none());
    }
}
