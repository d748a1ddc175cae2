use derive_more::{Display, From};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl ExperimentId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RunId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

impl RunTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Experiment {
    pub experiment_id: ExperimentId,
    pub name: String,
    #[serde(default)]
    pub artifact_location: String,
    #[serde(default)]
    pub lifecycle_stage: String,
}

impl Experiment {
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.lifecycle_stage == "deleted"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub experiment_id: ExperimentId,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub artifact_uri: String,
}

// int64 fields may arrive either as JSON numbers or as strings.
fn lenient_i64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(de)? {
        None => Ok(None),
        Some(Raw::Num(v)) => Ok(Some(v)),
        Some(Raw::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Serialize)]
pub(crate) struct CreateExperiment<'a> {
    pub name: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct CreateExperimentResponse {
    pub experiment_id: ExperimentId,
}

#[derive(Deserialize)]
pub(crate) struct GetExperimentResponse {
    pub experiment: Experiment,
}

#[derive(Serialize)]
pub(crate) struct CreateRun<'a> {
    pub experiment_id: &'a ExperimentId,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_name: Option<&'a str>,
    pub tags: &'a [RunTag],
}

#[derive(Deserialize)]
pub(crate) struct CreateRunResponse {
    pub run: RunEnvelope,
}

#[derive(Deserialize)]
pub(crate) struct RunEnvelope {
    pub info: RunInfo,
}

#[derive(Serialize)]
pub(crate) struct LogParam<'a> {
    pub run_id: &'a RunId,
    pub key: &'a str,
    pub value: &'a str,
}

#[derive(Serialize)]
pub(crate) struct LogMetric<'a> {
    pub run_id: &'a RunId,
    #[serde(flatten)]
    pub metric: &'a Metric,
}

#[derive(Serialize)]
pub(crate) struct LogBatch<'a> {
    pub run_id: &'a RunId,
    pub metrics: &'a [Metric],
    pub params: &'a [Param],
    pub tags: &'a [RunTag],
}

#[derive(Serialize)]
pub(crate) struct SetTag<'a> {
    pub run_id: &'a RunId,
    pub key: &'a str,
    pub value: &'a str,
}

#[derive(Serialize)]
pub(crate) struct UpdateRun<'a> {
    pub run_id: &'a RunId,
    pub status: RunStatus,
    pub end_time: i64,
}

#[derive(Deserialize)]
pub(crate) struct Empty {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_metric_body() {
        let run_id = RunId::new("abc");
        let metric = Metric {
            key: "training_loss".into(),
            value: 0.5,
            timestamp: 1700000000000,
            step: 3,
        };
        let body = serde_json::to_value(LogMetric {
            run_id: &run_id,
            metric: &metric,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "run_id": "abc",
                "key": "training_loss",
                "value": 0.5,
                "timestamp": 1700000000000_i64,
                "step": 3,
            })
        );
    }

    #[test]
    fn test_update_run_status() {
        let run_id = RunId::new("abc");
        let body = serde_json::to_value(UpdateRun {
            run_id: &run_id,
            status: RunStatus::Failed,
            end_time: 5,
        })
        .unwrap();
        assert_eq!(body["status"], "FAILED");
    }

    #[test]
    fn test_run_info_string_timestamps() {
        let resp: CreateRunResponse = serde_json::from_value(json!({
            "run": {
                "info": {
                    "run_id": "r1",
                    "run_uuid": "r1",
                    "experiment_id": "7",
                    "status": "RUNNING",
                    "start_time": "1700000000000",
                    "artifact_uri": "mlflow-artifacts:/7/r1/artifacts",
                    "lifecycle_stage": "active"
                },
                "data": {}
            }
        }))
        .unwrap();
        let info = resp.run.info;
        assert_eq!(info.run_id.as_str(), "r1");
        assert_eq!(info.experiment_id, ExperimentId::new("7"));
        assert_eq!(info.status, Some(RunStatus::Running));
        assert_eq!(info.start_time, Some(1700000000000));
    }

    #[test]
    fn test_deleted_experiment() {
        let resp: GetExperimentResponse = serde_json::from_value(json!({
            "experiment": {
                "experiment_id": "3",
                "name": "Burn MNIST",
                "lifecycle_stage": "deleted"
            }
        }))
        .unwrap();
        assert!(resp.experiment.is_deleted());
        assert_eq!(resp.experiment.artifact_location, "");
    }
}
