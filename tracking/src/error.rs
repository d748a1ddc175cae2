use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("unsupported tracking uri `{0}`, expected http(s)")]
    UnsupportedTrackingUri(String),
    #[error("unsupported artifact uri `{0}`")]
    UnsupportedArtifactUri(String),
    #[error("request to `{endpoint}` failed")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("`{endpoint}` returned {status}: {error_code}: {message}")]
    Server {
        endpoint: String,
        status: u16,
        error_code: String,
        message: String,
    },
    #[error("cannot decode response of `{endpoint}`")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("experiment `{0}` is deleted")]
    DeletedExperiment(String),
    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = TrackingError> = std::result::Result<T, E>;

pub const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
pub const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";

impl TrackingError {
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Server { error_code, .. } => Some(error_code),
            _ => None,
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        self.error_code() == Some(RESOURCE_DOES_NOT_EXIST)
    }

    #[inline]
    pub fn is_already_exists(&self) -> bool {
        self.error_code() == Some(RESOURCE_ALREADY_EXISTS)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn from_response(endpoint: &str, status: u16, body: &str) -> Self {
        let (error_code, message) = match serde_json::from_str::<ErrorBody>(body) {
            Ok(err) => (err.error_code, err.message),
            Err(_) => (String::from("UNKNOWN"), body.trim().to_string()),
        };
        Self::Server {
            endpoint: endpoint.to_string(),
            status,
            error_code,
            message,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlflow_error_body() {
        let err = TrackingError::from_response(
            "experiments/get-by-name",
            404,
            r#"{"error_code": "RESOURCE_DOES_NOT_EXIST", "message": "Could not find experiment"}"#,
        );
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert_eq!(
            err.to_string(),
            "`experiments/get-by-name` returned 404: RESOURCE_DOES_NOT_EXIST: Could not find experiment"
        );
    }

    #[test]
    fn test_plain_error_body() {
        let err = TrackingError::from_response("runs/create", 502, "Bad Gateway\n");
        assert_eq!(err.error_code(), Some("UNKNOWN"));
        match err {
            TrackingError::Server { message, status, .. } => {
                assert_eq!(message, "Bad Gateway");
                assert_eq!(status, 502);
            }
            _ => panic!("expected server error"),
        }
    }
}
