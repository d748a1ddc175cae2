use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use burn::{prelude::*, record::CompactRecorder};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    data::{IMAGE_COLS, IMAGE_ROWS},
    error::PackageError,
    model::{Cnn, CnnConfig},
};

pub const MODEL_ARTIFACT: &str = "burn-model";
pub const ADAPTER_ARTIFACT: &str = "burn-pyfunc";
pub const MLMODEL_FILE: &str = "MLmodel";
pub const DATA_DIR: &str = "data";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const CONFIG_FILE: &str = "config.json";
/// The recorder appends its own extension to this stem.
pub const WEIGHTS_STEM: &str = "model";
pub const WEIGHTS_FILE: &str = "model.mpk";
pub const BURN_VERSION: &str = "0.16";
pub const LOADER: &str = "digits_model::predictor::CnnPredictor";
pub const LOG_MODEL_HISTORY_TAG: &str = "mlflow.log-model.history";

pub const FLAVOR_BURN: &str = "burn";
pub const FLAVOR_RUST_FUNCTION: &str = "rust_function";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MlModel {
    pub artifact_path: String,
    pub run_id: String,
    pub utc_time_created: String,
    pub model_uuid: String,
    pub flavors: Flavors,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Flavors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burn: Option<BurnFlavor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rust_function: Option<RustFunctionFlavor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BurnFlavor {
    pub burn_version: String,
    pub data: String,
    pub weights: String,
    pub config: String,
    pub sha256: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RustFunctionFlavor {
    pub loader: String,
    pub artifacts: BTreeMap<String, ArtifactRef>,
    pub input_shape: Vec<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArtifactRef {
    pub uri: String,
    pub path: String,
}

impl MlModel {
    pub fn new(artifact_path: &str, run_id: &str, flavors: Flavors) -> Self {
        Self {
            artifact_path: artifact_path.to_string(),
            run_id: run_id.to_string(),
            utc_time_created: Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            model_uuid: Uuid::new_v4().simple().to_string(),
            flavors,
        }
    }

    pub fn load(dir: &Path) -> Result<Self, PackageError> {
        let path = dir.join(MLMODEL_FILE);
        let text = fs::read_to_string(&path).map_err(|e| PackageError::io(&path, e))?;
        serde_json::from_str(&text).map_err(|source| PackageError::Descriptor { path, source })
    }

    pub fn write(&self, dir: &Path) -> Result<(), PackageError> {
        let path = dir.join(MLMODEL_FILE);
        let text = serde_json::to_string_pretty(self).map_err(|source| PackageError::Descriptor {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(|e| PackageError::io(&path, e))
    }
}

pub fn save_model<B: Backend>(
    model: &Cnn<B>,
    config: &CnnConfig,
    dir: &Path,
    run_id: &str,
) -> Result<MlModel, PackageError> {
    let data = dir.join(DATA_DIR);
    fs::create_dir_all(&data).map_err(|e| PackageError::io(&data, e))?;

    model
        .clone()
        .save_file(data.join(WEIGHTS_STEM), &CompactRecorder::new())
        .map_err(|e| PackageError::Record(format!("{e:?}")))?;
    let config_path = data.join(CONFIG_FILE);
    config
        .save(&config_path)
        .map_err(|e| PackageError::io(&config_path, e))?;

    let flavor = BurnFlavor {
        burn_version: BURN_VERSION.to_string(),
        data: DATA_DIR.to_string(),
        weights: WEIGHTS_FILE.to_string(),
        config: CONFIG_FILE.to_string(),
        sha256: sha256_file(&data.join(WEIGHTS_FILE))?,
    };
    let descriptor = MlModel::new(
        MODEL_ARTIFACT,
        run_id,
        Flavors {
            burn: Some(flavor),
            rust_function: None,
        },
    );
    descriptor.write(dir)?;
    Ok(descriptor)
}

pub fn save_adapter(
    model_dir: &Path,
    model_uri: &str,
    dir: &Path,
    run_id: &str,
) -> Result<MlModel, PackageError> {
    let rel = format!("{ARTIFACTS_DIR}/{MODEL_ARTIFACT}");
    copy_dir(model_dir, &dir.join(ARTIFACTS_DIR).join(MODEL_ARTIFACT))?;

    let artifacts = BTreeMap::from([(
        MODEL_ARTIFACT.to_string(),
        ArtifactRef {
            uri: model_uri.to_string(),
            path: rel,
        },
    )]);
    let descriptor = MlModel::new(
        ADAPTER_ARTIFACT,
        run_id,
        Flavors {
            burn: None,
            rust_function: Some(RustFunctionFlavor {
                loader: LOADER.to_string(),
                artifacts,
                input_shape: vec![-1, 1, IMAGE_ROWS as i64, IMAGE_COLS as i64],
            }),
        },
    );
    descriptor.write(dir)?;
    Ok(descriptor)
}

pub fn model_history(descriptors: &[MlModel]) -> serde_json::Result<String> {
    serde_json::to_string(descriptors)
}

pub fn sha256_file(path: &Path) -> Result<String, PackageError> {
    let bytes = fs::read(path).map_err(|e| PackageError::io(path, e))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn copy_dir(src: &Path, dst: &Path) -> Result<(), PackageError> {
    fs::create_dir_all(dst).map_err(|e| PackageError::io(dst, e))?;
    let entries = fs::read_dir(src).map_err(|e| PackageError::io(src, e))?;
    for entry in entries {
        let path: PathBuf = entry.map_err(|e| PackageError::io(src, e))?.path();
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = dst.join(name);
        if path.is_dir() {
            copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target).map_err(|e| PackageError::io(&path, e))?;
        }
    }
    Ok(())
}
