use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use burn::{prelude::*, record::CompactRecorder};
use burn_ndarray::{NdArray, NdArrayDevice};
use serde::{Deserialize, Serialize};

use crate::{
    data::{IMAGE_COLS, IMAGE_ROWS, NUM_CLASSES, PIXELS},
    error::PackageError,
    model::{Cnn, CnnConfig},
    package::{FLAVOR_BURN, FLAVOR_RUST_FUNCTION, MODEL_ARTIFACT, MlModel, sha256_file},
};

type InferenceBackend = NdArray<f32>;

#[derive(Debug, Clone, Default)]
pub struct PredictorContext {
    pub artifacts: BTreeMap<String, PathBuf>,
}

impl PredictorContext {
    pub fn from_package(dir: &Path) -> Result<Self, PackageError> {
        let descriptor = MlModel::load(dir)?;
        let flavor = descriptor
            .flavors
            .rust_function
            .ok_or(PackageError::MissingFlavor(FLAVOR_RUST_FUNCTION))?;
        let artifacts = flavor
            .artifacts
            .into_iter()
            .map(|(name, artifact)| (name, dir.join(artifact.path)))
            .collect();
        Ok(Self { artifacts })
    }

    pub fn artifact(&self, name: &str) -> Result<&Path, PackageError> {
        self.artifacts
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| PackageError::MissingArtifact(name.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputFrame {
    Split {
        #[serde(default)]
        columns: Vec<String>,
        data: Vec<Vec<f32>>,
    },
    Rows(Vec<Vec<f32>>),
}

impl InputFrame {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Self {
        Self::Rows(rows)
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        match self {
            Self::Split { data, .. } => data,
            Self::Rows(rows) => rows,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Predictions {
    pub probabilities: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class: usize,
    pub probabilities: Vec<f32>,
}

impl Predictions {
    pub fn classes(&self) -> Vec<usize> {
        self.probabilities
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map_or(0, |(class, _)| class)
            })
            .collect()
    }

    pub fn report(&self) -> Vec<Prediction> {
        self.classes()
            .into_iter()
            .zip(&self.probabilities)
            .map(|(class, probabilities)| Prediction {
                class,
                probabilities: probabilities.clone(),
            })
            .collect()
    }
}

pub trait Predictor: Sized {
    fn load_context(context: &PredictorContext) -> Result<Self, PackageError>;
    fn predict(&self, input: &InputFrame) -> Result<Predictions, PackageError>;
}

pub struct CnnPredictor {
    model: Cnn<InferenceBackend>,
    device: NdArrayDevice,
}

impl CnnPredictor {
    pub fn from_model_dir(dir: &Path) -> Result<Self, PackageError> {
        let descriptor = MlModel::load(dir)?;
        let flavor = descriptor
            .flavors
            .burn
            .ok_or(PackageError::MissingFlavor(FLAVOR_BURN))?;
        let data = dir.join(&flavor.data);
        let weights = data.join(&flavor.weights);

        let actual = sha256_file(&weights)?;
        if actual != flavor.sha256 {
            return Err(PackageError::DigestMismatch {
                expected: flavor.sha256,
                actual,
            });
        }

        let config = CnnConfig::load(data.join(&flavor.config))
            .map_err(|e| PackageError::Config(format!("{e:?}")))?;
        let device = NdArrayDevice::Cpu;
        let model = config
            .init::<InferenceBackend>(&device)
            .load_file(weights, &CompactRecorder::new(), &device)
            .map_err(|e| PackageError::Record(format!("{e:?}")))?;
        Ok(Self { model, device })
    }
}

impl Predictor for CnnPredictor {
    fn load_context(context: &PredictorContext) -> Result<Self, PackageError> {
        Self::from_model_dir(context.artifact(MODEL_ARTIFACT)?)
    }

    fn predict(&self, input: &InputFrame) -> Result<Predictions, PackageError> {
        let rows = input.rows();
        if let Some((row, values)) = rows.iter().enumerate().find(|(_, r)| r.len() != PIXELS) {
            return Err(PackageError::RowWidth {
                row,
                width: values.len(),
                expected: PIXELS,
            });
        }
        if rows.is_empty() {
            return Ok(Predictions::default());
        }

        let flat = rows.iter().flatten().copied().collect::<Vec<f32>>();
        let images = Tensor::<InferenceBackend, 4>::from_data(
            TensorData::new(flat, [rows.len(), 1, IMAGE_ROWS, IMAGE_COLS]),
            &self.device,
        );
        let probabilities = self
            .model
            .probabilities(images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PackageError::Tensor(format!("{e:?}")))?;

        Ok(Predictions {
            probabilities: probabilities
                .chunks(NUM_CLASSES)
                .map(<[f32]>::to_vec)
                .collect(),
        })
    }
}
