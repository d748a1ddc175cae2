use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::prelude::*;
use tracing::info;

use digits_model::{
    model::{Cnn, CnnConfig},
    package::{self, ADAPTER_ARTIFACT, LOG_MODEL_HISTORY_TAG, MODEL_ARTIFACT},
};
use digits_tracking::Tracker;

pub fn publish_model<B: Backend>(
    tracker: &dyn Tracker,
    run_id: &str,
    model: &Cnn<B>,
    config: &CnnConfig,
    staging: &Path,
) -> Result<()> {
    let model_dir = fresh_dir(&staging.join(MODEL_ARTIFACT))?;
    let adapter_dir = fresh_dir(&staging.join(ADAPTER_ARTIFACT))?;

    let model_descriptor =
        package::save_model(model, config, &model_dir, run_id).context("saving model")?;
    tracker
        .log_artifacts(&model_dir, MODEL_ARTIFACT)
        .context("uploading model")?;

    let model_uri = tracker.artifact_uri(MODEL_ARTIFACT);
    let adapter_descriptor = package::save_adapter(&model_dir, &model_uri, &adapter_dir, run_id)
        .context("packaging prediction adapter")?;
    tracker
        .log_artifacts(&adapter_dir, ADAPTER_ARTIFACT)
        .context("uploading prediction adapter")?;

    let history = package::model_history(&[model_descriptor, adapter_descriptor])?;
    tracker
        .set_tag(LOG_MODEL_HISTORY_TAG, &history)
        .context("tagging logged models")?;
    info!(model = %model_uri, adapter = %tracker.artifact_uri(ADAPTER_ARTIFACT), "published model");
    Ok(())
}

fn fresh_dir(dir: &Path) -> Result<PathBuf> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("clearing {}", dir.display()))?;
    }
    Ok(dir.to_path_buf())
}
