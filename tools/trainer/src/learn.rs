use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use anyhow::{Context, Result, anyhow};
use burn::{
    data::{
        dataloader::DataLoaderBuilder,
        dataset::{Dataset, vision::MnistDataset},
    },
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{
        LearnerBuilder,
        metric::{AccuracyMetric, LossMetric},
    },
};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use tracing::info;

use digits_model::{
    data::{IMAGE_COLS, IMAGE_ROWS, MnistBatcher},
    evaluate::evaluate,
    metrics::epoch_loggers,
    model::CnnConfig,
};
use digits_tracking::{ActiveRun, MlflowClient, Tracker, run::source_tags};

use crate::{publish::publish_model, report};

/// Train a CNN on MNIST and record the run on an MLflow tracking server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, short = 'b', default_value = "128")]
    pub batch_size: NonZeroUsize,
    #[arg(long, short = 'e', default_value = "4")]
    pub epochs: NonZeroUsize,
    #[arg(
        long,
        short = 't',
        env = "MLFLOW_TRACKING_URI",
        default_value = "http://localhost:7000"
    )]
    pub tracking_uri: String,
    #[arg(long, env = "MLFLOW_TRACKING_TOKEN", hide_env_values = true)]
    pub tracking_token: Option<String>,
    #[arg(long, default_value = "Burn MNIST")]
    pub experiment: String,
    /// Local directory for learner state and staged artifacts.
    #[arg(long, default_value = "/tmp/digits-trainer")]
    pub artifact_dir: PathBuf,
    #[arg(long, default_value_t = 1.0e-3)]
    pub learning_rate: f64,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
}

#[derive(Config)]
pub struct TrainingConfig {
    pub model: CnnConfig,
    pub optimizer: AdamConfig,
    #[config(default = 4)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
}

impl TrainingConfig {
    pub fn from_args(args: &Args) -> Self {
        Self::new(CnnConfig::new(), AdamConfig::new())
            .with_num_epochs(args.epochs.get())
            .with_batch_size(args.batch_size.get())
            .with_num_workers(args.num_workers)
            .with_seed(args.seed)
            .with_learning_rate(args.learning_rate)
    }
}

pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    artifact_dir: &Path,
    tracker: &(dyn Tracker + Sync),
    run_id: &str,
    device: B::Device,
) -> Result<()> {
    fs::create_dir_all(artifact_dir)
        .with_context(|| format!("creating {}", artifact_dir.display()))?;
    let learner_dir = artifact_dir
        .to_str()
        .context("artifact directory is not valid UTF-8")?;
    config
        .save(artifact_dir.join("config.json"))
        .context("saving training config")?;
    B::seed(config.seed);

    let train_dataset = MnistDataset::train();
    let test_dataset = MnistDataset::test();
    let (train_samples, test_samples) = (train_dataset.len(), test_dataset.len());
    info!(shape = ?[train_samples, 1, IMAGE_ROWS, IMAGE_COLS], "x_train shape");
    info!("{} train samples", train_samples);
    info!("{} test samples", test_samples);

    report::log_params(
        tracker,
        &report::training_params(config, train_samples, test_samples),
    )?;

    let (train_logger, valid_logger, epochs) = epoch_loggers();

    let dataloader_train = DataLoaderBuilder::new(MnistBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_dataset);

    let dataloader_test =
        DataLoaderBuilder::new(MnistBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .build(test_dataset);

    let learner = LearnerBuilder::new(learner_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_loggers(train_logger, valid_logger)
        .with_application_logger(None)
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let training_done = AtomicBool::new(false);
    let (model_trained, forwarded) = thread::scope(|scope| {
        let done = &training_done;
        let forwarder = scope.spawn(move || report::forward_epochs(tracker, epochs, done));
        let model = learner.fit(dataloader_train, dataloader_test.clone());
        done.store(true, Ordering::Release);
        (model, forwarder.join())
    });
    let forwarded = forwarded.map_err(|_| anyhow!("epoch metric forwarder panicked"))??;
    info!(forwarded, "epoch summaries logged");

    let model = model_trained.valid();
    let score = evaluate(&model, dataloader_test.as_ref());
    report::log_evaluation(tracker, &score)?;
    info!("Test loss: {}", score.loss);
    info!("Test accuracy: {}", score.accuracy);

    publish_model(tracker, run_id, &model, &config.model, artifact_dir)
}

pub fn learn_model(args: &Args) -> Result<()> {
    type Backend = NdArray<f32>;
    type AutodiffBackend = Autodiff<Backend>;
    let device = NdArrayDevice::Cpu;

    info!("tracking_uri: {}", args.tracking_uri);
    let client =
        MlflowClient::new(&args.tracking_uri)?.with_token(args.tracking_token.clone());
    let experiment_id = client
        .set_experiment(&args.experiment)
        .with_context(|| format!("setting experiment `{}`", args.experiment))?;
    let run = ActiveRun::start(
        client,
        &experiment_id,
        None,
        &source_tags(env!("CARGO_PKG_NAME")),
    )
    .context("starting run")?;

    let run = run.fail_on_drop();

    let config = TrainingConfig::from_args(args);
    train::<AutodiffBackend>(
        &config,
        &args.artifact_dir,
        &*run,
        run.run_id().as_str(),
        device,
    )?;

    info!("experiment id: {}", run.experiment_id());
    info!("run id: {}", run.run_id());
    ActiveRun::finish(run).context("ending run")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTracker;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["trainer", "-b", "64", "--epochs", "2"]).unwrap();
        assert_eq!(args.batch_size.get(), 64);
        assert_eq!(args.epochs.get(), 2);
        assert_eq!(args.experiment, "Burn MNIST");

        let config = TrainingConfig::from_args(&args);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.num_epochs, 2);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_args_reject_zero_batch() {
        assert!(Args::try_parse_from(["trainer", "-b", "0"]).is_err());
    }

    // Downloads MNIST and trains a full epoch on the CPU.
    #[ignore]
    #[test]
    fn test_train_one_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from(["trainer", "-e", "1"]).unwrap();
        let tracker = RecordingTracker::default();
        train::<Autodiff<NdArray<f32>>>(
            &TrainingConfig::from_args(&args),
            dir.path(),
            &tracker,
            "r1",
            NdArrayDevice::Cpu,
        )
        .unwrap();

        let metrics = tracker.metric_keys();
        for key in [
            "training_loss",
            "training_accuracy",
            "validation_loss",
            "validation_accuracy",
            "test_loss",
            "test_accuracy",
        ] {
            assert!(metrics.iter().any(|k| k == key), "missing {key}");
        }
        let accuracy = tracker.metric("test_accuracy").unwrap();
        assert!(accuracy > 0.9);
        assert_eq!(tracker.param("training samples").as_deref(), Some("60000"));
    }
}
