use std::{
    collections::{BTreeMap, HashMap},
    sync::mpsc::{Receiver, Sender, channel},
};

use burn::train::{
    logger::MetricLogger,
    metric::{MetricEntry, NumericEntry},
};
use tracing::{info, warn};

pub const LOSS: &str = "Loss";
pub const ACCURACY: &str = "Accuracy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Valid,
}

impl Split {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Train => "training",
            Self::Valid => "validation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub split: Split,
    /// 1-based, as counted by the learner.
    pub epoch: usize,
    pub metrics: BTreeMap<String, f64>,
}

impl EpochSummary {
    #[inline]
    pub fn step(&self) -> i64 {
        self.epoch.saturating_sub(1) as i64
    }

    pub fn tracking_entries(&self) -> Vec<(String, f64)> {
        self.metrics
            .iter()
            .map(|(name, value)| (tracking_key(self.split, name), tracking_value(name, *value)))
            .collect()
    }
}

pub fn tracking_key(split: Split, name: &str) -> String {
    format!(
        "{}_{}",
        split.prefix(),
        name.trim().to_lowercase().replace(' ', "_")
    )
}

// Burn reports accuracy in percent.
fn tracking_value(name: &str, value: f64) -> f64 {
    if name == ACCURACY { value / 100.0 } else { value }
}

#[derive(Debug, Default, Clone, Copy)]
struct Running {
    sum: f64,
    weight: f64,
}

pub struct EpochLogger {
    split: Split,
    current: BTreeMap<String, Running>,
    completed: HashMap<(String, usize), f64>,
    sender: Sender<EpochSummary>,
}

impl EpochLogger {
    pub fn new(split: Split, sender: Sender<EpochSummary>) -> Self {
        Self {
            split,
            current: BTreeMap::new(),
            completed: HashMap::new(),
            sender,
        }
    }
}

pub fn epoch_loggers() -> (EpochLogger, EpochLogger, Receiver<EpochSummary>) {
    let (sender, receiver) = channel();
    (
        EpochLogger::new(Split::Train, sender.clone()),
        EpochLogger::new(Split::Valid, sender),
        receiver,
    )
}

impl MetricLogger for EpochLogger {
    fn log(&mut self, item: &MetricEntry) {
        let Some((value, weight)) = parse_numeric(&item.serialize) else {
            return;
        };
        // REST bodies are JSON, which has no NaN or infinity.
        if !value.is_finite() {
            warn!(split = self.split.prefix(), metric = %item.name, value, "dropping non-finite metric value");
            return;
        }
        let running = self.current.entry(item.name.clone()).or_default();
        running.sum += value * weight;
        running.weight += weight;
    }

    fn end_epoch(&mut self, epoch: usize) {
        let metrics = std::mem::take(&mut self.current)
            .into_iter()
            .filter(|(_, running)| running.weight > 0.0)
            .map(|(name, running)| (name, running.sum / running.weight))
            .collect::<BTreeMap<_, _>>();
        for (name, value) in &metrics {
            self.completed.insert((name.clone(), epoch), *value);
        }

        let summary = EpochSummary {
            split: self.split,
            epoch,
            metrics,
        };
        info!(split = self.split.prefix(), epoch, metrics = ?summary.metrics, "logs");
        // The receiver outlives training; a closed channel only means nobody listens.
        let _ = self.sender.send(summary);
    }

    fn read_numeric(&mut self, name: &str, epoch: usize) -> Result<Vec<NumericEntry>, String> {
        self.completed
            .get(&(name.to_string(), epoch))
            .map(|value| vec![NumericEntry::Value(*value)])
            .ok_or_else(|| format!("no `{name}` value for epoch {epoch}"))
    }
}

fn parse_numeric(serialized: &str) -> Option<(f64, f64)> {
    let mut parts = serialized.split(',');
    let value = parts.next()?.trim().parse::<f64>().ok()?;
    let weight = match parts.next() {
        Some(count) => count.trim().parse::<f64>().ok()?,
        None => 1.0,
    };
    Some((value, weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, serialize: &str) -> MetricEntry {
        MetricEntry::new(name.to_string(), serialize.to_string(), serialize.to_string())
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("0.5"), Some((0.5, 1.0)));
        assert_eq!(parse_numeric("0.25,128"), Some((0.25, 128.0)));
        assert_eq!(parse_numeric("epoch 1"), None);
        assert!(parse_numeric("NaN,3").unwrap().0.is_nan());
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let (mut train, _valid, receiver) = epoch_loggers();
        train.log(&entry(LOSS, "NaN,32"));
        train.log(&entry(LOSS, "inf,32"));
        train.log(&entry(ACCURACY, "50,32"));
        train.end_epoch(1);

        let summary = receiver.try_recv().unwrap();
        assert!(!summary.metrics.contains_key(LOSS));
        assert_eq!(summary.metrics[ACCURACY], 50.0);
    }

    #[test]
    fn test_epoch_weighted_mean() {
        let (mut train, _valid, receiver) = epoch_loggers();
        train.log(&entry(LOSS, "1.0,100"));
        train.log(&entry(LOSS, "0.5,300"));
        train.log(&entry(ACCURACY, "90,100"));
        train.log(&entry(ACCURACY, "100,300"));
        train.end_epoch(1);

        let summary = receiver.try_recv().unwrap();
        assert_eq!(summary.split, Split::Train);
        assert_eq!(summary.step(), 0);
        assert_eq!(summary.metrics[LOSS], 0.625);
        assert_eq!(summary.metrics[ACCURACY], 97.5);
        assert_eq!(
            summary.tracking_entries(),
            vec![
                ("training_accuracy".to_string(), 0.975),
                ("training_loss".to_string(), 0.625),
            ]
        );

        assert_eq!(train.read_numeric(LOSS, 1).unwrap().len(), 1);
        assert!(train.read_numeric(LOSS, 2).is_err());
    }

    #[test]
    fn test_epochs_do_not_mix() {
        let (_train, mut valid, receiver) = epoch_loggers();
        valid.log(&entry(LOSS, "2.0,10"));
        valid.end_epoch(1);
        valid.log(&entry(LOSS, "1.0,10"));
        valid.end_epoch(2);

        let summaries = receiver.try_iter().collect::<Vec<_>>();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].epoch, 2);
        assert_eq!(summaries[1].metrics[LOSS], 1.0);
        assert_eq!(
            summaries[0].tracking_entries(),
            vec![("validation_loss".to_string(), 2.0)]
        );
    }

    #[test]
    fn test_tracking_key() {
        assert_eq!(tracking_key(Split::Valid, "Top-5 Accuracy"), "validation_top-5_accuracy");
    }
}
