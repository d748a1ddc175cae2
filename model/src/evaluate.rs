use burn::{data::dataloader::DataLoader, prelude::*, tensor::ElementConversion};

use crate::{data::MnistBatch, model::Cnn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

pub fn evaluate<B: Backend>(model: &Cnn<B>, loader: &dyn DataLoader<MnistBatch<B>>) -> Evaluation {
    let mut loss_sum = 0.0;
    let mut correct = 0;
    let mut samples = 0;

    for batch in loader.iter() {
        let n = batch.targets.dims()[0];
        let output = model.forward_classification(batch.images, batch.targets);
        loss_sum += output.loss.into_scalar().elem::<f64>() * n as f64;

        let predicted = output.output.argmax(1).flatten::<1>(0, 1);
        correct += predicted
            .equal(output.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;
        samples += n;
    }

    if samples == 0 {
        return Evaluation {
            loss: f64::NAN,
            accuracy: 0.0,
            samples,
        };
    }
    Evaluation {
        loss: loss_sum / samples as f64,
        accuracy: correct as f64 / samples as f64,
        samples,
    }
}
