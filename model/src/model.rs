use burn::{
    nn::{
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::data::{IMAGE_ROWS, MnistBatch, NUM_CLASSES};

pub const KERNEL_SIZE: usize = 3;
pub const POOL_SIZE: usize = 2;

const fn conv_pool_side(side: usize) -> usize {
    (side - KERNEL_SIZE + 1) / POOL_SIZE
}

#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    dropout: Dropout,
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct CnnConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 64)]
    pub conv_channels: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = 0.25)]
    pub dropout: f64,
}

impl CnnConfig {
    pub fn flattened_size(&self) -> usize {
        let side = conv_pool_side(conv_pool_side(IMAGE_ROWS));
        self.conv_channels * side * side
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Cnn<B> {
        let pool = MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE]).with_strides([POOL_SIZE, POOL_SIZE]);
        Cnn {
            conv1: Conv2dConfig::new([1, self.conv_channels], [KERNEL_SIZE, KERNEL_SIZE])
                .init(device),
            pool1: pool.init(),
            conv2: Conv2dConfig::new(
                [self.conv_channels, self.conv_channels],
                [KERNEL_SIZE, KERNEL_SIZE],
            )
            .init(device),
            pool2: pool.init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            hidden: LinearConfig::new(self.flattened_size(), self.hidden_size).init(device),
            output: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Cnn<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.pool1.forward(self.activation.forward(x));
        let x = self.conv2.forward(x);
        let x = self.pool2.forward(self.activation.forward(x));
        let x = self.dropout.forward(x);

        let x = x.flatten::<2>(1, 3);
        let x = self.activation.forward(self.hidden.forward(x));
        self.output.forward(x)
    }

    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<MnistBatch<B>, ClassificationOutput<B>> for Cnn<B> {
    fn step(&self, batch: MnistBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B>, ClassificationOutput<B>> for Cnn<B> {
    fn step(&self, batch: MnistBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}
