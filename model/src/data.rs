use itertools::multiunzip;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
    prelude::*,
    tensor::ElementConversion,
};

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;
pub const PIXELS: usize = IMAGE_ROWS * IMAGE_COLS;
pub const NUM_CLASSES: usize = 10;
pub const MAX_PIXEL: f32 = 255.0;

#[derive(Clone)]
pub struct MnistBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// `[batch, 1, 28, 28]`, channels first.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<MnistItem, MnistBatch<B>> for MnistBatcher<B> {
    fn batch(&self, items: Vec<MnistItem>) -> MnistBatch<B> {
        let to_tensors = |item: &MnistItem| {
            let image = Tensor::<B, 2>::from_data(
                TensorData::from(item.image).convert::<B::FloatElem>(),
                &self.device,
            )
            .reshape([1, 1, IMAGE_ROWS, IMAGE_COLS])
            .div_scalar(MAX_PIXEL);
            let target = Tensor::<B, 1, Int>::from_data(
                TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                &self.device,
            );
            (image, target)
        };

        let (images, targets): (Vec<_>, Vec<_>) = multiunzip(items.iter().map(to_tensors));

        let images = Tensor::cat(images, 0).to_device(&self.device);
        let targets = Tensor::cat(targets, 0).to_device(&self.device);

        MnistBatch { images, targets }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type B = NdArray<f32>;

    pub(crate) fn item(fill: f32, label: u8) -> MnistItem {
        let mut image = [[0.0; IMAGE_COLS]; IMAGE_ROWS];
        image[0][0] = fill;
        image[27][27] = MAX_PIXEL;
        MnistItem { image, label }
    }

    #[test]
    fn test_batch_shapes_and_scaling() {
        let batcher = MnistBatcher::<B>::new(NdArrayDevice::Cpu);
        let batch = batcher.batch(vec![item(51.0, 3), item(0.0, 7)]);

        assert_eq!(batch.images.dims(), [2, 1, IMAGE_ROWS, IMAGE_COLS]);
        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!((pixels[0] - 0.2).abs() < 1e-6);
        assert_eq!(pixels[PIXELS - 1], 1.0);
        assert_eq!(pixels[PIXELS], 0.0);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![3, 7]);
    }
}
