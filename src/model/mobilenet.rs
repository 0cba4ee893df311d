//! MobileNet v1 Backbone
//!
//! The convolutional body of MobileNet v1 (no pooling or classification
//! head), built with Burn. A stem convolution is followed by 13
//! depthwise-separable blocks; every convolution is followed by BatchNorm
//! and ReLU6. Channel counts are scaled by the width multiplier `alpha`.
//!
//! Layer names follow the usual Keras naming so the truncation point can be
//! configured by name:
//!
//! - `conv1_relu`: output of the stem
//! - `conv_dw_{n}_relu`: depthwise half of block `n` (1..=13)
//! - `conv_pw_{n}_relu`: pointwise half of block `n`, i.e. the block output
//!
//! Stride-2 convolutions pad one row and one column of zeros at the bottom
//! and right only, then convolve without padding, as Keras does. Pretrained
//! Keras weights therefore line up pixel for pixel.

use burn::{
    config::Config,
    module::{Module, Param, RunningState},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

use super::tfjs::KerasWeights;
use crate::utils::error::{self, PokedexError};

/// Channels of the stem convolution at `alpha = 1`
pub const STEM_CHANNELS: usize = 32;

/// (output channels at `alpha = 1`, depthwise stride) for blocks 1..=13
pub const BLOCKS: [(usize, usize); 13] = [
    (64, 1),
    (128, 2),
    (128, 1),
    (256, 2),
    (256, 1),
    (512, 2),
    (512, 1),
    (512, 1),
    (512, 1),
    (512, 1),
    (512, 1),
    (1024, 2),
    (1024, 1),
];

const BN_EPSILON: f64 = 1e-3;

/// A named layer output at which the backbone can be cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPoint {
    Stem,
    Depthwise(usize),
    Pointwise(usize),
}

impl TruncationPoint {
    /// Parse a layer name such as `conv_pw_13_relu`
    pub fn parse(name: &str) -> error::Result<Self> {
        let unknown = || PokedexError::UnknownLayer(name.to_string());

        if name == "conv1_relu" {
            return Ok(Self::Stem);
        }

        let (kind, rest) = if let Some(rest) = name.strip_prefix("conv_dw_") {
            ("dw", rest)
        } else if let Some(rest) = name.strip_prefix("conv_pw_") {
            ("pw", rest)
        } else {
            return Err(unknown());
        };

        let block: usize = rest
            .strip_suffix("_relu")
            .and_then(|n| n.parse().ok())
            .ok_or_else(unknown)?;

        if block == 0 || block > BLOCKS.len() {
            return Err(unknown());
        }

        Ok(match kind {
            "dw" => Self::Depthwise(block),
            _ => Self::Pointwise(block),
        })
    }

    /// The layer name this point corresponds to
    pub fn name(&self) -> String {
        match self {
            Self::Stem => "conv1_relu".to_string(),
            Self::Depthwise(n) => format!("conv_dw_{}_relu", n),
            Self::Pointwise(n) => format!("conv_pw_{}_relu", n),
        }
    }

    /// `[height, width, channels]` produced at this point
    pub fn output_shape(&self, alpha: f64, input_size: usize) -> [usize; 3] {
        let mut size = conv_output_size(input_size, 2);
        let mut channels = scaled(STEM_CHANNELS, alpha);

        let (full_blocks, depthwise_tail) = match *self {
            Self::Stem => (0, None),
            Self::Depthwise(n) => (n - 1, Some(n - 1)),
            Self::Pointwise(n) => (n, None),
        };

        for &(out, stride) in &BLOCKS[..full_blocks] {
            size = conv_output_size(size, stride);
            channels = scaled(out, alpha);
        }

        if let Some(index) = depthwise_tail {
            size = conv_output_size(size, BLOCKS[index].1);
        }

        [size, size, channels]
    }
}

/// Spatial size after a 3x3 convolution
///
/// Stride 1 keeps the size ("same" padding). Stride 2 sees the input padded
/// by one at the bottom/right and halves it, rounding down.
fn conv_output_size(input: usize, stride: usize) -> usize {
    if stride == 1 {
        input
    } else {
        (input + 1).saturating_sub(3) / stride + 1
    }
}

/// Apply the width multiplier to a channel count
fn scaled(channels: usize, alpha: f64) -> usize {
    ((channels as f64 * alpha) as usize).max(1)
}

/// Convolution followed by BatchNorm and ReLU6
#[derive(Module, Debug)]
pub struct ConvBnRelu6<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    /// Zero-pad one row and column at the bottom/right before a valid conv
    pad_bottom_right: bool,
    /// One filter per channel (Keras `depthwise_kernel`)
    depthwise: bool,
}

impl<B: Backend> ConvBnRelu6<B> {
    /// Full 3x3 convolution
    pub fn standard(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(padding_for(stride))
            .with_bias(false)
            .init(device);
        Self::with_conv(conv, out_channels, stride, false, device)
    }

    /// 3x3 depthwise convolution, one filter per channel
    pub fn depthwise(channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([channels, channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(padding_for(stride))
            .with_groups(channels)
            .with_bias(false)
            .init(device);
        Self::with_conv(conv, channels, stride, true, device)
    }

    /// 1x1 pointwise convolution
    pub fn pointwise(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_bias(false)
            .init(device);
        Self::with_conv(conv, out_channels, 1, false, device)
    }

    fn with_conv(
        conv: Conv2d<B>,
        channels: usize,
        stride: usize,
        depthwise: bool,
        device: &B::Device,
    ) -> Self {
        let bn = BatchNormConfig::new(channels)
            .with_epsilon(BN_EPSILON)
            .init(device);
        Self {
            conv,
            bn,
            pad_bottom_right: stride > 1,
            depthwise,
        }
    }

    /// Replace the parameters with the Keras tensors `{conv}/...` and `{bn}/...`
    pub fn load_keras(
        mut self,
        weights: &KerasWeights,
        conv: &str,
        bn: &str,
        device: &B::Device,
    ) -> error::Result<Self> {
        let [out_channels, in_per_group, kh, kw] = self.conv.weight.dims();

        // Keras kernels are [kh, kw, in, out]; burn wants [out, in, kh, kw]
        let kernel = if self.depthwise {
            weights
                .tensor::<B, 4>(
                    &format!("{}/depthwise_kernel", conv),
                    [kh, kw, out_channels, 1],
                    device,
                )?
                .permute([2, 3, 0, 1])
        } else {
            weights
                .tensor::<B, 4>(
                    &format!("{}/kernel", conv),
                    [kh, kw, in_per_group, out_channels],
                    device,
                )?
                .permute([3, 2, 0, 1])
        };
        self.conv.weight = Param::from_tensor(kernel);

        let vector = |name: &str| {
            weights.tensor::<B, 1>(&format!("{}/{}", bn, name), [out_channels], device)
        };
        self.bn.gamma = Param::from_tensor(vector("gamma")?);
        self.bn.beta = Param::from_tensor(vector("beta")?);
        self.bn.running_mean = RunningState::new(vector("moving_mean")?);
        self.bn.running_var = RunningState::new(vector("moving_variance")?);

        Ok(self)
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = if self.pad_bottom_right {
            x.pad((0, 1, 0, 1), 0.0)
        } else {
            x
        };
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        x.clamp(0.0, 6.0)
    }
}

fn padding_for(stride: usize) -> PaddingConfig2d {
    if stride > 1 {
        PaddingConfig2d::Valid
    } else {
        PaddingConfig2d::Explicit(1, 1)
    }
}

/// Depthwise convolution then pointwise convolution
#[derive(Module, Debug)]
pub struct DepthwiseSeparable<B: Backend> {
    depthwise: ConvBnRelu6<B>,
    pointwise: ConvBnRelu6<B>,
}

impl<B: Backend> DepthwiseSeparable<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            depthwise: ConvBnRelu6::depthwise(in_channels, stride, device),
            pointwise: ConvBnRelu6::pointwise(in_channels, out_channels, device),
        }
    }

    fn load_keras(self, weights: &KerasWeights, block: usize, device: &B::Device) -> error::Result<Self> {
        Ok(Self {
            depthwise: self.depthwise.load_keras(
                weights,
                &format!("conv_dw_{}", block),
                &format!("conv_dw_{}_bn", block),
                device,
            )?,
            pointwise: self.pointwise.load_keras(
                weights,
                &format!("conv_pw_{}", block),
                &format!("conv_pw_{}_bn", block),
                device,
            )?,
        })
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

/// Configuration for the MobileNet v1 body
#[derive(Config, Debug)]
pub struct MobileNetConfig {
    /// Width multiplier
    #[config(default = "0.25")]
    pub alpha: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl MobileNetConfig {
    /// Build the full, untruncated body
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetBody<B> {
        let stem_channels = scaled(STEM_CHANNELS, self.alpha);
        let stem = ConvBnRelu6::standard(self.in_channels, stem_channels, 2, device);

        let mut blocks = Vec::with_capacity(BLOCKS.len());
        let mut channels = stem_channels;
        for &(out, stride) in &BLOCKS {
            let out = scaled(out, self.alpha);
            blocks.push(DepthwiseSeparable::new(channels, out, stride, device));
            channels = out;
        }

        MobileNetBody {
            stem,
            blocks,
            tail: None,
        }
    }
}

/// MobileNet v1 body, possibly truncated
#[derive(Module, Debug)]
pub struct MobileNetBody<B: Backend> {
    stem: ConvBnRelu6<B>,
    blocks: Vec<DepthwiseSeparable<B>>,
    /// Depthwise half of the block after the last full one
    tail: Option<ConvBnRelu6<B>>,
}

impl<B: Backend> MobileNetBody<B> {
    /// Drop every layer after `point`
    ///
    /// Must be applied to the full body; records only load into the full
    /// structure.
    pub fn truncate(self, point: TruncationPoint) -> Self {
        let Self {
            stem, mut blocks, ..
        } = self;

        let tail = match point {
            TruncationPoint::Stem => {
                blocks.clear();
                None
            }
            TruncationPoint::Pointwise(n) => {
                blocks.truncate(n);
                None
            }
            TruncationPoint::Depthwise(n) => {
                blocks.truncate(n);
                blocks.pop().map(|block| block.depthwise)
            }
        };

        Self { stem, blocks, tail }
    }

    /// Load Keras MobileNet weights (`conv1`, `conv_dw_{n}`, `conv_pw_{n}`)
    ///
    /// Tensors the body does not contain, such as `conv_preds`, are ignored.
    pub fn load_keras(self, weights: &KerasWeights, device: &B::Device) -> error::Result<Self> {
        let Self { stem, blocks, tail } = self;

        let stem = stem.load_keras(weights, "conv1", "conv1_bn", device)?;
        let blocks = blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| block.load_keras(weights, i + 1, device))
            .collect::<error::Result<Vec<_>>>()?;
        let next = blocks.len() + 1;
        let tail = tail
            .map(|depthwise| {
                depthwise.load_keras(
                    weights,
                    &format!("conv_dw_{}", next),
                    &format!("conv_dw_{}_bn", next),
                    device,
                )
            })
            .transpose()?;

        Ok(Self { stem, blocks, tail })
    }

    /// Number of complete depthwise-separable blocks
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Forward pass over an NCHW batch
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        match &self.tail {
            Some(depthwise) => depthwise.forward(x),
            None => x,
        }
    }
}

/// Every Keras tensor of a MobileNet v1 body, filled with constants, for tests
#[cfg(all(test, feature = "ndarray"))]
pub(crate) fn keras_test_weights(alpha: f64, kernel_value: f32) -> Vec<(String, Vec<usize>, Vec<f32>)> {
    fn push_conv(
        out: &mut Vec<(String, Vec<usize>, Vec<f32>)>,
        kernel: String,
        shape: Vec<usize>,
        bn: &str,
        channels: usize,
        kernel_value: f32,
    ) {
        let len = shape.iter().product();
        out.push((kernel, shape, vec![kernel_value; len]));
        for (name, value) in [("gamma", 1.0), ("beta", 0.0), ("moving_mean", 0.0), ("moving_variance", 1.0)] {
            out.push((format!("{}/{}", bn, name), vec![channels], vec![value; channels]));
        }
    }

    let mut out = Vec::new();
    let mut channels = scaled(STEM_CHANNELS, alpha);
    push_conv(&mut out, "conv1/kernel".into(), vec![3, 3, 3, channels], "conv1_bn", channels, kernel_value);

    for (i, &(width, _)) in BLOCKS.iter().enumerate() {
        let n = i + 1;
        let width = scaled(width, alpha);
        push_conv(
            &mut out,
            format!("conv_dw_{}/depthwise_kernel", n),
            vec![3, 3, channels, 1],
            &format!("conv_dw_{}_bn", n),
            channels,
            kernel_value,
        );
        push_conv(
            &mut out,
            format!("conv_pw_{}/kernel", n),
            vec![1, 1, channels, width],
            &format!("conv_pw_{}_bn", n),
            width,
            kernel_value,
        );
        channels = width;
    }
    out
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use crate::model::tfjs::NamedWeight;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_parse_layer_names() {
        assert_eq!(TruncationPoint::parse("conv1_relu").unwrap(), TruncationPoint::Stem);
        assert_eq!(
            TruncationPoint::parse("conv_pw_13_relu").unwrap(),
            TruncationPoint::Pointwise(13)
        );
        assert_eq!(
            TruncationPoint::parse("conv_dw_4_relu").unwrap(),
            TruncationPoint::Depthwise(4)
        );

        for bad in ["conv_pw_14_relu", "conv_dw_0_relu", "conv_pw_13", "global_average_pooling2d", ""] {
            assert!(
                matches!(TruncationPoint::parse(bad), Err(PokedexError::UnknownLayer(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_name_round_trips() {
        for name in ["conv1_relu", "conv_dw_1_relu", "conv_pw_7_relu", "conv_pw_13_relu"] {
            assert_eq!(TruncationPoint::parse(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_reference_output_shape() {
        let shape = TruncationPoint::Pointwise(13).output_shape(0.25, 224);
        assert_eq!(shape, [7, 7, 256]);
        assert_eq!(shape.iter().product::<usize>(), 12544);

        assert_eq!(TruncationPoint::Stem.output_shape(0.25, 224), [112, 112, 8]);
        assert_eq!(TruncationPoint::Depthwise(2).output_shape(0.25, 224), [56, 56, 16]);
        assert_eq!(TruncationPoint::Pointwise(13).output_shape(1.0, 224), [7, 7, 1024]);
    }

    #[test]
    fn test_stride_two_halves_and_rounds_down() {
        assert_eq!(conv_output_size(224, 2), 112);
        assert_eq!(conv_output_size(7, 2), 3);
        assert_eq!(conv_output_size(2, 2), 1);
        assert_eq!(conv_output_size(7, 1), 7);

        assert_eq!(TruncationPoint::Stem.output_shape(0.25, 225), [112, 112, 8]);
        assert_eq!(TruncationPoint::Pointwise(13).output_shape(0.25, 32), [1, 1, 256]);
        assert_eq!(TruncationPoint::Pointwise(13).output_shape(0.25, 64), [2, 2, 256]);
    }

    fn in_memory(entries: Vec<(String, Vec<usize>, Vec<f32>)>) -> KerasWeights {
        KerasWeights::from_tensors(
            "memory",
            entries
                .into_iter()
                .map(|(name, shape, values)| (name, NamedWeight { shape, values })),
        )
    }

    /// Kernel plus a BatchNorm that only divides by sqrt(1 + eps)
    fn conv_weights(kernel: &str, shape: Vec<usize>, values: Vec<f32>, bn: &str) -> KerasWeights {
        let channels = if kernel.ends_with("depthwise_kernel") { shape[2] } else { shape[3] };
        let mut entries = vec![(kernel.to_string(), shape, values)];
        for (name, value) in [("gamma", 1.0), ("beta", 0.0), ("moving_mean", 0.0), ("moving_variance", 1.0)] {
            entries.push((format!("{}/{}", bn, name), vec![channels], vec![value; channels]));
        }
        in_memory(entries)
    }

    fn bn_scale() -> f32 {
        1.0 / (1.0 + BN_EPSILON as f32).sqrt()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_stride_two_pads_bottom_right_only() {
        let device = Default::default();
        let weights = conv_weights("conv1/kernel", vec![3, 3, 1, 1], vec![1.0; 9], "conv1_bn");
        let layer = ConvBnRelu6::<TestBackend>::standard(1, 1, 2, &device)
            .load_keras(&weights, "conv1", "conv1_bn", &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device).mul_scalar(0.5);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [1, 1, 2, 2]);

        // Windows start at row/column 0 and 2; the second reaches the pad
        let s = bn_scale();
        assert_close(
            &output.into_data().to_vec::<f32>().unwrap(),
            &[4.5 * s, 3.0 * s, 3.0 * s, 2.0 * s],
        );
    }

    #[test]
    fn test_keras_pointwise_kernel_layout() {
        let device = Default::default();
        // [1, 1, in = 2, out = 3], flattened with `out` fastest
        let weights = conv_weights(
            "conv_pw_1/kernel",
            vec![1, 1, 2, 3],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            "conv_pw_1_bn",
        );
        let layer = ConvBnRelu6::<TestBackend>::pointwise(2, 3, &device)
            .load_keras(&weights, "conv_pw_1", "conv_pw_1_bn", &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.01f32, 0.1], [1, 2, 1, 1]),
            &device,
        );
        let s = bn_scale();
        assert_close(
            &layer.forward(input).into_data().to_vec::<f32>().unwrap(),
            &[0.41 * s, 0.52 * s, 0.63 * s],
        );
    }

    #[test]
    fn test_keras_depthwise_kernel_layout() {
        let device = Default::default();
        // [3, 3, channels = 2, 1]: channel 0 taps are 0.1, channel 1 taps are 0.2
        let values = (0..18).map(|i| if i % 2 == 0 { 0.1 } else { 0.2 }).collect();
        let weights = conv_weights("conv_dw_1/depthwise_kernel", vec![3, 3, 2, 1], values, "conv_dw_1_bn");
        let layer = ConvBnRelu6::<TestBackend>::depthwise(2, 1, &device)
            .load_keras(&weights, "conv_dw_1", "conv_dw_1_bn", &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 2, 3, 3], &device);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [1, 2, 3, 3]);

        // Centre pixel sees all nine taps
        let centre = output.slice([0..1, 0..2, 1..2, 1..2]).into_data().to_vec::<f32>().unwrap();
        let s = bn_scale();
        assert_close(&centre, &[0.9 * s, 1.8 * s]);
    }

    #[test]
    fn test_load_keras_full_body() {
        let device = Default::default();
        let mut entries = keras_test_weights(0.25, 0.01);
        entries.push(("conv_preds/kernel".to_string(), vec![1, 1, 256, 1000], vec![0.0; 256_000]));
        let weights = in_memory(entries);

        let body = MobileNetConfig::new()
            .init::<TestBackend>(&device)
            .load_keras(&weights, &device)
            .unwrap()
            .truncate(TruncationPoint::Pointwise(13));

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let first = body.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let second = body.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(first.len(), 256);
        assert_eq!(first, second);
        assert!(first.iter().all(|v| v.is_finite() && (0.0..=6.0).contains(v)));
    }

    #[test]
    fn test_load_keras_rejects_other_width() {
        let device = Default::default();
        let weights = in_memory(keras_test_weights(0.5, 0.01));

        let err = MobileNetConfig::new()
            .init::<TestBackend>(&device)
            .load_keras(&weights, &device)
            .unwrap_err();
        assert!(matches!(err, PokedexError::CorruptModel { .. }));
    }

    #[test]
    fn test_forward_matches_output_shape() {
        let device = Default::default();
        let input_size = 32;
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, input_size, input_size], &device);

        for point in [
            TruncationPoint::Stem,
            TruncationPoint::Depthwise(2),
            TruncationPoint::Pointwise(13),
        ] {
            let body = MobileNetConfig::new().init::<TestBackend>(&device).truncate(point);
            let [h, w, c] = point.output_shape(0.25, input_size);
            assert_eq!(body.forward(input.clone()).dims(), [1, c, h, w]);
        }
    }

    #[test]
    fn test_truncate_block_counts() {
        let device = Default::default();
        let body = MobileNetConfig::new().init::<TestBackend>(&device);
        assert_eq!(body.num_blocks(), 13);

        let body = body.truncate(TruncationPoint::Depthwise(5));
        assert_eq!(body.num_blocks(), 4);
    }

    #[test]
    fn test_relu6_bounds() {
        let device = Default::default();
        let body = MobileNetConfig::new()
            .init::<TestBackend>(&device)
            .truncate(TruncationPoint::Pointwise(3));
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device).mul_scalar(50.0);

        let values = body.forward(input).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=6.0).contains(v)));
    }
}
