use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use tracing::warn;

/// Configuration to create a [split-path convolution](SplitConv2d) block using
/// the [init function](SplitConv2dConfig::init).
#[derive(Config, Debug)]
pub struct SplitConv2dConfig {
    /// The number of input channels.
    pub channels_in: usize,
    /// The number of output channels. Must be even, since the grouped path
    /// convolves with two groups.
    pub channels_out: usize,
    /// The kernel size of the grouped convolution path.
    #[config(default = "3")]
    pub kernel_size: usize,
    /// The stride of the block, 1 or 2.
    #[config(default = "1")]
    pub stride: usize,
    /// Fraction of channels routed to the grouped convolution path.
    #[config(default = "0.5")]
    pub split_ratio: f64,
    /// Ratio used instead when `split_ratio` leaves the pointwise path with a
    /// negative channel count.
    #[config(default = "0.5")]
    pub fallback_ratio: f64,
}

/// How the channels of a [SplitConv2d] block are divided between its two
/// paths. Computed once from the configuration and fixed for the lifetime of
/// the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSplit {
    /// Input channels consumed by the grouped (primary) path. Always even.
    pub primary_in: usize,
    /// Input channels consumed by the pointwise (secondary) path.
    pub secondary_in: usize,
    /// Output channel share attributed to the primary path.
    pub primary_out: usize,
    /// Output channel share attributed to the secondary path.
    pub secondary_out: usize,
}

impl SplitConv2dConfig {
    /// Compute the channel partition for this configuration.
    ///
    /// The primary count is rounded down to an even number so the two-group
    /// convolution divides cleanly. A `split_ratio` that would leave the
    /// secondary path with a negative channel count is replaced by
    /// `fallback_ratio` with a logged warning, never an error.
    pub fn channel_split(&self) -> ChannelSplit {
        let mut ratio = self.split_ratio;
        let mut primary_in = (self.channels_in as f64 * ratio) as usize;

        if primary_in > self.channels_in {
            warn!(
                split_ratio = self.split_ratio,
                fallback = self.fallback_ratio,
                "split_ratio leaves no channels for the secondary path, using fallback"
            );
            ratio = self.fallback_ratio;
            primary_in = ((self.channels_in as f64 * ratio) as usize).min(self.channels_in);
        }

        let mut secondary_in = self.channels_in - primary_in;

        // The grouped convolution uses two groups and needs an even input count.
        if primary_in % 2 != 0 {
            primary_in -= 1;
            secondary_in += 1;
        }

        let primary_out = ((self.channels_out as f64 * ratio) as usize).min(self.channels_out);

        ChannelSplit {
            primary_in,
            secondary_in,
            primary_out,
            secondary_out: self.channels_out - primary_out,
        }
    }

    /// Initialize a new [split-path convolution](SplitConv2d) block.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SplitConv2d<B> {
        let split = self.channel_split();
        let padding = self.kernel_size / 2;

        let grouped = Conv2dConfig::new(
            [split.primary_in, self.channels_out],
            [self.kernel_size; 2],
        )
        .with_stride([self.stride; 2])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(2)
        .with_bias(false)
        .init(device);

        let pointwise = Conv2dConfig::new([split.primary_in, self.channels_out], [1, 1])
            .with_bias(false)
            .init(device);

        let secondary =
            Conv2dConfig::new([split.secondary_in, self.channels_out], [1, 1]).init(device);

        SplitConv2d {
            grouped,
            pointwise,
            secondary,
            downsample_primary: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            downsample_secondary: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            global_pool_primary: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            global_pool_secondary: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            norm_primary: BatchNormConfig::new(self.channels_out).init(device),
            norm_secondary: BatchNormConfig::new(self.channels_out).init(device),
            stride: self.stride,
            split: Ignored(split),
        }
    }
}

/// A convolution block that splits its input channels between a grouped k×k
/// path and a pointwise 1×1 path, then blends the two outputs with
/// per-channel softmax gates derived from their global averages.
///
/// The grouped path sums a two-group convolution with a 1×1 projection of the
/// same slice; the pointwise path is a single biased 1×1 convolution of the
/// remaining channels. Each path is batch-normalized before fusion. With
/// stride 2 both paths downsample by 2×2 average pooling ahead of their 1×1
/// convolutions so resolutions match.
///
/// Should be created with [SplitConv2dConfig].
#[derive(Module, Debug)]
pub struct SplitConv2d<B: Backend> {
    grouped: Conv2d<B>,
    pointwise: Conv2d<B>,
    secondary: Conv2d<B>,
    downsample_primary: AvgPool2d,
    downsample_secondary: AvgPool2d,
    global_pool_primary: AdaptiveAvgPool2d,
    global_pool_secondary: AdaptiveAvgPool2d,
    norm_primary: BatchNorm<B, 2>,
    norm_secondary: BatchNorm<B, 2>,
    stride: usize,
    split: Ignored<ChannelSplit>,
}

impl<B: Backend> SplitConv2d<B> {
    /// The channel partition this block was built with.
    pub fn channel_split(&self) -> &ChannelSplit {
        &self.split.0
    }

    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels_in, height, width]`
    /// - output: `[batch_size, channels_out, height / stride, width / stride]`
    ///
    /// Panics inside the underlying convolution when the input channel count
    /// disagrees with the configuration.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let split = &self.split.0;

        let primary = input.clone().narrow(1, 0, split.primary_in);
        let secondary = input.narrow(1, split.primary_in, split.secondary_in);

        let grouped = self.grouped.forward(primary.clone());
        let primary = match self.stride {
            2 => self.downsample_primary.forward(primary),
            _ => primary,
        };
        let primary_out = self
            .norm_primary
            .forward(grouped + self.pointwise.forward(primary));

        let secondary = match self.stride {
            2 => self.downsample_secondary.forward(secondary),
            _ => secondary,
        };
        let secondary_out = self
            .norm_secondary
            .forward(self.secondary.forward(secondary));

        let [batch, channels, _, _] = primary_out.dims();
        let weights = self.fusion_weights(primary_out.clone(), secondary_out.clone());
        let weight_primary = weights
            .clone()
            .narrow(2, 0, 1)
            .reshape([batch, channels, 1, 1]);
        let weight_secondary = weights.narrow(2, 1, 1).reshape([batch, channels, 1, 1]);

        secondary_out * weight_secondary + primary_out * weight_primary
    }

    /// Per-channel blend weights for the two path outputs.
    ///
    /// Each path is reduced to one value per channel by global average
    /// pooling, the two summaries are stacked (primary first) and a softmax
    /// over the size-2 axis turns them into convex weights.
    ///
    /// # Shapes
    ///
    /// - primary, secondary: `[batch_size, channels_out, height, width]`
    /// - output: `[batch_size, channels_out, 2]`
    pub fn fusion_weights(
        &self,
        primary: Tensor<B, 4>,
        secondary: Tensor<B, 4>,
    ) -> Tensor<B, 3> {
        let [batch, channels, _, _] = primary.dims();
        let primary = self
            .global_pool_primary
            .forward(primary)
            .reshape([batch, channels]);
        let secondary = self
            .global_pool_secondary
            .forward(secondary)
            .reshape([batch, channels]);

        softmax(Tensor::stack(vec![primary, secondary], 2), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn channel_split_preserves_total_and_parity() {
        for (channels_in, ratio) in [(64, 0.5), (48, 0.25), (10, 0.9), (7, 0.3), (33, 0.66)] {
            let split = SplitConv2dConfig::new(channels_in, 64)
                .with_split_ratio(ratio)
                .channel_split();

            assert_eq!(
                split.primary_in + split.secondary_in,
                channels_in,
                "partition must cover all {channels_in} channels at ratio {ratio}"
            );
            assert_eq!(split.primary_in % 2, 0, "primary count must stay even");
        }
    }

    #[test]
    fn odd_primary_count_shifts_one_channel_to_secondary() {
        let split = SplitConv2dConfig::new(10, 10)
            .with_split_ratio(0.9)
            .channel_split();

        assert_eq!(split.primary_in, 8);
        assert_eq!(split.secondary_in, 2);
    }

    #[test]
    fn oversized_ratio_falls_back_to_half() {
        let split = SplitConv2dConfig::new(16, 16)
            .with_split_ratio(1.5)
            .channel_split();

        assert_eq!(split.primary_in, 8);
        assert_eq!(split.secondary_in, 8);
    }

    #[test]
    fn oversized_ratio_uses_configured_fallback() {
        let split = SplitConv2dConfig::new(16, 16)
            .with_split_ratio(2.0)
            .with_fallback_ratio(0.25)
            .channel_split();

        assert_eq!(split.primary_in, 4);
        assert_eq!(split.secondary_in, 12);
    }

    #[test]
    fn output_shape_matches_input_with_stride_1() {
        let device = Default::default();
        let block = SplitConv2dConfig::new(64, 64).init::<TestBackend>(&device);
        let input =
            Tensor::<TestBackend, 4>::random([1, 64, 32, 32], Distribution::Default, &device);

        let output = block.forward(input);

        assert_eq!(output.dims(), [1, 64, 32, 32]);
    }

    #[test]
    fn output_shape_halves_with_stride_2() {
        let device = Default::default();
        let block = SplitConv2dConfig::new(64, 64)
            .with_stride(2)
            .init::<TestBackend>(&device);
        let input =
            Tensor::<TestBackend, 4>::random([1, 64, 32, 32], Distribution::Default, &device);

        let output = block.forward(input);

        assert_eq!(output.dims(), [1, 64, 16, 16]);
    }

    #[test]
    fn output_channels_follow_config_not_stride() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([2, 32, 16, 16], Distribution::Default, &device);

        for stride in [1, 2] {
            let block = SplitConv2dConfig::new(32, 48)
                .with_stride(stride)
                .init::<TestBackend>(&device);
            let output = block.forward(input.clone());

            assert_eq!(output.dims()[1], 48, "channels for stride {stride}");
        }
    }

    #[test]
    fn wider_kernel_preserves_spatial_size() {
        let device = Default::default();
        let block = SplitConv2dConfig::new(16, 16)
            .with_kernel_size(5)
            .init::<TestBackend>(&device);
        let input =
            Tensor::<TestBackend, 4>::random([1, 16, 20, 20], Distribution::Default, &device);

        assert_eq!(block.forward(input).dims(), [1, 16, 20, 20]);
    }

    #[test]
    fn fusion_weights_are_convex_per_channel() {
        let device = Default::default();
        let block = SplitConv2dConfig::new(16, 8).init::<TestBackend>(&device);
        let primary =
            Tensor::<TestBackend, 4>::random([2, 8, 5, 5], Distribution::Default, &device);
        let secondary =
            Tensor::<TestBackend, 4>::random([2, 8, 5, 5], Distribution::Default, &device);

        let weights = block.fusion_weights(primary, secondary);
        assert_eq!(weights.dims(), [2, 8, 2]);

        let values = weights.into_data().to_vec::<f32>().unwrap();
        for pair in values.chunks(2) {
            assert!(pair[0] >= 0.0 && pair[1] >= 0.0);
            assert!((pair[0] + pair[1] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn forward_is_deterministic() {
        let device = Default::default();
        let block = SplitConv2dConfig::new(32, 32).init::<TestBackend>(&device);
        let input =
            Tensor::<TestBackend, 4>::random([1, 32, 8, 8], Distribution::Default, &device);

        let first = block.forward(input.clone()).into_data();
        let second = block.forward(input).into_data();

        assert_eq!(first, second);
    }
}
