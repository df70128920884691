//! `EfficientNet` encoder in the TensorFlow-ported ("`tf_`") layout.
//!
//! Parameter names follow the `timm` module tree (`conv_stem`, `bn1`,
//! `blocks.{stage}.{block}.*`, `conv_head`, `bn2`), so checkpoints exported
//! from `PyTorch` bind without renaming. Convolutions use TensorFlow "same"
//! padding and batch norms use the TF epsilon.
//!
//! The network is built in inference form only: batch norms are frozen into a
//! per-channel affine transform and stochastic depth is omitted.

// Allow common ML code patterns
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use std::fmt;
use std::str::FromStr;

use candle_core::{Module, Tensor};
use candle_nn::init::Init;
use candle_nn::{conv2d, conv2d_no_bias, Conv2d, Conv2dConfig, VarBuilder};

/// Batch norm epsilon used by the TF-ported weights.
pub const BN_EPS: f64 = 1e-3;

/// Squeeze-excite reduction ratio, relative to the block input channels.
const SE_RATIO: f64 = 0.25;

/// Channel rounding granularity.
const CHANNEL_DIVISOR: usize = 8;

/// Base (B0) stem width before scaling.
const BASE_STEM_CHANNELS: usize = 32;

/// Base (B0) head width before scaling.
const BASE_HEAD_CHANNELS: usize = 1280;

/// Block flavour of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    /// Depthwise separable: dw conv, SE, pw projection.
    DepthwiseSeparable,
    /// Mobile inverted bottleneck: pw expansion, dw conv, SE, pw projection.
    InvertedResidual,
}

/// One stage of the B0 template.
#[derive(Debug, Clone, Copy)]
struct StageSpec {
    kind: BlockKind,
    repeats: usize,
    kernel: usize,
    stride: usize,
    expand: usize,
    channels: usize,
}

const fn stage(
    kind: BlockKind,
    repeats: usize,
    kernel: usize,
    stride: usize,
    expand: usize,
    channels: usize,
) -> StageSpec {
    StageSpec {
        kind,
        repeats,
        kernel,
        stride,
        expand,
        channels,
    }
}

/// `EfficientNet-B0` stage template; larger variants scale it.
const BASE_STAGES: [StageSpec; 7] = [
    stage(BlockKind::DepthwiseSeparable, 1, 3, 1, 1, 16),
    stage(BlockKind::InvertedResidual, 2, 3, 2, 6, 24),
    stage(BlockKind::InvertedResidual, 2, 5, 2, 6, 40),
    stage(BlockKind::InvertedResidual, 3, 3, 2, 6, 80),
    stage(BlockKind::InvertedResidual, 3, 5, 1, 6, 112),
    stage(BlockKind::InvertedResidual, 4, 5, 2, 6, 192),
    stage(BlockKind::InvertedResidual, 1, 3, 1, 6, 320),
];

/// Pretrained encoder variants used by the DFDC classifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncoderKind {
    /// `tf_efficientnet_b3_ns`
    B3,
    /// `tf_efficientnet_b5_ns`
    B5,
    /// `tf_efficientnet_b6_ns`
    B6,
    /// `tf_efficientnet_b7_ns`
    #[default]
    B7,
}

impl EncoderKind {
    /// Width and depth multipliers of this variant.
    #[must_use]
    pub const fn multipliers(self) -> (f64, f64) {
        match self {
            Self::B3 => (1.2, 1.4),
            Self::B5 => (1.6, 2.2),
            Self::B6 => (1.8, 2.6),
            Self::B7 => (2.0, 3.1),
        }
    }

    /// Canonical `timm` model name.
    #[must_use]
    pub const fn timm_name(self) -> &'static str {
        match self {
            Self::B3 => "tf_efficientnet_b3_ns",
            Self::B5 => "tf_efficientnet_b5_ns",
            Self::B6 => "tf_efficientnet_b6_ns",
            Self::B7 => "tf_efficientnet_b7_ns",
        }
    }

    /// Recognizes the encoder embedded in a DFDC checkpoint file name, such as
    /// `final_999_DeepFakeClassifier_tf_efficientnet_b7_ns_0_23`.
    #[must_use]
    pub fn from_weight_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        [Self::B3, Self::B5, Self::B6, Self::B7]
            .into_iter()
            .find(|kind| lower.contains(kind.timm_name()))
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.timm_name())
    }
}

impl FromStr for EncoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.to_ascii_lowercase();
        let short = key
            .strip_prefix("tf_efficientnet_")
            .map_or(key.as_str(), |rest| rest.trim_end_matches("_ns"));
        match short {
            "b3" => Ok(Self::B3),
            "b5" => Ok(Self::B5),
            "b6" => Ok(Self::B6),
            "b7" => Ok(Self::B7),
            _ => Err(format!(
                "unknown encoder '{s}' (expected tf_efficientnet_b3_ns, b5_ns, b6_ns or b7_ns)"
            )),
        }
    }
}

/// Scaled architecture hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficientNetConfig {
    width: f64,
    depth: f64,
}

impl EfficientNetConfig {
    /// Configuration of a pretrained variant.
    #[must_use]
    pub const fn for_kind(kind: EncoderKind) -> Self {
        let (width, depth) = kind.multipliers();
        Self { width, depth }
    }

    /// Configuration with arbitrary multipliers (used for small test networks).
    #[must_use]
    pub const fn with_multipliers(width: f64, depth: f64) -> Self {
        Self { width, depth }
    }

    fn round_channels(&self, channels: usize) -> usize {
        make_divisible(channels as f64 * self.width, CHANNEL_DIVISOR)
    }

    fn round_repeats(&self, repeats: usize) -> usize {
        (repeats as f64 * self.depth).ceil() as usize
    }

    /// Stem output channels.
    #[must_use]
    pub fn stem_channels(&self) -> usize {
        self.round_channels(BASE_STEM_CHANNELS)
    }

    /// Channels of the pooled feature vector.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.round_channels(BASE_HEAD_CHANNELS)
    }

    /// Number of blocks in each stage.
    #[must_use]
    pub fn stage_depths(&self) -> Vec<usize> {
        BASE_STAGES
            .iter()
            .map(|s| self.round_repeats(s.repeats))
            .collect()
    }
}

/// Rounds `value` to a multiple of `divisor`, never dropping more than 10%.
#[must_use]
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let rounded = (((value + d / 2.0) / d).floor() * d).max(d) as usize;
    if (rounded as f64) < 0.9 * value {
        rounded + divisor
    } else {
        rounded
    }
}

/// TF "same" padding `(before, after)` for one spatial dimension.
#[must_use]
pub const fn same_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = size.div_ceil(stride);
    let needed = (out.saturating_sub(1) * stride + kernel).saturating_sub(size);
    (needed / 2, needed - needed / 2)
}

/// Convolution with dynamic TF "same" padding.
struct SameConv {
    conv: Conv2d,
    kernel: usize,
    stride: usize,
}

impl SameConv {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let conv = conv2d_no_bias(
            in_channels,
            out_channels,
            kernel,
            Conv2dConfig {
                stride,
                groups,
                ..Conv2dConfig::default()
            },
            vb,
        )?;
        Ok(Self {
            conv,
            kernel,
            stride,
        })
    }

    fn pointwise(in_channels: usize, out_channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Self::new(in_channels, out_channels, 1, 1, 1, vb)
    }
}

impl Module for SameConv {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        if self.kernel == 1 && self.stride == 1 {
            return self.conv.forward(x);
        }
        let (_, _, h, w) = x.dims4()?;
        let (top, bottom) = same_padding(h, self.kernel, self.stride);
        let (left, right) = same_padding(w, self.kernel, self.stride);
        let padded = x
            .pad_with_zeros(2, top, bottom)?
            .pad_with_zeros(3, left, right)?;
        self.conv.forward(&padded)
    }
}

/// Batch norm reduced to `x * scale + shift` from its running statistics.
struct FrozenBatchNorm {
    scale: Tensor,
    shift: Tensor,
}

impl FrozenBatchNorm {
    fn new(channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let weight = vb.get_with_hints(channels, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(channels, "bias", Init::Const(0.0))?;
        let mean = vb.get_with_hints(channels, "running_mean", Init::Const(0.0))?;
        let var = vb.get_with_hints(channels, "running_var", Init::Const(1.0))?;

        let scale = weight.div(&var.affine(1.0, BN_EPS)?.sqrt()?)?;
        let shift = bias.sub(&mean.mul(&scale)?)?;
        Ok(Self {
            scale: scale.reshape((1, channels, 1, 1))?,
            shift: shift.reshape((1, channels, 1, 1))?,
        })
    }
}

impl Module for FrozenBatchNorm {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        x.broadcast_mul(&self.scale)?.broadcast_add(&self.shift)
    }
}

/// Channel attention: global pool, reduce, SiLU, expand, sigmoid gate.
struct SqueezeExcite {
    conv_reduce: Conv2d,
    conv_expand: Conv2d,
}

impl SqueezeExcite {
    fn new(channels: usize, reduced: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig::default();
        Ok(Self {
            conv_reduce: conv2d(channels, reduced, 1, cfg, vb.pp("conv_reduce"))?,
            conv_expand: conv2d(reduced, channels, 1, cfg, vb.pp("conv_expand"))?,
        })
    }
}

impl Module for SqueezeExcite {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let gate = x.mean_keepdim((2, 3))?;
        let gate = self.conv_reduce.forward(&gate)?.silu()?;
        let gate = candle_nn::ops::sigmoid(&self.conv_expand.forward(&gate)?)?;
        x.broadcast_mul(&gate)
    }
}

fn se_channels(in_channels: usize) -> usize {
    ((in_channels as f64 * SE_RATIO).round() as usize).max(1)
}

struct DepthwiseSeparable {
    conv_dw: SameConv,
    bn1: FrozenBatchNorm,
    se: SqueezeExcite,
    conv_pw: SameConv,
    bn2: FrozenBatchNorm,
    residual: bool,
}

impl DepthwiseSeparable {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        vb: &VarBuilder,
    ) -> candle_core::Result<Self> {
        Ok(Self {
            conv_dw: SameConv::new(
                in_channels,
                in_channels,
                kernel,
                stride,
                in_channels,
                vb.pp("conv_dw"),
            )?,
            bn1: FrozenBatchNorm::new(in_channels, vb.pp("bn1"))?,
            se: SqueezeExcite::new(in_channels, se_channels(in_channels), vb.pp("se"))?,
            conv_pw: SameConv::pointwise(in_channels, out_channels, vb.pp("conv_pw"))?,
            bn2: FrozenBatchNorm::new(out_channels, vb.pp("bn2"))?,
            residual: stride == 1 && in_channels == out_channels,
        })
    }
}

impl Module for DepthwiseSeparable {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.bn1.forward(&self.conv_dw.forward(x)?)?.silu()?;
        let h = self.se.forward(&h)?;
        let h = self.bn2.forward(&self.conv_pw.forward(&h)?)?;
        if self.residual {
            h + x
        } else {
            Ok(h)
        }
    }
}

struct InvertedResidual {
    conv_pw: SameConv,
    bn1: FrozenBatchNorm,
    conv_dw: SameConv,
    bn2: FrozenBatchNorm,
    se: SqueezeExcite,
    conv_pwl: SameConv,
    bn3: FrozenBatchNorm,
    residual: bool,
}

impl InvertedResidual {
    fn new(
        in_channels: usize,
        out_channels: usize,
        spec: &StageSpec,
        stride: usize,
        vb: &VarBuilder,
    ) -> candle_core::Result<Self> {
        let mid = in_channels * spec.expand;
        Ok(Self {
            conv_pw: SameConv::pointwise(in_channels, mid, vb.pp("conv_pw"))?,
            bn1: FrozenBatchNorm::new(mid, vb.pp("bn1"))?,
            conv_dw: SameConv::new(mid, mid, spec.kernel, stride, mid, vb.pp("conv_dw"))?,
            bn2: FrozenBatchNorm::new(mid, vb.pp("bn2"))?,
            se: SqueezeExcite::new(mid, se_channels(in_channels), vb.pp("se"))?,
            conv_pwl: SameConv::pointwise(mid, out_channels, vb.pp("conv_pwl"))?,
            bn3: FrozenBatchNorm::new(out_channels, vb.pp("bn3"))?,
            residual: stride == 1 && in_channels == out_channels,
        })
    }
}

impl Module for InvertedResidual {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.bn1.forward(&self.conv_pw.forward(x)?)?.silu()?;
        let h = self.bn2.forward(&self.conv_dw.forward(&h)?)?.silu()?;
        let h = self.se.forward(&h)?;
        let h = self.bn3.forward(&self.conv_pwl.forward(&h)?)?;
        if self.residual {
            h + x
        } else {
            Ok(h)
        }
    }
}

enum Block {
    DepthwiseSeparable(DepthwiseSeparable),
    InvertedResidual(InvertedResidual),
}

impl Module for Block {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::DepthwiseSeparable(b) => b.forward(x),
            Self::InvertedResidual(b) => b.forward(x),
        }
    }
}

/// `EfficientNet` feature extractor (everything up to global pooling).
pub struct EfficientNet {
    conv_stem: SameConv,
    bn1: FrozenBatchNorm,
    blocks: Vec<Block>,
    conv_head: SameConv,
    bn2: FrozenBatchNorm,
    num_features: usize,
}

impl EfficientNet {
    /// Builds the encoder, requesting every parameter from `vb`.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is missing or has the wrong shape.
    pub fn new(config: &EfficientNetConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let stem = config.stem_channels();
        let conv_stem = SameConv::new(3, stem, 3, 2, 1, vb.pp("conv_stem"))?;
        let bn1 = FrozenBatchNorm::new(stem, vb.pp("bn1"))?;

        let mut blocks = Vec::new();
        let mut in_channels = stem;
        let vb_blocks = vb.pp("blocks");
        for (stage_idx, spec) in BASE_STAGES.iter().enumerate() {
            let out_channels = config.round_channels(spec.channels);
            let vb_stage = vb_blocks.pp(stage_idx.to_string());
            for block_idx in 0..config.round_repeats(spec.repeats) {
                let stride = if block_idx == 0 { spec.stride } else { 1 };
                let vb_block = vb_stage.pp(block_idx.to_string());
                let block = match spec.kind {
                    BlockKind::DepthwiseSeparable => {
                        Block::DepthwiseSeparable(DepthwiseSeparable::new(
                            in_channels,
                            out_channels,
                            spec.kernel,
                            stride,
                            &vb_block,
                        )?)
                    }
                    BlockKind::InvertedResidual => Block::InvertedResidual(InvertedResidual::new(
                        in_channels,
                        out_channels,
                        spec,
                        stride,
                        &vb_block,
                    )?),
                };
                blocks.push(block);
                in_channels = out_channels;
            }
        }

        let num_features = config.num_features();
        let conv_head = SameConv::pointwise(in_channels, num_features, vb.pp("conv_head"))?;
        let bn2 = FrozenBatchNorm::new(num_features, vb.pp("bn2"))?;

        Ok(Self {
            conv_stem,
            bn1,
            blocks,
            conv_head,
            bn2,
            num_features,
        })
    }

    /// Channels of the feature map returned by `forward`.
    #[must_use]
    pub const fn num_features(&self) -> usize {
        self.num_features
    }

    /// Total number of MBConv / DS blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Module for EfficientNet {
    /// Returns the `(N, features, H/32, W/32)` feature map.
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = self.bn1.forward(&self.conv_stem.forward(x)?)?.silu()?;
        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        self.bn2.forward(&self.conv_head.forward(&h)?)?.silu()
    }
}
