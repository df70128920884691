//! ML inference engine using Candle.
//!
//! Provides weight-set loading and the DFDC frame classifier:
//! - `EfficientNet` B3/B5/B6/B7 encoders (TF-ported `timm` layout)
//! - strict binding of safetensors and `torch.save` checkpoints

mod classifier;
mod device;
mod efficientnet;
mod loader;
mod utils;

pub use classifier::DeepFakeClassifier;
pub use device::{get_device, select_device, DevicePreference};
pub use efficientnet::{
    make_divisible, same_padding, EfficientNet, EfficientNetConfig, EncoderKind, BN_EPS,
};
pub use loader::{normalize_key, StateDict, WeightFormat, WRAPPER_PREFIX};
pub use utils::{mean_probability, sigmoid};
