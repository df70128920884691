//! Device selection for inference.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use candle_core::Device;
use serde::Deserialize;
use tracing::{info, warn};

/// Requested compute device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Best available accelerator, falling back to CPU.
    #[default]
    Auto,
    /// Always run on the CPU.
    Cpu,
    /// CUDA device 0 (requires the `cuda` feature).
    Cuda,
    /// Metal device 0 (requires the `metal` feature).
    Metal,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(format!(
                "unknown device '{other}' (expected auto, cpu, cuda or metal)"
            )),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
        };
        f.write_str(name)
    }
}

/// Returns the best available device for inference.
///
/// Automatically detects and uses GPU (Metal on macOS, CUDA on Linux/Windows)
/// if available, falling back to CPU.
#[must_use]
pub fn get_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device for inference");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device for inference");
            return device;
        }
    }

    info!("Using CPU for inference");
    Device::Cpu
}

/// Resolves a device preference into a concrete device.
///
/// `Auto` never fails. An explicit accelerator that is unavailable (or not
/// compiled in) is an error, so a misconfigured server does not silently run
/// on the CPU.
///
/// # Errors
///
/// Returns an error if an explicitly requested accelerator cannot be opened.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Auto => Ok(get_device()),
        DevicePreference::Cpu => {
            info!("Using CPU for inference");
            Ok(Device::Cpu)
        }
        DevicePreference::Cuda => {
            let device = Device::new_cuda(0).map_err(|e| {
                warn!("CUDA device unavailable: {e}");
                anyhow::anyhow!("CUDA device requested but unavailable: {e}")
            })?;
            info!("Using CUDA device for inference");
            Ok(device)
        }
        DevicePreference::Metal => {
            let device = Device::new_metal(0).map_err(|e| {
                warn!("Metal device unavailable: {e}");
                anyhow::anyhow!("Metal device requested but unavailable: {e}")
            })?;
            info!("Using Metal device for inference");
            Ok(device)
        }
    }
}
