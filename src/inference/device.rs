use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result};
use tracing::info;

use crate::config::DeviceChoice;

/// Resolves the configured device. `Auto` never fails, it falls back to the CPU.
pub fn select_device(choice: DeviceChoice) -> Result<Device> {
    let device = match choice {
        DeviceChoice::Cpu => Device::Cpu,
        DeviceChoice::Cuda => Device::new_cuda(0)?,
        DeviceChoice::Metal => Device::new_metal(0)?,
        DeviceChoice::Auto => {
            if cuda_is_available() {
                Device::new_cuda(0).unwrap_or(Device::Cpu)
            } else if metal_is_available() {
                Device::new_metal(0).unwrap_or(Device::Cpu)
            } else {
                Device::Cpu
            }
        }
    };
    info!(
        "Selected {:?}, supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        device,
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );
    Ok(device)
}
