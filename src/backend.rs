//! 計算バックエンドの型定義

use burn::backend::Autodiff;

/// CPU (NdArray) バックエンド
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// CPU学習用 (自動微分付き)
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

/// GPU (WGPU) バックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;

/// GPU学習用 (自動微分付き)
#[cfg(feature = "wgpu")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

/// CPUデバイス
pub fn cpu_device() -> burn_ndarray::NdArrayDevice {
    burn_ndarray::NdArrayDevice::Cpu
}

/// GPUデバイス（利用可能な最良のアダプタ）
#[cfg(feature = "wgpu")]
pub fn gpu_device() -> burn_wgpu::WgpuDevice {
    burn_wgpu::WgpuDevice::default()
}
