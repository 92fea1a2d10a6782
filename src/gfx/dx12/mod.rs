//! DirectX 12 图形 API 实现模块
//!
//! 本模块包含了所有 DirectX 12 相关的代码：
//! - device: DXGI 工厂、适配器枚举、设备创建、调试层与命令队列
//! - fence: Fence 与可复用的等待事件
//! - recorder: 命令分配器 + 图形命令列表
//! - swapchain: 翻转丢弃交换链、RTV 描述符堆与后缓冲
//!
//! 所有 DXGI "设备已移除" 类 HRESULT 都被映射为 `GraphicsError::DeviceLost`。

mod device;
mod fence;
mod recorder;
mod swapchain;

use windows::Win32::Graphics::Direct3D12::ID3D12Device;
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
};

use crate::core::error::GraphicsError;
use crate::renderer::backend_trait::GpuBackend;

pub use device::{Dx12Device, Dx12Queue};
pub use fence::Dx12Fence;
pub use recorder::Dx12Recorder;
pub use swapchain::{Dx12BackBuffer, Dx12SwapChain};

/// DirectX 12 后端标记类型
pub struct Dx12Backend;

impl GpuBackend for Dx12Backend {
    type Device = Dx12Device;
    type Queue = Dx12Queue;
    type Fence = Dx12Fence;
    type Recorder = Dx12Recorder;
    type SwapChain = Dx12SwapChain;
    type BackBuffer = Dx12BackBuffer;

    const NAME: &'static str = "DirectX 12";
}

/// 设备移除原因的文字描述
pub(crate) fn removed_reason(device: &ID3D12Device) -> String {
    match unsafe { device.GetDeviceRemovedReason() } {
        Ok(()) => "unknown reason".to_string(),
        Err(e) => format!("{} ({:?})", e, e.code()),
    }
}

/// 把 HRESULT 错误翻译为图形错误；设备已移除时返回 `DeviceLost`
pub(crate) fn map_hr(
    device: &ID3D12Device,
    error: windows::core::Error,
    what: &str,
    kind: fn(String) -> GraphicsError,
) -> GraphicsError {
    let code = error.code();
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == DXGI_ERROR_DEVICE_HUNG {
        GraphicsError::DeviceLost(format!("{}: {}", what, removed_reason(device)))
    } else {
        kind(format!("{} failed: {}", what, error))
    }
}
