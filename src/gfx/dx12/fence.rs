//! DirectX 12 Fence 与等待事件

use std::time::{Duration, Instant};

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{GpuFence, WaitOutcome};

use super::{map_hr, removed_reason};

/// Fence 与一个可复用的自动重置事件
///
/// 事件在创建时分配一次，在 Drop 时关闭。
pub struct Dx12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
    device: ID3D12Device,
}

impl Dx12Fence {
    pub(super) fn new(device: &ID3D12Device, initial_value: u64) -> Result<Self> {
        unsafe {
            let fence: ID3D12Fence = device
                .CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| map_hr(device, e, "CreateFence", GraphicsError::ResourceCreation))?;

            let event = CreateEventA(None, false, false, None)
                .map_err(|e| GraphicsError::ResourceCreation(format!("CreateEvent failed: {}", e)))?;

            Ok(Self {
                fence,
                event,
                device: device.clone(),
            })
        }
    }

    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl GpuFence for Dx12Fence {
    fn completed_value(&self) -> Result<u64> {
        let value = unsafe { self.fence.GetCompletedValue() };
        // 设备移除后 GetCompletedValue 返回 UINT64_MAX
        if value == u64::MAX {
            return Err(GraphicsError::DeviceLost(removed_reason(&self.device)).into());
        }
        Ok(value)
    }

    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            unsafe { self.fence.SetEventOnCompletion(value, self.event) }
                .map_err(|e| map_hr(&self.device, e, "SetEventOnCompletion", GraphicsError::FenceWait))?;

            let millis = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    remaining.as_millis().min((INFINITE - 1) as u128) as u32
                }
                None => INFINITE,
            };

            let result = unsafe { WaitForSingleObject(self.event, millis) };
            if result == WAIT_TIMEOUT {
                return Ok(if self.completed_value()? >= value {
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::TimedOut
                });
            }
            if result != WAIT_OBJECT_0 {
                return Err(GraphicsError::FenceWait(format!("WaitForSingleObject returned {:?}", result)).into());
            }

            // 自动重置事件可能来自之前一次超时的等待
            if self.completed_value()? >= value {
                return Ok(WaitOutcome::Ready);
            }
        }
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}
