//! DirectX 12 设备与命令队列
//!
//! # 初始化流程
//!
//! 1. 启用调试层（可选）
//! 2. 创建 DXGI 工厂
//! 3. 枚举适配器，按显存选择（或选择 WARP）
//! 4. 以特性级别 11.0 创建 D3D12 设备
//! 5. 配置信息队列过滤（可选）
//! 6. 检查呈现层是否支持撕裂

use raw_window_handle::RawWindowHandle;
use tracing::{debug, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{CommandQueue, GpuDevice, SwapChainDesc};
use crate::renderer::device::{require_adapter, AdapterInfo, DeviceOptions};

use super::fence::Dx12Fence;
use super::recorder::Dx12Recorder;
use super::swapchain::Dx12SwapChain;
use super::{map_hr, removed_reason, Dx12Backend};

/// DirectX 12 设备
pub struct Dx12Device {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    adapter: AdapterInfo,
    tearing_supported: bool,
}

impl Dx12Device {
    /// 选择适配器并创建设备
    pub fn create(options: DeviceOptions) -> Result<Self> {
        unsafe {
            if options.debug_layer {
                enable_debug_layer();
            }

            let flags = if options.debug_layer {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = CreateDXGIFactory2(flags)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateDXGIFactory2 failed: {}", e)))?;

            let (infos, adapters) = enumerate_adapters(&factory, options.use_software)?;
            let chosen = require_adapter(&infos, options.use_software)?.clone();
            let position = infos
                .iter()
                .position(|a| a.index == chosen.index)
                .ok_or_else(|| GraphicsError::AdapterNotFound(chosen.name.clone()))?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(&adapters[position], D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| GraphicsError::DeviceCreation(format!("D3D12CreateDevice failed: {}", e)))?;
            let device = device
                .ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;

            if options.debug_layer {
                configure_info_queue(&device);
            }

            let tearing_supported = check_tearing_support(&factory);
            info!(adapter = %chosen, tearing = tearing_supported, "D3D12 device created");

            Ok(Self {
                factory,
                device,
                adapter: chosen,
                tearing_supported,
            })
        }
    }

    /// 底层 D3D12 设备
    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }
}

impl GpuDevice<Dx12Backend> for Dx12Device {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn create_command_queue(&self) -> Result<Dx12Queue> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Priority: D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            NodeMask: 0,
        };
        let queue: ID3D12CommandQueue = unsafe { self.device.CreateCommandQueue(&desc) }
            .map_err(|e| map_hr(&self.device, e, "CreateCommandQueue", GraphicsError::ResourceCreation))?;

        Ok(Dx12Queue {
            queue,
            device: self.device.clone(),
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<Dx12Fence> {
        Dx12Fence::new(&self.device, initial_value)
    }

    fn create_recorder(&self) -> Result<Dx12Recorder> {
        Dx12Recorder::new(&self.device)
    }

    fn create_swap_chain(&self, queue: &Dx12Queue, desc: &SwapChainDesc) -> Result<Dx12SwapChain> {
        let hwnd = match desc.window {
            Some(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut std::ffi::c_void),
            _ => {
                return Err(GraphicsError::SwapchainError("a Win32 window handle is required".to_string()).into())
            }
        };

        Dx12SwapChain::new(
            &self.factory,
            &self.device,
            &queue.queue,
            hwnd,
            desc,
            desc.allow_tearing && self.tearing_supported,
        )
    }

    fn check_device_status(&self) -> Result<()> {
        unsafe { self.device.GetDeviceRemovedReason() }
            .map_err(|_| GraphicsError::DeviceLost(removed_reason(&self.device)).into())
    }
}

/// 直接命令队列
pub struct Dx12Queue {
    queue: ID3D12CommandQueue,
    device: ID3D12Device,
}

impl Dx12Queue {
    pub fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl CommandQueue<Dx12Backend> for Dx12Queue {
    fn execute(&self, recorder: &Dx12Recorder) -> Result<()> {
        let lists = [Some(recorder.list().cast::<ID3D12CommandList>().map_err(|e| {
            GraphicsError::CommandExecution(format!("command list cast failed: {}", e))
        })?)];
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe { self.queue.Signal(fence.raw(), value) }
            .map_err(|e| map_hr(&self.device, e, "ID3D12CommandQueue::Signal", GraphicsError::CommandExecution).into())
    }
}

unsafe fn enable_debug_layer() {
    let mut debug: Option<ID3D12Debug> = None;
    match D3D12GetDebugInterface(&mut debug) {
        Ok(()) => {
            if let Some(debug) = debug {
                debug.EnableDebugLayer();
                debug!("DX12 Debug Layer enabled");
            }
        }
        Err(e) => warn!(error = %e, "Failed to enable DX12 Debug Layer"),
    }
}

/// 严重错误时中断，并屏蔽清屏值不匹配等无害消息
unsafe fn configure_info_queue(device: &ID3D12Device) {
    let Ok(info_queue) = device.cast::<ID3D12InfoQueue>() else {
        warn!("ID3D12InfoQueue not available");
        return;
    };

    for severity in [
        D3D12_MESSAGE_SEVERITY_CORRUPTION,
        D3D12_MESSAGE_SEVERITY_ERROR,
        D3D12_MESSAGE_SEVERITY_WARNING,
    ] {
        let _ = info_queue.SetBreakOnSeverity(severity, true);
    }

    let mut severities = [D3D12_MESSAGE_SEVERITY_INFO];
    let mut deny_ids = [
        D3D12_MESSAGE_ID_CLEARRENDERTARGETVIEW_MISMATCHINGCLEARVALUE,
        D3D12_MESSAGE_ID_MAP_INVALID_NULLRANGE,
        D3D12_MESSAGE_ID_UNMAP_INVALID_NULLRANGE,
    ];
    let filter = D3D12_INFO_QUEUE_FILTER {
        DenyList: D3D12_INFO_QUEUE_FILTER_DESC {
            NumSeverities: severities.len() as u32,
            pSeverityList: severities.as_mut_ptr(),
            NumIDs: deny_ids.len() as u32,
            pIDList: deny_ids.as_mut_ptr(),
            ..Default::default()
        },
        ..Default::default()
    };

    match info_queue.PushStorageFilter(&filter) {
        Ok(()) => debug!("Info queue filter installed"),
        Err(e) => warn!(error = %e, "Failed to install info queue filter"),
    }
}

/// 枚举候选适配器
///
/// 请求 WARP 时只返回 WARP 适配器。
unsafe fn enumerate_adapters(factory: &IDXGIFactory4, use_warp: bool) -> Result<(Vec<AdapterInfo>, Vec<IDXGIAdapter1>)> {
    let mut adapters = Vec::new();

    if use_warp {
        let warp: IDXGIAdapter1 = factory
            .EnumWarpAdapter()
            .map_err(|e| GraphicsError::AdapterNotFound(format!("WARP adapter not available: {}", e)))?;
        adapters.push(warp);
    } else {
        let mut index = 0u32;
        loop {
            match factory.EnumAdapters1(index) {
                Ok(adapter) => adapters.push(adapter),
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(GraphicsError::AdapterNotFound(format!("EnumAdapters1({}) failed: {}", index, e)).into())
                }
            }
            index += 1;
        }
    }

    let mut infos = Vec::with_capacity(adapters.len());
    for (index, adapter) in adapters.iter().enumerate() {
        let desc = adapter
            .GetDesc1()
            .map_err(|e| GraphicsError::AdapterNotFound(format!("GetDesc1 failed: {}", e)))?;

        let name_len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        let info = AdapterInfo {
            index: index as u32,
            name: String::from_utf16_lossy(&desc.Description[..name_len]).trim().to_string(),
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
            is_software: use_warp || (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0,
            supports_feature_level: D3D12CreateDevice(
                adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
            .is_ok(),
        };
        debug!(adapter = %info, capable = info.supports_feature_level, "Adapter enumerated");
        infos.push(info);
    }

    Ok((infos, adapters))
}

/// 呈现层是否支持 `DXGI_FEATURE_PRESENT_ALLOW_TEARING`
unsafe fn check_tearing_support(factory: &IDXGIFactory4) -> bool {
    let Ok(factory5) = factory.cast::<IDXGIFactory5>() else {
        return false;
    };

    let mut allow_tearing: i32 = 0;
    factory5
        .CheckFeatureSupport(
            DXGI_FEATURE_PRESENT_ALLOW_TEARING,
            &mut allow_tearing as *mut i32 as *mut std::ffi::c_void,
            std::mem::size_of::<i32>() as u32,
        )
        .is_ok()
        && allow_tearing != 0
}
