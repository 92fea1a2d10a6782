//! DirectX 12 交换链与渲染目标视图

use tracing::debug;
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::config::BACK_BUFFER_RANGE;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{SwapChain, SwapChainDesc};

use super::{map_hr, Dx12Backend};

const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// 后缓冲资源及其 RTV
pub struct Dx12BackBuffer {
    resource: ID3D12Resource,
    rtv: D3D12_CPU_DESCRIPTOR_HANDLE,
    index: u32,
}

impl Dx12BackBuffer {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn rtv(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        self.rtv
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

/// RTV 描述符堆
///
/// 按最大后缓冲数量分配，调整缓冲数量时无需重建。
struct RtvHeap {
    heap: ID3D12DescriptorHeap,
    increment_size: usize,
    capacity: u32,
}

impl RtvHeap {
    fn new(device: &ID3D12Device, capacity: u32) -> Result<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            NumDescriptors: capacity,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&desc)
                .map_err(|e| map_hr(device, e, "CreateDescriptorHeap(RTV)", GraphicsError::ResourceCreation))?;
            let increment_size = device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;

            Ok(Self {
                heap,
                increment_size,
                capacity,
            })
        }
    }

    fn cpu_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + index as usize * self.increment_size,
        }
    }
}

/// 翻转丢弃交换链
pub struct Dx12SwapChain {
    swap_chain: IDXGISwapChain4,
    device: ID3D12Device,
    rtv_heap: RtvHeap,
    tearing: bool,
}

impl Dx12SwapChain {
    pub(super) fn new(
        factory: &IDXGIFactory4,
        device: &ID3D12Device,
        queue: &ID3D12CommandQueue,
        hwnd: HWND,
        desc: &SwapChainDesc,
        tearing: bool,
    ) -> Result<Self> {
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: BACK_BUFFER_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: if tearing { DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32 } else { 0 },
            ..Default::default()
        };

        unsafe {
            let swap_chain: IDXGISwapChain1 = factory
                .CreateSwapChainForHwnd(queue, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| map_hr(device, e, "CreateSwapChainForHwnd", GraphicsError::SwapchainError))?;
            let swap_chain: IDXGISwapChain4 = swap_chain
                .cast()
                .map_err(|e| GraphicsError::SwapchainError(format!("IDXGISwapChain4 not available: {}", e)))?;

            // 全屏切换由窗口层处理
            factory
                .MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)
                .map_err(|e| GraphicsError::SwapchainError(format!("MakeWindowAssociation failed: {}", e)))?;

            Ok(Self {
                swap_chain,
                device: device.clone(),
                rtv_heap: RtvHeap::new(device, *BACK_BUFFER_RANGE.end())?,
                tearing,
            })
        }
    }
}

impl SwapChain<Dx12Backend> for Dx12SwapChain {
    fn tearing_supported(&self) -> bool {
        self.tearing
    }

    fn resize_buffers(&mut self, width: u32, height: u32, buffer_count: u32) -> Result<()> {
        unsafe {
            let desc = self
                .swap_chain
                .GetDesc1()
                .map_err(|e| map_hr(&self.device, e, "IDXGISwapChain::GetDesc1", GraphicsError::SwapchainError))?;

            self.swap_chain
                .ResizeBuffers(
                    buffer_count,
                    width,
                    height,
                    DXGI_FORMAT_UNKNOWN,
                    DXGI_SWAP_CHAIN_FLAG(desc.Flags as i32),
                )
                .map_err(|e| map_hr(&self.device, e, "ResizeBuffers", GraphicsError::SwapchainError))?;
        }

        debug!(width, height, buffer_count, "Swap chain buffers resized");
        Ok(())
    }

    fn acquire_back_buffers(&mut self, buffer_count: u32) -> Result<Vec<Dx12BackBuffer>> {
        if buffer_count > self.rtv_heap.capacity {
            return Err(GraphicsError::SwapchainError(format!(
                "{} back buffers exceed RTV heap capacity {}",
                buffer_count, self.rtv_heap.capacity
            ))
            .into());
        }

        (0..buffer_count)
            .map(|index| unsafe {
                let resource: ID3D12Resource = self
                    .swap_chain
                    .GetBuffer(index)
                    .map_err(|e| map_hr(&self.device, e, "IDXGISwapChain::GetBuffer", GraphicsError::SwapchainError))?;
                let rtv = self.rtv_heap.cpu_handle(index);
                self.device.CreateRenderTargetView(&resource, None, rtv);
                Ok(Dx12BackBuffer { resource, rtv, index })
            })
            .collect()
    }

    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> Result<()> {
        let flags = if allow_tearing { DXGI_PRESENT_ALLOW_TEARING } else { DXGI_PRESENT(0) };
        unsafe { self.swap_chain.Present(sync_interval, flags) }
            .ok()
            .map_err(|e| map_hr(&self.device, e, "IDXGISwapChain::Present", GraphicsError::SwapchainError).into())
    }
}
