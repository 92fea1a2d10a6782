//! DirectX 12 命令分配器 + 图形命令列表

use std::mem::ManuallyDrop;

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{CommandRecorder, ResourceState};

use super::{map_hr, Dx12BackBuffer, Dx12Backend};

/// 每个帧槽位一组：一个分配器和一个绑定到它的命令列表
pub struct Dx12Recorder {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    device: ID3D12Device,
    recording: bool,
}

impl Dx12Recorder {
    pub(super) fn new(device: &ID3D12Device) -> Result<Self> {
        unsafe {
            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| map_hr(device, e, "CreateCommandAllocator", GraphicsError::ResourceCreation))?;

            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(|e| map_hr(device, e, "CreateCommandList", GraphicsError::ResourceCreation))?;

            // 列表创建后处于记录状态，先关闭，第一次 reset 时再打开
            list.Close()
                .map_err(|e| map_hr(device, e, "ID3D12GraphicsCommandList::Close", GraphicsError::ResourceCreation))?;

            Ok(Self {
                allocator,
                list,
                device: device.clone(),
                recording: false,
            })
        }
    }

    pub(super) fn list(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    fn ensure_recording(&self, what: &str) -> Result<()> {
        if self.recording {
            Ok(())
        } else {
            Err(GraphicsError::CommandExecution(format!("{} recorded on a closed command list", what)).into())
        }
    }
}

fn d3d12_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
    }
}

fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // 借用而不增加引用计数；屏障只在本次调用期间使用
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

impl CommandRecorder<Dx12Backend> for Dx12Recorder {
    fn reset(&mut self) -> Result<()> {
        unsafe {
            self.allocator
                .Reset()
                .map_err(|e| map_hr(&self.device, e, "ID3D12CommandAllocator::Reset", GraphicsError::CommandExecution))?;
            self.list
                .Reset(&self.allocator, None)
                .map_err(|e| map_hr(&self.device, e, "ID3D12GraphicsCommandList::Reset", GraphicsError::CommandExecution))?;
        }
        self.recording = true;
        Ok(())
    }

    fn transition(&mut self, target: &Dx12BackBuffer, before: ResourceState, after: ResourceState) -> Result<()> {
        self.ensure_recording("transition")?;
        let barrier = transition_barrier(target.resource(), d3d12_state(before), d3d12_state(after));
        unsafe { self.list.ResourceBarrier(&[barrier]) };
        Ok(())
    }

    fn clear_render_target(&mut self, target: &Dx12BackBuffer, color: [f32; 4]) -> Result<()> {
        self.ensure_recording("clear")?;
        unsafe { self.list.ClearRenderTargetView(target.rtv(), &color, None) };
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_recording("close")?;
        unsafe { self.list.Close() }
            .map_err(|e| map_hr(&self.device, e, "ID3D12GraphicsCommandList::Close", GraphicsError::CommandExecution))?;
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}
