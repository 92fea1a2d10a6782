//! 模拟交换链

use std::sync::Arc;

use tracing::debug;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{SwapChain, SwapChainDesc};

use super::{SimBackend, SimTimeline};

/// 模拟后缓冲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBackBuffer {
    index: u32,
    generation: u64,
    width: u32,
    height: u32,
}

impl SimBackBuffer {
    /// 在交换链中的索引
    pub fn index(&self) -> u32 {
        self.index
    }

    /// 所属的缓冲代数，每次 `resize_buffers` 加一
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// 一次呈现的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub buffer_index: u32,
    pub sync_interval: u32,
    pub allow_tearing: bool,
}

/// 模拟交换链
///
/// 翻转丢弃模型：每次呈现后当前索引前进一位。
pub struct SimSwapChain {
    timeline: Arc<SimTimeline>,
    width: u32,
    height: u32,
    buffer_count: u32,
    current: u32,
    generation: u64,
    created_with_tearing: bool,
    presents: Vec<PresentRecord>,
}

impl SimSwapChain {
    pub(super) fn new(timeline: Arc<SimTimeline>, desc: &SwapChainDesc, tearing_supported: bool) -> Self {
        Self {
            timeline,
            width: desc.width,
            height: desc.height,
            buffer_count: desc.buffer_count,
            current: 0,
            generation: 0,
            created_with_tearing: desc.allow_tearing && tearing_supported,
            presents: Vec::new(),
        }
    }

    /// 后缓冲尺寸
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// 当前缓冲代数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 全部呈现记录
    pub fn presents(&self) -> &[PresentRecord] {
        &self.presents
    }
}

impl SwapChain<SimBackend> for SimSwapChain {
    fn tearing_supported(&self) -> bool {
        self.created_with_tearing
    }

    fn resize_buffers(&mut self, width: u32, height: u32, buffer_count: u32) -> Result<()> {
        self.timeline.check_buffers_released()?;

        self.width = width;
        self.height = height;
        self.buffer_count = buffer_count;
        self.generation += 1;
        self.current = 0;

        debug!(width, height, buffer_count, generation = self.generation, "Simulated swap chain resized");
        Ok(())
    }

    fn acquire_back_buffers(&mut self, buffer_count: u32) -> Result<Vec<SimBackBuffer>> {
        if buffer_count != self.buffer_count {
            return Err(GraphicsError::SwapchainError(format!(
                "requested {} back buffers but the swap chain has {}",
                buffer_count, self.buffer_count
            ))
            .into());
        }

        Ok((0..buffer_count)
            .map(|index| SimBackBuffer {
                index,
                generation: self.generation,
                width: self.width,
                height: self.height,
            })
            .collect())
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> Result<()> {
        self.timeline.device_status()?;

        if allow_tearing && (!self.created_with_tearing || sync_interval != 0) {
            return Err(GraphicsError::SwapchainError(
                "DXGI_PRESENT_ALLOW_TEARING is invalid for this swap chain".to_string(),
            )
            .into());
        }

        self.presents.push(PresentRecord {
            buffer_index: self.current,
            sync_interval,
            allow_tearing,
        });
        self.current = (self.current + 1) % self.buffer_count.max(1);
        Ok(())
    }
}
