//! 呈现表面管理器
//!
//! 拥有交换链和后缓冲集合，负责：
//!
//! - 创建交换链（翻转丢弃模型，呈现层支持时允许撕裂）
//! - 每次呈现后重新查询当前后缓冲索引
//! - 尺寸变化时释放全部后缓冲引用、调整交换链、重新获取后缓冲
//!
//! 重建后缓冲要求 GPU 已经空闲：调用方必须先 flush Fence 同步器，
//! 否则返回 [`ContractViolation::ResizeWithoutFlush`]。

use std::sync::Arc;

use raw_window_handle::RawWindowHandle;
use tracing::{debug, info};

use crate::core::config::BACK_BUFFER_RANGE;
use crate::core::error::{ContractViolation, Result};
use crate::renderer::backend_trait::{GpuBackend, GpuDevice, SwapChain, SwapChainDesc};
use crate::renderer::sync::FenceSynchronizer;

/// 呈现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentMode {
    /// 立即呈现，允许撕裂
    Immediate,
    /// 等待一次垂直同步
    Vsync,
}

/// 后缓冲集合
///
/// `generation` 在每次重建后加一，用于识别过期引用。
pub struct BackBufferSet<T> {
    buffers: Vec<T>,
    generation: u64,
}

impl<T> BackBufferSet<T> {
    fn empty(generation: u64) -> Self {
        Self { buffers: Vec::new(), generation }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.buffers.get(index as usize)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct LiveSurface<B: GpuBackend> {
    swap_chain: B::SwapChain,
    back_buffers: BackBufferSet<B::BackBuffer>,
    width: u32,
    height: u32,
    buffer_count: u32,
}

/// 呈现表面管理器
pub struct PresentationSurfaceManager<B: GpuBackend> {
    queue: Arc<B::Queue>,
    window: Option<RawWindowHandle>,
    surface: Option<LiveSurface<B>>,
    generation: u64,
}

impl<B: GpuBackend> PresentationSurfaceManager<B> {
    /// 创建管理器；交换链在第一次 `create_or_resize` 时创建
    pub fn new(queue: Arc<B::Queue>, window: Option<RawWindowHandle>) -> Self {
        Self {
            queue,
            window,
            surface: None,
            generation: 0,
        }
    }

    /// 交换链是否已经创建
    pub fn is_created(&self) -> bool {
        self.surface.is_some()
    }

    /// 当前后缓冲尺寸
    pub fn extent(&self) -> Option<(u32, u32)> {
        self.surface.as_ref().map(|s| (s.width, s.height))
    }

    /// 后缓冲数量
    pub fn buffer_count(&self) -> Option<u32> {
        self.surface.as_ref().map(|s| s.buffer_count)
    }

    /// 后缓冲代数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 呈现层是否支持撕裂
    pub fn tearing_supported(&self) -> bool {
        self.surface
            .as_ref()
            .map_or(false, |s| s.swap_chain.tearing_supported())
    }

    /// 底层交换链
    pub fn swap_chain(&self) -> Option<&B::SwapChain> {
        self.surface.as_ref().map(|s| &s.swap_chain)
    }

    /// 创建交换链，或按新尺寸重建后缓冲
    ///
    /// 宽高会被钳制到至少 1。调用前 `sync` 上所有令牌必须已经完成。
    pub fn create_or_resize(
        &mut self,
        device: &B::Device,
        sync: &FenceSynchronizer<B>,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> Result<()> {
        if !BACK_BUFFER_RANGE.contains(&buffer_count) {
            return Err(ContractViolation::InvalidArgument(format!(
                "back buffer count must be within {:?}, got {}",
                BACK_BUFFER_RANGE, buffer_count
            ))
            .into());
        }

        let completed = sync.completed_value()?;
        let signaled = sync.last_signaled().value();
        if completed < signaled {
            return Err(ContractViolation::ResizeWithoutFlush { signaled, completed }.into());
        }

        let width = width.max(1);
        let height = height.max(1);

        match self.surface.as_mut() {
            Some(live) => {
                // 调整之前先释放全部后缓冲引用
                live.back_buffers = BackBufferSet::empty(live.back_buffers.generation);
                live.swap_chain.resize_buffers(width, height, buffer_count)?;

                self.generation += 1;
                live.back_buffers = BackBufferSet {
                    buffers: live.swap_chain.acquire_back_buffers(buffer_count)?,
                    generation: self.generation,
                };
                live.width = width;
                live.height = height;
                live.buffer_count = buffer_count;

                info!(width, height, buffer_count, generation = self.generation, "Back buffers recreated");
            }
            None => {
                let desc = SwapChainDesc {
                    width,
                    height,
                    buffer_count,
                    allow_tearing: true,
                    window: self.window,
                };
                let mut swap_chain = device.create_swap_chain(&self.queue, &desc)?;

                self.generation += 1;
                let back_buffers = BackBufferSet {
                    buffers: swap_chain.acquire_back_buffers(buffer_count)?,
                    generation: self.generation,
                };

                info!(
                    width,
                    height,
                    buffer_count,
                    tearing = swap_chain.tearing_supported(),
                    "Swap chain created"
                );

                self.surface = Some(LiveSurface {
                    swap_chain,
                    back_buffers,
                    width,
                    height,
                    buffer_count,
                });
            }
        }

        Ok(())
    }

    /// 平台当前认为应当渲染的后缓冲索引
    pub fn current_index(&self) -> Result<u32> {
        Ok(self.live()?.swap_chain.current_back_buffer_index())
    }

    /// 当前后缓冲
    pub fn current_back_buffer(&self) -> Result<&B::BackBuffer> {
        let live = self.live()?;
        let index = live.swap_chain.current_back_buffer_index();
        live.back_buffers.get(index).ok_or_else(|| {
            ContractViolation::InvalidArgument(format!(
                "back buffer index {} out of range ({} buffers)",
                index,
                live.back_buffers.len()
            ))
            .into()
        })
    }

    /// 呈现当前后缓冲
    ///
    /// `vsync_intervals` 只能是 0 或 1。0 在支持撕裂时立即呈现，否则退化为 1。
    pub fn present(&mut self, vsync_intervals: u32) -> Result<PresentMode> {
        if vsync_intervals > 1 {
            return Err(ContractViolation::InvalidArgument(format!(
                "vsync interval must be 0 or 1, got {}",
                vsync_intervals
            ))
            .into());
        }

        let live = self.live_mut()?;
        let immediate = vsync_intervals == 0 && live.swap_chain.tearing_supported();
        let (interval, mode) = if immediate {
            (0, PresentMode::Immediate)
        } else {
            (1, PresentMode::Vsync)
        };

        live.swap_chain.present(interval, immediate)?;
        debug!(
            next_index = live.swap_chain.current_back_buffer_index(),
            ?mode,
            "Presented"
        );
        Ok(mode)
    }

    /// 释放交换链和后缓冲（关闭时在 flush 之后调用）
    pub fn release(&mut self) {
        if self.surface.take().is_some() {
            debug!("Presentation surface released");
        }
    }

    fn live(&self) -> Result<&LiveSurface<B>> {
        self.surface
            .as_ref()
            .ok_or_else(|| ContractViolation::SurfaceNotCreated.into())
    }

    fn live_mut(&mut self) -> Result<&mut LiveSurface<B>> {
        self.surface
            .as_mut()
            .ok_or_else(|| ContractViolation::SurfaceNotCreated.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{SimBackend, SimDevice, TimelineSettings};
    use crate::renderer::backend_trait::{CommandQueue, CommandRecorder};
    use crate::renderer::device::DeviceContext;

    fn setup(tearing: bool) -> (DeviceContext<SimBackend>, FenceSynchronizer<SimBackend>, PresentationSurfaceManager<SimBackend>) {
        let device = SimDevice::single_adapter(TimelineSettings::stepped(2, 1))
            .unwrap()
            .with_tearing_support(tearing);
        let context = DeviceContext::<SimBackend>::new(device).unwrap();
        let sync = FenceSynchronizer::new(context.device(), context.queue().clone()).unwrap();
        let surface = PresentationSurfaceManager::new(context.queue().clone(), None);
        (context, sync, surface)
    }

    #[test]
    fn test_not_created() {
        let (_context, _sync, mut surface) = setup(true);
        assert!(!surface.is_created());
        assert!(surface.current_index().is_err());
        assert!(surface.present(1).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_index_requeried_after_present() {
        let (context, sync, mut surface) = setup(true);
        surface.create_or_resize(context.device(), &sync, 1024, 768, 3).unwrap();
        assert_eq!(surface.extent(), Some((1024, 768)));

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(surface.current_index().unwrap());
            surface.present(1).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
        assert_eq!(surface.current_back_buffer().unwrap().index(), 1);
    }

    #[test]
    fn test_immediate_present_falls_back_without_tearing() {
        let (context, sync, mut surface) = setup(false);
        surface.create_or_resize(context.device(), &sync, 640, 480, 2).unwrap();
        assert!(!surface.tearing_supported());
        assert_eq!(surface.present(0).unwrap(), PresentMode::Vsync);

        let (context, sync, mut surface) = setup(true);
        surface.create_or_resize(context.device(), &sync, 640, 480, 2).unwrap();
        assert_eq!(surface.present(0).unwrap(), PresentMode::Immediate);
        assert_eq!(surface.present(1).unwrap(), PresentMode::Vsync);

        let records = surface.swap_chain().unwrap().presents();
        assert_eq!(records[0].sync_interval, 0);
        assert!(records[0].allow_tearing);
        assert!(!records[1].allow_tearing);
        assert!(surface.present(2).is_err());
    }

    #[test]
    fn test_resize_requires_flush() {
        let (context, sync, mut surface) = setup(true);
        surface.create_or_resize(context.device(), &sync, 800, 600, 3).unwrap();

        let mut recorder = context.device().create_recorder().unwrap();
        recorder.reset().unwrap();
        let target = surface.current_back_buffer().unwrap().clone();
        recorder.clear_render_target(&target, [0.0; 4]).unwrap();
        recorder.close().unwrap();
        context.queue().execute(&recorder).unwrap();
        sync.signal().unwrap();

        let err = surface.create_or_resize(context.device(), &sync, 1280, 720, 3).unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::DistFrameError::Contract(ContractViolation::ResizeWithoutFlush { .. })
        ));
        assert_eq!(surface.extent(), Some((800, 600)));

        sync.flush().unwrap();
        surface.create_or_resize(context.device(), &sync, 1280, 720, 3).unwrap();
        assert_eq!(surface.extent(), Some((1280, 720)));
        assert_eq!(surface.current_index().unwrap(), 0);
        assert_eq!(surface.current_back_buffer().unwrap().generation(), 1);
        assert!(context.device().timeline().violations().is_empty());
    }

    #[test]
    fn test_zero_extent_clamped_and_buffer_count_checked() {
        let (context, sync, mut surface) = setup(true);
        surface.create_or_resize(context.device(), &sync, 0, 0, 2).unwrap();
        assert_eq!(surface.extent(), Some((1, 1)));
        assert!(surface.create_or_resize(context.device(), &sync, 10, 10, 1).is_err());
        assert!(surface.create_or_resize(context.device(), &sync, 10, 10, 17).is_err());

        surface.create_or_resize(context.device(), &sync, 10, 10, 4).unwrap();
        assert_eq!(surface.buffer_count(), Some(4));
        assert_eq!(surface.generation(), 2);
    }
}
