//! 渲染上下文
//!
//! 把设备上下文、Fence 同步器、帧资源环和呈现表面管理器组合成一个显式对象，
//! 驱动每帧的固定流程：
//!
//! ```text
//! begin_frame ─► 记录命令 ─► 关闭 ─► 提交 ─► signal ─► end_frame(token) ─► present
//! ```
//!
//! 尺寸变化时先 flush 再重建后缓冲；销毁前 flush，保证 GPU 不再引用任何对象。

use std::time::{Duration, Instant};

use raw_window_handle::RawWindowHandle;
use tracing::{debug, error, info, warn};

use crate::core::config::Config;
use crate::core::error::{ContractViolation, DistFrameError, GraphicsError, Result};
use crate::core::event::SurfaceEvent;
use crate::renderer::backend_trait::{CommandQueue, CommandRecorder, GpuBackend, GpuDevice};
use crate::renderer::content::{CommandContent, FrameInfo};
use crate::renderer::device::{AdapterInfo, DeviceContext};
use crate::renderer::frame::{FrameHandle, FrameResourceRing};
use crate::renderer::metrics::FrameMetrics;
use crate::renderer::present::{PresentMode, PresentationSurfaceManager};
use crate::renderer::sync::{CompletionToken, FenceSynchronizer};

/// 帧循环参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub frames_in_flight: usize,
    pub back_buffer_count: u32,
    pub vsync: bool,
    pub fullscreen: bool,
    /// `begin_frame` 的等待上限；`None` 表示无限等待
    pub stall_timeout: Option<Duration>,
    /// 连续停滞超过该次数后视为设备丢失
    pub max_stall_retries: u32,
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frames_in_flight: config.graphics.frames_in_flight,
            back_buffer_count: config.graphics.back_buffer_count,
            vsync: config.graphics.vsync,
            fullscreen: false,
            stall_timeout: Some(config.stall_timeout()),
            max_stall_retries: config.graphics.max_stall_retries,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一次 `render_frame` 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// 帧已提交并呈现
    Presented {
        frame: u64,
        slot: usize,
        back_buffer: u32,
        token: CompletionToken,
        mode: PresentMode,
    },
    /// 等待超时，本帧跳过
    Stalled { consecutive: u32 },
}

/// 表面事件处理后需要窗口层配合的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceResponse {
    Continue,
    /// 窗口层应切换到给定的全屏状态
    FullscreenChanged(bool),
    Exit,
}

/// 渲染上下文
pub struct RenderContext<B: GpuBackend> {
    settings: RenderSettings,
    metrics: FrameMetrics,
    consecutive_stalls: u32,
    closed: bool,
    // 字段按声明顺序释放：表面和帧资源先于同步器与设备
    surface: PresentationSurfaceManager<B>,
    ring: FrameResourceRing<B>,
    sync: FenceSynchronizer<B>,
    device: DeviceContext<B>,
}

impl<B: GpuBackend> RenderContext<B> {
    /// 建立完整的帧循环并创建交换链
    pub fn new(
        device: B::Device,
        window: Option<RawWindowHandle>,
        settings: RenderSettings,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let device = DeviceContext::<B>::new(device)?;
        let sync = FenceSynchronizer::new(device.device(), device.queue().clone())?;
        let ring = FrameResourceRing::new(device.device(), settings.frames_in_flight)?;

        let mut surface = PresentationSurfaceManager::new(device.queue().clone(), window);
        surface.create_or_resize(device.device(), &sync, width, height, settings.back_buffer_count)?;

        info!(
            backend = B::NAME,
            frames_in_flight = settings.frames_in_flight,
            back_buffers = settings.back_buffer_count,
            vsync = settings.vsync,
            "Render context ready"
        );

        Ok(Self {
            settings,
            metrics: FrameMetrics::new(),
            consecutive_stalls: 0,
            closed: false,
            surface,
            ring,
            sync,
            device,
        })
    }

    /// 渲染一帧
    pub fn render_frame<C>(&mut self, content: &mut C) -> Result<FrameOutcome>
    where
        C: CommandContent<B> + ?Sized,
    {
        if !self.surface.is_created() {
            return Err(ContractViolation::SurfaceNotCreated.into());
        }

        let wait_start = Instant::now();
        let handle = match self.ring.begin_frame(&self.sync, self.settings.stall_timeout) {
            Ok(handle) => handle,
            Err(e) if e.is_stall() => return self.on_stall(e),
            Err(e) => return Err(e),
        };
        self.consecutive_stalls = 0;
        self.metrics.record_wait(wait_start.elapsed());

        let info = FrameInfo {
            frame: handle.frame(),
            slot: handle.slot(),
            back_buffer: self.surface.current_index()?,
        };

        if let Err(e) = record_commands(&mut self.ring, &self.surface, &handle, content, &info) {
            error!(frame = info.frame, error = %e, "Command recording failed");
            self.ring.abandon_frame(handle)?;
            return Err(e);
        }

        if let Err(e) = self.device.queue().execute(self.ring.recorder(&handle)?) {
            error!(frame = info.frame, error = %e, "Command list submission failed");
            self.ring.abandon_frame(handle)?;
            return Err(e);
        }

        // 信号失败意味着设备已不可用：释放槽位但不记录令牌，后续调用直接报告设备丢失
        let token = match self.sync.signal() {
            Ok(token) => token,
            Err(e) => {
                error!(frame = info.frame, error = %e, "Fence signal failed after submission");
                self.ring.abandon_frame(handle)?;
                return Err(e);
            }
        };
        self.ring.end_frame(handle, token)?;

        let mode = self.surface.present(if self.settings.vsync { 1 } else { 0 })?;

        if let Some(snapshot) = self.metrics.record_frame() {
            info!(
                fps = snapshot.fps,
                frame_time_ms = snapshot.frame_time_ms,
                gpu_wait_ms = snapshot.avg_wait_ms,
                "Frame statistics"
            );
        }

        Ok(FrameOutcome::Presented {
            frame: info.frame,
            slot: info.slot,
            back_buffer: info.back_buffer,
            token,
            mode,
        })
    }

    fn on_stall(&mut self, stall: DistFrameError) -> Result<FrameOutcome> {
        self.consecutive_stalls += 1;
        self.metrics.record_stall();
        self.device.device().check_device_status()?;

        if self.consecutive_stalls > self.settings.max_stall_retries {
            error!(
                consecutive = self.consecutive_stalls,
                error = %stall,
                "GPU made no progress, treating device as lost"
            );
            return Err(GraphicsError::DeviceLost(format!(
                "no GPU progress after {} consecutive stalls",
                self.consecutive_stalls
            ))
            .into());
        }

        warn!(consecutive = self.consecutive_stalls, error = %stall, "GPU stall, frame skipped");
        Ok(FrameOutcome::Stalled {
            consecutive: self.consecutive_stalls,
        })
    }

    /// 处理窗口层发来的事件
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) -> Result<SurfaceResponse> {
        debug!(%event, "Surface event");
        match event {
            SurfaceEvent::Resized { width, height } => {
                self.resize(width, height)?;
                Ok(SurfaceResponse::Continue)
            }
            SurfaceEvent::ToggleFullscreen => {
                self.settings.fullscreen = !self.settings.fullscreen;
                info!(fullscreen = self.settings.fullscreen, "Fullscreen toggled");
                Ok(SurfaceResponse::FullscreenChanged(self.settings.fullscreen))
            }
            SurfaceEvent::ToggleVsync => {
                self.settings.vsync = !self.settings.vsync;
                info!(vsync = self.settings.vsync, "V-Sync toggled");
                Ok(SurfaceResponse::Continue)
            }
            SurfaceEvent::CloseRequested => Ok(SurfaceResponse::Exit),
        }
    }

    /// 按新的客户区尺寸重建后缓冲
    ///
    /// 宽或高为 0（最小化）时忽略。返回是否真的重建了。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 {
            debug!(width, height, "Ignoring zero-sized resize");
            return Ok(false);
        }
        if self.surface.extent() == Some((width, height)) {
            return Ok(false);
        }
        if let Some(active_slot) = self.ring.active_slot() {
            return Err(ContractViolation::ResizeDuringFrame { active_slot }.into());
        }

        self.sync.flush()?;
        self.surface.create_or_resize(
            self.device.device(),
            &self.sync,
            width,
            height,
            self.settings.back_buffer_count,
        )?;
        Ok(true)
    }

    /// 等待 GPU 完成全部已提交的工作
    pub fn flush(&self) -> Result<CompletionToken> {
        self.sync.flush()
    }

    /// flush 后释放交换链
    pub fn shutdown(mut self) -> Result<()> {
        self.closed = true;
        let token = self.sync.flush()?;
        self.surface.release();
        info!(
            frames = self.ring.frame_counter(),
            last_token = token.value(),
            stalls = self.metrics.stalls(),
            "Render context shut down"
        );
        Ok(())
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &FrameMetrics {
        &self.metrics
    }

    pub fn adapter(&self) -> &AdapterInfo {
        self.device.adapter()
    }

    pub fn device_context(&self) -> &DeviceContext<B> {
        &self.device
    }

    pub fn synchronizer(&self) -> &FenceSynchronizer<B> {
        &self.sync
    }

    pub fn frame_ring(&self) -> &FrameResourceRing<B> {
        &self.ring
    }

    pub fn surface(&self) -> &PresentationSurfaceManager<B> {
        &self.surface
    }
}

impl<B: GpuBackend> Drop for RenderContext<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.sync.flush() {
            warn!(error = %e, "Flush before teardown failed");
        }
        self.surface.release();
    }
}

fn record_commands<B, C>(
    ring: &mut FrameResourceRing<B>,
    surface: &PresentationSurfaceManager<B>,
    handle: &FrameHandle,
    content: &mut C,
    info: &FrameInfo,
) -> Result<()>
where
    B: GpuBackend,
    C: CommandContent<B> + ?Sized,
{
    let target = surface.current_back_buffer()?;
    let recorder = ring.recorder_mut(handle)?;
    content.record(recorder, target, info)?;
    recorder.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{SimBackend, SimDevice, SimRecorder, SimBackBuffer, TimelineSettings};
    use crate::renderer::content::ClearPass;

    fn settings() -> RenderSettings {
        RenderSettings {
            frames_in_flight: 3,
            back_buffer_count: 3,
            vsync: true,
            fullscreen: false,
            stall_timeout: None,
            max_stall_retries: 2,
        }
    }

    fn context(timeline: TimelineSettings, settings: RenderSettings) -> RenderContext<SimBackend> {
        let device = SimDevice::single_adapter(timeline).unwrap();
        RenderContext::new(device, None, settings, 1024, 768).unwrap()
    }

    #[test]
    fn test_frames_present_in_order() {
        let mut ctx = context(TimelineSettings::stepped(2, 1), settings());
        let mut pass = ClearPass::default();

        for expected in 0..10u64 {
            match ctx.render_frame(&mut pass).unwrap() {
                FrameOutcome::Presented { frame, slot, back_buffer, token, mode } => {
                    assert_eq!(frame, expected);
                    assert_eq!(slot, (expected % 3) as usize);
                    assert_eq!(back_buffer, (expected % 3) as u32);
                    assert_eq!(token.value(), expected + 1);
                    assert_eq!(mode, PresentMode::Vsync);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        let timeline = ctx.device_context().device().timeline().clone();
        ctx.shutdown().unwrap();
        assert!(timeline.is_idle());
        assert_eq!(timeline.executed_batches(), 10);
        assert_eq!(timeline.executed_commands(), 30);
        assert!(timeline.violations().is_empty());
    }

    #[test]
    fn test_resize_flushes_before_recreating() {
        let mut ctx = context(TimelineSettings::stepped(5, 1), settings());
        let mut pass = ClearPass::default();
        for _ in 0..5 {
            ctx.render_frame(&mut pass).unwrap();
        }

        let response = ctx
            .handle_surface_event(SurfaceEvent::Resized { width: 1920, height: 1080 })
            .unwrap();
        assert_eq!(response, SurfaceResponse::Continue);
        assert_eq!(ctx.surface().extent(), Some((1920, 1080)));
        assert!(ctx.synchronizer().is_idle().unwrap());

        // 重建后第一帧不需要等待
        let waits = ctx.synchronizer().blocking_waits();
        ctx.render_frame(&mut pass).unwrap();
        assert_eq!(ctx.synchronizer().blocking_waits(), waits);
        assert!(ctx.device_context().device().timeline().violations().is_empty());
    }

    #[test]
    fn test_zero_and_unchanged_sizes_ignored() {
        let mut ctx = context(TimelineSettings::stepped(1, 1), settings());
        let generation = ctx.surface().generation();
        assert!(!ctx.resize(0, 600).unwrap());
        assert!(!ctx.resize(1024, 768).unwrap());
        assert_eq!(ctx.surface().generation(), generation);
    }

    #[test]
    fn test_toggles() {
        let mut ctx = context(TimelineSettings::stepped(1, 1), settings());
        let mut pass = ClearPass::default();

        ctx.handle_surface_event(SurfaceEvent::ToggleVsync).unwrap();
        match ctx.render_frame(&mut pass).unwrap() {
            FrameOutcome::Presented { mode, .. } => assert_eq!(mode, PresentMode::Immediate),
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(
            ctx.handle_surface_event(SurfaceEvent::ToggleFullscreen).unwrap(),
            SurfaceResponse::FullscreenChanged(true)
        );
        assert_eq!(
            ctx.handle_surface_event(SurfaceEvent::CloseRequested).unwrap(),
            SurfaceResponse::Exit
        );
    }

    #[test]
    fn test_repeated_stalls_become_device_lost() {
        let settings = RenderSettings {
            stall_timeout: Some(Duration::from_millis(1)),
            ..settings()
        };
        let mut ctx = context(TimelineSettings::stepped(10_000, 0), settings);
        let mut pass = ClearPass::default();

        for _ in 0..3 {
            assert!(matches!(ctx.render_frame(&mut pass).unwrap(), FrameOutcome::Presented { .. }));
        }
        assert_eq!(ctx.render_frame(&mut pass).unwrap(), FrameOutcome::Stalled { consecutive: 1 });
        assert_eq!(ctx.render_frame(&mut pass).unwrap(), FrameOutcome::Stalled { consecutive: 2 });
        assert!(ctx.render_frame(&mut pass).unwrap_err().is_device_lost());
        assert_eq!(ctx.metrics().stalls(), 3);
    }

    #[test]
    fn test_device_removal_surfaces_on_next_frame() {
        let mut ctx = context(TimelineSettings::stepped(1, 1), settings());
        let mut pass = ClearPass::default();
        ctx.render_frame(&mut pass).unwrap();

        ctx.device_context().device().timeline().remove_device("DXGI_ERROR_DEVICE_HUNG");
        assert!(ctx.render_frame(&mut pass).unwrap_err().is_device_lost());
    }

    #[test]
    fn test_lost_signal_releases_frame() {
        let mut ctx = context(TimelineSettings::stepped(1, 1), settings());
        let mut pass = ClearPass::default();
        ctx.render_frame(&mut pass).unwrap();

        // 执行批次被接受，紧随其后的信号失败
        ctx.device_context()
            .device()
            .timeline()
            .remove_device_after(1, "DXGI_ERROR_DEVICE_REMOVED");
        assert!(ctx.render_frame(&mut pass).unwrap_err().is_device_lost());
        assert!(!ctx.frame_ring().is_frame_active());
        assert_eq!(ctx.frame_ring().frame_counter(), 1);

        let next = ctx.render_frame(&mut pass).unwrap_err();
        assert!(next.is_device_lost());
        assert!(!next.is_contract_violation());
        let resize = ctx.resize(640, 480).unwrap_err();
        assert!(resize.is_device_lost());
    }

    #[test]
    fn test_resize_during_frame_names_active_slot() {
        let mut ctx = context(TimelineSettings::stepped(1, 1), settings());
        let mut pass = ClearPass::default();
        ctx.render_frame(&mut pass).unwrap();

        let handle = ctx.ring.begin_frame(&ctx.sync, None).unwrap();
        let err = ctx.resize(640, 480).unwrap_err();
        assert!(err.is_contract_violation());
        assert!(matches!(
            err,
            DistFrameError::Contract(ContractViolation::ResizeDuringFrame { active_slot: 1 })
        ));
        assert!(err.to_string().contains("resize requested while slot 1"));

        ctx.ring.abandon_frame(handle).unwrap();
        assert!(ctx.resize(640, 480).unwrap());
    }

    struct FailingContent;

    impl CommandContent<SimBackend> for FailingContent {
        fn record(&mut self, _recorder: &mut SimRecorder, _target: &SimBackBuffer, _frame: &FrameInfo) -> Result<()> {
            Err(GraphicsError::CommandExecution("pipeline missing".to_string()).into())
        }
    }

    #[test]
    fn test_failed_recording_releases_frame() {
        let mut ctx = context(TimelineSettings::stepped(1, 1), settings());
        assert!(ctx.render_frame(&mut FailingContent).is_err());
        assert!(!ctx.frame_ring().is_frame_active());
        assert_eq!(ctx.frame_ring().frame_counter(), 0);

        let mut pass = ClearPass::default();
        assert!(ctx.render_frame(&mut pass).is_ok());
    }
}
