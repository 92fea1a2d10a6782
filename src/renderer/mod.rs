//! 渲染器模块
//!
//! 帧同步子系统的核心，与具体图形 API 无关。
//!
//! # 架构设计
//!
//! - `Renderer`：对外的统一入口，按配置在运行时选择后端
//! - `Backend`：内部枚举，每个变体持有一个具体后端的 [`RenderContext`]
//! - 具体图形 API 的实现在 `gfx` 模块中
//!
//! # 组件
//!
//! - `device`：适配器选择与设备上下文
//! - `sync`：Fence 同步器与完成令牌
//! - `frame`：帧资源环
//! - `present`：呈现表面管理器
//! - `content`：每帧记录的命令内容
//! - `context`：把以上组件串成帧循环

use raw_window_handle::RawWindowHandle;
use tracing::info;

use crate::core::config::{Config, GraphicsBackend};
use crate::core::error::{DistFrameError, Result};
use crate::core::event::SurfaceEvent;
#[cfg(target_os = "windows")]
use crate::gfx::dx12::{Dx12Backend, Dx12Device};
use crate::gfx::sim::{SimBackend, SimDevice};

pub mod backend_trait;
pub mod content;
pub mod context;
pub mod device;
pub mod frame;
pub mod metrics;
pub mod present;
pub mod sync;

pub use content::{ClearPass, CommandContent, FrameInfo};
pub use context::{FrameOutcome, RenderContext, RenderSettings, SurfaceResponse};
pub use device::{AdapterInfo, DeviceOptions};
pub use sync::CompletionToken;

use metrics::FrameMetrics;

/// 图形后端枚举
///
/// 通过枚举分发，避免在帧循环热路径上使用动态分发。
enum Backend {
    Simulated(RenderContext<SimBackend>),
    #[cfg(target_os = "windows")]
    Dx12(RenderContext<Dx12Backend>),
}

/// 渲染器
///
/// 每帧清屏并呈现。
pub struct Renderer {
    backend: Backend,
    content: ClearPass,
}

impl Renderer {
    /// 按配置创建渲染器
    ///
    /// DirectX 12 后端需要原生窗口句柄；模拟后端可以没有窗口。
    pub fn new(config: &Config, window: Option<RawWindowHandle>) -> Result<Self> {
        let settings = RenderSettings::from_config(config);
        let (width, height) = (config.window.width, config.window.height);

        let backend = match config.graphics.backend {
            GraphicsBackend::Simulated => {
                info!("Initializing simulated backend");
                let device = SimDevice::from_config(config)?;
                Backend::Simulated(RenderContext::new(device, window, settings, width, height)?)
            }
            #[cfg(target_os = "windows")]
            GraphicsBackend::Dx12 => {
                info!("Initializing DX12 backend");
                let window = window.ok_or_else(|| {
                    DistFrameError::Initialization("DirectX 12 backend requires a window".to_string())
                })?;
                let options = DeviceOptions {
                    use_software: config.graphics.use_warp,
                    debug_layer: config.graphics.debug_layer,
                };
                let device = Dx12Device::create(options)?;
                Backend::Dx12(RenderContext::new(device, Some(window), settings, width, height)?)
            }
            #[cfg(not(target_os = "windows"))]
            GraphicsBackend::Dx12 => {
                let _ = window;
                return Err(DistFrameError::Initialization(
                    "DX12 backend is only available on Windows".to_string(),
                ));
            }
        };

        Ok(Self {
            backend,
            content: ClearPass::new(config.graphics.clear_color),
        })
    }

    /// 渲染并呈现一帧
    pub fn render_frame(&mut self) -> Result<FrameOutcome> {
        match &mut self.backend {
            Backend::Simulated(ctx) => ctx.render_frame(&mut self.content),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.render_frame(&mut self.content),
        }
    }

    /// 处理窗口层事件
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) -> Result<SurfaceResponse> {
        match &mut self.backend {
            Backend::Simulated(ctx) => ctx.handle_surface_event(event),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.handle_surface_event(event),
        }
    }

    /// 等待 GPU 完成全部已提交的工作
    pub fn flush(&self) -> Result<CompletionToken> {
        match &self.backend {
            Backend::Simulated(ctx) => ctx.flush(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.flush(),
        }
    }

    /// flush 后释放全部 GPU 对象
    pub fn shutdown(self) -> Result<()> {
        match self.backend {
            Backend::Simulated(ctx) => ctx.shutdown(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.shutdown(),
        }
    }

    pub fn metrics(&self) -> &FrameMetrics {
        match &self.backend {
            Backend::Simulated(ctx) => ctx.metrics(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.metrics(),
        }
    }

    pub fn adapter(&self) -> &AdapterInfo {
        match &self.backend {
            Backend::Simulated(ctx) => ctx.adapter(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.adapter(),
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        match &self.backend {
            Backend::Simulated(ctx) => ctx.settings(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(ctx) => ctx.settings(),
        }
    }

    /// 后端名称
    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Simulated(_) => GraphicsBackend::Simulated.name(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(_) => GraphicsBackend::Dx12.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationClock;

    fn simulated_config() -> Config {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::Simulated;
        config.simulation.clock = SimulationClock::Stepped;
        config
    }

    #[test]
    fn test_simulated_renderer_runs_headless() {
        let config = simulated_config();
        let mut renderer = Renderer::new(&config, None).unwrap();
        assert_eq!(renderer.backend_name(), "Simulated");
        assert_eq!(renderer.adapter().name, "Simulated Discrete GPU");

        for _ in 0..12 {
            assert!(matches!(renderer.render_frame().unwrap(), FrameOutcome::Presented { .. }));
        }
        assert_eq!(renderer.metrics().total_frames(), 12);

        renderer
            .handle_surface_event(SurfaceEvent::Resized { width: 640, height: 480 })
            .unwrap();
        assert!(renderer.render_frame().is_ok());
        renderer.shutdown().unwrap();
    }

    #[test]
    fn test_warp_request_uses_software_adapter() {
        let mut config = simulated_config();
        config.graphics.use_warp = true;
        let renderer = Renderer::new(&config, None).unwrap();
        assert!(renderer.adapter().is_software);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_dx12_unavailable_off_windows() {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::Dx12;
        assert!(Renderer::new(&config, None).is_err());
    }
}
