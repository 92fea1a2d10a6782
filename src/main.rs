//! DistFrame - 帧同步演示程序
//!
//! 每帧清屏并呈现，演示 CPU/GPU 的多帧并行与安全的窗口尺寸调整。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 使用 DirectX 12（命令行覆盖）
//! cargo run -- --dx12
//!
//! # 无窗口运行模拟后端 300 帧
//! cargo run -- --sim --frames 300
//! ```
//!
//! # 按键
//!
//! - `V`：切换垂直同步
//! - `F11` / `Alt+Enter`：切换全屏
//! - `Escape`：退出

use anyhow::Context;
use tracing::{error, info, warn};

use dist_frame::core::config::{Config, GraphicsBackend};
use dist_frame::core::log;
use dist_frame::renderer::{FrameOutcome, Renderer};

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 验证配置
/// 4. 初始化日志系统
/// 5. 按后端进入无窗口循环或窗口事件循环
fn main() -> anyhow::Result<()> {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args().skip(1));
    config.validate().context("Invalid configuration")?;

    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)
        .context("Failed to initialize logger")?;

    info!(version = env!("CARGO_PKG_VERSION"), "DistFrame starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        frames_in_flight = config.graphics.frames_in_flight,
        back_buffers = config.graphics.back_buffer_count,
        vsync = config.graphics.vsync,
        "Graphics configuration"
    );

    match config.graphics.backend {
        GraphicsBackend::Simulated => run_headless(&config),
        GraphicsBackend::Dx12 => windowed::run(config),
    }
}

/// 无窗口运行模拟后端，渲染固定帧数后退出
fn run_headless(config: &Config) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(config, None).context("Failed to initialize renderer")?;
    info!(adapter = %renderer.adapter(), frames = config.simulation.max_frames, "Running headless");

    for _ in 0..config.simulation.max_frames {
        match renderer.render_frame() {
            Ok(FrameOutcome::Presented { .. }) => {}
            Ok(FrameOutcome::Stalled { consecutive }) => warn!(consecutive, "Frame skipped after GPU stall"),
            Err(e) => {
                error!(error = %e, "Frame failed");
                return Err(e).context("Render loop aborted");
            }
        }
    }

    let metrics = renderer.metrics();
    info!(
        frames = metrics.total_frames(),
        stalls = metrics.stalls(),
        total_wait_ms = metrics.total_wait().as_secs_f64() * 1000.0,
        "Headless run complete"
    );

    renderer.shutdown().context("Shutdown failed")?;
    Ok(())
}

mod windowed {
    //! winit 窗口事件循环

    use anyhow::Context;
    use raw_window_handle::HasWindowHandle;
    use tracing::{debug, error, info, warn};
    use winit::dpi::PhysicalSize;
    use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::keyboard::{KeyCode as WinitKey, PhysicalKey};
    use winit::window::{Fullscreen, WindowBuilder};

    use dist_frame::core::config::Config;
    use dist_frame::core::event::{KeyCode, SurfaceEvent};
    use dist_frame::renderer::{FrameOutcome, Renderer, SurfaceResponse};

    fn translate_key(key: PhysicalKey) -> KeyCode {
        match key {
            PhysicalKey::Code(WinitKey::KeyV) => KeyCode::V,
            PhysicalKey::Code(WinitKey::F11) => KeyCode::F11,
            PhysicalKey::Code(WinitKey::Enter) => KeyCode::Enter,
            PhysicalKey::Code(WinitKey::Escape) => KeyCode::Escape,
            _ => KeyCode::Other,
        }
    }

    pub fn run(config: Config) -> anyhow::Result<()> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;
        let window = WindowBuilder::new()
            .with_title(config.window.title.as_str())
            .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
            .with_resizable(config.window.resizable)
            .build(&event_loop)
            .context("Failed to create window")?;

        let handle = window.window_handle().context("Window handle unavailable")?.as_raw();
        let renderer = Renderer::new(&config, Some(handle)).context("Failed to initialize renderer")?;
        info!(adapter = %renderer.adapter(), "Renderer initialized, entering main loop...");

        // 窗口必须比渲染器活得久，退出时先关闭渲染器
        let mut renderer = Some(renderer);
        let mut alt_down = false;

        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run(move |event, elwt| {
            let surface_event = match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => Some(SurfaceEvent::CloseRequested),
                    WindowEvent::Resized(size) => Some(SurfaceEvent::Resized {
                        width: size.width,
                        height: size.height,
                    }),
                    WindowEvent::ModifiersChanged(modifiers) => {
                        alt_down = modifiers.state().alt_key();
                        None
                    }
                    WindowEvent::KeyboardInput {
                        event: KeyEvent {
                            physical_key,
                            state: ElementState::Pressed,
                            repeat: false,
                            ..
                        },
                        ..
                    } => SurfaceEvent::from_key(translate_key(physical_key), alt_down),
                    WindowEvent::RedrawRequested => {
                        let Some(active) = renderer.as_mut() else {
                            return;
                        };
                        match active.render_frame() {
                            Ok(FrameOutcome::Presented { .. }) => {}
                            Ok(FrameOutcome::Stalled { consecutive }) => {
                                warn!(consecutive, "Frame skipped after GPU stall")
                            }
                            Err(e) => {
                                error!(error = %e, "Draw failed");
                                elwt.exit();
                            }
                        }
                        None
                    }
                    _ => None,
                },
                Event::AboutToWait => {
                    window.request_redraw();
                    None
                }
                Event::LoopExiting => {
                    if let Some(renderer) = renderer.take() {
                        if let Err(e) = renderer.shutdown() {
                            error!(error = %e, "Shutdown failed");
                        }
                    }
                    None
                }
                _ => None,
            };

            let Some(surface_event) = surface_event else {
                return;
            };
            let Some(active) = renderer.as_mut() else {
                return;
            };

            debug!(event = %surface_event, "Surface event");
            match active.handle_surface_event(surface_event) {
                Ok(SurfaceResponse::Continue) => {}
                Ok(SurfaceResponse::FullscreenChanged(fullscreen)) => {
                    window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
                }
                Ok(SurfaceResponse::Exit) => {
                    info!("Close requested, shutting down...");
                    elwt.exit();
                }
                Err(e) => {
                    error!(error = %e, "Surface event failed");
                    elwt.exit();
                }
            }
        })?;

        Ok(())
    }
}
