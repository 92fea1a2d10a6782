//! DistFrame - 以 Fence 节拍驱动的帧循环
//!
//! CPU 提前最多 N 帧记录命令，通过 Fence 与 GPU 同步，
//! 绝不在 GPU 仍在使用时重置命令分配器或重建后缓冲。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理、表面事件）
//! - `renderer`: 与图形 API 无关的帧同步子系统
//! - `gfx`: 图形后端实现（DirectX 12 与模拟 GPU）
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_frame::core::config::{Config, GraphicsBackend};
//! use dist_frame::renderer::Renderer;
//!
//! let mut config = Config::default();
//! config.graphics.backend = GraphicsBackend::Simulated;
//!
//! let mut renderer = Renderer::new(&config, None)?;
//! for _ in 0..60 {
//!     renderer.render_frame()?;
//! }
//! renderer.shutdown()?;
//! # Ok::<(), dist_frame::core::DistFrameError>(())
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
