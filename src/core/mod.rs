//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：日志、配置、错误处理和表面事件。
//!
//! # 模块组织
//!
//! - `log`：日志系统，基于 tracing 的结构化日志
//! - `config`：配置管理，支持配置文件与命令行覆盖
//! - `error`：错误处理，定义统一的错误类型
//! - `event`：窗口/表面提供者发出的事件

pub mod log;
pub mod config;
pub mod error;
pub mod event;

// 重新导出常用类型，方便使用
pub use error::{Result, DistFrameError, GraphicsError, ContractViolation};
pub use config::Config;
pub use event::{SurfaceEvent, KeyCode};
