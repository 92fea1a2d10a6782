//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! 帧循环中的关键事件都带有结构化字段（`slot`、`token`、`completed` 等），
//! 可以用 `RUST_LOG` 风格的过滤器单独打开某个模块，例如
//! `dist_frame::renderer::sync=trace`。

use std::path::Path;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use super::config::LogLevel;
use super::error::{DistFrameError, Result};

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。环境变量 `RUST_LOG` 存在时优先使用它作为过滤器。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "distframe.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(level)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true);

    if file_output {
        let log_path = log_file_path.unwrap_or("distframe.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("distframe.log");

        // 每天滚动
        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| DistFrameError::Log(e.to_string()))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| DistFrameError::Log(e.to_string()))
    }
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// 日志级别转换
impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(level_directive(LogLevel::Trace), "trace");
    }
}
