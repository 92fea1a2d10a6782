//! 配置管理模块
//!
//! 提供启动配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1024
//! height = 768
//! title = "DistFrame"
//!
//! [graphics]
//! backend = "dx12"          # 或 "simulated"
//! use_warp = false          # 使用 WARP 软件光栅化适配器
//! frames_in_flight = 3      # 帧资源数量 N
//! back_buffer_count = 3     # 交换链后缓冲数量
//! vsync = true
//! debug_layer = false
//!
//! [simulation]
//! clock = "realtime"        # 或 "stepped"
//! tick_us = 500
//!
//! [logging]
//! level = "info"            # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// 帧资源数量允许范围
pub const FRAMES_IN_FLIGHT_RANGE: std::ops::RangeInclusive<usize> = 2..=4;

/// DXGI 翻转模型允许的后缓冲数量范围
pub const BACK_BUFFER_RANGE: std::ops::RangeInclusive<u32> = 2..=16;

/// 启动配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 模拟 GPU 配置
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 客户区宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 客户区高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,

    /// 是否可调整大小
    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 是否使用软件回退适配器（WARP）
    #[serde(default)]
    pub use_warp: bool,

    /// 帧资源数量（同时在途的帧数）
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,

    /// 交换链后缓冲数量
    #[serde(default = "default_back_buffer_count")]
    pub back_buffer_count: u32,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 是否启用调试层
    #[serde(default)]
    pub debug_layer: bool,

    /// 清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// 稳态帧等待的超时时间（毫秒），超过视为 GPU 停滞
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// 连续停滞多少次后按设备丢失处理
    #[serde(default = "default_max_stall_retries")]
    pub max_stall_retries: u32,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 模拟 GPU 后端（无窗口，任何平台）
    Simulated,
}

/// 模拟 GPU 的时钟模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationClock {
    /// 等待线程自己推进虚拟时钟，结果完全确定
    Stepped,
    /// 后台线程按 `tick_us` 推进时钟
    Realtime,
}

/// 模拟适配器描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedAdapterConfig {
    pub name: String,
    #[serde(default)]
    pub dedicated_memory_mb: u64,
    #[serde(default)]
    pub software: bool,
    #[serde(default = "default_feature_level_ok")]
    pub feature_level_ok: bool,
}

/// 模拟 GPU 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// 时钟模式
    #[serde(default = "default_clock")]
    pub clock: SimulationClock,

    /// 每个时钟周期的时长（微秒）
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,

    /// 每个命令批次的执行周期数
    #[serde(default = "default_batch_ticks")]
    pub batch_ticks: u64,

    /// 每个 Fence 信号的执行周期数
    #[serde(default)]
    pub signal_ticks: u64,

    /// 无窗口运行时渲染的帧数
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,

    /// 可供枚举的模拟适配器
    #[serde(default = "default_sim_adapters")]
    pub adapters: Vec<SimulatedAdapterConfig>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1024 }
fn default_height() -> u32 { 768 }
fn default_title() -> String { "DistFrame".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Simulated
    }
}
fn default_frames_in_flight() -> usize { 3 }
fn default_back_buffer_count() -> u32 { 3 }
fn default_vsync() -> bool { true }
fn default_clear_color() -> [f32; 4] { [0.4, 0.6, 0.9, 1.0] }
fn default_stall_timeout_ms() -> u64 { 2000 }
fn default_max_stall_retries() -> u32 { 3 }
fn default_clock() -> SimulationClock { SimulationClock::Realtime }
fn default_tick_us() -> u64 { 500 }
fn default_batch_ticks() -> u64 { 2 }
fn default_max_frames() -> u64 { 600 }
fn default_feature_level_ok() -> bool { true }
fn default_sim_adapters() -> Vec<SimulatedAdapterConfig> {
    vec![
        SimulatedAdapterConfig {
            name: "Simulated Discrete GPU".to_string(),
            dedicated_memory_mb: 8192,
            software: false,
            feature_level_ok: true,
        },
        SimulatedAdapterConfig {
            name: "Simulated Basic Render Driver".to_string(),
            dedicated_memory_mb: 0,
            software: true,
            feature_level_ok: true,
        },
    ]
}
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_file() -> String { "distframe.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            use_warp: false,
            frames_in_flight: default_frames_in_flight(),
            back_buffer_count: default_back_buffer_count(),
            vsync: default_vsync(),
            debug_layer: false,
            clear_color: default_clear_color(),
            stall_timeout_ms: default_stall_timeout_ms(),
            max_stall_retries: default_max_stall_retries(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clock: default_clock(),
            tick_us: default_tick_us(),
            batch_ticks: default_batch_ticks(),
            signal_ticks: 0,
            max_frames: default_max_frames(),
            adapters: default_sim_adapters(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    #[allow(dead_code)]
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `-w`, `--width <value>`: 客户区宽度
    /// - `-h`, `--height <value>`: 客户区高度
    /// - `-warp`, `--warp`: 使用 WARP 软件适配器
    /// - `--dx12` / `--sim`: 选择图形后端
    /// - `--frames <value>`: 无窗口运行的帧数
    /// - `--no-vsync`: 关闭垂直同步
    /// - `--debug`: 启用调试层
    ///
    /// 宽度与高度各自独立解析；无法解析的值被忽略并保留原配置。
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-w" | "--width" => {
                    if let Some(width) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        self.window.width = width;
                        i += 1;
                    }
                }
                "-h" | "--height" => {
                    if let Some(height) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        self.window.height = height;
                        i += 1;
                    }
                }
                "--frames" => {
                    if let Some(frames) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        self.simulation.max_frames = frames;
                        i += 1;
                    }
                }
                "-warp" | "--warp" => self.graphics.use_warp = true,
                "--dx12" => self.graphics.backend = GraphicsBackend::Dx12,
                "--sim" => self.graphics.backend = GraphicsBackend::Simulated,
                "--no-vsync" => self.graphics.vsync = false,
                "--debug" => self.graphics.debug_layer = true,
                _ => {}
            }
            i += 1;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid(
                "window.width/height",
                "Window dimensions must be greater than 0",
            ));
        }

        if !FRAMES_IN_FLIGHT_RANGE.contains(&self.graphics.frames_in_flight) {
            return Err(invalid(
                "graphics.frames_in_flight",
                format!(
                    "Frames in flight must be between {} and {}",
                    FRAMES_IN_FLIGHT_RANGE.start(),
                    FRAMES_IN_FLIGHT_RANGE.end()
                ),
            ));
        }

        if !BACK_BUFFER_RANGE.contains(&self.graphics.back_buffer_count) {
            return Err(invalid(
                "graphics.back_buffer_count",
                format!(
                    "Back buffer count must be between {} and {}",
                    BACK_BUFFER_RANGE.start(),
                    BACK_BUFFER_RANGE.end()
                ),
            ));
        }

        if self.graphics.stall_timeout_ms == 0 {
            return Err(invalid("graphics.stall_timeout_ms", "Stall timeout must be greater than 0"));
        }

        if self.simulation.tick_us == 0 {
            return Err(invalid("simulation.tick_us", "Tick length must be greater than 0"));
        }

        Ok(())
    }

    /// 稳态帧等待超时
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.graphics.stall_timeout_ms)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> super::error::DistFrameError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Simulated => "Simulated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 768);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_width_and_height_are_parsed_independently() {
        let mut config = Config::default();
        config.apply_args(["app", "--height", "480", "-w", "640"]);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 480);

        config.apply_args(["app", "-h", "300"]);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 300);
    }

    #[test]
    fn test_flag_arguments() {
        let mut config = Config::default();
        config.apply_args(["app", "-warp", "--sim", "--frames", "12", "--no-vsync", "--width", "abc"]);
        assert!(config.graphics.use_warp);
        assert_eq!(config.graphics.backend, GraphicsBackend::Simulated);
        assert_eq!(config.simulation.max_frames, 12);
        assert!(!config.graphics.vsync);
        assert_eq!(config.window.width, 1024);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.frames_in_flight = 1;
        assert!(config.validate().is_err());

        config.graphics.frames_in_flight = 2;
        config.graphics.back_buffer_count = 17;
        assert!(config.validate().is_err());

        config.graphics.back_buffer_count = 2;
        config.window.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "simulated"
            frames_in_flight = 2

            [simulation]
            clock = "stepped"
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.backend, GraphicsBackend::Simulated);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.simulation.clock, SimulationClock::Stepped);
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.simulation.adapters.len(), 2);
    }
}
