//! 错误处理模块
//!
//! 定义了帧同步子系统中使用的统一错误类型。
//!
//! # 错误分类
//!
//! - **初始化致命错误**：设备、命令队列、Fence 或等待句柄创建失败，启动中止
//! - **运行时致命错误**：设备丢失（GPU 重置或驱动崩溃），在下一次提交或等待时暴露
//! - **可恢复的诊断错误**：稳态下 Fence 等待超时（GPU 停滞）
//! - **调用约定违规**：例如在已有活动帧时再次调用 `begin_frame`，属于编程错误

use std::fmt;

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistFrameError>;

/// DistFrame 的错误类型
#[derive(Debug)]
pub enum DistFrameError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 调用约定违规
    Contract(ContractViolation),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 没有满足要求的适配器
    AdapterNotFound(String),

    /// 交换链错误
    SwapchainError(String),

    /// 资源创建失败（命令分配器、Fence、等待句柄等）
    ResourceCreation(String),

    /// 命令记录或提交失败
    CommandExecution(String),

    /// Fence 等待本身失败（而不是超时）
    FenceWait(String),

    /// 设备丢失
    DeviceLost(String),

    /// GPU 在给定时限内没有到达目标 Fence 值
    GpuStall {
        token: u64,
        completed: u64,
        waited_ms: u64,
    },
}

/// 调用约定违规
///
/// 这些错误说明调用方没有遵守帧循环的调用顺序，不应在运行时尝试恢复。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// 上一帧尚未 `end_frame`，又调用了 `begin_frame`
    FrameAlreadyActive { active_slot: usize },

    /// 活动帧尚未结束时请求重建后缓冲
    ResizeDuringFrame { active_slot: usize },

    /// 传入的帧句柄不属于当前活动帧
    StaleFrameHandle { slot: usize, frame: u64 },

    /// 交换链尚未创建就开始渲染
    SurfaceNotCreated,

    /// 在 GPU 仍有未完成工作时重建后缓冲
    ResizeWithoutFlush { signaled: u64, completed: u64 },

    /// 参数超出允许范围
    InvalidArgument(String),
}

impl DistFrameError {
    /// 是否属于设备丢失类错误
    pub fn is_device_lost(&self) -> bool {
        matches!(self, DistFrameError::Graphics(GraphicsError::DeviceLost(_)))
    }

    /// 是否为 GPU 停滞（等待超时）
    pub fn is_stall(&self) -> bool {
        matches!(self, DistFrameError::Graphics(GraphicsError::GpuStall { .. }))
    }

    /// 是否为调用约定违规
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, DistFrameError::Contract(_))
    }
}

impl fmt::Display for DistFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistFrameError::Config(e) => write!(f, "Configuration error: {}", e),
            DistFrameError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistFrameError::Contract(e) => write!(f, "Contract violation: {}", e),
            DistFrameError::Io(e) => write!(f, "IO error: {}", e),
            DistFrameError::Log(msg) => write!(f, "Log error: {}", msg),
            DistFrameError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DistFrameError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::AdapterNotFound(msg) => write!(f, "No suitable adapter: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::FenceWait(msg) => write!(f, "Fence wait failed: {}", msg),
            GraphicsError::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            GraphicsError::GpuStall { token, completed, waited_ms } => write!(
                f,
                "GPU stalled: waited {} ms for fence value {} (completed {})",
                waited_ms, token, completed
            ),
        }
    }
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::FrameAlreadyActive { active_slot } => {
                write!(f, "begin_frame called while slot {} is still active", active_slot)
            }
            ContractViolation::ResizeDuringFrame { active_slot } => {
                write!(f, "resize requested while slot {} is still active", active_slot)
            }
            ContractViolation::StaleFrameHandle { slot, frame } => {
                write!(f, "frame handle for slot {} (frame {}) is not the active frame", slot, frame)
            }
            ContractViolation::SurfaceNotCreated => {
                write!(f, "rendering requested before the presentation surface was created")
            }
            ContractViolation::ResizeWithoutFlush { signaled, completed } => write!(
                f,
                "back buffers recreated with GPU work in flight (signaled {}, completed {})",
                signaled, completed
            ),
            ContractViolation::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for DistFrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistFrameError::Io(e) => Some(e),
            DistFrameError::Config(e) => Some(e),
            DistFrameError::Graphics(e) => Some(e),
            DistFrameError::Contract(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for ContractViolation {}

impl From<std::io::Error> for DistFrameError {
    fn from(err: std::io::Error) -> Self {
        DistFrameError::Io(err)
    }
}

impl From<ConfigError> for DistFrameError {
    fn from(err: ConfigError) -> Self {
        DistFrameError::Config(err)
    }
}

impl From<GraphicsError> for DistFrameError {
    fn from(err: GraphicsError) -> Self {
        DistFrameError::Graphics(err)
    }
}

impl From<ContractViolation> for DistFrameError {
    fn from(err: ContractViolation) -> Self {
        DistFrameError::Contract(err)
    }
}
