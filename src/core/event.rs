//! 事件系统模块
//!
//! 窗口/表面提供者向帧循环发送的通知。窗口层（winit）只负责把平台事件翻译为
//! [`SurfaceEvent`]，真正的处理（先 flush 再重建后缓冲等）由渲染器完成。
//!
//! # 按键映射
//!
//! | 按键 | 事件 |
//! |------|------|
//! | `V` | 切换垂直同步 |
//! | `F11` 或 `Alt+Enter` | 切换全屏 |
//! | `Escape` | 关闭窗口 |

use std::fmt;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    WindowResize,
    WindowClose,
    ToggleFullscreen,
    ToggleVsync,
}

/// 表面事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// 客户区尺寸变化（物理像素）
    Resized { width: u32, height: u32 },
    /// 用户请求切换全屏
    ToggleFullscreen,
    /// 用户请求切换垂直同步
    ToggleVsync,
    /// 用户请求关闭
    CloseRequested,
}

/// 帧循环关心的按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    V,
    F11,
    Enter,
    Escape,
    Other,
}

impl SurfaceEvent {
    /// 事件类型
    pub fn event_type(&self) -> EventType {
        match self {
            SurfaceEvent::Resized { .. } => EventType::WindowResize,
            SurfaceEvent::ToggleFullscreen => EventType::ToggleFullscreen,
            SurfaceEvent::ToggleVsync => EventType::ToggleVsync,
            SurfaceEvent::CloseRequested => EventType::WindowClose,
        }
    }

    /// 将按下的按键翻译为表面事件
    ///
    /// # 参数
    ///
    /// * `key` - 按下的按键
    /// * `alt_down` - Alt 键是否处于按下状态
    pub fn from_key(key: KeyCode, alt_down: bool) -> Option<Self> {
        match key {
            KeyCode::V => Some(SurfaceEvent::ToggleVsync),
            KeyCode::F11 => Some(SurfaceEvent::ToggleFullscreen),
            KeyCode::Enter if alt_down => Some(SurfaceEvent::ToggleFullscreen),
            KeyCode::Escape => Some(SurfaceEvent::CloseRequested),
            _ => None,
        }
    }
}

impl fmt::Display for SurfaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceEvent::Resized { width, height } => write!(f, "WindowResize: {}x{}", width, height),
            SurfaceEvent::ToggleFullscreen => write!(f, "ToggleFullscreen"),
            SurfaceEvent::ToggleVsync => write!(f, "ToggleVsync"),
            SurfaceEvent::CloseRequested => write!(f, "WindowClose"),
        }
    }
}
