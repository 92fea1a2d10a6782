//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现：
//! - DirectX 12：Windows 平台的真实 GPU 后端
//! - sim：模拟 GPU 时间线，无窗口、任何平台可用，也是测试使用的后端
//!
//! 两个后端都实现了 `renderer::backend_trait` 中的同一组 trait。

pub mod sim;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use sim::SimBackend;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Backend;
