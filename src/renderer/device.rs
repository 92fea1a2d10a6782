//! 设备上下文
//!
//! 持有逻辑设备和唯一的直接命令队列。命令队列以 `Arc` 共享给 Fence 同步器
//! 和呈现表面管理器，这些组件只读地使用它。
//!
//! 适配器选择规则与后端无关，因此放在这里：
//!
//! - 请求软件回退时，选择第一个软件适配器（WARP）
//! - 否则在能以所需特性级别创建设备的硬件适配器中，选择专用显存最大的一个

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{GpuBackend, GpuDevice};

/// 适配器信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// 枚举顺序中的索引
    pub index: u32,
    /// 适配器描述
    pub name: String,
    /// 专用显存（字节）
    pub dedicated_video_memory: u64,
    /// 是否为软件适配器
    pub is_software: bool,
    /// 能否以所需特性级别创建设备
    pub supports_feature_level: bool,
}

/// 设备创建选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    /// 显式请求软件回退适配器
    pub use_software: bool,
    /// 启用调试层与信息队列过滤
    pub debug_layer: bool,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({} MB{})",
            self.index,
            self.name,
            self.dedicated_video_memory / (1024 * 1024),
            if self.is_software { ", software" } else { "" }
        )
    }
}

/// 按规则从候选适配器中选择一个
///
/// 硬件适配器必须有独立显存；显存相同时保留枚举顺序靠前的适配器。
pub fn select_adapter(adapters: &[AdapterInfo], use_software: bool) -> Option<&AdapterInfo> {
    if use_software {
        return adapters.iter().find(|a| a.is_software);
    }

    adapters
        .iter()
        .filter(|a| !a.is_software && a.supports_feature_level && a.dedicated_video_memory > 0)
        .fold(None, |best: Option<&AdapterInfo>, candidate| match best {
            Some(b) if b.dedicated_video_memory >= candidate.dedicated_video_memory => Some(b),
            _ => Some(candidate),
        })
}

/// 同 [`select_adapter`]，找不到时返回错误
pub fn require_adapter(adapters: &[AdapterInfo], use_software: bool) -> Result<&AdapterInfo> {
    select_adapter(adapters, use_software).ok_or_else(|| {
        let wanted = if use_software { "software" } else { "hardware" };
        GraphicsError::AdapterNotFound(format!(
            "no {} adapter among {} candidates",
            wanted,
            adapters.len()
        ))
        .into()
    })
}

/// 设备上下文
///
/// 帧循环中所有其他组件的根。
pub struct DeviceContext<B: GpuBackend> {
    device: B::Device,
    queue: Arc<B::Queue>,
}

impl<B: GpuBackend> DeviceContext<B> {
    /// 用已经创建好的设备建立上下文，并创建唯一的直接命令队列
    pub fn new(device: B::Device) -> Result<Self> {
        let queue = Arc::new(device.create_command_queue()?);

        info!(
            backend = B::NAME,
            adapter = %device.adapter(),
            "Device context created"
        );

        Ok(Self { device, queue })
    }

    /// 逻辑设备
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// 命令提交通道
    pub fn queue(&self) -> &Arc<B::Queue> {
        &self.queue
    }

    /// 选中的适配器
    pub fn adapter(&self) -> &AdapterInfo {
        self.device.adapter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(index: u32, mb: u64, is_software: bool, supports_feature_level: bool) -> AdapterInfo {
        AdapterInfo {
            index,
            name: format!("adapter {}", index),
            dedicated_video_memory: mb * 1024 * 1024,
            is_software,
            supports_feature_level,
        }
    }

    #[test]
    fn test_prefers_most_dedicated_memory() {
        let adapters = vec![
            adapter(0, 2048, false, true),
            adapter(1, 8192, false, true),
            adapter(2, 4096, false, true),
        ];
        assert_eq!(select_adapter(&adapters, false).unwrap().index, 1);
    }

    #[test]
    fn test_skips_software_and_incapable_adapters() {
        let adapters = vec![
            adapter(0, 16384, false, false),
            adapter(1, 32768, true, true),
            adapter(2, 1024, false, true),
        ];
        assert_eq!(select_adapter(&adapters, false).unwrap().index, 2);
    }

    #[test]
    fn test_software_fallback_on_request() {
        let adapters = vec![adapter(0, 8192, false, true), adapter(1, 0, true, true)];
        assert_eq!(select_adapter(&adapters, true).unwrap().index, 1);
    }

    #[test]
    fn test_ties_keep_enumeration_order() {
        let adapters = vec![adapter(0, 4096, false, true), adapter(1, 4096, false, true)];
        assert_eq!(select_adapter(&adapters, false).unwrap().index, 0);
    }

    #[test]
    fn test_hardware_without_dedicated_memory_skipped() {
        let adapters = vec![adapter(0, 0, false, true), adapter(1, 512, false, true)];
        assert_eq!(select_adapter(&adapters, false).unwrap().index, 1);

        let integrated_only = vec![adapter(0, 0, false, true)];
        assert!(select_adapter(&integrated_only, false).is_none());
    }

    #[test]
    fn test_no_suitable_adapter() {
        let adapters = vec![adapter(0, 0, true, true)];
        assert!(select_adapter(&adapters, false).is_none());
        assert!(require_adapter(&adapters, false).is_err());
        assert!(require_adapter(&[], true).is_err());
    }
}
