//! 模拟 GPU 后端
//!
//! 在没有真实 GPU（或没有窗口）的环境下运行完整帧循环。所有对象共享同一条
//! [`SimTimeline`]，它按提交顺序执行命令批次和 Fence 信号，并检测同步违规。
//!
//! 用途：
//!
//! - 单元测试：步进时钟让 "阻塞了多少个周期" 变成可断言的确定值
//! - 无窗口运行：`--sim` 时主程序用实时时钟驱动固定帧数

mod recorder;
mod swapchain;
mod timeline;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{
    CommandQueue, CommandRecorder, GpuBackend, GpuDevice, GpuFence, SwapChainDesc, WaitOutcome,
};
use crate::renderer::device::{require_adapter, AdapterInfo, DeviceOptions};

pub use recorder::{SimCommand, SimRecorder};
pub use swapchain::{PresentRecord, SimBackBuffer, SimSwapChain};
pub use timeline::{ClockMode, SimTimeline, TimelineSettings};

use timeline::SimOp;

/// 模拟后端标记类型
pub struct SimBackend;

impl GpuBackend for SimBackend {
    type Device = SimDevice;
    type Queue = SimQueue;
    type Fence = SimFence;
    type Recorder = SimRecorder;
    type SwapChain = SimSwapChain;
    type BackBuffer = SimBackBuffer;

    const NAME: &'static str = "Simulated";
}

/// 模拟设备
pub struct SimDevice {
    adapter: AdapterInfo,
    timeline: Arc<SimTimeline>,
    tearing_supported: bool,
}

impl SimDevice {
    /// 从候选适配器中按规则选择一个并创建设备
    pub fn create(adapters: &[AdapterInfo], options: DeviceOptions, settings: TimelineSettings) -> Result<Self> {
        for adapter in adapters {
            debug!(adapter = %adapter, "Simulated adapter enumerated");
        }

        let adapter = require_adapter(adapters, options.use_software)?.clone();
        if !adapter.supports_feature_level {
            return Err(GraphicsError::DeviceCreation(format!(
                "adapter '{}' does not support the required feature level",
                adapter.name
            ))
            .into());
        }

        info!(adapter = %adapter, clock = ?settings.clock, "Simulated device created");

        Ok(Self {
            adapter,
            timeline: SimTimeline::new(settings)?,
            tearing_supported: true,
        })
    }

    /// 按配置中的 `[simulation]` 段创建
    pub fn from_config(config: &Config) -> Result<Self> {
        let adapters: Vec<AdapterInfo> = config
            .simulation
            .adapters
            .iter()
            .enumerate()
            .map(|(index, a)| AdapterInfo {
                index: index as u32,
                name: a.name.clone(),
                dedicated_video_memory: a.dedicated_memory_mb.saturating_mul(1024 * 1024),
                is_software: a.software,
                supports_feature_level: a.feature_level_ok,
            })
            .collect();

        let options = DeviceOptions {
            use_software: config.graphics.use_warp,
            debug_layer: config.graphics.debug_layer,
        };

        Self::create(&adapters, options, TimelineSettings::from_config(&config.simulation))
    }

    /// 只有一个硬件适配器的设备
    pub fn single_adapter(settings: TimelineSettings) -> Result<Self> {
        let adapter = AdapterInfo {
            index: 0,
            name: "Simulated GPU".to_string(),
            dedicated_video_memory: 4096 * 1024 * 1024,
            is_software: false,
            supports_feature_level: true,
        };
        Self::create(&[adapter], DeviceOptions::default(), settings)
    }

    /// 设置呈现层是否支持撕裂
    pub fn with_tearing_support(mut self, supported: bool) -> Self {
        self.tearing_supported = supported;
        self
    }

    /// 共享时间线
    pub fn timeline(&self) -> &Arc<SimTimeline> {
        &self.timeline
    }
}

impl GpuDevice<SimBackend> for SimDevice {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn create_command_queue(&self) -> Result<SimQueue> {
        self.timeline.device_status()?;
        Ok(SimQueue { timeline: self.timeline.clone() })
    }

    fn create_fence(&self, initial_value: u64) -> Result<SimFence> {
        let id = self.timeline.register_fence(initial_value)?;
        Ok(SimFence { id, timeline: self.timeline.clone() })
    }

    fn create_recorder(&self) -> Result<SimRecorder> {
        let allocator = self.timeline.register_allocator()?;
        Ok(SimRecorder::new(self.timeline.clone(), allocator))
    }

    fn create_swap_chain(&self, _queue: &SimQueue, desc: &SwapChainDesc) -> Result<SimSwapChain> {
        self.timeline.device_status()?;
        Ok(SimSwapChain::new(self.timeline.clone(), desc, self.tearing_supported))
    }

    fn check_device_status(&self) -> Result<()> {
        self.timeline.device_status()
    }
}

/// 模拟命令队列
pub struct SimQueue {
    timeline: Arc<SimTimeline>,
}

impl CommandQueue<SimBackend> for SimQueue {
    fn execute(&self, recorder: &SimRecorder) -> Result<()> {
        if recorder.is_recording() {
            return Err(GraphicsError::CommandExecution(
                "command list submitted while still open".to_string(),
            )
            .into());
        }

        self.timeline.submit(SimOp::Execute {
            allocator: recorder.allocator_id(),
            commands: recorder.commands().len(),
            targets: recorder.targets(),
        })
    }

    fn signal(&self, fence: &SimFence, value: u64) -> Result<()> {
        self.timeline.submit(SimOp::Signal { fence: fence.id, value })
    }
}

/// 模拟 Fence
pub struct SimFence {
    id: usize,
    timeline: Arc<SimTimeline>,
}

impl GpuFence for SimFence {
    fn completed_value(&self) -> Result<u64> {
        self.timeline.fence_value(self.id)
    }

    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        self.timeline.wait_for_fence(self.id, value, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulatedAdapterConfig;

    #[test]
    fn test_from_config_selects_largest_adapter() {
        let mut config = Config::default();
        config.simulation.adapters = vec![
            SimulatedAdapterConfig {
                name: "small".to_string(),
                dedicated_memory_mb: 512,
                software: false,
                feature_level_ok: true,
            },
            SimulatedAdapterConfig {
                name: "large".to_string(),
                dedicated_memory_mb: 8192,
                software: false,
                feature_level_ok: true,
            },
            SimulatedAdapterConfig {
                name: "warp".to_string(),
                dedicated_memory_mb: 0,
                software: true,
                feature_level_ok: true,
            },
        ];

        let device = SimDevice::from_config(&config).unwrap();
        assert_eq!(device.adapter().name, "large");

        config.graphics.use_warp = true;
        let device = SimDevice::from_config(&config).unwrap();
        assert_eq!(device.adapter().name, "warp");
        assert!(device.adapter().is_software);
    }

    #[test]
    fn test_huge_adapter_memory_saturates() {
        let mut config = Config::default();
        config.simulation.adapters = vec![SimulatedAdapterConfig {
            name: "huge".to_string(),
            dedicated_memory_mb: u64::MAX,
            software: false,
            feature_level_ok: true,
        }];

        let device = SimDevice::from_config(&config).unwrap();
        assert_eq!(device.adapter().dedicated_video_memory, u64::MAX);
    }

    #[test]
    fn test_incapable_software_adapter_fails() {
        let adapters = vec![AdapterInfo {
            index: 0,
            name: "old warp".to_string(),
            dedicated_video_memory: 0,
            is_software: true,
            supports_feature_level: false,
        }];
        let options = DeviceOptions { use_software: true, debug_layer: false };
        assert!(SimDevice::create(&adapters, options, TimelineSettings::stepped(1, 1)).is_err());
    }

    #[test]
    fn test_open_list_cannot_be_executed() {
        let device = SimDevice::single_adapter(TimelineSettings::stepped(1, 1)).unwrap();
        let queue = device.create_command_queue().unwrap();
        let mut recorder = device.create_recorder().unwrap();

        recorder.reset().unwrap();
        assert!(queue.execute(&recorder).is_err());
        recorder.close().unwrap();
        assert!(queue.execute(&recorder).is_ok());
    }
}
