//! 帧内容
//!
//! 帧循环本身不关心画什么。每帧由 [`CommandContent`] 往当前槽位的命令列表里
//! 记录命令，帧循环负责关闭、提交、信号和呈现。

use crate::core::error::Result;
use crate::renderer::backend_trait::{CommandRecorder, GpuBackend, ResourceState};

/// 当前帧的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// 帧序号
    pub frame: u64,
    /// 帧资源槽位
    pub slot: usize,
    /// 要渲染的后缓冲索引
    pub back_buffer: u32,
}

/// 命令内容
pub trait CommandContent<B: GpuBackend> {
    /// 往处于记录状态的列表中追加命令
    ///
    /// 后缓冲进入和离开时都处于 `Present` 状态。
    fn record(&mut self, recorder: &mut B::Recorder, target: &B::BackBuffer, frame: &FrameInfo) -> Result<()>;
}

/// 清屏
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearPass {
    pub color: [f32; 4],
}

impl ClearPass {
    pub fn new(color: [f32; 4]) -> Self {
        Self { color }
    }
}

impl Default for ClearPass {
    fn default() -> Self {
        Self::new([0.4, 0.6, 0.9, 1.0])
    }
}

impl<B: GpuBackend> CommandContent<B> for ClearPass {
    fn record(&mut self, recorder: &mut B::Recorder, target: &B::BackBuffer, _frame: &FrameInfo) -> Result<()> {
        recorder.transition(target, ResourceState::Present, ResourceState::RenderTarget)?;
        recorder.clear_render_target(target, self.color)?;
        recorder.transition(target, ResourceState::RenderTarget, ResourceState::Present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{SimBackend, SimCommand, SimDevice, TimelineSettings};
    use crate::renderer::backend_trait::{GpuDevice, SwapChain, SwapChainDesc};

    #[test]
    fn test_clear_pass_commands() {
        let device = SimDevice::single_adapter(TimelineSettings::stepped(1, 1)).unwrap();
        let queue = device.create_command_queue().unwrap();
        let desc = SwapChainDesc {
            width: 4,
            height: 4,
            buffer_count: 2,
            allow_tearing: false,
            window: None,
        };
        let mut swap_chain = device.create_swap_chain(&queue, &desc).unwrap();
        let buffers = swap_chain.acquire_back_buffers(2).unwrap();

        let mut recorder = device.create_recorder().unwrap();
        recorder.reset().unwrap();

        let mut pass = ClearPass::new([1.0, 0.0, 0.0, 1.0]);
        let frame = FrameInfo { frame: 0, slot: 0, back_buffer: 1 };
        CommandContent::<SimBackend>::record(&mut pass, &mut recorder, &buffers[1], &frame).unwrap();

        assert_eq!(
            recorder.commands(),
            &[
                SimCommand::Transition {
                    buffer: 1,
                    before: ResourceState::Present,
                    after: ResourceState::RenderTarget,
                },
                SimCommand::Clear { buffer: 1, color: [1.0, 0.0, 0.0, 1.0] },
                SimCommand::Transition {
                    buffer: 1,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                },
            ]
        );
    }
}
