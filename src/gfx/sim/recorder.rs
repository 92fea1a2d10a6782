//! 模拟命令分配器 + 命令列表

use std::sync::Arc;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{CommandRecorder, ResourceState};

use super::{SimBackBuffer, SimBackend, SimTimeline};

/// 记录下来的命令
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Transition {
        buffer: u32,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        buffer: u32,
        color: [f32; 4],
    },
}

/// 模拟命令记录器
///
/// 与真实 API 一样，创建后处于关闭状态，使用前必须 `reset`。
pub struct SimRecorder {
    timeline: Arc<SimTimeline>,
    allocator: u64,
    commands: Vec<SimCommand>,
    /// 本次记录引用的后缓冲（代数，索引）
    targets: Vec<(u64, u32)>,
    recording: bool,
    resets: u64,
}

impl SimRecorder {
    pub(super) fn new(timeline: Arc<SimTimeline>, allocator: u64) -> Self {
        Self {
            timeline,
            allocator,
            commands: Vec::new(),
            targets: Vec::new(),
            recording: false,
            resets: 0,
        }
    }

    /// 分配器标识
    pub fn allocator_id(&self) -> u64 {
        self.allocator
    }

    /// 当前列表中的命令
    pub fn commands(&self) -> &[SimCommand] {
        &self.commands
    }

    /// 成功重置的次数
    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    pub(super) fn targets(&self) -> Vec<(u64, u32)> {
        self.targets.clone()
    }

    fn ensure_recording(&self, what: &str) -> Result<()> {
        if self.recording {
            Ok(())
        } else {
            Err(GraphicsError::CommandExecution(format!("{} recorded on a closed command list", what)).into())
        }
    }

    fn reference(&mut self, target: &SimBackBuffer) {
        let key = (target.generation(), target.index());
        if !self.targets.contains(&key) {
            self.targets.push(key);
        }
    }
}

impl CommandRecorder<SimBackend> for SimRecorder {
    fn reset(&mut self) -> Result<()> {
        self.timeline.reset_allocator(self.allocator)?;
        self.commands.clear();
        self.targets.clear();
        self.recording = true;
        self.resets += 1;
        Ok(())
    }

    fn transition(&mut self, target: &SimBackBuffer, before: ResourceState, after: ResourceState) -> Result<()> {
        self.ensure_recording("transition")?;
        self.reference(target);
        self.commands.push(SimCommand::Transition { buffer: target.index(), before, after });
        Ok(())
    }

    fn clear_render_target(&mut self, target: &SimBackBuffer, color: [f32; 4]) -> Result<()> {
        self.ensure_recording("clear")?;
        self.reference(target);
        self.commands.push(SimCommand::Clear { buffer: target.index(), color });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_recording("close")?;
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}
