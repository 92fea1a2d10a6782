//! 帧资源环
//!
//! 固定数量的槽位，每个槽位拥有一组命令记录器和 "复用前必须完成" 的令牌。
//! 帧 `n` 使用槽位 `n % N`，因此 CPU 最多领先 GPU `N` 帧。
//!
//! # 调用约定
//!
//! 1. `begin_frame`：等待槽位上次提交的令牌完成，然后重置记录器
//! 2. 通过 `recorder_mut` 记录并关闭命令，提交，`signal` 得到新令牌
//! 3. `end_frame`：把新令牌存入槽位，帧计数加一
//!
//! `begin_frame` 与 `end_frame` 必须严格交替；违规时返回
//! [`ContractViolation`] 而不是悄悄覆盖活动帧。

use std::time::Duration;

use tracing::{debug, trace};

use crate::core::config::FRAMES_IN_FLIGHT_RANGE;
use crate::core::error::{ContractViolation, Result};
use crate::renderer::backend_trait::{CommandRecorder, GpuBackend, GpuDevice};
use crate::renderer::sync::{CompletionToken, FenceSynchronizer};

/// 帧槽位
pub struct FrameSlot<B: GpuBackend> {
    recorder: B::Recorder,
    /// 复用本槽位前必须完成的令牌
    last_required: CompletionToken,
}

impl<B: GpuBackend> FrameSlot<B> {
    pub fn recorder(&self) -> &B::Recorder {
        &self.recorder
    }

    pub fn last_required(&self) -> CompletionToken {
        self.last_required
    }
}

/// 活动帧句柄
///
/// 由 `begin_frame` 发出，被 `end_frame` 消耗。不可复制，一帧只能结束一次。
#[derive(Debug, PartialEq, Eq)]
pub struct FrameHandle {
    slot: usize,
    frame: u64,
}

impl FrameHandle {
    /// 槽位索引
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// 帧序号（从 0 开始）
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// 帧资源环
pub struct FrameResourceRing<B: GpuBackend> {
    slots: Box<[FrameSlot<B>]>,
    frame_counter: u64,
    /// 活动帧的（槽位，帧序号）
    active: Option<(usize, u64)>,
}

impl<B: GpuBackend> FrameResourceRing<B> {
    /// 创建 `count` 个槽位，每个槽位一组记录器
    pub fn new(device: &B::Device, count: usize) -> Result<Self> {
        if !FRAMES_IN_FLIGHT_RANGE.contains(&count) {
            return Err(ContractViolation::InvalidArgument(format!(
                "frames in flight must be within {:?}, got {}",
                FRAMES_IN_FLIGHT_RANGE, count
            ))
            .into());
        }

        let slots = (0..count)
            .map(|_| {
                Ok(FrameSlot {
                    recorder: device.create_recorder()?,
                    last_required: CompletionToken::SATISFIED,
                })
            })
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        debug!(slots = count, "Frame resource ring created");

        Ok(Self {
            slots,
            frame_counter: 0,
            active: None,
        })
    }

    /// 槽位数量
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 已结束的帧数
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// 下一帧将使用的槽位
    pub fn next_slot(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    /// 是否有活动帧
    pub fn is_frame_active(&self) -> bool {
        self.active.is_some()
    }

    /// 活动帧所在的槽位
    pub fn active_slot(&self) -> Option<usize> {
        self.active.map(|(slot, _)| slot)
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<B>> {
        self.slots.get(index)
    }

    /// 开始一帧
    ///
    /// 等待槽位的令牌完成（`timeout` 为 `None` 时无限等待），然后重置记录器。
    /// 等待超时返回 `GpuStall`，此时没有活动帧，可以稍后重试。
    pub fn begin_frame(&mut self, sync: &FenceSynchronizer<B>, timeout: Option<Duration>) -> Result<FrameHandle> {
        if let Some((active_slot, _)) = self.active {
            return Err(ContractViolation::FrameAlreadyActive { active_slot }.into());
        }

        let slot = self.next_slot();
        let frame = self.frame_counter;
        let required = self.slots[slot].last_required;

        sync.wait_or_stall(required, timeout)?;
        self.slots[slot].recorder.reset()?;

        trace!(frame, slot, required = required.value(), "Frame begun");
        self.active = Some((slot, frame));
        Ok(FrameHandle { slot, frame })
    }

    /// 活动帧的记录器
    pub fn recorder_mut(&mut self, handle: &FrameHandle) -> Result<&mut B::Recorder> {
        self.check_active(handle)?;
        Ok(&mut self.slots[handle.slot].recorder)
    }

    /// 活动帧的记录器（只读，用于提交）
    pub fn recorder(&self, handle: &FrameHandle) -> Result<&B::Recorder> {
        self.check_active(handle)?;
        Ok(&self.slots[handle.slot].recorder)
    }

    /// 结束一帧，记录槽位复用前必须完成的令牌
    pub fn end_frame(&mut self, handle: FrameHandle, token: CompletionToken) -> Result<()> {
        self.check_active(&handle)?;

        self.slots[handle.slot].last_required = token;
        self.frame_counter += 1;
        self.active = None;

        trace!(frame = handle.frame, slot = handle.slot, token = token.value(), "Frame ended");
        Ok(())
    }

    /// 放弃活动帧：槽位令牌保持不变，帧计数不前进
    ///
    /// 用于本帧命令尚未提交，或提交后信号失败（设备已丢失）的情况。
    /// 仍处于记录状态的列表会被关闭。
    pub fn abandon_frame(&mut self, handle: FrameHandle) -> Result<()> {
        self.check_active(&handle)?;
        self.active = None;
        debug!(frame = handle.frame, slot = handle.slot, "Frame abandoned");

        let recorder = &mut self.slots[handle.slot].recorder;
        if recorder.is_recording() {
            recorder.close()?;
        }
        Ok(())
    }

    fn check_active(&self, handle: &FrameHandle) -> Result<()> {
        match self.active {
            Some((slot, frame)) if slot == handle.slot && frame == handle.frame => Ok(()),
            _ => Err(ContractViolation::StaleFrameHandle {
                slot: handle.slot,
                frame: handle.frame,
            }
            .into()),
        }
    }
}
