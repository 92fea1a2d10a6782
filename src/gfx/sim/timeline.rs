//! 模拟 GPU 时间线
//!
//! 一条 FIFO 队列，按提交顺序执行命令批次和 Fence 信号。每个操作有以时钟周期
//! 计的执行成本，时钟由下面两种方式之一推进：
//!
//! - [`ClockMode::Stepped`]：没有后台线程。等待 Fence 的线程自己逐周期推进时钟，
//!   因此 "等待 token k 需要多少个周期" 是完全确定的
//! - [`ClockMode::Realtime`]：后台线程每隔 `tick` 推进一个周期，等待方阻塞在条件变量上
//!
//! 时间线同时充当检测器：在分配器仍有未执行批次时重置它、在队列中仍有引用后缓冲的
//! 批次时调整交换链，都会被记录为违规并返回错误。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::core::config::{SimulationClock, SimulationConfig};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::WaitOutcome;

/// 时钟模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Stepped,
    Realtime,
}

/// 时间线参数
#[derive(Debug, Clone, Copy)]
pub struct TimelineSettings {
    /// 时钟模式
    pub clock: ClockMode,
    /// 一个周期对应的时长；步进模式下用于把超时换算成周期数
    pub tick: Duration,
    /// 每个命令批次的执行周期数
    pub batch_ticks: u64,
    /// 每个 Fence 信号的执行周期数
    pub signal_ticks: u64,
}

impl TimelineSettings {
    /// 步进时钟，一个周期记为 1 毫秒
    pub fn stepped(batch_ticks: u64, signal_ticks: u64) -> Self {
        Self {
            clock: ClockMode::Stepped,
            tick: Duration::from_millis(1),
            batch_ticks,
            signal_ticks,
        }
    }

    /// 实时时钟
    pub fn realtime(tick: Duration, batch_ticks: u64, signal_ticks: u64) -> Self {
        Self {
            clock: ClockMode::Realtime,
            tick,
            batch_ticks,
            signal_ticks,
        }
    }

    /// 从配置构建
    pub fn from_config(config: &SimulationConfig) -> Self {
        let tick = Duration::from_micros(config.tick_us.max(1));
        let clock = match config.clock {
            SimulationClock::Stepped => ClockMode::Stepped,
            SimulationClock::Realtime => ClockMode::Realtime,
        };
        Self {
            clock,
            tick,
            batch_ticks: config.batch_ticks,
            signal_ticks: config.signal_ticks,
        }
    }

    fn ticks_for(&self, timeout: Duration) -> u64 {
        let tick = self.tick.as_nanos().max(1);
        (timeout.as_nanos() / tick).min(u64::MAX as u128) as u64
    }
}

/// 队列中的操作
#[derive(Debug, Clone)]
pub(crate) enum SimOp {
    /// 执行一个命令批次
    Execute {
        allocator: u64,
        commands: usize,
        /// 批次引用的后缓冲（代数，索引）
        targets: Vec<(u64, u32)>,
    },
    /// 把 Fence 设为指定值
    Signal { fence: usize, value: u64 },
}

#[derive(Debug)]
struct PendingOp {
    op: SimOp,
    remaining: u64,
}

#[derive(Debug, Default)]
struct TimelineState {
    clock: u64,
    queue: VecDeque<PendingOp>,
    fences: Vec<u64>,
    /// 每个分配器已提交但尚未执行完的批次数
    in_flight: HashMap<u64, usize>,
    next_allocator: u64,
    executed_batches: u64,
    executed_commands: u64,
    removed: Option<String>,
    /// 再接受若干次提交后移除设备
    scheduled_removal: Option<(u64, String)>,
    violations: Vec<String>,
}

impl TimelineState {
    /// 完成队首所有剩余成本为 0 的操作
    ///
    /// 同一个周期内只扣减队首操作的成本，后面的操作从下一个周期开始计时。
    fn complete_ready(&mut self) {
        while self.queue.front().map_or(false, |op| op.remaining == 0) {
            let Some(done) = self.queue.pop_front() else { break };
            match done.op {
                SimOp::Execute { allocator, commands, .. } => {
                    if let Some(count) = self.in_flight.get_mut(&allocator) {
                        *count = count.saturating_sub(1);
                    }
                    self.executed_batches += 1;
                    self.executed_commands += commands as u64;
                }
                SimOp::Signal { fence, value } => {
                    if let Some(current) = self.fences.get_mut(fence) {
                        *current = (*current).max(value);
                    }
                }
            }
        }
    }

    fn advance(&mut self) {
        self.clock += 1;
        if let Some(head) = self.queue.front_mut() {
            head.remaining = head.remaining.saturating_sub(1);
        }
        self.complete_ready();
    }

    fn check_removed(&self) -> Result<()> {
        match &self.removed {
            Some(reason) => Err(GraphicsError::DeviceLost(reason.clone()).into()),
            None => Ok(()),
        }
    }
}

/// 模拟 GPU 时间线
pub struct SimTimeline {
    settings: TimelineSettings,
    state: Mutex<TimelineState>,
    progress: Condvar,
}

impl SimTimeline {
    /// 创建时间线；实时模式下启动推进时钟的后台线程
    ///
    /// 时钟线程无法启动时返回错误，否则无限等待永远不会返回。
    pub fn new(settings: TimelineSettings) -> Result<Arc<Self>> {
        let timeline = Arc::new(Self {
            settings,
            state: Mutex::new(TimelineState::default()),
            progress: Condvar::new(),
        });

        if settings.clock == ClockMode::Realtime {
            let weak = Arc::downgrade(&timeline);
            thread::Builder::new()
                .name("sim-gpu".to_string())
                .spawn(move || run_clock(weak, settings.tick))
                .map_err(|e| {
                    error!(error = %e, "Failed to spawn simulated GPU clock thread");
                    GraphicsError::DeviceCreation(format!("simulated GPU clock thread: {}", e))
                })?;
        }

        debug!(?settings, "Simulated GPU timeline created");
        Ok(timeline)
    }

    /// 时间线参数
    pub fn settings(&self) -> &TimelineSettings {
        &self.settings
    }

    /// 已经过去的周期数
    pub fn clock(&self) -> u64 {
        self.state.lock().clock
    }

    /// 手动推进时钟
    pub fn tick(&self, ticks: u64) {
        let mut state = self.state.lock();
        for _ in 0..ticks {
            state.advance();
        }
        drop(state);
        self.progress.notify_all();
    }

    /// 队列是否为空
    pub fn is_idle(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// 已执行完的批次数
    pub fn executed_batches(&self) -> u64 {
        self.state.lock().executed_batches
    }

    /// 已执行完的命令数
    pub fn executed_commands(&self) -> u64 {
        self.state.lock().executed_commands
    }

    /// 检测到的同步违规
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// 模拟设备移除（TDR、驱动崩溃）
    pub fn remove_device(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Simulated device removed");
        self.state.lock().removed = Some(reason);
        self.progress.notify_all();
    }

    /// 再接受 `submissions` 次提交后移除设备，之后的提交全部失败
    pub fn remove_device_after(&self, submissions: u64, reason: impl Into<String>) {
        self.state.lock().scheduled_removal = Some((submissions, reason.into()));
    }

    /// 设备是否仍然可用
    pub fn device_status(&self) -> Result<()> {
        self.state.lock().check_removed()
    }

    pub(crate) fn register_fence(&self, initial_value: u64) -> Result<usize> {
        let mut state = self.state.lock();
        state.check_removed()?;
        state.fences.push(initial_value);
        Ok(state.fences.len() - 1)
    }

    pub(crate) fn register_allocator(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state.check_removed()?;
        let id = state.next_allocator;
        state.next_allocator += 1;
        state.in_flight.insert(id, 0);
        Ok(id)
    }

    /// 把操作追加到队列末尾
    pub(crate) fn submit(&self, op: SimOp) -> Result<()> {
        let mut state = self.state.lock();
        state.check_removed()?;
        match state.scheduled_removal.take() {
            Some((0, reason)) => {
                error!(reason = %reason, clock = state.clock, "Simulated device removed");
                state.removed = Some(reason);
                drop(state);
                self.progress.notify_all();
                return self.device_status();
            }
            Some((remaining, reason)) => state.scheduled_removal = Some((remaining - 1, reason)),
            None => {}
        }

        let remaining = match &op {
            SimOp::Execute { allocator, .. } => {
                *state.in_flight.entry(*allocator).or_insert(0) += 1;
                self.settings.batch_ticks
            }
            SimOp::Signal { .. } => self.settings.signal_ticks,
        };
        trace!(?op, remaining, clock = state.clock, "Simulated GPU op queued");
        state.queue.push_back(PendingOp { op, remaining });
        state.complete_ready();
        drop(state);
        self.progress.notify_all();
        Ok(())
    }

    pub(crate) fn fence_value(&self, fence: usize) -> Result<u64> {
        let state = self.state.lock();
        state.check_removed()?;
        Ok(state.fences.get(fence).copied().unwrap_or(0))
    }

    /// 重置分配器前的检查：所有用它提交的批次必须已经执行完
    pub(crate) fn reset_allocator(&self, allocator: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check_removed()?;
        let pending = state.in_flight.get(&allocator).copied().unwrap_or(0);
        if pending > 0 {
            let message = format!(
                "COMMAND_ALLOCATOR_SYNC: allocator {} reset with {} batch(es) still executing",
                allocator, pending
            );
            error!(allocator, pending, clock = state.clock, "Allocator reset before GPU completion");
            state.violations.push(message.clone());
            return Err(GraphicsError::CommandExecution(message).into());
        }
        Ok(())
    }

    /// 调整交换链前的检查：队列中不能有引用后缓冲的批次
    pub(crate) fn check_buffers_released(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_removed()?;
        let referencing = state
            .queue
            .iter()
            .filter(|p| matches!(&p.op, SimOp::Execute { targets, .. } if !targets.is_empty()))
            .count();
        if referencing > 0 {
            let message = format!(
                "back buffers still referenced by {} queued batch(es)",
                referencing
            );
            state.violations.push(message.clone());
            return Err(GraphicsError::SwapchainError(message).into());
        }
        Ok(())
    }

    /// 阻塞直到 Fence 达到 `value`
    pub(crate) fn wait_for_fence(&self, fence: usize, value: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        match self.settings.clock {
            ClockMode::Stepped => self.wait_stepped(fence, value, timeout),
            ClockMode::Realtime => self.wait_realtime(fence, value, timeout),
        }
    }

    fn wait_stepped(&self, fence: usize, value: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let budget = timeout.map(|t| self.settings.ticks_for(t));
        let mut state = self.state.lock();
        let mut spent = 0u64;

        loop {
            state.check_removed()?;
            if state.fences.get(fence).copied().unwrap_or(0) >= value {
                trace!(fence, value, ticks = spent, "Stepped wait satisfied");
                return Ok(WaitOutcome::Ready);
            }
            if budget.map_or(false, |b| spent >= b) {
                return Ok(WaitOutcome::TimedOut);
            }
            if state.queue.is_empty() {
                // 目标值从未被提交，继续推进时钟也不会完成
                return match budget {
                    Some(_) => Ok(WaitOutcome::TimedOut),
                    None => Err(GraphicsError::FenceWait(format!(
                        "fence {} waits for value {} that was never signaled",
                        fence, value
                    ))
                    .into()),
                };
            }
            state.advance();
            spent += 1;
        }
    }

    fn wait_realtime(&self, fence: usize, value: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            state.check_removed()?;
            if state.fences.get(fence).copied().unwrap_or(0) >= value {
                return Ok(WaitOutcome::Ready);
            }
            match deadline {
                Some(deadline) => {
                    if self.progress.wait_until(&mut state, deadline).timed_out() {
                        state.check_removed()?;
                        let reached = state.fences.get(fence).copied().unwrap_or(0) >= value;
                        return Ok(if reached { WaitOutcome::Ready } else { WaitOutcome::TimedOut });
                    }
                }
                None => self.progress.wait(&mut state),
            }
        }
    }
}

/// 实时时钟线程；时间线被释放后退出
fn run_clock(timeline: Weak<SimTimeline>, tick: Duration) {
    loop {
        thread::sleep(tick);
        match timeline.upgrade() {
            Some(timeline) => timeline.tick(1),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_costs() {
        let timeline = SimTimeline::new(TimelineSettings::stepped(2, 0)).unwrap();
        let fence = timeline.register_fence(0).unwrap();
        let allocator = timeline.register_allocator().unwrap();

        timeline
            .submit(SimOp::Execute { allocator, commands: 3, targets: vec![] })
            .unwrap();
        timeline.submit(SimOp::Signal { fence, value: 1 }).unwrap();
        assert_eq!(timeline.fence_value(fence).unwrap(), 0);

        timeline.tick(1);
        assert_eq!(timeline.fence_value(fence).unwrap(), 0);
        assert!(timeline.reset_allocator(allocator).is_err());

        timeline.tick(1);
        assert_eq!(timeline.fence_value(fence).unwrap(), 1);
        assert_eq!(timeline.executed_batches(), 1);
        assert_eq!(timeline.executed_commands(), 3);
        assert!(timeline.reset_allocator(allocator).is_ok());
        assert_eq!(timeline.violations().len(), 1);
    }

    #[test]
    fn test_signal_on_idle_queue_completes_immediately() {
        let timeline = SimTimeline::new(TimelineSettings::stepped(1, 0)).unwrap();
        let fence = timeline.register_fence(0).unwrap();
        timeline.submit(SimOp::Signal { fence, value: 5 }).unwrap();
        assert_eq!(timeline.fence_value(fence).unwrap(), 5);
        assert!(timeline.is_idle());
    }

    #[test]
    fn test_stepped_wait_for_unsignaled_value() {
        let timeline = SimTimeline::new(TimelineSettings::stepped(1, 1)).unwrap();
        let fence = timeline.register_fence(0).unwrap();
        assert!(timeline.wait_for_fence(fence, 1, None).is_err());
        assert_eq!(
            timeline.wait_for_fence(fence, 1, Some(Duration::from_millis(5))).unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_device_removal() {
        let timeline = SimTimeline::new(TimelineSettings::stepped(1, 1)).unwrap();
        let fence = timeline.register_fence(0).unwrap();
        timeline.remove_device("TDR");
        assert!(timeline.submit(SimOp::Signal { fence, value: 1 }).is_err());
        assert!(timeline.fence_value(fence).is_err());
        assert!(timeline.device_status().is_err());
    }

    #[test]
    fn test_scheduled_device_removal() {
        let timeline = SimTimeline::new(TimelineSettings::stepped(1, 1)).unwrap();
        let fence = timeline.register_fence(0).unwrap();
        timeline.remove_device_after(1, "DXGI_ERROR_DEVICE_REMOVED");

        assert!(timeline.submit(SimOp::Signal { fence, value: 1 }).is_ok());
        assert!(timeline.device_status().is_ok());
        let err = timeline.submit(SimOp::Signal { fence, value: 2 }).unwrap_err();
        assert!(err.is_device_lost());
        assert!(timeline.fence_value(fence).unwrap_err().is_device_lost());
    }

    #[test]
    fn test_realtime_clock_makes_progress() {
        let timeline = SimTimeline::new(TimelineSettings::realtime(Duration::from_micros(200), 1, 1)).unwrap();
        let fence = timeline.register_fence(0).unwrap();
        timeline.submit(SimOp::Signal { fence, value: 1 }).unwrap();
        let outcome = timeline
            .wait_for_fence(fence, 1, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
        assert!(timeline.clock() >= 1);
    }
}
