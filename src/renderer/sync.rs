//! Fence 同步器
//!
//! 用一个 GPU Fence 和一个单调递增的计数器表达 CPU 与 GPU 之间的同步。
//!
//! # 工作方式
//!
//! - `signal`：计数器加一，并在队列末尾插入 "把 Fence 设为该值" 的指令，
//!   返回的 [`CompletionToken`] 代表 "此前提交的全部工作"
//! - `wait`：Fence 完成值已经达到 token 时立即返回，否则阻塞在可复用的等待句柄上
//! - `flush`：`wait(signal())`，等待队列排空
//!
//! # 使用场景
//!
//! 1. **帧同步**：帧资源环在复用某个槽位前等待该槽位记录的 token
//! 2. **尺寸变化**：重建后缓冲前 flush
//! 3. **关闭**：释放任何 GPU 对象之前 flush

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{CommandQueue, GpuBackend, GpuDevice, GpuFence, WaitOutcome};

/// 完成令牌
///
/// `signal` 返回的 Fence 值。Fence 完成值 >= 令牌值时，令牌之前提交的工作全部完成。
/// 值 0 表示 "没有需要等待的工作"，永远视为已完成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CompletionToken(u64);

impl CompletionToken {
    /// 无需等待的令牌
    pub const SATISFIED: Self = Self(0);

    /// 从原始 Fence 值创建
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 原始 Fence 值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 是否为初始哨兵值
    pub fn is_satisfied_sentinel(&self) -> bool {
        self.0 == 0
    }
}

/// Fence 同步器
pub struct FenceSynchronizer<B: GpuBackend> {
    queue: Arc<B::Queue>,
    fence: B::Fence,
    /// 最近一次分配的令牌值（CPU 侧）
    last_signaled: AtomicU64,
    /// 观察到的最大完成值，保证对外报告的完成值不回退
    observed_completed: AtomicU64,
    /// 真正阻塞过的等待次数
    blocking_waits: AtomicU64,
}

impl<B: GpuBackend> FenceSynchronizer<B> {
    /// 创建初值为 0 的 Fence 和等待句柄
    pub fn new(device: &B::Device, queue: Arc<B::Queue>) -> Result<Self> {
        let fence = device.create_fence(0)?;
        Ok(Self {
            queue,
            fence,
            last_signaled: AtomicU64::new(0),
            observed_completed: AtomicU64::new(0),
            blocking_waits: AtomicU64::new(0),
        })
    }

    /// 在队列末尾插入信号，返回新令牌
    ///
    /// 即使信号指令提交失败，计数器也已经前进，之后的令牌仍然严格递增。
    pub fn signal(&self) -> Result<CompletionToken> {
        let value = self.last_signaled.fetch_add(1, Ordering::AcqRel) + 1;

        if let Err(e) = self.queue.signal(&self.fence, value) {
            error!(value, error = %e, "Failed to enqueue fence signal");
            return Err(e);
        }

        trace!(value, "Fence signal enqueued");
        Ok(CompletionToken(value))
    }

    /// 最近一次分配的令牌
    pub fn last_signaled(&self) -> CompletionToken {
        CompletionToken(self.last_signaled.load(Ordering::Acquire))
    }

    /// GPU 已完成的最大 Fence 值（不阻塞）
    pub fn completed_value(&self) -> Result<u64> {
        let reported = self.fence.completed_value()?;
        let previous = self.observed_completed.fetch_max(reported, Ordering::AcqRel);
        Ok(previous.max(reported))
    }

    /// 令牌是否已完成（不阻塞）
    pub fn is_complete(&self, token: CompletionToken) -> Result<bool> {
        Ok(self.completed_value()? >= token.value())
    }

    /// 所有已分配的令牌是否都已完成
    pub fn is_idle(&self) -> Result<bool> {
        self.is_complete(self.last_signaled())
    }

    /// 真正阻塞过的等待次数
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits.load(Ordering::Relaxed)
    }

    /// 等待令牌完成
    ///
    /// 令牌已完成时不进行任何阻塞调用。`timeout` 为 `None` 表示无限等待。
    pub fn wait(&self, token: CompletionToken, timeout: Option<Duration>) -> Result<WaitOutcome> {
        if self.is_complete(token)? {
            return Ok(WaitOutcome::Ready);
        }

        self.blocking_waits.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let outcome = self.fence.wait_for_value(token.value(), timeout)?;

        match outcome {
            WaitOutcome::Ready => {
                let completed = self.completed_value()?;
                if completed < token.value() {
                    return Err(GraphicsError::FenceWait(format!(
                        "wait for {} returned with completed value {}",
                        token.value(),
                        completed
                    ))
                    .into());
                }
                trace!(
                    token = token.value(),
                    waited_us = start.elapsed().as_micros() as u64,
                    "Fence wait satisfied"
                );
            }
            WaitOutcome::TimedOut => {
                warn!(
                    token = token.value(),
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Fence wait timed out"
                );
            }
        }

        Ok(outcome)
    }

    /// 等待令牌完成，超时视为 GPU 停滞错误
    pub fn wait_or_stall(&self, token: CompletionToken, timeout: Option<Duration>) -> Result<()> {
        let start = Instant::now();
        match self.wait(token, timeout)? {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut => Err(GraphicsError::GpuStall {
                token: token.value(),
                completed: self.completed_value()?,
                waited_ms: start.elapsed().as_millis() as u64,
            }
            .into()),
        }
    }

    /// 等待之前提交的全部工作完成
    pub fn flush(&self) -> Result<CompletionToken> {
        let token = self.signal()?;
        match self.wait(token, None)? {
            WaitOutcome::Ready => Ok(token),
            WaitOutcome::TimedOut => Err(GraphicsError::FenceWait(format!(
                "unbounded wait for {} reported a timeout",
                token.value()
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{SimBackend, SimDevice, TimelineSettings};
    use crate::renderer::device::DeviceContext;

    fn synchronizer(settings: TimelineSettings) -> (DeviceContext<SimBackend>, FenceSynchronizer<SimBackend>) {
        let device = SimDevice::single_adapter(settings).unwrap();
        let context = DeviceContext::<SimBackend>::new(device).unwrap();
        let sync = FenceSynchronizer::new(context.device(), context.queue().clone()).unwrap();
        (context, sync)
    }

    #[test]
    fn test_completion_token() {
        assert!(CompletionToken::SATISFIED.is_satisfied_sentinel());
        assert_eq!(CompletionToken::default(), CompletionToken::SATISFIED);
        assert!(CompletionToken::new(1) < CompletionToken::new(2));
        assert_eq!(CompletionToken::new(7).value(), 7);
    }

    #[test]
    fn test_tokens_strictly_increase() {
        let (_context, sync) = synchronizer(TimelineSettings::stepped(1, 1));
        let t1 = sync.signal().unwrap();
        let t2 = sync.signal().unwrap();
        let t3 = sync.signal().unwrap();
        assert_eq!((t1.value(), t2.value(), t3.value()), (1, 2, 3));
        assert_eq!(sync.last_signaled(), t3);
    }

    #[test]
    fn test_wait_blocks_exactly_until_token() {
        let (context, sync) = synchronizer(TimelineSettings::stepped(1, 1));
        let timeline = context.device().timeline().clone();

        let t1 = sync.signal().unwrap();
        let t2 = sync.signal().unwrap();
        let _t3 = sync.signal().unwrap();
        assert_eq!(timeline.clock(), 0);

        assert_eq!(sync.wait(t2, None).unwrap(), WaitOutcome::Ready);
        assert_eq!(timeline.clock(), 2);
        assert_eq!(sync.completed_value().unwrap(), 2);
        assert_eq!(sync.blocking_waits(), 1);

        // 已完成的令牌不触发任何阻塞调用
        assert_eq!(sync.wait(t1, None).unwrap(), WaitOutcome::Ready);
        assert_eq!(timeline.clock(), 2);
        assert_eq!(sync.blocking_waits(), 1);
    }

    #[test]
    fn test_sentinel_never_blocks() {
        let (_context, sync) = synchronizer(TimelineSettings::stepped(1, 1));
        assert_eq!(sync.wait(CompletionToken::SATISFIED, None).unwrap(), WaitOutcome::Ready);
        assert_eq!(sync.blocking_waits(), 0);
    }

    #[test]
    fn test_timeout_then_completion() {
        let (_context, sync) = synchronizer(TimelineSettings::stepped(1, 4));
        let token = sync.signal().unwrap();

        assert_eq!(sync.wait(token, Some(Duration::ZERO)).unwrap(), WaitOutcome::TimedOut);
        let stalled = sync.wait_or_stall(token, Some(Duration::from_millis(2))).unwrap_err();
        assert!(stalled.is_stall());

        assert_eq!(sync.wait(token, None).unwrap(), WaitOutcome::Ready);
        assert!(sync.is_complete(token).unwrap());
    }

    #[test]
    fn test_completed_value_is_monotonic_and_bounded() {
        let (context, sync) = synchronizer(TimelineSettings::stepped(1, 2));
        let timeline = context.device().timeline().clone();
        let mut previous = 0;

        for round in 0..20u64 {
            for _ in 0..(round % 3) {
                sync.signal().unwrap();
            }
            timeline.tick(round % 4);

            let completed = sync.completed_value().unwrap();
            assert!(completed >= previous);
            assert!(completed <= sync.last_signaled().value());
            previous = completed;
        }
    }

    #[test]
    fn test_flush_drains_queue() {
        let (_context, sync) = synchronizer(TimelineSettings::stepped(3, 1));
        for _ in 0..5 {
            sync.signal().unwrap();
        }
        let token = sync.flush().unwrap();
        assert_eq!(token.value(), 6);
        assert!(sync.completed_value().unwrap() >= token.value());
        assert!(sync.is_idle().unwrap());
    }

    #[test]
    fn test_counter_advances_when_signal_fails() {
        let (context, sync) = synchronizer(TimelineSettings::stepped(1, 1));
        sync.signal().unwrap();
        context.device().timeline().remove_device("hung");

        let err = sync.signal().unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(sync.last_signaled().value(), 2);
        assert!(sync.wait(CompletionToken::new(2), None).unwrap_err().is_device_lost());
    }

    #[test]
    fn test_realtime_flush() {
        let (_context, sync) = synchronizer(TimelineSettings::realtime(Duration::from_micros(100), 2, 1));
        let token = sync.flush().unwrap();
        assert!(sync.completed_value().unwrap() >= token.value());
    }
}
