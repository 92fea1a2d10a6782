//! 图形后端接口
//!
//! 帧同步核心（`sync`、`frame`、`present`、`device`）只通过本模块定义的 trait
//! 与具体图形 API 交互。每个后端提供一个实现 [`GpuBackend`] 的标记类型，
//! 用关联类型把设备、命令队列、Fence、命令记录器和交换链绑定成一族。
//!
//! 目前的实现：
//!
//! - `gfx::dx12::Dx12Backend`：DirectX 12（仅 Windows）
//! - `gfx::sim::SimBackend`：模拟 GPU 时间线，用于测试与无窗口运行

use std::time::Duration;

use raw_window_handle::RawWindowHandle;

use crate::core::error::Result;
use crate::renderer::device::AdapterInfo;

/// 图形后端族
pub trait GpuBackend: Sized + 'static {
    /// 逻辑设备
    type Device: GpuDevice<Self>;
    /// 命令提交通道
    type Queue: CommandQueue<Self>;
    /// GPU Fence 与其等待句柄
    type Fence: GpuFence;
    /// 命令分配器 + 命令列表
    type Recorder: CommandRecorder<Self>;
    /// 交换链
    type SwapChain: SwapChain<Self>;
    /// 后缓冲及其渲染目标视图
    type BackBuffer;

    /// 后端名称，用于日志
    const NAME: &'static str;
}

/// 逻辑设备
///
/// 只负责创建其他对象，不直接提交命令。
pub trait GpuDevice<B: GpuBackend> {
    /// 创建设备时选中的适配器
    fn adapter(&self) -> &AdapterInfo;

    /// 创建直接命令队列
    fn create_command_queue(&self) -> Result<B::Queue>;

    /// 创建 Fence 以及与之配套的可复用等待句柄
    fn create_fence(&self, initial_value: u64) -> Result<B::Fence>;

    /// 创建一组命令分配器 + 命令列表（创建后处于关闭状态）
    fn create_recorder(&self) -> Result<B::Recorder>;

    /// 在给定队列上创建交换链
    fn create_swap_chain(&self, queue: &B::Queue, desc: &SwapChainDesc) -> Result<B::SwapChain>;

    /// 检查设备是否已被移除
    fn check_device_status(&self) -> Result<()>;
}

/// 命令提交通道
///
/// 同一队列上的批次严格按提交顺序执行。
pub trait CommandQueue<B: GpuBackend> {
    /// 提交一个已关闭的命令列表
    fn execute(&self, recorder: &B::Recorder) -> Result<()>;

    /// 在队列末尾插入一条信号指令：之前提交的工作全部完成后，GPU 把 `fence` 设为 `value`
    fn signal(&self, fence: &B::Fence, value: u64) -> Result<()>;
}

/// GPU Fence
pub trait GpuFence {
    /// GPU 已经完成的最大值（不阻塞）
    fn completed_value(&self) -> Result<u64>;

    /// 阻塞当前线程直到完成值达到 `value` 或超时
    ///
    /// `timeout` 为 `None` 表示无限等待。调用方保证调用时 `value` 尚未完成。
    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<WaitOutcome>;
}

/// 命令分配器 + 命令列表
pub trait CommandRecorder<B: GpuBackend> {
    /// 重置分配器并让列表回到可记录状态
    ///
    /// 只有在此前用它提交的所有命令都已被 GPU 执行完之后才能调用。
    fn reset(&mut self) -> Result<()>;

    /// 记录资源状态转换
    fn transition(&mut self, target: &B::BackBuffer, before: ResourceState, after: ResourceState) -> Result<()>;

    /// 记录清屏命令
    fn clear_render_target(&mut self, target: &B::BackBuffer, color: [f32; 4]) -> Result<()>;

    /// 关闭列表，使其可以提交
    fn close(&mut self) -> Result<()>;

    /// 列表是否处于记录状态
    fn is_recording(&self) -> bool;
}

/// 交换链
pub trait SwapChain<B: GpuBackend> {
    /// 呈现层是否支持撕裂（无上限帧率）
    fn tearing_supported(&self) -> bool;

    /// 调整后缓冲尺寸与数量
    ///
    /// 调用前必须释放所有后缓冲引用，并保证 GPU 上没有引用它们的工作。
    fn resize_buffers(&mut self, width: u32, height: u32, buffer_count: u32) -> Result<()>;

    /// 获取全部后缓冲并为每个创建渲染目标视图
    fn acquire_back_buffers(&mut self, buffer_count: u32) -> Result<Vec<B::BackBuffer>>;

    /// 平台当前认为应当渲染的后缓冲索引
    fn current_back_buffer_index(&self) -> u32;

    /// 请求呈现当前后缓冲（非阻塞）
    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> Result<()>;
}

/// 交换链创建参数
#[derive(Debug, Clone)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    /// 呈现层支持时以允许撕裂的方式创建
    pub allow_tearing: bool,
    /// 原生窗口句柄；无窗口后端为 `None`
    pub window: Option<RawWindowHandle>,
}

/// Fence 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 目标值已完成
    Ready,
    /// 超时，GPU 工作仍在进行
    TimedOut,
}

/// 后缓冲资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
}
