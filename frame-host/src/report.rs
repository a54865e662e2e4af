//! # Report 模块
//!
//! 场景运行结果：帧统计、遥测窗口、各生产者的最终状态。

use std::fmt::Write as _;

use frame_sched::{CoalescerStats, ElementId, PointerPosition, TelemetrySnapshot, ViewportSize};
use serde::Serialize;

/// 帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// 模拟帧源提供的帧数
    pub offered: u64,
    /// 实际派发给时钟的帧数
    pub ticked: u64,
    /// 模拟掉帧
    pub dropped: u64,
    /// 时钟没有请求帧的空闲帧
    pub idle: u64,
    /// 时钟向宿主请求帧的次数
    pub host_requests: u64,
    /// 被隔离的回调 panic 次数
    pub failed_callbacks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterReport {
    pub id: String,
    pub value: f64,
    pub text: String,
    pub started: bool,
    pub complete: bool,
    pub first_frame_ms: Option<f64>,
    pub completed_at_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub id: String,
    pub percent: f64,
    pub complete: bool,
    pub completed_at_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallaxReport {
    pub id: String,
    pub offset: f64,
    pub stats: CoalescerStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrollReport {
    pub current: f64,
    pub target: f64,
    pub settled: bool,
    pub stats: CoalescerStats,
}

/// 一次可见性变化（Always 模式）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibilityChange {
    pub element: ElementId,
    pub visible: bool,
    pub at_ms: f64,
}

/// 场景运行报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub simulated_ms: f64,
    pub frames: FrameStats,
    pub telemetry: Vec<TelemetrySnapshot>,
    pub counters: Vec<CounterReport>,
    pub progress: Vec<ProgressReport>,
    pub parallax: Vec<ParallaxReport>,
    pub scroll: Option<ScrollReport>,
    pub pointer: Option<PointerPosition>,
    pub viewport: ViewportSize,
    pub resize_notifications: u32,
    pub visibility: Vec<VisibilityChange>,
    pub active_watches: usize,
    pub events_dispatched: u64,
}

impl RunReport {
    /// 序列化为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 所有已关闭窗口的平均帧率
    pub fn average_fps(&self) -> Option<f64> {
        if self.telemetry.is_empty() {
            return None;
        }
        let total: u32 = self.telemetry.iter().map(|s| s.reading.fps).sum();
        Some(f64::from(total) / self.telemetry.len() as f64)
    }

    /// 计数器
    pub fn counter(&self, id: &str) -> Option<&CounterReport> {
        self.counters.iter().find(|c| c.id == id)
    }

    /// 进度条
    pub fn progress(&self, id: &str) -> Option<&ProgressReport> {
        self.progress.iter().find(|p| p.id == id)
    }

    /// 人类可读的摘要
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "场景: {} ({} ms)", self.scenario, self.simulated_ms);
        let _ = writeln!(
            out,
            "帧: 提供 {} / 派发 {} / 掉帧 {} / 空闲 {}",
            self.frames.offered, self.frames.ticked, self.frames.dropped, self.frames.idle
        );
        if self.frames.failed_callbacks > 0 {
            let _ = writeln!(out, "回调 panic: {}", self.frames.failed_callbacks);
        }

        for snapshot in &self.telemetry {
            let _ = writeln!(
                out,
                "  窗口 #{}: {} fps, {:.2} ms/帧, {:.1} MB, {:?}",
                snapshot.window_index,
                snapshot.reading.fps,
                snapshot.reading.frame_time_ms,
                snapshot.reading.memory_mb,
                snapshot.quality
            );
        }
        for counter in &self.counters {
            let state = if counter.complete {
                "完成"
            } else if counter.started {
                "进行中"
            } else {
                "未触发"
            };
            let _ = writeln!(out, "计数器 {}: {} ({state})", counter.id, counter.text);
        }
        for progress in &self.progress {
            let _ = writeln!(out, "进度条 {}: {:.1}%", progress.id, progress.percent);
        }
        for layer in &self.parallax {
            let _ = writeln!(
                out,
                "视差层 {}: 位移 {:.1}, 请求 {} / 派发 {}",
                layer.id, layer.offset, layer.stats.requests, layer.stats.dispatched
            );
        }
        if let Some(scroll) = &self.scroll {
            let _ = writeln!(
                out,
                "平滑滚动: {:.1} → {:.1}{}",
                scroll.current,
                scroll.target,
                if scroll.settled { "（已稳定）" } else { "" }
            );
        }
        if let Some(pointer) = &self.pointer {
            let _ = writeln!(
                out,
                "指针: ({:.0}, {:.0}) 归一化 ({:.2}, {:.2})",
                pointer.x, pointer.y, pointer.nx, pointer.ny
            );
        }
        for change in &self.visibility {
            let _ = writeln!(
                out,
                "可见性 {} @ {:.0} ms: {}",
                change.element,
                change.at_ms,
                if change.visible { "进入" } else { "离开" }
            );
        }
        out
    }
}
