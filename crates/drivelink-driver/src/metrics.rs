//! 链路指标
//!
//! 原子计数器，任意线程可读，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 接收帧总数
    pub rx_frames_total: AtomicU64,
    /// 心跳帧
    pub rx_heartbeats: AtomicU64,
    /// 与挂起请求匹配的回复
    pub rx_replies_matched: AtomicU64,
    /// 无人认领的端点帧（含迟到回复）
    pub rx_unsolicited: AtomicU64,
    /// 总线上观察到的请求形状帧（其他主机发出）
    pub rx_request_frames: AtomicU64,
    /// 无法解析的帧
    pub rx_unrecognized: AtomicU64,
    /// 发送帧总数（含重试）
    pub tx_frames_total: AtomicU64,
    /// 发送失败
    pub tx_errors: AtomicU64,
    /// 发起的请求数
    pub requests_started: AtomicU64,
    /// 成功完成的请求数
    pub requests_completed: AtomicU64,
    /// 重发次数
    pub retries: AtomicU64,
    /// 最终超时的请求数
    pub timeouts: AtomicU64,
    /// 被取消的请求数
    pub cancellations: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_heartbeats: self.rx_heartbeats.load(Ordering::Relaxed),
            rx_replies_matched: self.rx_replies_matched.load(Ordering::Relaxed),
            rx_unsolicited: self.rx_unsolicited.load(Ordering::Relaxed),
            rx_request_frames: self.rx_request_frames.load(Ordering::Relaxed),
            rx_unrecognized: self.rx_unrecognized.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            requests_started: self.requests_started.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.rx_frames_total,
            &self.rx_heartbeats,
            &self.rx_replies_matched,
            &self.rx_unsolicited,
            &self.rx_request_frames,
            &self.rx_unrecognized,
            &self.tx_frames_total,
            &self.tx_errors,
            &self.requests_started,
            &self.requests_completed,
            &self.retries,
            &self.timeouts,
            &self.cancellations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_frames_total: u64,
    pub rx_heartbeats: u64,
    pub rx_replies_matched: u64,
    pub rx_unsolicited: u64,
    pub rx_request_frames: u64,
    pub rx_unrecognized: u64,
    pub tx_frames_total: u64,
    pub tx_errors: u64,
    pub requests_started: u64,
    pub requests_completed: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub cancellations: u64,
}

impl MetricsSnapshot {
    /// 重发占发送帧的百分比
    pub fn retry_rate(&self) -> f64 {
        if self.tx_frames_total == 0 {
            return 0.0;
        }
        (self.retries as f64 / self.tx_frames_total as f64) * 100.0
    }

    /// 超时占已发起请求的百分比
    pub fn timeout_rate(&self) -> f64 {
        if self.requests_started == 0 {
            return 0.0;
        }
        (self.timeouts as f64 / self.requests_started as f64) * 100.0
    }
}
