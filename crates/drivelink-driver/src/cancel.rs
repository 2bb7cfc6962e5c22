//! 请求取消令牌
//!
//! 令牌内部持有一个永不发送的 `Sender`；`cancel()` 丢弃它，
//! 所有克隆共享的 `Receiver` 随即断开，`select!` 中的等待立刻被唤醒。

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;

/// 可克隆的取消令牌
#[derive(Debug, Clone)]
pub struct CancelToken {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            signal: rx,
        }
    }

    /// 触发取消（幂等）
    pub fn cancel(&self) {
        self.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.trigger.lock().is_none()
    }

    /// 取消后立即就绪的接收端
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
