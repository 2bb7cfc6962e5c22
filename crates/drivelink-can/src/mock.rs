//! 进程内 Mock 总线
//!
//! 主机侧拿到实现 `CanAdapter` / `SplittableAdapter` 的 [`MockCanAdapter`]，
//! 设备侧拿到 [`MockDevice`]，用于在测试中模拟节点行为（回复、静默、注入故障）。

use crate::{
    CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, DriveFrame, RxAdapter,
    SplittableAdapter, TxAdapter,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default)]
struct Shared {
    fail_sends: AtomicBool,
    frames_sent: AtomicU64,
}

/// Mock 总线工厂
pub struct MockBus;

impl MockBus {
    /// 创建一对相连的主机/设备端点
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MockCanAdapter, MockDevice) {
        let (host_tx, device_rx) = unbounded();
        let (device_tx, host_rx) = unbounded();
        let shared = Arc::new(Shared::default());

        let host = MockCanAdapter {
            tx: host_tx,
            rx: host_rx,
            read_timeout: Duration::from_millis(2),
            shared: Arc::clone(&shared),
        };
        let device = MockDevice {
            rx: device_rx,
            tx: device_tx,
            shared,
        };
        (host, device)
    }
}

fn disconnected() -> CanError {
    CanError::Device(CanDeviceError::new(
        CanDeviceErrorKind::NoDevice,
        "mock bus disconnected",
    ))
}

fn send_on(tx: &Sender<DriveFrame>, shared: &Shared, frame: DriveFrame) -> Result<(), CanError> {
    if shared.fail_sends.load(Ordering::Acquire) {
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::Backend,
            "injected send failure",
        )));
    }
    tx.send(frame).map_err(|_| disconnected())?;
    shared.frames_sent.fetch_add(1, Ordering::Relaxed);
    trace!("mock TX: ID=0x{:X}, len={}", frame.id, frame.len);
    Ok(())
}

fn receive_on(rx: &Receiver<DriveFrame>, timeout: Duration) -> Result<DriveFrame, CanError> {
    match rx.recv_timeout(timeout) {
        Ok(frame) => Ok(frame),
        Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
        Err(RecvTimeoutError::Disconnected) => Err(disconnected()),
    }
}

/// 主机侧 Mock 适配器
pub struct MockCanAdapter {
    tx: Sender<DriveFrame>,
    rx: Receiver<DriveFrame>,
    read_timeout: Duration,
    shared: Arc<Shared>,
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: DriveFrame) -> Result<(), CanError> {
        send_on(&self.tx, &self.shared, frame)
    }

    fn receive(&mut self) -> Result<DriveFrame, CanError> {
        receive_on(&self.rx, self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableAdapter for MockCanAdapter {
    type RxAdapter = MockRxAdapter;
    type TxAdapter = MockTxAdapter;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        Ok((
            MockRxAdapter {
                rx: self.rx,
                read_timeout: self.read_timeout,
            },
            MockTxAdapter {
                tx: self.tx,
                shared: self.shared,
            },
        ))
    }
}

/// Mock 接收半部
pub struct MockRxAdapter {
    rx: Receiver<DriveFrame>,
    read_timeout: Duration,
}

impl RxAdapter for MockRxAdapter {
    fn receive(&mut self) -> Result<DriveFrame, CanError> {
        receive_on(&self.rx, self.read_timeout)
    }
}

/// Mock 发送半部
pub struct MockTxAdapter {
    tx: Sender<DriveFrame>,
    shared: Arc<Shared>,
}

impl TxAdapter for MockTxAdapter {
    fn send(&mut self, frame: DriveFrame) -> Result<(), CanError> {
        send_on(&self.tx, &self.shared, frame)
    }
}

/// 设备侧句柄
///
/// 可克隆：克隆共用同一对通道，主机发出的每一帧只会被 **一个** 克隆收到（竞争消费，而非广播）。
/// 模拟多个节点时，应由单个接收循环按帧中的节点 ID 分发；克隆适合只向主机注入帧的场景。
#[derive(Clone)]
pub struct MockDevice {
    rx: Receiver<DriveFrame>,
    tx: Sender<DriveFrame>,
    shared: Arc<Shared>,
}

impl MockDevice {
    /// 等待主机发出的下一帧
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DriveFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<DriveFrame> {
        self.rx.try_recv().ok()
    }

    /// 向主机发送一帧（主机已断开时返回 `false`）
    pub fn send(&self, frame: DriveFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// 注入发送故障：之后主机侧所有 `send` 失败
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::Release);
    }

    /// 主机成功发出的帧数
    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }
}
