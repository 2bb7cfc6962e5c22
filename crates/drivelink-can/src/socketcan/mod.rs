//! SocketCAN CAN 适配器实现
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **接口配置**：波特率等配置由系统工具（`ip link`）完成，不在应用层设置
//! - 时间戳为软件时间戳（接收时刻的系统时间）

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, DriveFrame};
use socketcan::{
    CanError as SocketCanError, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket,
    StandardId,
};
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, trace, warn};

pub mod split;

pub use split::{SocketCanRxAdapter, SocketCanTxAdapter};

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use drivelink_can::{CanAdapter, DriveFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// adapter.send(DriveFrame::new_remote(0x69)).unwrap();
/// let reply = adapter.receive().unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 CAN 接口
    ///
    /// 关闭回环：本机发出的请求帧不应再被自己的接收线程看到。
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NotFound,
                format!(
                    "Failed to open CAN interface '{}': {}. Is it up?\n  sudo ip link set up {}",
                    interface, e, interface
                ),
            ))
        })?;

        let loopback_enabled: libc::c_int = 0;
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_LOOPBACK,
                &loopback_enabled as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            warn!(
                "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
                interface,
                io::Error::last_os_error()
            );
        }

        // 默认 2ms，与 LinkConfig::receive_timeout_ms 一致，保证 IO 线程及时响应退出
        let read_timeout = Duration::from_millis(2);
        socket.set_read_timeout(read_timeout).map_err(CanError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);
        Ok(Self {
            socket,
            interface,
            read_timeout,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        self.socket.set_read_timeout(timeout).map_err(CanError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }
}

/// DriveFrame -> CanFrame
pub(crate) fn to_can_frame(frame: &DriveFrame) -> Result<CanFrame, CanError> {
    let built = if frame.is_extended {
        ExtendedId::new(frame.id).and_then(|id| {
            if frame.is_remote {
                CanFrame::new_remote(id, 0)
            } else {
                CanFrame::new(id, frame.data_slice())
            }
        })
    } else {
        StandardId::new(frame.id as u16).and_then(|id| {
            if frame.is_remote {
                CanFrame::new_remote(id, 0)
            } else {
                CanFrame::new(id, frame.data_slice())
            }
        })
    };
    built.ok_or_else(|| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidFrame,
            format!("Failed to create frame with ID 0x{:X}", frame.id),
        ))
    })
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// 阻塞读取下一个数据帧 / 远程帧，错误帧按类别上报或跳过
pub(crate) fn read_drive_frame(socket: &CanSocket) -> Result<DriveFrame, CanError> {
    loop {
        let can_frame = match socket.read_frame() {
            Ok(f) => f,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(CanError::Timeout);
            },
            Err(e) => return Err(CanError::Io(e)),
        };

        if let CanFrame::Error(error_frame) = can_frame {
            match SocketCanError::from(error_frame) {
                SocketCanError::BusOff => {
                    error!("CAN Bus Off error detected");
                    return Err(CanError::BusOff);
                },
                SocketCanError::ControllerProblem(problem)
                    if problem.to_string().to_lowercase().contains("overflow") =>
                {
                    error!("CAN Buffer Overflow detected: {}", problem);
                    return Err(CanError::BufferOverflow);
                },
                other => {
                    warn!("CAN Error Frame received: {}, ignoring", other);
                    continue;
                },
            }
        }

        let mut frame = if can_frame.is_extended() {
            DriveFrame::new_extended(can_frame.raw_id(), can_frame.data())
        } else {
            DriveFrame::new_standard(can_frame.raw_id() as u16, can_frame.data())
        };
        if can_frame.is_remote_frame() {
            frame.is_remote = true;
            frame.len = 0;
        }
        frame.timestamp_us = now_us();
        return Ok(frame);
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("SocketCAN interface '{}' closed", self.interface);
    }
}

use crate::SplittableAdapter;

impl SplittableAdapter for SocketCanAdapter {
    type RxAdapter = SocketCanRxAdapter;
    type TxAdapter = SocketCanTxAdapter;

    /// 分离为独立的 RX 和 TX 适配器
    ///
    /// 两个半部通过 `dup()` 共享同一个打开文件描述，超时只能依赖
    /// `SO_RCVTIMEO` / `SO_SNDTIMEO`，严禁切换为非阻塞模式。
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        let rx_adapter = SocketCanRxAdapter::new(&self.socket, self.read_timeout)?;
        let tx_adapter = SocketCanTxAdapter::new(&self.socket)?;
        trace!(
            "SocketCanAdapter split into RX and TX adapters (interface: {})",
            self.interface
        );
        Ok((rx_adapter, tx_adapter))
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: DriveFrame) -> Result<(), CanError> {
        let can_frame = to_can_frame(&frame)?;
        self.socket.write_frame(&can_frame).map_err(CanError::Io)?;
        trace!(
            "Sent CAN frame: ID=0x{:X}, len={}, rtr={}",
            frame.id, frame.len, frame.is_remote
        );
        Ok(())
    }

    fn receive(&mut self) -> Result<DriveFrame, CanError> {
        let frame = read_drive_frame(&self.socket)?;
        trace!(
            "Received CAN frame: ID=0x{:X}, len={}, rtr={}",
            frame.id, frame.len, frame.is_remote
        );
        Ok(frame)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<DriveFrame, CanError> {
        // SO_RCVTIMEO 为 0 表示永久阻塞
        let timeout = timeout.max(Duration::from_micros(1));
        let old_timeout = self.read_timeout;
        self.set_read_timeout(timeout)?;
        let result = self.receive();
        let _ = self.set_read_timeout(old_timeout);
        result
    }
}
