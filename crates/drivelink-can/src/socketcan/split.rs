//! SocketCAN 读写分离适配器

use super::{read_drive_frame, to_can_frame};
use crate::{CanError, DriveFrame, RxAdapter, TxAdapter};
use socketcan::{CanSocket, Socket};
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::trace;

/// 只读半部
pub struct SocketCanRxAdapter {
    socket: CanSocket,
    read_timeout: Duration,
}

impl SocketCanRxAdapter {
    pub fn new(socket: &CanSocket, read_timeout: Duration) -> Result<Self, CanError> {
        let rx_socket = socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for RX: {}",
                e
            )))
        })?;
        rx_socket.set_read_timeout(read_timeout).map_err(CanError::Io)?;
        Ok(Self {
            socket: rx_socket,
            read_timeout,
        })
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl RxAdapter for SocketCanRxAdapter {
    fn receive(&mut self) -> Result<DriveFrame, CanError> {
        let frame = read_drive_frame(&self.socket)?;
        trace!("RX: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(frame)
    }
}

/// 只写半部
pub struct SocketCanTxAdapter {
    socket: CanSocket,
}

impl SocketCanTxAdapter {
    pub fn new(socket: &CanSocket) -> Result<Self, CanError> {
        let tx_socket = socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for TX: {}",
                e
            )))
        })?;
        // 总线拥塞时发送最多阻塞 5ms，不拖住后续请求
        tx_socket
            .set_write_timeout(Duration::from_millis(5))
            .map_err(CanError::Io)?;
        Ok(Self { socket: tx_socket })
    }
}

impl TxAdapter for SocketCanTxAdapter {
    fn send(&mut self, frame: DriveFrame) -> Result<(), CanError> {
        let can_frame = to_can_frame(&frame)?;
        self.socket.write_frame(&can_frame).map_err(CanError::Io)?;
        trace!("TX: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }
}
