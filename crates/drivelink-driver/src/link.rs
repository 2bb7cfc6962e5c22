//! 链路 API 模块
//!
//! 提供对外的 `DriveLink` 结构体，封装 IO 线程、请求关联与节点注册表。

use crate::cancel::CancelToken;
use crate::config::LinkConfig;
use crate::correlator::{AcquireError, PendingRequest, RequestInfo, RequestTicket};
use crate::error::DriverError;
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::pipeline::*;
use crate::registry::{Node, NodeEvent};
use crossbeam_channel::{Receiver, Sender, never, select};
use drivelink_can::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, SplittableAdapter};
use drivelink_protocol::{
    CMD_GET_VERSION, DeviceVersion, Direction, EndpointDescriptor, EndpointMessage, EndpointTable,
    TypeTag, Value, build_request, decode, encode,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 看门狗线程代为 join，超时后留给进程退出时回收
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(Box::new(
                std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "Thread panicked during join",
                ),
            )),
        }
    }
}

/// 一次关联请求的描述
struct Exchange<'a> {
    node_id: u8,
    endpoint_name: &'a str,
    endpoint_id: u16,
    direction: Direction,
    payload: &'a [u8],
    expected_reply: bool,
}

/// CAN 端点链路（对外 API）
///
/// 支持单线程和双线程两种模式
/// - 单线程模式：使用 `io_thread`
/// - 双线程模式：使用 `rx_thread` 和 `tx_thread`
///
/// 所有方法都可以跨线程并发调用；对同一 `(node, endpoint)` 的请求按 FIFO 串行化。
pub struct DriveLink {
    /// 发送队列；Drop 时先于 join 关闭，IO 线程据此退出
    tx: Option<Sender<TxRequest>>,
    ctx: Arc<LinkContext>,
    schema: EndpointTable,
    config: LinkConfig,
    io_thread: Option<JoinHandle<()>>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
    /// CAN 接口名称（仅用于日志）
    interface: String,
}

impl DriveLink {
    /// 创建单线程模式的链路
    ///
    /// # 参数
    /// - `can`: CAN 适配器（会被移动到 IO 线程）
    /// - `schema`: 端点表
    /// - `config`: 链路配置
    pub fn new(
        can: impl CanAdapter + Send + 'static,
        schema: EndpointTable,
        config: LinkConfig,
    ) -> Result<Self, DriverError> {
        config.validate()?;

        let (tx, tx_rx) = crossbeam_channel::bounded(config.tx_queue_capacity);
        let ctx = Arc::new(LinkContext::new(config.node_stale_timeout()));

        let ctx_clone = ctx.clone();
        let receive_timeout = config.receive_timeout();
        let io_thread = spawn(move || {
            io_loop(can, tx_rx, ctx_clone, receive_timeout);
        });

        Ok(Self {
            tx: Some(tx),
            ctx,
            schema,
            config,
            io_thread: Some(io_thread),
            rx_thread: None,
            tx_thread: None,
            is_running: Arc::new(AtomicBool::new(true)),
            interface: "unknown".to_string(),
        })
    }

    /// 创建双线程模式的链路
    ///
    /// 将适配器分离为独立的 RX 和 TX 半部，接收不受发送阻塞影响。
    ///
    /// # 错误
    /// - `DriverError::Can`: 分离适配器失败
    pub fn new_dual_thread<C>(
        can: C,
        schema: EndpointTable,
        config: LinkConfig,
    ) -> Result<Self, DriverError>
    where
        C: SplittableAdapter + Send + 'static,
    {
        config.validate()?;

        let (rx_adapter, tx_adapter) = can.split()?;
        let (tx, tx_rx) = crossbeam_channel::bounded(config.tx_queue_capacity);
        let ctx = Arc::new(LinkContext::new(config.node_stale_timeout()));
        let is_running = Arc::new(AtomicBool::new(true));

        let ctx_rx = ctx.clone();
        let is_running_rx = is_running.clone();
        let rx_thread = spawn(move || {
            rx_loop(rx_adapter, ctx_rx, is_running_rx);
        });

        let ctx_tx = ctx.clone();
        let is_running_tx = is_running.clone();
        let tx_thread = spawn(move || {
            tx_loop(tx_adapter, tx_rx, ctx_tx, is_running_tx);
        });

        Ok(Self {
            tx: Some(tx),
            ctx,
            schema,
            config,
            io_thread: None,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
            is_running,
            interface: "unknown".to_string(),
        })
    }

    /// 设置接口名称（内部方法，由 Builder 调用）
    pub(crate) fn with_interface(mut self, interface: String) -> Self {
        self.interface = interface;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn schema(&self) -> &EndpointTable {
        &self.schema
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// 检查线程健康状态
    ///
    /// 返回 `(rx_alive, tx_alive)`；单线程模式下两者都反映 IO 线程。
    pub fn check_health(&self) -> (bool, bool) {
        let alive = |h: &Option<JoinHandle<()>>| h.as_ref().map(|h| !h.is_finished());
        match alive(&self.io_thread) {
            Some(io_alive) => (io_alive, io_alive),
            None => (
                alive(&self.rx_thread).unwrap_or(false),
                alive(&self.tx_thread).unwrap_or(false),
            ),
        }
    }

    pub fn is_healthy(&self) -> bool {
        let (rx_alive, tx_alive) = self.check_health();
        rx_alive && tx_alive
    }

    /// 性能指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 节点注册表快照（一致的时间点视图）
    pub fn snapshot_nodes(&self) -> BTreeMap<u8, Node> {
        self.ctx.registry.snapshot()
    }

    pub fn node(&self, node_id: u8) -> Option<Node> {
        self.ctx.registry.get(node_id)
    }

    /// 在途请求（诊断用）
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.ctx.correlator.pending_requests()
    }

    fn resolve(&self, node_id: u8, endpoint: &str) -> Result<Arc<EndpointDescriptor>, DriverError> {
        self.schema
            .resolve(endpoint)
            .map_err(|e| DriverError::from_protocol(node_id, endpoint, e))
    }

    /// 读取端点值
    ///
    /// # 示例
    ///
    /// ```rust,no_run
    /// # use drivelink_driver::DriveLink;
    /// # fn example(link: &DriveLink) -> Result<(), drivelink_driver::DriverError> {
    /// let vel_limit = link.read(3, "axis0.controller.config.vel_limit")?;
    /// println!("vel_limit = {}", vel_limit);
    /// # Ok(())
    /// # }
    /// ```
    pub fn read(&self, node_id: u8, endpoint: &str) -> Result<Value, DriverError> {
        self.read_inner(node_id, endpoint, None)
    }

    /// 可取消的读取
    pub fn read_cancellable(
        &self,
        node_id: u8,
        endpoint: &str,
        cancel: &CancelToken,
    ) -> Result<Value, DriverError> {
        self.read_inner(node_id, endpoint, Some(cancel))
    }

    fn read_inner(
        &self,
        node_id: u8,
        endpoint: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Value, DriverError> {
        let desc = self.resolve(node_id, endpoint)?;
        if desc.type_tag.is_function() {
            return Err(DriverError::TypeMismatch {
                node_id,
                endpoint: desc.name.clone(),
                reason: "function endpoints cannot be read, use call".to_string(),
            });
        }
        if !desc.readable {
            return Err(DriverError::TypeMismatch {
                node_id,
                endpoint: desc.name.clone(),
                reason: "endpoint is write-only".to_string(),
            });
        }

        let reply = self.exchange(
            Exchange {
                node_id,
                endpoint_name: &desc.name,
                endpoint_id: desc.id,
                direction: Direction::Read,
                payload: &[],
                expected_reply: true,
            },
            cancel,
        )?;
        let payload = reply.map(|m| m.payload).unwrap_or_default();
        decode(desc.type_tag, payload.as_slice())
            .map_err(|e| DriverError::from_protocol(node_id, &desc.name, e))
    }

    /// 写入端点值
    ///
    /// 是否等待节点回显由端点表的确认方式决定；无需回显时，帧成功发出即返回。
    pub fn write(
        &self,
        node_id: u8,
        endpoint: &str,
        value: impl Into<Value>,
    ) -> Result<(), DriverError> {
        self.write_inner(node_id, endpoint, value.into(), None)
    }

    /// 可取消的写入
    pub fn write_cancellable(
        &self,
        node_id: u8,
        endpoint: &str,
        value: impl Into<Value>,
        cancel: &CancelToken,
    ) -> Result<(), DriverError> {
        self.write_inner(node_id, endpoint, value.into(), Some(cancel))
    }

    fn write_inner(
        &self,
        node_id: u8,
        endpoint: &str,
        value: Value,
        cancel: Option<&CancelToken>,
    ) -> Result<(), DriverError> {
        let desc = self.resolve(node_id, endpoint)?;
        if desc.type_tag.is_function() {
            return Err(DriverError::TypeMismatch {
                node_id,
                endpoint: desc.name.clone(),
                reason: "function endpoints take no value, use call".to_string(),
            });
        }
        if !desc.writable {
            return Err(DriverError::ReadOnlyEndpoint {
                node_id,
                endpoint: desc.name.clone(),
            });
        }

        let payload = encode(desc.type_tag, &value)
            .map_err(|e| DriverError::from_protocol(node_id, &desc.name, e))?;
        self.exchange(
            Exchange {
                node_id,
                endpoint_name: &desc.name,
                endpoint_id: desc.id,
                direction: Direction::Write,
                payload: payload.as_slice(),
                expected_reply: desc.expects_reply(),
            },
            cancel,
        )?;
        Ok(())
    }

    /// 调用函数端点
    pub fn call(&self, node_id: u8, endpoint: &str) -> Result<(), DriverError> {
        self.call_inner(node_id, endpoint, None).map(|_| ())
    }

    /// 可取消的调用
    pub fn call_cancellable(
        &self,
        node_id: u8,
        endpoint: &str,
        cancel: &CancelToken,
    ) -> Result<(), DriverError> {
        self.call_inner(node_id, endpoint, Some(cancel)).map(|_| ())
    }

    fn call_inner(
        &self,
        node_id: u8,
        endpoint: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<EndpointMessage>, DriverError> {
        self.call_with_reply(node_id, endpoint, &[], None, cancel)
    }

    /// 带参数调用函数端点
    ///
    /// `args` 为调用方按设备约定打包好的小端字节，例如 `Set_Input_Pos` 的
    /// `f32 位置 + i16 速度前馈 + i16 力矩前馈`。参数随数据帧发出，
    /// 直连命令最多 8 字节，SDO 端点最多 4 字节；空参数等同于 [`call`](Self::call)。
    pub fn call_with(&self, node_id: u8, endpoint: &str, args: &[u8]) -> Result<(), DriverError> {
        self.call_with_reply(node_id, endpoint, args, None, None)
            .map(|_| ())
    }

    /// `force_reply` 为 `Some` 时覆盖端点表的确认方式
    fn call_with_reply(
        &self,
        node_id: u8,
        endpoint: &str,
        args: &[u8],
        force_reply: Option<bool>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<EndpointMessage>, DriverError> {
        let desc = self.resolve(node_id, endpoint)?;
        if desc.type_tag != TypeTag::Function {
            return Err(DriverError::TypeMismatch {
                node_id,
                endpoint: desc.name.clone(),
                reason: format!("{} endpoint cannot be called", desc.type_tag),
            });
        }

        self.exchange(
            Exchange {
                node_id,
                endpoint_name: &desc.name,
                endpoint_id: desc.id,
                // 带参数的调用在总线上就是一次带数据的写
                direction: if args.is_empty() {
                    Direction::Call
                } else {
                    Direction::Write
                },
                payload: args,
                expected_reply: force_reply.unwrap_or_else(|| desc.expects_reply()),
            },
            cancel,
        )
    }

    /// 清除节点错误
    ///
    /// 调用清除端点并 **必须** 等到节点确认；确认后把本地锁存的错误位设为确认中携带的值
    /// （无值时为 0）。请求失败时本地锁存保持不变。
    ///
    /// 返回确认后的锁存值。
    pub fn clear_errors(&self, node_id: u8) -> Result<u32, DriverError> {
        let endpoint = self.config.clear_errors_endpoint.clone();
        let reply = self.call_with_reply(node_id, &endpoint, &[], Some(true), None)?;
        let remaining = reply.and_then(|m| m.payload.le_u32_at(0)).unwrap_or(0);

        self.ctx.registry.set_latched_error(node_id, remaining);
        info!(
            "node {}: errors cleared, latched bits now 0x{:08X}",
            node_id, remaining
        );
        Ok(remaining)
    }

    /// 查询节点固件 / 硬件版本
    pub fn query_version(&self, node_id: u8) -> Result<DeviceVersion, DriverError> {
        const ENDPOINT: &str = "version";

        let reply = self.exchange(
            Exchange {
                node_id,
                endpoint_name: ENDPOINT,
                endpoint_id: CMD_GET_VERSION as u16,
                direction: Direction::Read,
                payload: &[],
                expected_reply: true,
            },
            None,
        )?;
        let payload = reply.map(|m| m.payload).unwrap_or_default();
        DeviceVersion::from_payload(payload.as_slice())
            .map_err(|e| DriverError::from_protocol(node_id, ENDPOINT, e))
    }

    /// 请求状态机：排队 → 发送 → 等待回复 / 超时重发 / 取消
    ///
    /// 返回 `None` 表示不需要回复的请求已成功发出。
    fn exchange(
        &self,
        req: Exchange<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<EndpointMessage>, DriverError> {
        let Exchange {
            node_id,
            endpoint_name,
            endpoint_id,
            direction,
            payload,
            expected_reply,
        } = req;

        let frame = build_request(node_id, endpoint_id, direction, payload)
            .map_err(|e| DriverError::from_protocol(node_id, endpoint_name, e))?;

        let cancelled = |attempts: u32| {
            LinkMetrics::inc(&self.ctx.metrics.cancellations);
            debug!(
                "node {} endpoint '{}': cancelled after {} attempt(s)",
                node_id, endpoint_name, attempts
            );
            DriverError::Cancelled {
                node_id,
                endpoint: endpoint_name.to_string(),
                attempts,
            }
        };

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(cancelled(0));
        }

        let (rx_alive, tx_alive) = self.check_health();
        if !(rx_alive && tx_alive) {
            error!(
                "node {} endpoint '{}': IO thread not running (rx={}, tx={})",
                node_id, endpoint_name, rx_alive, tx_alive
            );
            return Err(DriverError::IoThread(format!(
                "IO thread not running (rx alive: {}, tx alive: {})",
                rx_alive, tx_alive
            )));
        }

        LinkMetrics::inc(&self.ctx.metrics.requests_started);
        let ticket = self
            .ctx
            .correlator
            .acquire(
                (node_id, endpoint_id),
                RequestInfo {
                    endpoint_name: endpoint_name.to_string(),
                    direction,
                    expected_reply,
                },
                cancel,
            )
            .map_err(|e| match e {
                AcquireError::Cancelled => cancelled(0),
                AcquireError::QueueFailed(dev) => DriverError::Transport {
                    node_id,
                    endpoint: endpoint_name.to_string(),
                    attempts: 0,
                    source: CanError::Device(dev),
                },
            })?;

        let never_rx = never();
        let cancel_rx = cancel.map(|c| c.signal()).unwrap_or(&never_rx);
        let timeout = self.config.request_timeout();
        let max_attempts = self.config.max_attempts;

        // 前一个请求超时 / 取消后，等它的迟到回复窗口过去再发送
        if let Some(wait) = ticket.hold_remaining() {
            debug!(
                "node {} endpoint '{}': waiting {:?} for late replies to drain",
                node_id, endpoint_name, wait
            );
            select! {
                recv(cancel_rx) -> _ => return Err(cancelled(0)),
                default(wait) => {},
            }
        }

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                LinkMetrics::inc(&self.ctx.metrics.retries);
            }
            ticket.mark_sent();
            if expected_reply {
                // 未收到回复就释放时，槽位静默一个尝试超时
                ticket.hold_on_release(Some(timeout));
            }

            match self.transmit(frame, cancel_rx) {
                Transmit::Sent => {},
                Transmit::Cancelled => return Err(cancelled(attempt)),
                Transmit::Closed => {
                    let reason = CanDeviceError::new(
                        CanDeviceErrorKind::Backend,
                        "link closed while request was queued",
                    );
                    let failed = ticket.fail_waiters(&reason);
                    if failed > 0 {
                        warn!(
                            "node {} endpoint '{}': link closed, failing {} queued request(s)",
                            node_id, endpoint_name, failed
                        );
                    }
                    return Err(DriverError::ChannelClosed);
                },
                Transmit::Failed(source) => {
                    return Err(self.transport_failed(
                        &ticket,
                        node_id,
                        endpoint_name,
                        attempt,
                        source,
                    ));
                },
            }

            if !expected_reply {
                LinkMetrics::inc(&self.ctx.metrics.requests_completed);
                return Ok(None);
            }

            select! {
                recv(ticket.replies()) -> msg => {
                    let msg = msg.map_err(|_| DriverError::ChannelClosed)?;
                    ticket.hold_on_release(None);
                    if msg.status != 0 {
                        warn!(
                            "node {} endpoint '{}': device reported status 0x{:02X}",
                            node_id, endpoint_name, msg.status
                        );
                        return Err(DriverError::DeviceReported {
                            node_id,
                            endpoint: endpoint_name.to_string(),
                            error_bits: msg.status as u32,
                        });
                    }
                    LinkMetrics::inc(&self.ctx.metrics.requests_completed);
                    debug!(
                        "node {} endpoint '{}': {:?} completed after {} attempt(s)",
                        node_id, endpoint_name, direction, attempt
                    );
                    return Ok(Some(msg));
                },
                recv(cancel_rx) -> _ => return Err(cancelled(attempt)),
                default(timeout) => {
                    warn!(
                        "node {} endpoint '{}': no reply within {:?} (attempt {}/{})",
                        node_id, endpoint_name, timeout, attempt, max_attempts
                    );
                },
            }
        }

        LinkMetrics::inc(&self.ctx.metrics.timeouts);
        self.ctx
            .registry
            .on_event(NodeEvent::RequestFailed { node_id });
        Err(DriverError::Timeout {
            node_id,
            endpoint: endpoint_name.to_string(),
            attempts: max_attempts,
        })
    }

    /// 把帧交给 IO 线程并等待发送确认
    fn transmit(&self, frame: drivelink_can::DriveFrame, cancel_rx: &Receiver<()>) -> Transmit {
        let Some(tx) = self.tx.as_ref() else {
            return Transmit::Closed;
        };
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let request = TxRequest {
            frame,
            ack: Some(ack_tx),
        };

        select! {
            send(tx, request) -> res => {
                if res.is_err() {
                    return Transmit::Closed;
                }
            },
            recv(cancel_rx) -> _ => return Transmit::Cancelled,
        }

        select! {
            recv(ack_rx) -> ack => match ack {
                Ok(Ok(())) => Transmit::Sent,
                Ok(Err(e)) => Transmit::Failed(e),
                Err(_) => Transmit::Closed,
            },
            recv(cancel_rx) -> _ => Transmit::Cancelled,
        }
    }

    fn transport_failed(
        &self,
        ticket: &RequestTicket<'_>,
        node_id: u8,
        endpoint_name: &str,
        attempts: u32,
        source: CanError,
    ) -> DriverError {
        let reason = CanDeviceError::new(
            CanDeviceErrorKind::Backend,
            format!("request ahead failed: {}", source),
        );
        let failed = ticket.fail_waiters(&reason);
        error!(
            "node {} endpoint '{}': transport error ({}), failing {} queued request(s)",
            node_id, endpoint_name, source, failed
        );
        DriverError::Transport {
            node_id,
            endpoint: endpoint_name.to_string(),
            attempts,
            source,
        }
    }
}

enum Transmit {
    Sent,
    Cancelled,
    Closed,
    Failed(CanError),
}

impl Drop for DriveLink {
    fn drop(&mut self) {
        // 通知所有线程退出
        self.is_running.store(false, Ordering::Release);

        // 必须在 join 之前关闭发送队列，否则 io_loop 收不到 Disconnected
        self.tx.take();

        let join_timeout = Duration::from_secs(2);

        if let Some(handle) = self.rx_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "RX thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if let Some(handle) = self.tx_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "TX thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if let Some(handle) = self.io_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "IO thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
    }
}
