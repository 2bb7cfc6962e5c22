//! IO 线程
//!
//! 两种运行模式：
//!
//! - 单线程：`io_loop` 交替执行"清空发送队列"与"接收一帧"
//! - 双线程：`rx_loop` 只接收，`tx_loop` 只发送，接收不受发送阻塞影响
//!
//! 每个发送请求都带有确认通道，发送结果（含传输错误）原路返回给发起者。

use crate::correlator::Correlator;
use crate::metrics::LinkMetrics;
use crate::registry::{NodeEvent, NodeRegistry};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use drivelink_can::{CanAdapter, CanError, DriveFrame, RxAdapter, TxAdapter};
use drivelink_protocol::{
    CMD_GET_ERROR, Direction, EndpointMessage, ParsedFrame, is_direct_endpoint, parse,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 发送请求
pub struct TxRequest {
    pub frame: DriveFrame,
    /// 发送结果回传（`None` 表示发完即忘）
    pub ack: Option<Sender<Result<(), CanError>>>,
}

/// IO 线程与调用者共享的状态
pub struct LinkContext {
    pub correlator: Correlator,
    pub registry: NodeRegistry,
    pub metrics: LinkMetrics,
}

impl LinkContext {
    pub fn new(node_stale_timeout: Duration) -> Self {
        Self {
            correlator: Correlator::new(),
            registry: NodeRegistry::new(node_stale_timeout),
            metrics: LinkMetrics::new(),
        }
    }
}

/// 节点发往主机方向的帧：直连选择子的数据帧、SDO 回复
fn is_reply_candidate(msg: &EndpointMessage) -> bool {
    if is_direct_endpoint(msg.endpoint_id) {
        msg.direction != Direction::Read
    } else {
        msg.direction == Direction::Reply
    }
}

/// 处理一帧入站数据
pub fn handle_frame(ctx: &LinkContext, frame: DriveFrame) {
    LinkMetrics::inc(&ctx.metrics.rx_frames_total);

    match parse(&frame) {
        ParsedFrame::Heartbeat(hb) => {
            LinkMetrics::inc(&ctx.metrics.rx_heartbeats);
            trace!(
                "heartbeat node={} error=0x{:08X} state={:?}",
                hb.node_id, hb.axis_error, hb.axis_state
            );
            ctx.registry.on_event(NodeEvent::Heartbeat(hb));
        },
        ParsedFrame::Endpoint(msg) => {
            if !is_reply_candidate(&msg) {
                LinkMetrics::inc(&ctx.metrics.rx_request_frames);
                debug!(
                    "ignoring {:?} request on bus: node={} endpoint=0x{:04X}",
                    msg.direction, msg.node_id, msg.endpoint_id
                );
                return;
            }

            // 错误上报无论是否有人请求都锁存
            if msg.endpoint_id == CMD_GET_ERROR as u16
                && let (Some(active_errors), Some(disarm_reason)) =
                    (msg.payload.le_u32_at(0), msg.payload.le_u32_at(4))
            {
                ctx.registry.on_event(NodeEvent::ErrorReport {
                    node_id: msg.node_id,
                    active_errors,
                    disarm_reason,
                });
            }

            if ctx.correlator.dispatch(msg) {
                LinkMetrics::inc(&ctx.metrics.rx_replies_matched);
                trace!(
                    "reply matched node={} endpoint=0x{:04X} len={}",
                    msg.node_id,
                    msg.endpoint_id,
                    msg.payload.len()
                );
                ctx.registry.on_event(NodeEvent::Reply {
                    node_id: msg.node_id,
                });
            } else {
                LinkMetrics::inc(&ctx.metrics.rx_unsolicited);
                debug!(
                    "unsolicited frame node={} endpoint=0x{:04X} ({:?})",
                    msg.node_id, msg.endpoint_id, msg.payload
                );
                ctx.registry.on_event(NodeEvent::Unsolicited {
                    node_id: msg.node_id,
                    endpoint_id: msg.endpoint_id,
                });
            }
        },
        ParsedFrame::Unrecognized => {
            LinkMetrics::inc(&ctx.metrics.rx_unrecognized);
            trace!(
                "unrecognized frame ID=0x{:X} ext={} rtr={}",
                frame.id, frame.is_extended, frame.is_remote
            );
        },
    }
}

fn send_one(send: impl FnOnce(DriveFrame) -> Result<(), CanError>, req: TxRequest, ctx: &LinkContext) {
    let result = send(req.frame);
    match &result {
        Ok(()) => {
            LinkMetrics::inc(&ctx.metrics.tx_frames_total);
            trace!("TX ID=0x{:X} len={}", req.frame.id, req.frame.len);
        },
        Err(e) => {
            LinkMetrics::inc(&ctx.metrics.tx_errors);
            error!("Failed to send frame ID=0x{:X}: {}", req.frame.id, e);
        },
    }
    if let Some(ack) = req.ack {
        let _ = ack.send(result);
    }
}

/// 清空发送队列（带时间预算，避免饿死接收）
///
/// 返回 `true` 表示命令通道已断开，IO 线程应退出。
fn drain_tx_queue(
    can: &mut impl CanAdapter,
    tx_rx: &Receiver<TxRequest>,
    ctx: &LinkContext,
) -> bool {
    const MAX_DRAIN_PER_CYCLE: usize = 32;
    const TIME_BUDGET: Duration = Duration::from_micros(500);

    let start = Instant::now();
    for _ in 0..MAX_DRAIN_PER_CYCLE {
        if start.elapsed() > TIME_BUDGET {
            trace!("Drain time budget exhausted, deferred {} frames", tx_rx.len());
            break;
        }
        match tx_rx.try_recv() {
            Ok(req) => send_one(|f| can.send(f), req, ctx),
            Err(crossbeam_channel::TryRecvError::Empty) => break,
            Err(crossbeam_channel::TryRecvError::Disconnected) => return true,
        }
    }
    false
}

/// 单线程 IO 循环
pub fn io_loop(
    mut can: impl CanAdapter,
    tx_rx: Receiver<TxRequest>,
    ctx: Arc<LinkContext>,
    receive_timeout: Duration,
) {
    can.set_receive_timeout(receive_timeout);

    loop {
        if drain_tx_queue(&mut can, &tx_rx, &ctx) {
            trace!("IO thread: command channel disconnected, exiting");
            break;
        }

        match can.receive() {
            Ok(frame) => handle_frame(&ctx, frame),
            Err(CanError::Timeout) => continue,
            Err(e) if e.is_fatal() => {
                error!("IO thread: fatal CAN error, exiting: {}", e);
                break;
            },
            Err(e) => {
                warn!("IO thread: CAN receive error: {}", e);
            },
        }
    }
}

/// 双线程模式：接收线程
pub fn rx_loop(mut rx: impl RxAdapter, ctx: Arc<LinkContext>, is_running: Arc<AtomicBool>) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        match rx.receive() {
            Ok(frame) => handle_frame(&ctx, frame),
            Err(CanError::Timeout) => continue,
            Err(e) if e.is_fatal() => {
                error!("RX thread: fatal CAN error, exiting: {}", e);
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                warn!("RX thread: CAN receive error: {}", e);
            },
        }
    }
}

/// 双线程模式：发送线程
pub fn tx_loop(
    mut tx: impl TxAdapter,
    tx_rx: Receiver<TxRequest>,
    ctx: Arc<LinkContext>,
    is_running: Arc<AtomicBool>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("TX thread: is_running flag is false, exiting");
            break;
        }

        match tx_rx.recv_timeout(Duration::from_millis(1)) {
            Ok(req) => send_one(|f| tx.send(f), req, &ctx),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                trace!("TX thread: command channel disconnected");
                break;
            },
        }
    }
}
