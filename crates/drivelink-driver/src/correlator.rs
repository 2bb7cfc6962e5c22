//! 请求 / 回复关联器
//!
//! 每个 `(node_id, endpoint_id)` 对应一个槽位：至多一个在途请求，其余调用者按 FIFO 排队。
//!
//! ```text
//! acquire ──▶ [槽位空闲] ──▶ RequestTicket（在途）
//!         └─▶ [槽位占用] ──▶ 排队等待授权 ──▶ RequestTicket
//!
//! RequestTicket::drop ──▶ 释放槽位，授权队首等待者
//! ```
//!
//! 接收线程通过 [`Correlator::dispatch`] 把回复投递给在途请求；
//! 只有已经发出过至少一次（`attempts > 0`）且需要回复的请求才会被匹配。
//!
//! 请求超时或被取消后，槽位进入一个静默期（通常为单次尝试超时）：
//! 下一个请求在静默期结束前不得发送，期间到达的迟到回复因 `attempts == 0` 按无人认领处理。

use crate::cancel::CancelToken;
use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use drivelink_can::CanDeviceError;
use drivelink_protocol::{Direction, EndpointMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::cell::Cell;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 槽位键
pub type PairKey = (u8, u16);

/// 请求描述（进入槽位时登记）
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub endpoint_name: String,
    pub direction: Direction,
    pub expected_reply: bool,
}

/// 在途请求的诊断快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub node_id: u8,
    pub endpoint_id: u16,
    pub endpoint_name: String,
    pub direction: Direction,
    /// 最近一次发送时刻（尚未发出时为 `None`）
    pub sent_at: Option<Instant>,
    pub attempts: u32,
    pub expected_reply: bool,
    /// 排在其后的调用者数量
    pub queued: usize,
}

struct ActiveRequest {
    ticket_id: u64,
    info: RequestInfo,
    sent_at: Option<Instant>,
    attempts: u32,
    reply_tx: Sender<EndpointMessage>,
}

type Grant = Result<Receiver<EndpointMessage>, CanDeviceError>;

struct Waiter {
    ticket_id: u64,
    info: RequestInfo,
    grant_tx: Sender<Grant>,
}

#[derive(Default)]
struct PairSlot {
    active: Option<ActiveRequest>,
    waiters: VecDeque<Waiter>,
    /// 静默期截止时刻
    hold_until: Option<Instant>,
}

impl PairSlot {
    fn is_idle(&self, now: Instant) -> bool {
        self.active.is_none()
            && self.waiters.is_empty()
            && self.hold_until.is_none_or(|t| t <= now)
    }
}

/// 排队阶段的失败原因
#[derive(Debug)]
pub enum AcquireError {
    /// 排队期间被取消
    Cancelled,
    /// 前面的请求遭遇传输错误，排队者一并失败
    QueueFailed(CanDeviceError),
}

/// 关联器
#[derive(Default)]
pub struct Correlator {
    slots: Mutex<HashMap<PairKey, PairSlot>>,
    next_ticket: AtomicU64,
}

fn reply_channel() -> (Sender<EndpointMessage>, Receiver<EndpointMessage>) {
    // 一次尝试只会有一个有效回复，多余的按丢弃处理
    bounded(4)
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 占用槽位；槽位被占用时阻塞排队，直到获得授权、被取消或前序请求传输失败
    pub fn acquire(
        &self,
        key: PairKey,
        info: RequestInfo,
        cancel: Option<&CancelToken>,
    ) -> Result<RequestTicket<'_>, AcquireError> {
        let ticket_id = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let grant_rx = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key).or_default();

            if slot.active.is_none() && slot.waiters.is_empty() {
                let (reply_tx, reply_rx) = reply_channel();
                slot.active = Some(ActiveRequest {
                    ticket_id,
                    info,
                    sent_at: None,
                    attempts: 0,
                    reply_tx,
                });
                return Ok(RequestTicket {
                    correlator: self,
                    key,
                    ticket_id,
                    replies: reply_rx,
                    hold: Cell::new(None),
                });
            }

            let (grant_tx, grant_rx) = bounded(1);
            slot.waiters.push_back(Waiter {
                ticket_id,
                info,
                grant_tx,
            });
            debug!(
                "node {} endpoint 0x{:04X}: queued behind in-flight request ({} waiting)",
                key.0,
                key.1,
                slot.waiters.len()
            );
            grant_rx
        };

        let never_rx = never();
        let cancel_rx = cancel.map(|c| c.signal()).unwrap_or(&never_rx);

        select! {
            recv(grant_rx) -> grant => self.accept_grant(key, ticket_id, grant.ok()),
            recv(cancel_rx) -> _ => {
                let still_queued = {
                    let mut slots = self.slots.lock();
                    match slots.get_mut(&key) {
                        Some(slot) => {
                            let before = slot.waiters.len();
                            slot.waiters.retain(|w| w.ticket_id != ticket_id);
                            slot.waiters.len() != before
                        },
                        None => false,
                    }
                };
                if !still_queued {
                    // 授权与取消同时发生：已被提升为在途请求，立即释放给下一位
                    if let Ok(Ok(replies)) = grant_rx.try_recv() {
                        drop(RequestTicket {
                            correlator: self,
                            key,
                            ticket_id,
                            replies,
                            hold: Cell::new(None),
                        });
                    }
                }
                Err(AcquireError::Cancelled)
            },
        }
    }

    fn accept_grant(
        &self,
        key: PairKey,
        ticket_id: u64,
        grant: Option<Grant>,
    ) -> Result<RequestTicket<'_>, AcquireError> {
        match grant {
            Some(Ok(replies)) => Ok(RequestTicket {
                correlator: self,
                key,
                ticket_id,
                replies,
                hold: Cell::new(None),
            }),
            Some(Err(e)) => Err(AcquireError::QueueFailed(e)),
            None => Err(AcquireError::QueueFailed(CanDeviceError::new(
                drivelink_can::CanDeviceErrorKind::Backend,
                "correlator dropped waiter",
            ))),
        }
    }

    /// 把回复投递给在途请求；返回 `false` 表示无人认领
    pub fn dispatch(&self, msg: EndpointMessage) -> bool {
        let slots = self.slots.lock();
        let Some(active) = slots
            .get(&(msg.node_id, msg.endpoint_id))
            .and_then(|slot| slot.active.as_ref())
        else {
            return false;
        };
        if active.attempts == 0 || !active.info.expected_reply {
            return false;
        }
        active.reply_tx.try_send(msg).is_ok()
    }

    /// 在途请求快照
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        let slots = self.slots.lock();
        let mut out: Vec<PendingRequest> = slots
            .iter()
            .filter_map(|(&(node_id, endpoint_id), slot)| {
                slot.active.as_ref().map(|a| PendingRequest {
                    node_id,
                    endpoint_id,
                    endpoint_name: a.info.endpoint_name.clone(),
                    direction: a.info.direction,
                    sent_at: a.sent_at,
                    attempts: a.attempts,
                    expected_reply: a.info.expected_reply,
                    queued: slot.waiters.len(),
                })
            })
            .collect();
        out.sort_by_key(|p| (p.node_id, p.endpoint_id));
        out
    }

    fn mark_sent(&self, key: PairKey, ticket_id: u64) -> u32 {
        let mut slots = self.slots.lock();
        match slots
            .get_mut(&key)
            .and_then(|slot| slot.active.as_mut())
            .filter(|a| a.ticket_id == ticket_id)
        {
            Some(active) => {
                active.attempts += 1;
                active.sent_at = Some(Instant::now());
                active.attempts
            },
            None => 0,
        }
    }

    /// 静默期剩余时间（已结束时为 `None`）
    fn hold_remaining(&self, key: PairKey) -> Option<Duration> {
        let slots = self.slots.lock();
        let until = slots.get(&key)?.hold_until?;
        until
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    fn fail_waiters(&self, key: PairKey, reason: &CanDeviceError) -> usize {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&key) else {
            return 0;
        };
        let drained: Vec<Waiter> = slot.waiters.drain(..).collect();
        for waiter in &drained {
            let _ = waiter.grant_tx.send(Err(reason.clone()));
        }
        drained.len()
    }

    fn release(&self, key: PairKey, ticket_id: u64, hold: Option<Duration>) {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&key) else {
            return;
        };
        if slot.active.as_ref().map(|a| a.ticket_id) != Some(ticket_id) {
            return;
        }
        slot.active = None;
        slot.hold_until = match hold {
            Some(d) => {
                debug!(
                    "node {} endpoint 0x{:04X}: holding pair for {:?} after unanswered request",
                    key.0, key.1, d
                );
                Some(now + d)
            },
            None => slot.hold_until.filter(|&t| t > now),
        };

        while let Some(waiter) = slot.waiters.pop_front() {
            let (reply_tx, reply_rx) = reply_channel();
            if waiter.grant_tx.send(Ok(reply_rx)).is_ok() {
                trace!(
                    "node {} endpoint 0x{:04X}: promoted queued request",
                    key.0, key.1
                );
                slot.active = Some(ActiveRequest {
                    ticket_id: waiter.ticket_id,
                    info: waiter.info,
                    sent_at: None,
                    attempts: 0,
                    reply_tx,
                });
                return;
            }
        }

        // 静默期内保留槽位，顺带回收已过期的空槽位
        slots.retain(|_, slot| !slot.is_idle(now));
    }
}

/// 槽位占用凭证；drop 时释放槽位
pub struct RequestTicket<'a> {
    correlator: &'a Correlator,
    key: PairKey,
    ticket_id: u64,
    replies: Receiver<EndpointMessage>,
    /// 释放时设置的静默期
    hold: Cell<Option<Duration>>,
}

impl RequestTicket<'_> {
    /// 记录一次发送，返回累计尝试次数
    pub fn mark_sent(&self) -> u32 {
        self.correlator.mark_sent(self.key, self.ticket_id)
    }

    /// 回复接收端
    pub fn replies(&self) -> &Receiver<EndpointMessage> {
        &self.replies
    }

    /// 释放时让槽位静默 `duration`（请求可能仍有迟到回复）；传 `None` 撤销
    pub fn hold_on_release(&self, duration: Option<Duration>) {
        self.hold.set(duration);
    }

    /// 前一个请求留下的静默期剩余时间
    pub fn hold_remaining(&self) -> Option<Duration> {
        self.correlator.hold_remaining(self.key)
    }

    /// 传输失败：排在后面的调用者一并失败
    pub fn fail_waiters(&self, reason: &CanDeviceError) -> usize {
        self.correlator.fail_waiters(self.key, reason)
    }
}

impl Drop for RequestTicket<'_> {
    fn drop(&mut self) {
        self.correlator.release(self.key, self.ticket_id, self.hold.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelink_can::CanDeviceErrorKind;
    use drivelink_protocol::Payload;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn info(name: &str) -> RequestInfo {
        RequestInfo {
            endpoint_name: name.to_string(),
            direction: Direction::Read,
            expected_reply: true,
        }
    }

    fn reply(node_id: u8, endpoint_id: u16) -> EndpointMessage {
        EndpointMessage {
            node_id,
            endpoint_id,
            direction: Direction::Reply,
            payload: Payload::from_slice(&[1, 2, 3, 4]).unwrap(),
            status: 0,
        }
    }

    #[test]
    fn test_reply_matched_only_after_send() {
        let correlator = Correlator::new();
        let ticket = correlator.acquire((1, 0x40), info("a"), None).unwrap();

        assert!(!correlator.dispatch(reply(1, 0x40)));
        assert_eq!(ticket.mark_sent(), 1);
        assert!(correlator.dispatch(reply(1, 0x40)));
        assert_eq!(ticket.replies().try_recv().unwrap().endpoint_id, 0x40);

        // 其他键不匹配
        assert!(!correlator.dispatch(reply(2, 0x40)));
        assert!(!correlator.dispatch(reply(1, 0x41)));
    }

    #[test]
    fn test_no_reply_expected_never_matches() {
        let correlator = Correlator::new();
        let mut req = info("w");
        req.expected_reply = false;
        let ticket = correlator.acquire((1, 0x40), req, None).unwrap();
        ticket.mark_sent();
        assert!(!correlator.dispatch(reply(1, 0x40)));
    }

    #[test]
    fn test_release_removes_slot() {
        let correlator = Correlator::new();
        {
            let ticket = correlator.acquire((1, 0x40), info("a"), None).unwrap();
            ticket.mark_sent();
            assert_eq!(correlator.pending_requests().len(), 1);
        }
        assert!(correlator.pending_requests().is_empty());
        assert!(!correlator.dispatch(reply(1, 0x40)));
    }

    #[test]
    fn test_fifo_promotion() {
        let correlator = Arc::new(Correlator::new());
        let first = correlator.acquire((3, 0x50), info("first"), None).unwrap();

        let (order_tx, order_rx) = crossbeam_channel::unbounded();
        let mut handles = Vec::new();
        for i in 0..3 {
            let c = Arc::clone(&correlator);
            let tx = order_tx.clone();
            handles.push(thread::spawn(move || {
                let ticket = c.acquire((3, 0x50), info(&format!("w{}", i)), None).unwrap();
                tx.send(i).unwrap();
                drop(ticket);
            }));
            // 保证入队顺序
            while correlator
                .pending_requests()
                .first()
                .map(|p| p.queued)
                .unwrap_or(0)
                < i + 1
            {
                thread::sleep(Duration::from_millis(1));
            }
        }

        assert!(order_rx.try_recv().is_err());
        drop(first);
        for h in handles {
            h.join().unwrap();
        }
        let order: Vec<usize> = order_rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(correlator.pending_requests().is_empty());
    }

    #[test]
    fn test_cancel_while_queued() {
        let correlator = Arc::new(Correlator::new());
        let first = correlator.acquire((3, 0x50), info("first"), None).unwrap();

        let token = CancelToken::new();
        let c = Arc::clone(&correlator);
        let t = token.clone();
        let handle = thread::spawn(move || {
            let cancelled = matches!(
                c.acquire((3, 0x50), info("second"), Some(&t)),
                Err(AcquireError::Cancelled)
            );
            cancelled
        });
        while correlator.pending_requests()[0].queued == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        token.cancel();
        assert!(handle.join().unwrap());

        assert_eq!(correlator.pending_requests()[0].queued, 0);
        drop(first);
        assert!(correlator.pending_requests().is_empty());
    }

    #[test]
    fn test_fail_waiters() {
        let correlator = Arc::new(Correlator::new());
        let first = correlator.acquire((3, 0x50), info("first"), None).unwrap();

        let c = Arc::clone(&correlator);
        let handle = thread::spawn(move || {
            let err = c.acquire((3, 0x50), info("second"), None).err();
            err
        });
        while correlator.pending_requests()[0].queued == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let reason = CanDeviceError::new(CanDeviceErrorKind::Backend, "bus down");
        assert_eq!(first.fail_waiters(&reason), 1);
        match handle.join().unwrap() {
            Some(AcquireError::QueueFailed(e)) => assert_eq!(e.message, "bus down"),
            other => panic!("expected QueueFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_late_reply_during_hold_is_not_matched() {
        let correlator = Correlator::new();
        {
            let ticket = correlator.acquire((1, 0x40), info("stale"), None).unwrap();
            ticket.mark_sent();
            ticket.hold_on_release(Some(Duration::from_millis(50)));
        }
        // 槽位在静默期内保留，但没有在途请求
        assert!(correlator.pending_requests().is_empty());

        let next = correlator.acquire((1, 0x40), info("fresh"), None).unwrap();
        let remaining = next.hold_remaining().unwrap();
        assert!(remaining <= Duration::from_millis(50));

        // 新请求尚未发出：旧请求的迟到回复无人认领
        assert!(!correlator.dispatch(reply(1, 0x40)));

        thread::sleep(remaining);
        assert!(next.hold_remaining().is_none());
        next.mark_sent();
        assert!(correlator.dispatch(reply(1, 0x40)));
    }

    #[test]
    fn test_successful_release_leaves_no_hold() {
        let correlator = Correlator::new();
        {
            let ticket = correlator.acquire((2, 0x40), info("a"), None).unwrap();
            ticket.mark_sent();
            ticket.hold_on_release(Some(Duration::from_secs(5)));
            // 收到回复后撤销
            ticket.hold_on_release(None);
        }
        let next = correlator.acquire((2, 0x40), info("b"), None).unwrap();
        assert!(next.hold_remaining().is_none());
    }

    #[test]
    fn test_different_pairs_are_independent() {
        let correlator = Correlator::new();
        let a = correlator.acquire((1, 0x40), info("a"), None).unwrap();
        let b = correlator.acquire((1, 0x41), info("b"), None).unwrap();
        let c = correlator.acquire((2, 0x40), info("c"), None).unwrap();
        a.mark_sent();
        b.mark_sent();
        c.mark_sent();
        let pending = correlator.pending_requests();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|p| p.attempts == 1 && p.queued == 0));
    }
}
