//! 指标轮询
//!
//! 与配置下发相反，轮询容忍部分失败：某个 `(node, endpoint)` 读取失败只记录在该样本上，
//! 同一周期的其他读取照常进行。

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, tick};
use drivelink_driver::{DriverError, NodeClient};
use drivelink_protocol::Value;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 默认指标：（显示名，端点）
pub const DEFAULT_METRIC_ENDPOINTS: &[(&str, &str)] =
    &[("voltage", "vbus_voltage"), ("current", "ibus")];

/// 周期结果通道容量
const CYCLE_QUEUE_CAPACITY: usize = 16;

/// 单个样本
#[derive(Debug)]
pub struct MetricSample {
    pub node_id: u8,
    pub endpoint: String,
    pub result: Result<Value, DriverError>,
}

/// 一个轮询周期的全部样本
#[derive(Debug)]
pub struct PollCycle {
    pub cycle: u64,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub samples: Vec<MetricSample>,
}

impl PollCycle {
    pub fn value(&self, node_id: u8, endpoint: &str) -> Option<Value> {
        self.samples
            .iter()
            .find(|s| s.node_id == node_id && s.endpoint == endpoint)
            .and_then(|s| s.result.as_ref().ok().copied())
    }

    pub fn failures(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter().filter(|s| s.result.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

fn poll_cycle<C: NodeClient + ?Sized, S: AsRef<str>>(
    client: &C,
    cycle: u64,
    nodes: &[u8],
    endpoints: &[S],
) -> PollCycle {
    let started_at = Instant::now();
    let mut samples = Vec::with_capacity(nodes.len() * endpoints.len());
    for &node_id in nodes {
        for endpoint in endpoints {
            let endpoint = endpoint.as_ref();
            let result = client.read(node_id, endpoint);
            if let Err(e) = &result {
                debug!("poll node {} '{}' failed: {}", node_id, endpoint, e);
            }
            samples.push(MetricSample {
                node_id,
                endpoint: endpoint.to_string(),
                result,
            });
        }
    }
    PollCycle {
        cycle,
        started_at,
        elapsed: started_at.elapsed(),
        samples,
    }
}

/// 对每个 `(node, endpoint)` 读取一次
pub fn poll_metrics_once<C: NodeClient + ?Sized, S: AsRef<str>>(
    client: &C,
    nodes: &[u8],
    endpoints: &[S],
) -> PollCycle {
    poll_cycle(client, 0, nodes, endpoints)
}

/// 后台周期轮询
///
/// 每个周期的结果通过 [`MetricsPoller::cycles`] 投递；消费者跟不上时丢弃新周期。
/// `stop()` 或 drop 时停止并等待线程退出。
pub struct MetricsPoller {
    cycles: Receiver<PollCycle>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsPoller {
    pub fn spawn<C>(
        client: Arc<C>,
        nodes: Vec<u8>,
        endpoints: Vec<String>,
        period: Duration,
    ) -> Self
    where
        C: NodeClient + ?Sized + 'static,
    {
        let (cycle_tx, cycles) = bounded(CYCLE_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let handle = std::thread::spawn(move || {
            let ticker = tick(period);
            let mut cycle = 0u64;
            loop {
                let result = poll_cycle(client.as_ref(), cycle, &nodes, &endpoints);
                trace!(
                    "poll cycle {} done in {:?} ({} samples)",
                    cycle,
                    result.elapsed,
                    result.samples.len()
                );
                match cycle_tx.try_send(result) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        warn!("poll cycle {} dropped: consumer is behind", cycle);
                    },
                    Err(TrySendError::Disconnected(_)) => break,
                }
                cycle += 1;

                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {},
                }
            }
            debug!("metrics poller stopped after {} cycle(s)", cycle);
        });

        Self {
            cycles,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn cycles(&self) -> &Receiver<PollCycle> {
        &self.cycles
    }

    /// 停止轮询并等待后台线程退出
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // 断开即通知
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("metrics poller thread panicked");
        }
    }
}

impl Drop for MetricsPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
