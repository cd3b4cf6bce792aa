//! Metrics Pipeline (C8): lock-free in-hot-path recording, a background
//! aggregator, and batched flushing to the Remote Store (§4.8).
//!
//! Recording is an unbounded-channel send from the evaluator's perspective --
//! never blocks on I/O, never touches a mutex held by anything else. A single
//! background task drains the channel, updates bounded in-memory state behind
//! one mutex, and flushes to Remote when `batch_size` or `flush_interval` is
//! reached.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::config::{MetricsConfig, RemoteTracking};
use crate::storage::remote::RemoteStore;

/// Bound on the per-(flag, operation) duration ring (§4.8).
const DURATION_RING_CAP: usize = 1000;

/// Which evaluation entry point produced a [`MetricRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Enabled,
    Value,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Enabled => "enabled",
            Operation::Value => "value",
        }
    }
}

/// One evaluation event, enqueued from the hot path.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub flag_name: String,
    pub operation: Operation,
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Default)]
struct FlagAggregate {
    usage_count: u64,
    pending: u64,
    flushed_counts: u64,
    durations: HashMap<Operation, VecDeque<u64>>,
}

struct AggregatorState {
    flags: HashMap<String, FlagAggregate>,
    last_flush: Instant,
}

/// The metrics pipeline. Cheap to clone: everything it holds is `Arc`-backed.
#[derive(Clone)]
pub struct MetricsPipeline {
    sender: Option<mpsc::UnboundedSender<MetricRecord>>,
    state: Arc<Mutex<AggregatorState>>,
    remote: Arc<dyn RemoteStore>,
    config: MetricsConfig,
    /// Shutdown signal for the aggregator task; `None` when disabled, since
    /// there is then no task to stop.
    stop: Option<watch::Sender<bool>>,
}

impl MetricsPipeline {
    /// Spawns the background aggregator task and returns the handle used to
    /// enqueue records and run queries. If `config.enabled` is false, records
    /// are dropped immediately and no task is spawned.
    #[must_use]
    pub fn spawn(config: MetricsConfig, remote: Arc<dyn RemoteStore>) -> Self {
        let state = Arc::new(Mutex::new(AggregatorState {
            flags: HashMap::new(),
            last_flush: Instant::now(),
        }));

        if !config.enabled {
            return Self {
                sender: None,
                state,
                remote,
                config,
                stop: None,
            };
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let pipeline = Self {
            sender: Some(tx),
            state,
            remote,
            config,
            stop: Some(stop_tx),
        };
        pipeline.spawn_aggregator(rx, stop_rx);
        pipeline
    }

    fn spawn_aggregator(&self, mut rx: mpsc::UnboundedReceiver<MetricRecord>, mut stop: watch::Receiver<bool>) {
        let state = Arc::clone(&self.state);
        let remote = Arc::clone(&self.remote);
        let config = self.config;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(500).min(config.flush_interval));
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            flush(&state, &remote, &config).await;
                            return;
                        }
                    }
                    maybe_record = rx.recv() => {
                        match maybe_record {
                            Some(record) => record_into(&state, record),
                            None => break,
                        }
                    }
                    _ = tick.tick() => {}
                }

                if should_flush(&state, &config) {
                    flush(&state, &remote, &config).await;
                }
            }
        });
    }

    /// Signals the aggregator task to flush once more and end. A no-op on a
    /// disabled pipeline, since it has no background task.
    pub fn stop(&self) {
        if let Some(stop) = &self.stop {
            let _ = stop.send(true);
        }
    }

    /// Enqueues a completed evaluation. Never blocks and never panics; a
    /// disabled pipeline or a dropped receiver silently discards the record.
    pub fn record(&self, flag_name: &str, operation: Operation, duration: Duration, success: bool) {
        let Some(sender) = &self.sender else { return };
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = duration.as_millis() as u64;
        let _ = sender.send(MetricRecord {
            flag_name: flag_name.to_string(),
            operation,
            duration_ms,
            success,
        });
    }

    /// Local unflushed usage count for `name`. Combined with the Remote
    /// counter by [`MetricsPipeline::usage_count`].
    fn local_usage_delta(&self, name: &str) -> u64 {
        let state = self.state.lock();
        state.flags.get(name).map_or(0, |f| f.usage_count - f.flushed_counts)
    }

    /// `usage_count(name)` (§4.8 Queries): `remote_count + (local_count -
    /// flushed_local)`, avoiding double counting across a flush boundary.
    pub async fn usage_count(&self, name: &str) -> u64 {
        let remote_count = self
            .remote
            .get_string(&stats_key(name))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        remote_count + self.local_usage_delta(name)
    }

    /// `average_duration(name, op)`: combines the unflushed local ring with
    /// the Remote sum/count pair.
    pub async fn average_duration(&self, name: &str, operation: Operation) -> Option<f64> {
        let (local_sum, local_count) = {
            let state = self.state.lock();
            state
                .flags
                .get(name)
                .and_then(|f| f.durations.get(&operation))
                .map_or((0u64, 0u64), |ring| (ring.iter().sum(), ring.len() as u64))
        };

        let remote_sum = self
            .remote
            .get_string(&duration_sum_key(name, operation))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let remote_count = self
            .remote
            .get_string(&duration_count_key(name, operation))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let total_count = local_count + remote_count;
        if total_count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some((local_sum as f64 + remote_sum) / total_count as f64)
    }

    /// `most_used_features(limit)`: descending by combined usage count.
    pub async fn most_used_features(&self, limit: usize) -> Vec<(String, u64)> {
        let names: Vec<String> = {
            let state = self.state.lock();
            state.flags.keys().cloned().collect()
        };
        let mut counts = Vec::with_capacity(names.len());
        for name in names {
            counts.push((name.clone(), self.usage_count(&name).await));
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(limit);
        counts
    }
}

fn record_into(state: &Arc<Mutex<AggregatorState>>, record: MetricRecord) {
    let mut state = state.lock();
    let entry = state.flags.entry(record.flag_name).or_default();
    entry.usage_count += 1;
    entry.pending += 1;
    let ring = entry.durations.entry(record.operation).or_default();
    ring.push_back(record.duration_ms);
    while ring.len() > DURATION_RING_CAP {
        ring.pop_front();
    }
}

fn should_flush(state: &Arc<Mutex<AggregatorState>>, config: &MetricsConfig) -> bool {
    let state = state.lock();
    let total_pending: u64 = state.flags.values().map(|f| f.pending).sum();
    total_pending as usize >= config.batch_size || state.last_flush.elapsed() >= config.flush_interval
}

/// Copies and clears `pending`/the duration ring for every flag with
/// unflushed activity, then pushes the deltas to Remote (§4.8). A
/// disconnected or absent Remote Store makes this a no-op: local counters
/// keep accumulating rather than being silently dropped.
async fn flush(state: &Arc<Mutex<AggregatorState>>, remote: &Arc<dyn RemoteStore>, config: &MetricsConfig) {
    let should_push = match config.remote_tracking {
        RemoteTracking::Disabled => false,
        RemoteTracking::Enabled | RemoteTracking::Auto => remote.is_available(),
    };
    if !should_push {
        return;
    }

    let snapshot: Vec<(String, u64, HashMap<Operation, (u64, f64)>)> = {
        let mut state = state.lock();
        state.last_flush = Instant::now();
        let mut out = Vec::new();
        for (name, agg) in &mut state.flags {
            if agg.pending == 0 && agg.durations.values().all(VecDeque::is_empty) {
                continue;
            }
            let count = agg.pending;
            agg.pending = 0;
            agg.flushed_counts += count;

            let mut op_sums = HashMap::new();
            for (op, ring) in &mut agg.durations {
                if ring.is_empty() {
                    continue;
                }
                #[allow(clippy::cast_precision_loss)]
                let sum: f64 = ring.iter().sum::<u64>() as f64;
                op_sums.insert(*op, (ring.len() as u64, sum));
                ring.clear();
            }
            out.push((name.clone(), count, op_sums));
        }
        out
    };

    for (name, count, op_sums) in snapshot {
        if count > 0 {
            #[allow(clippy::cast_possible_wrap)]
            let count_signed = count as i64;
            if let Err(err) = remote.incr_count(&stats_key(&name), count_signed).await {
                warn!(flag = %name, error = %err, "failed to flush usage count");
            }
        }
        for (op, (op_count, sum)) in op_sums {
            if let Err(err) = remote.incr_float(&duration_sum_key(&name, op), sum).await {
                warn!(flag = %name, error = %err, "failed to flush duration sum");
            }
            #[allow(clippy::cast_possible_wrap)]
            let op_count_signed = op_count as i64;
            if let Err(err) = remote
                .incr_count(&duration_count_key(&name, op), op_count_signed)
                .await
            {
                warn!(flag = %name, error = %err, "failed to flush duration count");
            }
        }
    }
}

fn stats_key(name: &str) -> String {
    format!("magick:stats:{name}")
}

fn duration_sum_key(name: &str, op: Operation) -> String {
    format!("magick:duration:sum:{name}:{}", op.as_str())
}

fn duration_count_key(name: &str, op: Operation) -> String {
    format!("magick:duration:count:{name}:{}", op.as_str())
}
