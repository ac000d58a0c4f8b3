//! The queue plane: a fixed bank of bounded FIFO queues, one or more
//! worker tasks per queue, and the routing function that picks a queue
//! for a transaction (spec.md §4.2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use metric::DurationHistogram;
use observability_deps::tracing::{error, info};
use time::TimeProvider;
use tokio::sync::mpsc;
use txn_types::{MsgField, QueuePlaneConfig, Transaction};

use crate::dispatch::{Dispatcher, ProcessOutcome};
use crate::error::programmer_error;

/// One bounded FIFO queue plus the depth counter that backs
/// [`QueuePlane::depth`] (`mpsc::Receiver` exposes no `len()`, so depth is
/// tracked alongside every push/pop, matching the original's
/// `thr_tsvc_queue_get_size` purpose of reporting load).
struct Queue {
    tx: mpsc::Sender<Transaction>,
    depth: Arc<AtomicUsize>,
}

/// Bound on each queue's channel capacity.
const QUEUE_CAPACITY: usize = 1024;

/// The queue plane: constructed once at init, shared by every caller of
/// `enqueue` / `process_or_enqueue` (spec.md §9 "a single opaque 'queue
/// plane' value").
pub struct QueuePlane {
    config: QueuePlaneConfig,
    queues: Vec<Queue>,
    round_robin: AtomicUsize,
    allow_inline_transactions: bool,
    all_namespaces_in_memory: bool,
    in_memory_namespace_check: Box<dyn Fn(&str) -> bool + Send + Sync>,
    benchmarking: bool,
    queue_wait_hist: Arc<DurationHistogram>,
}

impl QueuePlane {
    /// Build the queue plane and spawn its worker tasks, each running an
    /// infinite `while let Some(tr) = rx.recv().await` loop over its
    /// queue — the async analogue of `thr_tsvc`'s blocking-pop worker
    /// thread (spec.md §4.2 "Worker model"). A closed channel is treated
    /// as fatal, mirroring the original's "a failed pop is fatal."
    pub fn new<T>(
        config: QueuePlaneConfig,
        dispatcher: Arc<Dispatcher<T>>,
        allow_inline_transactions: bool,
        all_namespaces_in_memory: bool,
        in_memory_namespace_check: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self
    where
        T: TimeProvider,
    {
        let n = config.n_transaction_queues as usize;
        let mut queues = Vec::with_capacity(n);
        let queue_wait_hist = Arc::new(DurationHistogram::default());
        let benchmarking = dispatcher.benchmarking();

        for q_idx in 0..n {
            let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
            let depth = Arc::new(AtomicUsize::new(0));
            queues.push(Queue {
                tx,
                depth: Arc::clone(&depth),
            });

            let dispatcher = Arc::clone(&dispatcher);
            let queue_wait_hist = Arc::clone(&queue_wait_hist);
            tokio::spawn(Self::run_workers(
                q_idx,
                rx,
                dispatcher,
                depth,
                config.n_transaction_threads_per_queue,
                benchmarking,
                queue_wait_hist,
            ));
        }

        info!(n_queues = n, "queue plane started");

        Self {
            config,
            queues,
            round_robin: AtomicUsize::new(0),
            allow_inline_transactions,
            all_namespaces_in_memory,
            in_memory_namespace_check: Box::new(in_memory_namespace_check),
            benchmarking,
            queue_wait_hist,
        }
    }

    /// The queue-wait latency histogram (spec.md §4.2 "Observability
    /// hook"), for exporting alongside [`DispatchStats`](crate::dispatch::DispatchStats).
    pub fn queue_wait_histogram(&self) -> &DurationHistogram {
        &self.queue_wait_hist
    }

    /// Fan one queue's receiver out to `n_threads` worker tasks sharing
    /// it through a mutex-guarded receiver, since `tokio::sync::mpsc`
    /// receivers aren't `Clone`.
    async fn run_workers<T>(
        q_idx: usize,
        rx: mpsc::Receiver<Transaction>,
        dispatcher: Arc<Dispatcher<T>>,
        depth: Arc<AtomicUsize>,
        n_threads: u32,
        benchmarking: bool,
        queue_wait_hist: Arc<DurationHistogram>,
    ) where
        T: TimeProvider,
    {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = Vec::with_capacity(n_threads as usize);
        for _ in 0..n_threads {
            let rx = Arc::clone(&rx);
            let dispatcher = Arc::clone(&dispatcher);
            let depth = Arc::clone(&depth);
            let queue_wait_hist = Arc::clone(&queue_wait_hist);
            handles.push(tokio::spawn(async move {
                loop {
                    let tr = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match tr {
                        Some(tr) => {
                            depth.fetch_sub(1, Ordering::SeqCst);
                            Self::record_queue_wait(dispatcher.now(), &queue_wait_hist, benchmarking, &tr);
                            Self::dispatch_one(&dispatcher, tr).await;
                        }
                        None => {
                            error!(q_idx, "queue channel closed, worker exiting");
                            programmer_error("transaction queue closed under a live worker");
                        }
                    }
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }

    /// Before dispatching, if benchmarking is enabled and `benchmark_time`
    /// is non-zero and the transaction is not a re-queue, record the
    /// queue-wait latency into a histogram (spec.md §4.2 "Observability
    /// hook").
    fn record_queue_wait(now: time::Time, queue_wait_hist: &DurationHistogram, benchmarking: bool, tr: &Transaction) {
        if !benchmarking || tr.is_restart {
            return;
        }
        let Some(benchmark_time) = tr.benchmark_time else {
            return;
        };
        let elapsed_ns = now.timestamp_nanos().saturating_sub(benchmark_time.timestamp_nanos());
        queue_wait_hist.record(std::time::Duration::from_nanos(elapsed_ns.max(0) as u64));
    }

    async fn dispatch_one<T>(dispatcher: &Dispatcher<T>, tr: Transaction)
    where
        T: TimeProvider,
    {
        let mut tr = tr;
        loop {
            match dispatcher.process(tr).await {
                ProcessOutcome::Requeue(next) => {
                    tr = next;
                    continue;
                }
                ProcessOutcome::Done | ProcessOutcome::OwnershipTransferred => break,
            }
        }
    }

    /// Aggregate queue depth across all queues — one of the most
    /// interesting load statistics (spec.md §9, supplementing
    /// `thr_tsvc_queue_get_size`).
    pub fn depth(&self) -> usize {
        self.queues.iter().map(|q| q.depth.load(Ordering::SeqCst)).sum()
    }

    /// Route `tr` to a queue index (spec.md §4.2 "Routing").
    pub fn route(&self, tr: &Transaction) -> u16 {
        if !self.config.use_queue_per_device {
            let idx = self.round_robin.fetch_add(1, Ordering::Relaxed);
            return (idx % self.config.n_transaction_queues as usize) as u16;
        }

        let namespace = tr
            .msg
            .field(MsgField::Namespace)
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or_default();
        let ns_layout = self
            .config
            .namespaces
            .iter()
            .find(|ns| ns.namespace == namespace)
            .unwrap_or_else(|| programmer_error("routing a transaction for an unconfigured namespace"));

        let write = tr.msg.info2_write();
        let digest_byte8 = tr.digest.as_ref().map(|d| d.byte8()).unwrap_or(0);

        if ns_layout.n_devices > 0 {
            let idx = (digest_byte8 as u32 % ns_layout.n_devices) + ns_layout.dev_q_offset;
            let idx = if write { idx + ns_layout.n_devices } else { idx };
            idx as u16
        } else {
            let idx = ns_layout.dev_q_offset;
            if write {
                idx as u16 + 1
            } else {
                idx as u16
            }
        }
    }

    /// Enqueue `tr` onto its routed queue. Fatal if the channel is full
    /// and capacity-bounded backpressure would otherwise deadlock the
    /// caller — matches `cf_queue_push`'s "push always succeeds or the
    /// process is in real trouble" assumption for a correctly sized
    /// queue plane.
    pub async fn enqueue(&self, tr: Transaction) {
        let idx = self.route(&tr) as usize;
        let queue = &self.queues[idx];
        queue.depth.fetch_add(1, Ordering::SeqCst);
        if queue.tx.send(tr).await.is_err() {
            programmer_error("transaction queue closed while enqueuing");
        }
    }

    /// Run the dispatcher synchronously on the caller's task when
    /// inline bypass is allowed and at least one in-memory namespace
    /// makes it safe (spec.md §4.2 "Inline bypass"), otherwise enqueue.
    pub async fn process_or_enqueue<T>(&self, dispatcher: &Dispatcher<T>, tr: Transaction)
    where
        T: TimeProvider,
    {
        let namespace = tr
            .msg
            .field(MsgField::Namespace)
            .and_then(|b| std::str::from_utf8(b).ok());

        let inline_safe = self.allow_inline_transactions
            && (self.all_namespaces_in_memory
                || namespace.map(|ns| (self.in_memory_namespace_check)(ns)).unwrap_or(false));

        if inline_safe {
            Self::dispatch_one(dispatcher, tr).await;
        } else {
            self.enqueue(tr).await;
        }
    }
}
