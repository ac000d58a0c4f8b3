//! Queue-plane sizing configuration (spec.md §3, §4.2).

/// Hard upper bound on the number of transaction queues, mirroring
/// `MAX_TRANSACTION_QUEUES` in the original source. Exceeding this while
/// computing per-device queue counts is fatal at startup.
pub const MAX_TRANSACTION_QUEUES: usize = 256;

/// Per-namespace device/queue layout, used when `use_queue_per_device` is
/// set (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceQueueLayout {
    /// The namespace this layout applies to.
    pub namespace: String,
    /// Number of storage devices backing this namespace. `0` means
    /// memory-only.
    pub n_devices: u32,
    /// First queue index assigned to this namespace.
    pub dev_q_offset: u32,
}

impl NamespaceQueueLayout {
    /// Number of queues this namespace needs: one read + one write per
    /// device, or one read + one write total if memory-only.
    pub fn n_queues(&self) -> u32 {
        if self.n_devices > 0 {
            self.n_devices * 2
        } else {
            2
        }
    }
}

/// Queue-plane configuration (spec.md §3 "Queue Plane Configuration").
#[derive(Debug, Clone)]
pub struct QueuePlaneConfig {
    /// Route transactions to a queue keyed by device, rather than
    /// round-robin.
    pub use_queue_per_device: bool,
    /// Total number of queues. Derived from `namespaces` when
    /// `use_queue_per_device` is set; otherwise read directly.
    pub n_transaction_queues: u32,
    /// Worker threads (tasks) per queue.
    pub n_transaction_threads_per_queue: u32,
    /// Per-namespace device/queue layout, only consulted when
    /// `use_queue_per_device` is set.
    pub namespaces: Vec<NamespaceQueueLayout>,
}

/// Error computing a [`QueuePlaneConfig`]'s derived queue count.
#[derive(Debug, snafu::Snafu)]
pub enum QueueConfigError {
    /// The per-device queue count exceeds [`MAX_TRANSACTION_QUEUES`].
    #[snafu(display(
        "number of queues required for use-queue-per-device is too many: {n_queues}, must be < {MAX_TRANSACTION_QUEUES}"
    ))]
    TooManyQueues {
        /// The computed queue count that overflowed the limit.
        n_queues: usize,
    },
}

impl QueuePlaneConfig {
    /// Compute `n_transaction_queues` from `namespaces`, per spec.md §4.2,
    /// when `use_queue_per_device` is set. Returns an error (fatal at
    /// startup in the original) if the computed count exceeds
    /// [`MAX_TRANSACTION_QUEUES`].
    pub fn resolve_n_queues(&mut self) -> Result<(), QueueConfigError> {
        if !self.use_queue_per_device {
            return Ok(());
        }

        let mut n_queues: usize = 0;
        let mut resolved = Vec::with_capacity(self.namespaces.len());
        for ns in &self.namespaces {
            let mut ns = ns.clone();
            ns.dev_q_offset = n_queues as u32;
            n_queues += ns.n_queues() as usize;
            resolved.push(ns);
        }

        if n_queues > MAX_TRANSACTION_QUEUES {
            return Err(QueueConfigError::TooManyQueues { n_queues });
        }

        self.namespaces = resolved;
        self.n_transaction_queues = n_queues as u32;
        Ok(())
    }
}
