//! Partition reservations: authorization to serve a partition in a mode.

/// The mode a partition is reserved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationMode {
    /// Reserved for reads.
    Read,
    /// Reserved for writes.
    Write,
    /// Reserved for a shipped/migrate operation.
    Migrate,
}

/// Tree pointers carried by a reservation. Opaque to this crate — the
/// storage engine is an external collaborator (spec.md §1 "Out of scope").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TreePointers {
    /// Pointer-sized handle to the primary index tree.
    pub primary: u64,
    /// Pointer-sized handle to the sub-record tree, if any.
    pub sub_tree: u64,
}

/// An opaque handle asserting the local node is authorized to serve a
/// given partition in a given mode (spec.md §3 "Partition Reservation").
///
/// A reservation has exactly one live holder; releasing transfers
/// nothing. In test builds, [`PartitionReservation::release`] panics on a
/// double-release so the invariant in spec.md §8 ("`release` followed by
/// another `release` ... forbidden") is caught by test instrumentation
/// rather than silently tolerated.
#[derive(Debug, Clone)]
pub struct PartitionReservation {
    /// Namespace this reservation covers.
    pub namespace: String,
    /// Partition id within the namespace.
    pub partition_id: u16,
    /// Mode the partition was reserved in.
    pub mode: ReservationMode,
    /// Opaque partition state, as returned by the reservation gateway.
    pub state: u32,
    /// Cluster epoch / cluster key at the time of reservation.
    pub cluster_key: u64,
    /// Tree pointers.
    pub trees: TreePointers,
    /// Number of peer replicas holding versions that may need resolution.
    pub n_dupl: u32,
    #[cfg(test)]
    released: std::cell::Cell<bool>,
}

impl PartitionReservation {
    /// Construct a reservation as returned fresh from the gateway.
    pub fn new(
        namespace: impl Into<String>,
        partition_id: u16,
        mode: ReservationMode,
        state: u32,
        cluster_key: u64,
        trees: TreePointers,
        n_dupl: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            partition_id,
            mode,
            state,
            cluster_key,
            trees,
            n_dupl,
            #[cfg(test)]
            released: std::cell::Cell::new(false),
        }
    }

    /// A partial, shallow "view" copy of this reservation's fields for a
    /// downstream consumer's own slot — spec.md §9 "Reservation copy":
    /// deliberately shallow, never clones owned sub-structures. Used by the
    /// aggregation cursor (spec.md §4.3 `open()`) to populate the
    /// transaction-scoped reservation slot from the aggregation-acquired
    /// one.
    pub fn view(&self) -> ReservationView {
        ReservationView {
            state: self.state,
            partition_id: self.partition_id,
            trees: self.trees,
            cluster_key: self.cluster_key,
        }
    }

    /// Mark this reservation released. Calling this twice on the same
    /// reservation is a programmer error; in test builds it panics so the
    /// double-release invariant (spec.md §8) is caught by instrumentation.
    pub fn mark_released(&self) {
        #[cfg(test)]
        {
            assert!(
                !self.released.replace(true),
                "reservation for ns={} pid={} released twice",
                self.namespace,
                self.partition_id
            );
        }
    }
}

/// A shallow view into a [`PartitionReservation`]'s fields, as copied into
/// a transaction's own reservation slot (spec.md §9). Intentionally
/// carries no owned sub-structures (no namespace string, no `n_dupl`) —
/// only what a downstream consumer needs to keep operating against the
/// same partition state.
#[derive(Debug, Clone, Copy)]
pub struct ReservationView {
    /// Opaque partition state.
    pub state: u32,
    /// Partition id.
    pub partition_id: u16,
    /// Tree pointers.
    pub trees: TreePointers,
    /// Cluster epoch / cluster key.
    pub cluster_key: u64,
}
