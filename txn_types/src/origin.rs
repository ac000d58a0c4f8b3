//! Transaction origin and the per-origin caller handle.

/// Where a transaction came from.
///
/// Mirrors `as_transaction`'s `origin` tag (`FROM_CLIENT`, `FROM_PROXY`,
/// `FROM_IUDF`, `FROM_NSUP`, and the modern-batch `FROM_BATCH` case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A client connection.
    Client,
    /// Forwarded here by a peer node acting as proxy.
    PeerProxy,
    /// Internal UDF (e.g. a secondary-index background job).
    InternalUdf,
    /// The expiration/eviction thread.
    Expiration,
    /// A per-record slice of a modern client-batch request.
    Batch,
}

/// A caller-supplied handle, discriminated by [`Origin`].
///
/// The (origin, handle) pair is a tagged sum in spirit; spec.md §9 requires
/// that a mismatched pair be rejected at construction, not at use — see
/// [`CallerHandle::matches`] and `Transaction::new`.
#[derive(Debug, Clone)]
pub enum CallerHandle {
    /// A client socket descriptor (opaque to this crate).
    ClientSocket(u64),
    /// The node that proxied this request to us.
    ProxyNode(u64),
    /// Callback context for an internal UDF origin: the opaque user data to
    /// hand back to the issuing subsystem, and a one-shot flag ensuring the
    /// callback fires exactly once (spec.md §7: "always invoke their
    /// callback exactly once on any terminal path").
    InternalUdf(InternalUdfOrigin),
    /// Expiration-thread transactions carry no handle.
    None,
}

/// Callback context carried by `Origin::InternalUdf` transactions.
#[derive(Debug, Clone)]
pub struct InternalUdfOrigin {
    /// Opaque identifier for whatever issued the internal UDF.
    pub udata: u64,
}

impl CallerHandle {
    /// Does this handle's shape match the given origin?
    pub fn matches(&self, origin: Origin) -> bool {
        matches!(
            (self, origin),
            (CallerHandle::ClientSocket(_), Origin::Client)
                | (CallerHandle::ProxyNode(_), Origin::PeerProxy)
                | (CallerHandle::InternalUdf(_), Origin::InternalUdf)
                | (CallerHandle::None, Origin::Expiration)
                | (CallerHandle::None, Origin::Batch)
        )
    }
}
