//! Record-identifier batches consumed by the aggregation engine.

use crate::digest::Digest;

/// An opaque secondary-key, passed through to the aggregation pre-filter
/// untouched (spec.md §4.3 `pre_check`).
#[derive(Debug, Clone, Default)]
pub struct SecondaryKey(pub Vec<u8>);

/// One `(primary_digest, secondary_key)` pair.
#[derive(Debug, Clone)]
pub struct RecordId {
    /// The record's primary digest.
    pub digest: Digest,
    /// Its secondary-index key, if the batch was built from an index scan.
    pub secondary_key: SecondaryKey,
}

/// An ordered sequence of [`RecordId`]s, as produced by one secondary-index
/// partition scan (spec.md §3 "Record-Identifier Batch").
#[derive(Debug, Clone, Default)]
pub struct RecordIdBatch {
    ids: Vec<RecordId>,
}

impl RecordIdBatch {
    /// Build a batch from its record ids.
    pub fn new(ids: Vec<RecordId>) -> Self {
        Self { ids }
    }

    /// Number of records in this batch.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Is this batch empty?
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The record id at `offset`, if in range.
    pub fn get(&self, offset: usize) -> Option<&RecordId> {
        self.ids.get(offset)
    }
}

/// An ordered sequence of batches — the "batch of batches" the aggregation
/// cursor iterates over (spec.md §3, §4.3).
#[derive(Debug, Clone, Default)]
pub struct RecordIdBatchList {
    batches: Vec<RecordIdBatch>,
}

impl RecordIdBatchList {
    /// Build a list from its batches, in iteration order.
    pub fn new(batches: Vec<RecordIdBatch>) -> Self {
        Self { batches }
    }

    /// An iterator over the outer batch sequence, in order.
    pub fn iter(&self) -> std::slice::Iter<'_, RecordIdBatch> {
        self.batches.iter()
    }

    /// Number of batches in the list.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Is this list empty?
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest20;

    fn id(n: u8) -> RecordId {
        RecordId {
            digest: digest20(b"set", &[n]),
            secondary_key: SecondaryKey::default(),
        }
    }

    #[test]
    fn batch_list_iterates_in_order() {
        let list = RecordIdBatchList::new(vec![
            RecordIdBatch::new(vec![id(1), id(2)]),
            RecordIdBatch::new(vec![id(3)]),
        ]);
        assert_eq!(list.len(), 2);
        let lens: Vec<_> = list.iter().map(RecordIdBatch::len).collect();
        assert_eq!(lens, vec![2, 1]);
    }
}
