//! In-memory block index: block id to current (token, recency).
//!
//! Mutation happens only through [`Index::apply`], one op at a time in batch
//! order, under the serializer's exclusive borrow. Readers therefore never
//! observe a half-applied batch.

use std::collections::HashMap;

use crate::token::{BlockId, BlockToken, Recency};

/// What a batch does to one block's indexed token.
#[derive(Debug, Clone)]
pub enum TokenChange {
    /// Leave whatever token the index currently holds (touch).
    Keep,
    /// Clear the token: the block no longer has live data (delete).
    Clear,
    /// Point the block at a freshly written version (update).
    Set(BlockToken),
}

/// The normalized, per-block result of processing one write request. The unit
/// committed atomically to the index.
#[derive(Debug, Clone)]
pub struct IndexWriteOp {
    pub block_id: BlockId,
    pub token: TokenChange,
    pub recency: Option<Recency>,
}

impl IndexWriteOp {
    /// An op that changes nothing; the dispatch phase fills it in.
    pub fn new(block_id: BlockId) -> Self {
        Self {
            block_id,
            token: TokenChange::Keep,
            recency: None,
        }
    }
}

/// Current index state for one block.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// `None` for deleted blocks.
    pub token: Option<BlockToken>,
    pub recency: Recency,
}

#[derive(Debug, Default)]
pub(crate) struct Index {
    entries: HashMap<BlockId, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, op: &IndexWriteOp) {
        let entry = self.entries.entry(op.block_id).or_insert(IndexEntry {
            token: None,
            recency: Recency::INVALID,
        });

        match &op.token {
            TokenChange::Keep => {}
            TokenChange::Clear => entry.token = None,
            TokenChange::Set(token) => entry.token = Some(token.clone()),
        }

        if let Some(recency) = op.recency {
            entry.recency = recency;
        }
    }

    pub fn get(&self, block_id: BlockId) -> Option<&IndexEntry> {
        self.entries.get(&block_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_op(block_id: BlockId, token: BlockToken, recency: u64) -> IndexWriteOp {
        IndexWriteOp {
            block_id,
            token: TokenChange::Set(token),
            recency: Some(Recency(recency)),
        }
    }

    #[test]
    fn test_set_then_clear() {
        let mut index = Index::new();
        let token = BlockToken::new(1, 0, 4096);

        index.apply(&set_op(1, token.clone(), 10));
        let entry = index.get(1).unwrap();
        assert!(entry.token.as_ref().unwrap().same_version(&token));
        assert_eq!(entry.recency, Recency(10));

        index.apply(&IndexWriteOp {
            block_id: 1,
            token: TokenChange::Clear,
            recency: Some(Recency::INVALID),
        });
        let entry = index.get(1).unwrap();
        assert!(entry.token.is_none());
        assert!(!entry.recency.is_valid());
    }

    #[test]
    fn test_keep_leaves_token_untouched() {
        let mut index = Index::new();
        let token = BlockToken::new(2, 4096, 4096);
        index.apply(&set_op(2, token.clone(), 5));

        // A touch bumps recency only.
        index.apply(&IndexWriteOp {
            block_id: 2,
            token: TokenChange::Keep,
            recency: Some(Recency(9)),
        });

        let entry = index.get(2).unwrap();
        assert!(entry.token.as_ref().unwrap().same_version(&token));
        assert_eq!(entry.recency, Recency(9));
    }

    #[test]
    fn test_same_id_ops_apply_in_order() {
        let mut index = Index::new();
        let first = BlockToken::new(3, 0, 4096);
        let second = BlockToken::new(3, 4096, 4096);

        index.apply(&set_op(3, first, 1));
        index.apply(&set_op(3, second.clone(), 2));

        // Later op for the same id wins.
        let entry = index.get(3).unwrap();
        assert!(entry.token.as_ref().unwrap().same_version(&second));
        assert_eq!(entry.recency, Recency(2));
    }

    #[test]
    fn test_unknown_block_absent() {
        let index = Index::new();
        assert!(index.get(99).is_none());
        assert_eq!(index.len(), 0);
    }
}
