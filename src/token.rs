use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifies a logical block. Stable for the block's lifetime and unique
/// within one serializer instance.
pub type BlockId = u64;

/// Logical timestamp ordering block versions.
///
/// `Recency::INVALID` marks blocks with no recency, e.g. deleted blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Recency(pub u64);

impl Recency {
    pub const INVALID: Recency = Recency(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Recency::INVALID
    }
}

/// Shared handle to one on-disk version of a block's data.
///
/// Tokens are immutable once constructed: an update produces a new token, it
/// never redirects an existing one. Any number of owners (in-flight reads,
/// cache entries) may hold clones; the backing region becomes reusable when
/// the last clone is dropped.
///
/// Equality is identity, not content. Two writes of identical bytes yield two
/// distinct tokens, and a clone compares equal only to the token it was
/// cloned from.
#[derive(Debug, Clone)]
pub struct BlockToken {
    inner: Arc<TokenData>,
}

#[derive(Debug)]
struct TokenData {
    block_id: BlockId,
    offset: u64,
    len: u32,
    // Flipped by the storage task once the physical write has landed.
    written: AtomicBool,
}

impl BlockToken {
    pub(crate) fn new(block_id: BlockId, offset: u64, len: u32) -> Self {
        Self {
            inner: Arc::new(TokenData {
                block_id,
                offset,
                len,
                written: AtomicBool::new(false),
            }),
        }
    }

    /// Rebuild a token for a write that is already durable, e.g. one decoded
    /// from the index log.
    pub(crate) fn durable(block_id: BlockId, offset: u64, len: u32) -> Self {
        let token = Self::new(block_id, offset, len);
        token.mark_written();
        token
    }

    pub fn block_id(&self) -> BlockId {
        self.inner.block_id
    }

    pub fn offset(&self) -> u64 {
        self.inner.offset
    }

    pub fn len(&self) -> u32 {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Whether the data write behind this token has completed.
    pub fn is_written(&self) -> bool {
        self.inner.written.load(Ordering::Acquire)
    }

    pub(crate) fn mark_written(&self) {
        self.inner.written.store(true, Ordering::Release);
    }

    /// True if both handles denote the same write.
    pub fn same_version(&self, other: &BlockToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for BlockToken {
    fn eq(&self, other: &Self) -> bool {
        self.same_version(other)
    }
}

impl Eq for BlockToken {}
