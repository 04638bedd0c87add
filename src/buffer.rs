//! Serializer-owned block buffers.
//!
//! A [`DataPtr`] is exclusively owned by one slot and has exactly three legal
//! states: empty, allocated from the pool, or cloned from another pointer's
//! contents. The transitions are checked: freeing an empty pointer, allocating
//! into a non-empty one, or cloning into a non-empty one is a programmer
//! error, not a runtime condition, and trips an assertion.

/// Hands out fixed-size block buffers.
///
/// Contention policy lives with the external allocator; this pool only fixes
/// the block size and keeps every buffer exactly that long.
#[derive(Debug, Clone)]
pub struct BufferPool {
    block_size: usize,
}

impl BufferPool {
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self { block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// A fresh zeroed block buffer.
    pub fn malloc(&self) -> Box<[u8]> {
        vec![0u8; self.block_size].into_boxed_slice()
    }

    /// A fresh buffer duplicating `src`'s contents.
    pub fn clone_buf(&self, src: &[u8]) -> Box<[u8]> {
        assert_eq!(src.len(), self.block_size, "source buffer has wrong size");
        Box::from(src)
    }
}

/// Exclusively-owned handle to one block buffer.
#[derive(Debug, Default)]
pub struct DataPtr {
    buf: Option<Box<[u8]>>,
}

impl DataPtr {
    pub fn empty() -> Self {
        Self { buf: None }
    }

    pub fn has(&self) -> bool {
        self.buf.is_some()
    }

    /// Take ownership of a fresh buffer from the pool. The pointer must be
    /// empty.
    pub fn init_malloc(&mut self, pool: &BufferPool) {
        assert!(!self.has(), "data pointer already holds a buffer");
        self.buf = Some(pool.malloc());
    }

    /// Take ownership of a copy of `other`'s buffer. The source must be
    /// non-empty and this pointer empty; `other` stays independently owned by
    /// its holder.
    pub fn init_clone(&mut self, pool: &BufferPool, other: &DataPtr) {
        assert!(other.has(), "clone source is empty");
        assert!(!self.has(), "data pointer already holds a buffer");
        self.buf = Some(pool.clone_buf(other.data()));
    }

    /// Release the buffer. The pointer must be non-empty.
    pub fn free(&mut self) {
        assert!(self.has(), "freeing an empty data pointer");
        self.buf = None;
    }

    pub fn data(&self) -> &[u8] {
        self.buf.as_deref().expect("data pointer is empty")
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().expect("data pointer is empty")
    }

    /// Move the buffer out, leaving the pointer empty.
    pub(crate) fn take(&mut self) -> Box<[u8]> {
        self.buf.take().expect("data pointer is empty")
    }
}
