//! The block serializer: durably writes fixed-size blocks to the backing
//! device and tracks which on-disk location holds the latest version of each
//! logical block.
//!
//! Writes follow a two-phase protocol. `block_write` issues one asynchronous
//! data write and immediately returns a live token for the in-flight version;
//! `index_write` then commits a batch of (block id, token, recency) mappings
//! atomically once every referenced data write has completed. Deletes and
//! touches are index-only and never write data. The batching of the two
//! phases lives in [`writes`].
//!
//! A serializer is a single-owner handle: it is deliberately `!Sync` and its
//! mutating entry points take `&mut self`, so all calls are serialized on the
//! owning thread by construction. Tokens are the only values that cross
//! concurrency domains, and they are immutable.

pub mod index;
pub mod log;
pub mod writes;

use std::cell::Cell;
use std::fs;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::account::IoAccount;
use crate::buffer::{BufferPool, DataPtr};
use crate::config::SerializerConfig;
use crate::device::{BlockDevice, FileDevice};
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::metrics::SerializerMetrics;
use crate::signal::CompletionHandle;
use crate::token::{BlockId, BlockToken};

use index::{Index, IndexEntry, IndexWriteOp, TokenChange};
use log::{IndexLog, IndexLogIterator};

const DATA_FILE: &str = "blocks.dat";
const INDEX_LOG_FILE: &str = "index.log";
const LOCK_FILE: &str = "reefdb.lock";

pub struct Serializer {
    config: SerializerConfig,
    device: Arc<dyn BlockDevice>,
    log: IndexLog,
    index: Index,
    pool: BufferPool,
    next_offset: u64,
    metrics: Arc<SerializerMetrics>,
    _lock: FileLock,
    // Keeps the type !Sync: entry points must all run on the owning thread.
    _home: PhantomData<Cell<()>>,
}

impl Serializer {
    /// Open a file-backed serializer in `config.dir`, creating the directory,
    /// data file, and index log as needed. Must run inside a tokio runtime.
    pub fn open(config: SerializerConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let data_path = config.dir.join(DATA_FILE);
        let device = Arc::new(FileDevice::open(&data_path)?);

        // Place new blocks past whatever the data file already holds.
        let len = fs::metadata(&data_path)?.len();
        let block = config.block_size as u64;
        let next_offset = len.div_ceil(block) * block;

        Self::build(config, device, next_offset)
    }

    /// Open a serializer over a caller-supplied device. The index log and
    /// lock file still live in `config.dir`.
    pub fn with_device(config: SerializerConfig, device: Arc<dyn BlockDevice>) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Self::build(config, device, 0)
    }

    fn build(
        config: SerializerConfig,
        device: Arc<dyn BlockDevice>,
        next_offset: u64,
    ) -> Result<Self> {
        let lock = FileLock::lock(config.dir.join(LOCK_FILE)).map_err(Error::LockError)?;
        let log = IndexLog::open(config.dir.join(INDEX_LOG_FILE), config.block_size)?;
        let pool = BufferPool::new(config.block_size);

        tracing::debug!(
            dir = %config.dir.display(),
            block_size = config.block_size,
            "serializer opened"
        );

        Ok(Self {
            config,
            device,
            log,
            index: Index::new(),
            pool,
            next_offset,
            metrics: Arc::new(SerializerMetrics::new()),
            _lock: lock,
            _home: PhantomData,
        })
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn metrics(&self) -> Arc<SerializerMetrics> {
        self.metrics.clone()
    }

    /// A fresh block buffer from the serializer's pool.
    pub fn malloc(&self) -> DataPtr {
        let mut ptr = DataPtr::empty();
        ptr.init_malloc(&self.pool);
        ptr
    }

    /// A new buffer duplicating `other`'s contents.
    pub fn clone_ptr(&self, other: &DataPtr) -> DataPtr {
        let mut ptr = DataPtr::empty();
        ptr.init_clone(&self.pool, other);
        ptr
    }

    /// An account with unlimited outstanding writes.
    pub fn make_io_account(&self, priority: i32) -> IoAccount {
        IoAccount::new(priority, None)
    }

    /// An account capped at `max_outstanding` concurrent writes.
    pub fn make_io_account_limited(&self, priority: i32, max_outstanding: usize) -> IoAccount {
        IoAccount::new(priority, Some(max_outstanding))
    }

    /// Issue one asynchronous write of `buf`'s contents as the new version of
    /// `block_id`, billed to `account`.
    ///
    /// Returns immediately with a live token for the in-flight version; the
    /// backing storage is valid once `completion` fires, which it does
    /// exactly once, after the physical write lands. The token may be shared
    /// (e.g. published to a cache) before that.
    pub fn block_write(
        &mut self,
        mut buf: DataPtr,
        block_id: BlockId,
        account: &IoAccount,
        completion: CompletionHandle,
    ) -> BlockToken {
        let data = buf.take();
        assert_eq!(
            data.len(),
            self.config.block_size,
            "buffer does not match the serializer's block size"
        );

        let offset = self.next_offset;
        self.next_offset += self.config.block_size as u64;

        let token = BlockToken::new(block_id, offset, data.len() as u32);
        self.metrics.blocks_dispatched.fetch_add(1, Ordering::SeqCst);

        let device = self.device.clone();
        let metrics = self.metrics.clone();
        let slots = account.slots();
        let priority = account.priority();
        let in_flight = token.clone();

        tokio::spawn(async move {
            let _permit = match slots {
                Some(slots) => Some(
                    slots
                        .acquire_owned()
                        .await
                        .expect("i/o account slot pool closed"),
                ),
                None => None,
            };

            match device.write_at(offset, data).await {
                Ok(()) => {
                    in_flight.mark_written();
                    metrics.blocks_written.fetch_add(1, Ordering::SeqCst);
                    completion.fire(Ok(()));
                }
                Err(e) => {
                    metrics.write_failures.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(block_id, offset, priority, error = %e, "block write failed");
                    completion.fire(Err(e));
                }
            }
        });

        token
    }

    /// Atomically commit `ops` to the index: one durable log record, then the
    /// in-memory map, in input order. Either the whole batch becomes visible
    /// to lookups or none of it does.
    ///
    /// Every token the batch sets must already have its data write completed;
    /// committing an in-flight token is a contract violation.
    pub async fn index_write(&mut self, ops: Vec<IndexWriteOp>, account: &IoAccount) -> Result<()> {
        for op in &ops {
            if let TokenChange::Set(token) = &op.token {
                assert!(
                    token.is_written(),
                    "index commit references a data write still in flight"
                );
            }
        }

        // Data must be durable before the index record that points at it.
        if self.config.data_sync {
            self.device.sync().await?;
        }

        self.log.append_batch(&ops)?;
        self.log.sync()?;

        for op in &ops {
            self.index.apply(op);
        }

        self.metrics.batches_committed.fetch_add(1, Ordering::SeqCst);
        self.metrics
            .index_ops_applied
            .fetch_add(ops.len() as u64, Ordering::SeqCst);
        tracing::debug!(
            ops = ops.len(),
            priority = account.priority(),
            "index batch committed"
        );

        Ok(())
    }

    /// Current (token, recency) for a block, if the index has ever seen it.
    pub fn index_lookup(&self, block_id: BlockId) -> Option<IndexEntry> {
        self.index.get(block_id).cloned()
    }

    /// Read a block version's data back from the device.
    pub async fn block_read(&self, token: &BlockToken) -> Result<Box<[u8]>> {
        assert!(
            token.is_written(),
            "reading a data write still in flight"
        );
        self.device.read_at(token.offset(), token.len() as usize).await
    }

    /// Every committed index batch, oldest first.
    pub fn committed_batches(&self) -> Result<IndexLogIterator> {
        self.log.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;
    use crate::token::Recency;
    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    fn test_config(dir: &std::path::Path) -> SerializerConfig {
        SerializerConfig::new(dir).block_size(512)
    }

    fn filled(ser: &Serializer, byte: u8) -> DataPtr {
        let mut ptr = ser.malloc();
        ptr.data_mut().fill(byte);
        ptr
    }

    #[tokio::test]
    async fn test_open_creates_files() {
        let dir = tempdir().unwrap();
        let _ser = Serializer::open(test_config(dir.path())).unwrap();

        assert!(dir.path().join(DATA_FILE).exists());
        assert!(dir.path().join(INDEX_LOG_FILE).exists());
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_second_open_fails_while_locked() {
        let dir = tempdir().unwrap();
        let _ser = Serializer::open(test_config(dir.path())).unwrap();

        let second = Serializer::open(test_config(dir.path()));
        assert!(matches!(second, Err(Error::LockError(_))));
    }

    #[tokio::test]
    async fn test_block_write_then_commit_then_read() {
        let dir = tempdir().unwrap();
        let mut ser = Serializer::open(test_config(dir.path())).unwrap();
        let account = ser.make_io_account(0);

        let (handle, completion) = signal::completion_pair();
        let token = ser.block_write(filled(&ser, 0xAB), 1, &account, handle);
        assert!(!token.is_written());

        completion.wait().await.unwrap();
        assert!(token.is_written());

        ser.index_write(
            vec![IndexWriteOp {
                block_id: 1,
                token: TokenChange::Set(token.clone()),
                recency: Some(Recency(7)),
            }],
            &account,
        )
        .await
        .unwrap();

        let entry = ser.index_lookup(1).unwrap();
        assert!(entry.token.unwrap().same_version(&token));
        assert_eq!(entry.recency, Recency(7));

        let data = ser.block_read(&token).await.unwrap();
        assert_eq!(data.len(), 512);
        assert!(data.iter().all(|&b| b == 0xAB));
    }

    #[tokio::test]
    async fn test_writes_land_at_distinct_offsets() {
        let dir = tempdir().unwrap();
        let mut ser = Serializer::open(test_config(dir.path())).unwrap();
        let account = ser.make_io_account(0);

        let (h1, c1) = signal::completion_pair();
        let (h2, c2) = signal::completion_pair();
        let t1 = ser.block_write(filled(&ser, 1), 1, &account, h1);
        let t2 = ser.block_write(filled(&ser, 2), 1, &account, h2);

        assert_ne!(t1.offset(), t2.offset());
        c1.wait().await.unwrap();
        c2.wait().await.unwrap();

        assert_eq!(&*ser.block_read(&t1).await.unwrap(), &[1u8; 512][..]);
        assert_eq!(&*ser.block_read(&t2).await.unwrap(), &[2u8; 512][..]);
    }

    #[tokio::test]
    async fn test_limited_account_still_completes() {
        let dir = tempdir().unwrap();
        let mut ser = Serializer::open(test_config(dir.path())).unwrap();
        let account = ser.make_io_account_limited(0, 1);

        let mut completions = Vec::new();
        for i in 0..8u8 {
            let (handle, completion) = signal::completion_pair();
            ser.block_write(filled(&ser, i), i as u64, &account, handle);
            completions.push(completion);
        }
        for completion in completions {
            completion.wait().await.unwrap();
        }

        assert_eq!(ser.metrics().blocks_written(), 8);
    }

    /// A device whose writes never complete until released.
    struct StuckDevice {
        gate: Notify,
    }

    #[async_trait]
    impl BlockDevice for StuckDevice {
        async fn write_at(&self, _offset: u64, _data: Box<[u8]>) -> Result<()> {
            self.gate.notified().await;
            Ok(())
        }

        async fn read_at(&self, _offset: u64, _len: usize) -> Result<Box<[u8]>> {
            unimplemented!("not used by this test")
        }

        async fn sync(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    #[should_panic(expected = "data write still in flight")]
    async fn test_commit_of_in_flight_token_panics() {
        let dir = tempdir().unwrap();
        let device = Arc::new(StuckDevice {
            gate: Notify::new(),
        });
        let mut ser = Serializer::with_device(test_config(dir.path()), device).unwrap();
        let account = ser.make_io_account(0);

        let (handle, _completion) = signal::completion_pair();
        let token = ser.block_write(filled(&ser, 0), 1, &account, handle);

        // The write can never have completed; committing it is a contract
        // violation.
        ser.index_write(
            vec![IndexWriteOp {
                block_id: 1,
                token: TokenChange::Set(token),
                recency: Some(Recency(1)),
            }],
            &account,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "does not match the serializer's block size")]
    async fn test_wrong_buffer_size_panics() {
        let dir = tempdir().unwrap();
        let mut ser = Serializer::open(test_config(dir.path())).unwrap();
        let account = ser.make_io_account(0);

        let pool = BufferPool::new(1024);
        let mut ptr = DataPtr::empty();
        ptr.init_malloc(&pool);

        let (handle, _completion) = signal::completion_pair();
        ser.block_write(ptr, 1, &account, handle);
    }
}
