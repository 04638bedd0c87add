//! Write batching: turns a batch of heterogeneous write requests into
//! parallel data writes plus one atomic index commit.
//!
//! The batch runs in three strict phases. Dispatch issues a data write per
//! update (deletes and touches carry no data) and assembles the index ops in
//! input order. The barrier waits for every data write issued by this batch.
//! Commit hands the assembled ops to `index_write` as a single batch. The
//! index therefore never points at a block version that is still being
//! physically written.
//!
//! Requests within one batch are not deduplicated: issuing more than one
//! request for the same block id in a single batch applies them in input
//! order, and avoiding contradictory combinations is the caller's
//! responsibility.

use crate::account::IoAccount;
use crate::buffer::DataPtr;
use crate::error::Result;
use crate::signal::{self, IoCallback};
use crate::token::{BlockId, BlockToken, Recency};

use super::index::{IndexWriteOp, TokenChange};
use super::Serializer;

/// Invoked synchronously once an update's data write has been issued,
/// receiving the in-flight token before the write completes. Lets a caller
/// publish the token's identity without waiting for physical completion.
pub type LaunchCallback = Box<dyn FnOnce(&BlockToken) + Send>;

/// One write request, tagged with its target block.
pub struct SerializerWrite {
    pub block_id: BlockId,
    pub action: WriteAction,
}

pub enum WriteAction {
    /// Write a new version of the block's data and point the index at it.
    Update {
        buf: DataPtr,
        recency: Recency,
        io_callback: Option<IoCallback>,
        launch_callback: Option<LaunchCallback>,
    },
    /// Clear the block's token and mark its recency invalid. No data write.
    Delete,
    /// Bump the block's recency, leaving its token alone. No data write.
    Touch { recency: Recency },
}

impl SerializerWrite {
    pub fn make_update(block_id: BlockId, recency: Recency, buf: DataPtr) -> Self {
        Self {
            block_id,
            action: WriteAction::Update {
                buf,
                recency,
                io_callback: None,
                launch_callback: None,
            },
        }
    }

    pub fn make_delete(block_id: BlockId) -> Self {
        Self {
            block_id,
            action: WriteAction::Delete,
        }
    }

    pub fn make_touch(block_id: BlockId, recency: Recency) -> Self {
        Self {
            block_id,
            action: WriteAction::Touch { recency },
        }
    }

    /// Attach a callback fired when the update's physical write completes.
    pub fn io_callback(mut self, callback: IoCallback) -> Self {
        match &mut self.action {
            WriteAction::Update { io_callback, .. } => *io_callback = Some(callback),
            _ => panic!("io callback on a non-update request"),
        }
        self
    }

    /// Attach a callback fired as soon as the update's write is issued.
    pub fn launch_callback(mut self, callback: LaunchCallback) -> Self {
        match &mut self.action {
            WriteAction::Update { launch_callback, .. } => *launch_callback = Some(callback),
            _ => panic!("launch callback on a non-update request"),
        }
        self
    }
}

impl Serializer {
    /// Run a batch of write requests: issue the data writes, wait for all of
    /// them, then commit the batch's index operations atomically.
    ///
    /// An empty batch is a no-op commit. A batch of only deletes and touches
    /// issues no data writes and goes straight to the commit.
    pub async fn do_writes(
        &mut self,
        writes: Vec<SerializerWrite>,
        account: &IoAccount,
    ) -> Result<()> {
        let mut completions = Vec::with_capacity(writes.len());
        let mut ops = Vec::with_capacity(writes.len());

        // Phase 1: issue the data writes and assemble the index ops, in
        // input order.
        for write in writes {
            let mut op = IndexWriteOp::new(write.block_id);

            match write.action {
                WriteAction::Update {
                    buf,
                    recency,
                    io_callback,
                    launch_callback,
                } => {
                    let (handle, completion) = signal::chained_pair(io_callback);
                    let token = self.block_write(buf, write.block_id, account, handle);
                    if let Some(launched) = launch_callback {
                        launched(&token);
                    }
                    op.token = TokenChange::Set(token);
                    op.recency = Some(recency);
                    completions.push(completion);
                }
                WriteAction::Delete => {
                    op.token = TokenChange::Clear;
                    op.recency = Some(Recency::INVALID);
                }
                WriteAction::Touch { recency } => {
                    op.recency = Some(recency);
                }
            }

            ops.push(op);
        }

        // Phase 2: every data write this batch issued must land before the
        // index may point at it.
        for completion in completions {
            completion.wait().await?;
        }

        // Phase 3: one atomic index commit for the whole batch.
        self.index_write(ops, account).await
    }

    /// Issue a single data write and wait for it to complete. Does not touch
    /// the index.
    pub async fn write_block(
        &mut self,
        buf: DataPtr,
        block_id: BlockId,
        account: &IoAccount,
    ) -> Result<BlockToken> {
        let (handle, completion) = signal::completion_pair();
        let token = self.block_write(buf, block_id, account, handle);
        completion.wait().await?;
        Ok(token)
    }
}
