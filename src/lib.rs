//! Block serialization core for the reefdb document store.

pub mod account;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod flock;
pub mod metrics;
pub mod serializer;
pub mod signal;
pub mod token;

pub use account::IoAccount;
pub use buffer::{BufferPool, DataPtr};
pub use config::SerializerConfig;
pub use device::{BlockDevice, FileDevice, MemDevice};
pub use error::{Error, Result};
pub use metrics::SerializerMetrics;
pub use serializer::index::{IndexEntry, IndexWriteOp, TokenChange};
pub use serializer::writes::{LaunchCallback, SerializerWrite, WriteAction};
pub use serializer::Serializer;
pub use signal::{CompletionHandle, IoCallback, WriteCompletion};
pub use token::{BlockId, BlockToken, Recency};
