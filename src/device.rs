//! The narrow interface through which the serializer reaches its backing
//! storage: positional block writes, positional reads, and durability sync.
//!
//! Writes take ownership of their buffer because the physical write finishes
//! on an I/O execution context, after the issuing call has returned.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

#[async_trait]
pub trait BlockDevice: Send + Sync {
    /// Write `data` at `offset`, extending the device as needed.
    async fn write_at(&self, offset: u64, data: Box<[u8]>) -> Result<()>;

    /// Read `len` bytes starting at `offset`.
    async fn read_at(&self, offset: u64, len: usize) -> Result<Box<[u8]>>;

    /// Make previously written data durable.
    async fn sync(&self) -> Result<()>;
}

/// File-backed device. Positional I/O runs on the blocking thread pool so the
/// issuing context never stalls on the disk.
pub struct FileDevice {
    file: Arc<File>,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
        })
    }

    #[cfg(unix)]
    fn write_all_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        file.write_all_at(data, offset)
    }

    #[cfg(unix)]
    fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn write_all_at(file: &File, mut offset: u64, mut data: &[u8]) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !data.is_empty() {
            let n = file.seek_write(data, offset)?;
            offset += n as u64;
            data = &data[n..];
        }
        Ok(())
    }

    #[cfg(windows)]
    fn read_exact_at(file: &File, mut offset: u64, mut buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = file.seek_read(buf, offset)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "read past end of device",
                ));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

#[async_trait]
impl BlockDevice for FileDevice {
    async fn write_at(&self, offset: u64, data: Box<[u8]>) -> Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            Self::write_all_at(&file, offset, &data).map_err(|e| Error::WriteError("block", e))
        })
        .await
        .map_err(|e| Error::InvalidState(format!("storage task failed: {}", e)))?
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Box<[u8]>> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            Self::read_exact_at(&file, offset, &mut buf)
                .map_err(|e| Error::ReadError("block", e))?;
            Ok(buf.into_boxed_slice())
        })
        .await
        .map_err(|e| Error::InvalidState(format!("storage task failed: {}", e)))?
    }

    async fn sync(&self) -> Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            file.sync_data().map_err(|e| Error::WriteError("sync", e))
        })
        .await
        .map_err(|e| Error::InvalidState(format!("storage task failed: {}", e)))?
    }
}

/// Memory-backed device for ephemeral serializers and tests.
#[derive(Default)]
pub struct MemDevice {
    data: Mutex<Vec<u8>>,
}

impl MemDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlockDevice for MemDevice {
    async fn write_at(&self, offset: u64, data: Box<[u8]>) -> Result<()> {
        let mut bytes = self.data.lock().unwrap();
        let end = offset as usize + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset as usize..end].copy_from_slice(&data);
        Ok(())
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Box<[u8]>> {
        let bytes = self.data.lock().unwrap();
        let end = offset as usize + len;
        if bytes.len() < end {
            return Err(Error::ReadError(
                "block",
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "read past end of device",
                ),
            ));
        }
        Ok(Box::from(&bytes[offset as usize..end]))
    }

    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_mem_device_roundtrip() {
        let device = MemDevice::new();
        device
            .write_at(4096, Box::from(&b"hello"[..]))
            .await
            .unwrap();

        let read = device.read_at(4096, 5).await.unwrap();
        assert_eq!(&*read, b"hello");

        // The gap below the write reads as zeroes.
        let gap = device.read_at(0, 4096).await.unwrap();
        assert!(gap.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_mem_device_read_past_end() {
        let device = MemDevice::new();
        device.write_at(0, Box::from(&b"abc"[..])).await.unwrap();
        assert!(device.read_at(0, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_file_device_roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let device = FileDevice::open(tmp.path()).unwrap();

        device
            .write_at(8192, Box::from(&b"block data"[..]))
            .await
            .unwrap();
        device.sync().await.unwrap();

        let read = device.read_at(8192, 10).await.unwrap();
        assert_eq!(&*read, b"block data");
    }

    #[tokio::test]
    async fn test_file_device_overwrite() {
        let tmp = NamedTempFile::new().unwrap();
        let device = FileDevice::open(tmp.path()).unwrap();

        device.write_at(0, Box::from(&b"aaaa"[..])).await.unwrap();
        device.write_at(0, Box::from(&b"bbbb"[..])).await.unwrap();

        let read = device.read_at(0, 4).await.unwrap();
        assert_eq!(&*read, b"bbbb");
    }
}
