//! Append-only index commit log.
//!
//! The log is the durable form of `index_write`: one checksummed record per
//! committed batch. Because a batch is exactly one record, a torn tail record
//! fails its checksum and the batch is simply not observed, which is what
//! makes the commit atomic on the medium.
//!
//! File layout:
//!
//! ```text
//! +-------------------+
//! | Header (32 bytes) |
//! +-------------------+
//! | Batch record 1    |
//! +-------------------+
//! | Batch record 2    |
//! +-------------------+
//! | ...               |
//! +-------------------+
//! ```
//!
//! Each batch record is `[length: u32][payload][crc32: u32]`, big-endian,
//! with the checksum computed over the payload.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Error, Result};
use crate::serializer::index::{IndexWriteOp, TokenChange};
use crate::token::{BlockToken, Recency};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub const HEADER_SIZE: usize = 32;
const MAGIC: &[u8; 8] = b"REEF\0IDX";
const VERSION: u32 = 1;

const TOKEN_KEEP: u8 = 0x01;
const TOKEN_CLEAR: u8 = 0x02;
const TOKEN_SET: u8 = 0x03;

#[derive(Debug, Clone)]
pub struct LogHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub block_size: u32,
}

impl LogHeader {
    fn new(block_size: u32) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            block_size,
        }
    }

    fn validate(&self, block_size: u32) -> Result<()> {
        if self.magic != *MAGIC {
            return Err(Error::InvalidHeader("bad index log magic".to_string()));
        }
        if self.version != VERSION {
            return Err(Error::InvalidHeader(format!(
                "unsupported index log version: {}",
                self.version
            )));
        }
        if self.block_size != block_size {
            return Err(Error::InvalidHeader(format!(
                "index log block size {} does not match configured {}",
                self.block_size, block_size
            )));
        }
        Ok(())
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        (&mut buf[8..12]).write_u32::<BigEndian>(self.version).unwrap();
        (&mut buf[12..16]).write_u32::<BigEndian>(self.block_size).unwrap();
        buf
    }

    fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;
        let version = cursor.read_u32::<BigEndian>()?;
        let block_size = cursor.read_u32::<BigEndian>()?;

        Ok(Self {
            magic,
            version,
            block_size,
        })
    }
}

pub struct IndexLog {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
}

impl IndexLog {
    pub fn open(path: impl Into<PathBuf>, block_size: usize) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut writer = BufWriter::new(file.try_clone()?);

        if file.metadata()?.len() == 0 {
            let header = LogHeader::new(block_size as u32);
            file.write_all(&header.encode())?;
            file.sync_all()?;
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            file.read_exact(&mut buf)?;
            LogHeader::decode(&buf)?.validate(block_size as u32)?;
        }

        // Appends go to the end, past whatever batches are already there.
        writer.seek(SeekFrom::End(0))?;

        Ok(Self { file, writer, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one batch as a single checksummed record. Not durable until
    /// [`IndexLog::sync`].
    pub fn append_batch(&mut self, ops: &[IndexWriteOp]) -> Result<()> {
        let payload = encode_batch(ops);
        let checksum = CRC32.checksum(&payload);

        self.writer.write_u32::<BigEndian>(payload.len() as u32)?;
        self.writer.write_all(&payload)?;
        self.writer.write_u32::<BigEndian>(checksum)?;

        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read back every committed batch, oldest first.
    pub fn iter(&self) -> Result<IndexLogIterator> {
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(IndexLogIterator { reader })
    }
}

fn encode_batch(ops: &[IndexWriteOp]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(ops.len() as u32).unwrap();

    for op in ops {
        buf.write_u64::<BigEndian>(op.block_id).unwrap();

        match &op.token {
            TokenChange::Keep => buf.write_u8(TOKEN_KEEP).unwrap(),
            TokenChange::Clear => buf.write_u8(TOKEN_CLEAR).unwrap(),
            TokenChange::Set(token) => {
                buf.write_u8(TOKEN_SET).unwrap();
                buf.write_u64::<BigEndian>(token.offset()).unwrap();
                buf.write_u32::<BigEndian>(token.len()).unwrap();
            }
        }

        match op.recency {
            None => buf.write_u8(0x00).unwrap(),
            Some(recency) => {
                buf.write_u8(0x01).unwrap();
                buf.write_u64::<BigEndian>(recency.0).unwrap();
            }
        }
    }

    buf
}

fn decode_batch(payload: &[u8]) -> Result<Vec<IndexWriteOp>> {
    let mut reader = Cursor::new(payload);
    let count = reader.read_u32::<BigEndian>()? as usize;

    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let block_id = reader.read_u64::<BigEndian>()?;

        let token = match reader.read_u8()? {
            TOKEN_KEEP => TokenChange::Keep,
            TOKEN_CLEAR => TokenChange::Clear,
            TOKEN_SET => {
                let offset = reader.read_u64::<BigEndian>()?;
                let len = reader.read_u32::<BigEndian>()?;
                TokenChange::Set(BlockToken::durable(block_id, offset, len))
            }
            n => {
                return Err(Error::IndexCorruption(format!(
                    "unknown token change tag: {:#04x}",
                    n
                )))
            }
        };

        let recency = match reader.read_u8()? {
            0x00 => None,
            0x01 => Some(Recency(reader.read_u64::<BigEndian>()?)),
            n => {
                return Err(Error::IndexCorruption(format!(
                    "unknown recency tag: {:#04x}",
                    n
                )))
            }
        };

        ops.push(IndexWriteOp {
            block_id,
            token,
            recency,
        });
    }

    Ok(ops)
}

pub struct IndexLogIterator {
    reader: BufReader<File>,
}

impl Iterator for IndexLogIterator {
    type Item = Result<Vec<IndexWriteOp>>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = match self.reader.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            // Clean end of log.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        };

        let mut payload = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            // A record that breaks off mid-way was never committed.
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Some(Err(Error::IndexCorruption(
                    "truncated batch record".to_string(),
                )));
            }
            return Some(Err(e.into()));
        }

        let stored = match self.reader.read_u32::<BigEndian>() {
            Ok(checksum) => checksum,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Some(Err(Error::IndexCorruption(
                    "truncated batch record".to_string(),
                )))
            }
            Err(e) => return Some(Err(e.into())),
        };

        if CRC32.checksum(&payload) != stored {
            return Some(Err(Error::ChecksumMismatch));
        }

        Some(decode_batch(&payload))
    }
}
