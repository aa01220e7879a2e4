//! Pull-based request bodies
//!
//! A [`BodySource`] is shared between every request that posts it (multiply
//! mode reuses one source); each request reads through its own
//! [`BodyReader`] cursor.

use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Result of a single pull from a body source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRead {
    /// Bytes read at the requested offset
    Data(Bytes),
    /// Nothing left to read
    Eof,
    /// Transient failure; the caller should try again later
    Retry,
}

/// Where request body bytes come from
#[derive(Debug)]
pub enum BodySource {
    /// A regular file read positionally
    File { file: Mutex<File>, len: u64 },
    /// Bytes held in memory (standard input is buffered fully)
    Memory(Bytes),
}

impl BodySource {
    /// Opens a file body; the length comes from the file metadata
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::File {
            file: Mutex::new(file),
            len,
        })
    }

    /// Reads `reader` to the end and keeps the bytes in memory
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Self::Memory(Bytes::from(buf)))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Memory(data.into())
    }

    /// Total body length in bytes
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(data) => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `max` bytes starting at `offset`
    pub fn read_at(&self, offset: u64, max: usize) -> io::Result<BodyRead> {
        let len = self.len();
        if offset >= len || max == 0 {
            return Ok(BodyRead::Eof);
        }
        let want = (len - offset).min(max as u64) as usize;

        match self {
            Self::Memory(data) => {
                let start = offset as usize;
                Ok(BodyRead::Data(data.slice(start..start + want)))
            }
            Self::File { file, .. } => {
                let mut file = file
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "body file lock poisoned"))?;
                let mut buf = vec![0u8; want];
                let read = file
                    .seek(SeekFrom::Start(offset))
                    .and_then(|_| file.read(&mut buf));
                match read {
                    Ok(0) => Ok(BodyRead::Eof),
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(BodyRead::Data(Bytes::from(buf)))
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                        ) =>
                    {
                        Ok(BodyRead::Retry)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

/// Per-request read cursor over a shared [`BodySource`]
#[derive(Debug, Clone)]
pub struct BodyReader {
    source: Arc<BodySource>,
    offset: u64,
}

impl BodyReader {
    pub fn new(source: Arc<BodySource>) -> Self {
        Self { source, offset: 0 }
    }

    /// Total body length
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.offset)
    }

    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }

    /// Pulls up to `max` bytes and advances the cursor past them
    pub fn read(&mut self, max: usize) -> io::Result<BodyRead> {
        let result = self.source.read_at(self.offset, max)?;
        if let BodyRead::Data(ref data) = result {
            self.offset += data.len() as u64;
        }
        Ok(result)
    }
}
