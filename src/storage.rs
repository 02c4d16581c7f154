//! Storage medium abstraction
//!
//! Named byte streams on a capacity-limited medium. Handles are plain tokens and
//! every stream operation goes through the medium, the same shape as the raw
//! `embedded-sdmmc` volume API.

use crate::NodeError;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

/// How a stream is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create if missing, writes go to the end
    Append,
    /// Existing stream, read from the start
    Read,
    /// Create if missing, discard previous content
    Write,
    /// Existing stream only, discard previous content
    Truncate,
}

/// Finite storage holding named byte streams
pub trait StorageMedium {
    type Handle: Copy;

    /// Create a directory, succeeding if it already exists
    fn create_dir(&mut self, _name: &str) -> Result<(), NodeError> {
        Ok(())
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<Self::Handle, NodeError>;

    fn exists(&mut self, name: &str) -> bool;

    /// Delete a stream, returning false if it did not exist or could not be removed
    fn remove(&mut self, name: &str) -> bool;

    /// Read into `buf`, returning 0 at end of stream
    fn read(&mut self, handle: Self::Handle, buf: &mut [u8]) -> Result<usize, NodeError>;

    /// Write all of `data` at the stream position
    fn write(&mut self, handle: Self::Handle, data: &[u8]) -> Result<(), NodeError>;

    fn size(&mut self, handle: Self::Handle) -> Result<u32, NodeError>;

    fn close(&mut self, handle: Self::Handle) -> Result<(), NodeError>;
}

/// Outcome of a single `LineReader::read_line` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// A newline-terminated line was read
    Complete,
    /// The stream ended in the middle of a line
    Partial,
    /// Nothing left to read
    End,
}

const LINE_CHUNK: usize = 128;

/// Splits an open stream into lines without loading it whole
pub struct LineReader<'m, M: StorageMedium> {
    medium: &'m mut M,
    handle: M::Handle,
    chunk: [u8; LINE_CHUNK],
    start: usize,
    end: usize,
}

impl<'m, M: StorageMedium> LineReader<'m, M> {
    pub fn new(medium: &'m mut M, handle: M::Handle) -> Self {
        Self {
            medium,
            handle,
            chunk: [0; LINE_CHUNK],
            start: 0,
            end: 0,
        }
    }

    /// Read the next line into `line` (cleared first), without the trailing `\n`
    pub fn read_line(&mut self, line: &mut Vec<u8>) -> Result<LineRead, NodeError> {
        line.clear();
        loop {
            if self.start == self.end {
                self.end = self.medium.read(self.handle, &mut self.chunk)?;
                self.start = 0;
                if self.end == 0 {
                    return Ok(if line.is_empty() {
                        LineRead::End
                    } else {
                        LineRead::Partial
                    });
                }
            }

            let pending = &self.chunk[self.start..self.end];
            match pending.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    line.extend_from_slice(&pending[..newline]);
                    self.start += newline + 1;
                    return Ok(LineRead::Complete);
                }
                None => {
                    line.extend_from_slice(pending);
                    self.start = self.end;
                }
            }
        }
    }
}

/// Open stream slot of a `MemoryMedium`
#[derive(Debug, Clone)]
struct OpenStream {
    name: String,
    mode: OpenMode,
    position: usize,
}

/// Handle into a `MemoryMedium`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHandle(usize);

/// RAM-backed medium with a fixed total capacity shared by all streams
#[derive(Debug, Clone)]
pub struct MemoryMedium {
    capacity: usize,
    streams: BTreeMap<String, Vec<u8>>,
    dirs: Vec<String>,
    open: Vec<Option<OpenStream>>,
    failing_opens: u32,
}

impl MemoryMedium {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            streams: BTreeMap::new(),
            dirs: Vec::new(),
            open: Vec::new(),
            failing_opens: 0,
        }
    }

    /// Bytes held by all streams
    pub fn used(&self) -> usize {
        self.streams.values().map(Vec::len).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw content of a stream
    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.streams.get(name).map(Vec::as_slice)
    }

    pub fn has_dir(&self, name: &str) -> bool {
        self.dirs.iter().any(|d| d == name)
    }

    /// Make the next `count` opens fail, for bench fault injection
    pub fn fail_next_opens(&mut self, count: u32) {
        self.failing_opens = count;
    }

    /// Streams currently open
    pub fn open_streams(&self) -> usize {
        self.open.iter().filter(|slot| slot.is_some()).count()
    }

    fn slot(&self, handle: MemoryHandle) -> Result<&OpenStream, NodeError> {
        self.open
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(NodeError::StreamOpenFailure)
    }
}

impl StorageMedium for MemoryMedium {
    type Handle = MemoryHandle;

    fn create_dir(&mut self, name: &str) -> Result<(), NodeError> {
        if !self.has_dir(name) {
            self.dirs.push(String::from(name));
        }
        Ok(())
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<MemoryHandle, NodeError> {
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(NodeError::StreamOpenFailure);
        }

        let exists = self.streams.contains_key(name);
        match mode {
            OpenMode::Read | OpenMode::Truncate if !exists => {
                return Err(NodeError::StreamOpenFailure);
            }
            OpenMode::Append if !exists => {
                self.streams.insert(String::from(name), Vec::new());
            }
            OpenMode::Write | OpenMode::Truncate => {
                self.streams.insert(String::from(name), Vec::new());
            }
            _ => {}
        }

        let position = match mode {
            OpenMode::Append => self.streams.get(name).map_or(0, Vec::len),
            _ => 0,
        };
        let stream = OpenStream {
            name: String::from(name),
            mode,
            position,
        };

        let index = match self.open.iter().position(Option::is_none) {
            Some(free) => {
                self.open[free] = Some(stream);
                free
            }
            None => {
                self.open.push(Some(stream));
                self.open.len() - 1
            }
        };
        Ok(MemoryHandle(index))
    }

    fn exists(&mut self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    fn remove(&mut self, name: &str) -> bool {
        self.streams.remove(name).is_some()
    }

    fn read(&mut self, handle: MemoryHandle, buf: &mut [u8]) -> Result<usize, NodeError> {
        let stream = self.slot(handle)?;
        if stream.mode != OpenMode::Read {
            return Err(NodeError::StreamWriteFailure);
        }
        let data = self
            .streams
            .get(&stream.name)
            .ok_or(NodeError::StreamOpenFailure)?;
        let available = data.len().saturating_sub(stream.position);
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&data[stream.position..stream.position + count]);

        if let Some(Some(stream)) = self.open.get_mut(handle.0) {
            stream.position += count;
        }
        Ok(count)
    }

    fn write(&mut self, handle: MemoryHandle, data: &[u8]) -> Result<(), NodeError> {
        let stream = self.slot(handle)?.clone();
        if stream.mode == OpenMode::Read {
            return Err(NodeError::StreamWriteFailure);
        }
        let current = self.streams.get(&stream.name).map_or(0, Vec::len);
        let overwritten = current.saturating_sub(stream.position);
        if self.used() - overwritten + data.len() > self.capacity {
            return Err(NodeError::OutOfSpace);
        }

        let content = self
            .streams
            .get_mut(&stream.name)
            .ok_or(NodeError::StreamOpenFailure)?;
        content.truncate(stream.position);
        content.extend_from_slice(data);

        if let Some(Some(open)) = self.open.get_mut(handle.0) {
            open.position += data.len();
        }
        Ok(())
    }

    fn size(&mut self, handle: MemoryHandle) -> Result<u32, NodeError> {
        let stream = self.slot(handle)?;
        self.streams
            .get(&stream.name)
            .map(|data| data.len() as u32)
            .ok_or(NodeError::StreamOpenFailure)
    }

    fn close(&mut self, handle: MemoryHandle) -> Result<(), NodeError> {
        match self.open.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(NodeError::StreamOpenFailure),
        }
    }
}
