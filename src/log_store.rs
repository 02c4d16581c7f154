//! Rotating log store
//!
//! Four fixed channels, each backed by one stream under `LOGS/`. Every entry is
//! mirrored to the diagnostic sink; persistence is best effort and a missing or
//! full medium never stops the caller.
//!
//! Rotation runs before each write. With `K` retained lines, a channel whose
//! size plus the pending entry exceeds its cap is rewritten to its newest
//! `K - 1` complete lines, so after the append it holds at most `K` lines.
//! Channels with `K` lines or fewer are never rewritten, whatever their size.
//! After any append returns: `size <= cap` or `lines <= K`.

use crate::clock::{Clock, Uptime};
use crate::config;
use crate::diagnostic::DiagnosticSink;
use crate::storage::{LineRead, LineReader, OpenMode, StorageMedium};
use crate::NodeError;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

/// Log categories. The set is closed: a stream can only be named through one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Debug,
    Sensor,
    Event,
    System,
}

impl LogKind {
    pub const ALL: [LogKind; 4] = [LogKind::Debug, LogKind::Sensor, LogKind::Event, LogKind::System];

    /// Stream name inside the log directory (8.3 so it maps onto FAT)
    pub fn file_name(self) -> &'static str {
        match self {
            LogKind::Debug => "DEBUG.LOG",
            LogKind::Sensor => "SENSOR.LOG",
            LogKind::Event => "EVENTS.LOG",
            LogKind::System => "SYSTEM.LOG",
        }
    }

    /// Short tag used by collaborators (web layer, console)
    pub fn tag(self) -> &'static str {
        match self {
            LogKind::Debug => "debug",
            LogKind::Sensor => "sensor",
            LogKind::Event => "event",
            LogKind::System => "system",
        }
    }

    /// Parse a tag, rejecting anything outside the fixed set
    pub fn from_tag(tag: &str) -> Option<Self> {
        LogKind::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Anything that accepts categorized log text
pub trait LogSink {
    fn log(&mut self, kind: LogKind, text: &str);

    /// Record one telemetry sample on the sensor channel
    fn telemetry(&mut self, lux: f32, relay_on: bool) {
        self.log(LogKind::Sensor, &telemetry_text(lux, relay_on));
    }
}

fn telemetry_text(lux: f32, relay_on: bool) -> String {
    format!("LUX:{:.2} RELAY:{}", lux, if relay_on { "ON" } else { "OFF" })
}

/// A channel that has been written in this process
#[derive(Debug, Clone)]
pub struct LogChannel {
    kind: LogKind,
    path: heapless::String<24>,
    size: u32,
    // stream known to end on a line boundary at `size` bytes
    verified: bool,
}

impl LogChannel {
    fn new(kind: LogKind) -> Self {
        Self {
            kind,
            path: stream_path(kind),
            size: 0,
            verified: false,
        }
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// Size observed after the last write, rotation or clear
    pub fn size(&self) -> u32 {
        self.size
    }
}

fn stream_path(kind: LogKind) -> heapless::String<24> {
    let mut path = heapless::String::new();
    write!(path, "{}/{}", config::LOG_DIR, kind.file_name()).ok();
    path
}

/// Log store settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogStoreConfig {
    /// Shared cap in bytes for channels without an override
    pub max_size: u32,
    /// Maximum lines a rotated channel holds
    pub retain_lines: usize,
    /// Persist the debug channel (it is mirrored either way)
    pub debug_enabled: bool,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            max_size: config::log_max_size(),
            retain_lines: config::LOG_RETAIN_LINES,
            debug_enabled: true,
        }
    }
}

/// Result of a rotation check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Stream left untouched
    Skipped,
    /// Stream rewritten to its newest lines
    Rotated { before: u32, after: u32, kept: usize },
}

/// Categorized, size-bounded log store
pub struct LogStore<M: StorageMedium, C: Clock, D: DiagnosticSink> {
    medium: Option<M>,
    clock: C,
    mirror: D,
    config: LogStoreConfig,
    overrides: [Option<u32>; 4],
    channels: [Option<LogChannel>; 4],
}

impl<M: StorageMedium, C: Clock, D: DiagnosticSink> LogStore<M, C, D> {
    /// Create a store. `None` for the medium runs in mirror-only mode.
    pub fn new(medium: Option<M>, clock: C, mirror: D, config: LogStoreConfig) -> Self {
        Self {
            medium,
            clock,
            mirror,
            config,
            overrides: [None; 4],
            channels: [None, None, None, None],
        }
    }

    /// Prepare the log directory and write the boot entries
    pub fn begin(&mut self) {
        match self.medium.as_mut() {
            Some(medium) => {
                if let Err(e) = medium.create_dir(config::LOG_DIR) {
                    self.mirror
                        .emit(&format!("[LOG] Failed to create {}: {}", config::LOG_DIR, e));
                }
                self.append(LogKind::System, "Log store initialized");
                self.append(LogKind::Debug, "Storage ready");
            }
            None => {
                self.mirror.emit(&format!(
                    "[LOG] {}, logging to serial only",
                    NodeError::MediumUnavailable
                ));
            }
        }
    }

    /// True when entries reach the medium
    pub fn is_persistent(&self) -> bool {
        self.medium.is_some()
    }

    /// Append a timestamped entry to a channel
    pub fn append(&mut self, kind: LogKind, text: &str) {
        let entry = self.format_entry(text);
        self.mirror.emit(&entry);

        if kind == LogKind::Debug && !self.config.debug_enabled {
            return;
        }
        self.persist(kind, &entry);
    }

    /// Append a sensor telemetry line
    pub fn append_telemetry(&mut self, lux: f32, relay_on: bool) {
        let text = telemetry_text(lux, relay_on);
        self.append(LogKind::Sensor, &text);

        if self.config.debug_enabled {
            self.append(LogKind::Debug, &format!("Telemetry {}", text));
        }
    }

    /// Newest `max_lines` complete lines, oldest first, one per line
    pub fn read(&mut self, kind: LogKind, max_lines: usize) -> Result<String, NodeError> {
        let lines = self.read_lines(kind, max_lines)?;
        let mut text = String::new();
        for line in lines {
            text.push_str(&line);
            text.push('\n');
        }
        Ok(text)
    }

    /// Same as `read`, split into lines
    pub fn read_lines(&mut self, kind: LogKind, max_lines: usize) -> Result<Vec<String>, NodeError> {
        let medium = self.medium.as_mut().ok_or(NodeError::MediumUnavailable)?;
        let path = stream_path(kind);
        if !medium.exists(&path) {
            return Err(NodeError::StreamOpenFailure);
        }

        let tail = read_tail(medium, &path, max_lines)?;
        Ok(tail
            .lines
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect())
    }

    /// Delete a channel's stream
    pub fn clear(&mut self, kind: LogKind) {
        let Some(medium) = self.medium.as_mut() else {
            return;
        };
        let path = stream_path(kind);
        medium.remove(&path);
        if let Some(channel) = self.channels[kind.index()].as_mut() {
            channel.size = 0;
        }

        let note = format!("Cleared log: {}", kind.file_name());
        if kind == LogKind::Event {
            // writing the note here would recreate the stream just removed
            let entry = self.format_entry(&note);
            self.mirror.emit(&entry);
        } else {
            self.append(LogKind::Event, &note);
        }
    }

    /// Current stream size in bytes, 0 if absent or unreadable
    pub fn size(&mut self, kind: LogKind) -> u32 {
        match self.medium.as_mut() {
            Some(medium) => stream_size(medium, &stream_path(kind)).unwrap_or(0),
            None => 0,
        }
    }

    /// Update the shared cap used by channels without an override
    pub fn set_capacity(&mut self, bytes: u32) {
        self.config.max_size = bytes;
        self.append(
            LogKind::System,
            &format!("Max log size set to {} bytes", bytes),
        );
    }

    /// Give one channel its own cap, or `None` to follow the shared one
    pub fn set_channel_capacity(&mut self, kind: LogKind, bytes: Option<u32>) {
        self.overrides[kind.index()] = bytes;
    }

    /// Effective cap for a channel
    pub fn capacity(&self, kind: LogKind) -> u32 {
        self.overrides[kind.index()].unwrap_or(self.config.max_size)
    }

    pub fn enable_debug(&mut self, enable: bool) {
        self.config.debug_enabled = enable;
        self.append(
            LogKind::Event,
            if enable {
                "Debug logging enabled"
            } else {
                "Debug logging disabled"
            },
        );
    }

    pub fn debug_enabled(&self) -> bool {
        self.config.debug_enabled
    }

    pub fn config(&self) -> &LogStoreConfig {
        &self.config
    }

    /// Rotate a channel outside of an append. Idempotent.
    pub fn rotate(&mut self, kind: LogKind) -> Result<Rotation, NodeError> {
        let max_size = self.capacity(kind);
        let retain = self.config.retain_lines;
        let medium = self.medium.as_mut().ok_or(NodeError::MediumUnavailable)?;
        let rotation = rotate_stream(medium, &stream_path(kind), max_size, retain, 0, 0)?;

        if let Rotation::Rotated { before, after, kept } = rotation {
            if let Some(channel) = self.channels[kind.index()].as_mut() {
                channel.size = after;
            }
            self.mirror.emit(&format!(
                "[LOG] Rotated {}: {} -> {} bytes, {} lines kept",
                kind.file_name(),
                before,
                after,
                kept
            ));
        }
        Ok(rotation)
    }

    /// Channel state, if it has been written in this process
    pub fn channel(&self, kind: LogKind) -> Option<&LogChannel> {
        self.channels[kind.index()].as_ref()
    }

    pub fn medium(&self) -> Option<&M> {
        self.medium.as_ref()
    }

    pub fn medium_mut(&mut self) -> Option<&mut M> {
        self.medium.as_mut()
    }

    pub fn mirror(&self) -> &D {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut D {
        &mut self.mirror
    }

    fn format_entry(&self, text: &str) -> String {
        let mut entry = format!("[{}] ", Uptime::from_millis(self.clock.now_ms()));
        entry.extend(text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }));
        entry
    }

    fn persist(&mut self, kind: LogKind, entry: &str) {
        let max_size = self.capacity(kind);
        let retain = self.config.retain_lines;
        let Some(medium) = self.medium.as_mut() else {
            return;
        };
        let channel = self.channels[kind.index()].get_or_insert_with(|| LogChannel::new(kind));

        let mut line = Vec::with_capacity(entry.len() + 1);
        line.extend_from_slice(entry.as_bytes());
        line.push(b'\n');

        let current = stream_size(medium, channel.path()).ok();
        if !channel.verified || current != Some(channel.size) {
            match drop_torn_tail(medium, channel.path()) {
                Ok(Some(size)) => {
                    channel.size = size;
                    self.mirror.emit(&format!(
                        "[LOG] Dropped interrupted line in {}",
                        kind.file_name()
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    self.mirror
                        .emit(&format!("[LOG] Check of {} failed: {}", channel.path(), e));
                }
            }
        }

        match rotate_stream(medium, channel.path(), max_size, retain, line.len() as u32, 1) {
            Ok(Rotation::Rotated { before, after, kept }) => {
                channel.size = after;
                self.mirror.emit(&format!(
                    "[LOG] Rotated {}: {} -> {} bytes, {} lines kept",
                    kind.file_name(),
                    before,
                    after,
                    kept
                ));
            }
            Ok(Rotation::Skipped) => {}
            Err(e) => {
                self.mirror
                    .emit(&format!("[LOG] Rotation of {} failed: {}", channel.path(), e));
            }
        }

        match append_stream(medium, channel.path(), &line) {
            Ok(size) => {
                channel.size = size;
                channel.verified = true;
            }
            Err(e) => {
                channel.verified = false;
                self.mirror
                    .emit(&format!("[LOG] Write to {} failed: {}", channel.path(), e));
            }
        }
    }
}

impl<M: StorageMedium, C: Clock, D: DiagnosticSink> LogSink for LogStore<M, C, D> {
    fn log(&mut self, kind: LogKind, text: &str) {
        self.append(kind, text);
    }

    fn telemetry(&mut self, lux: f32, relay_on: bool) {
        self.append_telemetry(lux, relay_on);
    }
}

/// Newest complete lines of a stream plus the total complete-line count
struct Tail {
    total: usize,
    lines: VecDeque<Vec<u8>>,
    /// The stream ends in a line without `\n`
    torn: bool,
}

fn read_tail<M: StorageMedium>(medium: &mut M, path: &str, keep: usize) -> Result<Tail, NodeError> {
    let handle = medium.open(path, OpenMode::Read)?;
    let tail = collect_tail(medium, handle, keep);
    let closed = medium.close(handle);
    let tail = tail?;
    closed?;
    Ok(tail)
}

fn collect_tail<M: StorageMedium>(
    medium: &mut M,
    handle: M::Handle,
    keep: usize,
) -> Result<Tail, NodeError> {
    let mut reader = LineReader::new(medium, handle);
    let mut lines: VecDeque<Vec<u8>> = VecDeque::new();
    let mut total = 0;
    let mut line = Vec::new();

    // a trailing line without '\n' is an interrupted write and is not kept
    let torn = loop {
        match reader.read_line(&mut line)? {
            LineRead::Complete => {}
            LineRead::Partial => break true,
            LineRead::End => break false,
        }
        total += 1;
        if keep == 0 {
            continue;
        }
        if lines.len() == keep {
            lines.pop_front();
        }
        lines.push_back(core::mem::take(&mut line));
    };

    Ok(Tail { total, lines, torn })
}

fn stream_size<M: StorageMedium>(medium: &mut M, path: &str) -> Result<u32, NodeError> {
    if !medium.exists(path) {
        return Ok(0);
    }
    let handle = medium.open(path, OpenMode::Read)?;
    let size = medium.size(handle);
    let closed = medium.close(handle);
    let size = size?;
    closed?;
    Ok(size)
}

/// Append bytes and return the new stream size
fn append_stream<M: StorageMedium>(medium: &mut M, path: &str, data: &[u8]) -> Result<u32, NodeError> {
    let handle = medium.open(path, OpenMode::Append)?;
    let written = medium.write(handle, data).and_then(|_| medium.size(handle));
    let closed = medium.close(handle);
    let size = written?;
    closed?;
    Ok(size)
}

/// Rewrite `path` to its newest lines if it is over `max_size` once `pending_bytes`
/// land, keeping room for `pending_lines` within `retain`.
fn rotate_stream<M: StorageMedium>(
    medium: &mut M,
    path: &str,
    max_size: u32,
    retain: usize,
    pending_bytes: u32,
    pending_lines: usize,
) -> Result<Rotation, NodeError> {
    if !medium.exists(path) {
        return Ok(Rotation::Skipped);
    }

    let before = stream_size(medium, path)?;
    if before.saturating_add(pending_bytes) <= max_size {
        return Ok(Rotation::Skipped);
    }

    let keep = retain.saturating_sub(pending_lines);
    let tail = read_tail(medium, path, keep)?;
    if tail.total + pending_lines <= retain {
        return Ok(Rotation::Skipped);
    }

    let after = rewrite_lines(medium, path, &tail.lines)?;
    Ok(Rotation::Rotated {
        before,
        after,
        kept: tail.lines.len(),
    })
}

/// If `path` ends in an unterminated line, rewrite it with only its complete
/// lines. Returns the new size when something was dropped.
fn drop_torn_tail<M: StorageMedium>(medium: &mut M, path: &str) -> Result<Option<u32>, NodeError> {
    if !medium.exists(path) || !read_tail(medium, path, 0)?.torn {
        return Ok(None);
    }
    let tail = read_tail(medium, path, usize::MAX)?;
    rewrite_lines(medium, path, &tail.lines).map(Some)
}

/// Replace the stream content with `lines`, each terminated by `\n`
fn rewrite_lines<M: StorageMedium>(
    medium: &mut M,
    path: &str,
    lines: &VecDeque<Vec<u8>>,
) -> Result<u32, NodeError> {
    let mut content = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        content.extend_from_slice(line);
        content.push(b'\n');
    }

    let handle = medium.open(path, OpenMode::Write)?;
    let written = medium.write(handle, &content);
    let closed = medium.close(handle);
    written?;
    closed?;
    Ok(content.len() as u32)
}
