//! Diagnostic mirror
//!
//! A line sink that is always available, independent of persistence. On the
//! board it is the serial console; on the host it is an in-memory buffer.

use alloc::string::String;
use alloc::vec::Vec;

/// Receiver of diagnostic lines
pub trait DiagnosticSink {
    fn emit(&mut self, line: &str);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &mut S {
    fn emit(&mut self, line: &str) {
        (**self).emit(line)
    }
}

/// Serial console mirror
#[cfg(feature = "device")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialMirror;

#[cfg(feature = "device")]
impl DiagnosticSink for SerialMirror {
    fn emit(&mut self, line: &str) {
        esp_println::println!("{}", line);
    }
}

/// Mirror that keeps every line in memory
#[derive(Debug, Default, Clone)]
pub struct BufferMirror {
    lines: Vec<String>,
}

impl BufferMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// True if any captured line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl DiagnosticSink for BufferMirror {
    fn emit(&mut self, line: &str) {
        self.lines.push(String::from(line));
    }
}
