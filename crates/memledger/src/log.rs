//! Per-operation log lines.
//!
//! With `verbose` on, every tracked allocate/resize/release emits one line,
//! either as text:
//!
//! ```text
//! malloc(20) -> 0x5581d2a0 in src/main.rs, line 12.
//! realloc(0x5581d2a0, 40) -> 0x5581d6c0 in src/main.rs, line 13.
//! free(0x5581d6c0) in src/main.rs, line 14.
//! ```
//!
//! or as one JSON object per line. Lines are written after the registry lock
//! has been released and are flushed immediately.

use std::fmt;
use std::io::{self, Write};

use memledger_registry::{AllocationSite, serde_address};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::LogFormat;

/// The tracked operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Allocate,
    AllocateZeroed,
    Resize,
    Release,
}

impl Op {
    /// Name of the C library routine this operation stands in for.
    #[must_use]
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Allocate => "malloc",
            Self::AllocateZeroed => "calloc",
            Self::Resize => "realloc",
            Self::Release => "free",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// One completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpEvent {
    pub op: Op,
    /// Pointer passed in (resize/release).
    #[serde(serialize_with = "serde_address::serialize_option")]
    pub input: Option<usize>,
    /// Bytes requested (allocate/resize).
    pub size: Option<usize>,
    /// Pointer handed back (allocate/resize).
    #[serde(serialize_with = "serde_address::serialize_option")]
    pub result: Option<usize>,
    pub site: AllocationSite,
}

impl OpEvent {
    #[must_use]
    pub const fn allocated(op: Op, size: usize, result: usize, site: AllocationSite) -> Self {
        Self {
            op,
            input: None,
            size: Some(size),
            result: Some(result),
            site,
        }
    }

    #[must_use]
    pub const fn resized(input: usize, size: usize, result: usize, site: AllocationSite) -> Self {
        Self {
            op: Op::Resize,
            input: Some(input),
            size: Some(size),
            result: Some(result),
            site,
        }
    }

    #[must_use]
    pub const fn released(input: usize, site: AllocationSite) -> Self {
        Self {
            op: Op::Release,
            input: Some(input),
            size: None,
            result: None,
            site,
        }
    }
}

impl fmt::Display for OpEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let input = self.input.unwrap_or(0);
        let size = self.size.unwrap_or(0);
        let result = self.result.unwrap_or(0);
        match self.op {
            Op::Allocate | Op::AllocateZeroed => write!(f, "{}({size}) -> {result:#x}", self.op)?,
            Op::Resize => write!(f, "{}({input:#x}, {size}) -> {result:#x}", self.op)?,
            Op::Release => write!(f, "{}({input:#x})", self.op)?,
        }
        write!(f, " in {}, line {}.", self.site.file, self.site.line)
    }
}

/// Destination for operation log lines.
pub struct OpLog {
    format: LogFormat,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl OpLog {
    /// Log to standard output.
    #[must_use]
    pub fn stdout(format: LogFormat) -> Self {
        Self::to_writer(format, io::stdout())
    }

    /// Log to any writer (tests capture into a buffer).
    #[must_use]
    pub fn to_writer(format: LogFormat, writer: impl Write + Send + 'static) -> Self {
        Self {
            format,
            sink: Mutex::new(Box::new(writer)),
        }
    }

    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Write one event and flush. Diagnostic output is best effort: write
    /// errors are dropped.
    pub fn emit(&self, event: &OpEvent) {
        let mut sink = self.sink.lock();
        let _ = write_event(&mut **sink, self.format, event);
    }
}

impl fmt::Debug for OpLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpLog")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn write_event(out: &mut dyn Write, format: LogFormat, event: &OpEvent) -> io::Result<()> {
    match format {
        LogFormat::Text => writeln!(out, "{event}")?,
        LogFormat::Json => {
            serde_json::to_writer(&mut *out, event)?;
            writeln!(out)?;
        }
    }
    out.flush()
}
