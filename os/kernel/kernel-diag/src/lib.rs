//! # Kernel Diagnostics Output
//!
//! Everything the memory core prints goes through the `log` facade. This crate
//! provides the other end: a byte sink abstraction, a [`SinkLogger`] that
//! formats records into any sink, and the emulator debug port as the sink
//! used on real builds.
//!
//! ## Output Path
//!
//! ```text
//! log::info!(..) / diag_trace!(sink, ..)
//!     ↓
//! SinkLogger<S> / SinkWriter (fmt::Write)
//!     ↓
//! DiagnosticsSink::put_char
//!     ↓
//! DebugPortSink → I/O port 0xE9 (QEMU/Bochs `-debugcon`)
//! ```
//!
//! Output is fire and forget. A sink has no way to report failure and the
//! logger never retries, so diagnostics can not disturb the code that emits
//! them.
//!
//! ## Setup
//!
//! ```rust,no_run
//! # #[cfg(target_arch = "x86")] {
//! use kernel_diag::{DebugPortSink, SinkLogger};
//! use log::LevelFilter;
//!
//! static LOGGER: SinkLogger<DebugPortSink> =
//!     SinkLogger::new(DebugPortSink::QEMU, LevelFilter::Debug);
//!
//! LOGGER.install().ok();
//! log::info!("memory core online");
//! # }
//! ```
//!
//! ## Features
//!
//! `enabled` (default): the debug port is written. Without it
//! [`DebugPortSink`] drops every byte, which keeps release images quiet
//! without touching call sites.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;
mod sink;

pub use logger::SinkLogger;
#[cfg(target_arch = "x86")]
pub use sink::DebugPortSink;
pub use sink::{DiagnosticsSink, NullSink, SinkWriter};

#[doc(hidden)]
pub mod diag_fmt {
    use crate::{DiagnosticsSink, SinkWriter};
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn sink_write<S: DiagnosticsSink + ?Sized>(sink: &S, args: fmt::Arguments) {
        // Best-effort output; a sink can not fail.
        let _ = fmt::write(&mut SinkWriter::new(sink), args);
    }
}

/// Format straight into a [`DiagnosticsSink`], bypassing the logger.
#[macro_export]
macro_rules! diag_trace {
    ($sink:expr, $($arg:tt)*) => {{
        // No allocation: `format_args!` builds a lightweight `Arguments`.
        $crate::diag_fmt::sink_write($sink, core::format_args!($($arg)*));
    }};
}
