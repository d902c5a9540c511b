use core::fmt::{self, Write};

/// Byte-oriented diagnostics output.
pub trait DiagnosticsSink {
    /// Emit one byte. Never fails, never blocks for long.
    fn put_char(&self, byte: u8);

    fn write_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.put_char(b);
        }
    }
}

impl<S: DiagnosticsSink + ?Sized> DiagnosticsSink for &S {
    fn put_char(&self, byte: u8) {
        (**self).put_char(byte);
    }
}

/// Discards everything.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    #[inline]
    fn put_char(&self, _byte: u8) {}
}

/// `core::fmt::Write` adapter over a sink.
pub struct SinkWriter<'a, S: DiagnosticsSink + ?Sized> {
    sink: &'a S,
}

impl<'a, S: DiagnosticsSink + ?Sized> SinkWriter<'a, S> {
    pub const fn new(sink: &'a S) -> Self {
        Self { sink }
    }
}

impl<S: DiagnosticsSink + ?Sized> Write for SinkWriter<'_, S> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sink.write_bytes(s.as_bytes());
        Ok(())
    }
}

/// The emulator debug console: every byte written to the port shows up on
/// the host (`qemu-system-i386 -debugcon stdio`).
#[cfg(target_arch = "x86")]
#[derive(Debug, Copy, Clone)]
pub struct DebugPortSink {
    port: u16,
}

#[cfg(target_arch = "x86")]
impl DebugPortSink {
    /// Default `isa-debugcon` port of QEMU and Bochs.
    pub const QEMU: Self = Self::new(0xE9);

    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self { port }
    }
}

#[cfg(target_arch = "x86")]
impl DiagnosticsSink for DebugPortSink {
    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn put_char(&self, byte: u8) {
        #[cfg(feature = "enabled")]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") self.port,
                in("al") byte,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(feature = "enabled"))]
        let _ = (self.port, byte);
    }
}
