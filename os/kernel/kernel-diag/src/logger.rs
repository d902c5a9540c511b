use crate::DiagnosticsSink;
use crate::diag_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log::Log` backend that writes `"[LEVEL] target: message\n"` lines into a
/// [`DiagnosticsSink`].
pub struct SinkLogger<S> {
    sink: S,
    max_level: LevelFilter,
}

impl<S> SinkLogger<S> {
    #[must_use]
    pub const fn new(sink: S, max_level: LevelFilter) -> Self {
        Self { sink, max_level }
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S> SinkLogger<S>
where
    S: DiagnosticsSink + Send + Sync,
{
    /// Register as the global logger. Call once during early init.
    ///
    /// # Errors
    /// Fails if a logger has already been installed.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl<S> Log for SinkLogger<S>
where
    S: DiagnosticsSink + Send + Sync,
{
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        diag_trace!(
            &self.sink,
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
