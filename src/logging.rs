use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use std::io::Write as _;

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    /// Diagnostic detail, suppressed by default.
    Debug = 0,
    /// Normal operational messages. The default minimum severity.
    Info = 1,
    /// Something went wrong but the process can continue.
    Warning = 2,
    /// The process is in an unrecoverable state.
    Fatal = 3,
}

impl Severity {
    /// Upper-case name, used by the default stderr provider's record header.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Backend seam of the logging sidecar.
///
/// A provider receives every record that passes the minimum-severity gate,
/// along with the source location, and decides how to format and where to
/// write it. Install one with [`set_provider`]; until then a default
/// stderr-backed provider is used.
pub trait LogStreamProvider: Send + Sync {
    /// Write one log record.
    fn write_log(&self, severity: Severity, file: &str, line: u32, args: fmt::Arguments<'_>);
}

/// Default provider: one line per record on stderr.
#[derive(Debug, Default)]
pub struct StderrProvider;

impl LogStreamProvider for StderrProvider {
    fn write_log(&self, severity: Severity, file: &str, line: u32, args: fmt::Arguments<'_>) {
        let mut stderr = std::io::stderr().lock();
        // A failed write to stderr has nowhere to be reported.
        let _ = writeln!(stderr, "{} {file}:{line}] {args}", severity.name());
    }
}

type ProviderBox = Box<dyn LogStreamProvider>;

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);
static PROVIDER: AtomicPtr<ProviderBox> = AtomicPtr::new(ptr::null_mut());

/// Whether records of `severity` currently pass the minimum-severity gate.
#[inline]
#[must_use]
pub fn enabled(severity: Severity) -> bool {
    severity as u8 >= MIN_SEVERITY.load(Ordering::Relaxed)
}

/// Set the minimum severity below which records are dropped.
pub fn set_min_severity(severity: Severity) {
    MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
}

/// Install the process-wide provider.
///
/// Intended to be called once at program start, before any logging happens;
/// installation is not synchronized against concurrent [`provider`] users,
/// and a displaced provider is intentionally leaked because records may
/// still hold references into it.
pub fn set_provider(provider: Box<dyn LogStreamProvider>) {
    let fresh = Box::into_raw(Box::new(provider));
    PROVIDER.store(fresh, Ordering::Release);
}

/// The current provider, installing the default stderr provider on first use.
#[must_use]
pub fn provider() -> &'static dyn LogStreamProvider {
    let mut current = PROVIDER.load(Ordering::Acquire);
    if current.is_null() {
        let default: ProviderBox = Box::new(StderrProvider);
        let fallback = Box::into_raw(Box::new(default));
        match PROVIDER.compare_exchange(
            ptr::null_mut(),
            fallback,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => current = fallback,
            Err(installed) => {
                // Lost the race; another thread installed first.
                // SAFETY: `fallback` was just allocated above and never shared.
                drop(unsafe { Box::from_raw(fallback) });
                current = installed;
            }
        }
    }
    // SAFETY: a non-null `PROVIDER` always points at a leaked `ProviderBox`.
    unsafe { &**current }
}

/// Emit a log record through the installed [`LogStreamProvider`].
///
/// ```
/// anyflow::anyflow_log!(Info, "graph executed {} vertexes", 3);
/// ```
#[macro_export]
macro_rules! anyflow_log {
    ($severity:ident, $($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::Severity::$severity) {
            $crate::logging::provider().write_log(
                $crate::logging::Severity::$severity,
                file!(),
                line!(),
                format_args!($($arg)*),
            );
        }
    };
}
