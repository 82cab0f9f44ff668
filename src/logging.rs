//! A per-solve log handle: a value owned by the solve invocation and threaded
//! through the call tree, rather than a module-level mutable buffer.

use std::sync::Arc;

/// Bracketed tags used throughout the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Init,
    EssentialMatrix,
    Ransac,
    VpPlusEm,
    Align,
    Tri,
    Step,
    Candidate,
}

impl LogTag {
    fn label(self) -> &'static str {
        match self {
            LogTag::Init => "Init",
            LogTag::EssentialMatrix => "Essential Matrix",
            LogTag::Ransac => "RANSAC",
            LogTag::VpPlusEm => "VP+EM",
            LogTag::Align => "Align",
            LogTag::Tri => "Tri",
            LogTag::Step => "Step",
            LogTag::Candidate => "Candidate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
}

/// Owned per-solve log state: a buffer (for [`crate::SolverResult::log`]) and
/// an optional subscriber callback. Cleared at the start of every top-level
/// solve.
#[derive(Clone, Default)]
pub struct Logger {
    lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    subscriber: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriber(subscriber: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        Self {
            lines: Default::default(),
            subscriber: Some(subscriber),
        }
    }

    pub fn emit(&self, level: Level, tag: LogTag, msg: std::fmt::Arguments<'_>) {
        let line = format!("[{}] {}", tag.label(), msg);
        match level {
            Level::Debug => tracing::debug!("{line}"),
            Level::Info => tracing::info!("{line}"),
            Level::Warn => tracing::warn!("{line}"),
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
        if let Some(sub) = &self.subscriber {
            sub(&line);
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Whether `VP_DEBUG=1` is set in the environment.
    pub fn vp_debug_enabled(&self) -> bool {
        std::env::var_os("VP_DEBUG").map(|v| v == "1").unwrap_or(false)
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.emit($crate::logging::Level::Debug, $tag, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.emit($crate::logging::Level::Info, $tag, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.emit($crate::logging::Level::Warn, $tag, format_args!($($arg)*))
    };
}

