//! Progress reporting for long-running engine operations

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// 0-100, never decreasing for one operation
    pub percent: u8,
    pub stage: String,
}

type ProgressCallback = dyn Fn(Progress) + Send + Sync;

/// Cloneable sink for progress updates that drops any report lower than one already sent
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<Arc<ProgressCallback>>,
    highest: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            highest: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Reporter that discards everything
    pub fn noop() -> Self {
        Self {
            callback: None,
            highest: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn report(&self, percent: u8, stage: &str) {
        let percent = percent.min(100);
        let previous = self.highest.fetch_max(percent, Ordering::SeqCst);
        if percent < previous {
            debug!("Dropping out-of-order progress {}% ({})", percent, stage);
            return;
        }
        if let Some(callback) = &self.callback {
            callback(Progress {
                percent,
                stage: stage.to_string(),
            });
        }
    }

    pub fn percent(&self) -> u8 {
        self.highest.load(Ordering::SeqCst)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("percent", &self.percent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_never_decreases() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(move |p| sink.lock().unwrap().push(p.percent));

        reporter.report(10, "validating");
        reporter.report(40, "signing");
        reporter.report(25, "late update");
        reporter.clone().report(60, "submitted");
        reporter.report(150, "done");

        assert_eq!(*seen.lock().unwrap(), vec![10, 40, 60, 100]);
        assert_eq!(reporter.percent(), 100);
    }
}
