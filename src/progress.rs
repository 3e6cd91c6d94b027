//! Progress reporting for long upgrade loops

use tracing::{debug, info};

/// Counts processed items against an expected total
///
/// Every increment is logged at debug level; info level is used each time
/// another tenth of the work is done, so large namespaces do not flood the log.
#[derive(Debug)]
pub struct ProgressMonitor {
    description: String,
    current: usize,
    target: usize,
    last_logged_decile: usize,
}

impl ProgressMonitor {
    pub fn new(description: impl Into<String>, current: usize, target: usize) -> Self {
        let monitor = Self {
            description: description.into(),
            current,
            target,
            last_logged_decile: 0,
        };
        info!(
            "{}: starting, {}/{} done",
            monitor.description, monitor.current, monitor.target
        );
        monitor
    }

    /// Record one more unit of work and return the new count
    pub fn inc(&mut self) -> usize {
        self.current += 1;
        debug!(
            "{}: progress {}/{}",
            self.description, self.current, self.target
        );

        let decile = self.decile();
        if decile > self.last_logged_decile {
            self.last_logged_decile = decile;
            info!(
                "{}: current progress {:.2}% ({}/{})",
                self.description,
                self.percent(),
                self.current,
                self.target
            );
        }
        self.current
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.target
    }

    fn percent(&self) -> f64 {
        if self.target == 0 {
            return 100.0;
        }
        self.current as f64 * 100.0 / self.target as f64
    }

    fn decile(&self) -> usize {
        if self.target == 0 {
            return 10;
        }
        (self.current * 10 / self.target).min(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_to_target() {
        let mut monitor = ProgressMonitor::new("test", 0, 3);
        assert!(!monitor.is_complete());
        assert_eq!(monitor.inc(), 1);
        assert_eq!(monitor.inc(), 2);
        assert_eq!(monitor.inc(), 3);
        assert!(monitor.is_complete());
        assert_eq!(monitor.target(), 3);
    }

    #[test]
    fn test_empty_target_is_complete() {
        let monitor = ProgressMonitor::new("empty", 0, 0);
        assert!(monitor.is_complete());
        assert_eq!(monitor.current(), 0);
    }

    #[test]
    fn test_decile_logging_is_monotonic() {
        let mut monitor = ProgressMonitor::new("deciles", 0, 25);
        let mut seen = Vec::new();
        for _ in 0..25 {
            monitor.inc();
            seen.push(monitor.last_logged_decile);
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(monitor.last_logged_decile, 10);
    }
}
