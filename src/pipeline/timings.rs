use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Latency breakdown for the most recently completed frame
///
/// `native` is time inside the inference engine, `inference` the whole
/// adapter call, and `processing` runs from frame admission until the
/// overlay was published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameTimings {
    pub timestamp: u64,
    pub native: Duration,
    pub inference: Duration,
    pub processing: Duration,
    pub labels: Vec<String>,
}

impl FrameTimings {
    pub fn adapter_overhead(&self) -> Duration {
        self.inference.saturating_sub(self.native)
    }

    pub fn processing_overhead(&self) -> Duration {
        self.processing.saturating_sub(self.inference)
    }

    /// Text shown in the performance overlay
    pub fn overlay_lines(&self) -> Vec<String> {
        vec![
            format!("Native Inference Time: {}ms", self.native.as_millis()),
            format!("Adapter Overhead: {}ms", self.adapter_overhead().as_millis()),
            format!(
                "Pre/Post Processing Overhead: {}ms",
                self.processing_overhead().as_millis()
            ),
            format!("Labels: {}", self.labels.join(", ")),
        ]
    }
}

/// Frame counters, updated by the capture thread and the worker
#[derive(Debug, Default)]
pub struct PipelineCounters {
    captured: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub captured: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

impl PipelineCounters {
    pub fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_lines_break_down_latency() {
        let timings = FrameTimings {
            timestamp: 3,
            native: Duration::from_millis(40),
            inference: Duration::from_millis(52),
            processing: Duration::from_millis(61),
            labels: vec!["background".into(), "person".into()],
        };

        assert_eq!(
            timings.overlay_lines(),
            vec![
                "Native Inference Time: 40ms",
                "Adapter Overhead: 12ms",
                "Pre/Post Processing Overhead: 9ms",
                "Labels: background, person",
            ]
        );
    }

    #[test]
    fn overheads_never_go_negative() {
        let timings = FrameTimings {
            native: Duration::from_millis(10),
            inference: Duration::from_millis(8),
            processing: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(timings.adapter_overhead(), Duration::ZERO);
        assert_eq!(timings.processing_overhead(), Duration::ZERO);
    }
}
