use std::time::{Duration, Instant};

/// What the decode loop should do on its next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// Jump the decoder to `sample_index` before decoding.
    Seek { target_ms: i64, sample_index: u64 },
    /// Decode the next frame sequentially.
    Decode,
    /// Too soon since the last pass; idle briefly.
    Wait,
}

/// Decides between reseeking and decoding forward.
///
/// The decoder is only moved when the requested position drifts from the
/// last reseek point by more than the tolerance, or before the first frame.
#[derive(Debug, Clone)]
pub struct SeekReconciler {
    sample_rate: u32,
    tolerance_ms: i64,
    min_interval: Duration,
    last_seek_ms: Option<i64>,
    last_process: Option<Instant>,
}

impl SeekReconciler {
    pub fn new(sample_rate: u32, tolerance_ms: i64, min_interval: Duration) -> Self {
        Self {
            sample_rate,
            tolerance_ms,
            min_interval,
            last_seek_ms: None,
            last_process: None,
        }
    }

    /// Position of the last successful reseek, if any.
    pub fn last_seek_ms(&self) -> Option<i64> {
        self.last_seek_ms
    }

    pub fn plan(&self, target_ms: i64, now: Instant) -> LoopStep {
        let should_seek = self
            .last_seek_ms
            .map(|last| (target_ms - last).abs() > self.tolerance_ms)
            .unwrap_or(true);
        if should_seek {
            return LoopStep::Seek {
                target_ms,
                sample_index: self.sample_index(target_ms),
            };
        }

        let due = self
            .last_process
            .map(|last| now.saturating_duration_since(last) >= self.min_interval)
            .unwrap_or(true);
        if due {
            LoopStep::Decode
        } else {
            LoopStep::Wait
        }
    }

    /// Records a successful reseek. A failed seek must not call this so the
    /// baseline stays put and the jump is retried.
    pub fn seek_succeeded(&mut self, target_ms: i64, now: Instant) {
        self.last_seek_ms = Some(target_ms);
        self.last_process = Some(now);
    }

    pub fn mark_processed(&mut self, now: Instant) {
        self.last_process = Some(now);
    }

    /// Frame index nearest to `position_ms`; negative positions clamp to 0.
    pub fn sample_index(&self, position_ms: i64) -> u64 {
        let position_ms = position_ms.max(0) as f64;
        (position_ms * f64::from(self.sample_rate) / 1000.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler() -> SeekReconciler {
        SeekReconciler::new(44_100, 100, Duration::from_millis(50))
    }

    #[test]
    fn seeks_on_first_iteration() {
        let now = Instant::now();
        assert_eq!(
            reconciler().plan(0, now),
            LoopStep::Seek {
                target_ms: 0,
                sample_index: 0
            }
        );
    }

    #[test]
    fn small_drift_decodes_forward() {
        let now = Instant::now();
        let mut reconciler = reconciler();
        reconciler.seek_succeeded(1000, now);

        let later = now + Duration::from_millis(60);
        assert_eq!(reconciler.plan(1050, later), LoopStep::Decode);
        assert_eq!(reconciler.plan(1100, later), LoopStep::Decode);
    }

    #[test]
    fn large_drift_reseeks() {
        let now = Instant::now();
        let mut reconciler = reconciler();
        reconciler.seek_succeeded(1000, now);

        assert_eq!(
            reconciler.plan(1200, now),
            LoopStep::Seek {
                target_ms: 1200,
                sample_index: 52_920
            }
        );
        assert!(matches!(reconciler.plan(800, now), LoopStep::Seek { .. }));
    }

    #[test]
    fn waits_until_interval_elapses() {
        let now = Instant::now();
        let mut reconciler = reconciler();
        reconciler.seek_succeeded(0, now);

        assert_eq!(reconciler.plan(0, now + Duration::from_millis(10)), LoopStep::Wait);

        reconciler.mark_processed(now + Duration::from_millis(50));
        assert_eq!(reconciler.plan(0, now + Duration::from_millis(70)), LoopStep::Wait);
        assert_eq!(reconciler.plan(0, now + Duration::from_millis(100)), LoopStep::Decode);
    }

    #[test]
    fn failed_seek_keeps_baseline() {
        let now = Instant::now();
        let mut reconciler = reconciler();
        reconciler.seek_succeeded(1000, now);

        // Nothing recorded for the rejected jump to 5000 ms.
        assert!(matches!(reconciler.plan(5000, now), LoopStep::Seek { .. }));
        assert_eq!(reconciler.last_seek_ms(), Some(1000));
        assert!(matches!(reconciler.plan(5000, now), LoopStep::Seek { .. }));
    }

    #[test]
    fn sample_index_rounds_and_clamps() {
        let reconciler = SeekReconciler::new(44_100, 100, Duration::ZERO);
        assert_eq!(reconciler.sample_index(-20), 0);
        assert_eq!(reconciler.sample_index(1), 44);
        assert_eq!(reconciler.sample_index(1000), 44_100);
    }
}
