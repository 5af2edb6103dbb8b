/// Slow-falling maximum per bar.
///
/// A peak jumps up to its bar as soon as the bar exceeds it and otherwise
/// falls by `decay` per update, never below the current bar value.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakTracker {
    peaks: Vec<f32>,
    decay: f32,
}

impl PeakTracker {
    pub fn new(bar_count: usize, decay: f32) -> Self {
        Self {
            peaks: vec![0.0; bar_count],
            decay: decay.max(0.0),
        }
    }

    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    pub fn set_decay(&mut self, decay: f32) {
        self.decay = decay.max(0.0);
    }

    /// Applies one tick against the current bar values. Returns whether any
    /// peak moved.
    pub fn update(&mut self, bars: &[f32]) -> bool {
        let mut changed = false;
        for (peak, &bar) in self.peaks.iter_mut().zip(bars) {
            let next = if bar > *peak {
                bar
            } else {
                (*peak - self.decay).max(bar)
            };
            changed |= next != *peak;
            *peak = next;
        }
        changed
    }

    /// Pins every peak to its bar, ending any fall in progress.
    pub fn settle(&mut self, bars: &[f32]) {
        for (peak, &bar) in self.peaks.iter_mut().zip(bars) {
            *peak = bar;
        }
    }

    pub fn reset(&mut self) {
        self.peaks.iter_mut().for_each(|peak| *peak = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_up_immediately() {
        let mut tracker = PeakTracker::new(2, 0.05);
        tracker.update(&[0.8, 0.3]);
        assert_eq!(tracker.peaks(), &[0.8, 0.3]);
    }

    #[test]
    fn decays_by_exact_step_until_bar() {
        let mut tracker = PeakTracker::new(1, 0.25);
        tracker.update(&[1.0]);

        tracker.update(&[0.0]);
        assert_eq!(tracker.peaks(), &[0.75]);
        tracker.update(&[0.0]);
        assert_eq!(tracker.peaks(), &[0.5]);

        // Clamped at the current bar instead of overshooting it.
        tracker.update(&[0.4]);
        assert_eq!(tracker.peaks(), &[0.4]);
        assert!(!tracker.update(&[0.4]));
    }

    #[test]
    fn never_below_bar() {
        let mut tracker = PeakTracker::new(4, 0.1);
        let frames = [
            [0.9, 0.1, 0.5, 0.0],
            [0.2, 0.4, 0.5, 0.7],
            [0.0, 0.35, 0.6, 0.1],
            [0.3, 0.0, 0.0, 0.65],
        ];
        for bars in frames {
            tracker.update(&bars);
            for (peak, bar) in tracker.peaks().iter().zip(bars) {
                assert!(*peak >= bar);
            }
        }
    }

    #[test]
    fn settle_and_reset() {
        let mut tracker = PeakTracker::new(2, 0.1);
        tracker.update(&[0.9, 0.9]);
        tracker.settle(&[0.2, 0.3]);
        assert_eq!(tracker.peaks(), &[0.2, 0.3]);

        tracker.reset();
        assert_eq!(tracker.peaks(), &[0.0, 0.0]);
    }
}
