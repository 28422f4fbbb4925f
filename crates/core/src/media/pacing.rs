use std::time::Duration;

/// Presentation-time based send scheduling.
///
/// The first batch anchors the stream: its presentation timestamp and the
/// clock time it arrived. Every later batch is due at
///
/// ```text
/// when = (pts - first_pts) + first_send_time
/// ```
///
/// so the spacing on the wire follows the spacing of the source timestamps
/// rather than the (jittery) arrival times.
#[derive(Debug, Default, Clone)]
pub struct PacingClock {
    anchor: Option<Anchor>,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    first_presentation_us: i64,
    first_send_us: i64,
}

/// Outcome of [`PacingClock::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacedDelivery {
    /// Intended clock time of delivery in microseconds.
    pub when_us: i64,
    /// How long to wait from now; zero when already late.
    pub delay: Duration,
    /// Signed lateness-adjusted delay, for diagnostics.
    pub delay_us: i64,
}

impl PacingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute when a batch with presentation time `presentation_us`,
    /// arriving at `now_us`, should be sent.
    pub fn schedule(&mut self, presentation_us: i64, now_us: i64) -> PacedDelivery {
        let Some(anchor) = self.anchor else {
            self.anchor = Some(Anchor {
                first_presentation_us: presentation_us,
                first_send_us: now_us,
            });
            tracing::debug!(presentation_us, now_us, "pacing anchored");
            return PacedDelivery {
                when_us: now_us,
                delay: Duration::ZERO,
                delay_us: 0,
            };
        };

        let when_us = (presentation_us - anchor.first_presentation_us) + anchor.first_send_us;
        let delay_us = when_us - now_us;

        PacedDelivery {
            when_us,
            delay: Duration::from_micros(delay_us.max(0) as u64),
            delay_us,
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_batch_is_immediate() {
        let mut clock = PacingClock::new();
        let d = clock.schedule(5_000_000, 100);
        assert_eq!(d.when_us, 100);
        assert_eq!(d.delay, Duration::ZERO);
        assert!(clock.is_anchored());
    }

    #[test]
    fn later_batch_offset_from_first_send_not_arrival() {
        let mut clock = PacingClock::new();
        clock.schedule(1_000_000, 10_000);

        // Arrives early (2 ms after anchor) but is due 40 ms after it.
        let d = clock.schedule(1_040_000, 12_000);
        assert_eq!(d.when_us, 50_000);
        assert_eq!(d.delay, Duration::from_micros(38_000));
    }

    #[test]
    fn late_batch_sent_without_delay() {
        let mut clock = PacingClock::new();
        clock.schedule(0, 0);
        let d = clock.schedule(10_000, 25_000);
        assert_eq!(d.when_us, 10_000);
        assert_eq!(d.delay, Duration::ZERO);
        assert_eq!(d.delay_us, -15_000);
    }
}
