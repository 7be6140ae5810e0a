use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Fixed {
        delay: Duration,
    },
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

/// Delay source for retry loops.
///
/// Fixed delays are the default for scheduled re-processing; exponential
/// growth is available for call sites hammering a single flaky endpoint.
#[derive(Debug, Clone)]
pub struct DelaySchedule {
    kind: Kind,
    current_attempt: u32,
}

impl DelaySchedule {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: Kind::Fixed { delay },
            current_attempt: 0,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            kind: Kind::Exponential {
                initial,
                max,
                multiplier: 2.0,
            },
            current_attempt: 0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        if let Kind::Exponential { multiplier: m, .. } = &mut self.kind {
            *m = multiplier;
        }
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.kind {
            Kind::Fixed { delay } => delay,
            Kind::Exponential {
                initial,
                max,
                multiplier,
            } => {
                if self.current_attempt == 0 {
                    initial
                } else {
                    let factor = multiplier.powi(self.current_attempt as i32);
                    let delay_ms = initial.as_millis() as f64 * factor;
                    let delay_ms = delay_ms.min(max.as_millis() as f64);
                    Duration::from_millis(delay_ms as u64)
                }
            }
        };

        self.current_attempt += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for DelaySchedule {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_never_grows() {
        let mut schedule = DelaySchedule::fixed(Duration::from_secs(3));
        for _ in 0..5 {
            assert_eq!(schedule.next_delay(), Duration::from_secs(3));
        }
        assert_eq!(schedule.current_attempt(), 5);
    }

    #[test]
    fn exponential_progression() {
        let mut schedule =
            DelaySchedule::exponential(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(schedule.next_delay(), Duration::from_millis(100));
        assert_eq!(schedule.next_delay(), Duration::from_millis(200));
        assert_eq!(schedule.next_delay(), Duration::from_millis(400));
        assert_eq!(schedule.next_delay(), Duration::from_millis(800));
    }

    #[test]
    fn exponential_caps_at_max() {
        let mut schedule =
            DelaySchedule::exponential(Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..20 {
            assert!(schedule.next_delay() <= Duration::from_secs(1));
        }
        assert_eq!(schedule.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn reset_starts_over() {
        let mut schedule =
            DelaySchedule::exponential(Duration::from_millis(100), Duration::from_secs(10));
        schedule.next_delay();
        schedule.next_delay();
        schedule.reset();
        assert_eq!(schedule.current_attempt(), 0);
        assert_eq!(schedule.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn custom_multiplier() {
        let mut schedule =
            DelaySchedule::exponential(Duration::from_millis(100), Duration::from_secs(10))
                .with_multiplier(3.0);
        assert_eq!(schedule.next_delay(), Duration::from_millis(100));
        assert_eq!(schedule.next_delay(), Duration::from_millis(300));
        assert_eq!(schedule.next_delay(), Duration::from_millis(900));
    }
}
