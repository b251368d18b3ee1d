use crate::Instant;

const DT_ALPHA: f32 = 1e-3;
const DT_MIN_S: f32 = 1e-6;
const DT_MAX_S: f32 = 1.0;

/// Smoothed interval between consecutive calls.
///
/// Single samples are clamped before entering a slow moving average, so
/// scheduling jitter and dropped samples barely affect the integration step.
#[derive(Debug, Clone)]
pub struct DeltaTime {
    average_s: f32,
    last: Option<Instant>,
}

impl DeltaTime {
    pub fn new(rate_hz: f32) -> Self {
        DeltaTime {
            average_s: (1.0 / rate_hz).clamp(DT_MIN_S, DT_MAX_S),
            last: None,
        }
    }

    pub fn average_seconds(&mut self, now: Instant) -> f32 {
        let dt = match self.last {
            Some(last) => now
                .checked_since(last)
                .map(|d| d.to_secs_f32())
                .unwrap_or(DT_MIN_S),
            None => self.average_s,
        };
        self.last = Some(now);

        self.average_s = self.average_s * (1.0 - DT_ALPHA) + dt.clamp(DT_MIN_S, DT_MAX_S) * DT_ALPHA;
        self.average_s
    }
}
