use super::filter::FilterResult;

/// Cycles a better value must persist before it is reported.
pub const ALARM_HYSTERESIS_CYCLES: u16 = 100;

/// Reports a worse value immediately and a better one only after it has
/// persisted for a number of consecutive updates.
#[derive(Debug, Clone)]
pub struct Hysteresis<T> {
    current: T,
    pending: u16,
    threshold: u16,
}

impl<T: PartialOrd + Copy> Hysteresis<T> {
    pub fn new(initial: T, threshold: u16) -> Self {
        Hysteresis {
            current: initial,
            pending: 0,
            threshold,
        }
    }

    pub fn update(&mut self, value: T) -> T {
        if value >= self.current {
            self.current = value;
            self.pending = 0;
        } else if self.pending < self.threshold {
            self.pending += 1;
        } else {
            self.current = value;
            self.pending = 0;
        }
        self.current
    }
}

/// Severity published on the system alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmSeverity {
    Uninitialised,
    Ok,
    Warning,
    Critical,
    Error,
}

impl From<FilterResult> for AlarmSeverity {
    fn from(result: FilterResult) -> Self {
        match result {
            FilterResult::Uninitialised => AlarmSeverity::Uninitialised,
            FilterResult::Ok => AlarmSeverity::Ok,
            FilterResult::Warning => AlarmSeverity::Warning,
            FilterResult::Critical => AlarmSeverity::Critical,
            FilterResult::Error => AlarmSeverity::Error,
        }
    }
}

pub fn nav_alarm(nav_used: bool, nav_ok: bool) -> AlarmSeverity {
    match (nav_used, nav_ok) {
        (false, _) => AlarmSeverity::Uninitialised,
        (true, true) => AlarmSeverity::Ok,
        (true, false) => AlarmSeverity::Critical,
    }
}
