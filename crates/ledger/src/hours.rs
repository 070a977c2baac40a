//! Trading-hours guard for guarded settlement primitives.
//!
//! Symbols with configured sessions settle only inside those windows;
//! unconfigured symbols (the crypto default) are always open.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashMap;

/// One weekly session window, in seconds of day UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub weekday: Weekday,
    pub open_sec: u32,
    pub close_sec: u32,
}

impl SessionWindow {
    fn contains(&self, weekday: Weekday, sec_of_day: u32) -> bool {
        self.weekday == weekday && sec_of_day >= self.open_sec && sec_of_day < self.close_sec
    }
}

/// Per-symbol weekly trading sessions.
#[derive(Debug, Default)]
pub struct TradingHoursGuard {
    sessions: HashMap<String, Vec<SessionWindow>>,
}

impl TradingHoursGuard {
    /// A guard with every symbol always open.
    #[must_use]
    pub fn always_open() -> Self {
        Self::default()
    }

    /// Restricts a symbol to the given session windows.
    pub fn set_sessions(&mut self, symbol: impl Into<String>, windows: Vec<SessionWindow>) {
        self.sessions.insert(symbol.into(), windows);
    }

    /// Removes restrictions for a symbol.
    pub fn clear_sessions(&mut self, symbol: &str) {
        self.sessions.remove(symbol);
    }

    /// Whether `symbol` is tradeable at engine time `now` (unix seconds).
    #[must_use]
    pub fn is_open(&self, symbol: &str, now: u64) -> bool {
        let Some(windows) = self.sessions.get(symbol) else {
            return true;
        };
        let Some(ts) = DateTime::<Utc>::from_timestamp(i64::try_from(now).unwrap_or(0), 0) else {
            return false;
        };
        let weekday = ts.weekday();
        let sec_of_day = ts.num_seconds_from_midnight();
        windows.iter().any(|w| w.contains(weekday, sec_of_day))
    }
}
