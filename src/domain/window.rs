//! Withdrawal window interpretation.
//!
//! Pools that gate withdrawals behind a request store a `(start, end)`
//! timestamp pair per account. The all-zero pair means no request exists.
//! While the window is open a withdrawal pays no early-exit fee; outside it
//! the pool's flat fee applies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::primitives::Timestamp;

/// A per-account withdrawal window as stored on-chain. `(0, 0)` encodes the
/// absence of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl WithdrawalWindow {
    pub fn new(start: u64, end: u64) -> Self {
        WithdrawalWindow {
            start: Timestamp::new(start),
            end: Timestamp::new(end),
        }
    }

    /// The sentinel "no request" value.
    pub fn absent() -> Self {
        WithdrawalWindow::new(0, 0)
    }

    pub fn is_absent(&self) -> bool {
        self.start.as_u64() == 0 && self.end.as_u64() == 0
    }

    /// Classify this window relative to `now`. Boundaries are inclusive.
    pub fn status(&self, now: Timestamp) -> WindowStatus {
        if self.is_absent() {
            return WindowStatus::None;
        }
        if now < self.start {
            WindowStatus::Pending
        } else if now <= self.end {
            WindowStatus::Open
        } else {
            WindowStatus::Expired
        }
    }

    /// Seconds until the window opens (pending) or closes (open).
    pub fn seconds_remaining(&self, now: Timestamp) -> Option<u64> {
        match self.status(now) {
            WindowStatus::Pending => Some(now.until(self.start)),
            WindowStatus::Open => Some(now.until(self.end)),
            WindowStatus::None | WindowStatus::Expired => None,
        }
    }
}

/// Where a withdrawal request stands relative to its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    /// No request on record.
    None,
    /// Requested, waiting for the window to open.
    Pending,
    /// Window is open; withdrawal is fee-free.
    Open,
    /// Window closed without a withdrawal; the flat fee applies again.
    Expired,
}

/// Humanize a seconds count as the largest two relevant units ("1d 4h",
/// "30m", "45s").
pub fn format_remaining(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        if hours > 0 {
            format!("{days}d {hours}h")
        } else {
            format!("{days}d")
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{hours}h")
        }
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{seconds}s")
    }
}

/// Fee annotation for a withdrawal at the given window status. Only an open
/// window earns the "(free)" label; everywhere else the flat fee is shown.
pub fn fee_label(status: WindowStatus, flat_fee_pct: Decimal) -> String {
    match status {
        WindowStatus::Open => "(free)".to_string(),
        _ => format!("{}%", flat_fee_pct.normalize()),
    }
}
