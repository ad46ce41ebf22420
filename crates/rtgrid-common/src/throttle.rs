// throttle.rs — rate-limited console diagnostics
//
// Each call site owns one `Throttle` (the macros below declare it as a
// hidden static), so a message that fires every frame is printed at most
// once per interval instead of flooding the console.

use std::time::{Duration, Instant};

use parking_lot::{const_mutex, Mutex};

use crate::common::com_printf;

struct ThrottleState {
    last: Option<Instant>,
    suppressed: u32,
}

/// Per-call-site emission gate.
pub struct Throttle {
    state: Mutex<ThrottleState>,
}

impl Throttle {
    pub const fn new() -> Self {
        Self {
            state: const_mutex(ThrottleState {
                last: None,
                suppressed: 0,
            }),
        }
    }

    /// Returns `Some(suppressed)` when the caller may emit now, where
    /// `suppressed` is the number of messages swallowed since the last
    /// emission. Returns `None` while the interval has not elapsed.
    pub fn check(&self, interval: Duration) -> Option<u32> {
        self.check_at(Instant::now(), interval)
    }

    pub fn check_at(&self, now: Instant, interval: Duration) -> Option<u32> {
        let mut state = self.state.lock();
        let ready = match state.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        };

        if !ready {
            state.suppressed = state.suppressed.saturating_add(1);
            return None;
        }

        state.last = Some(now);
        Some(std::mem::replace(&mut state.suppressed, 0))
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last = None;
        state.suppressed = 0;
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

/// Print `msg` with `prefix` if `throttle` allows it. Returns true if printed.
pub fn com_printf_throttled(throttle: &Throttle, seconds: u64, prefix: &str, msg: &str) -> bool {
    match throttle.check(Duration::from_secs(seconds)) {
        Some(0) => {
            com_printf(&format!("{}{}\n", prefix, msg));
            true
        }
        Some(suppressed) => {
            com_printf(&format!("{}{} ({} more suppressed)\n", prefix, msg, suppressed));
            true
        }
        None => false,
    }
}

/// Error diagnostic printed at most once per `$secs` seconds per call site.
#[macro_export]
macro_rules! com_error_throttled {
    ($secs:expr, $($arg:tt)*) => {{
        static THROTTLE: $crate::throttle::Throttle = $crate::throttle::Throttle::new();
        $crate::throttle::com_printf_throttled(&THROTTLE, $secs, "ERROR: ", &format!($($arg)*))
    }};
}

/// Warning diagnostic printed at most once per `$secs` seconds per call site.
#[macro_export]
macro_rules! com_printf_throttled {
    ($secs:expr, $($arg:tt)*) => {{
        static THROTTLE: $crate::throttle::Throttle = $crate::throttle::Throttle::new();
        $crate::throttle::com_printf_throttled(&THROTTLE, $secs, "WARNING: ", &format!($($arg)*))
    }};
}
