//! Fail points for exercising rebuild error paths.
//!
//! A [`FaultInjector`] is shared by every component of one node. Tests arm
//! a [`FailPoint`] and the component that owns it reacts the next time it
//! checks. Nothing is armed by default.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Places in the pipeline that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Refuse to start a scan in the scan-trigger handler.
    TargetStartFail,
    /// Fail while refreshing a stale placement view.
    PlacementRefreshFail,
    /// Make scanners spin (yielding) before enumerating objects.
    ScanHang,
    /// Fail while evaluating an object.
    ScanObjectFail,
    /// Drain a batch but skip sending it, without error.
    SendObjectsDrop,
    /// Fail before sending a batch.
    SendObjectsFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Always,
    Times(u32),
}

/// Shared set of armed fail points.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    armed: Arc<Mutex<HashMap<FailPoint, Mode>>>,
}

impl FaultInjector {
    /// Create an injector with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `point` on every check until disarmed.
    pub fn arm(&self, point: FailPoint) {
        self.lock().insert(point, Mode::Always);
    }

    /// Fire `point` on the next `times` checks only.
    pub fn arm_times(&self, point: FailPoint, times: u32) {
        if times > 0 {
            self.lock().insert(point, Mode::Times(times));
        }
    }

    /// Stop firing `point`.
    pub fn disarm(&self, point: FailPoint) {
        self.lock().remove(&point);
    }

    /// Whether `point` is armed, without consuming a firing.
    pub fn is_armed(&self, point: FailPoint) -> bool {
        self.lock().contains_key(&point)
    }

    /// Check `point`, consuming one firing if it is armed a fixed number of times.
    pub fn check(&self, point: FailPoint) -> bool {
        let mut armed = self.lock();
        let fired = match armed.get(&point).copied() {
            None => false,
            Some(Mode::Always) => true,
            Some(Mode::Times(left)) => {
                if left <= 1 {
                    armed.remove(&point);
                } else {
                    armed.insert(point, Mode::Times(left - 1));
                }
                true
            }
        };
        if fired {
            debug!(?point, "fail point fired");
        }
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FailPoint, Mode>> {
        self.armed.lock().expect("fault injector lock poisoned")
    }
}
