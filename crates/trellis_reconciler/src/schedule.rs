/// Coalesces flush requests: only the first request after a completed
/// flush asks the host for a new one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    armed: bool,
    /// Number of requests absorbed by an already armed schedule.
    coalesced: u64,
}

impl Schedule {
    pub const fn new() -> Self {
        Self {
            armed: false,
            coalesced: 0,
        }
    }

    /// Returns true if this request armed the schedule and a flush must be requested.
    pub const fn request(&mut self) -> bool {
        if self.armed {
            self.coalesced = self.coalesced.saturating_add(1);
            false
        } else {
            self.armed = true;
            true
        }
    }

    /// Disarm after the flush ran, so the next request arms again.
    pub const fn complete(&mut self) {
        self.armed = false;
    }

    /// Whether a flush has been requested and not yet run.
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Return the number of requests that were coalesced into an earlier one.
    pub const fn coalesced(&self) -> u64 {
        self.coalesced
    }
}
