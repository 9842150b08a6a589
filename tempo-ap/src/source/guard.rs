//! Single in-flight load guard
//!
//! Every load gets a ticket carrying a generation number. Completions whose
//! ticket is no longer current are stale and must be discarded. Automatic
//! loads yield to a user load that is still in flight.

use tracing::debug;

/// Who asked for a load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Explicit user intent (play, skip, pick from queue)
    User,
    /// Track ended and the queue advanced on its own
    AutoAdvance,
    /// Session restore at startup
    Restore,
}

impl LoadOrigin {
    pub fn is_automatic(&self) -> bool {
        !matches!(self, LoadOrigin::User)
    }
}

/// Proof of a started load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub generation: u64,
    pub origin: LoadOrigin,
}

#[derive(Debug, Default)]
pub struct LoadGuard {
    generation: u64,
    in_flight: Option<LoadTicket>,
}

impl LoadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a load, superseding whatever is in flight
    ///
    /// Returns `None` when an automatic load arrives while a user load is
    /// still running; the automatic request is dropped, not queued.
    pub fn begin(&mut self, origin: LoadOrigin) -> Option<LoadTicket> {
        if origin.is_automatic() {
            if let Some(current) = self.in_flight {
                if current.origin == LoadOrigin::User {
                    debug!(?origin, generation = current.generation, "User load in flight, dropping automatic load");
                    return None;
                }
            }
        }
        self.generation += 1;
        let ticket = LoadTicket {
            generation: self.generation,
            origin,
        };
        self.in_flight = Some(ticket);
        Some(ticket)
    }

    /// True if `ticket` is the load currently in flight
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.in_flight == Some(*ticket)
    }

    /// Release the guard if `ticket` still owns it
    pub fn finish(&mut self, ticket: &LoadTicket) -> bool {
        if self.is_current(ticket) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Invalidate any in-flight load
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> Option<LoadTicket> {
        self.in_flight
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
