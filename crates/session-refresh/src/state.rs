//! Refresh episode state
//!
//! Pure bookkeeping: the in-flight flag, the FIFO waiter queue, and an
//! episode counter. No I/O and no locking here; the coordinator owns the one
//! instance behind its mutex and performs the refresh call itself.
//!
//! Only two transitions exist:
//! - `begin_or_join`: enqueue a waiter; if idle, flip to in-flight and start
//!   a new episode
//! - `settle`: flip back to idle and hand over every queued waiter in the
//!   order they joined

use std::collections::VecDeque;

use tokio::sync::oneshot;

/// What a waiter receives when its episode settles: the new access token,
/// or the refresh error shared by the whole episode.
pub(crate) type Resolution = Result<String, session_auth::Error>;

/// Coordinator-held half of a waiter's one-shot channel.
pub(crate) type Waiter = oneshot::Sender<Resolution>;

/// Point-in-time view of the refresh state, for health reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub in_flight: bool,
    pub waiters: usize,
    /// Episodes started since the coordinator was created
    pub episodes: u64,
}

/// Result of `begin_or_join`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Join {
    /// The caller started a new episode and must run the refresh.
    Started { episode: u64 },
    /// A refresh is already running; the caller is queued at `position`.
    Joined { episode: u64, position: usize },
}

#[derive(Default)]
pub(crate) struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<Waiter>,
    episodes: u64,
}

impl RefreshState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Queue `waiter` and start an episode if none is running.
    ///
    /// The waiter that starts an episode is queued too, at position 0, so it
    /// is resolved by the same `settle` as everyone who joined later.
    pub(crate) fn begin_or_join(&mut self, waiter: Waiter) -> Join {
        self.waiters.push_back(waiter);
        if self.in_flight {
            return Join::Joined {
                episode: self.episodes,
                position: self.waiters.len() - 1,
            };
        }
        self.in_flight = true;
        self.episodes += 1;
        Join::Started {
            episode: self.episodes,
        }
    }

    /// End the current episode and drain the queue, oldest first.
    ///
    /// The state is idle when this returns; delivering to the drained
    /// waiters is the caller's job.
    pub(crate) fn settle(&mut self) -> VecDeque<Waiter> {
        debug_assert!(self.in_flight, "settle called with no refresh in flight");
        self.in_flight = false;
        std::mem::take(&mut self.waiters)
    }

    pub(crate) fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            in_flight: self.in_flight,
            waiters: self.waiters.len(),
            episodes: self.episodes,
        }
    }
}
