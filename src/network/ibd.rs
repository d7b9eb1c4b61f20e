//! Initial block download: reconciling the local chain with peers.
//!
//! The node broadcasts an `IBD_REQUEST` and every peer answers with its full
//! state. The first answer opens a collection window of `window_ms`; answers
//! arriving while it is open are buffered. When the window closes every
//! candidate, the local state included, is revalidated and the longest valid
//! chain wins. Ties keep the local state.
//!
//! A forced request skips the window: the first valid answer is applied as-is.
//!
//! The coordinator is pure bookkeeping. It produces [`IbdAction`]s and the
//! server owns the timer that later calls [`IbdCoordinator::close_window`].

use crate::core::ledger::LedgerState;

/// Default collection window.
pub const IBD_WINDOW_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No matching request is outstanding.
    Unsolicited,
    /// The peer's chain or supply failed validation.
    InvalidChain,
}

/// What the server must do after a response arrives.
#[derive(Debug)]
pub enum IbdAction {
    /// First response of a round: schedule `close_window(window_id)` after
    /// `close_in_ms`.
    OpenWindow { window_id: u64, close_in_ms: u64 },
    /// Stored in the already open window.
    Buffered { window_id: u64 },
    /// Forced sync: replace local state with this one immediately.
    ApplyNow { from: String, state: LedgerState },
    Ignored(IgnoreReason),
}

#[derive(Debug)]
pub enum IbdOutcome {
    Adopt {
        from: String,
        state: LedgerState,
        considered: usize,
        discarded: usize,
    },
    KeepLocal { considered: usize, discarded: usize },
}

struct Window {
    id: u64,
    responses: Vec<(String, LedgerState)>,
}

#[derive(Default)]
struct Outstanding {
    normal: bool,
    forced: bool,
}

pub struct IbdCoordinator {
    window_ms: u64,
    window: Option<Window>,
    outstanding: Outstanding,
    next_window_id: u64,
}

impl Default for IbdCoordinator {
    fn default() -> Self {
        IbdCoordinator::new(IBD_WINDOW_MS)
    }
}

impl IbdCoordinator {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            window: None,
            outstanding: Outstanding::default(),
            next_window_id: 0,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Records that a request went out, so answers to it are accepted.
    pub fn request(&mut self, force_sync: bool) {
        if force_sync {
            self.outstanding.forced = true;
        } else {
            self.outstanding.normal = true;
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.window.is_some()
    }

    pub fn is_awaiting(&self) -> bool {
        self.outstanding.normal || self.outstanding.forced
    }

    pub fn on_response(&mut self, from: String, state: LedgerState, force_sync: bool) -> IbdAction {
        if force_sync {
            if !self.outstanding.forced {
                return IbdAction::Ignored(IgnoreReason::Unsolicited);
            }
            if !state.is_valid() {
                return IbdAction::Ignored(IgnoreReason::InvalidChain);
            }
            self.outstanding.forced = false;
            return IbdAction::ApplyNow { from, state };
        }

        if let Some(window) = &mut self.window {
            window.responses.push((from, state));
            return IbdAction::Buffered {
                window_id: window.id,
            };
        }
        if !self.outstanding.normal {
            return IbdAction::Ignored(IgnoreReason::Unsolicited);
        }

        let window_id = self.next_window_id;
        self.next_window_id += 1;
        self.window = Some(Window {
            id: window_id,
            responses: vec![(from, state)],
        });
        IbdAction::OpenWindow {
            window_id,
            close_in_ms: self.window_ms,
        }
    }

    /// Ends the window `window_id` and picks a winner against `local`.
    ///
    /// Returns `None` if that window is no longer the open one.
    pub fn close_window(&mut self, window_id: u64, local: &LedgerState) -> Option<IbdOutcome> {
        if self.window.as_ref().map(|w| w.id) != Some(window_id) {
            return None;
        }
        let window = self.window.take()?;
        self.outstanding.normal = false;
        Some(resolve(local, window.responses))
    }

    /// Drops any open window and outstanding request.
    pub fn abandon(&mut self) {
        self.window = None;
        self.outstanding = Outstanding::default();
    }
}

/// Longest valid chain among `candidates`, or the local state if it is at
/// least as long as every valid candidate. States above the supply cap count
/// as invalid.
pub fn resolve(local: &LedgerState, candidates: Vec<(String, LedgerState)>) -> IbdOutcome {
    let considered = candidates.len();
    let valid: Vec<(String, LedgerState)> = candidates
        .into_iter()
        .filter(|(_, state)| state.is_valid())
        .collect();
    let discarded = considered - valid.len();

    let local_len = if local.is_valid() { local.len() } else { 0 };
    let mut best: Option<(String, LedgerState)> = None;
    for (from, state) in valid {
        let best_len = best.as_ref().map_or(local_len, |(_, s)| s.len());
        if state.len() > best_len {
            best = Some((from, state));
        }
    }

    match best {
        Some((from, state)) => IbdOutcome::Adopt {
            from,
            state,
            considered,
            discarded,
        },
        None => IbdOutcome::KeepLocal {
            considered,
            discarded,
        },
    }
}
