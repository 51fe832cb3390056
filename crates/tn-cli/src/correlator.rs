//! Transaction ids and reply correlation.
//!
//! Every outbound envelope carries a client-chosen transaction id. Requests
//! that need follow-up work when the server answers register a
//! [`Completion`] under their id; the consumer resolves it when the matching
//! control reply arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry::{Occupied, Vacant};

use crate::error::CliError;

/// Transaction ids start at a random value in this range.
const SEED_RANGE: std::ops::Range<u64> = 10_000..60_000;

/// Follow-up work attached to a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Show the parameters the server returned for `{hi}`.
    PrintServerParams,
    /// Persist the session cookie returned for a login.
    SaveCookie,
}

/// Executes completions on behalf of the correlator.
pub trait CompletionHandler {
    fn complete(&self, completion: Completion, params: &HashMap<String, Vec<u8>>);
}

/// Outcome of resolving a control reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No pending transaction had this id.
    Unsolicited,
    /// The reply succeeded and the completion ran.
    Completed(Completion),
    /// The reply failed; the completion was dropped without running.
    Rejected(Completion),
}

/// Control reply codes in `[200, 400)` count as success.
pub fn is_success(code: i32) -> bool {
    (200..400).contains(&code)
}

/// Pending-transaction table shared by the producer and consumer tasks.
#[derive(Debug)]
pub struct Correlator {
    pending: DashMap<String, Completion>,
    next_id: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_seed(random_seed())
    }

    /// Start transaction ids at `seed` instead of a random value.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(seed),
        }
    }

    /// Allocate the next transaction id.
    pub fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    pub fn register(&self, id: &str, completion: Completion) -> Result<(), CliError> {
        match self.pending.entry(id.to_string()) {
            Occupied(_) => Err(CliError::DuplicateTransaction { id: id.to_string() }),
            Vacant(entry) => {
                entry.insert(completion);
                tracing::debug!(id, ?completion, "Registered pending transaction");
                Ok(())
            }
        }
    }

    /// Consume the pending entry for `id` and run it if `code` is a success.
    ///
    /// The entry leaves the table before the handler is invoked, so a handler
    /// that registers or resolves transactions itself never sees it again.
    pub fn resolve<H>(
        &self,
        id: &str,
        code: i32,
        params: &HashMap<String, Vec<u8>>,
        handler: &H,
    ) -> Resolution
    where
        H: CompletionHandler + ?Sized,
    {
        let Some((_, completion)) = self.pending.remove(id) else {
            return Resolution::Unsolicited;
        };
        if is_success(code) {
            handler.complete(completion, params);
            Resolution::Completed(completion)
        } else {
            tracing::debug!(id, code, ?completion, "Dropping completion for failed reply");
            Resolution::Rejected(completion)
        }
    }

    /// Number of transactions still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

fn random_seed() -> u64 {
    let mut buf = [0u8; 8];
    let raw = match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(e) => {
            tracing::warn!(error = %e, "OS randomness unavailable, seeding from clock");
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos() as u64)
                .unwrap_or_default()
        }
    };
    SEED_RANGE.start + raw % (SEED_RANGE.end - SEED_RANGE.start)
}
