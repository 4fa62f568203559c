//! Escrow session lifecycle:
//!   pending -> completed | cancelled | failed | expired
//!
//! All four right-hand states are terminal, and exactly one terminal
//! transition ever succeeds per session. Confirm and cancel race the
//! background sweep for that transition; whichever acquires the
//! account serialization first wins, and the loser observes
//! `InvalidState`.

use crate::{
    error::{LedgerError, LedgerResult},
    ledger::Ledger,
    types::{AccountId, Credits, SessionId},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        mpsc::{channel, RecvTimeoutError, Sender},
        Arc,
    },
    thread::JoinHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal state a release drives a pending session into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowOutcome {
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl EscrowOutcome {
    pub fn status(&self) -> EscrowStatus {
        match self {
            Self::Completed => EscrowStatus::Completed,
            Self::Cancelled => EscrowStatus::Cancelled,
            Self::Failed => EscrowStatus::Failed,
            Self::Expired => EscrowStatus::Expired,
        }
    }
}

impl fmt::Display for EscrowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowSession {
    pub session_id: SessionId,
    pub account_id: AccountId,
    pub amount: Credits,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Purchase-session state machine over the ledger's escrow primitives.
pub struct EscrowSessions {
    ledger: Arc<Ledger>,
}

impl EscrowSessions {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Hold funds and open a pending session with the given TTL.
    pub fn create(
        &self,
        account_id: &str,
        amount: Credits,
        ttl: Duration,
    ) -> LedgerResult<EscrowSession> {
        self.ledger.hold_escrow(account_id, amount, ttl)
    }

    pub fn get(&self, session_id: &str) -> LedgerResult<EscrowSession> {
        self.ledger.get_session(session_id)
    }

    /// Confirm with no settlement side effect.
    pub fn confirm(&self, session_id: &str) -> LedgerResult<EscrowSession> {
        self.confirm_with(session_id, |_| Ok(()))
    }

    /// Confirm a pending, unexpired session: run the settlement side
    /// effect to completion (non-cancellable once begun), then release
    /// the held funds as spent.
    ///
    /// Expiry is checked here, independently of the sweep; a session
    /// found past its TTL is released as expired on the spot.
    pub fn confirm_with<F>(&self, session_id: &str, settle: F) -> LedgerResult<EscrowSession>
    where
        F: FnOnce(&EscrowSession) -> LedgerResult<()>,
    {
        let session = self.ledger.get_session(session_id)?;
        if session.status.is_terminal() {
            return Err(LedgerError::InvalidState {
                session_id: session_id.to_string(),
                status: session.status,
            });
        }
        if self.ledger.now() >= session.expires_at {
            let released = self.ledger.release_escrow(session_id, EscrowOutcome::Expired)?;
            return Err(match released.status {
                EscrowStatus::Expired => LedgerError::Expired {
                    session_id: session_id.to_string(),
                    expired_at: session.expires_at,
                },
                other => LedgerError::InvalidState {
                    session_id: session_id.to_string(),
                    status: other,
                },
            });
        }

        settle(&session)?;

        let settled = self
            .ledger
            .release_escrow(session_id, EscrowOutcome::Completed)?;
        if settled.status != EscrowStatus::Completed {
            // Lost the terminal race (sweep or a concurrent cancel).
            return Err(LedgerError::InvalidState {
                session_id: session_id.to_string(),
                status: settled.status,
            });
        }
        Ok(settled)
    }

    /// Cancel a pending session and refund the hold.
    pub fn cancel(&self, session_id: &str) -> LedgerResult<EscrowSession> {
        let session = self.ledger.get_session(session_id)?;
        if session.status.is_terminal() {
            return Err(LedgerError::InvalidState {
                session_id: session_id.to_string(),
                status: session.status,
            });
        }
        let released = self
            .ledger
            .release_escrow(session_id, EscrowOutcome::Cancelled)?;
        if released.status != EscrowStatus::Cancelled {
            return Err(LedgerError::InvalidState {
                session_id: session_id.to_string(),
                status: released.status,
            });
        }
        Ok(released)
    }

    /// Expire every pending session past its TTL. Returns the number of
    /// sessions this pass expired. Failures are logged and left for the
    /// next pass; the sweep itself never fails.
    pub fn sweep(&self) -> usize {
        let now = self.ledger.now();
        let due = match self.ledger.sessions_due(now) {
            Ok(due) => due,
            Err(e) => {
                log::warn!("escrow: sweep query failed, retrying next tick: {e}");
                return 0;
            }
        };
        let mut expired = 0;
        for session in due {
            match self
                .ledger
                .release_escrow(&session.session_id, EscrowOutcome::Expired)
            {
                Ok(released) if released.status == EscrowStatus::Expired => expired += 1,
                Ok(released) => {
                    // A confirm or cancel settled it first.
                    log::debug!(
                        "escrow: sweep skipped '{}', already {}",
                        session.session_id,
                        released.status
                    );
                }
                Err(e) => {
                    log::warn!(
                        "escrow: sweep failed on '{}', retrying next tick: {e}",
                        session.session_id
                    );
                }
            }
        }
        if expired > 0 {
            log::info!("escrow: sweep expired {expired} session(s)");
        }
        expired
    }

    /// Run `sweep` on a background thread every `interval` until the
    /// returned handle is stopped or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> SweeperHandle {
        let sessions = Arc::clone(self);
        let (stop_tx, stop_rx) = channel::<()>();
        let thread = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    sessions.sweep();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        SweeperHandle {
            stop_tx,
            thread: Some(thread),
        }
    }
}

/// Owns the sweeper thread; stopping (or dropping) shuts it down.
pub struct SweeperHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
