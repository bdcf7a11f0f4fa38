//! `MrtContext` and `TxnRollCoordinator` (§4.11): the multi-record-transaction commit
//! and abort sequencing. Wire encoding of the verify/mark-roll-forward/roll-forward/
//! roll-back/close-monitor batch commands is out of scope (§1) — this module only
//! sequences already-built steps and interprets their result codes.
//!
//! Grounded in the teacher's `Session`/`TransactionState` state machine
//! (`client/session.rs`'s starting/in-progress/committed/aborted enum with
//! CAS-checked transitions), adapted from a client-side causal-consistency session to
//! this server-coordinated commit protocol.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::{Result, ResultCode};

/// A transaction's lifecycle (§4.11). `Open` is the only state writes/reads may be
/// recorded in; everything past it is terminal or on the way to terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnState {
    Open = 0,
    Verified = 1,
    Committed = 2,
    Aborted = 3,
}

impl TxnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TxnState::Open,
            1 => TxnState::Verified,
            2 => TxnState::Committed,
            _ => TxnState::Aborted,
        }
    }
}

/// One multi-record transaction's accumulated keys and state. The in-doubt flag is
/// orthogonal to `state`: a transaction can be `Committed` and in-doubt at once (the
/// roll-forward step never got a decisive response) until a later step clears it.
pub struct MrtContext {
    pub monitor_key: [u8; 20],
    write_keys: Mutex<Vec<[u8; 20]>>,
    read_versions: Mutex<HashMap<[u8; 20], u64>>,
    state: AtomicU8,
    in_doubt: AtomicBool,
}

impl MrtContext {
    pub fn new(monitor_key: [u8; 20]) -> Self {
        Self {
            monitor_key,
            write_keys: Mutex::new(Vec::new()),
            read_versions: Mutex::new(HashMap::new()),
            state: AtomicU8::new(TxnState::Open as u8),
            in_doubt: AtomicBool::new(false),
        }
    }

    pub fn record_write(&self, digest: [u8; 20]) {
        self.write_keys.lock().unwrap().push(digest);
    }

    /// Records the record version observed by a read, for the verify step to compare
    /// against what the server holds now.
    pub fn record_read(&self, digest: [u8; 20], version: u64) {
        self.read_versions.lock().unwrap().insert(digest, version);
    }

    pub fn write_keys(&self) -> Vec<[u8; 20]> {
        self.write_keys.lock().unwrap().clone()
    }

    pub fn read_versions(&self) -> HashMap<[u8; 20], u64> {
        self.read_versions.lock().unwrap().clone()
    }

    pub fn state(&self) -> TxnState {
        TxnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_in_doubt(&self) -> bool {
        self.in_doubt.load(Ordering::SeqCst)
    }

    pub fn mark_in_doubt(&self) {
        self.in_doubt.store(true, Ordering::SeqCst);
    }

    /// Escalates a write command's in-doubt outcome to this transaction (§4.7's
    /// `OnWriteInDoubt(key)`): records the key so the verify step checks it, and
    /// flips the orthogonal in-doubt flag.
    pub fn on_write_in_doubt(&self, digest: [u8; 20]) {
        self.record_write(digest);
        self.mark_in_doubt();
    }

    pub fn clear_in_doubt(&self) {
        self.in_doubt.store(false, Ordering::SeqCst);
    }

    /// Atomically advances `from` to `to`; `false` means another caller already
    /// moved the state (a race this crate never expects in practice, since one
    /// `TxnRollCoordinator` call owns a context end to end, but checked per §5's
    /// "state transitions checked with compare-and-set" rule all the same).
    fn transition(&self, from: TxnState, to: TxnState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            crate::trace::txn_state(&format!("{from:?}"), &format!("{to:?}"));
        }
        moved
    }
}

/// An already-armed batch-command future for one roll step; the coordinator only
/// awaits it and inspects the returned [`ResultCode`].
pub type RollStep<'a> = Pin<Box<dyn Future<Output = Result<ResultCode>> + Send + 'a>>;

/// Typed outcomes for a commit attempt (§7's enumeration).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Ok,
    VerifyFail,
    /// Verification failed and the local abort transition itself lost a race.
    VerifyFailAbortAbandoned,
    MarkRollForwardAbandoned,
    /// The server reported the transaction already aborted during mark-roll-forward.
    Aborted,
    /// mark-roll-forward succeeded (the server will complete the commit regardless);
    /// a later step failed to clean up.
    RollForwardAbandoned,
    CloseAbandoned,
}

impl CommitOutcome {
    /// Whether the transaction is guaranteed to complete server-side, so the caller
    /// should invoke `OnCommitSuccess` rather than `OnCommitFailure` (§4.11).
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            CommitOutcome::Ok | CommitOutcome::RollForwardAbandoned | CommitOutcome::CloseAbandoned
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortOutcome {
    Ok,
    RollBackFailed,
    CloseAbandoned,
}

impl AbortOutcome {
    pub fn is_aborted(self) -> bool {
        matches!(self, AbortOutcome::Ok | AbortOutcome::CloseAbandoned)
    }
}

/// Sequences the commit and abort protocols described in §4.11. Stateless: every
/// call takes the [`MrtContext`] plus the already-built step futures, so a single
/// coordinator instance has nothing of its own to hold.
pub struct TxnRollCoordinator;

impl TxnRollCoordinator {
    pub async fn commit(
        ctx: &MrtContext,
        verify: RollStep<'_>,
        mark_roll_forward: RollStep<'_>,
        roll_forward: RollStep<'_>,
        close_monitor: RollStep<'_>,
    ) -> CommitOutcome {
        let verified = matches!(verify.await, Ok(ResultCode::Ok));
        if !verified {
            return if ctx.transition(TxnState::Open, TxnState::Aborted) {
                CommitOutcome::VerifyFail
            } else {
                CommitOutcome::VerifyFailAbortAbandoned
            };
        }
        ctx.transition(TxnState::Open, TxnState::Verified);

        match mark_roll_forward.await {
            Ok(ResultCode::Ok) | Ok(ResultCode::BinExistsError) => {}
            Ok(ResultCode::MrtAborted) => {
                ctx.clear_in_doubt();
                ctx.transition(TxnState::Verified, TxnState::Aborted);
                return CommitOutcome::Aborted;
            }
            _ => return CommitOutcome::MarkRollForwardAbandoned,
        }

        // From here the server will complete the commit even if our own cleanup
        // fails downstream, so the state moves to Committed now.
        ctx.transition(TxnState::Verified, TxnState::Committed);

        if roll_forward.await.is_err() {
            return CommitOutcome::RollForwardAbandoned;
        }
        if close_monitor.await.is_err() {
            return CommitOutcome::CloseAbandoned;
        }
        CommitOutcome::Ok
    }

    pub async fn abort(
        ctx: &MrtContext,
        roll_back: RollStep<'_>,
        close_monitor: RollStep<'_>,
    ) -> AbortOutcome {
        if roll_back.await.is_err() {
            return AbortOutcome::RollBackFailed;
        }
        let from = ctx.state();
        ctx.transition(from, TxnState::Aborted);
        if close_monitor.await.is_err() {
            return AbortOutcome::CloseAbandoned;
        }
        AbortOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn ok() -> RollStep<'static> {
        Box::pin(async { Ok(ResultCode::Ok) })
    }

    fn fails() -> RollStep<'static> {
        Box::pin(async { Err(Error::network("127.0.0.1:3000".parse().unwrap(), "closed")) })
    }

    fn returns(code: ResultCode) -> RollStep<'static> {
        Box::pin(async move { Ok(code) })
    }

    #[tokio::test]
    async fn a_full_commit_reaches_ok_and_committed_state() {
        let ctx = MrtContext::new([0u8; 20]);
        let outcome = TxnRollCoordinator::commit(&ctx, ok(), ok(), ok(), ok()).await;
        assert_eq!(outcome, CommitOutcome::Ok);
        assert!(outcome.is_committed());
        assert_eq!(ctx.state(), TxnState::Committed);
    }

    #[tokio::test]
    async fn failed_verify_aborts_the_transaction() {
        let ctx = MrtContext::new([0u8; 20]);
        let outcome =
            TxnRollCoordinator::commit(&ctx, returns(ResultCode::TxnFailed), ok(), ok(), ok()).await;
        assert_eq!(outcome, CommitOutcome::VerifyFail);
        assert!(!outcome.is_committed());
        assert_eq!(ctx.state(), TxnState::Aborted);
    }

    #[tokio::test]
    async fn bin_exists_error_on_mark_roll_forward_is_idempotent_success() {
        let ctx = MrtContext::new([0u8; 20]);
        let outcome = TxnRollCoordinator::commit(
            &ctx,
            ok(),
            returns(ResultCode::BinExistsError),
            ok(),
            ok(),
        )
        .await;
        assert_eq!(outcome, CommitOutcome::Ok);
    }

    #[tokio::test]
    async fn mrt_aborted_during_mark_roll_forward_clears_in_doubt() {
        let ctx = MrtContext::new([0u8; 20]);
        ctx.mark_in_doubt();
        let outcome =
            TxnRollCoordinator::commit(&ctx, ok(), returns(ResultCode::MrtAborted), ok(), ok())
                .await;
        assert_eq!(outcome, CommitOutcome::Aborted);
        assert!(!ctx.is_in_doubt());
        assert_eq!(ctx.state(), TxnState::Aborted);
    }

    #[tokio::test]
    async fn roll_forward_failure_after_successful_mark_is_still_a_commit() {
        let ctx = MrtContext::new([0u8; 20]);
        let outcome = TxnRollCoordinator::commit(&ctx, ok(), ok(), fails(), ok()).await;
        assert_eq!(outcome, CommitOutcome::RollForwardAbandoned);
        assert!(outcome.is_committed());
        assert_eq!(ctx.state(), TxnState::Committed);
    }

    #[tokio::test]
    async fn abort_sequence_reaches_aborted_state() {
        let ctx = MrtContext::new([0u8; 20]);
        let outcome = TxnRollCoordinator::abort(&ctx, ok(), ok()).await;
        assert_eq!(outcome, AbortOutcome::Ok);
        assert_eq!(ctx.state(), TxnState::Aborted);
    }

    #[test]
    fn on_write_in_doubt_records_the_key_and_flips_the_flag() {
        let ctx = MrtContext::new([0u8; 20]);
        assert!(!ctx.is_in_doubt());
        ctx.on_write_in_doubt([7u8; 20]);
        assert!(ctx.is_in_doubt());
        assert_eq!(ctx.write_keys(), vec![[7u8; 20]]);
    }

    #[tokio::test]
    async fn abort_roll_back_failure_does_not_touch_state() {
        let ctx = MrtContext::new([0u8; 20]);
        let outcome = TxnRollCoordinator::abort(&ctx, fails(), ok()).await;
        assert_eq!(outcome, AbortOutcome::RollBackFailed);
        assert_eq!(ctx.state(), TxnState::Open);
    }
}
