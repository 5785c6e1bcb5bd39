//! core::ops::work
//!
//! The lock manager: scheduling rules, the workspace lock, and unprotected
//! windows.
//!
//! # Architecture
//!
//! Two layers of mutual exclusion cooperate:
//!
//! 1. **Scheduling rules.** A thread must hold a rule covering everything
//!    it touches. Acquiring a top-level rule blocks until no *other* thread
//!    holds a conflicting rule. A thread that already holds rules may only
//!    acquire a rule its innermost held rule contains; anything else is a
//!    fatal nesting error, reported immediately instead of risking a
//!    deadlock.
//! 2. **The workspace lock.** A reentrant exclusive lock taken after the
//!    rule and held for the rest of the operation. Tree edits happen only
//!    while holding it. An operation may drop it temporarily through an
//!    *unprotected window* (`begin_unprotected` / `end_unprotected`) to run
//!    hook code or filesystem I/O; other operations on disjoint rules can
//!    make progress meanwhile.
//!
//! Thread identity, rule stacks, operation depth and the saved lock depth
//! are explicit fields of per-thread [`ThreadFrame`]s, not thread-locals.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --prepare(rule)--> Prepared --begin--> Active --end(rule)--> Idle
//!                                               |  ^
//!                               begin_unprotected  end_unprotected(depth)
//! ```
//!
//! # Invariants
//!
//! - Two threads never hold conflicting rules at the same time
//! - Nested rules are always contained in the innermost held rule
//! - The workspace lock is held by at most one thread
//! - `end` releases exactly what the matching `prepare` acquired

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;
use uuid::Uuid;

use crate::core::progress::Progress;
use crate::core::rule::SchedulingRule;

/// Default interval at which a blocked acquisition re-checks cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from the lock manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The requested rule is not contained in the rule the thread holds.
    #[error("cannot acquire rule {requested} while holding {held}: nested rules must narrow scope")]
    IllegalNesting { held: String, requested: String },

    /// `end` was called with a different rule than the innermost held one.
    #[error("rule mismatch on end: expected {expected}, got {actual}")]
    RuleMismatch { expected: String, actual: String },

    /// A lifecycle call arrived outside an operation, or out of order.
    #[error("illegal lock state: {0}")]
    IllegalState(String),

    /// The caller cancelled while waiting.
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),
}

/// Unique identifier of an outermost operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpId(String);

impl OpId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a thread is in the operation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpPhase {
    Idle,
    Prepared,
    Active,
}

/// Per-thread bookkeeping.
#[derive(Debug)]
struct ThreadFrame {
    rules: Vec<SchedulingRule>,
    operation_depth: usize,
    phase: OpPhase,
    op_id: Option<OpId>,
    /// A filesystem side effect happened during the outermost operation.
    fs_touched: bool,
    /// Cancellation was observed during the outermost operation.
    cancelled: bool,
    /// Open unprotected windows.
    unprotected: usize,
}

impl ThreadFrame {
    fn new() -> Self {
        Self {
            rules: Vec::new(),
            operation_depth: 0,
            phase: OpPhase::Idle,
            op_id: None,
            fs_touched: false,
            cancelled: false,
            unprotected: 0,
        }
    }

    fn is_idle(&self) -> bool {
        self.rules.is_empty() && self.operation_depth == 0 && self.unprotected == 0
    }
}

#[derive(Debug, Default)]
struct LockState {
    threads: HashMap<ThreadId, ThreadFrame>,
    owner: Option<ThreadId>,
    owner_depth: usize,
}

impl LockState {
    fn conflicts_with_others(&self, me: ThreadId, rule: &SchedulingRule) -> Option<SchedulingRule> {
        self.threads
            .iter()
            .filter(|(id, _)| **id != me)
            .flat_map(|(_, frame)| frame.rules.iter())
            .find(|held| held.is_conflicting(rule))
            .cloned()
    }

    fn frame(&mut self, me: ThreadId) -> &mut ThreadFrame {
        self.threads.entry(me).or_insert_with(ThreadFrame::new)
    }

    fn drop_if_idle(&mut self, me: ThreadId) {
        if self.threads.get(&me).is_some_and(ThreadFrame::is_idle) {
            self.threads.remove(&me);
        }
    }
}

/// What an `end` call released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameExit {
    /// The outermost operation on this thread just ended.
    pub outermost: bool,
    pub fs_touched: bool,
    pub cancelled: bool,
    pub op_id: Option<OpId>,
}

/// What `prepare` acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Operation nesting depth on this thread, 1 for the outermost.
    pub depth: usize,
    pub op_id: OpId,
}

/// Coordinates scheduling rules and the workspace lock for all threads.
#[derive(Debug)]
pub struct LockManager {
    state: Mutex<LockState>,
    changed: Condvar,
    poll_interval: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl LockManager {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
            poll_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, LockState>) -> MutexGuard<'a, LockState> {
        match self.changed.wait_timeout(guard, self.poll_interval) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    // =========================================================================
    // Scheduling rules
    // =========================================================================

    /// Acquire `rule` for the calling thread.
    ///
    /// Blocks while another thread holds a conflicting rule. Nested calls
    /// never block; they fail with [`LockError::IllegalNesting`] unless the
    /// innermost held rule contains `rule`.
    pub fn begin_rule(&self, rule: &SchedulingRule, progress: &Progress) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock();

        if let Some(held) = state.threads.get(&me).and_then(|f| f.rules.last()) {
            if !held.contains(rule) {
                return Err(LockError::IllegalNesting {
                    held: held.to_string(),
                    requested: rule.to_string(),
                });
            }
            state.frame(me).rules.push(rule.clone());
            trace!("nested rule {rule} acquired");
            return Ok(());
        }

        loop {
            match state.conflicts_with_others(me, rule) {
                None => break,
                Some(blocker) => {
                    if progress.is_cancelled() {
                        state.drop_if_idle(me);
                        return Err(LockError::Cancelled(format!("rule {rule}")));
                    }
                    trace!("rule {rule} blocked by {blocker}");
                    state = self.wait(state);
                }
            }
        }
        state.frame(me).rules.push(rule.clone());
        debug!("rule {rule} acquired");
        Ok(())
    }

    /// Release the innermost rule, which must equal `rule`.
    pub fn end_rule(&self, rule: &SchedulingRule) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock();
        let frame = state
            .threads
            .get_mut(&me)
            .ok_or_else(|| LockError::IllegalState(format!("end_rule({rule}) without a held rule")))?;
        match frame.rules.last() {
            Some(top) if top == rule => {
                frame.rules.pop();
            }
            Some(top) => {
                return Err(LockError::RuleMismatch {
                    expected: top.to_string(),
                    actual: rule.to_string(),
                })
            }
            None => {
                return Err(LockError::IllegalState(format!(
                    "end_rule({rule}) without a held rule"
                )))
            }
        }
        state.drop_if_idle(me);
        drop(state);
        self.changed.notify_all();
        trace!("rule {rule} released");
        Ok(())
    }

    /// Rules held by the calling thread, outermost first.
    pub fn held_rules(&self) -> Vec<SchedulingRule> {
        let me = thread::current().id();
        self.lock()
            .threads
            .get(&me)
            .map(|f| f.rules.clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Workspace lock
    // =========================================================================

    /// Take the workspace lock (reentrant).
    pub fn acquire_workspace_lock(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            state = self.wait(state);
        }
        state.owner = Some(me);
        state.owner_depth += 1;
    }

    /// Release one level of the workspace lock.
    pub fn release_workspace_lock(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock();
        if state.owner != Some(me) {
            return Err(LockError::IllegalState(
                "workspace lock released by a thread that does not own it".into(),
            ));
        }
        state.owner_depth -= 1;
        if state.owner_depth == 0 {
            state.owner = None;
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    pub fn is_lock_owner(&self) -> bool {
        self.lock().owner == Some(thread::current().id())
    }

    // =========================================================================
    // Operation lifecycle
    // =========================================================================

    /// Idle -> Prepared: acquire `rule`, then the workspace lock.
    ///
    /// Checks cancellation first and while blocked. On any failure nothing
    /// stays acquired.
    pub fn prepare(&self, rule: &SchedulingRule, progress: &Progress) -> Result<Prepared, LockError> {
        if progress.is_cancelled() {
            return Err(LockError::Cancelled(format!("rule {rule}")));
        }
        self.begin_rule(rule, progress)?;
        self.acquire_workspace_lock();

        let me = thread::current().id();
        let mut state = self.lock();
        let frame = state.frame(me);
        frame.operation_depth += 1;
        if frame.operation_depth == 1 {
            frame.op_id = Some(OpId::new());
            frame.fs_touched = false;
            frame.cancelled = false;
        }
        frame.phase = OpPhase::Prepared;
        let prepared = Prepared {
            depth: frame.operation_depth,
            op_id: frame.op_id.clone().unwrap_or_default(),
        };
        debug!(
            "prepared {} (depth {}) under {rule}",
            prepared.op_id, prepared.depth
        );
        Ok(prepared)
    }

    /// Prepared -> Active.
    pub fn begin(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock();
        let owner = state.owner;
        let frame = state
            .threads
            .get_mut(&me)
            .filter(|f| f.operation_depth > 0)
            .ok_or_else(|| LockError::IllegalState("begin outside an operation".into()))?;
        if owner != Some(me) {
            return Err(LockError::IllegalState(
                "begin without holding the workspace lock".into(),
            ));
        }
        frame.phase = OpPhase::Active;
        Ok(())
    }

    /// Drop the workspace lock for an unprotected window.
    ///
    /// Returns the lock depth to hand back to [`LockManager::end_unprotected`].
    /// Rules stay held, so nothing conflicting can start meanwhile.
    pub fn begin_unprotected(&self) -> Result<usize, LockError> {
        let me = thread::current().id();
        let mut state = self.lock();
        if state.owner != Some(me) {
            return Err(LockError::IllegalState(
                "begin_unprotected without holding the workspace lock".into(),
            ));
        }
        let depth = state.owner_depth;
        state.owner = None;
        state.owner_depth = 0;
        state.frame(me).unprotected += 1;
        drop(state);
        self.changed.notify_all();
        trace!("unprotected window opened (lock depth {depth})");
        Ok(depth)
    }

    /// Re-acquire the workspace lock at the depth saved by `begin_unprotected`.
    pub fn end_unprotected(&self, depth: usize) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock();
        if state.threads.get(&me).map_or(0, |f| f.unprotected) == 0 {
            return Err(LockError::IllegalState(
                "end_unprotected without an open window".into(),
            ));
        }
        while state.owner.is_some_and(|owner| owner != me) {
            state = self.wait(state);
        }
        state.owner = Some(me);
        state.owner_depth += depth;
        state.frame(me).unprotected -= 1;
        trace!("unprotected window closed (lock depth {depth})");
        Ok(())
    }

    /// Record that the current operation performed a filesystem side effect.
    pub fn mark_fs_touched(&self) {
        let me = thread::current().id();
        if let Some(frame) = self.lock().threads.get_mut(&me) {
            frame.fs_touched = true;
        }
    }

    /// Record that the current operation observed cancellation.
    pub fn mark_cancelled(&self) {
        let me = thread::current().id();
        if let Some(frame) = self.lock().threads.get_mut(&me) {
            frame.cancelled = true;
        }
    }

    /// Active -> Idle (or back to the enclosing operation's phase).
    ///
    /// Releases one workspace lock level and the innermost rule.
    pub fn end(&self, rule: &SchedulingRule) -> Result<FrameExit, LockError> {
        self.end_with(rule, |_| ()).map(|(exit, ())| exit)
    }

    /// Like [`LockManager::end`], but runs `on_exit` first, while the
    /// workspace lock and the rule are still held.
    ///
    /// The outermost frame uses this to commit or discard its tree edits
    /// before anyone else can observe them.
    pub fn end_with<T>(
        &self,
        rule: &SchedulingRule,
        on_exit: impl FnOnce(&FrameExit) -> T,
    ) -> Result<(FrameExit, T), LockError> {
        let me = thread::current().id();
        let exit = {
            let mut state = self.lock();
            let owner = state.owner;
            let frame = state
                .threads
                .get_mut(&me)
                .filter(|f| f.operation_depth > 0)
                .ok_or_else(|| LockError::IllegalState("end outside an operation".into()))?;
            if owner != Some(me) {
                return Err(LockError::IllegalState(
                    "end without holding the workspace lock".into(),
                ));
            }
            frame.operation_depth -= 1;
            let outermost = frame.operation_depth == 0;
            let exit = FrameExit {
                outermost,
                fs_touched: frame.fs_touched,
                cancelled: frame.cancelled,
                op_id: frame.op_id.clone(),
            };
            if outermost {
                frame.phase = OpPhase::Idle;
                frame.op_id = None;
            } else {
                frame.phase = OpPhase::Active;
            }
            exit
        };
        let value = on_exit(&exit);
        let released = self.release_workspace_lock();
        self.end_rule(rule)?;
        released?;
        debug!(
            "ended {} under {rule} (outermost: {})",
            exit.op_id.as_ref().map(OpId::as_str).unwrap_or("-"),
            exit.outermost
        );
        Ok((exit, value))
    }

    /// Whether the calling thread is inside an operation.
    pub fn in_operation(&self) -> bool {
        let me = thread::current().id();
        self.lock()
            .threads
            .get(&me)
            .is_some_and(|f| f.operation_depth > 0)
    }

    /// The calling thread's lifecycle phase.
    pub fn phase(&self) -> OpPhase {
        let me = thread::current().id();
        self.lock()
            .threads
            .get(&me)
            .map_or(OpPhase::Idle, |f| f.phase)
    }

    /// The calling thread's current operation id, if any.
    pub fn current_op(&self) -> Option<OpId> {
        let me = thread::current().id();
        self.lock().threads.get(&me).and_then(|f| f.op_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::ResourcePath;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};

    fn r(path: &str) -> SchedulingRule {
        SchedulingRule::resource(ResourcePath::parse(path).unwrap())
    }

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(Duration::from_millis(5)))
    }

    mod rules {
        use super::*;

        #[test]
        fn nested_narrowing_allowed() {
            let locks = manager();
            let progress = Progress::new();
            locks.begin_rule(&r("/p"), &progress).unwrap();
            locks.begin_rule(&r("/p/a"), &progress).unwrap();
            assert_eq!(locks.held_rules(), vec![r("/p"), r("/p/a")]);
            locks.end_rule(&r("/p/a")).unwrap();
            locks.end_rule(&r("/p")).unwrap();
            assert!(locks.held_rules().is_empty());
        }

        #[test]
        fn nested_widening_is_fatal() {
            let locks = manager();
            let progress = Progress::new();
            locks.begin_rule(&r("/p/a"), &progress).unwrap();
            let err = locks.begin_rule(&r("/p"), &progress).unwrap_err();
            assert!(matches!(err, LockError::IllegalNesting { .. }));
            locks.end_rule(&r("/p/a")).unwrap();
        }

        #[test]
        fn notify_nests_inside_anything() {
            let locks = manager();
            let progress = Progress::new();
            locks.begin_rule(&r("/p/a"), &progress).unwrap();
            locks.begin_rule(&SchedulingRule::Notify, &progress).unwrap();
            locks.end_rule(&SchedulingRule::Notify).unwrap();
            locks.end_rule(&r("/p/a")).unwrap();
        }

        #[test]
        fn end_rule_mismatch_reported() {
            let locks = manager();
            let progress = Progress::new();
            locks.begin_rule(&r("/p"), &progress).unwrap();
            let err = locks.end_rule(&r("/q")).unwrap_err();
            assert!(matches!(err, LockError::RuleMismatch { .. }));
            locks.end_rule(&r("/p")).unwrap();
        }

        #[test]
        fn disjoint_rules_run_concurrently() {
            let locks = manager();
            let progress = Progress::new();
            locks.begin_rule(&r("/p"), &progress).unwrap();

            let other = Arc::clone(&locks);
            let handle = thread::spawn(move || {
                let progress = Progress::new();
                other.begin_rule(&r("/q"), &progress).unwrap();
                other.end_rule(&r("/q")).unwrap();
            });
            handle.join().unwrap();
            locks.end_rule(&r("/p")).unwrap();
        }

        #[test]
        fn conflicting_rule_blocks_until_released() {
            let locks = manager();
            let progress = Progress::new();
            locks.begin_rule(&r("/p"), &progress).unwrap();

            let acquired = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel();
            let other = Arc::clone(&locks);
            let flag = Arc::clone(&acquired);
            let handle = thread::spawn(move || {
                tx.send(()).unwrap();
                other.begin_rule(&r("/p/a"), &Progress::new()).unwrap();
                flag.store(true, Ordering::SeqCst);
                other.end_rule(&r("/p/a")).unwrap();
            });
            rx.recv().unwrap();
            thread::sleep(Duration::from_millis(30));
            assert!(!acquired.load(Ordering::SeqCst));

            locks.end_rule(&r("/p")).unwrap();
            handle.join().unwrap();
            assert!(acquired.load(Ordering::SeqCst));
        }

        #[test]
        fn blocked_acquire_honors_cancellation() {
            let locks = manager();
            locks.begin_rule(&r("/p"), &Progress::new()).unwrap();

            let other = Arc::clone(&locks);
            let progress = Progress::new();
            let cancel = progress.clone();
            let handle = thread::spawn(move || other.begin_rule(&r("/p/x"), &progress));
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
            let result = handle.join().unwrap();
            assert!(matches!(result, Err(LockError::Cancelled(_))));
            locks.end_rule(&r("/p")).unwrap();
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn prepare_begin_end() {
            let locks = manager();
            let progress = Progress::new();
            assert_eq!(locks.current_op(), None);
            let prepared = locks.prepare(&r("/p"), &progress).unwrap();
            assert_eq!(prepared.depth, 1);
            assert_eq!(locks.current_op(), Some(prepared.op_id.clone()));
            assert_eq!(locks.phase(), OpPhase::Prepared);
            locks.begin().unwrap();
            assert_eq!(locks.phase(), OpPhase::Active);
            assert!(locks.is_lock_owner());

            let exit = locks.end(&r("/p")).unwrap();
            assert!(exit.outermost);
            assert_eq!(exit.op_id, Some(prepared.op_id));
            assert!(!locks.is_lock_owner());
            assert!(!locks.in_operation());
        }

        #[test]
        fn nested_operation_shares_op_id() {
            let locks = manager();
            let progress = Progress::new();
            let outer = locks.prepare(&r("/p"), &progress).unwrap();
            locks.begin().unwrap();
            let inner = locks.prepare(&r("/p/a"), &progress).unwrap();
            assert_eq!(inner.depth, 2);
            assert_eq!(inner.op_id, outer.op_id);
            locks.mark_fs_touched();
            let exit = locks.end(&r("/p/a")).unwrap();
            assert!(!exit.outermost);
            let exit = locks.end(&r("/p")).unwrap();
            assert!(exit.outermost);
            assert!(exit.fs_touched);
        }

        #[test]
        fn cancelled_before_prepare_acquires_nothing() {
            let locks = manager();
            let progress = Progress::new();
            progress.cancel();
            let err = locks.prepare(&r("/p"), &progress).unwrap_err();
            assert!(matches!(err, LockError::Cancelled(_)));
            assert!(locks.held_rules().is_empty());
            assert!(!locks.is_lock_owner());
        }

        #[test]
        fn begin_outside_operation_is_illegal() {
            let locks = manager();
            assert!(matches!(locks.begin(), Err(LockError::IllegalState(_))));
            assert!(matches!(
                locks.end(&r("/p")),
                Err(LockError::IllegalState(_))
            ));
        }

        #[test]
        fn unprotected_window_lets_disjoint_work_in() {
            let locks = manager();
            let progress = Progress::new();
            locks.prepare(&r("/p"), &progress).unwrap();
            locks.begin().unwrap();
            let depth = locks.begin_unprotected().unwrap();
            assert!(!locks.is_lock_owner());

            let other = Arc::clone(&locks);
            let handle = thread::spawn(move || {
                let progress = Progress::new();
                other.prepare(&r("/q"), &progress).unwrap();
                other.begin().unwrap();
                other.end(&r("/q")).unwrap();
            });
            handle.join().unwrap();

            locks.end_unprotected(depth).unwrap();
            assert!(locks.is_lock_owner());
            locks.end(&r("/p")).unwrap();
        }

        #[test]
        fn end_unprotected_without_window_is_illegal() {
            let locks = manager();
            locks.prepare(&r("/p"), &Progress::new()).unwrap();
            assert!(matches!(
                locks.end_unprotected(1),
                Err(LockError::IllegalState(_))
            ));
            locks.end(&r("/p")).unwrap();
        }
    }
}
