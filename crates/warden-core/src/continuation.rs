use crate::session::{ReadResult, SessionStore};
use crate::types::Verdict;
use crate::workflow::WorkflowRegistry;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuationDecision {
    pub verdict: Verdict,
    pub reason: String,
    /// Instruction for the agent when it may keep going.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_continuations: Option<i64>,
}

impl ContinuationDecision {
    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Ask,
            reason: reason.into(),
            prompt: None,
            continuation_count: None,
            max_continuations: None,
        }
    }
}

enum Gate {
    Done,
    NoBudget,
    /// The counter cannot grow any further.
    Saturated,
    Counted,
}

/// Decides, at each checkpoint, whether an autonomous session may resume.
///
/// The counter only grows: once a session passes its cap it halts at every
/// later checkpoint until the record is reset.
pub struct ContinuationArbiter {
    store: Arc<dyn SessionStore>,
    registry: Arc<WorkflowRegistry>,
}

impl ContinuationArbiter {
    pub fn new(store: Arc<dyn SessionStore>, registry: Arc<WorkflowRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn should_continue(&self, session_id: &str) -> ContinuationDecision {
        match self.store.read(session_id) {
            ReadResult::Ok(_) => {}
            ReadResult::NotFound => return ContinuationDecision::halt("no session state"),
            ReadResult::Corrupt(reason) => {
                tracing::warn!(session = session_id, reason = %reason, "corrupt session state");
                return ContinuationDecision::halt(format!("corrupt session state: {reason}"));
            }
        }

        // The gate is decided inside the update so check and increment see
        // the same record.
        let mut gate = Gate::Counted;
        let result = self.store.update(session_id, &mut |state| {
            if state.is_done() {
                gate = Gate::Done;
                return false;
            }
            if state.max_continuations <= 0 {
                gate = Gate::NoBudget;
                return false;
            }
            match state.continuation_count.checked_add(1) {
                Some(next) => {
                    gate = Gate::Counted;
                    state.continuation_count = next;
                    true
                }
                None => {
                    gate = Gate::Saturated;
                    false
                }
            }
        });

        let state = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "continuation update failed");
                return ContinuationDecision::halt(format!("session state unavailable: {e}"));
            }
        };

        let mut decision = ContinuationDecision {
            verdict: Verdict::Ask,
            reason: String::new(),
            prompt: None,
            continuation_count: Some(state.continuation_count),
            max_continuations: Some(state.max_continuations),
        };

        match gate {
            Gate::Done => decision.reason = "workflow complete".to_string(),
            Gate::NoBudget => {
                decision.reason = format!(
                    "max_continuations is {}; unattended continuation disabled",
                    state.max_continuations
                )
            }
            Gate::Saturated => {
                decision.reason = format!(
                    "continuation counter saturated ({}/{})",
                    state.continuation_count, state.max_continuations
                )
            }
            Gate::Counted if state.continuation_count <= state.max_continuations => {
                decision.verdict = Verdict::Allow;
                decision.reason = format!(
                    "continuation {}/{} in phase {}",
                    state.continuation_count, state.max_continuations, state.phase
                );
                decision.prompt = self.registry.continuation_prompt(
                    &state.workflow_id,
                    &state.phase,
                    state.issue_id.as_deref(),
                );
            }
            Gate::Counted => {
                decision.reason = format!(
                    "continuation limit reached ({}/{})",
                    state.continuation_count, state.max_continuations
                )
            }
        }

        tracing::info!(
            session = session_id,
            verdict = %decision.verdict,
            count = state.continuation_count,
            max = state.max_continuations,
            "continuation checkpoint"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionStore, SessionState};
    use crate::workflow::{default_workflows, DONE};

    fn arbiter_with(state: Option<SessionState>) -> (ContinuationArbiter, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        if let Some(s) = state {
            store.write(&s.session_id.clone(), &s).unwrap();
        }
        let registry = Arc::new(WorkflowRegistry::compile(&default_workflows()));
        (ContinuationArbiter::new(store.clone(), registry), store)
    }

    fn state(count: i64, max: i64) -> SessionState {
        let mut s = SessionState::new("s1", "impl", "building", max);
        s.continuation_count = count;
        s
    }

    #[test]
    fn nine_of_ten_continues_once_then_halts() {
        let (arb, store) = arbiter_with(Some(state(9, 10)));

        let first = arb.should_continue("s1");
        assert_eq!(first.verdict, Verdict::Allow);
        assert_eq!(first.continuation_count, Some(10));
        assert!(first.prompt.is_some());

        let second = arb.should_continue("s1");
        assert_eq!(second.verdict, Verdict::Ask);
        assert_eq!(second.continuation_count, Some(11));
        assert_eq!(store.read("s1").ok().unwrap().continuation_count, 11);
    }

    #[test]
    fn allows_exactly_up_to_cap() {
        for cap in 1..=4 {
            for start in 0..=cap + 1 {
                let (arb, _) = arbiter_with(Some(state(start, cap)));
                let mut count = start;
                for _ in 0..3 {
                    count += 1;
                    let d = arb.should_continue("s1");
                    let expected = if count <= cap {
                        Verdict::Allow
                    } else {
                        Verdict::Ask
                    };
                    assert_eq!(d.verdict, expected, "cap={cap} start={start} count={count}");
                }
            }
        }
    }

    #[test]
    fn once_halted_never_allows_again() {
        let (arb, _) = arbiter_with(Some(state(10, 10)));
        for _ in 0..5 {
            assert_eq!(arb.should_continue("s1").verdict, Verdict::Ask);
        }
    }

    #[test]
    fn done_halts_with_headroom() {
        let mut s = state(0, 10);
        s.phase = DONE.to_string();
        let (arb, store) = arbiter_with(Some(s));
        let d = arb.should_continue("s1");
        assert_eq!(d.verdict, Verdict::Ask);
        assert_eq!(d.reason, "workflow complete");
        // Not counted.
        assert_eq!(store.read("s1").ok().unwrap().continuation_count, 0);
    }

    #[test]
    fn non_positive_cap_halts_immediately() {
        for cap in [0, -1] {
            let (arb, store) = arbiter_with(Some(state(0, cap)));
            assert_eq!(arb.should_continue("s1").verdict, Verdict::Ask);
            assert_eq!(store.read("s1").ok().unwrap().continuation_count, 0);
        }
    }

    #[test]
    fn missing_state_halts() {
        let (arb, _) = arbiter_with(None);
        let d = arb.should_continue("s1");
        assert_eq!(d.verdict, Verdict::Ask);
        assert_eq!(d.continuation_count, None);
    }

    #[test]
    fn invalid_session_id_halts() {
        let (arb, _) = arbiter_with(None);
        assert_eq!(arb.should_continue("../x").verdict, Verdict::Ask);
    }

    #[test]
    fn saturated_counter_halts_without_writing() {
        let (arb, store) = arbiter_with(Some(state(i64::MAX, 10)));
        let d = arb.should_continue("s1");
        assert_eq!(d.verdict, Verdict::Ask);
        assert_eq!(d.continuation_count, Some(i64::MAX));
        assert!(d.reason.contains("saturated"));
        assert_eq!(store.read("s1").ok().unwrap().continuation_count, i64::MAX);

        let (arb, _) = arbiter_with(Some(state(i64::MAX, i64::MAX)));
        assert_eq!(arb.should_continue("s1").verdict, Verdict::Ask);
    }

    #[test]
    fn prompt_names_issue() {
        let s = state(0, 3).with_issue(Some("ENG-9".into()));
        let (arb, _) = arbiter_with(Some(s));
        let d = arb.should_continue("s1");
        assert!(d.prompt.unwrap().contains("ENG-9"));
    }
}
