//! `FlowContext`: per-request state threaded through one `execute` call
//! chain. Grounded on the teacher's `NodeContext` (per-invocation identity
//! plus an event-emitter handle) generalized to the coarser per-*request*
//! granularity the spec requires — one `FlowContext` per `FlowHost::execute`
//! call, not one per node.
//!
//! # Lifecycle
//! Created by the caller, consumed by exactly one `execute` call chain, and
//! not safe for reuse across requests — node outcomes, the memo table, and
//! the explain accumulator are all write-once-per-slot state that only
//! makes sense for a single walk over a single plan.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::config::snapshot::ConfigSnapshot;
use crate::explain::{ExecExplain, ExecExplainBuilder, ExecExplainSink};
use crate::outcome::Outcome;
use crate::typed::AnyBox;

/// Caller-supplied request shaping: experiment variants, the requesting
/// user, and free-form attributes available to selectors/modules.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// `layer -> variant`.
    pub variants: BTreeMap<String, String>,
    pub user_id: Option<String>,
    pub request_attributes: Value,
}

/// A single request-scoped memo slot: either a future the first caller is
/// still computing (others await it — the "single-flight" primitive from
/// the design notes) or a completed, reusable outcome.
enum MemoSlot {
    Pending(tokio::sync::broadcast::Sender<Outcome<AnyBox>>),
    Done(Outcome<AnyBox>),
}

/// Per-request state: cancellation, deadline, request options, the
/// node-outcome table, the optional `ExecExplain` accumulator, the
/// per-request memo table, and a config-snapshot cache.
pub struct FlowContext {
    pub cancellation: CancellationToken,
    pub deadline: Instant,
    pub request_options: RequestOptions,
    node_outcomes: RwLock<Vec<Outcome<AnyBox>>>,
    node_index: FxHashMap<String, usize>,
    pub explain: Option<ExecExplainSink>,
    memo: Mutex<FxHashMap<(String, String, String), MemoSlot>>,
    config_snapshot: Mutex<Option<ConfigSnapshot>>,
    finalized_explain: Mutex<Option<ExecExplain>>,
}

impl FlowContext {
    /// Build a fresh context for a plan with `node_count` nodes and the
    /// given `node_index` (`name -> position`), matching the plan this
    /// context will be used to execute.
    ///
    /// # Panics
    /// Panics if `deadline` is the zero instant of a context built without
    /// ever advancing a clock — callers should use `Instant::now() +
    /// duration`; a missing deadline is a structural error surfaced by
    /// [`crate::host::FlowHost::execute`], not by this constructor, since
    /// `Instant` has no representable "zero".
    pub fn new(
        node_count: usize,
        node_index: FxHashMap<String, usize>,
        deadline: Instant,
        cancellation: CancellationToken,
        request_options: RequestOptions,
        explain_enabled: bool,
    ) -> Self {
        Self {
            cancellation,
            deadline,
            request_options,
            node_outcomes: RwLock::new(vec![Outcome::Unspecified; node_count]),
            node_index,
            explain: explain_enabled.then(|| ExecExplainSink::new(Mutex::new(ExecExplainBuilder::default()))),
            memo: Mutex::new(FxHashMap::default()),
            config_snapshot: Mutex::new(None),
            finalized_explain: Mutex::new(None),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn record_node_outcome(&self, index: usize, outcome: Outcome<AnyBox>) {
        self.node_outcomes.write()[index] = outcome;
    }

    pub fn node_outcome(&self, index: usize) -> Outcome<AnyBox> {
        self.node_outcomes.read()[index].clone()
    }

    /// Look up a node's outcome by name, for join functions that read
    /// prior non-stage-step outcomes by name rather than by index.
    pub fn try_get_node_outcome(&self, name: &str) -> Option<Outcome<AnyBox>> {
        self.node_index.get(name).map(|&i| self.node_outcome(i))
    }

    /// Cache a fetched [`ConfigSnapshot`] on this context so that nested
    /// calls within the same request see the same version (§4.6 step 2).
    pub fn cached_config_snapshot(&self) -> Option<ConfigSnapshot> {
        self.config_snapshot.lock().clone()
    }

    pub fn cache_config_snapshot(&self, snapshot: ConfigSnapshot) {
        *self.config_snapshot.lock() = Some(snapshot);
    }

    /// Store the finished [`ExecExplain`] for this request, called once by
    /// [`crate::host::FlowHost::execute`] after the plan walk completes.
    pub fn publish_explain(&self, explain: ExecExplain) {
        *self.finalized_explain.lock() = Some(explain);
    }

    /// Take the finalized explain record, if recording was enabled and the
    /// flow has finished.
    pub fn take_explain(&self) -> Option<ExecExplain> {
        self.finalized_explain.lock().take()
    }

    /// Begin (or join) a memoized stage-module execution for
    /// `(flow, stage, memo_key)`. Returns `Ok(None)` when this caller must
    /// execute the module and publish the result via
    /// [`Self::publish_memo`]; returns `Ok(Some(outcome))` on a cache hit
    /// or a shared wait on a concurrent in-flight execution.
    pub async fn memo_acquire(
        &self,
        flow: &str,
        stage: &str,
        memo_key: &str,
    ) -> MemoAcquisition {
        let key = (flow.to_string(), stage.to_string(), memo_key.to_string());
        let mut rx = {
            let mut table = self.memo.lock();
            match table.get(&key) {
                Some(MemoSlot::Done(outcome)) => return MemoAcquisition::Hit(outcome.clone()),
                Some(MemoSlot::Pending(tx)) => tx.subscribe(),
                None => {
                    let (tx, _rx) = tokio::sync::broadcast::channel(1);
                    let rx = tx.subscribe();
                    table.insert(key, MemoSlot::Pending(tx));
                    return MemoAcquisition::Lead(rx);
                }
            }
        };
        match rx.recv().await {
            Ok(outcome) => MemoAcquisition::Hit(outcome),
            Err(_) => MemoAcquisition::LeadFailed,
        }
    }

    /// Publish a completed outcome for a memo key this caller was leading.
    pub fn publish_memo(&self, flow: &str, stage: &str, memo_key: &str, outcome: Outcome<AnyBox>) {
        let key = (flow.to_string(), stage.to_string(), memo_key.to_string());
        let mut table = self.memo.lock();
        if let Some(MemoSlot::Pending(tx)) = table.get(&key) {
            let _ = tx.send(outcome.clone());
        }
        table.insert(key, MemoSlot::Done(outcome));
    }
}

/// Outcome of [`FlowContext::memo_acquire`].
pub enum MemoAcquisition {
    /// A cached or concurrently-resolved outcome; the module must not run.
    Hit(Outcome<AnyBox>),
    /// This caller must execute the module and call
    /// [`FlowContext::publish_memo`] when done.
    Lead(tokio::sync::broadcast::Receiver<Outcome<AnyBox>>),
    /// The leader dropped its sender without publishing (panicked); the
    /// caller should treat this as a cache miss and execute itself.
    LeadFailed,
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn memo_single_flight_second_caller_sees_leader_result() {
        let ctx = test_support::fixture_context();
        match ctx.memo_acquire("f", "s", "k").await {
            MemoAcquisition::Lead(_) => {}
            _ => panic!("expected to lead"),
        }
        // A concurrent caller joins the same pending slot.
        let ctx_ref = &ctx;
        let follower = async {
            match ctx_ref.memo_acquire("f", "s", "k").await {
                MemoAcquisition::Lead(mut rx) => rx.recv().await.ok(),
                MemoAcquisition::Hit(o) => Some(o),
                MemoAcquisition::LeadFailed => None,
            }
        };
        let publish = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx_ref.publish_memo("f", "s", "k", Outcome::ok(crate::typed::box_value(7u32)));
        };
        let (follower_result, _) = tokio::join!(follower, publish);
        assert!(follower_result.is_some());

        match ctx.memo_acquire("f", "s", "k").await {
            MemoAcquisition::Hit(_) => {}
            _ => panic!("expected a cache hit after publish"),
        }
    }
}
