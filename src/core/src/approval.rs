//! Single-shot rendezvous between a suspended pipeline and a decision.
//!
//! An [`ApprovalGate`] is opened fresh for every invocation that needs a
//! human. Any number of [`GateResolver`] clones can be handed to the renderer
//! (click handler, keyboard shortcut, auto-approve policy); the first
//! `resolve` wins and every later call is a no-op that returns `false`.
//!
//! When every resolver is dropped without resolving (the transcript evicted
//! the message), the waiting side wakes up with the outcome's implicit
//! rejection instead of hanging forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use quill_protocol::{Decision, QuestionAnswer};
use tokio::sync::oneshot;

/// An outcome type a gate can resolve to.
pub trait GateOutcome: Send + 'static {
    /// Outcome used when the gate is abandoned or times out.
    fn implicit_rejection() -> Self;
}

impl GateOutcome for Decision {
    fn implicit_rejection() -> Self {
        Decision::Reject
    }
}

impl GateOutcome for QuestionAnswer {
    fn implicit_rejection() -> Self {
        QuestionAnswer::Dismissed
    }
}

pub struct GateResolver<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for GateResolver<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for GateResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateResolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T> GateResolver<T> {
    /// Resolve the gate. Returns `false` when it was already resolved or
    /// nobody is waiting any more.
    pub fn resolve(&self, outcome: T) -> bool {
        let sender = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

/// Identity of one gate that does not keep it alive.
pub struct GateId<T>(Weak<Mutex<Option<oneshot::Sender<T>>>>);

impl<T> GateId<T> {
    fn is(&self, resolver: &GateResolver<T>) -> bool {
        std::ptr::eq(Arc::as_ptr(&resolver.tx), self.0.as_ptr())
    }
}

pub struct ApprovalGate<T> {
    rx: oneshot::Receiver<T>,
    resolver: GateResolver<T>,
}

impl<T: GateOutcome> ApprovalGate<T> {
    pub fn open() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            rx,
            resolver: GateResolver {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
        }
    }

    pub fn resolver(&self) -> GateResolver<T> {
        self.resolver.clone()
    }

    pub fn id(&self) -> GateId<T> {
        GateId(Arc::downgrade(&self.resolver.tx))
    }

    /// Suspend until resolved. The gate's own resolver is released first so
    /// that only external holders keep the decision alive.
    pub async fn wait_for_decision(self) -> T {
        let Self { rx, resolver } = self;
        drop(resolver);
        rx.await.unwrap_or_else(|_| T::implicit_rejection())
    }

    /// Race the gate against a timer; expiry counts as the implicit rejection.
    pub async fn wait_with_timeout(self, timeout: Duration) -> T {
        match tokio::time::timeout(timeout, self.wait_for_decision()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::info!(timeout_secs = timeout.as_secs(), "approval gate timed out");
                T::implicit_rejection()
            }
        }
    }
}

enum PendingGate {
    Decision(GateResolver<Decision>),
    Question(GateResolver<QuestionAnswer>),
}

/// Pending gates keyed by tool call id, reachable from the renderer.
///
/// A call id holds at most one gate. Registering a second one for the same
/// id is refused so the first waiter keeps its resolver.
#[derive(Default)]
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<String, PendingGate>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self, call_id: &str, gate: PendingGate) -> bool {
        let Ok(mut map) = self.pending.lock() else {
            return false;
        };
        if map.contains_key(call_id) {
            tracing::warn!(%call_id, "gate already pending for tool call");
            return false;
        }
        map.insert(call_id.to_string(), gate);
        true
    }

    /// `false` when `call_id` already has a pending gate.
    pub fn register_decision(&self, call_id: &str, resolver: GateResolver<Decision>) -> bool {
        self.claim(call_id, PendingGate::Decision(resolver))
    }

    pub fn register_question(&self, call_id: &str, resolver: GateResolver<QuestionAnswer>) -> bool {
        self.claim(call_id, PendingGate::Question(resolver))
    }

    fn take(&self, call_id: &str, wanted: impl Fn(&PendingGate) -> bool) -> Option<PendingGate> {
        let mut map = self.pending.lock().ok()?;
        if !map.get(call_id).is_some_and(wanted) {
            return None;
        }
        map.remove(call_id)
    }

    /// `onApply` / `onReject` entry point. `false` for unknown or already
    /// decided calls.
    pub fn respond_approval(&self, call_id: &str, decision: Decision) -> bool {
        let Some(PendingGate::Decision(resolver)) =
            self.take(call_id, |gate| matches!(gate, PendingGate::Decision(_)))
        else {
            tracing::debug!(%call_id, ?decision, "approval response for unknown call");
            return false;
        };
        let ok = resolver.resolve(decision);
        tracing::info!(%call_id, ?decision, ok, "approval respond");
        ok
    }

    pub fn respond_question(&self, call_id: &str, answer: QuestionAnswer) -> bool {
        match self.take(call_id, |gate| matches!(gate, PendingGate::Question(_))) {
            Some(PendingGate::Question(resolver)) => resolver.resolve(answer),
            _ => false,
        }
    }

    /// Drop any resolver held for `call_id`, abandoning its gate.
    pub fn forget(&self, call_id: &str) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(call_id);
        }
    }

    /// Drop the entry for `call_id` only while it still belongs to gate `id`.
    pub fn release_decision(&self, call_id: &str, id: &GateId<Decision>) {
        self.take(call_id, |gate| matches!(gate, PendingGate::Decision(r) if id.is(r)));
    }

    pub fn release_question(&self, call_id: &str, id: &GateId<QuestionAnswer>) {
        self.take(call_id, |gate| matches!(gate, PendingGate::Question(r) if id.is(r)));
    }

    pub fn pending_calls(&self) -> Vec<String> {
        let mut calls: Vec<String> = self
            .pending
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        calls.sort();
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_resolution_wins() {
        let gate = ApprovalGate::<Decision>::open();
        let resolver = gate.resolver();
        let second = resolver.clone();
        assert!(resolver.resolve(Decision::Apply));
        assert!(!second.resolve(Decision::Reject));
        assert!(second.is_resolved());
        assert_eq!(gate.wait_for_decision().await, Decision::Apply);
    }

    #[tokio::test]
    async fn dropped_resolvers_mean_rejection() {
        let gate = ApprovalGate::<Decision>::open();
        let resolver = gate.resolver();
        drop(resolver);
        assert_eq!(gate.wait_for_decision().await, Decision::Reject);
    }

    #[tokio::test]
    async fn resolution_from_another_task() {
        let gate = ApprovalGate::<QuestionAnswer>::open();
        let resolver = gate.resolver();
        tokio::spawn(async move {
            resolver.resolve(QuestionAnswer::Answered { text: "blue".into() });
        });
        assert_eq!(
            gate.wait_for_decision().await,
            QuestionAnswer::Answered { text: "blue".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_an_implicit_reject() {
        let gate = ApprovalGate::<Decision>::open();
        let _held = gate.resolver();
        let outcome = gate.wait_with_timeout(Duration::from_secs(30)).await;
        assert_eq!(outcome, Decision::Reject);
    }

    #[tokio::test]
    async fn registry_routes_and_forgets() {
        let registry = ApprovalRegistry::new();
        let gate = ApprovalGate::<Decision>::open();
        registry.register_decision("call-1", gate.resolver());
        assert_eq!(registry.pending_calls(), vec!["call-1".to_string()]);
        assert!(registry.respond_approval("call-1", Decision::Apply));
        assert!(!registry.respond_approval("call-1", Decision::Reject));
        assert_eq!(gate.wait_for_decision().await, Decision::Apply);

        let abandoned = ApprovalGate::<Decision>::open();
        registry.register_decision("call-2", abandoned.resolver());
        registry.forget("call-2");
        assert!(registry.pending_calls().is_empty());
        assert_eq!(abandoned.wait_for_decision().await, Decision::Reject);
    }

    #[tokio::test]
    async fn second_gate_for_a_call_id_is_refused() {
        let registry = ApprovalRegistry::new();
        let first = ApprovalGate::<Decision>::open();
        let second = ApprovalGate::<Decision>::open();
        let (first_id, second_id) = (first.id(), second.id());
        assert!(registry.register_decision("dup", first.resolver()));
        assert!(!registry.register_decision("dup", second.resolver()));
        assert!(!registry.register_question("dup", ApprovalGate::<QuestionAnswer>::open().resolver()));

        registry.release_decision("dup", &second_id);
        assert_eq!(registry.pending_calls(), vec!["dup".to_string()]);
        assert_eq!(second.wait_for_decision().await, Decision::Reject);

        assert!(registry.respond_approval("dup", Decision::Apply));
        assert_eq!(first.wait_for_decision().await, Decision::Apply);
        registry.release_decision("dup", &first_id);
        assert!(registry.pending_calls().is_empty());
    }

    #[tokio::test]
    async fn answers_do_not_resolve_decisions() {
        let registry = ApprovalRegistry::new();
        let gate = ApprovalGate::<Decision>::open();
        registry.register_decision("call-3", gate.resolver());
        assert!(!registry.respond_question("call-3", QuestionAnswer::Dismissed));
        assert_eq!(registry.pending_calls(), vec!["call-3".to_string()]);
        assert!(registry.respond_approval("call-3", Decision::Apply));
    }
}
