//! Call-scoped delegation context.
//!
//! A `DelegationContext` carries the chain of callers, the recursion depth,
//! the request's cancellation token, and the event sink through arbitrarily
//! nested asynchronous calls without threading parameters through every
//! signature. Propagation rides tokio's task-local storage: a nested
//! `scope` shadows the outer context only within its own dynamic extent,
//! and the outer context is visible again once it returns. Task-locals
//! survive suspension points and never leak across unrelated concurrent
//! requests in the same runtime.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::events::{AgentEvent, EventSink};

tokio::task_local! {
    static CURRENT: DelegationContext;
}

#[derive(Debug)]
struct ContextInner {
    chain: Vec<String>,
    depth: usize,
    cancellation: CancellationToken,
    sink: Option<EventSink>,
    originator: String,
}

/// Immutable per-call delegation context. A child call derives a new
/// context by appending to the chain and incrementing the depth; the
/// cancellation token and sink are shared, not copied.
#[derive(Debug, Clone)]
pub struct DelegationContext {
    inner: Arc<ContextInner>,
}

impl DelegationContext {
    /// Root context for a fresh request. The chain starts with the
    /// originating supervisor at depth zero, so `depth` always equals the
    /// chain length minus the root call.
    pub fn root(
        originator: impl Into<String>,
        cancellation: CancellationToken,
        sink: Option<EventSink>,
    ) -> Self {
        let originator = originator.into();
        Self {
            inner: Arc::new(ContextInner {
                chain: vec![originator.clone()],
                depth: 0,
                cancellation,
                sink,
                originator,
            }),
        }
    }

    /// Derive the context for a delegated call to `agent`.
    pub fn derive(&self, agent: impl Into<String>) -> Self {
        let mut chain = self.inner.chain.clone();
        chain.push(agent.into());
        Self {
            inner: Arc::new(ContextInner {
                chain,
                depth: self.inner.depth + 1,
                cancellation: self.inner.cancellation.clone(),
                sink: self.inner.sink.clone(),
                originator: self.inner.originator.clone(),
            }),
        }
    }

    /// Run `fut` with this context observable via [`DelegationContext::current`]
    /// anywhere in its dynamic extent.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The context of the nearest enclosing `scope`, if any.
    pub fn current() -> Option<DelegationContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn chain(&self) -> &[String] {
        &self.inner.chain
    }

    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn originator(&self) -> &str {
        &self.inner.originator
    }

    /// Agent at the tail of the chain — the immediate caller for any
    /// further delegation.
    pub fn current_agent(&self) -> &str {
        self.inner
            .chain
            .last()
            .map(String::as_str)
            .unwrap_or(&self.inner.originator)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Publish an event to the request's sink, if one is attached.
    pub fn emit(&self, event: AgentEvent) {
        if let Some(sink) = &self.inner.sink {
            sink.emit(event);
        }
    }

    /// Emit on the current scope's context, if inside one.
    pub fn emit_current(event: AgentEvent) {
        if let Some(ctx) = Self::current() {
            ctx.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> DelegationContext {
        DelegationContext::root("supervisor", CancellationToken::new(), None)
    }

    #[test]
    fn depth_tracks_chain_length() {
        let ctx = root();
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.chain(), &["supervisor"]);

        let child = ctx.derive("research");
        let grandchild = child.derive("coder");
        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.chain(), &["supervisor", "research", "coder"]);
        // depth == chain length minus the root call
        assert_eq!(grandchild.depth(), grandchild.chain().len() - 1);
    }

    #[tokio::test]
    async fn current_is_none_outside_scope() {
        assert!(DelegationContext::current().is_none());
    }

    #[tokio::test]
    async fn nested_scope_shadows_and_restores() {
        let outer = root();
        let inner = outer.derive("specialist");

        outer
            .clone()
            .scope(async move {
                assert_eq!(DelegationContext::current().unwrap().depth(), 0);

                inner
                    .scope(async {
                        let seen = DelegationContext::current().unwrap();
                        assert_eq!(seen.depth(), 1);
                        assert_eq!(seen.current_agent(), "specialist");
                        // Suspension point: context must survive a yield.
                        tokio::task::yield_now().await;
                        assert_eq!(DelegationContext::current().unwrap().depth(), 1);
                    })
                    .await;

                // Outer context visible again after the inner scope returns.
                assert_eq!(DelegationContext::current().unwrap().depth(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn concurrent_requests_do_not_leak_context() {
        let a = DelegationContext::root("alpha", CancellationToken::new(), None);
        let b = DelegationContext::root("beta", CancellationToken::new(), None);

        let task_a = tokio::spawn(a.scope(async {
            tokio::task::yield_now().await;
            DelegationContext::current().unwrap().originator().to_string()
        }));
        let task_b = tokio::spawn(b.scope(async {
            tokio::task::yield_now().await;
            DelegationContext::current().unwrap().originator().to_string()
        }));

        assert_eq!(task_a.await.unwrap(), "alpha");
        assert_eq!(task_b.await.unwrap(), "beta");
    }

    #[test]
    fn derive_shares_cancellation_token() {
        let token = CancellationToken::new();
        let ctx = DelegationContext::root("supervisor", token.clone(), None);
        let child = ctx.derive("specialist");

        token.cancel();
        assert!(child.is_cancelled());
        assert!(ctx.is_cancelled());
    }
}
