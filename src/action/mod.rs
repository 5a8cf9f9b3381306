//! The action capability (spec §6): a step's `action` is either a direct
//! callable `(http, ctx) -> any` or a string name resolved through an
//! [`ActionResolver`]. Grounded on `runner/resolver.py`'s `ActionResolver`
//! protocol, ported as a trait object instead of an ABC so the runner takes
//! it as an injected dependency rather than reaching for a global registry
//! (spec §9 "Global state").

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::errors::{VenomError, VenomResult};
use crate::http::HttpCapability;

/// A step's action: given the HTTP capability and the in-flight execution
/// context, perform whatever side effects the journey author wants and
/// optionally return a value to be stored under the step's name.
#[async_trait]
pub trait ActionFn: Send + Sync {
    async fn call(
        &self,
        http: &dyn HttpCapability,
        ctx: &mut ExecutionContext,
    ) -> VenomResult<Option<Value>>;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Adapts a plain async closure into an [`ActionFn`] so journeys can be
/// built from `|http, ctx| async move { ... }` without a bespoke struct per
/// step.
pub struct FnAction<F>(F);

impl<F> FnAction<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ActionFn for FnAction<F>
where
    F: for<'a> Fn(&'a dyn HttpCapability, &'a mut ExecutionContext) -> BoxFuture<'a, VenomResult<Option<Value>>>
        + Send
        + Sync,
{
    async fn call(
        &self,
        http: &dyn HttpCapability,
        ctx: &mut ExecutionContext,
    ) -> VenomResult<Option<Value>> {
        (self.0)(http, ctx).await
    }
}

/// Resolves an action name (e.g. `"auth.login"`) to a callable. Three
/// reference implementations: a map-backed resolver built at construction
/// time ([`DictActionResolver`]), a resolver delegating to an explicitly
/// shared registry ([`RegistryActionResolver`]), and a true process-wide
/// singleton ([`GlobalActionResolver`]) for callers who want one. All three
/// are injected into the runner via [`crate::runner::JourneyRunner::with_resolver`] —
/// nothing in the runner reaches for a global on its own.
#[async_trait]
pub trait ActionResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> VenomResult<Arc<dyn ActionFn>>;
}

/// Resolver backed by a simple map, populated by `register`. Grounded on
/// `runner/resolver.py::DictActionResolver`.
#[derive(Default)]
pub struct DictActionResolver {
    actions: RwLock<HashMap<String, Arc<dyn ActionFn>>>,
}

impl DictActionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, action: Arc<dyn ActionFn>) {
        self.actions.write().expect("lock poisoned").insert(name.into(), action);
    }
}

#[async_trait]
impl ActionResolver for DictActionResolver {
    async fn resolve(&self, name: &str) -> VenomResult<Arc<dyn ActionFn>> {
        self.actions
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| VenomError::StepValidation {
                message: format!("action '{name}' not found"),
                context: crate::errors::ErrorContext::new(),
            })
    }
}

/// Resolver backed by a process-wide registry. Grounded on
/// `runner/resolver.py::RegistryActionResolver`, generalized here to take an
/// explicit `Arc<DictActionResolver>` singleton rather than reaching for a
/// module-level global directly, so tests can construct isolated registries.
pub struct RegistryActionResolver {
    registry: Arc<DictActionResolver>,
}

impl RegistryActionResolver {
    pub fn new(registry: Arc<DictActionResolver>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ActionResolver for RegistryActionResolver {
    async fn resolve(&self, name: &str) -> VenomResult<Arc<dyn ActionFn>> {
        self.registry.resolve(name).await
    }
}

static GLOBAL_ACTIONS: Lazy<RwLock<HashMap<String, Arc<dyn ActionFn>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Resolver backed by a process-wide `once_cell` singleton. Grounded on the
/// teacher's own use of `once_cell::sync::Lazy` in `context/mod.rs` for its
/// interpolation regex — same crate, repurposed as the backing store for a
/// global registry. Opt-in only: nothing in the runner or load engine
/// reaches for [`GLOBAL_ACTIONS`] directly, they only ever see it through an
/// injected `Arc<dyn ActionResolver>` a caller chose to construct.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalActionResolver;

impl GlobalActionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Registers `action` under `name` in the process-wide registry.
    pub fn register(name: impl Into<String>, action: Arc<dyn ActionFn>) {
        GLOBAL_ACTIONS.write().expect("lock poisoned").insert(name.into(), action);
    }

    /// Removes every registration, for test isolation between cases that
    /// share this process-wide singleton.
    pub fn clear() {
        GLOBAL_ACTIONS.write().expect("lock poisoned").clear();
    }
}

#[async_trait]
impl ActionResolver for GlobalActionResolver {
    async fn resolve(&self, name: &str) -> VenomResult<Arc<dyn ActionFn>> {
        GLOBAL_ACTIONS
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| VenomError::StepValidation {
                message: format!("action '{name}' not found in the global registry"),
                context: crate::errors::ErrorContext::new(),
            })
    }
}

/// Test-only helpers shared by `model`, `runner`, and `load` unit tests.
pub mod test_support {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ActionFn for Noop {
        async fn call(
            &self,
            _http: &dyn HttpCapability,
            _ctx: &mut ExecutionContext,
        ) -> VenomResult<Option<Value>> {
            Ok(None)
        }
    }

    pub fn noop_action() -> Arc<dyn ActionFn> {
        Arc::new(Noop)
    }

    struct Failing(String);

    #[async_trait]
    impl ActionFn for Failing {
        async fn call(
            &self,
            _http: &dyn HttpCapability,
            _ctx: &mut ExecutionContext,
        ) -> VenomResult<Option<Value>> {
            Err(VenomError::Unknown {
                message: self.0.clone(),
                context: crate::errors::ErrorContext::new(),
            })
        }
    }

    pub fn failing_action(message: impl Into<String>) -> Arc<dyn ActionFn> {
        Arc::new(Failing(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::noop_action;
    use super::*;

    #[tokio::test]
    async fn dict_resolver_finds_registered_actions_only() {
        let resolver = DictActionResolver::new();
        resolver.register("ping", noop_action());

        assert!(resolver.resolve("ping").await.is_ok());
        assert!(resolver.resolve("missing").await.is_err());
    }

    #[tokio::test]
    async fn registry_resolver_delegates_to_the_wrapped_dict() {
        let dict = Arc::new(DictActionResolver::new());
        dict.register("ping", noop_action());
        let resolver = RegistryActionResolver::new(dict);

        assert!(resolver.resolve("ping").await.is_ok());
        assert!(resolver.resolve("pong").await.is_err());
    }

    #[tokio::test]
    async fn global_resolver_shares_state_across_handles() {
        GlobalActionResolver::clear();
        GlobalActionResolver::register("ping", noop_action());

        let resolver = GlobalActionResolver::new();
        assert!(resolver.resolve("ping").await.is_ok());
        assert!(resolver.resolve("pong").await.is_err());

        GlobalActionResolver::clear();
        assert!(resolver.resolve("ping").await.is_err());
    }
}
