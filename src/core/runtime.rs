//! Injectable engine runtime.
//!
//! A [`Runtime`] bundles what steps need from outside the ambient context:
//! configuration, the execution tree registry, the structural matcher and the
//! completion service. A process-wide default exists; tests and embedders run
//! pipelines under their own runtime with [`Runtime::enter`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::config::Config;
use super::context::Ambient;
use super::tree::TreeRegistry;
#[cfg(feature = "ai")]
use crate::ai::CompletionService;
use crate::structural::{AstGrepMatcher, Matcher};

static GLOBAL: OnceCell<Runtime> = OnceCell::new();

struct RuntimeInner {
    config: Config,
    registry: Arc<TreeRegistry>,
    matcher: Arc<dyn Matcher>,
    #[cfg(feature = "ai")]
    completion: Option<Arc<dyn CompletionService>>,
}

/// Shared services for pipeline execution.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("roots", &self.inner.registry.roots().len())
            .field("matcher", &self.inner.matcher.name())
            .finish()
    }
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Process-wide runtime, created with defaults on first use.
    pub fn global() -> Self {
        GLOBAL.get_or_init(|| Self::builder().build()).clone()
    }

    /// Install the process-wide runtime.
    ///
    /// Fails, returning the runtime, if one was already installed or used.
    pub fn install(runtime: Self) -> Result<(), Self> {
        GLOBAL.set(runtime)
    }

    /// Runtime of the current ambient scope, else the process-wide one.
    pub fn current() -> Self {
        Ambient::current().runtime.unwrap_or_else(Self::global)
    }

    /// Run a future with this runtime installed in the ambient context.
    pub async fn enter<F: Future>(self, fut: F) -> F::Output {
        Ambient::current().with_runtime(self).scope(fut).await
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TreeRegistry> {
        &self.inner.registry
    }

    pub fn matcher(&self) -> Arc<dyn Matcher> {
        Arc::clone(&self.inner.matcher)
    }

    /// Completion service explicitly configured for this runtime.
    #[cfg(feature = "ai")]
    pub fn completion(&self) -> Option<Arc<dyn CompletionService>> {
        self.inner.completion.clone()
    }
}

/// Builder for [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<Config>,
    registry: Option<Arc<TreeRegistry>>,
    matcher: Option<Arc<dyn Matcher>>,
    #[cfg(feature = "ai")]
    completion: Option<Arc<dyn CompletionService>>,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing registry instead of starting an empty one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<TreeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    #[cfg(feature = "ai")]
    #[must_use]
    pub fn completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                config: self.config.unwrap_or_default(),
                registry: self.registry.unwrap_or_default(),
                matcher: self.matcher.unwrap_or_else(|| Arc::new(AstGrepMatcher::new())),
                #[cfg(feature = "ai")]
                completion: self.completion,
            }),
        }
    }
}
