//! Execution node builder.
//!
//! A step is described by independent setters (arguments, helpers, executor,
//! callback, initializer, return) and materialized once with [`NodeBuilder::run`].
//! The result is a [`Chain`]: a [`Lazy`] value to await plus the step's helper
//! set, whose methods build further steps that execute *inside* this step's
//! executor.
//!
//! Nesting is expressed with continuations. A step's [`Node::context`] is a
//! [`Wrapper`]: given the continuation of a nested step, it runs the parent's
//! wrapper (if any), then this step's executor, which decides when and how
//! often to call the callback followed by the continuation.
//!
//! Only the step's place in the tree is fixed at build time. Working
//! directory, file and the other ambient slots come from wherever the step
//! is awaited.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::ops::Deref;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::context::{self, Ambient};
use super::error::{Result, WorkflowError};
use super::lazy::{Lazy, LazyFuture};
use super::runtime::Runtime;
use super::tree::{record_run, ExecutionNode};

/// Boxed future produced by step closures.
pub type StepFuture<T> = BoxFuture<'static, Result<T>>;

/// Continuation handed to an executor.
pub type Next = Arc<dyn Fn() -> StepFuture<()> + Send + Sync>;

/// Runs a continuation inside a step's scope.
pub type Wrapper = Arc<dyn Fn(Next) -> StepFuture<()> + Send + Sync>;

type ArgumentsFn<A> = Arc<dyn Fn() -> Result<A> + Send + Sync>;
type HelpersFn<H> = Arc<dyn Fn(StepScope) -> H + Send + Sync>;
type ExecutorFn<A> = Arc<dyn Fn(Next, Arc<Node<A>>) -> StepFuture<()> + Send + Sync>;
type CallbackFn<A> = Arc<dyn Fn(Arc<Node<A>>) -> StepFuture<()> + Send + Sync>;
type ReturnFn<A, T> = Box<dyn FnOnce(Arc<Node<A>>) -> StepFuture<T> + Send>;
type InitFn = Box<dyn FnOnce() -> StepFuture<()> + Send>;

/// User body receiving a step's helper set.
pub type HelperCallback<H> = Arc<dyn Fn(H) -> StepFuture<()> + Send + Sync>;

/// Box a helper-receiving closure.
pub fn helper_callback<H, F, Fut>(f: F) -> HelperCallback<H>
where
    F: Fn(H) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |helpers| f(helpers).boxed())
}

/// Continuation that does nothing.
pub fn finish() -> Next {
    Arc::new(|| async { Ok(()) }.boxed())
}

/// How helper-built steps are wrapped.
#[derive(Clone, Default)]
pub struct StepScope {
    wrapper: Option<Wrapper>,
    runtime: Option<Runtime>,
}

impl fmt::Debug for StepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepScope").field("wrapped", &self.wrapper.is_some()).finish()
    }
}

impl StepScope {
    /// Scope for helpers handed to callbacks during execution.
    ///
    /// Steps built through it run directly in the ambient context of the
    /// caller, attached to whichever step is currently executing.
    pub fn inline() -> Self {
        Self::default()
    }

    /// Whether steps built here run inside another step's executor.
    pub fn is_wrapped(&self) -> bool {
        self.wrapper.is_some()
    }

    /// Build a nested step.
    pub fn nest<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut base = Ambient::current().with_step(None).with_wrapper(self.wrapper.clone());
        if base.runtime.is_none() {
            base.runtime = self.runtime.clone();
        }
        base.sync_scope(f)
    }
}

/// Where a step's runs are recorded.
enum Recording {
    Untracked,
    /// Attached when the step was built.
    Once(Arc<ExecutionNode>),
    /// Chained step: a fresh copy is attached on every run.
    EachRun(Arc<ExecutionNode>),
}

impl Recording {
    fn enter(&self) -> Option<Arc<ExecutionNode>> {
        match self {
            Self::Untracked => None,
            Self::Once(node) => Some(Arc::clone(node)),
            Self::EachRun(template) => Some(record_run(template)),
        }
    }
}

/// Frozen description of one step, shared by its executor, callback and return.
pub struct Node<A> {
    name: &'static str,
    recording: Recording,
    runtime: Option<Runtime>,
    parent_wrapper: Option<Wrapper>,
    arguments: Option<ArgumentsFn<A>>,
    executor: Option<ExecutorFn<A>>,
    callback: Option<CallbackFn<A>>,
    init: Option<Lazy<()>>,
}

impl<A> fmt::Debug for Node<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("wrapped", &self.parent_wrapper.is_some())
            .finish()
    }
}

impl<A: Send + Sync + 'static> Node<A> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Compute the step's arguments from the current scope.
    pub fn arguments(&self) -> Result<A> {
        match &self.arguments {
            Some(arguments) => arguments(),
            None => Err(WorkflowError::msg(format!("Step `{}` has no arguments", self.name))),
        }
    }

    /// Scope for helpers chained onto this step.
    pub fn scope(self: &Arc<Self>) -> StepScope {
        StepScope { wrapper: Some(self.context()), runtime: self.runtime.clone() }
    }

    /// Wrapper running a continuation inside this step.
    pub fn context(self: &Arc<Self>) -> Wrapper {
        let this = Arc::clone(self);
        Arc::new(move |next: Next| {
            let run = Arc::clone(&this).runner(next);
            match &this.parent_wrapper {
                Some(wrapper) => wrapper(run),
                None => run(),
            }
        })
    }

    fn runner(self: Arc<Self>, next: Next) -> Next {
        Arc::new(move || {
            let this = Arc::clone(&self);
            let next = Arc::clone(&next);
            async move {
                if let Some(init) = &this.init {
                    init.subscribe().await?;
                }
                let step = this.recording.enter();
                let parent = step.clone().or_else(context::parent_step);
                let body = Arc::clone(&this).body(next);
                let run = match this.executor.clone() {
                    Some(executor) => executor(body, Arc::clone(&this)),
                    None => body(),
                };
                Ambient::current().with_step(step).with_parent(parent).scope(run).await
            }
            .boxed()
        })
    }

    fn body(self: Arc<Self>, next: Next) -> Next {
        Arc::new(move || {
            let this = Arc::clone(&self);
            let next = Arc::clone(&next);
            async move {
                if let Some(callback) = this.callback.clone() {
                    callback(Arc::clone(&this)).await?;
                }
                next().await
            }
            .boxed()
        })
    }
}

/// Builder for one pipeline step.
pub struct NodeBuilder<A, H = (), T = ()> {
    name: &'static str,
    ambient: Ambient,
    arguments: Option<ArgumentsFn<A>>,
    helpers: HelpersFn<H>,
    executor: Option<ExecutorFn<A>>,
    callback: Option<CallbackFn<A>>,
    init: Option<InitFn>,
    returns: ReturnFn<A, T>,
}

impl<A: Send + Sync + 'static> NodeBuilder<A> {
    /// Start describing a step, capturing the tree position it is built at.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ambient: Ambient::current(),
            arguments: None,
            helpers: Arc::new(|_| ()),
            executor: None,
            callback: None,
            init: None,
            returns: Box::new(|_| async { Ok(()) }.boxed()),
        }
    }
}

impl<A, H, T> NodeBuilder<A, H, T>
where
    A: Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// How to compute the step's parameters at execution time.
    pub fn arguments<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<A> + Send + Sync + 'static,
    {
        self.arguments = Some(Arc::new(f));
        self
    }

    /// Helper set exposed for chaining.
    pub fn helpers<H2, F>(self, f: F) -> NodeBuilder<A, H2, T>
    where
        F: Fn(StepScope) -> H2 + Send + Sync + 'static,
    {
        NodeBuilder {
            name: self.name,
            ambient: self.ambient,
            arguments: self.arguments,
            helpers: Arc::new(f),
            executor: self.executor,
            callback: self.callback,
            init: self.init,
            returns: self.returns,
        }
    }

    /// Wrapping behaviour deciding when the continuation runs.
    pub fn executor<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Next, Arc<Node<A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.executor = Some(Arc::new(move |next, node| f(next, node).boxed()));
        self
    }

    /// Body run before each continuation, attached to this step.
    pub fn callback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Node<A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.callback = Some(Arc::new(move |node| f(node).boxed()));
        self
    }

    /// Run a user body with inline helpers before each continuation.
    pub fn callback_with_helpers(self, callback: Option<HelperCallback<H>>) -> Self {
        let Some(callback) = callback else {
            return self;
        };
        let helpers = Arc::clone(&self.helpers);
        self.callback(move |_| callback(helpers(StepScope::inline())))
    }

    /// One-time setup before the first executor invocation.
    pub fn init<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.init = Some(Box::new(move || f().boxed()));
        self
    }

    /// Value the step resolves to once execution completes.
    pub fn returns<U, F, Fut>(self, f: F) -> NodeBuilder<A, H, U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Arc<Node<A>>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        NodeBuilder {
            name: self.name,
            ambient: self.ambient,
            arguments: self.arguments,
            helpers: self.helpers,
            executor: self.executor,
            callback: self.callback,
            init: self.init,
            returns: Box::new(move |node| f(node).boxed()),
        }
    }

    /// Resolve to this step's own helper set.
    pub fn returns_helpers(self) -> NodeBuilder<A, H, H> {
        let helpers = Arc::clone(&self.helpers);
        self.returns(move |node| {
            let bound = helpers(node.scope());
            async move { Ok(bound) }
        })
    }

    /// Materialize the step with its helpers attached.
    pub fn run(self) -> Chain<H, T> {
        let (node, helpers, lazy) = self.materialize();
        Chain { lazy, helpers: helpers(node.scope()) }
    }

    /// Materialize the step without attaching helpers.
    pub fn run_detached(self) -> Lazy<T> {
        self.materialize().2
    }

    fn materialize(self) -> (Arc<Node<A>>, HelpersFn<H>, Lazy<T>) {
        let recording = match (self.ambient.step, self.ambient.wrapper.is_some()) {
            (Some(template), true) => Recording::EachRun(template),
            (Some(node), false) => Recording::Once(node),
            (None, _) => Recording::Untracked,
        };
        let runtime = self.ambient.runtime;
        let node = Arc::new(Node {
            name: self.name,
            recording,
            runtime: runtime.clone(),
            parent_wrapper: self.ambient.wrapper,
            arguments: self.arguments,
            executor: self.executor,
            callback: self.callback,
            init: self.init.map(Lazy::new),
        });

        let returns = self.returns;
        let runner = Arc::clone(&node);
        let lazy = Lazy::new(move || async move {
            let mut execution = Ambient::current().with_wrapper(None);
            if execution.runtime.is_none() {
                execution.runtime = runtime;
            }
            execution
                .scope(async move {
                    tracing::debug!(
                        step = runner.name(),
                        parent = context::parent_step_name().as_deref().unwrap_or("-"),
                        "Running step"
                    );
                    let result = async {
                        (runner.context())(finish()).await?;
                        returns(Arc::clone(&runner)).await
                    }
                    .await;
                    if let Err(ref err) = result {
                        tracing::debug!(step = runner.name(), error = %err, "Step failed");
                    }
                    result
                })
                .await
        });

        (node, self.helpers, lazy)
    }
}

/// A materialized step: a lazy value plus its chainable helpers.
#[derive(Clone)]
pub struct Chain<H, T> {
    lazy: Lazy<T>,
    helpers: H,
}

impl<H, T> Chain<H, T> {
    pub fn lazy(&self) -> &Lazy<T> {
        &self.lazy
    }

    pub fn helpers(&self) -> &H {
        &self.helpers
    }

    pub fn into_lazy(self) -> Lazy<T> {
        self.lazy
    }
}

impl<H: fmt::Debug, T> fmt::Debug for Chain<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("lazy", &self.lazy).field("helpers", &self.helpers).finish()
    }
}

impl<H, T> Deref for Chain<H, T> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.helpers
    }
}

impl<H, T> IntoFuture for Chain<H, T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = LazyFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.lazy.subscribe()
    }
}

impl<H, T> IntoFuture for &Chain<H, T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = LazyFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.lazy.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::core::runtime::Runtime;
    use crate::core::tree::instrument;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Debug)]
    struct OuterHelpers {
        scope: StepScope,
    }

    impl OuterHelpers {
        fn record(&self, log: &Log) -> Chain<(), ()> {
            self.scope.nest(|| record(log))
        }
    }

    /// Runs its continuation once per directory.
    fn outer(dirs: &[&str]) -> Chain<OuterHelpers, ()> {
        let dirs: Vec<String> = dirs.iter().map(|d| (*d).to_string()).collect();
        let recorded = dirs.clone();
        instrument("outer", &recorded, || {
            NodeBuilder::new("outer")
                .arguments(move || Ok(dirs.clone()))
                .helpers(|scope| OuterHelpers { scope })
                .executor(|next, node| async move {
                    for dir in node.arguments()? {
                        context::with_cwd(dir, next()).await?;
                    }
                    Ok(())
                })
                .run()
        })
    }

    fn record(log: &Log) -> Chain<(), ()> {
        let log = Arc::clone(log);
        instrument("record", &(), || {
            NodeBuilder::<()>::new("record")
                .executor(move |next, _| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().push(context::cwd().display().to_string());
                        next().await
                    }
                })
                .run()
        })
    }

    #[tokio::test]
    async fn test_building_is_lazy_and_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        let step = NodeBuilder::<()>::new("count")
            .executor(move |next, _| {
                inner.fetch_add(1, Ordering::SeqCst);
                next()
            })
            .returns(|_| async { Ok(5u8) })
            .run();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!((&step).await.unwrap(), 5);
        assert_eq!(step.await.unwrap(), 5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chained_helper_runs_inside_parent_executor() {
        let runtime = Runtime::builder().build();
        let log: Log = Arc::default();
        let log_ref = Arc::clone(&log);

        runtime
            .clone()
            .enter(async move {
                outer(&["/a", "/b"]).record(&log_ref).await.unwrap();
            })
            .await;

        assert_eq!(*log.lock(), vec!["/a".to_string(), "/b".to_string()]);

        let tree = runtime.registry().snapshot();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "outer");
        let runs: Vec<_> = tree[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(runs, ["record", "record"]);
    }

    #[tokio::test]
    async fn test_step_sees_context_where_it_is_awaited() {
        let log: Log = Arc::default();
        let standalone = record(&log);
        let chained = outer(&["/fixed"]);
        let nested = chained.scope.nest(|| {
            NodeBuilder::<()>::new("late")
                .callback({
                    let log = Arc::clone(&log);
                    move |_| {
                        let log = Arc::clone(&log);
                        async move {
                            log.lock().push(format!("late:{}", context::cwd().display()));
                            Ok(())
                        }
                    }
                })
                .run()
        });

        context::with_cwd("/awaited", async {
            standalone.await.unwrap();
            nested.await.unwrap();
        })
        .await;

        assert_eq!(*log.lock(), vec!["/awaited".to_string(), "late:/fixed".to_string()]);
    }

    #[tokio::test]
    async fn test_parent_not_executed_twice_by_chain() {
        let log: Log = Arc::default();
        let chain = outer(&["/x"]);
        let child = chain.record(&log);
        child.await.unwrap();
        assert_eq!(log.lock().len(), 1);
        assert!(!chain.lazy().is_started());
    }

    #[tokio::test]
    async fn test_callback_body_builds_children() {
        let runtime = Runtime::builder().build();
        runtime
            .clone()
            .enter(async {
                instrument("a", &(), || {
                    NodeBuilder::<()>::new("a")
                        .callback(|_| async {
                            instrument("b", &(), || NodeBuilder::<()>::new("b").run()).await?;
                            instrument("c", &(), || NodeBuilder::<()>::new("c").run()).await
                        })
                        .run()
                })
                .await
                .unwrap();
            })
            .await;

        let tree = runtime.registry().snapshot();
        assert_eq!(tree.len(), 1);
        let children: Vec<_> = tree[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(children, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_init_runs_once_for_many_continuations() {
        let inits = Arc::new(AtomicUsize::new(0));
        let calls: Log = Arc::default();
        let counter = Arc::clone(&inits);

        let parent = outer(&["/1", "/2", "/3"]);
        let calls_ref = Arc::clone(&calls);
        let child = parent.scope.nest(move || {
            NodeBuilder::<()>::new("child")
                .init(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
                .callback(move |_| {
                    let calls = Arc::clone(&calls_ref);
                    async move {
                        calls.lock().push(context::cwd().display().to_string());
                        Ok(())
                    }
                })
                .run()
        });

        child.await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_errors_propagate_as_rejection() {
        let missing_args = NodeBuilder::<u8>::new("args")
            .executor(|next, node| async move {
                node.arguments()?;
                next().await
            })
            .run();
        assert!(missing_args.await.unwrap_err().to_string().contains("no arguments"));

        let failing_executor = NodeBuilder::<()>::new("exec")
            .executor(|_, _| async { Err(WorkflowError::msg("executor failed")) })
            .run_detached();
        assert_eq!(failing_executor.await.unwrap_err().to_string(), "executor failed");

        let failing_return = NodeBuilder::<()>::new("ret")
            .returns(|_| async { Err::<u8, _>(WorkflowError::msg("return failed")) })
            .run();
        assert_eq!(failing_return.await.unwrap_err().to_string(), "return failed");
    }

    #[tokio::test]
    async fn test_returns_helpers_allows_chaining_after_await() {
        let log: Log = Arc::default();
        let helpers = instrument("outer", &(), || {
            NodeBuilder::new("outer")
                .arguments(|| Ok(vec![PathBuf::from("/after")]))
                .helpers(|scope| OuterHelpers { scope })
                .executor(|next, node| async move {
                    for dir in node.arguments()? {
                        context::with_cwd(dir, next()).await?;
                    }
                    Ok(())
                })
                .returns_helpers()
                .run()
        })
        .await
        .unwrap();

        helpers.record(&log).await.unwrap();
        assert_eq!(*log.lock(), vec!["/after".to_string()]);
    }
}
