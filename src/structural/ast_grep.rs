//! The `astGrep` step and the steps that act on its matches.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{render_template, MatchContext, MatchNode, Query};
use crate::core::context;
use crate::core::{
    helper_callback, instrument, Chain, HelperCallback, NodeBuilder, Result, Runtime, StepScope,
    WorkflowError,
};

/// Helpers available on an `astGrep` step.
#[derive(Debug, Clone)]
pub struct AstGrepHelpers {
    scope: StepScope,
}

impl AstGrepHelpers {
    pub(crate) fn new(scope: StepScope) -> Self {
        Self { scope }
    }

    /// Replace each match with `template`, substituting captures.
    pub fn replace(&self, template: impl Into<String>) -> Chain<(), ()> {
        let template = template.into();
        self.scope.nest(|| replace(template))
    }

    /// Replace each match with the returned text; `None` leaves it unchanged.
    pub fn replace_with<F>(&self, f: F) -> Chain<(), ()>
    where
        F: Fn(&MatchNode) -> Option<String> + Send + Sync + 'static,
    {
        self.scope.nest(|| replace_with(f))
    }

    /// Collect one value per match, in visiting order.
    pub fn map<T, F>(&self, f: F) -> Chain<(), Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&MatchNode) -> T + Send + Sync + 'static,
    {
        self.scope.nest(|| map(f))
    }

    /// Whether any match was visited.
    pub fn exists(&self) -> Chain<(), bool> {
        self.scope.nest(exists)
    }

    /// Rewrite all matches with one AI completion.
    #[cfg(feature = "ai")]
    pub fn ai(&self, prompt: impl Into<String>) -> Chain<(), crate::ai::PatchReport> {
        let prompt = prompt.into();
        self.scope.nest(|| crate::ai::ai(prompt))
    }
}

/// Search the current file.
///
/// `query` is a pattern (`console.log($$$ARGS)`) or a YAML rule. Matches are
/// visited from last to first, each as the current structural match, so
/// rewrites never shift the ranges of matches still to come. The file is
/// saved once afterwards if its contents changed.
pub fn ast_grep(query: impl Into<String>) -> Chain<AstGrepHelpers, AstGrepHelpers> {
    build(query.into(), None)
}

/// Search the current file, running `callback` for each match.
pub fn ast_grep_with<F, Fut>(
    query: impl Into<String>,
    callback: F,
) -> Chain<AstGrepHelpers, AstGrepHelpers>
where
    F: Fn(AstGrepHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build(query.into(), Some(helper_callback(callback)))
}

fn build(
    query: String,
    callback: Option<HelperCallback<AstGrepHelpers>>,
) -> Chain<AstGrepHelpers, AstGrepHelpers> {
    let recorded = [query.clone()];
    instrument("astGrep", &recorded, || {
        NodeBuilder::new("astGrep")
            .arguments(move || Query::parse(&query).map(Arc::new))
            .helpers(AstGrepHelpers::new)
            .callback_with_helpers(callback)
            .executor(|next, node| async move {
                let query = node.arguments()?;
                let file = context::file()?;
                let source = file.contents().await?;
                let matches = Runtime::current().matcher().find_all(file.path(), &source, &query)?;
                tracing::debug!(
                    step = node.name(),
                    file = %file.path().display(),
                    matches = matches.len(),
                    "Searched file"
                );

                for found in matches.into_iter().rev() {
                    let active = MatchContext::new(Arc::clone(&query), found, file.clone());
                    context::with_match(active, next()).await?;
                }

                file.save().await?;
                Ok(())
            })
            .returns_helpers()
            .run()
    })
}

/// Replace the current match with `template`.
pub fn replace(template: impl Into<String>) -> Chain<(), ()> {
    let template = template.into();
    let recorded = [template.clone()];
    instrument("replace", &recorded, || {
        rewrite("replace", move |node| Some(render_template(&template, node)))
    })
}

/// Replace the current match with the text `f` returns.
pub fn replace_with<F>(f: F) -> Chain<(), ()>
where
    F: Fn(&MatchNode) -> Option<String> + Send + Sync + 'static,
{
    instrument("replace", &(), || rewrite("replace", f))
}

fn rewrite<F>(name: &'static str, f: F) -> Chain<(), ()>
where
    F: Fn(&MatchNode) -> Option<String> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    NodeBuilder::<()>::new(name)
        .executor(move |next, _| {
            let f = Arc::clone(&f);
            async move {
                let active = context::structural_match()?;
                if let Some(text) = f(active.node()) {
                    let file = active.file().clone();
                    let mut source = file.contents().await?;
                    let range = active.node().range();
                    if source.get(range.clone()) != Some(active.node().text()) {
                        return Err(WorkflowError::Pattern(format!(
                            "match at {:?} in {} is out of date",
                            range,
                            file.path().display()
                        )));
                    }
                    source.replace_range(range, &text);
                    file.set_contents(source);
                }
                next().await
            }
        })
        .run()
}

/// Collect a value for each visited match.
pub fn map<T, F>(f: F) -> Chain<(), Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&MatchNode) -> T + Send + Sync + 'static,
{
    let collected: Arc<Mutex<Vec<T>>> = Arc::default();
    let sink = Arc::clone(&collected);
    let f = Arc::new(f);

    instrument("map", &(), || {
        NodeBuilder::<()>::new("map")
            .executor(move |next, _| {
                let sink = Arc::clone(&sink);
                let f = Arc::clone(&f);
                async move {
                    let active = context::structural_match()?;
                    sink.lock().push(f(active.node()));
                    next().await
                }
            })
            .returns(move |_| async move { Ok(std::mem::take(&mut *collected.lock())) })
            .run()
    })
}

/// Resolve to whether any match was visited.
pub fn exists() -> Chain<(), bool> {
    let seen = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&seen);

    instrument("exists", &(), || {
        NodeBuilder::<()>::new("exists")
            .executor(move |next, _| {
                let flag = Arc::clone(&flag);
                async move {
                    context::structural_match()?;
                    *flag.lock() = true;
                    next().await
                }
            })
            .returns(move |_| async move { Ok(*seen.lock()) })
            .run()
    })
}
