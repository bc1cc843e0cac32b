//! The `exec` step.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::context;
use crate::core::{instrument, spawn, Chain, NodeBuilder, Runtime, SpawnOptions, SpawnOutput, StepScope};

/// Helpers available after an `exec` step.
#[derive(Debug, Clone)]
pub struct ExecHelpers {
    scope: StepScope,
}

impl ExecHelpers {
    pub(crate) fn new(scope: StepScope) -> Self {
        Self { scope }
    }

    /// Run another command after this one, in the same directory.
    pub fn exec<I, S>(&self, command: &str, args: I) -> Chain<ExecHelpers, Vec<SpawnOutput>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope.nest(|| exec(command, args))
    }
}

/// Run `command` in the current working directory.
///
/// Resolves to one output per invocation: a step nested under `dirs` runs
/// once per directory. Spawn options come from the `[spawn]` config section.
pub fn exec<I, S>(command: &str, args: I) -> Chain<ExecHelpers, Vec<SpawnOutput>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let options = SpawnOptions::from_config(&Runtime::current().config().spawn);
    exec_with_options(command, args, options)
}

/// Run `command` with explicit spawn options.
///
/// The working directory always comes from the current context.
pub fn exec_with_options<I, S>(
    command: &str,
    args: I,
    options: SpawnOptions,
) -> Chain<ExecHelpers, Vec<SpawnOutput>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let command = command.to_string();
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let recorded: Vec<String> = std::iter::once(command.clone()).chain(args.iter().cloned()).collect();

    let outputs: Arc<Mutex<Vec<SpawnOutput>>> = Arc::default();
    let sink = Arc::clone(&outputs);

    instrument("exec", &recorded, || {
        NodeBuilder::new("exec")
            .arguments(move || Ok((command.clone(), args.clone(), options.clone())))
            .helpers(ExecHelpers::new)
            .executor(move |next, node| {
                let sink = Arc::clone(&sink);
                async move {
                    let (command, args, options) = node.arguments()?;
                    let cwd = context::cwd();
                    tracing::debug!(step = node.name(), cwd = %cwd.display(), command = %command, "Spawning");
                    let output = spawn(&command, &args, options.cwd(cwd)).await?;
                    sink.lock().push(output);
                    next().await
                }
            })
            .returns(move |_| async move { Ok(std::mem::take(&mut *outputs.lock())) })
            .run()
    })
}
