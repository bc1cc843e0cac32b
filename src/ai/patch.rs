//! Labelled-part patch sessions and the `ai` step.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AiError, CompletionRequest, CompletionService, OpenAiCompletion};
use crate::core::context;
use crate::core::{instrument, spawn, AiConfig, Chain, NodeBuilder, Result, Runtime, SpawnOptions};

/// Marker prefix wrapping each part of the prompt.
pub const PART_LABEL: &str = "codemod#ai#";

pub const SYSTEM_PROMPT: &str = r"
You are a meticulous engineer assigned to migrate a codebase by updating its code when necessary.

When you write code, the code works on the first try, and is complete. Take into account the current repository's language, code style, and dependencies.

You will be given a Migration Description and a Source File. You will rewrite the Source File in order to apply the changes described in the Migration Description.

If a line of code is not affected by the migration, you should keep it as it is.

Source file will be split into multiple parts, each part starts with a comment like this:
// codemod#ai#0
part code here
// codemod#ai#0
where 0 is a number that represents the part number.

You must print the modified Source File in the following format:

```
modified Source File
```

You must preserve parts naming and order.
";

/// One excerpt sent for rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSample {
    pub file: PathBuf,
    pub range: Range<usize>,
    pub text: String,
}

/// Outcome of applying a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Files rewritten
    pub written: Vec<PathBuf>,

    /// Files left alone because the completion was malformed for them
    pub skipped: Vec<PathBuf>,
}

/// Samples collected for one instruction.
#[derive(Debug, Clone)]
pub struct PatchSession {
    instruction: String,
    query: Option<String>,
    samples: Vec<CodeSample>,
}

impl PatchSession {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), query: None, samples: Vec::new() }
    }

    /// Record the structural query the samples matched.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = Some(query.into());
    }

    pub fn add_sample(&mut self, sample: CodeSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[CodeSample] {
        &self.samples
    }

    /// User message: query, instruction and every sample wrapped in its label.
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "\nYou are migrating a code, which matches ast-grep pattern:\n{}\n\n{}\n\n",
            self.query.as_deref().unwrap_or_default(),
            self.instruction
        );
        for (index, sample) in self.samples.iter().enumerate() {
            prompt.push_str(&format!(
                "\n// {label}{index}\n{}\n// {label}{index}\n\n",
                sample.text,
                label = PART_LABEL,
                index = index
            ));
        }
        prompt
    }

    pub fn request(&self) -> CompletionRequest {
        CompletionRequest { system: SYSTEM_PROMPT.to_string(), user: self.prompt() }
    }

    /// Ask `service` for a rewrite and splice the answer into the files.
    ///
    /// A file is only written when every one of its parts came back
    /// terminated; otherwise it is skipped with an error log, as is a file
    /// that can no longer be read or written.
    pub async fn execute(&self, service: &dyn CompletionService, config: &AiConfig) -> Result<PatchReport> {
        let mut report = PatchReport::default();
        if self.samples.is_empty() {
            return Ok(report);
        }

        tracing::debug!(service = service.name(), samples = self.samples.len(), "Requesting AI patch");
        let completion = service.complete(&self.request()).await?;
        let code = extract_code_block(&completion).ok_or(AiError::NoCodeBlock)?;
        let parts = parse_parts(code);

        let mut by_file: BTreeMap<&PathBuf, Vec<(usize, &CodeSample)>> = BTreeMap::new();
        for (index, sample) in self.samples.iter().enumerate() {
            by_file.entry(&sample.file).or_default().push((index, sample));
        }

        for (file, mut samples) in by_file {
            let missing: Vec<usize> =
                samples.iter().map(|(index, _)| *index).filter(|index| !parts.contains_key(index)).collect();
            if !missing.is_empty() {
                tracing::error!(file = %file.display(), parts = ?missing, "Malformed AI completion, skipping file");
                report.skipped.push(file.clone());
                continue;
            }

            let original = match tokio::fs::read_to_string(file).await {
                Ok(original) => original,
                Err(err) => {
                    tracing::error!(file = %file.display(), error = %err, "Cannot read file, skipping");
                    report.skipped.push(file.clone());
                    continue;
                }
            };
            let mut contents = original.clone();
            samples.sort_by(|a, b| b.1.range.start.cmp(&a.1.range.start));

            let mut stale = false;
            for (index, sample) in &samples {
                if contents.get(sample.range.clone()) != Some(sample.text.as_str()) {
                    stale = true;
                    break;
                }
                if let Some(replacement) = parts.get(index) {
                    contents.replace_range(sample.range.clone(), replacement);
                }
            }
            if stale {
                tracing::error!(file = %file.display(), "File changed since sampling, skipping file");
                report.skipped.push(file.clone());
                continue;
            }

            if contents != original {
                if let Err(err) = tokio::fs::write(file, &contents).await {
                    tracing::error!(file = %file.display(), error = %err, "Cannot write file, skipping");
                    report.skipped.push(file.clone());
                    continue;
                }
                format_file(file, config).await;
                tracing::info!(file = %file.display(), "Patched file");
                report.written.push(file.clone());
            }
        }

        Ok(report)
    }
}

async fn format_file(file: &PathBuf, config: &AiConfig) {
    let Some((command, args)) = config.formatter.as_ref().and_then(|cmd| cmd.split_first()) else {
        return;
    };
    let mut args = args.to_vec();
    args.push(file.display().to_string());

    let cwd = file.parent().map_or_else(context::cwd, PathBuf::from);
    let options = SpawnOptions::new().cwd(cwd).throw_on_error(false);
    match spawn(command, &args, options).await {
        Ok(output) if output.success() => {}
        Ok(output) => tracing::warn!(file = %file.display(), error = ?output.error, "Formatter failed"),
        Err(err) => tracing::warn!(file = %file.display(), error = %err, "Formatter failed"),
    }
}

/// Body of the first fenced code block, without the fence lines.
pub fn extract_code_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n').map_or(after_fence.len(), |offset| offset + 1);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_end_matches(['\n', '\r']))
}

fn label_index(line: &str) -> Option<usize> {
    line.trim()
        .strip_prefix("//")?
        .trim_start()
        .strip_prefix(PART_LABEL)?
        .trim()
        .parse()
        .ok()
}

/// Terminated parts of a labelled answer, by index.
///
/// A label opens a part and its next occurrence closes it. A part whose
/// label appears only once is dropped.
pub fn parse_parts(code: &str) -> BTreeMap<usize, String> {
    let mut parts = BTreeMap::new();
    let mut current: Option<(usize, Vec<&str>)> = None;

    for line in code.lines() {
        match (label_index(line), current.take()) {
            (Some(index), Some((open, lines))) if index == open => {
                parts.insert(index, lines.join("\n"));
            }
            (Some(index), _) => current = Some((index, Vec::new())),
            (None, Some((open, mut lines))) => {
                lines.push(line);
                current = Some((open, lines));
            }
            (None, None) => {}
        }
    }
    parts
}

/// Rewrite every visited structural match with one AI completion.
///
/// Matches are collected while the enclosing steps run; the completion is
/// requested once they finish. The runtime's completion service is used when
/// set, otherwise an OpenAI client built from the `[ai]` config.
pub fn ai(prompt: impl Into<String>) -> Chain<(), PatchReport> {
    let prompt = prompt.into();
    let session = Arc::new(Mutex::new(PatchSession::new(prompt.as_str())));
    let sink = Arc::clone(&session);

    instrument("ai", &[prompt.as_str()], || {
        NodeBuilder::<()>::new("ai")
            .executor(move |next, _| {
                let sink = Arc::clone(&sink);
                async move {
                    let active = context::structural_match()?;
                    {
                        let mut session = sink.lock();
                        session.set_query(active.query().to_string());
                        session.add_sample(CodeSample {
                            file: active.file().path().to_path_buf(),
                            range: active.node().range(),
                            text: active.node().text().to_string(),
                        });
                    }
                    next().await
                }
            })
            .returns(move |_| async move {
                let session = session.lock().clone();
                let runtime = Runtime::current();
                let config = &runtime.config().ai;
                let service: Arc<dyn CompletionService> = match runtime.completion() {
                    Some(service) => service,
                    None => Arc::new(OpenAiCompletion::from_config(config)?),
                };
                session.execute(service.as_ref(), config).await
            })
            .run()
    })
}
