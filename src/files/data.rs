//! `json` and `yaml` steps: structured edits of the current file.

use std::sync::Arc;

use crate::core::context;
use crate::core::{instrument, Chain, NodeBuilder, Result, WorkflowError};

type Transform = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Parse the current file as JSON, apply `update` and write it back.
///
/// Output is pretty-printed with two-space indentation; key order is kept.
pub fn json<F>(update: F) -> Chain<(), ()>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync + 'static,
{
    instrument("json", &(), || {
        edit(
            "json",
            Arc::new(move |source: &str| {
                let value = serde_json::from_str(source).map_err(|err| WorkflowError::msg(err.to_string()))?;
                let mut text = serde_json::to_string_pretty(&update(value)?)
                    .map_err(|err| WorkflowError::msg(err.to_string()))?;
                if source.ends_with('\n') {
                    text.push('\n');
                }
                Ok(text)
            }),
        )
    })
}

/// Parse the current file as YAML, apply `update` and write it back.
pub fn yaml<F>(update: F) -> Chain<(), ()>
where
    F: Fn(serde_yaml::Value) -> Result<serde_yaml::Value> + Send + Sync + 'static,
{
    instrument("yaml", &(), || {
        edit(
            "yaml",
            Arc::new(move |source: &str| {
                let value = serde_yaml::from_str(source).map_err(|err| WorkflowError::msg(err.to_string()))?;
                serde_yaml::to_string(&update(value)?).map_err(|err| WorkflowError::msg(err.to_string()))
            }),
        )
    })
}

fn edit(name: &'static str, transform: Transform) -> Chain<(), ()> {
    NodeBuilder::<()>::new(name)
        .executor(move |next, _| {
            let transform = Arc::clone(&transform);
            async move {
                let file = context::file()?;
                let source = file.contents().await?;
                let updated = transform(&source).map_err(|err| {
                    WorkflowError::msg(format!("{} in {}: {}", name, file.path().display(), err))
                })?;
                if updated != source {
                    file.set_contents(updated);
                    file.save().await?;
                }
                next().await
            }
        })
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileContext;

    async fn edit_file<T>(name: &str, contents: &str, step: Chain<(), T>) -> (Result<T>, String)
    where
        T: Clone + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        let result = context::with_file(FileContext::new(&path), async { step.await }).await;
        (result, std::fs::read_to_string(&path).unwrap())
    }

    #[tokio::test]
    async fn test_json_update_keeps_key_order() {
        let step = json(|mut value| {
            value["version"] = "2.0.0".into();
            Ok(value)
        });
        let (result, written) =
            edit_file("package.json", "{\"name\": \"a\", \"version\": \"1.0.0\"}\n", step).await;
        result.unwrap();
        assert_eq!(written, "{\n  \"name\": \"a\",\n  \"version\": \"2.0.0\"\n}\n");
    }

    #[tokio::test]
    async fn test_yaml_update() {
        let step = yaml(|mut value| {
            if let Some(serde_yaml::Value::Sequence(list)) = value.get_mut("list") {
                list.push("y".into());
            }
            Ok(value)
        });
        let (result, written) = edit_file("config.yaml", "name: a\nlist:\n- x\n", step).await;
        result.unwrap();
        assert_eq!(written, "name: a\nlist:\n- x\n- y\n");
    }

    #[tokio::test]
    async fn test_invalid_json_names_file() {
        let (result, written) = edit_file("bad.json", "{", json(Ok)).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("bad.json"));
        assert_eq!(written, "{");
    }

    #[tokio::test]
    async fn test_needs_file_context() {
        assert!(json(Ok).await.unwrap_err().is_missing_context());
    }
}
