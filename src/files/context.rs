//! Current-file context.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::imports::ImportEdit;
use crate::core::{Result, WorkflowError};

#[derive(Debug, Default)]
struct Buffer {
    current: Option<String>,
    saved: Option<String>,
}

struct FileState {
    path: PathBuf,
    buffer: Mutex<Buffer>,
    imports: Mutex<Vec<ImportEdit>>,
}

/// A file being worked on.
///
/// Contents are read on first use and kept in memory; steps edit the buffer
/// and [`FileContext::save`] writes it back only when it changed. Clones
/// share the same buffer and import edit queue.
#[derive(Clone)]
pub struct FileContext {
    inner: Arc<FileState>,
}

impl fmt::Debug for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContext")
            .field("path", &self.inner.path)
            .field("dirty", &self.is_dirty())
            .field("imports", &self.inner.imports.lock().len())
            .finish()
    }
}

impl FileContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileState {
                path: path.into(),
                buffer: Mutex::new(Buffer::default()),
                imports: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// File extension, treating `.d.ts` as one extension.
    pub fn extension(&self) -> Option<String> {
        let name = self.inner.path.file_name()?.to_string_lossy();
        if name.ends_with(".d.ts") {
            return Some("d.ts".to_string());
        }
        self.inner.path.extension().map(|ext| ext.to_string_lossy().into_owned())
    }

    /// Current contents, reading the file on first use.
    pub async fn contents(&self) -> Result<String> {
        if let Some(current) = self.inner.buffer.lock().current.clone() {
            return Ok(current);
        }

        let text = tokio::fs::read_to_string(&self.inner.path)
            .await
            .map_err(|err| WorkflowError::io(&self.inner.path, err))?;

        let mut buffer = self.inner.buffer.lock();
        match &buffer.current {
            Some(current) => Ok(current.clone()),
            None => {
                buffer.current = Some(text.clone());
                buffer.saved = Some(text.clone());
                Ok(text)
            }
        }
    }

    /// Replace the in-memory contents.
    pub fn set_contents(&self, contents: String) {
        self.inner.buffer.lock().current = Some(contents);
    }

    /// Whether the buffer differs from what is on disk.
    pub fn is_dirty(&self) -> bool {
        let buffer = self.inner.buffer.lock();
        buffer.current.is_some() && buffer.current != buffer.saved
    }

    /// Write the buffer if it changed. Returns whether a write happened.
    pub async fn save(&self) -> Result<bool> {
        let pending = {
            let buffer = self.inner.buffer.lock();
            match &buffer.current {
                Some(current) if buffer.saved.as_ref() != Some(current) => Some(current.clone()),
                _ => None,
            }
        };
        let Some(contents) = pending else {
            return Ok(false);
        };

        tokio::fs::write(&self.inner.path, &contents)
            .await
            .map_err(|err| WorkflowError::io(&self.inner.path, err))?;
        self.inner.buffer.lock().saved = Some(contents);
        tracing::info!(file = %self.inner.path.display(), "FILE");
        Ok(true)
    }

    /// Queue an import edit for reconciliation.
    pub fn queue_import(&self, edit: ImportEdit) {
        self.inner.imports.lock().push(edit);
    }

    /// Queued import edits, in order.
    pub fn pending_imports(&self) -> Vec<ImportEdit> {
        self.inner.imports.lock().clone()
    }

    /// Drain the import edit queue.
    pub fn take_imports(&self) -> Vec<ImportEdit> {
        std::mem::take(&mut *self.inner.imports.lock())
    }
}
