use camino::Utf8PathBuf;
use patchloop_utils::error::LlmError;

/// Supplies the repository context text embedded in prompts.
///
/// Retrieval itself lives outside patchloop; providers only hand over text.
pub trait ContextProvider: Send + Sync {
    fn context_for(&self, request: &str) -> Result<String, LlmError>;
}

impl<C: ContextProvider + ?Sized> ContextProvider for Box<C> {
    fn context_for(&self, request: &str) -> Result<String, LlmError> {
        (**self).context_for(request)
    }
}

/// No context at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn context_for(&self, _request: &str) -> Result<String, LlmError> {
        Ok(String::new())
    }
}

/// The same fixed text for every request
#[derive(Debug, Clone, Default)]
pub struct StaticContext(pub String);

impl ContextProvider for StaticContext {
    fn context_for(&self, _request: &str) -> Result<String, LlmError> {
        Ok(self.0.clone())
    }
}

/// Contents of a file, re-read on every request so an external indexer can
/// refresh it between calls.
#[derive(Debug, Clone)]
pub struct FileContext {
    path: Utf8PathBuf,
}

impl FileContext {
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContextProvider for FileContext {
    fn context_for(&self, _request: &str) -> Result<String, LlmError> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            LlmError::Misconfiguration(format!(
                "context file {} could not be read: {e}",
                self.path
            ))
        })
    }
}
