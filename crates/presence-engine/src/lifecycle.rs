//! Single-instance lifecycle for the extraction models.

use crate::extractor::{DescriptorExtractor, ExtractorError};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Owns the extractor and its loaded state.
///
/// `initialize` is idempotent: concurrent callers wait on one in-flight load
/// and a failed load leaves the runtime uninitialized so it can be retried.
pub struct MatcherRuntime {
    extractor: Arc<dyn DescriptorExtractor>,
    loaded: OnceCell<()>,
}

impl MatcherRuntime {
    pub fn new(extractor: Arc<dyn DescriptorExtractor>) -> Self {
        Self {
            extractor,
            loaded: OnceCell::new(),
        }
    }

    pub async fn initialize(&self) -> Result<(), ExtractorError> {
        self.loaded
            .get_or_try_init(|| async {
                self.extractor.load().await?;
                tracing::info!("descriptor models loaded");
                Ok::<(), ExtractorError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.loaded.initialized()
    }

    /// The extractor, once models are loaded.
    pub fn extractor(&self) -> Option<&Arc<dyn DescriptorExtractor>> {
        self.is_ready().then_some(&self.extractor)
    }

    /// Unload models. A later `initialize` loads them again.
    pub fn dispose(&mut self) {
        if self.loaded.take().is_some() {
            self.extractor.unload();
            tracing::info!("descriptor models released");
        }
    }
}
