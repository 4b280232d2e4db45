//! Descriptor extraction collaborator.
//!
//! Inference runs outside this workspace; the embedding application supplies
//! a [`DescriptorExtractor`] that turns a frame into at most one face.

use async_trait::async_trait;
use presence_core::Detection;
use presence_hw::Frame;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ExtractorError {
    #[error("model load failed: {0}")]
    Load(String),
    #[error("extraction failed: {0}")]
    Inference(String),
}

#[async_trait]
pub trait DescriptorExtractor: Send + Sync {
    /// Load models. Called at most once per [`crate::MatcherRuntime`] lifetime.
    async fn load(&self) -> Result<(), ExtractorError>;

    /// Detect the most prominent face and extract its descriptor.
    async fn extract(&self, frame: &Frame) -> Result<Option<Detection>, ExtractorError>;

    /// Release model resources.
    fn unload(&self) {}
}
