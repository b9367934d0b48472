use crate::domain::contract::VisionExtraction;

pub mod error;
pub mod gemini;
pub mod json;

/// Image bytes plus the declared MIME type, as received from the upload.
#[derive(Debug, Clone)]
pub struct AnalyzeInput {
    pub image: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Provider {
    Gemini,
}

#[async_trait::async_trait]
pub trait VisionClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn analyze_portfolio_image(
        &self,
        input: AnalyzeInput,
    ) -> anyhow::Result<VisionExtraction>;
}
