use crate::config::Settings;
use crate::domain::contract::VisionExtraction;
use crate::vision::error::VisionDiagnosticsError;
use crate::vision::json;
use crate::vision::{AnalyzeInput, Provider, VisionClient};
use anyhow::Context;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_google_api_key()?.to_string();
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_output_tokens = std::env::var("GEMINI_MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);

        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_output_tokens,
        })
    }

    async fn generate_content(
        &self,
        req: GenerateContentRequest,
    ) -> anyhow::Result<(serde_json::Value, GenerateContentResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Gemini response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(VisionDiagnosticsError {
                provider: Provider::Gemini,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Gemini response JSON: {text}"))?;
        let parsed = serde_json::from_value::<GenerateContentResponse>(raw_json.clone())
            .context("failed to decode Gemini response into GenerateContentResponse")?;
        Ok((raw_json, parsed))
    }

    fn portfolio_prompt() -> String {
        // Keep strict and fence-free: JSON only, fixed key set.
        [
            "You are a veteran Senior Portfolio Manager and Financial Analyst.",
            "",
            "Your task is two-fold based on the provided image of an investment portfolio:",
            "",
            "TASK 1: EXTRACTION",
            "Identify the asset tickers (e.g., AAPL, BTC, VTI) and quantities held. Ignore cash balances or UI elements.",
            "",
            "TASK 2: ANALYSIS & ADVICE",
            "Analyze the extracted holdings. Rate the portfolio's diversification on a scale of 1-10. Identify risk level and missing sectors. Suggest exactly 3 specific assets to add that would improve diversification or balance risk.",
            "",
            "OUTPUT FORMAT:",
            "You MUST return ONLY raw JSON. Do not use markdown blocks. The JSON must follow this exact structure:",
            "",
            "{",
            "  \"extracted_holdings\": [",
            "    {\"ticker\": \"AAPL\", \"qty\": 10.5},",
            "    {\"ticker\": \"TSLA\", \"qty\": 5.0}",
            "  ],",
            "  \"analysis\": {",
            "    \"health_score\": 7,",
            "    \"risk_profile\": \"Aggressive (Tech heavy)\",",
            "    \"strengths\": [\"Strong growth potential\"],",
            "    \"weaknesses\": [\"Zero exposure to defensive sectors or bonds\"],",
            "    \"suggestions\": [",
            "      {\"ticker\": \"VTI\", \"reason\": \"Adds broad total market coverage to de-risk.\"},",
            "      {\"ticker\": \"JNJ\", \"reason\": \"Adds stable healthcare dividend exposure.\"},",
            "      {\"ticker\": \"GLD\", \"reason\": \"Hedge against market uncertainty.\"}",
            "    ]",
            "  }",
            "}",
        ]
        .join("\n")
    }

    fn request_for(&self, input: &AnalyzeInput) -> GenerateContentRequest {
        let data = base64::engine::general_purpose::STANDARD.encode(&input.image);
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: Self::portfolio_prompt(),
                    },
                    Part::InlineData {
                        inline_data: Blob {
                            mime_type: input.mime_type.clone(),
                            data,
                        },
                    },
                ],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            }),
        }
    }

    fn response_text(res: &GenerateContentResponse) -> anyhow::Result<String> {
        let candidate = res
            .candidates
            .first()
            .context("Gemini response contained no candidates")?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                tracing::warn!(finish_reason = reason, "Gemini candidate did not finish cleanly");
            }
        }

        let mut out = String::new();
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Part::Text { text } = part {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl VisionClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn analyze_portfolio_image(
        &self,
        input: AnalyzeInput,
    ) -> anyhow::Result<VisionExtraction> {
        let req = self.request_for(&input);
        let (raw_json, res) = self.generate_content(req).await?;

        let text = Self::response_text(&res)?;
        if text.trim().is_empty() {
            return Err(VisionDiagnosticsError {
                provider: Provider::Gemini,
                stage: "empty_response",
                detail: "candidate contained no text parts".to_string(),
                raw_output: None,
                raw_response_json: Some(raw_json),
            }
            .into());
        }

        match json::parse_extraction(&text) {
            Ok(extraction) => {
                tracing::info!(
                    holdings = extraction.extracted_holdings.len(),
                    suggestions = extraction.analysis.suggestions.len(),
                    "parsed vision extraction"
                );
                Ok(extraction)
            }
            Err(err) => Err(VisionDiagnosticsError {
                provider: Provider::Gemini,
                stage: "parse",
                detail: format!("{err:#}"),
                raw_output: Some(text),
                raw_response_json: Some(raw_json),
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,

    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },

    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },

    // Response parts we don't consume (e.g. function calls).
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Blob {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,

    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_and_flattens_candidate_text() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "{\"extracted_holdings\":"},
                        {"text": "[]}"}
                    ]
                },
                "finishReason": "STOP"
            }]
        });

        let res = serde_json::from_value::<GenerateContentResponse>(raw).unwrap();
        let text = GeminiClient::response_text(&res).unwrap();
        assert_eq!(text, "{\"extracted_holdings\":\n[]}");
    }

    #[test]
    fn errors_on_missing_candidates() {
        let res = serde_json::from_value::<GenerateContentResponse>(json!({})).unwrap();
        assert!(GeminiClient::response_text(&res).is_err());
    }

    #[test]
    fn request_serializes_inline_image_data() {
        let req = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: "prompt".to_string(),
                    },
                    Part::InlineData {
                        inline_data: Blob {
                            mime_type: "image/png".to_string(),
                            data: "aGVsbG8=".to_string(),
                        },
                    },
                ],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: 1024,
            }),
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(
            value["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn prompt_pins_the_output_schema() {
        let prompt = GeminiClient::portfolio_prompt();
        assert!(prompt.contains("extracted_holdings"));
        assert!(prompt.contains("health_score"));
        assert!(prompt.contains("exactly 3 specific assets"));
    }
}
