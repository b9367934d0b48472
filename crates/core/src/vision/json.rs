use crate::domain::contract::VisionExtraction;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_extraction(text: &str) -> anyhow::Result<VisionExtraction> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str::<VisionExtraction>(&json_str).with_context(|| {
        format!("vision output is not valid JSON for the extraction schema: {json_str}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_extraction_json() -> String {
        json!({
            "extracted_holdings": [
                {"ticker": "AAPL", "qty": 10.5},
                {"ticker": "TSLA", "qty": 5.0}
            ],
            "analysis": {
                "health_score": 7,
                "risk_profile": "Aggressive (Tech heavy)",
                "strengths": ["Strong growth potential"],
                "weaknesses": ["Zero exposure to defensive sectors or bonds"],
                "suggestions": [
                    {"ticker": "VTI", "reason": "Adds broad total market coverage to de-risk."},
                    {"ticker": "JNJ", "reason": "Adds stable healthcare dividend exposure."},
                    {"ticker": "GLD", "reason": "Hedge against market uncertainty."}
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn parse_extraction_accepts_valid_json() {
        let extraction = parse_extraction(&valid_extraction_json()).unwrap();
        assert_eq!(extraction.extracted_holdings.len(), 2);
        assert_eq!(extraction.extracted_holdings[0].ticker, "AAPL");
        assert_eq!(extraction.analysis.suggestions.len(), 3);
    }

    #[test]
    fn parse_extraction_accepts_fenced_output() {
        let fenced = format!("```json\n{}\n```", valid_extraction_json());
        let extraction = parse_extraction(&fenced).unwrap();
        assert_eq!(extraction.analysis.health_score, 7);
    }

    #[test]
    fn parse_extraction_rejects_prose() {
        assert!(parse_extraction("I could not find any holdings in this image.").is_err());
    }

    #[test]
    fn parse_extraction_tolerates_missing_keys() {
        // Defaults kick in; validation happens later.
        let extraction = parse_extraction("{}").unwrap();
        assert!(extraction.extracted_holdings.is_empty());
        assert_eq!(extraction.analysis.health_score, 5);
        assert_eq!(extraction.analysis.risk_profile, "Moderate");
    }
}
