use crate::domain::portfolio::{
    Analysis, AnalysisResult, Holding, ImprovementType, Recommendation,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// The model emits no per-holding confidence; extractions get full marks.
const EXTRACTION_CONFIDENCE: f64 = 1.0;

const DEFAULT_HEALTH_SCORE: i32 = 5;
const DEFAULT_RISK_PROFILE: &str = "Moderate";

/// Raw, untrusted portfolio extraction as produced by the vision model.
///
/// Field defaults mirror what the model may omit: a missing `qty` becomes 0
/// and then fails the positive-quantity check, so malformed entries surface
/// as validation errors rather than silent drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionExtraction {
    #[serde(default)]
    pub extracted_holdings: Vec<RawHolding>,
    #[serde(default)]
    pub analysis: RawAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHolding {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnalysis {
    #[serde(default = "default_health_score")]
    pub health_score: i32,
    #[serde(default = "default_risk_profile")]
    pub risk_profile: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub strengths: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<RawSuggestion>,
}

impl Default for RawAnalysis {
    fn default() -> Self {
        Self {
            health_score: default_health_score(),
            risk_profile: default_risk_profile(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSuggestion {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub reason: String,
}

fn default_health_score() -> i32 {
    DEFAULT_HEALTH_SCORE
}

fn default_risk_profile() -> String {
    DEFAULT_RISK_PROFILE.to_string()
}

// A non-list value coerces to the empty list, and non-string entries are
// dropped. Lenient on purpose; holdings and suggestions stay strict.
fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(entries) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

impl VisionExtraction {
    /// Validates the raw extraction into a complete [`AnalysisResult`].
    ///
    /// Any failure at any step collapses into one "invalid vision response"
    /// error carrying the underlying cause.
    pub fn validate_into_result(
        self,
        processing_time: f64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<AnalysisResult> {
        self.try_into_result(processing_time, timestamp)
            .context("invalid vision response")
    }

    fn try_into_result(
        self,
        processing_time: f64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<AnalysisResult> {
        let mut holdings = Vec::with_capacity(self.extracted_holdings.len());
        for raw in &self.extracted_holdings {
            holdings.push(Holding::new(&raw.ticker, raw.qty, EXTRACTION_CONFIDENCE)?);
        }

        let analysis = Analysis::new(
            self.analysis.health_score,
            &self.analysis.risk_profile,
            self.analysis.strengths,
            self.analysis.weaknesses,
            // Never sourced from the model.
            None,
        )?;

        // Priority is positional: the model's suggestion order fully
        // determines ranking. Fewer than 3 suggestions fails the
        // exactly-3 aggregate check below.
        let mut recommendations = Vec::with_capacity(3);
        for (i, suggestion) in self.analysis.suggestions.iter().take(3).enumerate() {
            recommendations.push(Recommendation::new(
                &suggestion.ticker,
                &suggestion.reason,
                ImprovementType::Diversification,
                i as i32 + 1,
            )?);
        }

        AnalysisResult::new(holdings, analysis, recommendations, processing_time, timestamp)
    }
}
