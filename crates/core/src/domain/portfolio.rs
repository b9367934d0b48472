use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const TICKER_MAX_LEN: usize = 10;
const REASON_MIN_CHARS: usize = 10;

/// One ticker+quantity pair extracted from a portfolio screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub quantity: f64,
    pub confidence: f64,
}

impl Holding {
    pub fn new(ticker: &str, quantity: f64, confidence: f64) -> anyhow::Result<Self> {
        let ticker = normalize_ticker(ticker)?;

        ensure!(quantity > 0.0, "quantity must be positive (got {quantity})");
        ensure!(
            (0.0..=1.0).contains(&confidence),
            "confidence must be between 0 and 1 (got {confidence})"
        );

        Ok(Self {
            ticker,
            quantity,
            confidence,
        })
    }
}

fn normalize_ticker(raw: &str) -> anyhow::Result<String> {
    let ticker = raw.trim().to_uppercase();
    ensure!(!ticker.is_empty(), "ticker must be non-empty");
    ensure!(
        ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.'),
        "ticker must contain only alphanumeric characters, hyphens, and dots (got {ticker:?})"
    );
    ensure!(
        ticker.len() <= TICKER_MAX_LEN,
        "ticker must be between 1 and {TICKER_MAX_LEN} characters (got {ticker:?})"
    );
    Ok(ticker)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementType {
    Diversification,
    RiskReduction,
    SectorBalance,
    GeographicExposure,
}

/// One suggested ticker with rationale and priority rank (1 = highest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub ticker: String,
    pub reason: String,
    pub improvement_type: ImprovementType,
    pub priority: i32,
}

impl Recommendation {
    pub fn new(
        ticker: &str,
        reason: &str,
        improvement_type: ImprovementType,
        priority: i32,
    ) -> anyhow::Result<Self> {
        // Unlike holdings, recommendation tickers get no charset check.
        let ticker = ticker.trim().to_uppercase();
        ensure!(!ticker.is_empty(), "ticker must be non-empty");

        let reason = reason.trim().to_string();
        ensure!(
            reason.chars().count() >= REASON_MIN_CHARS,
            "reason must be at least {REASON_MIN_CHARS} characters long (got {reason:?})"
        );

        ensure!(
            (1..=3).contains(&priority),
            "priority must be between 1 and 3 (got {priority})"
        );

        Ok(Self {
            ticker,
            reason,
            improvement_type,
            priority,
        })
    }
}

/// AI assessment of the portfolio's health and characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub health_score: i32,
    pub risk_profile: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub total_value: Option<f64>,
}

impl Analysis {
    pub fn new(
        health_score: i32,
        risk_profile: &str,
        strengths: Vec<String>,
        weaknesses: Vec<String>,
        total_value: Option<f64>,
    ) -> anyhow::Result<Self> {
        ensure!(
            (1..=10).contains(&health_score),
            "health score must be between 1 and 10 (got {health_score})"
        );

        let risk_profile = risk_profile.trim().to_string();
        ensure!(!risk_profile.is_empty(), "risk profile must be non-empty");

        if let Some(total_value) = total_value {
            ensure!(
                total_value >= 0.0,
                "total value must be non-negative (got {total_value})"
            );
        }

        Ok(Self {
            health_score,
            risk_profile,
            strengths: filter_text_list(strengths),
            weaknesses: filter_text_list(weaknesses),
            total_value,
        })
    }
}

// Blank entries are dropped, not rejected; the strict policy used for
// holdings and recommendations does not apply to these lists.
fn filter_text_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Complete validated result of one image analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub extracted_holdings: Vec<Holding>,
    pub analysis: Analysis,
    pub recommendations: Vec<Recommendation>,
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(
        extracted_holdings: Vec<Holding>,
        analysis: Analysis,
        recommendations: Vec<Recommendation>,
        processing_time: f64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        ensure!(
            !extracted_holdings.is_empty(),
            "at least one holding must be extracted"
        );

        // Holding tickers are stored uppercased, so this also catches
        // case-insensitive collisions.
        let mut seen = BTreeSet::new();
        for holding in &extracted_holdings {
            ensure!(
                seen.insert(holding.ticker.as_str()),
                "duplicate ticker in holdings: {}",
                holding.ticker
            );
        }

        ensure!(
            recommendations.len() == 3,
            "exactly 3 recommendations must be provided (got {})",
            recommendations.len()
        );
        let mut priorities: Vec<i32> = recommendations.iter().map(|r| r.priority).collect();
        priorities.sort_unstable();
        ensure!(
            priorities == [1, 2, 3],
            "recommendation priorities must be exactly 1, 2, and 3 (got {priorities:?})"
        );

        ensure!(
            processing_time >= 0.0,
            "processing time cannot be negative (got {processing_time})"
        );

        Ok(Self {
            extracted_holdings,
            analysis,
            recommendations,
            processing_time,
            timestamp,
        })
    }
}

/// Success/failure envelope returned by the scan endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ScanResponse {
    pub fn ok(message: impl Into<String>, result: AnalysisResult) -> Self {
        Self {
            success: true,
            message: message.into(),
            result: Some(result),
            error_code: None,
        }
    }

    pub fn failed(message: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
            error_code: Some(error_code.into()),
        }
    }
}

/// Canned analysis result backing the test-analysis endpoint.
pub fn mock_analysis_result() -> anyhow::Result<AnalysisResult> {
    let holdings = vec![
        Holding::new("AAPL", 10.0, 0.95)?,
        Holding::new("TSLA", 5.0, 0.90)?,
        Holding::new("MSFT", 8.0, 0.98)?,
    ];

    let analysis = Analysis::new(
        6,
        "Aggressive (Tech heavy)",
        vec![
            "Strong growth potential".to_string(),
            "High-quality companies".to_string(),
        ],
        vec![
            "Concentrated in technology sector".to_string(),
            "No defensive positions".to_string(),
        ],
        None,
    )?;

    let recommendations = vec![
        Recommendation::new(
            "VTI",
            "Adds broad total market coverage to reduce concentration risk.",
            ImprovementType::Diversification,
            1,
        )?,
        Recommendation::new(
            "JNJ",
            "Provides stable healthcare dividend exposure for balance.",
            ImprovementType::SectorBalance,
            2,
        )?,
        Recommendation::new(
            "GLD",
            "Hedge against market uncertainty and inflation.",
            ImprovementType::RiskReduction,
            3,
        )?,
    ];

    AnalysisResult::new(holdings, analysis, recommendations, 2.5, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
    }

    fn recommendation(ticker: &str, priority: i32) -> Recommendation {
        Recommendation::new(
            ticker,
            "Improves diversification across sectors.",
            ImprovementType::Diversification,
            priority,
        )
        .unwrap()
    }

    #[test]
    fn holding_uppercases_and_trims_ticker() {
        let h = Holding::new("  aapl ", 10.5, 1.0).unwrap();
        assert_eq!(h.ticker, "AAPL");
        assert_eq!(h.quantity, 10.5);
    }

    #[test]
    fn holding_accepts_dots_and_hyphens() {
        assert_eq!(Holding::new("brk.b", 1.0, 1.0).unwrap().ticker, "BRK.B");
        assert_eq!(Holding::new("BF-B", 2.0, 1.0).unwrap().ticker, "BF-B");
    }

    #[test]
    fn holding_rejects_bad_tickers() {
        assert!(Holding::new("", 1.0, 1.0).is_err());
        assert!(Holding::new("   ", 1.0, 1.0).is_err());
        assert!(Holding::new("AA PL", 1.0, 1.0).is_err());
        assert!(Holding::new("AAPL!", 1.0, 1.0).is_err());
        assert!(Holding::new("TOOLONGTICKER", 1.0, 1.0).is_err());
    }

    #[test]
    fn holding_rejects_non_positive_quantity() {
        assert!(Holding::new("AAPL", 0.0, 1.0).is_err());
        assert!(Holding::new("AAPL", -5.0, 1.0).is_err());
        assert!(Holding::new("AAPL", f64::NAN, 1.0).is_err());
    }

    #[test]
    fn holding_rejects_out_of_range_confidence() {
        assert!(Holding::new("AAPL", 1.0, -0.1).is_err());
        assert!(Holding::new("AAPL", 1.0, 1.5).is_err());
    }

    #[test]
    fn recommendation_requires_meaningful_reason() {
        assert!(Recommendation::new("VTI", "too short", ImprovementType::Diversification, 1).is_err());
        assert!(Recommendation::new("VTI", "   padded   ", ImprovementType::Diversification, 1).is_err());
        let r = Recommendation::new(
            "vti",
            "  Adds broad market coverage.  ",
            ImprovementType::Diversification,
            1,
        )
        .unwrap();
        assert_eq!(r.ticker, "VTI");
        assert_eq!(r.reason, "Adds broad market coverage.");
    }

    #[test]
    fn recommendation_rejects_out_of_range_priority() {
        for priority in [0, 4, -1] {
            assert!(Recommendation::new(
                "VTI",
                "Adds broad market coverage.",
                ImprovementType::Diversification,
                priority,
            )
            .is_err());
        }
    }

    #[test]
    fn analysis_rejects_out_of_range_health_score() {
        assert!(Analysis::new(0, "Moderate", vec![], vec![], None).is_err());
        assert!(Analysis::new(11, "Moderate", vec![], vec![], None).is_err());
        assert!(Analysis::new(10, "Moderate", vec![], vec![], None).is_ok());
    }

    #[test]
    fn analysis_rejects_blank_risk_profile() {
        assert!(Analysis::new(5, "   ", vec![], vec![], None).is_err());
    }

    #[test]
    fn analysis_rejects_negative_total_value() {
        assert!(Analysis::new(5, "Moderate", vec![], vec![], Some(-1.0)).is_err());
        assert!(Analysis::new(5, "Moderate", vec![], vec![], Some(0.0)).is_ok());
    }

    #[test]
    fn analysis_silently_drops_blank_list_entries() {
        let a = Analysis::new(
            5,
            "Moderate",
            vec!["  Strong growth  ".to_string(), "   ".to_string(), String::new()],
            vec![],
            None,
        )
        .unwrap();
        assert_eq!(a.strengths, vec!["Strong growth".to_string()]);
        assert!(a.weaknesses.is_empty());
    }

    #[test]
    fn result_rejects_empty_holdings() {
        let analysis = Analysis::new(5, "Moderate", vec![], vec![], None).unwrap();
        let recs = vec![
            recommendation("VTI", 1),
            recommendation("JNJ", 2),
            recommendation("GLD", 3),
        ];
        assert!(AnalysisResult::new(vec![], analysis, recs, 0.0, timestamp()).is_err());
    }

    #[test]
    fn result_rejects_duplicate_tickers() {
        let holdings = vec![
            Holding::new("aapl", 10.0, 1.0).unwrap(),
            Holding::new("AAPL", 5.0, 1.0).unwrap(),
        ];
        let analysis = Analysis::new(5, "Moderate", vec![], vec![], None).unwrap();
        let recs = vec![
            recommendation("VTI", 1),
            recommendation("JNJ", 2),
            recommendation("GLD", 3),
        ];
        let err = AnalysisResult::new(holdings, analysis, recs, 0.0, timestamp()).unwrap_err();
        assert!(err.to_string().contains("duplicate ticker"));
    }

    #[test]
    fn result_rejects_wrong_recommendation_count() {
        let holdings = vec![Holding::new("AAPL", 10.0, 1.0).unwrap()];
        let analysis = Analysis::new(5, "Moderate", vec![], vec![], None).unwrap();
        let recs = vec![recommendation("VTI", 1), recommendation("JNJ", 2)];
        assert!(AnalysisResult::new(holdings, analysis, recs, 0.0, timestamp()).is_err());
    }

    #[test]
    fn result_accepts_priorities_in_any_order() {
        let holdings = vec![Holding::new("AAPL", 10.0, 1.0).unwrap()];
        let analysis = Analysis::new(5, "Moderate", vec![], vec![], None).unwrap();
        let recs = vec![
            recommendation("GLD", 3),
            recommendation("VTI", 1),
            recommendation("JNJ", 2),
        ];
        assert!(AnalysisResult::new(holdings, analysis, recs, 0.0, timestamp()).is_ok());
    }

    #[test]
    fn result_rejects_duplicate_priorities() {
        let holdings = vec![Holding::new("AAPL", 10.0, 1.0).unwrap()];
        let analysis = Analysis::new(5, "Moderate", vec![], vec![], None).unwrap();
        let recs = vec![
            recommendation("VTI", 1),
            recommendation("JNJ", 1),
            recommendation("GLD", 2),
        ];
        assert!(AnalysisResult::new(holdings, analysis, recs, 0.0, timestamp()).is_err());
    }

    #[test]
    fn result_rejects_negative_processing_time() {
        let holdings = vec![Holding::new("AAPL", 10.0, 1.0).unwrap()];
        let analysis = Analysis::new(5, "Moderate", vec![], vec![], None).unwrap();
        let recs = vec![
            recommendation("VTI", 1),
            recommendation("JNJ", 2),
            recommendation("GLD", 3),
        ];
        assert!(AnalysisResult::new(holdings, analysis, recs, -0.1, timestamp()).is_err());
    }

    #[test]
    fn mock_result_passes_validation() {
        let result = mock_analysis_result().unwrap();
        assert_eq!(result.extracted_holdings.len(), 3);
        assert_eq!(result.recommendations.len(), 3);
    }

    #[test]
    fn result_round_trips_through_serde() {
        let result = mock_analysis_result().unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let decoded: AnalysisResult = serde_json::from_str(&json).unwrap();

        // Rebuilding from the decoded parts re-runs every invariant.
        let rebuilt = AnalysisResult::new(
            decoded.extracted_holdings.clone(),
            decoded.analysis.clone(),
            decoded.recommendations.clone(),
            decoded.processing_time,
            decoded.timestamp,
        )
        .unwrap();
        assert_eq!(rebuilt, result);
    }
}
