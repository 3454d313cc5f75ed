//! Analysis-stage collaborators.
//!
//! Pronunciation, grammar, lexical and fluency are bounded HTTP requests to
//! their respective services; vocabulary is graded locally against the CEFR
//! lexicon. Every client normalizes failures into [`AnalyzerError`] so the
//! orchestrator can record an error sub-result and move on.

use crate::lexicon::{self, CefrLevel};
use async_trait::async_trait;
use seab_common::events::{AnalysisReport, WordDetail};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Analyzer client errors
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Analyzer not initialized: {0}")]
    NotInitialized(String),
}

/// Pronunciation output: the report plus per-word detail that feeds fluency.
#[derive(Debug, Clone)]
pub struct PronunciationAssessment {
    pub report: AnalysisReport,
    pub word_details: Vec<WordDetail>,
}

/// Transcript-only analysis stage (grammar, lexical, vocabulary).
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, transcript: &str) -> Result<AnalysisReport, AnalyzerError>;
}

/// Pronunciation stage; consumes the local WAV.
#[async_trait]
pub trait PronunciationAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        wav_path: &Path,
        transcript: &str,
    ) -> Result<PronunciationAssessment, AnalyzerError>;
}

/// Fluency stage; consumes the transcript plus pronunciation word detail.
#[async_trait]
pub trait FluencyAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        transcript: &str,
        word_details: &[WordDetail],
    ) -> Result<AnalysisReport, AnalyzerError>;
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, AnalyzerError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AnalyzerError::Network(e.to_string()))
}

async fn post_for_report(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
) -> Result<Value, AnalyzerError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| AnalyzerError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AnalyzerError::Api(status.as_u16(), text));
    }

    response
        .json()
        .await
        .map_err(|e| AnalyzerError::Parse(e.to_string()))
}

fn report_from_value(value: Value) -> Result<AnalysisReport, AnalyzerError> {
    serde_json::from_value(value).map_err(|e| AnalyzerError::Parse(e.to_string()))
}

/// HTTP client for a transcript-only analysis service.
pub struct HttpTextAnalyzer {
    http_client: reqwest::Client,
    url: String,
    stage: &'static str,
}

impl HttpTextAnalyzer {
    pub fn new(
        stage: &'static str,
        url: String,
        timeout_secs: u64,
    ) -> Result<Self, AnalyzerError> {
        Ok(Self {
            http_client: build_client(timeout_secs)?,
            url,
            stage,
        })
    }
}

#[async_trait]
impl TextAnalyzer for HttpTextAnalyzer {
    async fn analyze(&self, transcript: &str) -> Result<AnalysisReport, AnalyzerError> {
        debug!(stage = self.stage, url = %self.url, "Requesting analysis");
        let body = json!({
            "transcript": transcript,
            "sentences": lexicon::split_sentences(transcript),
        });
        let value = post_for_report(&self.http_client, &self.url, &body).await?;
        report_from_value(value)
    }
}

/// HTTP client for the pronunciation service.
pub struct HttpPronunciationAnalyzer {
    http_client: reqwest::Client,
    url: String,
}

impl HttpPronunciationAnalyzer {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self, AnalyzerError> {
        Ok(Self {
            http_client: build_client(timeout_secs)?,
            url,
        })
    }
}

#[async_trait]
impl PronunciationAnalyzer for HttpPronunciationAnalyzer {
    async fn analyze(
        &self,
        wav_path: &Path,
        transcript: &str,
    ) -> Result<PronunciationAssessment, AnalyzerError> {
        let body = json!({
            "wav_path": wav_path.display().to_string(),
            "transcript": transcript,
        });
        let mut value = post_for_report(&self.http_client, &self.url, &body).await?;

        let word_details = match value.get_mut("word_details") {
            Some(details) => serde_json::from_value(details.take())
                .map_err(|e| AnalyzerError::Parse(e.to_string()))?,
            None => Vec::new(),
        };

        Ok(PronunciationAssessment {
            report: report_from_value(value)?,
            word_details,
        })
    }
}

/// HTTP client for the fluency service.
pub struct HttpFluencyAnalyzer {
    http_client: reqwest::Client,
    url: String,
}

impl HttpFluencyAnalyzer {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self, AnalyzerError> {
        Ok(Self {
            http_client: build_client(timeout_secs)?,
            url,
        })
    }
}

#[async_trait]
impl FluencyAnalyzer for HttpFluencyAnalyzer {
    async fn analyze(
        &self,
        transcript: &str,
        word_details: &[WordDetail],
    ) -> Result<AnalysisReport, AnalyzerError> {
        let body = json!({
            "transcript": transcript,
            "word_details": word_details,
        });
        let value = post_for_report(&self.http_client, &self.url, &body).await?;
        report_from_value(value)
    }
}

/// Local vocabulary grading against the process-wide CEFR lexicon.
pub struct LexiconVocabularyAnalyzer;

fn level_points(level: CefrLevel) -> f64 {
    match level {
        CefrLevel::A1 => 40.0,
        CefrLevel::A2 => 50.0,
        CefrLevel::B1 => 65.0,
        CefrLevel::B2 => 80.0,
        CefrLevel::C1 => 90.0,
        CefrLevel::C2 => 100.0,
    }
}

#[async_trait]
impl TextAnalyzer for LexiconVocabularyAnalyzer {
    async fn analyze(&self, transcript: &str) -> Result<AnalysisReport, AnalyzerError> {
        let lexicon = lexicon::global().ok_or_else(|| {
            AnalyzerError::NotInitialized("CEFR lexicon has not been loaded".into())
        })?;

        let mut seen = std::collections::HashSet::new();
        let mut level_counts: BTreeMap<&'static str, u32> = BTreeMap::new();
        let mut points = 0.0;
        let mut known = 0u32;
        let mut issues = Vec::new();

        for token in transcript.split_whitespace() {
            let word = token
                .trim_matches(|c: char| !c.is_alphabetic())
                .to_lowercase();
            if word.is_empty() || !seen.insert(word.clone()) {
                continue;
            }
            let Some(level) = lexicon.level_of(&word) else {
                continue;
            };

            known += 1;
            points += level_points(level);
            *level_counts.entry(level.as_str()).or_insert(0) += 1;

            if let Some(next) = level.next() {
                if issues.len() < 5 {
                    issues.push(format!(
                        "Consider replacing '{word}' ({}) with a {} alternative",
                        level.as_str(),
                        next.as_str()
                    ));
                }
            }
        }

        let unique_words = seen.len();
        let grade = if known > 0 {
            points / known as f64
        } else {
            0.0
        };

        Ok(AnalysisReport {
            grade,
            issues,
            detail: json!({
                "level_counts": level_counts,
                "unique_words": unique_words,
                "known_words": known,
                "word_count": lexicon::count_words(transcript),
            }),
        })
    }
}

/// The full set of stage analyzers handed to the orchestrator.
pub struct AnalyzerSet {
    pub pronunciation: std::sync::Arc<dyn PronunciationAnalyzer>,
    pub grammar: std::sync::Arc<dyn TextAnalyzer>,
    pub lexical: std::sync::Arc<dyn TextAnalyzer>,
    pub vocabulary: std::sync::Arc<dyn TextAnalyzer>,
    pub fluency: std::sync::Arc<dyn FluencyAnalyzer>,
}

impl AnalyzerSet {
    /// Build the production clients from configuration.
    pub fn from_config(
        analysis: &seab_common::config::AnalysisConfig,
    ) -> Result<Self, AnalyzerError> {
        let timeout = analysis.timeout_secs;
        Ok(Self {
            pronunciation: std::sync::Arc::new(HttpPronunciationAnalyzer::new(
                analysis.pronunciation_url.clone(),
                timeout,
            )?),
            grammar: std::sync::Arc::new(HttpTextAnalyzer::new(
                "grammar",
                analysis.grammar_url.clone(),
                timeout,
            )?),
            lexical: std::sync::Arc::new(HttpTextAnalyzer::new(
                "lexical",
                analysis.lexical_url.clone(),
                timeout,
            )?),
            vocabulary: std::sync::Arc::new(LexiconVocabularyAnalyzer),
            fluency: std::sync::Arc::new(HttpFluencyAnalyzer::new(
                analysis.fluency_url.clone(),
                timeout,
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::Lexicon;

    fn install_lexicon() {
        lexicon::init_with(Lexicon::from_entries([
            ("good".to_string(), CefrLevel::A2),
            ("market".to_string(), CefrLevel::A2),
            ("describe".to_string(), CefrLevel::B1),
            ("perspective".to_string(), CefrLevel::B2),
        ]));
    }

    #[tokio::test]
    async fn test_vocabulary_grading_and_suggestions() {
        install_lexicon();
        let analyzer = LexiconVocabularyAnalyzer;

        let report = analyzer
            .analyze("The market is good, and I describe my perspective.")
            .await
            .unwrap();

        // good + market (50), describe (65), perspective (80)
        let expected = (50.0 + 50.0 + 65.0 + 80.0) / 4.0;
        assert!((report.grade - expected).abs() < 1e-9);

        // Every word below C1 gets an upgrade suggestion on the ladder:
        // A2 words point at B1, the B1 word at B2, the B2 word at C1.
        assert_eq!(report.issues.len(), 4);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("'describe' (B1)") && issue.contains("B2 alternative")));
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("'perspective' (B2)") && issue.contains("C1 alternative")));
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("'good' (A2)") && issue.contains("B1 alternative")));
        assert_eq!(report.detail["known_words"], 4);
    }

    #[tokio::test]
    async fn test_vocabulary_empty_transcript() {
        install_lexicon();
        let report = LexiconVocabularyAnalyzer.analyze("").await.unwrap();
        assert_eq!(report.grade, 0.0);
        assert!(report.issues.is_empty());
    }
}
