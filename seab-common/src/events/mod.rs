//! Event topics and payload types for the SEAB event system.
//!
//! Every message exchanged through the broker belongs to one logical
//! [`Topic`]. The canonical names below are the single source of truth;
//! the wire binding (broker topic id per logical topic) is configurable,
//! defaulting to the kebab-case `<name>-topic` form.

mod payloads;

pub use payloads::{
    AnalysisComplete, AnalysisOutcome, AnalysisReport, AudioConversionDone, DurationFeedback,
    QuestionAnalysisReady, QuestionResult, StageDone, StudentSubmission,
    SubmissionAnalysisComplete, TranscriptionDone, WordDetail,
};

use serde::{Deserialize, Serialize};

/// Logical event topics, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    StudentSubmission,
    AudioConversionDone,
    TranscriptionDone,
    QuestionAnalysisReady,
    PronunciationDone,
    GrammarDone,
    LexicalDone,
    VocabularyDone,
    FluencyDone,
    AnalysisComplete,
    SubmissionAnalysisComplete,
}

impl Topic {
    /// Canonical topic name, used in configuration keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::StudentSubmission => "STUDENT_SUBMISSION",
            Topic::AudioConversionDone => "AUDIO_CONVERSION_DONE",
            Topic::TranscriptionDone => "TRANSCRIPTION_DONE",
            Topic::QuestionAnalysisReady => "QUESTION_ANALYSIS_READY",
            Topic::PronunciationDone => "PRONUNCIATION_DONE",
            Topic::GrammarDone => "GRAMMAR_DONE",
            Topic::LexicalDone => "LEXICAL_DONE",
            Topic::VocabularyDone => "VOCABULARY_DONE",
            Topic::FluencyDone => "FLUENCY_DONE",
            Topic::AnalysisComplete => "ANALYSIS_COMPLETE",
            Topic::SubmissionAnalysisComplete => "SUBMISSION_ANALYSIS_COMPLETE",
        }
    }

    /// Default broker topic id when the configuration carries no override.
    pub fn default_wire_id(&self) -> &'static str {
        match self {
            Topic::StudentSubmission => "student-submission-topic",
            Topic::AudioConversionDone => "audio-conversion-done-topic",
            Topic::TranscriptionDone => "transcription-done-topic",
            Topic::QuestionAnalysisReady => "question-analysis-ready-topic",
            Topic::PronunciationDone => "pronunciation-done-topic",
            Topic::GrammarDone => "grammar-done-topic",
            Topic::LexicalDone => "lexical-done-topic",
            Topic::VocabularyDone => "vocabulary-done-topic",
            Topic::FluencyDone => "fluency-done-topic",
            Topic::AnalysisComplete => "analysis-complete-topic",
            Topic::SubmissionAnalysisComplete => "submission-analysis-complete-topic",
        }
    }

    /// Webhook route the broker pushes this topic's messages to.
    pub fn webhook_path(&self) -> &'static str {
        match self {
            Topic::StudentSubmission => "/webhooks/student-submission",
            Topic::AudioConversionDone => "/webhooks/audio-conversion-done",
            Topic::TranscriptionDone => "/webhooks/transcription-done",
            Topic::QuestionAnalysisReady => "/webhooks/question-analysis-ready",
            Topic::PronunciationDone => "/webhooks/pronunciation-done",
            Topic::GrammarDone => "/webhooks/grammar-done",
            Topic::LexicalDone => "/webhooks/lexical-done",
            Topic::VocabularyDone => "/webhooks/vocabulary-done",
            Topic::FluencyDone => "/webhooks/fluency-done",
            Topic::AnalysisComplete => "/webhooks/analysis-complete",
            Topic::SubmissionAnalysisComplete => "/webhooks/submission-analysis-complete",
        }
    }

    /// All topics, for configuration validation and test harnesses.
    pub fn all() -> &'static [Topic] {
        &[
            Topic::StudentSubmission,
            Topic::AudioConversionDone,
            Topic::TranscriptionDone,
            Topic::QuestionAnalysisReady,
            Topic::PronunciationDone,
            Topic::GrammarDone,
            Topic::LexicalDone,
            Topic::VocabularyDone,
            Topic::FluencyDone,
            Topic::AnalysisComplete,
            Topic::SubmissionAnalysisComplete,
        ]
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The five analysis stages run per question.
///
/// The string form doubles as the service name in file-session dependency
/// sets and as the key in consolidated results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pronunciation,
    Grammar,
    Lexical,
    Vocabulary,
    Fluency,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pronunciation => "pronunciation",
            Stage::Grammar => "grammar",
            Stage::Lexical => "lexical",
            Stage::Vocabulary => "vocabulary",
            Stage::Fluency => "fluency",
        }
    }

    /// The completion topic published when this stage finishes.
    pub fn done_topic(&self) -> Topic {
        match self {
            Stage::Pronunciation => Topic::PronunciationDone,
            Stage::Grammar => Topic::GrammarDone,
            Stage::Lexical => Topic::LexicalDone,
            Stage::Vocabulary => Topic::VocabularyDone,
            Stage::Fluency => Topic::FluencyDone,
        }
    }

    /// The four stages launched directly from the ready event; fluency is
    /// gated on pronunciation and launched separately.
    pub fn initial() -> &'static [Stage] {
        &[
            Stage::Pronunciation,
            Stage::Grammar,
            Stage::Lexical,
            Stage::Vocabulary,
        ]
    }

    pub fn all() -> &'static [Stage] {
        &[
            Stage::Pronunciation,
            Stage::Grammar,
            Stage::Lexical,
            Stage::Vocabulary,
            Stage::Fluency,
        ]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
