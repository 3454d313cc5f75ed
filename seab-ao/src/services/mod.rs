//! External collaborator clients.
//!
//! Everything the orchestrator calls out to lives here behind a trait seam:
//! the audio transcoder, the speech-to-text client, and the five analysis
//! stages. Production implementations are HTTP clients (or an ffmpeg
//! subprocess); tests substitute stubs.

pub mod analyzers;
pub mod transcoder;
pub mod transcriber;

pub use analyzers::{
    AnalyzerError, AnalyzerSet, FluencyAnalyzer, HttpFluencyAnalyzer, HttpPronunciationAnalyzer,
    HttpTextAnalyzer, LexiconVocabularyAnalyzer, PronunciationAnalyzer, PronunciationAssessment,
    TextAnalyzer,
};
pub use transcoder::{AudioTranscoder, FfmpegTranscoder, TranscodeError, TranscodedAudio};
pub use transcriber::{HttpSpeechToText, SpeechToText, TranscribeError, Transcription};
