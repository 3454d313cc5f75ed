//! Configuration loading for SEAB services.
//!
//! Resolution follows the standard priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file in the user or system config directory
//! 4. Compiled defaults (fallback)

use crate::events::Topic;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Broker binding: where publishes go and how logical topics map to wire
/// topic ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the broker's REST publish endpoint. `None` means
    /// publishes are logged and dropped (local development).
    pub publish_base_url: Option<String>,
    /// Overrides keyed by canonical topic name (e.g. `PRONUNCIATION_DONE`).
    pub topics: HashMap<String, String>,
    /// Path to a bearer-token credential file loaded at bus init.
    pub credentials_path: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            publish_base_url: None,
            topics: HashMap::new(),
            credentials_path: None,
        }
    }
}

impl BrokerConfig {
    /// Wire topic id for a logical topic, honoring configured overrides.
    pub fn wire_id(&self, topic: Topic) -> String {
        self.topics
            .get(topic.name())
            .cloned()
            .unwrap_or_else(|| topic.default_wire_id().to_string())
    }
}

/// Endpoints and limits for the external analysis collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub pronunciation_url: String,
    pub grammar_url: String,
    pub lexical_url: String,
    pub fluency_url: String,
    pub speech_to_text_url: String,
    /// Hard per-call timeout; a stage that exceeds it records a timeout
    /// error result.
    pub timeout_secs: u64,
    /// When true, fluency consumes the local WAV as well, and the file
    /// session keeps the file until fluency reports completion too.
    pub fluency_uses_audio: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pronunciation_url: "http://127.0.0.1:7801/analyze/pronunciation".into(),
            grammar_url: "http://127.0.0.1:7802/analyze/grammar".into(),
            lexical_url: "http://127.0.0.1:7803/analyze/lexical".into(),
            fluency_url: "http://127.0.0.1:7804/analyze/fluency".into(),
            speech_to_text_url: "http://127.0.0.1:7805/transcribe".into(),
            timeout_secs: 120,
            fluency_uses_audio: false,
        }
    }
}

/// Lifetimes for transient per-question state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// File sessions older than this are force-cleaned by the sweep.
    pub cleanup_timeout_minutes: f64,
    /// Interval of the periodic cleanup sweep.
    pub sweep_interval_secs: u64,
    /// Coordination states older than this are purged; a later redelivery
    /// recreates them.
    pub coordination_ttl_minutes: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cleanup_timeout_minutes: 30.0,
            sweep_interval_secs: 300,
            coordination_ttl_minutes: 60.0,
        }
    }
}

/// Full configuration for the analysis orchestrator service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    /// Directory transcoded WAV files are written to.
    pub work_dir: PathBuf,
    /// CEFR word-list asset loaded once at startup.
    pub lexicon_path: PathBuf,
    pub broker: BrokerConfig,
    pub analysis: AnalysisConfig,
    pub sessions: SessionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5741".into(),
            database_path: PathBuf::from("seab.db"),
            work_dir: std::env::temp_dir().join("seab-audio"),
            lexicon_path: PathBuf::from("assets/cefr-words.json"),
            broker: BrokerConfig::default(),
            analysis: AnalysisConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

/// Load configuration following the priority order above.
///
/// `cli_arg` is the optional `--config <path>` value; `SEAB_CONFIG` is the
/// environment override; otherwise `<config dir>/seab/seab-ao.toml` and
/// `/etc/seab/seab-ao.toml` are probed.
pub fn load_config(cli_arg: Option<&str>) -> Result<OrchestratorConfig> {
    if let Some(path) = cli_arg {
        return read_config_file(&PathBuf::from(path));
    }

    if let Ok(path) = std::env::var("SEAB_CONFIG") {
        return read_config_file(&PathBuf::from(path));
    }

    if let Some(path) = find_config_file() {
        return read_config_file(&path);
    }

    Ok(OrchestratorConfig::default())
}

fn read_config_file(path: &PathBuf) -> Result<OrchestratorConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
}

fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("seab").join("seab-ao.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/seab/seab-ao.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
