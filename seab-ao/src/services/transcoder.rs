//! Audio transcoding collaborator.
//!
//! Downloads a recording and converts it to the 16 kHz mono PCM WAV the
//! pronunciation analyzer requires, reporting the decoded duration.

use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Transcoder errors
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Unreadable WAV output: {0}")]
    BadOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A converted recording on local disk.
#[derive(Debug, Clone)]
pub struct TranscodedAudio {
    pub wav_path: PathBuf,
    pub duration_secs: f64,
}

/// Seam for the audio-conversion step.
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    /// Fetch `audio_url` and produce a WAV at `wav_path`.
    async fn transcode(
        &self,
        audio_url: &str,
        wav_path: &Path,
    ) -> Result<TranscodedAudio, TranscodeError>;
}

/// Production transcoder: HTTP download plus an ffmpeg subprocess.
pub struct FfmpegTranscoder {
    http_client: reqwest::Client,
}

impl FfmpegTranscoder {
    pub fn new() -> Result<Self, TranscodeError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TranscodeError::Download(e.to_string()))?;
        Ok(Self { http_client })
    }

    async fn download(&self, audio_url: &str, dest: &Path) -> Result<(), TranscodeError> {
        let response = self
            .http_client
            .get(audio_url)
            .send()
            .await
            .map_err(|e| TranscodeError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscodeError::Download(format!(
                "{audio_url} returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TranscodeError::Download(e.to_string()))?;
        tokio::fs::write(dest, &bytes).await?;
        debug!(url = %audio_url, bytes = bytes.len(), "Downloaded recording");
        Ok(())
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        audio_url: &str,
        wav_path: &Path,
    ) -> Result<TranscodedAudio, TranscodeError> {
        if let Some(parent) = wav_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let extension = Path::new(audio_url)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("tmp");
        let source_path = wav_path.with_extension(format!("src.{extension}"));

        self.download(audio_url, &source_path).await?;

        let output = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(&source_path)
            .args(["-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y"])
            .arg(wav_path)
            .output()
            .await
            .map_err(|e| TranscodeError::Conversion(format!("cannot run ffmpeg: {e}")))?;

        // The downloaded original is no longer needed either way.
        let _ = tokio::fs::remove_file(&source_path).await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::Conversion(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let duration_secs = wav_duration_secs(wav_path)?;
        info!(
            url = %audio_url,
            wav = %wav_path.display(),
            duration_secs,
            "Transcoded recording"
        );

        Ok(TranscodedAudio {
            wav_path: wav_path.to_path_buf(),
            duration_secs,
        })
    }
}

/// Duration of a PCM WAV file from its RIFF chunks.
pub fn wav_duration_secs(path: &Path) -> Result<f64, TranscodeError> {
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 12];
    file.read_exact(&mut header)
        .map_err(|_| TranscodeError::BadOutput("truncated RIFF header".into()))?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(TranscodeError::BadOutput("not a RIFF/WAVE file".into()));
    }

    let mut byte_rate: Option<f64> = None;
    let mut data_len: Option<u64> = None;
    let mut chunk_header = [0u8; 8];

    while file.read_exact(&mut chunk_header).is_ok() {
        let chunk_id = &chunk_header[0..4];
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as u64;

        if chunk_id == b"fmt " {
            let mut fmt = vec![0u8; chunk_size as usize];
            file.read_exact(&mut fmt)
                .map_err(|_| TranscodeError::BadOutput("truncated fmt chunk".into()))?;
            if fmt.len() < 16 {
                return Err(TranscodeError::BadOutput("short fmt chunk".into()));
            }
            let rate = u32::from_le_bytes([fmt[8], fmt[9], fmt[10], fmt[11]]);
            byte_rate = Some(rate as f64);
        } else if chunk_id == b"data" {
            data_len = Some(chunk_size);
            break;
        } else {
            // Skip unknown chunks, honoring RIFF word alignment.
            let skip = chunk_size + (chunk_size & 1);
            std::io::copy(&mut file.by_ref().take(skip), &mut std::io::sink())?;
        }
    }

    match (byte_rate, data_len) {
        (Some(byte_rate), Some(data_len)) if byte_rate > 0.0 => {
            Ok(data_len as f64 / byte_rate)
        }
        _ => Err(TranscodeError::BadOutput(
            "missing fmt or data chunk".into(),
        )),
    }
}
