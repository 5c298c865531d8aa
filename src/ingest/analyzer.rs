//! Captioning and OCR capabilities.
//!
//! Both are optional: an upload without them simply has empty captions or
//! OCR text. The concrete implementations shell out to existing tools; the
//! traits keep them swappable.

use crate::config::{CaptionConfig, OcrConfig};
use crate::semantic::preprocess::clean_text;
use base64::Engine as _;
use std::io::Write;
use std::process::Command;
use std::time::Duration;

const SHORT_PROMPT: &str = "Describe this image briefly:";
const DETAILED_PROMPT: &str =
    "Describe this image in detail, including objects, people, activities, setting, and mood:";

const CAPTION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {stderr}")]
    Tool { tool: String, stderr: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captions {
    pub short: String,
    pub detailed: String,
}

pub trait Captioner: Send + Sync {
    fn caption(&self, image: &[u8]) -> Result<Captions, AnalyzerError>;
}

pub trait TextRecognizer: Send + Sync {
    /// Cleaned text found in the image, empty if none.
    fn recognize(&self, image: &[u8]) -> Result<String, AnalyzerError>;
}

/// Vision model behind an OpenAI compatible `/chat/completions` endpoint
/// (OpenAI, Ollama, llama.cpp server, ...).
pub struct VisionApiCaptioner {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl VisionApiCaptioner {
    pub fn new(config: &CaptionConfig) -> Result<Self, AnalyzerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(CAPTION_TIMEOUT)
            .build()?;

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }

    fn ask(&self, prompt: &str, data_url: &str) -> Result<String, AnalyzerError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "temperature": 0.2,
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]}
            ],
        });

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(AnalyzerError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = resp.json()?;
        value
            .pointer("/choices/0/message/content")
            .and_then(|content| content.as_str())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AnalyzerError::Response(value.to_string()))
    }
}

impl Captioner for VisionApiCaptioner {
    fn caption(&self, image: &[u8]) -> Result<Captions, AnalyzerError> {
        let data_url = image_data_url(image);
        Ok(Captions {
            short: self.ask(SHORT_PROMPT, &data_url)?,
            detailed: self.ask(DETAILED_PROMPT, &data_url)?,
        })
    }
}

fn image_data_url(bytes: &[u8]) -> String {
    let mime = infer::get(bytes)
        .map(|t| t.mime_type())
        .unwrap_or("image/jpeg");
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{b64}")
}

/// Runs the tesseract CLI in single-block mode.
pub struct TesseractOcr {
    command: String,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.tesseract_cmd.clone(),
        }
    }
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&self, image: &[u8]) -> Result<String, AnalyzerError> {
        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(image)?;
        input.flush()?;

        let output = Command::new(&self.command)
            .arg(input.path())
            .arg("stdout")
            .args(["--psm", "6"])
            .output()?;

        if !output.status.success() {
            return Err(AnalyzerError::Tool {
                tool: self.command.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(clean_text(&String::from_utf8_lossy(&output.stdout)))
    }
}
