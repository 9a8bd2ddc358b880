//! Label transcription with a vision-capable chat model.
//!
//! The image is sent as a base64 data URL (OpenAI) or an `images` entry
//! (Ollama). The model only transcribes; judging the product is a separate
//! stage so that each can fail on its own.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::config::OcrConfig;
use crate::llm::{ChatModel, ChatSettings};
use crate::traits::{DisabledLabelReader, LabelReader, LabelText, ModelError};

const TRANSCRIBE_PROMPT: &str = "\
Transcribe the text printed on this food package exactly as written. \
Keep the line structure of the nutrition table and the ingredient list, \
and put the product name on the first line if it is visible. \
Do not interpret, summarize or correct anything. \
Reply with JSON only: {\"text\": \"<transcription>\", \"confidence\": <0.0-1.0>} \
where confidence is how legible the label was.";

/// Confidence assumed when the reader replies with bare text.
const UNSTRUCTURED_CONFIDENCE: f64 = 0.6;

pub struct VisionLabelReader {
    model: ChatModel,
}

impl VisionLabelReader {
    pub fn new(settings: ChatSettings) -> anyhow::Result<Self> {
        Ok(Self {
            model: ChatModel::new(settings, true)?,
        })
    }
}

#[async_trait]
impl LabelReader for VisionLabelReader {
    fn name(&self) -> &str {
        self.model.model_name()
    }

    async fn read(&self, image: &[u8], mime: &str) -> Result<LabelText, ModelError> {
        let encoded = STANDARD.encode(image);
        let message = self.model.image_message(TRANSCRIBE_PROMPT, &encoded, mime);
        let reply = self.model.send(vec![message]).await?;
        let label = parse_transcription(&reply);
        debug!(
            chars = label.text.len(),
            confidence = label.confidence,
            "label transcribed"
        );
        Ok(label)
    }
}

/// Accepts `{"text": ..., "confidence": ...}` or bare text.
pub fn parse_transcription(reply: &str) -> LabelText {
    let trimmed = reply.trim();
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(text) = obj.get("text").and_then(Value::as_str) {
            let confidence = obj
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(UNSTRUCTURED_CONFIDENCE)
                .clamp(0.0, 1.0);
            return LabelText {
                text: text.to_string(),
                confidence,
            };
        }
    }
    LabelText {
        text: trimmed.to_string(),
        confidence: if trimmed.is_empty() {
            0.0
        } else {
            UNSTRUCTURED_CONFIDENCE
        },
    }
}

/// Build the label reader from configuration.
pub fn create_reader(config: &OcrConfig) -> anyhow::Result<Arc<dyn LabelReader>> {
    match ChatSettings::from_ocr(config)? {
        None => Ok(Arc::new(DisabledLabelReader)),
        Some(settings) => Ok(Arc::new(VisionLabelReader::new(settings)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_transcription() {
        let t = parse_transcription(r#"{"text": "Sugar 12 g", "confidence": 1.7}"#);
        assert_eq!(t.text, "Sugar 12 g");
        assert_eq!(t.confidence, 1.0);
    }

    #[test]
    fn test_parse_bare_transcription() {
        let t = parse_transcription("  Protein 3 g\n");
        assert_eq!(t.text, "Protein 3 g");
        assert_eq!(t.confidence, UNSTRUCTURED_CONFIDENCE);
        assert_eq!(parse_transcription("").confidence, 0.0);
    }
}
