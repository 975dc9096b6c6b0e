//! Gemini API client for the invoice-extraction model call.

use crate::config::Settings;
use crate::error::ExtractError;
use crate::input::NormalizedDocument;
use crate::schema::TokenUsage;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Fixed instruction sent with every document.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert in invoice understanding.

Extract every billed line item from the document, grouped by page, and return
ONLY valid JSON with this exact schema:

{
  "pagewise_line_items": [
    {
      "page_no": "string (page number only)",
      "page_type": "Bill Detail | Final Bill | Pharmacy",
      "bill_items": [
        {
          "item_name": "string",
          "item_amount": float,
          "item_rate": float,
          "item_quantity": float
        }
      ]
    }
  ]
}

RULES:
- Preserve the EXACT top-to-bottom visual order of items. Never sort,
  regroup, merge, or rearrange.
- Item names spanning multiple physical lines are ONE item_name.
- Extract ALL items on every page, across all columns, boxes, and sections.
  Read column 1 fully top-to-bottom, then column 2, then column 3.
- If a row shows both a per-unit value and a total, the smaller number is
  item_rate and the larger is item_amount. Never leave item_rate as 0 when
  a per-unit amount is printed.
- Split handwritten decimals like "266 94" or "266-94" are one value: 266.94.
- Never include headings, section titles, column labels, totals, subtotals,
  net amounts, balances, deposits, refunds, discounts, concessions, GST,
  CGST, SGST, or round-off lines as bill items.
- Choose "Pharmacy" when any item looks like a medicine (brand names or
  formulations like ER, SR, DSR, Injection, Tablet, Capsule); otherwise
  choose "Bill Detail" or "Final Bill".
"#;

/// Raw model reply: JSON-formatted text (possibly fenced in markdown)
/// plus the token-usage record.
#[derive(Debug)]
pub struct ModelReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(client: Client, settings: &Settings) -> Self {
        Self {
            client,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    /// Send the document plus the fixed extraction instruction, returning
    /// the model's raw text reply and token usage.
    pub async fn extract(&self, doc: &NormalizedDocument) -> Result<ModelReply, ExtractError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: EXTRACTION_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: doc.mime_type.media_type().to_string(),
                            data: BASE64.encode(&doc.bytes),
                        },
                    },
                ],
            }],
        };

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);
        debug!(
            "Calling Gemini: model={}, document={} bytes ({})",
            self.model,
            doc.bytes.len(),
            doc.mime_type.as_str()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::UpstreamService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::UpstreamService(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        let response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::UpstreamService(format!("unreadable response: {}", e)))?;

        let usage = response.usage();
        let text = response.text();

        info!(
            "Gemini response: {} chars, {} tokens (input: {}, output: {})",
            text.len(),
            usage.total_tokens,
            usage.input_tokens,
            usage.output_tokens
        );

        Ok(ModelReply { text, usage })
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    /// Token usage, zeroed when the metadata block is absent.
    fn usage(&self) -> TokenUsage {
        match &self.usage_metadata {
            Some(u) => TokenUsage {
                // Absent total falls back to the sum of the two counts.
                total_tokens: u
                    .total_token_count
                    .unwrap_or(u.prompt_token_count + u.candidates_token_count),
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            },
            None => TokenUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_with_usage() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "{\"pagewise"}, {"text": "_line_items\":[]}"}]}}
            ],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 45,
                "totalTokenCount": 165
            }
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();

        assert_eq!(resp.text(), "{\"pagewise_line_items\":[]}");
        let usage = resp.usage();
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 45);
        assert_eq!(usage.total_tokens, 165);
    }

    #[test]
    fn test_missing_total_falls_back_to_sum() {
        let json = r#"{
            "candidates": [{"content": {"parts": [{"text": "{}"}]}}],
            "usageMetadata": {"promptTokenCount": 80, "candidatesTokenCount": 20}
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();

        let usage = resp.usage();
        assert_eq!(usage.input_tokens, 80);
        assert_eq!(usage.output_tokens, 20);
        assert_eq!(usage.total_tokens, 100);
    }

    #[test]
    fn test_parse_response_missing_usage() {
        let json = r#"{"candidates": [{"content": {"parts": [{"text": "hi"}]}}]}"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();

        assert_eq!(resp.text(), "hi");
        assert_eq!(resp.usage().total_tokens, 0);
    }

    #[test]
    fn test_parse_empty_response() {
        let resp: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(resp.text(), "");
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: "prompt".into(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "application/pdf".into(),
                            data: "JVBERg==".into(),
                        },
                    },
                ],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(
            json["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "application/pdf"
        );
    }
}
