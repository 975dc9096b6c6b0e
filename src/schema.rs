//! Wire types for the extraction response envelope.

use serde::{Deserialize, Serialize};

/// Recognized page classifications. The upstream model's vocabulary may
/// drift, so unrecognized values are passed through rather than rejected.
pub const PAGE_TYPES: [&str; 3] = ["Bill Detail", "Final Bill", "Pharmacy"];

/// A single billed line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillItem {
    pub item_name: String,
    pub item_amount: f64,
    pub item_rate: f64,
    pub item_quantity: f64,
}

/// Line items for one source document page, in visual order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub page_no: String,
    pub page_type: String,
    pub bill_items: Vec<BillItem>,
}

/// Normalized extraction output. `total_item_count` is always recomputed
/// locally from `bill_items` lengths, never taken from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub pagewise_line_items: Vec<PageResult>,
    pub total_item_count: u64,
}

/// Token accounting passed through from the model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Response envelope. Failures are signaled in-body: `token_usage` and
/// `data` serialize as `null`, and `error` carries the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub is_success: bool,
    pub token_usage: Option<TokenUsage>,
    pub data: Option<ExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn success(token_usage: TokenUsage, data: ExtractionResult) -> Self {
        Self {
            is_success: true,
            token_usage: Some(token_usage),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            is_success: false,
            token_usage: None,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let resp = ApiResponse::success(
            TokenUsage {
                total_tokens: 30,
                input_tokens: 20,
                output_tokens: 10,
            },
            ExtractionResult {
                pagewise_line_items: vec![],
                total_item_count: 0,
            },
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["is_success"], true);
        assert_eq!(json["token_usage"]["total_tokens"], 30);
        assert_eq!(json["data"]["total_item_count"], 0);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_envelope_nulls() {
        let resp = ApiResponse::failure("boom");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["is_success"], false);
        assert!(json["token_usage"].is_null());
        assert!(json["data"].is_null());
        assert_eq!(json["error"], "boom");
    }
}
