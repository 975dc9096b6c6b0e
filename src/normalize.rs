//! Validation and normalization of the model's raw JSON reply.
//!
//! The upstream model is not guaranteed to return strictly valid JSON: it
//! may wrap output in markdown code fences or leave a trailing comma. The
//! cleanup here is pre-parse normalization; the JSON parse itself stays
//! strict.

use crate::error::ExtractError;
use crate::schema::{BillItem, ExtractionResult, PageResult, PAGE_TYPES};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

/// Parse, validate, and normalize the model's raw text into an
/// [`ExtractionResult`]. Page and item order are preserved exactly;
/// `total_item_count` is recomputed locally.
pub fn normalize(raw: &str) -> Result<ExtractionResult, ExtractError> {
    let cleaned = strip_fences(raw);

    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(first_err) => {
            debug!("Strict parse failed ({}), attempting salvage", first_err);
            let salvaged = salvage(&cleaned);
            serde_json::from_str(&salvaged).map_err(|_| {
                ExtractError::MalformedResponse(format!(
                    "{}: {}",
                    first_err,
                    preview(&cleaned)
                ))
            })?
        }
    };

    let pages = value
        .get("pagewise_line_items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            ExtractError::MalformedResponse(format!(
                "missing `pagewise_line_items` array: {}",
                preview(&cleaned)
            ))
        })?;

    let mut pagewise_line_items = Vec::with_capacity(pages.len());
    let mut total_item_count: u64 = 0;

    for (page_index, page) in pages.iter().enumerate() {
        let page_no = match page.get("page_no") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(ExtractError::MissingField {
                    page_index,
                    field: "page_no",
                })
            }
        };

        // Unrecognized page_type values are passed through as-is; the
        // model's classification vocabulary may drift.
        let page_type = page
            .get("page_type")
            .and_then(|v| v.as_str())
            .ok_or(ExtractError::MissingField {
                page_index,
                field: "page_type",
            })?
            .to_string();

        if !PAGE_TYPES.contains(&page_type.as_str()) {
            debug!("Page {}: unrecognized page_type {:?} passed through", page_index, page_type);
        }

        let raw_items = page
            .get("bill_items")
            .and_then(|v| v.as_array())
            .ok_or(ExtractError::MissingField {
                page_index,
                field: "bill_items",
            })?;

        let mut bill_items = Vec::with_capacity(raw_items.len());
        for (item_index, item) in raw_items.iter().enumerate() {
            let item_amount = coerce_number(item.get("item_amount"), page_index, item_index, "item_amount")?;

            // Rows where the model found no amount are noise, not items.
            if item_amount == 0.0 {
                continue;
            }

            let item_rate = coerce_number(item.get("item_rate"), page_index, item_index, "item_rate")?;
            let item_quantity =
                coerce_number(item.get("item_quantity"), page_index, item_index, "item_quantity")?;

            let item_name = item
                .get("item_name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .replace('\n', " ");

            bill_items.push(BillItem {
                item_name,
                item_amount,
                item_rate,
                item_quantity,
            });
        }

        total_item_count += bill_items.len() as u64;
        pagewise_line_items.push(PageResult {
            page_no,
            page_type,
            bill_items,
        });
    }

    Ok(ExtractionResult {
        pagewise_line_items,
        total_item_count,
    })
}

/// Strip markdown code fences and a leading `json` language tag.
fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();

    let inner = if trimmed.contains("```json") {
        trimmed
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(trimmed)
    } else if trimmed.contains("```") {
        trimmed.split("```").nth(1).unwrap_or(trimmed)
    } else {
        trimmed
    };

    let inner = inner.trim();
    // Some replies open with a bare `json` tag outside any fence.
    let inner = inner
        .strip_prefix("json")
        .or_else(|| inner.strip_prefix("JSON"))
        .map(str::trim_start)
        .unwrap_or(inner);

    inner.to_string()
}

/// Last-resort repair for almost-JSON: slice to the outermost braces, drop
/// NUL bytes, and remove trailing commas before `}` / `]`.
fn salvage(text: &str) -> String {
    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    let trailing_comma =
        TRAILING_COMMA.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid literal pattern"));

    let start = text.find('{').unwrap_or(0);
    let end = text.rfind('}').map(|i| i + 1).unwrap_or(text.len());
    let sliced = text.get(start..end).unwrap_or(text).replace('\0', "");

    trailing_comma.replace_all(&sliced, "$1").into_owned()
}

/// Coerce a JSON value to f64, rounded to 2 decimal places.
///
/// Numbers pass through; strings are cleaned of thousands separators,
/// currency signs, and accounting parentheses before parsing; null,
/// missing, and empty values become 0.0.
fn coerce_number(
    value: Option<&Value>,
    page_index: usize,
    item_index: usize,
    field: &'static str,
) -> Result<f64, ExtractError> {
    let parsed = match value {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let cleaned = s
                .replace([',', '₹', '$'], "")
                .replace('(', "-")
                .replace(')', "")
                .trim()
                .to_string();
            if cleaned.is_empty() {
                Some(0.0)
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
        Some(_) => None,
    };

    match parsed {
        Some(n) => Ok((n * 100.0).round() / 100.0),
        None => Err(ExtractError::TypeCoercion {
            page_index,
            item_index,
            field,
            value: value.map(|v| v.to_string()).unwrap_or_default(),
        }),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
