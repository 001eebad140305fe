//! Cross-document message formats.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::host::ElementId;

pub const PAGE_HEIGHT_EVENT: &str = "meetergo:page_height";
pub const HEIGHT_UPDATE_TYPE: &str = "meetergo:height-update";
pub const SCROLL_HEIGHT_TYPE: &str = "meetergo:scroll-height";
pub const REQUEST_HEIGHT_TYPE: &str = "meetergo:request-height";

/// A `message` event as delivered to the widget.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageEvent {
    pub origin: String,
    pub data: Value,
    /// The frame whose content window sent the message, when the host could
    /// resolve it.
    #[serde(default)]
    pub source: Option<ElementId>,
}

/// The accepted height report shapes, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightMessage {
    /// `{event: "meetergo:page_height", payload: {height}}`
    PageHeight(u32),
    /// `{type: "meetergo:height-update", height}`
    HeightUpdate(u32),
    /// `{type: "meetergo:scroll-height", scrollHeight}`
    ScrollHeight(u32),
}

impl HeightMessage {
    /// Recognise a height report. A shape whose discriminator matches but
    /// whose height field is absent falls through to the next shape; a
    /// present field that is not a positive number yields `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        if data.get("event").and_then(Value::as_str) == Some(PAGE_HEIGHT_EVENT) {
            if let Some(height) = data.get("payload").and_then(|p| present(p, "height")) {
                return parse_pixels(height).map(HeightMessage::PageHeight);
            }
        }

        match data.get("type").and_then(Value::as_str) {
            Some(HEIGHT_UPDATE_TYPE) => {
                present(data, "height").and_then(parse_pixels).map(HeightMessage::HeightUpdate)
            }
            Some(SCROLL_HEIGHT_TYPE) => present(data, "scrollHeight")
                .and_then(parse_pixels)
                .map(HeightMessage::ScrollHeight),
            _ => None,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            HeightMessage::PageHeight(h)
            | HeightMessage::HeightUpdate(h)
            | HeightMessage::ScrollHeight(h) => h,
        }
    }
}

pub fn parse_height(data: &Value) -> Option<u32> {
    HeightMessage::parse(data).map(HeightMessage::height)
}

fn present<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value.get(field).filter(|v| !v.is_null())
}

/// Integer pixels from a number or a numeric string. Strings are read like
/// `parseInt`: leading whitespace, optional sign, then leading digits, so
/// `"850px"` is 850.
fn parse_pixels(value: &Value) -> Option<u32> {
    let parsed = match value {
        Value::Number(number) => {
            let raw = number.as_f64()?;
            if !raw.is_finite() {
                return None;
            }
            raw.trunc()
        }
        Value::String(text) => leading_integer(text)?,
        _ => return None,
    };
    if parsed < 1.0 {
        return None;
    }
    Some(parsed.min(u32::MAX as f64) as u32)
}

fn leading_integer(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let magnitude: f64 = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Control messages the host page sends to the widget.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    OpenModal {
        link: Option<String>,
        params: Map<String, Value>,
    },
    CloseModal,
    BookingSuccessful(Value),
}

#[derive(Debug, Default, Deserialize)]
struct OpenModalData {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    params: Map<String, Value>,
}

impl HostMessage {
    pub fn parse(data: &Value) -> Option<Self> {
        match data.get("event").and_then(Value::as_str)? {
            "open-modal" => {
                let payload = match data.get("data") {
                    Some(payload) if !payload.is_null() => {
                        serde_json::from_value::<OpenModalData>(payload.clone()).ok()?
                    }
                    _ => OpenModalData::default(),
                };
                Some(HostMessage::OpenModal {
                    link: payload.link,
                    params: payload.params,
                })
            }
            "close-modal" => Some(HostMessage::CloseModal),
            "booking-successful" => Some(HostMessage::BookingSuccessful(
                data.get("data").cloned().unwrap_or(Value::Null),
            )),
            _ => None,
        }
    }
}

/// Posted into a frame to ask its page to report its height.
pub fn request_height_message() -> Value {
    json!({ "type": REQUEST_HEIGHT_TYPE })
}

/// Posted to `window.parent` when the widget itself runs inside a frame.
pub fn parent_height_message(scroll_height: u32) -> Value {
    json!({ "scrollHeight": scroll_height })
}
