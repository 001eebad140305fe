//! Query parameters forwarded into every generated frame URL.
//!
//! Three sources are merged, later ones overriding earlier ones: the host
//! page's own query string, the configured prefill values and per-call
//! overrides (for example captured form fields). A key keeps the position of
//! its first appearance, so identical inputs always serialize identically.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Characters `encodeURIComponent` leaves alone: `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("value for `{0}` cannot be encoded as a query parameter")]
    Unencodable(String),
}

/// Insertion-ordered string map with last-write-wins values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    entries: Vec<(String, String)>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string (with or without the leading `?`), dropping
    /// parameters with empty values.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::new();
        match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(pairs) => {
                for (key, value) in pairs {
                    if !value.is_empty() {
                        params.insert(key, value);
                    }
                }
            }
            Err(err) => warn!(error = %err, "ignoring unparseable page query string"),
        }
        params
    }

    /// Build from JSON values, dropping `null`s and skipping values that
    /// cannot be expressed as a parameter.
    pub fn from_values(values: &Map<String, Value>) -> Self {
        let mut params = Self::new();
        params.overlay_values(values);
        params
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn overlay(&mut self, other: &ParamSet) {
        for (key, value) in &other.entries {
            self.insert(key.clone(), value.clone());
        }
    }

    pub fn overlay_values(&mut self, values: &Map<String, Value>) {
        for (key, value) in values {
            match scalar_value(key, value) {
                Ok(Some(value)) => self.insert(key.clone(), value),
                Ok(None) => {}
                Err(err) => warn!(key = %key, error = %err, "skipping parameter"),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `key=value` pairs joined by `&`, each side percent-encoded on its own.
    pub fn to_query_string(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

fn scalar_value(key: &str, value: &Value) -> Result<Option<String>, ParamError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        Value::Array(_) | Value::Object(_) => Err(ParamError::Unencodable(key.to_string())),
    }
}

pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT).to_string()
}

/// Merge page query, prefill and overrides into one encoded query string.
pub fn build_params(
    page_url: Option<&Url>,
    prefill: Option<&Map<String, Value>>,
    overrides: Option<&ParamSet>,
) -> String {
    let mut merged = page_url
        .and_then(Url::query)
        .map(ParamSet::from_query)
        .unwrap_or_default();
    if let Some(prefill) = prefill {
        merged.overlay_values(prefill);
    }
    if let Some(overrides) = overrides {
        merged.overlay(overrides);
    }
    merged.to_query_string()
}

/// Append an encoded query string to `link`.
pub fn append_params(link: &str, query: &str) -> String {
    if query.is_empty() {
        return link.to_string();
    }
    let separator = if link.contains('?') { '&' } else { '?' };
    format!("{link}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    #[test]
    fn later_sources_override_earlier_ones_in_first_seen_order() {
        let page = Url::parse("https://host.example/book?a=1").unwrap();
        let prefill = object(json!({"a": "2", "b": "3"}));
        let overrides: ParamSet = [("b", "4"), ("c", "5")].into_iter().collect();

        let first = build_params(Some(&page), Some(&prefill), Some(&overrides));
        let second = build_params(Some(&page), Some(&prefill), Some(&overrides));

        assert_eq!(first, "a=2&b=4&c=5");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_page_values_and_nulls_are_dropped() {
        let page = Url::parse("https://host.example/?utm_source=&ref=mail").unwrap();
        let prefill = object(json!({"email": null, "firstname": "Ada"}));
        assert_eq!(build_params(Some(&page), Some(&prefill), None), "ref=mail&firstname=Ada");
    }

    #[test]
    fn keys_and_values_are_encoded_independently() {
        let params: ParamSet = [("full name", "Ada Lovelace & co"), ("note", "50%=half")]
            .into_iter()
            .collect();
        assert_eq!(
            params.to_query_string(),
            "full%20name=Ada%20Lovelace%20%26%20co&note=50%25%3Dhalf"
        );
        assert_eq!(encode_component("a-b_c.d!e~f*g'h(i)"), "a-b_c.d!e~f*g'h(i)");
    }

    #[test]
    fn page_query_is_decoded_before_re_encoding() {
        let page = Url::parse("https://host.example/?name=Ada+Lovelace&city=K%C3%B6ln").unwrap();
        assert_eq!(build_params(Some(&page), None, None), "name=Ada%20Lovelace&city=K%C3%B6ln");
    }

    #[test]
    fn structured_values_are_skipped() {
        let values = object(json!({"tags": ["a", "b"], "count": 3, "vip": true}));
        let params = ParamSet::from_values(&values);
        assert_eq!(params.get("tags"), None);
        assert_eq!(params.to_query_string(), "count=3&vip=true");
    }

    #[test]
    fn append_params_respects_existing_query() {
        assert_eq!(append_params("https://cal.meetergo.com/x", ""), "https://cal.meetergo.com/x");
        assert_eq!(append_params("https://cal.meetergo.com/x", "a=1"), "https://cal.meetergo.com/x?a=1");
        assert_eq!(
            append_params("https://cal.meetergo.com/x?lang=de", "a=1"),
            "https://cal.meetergo.com/x?lang=de&a=1"
        );
    }
}
