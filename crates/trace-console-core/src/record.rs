//! Trace record data model.

use std::borrow::Cow;

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{DeserializeOwned, IgnoredAny, IntoDeserializer, value::StrDeserializer},
};

use crate::format::format_code_light;

/// Kind of remote invocation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Plain synchronous function.
    Function,
    /// Async function.
    AsyncFunction,
    /// Service call. Repeated service records are deduplicated by call path.
    Service,
    /// Event listener invocation.
    Listener,
}

/// Completion status of a remote invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    Error,
    Cancel,
}

/// One observed remote invocation.
///
/// Field names follow the wire format (`callTime`, `callPath`, `type`, ...).
/// Every remote-supplied field is optional; a missing `status` means the call
/// is still in flight or its outcome is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// Advisory timestamp, opaque to the console.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_time: Option<String>,
    /// Identifier of the invoked function or route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_path: Option<String>,
    /// `None` when absent or not a known kind.
    #[serde(
        default,
        rename = "type",
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<CallKind>,
    /// `None` when absent or not a known status.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<CallStatus>,
    /// Serialized request payload, formatted on demand only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params: Option<String>,
    /// Serialized response payload, formatted on demand only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_params: Option<String>,
    /// Local display state. Never trusted from the remote side.
    #[serde(default)]
    pub is_formatted: bool,
    /// Optional identifier. Not guaranteed present or unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseTag {
    Text(String),
    Other(IgnoredAny),
}

/// Parse a unit-variant tag, mapping unknown or non-string values to `None`
/// so the rest of the record survives.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<LooseTag>::deserialize(deserializer)? {
        Some(LooseTag::Text(tag)) => {
            let tag_de: StrDeserializer<'_, serde::de::value::Error> = tag.as_str().into_deserializer();
            match T::deserialize(tag_de) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::debug!("Ignoring unknown tag '{tag}': {e}");
                    Ok(None)
                }
            }
        }
        Some(LooseTag::Other(_)) | None => Ok(None),
    }
}

impl TraceRecord {
    /// Create a record for the given call path and kind.
    #[must_use]
    pub fn new(call_path: impl Into<String>, kind: CallKind) -> Self {
        Self {
            call_path: Some(call_path.into()),
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Set the completion status.
    #[must_use]
    pub const fn with_status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the request payload.
    #[must_use]
    pub fn with_request(mut self, params: impl Into<String>) -> Self {
        self.request_params = Some(params.into());
        self
    }

    /// Set the response payload.
    #[must_use]
    pub fn with_response(mut self, params: impl Into<String>) -> Self {
        self.response_params = Some(params.into());
        self
    }

    /// Reset local display state for a record that just arrived from the wire.
    #[must_use]
    pub fn arrived(mut self) -> Self {
        self.is_formatted = false;
        self
    }

    /// Whether the record is a service call (subject to deduplication).
    #[must_use]
    pub fn is_service(&self) -> bool {
        self.kind == Some(CallKind::Service)
    }

    /// Request payload for display: pretty-printed when the record is
    /// flagged as formatted, raw otherwise.
    #[must_use]
    pub fn request_view(&self, lang: &str) -> Cow<'_, str> {
        self.payload_view(self.request_params.as_deref(), lang)
    }

    /// Response payload for display. See [`Self::request_view`].
    #[must_use]
    pub fn response_view(&self, lang: &str) -> Cow<'_, str> {
        self.payload_view(self.response_params.as_deref(), lang)
    }

    fn payload_view<'a>(&self, payload: Option<&'a str>, lang: &str) -> Cow<'a, str> {
        let raw = payload.unwrap_or_default();
        if self.is_formatted {
            Cow::Owned(format_code_light(raw, lang))
        } else {
            Cow::Borrowed(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_record() {
        let json = r#"{
            "callTime": "12:00:01.123",
            "callPath": "user.service.load",
            "type": "Service",
            "status": "ok",
            "requestParams": "{\"id\":1}",
            "responseParams": "{\"name\":\"a\"}",
            "isFormatted": true,
            "id": "abc"
        }"#;

        let record: TraceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.call_path.as_deref(), Some("user.service.load"));
        assert_eq!(record.kind, Some(CallKind::Service));
        assert_eq!(record.status, Some(CallStatus::Ok));
        assert!(record.is_formatted);
        assert!(!record.arrived().is_formatted);
    }

    #[test]
    fn test_missing_fields_default() {
        let record: TraceRecord = serde_json::from_str(r#"{"callPath":"x"}"#).unwrap();
        assert_eq!(record.kind, None);
        assert_eq!(record.status, None);
        assert!(!record.is_formatted);
    }

    #[test]
    fn test_unknown_kind_and_status_keep_record() {
        let record: TraceRecord =
            serde_json::from_str(r#"{"callPath":"a","type":"Getter","status":"pending"}"#).unwrap();
        assert_eq!(record.call_path.as_deref(), Some("a"));
        assert_eq!(record.kind, None);
        assert_eq!(record.status, None);

        let record: TraceRecord =
            serde_json::from_str(r#"{"callPath":"b","type":7,"status":null}"#).unwrap();
        assert_eq!(record.call_path.as_deref(), Some("b"));
        assert_eq!(record.kind, None);
        assert_eq!(record.status, None);
    }

    #[test]
    fn test_payload_view_respects_flag() {
        let mut record = TraceRecord::new("a", CallKind::Function).with_request("var x=1;var y=2;");
        assert_eq!(record.request_view("js"), "var x=1;var y=2;");

        record.is_formatted = true;
        assert_eq!(record.request_view("js"), "var x=1;\nvar y=2;");
        assert_eq!(record.response_view("js"), "");
    }
}
