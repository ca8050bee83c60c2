//! Captured and reconstructed responses

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventPayload, RequestFingerprint};

/// A response as captured while recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub mime_type: String,
    pub status_code: u16,
    pub resource_type: String,
    pub body: String,
    pub is_streamed: bool,
}

impl RecordedResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            mime_type: String::new(),
            status_code,
            resource_type: String::new(),
            body: body.into(),
            is_streamed: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn streamed(mut self, is_streamed: bool) -> Self {
        self.is_streamed = is_streamed;
        self
    }

    /// Audio / video resources
    pub fn is_media(&self) -> bool {
        matches!(
            self.resource_type.to_ascii_lowercase().as_str(),
            "media" | "video" | "audio"
        )
    }

    pub fn into_event(
        self,
        fingerprint: RequestFingerprint,
        frame_id: &str,
        sequence_number: i64,
        logical_timestamp: f64,
    ) -> Event {
        Event::new(
            frame_id,
            sequence_number,
            logical_timestamp,
            EventPayload::ResourceFetch {
                request_fingerprint: fingerprint,
                url: self.url,
                method: self.method,
                headers: self.headers,
                mime_type: self.mime_type,
                status_code: self.status_code,
                resource_type: self.resource_type,
                body: self.body,
                is_streamed: self.is_streamed,
            },
        )
    }

    pub fn from_event(event: &Event) -> Option<(RequestFingerprint, Self)> {
        match &event.payload {
            EventPayload::ResourceFetch {
                request_fingerprint,
                url,
                method,
                headers,
                mime_type,
                status_code,
                resource_type,
                body,
                is_streamed,
            } => Some((
                request_fingerprint.clone(),
                Self {
                    url: url.clone(),
                    method: method.clone(),
                    headers: headers.clone(),
                    mime_type: mime_type.clone(),
                    status_code: *status_code,
                    resource_type: resource_type.clone(),
                    body: body.clone(),
                    is_streamed: *is_streamed,
                },
            )),
            _ => None,
        }
    }

    /// The response head a consumer sees on replay
    pub fn replayed(&self) -> ReplayedResponse {
        ReplayedResponse {
            url: self.url.clone(),
            status_code: self.status_code,
            mime_type: self.mime_type.clone(),
            headers: self.headers.clone(),
            resource_type: self.resource_type.clone(),
            expected_length: self.body.len(),
        }
    }
}

/// Response head rebuilt from a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayedResponse {
    pub url: String,
    pub status_code: u16,
    pub mime_type: String,
    pub headers: BTreeMap<String, String>,
    pub resource_type: String,
    pub expected_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_conversion_keeps_fields() {
        let response = RecordedResponse::new(404, "missing")
            .with_url("https://x/a")
            .with_header("content-type", "text/plain")
            .with_mime_type("text/plain");
        let event = response
            .clone()
            .into_event(RequestFingerprint::new("GET|https://x/a"), "F1", 3, 9.0);

        let (fp, back) = RecordedResponse::from_event(&event).unwrap();
        assert_eq!(fp.as_str(), "GET|https://x/a");
        assert_eq!(back, response);
        assert_eq!(event.stream_key(), "GET|https://x/a");
    }

    #[test]
    fn test_media_detection() {
        assert!(RecordedResponse::new(200, "").with_resource_type("Media").is_media());
        assert!(RecordedResponse::new(200, "").with_resource_type("video").is_media());
        assert!(!RecordedResponse::new(200, "").with_resource_type("Script").is_media());
    }

    #[test]
    fn test_replayed_head() {
        let head = RecordedResponse::new(200, "ABC").replayed();
        assert_eq!(head.expected_length, 3);
        assert_eq!(head.status_code, 200);
    }
}
