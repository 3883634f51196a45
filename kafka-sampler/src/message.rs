use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadEncoding {
    Null,
    Json,
    Text,
    Binary,
}

/// A decoded key or value, ready to be rendered by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub encoding: PayloadEncoding,
    /// JSON payloads are embedded as-is, text as a string, binary as base64.
    pub payload: Value,
    pub size: usize,
}

impl MessagePayload {
    pub fn null() -> Self {
        Self {
            encoding: PayloadEncoding::Null,
            payload: Value::Null,
            size: 0,
        }
    }

    pub fn decode(raw: Option<&[u8]>) -> Self {
        let Some(bytes) = raw else {
            return Self::null();
        };
        let size = bytes.len();

        if looks_like_json(bytes) {
            if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
                return Self {
                    encoding: PayloadEncoding::Json,
                    payload: value,
                    size,
                };
            }
        }

        match std::str::from_utf8(bytes) {
            Ok(text) => Self {
                encoding: PayloadEncoding::Text,
                payload: Value::String(text.to_string()),
                size,
            },
            Err(_) => Self {
                encoding: PayloadEncoding::Binary,
                payload: Value::String(STANDARD.encode(bytes)),
                size,
            },
        }
    }

    /// Text used by filter expressions. Binary payloads match on their
    /// base64 form.
    pub fn as_filter_text(&self) -> std::borrow::Cow<'_, str> {
        match &self.payload {
            Value::Null => "".into(),
            Value::String(s) => s.as_str().into(),
            other => other.to_string().into(),
        }
    }
}

// Bare numbers and quoted strings parse as JSON too, but are more useful
// rendered as text.
fn looks_like_json(bytes: &[u8]) -> bool {
    matches!(
        bytes.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub key: String,
    pub value: MessagePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub partition_id: i32,
    pub offset: i64,
    /// Unix milliseconds, when the broker or producer recorded one.
    pub timestamp: Option<i64>,
    pub key: MessagePayload,
    pub value: MessagePayload,
    pub headers: Vec<MessageHeader>,
    pub compression: String,
    pub is_transactional: bool,
    /// Bytes of key, value and headers as read from the log.
    pub size: usize,
}

impl TopicMessage {
    pub fn new(
        partition_id: i32,
        offset: i64,
        timestamp: Option<i64>,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: Vec<(String, Option<Vec<u8>>)>,
    ) -> Self {
        let key = MessagePayload::decode(key);
        let value = MessagePayload::decode(value);
        let headers: Vec<MessageHeader> = headers
            .into_iter()
            .map(|(key, value)| MessageHeader {
                value: MessagePayload::decode(value.as_deref()),
                key,
            })
            .collect();
        let size = key.size
            + value.size
            + headers
                .iter()
                .map(|h| h.key.len() + h.value.size)
                .sum::<usize>();

        Self {
            partition_id,
            offset,
            timestamp,
            key,
            value,
            headers,
            // librdkafka decompresses batches before handing out records
            // and does not expose the codec.
            compression: "unknown".to_string(),
            is_transactional: false,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json_object() {
        let payload = MessagePayload::decode(Some(br#"{"event": "pageview", "n": 1}"#));
        assert_eq!(payload.encoding, PayloadEncoding::Json);
        assert_eq!(payload.payload, json!({"event": "pageview", "n": 1}));
        assert_eq!(payload.size, 29);
    }

    #[test]
    fn test_decode_plain_text_and_numbers() {
        let payload = MessagePayload::decode(Some(b"hello world"));
        assert_eq!(payload.encoding, PayloadEncoding::Text);
        assert_eq!(payload.payload, json!("hello world"));

        let number = MessagePayload::decode(Some(b"42"));
        assert_eq!(number.encoding, PayloadEncoding::Text);
        assert_eq!(number.payload, json!("42"));
    }

    #[test]
    fn test_decode_broken_json_falls_back_to_text() {
        let payload = MessagePayload::decode(Some(b"{not json"));
        assert_eq!(payload.encoding, PayloadEncoding::Text);
    }

    #[test]
    fn test_decode_binary() {
        let payload = MessagePayload::decode(Some(&[0xff, 0xfe, 0x00]));
        assert_eq!(payload.encoding, PayloadEncoding::Binary);
        assert_eq!(payload.payload, json!("//4A"));
        assert_eq!(payload.size, 3);
    }

    #[test]
    fn test_decode_missing() {
        let payload = MessagePayload::decode(None);
        assert_eq!(payload.encoding, PayloadEncoding::Null);
        assert_eq!(payload.as_filter_text(), "");
    }

    #[test]
    fn test_message_size_counts_headers() {
        let message = TopicMessage::new(
            2,
            17,
            Some(1_700_000_000_000),
            Some(b"user-1"),
            Some(b"payload"),
            vec![("trace".to_string(), Some(b"abc".to_vec()))],
        );
        assert_eq!(message.size, 6 + 7 + 5 + 3);
        assert_eq!(message.headers[0].key, "trace");
        assert_eq!(message.headers[0].value.payload, json!("abc"));
    }
}
