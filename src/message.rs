//! Wire format of subscribe/unsubscribe directives and inbound frames.

use crate::error::{ReadClientError, Result};
use crate::types::{MessageType, TxType};
use crate::websocket::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Signed-data tokens keyed by address.
pub type SignedData = BTreeMap<String, String>;

/// Status frame the node sends to acknowledge a directive.
pub const ACK_STATUS: &str = "OK";
const ACK_MAX_LEN: usize = 10;

/// One outbound directive.
///
/// ```
/// use tcabci_read_client::message::{MessageEnvelope, SignedData};
/// use tcabci_read_client::types::TxType;
///
/// let envelope = MessageEnvelope::subscribe(
///     true,
///     vec!["addr1".to_string()],
///     SignedData::new(),
///     vec![TxType::Storage],
/// );
/// assert_eq!(
///     envelope.encode().unwrap(),
///     r#"{"is_web":true,"type":"subscribe","addrs":["addr1"],"signed_addrs":{},"tx_types":["storage"]}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub is_web: bool,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub addrs: Vec<String>,
    #[serde(default)]
    pub signed_addrs: SignedData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tx_types: Vec<TxType>,
}

impl MessageEnvelope {
    pub fn subscribe(
        is_web: bool,
        addrs: Vec<String>,
        signed_addrs: SignedData,
        tx_types: Vec<TxType>,
    ) -> Self {
        Self {
            is_web,
            kind: MessageType::Subscribe,
            addrs,
            signed_addrs,
            tx_types,
        }
    }

    pub fn unsubscribe(is_web: bool, addrs: Vec<String>) -> Self {
        Self {
            is_web,
            kind: MessageType::Unsubscribe,
            addrs,
            signed_addrs: SignedData::new(),
            tx_types: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.addrs.iter().any(|addr| addr.is_empty()) {
            return Err(ReadClientError::invalid_argument("addrs"));
        }
        if self.signed_addrs.keys().any(|addr| addr.is_empty()) {
            return Err(ReadClientError::invalid_argument("signed_addrs"));
        }
        if self.tx_types.len() > TxType::ALL.len() {
            return Err(ReadClientError::invalid_argument("tx_types"));
        }
        Ok(())
    }

    /// Validates, then serializes to the JSON text sent on the socket.
    pub fn encode(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Field-by-field conversion from loosely typed JSON, naming the first
    /// offending field in the error.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or(ReadClientError::InvalidArgument(None))?;

        let is_web = object
            .get("is_web")
            .and_then(Value::as_bool)
            .ok_or_else(|| ReadClientError::invalid_argument("is_web"))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ReadClientError::invalid_argument("type"))?
            .parse::<MessageType>()?;

        let addrs = object
            .get("addrs")
            .and_then(Value::as_array)
            .ok_or_else(|| ReadClientError::invalid_argument("addrs"))?
            .iter()
            .map(|addr| {
                addr.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ReadClientError::invalid_argument("addrs"))
            })
            .collect::<Result<Vec<_>>>()?;

        let signed_addrs = match object.get("signed_addrs") {
            None | Some(Value::Null) => SignedData::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(addr, token)| {
                    token
                        .as_str()
                        .map(|token| (addr.clone(), token.to_string()))
                        .ok_or_else(|| ReadClientError::invalid_argument("signed_addrs"))
                })
                .collect::<Result<SignedData>>()?,
            Some(_) => return Err(ReadClientError::invalid_argument("signed_addrs")),
        };

        let tx_types = match object.get("tx_types") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| ReadClientError::invalid_argument("tx_types"))?
                        .parse::<TxType>()
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(ReadClientError::invalid_argument("tx_types")),
        };

        let envelope = Self {
            is_web,
            kind,
            addrs,
            signed_addrs,
            tx_types,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

/// A decoded inbound frame, as handed to the client's listen callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

/// Decodes one inbound frame. Returns `None` for an acknowledgement.
///
/// Frames that parse as JSON are decoded, anything else is passed on raw.
pub fn decode_inbound(payload: &Payload) -> Option<Inbound> {
    match payload {
        Payload::Text(text) => {
            if is_ack(text) {
                return None;
            }
            Some(match serde_json::from_str::<Value>(text) {
                Ok(value) => Inbound::Json(value),
                Err(_) => Inbound::Text(text.clone()),
            })
        }
        Payload::Binary(bytes) => Some(
            match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => Inbound::Json(value),
                Err(_) => Inbound::Binary(bytes.clone()),
            },
        ),
    }
}

fn is_ack(text: &str) -> bool {
    text.len() < ACK_MAX_LEN && text == ACK_STATUS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signed(pairs: &[(&str, &str)]) -> SignedData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_subscribe_shape() {
        let envelope = MessageEnvelope::subscribe(
            true,
            vec!["A".to_string(), "B".to_string()],
            signed(&[("A", "sig-a")]),
            vec![TxType::Transfer],
        );
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "is_web": true,
                "type": "subscribe",
                "addrs": ["A", "B"],
                "signed_addrs": {"A": "sig-a"},
                "tx_types": ["transfer"],
            })
        );
    }

    #[test]
    fn test_encode_omits_empty_tx_types() {
        let envelope = MessageEnvelope::unsubscribe(false, vec!["A".to_string()]);
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"is_web": false, "type": "unsubscribe", "addrs": ["A"], "signed_addrs": {}})
        );
    }

    #[test]
    fn test_encode_is_all_or_nothing() {
        let envelope = MessageEnvelope::subscribe(
            true,
            vec!["A".to_string(), String::new()],
            SignedData::new(),
            Vec::new(),
        );
        assert!(matches!(
            envelope.encode(),
            Err(ReadClientError::InvalidArgument(Some(ref f))) if f == "addrs"
        ));
    }

    #[test]
    fn test_decode_reproduces_envelope() {
        let envelope = MessageEnvelope::subscribe(
            true,
            vec!["A".to_string(), "B".to_string()],
            signed(&[("A", "sig-a"), ("B", "sig-b")]),
            vec![TxType::Storage, TxType::DataRoom],
        );
        let decoded = MessageEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_from_value_names_offending_field() {
        let cases = [
            (json!({"is_web": "yes", "type": "subscribe", "addrs": []}), "is_web"),
            (json!({"is_web": true, "type": 1, "addrs": []}), "type"),
            (json!({"is_web": true, "type": "publish", "addrs": []}), "type"),
            (json!({"is_web": true, "type": "subscribe", "addrs": "A"}), "addrs"),
            (
                json!({"is_web": true, "type": "subscribe", "addrs": [], "signed_addrs": []}),
                "signed_addrs",
            ),
            (
                json!({"is_web": true, "type": "subscribe", "addrs": [], "tx_types": ["bogus"]}),
                "tx_types",
            ),
        ];
        for (value, field) in cases {
            match MessageEnvelope::from_value(&value) {
                Err(ReadClientError::InvalidArgument(Some(f))) => assert_eq!(f, field),
                other => panic!("expected invalid {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_inbound_ack_is_swallowed() {
        assert_eq!(decode_inbound(&Payload::from("OK")), None);
        assert_eq!(
            decode_inbound(&Payload::from("OK then")),
            Some(Inbound::Text("OK then".to_string()))
        );
    }

    #[test]
    fn test_inbound_json_is_decoded() {
        assert_eq!(
            decode_inbound(&Payload::from(r#"{"id":"tx1"}"#)),
            Some(Inbound::Json(json!({"id": "tx1"})))
        );
        assert_eq!(
            decode_inbound(&Payload::Binary(br#"[1,2]"#.to_vec())),
            Some(Inbound::Json(json!([1, 2])))
        );
        assert_eq!(
            decode_inbound(&Payload::Binary(vec![0xff, 0x00])),
            Some(Inbound::Binary(vec![0xff, 0x00]))
        );
    }
}
