//! JSON wire codec for render collaborators in another process.
//!
//! Messages are internally tagged with a `type` field:
//!
//! ```json
//! {"type":"diff","object_id":4294967297,"property":"value","value":3,"origin":"backend","seq":7}
//! {"type":"snapshot","object_id":4294967297,"properties":{"value":3},"seq":7}
//! {"type":"set","view":2,"object_id":4294967297,"property":"value","value":4}
//! ```

use crate::channel::{ToBackend, ToView};
use crate::error::Result;

/// Encode a backend-to-view message.
pub fn encode_outbound(message: &ToView) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a backend-to-view message.
pub fn decode_outbound(text: &str) -> Result<ToView> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a view-to-backend message.
pub fn encode_inbound(message: &ToBackend) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a view-to-backend message.
pub fn decode_inbound(text: &str) -> Result<ToBackend> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::error::SyncError;
    use crate::event::Origin;
    use crate::object::ObjectId;
    use crate::value::Value;
    use crate::view::ViewId;

    #[test]
    fn test_diff_shape() {
        let object = ObjectId::from_raw(1);
        let text = encode_outbound(&ToView::Diff {
            object_id: object,
            property: "value".into(),
            value: Value::Float(0.5),
            origin: Origin::View(ViewId::from_raw(3)),
            seq: 12,
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "diff",
                "object_id": object.as_raw(),
                "property": "value",
                "value": 0.5,
                "origin": 3,
                "seq": 12
            })
        );
    }

    #[test]
    fn test_snapshot_decodes_nested_values() {
        let object = ObjectId::from_raw(2);
        let text = json!({
            "type": "snapshot",
            "object_id": object.as_raw(),
            "properties": {"style": {"display": "none"}, "items": [1, "two"]},
            "seq": 0
        })
        .to_string();
        let ToView::Snapshot { properties, .. } = decode_outbound(&text).unwrap() else {
            panic!("expected a snapshot");
        };
        let mut style = BTreeMap::new();
        style.insert("display".to_string(), Value::from("none"));
        assert_eq!(properties["style"], Value::Map(style));
        assert_eq!(
            properties["items"],
            Value::List(vec![Value::Int(1), Value::from("two")])
        );
    }

    #[test]
    fn test_inbound_event_from_view() {
        let text = r#"{"type":"event","view":5,"object_id":4294967297,"event":"click","payload":null}"#;
        let message = decode_inbound(text).unwrap();
        assert_eq!(message.view(), ViewId::from_raw(5));
        assert!(matches!(message, ToBackend::Event { ref event, .. } if event == "click"));
        assert_eq!(decode_inbound(&encode_inbound(&message).unwrap()).unwrap(), message);
    }

    #[test]
    fn test_malformed_input_is_codec_error() {
        assert!(matches!(
            decode_inbound(r#"{"type":"teleport"}"#),
            Err(SyncError::Codec(_))
        ));
    }
}
