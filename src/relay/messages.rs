use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::{RawValue, to_raw_value};

use super::types::{PeerId, RelayError};

/// Text-mode signaling message.
///
/// `id` names the destination on the way in and the sender on the way out.
/// Every other field is kept as its raw JSON text, in its original position.
#[derive(Debug)]
pub struct Envelope {
    dest: String,
    fields: Vec<(String, Box<RawValue>)>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let RawFields(fields) = serde_json::from_str(text)?;
        let dest = fields
            .iter()
            .find(|(key, _)| key == "id")
            .and_then(|(_, value)| serde_json::from_str::<String>(value.get()).ok())
            .ok_or(RelayError::MissingId)?;

        Ok(Self { dest, fields })
    }

    /// Destination named by the inbound `id`
    pub fn id(&self) -> &str {
        &self.dest
    }

    /// Rewrites `id` in place to name the sender
    pub fn readdress(&mut self, sender: &PeerId) -> Result<(), RelayError> {
        let sender_json = to_raw_value(sender)?;
        if let Some((_, value)) = self.fields.iter_mut().find(|(key, _)| key == "id") {
            *value = sender_json;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Object members in document order. A repeated key keeps its first position
/// and its last value.
struct RawFields(Vec<(String, Box<RawValue>)>);

impl<'de> Deserialize<'de> for RawFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawFieldsVisitor)
    }
}

struct RawFieldsVisitor;

impl<'de> Visitor<'de> for RawFieldsVisitor {
    type Value = RawFields;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawFields, A::Error> {
        let mut fields: Vec<(String, Box<RawValue>)> =
            Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Box<RawValue>>()? {
            match fields.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = value,
                None => fields.push((key, value)),
            }
        }
        Ok(RawFields(fields))
    }
}

/// Unsolicited push listing every connected peer
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerList {
    pub join: String,
}

impl PeerList {
    pub fn new<'a>(peers: impl IntoIterator<Item = &'a PeerId>) -> Self {
        let join = peers
            .into_iter()
            .map(PeerId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        Self { join }
    }

    pub fn peers(&self) -> Vec<&str> {
        if self.join.is_empty() {
            return Vec::new();
        }
        self.join.split(',').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_envelope() {
        let envelope = Envelope::parse(r#"{"id": "bob", "sdp": "v=0"}"#).unwrap();
        assert_eq!(envelope.id(), "bob");
    }

    #[test]
    fn readdress_keeps_other_fields() {
        let mut envelope = Envelope::parse(r#"{"id":"B","sdp":"X"}"#).unwrap();
        envelope.readdress(&PeerId::from("A")).unwrap();
        assert_eq!(envelope.to_json().unwrap(), r#"{"id":"A","sdp":"X"}"#);
    }

    #[test]
    fn readdress_keeps_field_order() {
        let mut envelope =
            Envelope::parse(r#"{"type":"candidate","id":"bob","candidate":{"mid":0,"line":"a=x"}}"#)
                .unwrap();
        envelope.readdress(&PeerId::from("alice")).unwrap();
        assert_eq!(
            envelope.to_json().unwrap(),
            r#"{"type":"candidate","id":"alice","candidate":{"mid":0,"line":"a=x"}}"#
        );
    }

    #[test]
    fn readdress_keeps_number_and_string_text() {
        let mut envelope = Envelope::parse(
            r#"{"id":"B","v":1.0,"e":1e5,"big":123456789012345678901234,"s":"caf\u00e9"}"#,
        )
        .unwrap();
        envelope.readdress(&PeerId::from("A")).unwrap();
        assert_eq!(
            envelope.to_json().unwrap(),
            r#"{"id":"A","v":1.0,"e":1e5,"big":123456789012345678901234,"s":"caf\u00e9"}"#
        );
    }

    #[test]
    fn repeated_key_keeps_first_position_last_value() {
        let mut envelope = Envelope::parse(r#"{"id":"x","a":1,"id":"B"}"#).unwrap();
        assert_eq!(envelope.id(), "B");
        envelope.readdress(&PeerId::from("A")).unwrap();
        assert_eq!(envelope.to_json().unwrap(), r#"{"id":"A","a":1}"#);
    }

    #[test]
    fn reject_invalid_json() {
        assert!(matches!(Envelope::parse("not json"), Err(RelayError::Json(_))));
        assert!(matches!(Envelope::parse("[1, 2]"), Err(RelayError::Json(_))));
    }

    #[test]
    fn reject_missing_or_non_string_id() {
        assert!(matches!(
            Envelope::parse(r#"{"sdp": "x"}"#),
            Err(RelayError::MissingId)
        ));
        assert!(matches!(
            Envelope::parse(r#"{"id": 7}"#),
            Err(RelayError::MissingId)
        ));
    }

    #[test]
    fn serialize_peer_list() {
        let peers = [PeerId::from("alice"), PeerId::from("bob")];
        let json = serde_json::to_string(&PeerList::new(&peers)).unwrap();
        assert_eq!(json, r#"{"join":"alice,bob"}"#);
    }

    #[test]
    fn parse_peer_list() {
        let list: PeerList = serde_json::from_str(r#"{"join": "a,b,c"}"#).unwrap();
        assert_eq!(list.peers(), ["a", "b", "c"]);

        let empty = PeerList {
            join: String::new(),
        };
        assert!(empty.peers().is_empty());
    }
}
