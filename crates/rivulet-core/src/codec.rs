//! Byte ↔ payload codecs, selectable by name from the configuration.
//!
//! A codec is stateless and shared by the attach and flush paths. Unknown
//! names fall back to JSON with a warning rather than failing the pipeline.
//!
//! The XML variant carries string fidelity only: elements decode to string
//! values, and non-string values encode as their JSON text. That is the
//! documented round-trip contract for XML payloads.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use tracing::warn;

use crate::{Payload, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json,
    Yaml,
    Xml,
}

impl Codec {
    /// Select a codec by its configuration name. Empty means the default;
    /// anything unrecognized warns and falls back to JSON.
    pub fn from_name(name: &str) -> Codec {
        match name {
            "json" | "" => Codec::Json,
            "yaml" => Codec::Yaml,
            "xml" => Codec::Xml,
            other => {
                warn!("{other} codec not defined, using json as standard");
                Codec::Json
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::Yaml => "yaml",
            Codec::Xml => "xml",
        }
    }

    pub fn deserialize(&self, content: &[u8]) -> Result<Payload> {
        match self {
            Codec::Json => {
                serde_json::from_slice(content).context("failed to deserialize json payload")
            }
            Codec::Yaml => {
                serde_yaml::from_slice(content).context("failed to deserialize yaml payload")
            }
            Codec::Xml => xml_decode(content),
        }
    }

    pub fn serialize(&self, payload: &Payload) -> Result<Vec<u8>> {
        match self {
            Codec::Json => serde_json::to_vec(payload).context("failed to serialize json payload"),
            Codec::Yaml => Ok(serde_yaml::to_string(payload)
                .context("failed to serialize yaml payload")?
                .into_bytes()),
            Codec::Xml => Ok(xml_encode(payload).into_bytes()),
        }
    }
}

/// Re-compact serialized output so byte-counting sinks account for exactly
/// what they upload. Non-JSON bytes are returned unchanged after a warning.
pub fn compact_json(content: Vec<u8>) -> Vec<u8> {
    match serde_json::from_slice::<Value>(&content).and_then(|v| serde_json::to_vec(&v)) {
        Ok(compacted) => compacted,
        Err(e) => {
            warn!("failed to compact json: {e}");
            content
        }
    }
}

fn xml_decode(content: &[u8]) -> Result<Payload> {
    let text = std::str::from_utf8(content).context("xml payload is not utf-8")?;
    let doc = roxmltree::Document::parse(text).context("failed to deserialize xml payload")?;

    let mut payload = Payload::new();
    for node in doc.root_element().children().filter(|n| n.is_element()) {
        payload.insert(
            node.tag_name().name().to_string(),
            Value::String(node.text().unwrap_or_default().to_string()),
        );
    }

    Ok(payload)
}

fn xml_encode(payload: &Payload) -> String {
    let mut out = String::from("<stream>");
    for (key, value) in payload {
        let text = match value {
            Value::String(s) => xml_escape(s),
            other => xml_escape(&other.to_string()),
        };
        let _ = write!(out, "<{key}>{text}</{key}>");
    }
    out.push_str("</stream>");
    out
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        let mut payload = Payload::new();
        payload.insert("id".into(), Value::String("a-1".into()));
        payload.insert("count".into(), Value::from(3));
        payload.insert("ratio".into(), Value::from(0.5));
        payload
    }

    #[test]
    fn unknown_name_falls_back_to_json() {
        assert_eq!(Codec::from_name("avro"), Codec::Json);
        assert_eq!(Codec::from_name(""), Codec::Json);
    }

    #[test]
    fn json_round_trip_is_equivalent() {
        let codec = Codec::Json;
        let bytes = codec.serialize(&sample()).unwrap();
        let back = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn yaml_round_trip_is_equivalent() {
        let codec = Codec::Yaml;
        let bytes = codec.serialize(&sample()).unwrap();
        let back = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn xml_round_trips_strings() {
        let codec = Codec::Xml;
        let mut payload = Payload::new();
        payload.insert("name".into(), Value::String("Ada".into()));
        payload.insert("note".into(), Value::String("a < b".into()));

        let bytes = codec.serialize(&payload).unwrap();
        let back = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn xml_decodes_elements_as_strings() {
        let payload = Codec::Xml
            .deserialize(b"<stream><id>k</id><n>7</n></stream>")
            .unwrap();
        assert_eq!(payload.get("id"), Some(&Value::String("k".into())));
        assert_eq!(payload.get("n"), Some(&Value::String("7".into())));
    }

    #[test]
    fn compacts_pretty_json() {
        let pretty = b"{\n  \"a\": 1,\n  \"b\": \"x\"\n}".to_vec();
        assert_eq!(compact_json(pretty), b"{\"a\":1,\"b\":\"x\"}".to_vec());
    }

    #[test]
    fn compact_keeps_non_json_bytes() {
        let yaml = b"a: 1\n".to_vec();
        assert_eq!(compact_json(yaml.clone()), yaml);
    }
}
