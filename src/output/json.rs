//! JSON document format understood by the field gateway.

use crate::filter::SensorEvent;
use crate::mac_address::MacAddress;
use crate::output::{FormatError, OutputFormatter};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Number, Value};

/// Characters of the configured GUID kept before the device address.
const GUID_PREFIX_LEN: usize = 24;

/// Static labels attached to every message.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMetadata {
    /// Template GUID; its last 12 characters are replaced by the device address.
    pub guid: String,
    pub organization: String,
    pub display_name: String,
    pub unit_of_measure: String,
    pub measure_name: String,
    pub location: String,
}

impl Default for GatewayMetadata {
    fn default() -> Self {
        Self {
            guid: "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx".into(),
            organization: "Your organization".into(),
            display_name: "Sensor display name".into(),
            unit_of_measure: "vol/vol".into(),
            measure_name: "WaterContent".into(),
            location: "Sensor location".into(),
        }
    }
}

#[derive(Serialize)]
struct Document<'a> {
    value: Value,
    guid: String,
    organization: &'a str,
    displayname: &'a str,
    unitofmeasure: &'a str,
    measurename: &'a str,
    location: &'a str,
    timecreated: String,
}

/// Per-device GUID: the template's first 24 characters followed by the address.
pub fn device_guid(template: &str, address: &MacAddress) -> String {
    let mut guid: String = template.chars().take(GUID_PREFIX_LEN).collect();
    guid.push_str(&address.to_string());
    guid
}

fn json_value(event: &SensorEvent) -> Value {
    match event.value().and_then(Number::from_f64) {
        Some(number) => Value::Number(number),
        None => Value::String(String::from_utf8_lossy(&event.payload).into_owned()),
    }
}

/// Replace the wire delimiters with JSON unicode escapes.
///
/// `<` and `>` can only occur inside JSON strings, where `\u003c` and
/// `\u003e` decode to the same text, so the gateway's delimiter scan never
/// sees them inside a message.
fn escape_delimiters(json: &str) -> String {
    json.replace('<', "\\u003c").replace('>', "\\u003e")
}

/// Renders events as the gateway's JSON document.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    metadata: GatewayMetadata,
}

impl JsonFormatter {
    pub fn new(metadata: GatewayMetadata) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &GatewayMetadata {
        &self.metadata
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, event: &SensorEvent, name: &str) -> Result<String, FormatError> {
        let timestamp: DateTime<Utc> = event.timestamp.into();
        let document = Document {
            value: json_value(event),
            guid: device_guid(&self.metadata.guid, &event.address),
            organization: &self.metadata.organization,
            displayname: name,
            unitofmeasure: &self.metadata.unit_of_measure,
            measurename: &self.metadata.measure_name,
            location: &self.metadata.location,
            timecreated: timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        };
        let json = serde_json::to_string(&document)?;
        Ok(escape_delimiters(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;
    use std::time::{Duration, SystemTime};

    fn event(payload: &[u8]) -> SensorEvent {
        SensorEvent {
            address: TEST_MAC,
            payload: payload.to_vec(),
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000),
        }
    }

    #[test]
    fn test_device_guid_replaces_node_part() {
        assert_eq!(
            device_guid("12345678-abcd-ef01-2345-000000000000", &TEST_MAC),
            "12345678-abcd-ef01-2345-aabbccddeeff"
        );
    }

    #[test]
    fn test_device_guid_short_template() {
        assert_eq!(device_guid("abc", &TEST_MAC), "abcaabbccddeeff");
    }

    #[test]
    fn test_format_numeric_value() {
        let formatter = JsonFormatter::default();
        let json = formatter.format(&event(b"0.482432"), "Greenhouse").unwrap();
        let doc: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(doc["value"], 0.482432);
        assert_eq!(doc["guid"], "xxxxxxxx-xxxx-xxxx-xxxx-aabbccddeeff");
        assert_eq!(doc["organization"], "Your organization");
        assert_eq!(doc["displayname"], "Greenhouse");
        assert_eq!(doc["unitofmeasure"], "vol/vol");
        assert_eq!(doc["measurename"], "WaterContent");
        assert_eq!(doc["location"], "Sensor location");
        assert_eq!(doc["timecreated"], "2001-09-09T01:46:40.000000Z");
    }

    #[test]
    fn test_format_keeps_field_order() {
        let json = JsonFormatter::default()
            .format(&event(b"1.5"), "name")
            .unwrap();
        assert!(json.starts_with("{\"value\":1.5,\"guid\":"));
        assert!(json.ends_with("\"timecreated\":\"2001-09-09T01:46:40.000000Z\"}"));
    }

    #[test]
    fn test_format_non_numeric_value_as_string() {
        let json = JsonFormatter::default().format(&event(b"n/a"), "x").unwrap();
        let doc: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["value"], "n/a");
    }

    #[test]
    fn test_format_escapes_quotes() {
        let mut metadata = GatewayMetadata::default();
        metadata.location = "north \"field\"".into();
        let json = JsonFormatter::new(metadata)
            .format(&event(b"2.0"), "x")
            .unwrap();
        assert!(json.contains(r#""location":"north \"field\"""#));
    }

    #[test]
    fn test_format_never_emits_wire_delimiters() {
        let json = JsonFormatter::default()
            .format(&event(b"<1>"), "<bed>")
            .unwrap();
        assert!(!json.contains('<'));
        assert!(!json.contains('>'));

        let doc: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["displayname"], "<bed>");
        assert_eq!(doc["value"], "<1>");
    }
}
