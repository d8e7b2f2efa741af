//! JSON rendering of [MessageRecord]s.

use chrono::SecondsFormat;
use pst_decoder::messaging::record::{FieldValue, MessageRecord};
use serde_json::{Map, Value};
use std::io::Write;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn field_value(value: FieldValue) -> Value {
    match value {
        FieldValue::Text(text) => Value::String(text),
        FieldValue::Integer(value) => Value::from(value),
        FieldValue::Timestamp(time) => {
            Value::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        FieldValue::Binary(bytes) => Value::String(hex(&bytes)),
        FieldValue::Absent => Value::Null,
    }
}

/// One JSON object per record, with keys in [MessageRecord::fields] order.
pub fn record(record: &MessageRecord) -> Value {
    let object: Map<String, Value> = record
        .fields()
        .into_iter()
        .map(|(key, value)| (key.to_string(), field_value(value)))
        .collect();
    Value::Object(object)
}

pub fn write_records(
    writer: impl Write,
    records: &[MessageRecord],
    pretty: bool,
) -> serde_json::Result<()> {
    let array = Value::Array(records.iter().map(record).collect());
    if pretty {
        serde_json::to_writer_pretty(writer, &array)
    } else {
        serde_json::to_writer(writer, &array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_field_values() {
        assert_eq!(field_value(FieldValue::Absent), Value::Null);
        assert_eq!(field_value(FieldValue::Integer(3)), Value::from(3));
        assert_eq!(
            field_value(FieldValue::Binary(vec![0x00, 0xAB, 0x7F])),
            Value::String("00ab7f".into())
        );

        let whole = DateTime::from_timestamp(1_577_880_000, 0).unwrap();
        assert_eq!(
            field_value(FieldValue::Timestamp(whole)),
            Value::String("2020-01-01T12:00:00Z".into())
        );
        let fraction = DateTime::from_timestamp(1_577_880_000, 500_000_000).unwrap();
        assert_eq!(
            field_value(FieldValue::Timestamp(fraction)),
            Value::String("2020-01-01T12:00:00.500Z".into())
        );
    }

    #[test]
    fn test_record_key_order() {
        let value = record(&MessageRecord {
            subject: Some("World".into()),
            attachment_count: Some(0),
            ..Default::default()
        });
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(
            keys,
            [
                "subject",
                "sender",
                "header",
                "body",
                "html_body",
                "creation_time",
                "submit_time",
                "delivery_time",
                "attachment_count"
            ]
        );
        assert_eq!(value["html_body"], Value::Null);
        assert_eq!(value["attachment_count"], Value::from(0));
    }

    #[test]
    fn test_write_records() {
        let records = [MessageRecord {
            subject: Some("Hi".into()),
            ..Default::default()
        }];

        let mut compact = Vec::new();
        write_records(&mut compact, &records, false).unwrap();
        let compact = String::from_utf8(compact).unwrap();
        assert!(compact.starts_with(r#"[{"subject":"Hi","sender":null"#));

        let mut pretty = Vec::new();
        write_records(&mut pretty, &records, true).unwrap();
        let pretty = String::from_utf8(pretty).unwrap();
        assert!(pretty.contains("\n    \"subject\": \"Hi\""));
        assert_eq!(
            serde_json::from_str::<Value>(&pretty).unwrap(),
            serde_json::from_str::<Value>(&compact).unwrap()
        );
    }
}
