//! Flat projection of a message to the metadata fields exported per message.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{message::*, *};

/// A single exported value. Absent values are kept in the set so every record has the same keys.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    Absent,
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(Self::Text).unwrap_or(Self::Absent)
    }
}

impl From<Option<DateTime<Utc>>> for FieldValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map(Self::Timestamp).unwrap_or(Self::Absent)
    }
}

/// A field that was present but could not be decoded.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldDiagnostic {
    pub field: &'static str,
    pub class: ErrorClass,
    pub message: String,
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct MessageRecord {
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub header: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub submit_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub attachment_count: Option<u64>,
    pub diagnostics: Vec<FieldDiagnostic>,
}

/// `PidTagSubject` may start with `0x01` followed by a character holding the prefix length.
fn strip_subject_prefix(subject: String) -> String {
    let mut chars = subject.chars();
    if chars.next() == Some('\u{1}') {
        chars.next();
        return chars.collect();
    }
    subject
}

fn check_field<T>(
    message: &Message,
    diagnostics: &mut Vec<FieldDiagnostic>,
    name: &'static str,
    result: MessagingResult<T>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) if err.class() == ErrorClass::PropertyNotFound => None,
        Err(err) => {
            warn!(message = ?message.node_id(), field = name, %err, "dropping field");
            diagnostics.push(FieldDiagnostic {
                field: name,
                class: err.class(),
                message: err.to_string(),
            });
            None
        }
    }
}

impl MessageRecord {
    /// Project every field. A missing property leaves its field `None`. Any other failure also
    /// leaves it `None` and records a [FieldDiagnostic].
    pub fn project(message: &Message) -> Self {
        let mut diagnostics = Vec::new();
        let mut field = |name, result| check_field(message, &mut diagnostics, name, result);

        let subject = field("subject", message.text(PROP_SUBJECT)).map(strip_subject_prefix);
        let sender = field("sender", message.text(PROP_SENDER_NAME));
        let header = field("header", message.text(PROP_TRANSPORT_HEADERS));
        let body = field("body", message.text(PROP_BODY));
        let html_body = field("html_body", message.html_body());

        let mut time = |name, prop_id| {
            check_field(message, &mut diagnostics, name, message.time(prop_id)).flatten()
        };
        let creation_time = time("creation_time", PROP_CREATION_TIME);
        let submit_time = time("submit_time", PROP_CLIENT_SUBMIT_TIME);
        let delivery_time = time("delivery_time", PROP_DELIVERY_TIME);

        let attachment_count = check_field(
            message,
            &mut diagnostics,
            "attachment_count",
            message.attachment_count(),
        )
        .map(|count| count as u64);

        Self {
            subject,
            sender,
            header,
            body,
            html_body,
            creation_time,
            submit_time,
            delivery_time,
            attachment_count,
            diagnostics,
        }
    }

    /// The exported fields, in output order.
    pub fn fields(&self) -> [(&'static str, FieldValue); 9] {
        [
            ("subject", self.subject.clone().into()),
            ("sender", self.sender.clone().into()),
            ("header", self.header.clone().into()),
            ("body", self.body.clone().into()),
            ("html_body", self.html_body.clone().into()),
            ("creation_time", self.creation_time.into()),
            ("submit_time", self.submit_time.into()),
            ("delivery_time", self.delivery_time.into()),
            (
                "attachment_count",
                self.attachment_count
                    .and_then(|count| i64::try_from(count).ok())
                    .map(FieldValue::Integer)
                    .unwrap_or(FieldValue::Absent),
            ),
        ]
    }
}
