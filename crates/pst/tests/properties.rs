use pst_decoder::{
    ltp::{
        heap::MAX_HEAP_ALLOCATION,
        prop_context::{PropertyValue, PropertyValueRecord},
    },
    messaging::{
        folder::Folder,
        message::Message,
        record::{FieldValue, MessageRecord},
    },
    ndb::node_id::{NodeId, NID_ROOT_FOLDER},
    ErrorClass, PstFile,
};
use pst_fixture::{FolderSpec, MessageSpec, NdbVersion, PstBuilder, Value, PROP_MESSAGE_CODEPAGE};

mod common;

const PROP_INTEGER32: u16 = 0x6601;
const PROP_INTEGER64: u16 = 0x6602;
const PROP_HEAP_BINARY: u16 = 0x6603;
const PROP_SUBNODE_BINARY: u16 = 0x6604;
const PROP_MULTI_BLOCK_BINARY: u16 = 0x6605;

fn single_message(version: NdbVersion, message: MessageSpec) -> (PstFile, NodeId) {
    let fixture = PstBuilder::new(version)
        .root(FolderSpec::new("").folder(FolderSpec::new("Inbox").message(message)))
        .build()
        .unwrap();
    let node = fixture.layout().messages[0];
    (PstFile::from_bytes(fixture.into_bytes()).unwrap(), node)
}

fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_inline_and_heap_integers() {
    common::init_tracing();
    let (pst, node) = single_message(
        NdbVersion::Unicode,
        MessageSpec::new()
            .property(PROP_INTEGER32, Value::Integer32(-42))
            .property(PROP_INTEGER64, Value::Integer64(0x1234_5678_9ABC)),
    );
    let message = Message::read(&pst, node).unwrap();
    let properties = message.properties();

    let record = properties.record(PROP_INTEGER32).unwrap();
    assert!(matches!(record.value(), PropertyValueRecord::Small(_)));
    assert_eq!(
        properties.get(PROP_INTEGER32).unwrap(),
        PropertyValue::Integer32(-42)
    );

    let record = properties.record(PROP_INTEGER64).unwrap();
    assert!(matches!(record.value(), PropertyValueRecord::Heap(_)));
    assert_eq!(
        properties.get(PROP_INTEGER64).unwrap(),
        PropertyValue::Integer64(0x1234_5678_9ABC)
    );

    let Err(err) = properties.get(0x6699) else {
        panic!("0x6699 was never written");
    };
    assert_eq!(err.class(), ErrorClass::PropertyNotFound);
}

#[test]
fn test_heap_and_subnode_values() {
    common::init_tracing();
    let at_limit = pattern(MAX_HEAP_ALLOCATION);
    let over_limit = pattern(MAX_HEAP_ALLOCATION + 1);
    let multi_block = pattern(20_000);

    for version in [NdbVersion::Ansi, NdbVersion::Unicode, NdbVersion::Unicode4k] {
        let (pst, node) = single_message(
            version,
            MessageSpec::new()
                .property(PROP_HEAP_BINARY, Value::Binary(at_limit.clone()))
                .property(PROP_SUBNODE_BINARY, Value::Binary(over_limit.clone()))
                .property(PROP_MULTI_BLOCK_BINARY, Value::Binary(multi_block.clone())),
        );
        let message = Message::read(&pst, node).unwrap();
        let properties = message.properties();

        let record = properties.record(PROP_HEAP_BINARY).unwrap();
        assert!(matches!(record.value(), PropertyValueRecord::Heap(_)));
        assert_eq!(
            properties.get(PROP_HEAP_BINARY).unwrap(),
            PropertyValue::Binary(at_limit.clone())
        );

        let record = properties.record(PROP_SUBNODE_BINARY).unwrap();
        assert!(matches!(record.value(), PropertyValueRecord::Node(_)));
        assert_eq!(
            properties.get(PROP_SUBNODE_BINARY).unwrap(),
            PropertyValue::Binary(over_limit.clone())
        );

        assert_eq!(
            properties.get(PROP_MULTI_BLOCK_BINARY).unwrap(),
            PropertyValue::Binary(multi_block.clone()),
            "{version:?}"
        );
    }
}

#[test]
fn test_zero_row_table() {
    common::init_tracing();
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .root(FolderSpec::new("").folder(FolderSpec::new("Empty")))
        .build()
        .unwrap();
    let empty = fixture.layout().folders["Empty"];
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let folder = Folder::read(&pst, empty).unwrap();
    assert_eq!(folder.display_name().unwrap(), "Empty");
    assert_eq!(folder.content_count().unwrap(), 0);
    assert!(!folder.has_sub_folders().unwrap());

    let hierarchy = folder.hierarchy_table().unwrap().unwrap();
    assert_eq!(hierarchy.row_count(), 0);
    assert_eq!(hierarchy.rows().count(), 0);
    assert!(hierarchy.info().rows().is_none());
    assert!(folder.sub_folders().unwrap().is_empty());
    assert!(folder.messages().unwrap().is_empty());
}

#[test]
fn test_table_cells() {
    common::init_tracing();
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .root(
            FolderSpec::new("").folder(
                FolderSpec::new("Inbox")
                    .message(MessageSpec::new().subject("first").sender("Alice"))
                    .message(MessageSpec::new().subject("second")),
            ),
        )
        .build()
        .unwrap();
    let inbox = fixture.layout().folders["Inbox"];
    let messages = fixture.layout().messages.clone();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let root = Folder::read(&pst, NID_ROOT_FOLDER).unwrap();
    assert_eq!(root.sub_folders().unwrap(), [inbox]);

    let folder = Folder::read(&pst, inbox).unwrap();
    let contents = folder.contents_table().unwrap().unwrap();
    let rows: Vec<_> = contents.rows().collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id(), u32::from(messages[0]));
    assert_eq!(rows[1].position(), 1);

    let subject = contents.cell(rows[0], 0x0037).unwrap().unwrap();
    assert_eq!(subject.to_text(0).unwrap(), "first");
    let sender = contents.cell(rows[0], 0x0C1A).unwrap().unwrap();
    assert_eq!(sender.to_text(0).unwrap(), "Alice");
    assert_eq!(contents.cell(rows[1], 0x0C1A).unwrap(), None);

    let found = contents.find_row(u32::from(messages[1])).unwrap();
    assert_eq!(found, rows[1]);

    let Err(err) = contents.cell(rows[0], 0x6699) else {
        panic!("no such column");
    };
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[test]
fn test_large_contents_table() {
    common::init_tracing();
    let mut inbox = FolderSpec::new("Inbox");
    for i in 0..300 {
        inbox = inbox.message(MessageSpec::new().subject(&format!("message {i}")));
    }
    for version in [NdbVersion::Ansi, NdbVersion::Unicode] {
        let fixture = PstBuilder::new(version)
            .root(FolderSpec::new("").folder(inbox.clone()))
            .build()
            .unwrap();
        let folder = fixture.layout().folders["Inbox"];
        let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

        let folder = Folder::read(&pst, folder).unwrap();
        let contents = folder.contents_table().unwrap().unwrap();
        assert!(matches!(
            contents.info().rows(),
            Some(PropertyValueRecord::Node(_))
        ));
        assert_eq!(contents.row_count(), 300);

        let last = contents.rows().last().unwrap();
        let subject = contents.cell(last, 0x0037).unwrap().unwrap();
        assert_eq!(subject.to_text(0).unwrap(), "message 299");
    }
}

#[test]
fn test_string8_code_page() {
    common::init_tracing();
    let (pst, node) = single_message(
        NdbVersion::Ansi,
        MessageSpec::new()
            .property(0x0037, Value::String8(b"caf\xE9".to_vec()))
            .property(PROP_MESSAGE_CODEPAGE, Value::Integer32(1252)),
    );
    let message = Message::read(&pst, node).unwrap();
    assert_eq!(message.code_page(), 1252);

    let record = MessageRecord::project(&message);
    assert_eq!(record.subject.as_deref(), Some("caf\u{e9}"));
}

#[test]
fn test_subject_prefix() {
    common::init_tracing();
    let (pst, node) = single_message(
        NdbVersion::Unicode,
        MessageSpec::new().subject("\u{1}\u{4}RE: status"),
    );
    let message = Message::read(&pst, node).unwrap();
    assert_eq!(
        MessageRecord::project(&message).subject.as_deref(),
        Some("RE: status")
    );
}

#[test]
fn test_invalid_html_body() {
    common::init_tracing();
    let (pst, node) = single_message(
        NdbVersion::Unicode,
        MessageSpec::new().subject("broken").html(b"<p>\xFF\xFE</p>"),
    );
    let message = Message::read(&pst, node).unwrap();

    let record = MessageRecord::project(&message);
    assert_eq!(record.subject.as_deref(), Some("broken"));
    assert_eq!(record.html_body, None);
    assert_eq!(record.diagnostics.len(), 1);
    assert_eq!(record.diagnostics[0].field, "html_body");
    assert_eq!(record.diagnostics[0].class, ErrorClass::Encoding);

    let fields = record.fields();
    assert_eq!(fields[4], ("html_body", FieldValue::Absent));
}

#[test]
fn test_time_type_mismatch() {
    common::init_tracing();
    let (pst, node) = single_message(
        NdbVersion::Unicode,
        MessageSpec::new().property(0x3007, Value::Integer32(7)),
    );
    let message = Message::read(&pst, node).unwrap();

    let record = MessageRecord::project(&message);
    assert_eq!(record.creation_time, None);
    assert_eq!(record.diagnostics.len(), 1);
    assert_eq!(record.diagnostics[0].field, "creation_time");
    assert_eq!(record.diagnostics[0].class, ErrorClass::CorruptNode);
}

#[test]
fn test_message_class() {
    common::init_tracing();
    let (pst, node) = single_message(NdbVersion::Unicode, MessageSpec::new());
    let message = Message::read(&pst, node).unwrap();
    assert_eq!(message.message_class().unwrap(), "IPM.Note");
}
