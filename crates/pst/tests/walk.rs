use chrono::DateTime;
use pst_decoder::{
    messaging::{
        folder::Folder,
        message::Message,
        record::{FieldValue, MessageRecord},
        store::Store,
        walker::{WalkOptions, Walker},
    },
    ndb::node_id::{NodeIdType, NID_ROOT_FOLDER},
    ErrorClass, PstFile,
};
use pst_fixture::{
    filetime, FolderSpec, MessageSpec, NdbVersion, PstBuilder, PROP_MESSAGE_CLASS,
};

mod common;

fn hello_world_root() -> FolderSpec {
    FolderSpec::new("").folder(
        FolderSpec::new("Top of Personal Folders").folder(
            FolderSpec::new("Inbox")
                .message(
                    MessageSpec::new()
                        .subject("Hello")
                        .sender("Alice")
                        .body("Hello body")
                        .html(b"<p>Hello</p>")
                        .creation_time(filetime(1_577_880_000, 500_000_000))
                        .attachment("a.txt", b"first")
                        .attachment("b.txt", b"second"),
                )
                .message(MessageSpec::new().subject("World").sender("Bob")),
        ),
    )
}

fn hello_world() -> PstBuilder {
    PstBuilder::new(NdbVersion::Unicode).root(hello_world_root())
}

#[test]
fn test_hello_world() {
    common::init_tracing();
    let fixture = hello_world().build().unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
    let records: Vec<_> = walker
        .by_ref()
        .map(|(path, message)| (path.to_string(), MessageRecord::project(&message)))
        .collect();
    assert!(walker.diagnostics().is_empty());
    assert_eq!(records.len(), 2);

    let (path, hello) = &records[0];
    assert_eq!(path, "Top of Personal Folders/Inbox");
    assert_eq!(hello.subject.as_deref(), Some("Hello"));
    assert_eq!(hello.sender.as_deref(), Some("Alice"));
    assert_eq!(hello.body.as_deref(), Some("Hello body"));
    assert_eq!(hello.html_body.as_deref(), Some("<p>Hello</p>"));
    assert_eq!(hello.header, None);
    assert_eq!(
        hello.creation_time,
        Some(DateTime::from_timestamp(1_577_880_000, 500_000_000).unwrap())
    );
    assert_eq!(hello.submit_time, None);
    assert_eq!(hello.attachment_count, Some(2));
    assert!(hello.diagnostics.is_empty());

    let (_, world) = &records[1];
    assert_eq!(world.subject.as_deref(), Some("World"));
    assert_eq!(world.html_body, None);
    assert_eq!(world.attachment_count, Some(0));
    assert!(world.diagnostics.is_empty());
}

#[test]
fn test_every_field_has_its_own_property() {
    common::init_tracing();
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .root(
            FolderSpec::new("").folder(
                FolderSpec::new("Inbox").message(
                    MessageSpec::new()
                        .without(PROP_MESSAGE_CLASS)
                        .subject("Quarterly report")
                        .sender("Carol")
                        .headers("Received: a\r\n")
                        .body("See attached")
                        .html(b"<p>See attached</p>")
                        .creation_time(filetime(1_577_880_000, 0))
                        .submit_time(filetime(1_000_000_000, 0))
                        .delivery_time(filetime(1_000_000_100, 0))
                        .attachment("report.xlsx", b"cells"),
                ),
            ),
        )
        .build()
        .unwrap();
    let node = fixture.layout().messages[0];
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let message = Message::read(&pst, node).unwrap();
    let Err(err) = message.message_class() else {
        panic!("PidTagMessageClass was removed");
    };
    assert_eq!(err.class(), ErrorClass::PropertyNotFound);

    let record = MessageRecord::project(&message);
    assert!(record.diagnostics.is_empty());

    let timestamp =
        |seconds| FieldValue::Timestamp(DateTime::from_timestamp(seconds, 0).unwrap());
    assert_eq!(
        record.fields(),
        [
            ("subject", FieldValue::Text("Quarterly report".into())),
            ("sender", FieldValue::Text("Carol".into())),
            ("header", FieldValue::Text("Received: a\r\n".into())),
            ("body", FieldValue::Text("See attached".into())),
            ("html_body", FieldValue::Text("<p>See attached</p>".into())),
            ("creation_time", timestamp(1_577_880_000)),
            ("submit_time", timestamp(1_000_000_000)),
            ("delivery_time", timestamp(1_000_000_100)),
            ("attachment_count", FieldValue::Integer(1)),
        ]
    );
}

#[test]
fn test_projection_is_idempotent() {
    common::init_tracing();
    let fixture = hello_world().build().unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    for (_, message) in Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default()) {
        assert_eq!(
            MessageRecord::project(&message),
            MessageRecord::project(&message)
        );
    }
}

#[test]
fn test_traversal_order() {
    common::init_tracing();
    let message = |subject: &str| MessageSpec::new().subject(subject);
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .root(
            FolderSpec::new("")
                .folder(
                    FolderSpec::new("A")
                        .folder(FolderSpec::new("A1").message(message("a1")))
                        .folder(FolderSpec::new("A2").message(message("a2")))
                        .message(message("a")),
                )
                .folder(FolderSpec::new("B").message(message("b1")).message(message("b2")))
                .message(message("root")),
        )
        .build()
        .unwrap();
    let expected = fixture.layout().messages.clone();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let walked: Vec<_> = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default())
        .map(|(path, message)| {
            let record = MessageRecord::project(&message);
            (message.node_id(), path.to_string(), record.subject.unwrap())
        })
        .collect();

    assert_eq!(
        walked.iter().map(|(node, ..)| *node).collect::<Vec<_>>(),
        expected
    );
    let visited: Vec<_> = walked
        .iter()
        .map(|(_, path, subject)| format!("{path}:{subject}"))
        .collect();
    assert_eq!(visited, ["A/A1:a1", "A/A2:a2", "A:a", "B:b1", "B:b2", ":root"]);
}

#[test]
fn test_corrupt_message_is_skipped() {
    common::init_tracing();
    let mut fixture = hello_world().build().unwrap();
    let hello = fixture.layout().messages[0];
    fixture.flip_data_bit(hello);
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
    let subjects: Vec<_> = walker
        .by_ref()
        .map(|(_, message)| MessageRecord::project(&message).subject)
        .collect();
    assert_eq!(subjects, [Some("World".to_string())]);

    let diagnostics = walker.take_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].node, hello);
    assert_eq!(diagnostics[0].class, ErrorClass::ChecksumMismatch);
    assert_eq!(
        diagnostics[0].path.to_string(),
        "Top of Personal Folders/Inbox"
    );
}

#[test]
fn test_hierarchy_table_is_read_first() {
    common::init_tracing();
    let mut fixture = hello_world().build().unwrap();
    let inbox = fixture.layout().folders["Top of Personal Folders/Inbox"];
    let hierarchy = inbox.sibling(NodeIdType::HierarchyTable).unwrap();
    let contents = inbox.sibling(NodeIdType::ContentsTable).unwrap();
    fixture.flip_data_bit(hierarchy);
    fixture.flip_data_bit(contents);
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let folder = Folder::read(&pst, inbox).unwrap();
    let Err(hierarchy_err) = folder.hierarchy_table() else {
        panic!("hierarchy table was corrupted");
    };
    let Err(contents_err) = folder.contents_table() else {
        panic!("contents table was corrupted");
    };

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
    assert_eq!(walker.by_ref().count(), 0);

    let diagnostics = walker.diagnostics();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().all(|diagnostic| diagnostic.node == inbox));
    assert!(diagnostics
        .iter()
        .all(|diagnostic| diagnostic.class == ErrorClass::ChecksumMismatch));
    assert_eq!(diagnostics[0].message, hierarchy_err.to_string());
    assert_eq!(diagnostics[1].message, contents_err.to_string());
}

#[test]
fn test_bad_magic() {
    common::init_tracing();
    let fixture = hello_world().build().unwrap();
    let mut bytes = fixture.into_bytes();
    bytes[0] = b'X';

    let Err(err) = PstFile::from_bytes(bytes) else {
        panic!("a container without the NDB magic should not open");
    };
    assert_eq!(err.class(), ErrorClass::InvalidFormat);
    assert!(err.class().is_fatal());
}

#[test]
fn test_truncated_header() {
    common::init_tracing();
    let Err(err) = PstFile::from_bytes(vec![0; 100]) else {
        panic!("a file shorter than a header should not open");
    };
    assert_eq!(err.class(), ErrorClass::InvalidFormat);
}

#[test]
fn test_unsorted_node_btree() {
    common::init_tracing();
    let fixture = hello_world().unsorted_node_btree().build().unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let Err(err) = Folder::read(&pst, NID_ROOT_FOLDER) else {
        panic!("unsorted NBT keys should be rejected");
    };
    assert_eq!(err.class(), ErrorClass::CorruptIndex);

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
    assert_eq!(walker.by_ref().count(), 0);
    assert_eq!(walker.diagnostics().len(), 1);
    assert_eq!(walker.diagnostics()[0].class, ErrorClass::CorruptIndex);
}

#[test]
fn test_depth_limit() {
    common::init_tracing();
    let message = |subject: &str| MessageSpec::new().subject(subject);
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .root(
            FolderSpec::new("").folder(
                FolderSpec::new("1")
                    .message(message("one"))
                    .folder(
                        FolderSpec::new("2").message(message("two")).folder(
                            FolderSpec::new("3")
                                .message(message("three"))
                                .folder(FolderSpec::new("4").message(message("four"))),
                        ),
                    ),
            ),
        )
        .build()
        .unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions { max_depth: 2 });
    let subjects: Vec<_> = walker
        .by_ref()
        .filter_map(|(_, message)| MessageRecord::project(&message).subject)
        .collect();
    assert_eq!(subjects, ["two", "one"]);

    let diagnostics = walker.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].class, ErrorClass::CorruptIndex);
    assert_eq!(diagnostics[0].path.to_string(), "1/2");
}

#[test]
fn test_folder_cycle() {
    common::init_tracing();
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .root(
            FolderSpec::new("").folder(
                FolderSpec::new("Loop")
                    .link(NID_ROOT_FOLDER)
                    .message(MessageSpec::new().subject("once")),
            ),
        )
        .build()
        .unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
    assert_eq!(walker.by_ref().count(), 1);
    assert_eq!(walker.diagnostics().len(), 1);
    assert_eq!(walker.diagnostics()[0].node, NID_ROOT_FOLDER);
    assert_eq!(walker.diagnostics()[0].class, ErrorClass::CorruptIndex);
}

#[test]
fn test_store_display_name() {
    common::init_tracing();
    let fixture = hello_world().store_name("Archive").build().unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let store = Store::read(&pst).unwrap();
    assert_eq!(store.display_name().unwrap(), "Archive");
}

#[test]
fn test_format_variants() {
    common::init_tracing();
    use pst_fixture::CryptMethod;

    let expected: Vec<_> = {
        let fixture = hello_world().build().unwrap();
        let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();
        Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default())
            .map(|(_, message)| MessageRecord::project(&message))
            .collect()
    };

    for version in [NdbVersion::Ansi, NdbVersion::Unicode, NdbVersion::Unicode4k] {
        for crypt in [CryptMethod::None, CryptMethod::Permute, CryptMethod::Cyclic] {
            let fixture = PstBuilder::new(version)
                .crypt(crypt)
                .root(hello_world_root())
                .build()
                .unwrap();
            let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();
            assert_eq!(pst.header().version(), version);
            assert_eq!(pst.header().crypt_method(), crypt);

            let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
            let records: Vec<_> = walker
                .by_ref()
                .map(|(_, message)| MessageRecord::project(&message))
                .collect();
            assert!(walker.diagnostics().is_empty(), "{version:?} {crypt:?}");
            assert_eq!(records, expected, "{version:?} {crypt:?}");
        }
    }
}

#[test]
fn test_multi_level_btrees() {
    common::init_tracing();
    let mut inbox = FolderSpec::new("Inbox");
    for i in 0..40 {
        inbox = inbox.message(MessageSpec::new().subject(&format!("message {i}")));
    }
    let fixture = PstBuilder::new(NdbVersion::Unicode)
        .max_page_entries(3)
        .root(FolderSpec::new("").folder(inbox))
        .build()
        .unwrap();
    let pst = PstFile::from_bytes(fixture.into_bytes()).unwrap();

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, WalkOptions::default());
    let subjects: Vec<_> = walker
        .by_ref()
        .filter_map(|(_, message)| MessageRecord::project(&message).subject)
        .collect();
    assert!(walker.diagnostics().is_empty());
    assert_eq!(subjects.len(), 40);
    assert_eq!(subjects[39], "message 39");
}
