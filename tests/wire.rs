//! Pins the wire contract: exact field names, action tags, envelope
//! shape, and separator normalization as the companion process sees them.

use deskbridge::protocol::{envelope, ContextFile, FileMessage, InitMessage, EVENT_NAME};

#[test]
fn event_name_is_message() {
    assert_eq!(EVENT_NAME, "message");
}

#[test]
fn add_file_frame_as_the_companion_sees_it() {
    let msg = FileMessage::add("src/lib.rs", "/home/dev/project", "deskbridge");
    let frame = envelope(&msg).unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "event": "message",
            "data": {
                "action": "add-file",
                "path": "src/lib.rs",
                "baseDir": "/home/dev/project",
                "sourceType": "deskbridge",
            }
        })
    );
}

#[test]
fn drop_file_frame_as_the_companion_sees_it() {
    let msg = FileMessage::drop("src/lib.rs", "/home/dev/project", "deskbridge");
    let frame = envelope(&msg).unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["data"]["action"], "drop-file");
}

#[test]
fn init_frame_as_the_companion_sees_it() {
    let init = InitMessage::new(
        "/home/dev/project",
        vec![
            ContextFile {
                path: "a.rs".into(),
                source_type: "deskbridge".into(),
            },
            ContextFile {
                path: "sub/b.rs".into(),
                source_type: "deskbridge".into(),
            },
        ],
    );
    let frame = envelope(&init).unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["data"]["action"], "init");
    assert_eq!(value["data"]["baseDir"], "/home/dev/project");
    assert_eq!(value["data"]["contextFiles"][1]["path"], "sub/b.rs");
    assert_eq!(value["data"]["contextFiles"][0]["sourceType"], "deskbridge");
}

#[test]
fn windows_hosts_emit_backslash_separators() {
    let msg = FileMessage::add("src/deep/mod.rs", "/home/dev/project", "deskbridge");
    let wire = msg.for_wire('\\');
    assert_eq!(wire.path, "src\\deep\\mod.rs");
    assert_eq!(wire.base_dir, "\\home\\dev\\project");
}

#[test]
fn unix_hosts_emit_forward_slashes_untouched() {
    let msg = FileMessage::add("src/deep/mod.rs", "/home/dev/project", "deskbridge");
    let wire = msg.for_wire('/');
    assert_eq!(wire.path, "src/deep/mod.rs");
    assert_eq!(wire.base_dir, "/home/dev/project");
}
