//! End-to-end snapshot store scenarios
//!
//! Each test builds a fake host layout and a store home inside a TempDir
//! and drives the public Store API.

use cmv_core::host::{read_sessions_index, HostLayout};
use cmv_core::{BranchOptions, CreateSnapshotParams, Error, ImportOptions, Store};
use std::path::PathBuf;
use tempfile::TempDir;

const SESSION_ID: &str = "3f8a2c1d-5b6e-4f70-9a81-b2c3d4e5f607";
const PROJECT_DIR: &str = "home--dev--widget";

fn conversation_fixture() -> String {
    [
        r#"{"type":"user","message":{"role":"user","content":[{"type":"text","text":"add retry logic"}]}}"#,
        r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"will do"}]}}"#,
    ]
    .join("\n")
        + "\n"
}

fn empty_fixture() -> String {
    [
        r#"{"type":"file-history-snapshot","data":{}}"#,
        r#"{"type":"file-history-snapshot","data":{}}"#,
    ]
    .join("\n")
        + "\n"
}

/// A store over a fake host layout with one session file.
fn fixture_store(content: &str) -> (TempDir, Store, PathBuf) {
    let dir = TempDir::new().unwrap();
    let host_root = dir.path().join("host");
    let project_dir = host_root.join("projects").join(PROJECT_DIR);
    std::fs::create_dir_all(&project_dir).unwrap();

    let source = project_dir.join(format!("{}.jsonl", SESSION_ID));
    std::fs::write(&source, content).unwrap();

    let store = Store::with_home_and_layout(
        dir.path().join("cmv-home"),
        HostLayout::with_root(host_root),
    );
    store.init().unwrap();
    (dir, store, source)
}

fn create_snapshot(store: &Store, name: &str) -> cmv_core::Snapshot {
    let (snapshot, _warnings) = store
        .create_snapshot(&CreateSnapshotParams {
            name: name.to_string(),
            session: Some(SESSION_ID.to_string()),
            description: Some("checkpoint".to_string()),
            tags: vec!["test".to_string()],
        })
        .unwrap();
    snapshot
}

#[test]
fn snapshot_capture_is_byte_identical() {
    let (_dir, store, source) = fixture_store(&conversation_fixture());
    let snapshot = create_snapshot(&store, "base");

    assert!(snapshot.id.starts_with("snap_"));
    assert_eq!(snapshot.source_session_id, SESSION_ID);
    assert_eq!(snapshot.message_count, Some(2));
    assert!(snapshot.parent_snapshot.is_none());

    let captured = store.snapshot_session_file(&snapshot);
    assert_eq!(
        std::fs::read(&captured).unwrap(),
        std::fs::read(&source).unwrap()
    );

    // meta.json is a portable copy alongside the session.
    assert!(captured
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("meta.json")
        .exists());
}

#[test]
fn snapshot_names_validated_and_unique() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");

    let dup = store.create_snapshot(&CreateSnapshotParams {
        name: "base".to_string(),
        session: Some(SESSION_ID.to_string()),
        ..Default::default()
    });
    assert!(matches!(dup, Err(Error::SnapshotExists(_))));

    let bad = store.create_snapshot(&CreateSnapshotParams {
        name: "not ok".to_string(),
        session: Some(SESSION_ID.to_string()),
        ..Default::default()
    });
    assert!(matches!(bad, Err(Error::InvalidName { .. })));
}

#[test]
fn empty_snapshot_warns_on_capture_and_fails_to_branch() {
    let (_dir, store, _) = fixture_store(&empty_fixture());

    let (snapshot, warnings) = store
        .create_snapshot(&CreateSnapshotParams {
            name: "hollow".to_string(),
            session: Some(SESSION_ID.to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(snapshot.message_count, Some(0));
    assert!(warnings.iter().any(|w| w.contains("no conversation")));

    let index_before = std::fs::read_to_string(store.index_path()).unwrap();
    let result = store.create_branch("hollow", &BranchOptions::default());
    assert!(matches!(result, Err(Error::NoConversationContent(_))));

    // Nothing materialized, master index untouched.
    let project_dir = store.layout().projects_dir().join(PROJECT_DIR);
    let jsonl_count = std::fs::read_dir(&project_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jsonl"))
        .count();
    assert_eq!(jsonl_count, 1);
    assert_eq!(
        std::fs::read_to_string(store.index_path()).unwrap(),
        index_before
    );
}

#[test]
fn branch_copy_is_byte_identical_and_registered() {
    let (_dir, store, source) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");

    let result = store
        .create_branch(
            "base",
            &BranchOptions {
                branch_name: Some("try-retry".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    // Fresh 8-4-4-4-12 id, distinct from the source.
    let id = &result.branch.forked_session_id;
    assert_ne!(id, SESSION_ID);
    assert_eq!(id.len(), 36);
    assert!(id
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == '-'));

    assert_eq!(
        std::fs::read(&result.session_path).unwrap(),
        std::fs::read(&source).unwrap()
    );

    // Registered in the host's per-project index...
    let index = read_sessions_index(&result.project_dir).unwrap().unwrap();
    let entry = index
        .entries
        .iter()
        .find(|e| e.session_id == *id)
        .expect("host index entry");
    assert_eq!(entry.first_prompt.as_deref(), Some("try-retry"));
    assert_eq!(entry.is_sidechain, Some(false));

    // ...and on the snapshot in the master index.
    let snapshot = store.get_snapshot("base").unwrap();
    assert_eq!(snapshot.branches.len(), 1);
    assert_eq!(snapshot.branches[0].name, "try-retry");
}

#[test]
fn duplicate_branch_names_rejected() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");

    let opts = BranchOptions {
        branch_name: Some("twice".to_string()),
        ..Default::default()
    };
    store.create_branch("base", &opts).unwrap();
    assert!(matches!(
        store.create_branch("base", &opts),
        Err(Error::BranchExists { .. })
    ));
}

#[test]
fn trimmed_branch_with_orientation_message() {
    let big = "Z".repeat(2000);
    let bloated_line = format!(
        r#"{{"type":"user","message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"toolu_05","content":[{{"type":"text","text":"{}"}}]}}]}}}}"#,
        big
    );
    let content = format!("{}{}\n", conversation_fixture(), bloated_line);
    let (_dir, store, _) = fixture_store(&content);
    create_snapshot(&store, "base");

    let result = store
        .create_branch(
            "base",
            &BranchOptions {
                trim: true,
                orientation_message: Some("continue from the retry work".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let metrics = result.trim_metrics.expect("trim metrics");
    assert_eq!(metrics.tool_results_stubbed, 1);

    let materialized = std::fs::read_to_string(&result.session_path).unwrap();
    let last_line = materialized.lines().last().unwrap();
    let value: serde_json::Value = serde_json::from_str(last_line).unwrap();
    assert_eq!(value["type"], "user");
    assert_eq!(value["sessionId"], result.branch.forked_session_id);
    assert_eq!(
        value["message"]["content"][0]["text"],
        "continue from the retry work"
    );
}

#[test]
fn dry_run_touches_nothing() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");

    let index_before = std::fs::read_to_string(store.index_path()).unwrap();
    let result = store
        .create_branch(
            "base",
            &BranchOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(result.dry_run);
    assert!(!result.session_path.exists());
    assert_eq!(
        std::fs::read_to_string(store.index_path()).unwrap(),
        index_before
    );
    assert!(store.get_snapshot("base").unwrap().branches.is_empty());
}

#[test]
fn delete_branch_removes_file_index_entry_and_record() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");

    let result = store
        .create_branch(
            "base",
            &BranchOptions {
                branch_name: Some("doomed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(result.session_path.exists());

    store.delete_branch("base", "doomed").unwrap();

    assert!(!result.session_path.exists());
    let index = read_sessions_index(&result.project_dir).unwrap().unwrap();
    assert!(!index
        .entries
        .iter()
        .any(|e| e.session_id == result.branch.forked_session_id));
    assert!(store.get_snapshot("base").unwrap().branches.is_empty());

    // Deleting again reports the missing branch.
    assert!(matches!(
        store.delete_branch("base", "doomed"),
        Err(Error::BranchNotFound { .. })
    ));
}

#[test]
fn capturing_a_branched_session_links_lineage() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");

    let result = store
        .create_branch("base", &BranchOptions::default())
        .unwrap();

    let (child, _) = store
        .create_snapshot(&CreateSnapshotParams {
            name: "after-branch".to_string(),
            session: Some(result.branch.forked_session_id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(child.parent_snapshot.as_deref(), Some("base"));

    let tree = store.build_tree().unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].snapshot.name, "base");
    assert_eq!(tree[0].children.len(), 1);
    assert_eq!(tree[0].children[0].snapshot.name, "after-branch");
}

#[test]
fn archive_round_trip_restores_bytes() {
    let (dir, store, _) = fixture_store(&conversation_fixture());
    let snapshot = create_snapshot(&store, "base");
    let original_bytes = std::fs::read(store.snapshot_session_file(&snapshot)).unwrap();

    let out = dir.path().join("base.cmv");
    let archive_path = store.export_snapshot("base", Some(out.as_path())).unwrap();
    assert!(archive_path.exists());

    store.delete_snapshot("base").unwrap();
    assert!(matches!(
        store.get_snapshot("base"),
        Err(Error::SnapshotNotFound(_))
    ));

    let imported = store
        .import_snapshot(&archive_path, &ImportOptions::default())
        .unwrap();
    assert!(imported.warnings.is_empty());
    assert_eq!(imported.snapshot.name, "base");
    // Fresh storage id on import.
    assert_ne!(imported.snapshot.id, snapshot.id);

    let restored = std::fs::read(store.snapshot_session_file(&imported.snapshot)).unwrap();
    assert_eq!(restored, original_bytes);
}

#[test]
fn import_conflicts_resolved_by_rename_or_force() {
    let (dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");
    let out = dir.path().join("base.cmv");
    let archive_path = store.export_snapshot("base", Some(out.as_path())).unwrap();

    assert!(matches!(
        store.import_snapshot(&archive_path, &ImportOptions::default()),
        Err(Error::SnapshotExists(_))
    ));

    let renamed = store
        .import_snapshot(
            &archive_path,
            &ImportOptions {
                rename: Some("base-copy".to_string()),
                force: false,
            },
        )
        .unwrap();
    assert_eq!(renamed.snapshot.name, "base-copy");

    let forced = store
        .import_snapshot(
            &archive_path,
            &ImportOptions {
                rename: None,
                force: true,
            },
        )
        .unwrap();
    assert_eq!(forced.snapshot.name, "base");
    assert_eq!(store.list_snapshots().unwrap().len(), 2);
}

#[test]
fn import_drops_missing_parent_with_warning() {
    let (dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "base");
    let result = store
        .create_branch("base", &BranchOptions::default())
        .unwrap();
    store
        .create_snapshot(&CreateSnapshotParams {
            name: "child".to_string(),
            session: Some(result.branch.forked_session_id.clone()),
            ..Default::default()
        })
        .unwrap();

    let out = dir.path().join("child.cmv");
    let archive_path = store.export_snapshot("child", Some(out.as_path())).unwrap();

    // Import into a second, empty store: the parent does not exist there.
    let other = Store::with_home_and_layout(
        dir.path().join("other-home"),
        HostLayout::with_root(dir.path().join("host")),
    );
    other.init().unwrap();

    let imported = other
        .import_snapshot(&archive_path, &ImportOptions::default())
        .unwrap();
    assert!(imported.snapshot.parent_snapshot.is_none());
    assert_eq!(imported.warnings.len(), 1);
    assert!(imported.warnings[0].contains("base"));
}

#[test]
fn invalid_archive_rejected() {
    let (dir, store, _) = fixture_store(&conversation_fixture());

    // A gzipped tar with no meta.json.
    let bogus = dir.path().join("bogus.cmv");
    {
        let encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&bogus).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_ustar();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "unrelated.txt", &b"hi"[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    assert!(matches!(
        store.import_snapshot(&bogus, &ImportOptions::default()),
        Err(Error::InvalidArchive(_))
    ));
}

#[test]
fn delete_snapshot_keeps_branch_session_files() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    let snapshot = create_snapshot(&store, "base");
    let result = store
        .create_branch("base", &BranchOptions::default())
        .unwrap();

    store.delete_snapshot("base").unwrap();

    // The snapshot directory is gone; the user's branched session is not.
    assert!(!store.snapshot_dir(&snapshot).exists());
    assert!(result.session_path.exists());
}

#[test]
fn atomic_index_never_references_missing_dirs() {
    let (_dir, store, _) = fixture_store(&conversation_fixture());
    create_snapshot(&store, "a");

    // Whatever the operation history, every snapshot_dir in the published
    // index resolves to a directory on disk.
    create_snapshot_named(&store, "b");
    store.delete_snapshot("a").unwrap();

    let index = store.load_index().unwrap();
    for snapshot in index.snapshots.values() {
        assert!(store.snapshot_dir(snapshot).is_dir());
    }
}

fn create_snapshot_named(store: &Store, name: &str) {
    store
        .create_snapshot(&CreateSnapshotParams {
            name: name.to_string(),
            session: Some(SESSION_ID.to_string()),
            ..Default::default()
        })
        .unwrap();
}
