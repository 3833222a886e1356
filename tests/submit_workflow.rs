//! Submission workflow against an in-memory tracking service.

use serde_json::json;
use shotsub::engine::{EncodeOptions, Encoder};
use shotsub::tracking::{
    submit_review_media, EntityRef, Filter, QueryOpts, Record, Session, SubmitError,
    TrackingError, TrackingService,
};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Default)]
struct FakeTracking {
    versions: RefCell<Vec<Record>>,
    next_id: Cell<i64>,
    uploads: RefCell<Vec<(i64, PathBuf, String, String)>>,
    deleted: RefCell<Vec<(String, i64)>>,
    calls: RefCell<Vec<String>>,
    fail_upload: bool,
}

impl FakeTracking {
    fn new() -> Self {
        let fake = Self::default();
        fake.next_id.set(100);
        fake
    }

    fn seed_version(&self, code: &str, task: &EntityRef) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let mut record = Record::new();
        record.insert("type", json!("Version"));
        record.insert("id", json!(id));
        record.insert("code", json!(code));
        record.insert("sg_task", json!({"type": task.kind, "id": task.id}));
        self.versions.borrow_mut().push(record);
    }
}

fn matches(record: &Record, filter: &Filter) -> bool {
    match filter.op.as_str() {
        "is" => record.get(&filter.field) == Some(&filter.value),
        "starts_with" => match (record.str_field(&filter.field), filter.value.as_str()) {
            (Some(value), Some(prefix)) => value.starts_with(prefix),
            _ => false,
        },
        _ => false,
    }
}

impl TrackingService for FakeTracking {
    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        _fields: &[&str],
        _order: &[shotsub::tracking::Sort],
    ) -> Result<Vec<Record>, TrackingError> {
        self.calls.borrow_mut().push(format!("find:{entity_type}"));
        if entity_type != "Version" {
            return Ok(Vec::new());
        }
        Ok(self
            .versions
            .borrow()
            .iter()
            .filter(|v| filters.iter().all(|f| matches(v, f)))
            .cloned()
            .collect())
    }

    fn create(&self, entity_type: &str, data: &Record) -> Result<Record, TrackingError> {
        self.calls
            .borrow_mut()
            .push(format!("create:{entity_type}"));
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let mut record = data.clone();
        record.insert("type", json!(entity_type));
        record.insert("id", json!(id));
        self.versions.borrow_mut().push(record.clone());
        Ok(record)
    }

    fn upload(
        &self,
        entity_type: &str,
        id: i64,
        file: &Path,
        field: &str,
        display_name: &str,
    ) -> Result<(), TrackingError> {
        self.calls
            .borrow_mut()
            .push(format!("upload:{entity_type}"));
        // Record the attempt either way so tests can inspect the media path.
        self.uploads.borrow_mut().push((
            id,
            file.to_path_buf(),
            field.to_string(),
            display_name.to_string(),
        ));
        if self.fail_upload {
            return Err(TrackingError::Upload("transfer interrupted".to_string()));
        }
        Ok(())
    }

    fn delete(&self, entity_type: &str, id: i64) -> Result<(), TrackingError> {
        self.calls
            .borrow_mut()
            .push(format!("delete:{entity_type}"));
        self.deleted
            .borrow_mut()
            .push((entity_type.to_string(), id));
        self.versions
            .borrow_mut()
            .retain(|v| v.id() != Some(id) || v.kind() != Some(entity_type));
        Ok(())
    }
}

fn sample_task() -> Record {
    let mut task = Record::new();
    task.insert("type", json!("Task"));
    task.insert("id", json!(42));
    task.insert("cached_display_name", json!("anim"));
    task.insert("entity", json!({"type": "Shot", "id": 7, "name": "sh010"}));
    task.insert("project", json!({"type": "Project", "id": 1}));
    task
}

fn sequence_fixture() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    for i in 1..=3 {
        fs::write(dir.path().join(format!("box{i:04}.jpg")), b"x").unwrap();
    }
    let member = dir.path().join("box0002.jpg");
    (dir, member)
}

#[cfg(unix)]
fn script_encoder(dir: &Path) -> Encoder {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake_ffmpeg.sh");
    fs::write(
        &path,
        "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'frame=  1\\nframe=  2\\n' >&2\nprintf 'movie-bytes' > \"$out\"\n",
    )
    .unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    Encoder::from_path(&path).unwrap()
}

#[test]
fn version_numbering_continues_from_highest() {
    let fake = FakeTracking::new();
    let task = EntityRef::new("Task", 42);
    fake.seed_version("sh010_anim_Review_v0002", &task);
    fake.seed_version("sh010_anim_Review_v0007", &task);
    fake.seed_version("sh010_anim_Review_vFINAL", &task); // ignored, no number

    let session = Session::connect(fake).unwrap();
    let name = session
        .unique_version_name(&task, "sh010_anim_Review")
        .unwrap();
    assert_eq!(name, "sh010_anim_Review_v0008");
}

#[test]
fn version_numbering_starts_at_one() {
    let session = Session::connect(FakeTracking::new()).unwrap();
    let task = EntityRef::new("Task", 42);
    let name = session.unique_version_name(&task, "sh010_anim_Review").unwrap();
    assert_eq!(name, "sh010_anim_Review_v0001");
}

#[test]
fn version_numbering_pads_to_four_digits_only() {
    let fake = FakeTracking::new();
    let task = EntityRef::new("Task", 42);
    fake.seed_version("sh010_anim_Review_v99999", &task);

    let session = Session::connect(fake).unwrap();
    let name = session
        .unique_version_name(&task, "sh010_anim_Review")
        .unwrap();
    assert_eq!(name, "sh010_anim_Review_v100000");
}

#[test]
fn create_version_requires_a_task() {
    let session = Session::connect(FakeTracking::new()).unwrap();
    let mut shot = Record::new();
    shot.insert("type", json!("Shot"));
    shot.insert("id", json!(7));

    match session.create_version(&shot, "sh010_anim_Review", "note") {
        Err(TrackingError::Request(_)) => {}
        other => panic!("expected Request error, got {other:?}"),
    }
}

#[test]
fn unsupported_format_never_touches_the_service() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("plate0001.png"), b"x").unwrap();

    let session = Session::connect(FakeTracking::new()).unwrap();
    // connect() issues one Project find; nothing after that.
    session.service().calls.borrow_mut().clear();

    // Encoder never runs for a rejected format; an inert file is enough.
    let inert = dir.path().join("inert");
    fs::write(&inert, b"").unwrap();
    let encoder = Encoder::from_path(&inert).unwrap();

    match submit_review_media(
        &session,
        &sample_task(),
        &dir.path().join("plate0001.png"),
        "note",
        &encoder,
        &EncodeOptions::default(),
        |_| {},
    ) {
        Err(SubmitError::UnsupportedFormat(ext)) => assert_eq!(ext, ".png"),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    assert!(session.service().calls.borrow().is_empty());
}

#[cfg(unix)]
#[test]
fn submit_encodes_creates_and_uploads() {
    let (dir, member) = sequence_fixture();
    let encoder = script_encoder(dir.path());
    let session = Session::connect(FakeTracking::new()).unwrap();

    let mut frames = Vec::new();
    let version = submit_review_media(
        &session,
        &sample_task(),
        &member,
        "first pass",
        &encoder,
        &EncodeOptions::default(),
        |f| frames.push(f),
    )
    .unwrap();

    assert_eq!(frames, vec![1, 2]);
    assert_eq!(
        version.str_field("code"),
        Some("sh010_anim_Review_v0001")
    );
    assert_eq!(version.str_field("description"), Some("first pass"));

    let uploads = session.service().uploads.borrow();
    assert_eq!(uploads.len(), 1);
    let (id, path, field, display_name) = &uploads[0];
    assert_eq!(Some(*id), version.id());
    assert_eq!(field, "sg_uploaded_movie");
    assert_eq!(display_name, "review_upload.mov");
    // Temp workspace is cleaned up after a successful upload.
    assert!(!path.exists());

    assert!(session.service().deleted.borrow().is_empty());
}

#[cfg(unix)]
#[test]
fn failed_upload_deletes_the_created_version() {
    let (dir, member) = sequence_fixture();
    let encoder = script_encoder(dir.path());

    let fake = FakeTracking {
        fail_upload: true,
        ..FakeTracking::new()
    };
    let session = Session::connect(fake).unwrap();

    match submit_review_media(
        &session,
        &sample_task(),
        &member,
        "first pass",
        &encoder,
        &EncodeOptions::default(),
        |_| {},
    ) {
        Err(SubmitError::Tracking(TrackingError::Upload(_))) => {}
        other => panic!("expected upload failure, got {other:?}"),
    }

    let deleted = session.service().deleted.borrow();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].0, "Version");

    // The temp workspace is cleaned up on the failure path too.
    let uploads = session.service().uploads.borrow();
    assert_eq!(uploads.len(), 1);
    let media = &uploads[0].1;
    assert!(!media.exists());
    assert!(!media.parent().unwrap().exists());

    let calls = session.service().calls.borrow();
    let create = calls.iter().position(|c| c == "create:Version").unwrap();
    let upload = calls.iter().position(|c| c == "upload:Version").unwrap();
    let delete = calls.iter().position(|c| c == "delete:Version").unwrap();
    assert!(create < upload && upload < delete);
}

#[test]
fn entity_queries_pass_through_the_service() {
    let session = Session::connect(FakeTracking::new()).unwrap();
    let project = EntityRef::new("Project", 1);
    let shot = EntityRef::new("Shot", 7);

    session.projects(&QueryOpts::default()).unwrap();
    session.assets(&project, &QueryOpts::default()).unwrap();
    session.sequences(&project, &QueryOpts::default()).unwrap();
    session.shots(&shot, &QueryOpts::default()).unwrap();
    session.tasks(&shot, &QueryOpts::default()).unwrap();

    let calls = session.service().calls.borrow();
    assert_eq!(
        calls.as_slice(),
        [
            "find:Project", // connect verification
            "find:Project",
            "find:Asset",
            "find:Sequence",
            "find:Shot",
            "find:Task",
        ]
    );
}
