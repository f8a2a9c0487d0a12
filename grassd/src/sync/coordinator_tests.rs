use super::*;
use crate::sync::test_support::MemoryRemote;
use tempfile::{TempDir, tempdir};
use tokio::sync::oneshot;

struct Harness {
    dir: TempDir,
    remote: Arc<MemoryRemote>,
    coordinator: Arc<SyncCoordinator>,
    session: Session,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let settings = SyncSettings {
            cache_root: dir.path().join("cache"),
            retry: RetryGuard::new(3, Duration::from_millis(1)),
            lock_poll: Duration::from_millis(2),
            process_poll: Duration::from_millis(2),
        };
        let coordinator = Arc::new(SyncCoordinator::new(remote.clone(), settings));
        Self {
            dir,
            remote,
            coordinator,
            session: Session::new("u1", "token"),
        }
    }

    fn local_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn upload(&self, path: &str, contents: &str) {
        let local = self.local_file("upload.tmp", contents);
        self.coordinator
            .upload(&self.session, path, &local)
            .await
            .unwrap();
    }

    fn record_modified(&self, path: &str) -> Option<String> {
        self.remote
            .get(&format!("{}/modified", record_key("u1", path)))
            .and_then(|value| value.as_str().map(str::to_string))
    }
}

#[tokio::test]
async fn upload_then_fetch_returns_the_uploaded_bytes() {
    let h = Harness::new();
    h.upload("a/b/notes.txt", "X").await;

    assert_eq!(
        h.remote.blob("files/u1/a/b/notes.txt").as_deref(),
        Some(&b"X"[..])
    );
    let record = h
        .remote
        .get("users/u1/owned_files/a/b/notes&123txt")
        .unwrap();
    assert_eq!(record["type"], "file");
    assert!(record["modified"].as_str().is_some());

    let local = h
        .coordinator
        .fetch(&h.session, "a/b/notes.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read_to_string(local).unwrap(), "X");
    assert!(h.coordinator.locks().held_locks().is_empty());
    assert!(h.remote.get("locks/u1").is_none());
}

#[tokio::test]
async fn unchanged_record_is_downloaded_once() {
    let h = Harness::new();
    h.upload("notes.txt", "X").await;

    h.coordinator.fetch(&h.session, "notes.txt").await.unwrap();
    h.coordinator.fetch(&h.session, "notes.txt").await.unwrap();

    assert_eq!(h.remote.downloads(), 1);
}

#[tokio::test]
async fn bumped_modified_marker_triggers_a_new_download() {
    let h = Harness::new();
    h.upload("a/b/notes.txt", "X").await;
    h.coordinator
        .fetch(&h.session, "a/b/notes.txt")
        .await
        .unwrap();

    h.remote.set(
        &format!("{}/modified", record_key("u1", "a/b/notes.txt")),
        json!("2099-01-01T00:00:00Z"),
    );
    h.coordinator
        .fetch(&h.session, "a/b/notes.txt")
        .await
        .unwrap();

    assert_eq!(h.remote.downloads(), 2);
    let meta = h
        .coordinator
        .cache()
        .cached_meta("a/b/notes.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.modified, "2099-01-01T00:00:00Z");
}

#[tokio::test]
async fn fetch_of_missing_record_or_folder_is_none() {
    let h = Harness::new();
    h.upload("docs/a.txt", "A").await;

    assert!(h.coordinator.fetch(&h.session, "nope.txt").await.unwrap().is_none());
    assert!(h.coordinator.fetch(&h.session, "docs").await.unwrap().is_none());
    assert_eq!(h.remote.downloads(), 0);
}

#[tokio::test]
async fn fetch_while_offline_is_none() {
    let h = Harness::new();
    h.upload("notes.txt", "X").await;
    h.remote.go_offline(u32::MAX);

    let fetched = h.coordinator.fetch(&h.session, "notes.txt").await.unwrap();

    assert!(fetched.is_none());
    assert_eq!(h.remote.failed_calls(), 4);
}

#[tokio::test]
async fn fetch_of_record_without_content_is_none() {
    let h = Harness::new();
    h.remote.set(
        &record_key("u1", "ghost.txt"),
        json!({ "type": "file", "modified": "2024-01-01T00:00:00Z" }),
    );

    assert!(h.coordinator.fetch(&h.session, "ghost.txt").await.unwrap().is_none());
    assert!(h.remote.get("locks/u1").is_none());
}

#[tokio::test]
async fn upload_rejects_root_path() {
    let h = Harness::new();
    let local = h.local_file("a.txt", "A");

    let err = h.coordinator.upload(&h.session, "/", &local).await.unwrap_err();

    assert!(matches!(err, SyncError::InvalidPath(_)));
}

#[tokio::test]
async fn dot_segments_are_refused_before_any_remote_write() {
    let h = Harness::new();
    let local = h.local_file("a.txt", "A");

    let err = h
        .coordinator
        .upload(&h.session, "a/../b.txt", &local)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPath(_)));
    assert!(h.remote.blob_put_log().is_empty());
    assert!(h.remote.get("users/u1/owned_files").is_none());

    let err = h.coordinator.fetch(&h.session, "./b.txt").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidPath(_)));
    assert_eq!(h.remote.downloads(), 0);
}

#[tokio::test]
async fn upload_with_unreadable_source_fails_and_releases_lock() {
    let h = Harness::new();

    let err = h
        .coordinator
        .upload(&h.session, "notes.txt", Path::new("/nonexistent/source"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::TransferFailed(path) if path == "notes.txt"));
    assert!(h.remote.get(&record_key("u1", "notes.txt")).is_none());
    assert!(h.coordinator.locks().held_locks().is_empty());
}

#[tokio::test]
async fn upload_while_offline_reports_unreachable_lock_table() {
    let h = Harness::new();
    let local = h.local_file("a.txt", "A");
    h.remote.go_offline(u32::MAX);

    let err = h
        .coordinator
        .upload(&h.session, "a.txt", &local)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Lock(LockError::Unavailable(_))));
    assert!(h.remote.blob_put_log().is_empty());
}

#[tokio::test]
async fn update_refuses_files_the_user_does_not_own() {
    let h = Harness::new();
    let local = h.local_file("a.txt", "A");

    let err = h
        .coordinator
        .update(&h.session, "a.txt", &local)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotOwned(path) if path == "a.txt"));
    assert!(h.remote.blob_put_log().is_empty());
}

#[tokio::test]
async fn update_replaces_content_and_refreshes_modified() {
    let h = Harness::new();
    h.upload("notes.txt", "old").await;
    h.remote.set(
        &format!("{}/modified", record_key("u1", "notes.txt")),
        json!("2000-01-01T00:00:00Z"),
    );
    let local = h.local_file("new.txt", "new");

    h.coordinator
        .update(&h.session, "notes.txt", &local)
        .await
        .unwrap();

    assert_eq!(h.remote.blob("files/u1/notes.txt").as_deref(), Some(&b"new"[..]));
    let record = h.remote.get(&record_key("u1", "notes.txt")).unwrap();
    assert_eq!(record["type"], "file");
    assert_ne!(
        h.record_modified("notes.txt").as_deref(),
        Some("2000-01-01T00:00:00Z")
    );
}

#[tokio::test]
async fn delete_refuses_files_the_user_does_not_own() {
    let h = Harness::new();
    h.upload("mine.txt", "A").await;

    let err = h
        .coordinator
        .delete(&h.session, "theirs.txt")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotOwned(_)));
    assert!(h.remote.blob("files/u1/mine.txt").is_some());
}

#[tokio::test]
async fn delete_does_not_treat_a_folder_as_owned_file() {
    let h = Harness::new();
    h.upload("docs/a.txt", "A").await;

    let err = h.coordinator.delete(&h.session, "docs").await.unwrap_err();

    assert!(matches!(err, SyncError::NotOwned(_)));
}

#[tokio::test]
async fn delete_removes_content_and_record() {
    let h = Harness::new();
    h.upload("docs/a.txt", "A").await;
    h.upload("docs/b.txt", "B").await;

    h.coordinator.delete(&h.session, "docs/a.txt").await.unwrap();

    assert!(h.remote.blob("files/u1/docs/a.txt").is_none());
    assert!(h.remote.get(&record_key("u1", "docs/a.txt")).is_none());
    assert!(h.remote.get(&record_key("u1", "docs/b.txt")).is_some());
    assert!(h.coordinator.fetch(&h.session, "docs/a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_tolerates_already_missing_content() {
    let h = Harness::new();
    h.remote.set(
        &record_key("u1", "orphan.txt"),
        json!({ "type": "file", "modified": "2024-01-01T00:00:00Z" }),
    );

    h.coordinator.delete(&h.session, "orphan.txt").await.unwrap();

    assert!(h.remote.get(&record_key("u1", "orphan.txt")).is_none());
}

#[tokio::test]
async fn list_decodes_names_and_sorts() {
    let h = Harness::new();
    h.upload("docs/z.txt", "Z").await;
    h.upload("docs/a.b.txt", "A").await;
    h.upload("docs/sub/c.txt", "C").await;

    let entries = h.coordinator.list(&h.session, "docs").await.unwrap();

    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.b.txt", "sub", "z.txt"]);
    assert!(!entries[0].is_folder);
    assert!(entries[0].modified.is_some());
    assert!(entries[1].is_folder);
    assert!(entries[1].modified.is_none());

    let root = h.coordinator.list(&h.session, "/").await.unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].name, "docs");
}

#[tokio::test]
async fn list_of_missing_folder_is_empty_and_file_is_rejected() {
    let h = Harness::new();
    h.upload("docs/a.txt", "A").await;

    assert!(h.coordinator.list(&h.session, "nothing").await.unwrap().is_empty());
    let err = h
        .coordinator
        .list(&h.session, "docs/a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotAFolder(_)));
}

#[tokio::test]
async fn access_list_accepts_array_and_keyed_shapes() {
    let h = Harness::new();
    assert!(h.coordinator.access_list(&h.session).await.unwrap().is_empty());

    h.remote.set("users/u1/access_list", json!(["u2", "u3"]));
    assert_eq!(
        h.coordinator.access_list(&h.session).await.unwrap(),
        vec!["u2", "u3"]
    );

    h.remote
        .set("users/u1/access_list", json!({ "-Nabc": "u4", "-Nabd": "u5" }));
    let mut ids = h.coordinator.access_list(&h.session).await.unwrap();
    ids.sort();
    assert_eq!(ids, vec!["u4", "u5"]);
}

#[tokio::test]
async fn end_session_releases_remaining_locks() {
    let h = Harness::new();
    h.coordinator
        .locks()
        .acquire(&h.session, "a.txt", LockMode::Read)
        .await
        .unwrap();
    h.coordinator
        .locks()
        .acquire(&h.session, "b.txt", LockMode::Write)
        .await
        .unwrap();

    assert_eq!(h.coordinator.end_session(&h.session).await, 2);
    assert!(h.coordinator.locks().held_locks().is_empty());
    assert!(h.remote.get("locks/u1").is_none());
}

#[tokio::test]
async fn spawned_operations_report_through_callbacks() {
    let h = Harness::new();
    let local = h.local_file("a.txt", "A");

    let (tx, rx) = oneshot::channel();
    let handle = h
        .coordinator
        .spawn_upload(h.session.clone(), "a.txt", local, move |result| {
            let _ = tx.send(result.is_ok());
        });
    assert!(rx.await.unwrap());
    handle.await.unwrap();

    let (tx, rx) = oneshot::channel();
    h.coordinator
        .spawn_fetch(h.session.clone(), "a.txt", move |result| {
            let _ = tx.send(result.unwrap());
        })
        .await
        .unwrap();
    let local = rx.await.unwrap().unwrap();
    assert_eq!(std::fs::read_to_string(local).unwrap(), "A");

    let (tx, rx) = oneshot::channel();
    let other = h.local_file("b.txt", "B");
    h.coordinator
        .spawn_update(h.session.clone(), "missing.txt", other, move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();
    assert!(matches!(rx.await.unwrap(), Err(SyncError::NotOwned(_))));
}

#[tokio::test]
async fn concurrent_uploads_to_one_path_both_land() {
    let h = Harness::new();
    let first = h.local_file("one.txt", "1");
    let second = h.local_file("two.txt", "2");

    let (a, b) = tokio::join!(
        h.coordinator.upload(&h.session, "shared.txt", &first),
        h.coordinator.upload(&h.session, "shared.txt", &second),
    );

    a.unwrap();
    b.unwrap();
    assert_eq!(h.remote.blob_put_log().len(), 2);
    assert!(h.remote.get("locks/u1").is_none());
}

#[tokio::test]
async fn shutdown_stops_accepting_transfers() {
    let h = Harness::new();
    h.coordinator.shutdown().await.unwrap();
    let local = h.local_file("a.txt", "A");

    let err = h
        .coordinator
        .upload(&h.session, "a.txt", &local)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Scheduler(SchedulerError::Closed)));
    assert!(h.coordinator.locks().held_locks().is_empty());
}
