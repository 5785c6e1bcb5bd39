//! Integration tests for workspace mutations.
//!
//! Real-disk scenarios run against a temporary directory through
//! `Workspace::open`; fault injection uses the in-memory filesystem.
//! These tests verify:
//!
//! 1. Copy, move and delete keep the tree and the disk in agreement
//! 2. External edits are detected as out of sync and picked up by refresh
//! 3. Partial failures are reported per resource while the rest lands
//! 4. Changes through one alias become visible through the other
//! 5. Listeners see one delta per committed operation
//! 6. A cancelled batch keeps its edits only if it touched the disk
//! 7. Cancelling in the middle of disk work leaves the tree matching the disk

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use canopy::core::flags::{Depth, UpdateFlags};
use canopy::core::info::LinkLocation;
use canopy::core::path::ResourcePath;
use canopy::core::progress::Progress;
use canopy::core::resource::Resource;
use canopy::core::rule::SchedulingRule;
use canopy::core::status::StatusCode;
use canopy::engine::{
    DeltaEntry, DeltaKind, ResourceChangeEvent, ResourceChangeListener, Workspace, WorkspaceBuilder,
    WorkspaceError,
};
use canopy::fs::{FileStat, FileSystem, FsError, FsOp, MemoryFileSystem};

// =============================================================================
// Test Fixtures
// =============================================================================

/// A workspace on a temporary directory with one open project `p`.
struct DiskWorkspace {
    dir: TempDir,
    ws: Workspace,
    progress: Progress,
}

impl DiskWorkspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let ws = Workspace::open(dir.path()).expect("failed to open workspace");
        let progress = Progress::new();
        ws.create_project("p", None, &progress).unwrap();
        Self { dir, ws, progress }
    }

    fn disk(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }
}

fn file(path: &str) -> Resource {
    Resource::file(path).unwrap()
}

fn folder(path: &str) -> Resource {
    Resource::folder(path).unwrap()
}

/// Push a file's mtime well past anything the workspace recorded.
fn modify_externally(location: &Path, contents: &str) {
    fs::write(location, contents).unwrap();
    let handle = fs::File::options().write(true).open(location).unwrap();
    handle
        .set_modified(SystemTime::now() + Duration::from_secs(30))
        .unwrap();
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Vec<DeltaEntry>>>,
}

impl ResourceChangeListener for Recorder {
    fn resource_changed(&self, event: &ResourceChangeEvent) {
        self.events
            .lock()
            .unwrap()
            .push(event.delta.entries().to_vec());
    }
}

// =============================================================================
// Real disk
// =============================================================================

#[test]
fn copy_then_move_then_delete_on_disk() {
    let t = DiskWorkspace::new();
    let (ws, progress) = (&t.ws, &t.progress);
    ws.create_folder(&folder("/p/src"), progress).unwrap();
    ws.create_file(&file("/p/src/main.txt"), b"hello", progress).unwrap();

    ws.copy(&folder("/p/src"), &folder("/p/backup"), UpdateFlags::NONE, progress)
        .unwrap();
    assert_eq!(fs::read(t.disk("p/backup/main.txt")).unwrap(), b"hello");
    assert!(ws.exists(&file("/p/backup/main.txt")));

    ws.move_resource(&folder("/p/backup"), &folder("/p/old"), UpdateFlags::NONE, progress)
        .unwrap();
    assert!(!t.disk("p/backup").exists());
    assert_eq!(fs::read(t.disk("p/old/main.txt")).unwrap(), b"hello");
    assert!(!ws.exists(&folder("/p/backup")));
    assert!(ws.exists(&file("/p/old/main.txt")));

    ws.delete(&[folder("/p/old")], UpdateFlags::NONE, progress).unwrap();
    assert!(!t.disk("p/old").exists());
    assert!(!ws.exists(&folder("/p/old")));
    assert!(ws.exists(&file("/p/src/main.txt")));
}

#[test]
fn external_edit_needs_force() {
    let t = DiskWorkspace::new();
    let (ws, progress) = (&t.ws, &t.progress);
    let target = file("/p/notes.txt");
    ws.create_file(&target, b"v1", progress).unwrap();
    modify_externally(&t.disk("p/notes.txt"), "v2");

    let err = ws.delete(&[target.clone()], UpdateFlags::NONE, progress).unwrap_err();
    assert!(err.has_code(StatusCode::OutOfSync));
    assert!(ws.exists(&target));
    assert!(t.disk("p/notes.txt").exists());

    ws.delete(&[target.clone()], UpdateFlags::FORCE, progress).unwrap();
    assert!(!ws.exists(&target));
    assert!(!t.disk("p/notes.txt").exists());
}

#[test]
fn refresh_picks_up_external_changes() {
    let t = DiskWorkspace::new();
    let (ws, progress) = (&t.ws, &t.progress);
    ws.create_file(&file("/p/gone.txt"), b"x", progress).unwrap();

    fs::create_dir(t.disk("p/docs")).unwrap();
    fs::write(t.disk("p/docs/readme.txt"), "new").unwrap();
    fs::remove_file(t.disk("p/gone.txt")).unwrap();

    let project = Resource::project_named("p").unwrap();
    ws.refresh_local(&project, Depth::Infinite, progress).unwrap();

    assert!(ws.exists(&folder("/p/docs")));
    assert!(ws.exists(&file("/p/docs/readme.txt")));
    assert!(!ws.exists(&file("/p/gone.txt")));
}

#[test]
fn linked_folder_reads_through_to_its_target() {
    let t = DiskWorkspace::new();
    let (ws, progress) = (&t.ws, &t.progress);
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("shared.txt"), "shared").unwrap();

    let link = folder("/p/ext");
    ws.create_link(&link, LinkLocation::path(outside.path()), UpdateFlags::NONE, progress)
        .unwrap();
    assert!(ws.exists(&file("/p/ext/shared.txt")));
    assert_eq!(ws.read_contents(&file("/p/ext/shared.txt")).unwrap(), b"shared");

    // Deleting the link leaves its target alone.
    ws.delete(&[link.clone()], UpdateFlags::NONE, progress).unwrap();
    assert!(!ws.exists(&link));
    assert!(outside.path().join("shared.txt").exists());
}

// =============================================================================
// Fault injection
// =============================================================================

fn memory_workspace() -> (Workspace, Arc<MemoryFileSystem>, Progress) {
    let fs = Arc::new(MemoryFileSystem::new());
    let ws = WorkspaceBuilder::new("/ws").fs(fs.clone()).build().unwrap();
    let progress = Progress::new();
    ws.create_project("p", None, &progress).unwrap();
    (ws, fs, progress)
}

#[test]
fn delete_reports_each_failure_and_removes_the_rest() {
    let (ws, fs, progress) = memory_workspace();
    ws.create_folder(&folder("/p/d"), &progress).unwrap();
    for name in ["a", "b", "c", "d/e"] {
        ws.create_file(&file(&format!("/p/{name}")), b"x", &progress).unwrap();
    }
    fs.fail_on(FsOp::Delete, "/ws/p/b");
    fs.fail_on(FsOp::Delete, "/ws/p/d/e");

    let err = ws
        .delete(&[file("/p/a"), file("/p/b"), folder("/p/d")], UpdateFlags::NONE, &progress)
        .unwrap_err();
    let failed: Vec<_> = err
        .status()
        .children()
        .iter()
        .filter_map(|s| s.path().cloned())
        .collect();
    assert_eq!(
        failed,
        vec![
            ResourcePath::parse("/p/b").unwrap(),
            ResourcePath::parse("/p/d/e").unwrap()
        ]
    );

    assert!(!ws.exists(&file("/p/a")));
    assert!(ws.exists(&file("/p/b")));
    assert!(ws.exists(&file("/p/c")));
    // The folder stays because its member could not go.
    assert!(ws.exists(&folder("/p/d")));
    assert!(ws.exists(&file("/p/d/e")));
}

#[test]
fn delete_through_one_alias_shows_in_the_other() {
    let (ws, _fs, progress) = memory_workspace();
    ws.create_project("q", None, &progress).unwrap();
    ws.create_folder(&folder("/p/src"), &progress).unwrap();
    ws.create_file(&file("/p/src/x.txt"), b"x", &progress).unwrap();
    ws.create_link(
        &folder("/q/mirror"),
        LinkLocation::path("/ws/p/src"),
        UpdateFlags::NONE,
        &progress,
    )
    .unwrap();
    assert!(ws.exists(&file("/q/mirror/x.txt")));

    ws.delete(&[file("/p/src/x.txt")], UpdateFlags::NONE, &progress).unwrap();
    ws.wait_for_refresh().unwrap();

    assert!(!ws.exists(&file("/p/src/x.txt")));
    assert!(!ws.exists(&file("/q/mirror/x.txt")));
    assert!(ws.exists(&folder("/q/mirror")));
}

// =============================================================================
// Notifications and cancellation
// =============================================================================

#[test]
fn listener_sees_one_delta_per_operation() {
    let (ws, _fs, progress) = memory_workspace();
    let recorder = Arc::new(Recorder::default());
    let id = ws.add_listener(recorder.clone());

    ws.create_file(&file("/p/a"), b"1", &progress).unwrap();
    ws.run(&SchedulingRule::root(), &progress, |ws| {
        ws.create_file(&file("/p/b"), b"2", &progress)?;
        ws.delete(&[file("/p/a")], UpdateFlags::NONE, &progress)
    })
    .unwrap();
    ws.wait_for_notifications().unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(events[0]
        .iter()
        .any(|e| e.path == ResourcePath::parse("/p/a").unwrap() && e.kind == DeltaKind::Added));
    let batch: Vec<_> = events[1].iter().map(|e| (e.path.to_string(), e.kind)).collect();
    assert!(batch.contains(&("/p/b".to_string(), DeltaKind::Added)));
    assert!(batch.contains(&("/p/a".to_string(), DeltaKind::Removed)));

    assert!(ws.remove_listener(id));
    ws.touch(&file("/p/b"), &progress).unwrap();
    ws.wait_for_notifications().unwrap();
    assert_eq!(recorder.events.lock().unwrap().len(), 2);
}

#[test]
fn cancelled_batch_without_disk_work_is_discarded() {
    let (ws, _fs, progress) = memory_workspace();
    ws.create_file(&file("/p/a"), b"1", &progress).unwrap();
    let before = ws.info(&file("/p/a")).unwrap();

    let batch = Progress::new();
    let err = ws
        .run(&SchedulingRule::root(), &batch, |ws| {
            ws.touch(&file("/p/a"), &batch)?;
            ws.set_derived(&file("/p/a"), true, &batch)?;
            batch.cancel();
            ws.touch(&file("/p/a"), &batch)
        })
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::Cancelled));

    let after = ws.info(&file("/p/a")).unwrap();
    assert_eq!(after.modification_stamp(), before.modification_stamp());
    assert_eq!(after.flags(), before.flags());
}

#[test]
fn cancelled_batch_after_disk_work_is_kept() {
    let (ws, fs, progress) = memory_workspace();

    let batch = Progress::new();
    let err = ws
        .run(&SchedulingRule::root(), &batch, |ws| {
            ws.create_file(&file("/p/written"), b"1", &batch)?;
            batch.cancel();
            ws.create_file(&file("/p/never"), b"2", &batch)
        })
        .unwrap_err();
    assert!(err.is_cancelled());

    assert!(ws.exists(&file("/p/written")));
    assert!(!ws.exists(&file("/p/never")));
    assert!(fs.exists(Path::new("/ws/p/written")));
    ws.touch(&file("/p/written"), &progress).unwrap();
}

// =============================================================================
// Cancellation inside the filesystem
// =============================================================================

/// Delegates to an in-memory filesystem and cancels `progress` once an
/// armed operation has completed a given number of times.
struct CancellingFs {
    inner: MemoryFileSystem,
    progress: Progress,
    trigger: Mutex<Option<(FsOp, usize)>>,
}

impl CancellingFs {
    fn new(progress: &Progress) -> Self {
        Self {
            inner: MemoryFileSystem::new(),
            progress: progress.clone(),
            trigger: Mutex::new(None),
        }
    }

    fn cancel_after(&self, op: FsOp, count: usize) {
        *self.trigger.lock().unwrap() = Some((op, count));
    }

    fn saw(&self, op: FsOp) {
        let mut trigger = self.trigger.lock().unwrap();
        let fire = match trigger.as_mut() {
            Some((armed, remaining)) if *armed == op => {
                *remaining -= 1;
                *remaining == 0
            }
            _ => false,
        };
        if fire {
            *trigger = None;
            self.progress.cancel();
        }
    }
}

impl FileSystem for CancellingFs {
    fn stat(&self, location: &Path) -> Option<FileStat> {
        self.inner.stat(location)
    }

    fn read(&self, location: &Path) -> Result<Vec<u8>, FsError> {
        let result = self.inner.read(location);
        self.saw(FsOp::Read);
        result
    }

    fn write(&self, location: &Path, contents: &[u8]) -> Result<(), FsError> {
        let result = self.inner.write(location, contents);
        self.saw(FsOp::Write);
        result
    }

    fn mkdir(&self, location: &Path) -> Result<(), FsError> {
        let result = self.inner.mkdir(location);
        self.saw(FsOp::Mkdir);
        result
    }

    fn list(&self, location: &Path) -> Result<Vec<String>, FsError> {
        let result = self.inner.list(location);
        self.saw(FsOp::List);
        result
    }

    fn delete(&self, location: &Path) -> Result<(), FsError> {
        let result = self.inner.delete(location);
        self.saw(FsOp::Delete);
        result
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let result = self.inner.copy_file(from, to);
        self.saw(FsOp::Copy);
        result
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let result = self.inner.rename(from, to);
        self.saw(FsOp::Rename);
        result
    }

    fn is_case_sensitive(&self) -> bool {
        self.inner.is_case_sensitive()
    }
}

/// A workspace over a `CancellingFs` that cancels `cancelled`, with the
/// given projects created through a separate progress.
fn cancelling_workspace(cancelled: &Progress, projects: &[&str]) -> (Workspace, Arc<CancellingFs>) {
    let fs = Arc::new(CancellingFs::new(cancelled));
    let ws = WorkspaceBuilder::new("/ws").fs(fs.clone()).build().unwrap();
    let setup = Progress::new();
    for name in projects {
        ws.create_project(name, None, &setup).unwrap();
    }
    (ws, fs)
}

#[test]
fn copy_cancelled_mid_way_keeps_what_reached_the_disk() {
    let cancelled = Progress::new();
    let (ws, fs) = cancelling_workspace(&cancelled, &["p"]);
    let setup = Progress::new();
    ws.create_folder(&folder("/p/a"), &setup).unwrap();
    for name in ["f", "g", "h"] {
        ws.create_file(&file(&format!("/p/a/{name}")), name.as_bytes(), &setup)
            .unwrap();
    }

    fs.cancel_after(FsOp::Copy, 1);
    let err = ws
        .copy(&folder("/p/a"), &folder("/p/b"), UpdateFlags::NONE, &cancelled)
        .unwrap_err();
    assert!(err.is_cancelled());

    assert!(ws.exists(&folder("/p/b")));
    assert!(fs.exists(Path::new("/ws/p/b")));
    assert!(ws.exists(&file("/p/b/f")));
    assert_eq!(fs.read(Path::new("/ws/p/b/f")).unwrap(), b"f");
    for name in ["g", "h"] {
        assert!(!ws.exists(&file(&format!("/p/b/{name}"))), "{name}");
        assert!(!fs.exists(Path::new(&format!("/ws/p/b/{name}"))), "{name}");
    }
    ws.touch(&file("/p/b/f"), &setup).unwrap();
}

#[test]
fn delete_cancelled_between_targets_keeps_the_rest() {
    let cancelled = Progress::new();
    let (ws, fs) = cancelling_workspace(&cancelled, &["p"]);
    let setup = Progress::new();
    for name in ["a", "b", "c"] {
        ws.create_file(&file(&format!("/p/{name}")), b"x", &setup).unwrap();
    }

    fs.cancel_after(FsOp::Delete, 1);
    let err = ws
        .delete(&[file("/p/a"), file("/p/b"), file("/p/c")], UpdateFlags::NONE, &cancelled)
        .unwrap_err();
    assert!(err.is_cancelled());

    assert!(!ws.exists(&file("/p/a")));
    assert!(!fs.exists(Path::new("/ws/p/a")));
    for name in ["b", "c"] {
        assert!(ws.exists(&file(&format!("/p/{name}"))), "{name}");
        assert!(fs.exists(Path::new(&format!("/ws/p/{name}"))), "{name}");
    }
}

#[test]
fn refresh_cancelled_mid_scan_changes_nothing() {
    let cancelled = Progress::new();
    let (ws, fs) = cancelling_workspace(&cancelled, &["p", "q"]);
    fs.inner.write(Path::new("/ws/p/new"), b"p").unwrap();
    fs.inner.write(Path::new("/ws/q/new"), b"q").unwrap();
    let before = ws.snapshot();

    fs.cancel_after(FsOp::List, 1);
    let err = ws
        .refresh_local(&Resource::Root, Depth::Infinite, &cancelled)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(ws.is_current(&before));
    assert!(!ws.exists(&file("/p/new")));
    assert!(!ws.exists(&file("/q/new")));

    ws.refresh_local(&Resource::Root, Depth::Infinite, &Progress::new())
        .unwrap();
    assert!(ws.exists(&file("/p/new")));
    assert!(ws.exists(&file("/q/new")));
}
