//! Concurrency tests for rule-scoped operations.
//!
//! Threads drive real operations against one in-memory workspace with
//! seeded random choices, and check that:
//!
//! 1. Operations on disjoint projects all land, with nothing lost
//! 2. Two threads never hold conflicting rules at the same time
//! 3. A nested rule that widens scope is refused
//! 4. A caller blocked on a rule gives up when cancelled

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use canopy::core::flags::UpdateFlags;
use canopy::core::ops::LockError;
use canopy::core::path::ResourcePath;
use canopy::core::progress::Progress;
use canopy::core::resource::Resource;
use canopy::core::rule::SchedulingRule;
use canopy::engine::{Workspace, WorkspaceError};

// =============================================================================
// Test Fixtures
// =============================================================================

fn workspace_with_projects(names: &[&str]) -> Workspace {
    let ws = Workspace::in_memory().unwrap();
    let progress = Progress::new();
    for name in names {
        ws.create_project(name, None, &progress).unwrap();
    }
    ws
}

fn file(path: &str) -> Resource {
    Resource::file(path).unwrap()
}

fn folder(path: &str) -> Resource {
    Resource::folder(path).unwrap()
}

fn rule(path: &str) -> SchedulingRule {
    SchedulingRule::resource(ResourcePath::parse(path).unwrap())
}

fn file_names(ws: &Workspace, container: &Resource) -> BTreeSet<String> {
    ws.members(container)
        .into_iter()
        .filter(|r| !r.is_container())
        .map(|r| r.name().to_string())
        .collect()
}

// =============================================================================
// Disjoint work
// =============================================================================

#[test]
fn disjoint_projects_lose_no_work() {
    let projects = ["p0", "p1", "p2", "p3"];
    let ws = workspace_with_projects(&projects);

    let handles: Vec<_> = projects
        .iter()
        .enumerate()
        .map(|(index, project)| {
            let ws = ws.clone();
            let project = project.to_string();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(index as u64 + 11);
                let progress = Progress::new();
                let mut expected: BTreeSet<String> = BTreeSet::new();
                for step in 0..40 {
                    let name = format!("f{}", rng.random_range(0..8));
                    let target = file(&format!("/{project}/{name}"));
                    if expected.contains(&name) {
                        match rng.random_range(0..3) {
                            0 => ws.touch(&target, &progress).unwrap(),
                            1 => ws
                                .set_contents(&target, format!("{step}").as_bytes(), UpdateFlags::NONE, &progress)
                                .unwrap(),
                            _ => {
                                ws.delete(&[target], UpdateFlags::NONE, &progress).unwrap();
                                expected.remove(&name);
                            }
                        }
                    } else {
                        ws.create_file(&target, b"new", &progress).unwrap();
                        expected.insert(name);
                    }
                }
                (project, expected)
            })
        })
        .collect();

    for handle in handles {
        let (project, expected) = handle.join().unwrap();
        let container = Resource::project_named(&project).unwrap();
        assert_eq!(file_names(&ws, &container), expected, "project {project}");
    }
}

// =============================================================================
// Overlapping rules
// =============================================================================

/// Rules and the folder each one lets a thread write into.
const SCOPES: [(&str, &str); 5] = [
    ("/", "/p/a"),
    ("/p", "/p"),
    ("/p/a", "/p/a"),
    ("/p/b", "/p/b"),
    ("/q", "/q"),
];

#[test]
fn conflicting_rules_are_never_held_together() {
    let ws = workspace_with_projects(&["p", "q"]);
    let progress = Progress::new();
    ws.create_folder(&folder("/p/a"), &progress).unwrap();
    ws.create_folder(&folder("/p/b"), &progress).unwrap();

    let active: Arc<Mutex<Vec<(usize, SchedulingRule)>>> = Arc::new(Mutex::new(Vec::new()));
    let threads = 4;
    let rounds = 25;

    let handles: Vec<_> = (0..threads)
        .map(|id| {
            let ws = ws.clone();
            let active = Arc::clone(&active);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(id as u64 * 31 + 5);
                let progress = Progress::new();
                for round in 0..rounds {
                    let (scope, dir) = SCOPES[rng.random_range(0..SCOPES.len())];
                    let held = rule(scope);
                    ws.run(&held, &progress, |ws| {
                        {
                            let mut active = active.lock().unwrap();
                            for (other, rule) in active.iter() {
                                assert!(
                                    !rule.is_conflicting(&held),
                                    "thread {id} took {held} while thread {other} held {rule}"
                                );
                            }
                            active.push((id, held.clone()));
                        }
                        // The nested create drops the workspace lock around
                        // its disk write, letting other threads in.
                        let result = ws.create_file(&file(&format!("{dir}/t{id}-{round}")), b"x", &progress);
                        active.lock().unwrap().retain(|(other, _)| *other != id);
                        result
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total: usize = ["/p", "/p/a", "/p/b", "/q"]
        .iter()
        .map(|dir| file_names(&ws, &Resource::container_at(ResourcePath::parse(dir).unwrap())).len())
        .sum();
    assert_eq!(total, threads * rounds);
}

// =============================================================================
// Nesting and cancellation
// =============================================================================

#[test]
fn nested_rule_must_narrow_scope() {
    let ws = workspace_with_projects(&["p", "q"]);
    let progress = Progress::new();
    let outside = Resource::project_named("q").unwrap();

    let err = ws
        .run(&rule("/p"), &progress, |ws| ws.touch(&outside, &progress))
        .unwrap_err();
    assert!(matches!(
        err,
        WorkspaceError::Lock(LockError::IllegalNesting { .. })
    ));

    assert!(ws.locks().held_rules().is_empty());
    ws.touch(&outside, &progress).unwrap();
}

#[test]
fn nested_operations_commit_once() {
    let ws = workspace_with_projects(&["p"]);
    let progress = Progress::new();

    let before = ws.snapshot();
    ws.run(&rule("/p"), &progress, |ws| {
        ws.create_file(&file("/p/a"), b"1", &progress)?;
        ws.create_file(&file("/p/b"), b"2", &progress)?;
        // Nothing is visible to other threads until the batch ends.
        assert!(ws.is_current(&before));
        Ok(())
    })
    .unwrap();

    assert!(!ws.is_current(&before));
    assert!(ws.exists(&file("/p/a")));
    assert!(ws.exists(&file("/p/b")));
}

#[test]
fn blocked_caller_gives_up_when_cancelled() {
    let ws = workspace_with_projects(&["p"]);
    let progress = Progress::new();
    ws.create_file(&file("/p/a"), b"x", &progress).unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = {
        let ws = ws.clone();
        thread::spawn(move || {
            ws.run(&rule("/p"), &Progress::new(), |_| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
            .unwrap();
        })
    };
    entered_rx.recv().unwrap();

    let waiter_progress = Progress::new();
    let waiter = {
        let ws = ws.clone();
        let progress = waiter_progress.clone();
        thread::spawn(move || ws.touch(&file("/p/a"), &progress))
    };
    thread::sleep(Duration::from_millis(50));
    waiter_progress.cancel();

    let outcome = waiter.join().unwrap();
    assert!(matches!(outcome, Err(WorkspaceError::Cancelled)));

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    ws.touch(&file("/p/a"), &Progress::new()).unwrap();
}
