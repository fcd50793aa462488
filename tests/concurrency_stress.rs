mod support;

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Arc, Barrier};
use std::thread;

use assert_cmd::cargo::cargo_bin;
use tasklink::model::RelationType;
use tasklink::service::{NewTask, RelationshipService, ServiceOptions};
use tasklink::store::{FileTaskStore, TaskStore};

use support::TestProject;

const TASKS: usize = 5;
const WORKERS: usize = 6;

fn tasklink_bin() -> PathBuf {
    cargo_bin("tasklink")
}

fn spawn_tasklink(root: &Path, args: &[String]) -> std::io::Result<Child> {
    Command::new(tasklink_bin())
        .env_remove("RUST_LOG")
        .arg("--root")
        .arg(root)
        .arg("--quiet")
        .args(args)
        .spawn()
}

fn task_id(n: usize) -> String {
    format!("t{n}")
}

fn seed(project: &TestProject) {
    for n in 0..TASKS {
        project.new_task(&task_id(n));
    }
}

/// Every ordered pair, alternating direction per worker so cycles are attempted.
fn worker_links(worker: usize) -> Vec<Vec<String>> {
    let mut links = Vec::new();
    for i in 0..TASKS {
        for j in (i + 1)..TASKS {
            let (a, b) = if (i + j + worker) % 2 == 0 { (i, j) } else { (j, i) };
            let relation = if worker % 3 == 0 { "parent" } else { "depends_on" };
            links.push(vec![
                "link".to_string(),
                "add".to_string(),
                relation.to_string(),
                task_id(a),
                task_id(b),
            ]);
        }
    }
    links
}

#[test]
fn concurrent_processes_leave_a_consistent_store() {
    let project = TestProject::init();
    seed(&project);

    let mut children = Vec::new();
    for worker in 0..WORKERS {
        let root = project.path().to_path_buf();
        children.push(thread::spawn(move || -> std::io::Result<()> {
            for args in worker_links(worker) {
                // Refusals (cycle, second parent, contention) are expected.
                let mut child = spawn_tasklink(&root, &args)?;
                child.wait()?;
            }
            Ok(())
        }));
    }
    for child in children {
        child.join().expect("worker panicked").expect("spawn tasklink");
    }

    project.cmd().arg("check").assert().success();
}

#[test]
fn concurrent_services_keep_invariants() {
    let project = TestProject::init();
    seed(&project);
    let store_dir = project.store_dir();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let barrier = Arc::clone(&barrier);
        let store_dir = store_dir.clone();
        handles.push(thread::spawn(move || {
            let store = FileTaskStore::open(store_dir);
            let mut service =
                RelationshipService::open(store, ServiceOptions::default()).expect("open");
            barrier.wait();
            for i in 0..TASKS {
                for j in 0..TASKS {
                    if i == j {
                        continue;
                    }
                    let relation = match (i + j + worker) % 3 {
                        0 => RelationType::DependsOn,
                        1 => RelationType::Parent,
                        _ => RelationType::Related,
                    };
                    let _ = service.add_relationship(relation, &task_id(i), &task_id(j));
                    if worker % 2 == 1 {
                        let _ = service.remove_relationship(relation, &task_id(j), &task_id(i));
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let store = FileTaskStore::open(store_dir);
    let violations =
        RelationshipService::<FileTaskStore>::validate_store(&store).expect("scan store");
    assert!(violations.is_empty(), "violations: {violations:?}");
    assert_eq!(store.list_ids().expect("ids").len(), TASKS);
}

#[test]
fn concurrent_creates_get_distinct_ids() {
    let project = TestProject::init();
    let store_dir = project.store_dir();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let barrier = Arc::clone(&barrier);
            let store_dir = store_dir.clone();
            thread::spawn(move || {
                let store = FileTaskStore::open(store_dir);
                let mut service =
                    RelationshipService::open(store, ServiceOptions::default()).expect("open");
                barrier.wait();
                service
                    .create_task(NewTask::titled(format!("worker {worker}")))
                    .expect("create")
                    .id
            })
        })
        .collect();

    let mut ids: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked"))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), WORKERS);
}
