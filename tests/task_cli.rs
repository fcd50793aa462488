mod support;

use predicates::str::contains;
use serde_json::Value;

use support::{pair, TestProject};

fn finish(project: &TestProject, id: &str) {
    for step in ["claim", "start", "complete"] {
        project.cmd().args(["task", step, id]).assert().success();
    }
}

fn status(project: &TestProject, id: &str) -> Value {
    project.read_record(id)["status"].clone()
}

#[test]
fn task_new_generates_prefixed_ids() {
    let project = TestProject::init();

    let value = project.json(&["task", "new", "Write docs", "--tag", "docs"]);
    assert_eq!(value["command"], "task new");
    let id = value["data"]["id"].as_str().expect("id");
    assert!(id.starts_with("tl-"), "unexpected id {id}");
    assert_eq!(value["data"]["status"], "pending");

    let record = project.read_record(id);
    assert_eq!(record["fields"]["title"], "Write docs");
    assert_eq!(record["fields"]["tags"][0], "docs");
    assert_eq!(record["relationships"], Value::Array(Vec::new()));
}

#[test]
fn task_new_rejects_duplicate_and_invalid_ids() {
    let project = TestProject::init();
    project.new_task("a");

    let (code, value) = project.json_err(&["task", "new", "again", "--id", "a"]);
    assert_eq!(code, 2);
    assert_eq!(value["error"]["kind"], "task_exists");

    let (code, value) = project.json_err(&["task", "new", "bad", "--id", "../a"]);
    assert_eq!(code, 2);
    assert_eq!(value["error"]["kind"], "invalid_task_id");
}

#[test]
fn task_ls_filters_by_status() {
    let project = TestProject::init();
    project.new_task("a");
    project.new_task("b");
    project.cmd().args(["task", "claim", "a"]).assert().success();

    let value = project.json(&["task", "ls"]);
    assert_eq!(value["data"]["total"], 2);

    let value = project.json(&["task", "ls", "--status", "claimed"]);
    assert_eq!(value["data"]["total"], 1);
    assert_eq!(value["data"]["tasks"][0]["id"], "a");
}

#[test]
fn task_show_lists_relationships() {
    let project = TestProject::init();
    project.new_task("a");
    project.new_task("b");
    project.link("depends_on", "a", "b");

    project
        .cmd()
        .args(["task", "show", "a"])
        .assert()
        .success()
        .stdout(contains("Task a"))
        .stdout(contains("depends_on b"));
}

#[test]
fn claim_waits_for_dependencies() {
    let project = TestProject::init();
    project.new_task("a");
    project.new_task("b");
    project.link("depends_on", "a", "b");

    let value = project.json(&["task", "ready", "a"]);
    assert_eq!(value["data"]["ready_to_claim"], false);
    assert_eq!(value["data"]["pending_dependencies"][0], "b");

    let (code, value) = project.json_err(&["task", "claim", "a"]);
    assert_eq!(code, 3);
    assert_eq!(value["error"]["kind"], "not_ready");
    assert_eq!(value["error"]["details"]["pending"][0], "b");

    finish(&project, "b");

    let value = project.json(&["task", "claim", "a"]);
    assert_eq!(value["data"]["from"], "pending");
    assert_eq!(value["data"]["to"], "claimed");
}

#[test]
fn complete_requires_children_by_default() {
    let project = TestProject::init();
    project.new_task("parent");
    project.new_task("kid");
    project.link("child", "parent", "kid");

    project.cmd().args(["task", "claim", "parent"]).assert().success();
    project.cmd().args(["task", "start", "parent"]).assert().success();

    let value = project.json(&["task", "ready", "parent"]);
    assert_eq!(value["data"]["completion"]["status"], "blocked");
    assert_eq!(
        value["data"]["completion"]["blocker"]["reason"],
        "incomplete_children"
    );

    let (code, value) = project.json_err(&["task", "complete", "parent"]);
    assert_eq!(code, 3);
    assert_eq!(value["error"]["kind"], "cannot_complete");

    finish(&project, "kid");
    project
        .cmd()
        .args(["task", "complete", "parent"])
        .assert()
        .success();
    assert_eq!(status(&project, "parent"), "complete");
}

#[test]
fn allow_partial_policy_lets_parents_complete_early() {
    let project = TestProject::init();
    project.write_config("[policy]\nrequire_children_complete = false\n");
    project.new_task("parent");
    project.new_task("kid");
    project.link("child", "parent", "kid");

    finish(&project, "parent");
    assert_eq!(status(&project, "parent"), "complete");
}

#[test]
fn reopen_blocks_dependents_until_complete_again() {
    let project = TestProject::init();
    project.new_task("a");
    project.new_task("b");
    project.link("depends_on", "a", "b");
    finish(&project, "b");
    project.cmd().args(["task", "claim", "a"]).assert().success();
    project.cmd().args(["task", "start", "a"]).assert().success();

    let value = project.json(&["task", "reopen", "b"]);
    assert_eq!(value["data"]["cascaded"][0]["task"], "a");
    assert_eq!(value["data"]["cascaded"][0]["to"], "blocked");
    assert_eq!(status(&project, "a"), "blocked");
    assert_eq!(project.read_record("a")["resume_status"], "in_progress");

    let value = project.json(&["task", "complete", "b"]);
    assert_eq!(value["data"]["cascaded"][0]["to"], "in_progress");
    assert_eq!(status(&project, "a"), "in_progress");
    assert!(project.read_record("a").get("resume_status").is_none());
}

#[test]
fn dropping_the_last_open_dependency_unblocks_the_dependent() {
    let project = TestProject::init();
    for id in ["a", "b", "c", "d"] {
        project.new_task(id);
    }
    project.link("depends_on", "a", "b");
    project.link("depends_on", "c", "d");
    finish(&project, "b");
    finish(&project, "d");
    for id in ["a", "c"] {
        project.cmd().args(["task", "claim", id]).assert().success();
    }
    project.cmd().args(["task", "reopen", "b"]).assert().success();
    project.cmd().args(["task", "reopen", "d"]).assert().success();
    assert_eq!(status(&project, "a"), "blocked");
    assert_eq!(status(&project, "c"), "blocked");

    project.json(&["link", "rm", "depends_on", "a", "b"]);
    assert_eq!(status(&project, "a"), "claimed");
    assert!(project.read_record("a").get("resume_status").is_none());

    project.json(&["task", "rm", "d"]);
    assert_eq!(status(&project, "c"), "claimed");
    project.cmd().args(["task", "start", "c"]).assert().success();
}

#[test]
fn out_of_order_transition_is_refused() {
    let project = TestProject::init();
    project.new_task("a");

    let (code, value) = project.json_err(&["task", "complete", "a"]);
    assert_eq!(code, 3);
    assert_eq!(value["error"]["kind"], "invalid_transition");
    assert_eq!(value["error"]["details"]["from"], "pending");
}

#[test]
fn task_rm_unlinks_every_neighbor() {
    let project = TestProject::init();
    for id in ["a", "b", "c"] {
        project.new_task(id);
    }
    project.link("parent", "a", "b");
    project.link("depends_on", "c", "a");

    let value = project.json(&["task", "rm", "a"]);
    assert_eq!(value["data"]["unlinked"].as_array().map(Vec::len), Some(2));

    assert!(!project.record_path("a").exists());
    assert!(project.relationships("b").is_empty());
    assert!(project.relationships("c").is_empty());

    let (code, _) = project.json_err(&["task", "show", "a"]);
    assert_eq!(code, 2);
}

#[test]
fn relationships_survive_unrelated_updates() {
    let project = TestProject::init();
    project.new_task("a");
    project.new_task("b");
    project.link("related", "a", "b");

    project.cmd().args(["task", "claim", "a"]).assert().success();

    assert_eq!(project.relationships("a"), vec![pair("related", "b")]);
}

#[test]
fn commands_require_an_initialized_store() {
    let project = TestProject::empty();

    let (code, value) = project.json_err(&["task", "ls"]);
    assert_eq!(code, 2);
    assert_eq!(value["error"]["kind"], "store_not_found");
    assert_eq!(value["next_steps"][0], "tasklink init");
}

#[test]
fn init_is_idempotent() {
    let project = TestProject::init();
    assert!(project.path().join(".tasklink.toml").is_file());

    let value = project.json(&["init"]);
    assert_eq!(value["data"]["created"]["config"], false);
    assert_eq!(value["data"]["created"]["store"], false);
}
