mod support;

use serde_json::json;

use support::{pair, TestProject};

fn write_legacy_family(project: &TestProject) {
    project.write_record(
        "epic",
        &json!({ "id": "epic", "title": "Epic", "child_ids": ["story"] }),
    );
    project.write_record(
        "story",
        &json!({ "id": "story", "title": "Story", "parent_id": "epic", "depends_on": ["infra"] }),
    );
    project.write_record(
        "infra",
        &json!({ "id": "infra", "title": "Infra", "blocks_tasks": ["story"] }),
    );
}

#[test]
fn dry_run_reports_without_writing() {
    let project = TestProject::init();
    write_legacy_family(&project);

    let value = project.json(&["migrate", "--dry-run"]);
    assert_eq!(value["data"]["dry_run"], true);
    assert_eq!(value["data"]["migrated"].as_array().map(Vec::len), Some(3));
    assert_eq!(value["data"]["relationships"], 4);

    assert_eq!(project.read_record("story")["parent_id"], "epic");
}

#[test]
fn migrate_rewrites_legacy_fields() {
    let project = TestProject::init();
    write_legacy_family(&project);

    project.cmd().arg("migrate").assert().success();

    let story = project.read_record("story");
    assert!(story.get("parent_id").is_none());
    assert!(story.get("depends_on").is_none());
    assert_eq!(story["fields"]["title"], "Story");
    assert_eq!(
        project.relationships("story"),
        vec![pair("parent", "epic"), pair("depends_on", "infra")]
    );
    assert_eq!(project.relationships("epic"), vec![pair("child", "story")]);
    assert_eq!(project.relationships("infra"), vec![pair("blocks", "story")]);

    project.json(&["check"]);

    let value = project.json(&["migrate"]);
    assert_eq!(value["data"]["rewritten"].as_array().map(Vec::len), Some(0));
}

#[test]
fn one_sided_claim_needs_inference() {
    let project = TestProject::init();
    project.write_record("a", &json!({ "id": "a", "depends_on": ["b"] }));
    project.write_record("b", &json!({ "id": "b" }));

    let (code, value) = project.json_err(&["migrate"]);
    assert_eq!(code, 4);
    assert_eq!(value["error"]["kind"], "migration_conflict");
    assert_eq!(
        value["error"]["details"]["conflicts"][0]["kind"],
        "not_reciprocated"
    );
    assert_eq!(project.read_record("a")["depends_on"][0], "b");

    project
        .cmd()
        .args(["migrate", "--infer-inverse"])
        .assert()
        .success();
    assert_eq!(project.relationships("b"), vec![pair("blocks", "a")]);
}

#[test]
fn conflicting_parents_abort_the_whole_run() {
    let project = TestProject::init();
    project.write_record("c", &json!({ "id": "c", "parent_id": "p1" }));
    project.write_record("p1", &json!({ "id": "p1", "child_ids": ["c"] }));
    project.write_record("p2", &json!({ "id": "p2", "child_ids": ["c"] }));

    let (code, value) = project.json_err(&["migrate", "--infer-inverse"]);
    assert_eq!(code, 4);
    assert_eq!(value["error"]["kind"], "migration_conflict");
    assert_eq!(project.read_record("p1")["child_ids"][0], "c");
}
