mod support;

use predicates::str::contains;
use serde_json::Value;

use support::TestStore;

#[test]
fn dependency_cycles_are_rejected_with_details() {
    let store = TestStore::init();
    let a = store.new_task("A", &[]);
    let b = store.new_task("B", &[]);
    let c = store.new_task("C", &[]);

    store.json(&["dep", "add", &a, &b]);
    store.json(&["dep", "add", &b, &c]);

    let output = store
        .cmd()
        .args(["--json", "dep", "add", &c, &a])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let envelope: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["error"]["kind"], "rejected");
    assert_eq!(envelope["error"]["details"]["task"], c.as_str());
    assert_eq!(envelope["error"]["details"]["depends_on"], a.as_str());

    // rejected edge was not persisted
    let view = store.json(&["task", "show", &c]);
    assert!(view["relations"].get("depends_on").is_none());
}

#[test]
fn self_and_duplicate_edges_are_rejected() {
    let store = TestStore::init();
    let a = store.new_task("A", &[]);
    let b = store.new_task("B", &[]);

    store
        .cmd()
        .args(["dep", "add", &a, &a])
        .assert()
        .code(3)
        .stderr(contains("cannot reference itself"));

    store.json(&["dep", "add", &a, &b]);
    store
        .cmd()
        .args(["dep", "add", &a, &b])
        .assert()
        .code(3)
        .stderr(contains("already depends on"));
}

#[test]
fn unknown_dependency_target_is_not_found() {
    let store = TestStore::init();
    let a = store.new_task("A", &[]);

    store
        .cmd()
        .args(["dep", "add", &a, "tw-nope"])
        .assert()
        .code(2)
        .stderr(contains("Task not found"));
}

#[test]
fn removing_edges() {
    let store = TestStore::init();
    let a = store.new_task("A", &[]);
    let b = store.new_task("B", &[]);

    store.json(&["dep", "add", &a, &b]);
    let removed = store.json(&["dep", "rm", &a, &b]);
    assert_eq!(removed["task_id"], a.as_str());
    assert_eq!(removed["depends_on_id"], b.as_str());

    store
        .cmd()
        .args(["dep", "rm", &a, &b])
        .assert()
        .code(3)
        .stderr(contains("does not depend on"));

    // the reverse edge is now allowed
    store.json(&["dep", "add", &b, &a]);
}

#[test]
fn readiness_follows_dependency_status() {
    let store = TestStore::init();
    let deploy = store.new_task("Deploy", &[]);
    let build = store.new_task("Build", &[]);
    store.json(&["dep", "add", &deploy, &build]);

    let check = store.json(&["dep", "check", &deploy]);
    assert_eq!(check["ready"], false);
    assert_eq!(check["blocking"], serde_json::json!([build.clone()]));

    let ready = store.json(&["task", "ready"]);
    let ids: Vec<&str> = ready["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|task| task["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![build.as_str()]);

    // completing a blocked task is allowed but reported
    let early = store.json(&["task", "done", &deploy]);
    assert_eq!(early["blocking"], serde_json::json!([build.clone()]));
    store.json(&["task", "reopen", &deploy]);

    store.json(&["task", "done", &build]);
    let check = store.json(&["dep", "check", &deploy]);
    assert_eq!(check["ready"], true);
}

#[test]
fn events_are_written_as_jsonl() {
    let store = TestStore::init();
    let a = store.new_task("A", &[]);
    let b = store.new_task("B", &[]);
    let events = store.path().join("events.jsonl");

    store
        .cmd()
        .arg("--events")
        .arg(&events)
        .args(["dep", "add", &a, &b])
        .assert()
        .success();

    let content = std::fs::read_to_string(&events).unwrap();
    let event: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(event["schema_version"], "tw.event.v1");
    assert_eq!(event["event"], "dependency_added");
    assert_eq!(event["data"]["task_id"], a.as_str());
}

#[test]
fn events_on_stdout_replace_human_output() {
    let store = TestStore::init();

    let output = store
        .cmd()
        .args(["--events", "-", "task", "new", "Evented"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    let event: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(event["event"], "task_created");
    assert_eq!(event["data"]["title"], "Evented");
}

#[test]
fn hand_edited_cycle_is_reported() {
    let store = TestStore::init();
    let a = store.new_task("A", &[]);
    let b = store.new_task("B", &[]);
    store.json(&["dep", "add", &a, &b]);

    let path = store.tasks_file();
    let mut snapshot: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let edges = snapshot["dependencies"].as_array_mut().unwrap();
    let mut reverse = edges[0].clone();
    reverse["task_id"] = Value::String(b.clone());
    reverse["depends_on_id"] = Value::String(a.clone());
    edges.push(reverse);
    std::fs::write(&path, serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();

    store
        .cmd()
        .arg("validate")
        .assert()
        .code(3)
        .stderr(contains("circular dependency"));
}
