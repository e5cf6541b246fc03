//! E2E tests for content commands: discover, queue, pending, research, changelog, config.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SHOP_PAGE: &str = "# Silver City Expansion\n\n\
## LOCATIONS\n\n\
### Silver City\n\
Silver City is a gleaming ruin where the lanterns never go out.\n\n\
## NEW MONSTERS\n\n\
### Gilded Lion\n\
A lion whose mane is hammered gold, stalking the edges of Silver City.\n";

fn lk_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("lk"));
    cmd.current_dir(dir);
    cmd.env("LOREKEEP_LOG", "error");
    cmd.env_remove("KV_REST_API_URL");
    cmd.env_remove("KV_REST_API_TOKEN");
    cmd.env_remove("ANTHROPIC_API_KEY");
    cmd.env_remove("LOREKEEP_REVIEWER");
    cmd.env_remove("FORMAT");
    cmd
}

fn json_ok(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().expect("lk should not crash");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["success"], true);
    json["data"].clone()
}

fn error_code(cmd: &mut Command) -> String {
    let output = cmd.arg("--json").output().expect("lk should not crash");
    assert!(!output.status.success(), "command unexpectedly succeeded");
    let json: Value = serde_json::from_slice(&output.stderr).expect("valid JSON error");
    json["error"]["code"].as_str().expect("code").to_string()
}

fn source(dir: &Path, rel: &str, content: &str) {
    let path = dir.join("docs/lore/sources").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn discover_queues_entities_from_sources() {
    let dir = TempDir::new().unwrap();
    source(dir.path(), "shop/silver-city.txt", SHOP_PAGE);

    let data = json_ok(lk_cmd(dir.path()).args(["discover", "--no-classifier"]));
    assert_eq!(data["sourcesScanned"], 1);
    let added: Vec<&str> = data["added"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(added.contains(&"Silver City"));
    assert!(added.contains(&"Gilded Lion"));

    // running again merges instead of duplicating
    let again = json_ok(lk_cmd(dir.path()).args(["discover", "--no-classifier"]));
    assert_eq!(again["added"].as_array().unwrap().len(), 0);

    let queue = json_ok(lk_cmd(dir.path()).args(["queue", "list", "--status", "queued"]));
    assert_eq!(queue.as_array().unwrap().len(), 2);
}

#[test]
fn discover_without_key_falls_back_to_heuristic() {
    let dir = TempDir::new().unwrap();
    source(dir.path(), "shop/silver-city.txt", SHOP_PAGE);
    let data = json_ok(lk_cmd(dir.path()).args(["discover"]));
    assert_eq!(data["added"].as_array().unwrap().len(), 2);
}

#[test]
fn rejected_entity_leaves_the_queue() {
    let dir = TempDir::new().unwrap();
    source(dir.path(), "shop/silver-city.txt", SHOP_PAGE);
    json_ok(lk_cmd(dir.path()).args(["discover", "--no-classifier"]));

    let queue = json_ok(lk_cmd(dir.path()).args(["queue"]));
    let lion = queue
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["name"] == "Gilded Lion")
        .expect("lion queued");
    let id = lion["id"].as_str().unwrap().to_string();

    let rejected = json_ok(lk_cmd(dir.path()).args(["queue", "reject", &id]));
    assert_eq!(rejected["status"], "rejected");
    let queued = json_ok(lk_cmd(dir.path()).args(["queue", "list", "--status", "queued"]));
    assert_eq!(queued.as_array().unwrap().len(), 1);

    assert_eq!(error_code(lk_cmd(dir.path()).args(["queue", "reject", "nobody"])), "E2001");
}

#[test]
fn generate_now_needs_a_credential() {
    let dir = TempDir::new().unwrap();
    source(dir.path(), "shop/silver-city.txt", SHOP_PAGE);
    json_ok(lk_cmd(dir.path()).args(["discover", "--no-classifier"]));
    assert_eq!(error_code(lk_cmd(dir.path()).args(["queue", "generate"])), "E1002");

    // the entity was never claimed
    let queued = json_ok(lk_cmd(dir.path()).args(["queue", "list", "--status", "queued"]));
    assert_eq!(queued.as_array().unwrap().len(), 2);
}

#[test]
fn queue_rejects_unknown_status_filter() {
    let dir = TempDir::new().unwrap();
    assert_eq!(
        error_code(lk_cmd(dir.path()).args(["queue", "list", "--status", "sleeping"])),
        "E2003"
    );
}

#[test]
fn pending_is_empty_on_fresh_project() {
    let dir = TempDir::new().unwrap();
    let data = json_ok(lk_cmd(dir.path()).args(["pending"]));
    assert_eq!(data.as_array().unwrap().len(), 0);
}

#[test]
fn approving_unknown_draft_is_not_found() {
    let dir = TempDir::new().unwrap();
    let code = error_code(lk_cmd(dir.path()).args([
        "pending",
        "approve",
        "pending-missing",
        "--reviewer",
        "alice",
    ]));
    assert_eq!(code, "E2001");
}

#[test]
fn disposition_without_reviewer_is_refused() {
    let dir = TempDir::new().unwrap();
    let code = error_code(lk_cmd(dir.path()).args(["pending", "reject", "pending-1"]));
    assert_eq!(code, "E2003");

    lk_cmd(dir.path())
        .args(["pending", "reject", "pending-1", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("LOREKEEP_REVIEWER"));
}

#[test]
fn research_task_lifecycle_without_generation() {
    let dir = TempDir::new().unwrap();
    let task = json_ok(lk_cmd(dir.path()).args([
        "research",
        "add",
        "Twilight Order",
        "--type",
        "explore_topic",
        "--priority",
        "8",
    ]));
    assert_eq!(task["status"], "queued");
    assert_eq!(task["type"], "explore_topic");
    let id = task["id"].as_str().unwrap().to_string();

    let listed = json_ok(lk_cmd(dir.path()).args(["research", "list", "--status", "queued"]));
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // nothing to approve until a session has produced a suggestion
    let code = error_code(lk_cmd(dir.path()).args(["research", "approve", &id, "--reviewer", "alice"]));
    assert_eq!(code, "E2002");

    assert_eq!(error_code(lk_cmd(dir.path()).args(["research", "run"])), "E1002");
}

#[test]
fn research_add_rejects_unknown_type() {
    let dir = TempDir::new().unwrap();
    let code = error_code(lk_cmd(dir.path()).args(["research", "add", "x", "--type", "divination"]));
    assert_eq!(code, "E2003");
}

#[test]
fn changelog_starts_empty() {
    let dir = TempDir::new().unwrap();
    let stats = json_ok(lk_cmd(dir.path()).args(["changelog", "stats"]));
    assert_eq!(stats["total"], 0);

    let list = json_ok(lk_cmd(dir.path()).args(["changelog", "list", "--since", "2024-06-01"]));
    assert_eq!(list.as_array().unwrap().len(), 0);

    lk_cmd(dir.path())
        .args(["changelog", "export", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# Lore Changelog"))
        .stdout(predicate::str::contains("No changes recorded."));

    assert_eq!(
        error_code(lk_cmd(dir.path()).args(["changelog", "list", "--since", "yesterday"])),
        "E2003"
    );
}

#[test]
fn config_set_persists_and_unset_restores_default() {
    let dir = TempDir::new().unwrap();
    let before = json_ok(lk_cmd(dir.path()).args(["config", "show", "schedule.maxEntriesPerRun"]));

    let set = json_ok(lk_cmd(dir.path()).args(["config", "set", "schedule.maxEntriesPerRun", "9"]));
    assert_eq!(set["value"], 9);
    let shown = json_ok(lk_cmd(dir.path()).args(["config", "show", "schedule.maxEntriesPerRun"]));
    assert_eq!(shown, 9);

    json_ok(lk_cmd(dir.path()).args(["config", "unset", "schedule.maxEntriesPerRun"]));
    let restored = json_ok(lk_cmd(dir.path()).args(["config", "show", "schedule.maxEntriesPerRun"]));
    assert_eq!(restored, before);
}

#[test]
fn config_set_rejects_unknown_key_and_bad_value() {
    let dir = TempDir::new().unwrap();
    assert_eq!(
        error_code(lk_cmd(dir.path()).args(["config", "set", "schedule.warpFactor", "9"])),
        "E2003"
    );
    assert_eq!(
        error_code(lk_cmd(dir.path()).args(["config", "set", "schedule.apiDelayMs", "soon"])),
        "E2003"
    );
}

#[test]
fn project_config_shows_default_layout() {
    let dir = TempDir::new().unwrap();
    let data = json_ok(lk_cmd(dir.path()).args(["config", "show", "--project"]));
    assert_eq!(data["paths"]["lore"], "docs/lore");
    assert_eq!(data["paths"]["data"], ".lorekeep/data");
}

#[test]
fn malformed_project_config_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(".lorekeep")).unwrap();
    fs::write(dir.path().join(".lorekeep/config.toml"), "paths = [").unwrap();
    assert_eq!(error_code(lk_cmd(dir.path()).args(["status"])), "E1001");
}
