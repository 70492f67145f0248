//! End-to-end tests for the admin surface, run against a scratch
//! database via `--db`.

use assert_cmd::Command;
use predicates::prelude::*;

fn playtime(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("playtime").unwrap();
    cmd.arg("--db").arg(db);
    cmd
}

fn scratch_db() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("playtime.db");
    (dir, path)
}

#[test]
fn user_add_list_status_roundtrip() {
    let (_dir, db) = scratch_db();

    playtime(&db)
        .args(["user", "add", "anders", "--uid", "1000", "--gaming-limit", "90"])
        .assert()
        .success()
        .stdout(predicate::str::contains("monitoring anders"));

    playtime(&db)
        .args(["user", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gaming 90 min/day"));

    playtime(&db)
        .args(["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("anders"))
        .stdout(predicate::str::contains("available"));
}

#[test]
fn status_for_unknown_user_exits_2() {
    let (_dir, db) = scratch_db();
    playtime(&db)
        .args(["status", "nobody"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn schedule_set_view_and_export_import_roundtrip() {
    let (_dir, db) = scratch_db();
    playtime(&db)
        .args(["user", "add", "anders", "--uid", "1000"])
        .assert()
        .success();

    let grid: String = "10".repeat(84);
    playtime(&db)
        .args(["schedule", "set", "anders", &grid])
        .assert()
        .success();

    playtime(&db)
        .args(["schedule", "view", "anders"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&grid));

    // Export, wipe, import: the grid survives the round trip.
    let export = playtime(&db)
        .args(["schedule", "export"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let parsed: serde_json::Value = serde_json::from_slice(&export).unwrap();
    assert_eq!(parsed["anders"]["schedule"].as_str().unwrap(), grid);

    playtime(&db)
        .args(["schedule", "set", "anders", &"1".repeat(168)])
        .assert()
        .success();

    let file = db.parent().unwrap().join("export.json");
    std::fs::write(&file, &export).unwrap();
    playtime(&db)
        .args(["schedule", "import", file.to_str().unwrap()])
        .assert()
        .success();
    playtime(&db)
        .args(["schedule", "view", "anders"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&grid));
}

#[test]
fn schedule_import_validates_before_writing() {
    let (_dir, db) = scratch_db();
    playtime(&db)
        .args(["user", "add", "anders", "--uid", "1000"])
        .assert()
        .success();

    // 167 characters: usage error, nothing written.
    let short = format!(
        r#"{{"anders": {{"schedule": "{}", "gaming_limit": 120, "daily_total": 180}}}}"#,
        "1".repeat(167)
    );
    let file = db.parent().unwrap().join("short.json");
    std::fs::write(&file, short).unwrap();
    playtime(&db)
        .args(["schedule", "import", file.to_str().unwrap()])
        .assert()
        .failure()
        .code(1);

    // Unknown user: not found.
    let unknown = format!(
        r#"{{"nobody": {{"schedule": "{}", "gaming_limit": 120, "daily_total": 180}}}}"#,
        "1".repeat(168)
    );
    let file = db.parent().unwrap().join("unknown.json");
    std::fs::write(&file, unknown).unwrap();
    playtime(&db)
        .args(["schedule", "import", file.to_str().unwrap()])
        .assert()
        .failure()
        .code(2);

    // The original all-allowed grid is untouched.
    playtime(&db)
        .args(["schedule", "view", "anders"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&"1".repeat(168)));
}

#[test]
fn schedule_edit_carves_a_window() {
    let (_dir, db) = scratch_db();
    playtime(&db)
        .args(["user", "add", "anders", "--uid", "1000"])
        .assert()
        .success();

    playtime(&db)
        .args(["schedule", "set", "anders", &"0".repeat(168)])
        .assert()
        .success();
    playtime(&db)
        .args([
            "schedule", "edit", "anders", "--day", "sat", "--from", "9", "--to", "22",
        ])
        .assert()
        .success();

    let mut expected = "0".repeat(168);
    expected.replace_range(5 * 24 + 9..5 * 24 + 22, &"1".repeat(13));
    playtime(&db)
        .args(["schedule", "view", "anders"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&expected));
}

#[test]
fn patterns_lifecycle() {
    let (_dir, db) = scratch_db();

    // Seeded defaults show up.
    playtime(&db)
        .args(["patterns", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Proton Game"));

    playtime(&db)
        .args([
            "patterns",
            "add",
            "factorio",
            "Factorio",
            "gaming",
            "--cpu-threshold",
            "10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Factorio"));

    // Broken regex is rejected as a usage error.
    playtime(&db)
        .args(["patterns", "add", "steam(", "Broken", "gaming"])
        .assert()
        .failure()
        .code(1);

    playtime(&db)
        .args(["patterns", "modify", "999", "--category", "ignored"])
        .assert()
        .failure()
        .code(2);

    let output = playtime(&db)
        .args(["patterns", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let listing = String::from_utf8(output).unwrap();
    let factorio_id = listing
        .lines()
        .find(|l| l.contains("Factorio"))
        .and_then(|l| l.split_whitespace().next().map(String::from))
        .unwrap();

    playtime(&db)
        .args(["patterns", "show", &factorio_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("cpu threshold: 10"));

    playtime(&db)
        .args(["patterns", "modify", &factorio_id, "--state", "ignored"])
        .assert()
        .success();
    playtime(&db)
        .args(["patterns", "show", &factorio_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("state:         ignored"));
}

#[test]
fn message_templates_render() {
    let (_dir, db) = scratch_db();

    playtime(&db)
        .args(["message", "test", "time_warning_15"])
        .assert()
        .success()
        .stdout(predicate::str::contains("15"));

    playtime(&db)
        .args([
            "message",
            "add",
            "enforcement",
            "2",
            "Done for today",
            "{process} is closed. See you tomorrow, {user}.",
            "--urgency",
            "critical",
        ])
        .assert()
        .success();

    playtime(&db)
        .args(["message", "test", "enforcement"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Minecraft is closed"));

    playtime(&db)
        .args(["message", "test", "not_an_intention"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn audit_and_maintenance_on_fresh_database() {
    let (_dir, db) = scratch_db();
    playtime(&db)
        .args(["audit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No enforcement actions"));
    playtime(&db)
        .args(["maintenance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));
}

#[test]
fn discover_list_is_empty_on_fresh_database() {
    let (_dir, db) = scratch_db();
    playtime(&db)
        .args(["discover", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing awaiting review"));
}

#[test]
fn usage_errors_exit_1() {
    let (_dir, db) = scratch_db();
    playtime(&db).args(["no-such-verb"]).assert().code(1);
}
