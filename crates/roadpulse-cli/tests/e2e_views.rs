//! E2E tests for the store-backed views: map, dashboard, leaderboard, karma.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn rp_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rp"));
    cmd.current_dir(dir);
    cmd.env("ROADPULSE_LOG", "error");
    cmd.env("XDG_CONFIG_HOME", dir.join("xdg"));
    cmd.env("HOME", dir);
    cmd.env_remove("FORMAT");
    cmd
}

fn json_of(dir: &Path, args: &[&str]) -> Value {
    let output = rp_cmd(dir).args(args).output().expect("rp should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
}

fn init(dir: &Path) {
    rp_cmd(dir).arg("init").assert().success();
}

#[test]
fn init_creates_config_and_store() {
    let dir = TempDir::new().unwrap();
    let out = json_of(dir.path(), &["init", "--json"]);
    assert_eq!(out["reinitialized"], false);
    assert!(dir.path().join(".roadpulse/config.toml").is_file());
    assert!(dir.path().join(".roadpulse/store.db").is_file());

    rp_cmd(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    let again = json_of(dir.path(), &["init", "--force", "--json"]);
    assert_eq!(again["reinitialized"], true);
}

#[test]
fn commands_before_init_report_not_initialized() {
    let dir = TempDir::new().unwrap();
    let output = rp_cmd(dir.path())
        .args(["map", "--json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("JSON error");
    assert_eq!(err["error"]["error_code"], "E1001");
    assert!(err["error"]["suggestion"].is_string());
}

#[test]
fn map_shows_samples_only_when_signed_in() {
    let dir = TempDir::new().unwrap();
    init(dir.path());

    let written = json_of(
        dir.path(),
        &[
            "sample", "traffic", "--lat", "10.99", "--lng", "76.01", "--level", "85", "--id",
            "jam-1", "--json",
        ],
    );
    assert_eq!(written["id"], "jam-1");
    assert!(written["stat_id"].is_string());
    json_of(
        dir.path(),
        &[
            "sample", "traffic", "--lat", "10.98", "--lng", "76.02", "--level", "20", "--type",
            "Roadworks", "--json",
        ],
    );

    let signed_out = json_of(dir.path(), &["map", "--json"]);
    assert_eq!(signed_out["signed_in"], false);
    assert_eq!(signed_out["markers"].as_array().unwrap().len(), 0);

    let map = json_of(dir.path(), &["--actor", "u1", "map", "--json"]);
    assert_eq!(map["signed_in"], true);
    let markers = map["markers"].as_array().unwrap();
    assert_eq!(markers.len(), 2);
    let jam = markers
        .iter()
        .find(|m| m["id"] == "jam-1")
        .expect("jam-1 marker");
    assert_eq!(jam["label"], "85%");
    assert_eq!(jam["color"], "red");
    assert_eq!(jam["popup"]["title"], "Traffic Incident");
    assert!(markers.iter().any(|m| m["popup"]["title"] == "Roadworks"));
}

#[test]
fn old_samples_fall_outside_the_map_window() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    // 2001-09-09, far outside any window.
    json_of(
        dir.path(),
        &[
            "sample", "traffic", "--lat", "1", "--lng", "2", "--level", "50", "--at",
            "1000000000000000", "--json",
        ],
    );
    let map = json_of(dir.path(), &["--actor", "u1", "map", "--json"]);
    assert_eq!(map["markers"].as_array().unwrap().len(), 0);

    rp_cmd(dir.path())
        .args(["--actor", "u1", "map", "--window", "0"])
        .assert()
        .failure();
}

#[test]
fn removed_sample_disappears_and_missing_one_is_not_found() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    json_of(
        dir.path(),
        &["sample", "traffic", "--lat", "1", "--lng", "2", "--level", "50", "--id", "s1", "--json"],
    );
    json_of(dir.path(), &["sample", "remove", "s1", "--json"]);
    let map = json_of(dir.path(), &["--actor", "u1", "map", "--json"]);
    assert_eq!(map["markers"].as_array().unwrap().len(), 0);

    let output = rp_cmd(dir.path())
        .args(["sample", "remove", "s1", "--json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("JSON error");
    assert_eq!(err["error"]["error_code"], "E2001");
}

#[test]
fn report_awards_karma_and_feeds_the_dashboard() {
    let dir = TempDir::new().unwrap();
    init(dir.path());

    let report = json_of(
        dir.path(),
        &[
            "--actor", "u1", "report", "--type", "pothole", "--lat", "10.99", "--lng", "76.01",
            "--description", "deep", "--json",
        ],
    );
    assert_eq!(report["report_type"], "Pothole");
    assert_eq!(report["karma"]["status"], "awarded");
    assert_eq!(report["karma"]["points"], 10);

    let anonymous = json_of(
        dir.path(),
        &["report", "--type", "accident", "--lat", "1", "--lng", "2", "--json"],
    );
    assert_eq!(anonymous["karma"]["status"], "signed_out");

    json_of(
        dir.path(),
        &["sample", "traffic", "--lat", "1", "--lng", "2", "--level", "40", "--json"],
    );

    let dash = json_of(dir.path(), &["dashboard", "--json"]);
    assert_eq!(dash["total_reports"], 2);
    assert_eq!(dash["samples"], 1);
    let types = dash["report_types"].as_array().unwrap();
    let count_of = |name: &str| {
        types
            .iter()
            .find(|t| t["report_type"] == name)
            .map(|t| t["count"].clone())
    };
    assert_eq!(count_of("Pothole"), Some(Value::from(1)));
    assert_eq!(count_of("Accident"), Some(Value::from(1)));
    let hours = dash["hourly"].as_array().unwrap();
    assert_eq!(hours.len(), 1);
    assert_eq!(hours[0]["rounded"], 40);
}

#[test]
fn report_without_location_is_rejected() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    rp_cmd(dir.path())
        .args(["report", "--type", "flooding"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pin a location"));
}

#[test]
fn karma_requires_sign_in() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    let output = rp_cmd(dir.path())
        .args(["karma", "--json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("JSON error");
    assert_eq!(err["error"]["error_code"], "E2004");
}

#[test]
fn karma_panel_tracks_reports() {
    let dir = TempDir::new().unwrap();
    init(dir.path());

    let fresh = json_of(dir.path(), &["--actor", "u1", "karma", "--json"]);
    assert_eq!(fresh["panel"]["karma_points"], 0);
    assert_eq!(fresh["panel"]["total_reports"], 0);

    json_of(
        dir.path(),
        &["--actor", "u1", "report", "--lat", "1", "--lng", "2", "--json"],
    );
    let after = json_of(dir.path(), &["--actor", "u1", "karma", "--json"]);
    assert_eq!(after["panel"]["karma_points"], 10);
    assert_eq!(after["panel"]["total_reports"], 1);
    let first = after["panel"]["achievements"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["achievement"] == "first_report")
        .cloned()
        .expect("first_report badge");
    assert_eq!(first["achieved"], true);

    let bare = json_of(
        dir.path(),
        &["--actor", "u1", "karma", "--no-leaderboard", "--json"],
    );
    assert!(bare.get("leaderboard").is_none());
}

#[test]
fn leaderboard_ranks_and_appends_unranked_actor() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    for (user, points) in [("a", "300"), ("b", "200"), ("c", "100")] {
        json_of(
            dir.path(),
            &["sample", "leader", "--user", user, "--points", points, "--json"],
        );
    }
    json_of(
        dir.path(),
        &["--actor", "u9", "report", "--lat", "1", "--lng", "2", "--json"],
    );

    let board = json_of(
        dir.path(),
        &["--actor", "u9", "leaderboard", "--limit", "2", "--json"],
    );
    let rows = board["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["user_id"], "a");
    assert_eq!(rows[0]["rank"], 1);
    assert_eq!(rows[1]["user_id"], "b");
    assert_eq!(rows[2]["user_id"], "u9");
    assert_eq!(rows[2]["synthetic"], true);
    assert_eq!(rows[2]["highlighted"], true);
    assert_eq!(rows[2]["karma_points"], 10);
    assert!(rows[2]["rank"].is_null());
    assert_eq!(board["augmentation"]["outcome"], "appended");

    let ranked = json_of(dir.path(), &["--actor", "b", "leaderboard", "--json"]);
    assert_eq!(ranked["augmentation"]["outcome"], "not_needed");
    assert!(
        ranked["rows"]
            .as_array()
            .unwrap()
            .iter()
            .all(|r| r["synthetic"] == false)
    );
}

#[test]
fn text_output_is_line_oriented() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    json_of(
        dir.path(),
        &["sample", "leader", "--user", "a", "--name", "Asha", "--points", "5", "--json"],
    );
    rp_cmd(dir.path())
        .args(["leaderboard", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("1\ta\tAsha\t5\t0"));
}

#[test]
fn unreadable_leaderboard_entry_keeps_its_rank() {
    let dir = TempDir::new().unwrap();
    init(dir.path());
    let feed = concat!(
        r#"{"kind":"added","id":"a","payload":{"userName":"Asha","karmaPoints":900,"accuracy":87.5}}"#,
        "\n",
        r#"{"kind":"added","id":"b","payload":{"userName":"Bo","karmaPoints":800,"totalReports":"x"}}"#,
        "\n",
        r#"{"kind":"added","id":"c","payload":{"userName":"Cy","karmaPoints":700}}"#,
        "\n",
    );
    rp_cmd(dir.path())
        .args(["replay", "-", "--collection", "leaderboard", "--into-store"])
        .write_stdin(feed)
        .assert()
        .success();

    let board = json_of(dir.path(), &["leaderboard", "--json"]);
    let rows = board["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["accuracy"], 88);
    assert_eq!(rows[1]["user_id"], "b");
    assert_eq!(rows[1]["rank"], 2);
    assert_eq!(rows[2]["user_id"], "c");
    assert_eq!(rows[2]["rank"], 3);
}
