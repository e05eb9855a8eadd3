use serde_json::{Value, json};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "brdata-cli-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Isolated cache, remote mirror, and source directories for one test.
struct Workspace {
    tmp: TempDirGuard,
}

impl Workspace {
    fn new(prefix: &str) -> Self {
        let tmp = TempDirGuard::new(prefix);
        fs::write(tmp.path().join("config.toml"), "max_retries = 0\n")
            .expect("config should be written");
        for dir in ["sources", "remote"] {
            fs::create_dir_all(tmp.path().join(dir)).expect("dir should be created");
        }
        Self { tmp }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    fn run<I, S>(&self, args: I) -> Output
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let bin = env!("CARGO_BIN_EXE_brdata");
        Command::new(bin)
            .arg("--config")
            .arg(self.dir("config.toml"))
            .arg("--cache-dir")
            .arg(self.dir("cache"))
            .arg("--remote-dir")
            .arg(self.dir("remote"))
            .arg("--source-dir")
            .arg(self.dir("sources"))
            .args(args)
            .env_remove("BRDATA_LOG")
            .env_remove("BRDATA_REGISTRY")
            .env_remove("BRDATA_REMOTE_URL")
            .output()
            .expect("brdata command should execute")
    }

    fn write_document(&self, dir: &str, name: &str, payload: &Value) {
        fs::write(
            self.dir(dir).join(format!("{name}.json")),
            serde_json::to_vec(payload).expect("json"),
        )
        .expect("document should be written");
    }
}

fn assert_success(output: &Output) {
    if !output.status.success() {
        panic!(
            "command failed with status {:?}\nstdout:\n{}\nstderr:\n{}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn assert_failure(output: &Output) {
    if output.status.success() {
        panic!(
            "command unexpectedly succeeded\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice::<Value>(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "expected valid JSON stdout, got error: {e}\nstdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn table(label: &str) -> Value {
    json!({
        "columns": ["date", "series", "value"],
        "rows": [
            ["2025-11-01", label, 1.0],
            ["2025-12-01", label, 2.0],
            ["2026-01-01", label, 3.0]
        ]
    })
}

fn abecip_payload() -> Value {
    json!({
        "kind": "multi",
        "data": {
            "sbpe": table("sbpe"),
            "units": table("units"),
            "cgi": table("cgi")
        }
    })
}

#[test]
fn list_json_reports_every_dataset_once() {
    let ws = Workspace::new("list");
    let output = ws.run(["list", "--json"]);
    assert_success(&output);

    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "list");
    let names: Vec<&str> = payload["datasets"]
        .as_array()
        .expect("datasets array")
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert_eq!(payload["count"], names.len());
    let mut unique = names.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), names.len());
    assert!(names.contains(&"abecip"));
    assert!(names.contains(&"rppi_bis"));
}

#[test]
fn list_text_filters_by_organization() {
    let ws = Workspace::new("list-filter");
    let output = ws.run(["list", "--org", "abecip"]);
    assert_success(&output);
    let text = stdout_text(&output);
    assert!(text.contains("- abecip (ABECIP, weekly) [sbpe, units, cgi]"));
    assert!(text.contains("- rppi ("), "rppi lists ABECIP among its sources");
    assert!(!text.contains("b3_stocks"));
}

#[test]
fn info_json_includes_tables_and_cache_state() {
    let ws = Workspace::new("info");
    let output = ws.run(["info", "abecip", "--json"]);
    assert_success(&output);

    let payload = parse_json_stdout(&output);
    let dataset = &payload["dataset"];
    assert_eq!(dataset["descriptor"]["name"], "abecip");
    let keys: Vec<&str> = dataset["descriptor"]["tables"]
        .as_array()
        .expect("tables")
        .iter()
        .filter_map(|t| t["key"].as_str())
        .collect();
    assert_eq!(keys, vec!["sbpe", "units", "cgi"]);
    assert_eq!(dataset["cache"]["cached"], false);
    assert_eq!(dataset["cache"]["stale"], true);
}

#[test]
fn unknown_dataset_fails_with_suggestions() {
    let ws = Workspace::new("unknown");
    let output = ws.run(["get", "does-not-exist"]);
    assert_failure(&output);
    let stderr = stderr_text(&output);
    assert!(stderr.contains("error: dataset `does-not-exist` not found"));
    assert!(stderr.contains("abecip"));
}

#[test]
fn unknown_table_lists_valid_tables() {
    let ws = Workspace::new("bogus-table");
    let output = ws.run(["get", "abecip", "--table", "bogus"]);
    assert_failure(&output);
    assert!(stderr_text(&output).contains("available tables: sbpe, units, cgi"));
}

#[test]
fn fresh_fetch_then_cache_read() {
    let ws = Workspace::new("fresh-cache");
    ws.write_document("sources", "abecip", &abecip_payload());

    let fresh = ws.run(["get", "abecip", "--source", "fresh", "--json"]);
    assert_success(&fresh);
    let fresh = parse_json_stdout(&fresh);
    assert_eq!(fresh["found"], true);
    let metadata = &fresh["result"]["metadata"];
    assert_eq!(metadata["source"], "fresh");
    assert!(metadata["fetchedAt"].is_string());
    assert_eq!(metadata["info"]["resolvedTable"], "sbpe");
    assert_eq!(metadata["info"]["isDefaultTable"], true);
    assert!(
        metadata["info"]["note"]
            .as_str()
            .expect("note")
            .contains("sbpe, units, cgi")
    );

    let cached = ws.run([
        "get",
        "abecip",
        "--table",
        "units",
        "--source",
        "cache",
        "--miss-policy",
        "error",
        "--json",
    ]);
    assert_success(&cached);
    let cached = parse_json_stdout(&cached);
    assert_eq!(cached["result"]["metadata"]["source"], "local_cache");
    assert_eq!(cached["result"]["table"], table("units"));
}

#[test]
fn date_range_and_text_output() {
    let ws = Workspace::new("dates");
    ws.write_document("sources", "abecip", &abecip_payload());

    let output = ws.run([
        "get",
        "abecip",
        "--start",
        "2025-12-01",
        "--end",
        "2025-12-31",
        "--quiet",
    ]);
    assert_success(&output);
    let text = stdout_text(&output);
    assert!(text.contains("Table: sbpe (default)"));
    assert!(text.contains("Source: fresh"));
    assert!(text.contains("Rows: 1"));
    assert!(text.contains("2025-12-01"));
    assert!(!text.contains("2025-11-01"));
}

#[test]
fn cache_miss_policy_controls_exit_status() {
    let ws = Workspace::new("cache-miss");
    let output = ws.run([
        "get",
        "abecip",
        "--table",
        "units",
        "--source",
        "cache",
        "--miss-policy",
        "error",
    ]);
    assert_failure(&output);
    assert!(stderr_text(&output).contains("tier `cache`"));

    let output = ws.run(["get", "abecip", "--source", "cache", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["found"], false);
    assert_eq!(payload["source"], "cache");
}

#[test]
fn auto_reports_every_failed_tier() {
    let ws = Workspace::new("all-failed");
    let output = ws.run(["get", "cbic"]);
    assert_failure(&output);
    let stderr = stderr_text(&output);
    assert!(stderr.contains("all sources failed for `cbic`"));
    for tier in ["local_cache:", "remote_store:", "fresh:"] {
        assert!(stderr.contains(tier), "{tier} missing from: {stderr}");
    }
}

#[test]
fn cache_update_status_list_and_clear() {
    let ws = Workspace::new("maintenance");
    ws.write_document("remote", "abecip", &abecip_payload());

    let update = ws.run(["cache", "update", "abecip", "rppi", "--json"]);
    assert_success(&update);
    let update = parse_json_stdout(&update);
    assert_eq!(update["action"], "cache.update");
    assert_eq!(update["updated"], json!(["abecip"]));
    assert_eq!(update["failed"][0]["name"], "rppi");

    let status = ws.run(["cache", "status", "--json"]);
    assert_success(&status);
    let status = parse_json_stdout(&status);
    let abecip = status["datasets"]
        .as_array()
        .expect("datasets")
        .iter()
        .find(|row| row["name"] == "abecip")
        .expect("abecip row")
        .clone();
    assert_eq!(abecip["cached"], true);
    assert_eq!(abecip["stale"], false);
    assert_eq!(abecip["thresholdSeconds"], 14 * 86_400);

    let list = ws.run(["cache", "list", "--json"]);
    assert_success(&list);
    let list = parse_json_stdout(&list);
    assert_eq!(list["count"], 1);
    assert_eq!(list["entries"][0]["name"], "abecip");

    let clear = ws.run(["cache", "clear", "--all", "--json"]);
    assert_success(&clear);
    assert_eq!(parse_json_stdout(&clear)["removed"], json!(["abecip"]));

    let list = ws.run(["cache", "list", "--json"]);
    assert_success(&list);
    assert_eq!(parse_json_stdout(&list)["count"], 0);
}

#[test]
fn cache_clear_requires_names_or_all() {
    let ws = Workspace::new("clear-args");
    let output = ws.run(["cache", "clear"]);
    assert_failure(&output);
    assert!(stderr_text(&output).contains("--all"));
}

#[test]
fn remote_list_reads_mirror_directory() {
    let ws = Workspace::new("remote-list");
    ws.write_document("remote", "abecip", &abecip_payload());
    ws.write_document("remote", "unregistered", &json!({"kind": "single", "data": table("x")}));

    let output = ws.run(["remote", "list", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "remote.list");
    assert_eq!(payload["artifacts"], json!(["abecip", "unregistered"]));

    let output = ws.run(["remote", "list"]);
    assert_success(&output);
    assert!(stdout_text(&output).contains("unregistered (not in registry)"));
}
