//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
default_provider = "scripted"
database_path = "skillforge.db"
practice_question_count = 3

[providers.scripted]
type = "scripted"
"#;

/// A scratch directory holding a scripted-provider config and a database.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("skillforge.toml"), CONFIG).unwrap();
        std::fs::write(
            dir.path().join("result.txt"),
            "# Bluebook Test 1\nLinear Equations | Math\n",
        )
        .unwrap();
        Self { dir }
    }

    fn skillforge(&self) -> Command {
        #[allow(deprecated)]
        let mut cmd = Command::cargo_bin("skillforge").unwrap();
        cmd.current_dir(self.dir.path())
            .env_remove("SKILLFORGE_DATABASE")
            .env_remove("SKILLFORGE_OPENAI_KEY")
            .env("RUST_LOG", "skillforge=warn");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self
            .skillforge()
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).unwrap()
    }

    fn upload(&self) -> Value {
        self.json(&["upload", "--user", "1", "--test", "Bluebook Test 1", "result.txt"])
    }
}

#[test]
fn init_creates_config_once() {
    let dir = TempDir::new().unwrap();
    #[allow(deprecated)]
    Command::cargo_bin("skillforge")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created skillforge.toml"))
        .stdout(predicate::str::contains("Created sample-result.txt"));

    assert!(dir.path().join("skillforge.toml").exists());

    #[allow(deprecated)]
    Command::cargo_bin("skillforge")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists, skipping"));
}

#[test]
fn upload_analyzes_and_builds_quiz() {
    let ws = Workspace::new();
    ws.skillforge()
        .args(["upload", "--user", "1", "--test", "Bluebook Test 1", "result.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upload 1: complete"))
        .stdout(predicate::str::contains("quiz 1 ready"));

    ws.skillforge()
        .args(["progress", "--user", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linear Equations"))
        .stdout(predicate::str::contains("missed"));
}

#[test]
fn upload_missing_file_fails() {
    Workspace::new()
        .skillforge()
        .args(["upload", "--user", "1", "--test", "T", "nope.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn quiz_view_hides_answer_key() {
    let ws = Workspace::new();
    let report = ws.upload();
    let quiz = report["quiz"]["id"].as_i64().unwrap().to_string();

    ws.skillforge()
        .args(["quiz", "show", &quiz, "--user", "1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linear Equations"))
        .stdout(predicate::str::contains("correct_option").not());

    ws.skillforge()
        .args(["quiz", "show", &quiz, "--user", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not belong"));
}

#[test]
fn quiz_accepts_one_submission() {
    let ws = Workspace::new();
    let report = ws.upload();
    let quiz = report["quiz"]["id"].as_i64().unwrap().to_string();
    let view = ws.json(&["quiz", "show", &quiz, "--user", "1"]);
    let question = view["questions"][0]["question_id"].as_i64().unwrap();
    let answers = format!(r#"{{"{question}": "A"}}"#);

    ws.skillforge()
        .args(["quiz", "submit", &quiz, "--user", "1", "--answers", &answers])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 correct, 0 incorrect"));

    ws.skillforge()
        .args(["quiz", "submit", &quiz, "--user", "1", "--answers", &answers])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already submitted"));

    ws.skillforge()
        .args(["progress", "--user", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("quiz_correct"));
}

#[test]
fn missed_skill_reaches_mastery() {
    let ws = Workspace::new();
    let report = ws.upload();
    let quiz = report["quiz"]["id"].as_i64().unwrap().to_string();
    let view = ws.json(&["quiz", "show", &quiz, "--user", "1"]);
    let question = view["questions"][0]["question_id"].as_i64().unwrap();

    // A wrong answer queues a lesson, which the submit command delivers.
    let result = ws.json(&[
        "quiz",
        "submit",
        &quiz,
        "--user",
        "1",
        "--answers",
        &format!(r#"{{"{question}": "B"}}"#),
    ]);
    assert_eq!(result["incorrect"], 1);
    assert_eq!(result["videos_queued"].as_array().unwrap().len(), 1);

    let lessons = ws.json(&["lesson", "list", "--user", "1"]);
    let lesson = lessons[0]["id"].as_i64().unwrap().to_string();
    ws.skillforge()
        .args(["lesson", "show", &lesson])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linear Equations"));

    ws.skillforge()
        .args(["lesson", "watch", &lesson, "--user", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 practice question(s) ready"));

    let practice = ws.json(&["practice", "show", &lesson, "--user", "1"]);
    assert_eq!(practice["status"], "video_watched");
    let answers: serde_json::Map<String, Value> = practice["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| (q["question_id"].to_string(), Value::from("A")))
        .collect();

    let result = ws.json(&[
        "practice",
        "submit",
        &lesson,
        "--user",
        "1",
        "--answers",
        &Value::Object(answers).to_string(),
    ]);
    assert_eq!(result["mastered"], true);
    assert_eq!(result["growth"]["count"], 1);

    ws.skillforge()
        .args(["growth", "--user", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Growth for user 1: 1"));
}

#[test]
fn worker_processes_deferred_uploads() {
    let ws = Workspace::new();
    ws.skillforge()
        .args(["upload", "--user", "1", "--test", "T", "result.txt", "--no-wait"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upload 1 is uploaded"));

    ws.skillforge()
        .arg("worker")
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 2 stage(s), 0 failed"));

    ws.skillforge()
        .args(["uploads", "--user", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("complete"));

    ws.skillforge()
        .arg("worker")
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 0 stage(s)"));
}

#[test]
fn invalid_answers_are_rejected() {
    let ws = Workspace::new();
    ws.upload();
    ws.skillforge()
        .args(["quiz", "submit", "1", "--user", "1", "--answers", "B"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--answers must be a JSON object"));
}

#[test]
fn empty_practice_batch_config_is_rejected() {
    let ws = Workspace::new();
    std::fs::write(
        ws.dir.path().join("skillforge.toml"),
        CONFIG.replace("practice_question_count = 3", "practice_question_count = 0"),
    )
    .unwrap();

    ws.skillforge()
        .args(["uploads", "--user", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("practice_question_count"));
}
