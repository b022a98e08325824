//! Integration tests for the forksh binary and REPL.
//!
//! Workers are real processes: the `forksh` binary itself, run as
//! `forksh start`.

use std::process::Command;

use forksh_kernel::{KernelConfig, ProcessError};
use forksh_repl::Repl;
use serde_json::{json, Value};

const FORKSH: &str = env!("CARGO_BIN_EXE_forksh");

struct Session {
    repl: Repl,
    _control_dir: tempfile::TempDir,
}

impl Session {
    fn new() -> Self {
        let control_dir = tempfile::tempdir().expect("tempdir");
        let config = KernelConfig {
            worker_program: Some(FORKSH.into()),
            control_dir: Some(control_dir.path().to_path_buf()),
            history: false,
            ..KernelConfig::default()
        };
        Self {
            repl: Repl::with_config(config).expect("repl"),
            _control_dir: control_dir,
        }
    }

    /// Run a line; returns output lines, error lines and the outcome.
    fn run(&mut self, line: &str) -> (Vec<String>, Vec<String>, Result<(), ProcessError>) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = self
            .repl
            .process_line(line, |l| out.push(l.to_string()), |l| err.push(l.to_string()));
        (out, err, result)
    }

    fn json(&mut self, line: &str) -> Vec<Value> {
        let (out, err, result) = self.run(line);
        assert_eq!(result, Ok(()), "{line}: {err:?}");
        out.iter().map(|l| serde_json::from_str(l).expect(l)).collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.repl.close();
    }
}

#[test]
fn start_write_read_stop() {
    let mut session = Session::new();

    let started = session.json("start --@id w1");
    assert_eq!(started, vec![json!({"cmdId": "start", "@type": "started", "@id": "w1"})]);

    let (out, _, result) = session.run("workers");
    assert_eq!(result, Ok(()));
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("w1\t"), "{out:?}");

    assert!(session.json(r#"echo '{"@id":"fred","name":"Fred"}' > write"#).is_empty());
    assert_eq!(
        session.json(r#"read '{"@describe":"fred"}'"#),
        vec![json!({"@id": "fred", "name": "Fred"})]
    );

    let status = session.json("status --@id w1");
    assert_eq!(status[0]["ticks"], json!(1));
    assert_eq!(status[0]["online"], json!(true));

    let stopped = session.json("stop");
    assert_eq!(stopped, vec![json!({"cmdId": "stop", "@type": "stopped", "@id": "w1"})]);
    assert!(session.repl.kernel().workers().is_empty());
}

#[test]
fn generated_subjects_round_trip_through_a_worker() {
    let mut session = Session::new();
    session.json("start --@id store");

    session.json(r#"fake '{"@id":"s{{index}}","n":{{datatype.number}}}' --count 4 --seed 7 > write"#);
    let subjects = session.json(r#"read '{"@describe":"?s"}'"#);
    let ids: Vec<_> = subjects.iter().map(|s| s["@id"].clone()).collect();
    assert_eq!(ids, vec![json!("s0"), json!("s1"), json!("s2"), json!("s3")]);
}

#[test]
fn worker_env_reaches_later_workers() {
    let mut session = Session::new();
    session.json("start --@id first --env FORKSH_TEST_MARKER=hello");

    let (out, _, result) = session.run("fork sh -c 'echo $FORKSH_TEST_MARKER'");
    assert_eq!(result, Ok(()));
    assert_eq!(out, vec!["hello"]);
}

#[test]
fn worker_errors_fail_the_turn() {
    let mut session = Session::new();
    session.json("start");

    let (_, _, result) = session.run(r#"read '{"@select":"?s"}'"#);
    assert_eq!(
        result,
        Err(ProcessError::Remote(r#"unsupported query: {"@select":"?s"}"#.into()))
    );

    // The prompt carries on.
    let (out, _, result) = session.run("echo still here");
    assert_eq!(result, Ok(()));
    assert_eq!(out, vec!["still here"]);
}

#[test]
fn start_help_is_delegated_to_the_worker() {
    let mut session = Session::new();
    let (out, _, result) = session.run("start --help");
    assert_eq!(result, Ok(()));
    assert!(out[0].starts_with("forksh start"), "{out:?}");
    assert!(session.repl.kernel().workers().is_empty());
}

#[test]
fn exit_stops_workers() {
    let mut session = Session::new();
    session.json("start --@id a");
    session.json("start --@id b");
    assert_eq!(session.repl.kernel().workers().len(), 2);

    let (_, _, result) = session.run("exit");
    assert_eq!(result, Ok(()));
    assert!(session.repl.is_closed());
    assert!(session.repl.kernel().workers().is_empty());
}

#[test]
fn one_shot_command() {
    let output = Command::new(FORKSH).args(["-c", "echo hello world"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello world\n");
}

#[test]
fn one_shot_failure_sets_exit_code() {
    let output = Command::new(FORKSH)
        .args(["-c", "file /definitely/not/here.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn standalone_dry_run_reports_config_on_stdout() {
    let output = Command::new(FORKSH)
        .args(["start", "--@id", "solo", "--env", "A=1", "--dry-run"])
        .env_remove("FORKSH_CONTROL_SOCKET")
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        report,
        json!({"cmdId": "start", "@type": "config", "@id": "solo", "env": {"A": "1"}, "dryRun": true})
    );
}

#[test]
fn dry_run_start_registers_nothing() {
    let mut session = Session::new();
    let config = session.json("start --@id ghost --dry-run");
    assert_eq!(config[0]["@type"], json!("config"));
    assert!(session.repl.kernel().workers().is_empty());
}

#[test]
fn version_flag() {
    let output = Command::new(FORKSH).arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("forksh "));
}
