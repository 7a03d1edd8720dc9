//! Unit tests for the remote executor.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tempfile::TempDir;

struct Staged {
    _dir: TempDir,
    config: RemoteConfig,
}

#[fixture]
fn staged() -> Staged {
    let dir = TempDir::new().expect("temp dir");
    let staging_dir = dir.path().to_str().expect("utf8 temp dir").to_owned();
    Staged {
        _dir: dir,
        config: RemoteConfig {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            user: String::from("ubuntu"),
            port: 22,
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            identity_file: None,
            remote_script_path: String::from(DEFAULT_REMOTE_SCRIPT_PATH),
            staging_dir,
            copy_timeout_secs: 60,
        },
    }
}

fn target() -> RemoteTarget {
    RemoteTarget {
        user: String::from("ubuntu"),
        host: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)),
        port: 22,
    }
}

fn staged_files(config: &RemoteConfig) -> usize {
    std::fs::read_dir(&config.staging_dir)
        .expect("read staging dir")
        .count()
}

#[rstest]
#[case::ssh_bin("ssh_bin")]
#[case::scp_bin("scp_bin")]
#[case::user("user")]
#[case::remote_script_path("remote_script_path")]
#[case::staging_dir("staging_dir")]
fn validate_rejects_blank_fields(staged: Staged, #[case] field: &str) {
    let mut cfg = staged.config;
    let blank = String::from("  ");
    match field {
        "ssh_bin" => cfg.ssh_bin = blank,
        "scp_bin" => cfg.scp_bin = blank,
        "user" => cfg.user = blank,
        "remote_script_path" => cfg.remote_script_path = blank,
        _ => cfg.staging_dir = blank,
    }
    let err = cfg.validate().expect_err("blank field should fail");
    assert_eq!(
        err,
        RemoteError::InvalidConfig {
            field: field.to_owned()
        }
    );
}

#[rstest]
fn validate_rejects_zero_port(staged: Staged) {
    let cfg = RemoteConfig {
        port: 0,
        ..staged.config
    };
    assert!(matches!(
        cfg.validate(),
        Err(RemoteError::InvalidConfig { ref field }) if field == "port"
    ));
}

#[rstest]
fn invalid_config_message_names_env_var() {
    let err = RemoteError::InvalidConfig {
        field: String::from("user"),
    };
    assert_eq!(
        err.to_string(),
        "missing user: set STRATUS_SSH_USER or add user to [ssh] in stratus.toml"
    );
}

#[rstest]
fn push_copies_staged_file_and_cleans_up(staged: Staged) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = RemoteExecutor::new(staged.config.clone(), runner.clone()).expect("executor");

    executor
        .push(&ScriptPayload::new("echo hi\n"), &target())
        .expect("push should succeed");

    let invocations = runner.invocations();
    let [scp] = invocations.as_slice() else {
        panic!("expected one scp invocation, got {invocations:?}");
    };
    assert_eq!(scp.program, "scp");
    assert_eq!(scp.limit, Some(Duration::from_secs(60)));
    let command = scp.command_string();
    assert!(command.starts_with("scp -P 22 -o BatchMode=yes -o StrictHostKeyChecking=no"));
    assert!(command.contains(&staged.config.staging_dir));
    assert!(command.ends_with("ubuntu@203.0.113.10:/tmp/stratus-deploy.sh"));
    assert_eq!(staged_files(&staged.config), 0, "staged payload should be removed");
}

#[rstest]
fn push_reports_transfer_failure(staged: Staged) {
    let runner = ScriptedRunner::new();
    runner.push_failure(1, "lost connection");
    let executor = RemoteExecutor::new(staged.config.clone(), runner).expect("executor");

    let err = executor
        .push(&ScriptPayload::new("echo hi\n"), &target())
        .expect_err("push should fail");

    assert_eq!(
        err,
        RemoteError::Transfer {
            program: String::from("scp"),
            status_text: String::from("1"),
            stderr: String::from("lost connection"),
        }
    );
    assert_eq!(staged_files(&staged.config), 0);
}

#[rstest]
fn push_gives_up_on_a_stalled_copy(staged: Staged) {
    let cfg = RemoteConfig {
        copy_timeout_secs: 5,
        ..staged.config.clone()
    };
    let runner = ScriptedRunner::new();
    runner.push_timeout();
    let executor = RemoteExecutor::new(cfg, runner.clone()).expect("executor");

    let err = executor
        .push(&ScriptPayload::new("echo hi\n"), &target())
        .expect_err("stalled copy should fail");

    assert_eq!(
        err,
        RemoteError::CopyTimedOut {
            program: String::from("scp"),
            limit_secs: 5,
        }
    );
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert!(invocations.iter().all(|call| call.limit == Some(Duration::from_secs(5))));
    assert_eq!(staged_files(&staged.config), 0, "staged payload should be removed");
}

#[rstest]
fn validate_rejects_zero_copy_timeout(staged: Staged) {
    let cfg = RemoteConfig {
        copy_timeout_secs: 0,
        ..staged.config
    };
    assert!(matches!(
        cfg.validate(),
        Err(RemoteError::InvalidConfig { ref field }) if field == "copy_timeout_secs"
    ));
}

#[test]
fn process_runner_accepts_limits_beyond_the_clock() {
    let outcome = ProcessCommandRunner
        .run_with_timeout("true", &[], Duration::MAX)
        .expect("spawn true");

    assert!(matches!(
        outcome,
        TimedCommandOutput::Finished(ref output) if output.is_success()
    ));
}

#[rstest]
fn push_reports_missing_staging_dir(staged: Staged) {
    let cfg = RemoteConfig {
        staging_dir: format!("{}/missing", staged.config.staging_dir),
        ..staged.config
    };
    let executor = RemoteExecutor::new(cfg, ScriptedRunner::new()).expect("executor");

    let err = executor
        .push(&ScriptPayload::new("echo hi\n"), &target())
        .expect_err("push should fail");

    assert!(matches!(err, RemoteError::Staging { .. }));
}

#[rstest]
fn push_brackets_ipv6_hosts(staged: Staged) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = RemoteExecutor::new(staged.config, runner.clone()).expect("executor");
    let v6 = RemoteTarget {
        host: IpAddr::V6(Ipv6Addr::LOCALHOST),
        ..target()
    };

    executor
        .push(&ScriptPayload::new("echo hi\n"), &v6)
        .expect("push should succeed");

    let command = runner.invocations()[0].command_string();
    assert!(command.ends_with("ubuntu@[::1]:/tmp/stratus-deploy.sh"));
}

#[rstest]
fn execute_returns_exit_status_and_streams(staged: Staged) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(3), "partial\n", "npm ERR!\n");
    let executor = RemoteExecutor::new(staged.config, runner.clone()).expect("executor");
    let limit = Duration::from_secs(30);

    let outcome = executor
        .execute(&target(), &executor.script_command(), limit)
        .expect("execute should run");

    let ExecutionOutcome::Completed(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(result.exit_code, Some(3));
    assert!(!result.is_success());
    assert_eq!(result.stderr, "npm ERR!\n");

    let invocation = runner.invocations().remove(0);
    assert_eq!(invocation.limit, Some(limit));
    assert_eq!(
        invocation.command_string(),
        "ssh -p 22 -o BatchMode=yes -o StrictHostKeyChecking=no \
         -o UserKnownHostsFile=/dev/null ubuntu@203.0.113.10 sudo bash /tmp/stratus-deploy.sh"
    );
}

#[rstest]
fn execute_maps_timeout(staged: Staged) {
    let runner = ScriptedRunner::new();
    runner.push_timeout();
    let executor = RemoteExecutor::new(staged.config, runner).expect("executor");
    let limit = Duration::from_secs(5);

    let outcome = executor
        .execute(&target(), "true", limit)
        .expect("execute should run");

    assert_eq!(outcome, ExecutionOutcome::TimedOut { limit });
}

#[rstest]
fn identity_file_is_passed_to_both_clients(staged: Staged) {
    let cfg = RemoteConfig {
        identity_file: Some(String::from("/keys/deploy")),
        ..staged.config
    };
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let executor = RemoteExecutor::new(cfg, runner.clone()).expect("executor");

    executor
        .push(&ScriptPayload::new("echo hi\n"), &target())
        .expect("push");
    executor
        .execute(&target(), "true", Duration::from_secs(1))
        .expect("execute");

    for invocation in runner.invocations() {
        assert!(invocation.command_string().contains("-i /keys/deploy"));
    }
}

#[test]
fn identity_path_leaves_absolute_paths_alone() {
    assert_eq!(identity_path("/keys/deploy"), OsString::from("/keys/deploy"));
}

#[test]
fn identity_path_expands_home_prefix() {
    let Some(home) = env::var_os("HOME") else {
        return;
    };
    let expanded = identity_path("~/.ssh/id_ed25519");

    let mut expected = home;
    expected.push("/.ssh/id_ed25519");
    assert_eq!(expanded, expected);
}

#[rstest]
fn target_for_uses_configured_user_and_port(staged: Staged) {
    let cfg = RemoteConfig {
        user: String::from("deploy"),
        port: 2222,
        ..staged.config
    };
    let executor = RemoteExecutor::new(cfg, ScriptedRunner::new()).expect("executor");
    let host = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let built = executor.target_for(host);

    assert_eq!(
        built,
        RemoteTarget {
            user: String::from("deploy"),
            host,
            port: 2222,
        }
    );
}
