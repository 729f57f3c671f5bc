//! Tests for the command implementations.

use super::clear::cmd_clear;
use super::exec::cmd_exec;
use super::status::cmd_status;
use crate::cli::{ClearArgs, ExecArgs, StatusArgs};
use crate::context::LockContext;
use mirrorlock::config::Config;
use mirrorlock::error::LockError;
use mirrorlock::local::WriteOptions;
use mirrorlock::store::{ClientRegistry, KeyValueStore};
use tempfile::TempDir;

fn test_context() -> (TempDir, LockContext) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        lock_root: temp_dir.path().join("root"),
        server_id: Some("srv1".to_string()),
        retry_period_ms: 5,
        ..Config::default()
    };
    let ctx = LockContext::from_config(&config).unwrap();
    (temp_dir, ctx)
}

fn exec_args(repo: &str, command: &str) -> ExecArgs {
    ExecArgs {
        repo: repo.to_string(),
        command: command.to_string(),
        read: false,
        write: false,
        nonblocking: false,
        upgrade: false,
        append: false,
        remote: false,
        group_id: None,
    }
}

fn clear_args(repo: &str, force: bool) -> ClearArgs {
    ClearArgs {
        repo: repo.to_string(),
        force,
        remote: false,
        local: false,
    }
}

#[test]
fn context_uses_store_under_lock_root() {
    let (temp_dir, ctx) = test_context();
    assert_eq!(
        ctx.store.root(),
        temp_dir.path().join("root").join("store").as_path()
    );
    assert_eq!(ctx.server_id, "srv1");
    assert!(ctx.client_name().starts_with("mirrorlock-srv1-"));
}

#[test]
fn status_runs_on_empty_state() {
    let (_temp_dir, ctx) = test_context();
    let args = StatusArgs {
        repo: None,
        json: true,
        check_stuck: true,
        sample_ms: 1,
    };
    cmd_status(&ctx, args).unwrap();
}

#[test]
fn status_for_unknown_repo_creates_no_lock_dir() {
    let (_temp_dir, ctx) = test_context();
    let args = StatusArgs {
        repo: Some("ghost".to_string()),
        json: false,
        check_stuck: false,
        sample_ms: 1,
    };
    cmd_status(&ctx, args).unwrap();

    assert!(!ctx.local.root().join("locks").join("ghost").exists());
    assert!(ctx.local.repos().unwrap().is_empty());
}

#[test]
fn clear_requires_force() {
    let (_temp_dir, ctx) = test_context();
    ctx.store.set(&ctx.names.view_lock("proj"), "1").unwrap();

    let err = cmd_clear(&ctx, clear_args("proj", false)).unwrap_err();
    assert!(matches!(err, LockError::UserError(_)));
    assert!(ctx.store.get(&ctx.names.view_lock("proj")).unwrap().is_some());
}

#[test]
fn clear_removes_remote_keys_and_local_markers() {
    let (_temp_dir, ctx) = test_context();
    ctx.store.set(&ctx.names.view_lock("proj"), "4").unwrap();
    ctx.store
        .set(&ctx.names.view_owners("proj"), "{\"owners\": []}")
        .unwrap();
    ctx.local.acquire_read("proj").unwrap();

    cmd_clear(&ctx, clear_args("proj", true)).unwrap();

    assert_eq!(ctx.store.get(&ctx.names.view_lock("proj")).unwrap(), None);
    assert_eq!(ctx.store.get(&ctx.names.view_owners("proj")).unwrap(), None);
    assert!(ctx.local.markers("proj").unwrap().readers.is_empty());
}

#[test]
fn clear_local_only_keeps_remote_keys() {
    let (_temp_dir, ctx) = test_context();
    ctx.store.set(&ctx.names.view_lock("proj"), "4").unwrap();
    ctx.local.acquire_read("proj").unwrap();

    let args = ClearArgs {
        local: true,
        ..clear_args("proj", true)
    };
    cmd_clear(&ctx, args).unwrap();

    assert!(ctx.store.get(&ctx.names.view_lock("proj")).unwrap().is_some());
    assert!(ctx.local.markers("proj").unwrap().readers.is_empty());
}

#[cfg(unix)]
#[test]
fn exec_read_runs_command_and_releases() {
    let (_temp_dir, ctx) = test_context();
    let args = ExecArgs {
        read: true,
        ..exec_args("proj", "true")
    };
    cmd_exec(&ctx, args).unwrap();

    let markers = ctx.local.markers("proj").unwrap();
    assert!(markers.readers.is_empty());
    assert_eq!(markers.writers, None);
}

#[cfg(unix)]
#[test]
fn exec_write_with_remote_leaves_nothing_behind() {
    let (_temp_dir, ctx) = test_context();
    let args = ExecArgs {
        write: true,
        remote: true,
        group_id: Some("555".to_string()),
        ..exec_args("proj", "sh -c 'exit 0'")
    };
    cmd_exec(&ctx, args).unwrap();

    assert_eq!(ctx.store.get(&ctx.names.view_owners("proj")).unwrap(), None);
    assert_eq!(ctx.store.get(&ctx.names.view_lock("proj")).unwrap(), None);
    assert_eq!(ctx.local.markers("proj").unwrap().writers, None);
    assert!(ctx.store.clients_matching("mirrorlock-*").unwrap().is_empty());
}

#[cfg(unix)]
#[test]
fn exec_failing_command_still_releases() {
    let (_temp_dir, ctx) = test_context();
    let args = ExecArgs {
        write: true,
        ..exec_args("proj", "false")
    };
    let err = cmd_exec(&ctx, args).unwrap_err();
    assert!(matches!(err, LockError::UserError(_)));
    assert_eq!(ctx.local.markers("proj").unwrap().writers, None);
}

#[cfg(unix)]
#[test]
fn exec_nonblocking_write_is_busy_while_another_writer_holds() {
    let (_temp_dir, ctx) = test_context();
    // Another live process (our parent) holds the write marker.
    let parent = ctx.local.clone().with_pid(std::os::unix::process::parent_id());
    parent.acquire_write("proj", WriteOptions::default()).unwrap();

    let args = ExecArgs {
        write: true,
        nonblocking: true,
        ..exec_args("proj", "true")
    };
    let err = cmd_exec(&ctx, args).unwrap_err();
    assert!(err.is_busy());
}

#[test]
fn exec_rejects_unbalanced_quotes() {
    let (_temp_dir, ctx) = test_context();
    let args = ExecArgs {
        read: true,
        ..exec_args("proj", "echo 'unterminated")
    };
    assert!(matches!(
        cmd_exec(&ctx, args),
        Err(LockError::UserError(_))
    ));
}
