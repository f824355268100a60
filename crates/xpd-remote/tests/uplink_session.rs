use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tempfile::tempdir;
use xpd_core::{ErrorInfo, XpdError};
use xpd_remote::{
    home_dir, CommandOutput, CommandRunner, Invocation, MockRunner, RunOpts, Uplink, UplinkOpts,
};

fn uplink(runner: &Arc<MockRunner>) -> Uplink {
    let runner: Arc<dyn CommandRunner> = runner.clone();
    Uplink::new("cno-0001", runner, UplinkOpts::default())
}

fn is_download(invocation: &Invocation) -> bool {
    invocation.program == "rsync"
        && invocation
            .args
            .iter()
            .rev()
            .nth(1)
            .is_some_and(|source| source.starts_with("cno-0001:"))
}

#[test]
fn connect_opens_the_control_master() {
    let runner = Arc::new(MockRunner::new());
    let shared: Arc<dyn CommandRunner> = runner.clone();
    Uplink::connect("cno-0001", shared, UplinkOpts::default()).expect("connect");
    assert_eq!(
        runner.command_lines(),
        vec![
            "ssh -o ControlMaster=auto -o ControlPath=~/.ssh/%r@%h:%p.socket \
             -o ControlPersist=1m cno-0001 true"
        ]
    );
}

#[test]
fn commands_run_in_a_login_shell_by_default() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    link.run("cd ~/data && ls", &RunOpts::default()).expect("run");
    link.run(
        "hostname",
        &RunOpts {
            login_shell: false,
            ..RunOpts::default()
        },
    )
    .expect("run");
    let calls = runner.invocations();
    assert_eq!(calls[0].args.last().unwrap(), "bash -l -c 'cd ~/data && ls'");
    assert_eq!(calls[1].args.last().unwrap(), "hostname");
    assert!(calls.iter().all(|c| c.capture));
}

#[test]
fn strict_commands_fail_with_exit_code_and_stderr() {
    let runner = Arc::new(MockRunner::with_responses(vec![
        Ok(CommandOutput::failed(127, "uv: command not found\n")),
        Ok(CommandOutput::failed(1, "")),
    ]));
    let link = uplink(&runner);
    let err = link.run("uv sync", &RunOpts::default()).unwrap_err();
    let info = err.info().expect("info");
    assert_eq!(info.code, "remote_command_failed");
    assert_eq!(info.context["exit_code"], "127");
    assert_eq!(info.context["stderr"], "uv: command not found");

    let out = link.run("grep FAILED", &RunOpts::unchecked()).expect("unchecked");
    assert_eq!(out.exit_code, 1);
}

#[test]
fn streamed_commands_do_not_capture() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    link.run("cargo build", &RunOpts::streamed()).expect("run");
    assert!(!runner.invocations()[0].capture);
}

#[test]
fn sync_directions_use_trailing_slash_on_the_source() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    let local = tempdir().expect("tmp dir");
    link.sync_up(local.path(), "~/data/run").expect("up");
    link.sync_down("~/data/run/", local.path()).expect("down");
    let calls = runner.invocations();
    let up = &calls[0].args;
    assert_eq!(up[0], "-azhL");
    assert_eq!(up[up.len() - 2], format!("{}/", local.path().display()));
    assert_eq!(up[up.len() - 1], "cno-0001:~/data/run");
    let down = &calls[1].args;
    assert_eq!(down[down.len() - 2], "cno-0001:~/data/run/");
    assert_eq!(down[down.len() - 1], local.path().display().to_string());
    assert!(up.iter().any(|a| a.starts_with("ssh -o ControlMaster=auto")));
}

#[test]
fn progress_flags_depend_on_the_local_rsync_version() {
    let runner = Arc::new(MockRunner::with_handler(|inv| {
        (inv.args == ["--version"])
            .then(|| Ok(CommandOutput::ok("rsync  version 3.2.7  protocol version 31\n")))
    }));
    let shared: Arc<dyn CommandRunner> = runner.clone();
    let link = Uplink::new(
        "cno-0001",
        shared,
        UplinkOpts {
            progress: true,
            ..UplinkOpts::default()
        },
    );
    let local = tempdir().expect("tmp dir");
    link.sync_up(local.path(), "~/a").expect("up");
    link.sync_up(local.path(), "~/b").expect("up");
    let calls = runner.invocations();
    let probes = calls.iter().filter(|c| c.args == ["--version"]).count();
    assert_eq!(probes, 1);
    assert!(calls
        .iter()
        .filter(|c| c.args.first().map(String::as_str) == Some("-azhL"))
        .all(|c| c.args.contains(&"--info=progress2".to_string())));
}

#[test]
fn dry_runs_render_the_rsync_line() {
    let runner = Arc::new(MockRunner::new());
    let shared: Arc<dyn CommandRunner> = runner.clone();
    let link = Uplink::new(
        "cno-0001",
        shared,
        UplinkOpts {
            dry: true,
            multiplex: false,
            ..UplinkOpts::default()
        },
    );
    let line = link
        .sync_down("~/data/run", std::path::Path::new("/tmp/run"))
        .expect("dry")
        .expect("rendered");
    assert_eq!(line, "rsync -azhL cno-0001:~/data/run/ /tmp/run");
    assert!(runner.invocations().is_empty());
}

#[test]
fn scoped_sync_uploads_then_downloads() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    let source = tempdir().expect("tmp dir");
    let project = tempdir().expect("tmp dir");
    let value = link
        .scoped_sync("~/data/p/s/v1", source.path(), &[project.path().to_path_buf()], |up| {
            up.run("echo inside", &RunOpts::default())?;
            Ok(42)
        })
        .expect("scoped");
    assert_eq!(value, 42);
    let calls = runner.invocations();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0].args.last().unwrap(), "bash -l -c 'mkdir -p ~/data/p/s/v1'");
    let project_name = project
        .path()
        .canonicalize()
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert_eq!(
        calls[2].args.last().unwrap(),
        &format!("cno-0001:~/data/p/s/v1/{project_name}")
    );
    assert_eq!(calls[3].args.last().unwrap(), "bash -l -c 'echo inside'");
    assert!(is_download(&calls[4]));
}

#[test]
fn scoped_sync_downloads_even_when_the_body_fails() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    let source = tempdir().expect("tmp dir");
    let err = link
        .scoped_sync("~/run", source.path(), &[], |_| -> Result<(), XpdError> {
            Err(XpdError::Execution(ErrorInfo::new("batch_failed", "boom")))
        })
        .unwrap_err();
    assert_eq!(err.code(), "batch_failed");
    let calls = runner.invocations();
    assert!(is_download(calls.last().unwrap()));
}

#[test]
fn download_failure_does_not_mask_the_body_error() {
    let runner = Arc::new(MockRunner::with_handler(|inv| {
        is_download(inv).then(|| Ok(CommandOutput::failed(23, "partial transfer")))
    }));
    let link = uplink(&runner);
    let source = tempdir().expect("tmp dir");
    let err = link
        .scoped_sync("~/run", source.path(), &[], |_| -> Result<(), XpdError> {
            Err(XpdError::Execution(ErrorInfo::new("batch_failed", "boom")))
        })
        .unwrap_err();
    assert_eq!(err.code(), "batch_failed");

    let err = link
        .scoped_sync("~/run", source.path(), &[], |_| Ok(()))
        .unwrap_err();
    assert_eq!(err.code(), "sync_failed");
}

#[test]
fn scoped_sync_downloads_before_resuming_a_panic() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    let source = tempdir().expect("tmp dir");
    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = link.scoped_sync("~/run", source.path(), &[], |_| -> Result<(), XpdError> {
            panic!("interrupted")
        });
    }));
    assert!(caught.is_err());
    assert!(is_download(runner.invocations().last().unwrap()));
}

#[test]
fn scoped_sync_refuses_the_home_directory() {
    let runner = Arc::new(MockRunner::new());
    let link = uplink(&runner);
    let source = tempdir().expect("tmp dir");
    let home = home_dir().expect("home");
    let err = link
        .scoped_sync("~/run", source.path(), &[home], |_| Ok(()))
        .unwrap_err();
    assert_eq!(err.code(), "path_too_broad");
    assert!(runner.invocations().is_empty());
}
