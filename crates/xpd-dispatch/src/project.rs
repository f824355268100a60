//! Project directory checks and remote path mirroring.

use std::env;
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use xpd_core::{ErrorInfo, XpdError};
use xpd_remote::{expand_tilde, home_dir, remote_join};

use crate::config::RunnerSpec;

/// Components a project under the home directory needs beyond `~` itself.
const MIN_HOME_DEPTH: usize = 3;

/// Validates the project directory that gets uploaded with every remote run.
///
/// Relative paths are resolved against the current directory first. Below the
/// home directory the project must be more than two components deep, so that
/// `~/work` or `~/a/b` are never shipped wholesale.
pub fn validate_project_dir(project: &Path) -> Result<PathBuf, XpdError> {
    let project = absolute_project(project)?;
    let home = home_dir()?;
    if let Ok(relative) = project.strip_prefix(&home) {
        if relative.components().count() < MIN_HOME_DEPTH {
            return Err(too_shallow(&project));
        }
    }
    if project.file_name().is_none() {
        return Err(too_shallow(&project));
    }
    Ok(project)
}

/// Absolute form of `project` with `.` and `..` folded away.
fn absolute_project(project: &Path) -> Result<PathBuf, XpdError> {
    let project = expand_tilde(project)?;
    let joined = if project.is_absolute() {
        project
    } else {
        env::current_dir()
            .map_err(|err| XpdError::io("cwd_read", &project, err))?
            .join(project)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

fn too_shallow(project: &Path) -> XpdError {
    XpdError::Config(
        ErrorInfo::new(
            "project_too_shallow",
            "project directory is too close to the home directory to upload",
        )
        .with_context("path", project.display().to_string()),
    )
}

/// Final component of the project directory.
pub fn project_name(project: &Path) -> String {
    project
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Remote working directory matching `cwd`'s position inside the project.
///
/// Falls back to the remote project root, with a warning, when `cwd` lies
/// outside the project.
pub fn mirrored_cwd(cwd: &Path, project: &Path, remote_project: &str) -> String {
    match cwd.strip_prefix(project) {
        Ok(relative) => remote_join(remote_project, relative.to_string_lossy()),
        Err(_) => {
            warn!(
                cwd = %cwd.display(),
                project = %project.display(),
                "working directory is outside the project; using the project root remotely"
            );
            remote_project.to_string()
        }
    }
}

/// Program that runs batches on a remote host.
///
/// An explicit `remote_program` wins. A bare program name is kept for the
/// remote `PATH`; an absolute path inside the project maps into the remote
/// project copy; a relative path is taken as is.
pub fn remote_program(
    runner: &RunnerSpec,
    project: &Path,
    remote_project: &str,
) -> Result<String, XpdError> {
    if let Some(program) = &runner.remote_program {
        return Ok(program.clone());
    }
    let program = Path::new(&runner.program);
    if !program.is_absolute() {
        return Ok(runner.program.clone());
    }
    match program.strip_prefix(project) {
        Ok(relative) => Ok(remote_join(remote_project, relative.to_string_lossy())),
        Err(_) => Err(XpdError::Config(
            ErrorInfo::new(
                "runner_outside_project",
                "runner program is not uploaded with the project",
            )
            .with_context("program", runner.program.clone())
            .with_context("project", project.display().to_string())
            .with_hint("set runner.remote_program in the configuration"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_home_projects_are_rejected() {
        let home = home_dir().unwrap();
        for shallow in [home.clone(), home.join("work"), home.join("work/proj")] {
            let err = validate_project_dir(&shallow).unwrap_err();
            assert_eq!(err.code(), "project_too_shallow");
        }
        assert!(validate_project_dir(&home.join("work/group/proj")).is_ok());
        assert!(validate_project_dir(Path::new("~/work/group/proj")).is_ok());
    }

    #[test]
    fn relative_projects_resolve_against_the_current_dir() {
        let cwd = env::current_dir().unwrap();
        assert_eq!(absolute_project(Path::new(".")).unwrap(), cwd);
        assert_eq!(
            absolute_project(Path::new("sub/../proj")).unwrap(),
            cwd.join("proj")
        );
        assert_eq!(
            absolute_project(Path::new("/srv/code/./proj/")).unwrap(),
            PathBuf::from("/srv/code/proj")
        );
    }

    #[test]
    fn relative_paths_cannot_dodge_the_home_depth_check() {
        let cwd = env::current_dir().unwrap();
        let home = home_dir().unwrap();
        let depth = cwd.strip_prefix(&home).map(|rel| rel.components().count());
        match depth {
            Ok(depth) if depth < MIN_HOME_DEPTH => {
                let err = validate_project_dir(Path::new(".")).unwrap_err();
                assert_eq!(err.code(), "project_too_shallow");
            }
            _ => {
                let project = validate_project_dir(Path::new(".")).unwrap();
                assert_eq!(project, cwd);
                assert_eq!(project_name(&project), project_name(&cwd));
            }
        }
        let up_to_home = cwd
            .strip_prefix(&home)
            .map(|rel| rel.components().map(|_| "..").collect::<Vec<_>>().join("/"));
        if let Ok(up) = up_to_home {
            let shallow = Path::new(if up.is_empty() { "." } else { up.as_str() }).join("work");
            let err = validate_project_dir(&shallow).unwrap_err();
            assert_eq!(err.code(), "project_too_shallow");
        }
    }

    #[test]
    fn projects_outside_home_are_accepted() {
        let home = home_dir().unwrap();
        if !Path::new("/opt").starts_with(&home) {
            assert!(validate_project_dir(Path::new("/opt/proj")).is_ok());
        }
    }

    #[test]
    fn cwd_is_mirrored_inside_the_project() {
        let project = Path::new("/srv/code/proj");
        assert_eq!(
            mirrored_cwd(&project.join("scripts"), project, "~/data/proj/s/v1/proj"),
            "~/data/proj/s/v1/proj/scripts"
        );
        assert_eq!(
            mirrored_cwd(project, project, "~/data/proj/s/v1/proj"),
            "~/data/proj/s/v1/proj"
        );
        assert_eq!(
            mirrored_cwd(Path::new("/tmp"), project, "~/r/proj"),
            "~/r/proj"
        );
    }

    #[test]
    fn remote_program_resolution() {
        let project = Path::new("/srv/code/proj");
        let mut runner = RunnerSpec::default();
        assert_eq!(remote_program(&runner, project, "~/r/proj").unwrap(), "xpd");

        runner.program = "/srv/code/proj/target/release/sweep".to_string();
        assert_eq!(
            remote_program(&runner, project, "~/r/proj").unwrap(),
            "~/r/proj/target/release/sweep"
        );

        runner.program = "/usr/local/bin/sweep".to_string();
        let err = remote_program(&runner, project, "~/r/proj").unwrap_err();
        assert_eq!(err.code(), "runner_outside_project");

        runner.remote_program = Some("~/bin/sweep".to_string());
        assert_eq!(remote_program(&runner, project, "~/r/proj").unwrap(), "~/bin/sweep");
    }
}
