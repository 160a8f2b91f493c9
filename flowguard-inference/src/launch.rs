use std::path::{Path, PathBuf};
use std::process::Stdio;

use flowguard_config::ProcessConfig;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::error::StartupError;

/// `<executable> <args...> <script>`, stdout and stderr kept apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub script: PathBuf,
}

pub(crate) struct LaunchedProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl WorkerCommand {
    pub fn from_config(process: &ProcessConfig) -> Self {
        Self {
            executable: process.resolve_executable(),
            args: process.args.clone(),
            script: process.script.clone(),
        }
    }

    /// Checks that both paths exist.
    pub fn locate(&self) -> Result<(), StartupError> {
        if !is_present(&self.executable) {
            return Err(StartupError::ExecutableNotFound(self.executable.clone()));
        }
        if !is_present(&self.script) {
            return Err(StartupError::ScriptNotFound(self.script.clone()));
        }
        Ok(())
    }

    pub(crate) fn launch(&self) -> Result<LaunchedProcess, StartupError> {
        self.locate()?;

        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StartupError::Spawn {
                path: self.executable.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(StartupError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(StartupError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(StartupError::MissingPipe("stderr"))?;

        debug!(pid = child.id(), executable = %self.executable.display(), "worker process spawned");
        Ok(LaunchedProcess {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

fn is_present(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_paths_are_startup_errors() {
        let command = WorkerCommand {
            executable: PathBuf::from("/nonexistent/python"),
            args: vec!["-u".into()],
            script: PathBuf::from("/nonexistent/main.py"),
        };
        assert!(matches!(
            command.locate(),
            Err(StartupError::ExecutableNotFound(_))
        ));

        let command = WorkerCommand {
            executable: std::env::current_exe().unwrap(),
            ..command
        };
        assert!(matches!(command.locate(), Err(StartupError::ScriptNotFound(_))));
    }

    #[test]
    fn venv_interpreter_is_the_default() {
        let command = WorkerCommand::from_config(&ProcessConfig::default());
        assert!(command.executable.starts_with(".venv"));
        assert_eq!(command.args, vec!["-u".to_string()]);
        assert_eq!(command.script, PathBuf::from("models/main.py"));
    }
}
