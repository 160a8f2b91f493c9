//! # flowguard-inference
//!
//! Owns the one external inference process: launch, a line-oriented duplex
//! transport over its stdin/stdout, restart on write failure and a bounded
//! shutdown handshake.
//!
//! ### Key Submodules:
//! - `launch`: locating the interpreter and script, spawning with piped streams
//! - `protocol`: decoding classification lines from the worker's stdout
//! - `supervisor`: [`InferenceWorker`], the process lifecycle and the reader tasks
//! - `subscription`: callback subscribers over the verdict broadcast channel
//! - `host`: [`WorkerHost`], the explicit owner guaranteeing a single instance

mod error;
mod host;
mod launch;
mod protocol;
mod subscription;
mod supervisor;

pub use error::{StartupError, WorkerError};
pub use host::WorkerHost;
pub use launch::WorkerCommand;
pub use protocol::ResponseCodec;
pub use subscription::Subscription;
pub use supervisor::{InferenceWorker, WorkerState};

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::PathBuf;

    use flowguard_config::WorkerConfig;
    use tempfile::TempDir;

    /// Answers every line with `[RESULT] <line>;<n>` after an info line, and
    /// exits on the terminate token.
    pub const ECHO_WORKER: &str = r#"
n=0
while IFS= read -r line; do
  case "$line" in
    __TERMINATE__) exit 0 ;;
  esac
  n=$((n + 1))
  echo "[INFO] scoring flow $n"
  echo "worker diagnostics for $n" >&2
  echo "[RESULT] $line;$n"
done
"#;

    pub fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    pub fn sh_config(script: PathBuf) -> WorkerConfig {
        let mut config = WorkerConfig::default();
        config.process.executable = Some(PathBuf::from("/bin/sh"));
        config.process.args = Vec::new();
        config.process.script = script;
        config.process.channel_capacity = 64;
        config
    }
}
