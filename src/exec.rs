//! External command execution.
//!
//! One spawn per call, no retries. Polling semantics belong to callers.
//! Environment overrides are merged on top of the broker's own environment,
//! never replacing it wholesale.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ExecError;

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Run `program` with `args`, returning trimmed stdout on success.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        env_overrides: &[(String, String)],
    ) -> Result<String, ExecError> {
        self.run_with_stdin(program, args, env_overrides, None).await
    }

    /// Like [`run`](Self::run), optionally writing `stdin` to the child
    /// before waiting. Used for key import, where the mnemonic must never
    /// appear in an argument list.
    pub async fn run_with_stdin(
        &self,
        program: &str,
        args: &[String],
        env_overrides: &[(String, String)],
        stdin: Option<&str>,
    ) -> Result<String, ExecError> {
        tracing::debug!(program, ?args, "spawning marketplace command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env_overrides.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| ExecError::Spawn {
                        program: program.to_string(),
                        reason: format!("failed to write stdin: {e}"),
                    })?;
                // Dropping the handle closes the pipe so the child sees EOF.
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return Ok(stdout.trim().to_string());
        }

        // Error text preference: stderr, else stdout, else the exit status.
        let message = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("exited with {}", output.status)
        };

        Err(ExecError::Failed {
            program: program.to_string(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[tokio::test]
    async fn stdout_is_trimmed() {
        let runner = CommandRunner;
        let out = runner
            .run("sh", &s(&["-c", "echo '  hello  '"]), &[])
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn env_overrides_merge_without_replacing() {
        let runner = CommandRunner;
        let out = runner
            .run(
                "sh",
                &s(&["-c", "echo \"$GPU_BROKER_EXEC_TEST:$PATH\""]),
                &[("GPU_BROKER_EXEC_TEST".into(), "on".into())],
            )
            .await
            .unwrap();
        // Override visible, inherited PATH still present.
        assert!(out.starts_with("on:"));
        assert!(out.len() > "on:".len());
    }

    #[tokio::test]
    async fn failure_prefers_stderr() {
        let runner = CommandRunner;
        let err = runner
            .run("sh", &s(&["-c", "echo out; echo problem >&2; exit 3"]), &[])
            .await
            .unwrap_err();
        match err {
            ExecError::Failed { message, .. } => assert_eq!(message, "problem"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_falls_back_to_stdout() {
        let runner = CommandRunner;
        let err = runner
            .run("sh", &s(&["-c", "echo only-stdout; exit 1"]), &[])
            .await
            .unwrap_err();
        match err {
            ExecError::Failed { message, .. } => assert_eq!(message, "only-stdout"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_error_is_reported() {
        let runner = CommandRunner;
        let err = runner
            .run("definitely-not-a-real-binary-xyz", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn stdin_reaches_child() {
        let runner = CommandRunner;
        let out = runner
            .run_with_stdin("cat", &[], &[], Some("piped secret"))
            .await
            .unwrap();
        assert_eq!(out, "piped secret");
    }
}
