//! Skill execution in an isolated child process.
//!
//! The executor resolves an entry script for a skill, runs it with the
//! skill's directory as cwd, hands the request input to the child on both
//! stdin and the `SKILLSCALE_INTENT` environment variable, captures stdout
//! and stderr in full, and enforces a wall-clock timeout. On expiry the
//! whole process group is killed, not just the immediate child, so
//! intermediate shells cannot orphan grandchildren.
//!
//! Executions share no state; any number may run concurrently.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use crate::catalogue::Skill;
use crate::error::{Result, ServerError};

/// Outcome of one child-process execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// `exit_code == 0` and the timeout did not fire.
    pub success: bool,
    /// The child's exit code, `-1` if killed by a signal.
    pub exit_code: i32,
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
    /// Wall-clock duration of the execution.
    pub elapsed_ms: u64,
    /// Whether the wall-clock timeout fired.
    pub timed_out: bool,
}

/// Runs skills as child processes.
pub struct SkillExecutor {
    timeout: Duration,
    python: String,
    dispatcher: Option<PathBuf>,
}

impl SkillExecutor {
    #[must_use]
    pub fn new(timeout_ms: u64, python: impl Into<String>, dispatcher: Option<PathBuf>) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            python: python.into(),
            dispatcher,
        }
    }

    /// Execute a skill with the given input.
    ///
    /// Entry resolution order: the configured dispatcher script, then
    /// `scripts/run.<ext>` for a known interpreter, then `scripts/run.sh`.
    /// A skill with no entry script at all degenerates to returning its
    /// instructions with success status, which keeps bring-up deployments
    /// observable end to end.
    pub async fn execute(&self, skill: &Skill, input: &str) -> Result<ExecutionResult> {
        let Some((program, args)) = self.resolve_entry(skill) else {
            tracing::info!(skill = %skill.name, "no entry script, returning instructions");
            let instructions = skill.instructions().await?.to_owned();
            return Ok(ExecutionResult {
                success: true,
                exit_code: 0,
                stdout: instructions,
                stderr: String::new(),
                elapsed_ms: 0,
                timed_out: false,
            });
        };

        tracing::debug!(
            skill = %skill.name,
            program = %program,
            cwd = %skill.base_dir.display(),
            "executing skill"
        );
        self.run_child(&program, &args, skill, input).await
    }

    /// Pick the entry command for a skill, if one exists on disk.
    fn resolve_entry(&self, skill: &Skill) -> Option<(String, Vec<String>)> {
        if let Some(dispatcher) = &self.dispatcher {
            if dispatcher.exists() {
                return Some((dispatcher.display().to_string(), Vec::new()));
            }
            tracing::warn!(dispatcher = %dispatcher.display(), "configured dispatcher not found");
        }

        let scripts = skill.base_dir.join("scripts");
        for (ext, interpreter) in [
            ("py", self.python.as_str()),
            ("js", "node"),
            ("sh", "bash"),
            ("bash", "bash"),
        ] {
            let script = scripts.join(format!("run.{ext}"));
            if script.exists() {
                return Some((
                    interpreter.to_owned(),
                    vec![script.display().to_string()],
                ));
            }
        }

        None
    }

    async fn run_child(
        &self,
        program: &str,
        args: &[String],
        skill: &Skill,
        input: &str,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(&skill.base_dir)
            .env("SKILLSCALE_INTENT", input)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| ServerError::SpawnFailed {
            program: program.to_owned(),
            source: e,
        })?;
        let pid = child.id();

        // Feed stdin while draining stdout/stderr, otherwise a child that
        // fills its output pipe before reading its input deadlocks against
        // the write. Closing stdin afterwards gives the child EOF; a child
        // that never reads stdin may already have exited, which is fine.
        let stdin = child.stdin.take();
        let input_bytes = input.as_bytes().to_vec();
        let run = async move {
            let feed = async {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(&input_bytes).await {
                        tracing::debug!(error = %e, "child closed stdin early");
                    }
                }
            };
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::info!(
                    skill = %skill.name,
                    exit_code,
                    elapsed_ms,
                    "skill execution finished"
                );
                Ok(ExecutionResult {
                    success: exit_code == 0,
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    elapsed_ms,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(ServerError::Io(e)),
            Err(_) => {
                // The future owning the child was dropped by the timeout, so
                // the immediate child gets SIGKILL; the group kill catches
                // anything it spawned.
                kill_process_group(pid);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::warn!(
                    skill = %skill.name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "skill execution timed out, process group killed"
                );
                Ok(ExecutionResult {
                    success: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!(
                        "execution timed out after {}ms",
                        self.timeout.as_millis()
                    ),
                    elapsed_ms,
                    timed_out: true,
                })
            }
        }
    }
}

/// SIGKILL the child's whole process group.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child was made its own group leader, so -pid addresses the
        // group, including any intermediate shell's descendants.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Catalogue;
    use std::path::Path;
    use std::time::Instant;

    /// Build a one-skill catalogue whose entry is `scripts/run.sh` with the
    /// given body, and return the skill.
    fn skill_with_script(tmp: &Path, name: &str, script_body: &str) -> std::sync::Arc<Skill> {
        let dir = tmp.join(name);
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: test skill\n---\nFallback instructions.\n"),
        )
        .unwrap();
        std::fs::write(dir.join("scripts/run.sh"), script_body).unwrap();
        let catalogue = Catalogue::load(tmp).unwrap();
        catalogue.get(name).unwrap()
    }

    #[tokio::test]
    async fn echo_skill_reads_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = skill_with_script(tmp.path(), "echo", "#!/bin/bash\ncat\n");

        let executor = SkillExecutor::new(5_000, "python3", None);
        let result = executor.execute(&skill, "hello").await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn intent_env_var_is_set() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = skill_with_script(
            tmp.path(),
            "env-echo",
            "#!/bin/bash\nprintf '%s' \"$SKILLSCALE_INTENT\"\n",
        );

        let executor = SkillExecutor::new(5_000, "python3", None);
        let result = executor.execute(&skill, "from the env").await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "from the env");
    }

    #[tokio::test]
    async fn working_directory_is_base_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = skill_with_script(tmp.path(), "pwd", "#!/bin/bash\npwd\n");

        let executor = SkillExecutor::new(5_000, "python3", None);
        let result = executor.execute(&skill, "").await.unwrap();
        assert!(result.success);
        let reported = PathBuf::from(result.stdout.trim());
        // Compare canonicalized paths; tempdirs often traverse symlinks.
        assert_eq!(
            reported.canonicalize().unwrap(),
            skill.base_dir.canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn nonzero_exit_captures_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = skill_with_script(
            tmp.path(),
            "fail",
            "#!/bin/bash\necho 'went wrong' >&2\nexit 3\n",
        );

        let executor = SkillExecutor::new(5_000, "python3", None);
        let result = executor.execute(&skill, "").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr.contains("went wrong"));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn slow_child_is_killed_on_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = skill_with_script(tmp.path(), "slow", "#!/bin/bash\nsleep 5\n");

        let executor = SkillExecutor::new(500, "python3", None);
        let start = Instant::now();
        let result = executor.execute(&skill, "").await.unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
        assert!(result.stderr.contains("timed out"));
        // Killed within a small delta of the 500ms budget.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_entry_returns_instructions() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("docs-only");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            "---\nname: docs-only\ndescription: no scripts at all\n---\nJust the instructions.\n",
        )
        .unwrap();
        let catalogue = Catalogue::load(tmp.path()).unwrap();
        let skill = catalogue.get("docs-only").unwrap();

        let executor = SkillExecutor::new(5_000, "python3", None);
        let result = executor.execute(&skill, "ignored").await.unwrap();
        assert!(result.success);
        assert!(result.stdout.contains("Just the instructions."));
    }

    #[tokio::test]
    async fn concurrent_executions_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = skill_with_script(tmp.path(), "echo", "#!/bin/bash\ncat\n");

        let executor = std::sync::Arc::new(SkillExecutor::new(5_000, "python3", None));
        let mut handles = Vec::new();
        for i in 0..4 {
            let executor = std::sync::Arc::clone(&executor);
            let skill = std::sync::Arc::clone(&skill);
            handles.push(tokio::spawn(async move {
                executor.execute(&skill, &format!("input-{i}")).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap().unwrap();
            assert!(result.success);
            assert_eq!(result.stdout, format!("input-{i}"));
        }
    }
}
