//! Command-backed lifecycle provider
//!
//! Each lifecycle operation of a target kind is an argv vector from the
//! configuration. Placeholders are substituted per target:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{target}` | target id |
//! | `{version}` | version reference |
//! | `{<var>}` | entry `<var>` of the target's `vars` |
//!
//! A non-zero exit fails the operation. The health command's exit status
//! decides readiness and a leading integer on its stdout is read as the
//! peer count.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use forkswap_core::config::{CommandSet, SwapConfig};
use forkswap_core::error::{ConfigError, LifecycleError};
use forkswap_core::lifecycle::{HealthStatus, LifecycleProvider, LifecycleSet};
use forkswap_core::types::{SwapTarget, VersionRef};
use tokio::process::Command;

/// Output of a finished command
struct Finished {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Lifecycle provider running configured commands
#[derive(Debug, Clone)]
pub struct CommandLifecycle {
    commands: CommandSet,
}

impl CommandLifecycle {
    /// Create a provider from a command set
    #[must_use]
    pub fn new(commands: CommandSet) -> Self {
        Self { commands }
    }

    /// Build providers for every kind that has targets
    ///
    /// # Errors
    /// Returns `ConfigError::MissingLifecycle` for a kind in use without a
    /// command set.
    pub fn set_from_config(config: &SwapConfig) -> Result<LifecycleSet, ConfigError> {
        let mut set = LifecycleSet::new();
        for kind in config.kinds_in_use() {
            let commands = config
                .lifecycle_for(kind)
                .ok_or(ConfigError::MissingLifecycle(kind))?;
            set.register(kind, Arc::new(Self::new(commands.clone())));
        }
        Ok(set)
    }

    fn timeout(&self) -> Option<Duration> {
        self.commands.timeout_secs.map(Duration::from_secs)
    }

    async fn run(
        &self,
        operation: &'static str,
        argv: &[String],
        target: &SwapTarget,
        version: &VersionRef,
    ) -> Result<Finished, LifecycleError> {
        let argv: Vec<String> = argv.iter().map(|arg| substitute(arg, target, version)).collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(LifecycleError::new(operation, "empty command"));
        };
        tracing::debug!(target = %target.id, operation, command = ?argv, "running lifecycle command");

        let mut command = Command::new(program);
        command
            .args(args)
            .env("FORKSWAP_TARGET", target.id.as_str())
            .env("FORKSWAP_VERSION", &version.0)
            .env("FORKSWAP_KIND", target.kind.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| LifecycleError::new(operation, format!("{program} timed out after {}s", limit.as_secs())))?,
            None => command.output().await,
        }
        .map_err(|e| LifecycleError::new(operation, format!("cannot spawn {program}: {e}")))?;

        Ok(Finished {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(
        &self,
        operation: &'static str,
        argv: &[String],
        target: &SwapTarget,
        version: &VersionRef,
    ) -> Result<(), LifecycleError> {
        let finished = self.run(operation, argv, target, version).await?;
        if finished.success {
            return Ok(());
        }
        let detail = finished
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        let status = finished
            .code
            .map_or_else(|| "killed by signal".to_string(), |c| format!("exit status {c}"));
        Err(LifecycleError::new(
            operation,
            if detail.is_empty() { status } else { format!("{status}: {detail}") },
        ))
    }
}

#[async_trait::async_trait]
impl LifecycleProvider for CommandLifecycle {
    async fn stop(&self, target: &SwapTarget) -> Result<(), LifecycleError> {
        self.run_checked("stop", &self.commands.stop, target, &target.version).await
    }

    async fn reinitialize(&self, target: &SwapTarget) -> Result<(), LifecycleError> {
        match &self.commands.reinitialize {
            Some(argv) => self.run_checked("reinitialize", argv, target, &target.version).await,
            None => {
                tracing::debug!(target = %target.id, "no reinitialize command; skipping");
                Ok(())
            }
        }
    }

    async fn start(&self, target: &SwapTarget, version: &VersionRef) -> Result<(), LifecycleError> {
        self.run_checked("start", &self.commands.start, target, version).await
    }

    async fn health_check(&self, target: &SwapTarget) -> Result<HealthStatus, LifecycleError> {
        let Some(argv) = &self.commands.health else {
            return Ok(HealthStatus::Ready { peers: None });
        };
        let finished = self.run("health", argv, target, &target.version).await?;
        if !finished.success {
            return Ok(HealthStatus::NotReady);
        }
        Ok(HealthStatus::Ready {
            peers: leading_integer(&finished.stdout),
        })
    }
}

/// Replace `{target}`, `{version}` and `{<var>}` placeholders
///
/// Single left-to-right pass: substituted text is never scanned again and
/// unknown placeholders are kept as written.
fn substitute(arg: &str, target: &SwapTarget, version: &VersionRef) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            rest = &rest[open..];
            break;
        };
        let key = &after[..close];
        match placeholder(key, target, version) {
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn placeholder<'a>(key: &str, target: &'a SwapTarget, version: &'a VersionRef) -> Option<&'a str> {
    match key {
        "target" => Some(target.id.as_str()),
        "version" => Some(version.0.as_str()),
        var => target.vars.get(var).map(String::as_str),
    }
}

fn leading_integer(stdout: &str) -> Option<u32> {
    let trimmed = stdout.trim_start();
    let end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}
