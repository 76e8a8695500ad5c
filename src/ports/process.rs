use crate::domain::progress::ProgressEvent;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// A structured external command. Arguments are passed as-is, never
/// through a shell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child, on top of the inherited one.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Outcome of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Non-progress stdout lines.
    pub stdout: String,
    /// Bounded tail of stderr.
    pub diagnostics: String,
    pub progress: Vec<ProgressEvent>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn last_progress(&self) -> Option<ProgressEvent> {
        self.progress.last().copied()
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} did not finish within {}s and was killed", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("process i/o: {0}")]
    Io(#[from] io::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` to completion, killing it once `timeout` elapses.
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError>;
}
