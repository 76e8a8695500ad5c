use crate::domain::progress::{LineKind, ProgressEvent, ProgressParser, ProgressThrottle};
use crate::ports::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DIAGNOSTIC_LINES: usize = 50;
const DIAGNOSTIC_LINE_CHARS: usize = 500;
const DIAGNOSTIC_CHARS: usize = 4000;

enum Line {
    Stdout(String),
    Stderr(String),
}

/// ProcessRunner over `tokio::process`. Children are killed when the
/// timeout elapses or the run future is dropped.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    progress_interval: Duration,
}

impl TokioProcessRunner {
    pub fn new(progress_interval: Duration) -> Self {
        Self { progress_interval }
    }
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        debug!(program = %command.program, args = ?command.args, "spawning process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::channel::<Line>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone(), Line::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone(), Line::Stderr));
        }
        drop(tx);

        let deadline = Instant::now() + timeout;
        let mut collector = Collector::new(&command.program, self.progress_interval);

        let status = loop {
            tokio::select! {
                Some(line) = rx.recv() => collector.push(line),
                status = child.wait() => break status?,
                _ = tokio::time::sleep_until(deadline) => {
                    if let Err(e) = child.kill().await {
                        warn!(program = %command.program, "failed to kill timed out process: {}", e);
                    }
                    warn!(program = %command.program, timeout_secs = timeout.as_secs(), "process timed out");
                    return Err(ProcessError::TimedOut {
                        program: command.program.clone(),
                        timeout,
                    });
                }
            }
        };

        // Pick up whatever the readers still hold. A grandchild keeping the
        // pipes open must not stall us past the deadline.
        let drain = async {
            while let Some(line) = rx.recv().await {
                collector.push(line);
            }
        };
        if tokio::time::timeout_at(deadline, drain).await.is_err() {
            warn!(program = %command.program, "output pipes still open after exit");
        }

        Ok(collector.finish(status.code()))
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Line>, wrap: fn(String) -> Line)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("stopped reading process output: {}", e);
                break;
            }
        }
    }
}

struct Collector<'a> {
    program: &'a str,
    parser: ProgressParser,
    throttle: ProgressThrottle,
    stdout: Vec<String>,
    diagnostics: VecDeque<String>,
    progress: Vec<ProgressEvent>,
}

impl<'a> Collector<'a> {
    fn new(program: &'a str, interval: Duration) -> Self {
        Self {
            program,
            parser: ProgressParser::new(),
            throttle: ProgressThrottle::new(interval),
            stdout: Vec::new(),
            diagnostics: VecDeque::with_capacity(DIAGNOSTIC_LINES),
            progress: Vec::new(),
        }
    }

    fn push(&mut self, line: Line) {
        let (text, is_stderr) = match line {
            Line::Stdout(text) => (text, false),
            Line::Stderr(text) => (text, true),
        };

        match self.parser.feed(&text) {
            LineKind::Progress(Some(event)) => self.record(event),
            LineKind::Progress(None) => {}
            LineKind::Other if is_stderr => {
                if text.trim().is_empty() {
                    return;
                }
                if self.diagnostics.len() == DIAGNOSTIC_LINES {
                    self.diagnostics.pop_front();
                }
                self.diagnostics
                    .push_back(text.chars().take(DIAGNOSTIC_LINE_CHARS).collect());
            }
            LineKind::Other => self.stdout.push(text),
        }
    }

    fn record(&mut self, event: ProgressEvent) {
        self.progress.push(event);
        if self.throttle.ready(std::time::Instant::now()) {
            info!(
                program = self.program,
                position_secs = event.position,
                speed = event.speed,
                "progress"
            );
        }
    }

    fn finish(self, code: Option<i32>) -> ProcessOutput {
        if let Some(last) = self.progress.last() {
            info!(
                program = self.program,
                position_secs = last.position,
                speed = last.speed,
                "progress complete"
            );
        }
        let diagnostics = Vec::from(self.diagnostics).join("\n");
        ProcessOutput {
            code,
            stdout: self.stdout.join("\n"),
            diagnostics: tail_chars(&diagnostics, DIAGNOSTIC_CHARS),
            progress: self.progress,
        }
    }
}

/// Last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_stderr_tail() {
        let runner = TokioProcessRunner::default();
        let output = runner
            .run(&sh("echo hello; echo 'boom' >&2; exit 3"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.diagnostics, "boom");
    }

    #[tokio::test]
    async fn test_diagnostics_are_bounded() {
        let runner = TokioProcessRunner::default();
        let script = "i=0; while [ $i -lt 200 ]; do echo \"line $i $(printf '%0300d' 0)\" >&2; i=$((i+1)); done";
        let output = runner.run(&sh(script), Duration::from_secs(10)).await.unwrap();
        assert!(output.success());
        assert!(output.diagnostics.chars().count() <= DIAGNOSTIC_CHARS);
        assert!(output.diagnostics.contains("line 199"));
        assert!(!output.diagnostics.contains("line 0 "));
    }

    #[tokio::test]
    async fn test_parses_progress_blocks() {
        let runner = TokioProcessRunner::new(Duration::from_millis(0));
        let script = "printf 'out_time=00:00:01.500000\\nspeed=1.5x\\nprogress=continue\\nout_time=00:00:03.000000\\nspeed=2.0x\\nprogress=end\\n'";
        let output = runner.run(&sh(script), Duration::from_secs(10)).await.unwrap();
        assert_eq!(output.progress.len(), 2);
        assert_eq!(
            output.last_progress(),
            Some(ProgressEvent {
                position: 3.0,
                speed: Some(2.0)
            })
        );
        assert!(output.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_passes_explicit_environment() {
        let runner = TokioProcessRunner::default();
        let mut env = BTreeMap::new();
        env.insert("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string());
        let command = sh("echo \"devices=$CUDA_VISIBLE_DEVICES\"").envs(&env);
        let output = runner.run(&command, Duration::from_secs(10)).await.unwrap();
        assert_eq!(output.stdout, "devices=1");
    }

    #[tokio::test]
    async fn test_kills_on_timeout() {
        let runner = TokioProcessRunner::default();
        let started = std::time::Instant::now();
        let err = runner
            .run(&sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = TokioProcessRunner::default();
        let err = runner
            .run(
                &CommandSpec::new("/nonexistent/ffmpeg-binary"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }
}
