//! Agent child processes: session creation and streamed turns.
//!
//! A turn is owned by a reader task that pushes decoded increments into a
//! bounded channel. Dropping the [`TurnHandle`] (or its receiver) stops the
//! task, which kills the child.

use std::{path::Path, process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
        process::{Child, ChildStderr, ChildStdout, Command},
        sync::mpsc,
        task::JoinHandle,
        time::Instant,
    },
    tracing::{debug, info, warn},
};

use {
    crate::{
        command::{CommandBuilder, Invocation},
        decode::{StreamJsonDecoder, TextDecoder},
        error::{RelayError, summarize_stderr},
    },
    relaygate_config::OutputFormat,
};

/// Capacity of the increment channel between reader task and consumer.
pub const TURN_CHANNEL_CAPACITY: usize = 64;

/// One item of a turn's output stream.
pub type TurnEvent = Result<String, RelayError>;

/// Something that can open agent sessions and run turns against them.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Ask the agent for a new session rooted at `workspace`; returns its id.
    async fn create_chat(&self, workspace: &Path, api_key: Option<&str>)
    -> Result<String, RelayError>;

    /// Start a turn. Spawn failures are returned directly; everything after
    /// that arrives through the handle.
    async fn start(&self, invocation: Invocation) -> Result<TurnHandle, RelayError>;
}

/// Receiving side of a running turn.
pub struct TurnHandle {
    rx: mpsc::Receiver<TurnEvent>,
    task: Option<JoinHandle<()>>,
}

impl TurnHandle {
    /// Wrap a receiver whose producer is `task`.
    pub fn new(rx: mpsc::Receiver<TurnEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Bounded channel pair for producers other than a child process.
    pub fn channel() -> (mpsc::Sender<TurnEvent>, Self) {
        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        (tx, Self::new(rx, None))
    }

    /// Next increment, an error, or `None` once the turn completed successfully.
    pub async fn next(&mut self) -> Option<TurnEvent> {
        self.rx.recv().await
    }

    /// Drain the turn into one string.
    pub async fn collect(mut self) -> Result<String, RelayError> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            text.push_str(&event?);
        }
        Ok(text)
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Runs the real agent binary.
#[derive(Debug, Clone)]
pub struct AgentRelay {
    builder: CommandBuilder,
}

impl AgentRelay {
    pub fn new(builder: CommandBuilder) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    fn command(&self, args: &[String], cwd: &Path) -> Command {
        let mut cmd = Command::new(self.builder.binary());
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, mut cmd: Command) -> Result<Child, RelayError> {
        cmd.spawn().map_err(|source| RelayError::Spawn {
            binary: self.builder.binary().to_string(),
            source,
        })
    }
}

#[async_trait]
impl AgentBackend for AgentRelay {
    async fn create_chat(
        &self,
        workspace: &Path,
        api_key: Option<&str>,
    ) -> Result<String, RelayError> {
        let config = self.builder.config();
        let timeout = config.create_timeout();
        let args = self.builder.create_chat_args(workspace, api_key);
        debug!(workspace = %workspace.display(), timeout_secs = timeout.as_secs(), "create-chat");

        let child = self.spawn(self.command(&args, workspace))?;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RelayError::Stream(e)),
            Err(_) => {
                warn!(workspace = %workspace.display(), "create-chat timeout");
                return Err(RelayError::Timeout {
                    secs: timeout.as_secs(),
                });
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Execution {
                code: output.status.code(),
                stderr: summarize_stderr(&stderr),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let session_id = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .ok_or(RelayError::MissingSessionId)?
            .to_string();
        info!(session_id = %session_id, "agent session created");
        Ok(session_id)
    }

    async fn start(&self, invocation: Invocation) -> Result<TurnHandle, RelayError> {
        let config = self.builder.config();
        let args = self.builder.turn_args(&invocation)?;
        let mut child = self.spawn(self.command(&args, &invocation.workspace))?;
        info!(
            session_id = %invocation.session_id,
            mode = invocation.mode.as_str(),
            model = %invocation.model,
            pid = child.id(),
            "agent turn started"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        let turn = ReaderTask {
            child,
            format: config.output_format,
            deadline: Instant::now() + config.turn_timeout(),
            timeout: config.turn_timeout(),
            max_stderr_bytes: config.max_stderr_bytes,
            session_id: invocation.session_id,
            tx,
        };
        let task = tokio::spawn(turn.run(stdout, stderr));
        Ok(TurnHandle::new(rx, Some(task)))
    }
}

// ── Reader task ─────────────────────────────────────────────────────────

enum PumpEnd {
    /// The agent reported the end of the turn, or stdout closed.
    Done,
    /// The consumer went away.
    ConsumerGone,
}

struct ReaderTask {
    child: Child,
    format: OutputFormat,
    deadline: Instant,
    timeout: Duration,
    max_stderr_bytes: usize,
    session_id: String,
    tx: mpsc::Sender<TurnEvent>,
}

impl ReaderTask {
    async fn run(mut self, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
        let stderr_task = stderr.map(|s| tokio::spawn(drain_capped(s, self.max_stderr_bytes)));

        let pumped = match stdout {
            Some(stdout) => {
                let tx = &self.tx;
                let pump = async {
                    match self.format {
                        OutputFormat::StreamJson => pump_stream_json(stdout, tx).await,
                        OutputFormat::Text => pump_text(stdout, tx).await,
                    }
                };
                tokio::select! {
                    r = pump => Some(r),
                    _ = tx.closed() => Some(Ok(PumpEnd::ConsumerGone)),
                    _ = tokio::time::sleep_until(self.deadline) => None,
                }
            },
            None => Some(Ok(PumpEnd::Done)),
        };

        match pumped {
            None => return self.fail_timeout().await,
            Some(Ok(PumpEnd::ConsumerGone)) => {
                debug!(session_id = %self.session_id, "consumer gone, killing agent");
                self.kill().await;
                return;
            },
            Some(Err(e)) => {
                self.kill().await;
                let _ = self.tx.send(Err(RelayError::Stream(e))).await;
                return;
            },
            Some(Ok(PumpEnd::Done)) => {},
        }

        let status = match tokio::time::timeout_at(self.deadline, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = self.tx.send(Err(RelayError::Stream(e))).await;
                return;
            },
            Err(_) => return self.fail_timeout().await,
        };

        if status.success() {
            debug!(session_id = %self.session_id, "agent turn finished");
            return;
        }
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        warn!(
            session_id = %self.session_id,
            code = status.code(),
            stderr = %summarize_stderr(&stderr),
            "agent exited with failure"
        );
        let _ = self
            .tx
            .send(Err(RelayError::Execution {
                code: status.code(),
                stderr: summarize_stderr(&stderr),
            }))
            .await;
    }

    async fn fail_timeout(mut self) {
        warn!(session_id = %self.session_id, timeout_secs = self.timeout.as_secs(), "agent turn timeout");
        self.kill().await;
        let _ = self
            .tx
            .send(Err(RelayError::Timeout {
                secs: self.timeout.as_secs(),
            }))
            .await;
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "agent already exited");
        }
    }
}

/// Forward increments; `Err(())` means the receiver is gone.
async fn forward(tx: &mpsc::Sender<TurnEvent>, increments: Vec<String>) -> Result<(), ()> {
    for text in increments {
        if text.is_empty() {
            continue;
        }
        tx.send(Ok(text)).await.map_err(|_| ())?;
    }
    Ok(())
}

async fn pump_stream_json(
    stdout: ChildStdout,
    tx: &mpsc::Sender<TurnEvent>,
) -> std::io::Result<PumpEnd> {
    let mut reader = BufReader::new(stdout);
    let mut decoder = StreamJsonDecoder::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(PumpEnd::Done);
        }
        let line = String::from_utf8_lossy(&buf);
        let decoded = decoder.decode_line(&line);
        if forward(tx, decoded.increments).await.is_err() {
            return Ok(PumpEnd::ConsumerGone);
        }
        if decoded.finished {
            return Ok(PumpEnd::Done);
        }
    }
}

async fn pump_text(stdout: ChildStdout, tx: &mpsc::Sender<TurnEvent>) -> std::io::Result<PumpEnd> {
    let mut reader = stdout;
    let mut decoder = TextDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        let text = if n == 0 {
            decoder.finish()
        } else {
            decoder.feed(&buf[..n])
        };
        if forward(tx, text.into_iter().collect()).await.is_err() {
            return Ok(PumpEnd::ConsumerGone);
        }
        if n == 0 {
            return Ok(PumpEnd::Done);
        }
    }
}

/// Read `reader` to the end, keeping at most `max` bytes.
async fn drain_capped<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> String {
    let mut kept = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = max.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            },
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use {
        super::*,
        crate::{command::InvocationMode, upload::ContentSpiller},
        relaygate_common::ChatMessage,
        relaygate_config::AgentConfig,
        std::{os::unix::fs::PermissionsExt, path::PathBuf},
    };

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-agent");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn relay(binary: &Path, config: AgentConfig) -> AgentRelay {
        let config = AgentConfig {
            binary: binary.display().to_string(),
            ..config
        };
        AgentRelay::new(CommandBuilder::new(
            config,
            ContentSpiller::new(std::env::temp_dir(), 4000),
        ))
    }

    fn invocation(workspace: &Path) -> Invocation {
        Invocation {
            mode: InvocationMode::New,
            model: "auto".into(),
            api_key: None,
            session_id: "sess-1".into(),
            workspace: workspace.to_path_buf(),
            messages: vec![ChatMessage::user("Hello!")],
        }
    }

    #[tokio::test]
    async fn streams_json_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","timestamp_ms":1,"message":{"content":[{"type":"text","text":"Hi "}]}}'
echo '{"type":"assistant","timestamp_ms":2,"message":{"content":[{"type":"text","text":"there."}]}}'
echo '{"type":"result","duration_ms":5}'"#,
        );
        let relay = relay(&script, AgentConfig::default());
        let handle = relay.start(invocation(dir.path())).await.unwrap();
        assert_eq!(handle.collect().await.unwrap(), "Hi there.");
    }

    #[tokio::test]
    async fn text_mode_passes_stdout_through() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "printf 'plain '; printf 'text'");
        let config = AgentConfig {
            output_format: OutputFormat::Text,
            ..AgentConfig::default()
        };
        let handle = relay(&script, config)
            .start(invocation(dir.path()))
            .await
            .unwrap();
        assert_eq!(handle.collect().await.unwrap(), "plain text");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'quota exceeded' >&2; exit 3");
        let handle = relay(&script, AgentConfig::default())
            .start(invocation(dir.path()))
            .await
            .unwrap();
        match handle.collect().await {
            Err(RelayError::Execution { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "quota exceeded");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay(Path::new("/nonexistent/cursor-agent"), AgentConfig::default());
        let err = relay.start(invocation(dir.path())).await.err().unwrap();
        assert!(matches!(err, RelayError::Spawn { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_agent() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exec sleep 30");
        let config = AgentConfig {
            turn_timeout_secs: 1,
            ..AgentConfig::default()
        };
        let started = std::time::Instant::now();
        let handle = relay(&script, config)
            .start(invocation(dir.path()))
            .await
            .unwrap();
        assert!(matches!(
            handle.collect().await,
            Err(RelayError::Timeout { secs: 1 })
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_handle_kills_agent() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("agent.pid");
        let script = write_script(
            dir.path(),
            &format!("echo $$ > '{}'; printf 'hello'; exec sleep 30", pid_file.display()),
        );
        let config = AgentConfig {
            output_format: OutputFormat::Text,
            ..AgentConfig::default()
        };
        let mut handle = relay(&script, config)
            .start(invocation(dir.path()))
            .await
            .unwrap();
        assert_eq!(handle.next().await.unwrap().unwrap(), "hello");
        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let status = PathBuf::from(format!("/proc/{pid}/status"));
        assert!(status.exists());

        drop(handle);

        // Killed children may linger as zombies until reaped.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let alive = std::fs::read_to_string(&status)
                .map(|s| !s.lines().any(|l| l.starts_with("State:") && l.contains('Z')))
                .unwrap_or(false);
            if !alive {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "agent {pid} still running");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn create_chat_returns_last_stdout_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'Creating chat...'; echo ' 0b6c-42 '");
        let relay = relay(&script, AgentConfig::default());
        let id = relay.create_chat(dir.path(), Some("k")).await.unwrap();
        assert_eq!(id, "0b6c-42");
    }

    #[tokio::test]
    async fn create_chat_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "true");
        let relay = relay(&script, AgentConfig::default());
        assert!(matches!(
            relay.create_chat(dir.path(), None).await,
            Err(RelayError::MissingSessionId)
        ));
    }
}
