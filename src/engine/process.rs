use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::mpsc,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use nix::{
    sys::signal::{kill, killpg, Signal},
    unistd::Pid,
};

use crate::{
    bridge::ApprovalGate,
    engine::{receiver_stream, EngineEvent, EngineStream, TaskEngine, TaskOutcome, TaskRequest},
    error::{BridgeError, Result},
    protocol::{BridgeToEngine, EngineToBridge, PROTOCOL_VERSION},
};

const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Runs each task in a fresh adapter process that speaks the JSON-lines
/// protocol in [`crate::protocol`] on its stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
    kill_grace: Duration,
}

impl ProcessEngine {
    pub fn new(command: &str, extra_args: &[String]) -> Result<Self> {
        let mut parts = shlex::split(command)
            .ok_or_else(|| BridgeError::engine(format!("invalid engine command '{command}'")))?;
        if parts.is_empty() {
            return Err(BridgeError::engine("engine command is empty"));
        }
        let program = parts.remove(0);
        parts.extend(extra_args.iter().cloned());
        Ok(Self {
            program,
            args: parts,
            kill_grace: DEFAULT_KILL_GRACE,
        })
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl TaskEngine for ProcessEngine {
    async fn start(&self, request: TaskRequest) -> Result<EngineStream> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&request.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // Own process group so a stop reaches the agent's children too.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|error| BridgeError::engine(format!("failed to spawn {}: {error}", self.program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::engine("engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::engine("engine stdout unavailable"))?;

        tracing::info!(
            target = "relay_bridge::engine",
            program = %self.program,
            pid = ?child.id(),
            cwd = %request.working_directory.display(),
            resumed = request.continuation_token.is_some(),
            "engine process started"
        );

        let (frame_tx, frame_rx) = mpsc::channel::<BridgeToEngine>(64);
        tokio::spawn(write_frames(stdin, frame_rx));
        frame_tx
            .send(BridgeToEngine::StartTask {
                protocol_version: PROTOCOL_VERSION,
                prompt: request.prompt,
                working_directory: request.working_directory.display().to_string(),
                continuation_token: request.continuation_token,
            })
            .await
            .map_err(|_| BridgeError::engine("engine stdin closed before start"))?;

        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(64);
        tokio::spawn(drive_engine(
            child,
            stdout,
            frame_tx,
            event_tx,
            request.gate,
            request.cancel,
            self.kill_grace,
        ));

        Ok(receiver_stream(event_rx))
    }
}

async fn write_frames(mut stdin: ChildStdin, mut rx: mpsc::Receiver<BridgeToEngine>) {
    while let Some(frame) = rx.recv().await {
        let line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(target = "relay_bridge::engine", error = %error, "failed to encode engine frame");
                continue;
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(error) = written {
            tracing::debug!(target = "relay_bridge::engine", error = %error, "engine stdin closed");
            break;
        }
    }
}

async fn drive_engine(
    mut child: Child,
    stdout: ChildStdout,
    frames: mpsc::Sender<BridgeToEngine>,
    events: mpsc::Sender<EngineEvent>,
    gate: ApprovalGate,
    cancel: CancellationToken,
    kill_grace: Duration,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut finished = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = frames.try_send(BridgeToEngine::Cancel {});
                terminate_child(&mut child, kill_grace).await;
                tracing::info!(target = "relay_bridge::engine", conversation = %gate.conversation(), "engine cancelled");
                return;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(target = "relay_bridge::engine", error = %error, "engine stdout read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let frame = match EngineToBridge::parse(&line) {
                    Ok(frame) => frame,
                    Err(error) => {
                        tracing::warn!(target = "relay_bridge::engine", error = %error, raw = %line, "ignoring engine line");
                        continue;
                    }
                };

                if let EngineToBridge::ApprovalRequest { request_id, action_kind, detail } = frame {
                    // Each request gets its own task: several may be pending at once.
                    let gate = gate.clone();
                    let frames = frames.clone();
                    tokio::spawn(async move {
                        let verdict = gate.request(&action_kind, detail).await;
                        let response = BridgeToEngine::approval_response(request_id, &verdict);
                        if frames.send(response).await.is_err() {
                            tracing::debug!(target = "relay_bridge::engine", kind = %action_kind, "engine gone before verdict");
                        }
                    });
                    continue;
                }

                if let Some(event) = frame.into_event() {
                    let terminal = matches!(event, EngineEvent::Result(_));
                    if events.send(event).await.is_err() {
                        terminate_child(&mut child, kill_grace).await;
                        return;
                    }
                    if terminal {
                        finished = true;
                        break;
                    }
                }
            }
        }
    }

    drop(frames);
    let status = match timeout(kill_grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(error)) => {
            tracing::warn!(target = "relay_bridge::engine", error = %error, "failed waiting for engine");
            None
        }
        Err(_) => {
            terminate_child(&mut child, kill_grace).await;
            None
        }
    };

    if !finished {
        let detail = status
            .map(|s| format!("engine exited ({s}) without a result"))
            .unwrap_or_else(|| "engine stopped without a result".to_string());
        let _ = events.send(EngineEvent::Result(TaskOutcome::failure(detail))).await;
    }
}

/// SIGTERM the engine's process group, then SIGKILL if it outlives the grace period.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = Pid::from_raw(pid as i32);
            // Children not started by us may not lead a group.
            if killpg(pid, Signal::SIGTERM).is_err() {
                let _ = kill(pid, Signal::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if timeout(grace, child.wait()).await.is_err() {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
        let _ = child.kill().await;
    }
}
