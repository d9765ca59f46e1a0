//! Sidecar-process call driver.
//!
//! The sidecar is started lazily on the first request and kept alive for
//! the life of the session. Requests are single JSON lines on its stdin:
//!
//! ```text
//! {"op":"join","chat":-100123}
//! {"op":"start_audio","source":"/cache/stream_-100123.raw"}
//! {"op":"pause","paused":true}
//! ```
//!
//! and every request is answered by one line `{"ok":true}` or
//! `{"ok":false,"error":"GROUPCALL_INVALID"}` on stdout. Between replies the
//! sidecar may also push `{"event":"stream_end"}` when the media finishes by
//! itself; those lines are forwarded to the stream-end channel instead of
//! being taken as a reply.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    process::Stdio,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::audio::call::{CallDriver, StreamEndSender};
use crate::types::ChatId;

/// Program and arguments used to launch the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BridgeCommand {
    /// Splits a command line on whitespace. Returns `None` when empty.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Join { chat: i64 },
    StartAudio { source: &'a str },
    StartVideo { source: &'a str },
    Pause { paused: bool },
    StopMedia,
    Leave,
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Unsolicited lines from the sidecar.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    StreamEnd,
}

struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::UnboundedReceiver<String>,
    reader: JoinHandle<()>,
}

pub struct BridgeDriver {
    chat: ChatId,
    command: BridgeCommand,
    request_timeout: Duration,
    process: Mutex<Option<BridgeProcess>>,
    connected: AtomicBool,
    stream_end: Option<StreamEndSender>,
}

impl BridgeDriver {
    pub fn new(chat: ChatId, command: BridgeCommand, request_timeout: Duration) -> Self {
        Self {
            chat,
            command,
            request_timeout,
            process: Mutex::new(None),
            connected: AtomicBool::new(false),
            stream_end: None,
        }
    }

    /// Forwards the sidecar's `stream_end` events as this driver's chat id.
    pub fn with_stream_end(mut self, sender: StreamEndSender) -> Self {
        self.stream_end = Some(sender);
        self
    }

    fn spawn(&self) -> anyhow::Result<BridgeProcess> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .env("TGVC_CHAT_ID", self.chat.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("no se pudo iniciar el bridge '{}'", self.command.program))?;

        let stdin = child.stdin.take().context("bridge sin stdin")?;
        let stdout = child.stdout.take().context("bridge sin stdout")?;
        info!("🌉 Bridge iniciado para chat {} (pid {:?})", self.chat, child.id());

        let (reply_tx, replies) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_bridge_output(
            self.chat,
            BufReader::new(stdout),
            reply_tx,
            self.stream_end.clone(),
        ));

        Ok(BridgeProcess {
            child,
            stdin,
            replies,
            reader,
        })
    }

    async fn request(&self, request: BridgeRequest<'_>) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut guard = self.process.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let Some(process) = guard.as_mut() else {
            bail!("bridge no disponible");
        };

        let exchange = async {
            process.stdin.write_all(line.as_bytes()).await?;
            process.stdin.flush().await?;

            match process.replies.recv().await {
                Some(reply) => Ok::<_, anyhow::Error>(reply),
                None => bail!("el bridge cerró su salida"),
            }
        };

        let outcome = tokio::time::timeout(self.request_timeout, exchange).await;
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                // Proceso roto: se descarta y se relanza en la próxima petición.
                self.discard(&mut guard).await;
                return Err(e);
            }
            Err(_) => {
                self.discard(&mut guard).await;
                bail!(
                    "el bridge no respondió en {}",
                    humantime::format_duration(self.request_timeout)
                );
            }
        };

        debug!("Bridge chat {} <- {}", self.chat, reply.trim_end());
        let reply: BridgeReply = serde_json::from_str(reply.trim())
            .with_context(|| format!("respuesta inválida del bridge: {}", reply.trim()))?;
        if reply.ok {
            Ok(())
        } else {
            Err(anyhow!(reply.error.unwrap_or_else(|| "error desconocido del bridge".into())))
        }
    }

    async fn discard(&self, guard: &mut Option<BridgeProcess>) {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(mut process) = guard.take() {
            process.reader.abort();
            if let Err(e) = process.child.kill().await {
                debug!("No se pudo matar el bridge del chat {}: {}", self.chat, e);
            }
            warn!("⚠️ Bridge del chat {} descartado", self.chat);
        }
    }
}

/// Splits the sidecar's stdout into replies and events until it closes.
async fn read_bridge_output(
    chat: ChatId,
    stdout: BufReader<ChildStdout>,
    replies: mpsc::UnboundedSender<String>,
    stream_end: Option<StreamEndSender>,
) {
    let mut lines = stdout.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Lectura del bridge del chat {} falló: {}", chat, e);
                break;
            }
        };

        match serde_json::from_str::<BridgeEvent>(line.trim()) {
            Ok(BridgeEvent::StreamEnd) => {
                debug!("Bridge chat {} <- fin de stream", chat);
                if let Some(sender) = &stream_end {
                    let _ = sender.send(chat);
                }
            }
            Err(_) => {
                if replies.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl CallDriver for BridgeDriver {
    async fn join(&self, chat: ChatId) -> anyhow::Result<()> {
        self.request(BridgeRequest::Join { chat: chat.0 }).await?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn start_audio(&self, source: &str) -> anyhow::Result<()> {
        self.request(BridgeRequest::StartAudio { source }).await
    }

    async fn start_video(&self, source: &str) -> anyhow::Result<()> {
        self.request(BridgeRequest::StartVideo { source }).await
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.request(BridgeRequest::Pause { paused }).await
    }

    async fn stop_media(&self) -> anyhow::Result<()> {
        self.request(BridgeRequest::StopMedia).await
    }

    async fn leave(&self) -> anyhow::Result<()> {
        let result = self.request(BridgeRequest::Leave).await;
        let mut guard = self.process.lock().await;
        self.discard(&mut guard).await;
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let join = serde_json::to_string(&BridgeRequest::Join { chat: -5 }).unwrap();
        assert_eq!(join, r#"{"op":"join","chat":-5}"#);

        let start = serde_json::to_string(&BridgeRequest::StartAudio { source: "/c/s.raw" }).unwrap();
        assert_eq!(start, r#"{"op":"start_audio","source":"/c/s.raw"}"#);

        let stop = serde_json::to_string(&BridgeRequest::StopMedia).unwrap();
        assert_eq!(stop, r#"{"op":"stop_media"}"#);
    }

    #[test]
    fn test_bridge_command_parse() {
        let cmd = BridgeCommand::parse("  python3 bridge.py --verbose ").unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["bridge.py", "--verbose"]);
        assert_eq!(BridgeCommand::parse("   "), None);
    }

    #[test]
    fn test_reply_error_is_optional() {
        let ok: BridgeReply = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(ok.ok && ok.error.is_none());
        let err: BridgeReply = serde_json::from_str(r#"{"ok":false,"error":"x"}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("x"));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> BridgeCommand {
        BridgeCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_roundtrip_with_echo_sidecar() {
        let driver = BridgeDriver::new(
            ChatId(9),
            sh(r#"while read line; do echo '{"ok":true}'; done"#),
            Duration::from_secs(5),
        );

        driver.join(ChatId(9)).await.unwrap();
        assert!(driver.is_connected());
        driver.start_audio("/tmp/a.raw").await.unwrap();
        driver.leave().await.unwrap();
        assert!(!driver.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_error_reply_is_surfaced() {
        let driver = BridgeDriver::new(
            ChatId(9),
            sh(r#"while read line; do echo '{"ok":false,"error":"GROUPCALL_INVALID"}'; done"#),
            Duration::from_secs(5),
        );

        let err = driver.join(ChatId(9)).await.unwrap_err();
        assert_eq!(err.to_string(), "GROUPCALL_INVALID");
        assert!(!driver.is_connected());
    }

    #[test]
    fn test_event_lines_are_not_replies() {
        assert!(matches!(
            serde_json::from_str::<BridgeEvent>(r#"{"event":"stream_end"}"#),
            Ok(BridgeEvent::StreamEnd)
        ));
        assert!(serde_json::from_str::<BridgeEvent>(r#"{"ok":true}"#).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_end_event_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = BridgeDriver::new(
            ChatId(9),
            sh(r#"while read line; do
                case "$line" in
                  *start_audio*) echo '{"event":"stream_end"}'; echo '{"ok":true}' ;;
                  *) echo '{"ok":true}' ;;
                esac
              done"#),
            Duration::from_secs(5),
        )
        .with_stream_end(tx);

        driver.join(ChatId(9)).await.unwrap();
        driver.start_audio("/tmp/a.raw").await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(ended, Some(ChatId(9)));

        // El evento no se confundió con la respuesta de la siguiente petición
        driver.set_pause(true).await.unwrap();
        assert!(rx.try_recv().is_err());
        driver.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let driver = BridgeDriver::new(
            ChatId(1),
            BridgeCommand {
                program: "/nonexistent/bridge".into(),
                args: vec![],
            },
            Duration::from_secs(1),
        );
        assert!(driver.join(ChatId(1)).await.is_err());
    }
}
