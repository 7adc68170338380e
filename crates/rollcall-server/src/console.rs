//! Line-oriented console adapter.
//!
//! Reads one JSON [`Inbound`] per line and writes every outgoing message as
//! a JSON line `{"to": <actor>, "text": "..."}`. Stands in for a chat
//! platform when running locally.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rollcall_core::{ActorId, DeliveryError, Messenger};

use crate::action::Inbound;
use crate::error::ServerError;
use crate::worker::WorkerPool;

#[derive(Serialize)]
struct OutboundLine<'a> {
    to: ActorId,
    text: &'a str,
}

pub struct ConsoleMessenger<W> {
    out: Mutex<W>,
}

impl ConsoleMessenger<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleMessenger<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Messenger for ConsoleMessenger<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_message(&self, recipient: ActorId, text: &str) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_string(&OutboundLine { to: recipient, text })
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        out.flush().await.map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

/// Feed console lines to the worker pool until input ends or `shutdown`
/// fires. Malformed lines are logged and skipped. Returns how many actions
/// were queued.
pub async fn run_console<R>(
    input: R,
    pool: &WorkerPool,
    shutdown: CancellationToken,
) -> Result<usize, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut queued = 0;
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!(queued, "console input closed");
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match Inbound::parse(trimmed) {
            Ok(inbound) => {
                pool.submit(inbound).await?;
                queued += 1;
            }
            Err(e) => warn!(error = %e, "skipping console line"),
        }
    }
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{event, harness, ADMIN};
    use crate::worker::ServerConfig;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn messenger_writes_json_lines() {
        let messenger = ConsoleMessenger::new(Vec::new());
        messenger.send_message(ActorId::new(7), "hi \"there\"").await.unwrap();
        messenger.send_message(ActorId::new(8), "two\nlines").await.unwrap();

        let written = String::from_utf8(messenger.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["to"], 7);
        assert_eq!(lines[0]["text"], "hi \"there\"");
        assert_eq!(lines[1]["text"], "two\nlines");
    }

    #[tokio::test]
    async fn console_lines_become_actions() {
        let h = harness();
        let id = event(&h, 2);
        let pool = WorkerPool::start(
            h.orchestrator.clone(),
            &ServerConfig::default(),
            CancellationToken::new(),
        );

        let register = format!(
            r#"{{"actor":5,"name":"Ann","action":{{"type":"register","event_id":{id}}}}}"#
        );
        let participants =
            format!(r#"{{"actor":{ADMIN},"action":{{"type":"participants","event_id":{id}}}}}"#);
        let input = format!("{register}\ngarbage\n\n{participants}\n");
        let queued = run_console(BufReader::new(input.as_bytes()), &pool, CancellationToken::new())
            .await
            .unwrap();
        pool.drain().await;

        assert_eq!(queued, 2);
        assert_eq!(
            h.messenger.sent_to(ActorId::new(5)),
            vec![format!("You are registered for event #{id}.")]
        );
        assert_eq!(
            h.messenger.sent_to(ADMIN),
            vec![format!("Participants of event #{id} (1):\n1. Ann")]
        );
    }
}
