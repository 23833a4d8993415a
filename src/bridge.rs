//! Session collaborator backed by a child process speaking newline-delimited
//! JSON over stdio.
//!
//! Outgoing lines are the request object plus an `@extra` field carrying the
//! request id. Incoming lines are result objects or push events; `@extra`
//! is echoed on results and absent on push events.

use crate::session::{SessionClient, SessionClientFactory, SessionError};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tgcore::api::{PUSH_EVENT_ID, Payload, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};

const EXTRA: &str = "@extra";

pub fn encode_request(request_id: u64, request: &Request) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(request)?;
    if let Value::Object(map) = &mut value {
        map.insert(EXTRA.to_string(), Value::from(request_id));
    }
    serde_json::to_string(&value)
}

/// Decode one incoming line. Objects without an `@type` carry no payload.
pub fn decode_line(line: &str) -> Result<Response, serde_json::Error> {
    let mut value: Value = serde_json::from_str(line)?;
    let request_id = value
        .as_object_mut()
        .and_then(|map| map.remove(EXTRA))
        .and_then(|extra| extra.as_u64())
        .unwrap_or(PUSH_EVENT_ID);

    let has_type = value.get("@type").is_some();
    let payload = if has_type {
        Some(serde_json::from_value::<Payload>(value)?)
    } else {
        None
    };
    Ok(Response {
        request_id,
        payload,
    })
}

pub struct JsonBridgeClient {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: Mutex<mpsc::UnboundedReceiver<Response>>,
    _child: Child,
}

impl JsonBridgeClient {
    pub async fn spawn(command: &[String]) -> Result<Self, anyhow::Error> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("bridge command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start session bridge '{program}'"))?;
        let mut stdin = child.stdin.take().context("bridge stdin unavailable")?;
        let stdout = child.stdout.take().context("bridge stdout unavailable")?;
        info!(target: "Bridge", "Session bridge '{program}' started");

        let (outgoing, mut to_write) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = to_write.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(target: "Bridge", "Writing to session bridge failed: {e}");
                    break;
                }
            }
            debug!(target: "Bridge", "Bridge writer stopped");
        });

        let (deliver, incoming) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_line(&line) {
                        Ok(response) => {
                            if deliver.send(response).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(target: "Bridge", "Undecodable line from bridge: {e}"),
                    },
                    Ok(None) => {
                        info!(target: "Bridge", "Session bridge closed its output");
                        break;
                    }
                    Err(e) => {
                        warn!(target: "Bridge", "Reading from session bridge failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outgoing,
            incoming: Mutex::new(incoming),
            _child: child,
        })
    }
}

#[async_trait]
impl SessionClient for JsonBridgeClient {
    fn send(&self, request_id: u64, request: Request) -> Result<(), SessionError> {
        let line =
            encode_request(request_id, &request).map_err(|e| SessionError::Encode(e.to_string()))?;
        self.outgoing.send(line).map_err(|_| SessionError::Closed)
    }

    async fn receive(&self, timeout: Duration) -> Option<Response> {
        let mut incoming = self.incoming.lock().await;
        tokio::time::timeout(timeout, incoming.recv())
            .await
            .ok()
            .flatten()
    }
}

pub struct JsonBridgeFactory {
    command: Vec<String>,
}

impl JsonBridgeFactory {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SessionClientFactory for JsonBridgeFactory {
    async fn create_client(&self) -> Result<Arc<dyn SessionClient>, anyhow::Error> {
        Ok(Arc::new(JsonBridgeClient::spawn(&self.command).await?))
    }
}
