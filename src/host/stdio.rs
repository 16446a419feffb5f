//! Newline-delimited JSON bridge for the host command channel.
//!
//! Reads `CommandEnvelope` lines, dispatches them through the
//! [`HostCommandServer`](crate::host::channel::HostCommandServer) router and
//! writes `ResponseEnvelope` and `EventEnvelope` lines back.
//!
//! When run over stdio, stdout is reserved for the protocol; all tracing
//! output must go to stderr.

use crate::controller::CompanionHandle;
use crate::error::{CompanionError, Result};
use crate::host::channel::{HostCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

const REQUEST_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Run the bridge over the process's stdin/stdout.
pub async fn run_stdio_bridge(companion: CompanionHandle) -> Result<()> {
    run_bridge(
        BufReader::new(tokio::io::stdin()),
        BufWriter::new(tokio::io::stdout()),
        companion,
    )
    .await
}

/// Run the bridge until the input closes or `runtime.stop` is answered.
///
/// Three tasks cooperate: the reader (current task) dispatching commands
/// and writing responses, an event forwarder writing event lines, and the
/// command router. Output lines never interleave.
pub async fn run_bridge<R, W>(input: R, output: W, companion: CompanionHandle) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, server) = command_channel(REQUEST_CAPACITY, EVENT_CAPACITY, companion);
    let writer = Arc::new(Mutex::new(output));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut *w, &json).await {
                            tracing::warn!(error = %e, "failed to write event; stopping forwarder");
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize event envelope"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let reader_result = run_reader(input, client, Arc::clone(&writer)).await;

    // The reader dropped the client, so the router drains and exits.
    let _ = server_handle.await;
    event_handle.abort();
    let _ = event_handle.await;

    reader_result
}

async fn run_reader<R, W>(
    mut input: R,
    client: HostCommandClient,
    writer: Arc<Mutex<W>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let read = input
            .read_line(&mut line)
            .await
            .map_err(|e| CompanionError::Channel(format!("failed to read command: {e}")))?;
        if read == 0 {
            tracing::info!("host input closed; stopping bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "unparseable command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let request_id = envelope.request_id.clone();
        let is_stop = envelope.command == CommandName::RuntimeStop;

        let response = match client.send(envelope).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "host command dispatch failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        write_response(&writer, &response).await?;

        if is_stop {
            tracing::info!("runtime.stop received; stopping bridge");
            break;
        }
    }

    Ok(())
}

async fn write_response<W>(writer: &Mutex<W>, response: &ResponseEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)
        .map_err(|e| CompanionError::Command(format!("failed to serialize response: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

async fn write_line<W>(writer: &mut W, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
