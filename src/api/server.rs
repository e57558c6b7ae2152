//! JSON-lines transport for [`DeviceService`].
//!
//! Each input line is one [`RequestEnvelope`]; each is answered with one
//! [`DeviceResponse`] line. Connection events for every key are interleaved
//! on the same output as `{"event": ...}` lines.

use crate::api::service::{DeviceResponse, DeviceService, RequestEnvelope};
use crate::domain::error::{SerialMonError, SerialMonResult};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Serve until the input reaches EOF, then shut the manager down.
pub async fn serve<R, W>(service: DeviceService, reader: R, mut writer: W) -> SerialMonResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = service.manager().events().subscribe_all();
    let mut lines = reader.lines();

    info!("Device service ready");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<RequestEnvelope>(line) {
                    Ok(envelope) => service.respond(envelope).await,
                    Err(e) => {
                        debug!("Rejected request line: {}", e);
                        DeviceResponse::failure(None, &SerialMonError::InvalidInput(e.to_string()))
                    }
                };
                write_line(&mut writer, &response).await?;
            }
            Some(event) = events.recv() => {
                write_line(&mut writer, &event).await?;
            }
        }
    }

    service.manager().shutdown().await;
    writer.flush().await?;
    info!("Device service stopped");
    Ok(())
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> SerialMonResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).map_err(|e| SerialMonError::Output(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
