//! Purpose: Run one bridge context over newline-delimited JSON on stdio.
//! Exports: `StdioBridge`, `serve`.
//! Role: Imperative shell for an application core living in another process.
//! Invariants: stdout only carries port events, one JSON object per line, `init` first.
//! Invariants: Malformed request lines become stderr notices and never stop the bridge.
//! Invariants: stdin EOF drains pending deferred replies, then exits cleanly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use portstash::api::{
    BridgeConfig, Error, ErrorKind, Origin, OutboundPort, PersistenceRequest, Ports, connect,
};
use portstash::notice::{Notice, notice_json};

pub(super) struct StdioBridge {
    pub label: String,
    pub origin: Origin,
    pub config: BridgeConfig,
    /// How often to look for writes made by other processes; zero disables polling.
    pub poll: Duration,
}

pub(super) async fn serve(bridge: StdioBridge) -> Result<(), Error> {
    let StdioBridge {
        label,
        origin,
        config,
        poll,
    } = bridge;
    let (ports, handle) = connect(&origin, config)?;
    let Ports {
        outbound,
        mut inbound,
        flags,
    } = ports;
    let mut outbound = Some(outbound);

    let mut stdout = tokio::io::stdout();
    write_json_line(&mut stdout, &json!({ "port": "init", "flags": flags })).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let polling = !poll.is_zero();
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line(), if outbound.is_some() => {
                let line = line.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to read port request")
                        .with_source(err)
                })?;
                match line {
                    Some(line) => {
                        line_no += 1;
                        if let Some(port) = &outbound {
                            forward_line(port, &line, line_no, &label);
                        }
                    }
                    None => {
                        tracing::debug!("stdin closed; draining pending replies");
                        outbound = None;
                    }
                }
            }
            event = inbound.recv() => {
                let Some(event) = event else {
                    break;
                };
                let payload = serde_json::to_value(&event).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode port event")
                        .with_source(err)
                })?;
                write_json_line(&mut stdout, &payload).await?;
            }
            _ = ticker.tick(), if polling => {
                let scan = origin.clone();
                match tokio::task::spawn_blocking(move || scan.refresh()).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(changed)) => tracing::debug!(changed, "picked up foreign writes"),
                    Ok(Err(err)) => tracing::warn!(error = %err, "origin refresh failed"),
                    Err(err) => tracing::warn!(error = %err, "origin refresh task failed"),
                }
            }
        }
    }

    handle.await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("bridge task failed")
            .with_source(err)
    })
}

fn forward_line(port: &OutboundPort, line: &str, line_no: u64, label: &str) {
    let message = line.trim_end_matches(['\n', '\r']);
    if message.trim().is_empty() {
        return;
    }
    let request = match serde_json::from_str::<PersistenceRequest>(message) {
        Ok(request) => request,
        Err(err) => {
            emit_bad_request(label, line_no, &err.to_string());
            return;
        }
    };
    if let Err(err) = port.send(request) {
        tracing::warn!(error = %err, "bridge rejected request");
    }
}

fn emit_bad_request(label: &str, line_no: u64, message: &str) {
    let mut details = Map::new();
    details.insert("line".to_string(), Value::from(line_no));
    let notice = Notice {
        kind: "bad_request".to_string(),
        time: notice_time_now().unwrap_or_default(),
        cmd: "bridge".to_string(),
        origin: label.to_string(),
        message: message.to_string(),
        details,
    };
    eprintln!("{}", notice_json(&notice));
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

async fn write_json_line<W>(writer: &mut W, value: &Value) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode port event")
            .with_source(err)
    })?;
    line.push(b'\n');
    writer.write_all(&line).await.map_err(write_error)?;
    writer.flush().await.map_err(write_error)
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write port event")
        .with_source(err)
}
