//! Bridge adapter socket
//!
//! Newline-delimited JSON over a Unix domain socket. Bridge front-ends list
//! accessories, read their current values and send on/off commands, which
//! are routed through [`CommandRouter`].

use anyhow::{bail, Context};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use ha_core::{CommandOutcome, CommandRouter, LocalBridge, Shutdown};
use ha_protocol::{Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope};

/// Maximum concurrent connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum message size
const MAX_MESSAGE_SIZE: usize = ha_protocol::MAX_MESSAGE_SIZE;

/// Read timeout for client requests
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout for responses
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket file permissions (owner and group read/write)
const SOCKET_MODE: u32 = 0o660;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What request handlers need
pub struct ServerContext {
    pub bridge: Arc<LocalBridge>,
    pub router: CommandRouter,
}

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "Message too large"));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

/// Serve until `shutdown` fires, then remove the socket file
pub async fn run_server(socket_path: &Path, ctx: Arc<ServerContext>, shutdown: Shutdown) -> anyhow::Result<()> {
    // Remove a stale socket, but never follow a symlink
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            bail!("Socket path {} is a symlink, refusing to replace it", socket_path.display());
        }
        std::fs::remove_file(socket_path)
            .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path.display(), SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    let active = Arc::new(AtomicUsize::new(0));
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        total += 1;
                        let ctx = ctx.clone();
                        let active = active.clone();
                        tokio::spawn(async move {
                            handle_client(stream, ctx).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
            _ = shutdown.wait() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped (handled {} total connections)", total);
    Ok(())
}

async fn handle_client(stream: UnixStream, ctx: Arc<ServerContext>) {
    let peer = match stream.peer_cred() {
        Ok(cred) => format!("uid={} pid={:?}", cred.uid(), cred.pid()),
        Err(_) => "unknown peer".to_string(),
    };
    debug!("Connection from {}", peer);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: {}, requests={}, duration={:?}",
                    peer,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from {}: {} bytes", request_count, peer, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = send_response(&mut writer, &ResponseEnvelope::new(0, Response::error("Invalid request encoding"))).await;
                        break;
                    }
                };

                let response = process_request(line_str, &ctx).await;
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!("Message too large (>{} bytes) from {}", MAX_MESSAGE_SIZE, peer);
                    let _ = send_response(&mut writer, &ResponseEnvelope::new(0, Response::error("Message too large"))).await;
                } else {
                    error!("Read error from {}: {}", peer, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for {}", peer);
                let _ = send_response(&mut writer, &ResponseEnvelope::new(0, Response::error("Read timeout"))).await;
                break;
            }
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Decode, validate and answer one request line
pub async fn process_request(line: &str, ctx: &ServerContext) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid request JSON: {}", e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Rejected {} (id={}): {}", request.type_name(), id, e);
        return ResponseEnvelope::new(id, Response::error(e));
    }
    debug!("Processing {} (id={})", request.type_name(), id);

    let response = match request {
        Request::Ping => Response::ok(ResponseData::string("pong")),
        Request::Version => Response::ok(ResponseData::string(VERSION)),
        Request::ListAccessories => Response::ok(ResponseData::list(ctx.bridge.snapshot())),
        Request::GetAccessory { serial } => match ctx.bridge.get(&serial) {
            Some(accessory) => Response::ok(ResponseData::single(accessory.to_info())),
            None => Response::error(format!("Unknown accessory {}", serial)),
        },
        Request::SetOn { serial, on } => match ctx.router.handle_command(&serial, on).await {
            CommandOutcome::Applied => Response::ok(ResponseData::outcome(CommandOutcome::Applied.as_str())),
            CommandOutcome::Failed => Response::error(format!("Command not applied to {}", serial)),
            CommandOutcome::UnknownDevice => Response::error(format!("Unknown accessory {}", serial)),
        },
    };

    ResponseEnvelope::new(id, response)
}
