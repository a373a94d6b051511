//! TCP scoring endpoint
//!
//! One listening socket, one task per connection, frames dispatched to the
//! blocking scoring engine. Scoring and lookup failures are answered in-band
//! so a client can keep its connection after a bad request; only protocol
//! violations (bad framing, malformed JSON) terminate the connection, and
//! even then only that one connection.

pub mod proto;

use std::sync::Arc;

use tokio::io::{AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{ModelMuxError, Result};
use proto::{decode_request, encode_response, read_frame, write_frame, Request, Response};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("MODELMUX_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("MODELMUX_PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(1530),
            max_connections: std::env::var("MODELMUX_MAX_CONNECTIONS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(256),
        }
    }
}

/// Running server. Dropping the handle signals shutdown without waiting;
/// call [`ServerHandle::shutdown`] to wait for the accept loop to exit.
pub struct ServerHandle {
    addr: std::net::SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// Every connection handler is signalled too: a request already being
    /// served runs to completion, then its connection closes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "accept loop panicked");
        }
    }
}

pub struct ConnectionServer;

impl ConnectionServer {
    /// Bind and start serving. Returns once the socket is listening.
    pub async fn start(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Result<ServerHandle> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, max_connections = config.max_connections, "scoring endpoint listening");

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));

        let task = tokio::spawn(async move {
            loop {
                // Backpressure: stop accepting while at the connection cap.
                let permit = tokio::select! {
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown_rx.changed() => break,
                };

                let (stream, peer) = tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                };

                debug!(%peer, "connection opened");
                let dispatcher = Arc::clone(&dispatcher);
                let conn_shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, dispatcher, conn_shutdown).await {
                        // One bad client never touches its neighbours.
                        warn!(%peer, error = %e, "connection closed with error");
                    } else {
                        debug!(%peer, "connection closed");
                    }
                    drop(permit);
                });
            }
            info!("scoring endpoint stopped accepting connections");
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            task,
        })
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        // Shutdown is honored between request/response cycles: a request
        // already being served runs to completion, then the handler exits.
        let payload = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("connection handler stopping on shutdown");
                return Ok(());
            }
            frame = read_frame(&mut reader) => match frame? {
                Some(payload) => payload,
                None => return Ok(()),
            },
        };
        let response = match decode_request(&payload) {
            Ok(request) => handle_request(&dispatcher, request).await,
            // Framing is intact but the JSON is not: tell the client why,
            // then drop the connection, its stream can't be trusted.
            Err(e) => {
                let response = Response::from_result(Err(e));
                respond(&mut writer, &response).await?;
                return Err(ModelMuxError::Protocol(
                    "closing connection after malformed request".to_string(),
                ));
            }
        };
        respond(&mut writer, &response).await?;
    }
}

async fn handle_request(dispatcher: &Arc<Dispatcher>, request: Request) -> Response {
    let dispatcher = Arc::clone(dispatcher);
    let outcome = tokio::task::spawn_blocking(move || match request {
        Request::Score {
            model_ids,
            features,
        } => dispatcher.score_models(&model_ids, &features),
        Request::ScoreBatch {
            model_id,
            instances,
        } => dispatcher.score_batch(model_id, &instances),
    })
    .await;

    match outcome {
        Ok(result) => Response::from_result(result),
        Err(e) => {
            error!(error = %e, "scoring task panicked");
            Response::from_result(Err(ModelMuxError::Scoring(
                "internal scoring failure".to_string(),
            )))
        }
    }
}

async fn respond<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_response(response)?;
    write_frame(writer, &payload).await
}
