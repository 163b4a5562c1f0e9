//! Node-side control server.
//!
//! Accepts inbound controller connections and drives the player manager.
//! The protocol is one-shot: each connection carries exactly one request
//! and one response, then closes. Handlers run concurrently; the player
//! manager is the only shared mutable state between them and serializes
//! itself internally.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::player::PlayerManager;
use crate::protocol::{Request, Response, MAX_MESSAGE_BYTES};

/// Accept-loop lifecycle around a bound listener.
pub struct NodeServer {
    player: Arc<PlayerManager>,
    cancel: CancellationToken,
}

impl NodeServer {
    /// Creates a server around the node's single player manager.
    pub fn new(player: Arc<PlayerManager>) -> Self {
        Self {
            player,
            cancel: CancellationToken::new(),
        }
    }

    /// Requests a clean shutdown of the accept loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until shutdown is requested.
    ///
    /// Accept errors while running are logged and do not terminate the
    /// loop. On shutdown the loop exits, any active playback is stopped,
    /// and the listener is dropped.
    pub async fn run(&self, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        log::info!("Node server listening on {local}");
        log::info!("Audio files location: {}", self.player.audio_dir().display());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::info!("Connection from {peer}");
                        let player = Arc::clone(&self.player);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, player).await {
                                log::error!("Error handling client {peer}: {e}");
                            }
                        });
                    }
                    Err(e) => log::error!("Error accepting connection: {e}"),
                },
            }
        }

        log::info!("Shutting down node server");
        self.player.stop().await;
        Ok(())
    }
}

/// One request/response cycle, then close. Never panics the listener:
/// decode failures become an `ERROR` response.
async fn handle_connection(mut stream: TcpStream, player: Arc<PlayerManager>) -> io::Result<()> {
    let payload = read_message(&mut stream).await?;
    if payload.is_empty() {
        return Ok(());
    }

    let response = match Request::decode(&payload) {
        Ok(request) => {
            log::info!("Received command: {}", request.label());
            handle_request(request, &player).await
        }
        Err(e) => {
            log::error!("Invalid request received: {e}");
            decode_failure_response(&payload)
        }
    };

    let bytes = response.encode().map_err(io::Error::other)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await
}

/// Reads one message: accumulate until the peer closes its write half or
/// the size cap is reached.
async fn read_message(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        payload.extend_from_slice(&chunk[..n]);
        if payload.len() >= MAX_MESSAGE_BYTES {
            break;
        }
    }
    Ok(payload)
}

/// Dispatches a decoded request to the player manager.
async fn handle_request(request: Request, player: &PlayerManager) -> Response {
    match request {
        Request::Play {
            filename,
            volume,
            playcount,
        } => match player.start(&filename, volume, playcount).await {
            Ok(()) => Response::ok("Playback started")
                .with_playing(true)
                .with_file(Some(filename)),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Stop => {
            player.stop().await;
            Response::ok("Playback stopped").with_playing(false)
        }
        Request::Ping => {
            let (is_playing, current_file) = player.status();
            Response::ping_status(is_playing, current_file, local_hostname())
        }
    }
}

/// Distinguishes an unknown command from outright malformed JSON.
fn decode_failure_response(payload: &[u8]) -> Response {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => {
            let command = value
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Response::error(format!("Unknown command: {command}"))
        }
        Err(_) => Response::error("Invalid JSON"),
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerSettings;
    use crate::protocol::Status;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn start_test_server() -> (Arc<NodeServer>, SocketAddr, tokio::task::JoinHandle<io::Result<()>>) {
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(
            PlayerManager::new(dir.path().join("audio"), PlayerSettings::default()).unwrap(),
        );
        std::fs::write(player.audio_dir().join("present.mp3"), b"fake").unwrap();
        // Keep the tempdir alive for the duration of the test process.
        std::mem::forget(dir);

        let server = Arc::new(NodeServer::new(player));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run(listener).await })
        };
        (server, addr, task)
    }

    async fn exchange_raw(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn ping_reports_status_and_hostname() {
        let (server, addr, task) = start_test_server().await;

        let raw = exchange_raw(addr, br#"{"command": "PING"}"#).await;
        let response = Response::decode(&raw).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.is_playing, Some(false));
        assert_eq!(response.current_file, None);
        assert!(response.hostname.is_some());

        server.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn play_missing_file_reports_error_but_keeps_serving() {
        let (server, addr, task) = start_test_server().await;

        let raw = exchange_raw(
            addr,
            br#"{"command": "PLAY", "filename": "absent.mp3", "volume": 50, "playcount": 1}"#,
        )
        .await;
        let response = Response::decode(&raw).unwrap();
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.message.as_deref(), Some("File not found: absent.mp3"));

        // The node is still responsive afterwards.
        let raw = exchange_raw(addr, br#"{"command": "PING"}"#).await;
        assert_eq!(Response::decode(&raw).unwrap().status, Status::Ok);

        server.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_is_ok_even_when_idle() {
        let (server, addr, task) = start_test_server().await;

        let raw = exchange_raw(addr, br#"{"command": "STOP"}"#).await;
        let response = Response::decode(&raw).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.message.as_deref(), Some("Playback stopped"));
        assert_eq!(response.is_playing, Some(false));

        server.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_payload_gets_error_response() {
        let (server, addr, task) = start_test_server().await;

        let raw = exchange_raw(addr, b"definitely not json").await;
        let response = Response::decode(&raw).unwrap();
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.message.as_deref(), Some("Invalid JSON"));

        server.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_command_is_named_in_the_error() {
        let (server, addr, task) = start_test_server().await;

        let raw = exchange_raw(addr, br#"{"command": "REWIND"}"#).await;
        let response = Response::decode(&raw).unwrap();
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.message.as_deref(), Some("Unknown command: REWIND"));

        server.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_exits_the_accept_loop_promptly() {
        let (server, _addr, task) = start_test_server().await;
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("accept loop did not exit")
            .unwrap()
            .unwrap();
    }
}
