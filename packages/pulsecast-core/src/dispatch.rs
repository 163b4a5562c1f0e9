//! Command fan-out dispatcher.
//!
//! Issues one request to every registered node as independent, parallel
//! bounded-timeout exchanges and folds the per-node outcomes back into the
//! registry. One node's failure never aborts or delays the others; total
//! fan-out latency is bounded by the slowest single exchange rather than
//! the sum.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ExchangeError, ExchangeResult};
use crate::protocol::{Request, Response, MAX_MESSAGE_BYTES};
use crate::registry::{NodeConfig, NodeHealth, NodeRegistry};

/// Default bound on one connect-plus-exchange cycle.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one node's exchange within a batch.
#[derive(Debug)]
pub struct NodeOutcome {
    pub id: uuid::Uuid,
    pub name: String,
    pub health: NodeHealth,
    /// Present only when the node produced a decodable response.
    pub response: Option<Response>,
}

/// Aggregated outcome of a full fan-out call.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub outcomes: Vec<NodeOutcome>,
}

impl DispatchSummary {
    /// Number of nodes that answered with a decodable response.
    pub fn reachable(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.health == NodeHealth::Reachable)
            .count()
    }
}

/// Fans a command out to every node in the registry.
pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_timeout(registry, DEFAULT_EXCHANGE_TIMEOUT)
    }

    pub fn with_timeout(registry: Arc<NodeRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// The registry this dispatcher reports into.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Sends `request` to every registered node in parallel and waits for
    /// all exchanges to settle.
    ///
    /// Each node ends up in one of the four observed health states; none
    /// is left pending. Failures are reflected in the registry, never
    /// returned as errors.
    pub async fn dispatch(&self, request: &Request) -> DispatchSummary {
        let nodes = self.registry.snapshot();
        if nodes.is_empty() {
            return DispatchSummary::default();
        }
        let label = request.label();
        log::info!("Sending {} command to {} node(s)", label, nodes.len());

        let exchanges = nodes.into_iter().map(|node| {
            let request = request.clone();
            let timeout = self.timeout;
            async move {
                let result = exchange(&node.config, &request, timeout).await;
                (node, result)
            }
        });

        let mut summary = DispatchSummary::default();
        for (node, result) in futures::future::join_all(exchanges).await {
            let (health, response) = match result {
                Ok(response) => {
                    log::info!(
                        "Node {} response: {}",
                        node.config.name,
                        response.message.as_deref().unwrap_or("OK")
                    );
                    (NodeHealth::Reachable, Some(response))
                }
                Err(e) => {
                    log::error!("Error communicating with {}: {}", node.config.name, e);
                    (e.health(), None)
                }
            };

            let is_playing = response.as_ref().and_then(|r| r.is_playing);
            self.registry.record_outcome(node.id, health, is_playing, label);
            summary.outcomes.push(NodeOutcome {
                id: node.id,
                name: node.config.name,
                health,
                response,
            });
        }
        summary
    }
}

/// One complete request/response cycle against a single node, bounded by
/// `limit` end to end.
pub async fn exchange(
    config: &NodeConfig,
    request: &Request,
    limit: Duration,
) -> ExchangeResult<Response> {
    tokio::time::timeout(limit, exchange_inner(config, request))
        .await
        .map_err(|_| ExchangeError::Timeout)?
}

async fn exchange_inner(config: &NodeConfig, request: &Request) -> ExchangeResult<Response> {
    let mut stream = TcpStream::connect((config.hostname.as_str(), config.port))
        .await
        .map_err(classify_connect_error)?;

    stream.write_all(&request.encode()?).await?;
    // Close our write half so the node sees EOF and parses the message.
    stream.shutdown().await?;

    let mut payload = Vec::new();
    (&mut stream)
        .take(MAX_MESSAGE_BYTES as u64 + 1)
        .read_to_end(&mut payload)
        .await?;

    Ok(Response::decode(&payload)?)
}

fn classify_connect_error(e: io::Error) -> ExchangeError {
    if e.kind() == io::ErrorKind::ConnectionRefused {
        ExchangeError::Refused
    } else {
        ExchangeError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{PlayerManager, PlayerSettings};
    use crate::protocol::Status;
    use crate::server::NodeServer;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    struct TestNode {
        server: Arc<NodeServer>,
        addr: SocketAddr,
        task: tokio::task::JoinHandle<io::Result<()>>,
    }

    impl TestNode {
        async fn shutdown(self) {
            self.server.shutdown();
            self.task.await.unwrap().unwrap();
        }
    }

    /// Starts a real node server with a stub player and one known file.
    async fn start_node() -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let settings = PlayerSettings {
            program: "true".into(),
            repeat_gap: Duration::from_millis(5),
            kill_grace: Duration::from_millis(100),
        };
        let player =
            Arc::new(PlayerManager::new(dir.path().join("audio"), settings).unwrap());
        std::fs::write(player.audio_dir().join("beat.mp3"), b"fake").unwrap();
        std::mem::forget(dir);

        let server = Arc::new(NodeServer::new(player));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run(listener).await })
        };
        TestNode { server, addr, task }
    }

    /// Reserves a loopback port with nothing listening on it.
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn node_config(name: &str, addr: SocketAddr) -> NodeConfig {
        NodeConfig {
            name: name.into(),
            hostname: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    #[tokio::test]
    async fn play_fanout_with_one_down_node_completes_the_batch() {
        let alive_a = start_node().await;
        let alive_b = start_node().await;
        let down_port = dead_port().await;

        let registry = Arc::new(NodeRegistry::new());
        registry.add(node_config("a", alive_a.addr)).unwrap();
        registry.add(node_config("b", alive_b.addr)).unwrap();
        registry
            .add(NodeConfig {
                name: "down".into(),
                hostname: "127.0.0.1".into(),
                port: down_port,
            })
            .unwrap();

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let request = Request::Play {
            filename: "beat.mp3".into(),
            volume: 75,
            playcount: 1,
        };
        let summary = dispatcher.dispatch(&request).await;

        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.reachable(), 2);

        for entry in registry.snapshot() {
            assert_ne!(entry.health, NodeHealth::Unknown, "node left pending");
            assert_eq!(entry.last_command, Some("PLAY"));
            match entry.config.name.as_str() {
                "down" => {
                    assert_eq!(entry.health, NodeHealth::Unreachable);
                    assert!(!entry.is_playing);
                }
                _ => {
                    assert_eq!(entry.health, NodeHealth::Reachable);
                    assert!(entry.is_playing);
                }
            }
        }

        alive_a.shutdown().await;
        alive_b.shutdown().await;
    }

    #[tokio::test]
    async fn unresponsive_node_is_marked_timed_out() {
        // Accepts connections but never responds.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            }
        });

        let registry = Arc::new(NodeRegistry::new());
        registry.add(node_config("silent", addr)).unwrap();
        let dispatcher =
            Dispatcher::with_timeout(Arc::clone(&registry), Duration::from_millis(200));

        dispatcher.dispatch(&Request::Ping).await;
        assert_eq!(registry.snapshot()[0].health, NodeHealth::TimedOut);

        silent.abort();
    }

    #[tokio::test]
    async fn malformed_response_is_marked_error_state() {
        // Answers every connection with garbage and closes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let garbled = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"<<not json>>").await;
                let _ = stream.shutdown().await;
            }
        });

        let registry = Arc::new(NodeRegistry::new());
        registry.add(node_config("garbled", addr)).unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&registry));

        dispatcher.dispatch(&Request::Ping).await;
        assert_eq!(registry.snapshot()[0].health, NodeHealth::ErrorState);

        garbled.abort();
    }

    #[tokio::test]
    async fn ping_updates_playing_state_from_response() {
        let node = start_node().await;
        let registry = Arc::new(NodeRegistry::new());
        registry.add(node_config("a", node.addr)).unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&registry));

        let summary = dispatcher.dispatch(&Request::Ping).await;
        let response = summary.outcomes[0].response.as_ref().unwrap();
        assert_eq!(response.status, Status::Ok);

        let entry = &registry.snapshot()[0];
        assert_eq!(entry.health, NodeHealth::Reachable);
        assert!(!entry.is_playing);
        assert_eq!(entry.last_command, Some("PING"));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn empty_registry_dispatch_is_a_noop() {
        let registry = Arc::new(NodeRegistry::new());
        let dispatcher = Dispatcher::new(registry);
        let summary = dispatcher.dispatch(&Request::Ping).await;
        assert!(summary.outcomes.is_empty());
    }
}
