//! One mesh connection, from handshake to close.
//!
//! Both sides send a JSON [`Handshake`] first. After that every message is
//! a bincode [`MuxFrame`]. The connection task drives the relay session on
//! `logmesh.sync` and serves and issues log reads on `logmesh.log`. A peer
//! announcing this node's own log gets a replication task instead of a
//! discovered-log entry.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::SplitStream;
use logmesh_core::discovery::{RelayAction, RelaySession, Role, SYNC_PROTOCOL};
use logmesh_core::protocol::{
    Handshake, LOG_PROTOCOL, LogMessage, MAX_MESSAGE_SIZE, MessageType, MuxFrame,
    detect_message_type,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::mesh::{Mesh, MeshError};
use crate::mux::{Mux, MuxEvent};
use crate::relay::Discovered;
use crate::remote::{Route, serve_request};
use crate::replicator;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The remote is this node.
    SelfConnection,
    /// No topic in common.
    Rejected,
    /// The peer went away.
    Closed,
    /// The mesh is shutting down.
    Shutdown,
}

/// Run a connection until it closes.
///
/// `label` names the connection in logs (remote address or seed URL).
pub async fn run(
    ws: WsStream,
    role: Role,
    mesh: Arc<Mesh>,
    label: String,
) -> Result<ConnectionOutcome, MeshError> {
    let (sink, mut read) = ws.split();
    let mux = Arc::new(Mux::new(sink));
    mux.pair(SYNC_PROTOCOL);
    mux.pair(LOG_PROTOCOL);

    let ours = Handshake::new(mesh.node_key(), mesh.topics());
    mux.send_raw(ours.to_json().map_err(|e| MeshError::Handshake(e.to_string()))?)
        .await?;

    let theirs = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut read)).await {
        Ok(result) => result?,
        Err(_) => {
            mux.shutdown().await;
            return Err(MeshError::Handshake(format!("{} sent no handshake", label)));
        }
    };

    if theirs.is_foreign_version() {
        warn!(
            "Peer {} speaks protocol version {}, continuing",
            label, theirs.version
        );
    }

    if !theirs.shares_topic(&ours.topics) {
        info!("Peer {} shares no topic, closing", label);
        mux.shutdown().await;
        return Ok(ConnectionOutcome::Rejected);
    }

    let remote = theirs.node_key;
    let local_log = mesh.local_log();
    let (session, actions) =
        RelaySession::on_connected(mesh.node_key(), local_log.key(), remote, role);

    if session.is_ignored() {
        debug!("Connection {} is to ourselves, ignoring", label);
        mux.shutdown().await;
        return Ok(ConnectionOutcome::SelfConnection);
    }

    info!("Peer {} connected via {} ({:?})", remote, label, role);
    let conn_id = mesh.register_peer(remote, mux.clone());
    let route = Arc::new(Route::new(
        remote,
        mux.clone(),
        mesh.replication().pull_timeout,
    ));

    let result = drive(&mesh, &mux, &route, &mut read, session, actions, &label).await;

    route.close();
    mesh.unregister_peer(conn_id);
    mux.shutdown().await;
    info!("Peer {} disconnected", remote);
    result
}

/// Serve the channels of an established connection until it ends.
async fn drive(
    mesh: &Arc<Mesh>,
    mux: &Arc<Mux>,
    route: &Arc<Route>,
    read: &mut SplitStream<WsStream>,
    mut session: RelaySession,
    actions: Vec<RelayAction>,
    label: &str,
) -> Result<ConnectionOutcome, MeshError> {
    let remote = session.remote_node();
    let mut shutdown = mesh.subscribe_shutdown();
    let mut replication: Option<ReplicationTask> = None;

    mux.open(LOG_PROTOCOL).await?;
    execute(mux, actions).await?;

    loop {
        let next = tokio::select! {
            next = read.next() => next,
            _ = shutdown.changed() => return Ok(ConnectionOutcome::Shutdown),
        };

        let data = match next_payload(next, label) {
            Some(Some(data)) => data,
            Some(None) => continue,
            None => return Ok(ConnectionOutcome::Closed),
        };

        let frame = match detect_message_type(&data) {
            MessageType::Bincode => match MuxFrame::decode(&data) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Undecodable frame from {}: {}", remote, e);
                    continue;
                }
            },
            MessageType::Json => {
                debug!("Ignoring JSON message from {} after handshake", remote);
                continue;
            }
            MessageType::Empty => continue,
        };

        let Some(event) = mux.receive(frame) else {
            continue;
        };

        match event {
            MuxEvent::Opened(protocol) if protocol == SYNC_PROTOCOL => {
                execute(mux, session.on_channel_opened()).await?;
            }
            MuxEvent::Message { protocol, payload } if protocol == SYNC_PROTOCOL => {
                let Some(log) = session.on_message(&payload) else {
                    continue;
                };
                let local_log = mesh.local_log();
                if log == local_log.key() {
                    if replication.is_none() {
                        info!("Peer {} shares log {}, replicating", remote, log);
                        replication = Some(ReplicationTask(tokio::spawn(replicator::run(
                            local_log,
                            route.clone(),
                            mesh.replication(),
                            mesh.subscribe_shutdown(),
                        ))));
                    }
                } else {
                    debug!("Peer {} serves log {}", remote, log);
                    let discovered = Discovered {
                        log,
                        route: route.clone(),
                    };
                    if mesh.discovered_sender().send(discovered).await.is_err() {
                        debug!("Registrar stopped, dropping log {}", log);
                    }
                }
            }
            MuxEvent::Message { protocol, payload } if protocol == LOG_PROTOCOL => {
                on_log_message(mesh, mux, route, &payload);
            }
            other => debug!("Unhandled channel event from {}: {:?}", remote, other),
        }
    }
}

/// Replication task of one connection; stops with the connection.
struct ReplicationTask(JoinHandle<()>);

impl Drop for ReplicationTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn execute(mux: &Mux, actions: Vec<RelayAction>) -> Result<(), MeshError> {
    for action in actions {
        match action {
            RelayAction::OpenChannel => mux.open(SYNC_PROTOCOL).await?,
            RelayAction::SendKey(key) => mux.send(SYNC_PROTOCOL, key.as_bytes().to_vec()).await?,
        }
    }
    Ok(())
}

fn on_log_message(mesh: &Arc<Mesh>, mux: &Arc<Mux>, route: &Route, payload: &[u8]) {
    match LogMessage::decode(payload) {
        Ok(LogMessage::Request(request)) => {
            // Off the read loop: a slow local read must not block frames
            let local_log = mesh.local_log();
            let mux = mux.clone();
            tokio::spawn(async move {
                let response = serve_request(local_log.as_ref(), request).await;
                let sent = match LogMessage::Response(response).encode() {
                    Ok(bytes) => mux.send(LOG_PROTOCOL, bytes).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = sent {
                    debug!("Failed to answer log request: {}", e);
                }
            });
        }
        Ok(LogMessage::Response(response)) => route.resolve(response),
        Err(e) => warn!("Undecodable log channel message: {}", e),
    }
}

/// Unwrap one read from the socket.
///
/// `None` ends the connection, `Some(None)` skips a control message.
fn next_payload(
    next: Option<Result<Message, WsError>>,
    label: &str,
) -> Option<Option<Vec<u8>>> {
    match next {
        Some(Ok(msg)) => {
            let data = match msg {
                Message::Binary(data) => data,
                Message::Text(text) => text.into_bytes(),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Some(None),
                Message::Close(_) => {
                    debug!("Received close frame from {}", label);
                    return None;
                }
            };

            if data.len() > MAX_MESSAGE_SIZE {
                warn!(
                    "Message from {} exceeds max size ({} > {}), dropping",
                    label,
                    data.len(),
                    MAX_MESSAGE_SIZE
                );
                return Some(None);
            }
            Some(Some(data))
        }
        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
            debug!("Connection {} closed", label);
            None
        }
        Some(Err(e)) => {
            error!("WebSocket error on {}: {}", label, e);
            None
        }
        None => {
            debug!("Connection {} stream ended", label);
            None
        }
    }
}

async fn read_handshake(read: &mut SplitStream<WsStream>) -> Result<Handshake, MeshError> {
    loop {
        match next_payload(read.next().await, "handshake") {
            Some(Some(data)) => {
                return Handshake::from_json(&data)
                    .ok_or_else(|| MeshError::Handshake("expected a handshake".into()));
            }
            Some(None) => continue,
            None => return Err(MeshError::Closed),
        }
    }
}
