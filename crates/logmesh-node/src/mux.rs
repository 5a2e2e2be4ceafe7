//! Named protocol channels over one mesh connection.
//!
//! A channel is open in a direction once that side sent `Open`. Messages
//! may only be sent on a channel we opened, and incoming messages are only
//! delivered on a channel the peer opened. The peer may only open channels
//! we paired (accept) or opened ourselves; anything else is dropped.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::SinkExt;
use futures::stream::SplitSink;
use logmesh_core::protocol::MuxFrame;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::connection::WsStream;
use crate::mesh::MeshError;

pub type WsSink = SplitSink<WsStream, Message>;

/// Something the peer did on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    Opened(String),
    Message { protocol: String, payload: Vec<u8> },
    Closed(String),
}

#[derive(Default)]
struct Channels {
    paired: HashSet<String>,
    local_open: HashSet<String>,
    remote_open: HashSet<String>,
}

impl Channels {
    fn accept(&mut self, frame: MuxFrame) -> Option<MuxEvent> {
        match frame {
            MuxFrame::Open { protocol } => {
                if !self.paired.contains(&protocol) && !self.local_open.contains(&protocol) {
                    debug!("Dropping open of unpaired channel {:?}", protocol);
                    return None;
                }
                self.remote_open.insert(protocol.clone());
                Some(MuxEvent::Opened(protocol))
            }
            MuxFrame::Message { protocol, payload } => {
                if !self.remote_open.contains(&protocol) {
                    debug!("Dropping message on unopened channel {:?}", protocol);
                    return None;
                }
                Some(MuxEvent::Message { protocol, payload })
            }
            MuxFrame::Close { protocol } => self
                .remote_open
                .remove(&protocol)
                .then_some(MuxEvent::Closed(protocol)),
        }
    }
}

pub struct Mux {
    sink: Mutex<WsSink>,
    channels: StdMutex<Channels>,
    closed: AtomicBool,
}

impl Mux {
    pub fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(sink),
            channels: StdMutex::new(Channels::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Accept the peer opening `protocol`.
    pub fn pair(&self, protocol: &str) {
        self.with_channels(|c| {
            c.paired.insert(protocol.to_string());
        });
    }

    /// Open our side of `protocol`.
    pub async fn open(&self, protocol: &str) -> Result<(), MeshError> {
        self.send_frame(&MuxFrame::Open {
            protocol: protocol.to_string(),
        })
        .await?;
        self.with_channels(|c| {
            c.local_open.insert(protocol.to_string());
        });
        Ok(())
    }

    pub async fn send(&self, protocol: &str, payload: Vec<u8>) -> Result<(), MeshError> {
        if !self.with_channels(|c| c.local_open.contains(protocol)) {
            return Err(MeshError::ChannelNotOpen(protocol.to_string()));
        }
        self.send_frame(&MuxFrame::Message {
            protocol: protocol.to_string(),
            payload,
        })
        .await
    }

    /// Close our side of `protocol`.
    pub async fn close(&self, protocol: &str) -> Result<(), MeshError> {
        if !self.with_channels(|c| c.local_open.remove(protocol)) {
            return Ok(());
        }
        self.send_frame(&MuxFrame::Close {
            protocol: protocol.to_string(),
        })
        .await
    }

    /// Whether the peer opened `protocol`.
    pub fn is_remote_open(&self, protocol: &str) -> bool {
        self.with_channels(|c| c.remote_open.contains(protocol))
    }

    /// Apply an incoming frame and report what it means to the channel's
    /// handler, if anything.
    pub fn receive(&self, frame: MuxFrame) -> Option<MuxEvent> {
        self.with_channels(|c| c.accept(frame))
    }

    /// Send raw bytes outside any channel. Used for the handshake.
    pub async fn send_raw(&self, data: Vec<u8>) -> Result<(), MeshError> {
        if self.is_closed() {
            return Err(MeshError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(data)).await?;
        Ok(())
    }

    /// Close the whole connection.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: &MuxFrame) -> Result<(), MeshError> {
        self.send_raw(frame.encode()?).await
    }

    fn with_channels<T>(&self, f: impl FnOnce(&mut Channels) -> T) -> T {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut channels)
    }
}
