//! Per-connection log key exchange.
//!
//! The mesh tells two nodes they are connected but not which log the other
//! serves. Each connection runs a [`RelaySession`]:
//!
//! 1. **Self-check**: a connection to our own identity is ignored for good.
//! 2. **Role split**: the initiator opens the sync channel and sends its log
//!    key at once; the responder waits for the peer to open the channel,
//!    then opens its side and answers with its own key.
//! 3. **Key received**: a 32-byte message is a peer's log key. Anything else
//!    is ignored so newer peers can add message types.
//!
//! The session only decides; the transport executes the returned
//! [`RelayAction`]s.

use crate::keys::{PublicKey, KEY_LEN};

/// Name of the channel the relay speaks on.
pub const SYNC_PROTOCOL: &str = "logmesh.sync";

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Remote is ourselves; nothing will happen on this connection.
    Ignored,
    /// Responder waiting for the peer to open the sync channel.
    AwaitingChannel,
    /// Our side of the channel is open and our key was sent.
    Open,
    /// A log key arrived from the peer.
    KeyReceived(PublicKey),
}

/// Something the transport must do for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Open our side of the [`SYNC_PROTOCOL`] channel.
    OpenChannel,
    /// Send this log key on the channel.
    SendKey(PublicKey),
}

/// Key exchange state for one connection.
#[derive(Debug, Clone)]
pub struct RelaySession {
    local_log: PublicKey,
    remote_node: PublicKey,
    state: RelayState,
}

impl RelaySession {
    /// Start a session for a freshly established connection.
    pub fn on_connected(
        local_node: PublicKey,
        local_log: PublicKey,
        remote_node: PublicKey,
        role: Role,
    ) -> (Self, Vec<RelayAction>) {
        let mut session = Self {
            local_log,
            remote_node,
            state: RelayState::AwaitingChannel,
        };

        if remote_node == local_node {
            session.state = RelayState::Ignored;
            return (session, Vec::new());
        }

        let actions = match role {
            Role::Initiator => session.open(),
            Role::Responder => Vec::new(),
        };
        (session, actions)
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn remote_node(&self) -> PublicKey {
        self.remote_node
    }

    pub fn is_ignored(&self) -> bool {
        self.state == RelayState::Ignored
    }

    /// The peer opened the sync channel.
    pub fn on_channel_opened(&mut self) -> Vec<RelayAction> {
        match self.state {
            RelayState::AwaitingChannel => self.open(),
            _ => Vec::new(),
        }
    }

    /// A message arrived on the sync channel.
    ///
    /// Returns the peer's log key for 32-byte payloads; every other payload,
    /// and anything arriving before our side is open, yields `None`.
    pub fn on_message(&mut self, payload: &[u8]) -> Option<PublicKey> {
        match self.state {
            RelayState::Open | RelayState::KeyReceived(_) => {}
            RelayState::Ignored | RelayState::AwaitingChannel => return None,
        }

        if payload.len() != KEY_LEN {
            return None;
        }

        let key = PublicKey::from_slice(payload).ok()?;
        self.state = RelayState::KeyReceived(key);
        Some(key)
    }

    fn open(&mut self) -> Vec<RelayAction> {
        self.state = RelayState::Open;
        vec![
            RelayAction::OpenChannel,
            RelayAction::SendKey(self.local_log),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    const LOCAL_NODE: u8 = 1;
    const LOCAL_LOG: u8 = 2;
    const REMOTE_NODE: u8 = 3;
    const REMOTE_LOG: u8 = 4;

    fn start(role: Role) -> (RelaySession, Vec<RelayAction>) {
        RelaySession::on_connected(key(LOCAL_NODE), key(LOCAL_LOG), key(REMOTE_NODE), role)
    }

    // ==================== Self-check ====================

    #[test]
    fn test_self_connection_is_ignored() {
        for role in [Role::Initiator, Role::Responder] {
            let (mut session, actions) =
                RelaySession::on_connected(key(LOCAL_NODE), key(LOCAL_LOG), key(LOCAL_NODE), role);

            assert!(actions.is_empty());
            assert!(session.is_ignored());
            assert!(session.on_channel_opened().is_empty());
            assert_eq!(session.on_message(key(REMOTE_LOG).as_bytes()), None);
            assert_eq!(session.state(), RelayState::Ignored);
        }
    }

    // ==================== Role split ====================

    #[test]
    fn test_initiator_opens_and_sends_immediately() {
        let (session, actions) = start(Role::Initiator);
        assert_eq!(
            actions,
            vec![RelayAction::OpenChannel, RelayAction::SendKey(key(LOCAL_LOG))]
        );
        assert_eq!(session.state(), RelayState::Open);
    }

    #[test]
    fn test_initiator_ignores_peer_channel_open() {
        let (mut session, _) = start(Role::Initiator);
        assert!(session.on_channel_opened().is_empty());
    }

    #[test]
    fn test_responder_waits_for_channel() {
        let (mut session, actions) = start(Role::Responder);
        assert!(actions.is_empty());
        assert_eq!(session.state(), RelayState::AwaitingChannel);

        let actions = session.on_channel_opened();
        assert_eq!(
            actions,
            vec![RelayAction::OpenChannel, RelayAction::SendKey(key(LOCAL_LOG))]
        );

        // A second open from the peer does not trigger a second reply
        assert!(session.on_channel_opened().is_empty());
    }

    #[test]
    fn test_responder_drops_key_before_channel_open() {
        let (mut session, _) = start(Role::Responder);
        assert_eq!(session.on_message(key(REMOTE_LOG).as_bytes()), None);
    }

    // ==================== Key received ====================

    #[test]
    fn test_key_received() {
        let (mut session, _) = start(Role::Initiator);
        assert_eq!(
            session.on_message(key(REMOTE_LOG).as_bytes()),
            Some(key(REMOTE_LOG))
        );
        assert_eq!(session.state(), RelayState::KeyReceived(key(REMOTE_LOG)));
    }

    #[test]
    fn test_other_lengths_ignored() {
        let (mut session, _) = start(Role::Initiator);
        assert_eq!(session.on_message(&[]), None);
        assert_eq!(session.on_message(&[0u8; 31]), None);
        assert_eq!(session.on_message(&[0u8; 33]), None);
        assert_eq!(session.on_message(b"{\"type\":\"future\"}"), None);
        assert_eq!(session.state(), RelayState::Open);
    }
}
