//! Message encoding detection.
//!
//! The handshake is JSON; everything after it is a bincode [`MuxFrame`].
//! Bincode encodes the frame variant as a little-endian `u32`, so a frame
//! never starts with `{`.
//!
//! [`MuxFrame`]: super::MuxFrame

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// JSON object (handshake)
    Json,
    /// Bincode frame
    Bincode,
    Empty,
}

/// Classify a raw message by its first byte.
pub fn detect_message_type(data: &[u8]) -> MessageType {
    match data.first() {
        Some(b'{') => MessageType::Json,
        Some(_) => MessageType::Bincode,
        None => MessageType::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MuxFrame;

    #[test]
    fn test_detect_json_object() {
        let data = br#"{"type":"handshake","version":1}"#;
        assert_eq!(detect_message_type(data), MessageType::Json);
    }

    #[test]
    fn test_detect_empty() {
        assert_eq!(detect_message_type(&[]), MessageType::Empty);
    }

    #[test]
    fn test_frames_are_bincode() {
        let frames = [
            MuxFrame::Open {
                protocol: "logmesh.sync".into(),
            },
            MuxFrame::Message {
                protocol: "logmesh.sync".into(),
                payload: b"{".to_vec(),
            },
            MuxFrame::Close {
                protocol: "logmesh.sync".into(),
            },
        ];

        for frame in frames {
            let bytes = frame.encode().unwrap();
            assert_eq!(detect_message_type(&bytes), MessageType::Bincode);
        }
    }

    #[test]
    fn test_leading_whitespace_is_bincode() {
        // Our serializers never emit leading whitespace
        assert_eq!(detect_message_type(b" {}"), MessageType::Bincode);
    }
}
