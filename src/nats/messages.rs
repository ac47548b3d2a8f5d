use base64::Engine;

use crate::error::{StreamError, StreamResult};
use crate::pipeline::{StreamCommand, StreamEvent};

/// Inbound commands from every client socket
pub const COMMAND_SUBJECTS: &str = "stream.command.*";

/// Disconnect notices from the socket gateway
pub const DISCONNECT_SUBJECTS: &str = "stream.disconnect.*";

pub fn command_subject(socket_id: &str) -> String {
    format!("stream.command.{}", socket_id)
}

pub fn event_subject(socket_id: &str) -> String {
    format!("stream.event.{}", socket_id)
}

pub fn disconnect_subject(socket_id: &str) -> String {
    format!("stream.disconnect.{}", socket_id)
}

/// Socket id is the last token of `stream.<kind>.<socket_id>`
pub fn socket_id_from_subject(subject: &str) -> Option<&str> {
    let mut tokens = subject.splitn(3, '.');
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some("stream"), Some(_), Some(socket_id)) if !socket_id.is_empty() => Some(socket_id),
        _ => None,
    }
}

pub fn decode_command(payload: &[u8]) -> StreamResult<StreamCommand> {
    serde_json::from_slice(payload)
        .map_err(|e| StreamError::Transport(format!("malformed command: {}", e)))
}

pub fn encode_event(event: &StreamEvent) -> StreamResult<Vec<u8>> {
    serde_json::to_vec(event).map_err(|e| StreamError::Transport(e.to_string()))
}

/// Chunk payloads travel base64-encoded inside JSON
pub fn decode_audio(data: &str) -> StreamResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| StreamError::InvalidAudio(format!("payload is not base64: {}", e)))
}

pub fn encode_audio(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
