//! NATS transport
//!
//! Clients (via the socket gateway) publish JSON `StreamCommand`s on
//! `stream.command.<socket_id>` and receive `StreamEvent`s on
//! `stream.event.<socket_id>`. The gateway reports dropped sockets on
//! `stream.disconnect.<socket_id>`.

pub mod client;
pub mod forwarding;
pub mod messages;

pub use client::NatsTransport;
pub use forwarding::{forward_decision, EventForwarders, Forward};
pub use messages::{
    command_subject, decode_audio, decode_command, disconnect_subject, encode_audio, encode_event,
    event_subject, socket_id_from_subject,
};
