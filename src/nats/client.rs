use anyhow::{Context, Result};
use async_nats::Client;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::forwarding::{forward_decision, EventForwarders, Forward};
use super::messages::{
    decode_audio, decode_command, encode_event, event_subject, socket_id_from_subject,
    COMMAND_SUBJECTS, DISCONNECT_SUBJECTS,
};
use crate::error::StreamResult;
use crate::pipeline::{StreamCommand, StreamEvent};
use crate::service::{StartOutcome, StreamService};
use crate::session::SessionId;

/// Bridges client sockets on NATS to the streaming service
pub struct NatsTransport {
    client: Client,
    service: Arc<StreamService>,
    forwarders: EventForwarders,
}

impl NatsTransport {
    /// Connect to NATS server
    pub async fn connect(url: &str, service: Arc<StreamService>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            service,
            forwarders: EventForwarders::default(),
        })
    }

    /// Consume commands and disconnect notices until the connection closes
    pub async fn run(self) -> Result<()> {
        let mut commands = self
            .client
            .subscribe(COMMAND_SUBJECTS)
            .await
            .context("Failed to subscribe to stream commands")?;
        let mut disconnects = self
            .client
            .subscribe(DISCONNECT_SUBJECTS)
            .await
            .context("Failed to subscribe to disconnect notices")?;

        info!("Subscribed to {} and {}", COMMAND_SUBJECTS, DISCONNECT_SUBJECTS);

        let transport = Arc::new(self);
        loop {
            tokio::select! {
                Some(message) = commands.next() => {
                    let Some(socket_id) = socket_id_from_subject(&message.subject).map(str::to_string) else {
                        warn!("Ignoring command on unexpected subject {}", message.subject);
                        continue;
                    };
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        transport.dispatch(&socket_id, &message.payload).await;
                    });
                }
                Some(message) = disconnects.next() => {
                    if let Some(socket_id) = socket_id_from_subject(&message.subject) {
                        transport.forwarders.remove(socket_id).await;
                        if let Some(id) = transport.service.handle_disconnect(socket_id).await {
                            debug!(
                                session_id = %id,
                                "Socket disconnected; {} forwarders remain",
                                transport.forwarders.len().await
                            );
                        }
                    }
                }
                else => break,
            }
        }

        info!("NATS subscriptions closed");
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, socket_id: &str, payload: &[u8]) {
        let result = match decode_command(payload) {
            Ok(command) => self.handle_command(socket_id, command).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.publish(socket_id, &StreamEvent::error(&e)).await;
        }
    }

    async fn handle_command(self: &Arc<Self>, socket_id: &str, command: StreamCommand) -> StreamResult<()> {
        match command {
            StreamCommand::Start(config) => {
                match self.service.start_stream(config, Some(socket_id.to_string())).await? {
                    StartOutcome::Started(session_id) => {
                        self.attach(socket_id, session_id).await?;
                    }
                    StartOutcome::Queued { ticket, promoted } => {
                        self.publish(
                            socket_id,
                            &StreamEvent::Queued {
                                ticket_id: ticket.ticket_id,
                                position: ticket.position,
                                estimated_wait_ms: ticket.estimated_wait_ms,
                            },
                        )
                        .await;

                        let transport = Arc::clone(self);
                        let socket_id = socket_id.to_string();
                        tokio::spawn(async move {
                            match promoted.await {
                                Ok(session_id) => {
                                    if let Err(e) = transport.attach(&socket_id, session_id).await {
                                        transport.publish(&socket_id, &StreamEvent::error(&e)).await;
                                    }
                                }
                                Err(_) => debug!("Queued request for socket withdrawn"),
                            }
                        });
                    }
                }
            }
            StreamCommand::Chunk {
                session_id,
                sequence,
                data,
            } => {
                let audio = decode_audio(&data)?;
                self.service.add_chunk(&session_id, sequence, audio).await?;
            }
            StreamCommand::Pause { session_id } => self.service.pause(&session_id).await?,
            StreamCommand::Resume { session_id } => self.service.resume(&session_id).await?,
            StreamCommand::Stop { session_id } => {
                // Completion and categorization results arrive as events
                self.service.stop(&session_id).await?;
            }
            StreamCommand::Cancel { session_id } => self.service.cancel(&session_id).await?,
            StreamCommand::UpdateContext {
                session_id,
                context,
            } => self.service.update_context(&session_id, context).await?,
            StreamCommand::Reconnect { session_id } => {
                let resume = self
                    .service
                    .reconnect(&session_id, Some(socket_id.to_string()))
                    .await?;
                info!(
                    session_id = %session_id,
                    "Socket resumed at sequence {}",
                    resume.next_sequence
                );
                self.forward_events(socket_id, session_id).await?;
            }
        }
        Ok(())
    }

    /// Announce a live session to its socket and start forwarding its events
    async fn attach(self: &Arc<Self>, socket_id: &str, session_id: SessionId) -> StreamResult<()> {
        self.publish(
            socket_id,
            &StreamEvent::Started {
                session_id: session_id.clone(),
            },
        )
        .await;
        self.forward_events(socket_id, session_id).await
    }

    /// Forward a session's events to a socket, replacing whatever it was forwarding before
    async fn forward_events(self: &Arc<Self>, socket_id: &str, session_id: SessionId) -> StreamResult<()> {
        let mut receiver = self.service.subscribe(&session_id).await?;
        let transport = Arc::clone(self);
        let socket = socket_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let bound = transport.service.session_for_socket(&socket).await;
                        match forward_decision(&event, bound.as_ref() == Some(&session_id)) {
                            Forward::Publish => transport.publish(&socket, &event).await,
                            Forward::PublishAndStop => {
                                transport.publish(&socket, &event).await;
                                break;
                            }
                            Forward::Stop => break,
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %session_id, "Socket lagged; {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(session_id = %session_id, "Stopped forwarding events");
        });

        self.forwarders.replace(socket_id, task).await;
        Ok(())
    }

    async fn publish(&self, socket_id: &str, event: &StreamEvent) {
        let payload = match encode_event(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {} event: {}", event.name(), e);
                return;
            }
        };

        if let Err(e) = self
            .client
            .publish(event_subject(socket_id), payload.into())
            .await
        {
            error!("Failed to publish {} event: {}", event.name(), e);
        }
    }
}
