//! Message router
//!
//! Parses each inbound text frame, validates it against its tag's contract,
//! and hands it to the matching handler. Protocol errors come back to the
//! sender as `error` replies; the connection always stays open.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::RelayError;

use super::protocol::{ClientMessage, ServerMessage, is_truthy, present, server_time, unix_timestamp};
use super::registry::HostRegistration;
use super::rooms::RoomDirectory;
use super::transport::Transport;
use super::{Relay, encode};

impl Relay {
    /// Handle one text frame received on `transport`.
    pub async fn handle_text(&self, transport: &Transport, text: &str) {
        self.stats.message_received();

        let result = match ClientMessage::parse(text) {
            Ok(msg) => self.dispatch(transport, msg).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            debug!(conn_id = %transport.id(), code = e.error_code(), "Protocol error: {}", e);
            // best-effort: the sender may already be gone
            let _ = self.reply(transport, &ServerMessage::error(&e)).await;
        }
    }

    /// Route a parsed message to its handler.
    pub async fn dispatch(&self, transport: &Transport, msg: ClientMessage) -> Result<(), RelayError> {
        trace!(conn_id = %transport.id(), msg_type = msg.type_name(), "Dispatching");
        match msg {
            ClientMessage::RegisterHost { host_id } => self.register_host(transport, host_id).await,
            ClientMessage::RegisterClient {
                client_id,
                target_host,
            } => self.register_client(transport, client_id, target_host).await,
            ClientMessage::ScreenFrame {
                host_id,
                data,
                timestamp,
            } => {
                self.relay_frame(host_id, data, timestamp).await;
                Ok(())
            }
            ClientMessage::ControlCommand {
                client_id,
                target_host,
                command,
            } => {
                self.forward_command(transport, client_id, target_host, command)
                    .await
            }
            ClientMessage::GetHosts => {
                let list = self.hosts_list().await;
                let _ = self.reply(transport, &list).await;
                Ok(())
            }
        }
    }

    async fn register_host(
        &self,
        transport: &Transport,
        host_id: Option<String>,
    ) -> Result<(), RelayError> {
        let host_id = present(host_id).ok_or(RelayError::MissingField("host_id"))?;

        let registration = self.registry.write().await.register_host(
            &host_id,
            transport.clone(),
            self.config.duplicate_host_policy,
        )?;

        match registration {
            HostRegistration::Created => {
                self.stats.host_registered();
                info!(host_id = %host_id, conn_id = %transport.id(), "Host registered");
            }
            HostRegistration::Unchanged => {
                debug!(host_id = %host_id, "Host re-registered on the same connection");
            }
            HostRegistration::Replaced(evicted) => {
                self.stats.host_registered();
                info!(
                    host_id = %host_id,
                    evicted_conn = %evicted.host.transport.id(),
                    viewers = evicted.viewers.len(),
                    "Host registered, replacing previous connection"
                );
                self.notify_host_disconnected(evicted).await;
            }
        }

        let ack = ServerMessage::HostRegistered {
            room_id: RoomDirectory::room_id(&host_id),
            host_id,
            server_time: server_time(),
        };
        let _ = self.reply(transport, &ack).await;
        Ok(())
    }

    async fn register_client(
        &self,
        transport: &Transport,
        client_id: Option<String>,
        target_host: Option<String>,
    ) -> Result<(), RelayError> {
        let client_id = present(client_id).ok_or(RelayError::MissingField("client_id"))?;
        let target_host = present(target_host).ok_or(RelayError::MissingField("target_host"))?;

        let available_hosts =
            self.registry
                .write()
                .await
                .register_viewer(&client_id, &target_host, transport.clone())?;

        self.stats.client_registered();
        info!(client_id = %client_id, host_id = %target_host, "Client registered");

        let ack = ServerMessage::ClientRegistered {
            client_id,
            target_host,
            available_hosts,
            server_time: server_time(),
        };
        let _ = self.reply(transport, &ack).await;
        Ok(())
    }

    /// Fan a frame out to the host's room. Frames from unknown hosts, or
    /// without a payload, are dropped without a reply.
    async fn relay_frame(&self, host_id: Option<String>, data: Option<Value>, timestamp: Option<Value>) {
        let (Some(host_id), Some(data)) = (present(host_id), data) else {
            self.stats.frame_dropped();
            trace!("Dropping frame without host_id or data");
            return;
        };

        let Some(targets) = self.registry.write().await.record_frame(&host_id) else {
            self.stats.frame_dropped();
            trace!(host_id = %host_id, "Dropping frame from unregistered host");
            return;
        };
        if targets.is_empty() {
            return;
        }

        let frame = ServerMessage::ScreenFrame {
            host_id: host_id.clone(),
            data,
            timestamp: timestamp.unwrap_or_else(unix_timestamp),
        };
        let Some(payload) = encode(&frame) else {
            return;
        };

        let viewers = targets.len();
        let failed = self.fan_out(targets, payload).await;
        trace!(host_id = %host_id, viewers, failed = failed.len(), "Frame relayed");

        // membership is only mutated once the fan-out is over
        for (client_id, conn) in failed {
            let removed = self.registry.write().await.remove_viewer_on(&client_id, conn);
            if removed.is_some() {
                info!(client_id = %client_id, host_id = %host_id, "Removed unreachable client");
            }
        }
    }

    async fn forward_command(
        &self,
        transport: &Transport,
        client_id: Option<String>,
        target_host: Option<String>,
        command: Option<Value>,
    ) -> Result<(), RelayError> {
        let client_id = present(client_id).ok_or(RelayError::MissingField("client_id"))?;
        let target_host = present(target_host).ok_or(RelayError::MissingField("target_host"))?;
        let command = command
            .filter(is_truthy)
            .ok_or(RelayError::MissingField("command"))?;

        let host = self
            .registry
            .read()
            .await
            .command_target(&client_id, &target_host)?;

        let payload: Arc<str> = Arc::from(command.to_string());
        if self.deliver(&host, payload).await.is_err() {
            warn!(host_id = %target_host, client_id = %client_id, "Host unreachable, removing");
            // the id may already belong to a newer connection
            self.remove_host_on(&target_host, host.id()).await;
            return Err(RelayError::HostGone(target_host));
        }

        let command_type = command
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(
            client_id = %client_id,
            host_id = %target_host,
            conn_id = %transport.id(),
            command = command_type,
            "Command forwarded"
        );
        Ok(())
    }
}
