//! Client side network repository.
//!
//! The repository decodes what the Client Agent sends, keeps the object
//! table and shard directory up to date and turns everything the connection
//! state machine cares about into [`ClientEvent`]s, which the driver drains
//! after every message.

use crate::error::ClientError;
use crate::login::LoginManager;
use crate::shard::DistributedShardServer;
use log::{debug, info, warn};
use shared::constants::{GlobalObjectId, APPLICATION_VERSION, ZONE_ID_INVALID};
use shared::protocol::ClientMessage;
use shared::singleton::SingletonClaim;
use shared::{
    ClassRegistry, Datagram, DoId, FieldArgs, FieldSink, ObjectError, ObjectLocation,
    ObjectTable, Schema, ShardDirectory, ZoneId,
};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub const REPOSITORY_SINGLETON: &str = "ClientRepository";

/// Notifications raised by the repository for the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    TransportConnected,
    TransportFailed { reason: String },
    HelloAcknowledged,
    Ejected { code: u16, reason: String },
    LostConnection,
    ObjectLeaving { do_id: DoId },
    InterestAdded {
        context: u32,
        interest_id: u16,
        parent_id: DoId,
        zones: Vec<ZoneId>,
    },
    AllInterestsComplete,
    AuthenticationSucceeded,
    AuthenticationFailed { code: u16, message: String },
    ShardListUpdated,
}

/// An interest the Client Agent opened for us and has not finished filling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenInterest {
    pub interest_id: u16,
    pub parent_id: DoId,
    pub zones: Vec<ZoneId>,
}

pub struct ClientContext {
    outbound: Option<mpsc::UnboundedSender<Datagram>>,
    shards: ShardDirectory,
    events: Vec<ClientEvent>,
}

impl ClientContext {
    pub fn is_connected(&self) -> bool {
        self.outbound.is_some()
    }

    pub fn send(&mut self, message: &ClientMessage) -> Result<(), ObjectError> {
        let outbound = self.outbound.as_ref().ok_or(ObjectError::Disconnected)?;
        let dg = message.encode()?;
        debug!("Sending message {} ({} bytes)", message.msg_type(), dg.len());
        outbound.send(dg).map_err(|_| ObjectError::Disconnected)
    }

    pub fn raise(&mut self, event: ClientEvent) {
        self.events.push(event);
    }

    pub fn shards(&self) -> &ShardDirectory {
        &self.shards
    }

    pub fn shards_mut(&mut self) -> &mut ShardDirectory {
        &mut self.shards
    }
}

impl FieldSink for ClientContext {
    fn send_field_update(
        &mut self,
        do_id: DoId,
        field: &str,
        args: FieldArgs,
    ) -> Result<(), ObjectError> {
        self.send(&ClientMessage::ObjectSetField {
            do_id,
            field: field.to_string(),
            args,
        })
    }
}

pub struct ClientRepository {
    ctx: ClientContext,
    objects: ObjectTable<ClientContext>,
    registry: ClassRegistry<ClientContext>,
    interests: BTreeMap<u32, OpenInterest>,
    dc_hash: u32,
    _claim: Option<SingletonClaim>,
}

impl ClientRepository {
    /// Builds a repository without claiming the process slot.
    pub fn new(manual_dc_hash: Option<u32>) -> Result<Self, ClientError> {
        let schema = Schema::quest();
        let dc_hash = manual_dc_hash.unwrap_or_else(|| schema.hash());
        if manual_dc_hash.is_some() {
            info!("Using manual dc hash {:08X}", dc_hash);
        }

        let mut registry = ClassRegistry::new(schema);
        registry.register::<DistributedShardServer>()?;
        registry.register::<LoginManager>()?;

        Ok(Self {
            ctx: ClientContext {
                outbound: None,
                shards: ShardDirectory::new(),
                events: Vec::new(),
            },
            objects: ObjectTable::new(),
            registry,
            interests: BTreeMap::new(),
            dc_hash,
            _claim: None,
        })
    }

    /// Builds the one client repository this process may have.
    pub fn instantiate_singleton(manual_dc_hash: Option<u32>) -> Result<Self, ClientError> {
        let claim = SingletonClaim::acquire(REPOSITORY_SINGLETON)?;
        let mut repository = Self::new(manual_dc_hash)?;
        repository._claim = Some(claim);
        Ok(repository)
    }

    pub fn dc_hash(&self) -> u32 {
        self.dc_hash
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn objects(&self) -> &ObjectTable<ClientContext> {
        &self.objects
    }

    pub fn shards(&self) -> &ShardDirectory {
        &self.ctx.shards
    }

    pub fn has_available_shards(&self) -> bool {
        self.ctx.shards.has_available_shards()
    }

    /// Makes a known shard the one we play on. Unknown ids are refused.
    pub fn select_shard(&mut self, do_id: DoId) -> bool {
        let selected = self.ctx.shards.select(do_id);
        if selected {
            info!("Selected shard {}", do_id);
        } else {
            warn!("Cannot select unknown shard {}", do_id);
        }
        selected
    }

    pub fn open_interests(&self) -> impl Iterator<Item = &OpenInterest> {
        self.interests.values()
    }

    /// Attaches the outbound queue of a fresh Client Agent connection.
    pub fn connect_transport(&mut self, outbound: mpsc::UnboundedSender<Datagram>) {
        self.ctx.outbound = Some(outbound);
        self.ctx.raise(ClientEvent::TransportConnected);
    }

    pub fn transport_failed(&mut self, reason: impl Into<String>) {
        self.ctx.raise(ClientEvent::TransportFailed {
            reason: reason.into(),
        });
    }

    /// First message after the transport comes up.
    pub fn send_hello(&mut self) -> Result<(), ClientError> {
        info!("Attempting to handshake with ClientAgent instance");
        self.ctx.send(&ClientMessage::Hello {
            dc_hash: self.dc_hash,
            version: APPLICATION_VERSION.to_string(),
        })?;
        Ok(())
    }

    pub fn send_heartbeat(&mut self) -> Result<(), ClientError> {
        self.ctx.send(&ClientMessage::Heartbeat)?;
        Ok(())
    }

    /// Instantiates the client views of the global managers.
    pub fn generate_global_objects(&mut self) -> Result<(), ClientError> {
        for global in [GlobalObjectId::LoginManager] {
            if self.objects.contains(global.do_id()) {
                continue;
            }
            let object = self.registry.create(global.class_name())?;
            let location = ObjectLocation::new(global.do_id(), 0, ZONE_ID_INVALID);
            self.objects
                .generate(&mut self.ctx, &self.registry, object, location, &[])?;
        }
        Ok(())
    }

    pub fn authenticate(&mut self, email: &str, password: &str) -> Result<(), ClientError> {
        let login_manager = self
            .objects
            .get_as_mut::<LoginManager>(GlobalObjectId::LoginManager.do_id())
            .ok_or(ObjectError::UnknownObject(GlobalObjectId::LoginManager.do_id()))?;
        login_manager.authenticate_with_email_password(&mut self.ctx, email, password)?;
        Ok(())
    }

    pub fn authenticate_with_token(&mut self, token: &str) -> Result<(), ClientError> {
        let login_manager = self
            .objects
            .get_as_mut::<LoginManager>(GlobalObjectId::LoginManager.do_id())
            .ok_or(ObjectError::UnknownObject(GlobalObjectId::LoginManager.do_id()))?;
        login_manager.authenticate_with_token(&mut self.ctx, token)?;
        Ok(())
    }

    /// Decodes and applies one message from the Client Agent.
    ///
    /// Updates for unknown objects, fields or classes are logged and dropped.
    pub fn handle_datagram(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let message = ClientMessage::decode(data)?;

        match message {
            ClientMessage::HelloResp => {
                info!("ClientAgent handshake complete");
                self.ctx.raise(ClientEvent::HelloAcknowledged);
            }
            ClientMessage::Eject { code, reason } => {
                self.ctx.raise(ClientEvent::Ejected { code, reason });
            }
            ClientMessage::ObjectSetField { do_id, field, args } => {
                let result =
                    self.objects
                        .dispatch(&mut self.ctx, &self.registry, do_id, &field, &args);
                Self::drop_unroutable(result, do_id, &field)?;
            }
            ClientMessage::EnterObjectRequired {
                do_id,
                parent_id,
                zone_id,
                class_name,
                required,
            } => {
                let object = match self.registry.create(&class_name) {
                    Ok(object) => object,
                    Err(e) => {
                        warn!("Dropping object {} of class {}: {}", do_id, class_name, e);
                        return Ok(());
                    }
                };
                let location = ObjectLocation::new(do_id, parent_id, zone_id);
                self.objects
                    .generate(&mut self.ctx, &self.registry, object, location, &required)?;
            }
            ClientMessage::ObjectLeaving { do_id } => {
                if self.objects.delete(&mut self.ctx, do_id) {
                    debug!("Object {} left our interest", do_id);
                } else {
                    debug!("Leaving notice for unknown object {}", do_id);
                }
                self.ctx.raise(ClientEvent::ObjectLeaving { do_id });
            }
            ClientMessage::AddInterestMultiple {
                context,
                interest_id,
                parent_id,
                zones,
            } => {
                debug!(
                    "Interest {} opened on {} zones {:?} (context {})",
                    interest_id, parent_id, zones, context
                );
                self.interests.insert(
                    context,
                    OpenInterest {
                        interest_id,
                        parent_id,
                        zones: zones.clone(),
                    },
                );
                self.ctx.raise(ClientEvent::InterestAdded {
                    context,
                    interest_id,
                    parent_id,
                    zones,
                });
            }
            ClientMessage::DoneInterestResp {
                context,
                interest_id,
            } => {
                if self.interests.remove(&context).is_none() {
                    warn!(
                        "Done notice for unknown interest {} (context {})",
                        interest_id, context
                    );
                } else if self.interests.is_empty() {
                    self.ctx.raise(ClientEvent::AllInterestsComplete);
                }
            }
            other => {
                debug!("Ignoring message type {}", other.msg_type());
            }
        }

        Ok(())
    }

    fn drop_unroutable(
        result: Result<(), ObjectError>,
        do_id: DoId,
        field: &str,
    ) -> Result<(), ClientError> {
        match result {
            Ok(()) => Ok(()),
            Err(e @ ObjectError::UnknownObject(_)) | Err(e @ ObjectError::UnknownField { .. }) => {
                warn!("Dropping update {} for {}: {}", field, do_id, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Called by the driver when the Client Agent connection drops.
    pub fn handle_lost_connection(&mut self) {
        self.reset();
        self.ctx.raise(ClientEvent::LostConnection);
    }

    /// Politely leaves the Client Agent and destroys every object.
    pub fn disconnect(&mut self) {
        if self.ctx.is_connected() {
            if let Err(e) = self.ctx.send(&ClientMessage::Disconnect) {
                debug!("Disconnect notice not sent: {}", e);
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.objects.clear(&mut self.ctx);
        self.ctx.shards.clear();
        self.interests.clear();
        self.ctx.outbound = None;
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.ctx.events)
    }
}
