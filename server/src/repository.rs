//! Internal network repository shared by the AI and UberDOG processes.
//!
//! The repository owns the Message Director connection (as an outbound
//! datagram queue), the object table and the class registry. Incoming
//! datagrams are fed to [`InternalRepository::poll_datagram`], which isolates
//! every message: a failure while handling one sender's message is logged,
//! reported as a server event and answered by ejecting that sender, and the
//! next message is processed as usual.

use crate::error::RepositoryError;
use crate::events::{EventSink, TitleEvent};
use crate::login::{AccountTable, Authenticator};
use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};
use shared::channel::{account_id_from_sender, character_id_from_sender};
use shared::config::{InternalConfig, ServerRole};
use shared::constants::{GlobalObjectId, EJECT_CODE_SERVER_ERROR, ZONE_ID_INVALID};
use shared::protocol::{InternalDatagram, InternalMessage, RequiredField};
use shared::singleton::SingletonClaim;
use shared::{
    AllocatorError, ChannelAllocator, ChannelId, ClassRegistry, Datagram, DistributedObject, DoId,
    FieldArgs, FieldSink, ObjectError, ObjectLocation, ObjectTable, Schema, ShardDirectory, ZoneId,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc;

/// Name under which the process-wide repository claim is registered.
pub const REPOSITORY_SINGLETON: &str = "InternalRepository";

const EJECT_REASON_SERVER_ERROR: &str = "The server encountered an unexpected error";

/// Everything a distributed object may touch while handling a field update.
pub struct InternalContext {
    our_channel: ChannelId,
    state_server_channel: ChannelId,
    database_server_channel: ChannelId,
    allocator: ChannelAllocator,
    outbound: mpsc::UnboundedSender<Datagram>,
    msg_sender: Option<ChannelId>,
    shards: ShardDirectory,
    events: Box<dyn EventSink>,
    authenticator: Box<dyn Authenticator>,
    shutdown_requested: bool,
}

impl InternalContext {
    pub fn our_channel(&self) -> ChannelId {
        self.our_channel
    }

    pub fn state_server_channel(&self) -> ChannelId {
        self.state_server_channel
    }

    pub fn database_server_channel(&self) -> ChannelId {
        self.database_server_channel
    }

    /// Sender of the datagram currently being handled.
    pub fn msg_sender(&self) -> Option<ChannelId> {
        self.msg_sender
    }

    pub fn account_id_from_sender(&self) -> Option<u32> {
        self.msg_sender.map(account_id_from_sender)
    }

    pub fn character_id_from_sender(&self) -> Option<u32> {
        self.msg_sender.map(character_id_from_sender)
    }

    pub fn shards(&self) -> &ShardDirectory {
        &self.shards
    }

    pub fn shards_mut(&mut self) -> &mut ShardDirectory {
        &mut self.shards
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn allocate_channel(&mut self) -> Result<ChannelId, AllocatorError> {
        self.allocator.allocate()
    }

    pub fn free_channel(&mut self, channel: ChannelId) -> Result<(), AllocatorError> {
        self.allocator.free(channel)
    }

    pub fn is_channel_live(&self, channel: ChannelId) -> bool {
        self.allocator.is_live(channel)
    }

    /// Asks the poll loop to stop after the current datagram.
    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn send(&mut self, datagram: InternalDatagram) -> Result<(), ObjectError> {
        let msg_type = datagram.message.msg_type();
        let dg = datagram.encode()?;
        debug!("Sending message {} ({} bytes)", msg_type, dg.len());
        self.outbound.send(dg).map_err(|_| ObjectError::Disconnected)
    }

    fn send_routed(&mut self, recipient: ChannelId, message: InternalMessage) -> Result<(), ObjectError> {
        let datagram = InternalDatagram::routed(vec![recipient], self.our_channel, message);
        self.send(datagram)
    }

    pub fn add_channel(&mut self, channel: ChannelId) -> Result<(), ObjectError> {
        self.send(InternalDatagram::control(InternalMessage::AddChannel { channel }))
    }

    pub fn remove_channel(&mut self, channel: ChannelId) -> Result<(), ObjectError> {
        self.send(InternalDatagram::control(InternalMessage::RemoveChannel { channel }))
    }

    pub fn set_client_state(&mut self, client: ChannelId, state: u16) -> Result<(), ObjectError> {
        self.send_routed(client, InternalMessage::ClientAgentSetState { state })
    }

    pub fn set_client_id(&mut self, client: ChannelId, channel: ChannelId) -> Result<(), ObjectError> {
        self.send_routed(client, InternalMessage::ClientAgentSetClientId { channel })
    }

    pub fn eject(&mut self, client: ChannelId, code: u16, reason: &str) -> Result<(), ObjectError> {
        self.send_routed(
            client,
            InternalMessage::ClientAgentEject {
                code,
                reason: reason.to_string(),
            },
        )
    }

    pub fn client_add_interest(
        &mut self,
        client: ChannelId,
        context: u32,
        interest_id: u16,
        parent_id: DoId,
        zones: &[ZoneId],
    ) -> Result<(), ObjectError> {
        self.send_routed(
            client,
            InternalMessage::ClientAgentAddInterestMultiple {
                context,
                interest_id,
                parent_id,
                zones: zones.to_vec(),
            },
        )
    }

    /// Sends a field update for `do_id` to one channel instead of the object.
    pub fn send_update_to_channel(
        &mut self,
        channel: ChannelId,
        do_id: DoId,
        field: &str,
        args: FieldArgs,
    ) -> Result<(), ObjectError> {
        self.send_routed(
            channel,
            InternalMessage::ObjectSetField {
                do_id,
                field: field.to_string(),
                args,
            },
        )
    }

    /// Writes an event to the Message Director's event log and forwards it
    /// to the analytics sink.
    ///
    /// The forward is fire-and-forget and never affects the result.
    pub fn write_server_event(
        &mut self,
        event_type: &str,
        body: Map<String, Value>,
    ) -> Result<(), ObjectError> {
        let mut record = Map::new();
        record.insert("type".to_string(), json!(event_type));
        record.insert("channel".to_string(), json!(self.our_channel));
        record.extend(body.clone());

        let payload = serde_json::to_vec(&Value::Object(record))
            .map_err(|e| ObjectError::Handler(e.to_string()))?;
        let result = self.send(InternalDatagram::control(InternalMessage::LogMessage { payload }));

        self.events
            .write_title_event(TitleEvent::new(event_type, body));
        result
    }
}

impl FieldSink for InternalContext {
    fn send_field_update(
        &mut self,
        do_id: DoId,
        field: &str,
        args: FieldArgs,
    ) -> Result<(), ObjectError> {
        self.send_update_to_channel(do_id as ChannelId, do_id, field, args)
    }
}

/// Network repository of an AI or UberDOG process.
pub struct InternalRepository {
    role: ServerRole,
    pub(crate) shard_name: String,
    pub(crate) shard_id: Option<DoId>,
    pub(crate) ctx: InternalContext,
    pub(crate) objects: ObjectTable<InternalContext>,
    pub(crate) registry: ClassRegistry<InternalContext>,
    connected: bool,
    _claim: Option<SingletonClaim>,
}

impl InternalRepository {
    /// Builds a repository without claiming the process slot. Prefer
    /// [`InternalRepository::instantiate_singleton`] outside of tests.
    pub fn new(
        config: &InternalConfig,
        outbound: mpsc::UnboundedSender<Datagram>,
        events: Box<dyn EventSink>,
    ) -> Result<Self, RepositoryError> {
        info!(
            "Starting internal repository (Base: {} | State server: {} | Database: {} | Role: {})",
            config.base_channel,
            config.state_server_channel,
            config.database_server_channel,
            config.role.name()
        );

        let mut registry = ClassRegistry::new(Schema::quest());
        match config.role {
            ServerRole::Ai => crate::ai::register_classes(&mut registry)?,
            ServerRole::UberDog => crate::uberdog::register_classes(&mut registry)?,
        }

        let mut allocator = ChannelAllocator::for_base_channel(config.base_channel)?;
        let our_channel = allocator.allocate()?;
        let shard_id = match config.role {
            ServerRole::Ai => Some(crate::ai::allocate_shard_id(&mut allocator)?),
            ServerRole::UberDog => None,
        };

        Ok(Self {
            role: config.role,
            shard_name: config.shard_name.clone(),
            shard_id,
            ctx: InternalContext {
                our_channel,
                state_server_channel: config.state_server_channel,
                database_server_channel: config.database_server_channel,
                allocator,
                outbound,
                msg_sender: None,
                shards: ShardDirectory::new(),
                events,
                authenticator: Box::new(AccountTable::new(config.accounts.clone())),
                shutdown_requested: false,
            },
            objects: ObjectTable::new(),
            registry,
            connected: false,
            _claim: None,
        })
    }

    /// Builds the one repository this process may have.
    pub fn instantiate_singleton(
        config: &InternalConfig,
        outbound: mpsc::UnboundedSender<Datagram>,
        events: Box<dyn EventSink>,
    ) -> Result<Self, RepositoryError> {
        let claim = SingletonClaim::acquire(REPOSITORY_SINGLETON)?;
        let mut repository = Self::new(config, outbound, events)?;
        repository._claim = Some(claim);
        Ok(repository)
    }

    pub fn with_authenticator(mut self, authenticator: Box<dyn Authenticator>) -> Self {
        self.ctx.authenticator = authenticator;
        self
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn our_channel(&self) -> ChannelId {
        self.ctx.our_channel
    }

    pub fn shard_id(&self) -> Option<DoId> {
        self.shard_id
    }

    pub fn shard_name(&self) -> &str {
        &self.shard_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn context(&self) -> &InternalContext {
        &self.ctx
    }

    pub fn objects(&self) -> &ObjectTable<InternalContext> {
        &self.objects
    }

    pub fn has_available_shards(&self) -> bool {
        self.ctx.shards.has_available_shards()
    }

    pub fn get_account_id_from_sender(&self) -> Option<u32> {
        self.ctx.account_id_from_sender()
    }

    pub fn get_character_id_from_sender(&self) -> Option<u32> {
        self.ctx.character_id_from_sender()
    }

    pub fn write_server_event(
        &mut self,
        event_type: &str,
        body: Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        Ok(self.ctx.write_server_event(event_type, body)?)
    }

    /// Runs once the Message Director connection is up: subscribes our
    /// channel, names the connection and starts the role.
    pub fn handle_connected(&mut self) -> Result<(), RepositoryError> {
        info!("Connected to Message Director on channel {}", self.ctx.our_channel);
        self.connected = true;

        let our_channel = self.ctx.our_channel;
        self.ctx.add_channel(our_channel)?;
        let name = format!("{} {}", self.role.name(), our_channel);
        self.ctx
            .send(InternalDatagram::control(InternalMessage::SetConName { name }))?;

        match self.role {
            ServerRole::Ai => self.start_shard(),
            ServerRole::UberDog => self.start_uberdog(),
        }
    }

    /// Instantiates the role's global singletons at their registry keys.
    pub fn generate_global_objects(&mut self) -> Result<(), RepositoryError> {
        for global in [GlobalObjectId::LoginManager] {
            let object = self.registry.create(global.class_name())?;
            let location = ObjectLocation::new(global.do_id(), 0, ZONE_ID_INVALID);
            self.objects
                .generate(&mut self.ctx, &self.registry, object, location, &[])?;
        }
        Ok(())
    }

    /// Creates `object` in the state server with its required fields and
    /// generates it locally.
    pub fn generate_with_required_and_id(
        &mut self,
        object: Box<dyn DistributedObject<InternalContext>>,
        location: ObjectLocation,
    ) -> Result<(), RepositoryError> {
        let required: Vec<RequiredField> = object.required_fields();
        let message = InternalMessage::CreateObjectWithRequired {
            do_id: location.do_id,
            parent_id: location.parent_id,
            zone_id: location.zone_id,
            class_name: object.class_name().to_string(),
            required,
        };
        let state_server = self.ctx.state_server_channel;
        self.ctx.send_routed(state_server, message)?;

        self.objects
            .generate(&mut self.ctx, &self.registry, object, location, &[])?;
        Ok(())
    }

    /// Hands control of `do_id` to `ai_channel`.
    pub fn set_ai(&mut self, do_id: DoId, ai_channel: ChannelId) -> Result<(), RepositoryError> {
        self.ctx
            .send_routed(do_id as ChannelId, InternalMessage::ObjectSetAi { ai_channel })?;
        Ok(())
    }

    /// Deletes an object locally, then removes it from the state server.
    pub fn delete_object(&mut self, do_id: DoId) -> Result<(), RepositoryError> {
        if !self.objects.delete(&mut self.ctx, do_id) {
            debug!("Delete of unknown object {} ignored", do_id);
            return Ok(());
        }

        self.ctx
            .send_routed(do_id as ChannelId, InternalMessage::ObjectDeleteRam { do_id })?;
        Ok(())
    }

    pub fn get_object<T: Any>(&self, do_id: DoId) -> Option<&T> {
        self.objects.get_as::<T>(do_id)
    }

    /// Runs `f` against a live object of type `T` together with the context.
    pub fn with_object<T, R, F>(&mut self, do_id: DoId, f: F) -> Result<R, RepositoryError>
    where
        T: Any,
        F: FnOnce(&mut T, &mut InternalContext) -> Result<R, ObjectError>,
    {
        let object = self
            .objects
            .get_as_mut::<T>(do_id)
            .ok_or(ObjectError::UnknownObject(do_id))?;
        Ok(f(object, &mut self.ctx)?)
    }

    /// Handles one datagram without isolation.
    pub fn handle_datagram(&mut self, data: &[u8]) -> Result<(), RepositoryError> {
        let datagram = InternalDatagram::decode(data)?;
        self.ctx.msg_sender = datagram.sender;

        match datagram.message {
            InternalMessage::ObjectSetField { do_id, field, args } => {
                match self
                    .objects
                    .dispatch(&mut self.ctx, &self.registry, do_id, &field, &args)
                {
                    Ok(()) => {}
                    Err(e @ ObjectError::UnknownObject(_))
                    | Err(e @ ObjectError::UnknownField { .. }) => {
                        warn!("Dropping update {} for {}: {}", field, do_id, e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            other => {
                debug!("Ignoring message type {}", other.msg_type());
            }
        }

        if self.ctx.shutdown_requested {
            return Err(RepositoryError::Shutdown);
        }
        Ok(())
    }

    /// Handles one datagram inside the isolation boundary.
    ///
    /// Only [`RepositoryError::Shutdown`] escapes; every other error or
    /// panic ejects the sender and the caller keeps polling.
    pub fn poll_datagram(&mut self, data: &[u8]) -> Result<(), RepositoryError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle_datagram(data)));

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(RepositoryError::Shutdown)) => {
                self.ctx.msg_sender = None;
                return Err(RepositoryError::Shutdown);
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        if let Some(message) = failure {
            self.handle_internal_exception(data, &message);
        }
        self.ctx.msg_sender = None;
        Ok(())
    }

    fn handle_internal_exception(&mut self, data: &[u8], message: &str) {
        let sender = InternalDatagram::peek_sender(data);
        error!(
            "Internal exception while handling message from {:?}: {}",
            sender, message
        );

        let mut body = Map::new();
        body.insert("sender".to_string(), json!(sender));
        body.insert("message".to_string(), json!(message));
        if let Err(e) = self.ctx.write_server_event("internal-exception", body) {
            warn!("Failed to write internal-exception event: {}", e);
        }

        if let Some(sender) = sender {
            if let Err(e) = self
                .ctx
                .eject(sender, EJECT_CODE_SERVER_ERROR, EJECT_REASON_SERVER_ERROR)
            {
                warn!("Failed to eject {}: {}", sender, e);
            }
        }
    }

    /// Tears the role down and releases every object.
    pub fn shutdown(&mut self) -> Result<(), RepositoryError> {
        info!("Shutting down {} repository", self.role.name());
        if self.role == ServerRole::Ai {
            self.stop_shard()?;
        }

        self.objects.clear(&mut self.ctx);
        self.connected = false;
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
