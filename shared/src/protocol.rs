//! Message catalogue spoken with the Astron middleware
//!
//! Two dialects exist. [`ClientMessage`] is exchanged between a game client
//! and the Client Agent. [`InternalDatagram`] is exchanged between the AI and
//! UberDOG processes and the Message Director; it carries an explicit
//! recipient list and sender channel in front of the message type.

use crate::channel::{ChannelId, DoId, ZoneId};
use crate::constants::CONTROL_CHANNEL;
use crate::datagram::{Datagram, DatagramIterator};
use crate::error::DatagramError;
use crate::field::FieldArgs;

pub mod msg_types {
    pub const CLIENT_HELLO: u16 = 1;
    pub const CLIENT_HELLO_RESP: u16 = 2;
    pub const CLIENT_DISCONNECT: u16 = 3;
    pub const CLIENT_EJECT: u16 = 4;
    pub const CLIENT_HEARTBEAT: u16 = 5;
    pub const CLIENT_OBJECT_SET_FIELD: u16 = 120;
    pub const CLIENT_OBJECT_LEAVING: u16 = 132;
    pub const CLIENT_ENTER_OBJECT_REQUIRED: u16 = 142;
    pub const CLIENT_ADD_INTEREST_MULTIPLE: u16 = 201;
    pub const CLIENT_DONE_INTEREST_RESP: u16 = 204;

    pub const CLIENTAGENT_SET_STATE: u16 = 1000;
    pub const CLIENTAGENT_SET_CLIENT_ID: u16 = 1001;
    pub const CLIENTAGENT_EJECT: u16 = 1004;
    pub const CLIENTAGENT_ADD_INTEREST_MULTIPLE: u16 = 1201;

    pub const STATESERVER_CREATE_OBJECT_WITH_REQUIRED: u16 = 2000;
    pub const STATESERVER_OBJECT_DELETE_RAM: u16 = 2007;
    pub const STATESERVER_OBJECT_SET_FIELD: u16 = 2020;
    pub const STATESERVER_OBJECT_SET_AI: u16 = 2045;

    pub const CONTROL_ADD_CHANNEL: u16 = 9000;
    pub const CONTROL_REMOVE_CHANNEL: u16 = 9001;
    pub const CONTROL_SET_CON_NAME: u16 = 9012;
    pub const CONTROL_LOG_MESSAGE: u16 = 9014;
}

use msg_types::*;

/// Field name and arguments applied to an object before it is announced.
pub type RequiredField = (String, FieldArgs);

fn add_field_args(dg: &mut Datagram, args: &FieldArgs) -> Result<(), DatagramError> {
    dg.add_blob(&args.encode()?)
}

fn get_field_args(it: &mut DatagramIterator<'_>) -> Result<FieldArgs, DatagramError> {
    Ok(FieldArgs::decode(&it.get_blob()?)?)
}

fn add_required(dg: &mut Datagram, required: &[RequiredField]) -> Result<(), DatagramError> {
    dg.add_count(required.len())?;
    for (field, args) in required {
        dg.add_string(field)?;
        add_field_args(dg, args)?;
    }
    Ok(())
}

fn get_required(it: &mut DatagramIterator<'_>) -> Result<Vec<RequiredField>, DatagramError> {
    let count = it.get_u16()?;
    (0..count)
        .map(|_| -> Result<RequiredField, DatagramError> {
            Ok((it.get_string()?, get_field_args(it)?))
        })
        .collect()
}

fn add_zones(dg: &mut Datagram, zones: &[ZoneId]) -> Result<(), DatagramError> {
    dg.add_count(zones.len())?;
    for zone in zones {
        dg.add_u32(*zone);
    }
    Ok(())
}

fn get_zones(it: &mut DatagramIterator<'_>) -> Result<Vec<ZoneId>, DatagramError> {
    let count = it.get_u16()?;
    (0..count).map(|_| it.get_u32()).collect()
}

/// Messages between a game client and the Client Agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Hello {
        dc_hash: u32,
        version: String,
    },
    HelloResp,
    Disconnect,
    Eject {
        code: u16,
        reason: String,
    },
    Heartbeat,
    ObjectSetField {
        do_id: DoId,
        field: String,
        args: FieldArgs,
    },
    ObjectLeaving {
        do_id: DoId,
    },
    EnterObjectRequired {
        do_id: DoId,
        parent_id: DoId,
        zone_id: ZoneId,
        class_name: String,
        required: Vec<RequiredField>,
    },
    AddInterestMultiple {
        context: u32,
        interest_id: u16,
        parent_id: DoId,
        zones: Vec<ZoneId>,
    },
    DoneInterestResp {
        context: u32,
        interest_id: u16,
    },
}

impl ClientMessage {
    pub fn msg_type(&self) -> u16 {
        match self {
            ClientMessage::Hello { .. } => CLIENT_HELLO,
            ClientMessage::HelloResp => CLIENT_HELLO_RESP,
            ClientMessage::Disconnect => CLIENT_DISCONNECT,
            ClientMessage::Eject { .. } => CLIENT_EJECT,
            ClientMessage::Heartbeat => CLIENT_HEARTBEAT,
            ClientMessage::ObjectSetField { .. } => CLIENT_OBJECT_SET_FIELD,
            ClientMessage::ObjectLeaving { .. } => CLIENT_OBJECT_LEAVING,
            ClientMessage::EnterObjectRequired { .. } => CLIENT_ENTER_OBJECT_REQUIRED,
            ClientMessage::AddInterestMultiple { .. } => CLIENT_ADD_INTEREST_MULTIPLE,
            ClientMessage::DoneInterestResp { .. } => CLIENT_DONE_INTEREST_RESP,
        }
    }

    pub fn encode(&self) -> Result<Datagram, DatagramError> {
        let mut dg = Datagram::new();
        dg.add_u16(self.msg_type());

        match self {
            ClientMessage::Hello { dc_hash, version } => {
                dg.add_u32(*dc_hash);
                dg.add_string(version)?;
            }
            ClientMessage::HelloResp | ClientMessage::Disconnect | ClientMessage::Heartbeat => {}
            ClientMessage::Eject { code, reason } => {
                dg.add_u16(*code);
                dg.add_string(reason)?;
            }
            ClientMessage::ObjectSetField { do_id, field, args } => {
                dg.add_u32(*do_id);
                dg.add_string(field)?;
                add_field_args(&mut dg, args)?;
            }
            ClientMessage::ObjectLeaving { do_id } => dg.add_u32(*do_id),
            ClientMessage::EnterObjectRequired {
                do_id,
                parent_id,
                zone_id,
                class_name,
                required,
            } => {
                dg.add_u32(*do_id);
                dg.add_u32(*parent_id);
                dg.add_u32(*zone_id);
                dg.add_string(class_name)?;
                add_required(&mut dg, required)?;
            }
            ClientMessage::AddInterestMultiple {
                context,
                interest_id,
                parent_id,
                zones,
            } => {
                dg.add_u32(*context);
                dg.add_u16(*interest_id);
                dg.add_u32(*parent_id);
                add_zones(&mut dg, zones)?;
            }
            ClientMessage::DoneInterestResp {
                context,
                interest_id,
            } => {
                dg.add_u32(*context);
                dg.add_u16(*interest_id);
            }
        }

        Ok(dg)
    }

    pub fn decode(data: &[u8]) -> Result<Self, DatagramError> {
        let mut it = DatagramIterator::new(data);
        let msg_type = it.get_u16()?;

        let message = match msg_type {
            CLIENT_HELLO => ClientMessage::Hello {
                dc_hash: it.get_u32()?,
                version: it.get_string()?,
            },
            CLIENT_HELLO_RESP => ClientMessage::HelloResp,
            CLIENT_DISCONNECT => ClientMessage::Disconnect,
            CLIENT_EJECT => ClientMessage::Eject {
                code: it.get_u16()?,
                reason: it.get_string()?,
            },
            CLIENT_HEARTBEAT => ClientMessage::Heartbeat,
            CLIENT_OBJECT_SET_FIELD => ClientMessage::ObjectSetField {
                do_id: it.get_u32()?,
                field: it.get_string()?,
                args: get_field_args(&mut it)?,
            },
            CLIENT_OBJECT_LEAVING => ClientMessage::ObjectLeaving {
                do_id: it.get_u32()?,
            },
            CLIENT_ENTER_OBJECT_REQUIRED => ClientMessage::EnterObjectRequired {
                do_id: it.get_u32()?,
                parent_id: it.get_u32()?,
                zone_id: it.get_u32()?,
                class_name: it.get_string()?,
                required: get_required(&mut it)?,
            },
            CLIENT_ADD_INTEREST_MULTIPLE => ClientMessage::AddInterestMultiple {
                context: it.get_u32()?,
                interest_id: it.get_u16()?,
                parent_id: it.get_u32()?,
                zones: get_zones(&mut it)?,
            },
            CLIENT_DONE_INTEREST_RESP => ClientMessage::DoneInterestResp {
                context: it.get_u32()?,
                interest_id: it.get_u16()?,
            },
            other => return Err(DatagramError::UnknownMessage(other)),
        };

        it.finish()?;
        Ok(message)
    }
}

/// Bodies of messages exchanged with the Message Director.
#[derive(Debug, Clone, PartialEq)]
pub enum InternalMessage {
    AddChannel {
        channel: ChannelId,
    },
    RemoveChannel {
        channel: ChannelId,
    },
    SetConName {
        name: String,
    },
    LogMessage {
        payload: Vec<u8>,
    },
    ClientAgentSetState {
        state: u16,
    },
    ClientAgentSetClientId {
        channel: ChannelId,
    },
    ClientAgentEject {
        code: u16,
        reason: String,
    },
    ClientAgentAddInterestMultiple {
        context: u32,
        interest_id: u16,
        parent_id: DoId,
        zones: Vec<ZoneId>,
    },
    CreateObjectWithRequired {
        do_id: DoId,
        parent_id: DoId,
        zone_id: ZoneId,
        class_name: String,
        required: Vec<RequiredField>,
    },
    ObjectDeleteRam {
        do_id: DoId,
    },
    ObjectSetField {
        do_id: DoId,
        field: String,
        args: FieldArgs,
    },
    ObjectSetAi {
        ai_channel: ChannelId,
    },
    /// A message type this layer does not interpret.
    Other {
        msg_type: u16,
    },
}

impl InternalMessage {
    pub fn msg_type(&self) -> u16 {
        match self {
            InternalMessage::AddChannel { .. } => CONTROL_ADD_CHANNEL,
            InternalMessage::RemoveChannel { .. } => CONTROL_REMOVE_CHANNEL,
            InternalMessage::SetConName { .. } => CONTROL_SET_CON_NAME,
            InternalMessage::LogMessage { .. } => CONTROL_LOG_MESSAGE,
            InternalMessage::ClientAgentSetState { .. } => CLIENTAGENT_SET_STATE,
            InternalMessage::ClientAgentSetClientId { .. } => CLIENTAGENT_SET_CLIENT_ID,
            InternalMessage::ClientAgentEject { .. } => CLIENTAGENT_EJECT,
            InternalMessage::ClientAgentAddInterestMultiple { .. } => {
                CLIENTAGENT_ADD_INTEREST_MULTIPLE
            }
            InternalMessage::CreateObjectWithRequired { .. } => {
                STATESERVER_CREATE_OBJECT_WITH_REQUIRED
            }
            InternalMessage::ObjectDeleteRam { .. } => STATESERVER_OBJECT_DELETE_RAM,
            InternalMessage::ObjectSetField { .. } => STATESERVER_OBJECT_SET_FIELD,
            InternalMessage::ObjectSetAi { .. } => STATESERVER_OBJECT_SET_AI,
            InternalMessage::Other { msg_type } => *msg_type,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            InternalMessage::AddChannel { .. }
                | InternalMessage::RemoveChannel { .. }
                | InternalMessage::SetConName { .. }
                | InternalMessage::LogMessage { .. }
        )
    }

    fn encode_body(&self, dg: &mut Datagram) -> Result<(), DatagramError> {
        match self {
            InternalMessage::AddChannel { channel } | InternalMessage::RemoveChannel { channel } => {
                dg.add_u64(*channel)
            }
            InternalMessage::SetConName { name } => dg.add_string(name)?,
            InternalMessage::LogMessage { payload } => dg.add_blob(payload)?,
            InternalMessage::ClientAgentSetState { state } => dg.add_u16(*state),
            InternalMessage::ClientAgentSetClientId { channel } => dg.add_u64(*channel),
            InternalMessage::ClientAgentEject { code, reason } => {
                dg.add_u16(*code);
                dg.add_string(reason)?;
            }
            InternalMessage::ClientAgentAddInterestMultiple {
                context,
                interest_id,
                parent_id,
                zones,
            } => {
                dg.add_u32(*context);
                dg.add_u16(*interest_id);
                dg.add_u32(*parent_id);
                add_zones(dg, zones)?;
            }
            InternalMessage::CreateObjectWithRequired {
                do_id,
                parent_id,
                zone_id,
                class_name,
                required,
            } => {
                dg.add_u32(*do_id);
                dg.add_u32(*parent_id);
                dg.add_u32(*zone_id);
                dg.add_string(class_name)?;
                add_required(dg, required)?;
            }
            InternalMessage::ObjectDeleteRam { do_id } => dg.add_u32(*do_id),
            InternalMessage::ObjectSetField { do_id, field, args } => {
                dg.add_u32(*do_id);
                dg.add_string(field)?;
                add_field_args(dg, args)?;
            }
            InternalMessage::ObjectSetAi { ai_channel } => dg.add_u64(*ai_channel),
            InternalMessage::Other { .. } => {}
        }
        Ok(())
    }

    fn decode_body(msg_type: u16, it: &mut DatagramIterator<'_>) -> Result<Self, DatagramError> {
        let message = match msg_type {
            CONTROL_ADD_CHANNEL => InternalMessage::AddChannel {
                channel: it.get_u64()?,
            },
            CONTROL_REMOVE_CHANNEL => InternalMessage::RemoveChannel {
                channel: it.get_u64()?,
            },
            CONTROL_SET_CON_NAME => InternalMessage::SetConName {
                name: it.get_string()?,
            },
            CONTROL_LOG_MESSAGE => InternalMessage::LogMessage {
                payload: it.get_blob()?,
            },
            CLIENTAGENT_SET_STATE => InternalMessage::ClientAgentSetState {
                state: it.get_u16()?,
            },
            CLIENTAGENT_SET_CLIENT_ID => InternalMessage::ClientAgentSetClientId {
                channel: it.get_u64()?,
            },
            CLIENTAGENT_EJECT => InternalMessage::ClientAgentEject {
                code: it.get_u16()?,
                reason: it.get_string()?,
            },
            CLIENTAGENT_ADD_INTEREST_MULTIPLE => InternalMessage::ClientAgentAddInterestMultiple {
                context: it.get_u32()?,
                interest_id: it.get_u16()?,
                parent_id: it.get_u32()?,
                zones: get_zones(it)?,
            },
            STATESERVER_CREATE_OBJECT_WITH_REQUIRED => InternalMessage::CreateObjectWithRequired {
                do_id: it.get_u32()?,
                parent_id: it.get_u32()?,
                zone_id: it.get_u32()?,
                class_name: it.get_string()?,
                required: get_required(it)?,
            },
            STATESERVER_OBJECT_DELETE_RAM => InternalMessage::ObjectDeleteRam {
                do_id: it.get_u32()?,
            },
            STATESERVER_OBJECT_SET_FIELD => InternalMessage::ObjectSetField {
                do_id: it.get_u32()?,
                field: it.get_string()?,
                args: get_field_args(it)?,
            },
            STATESERVER_OBJECT_SET_AI => InternalMessage::ObjectSetAi {
                ai_channel: it.get_u64()?,
            },
            other => {
                return Ok(InternalMessage::Other { msg_type: other });
            }
        };

        it.finish()?;
        Ok(message)
    }
}

/// A message with its Message Director routing header.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalDatagram {
    pub recipients: Vec<ChannelId>,
    /// Absent on control messages.
    pub sender: Option<ChannelId>,
    pub message: InternalMessage,
}

impl InternalDatagram {
    pub fn control(message: InternalMessage) -> Self {
        Self {
            recipients: vec![CONTROL_CHANNEL],
            sender: None,
            message,
        }
    }

    pub fn routed(recipients: Vec<ChannelId>, sender: ChannelId, message: InternalMessage) -> Self {
        Self {
            recipients,
            sender: Some(sender),
            message,
        }
    }

    pub fn encode(&self) -> Result<Datagram, DatagramError> {
        let mut dg = match self.sender {
            Some(sender) => {
                Datagram::server_header(&self.recipients, sender, self.message.msg_type())?
            }
            None => Datagram::control_header(self.message.msg_type()),
        };
        self.message.encode_body(&mut dg)?;
        Ok(dg)
    }

    pub fn decode(data: &[u8]) -> Result<Self, DatagramError> {
        let mut it = DatagramIterator::new(data);
        let count = it.get_u8()?;
        let recipients = (0..count)
            .map(|_| it.get_u64())
            .collect::<Result<Vec<_>, _>>()?;

        let sender = if recipients == [CONTROL_CHANNEL] {
            None
        } else {
            Some(it.get_u64()?)
        };

        let msg_type = it.get_u16()?;
        let message = InternalMessage::decode_body(msg_type, &mut it)?;

        Ok(Self {
            recipients,
            sender,
            message,
        })
    }

    /// Decodes only the routing header, so a sender can be identified even
    /// when the body is malformed.
    pub fn peek_sender(data: &[u8]) -> Option<ChannelId> {
        let mut it = DatagramIterator::new(data);
        let count = it.get_u8().ok()?;
        let mut only_control = count == 1;
        for _ in 0..count {
            if it.get_u64().ok()? != CONTROL_CHANNEL {
                only_control = false;
            }
        }
        if only_control {
            return None;
        }
        it.get_u64().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_args;

    #[test]
    fn test_hello_wire_format() {
        let hello = ClientMessage::Hello {
            dc_hash: 0xDEADBEEF,
            version: "quest-dev".to_string(),
        };
        let dg = hello.encode().unwrap();

        let mut it = dg.iter();
        assert_eq!(it.get_u16().unwrap(), CLIENT_HELLO);
        assert_eq!(it.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(it.get_string().unwrap(), "quest-dev");
        assert!(it.finish().is_ok());
    }

    #[test]
    fn test_client_messages_decode() {
        let messages = vec![
            ClientMessage::HelloResp,
            ClientMessage::Eject {
                code: 122,
                reason: "Bad credentials".to_string(),
            },
            ClientMessage::ObjectSetField {
                do_id: 77,
                field: "set_available".to_string(),
                args: field_args![true],
            },
            ClientMessage::EnterObjectRequired {
                do_id: 77,
                parent_id: 4000,
                zone_id: 1,
                class_name: "DistributedShardServer".to_string(),
                required: vec![("set_name".to_string(), field_args!["Hacker Valley"])],
            },
            ClientMessage::AddInterestMultiple {
                context: 1,
                interest_id: 2,
                parent_id: 4000,
                zones: vec![1, 2],
            },
        ];

        for message in messages {
            let dg = message.encode().unwrap();
            assert_eq!(ClientMessage::decode(dg.as_bytes()).unwrap(), message);
        }
    }

    #[test]
    fn test_unknown_client_message() {
        let mut dg = Datagram::new();
        dg.add_u16(9999);
        assert!(matches!(
            ClientMessage::decode(dg.as_bytes()),
            Err(DatagramError::UnknownMessage(9999))
        ));
    }

    #[test]
    fn test_control_datagram_has_no_sender() {
        let dg = InternalDatagram::control(InternalMessage::AddChannel { channel: 300001 })
            .encode()
            .unwrap();

        let decoded = InternalDatagram::decode(dg.as_bytes()).unwrap();
        assert_eq!(decoded.sender, None);
        assert_eq!(decoded.recipients, vec![CONTROL_CHANNEL]);
        assert_eq!(decoded.message, InternalMessage::AddChannel { channel: 300001 });
        assert_eq!(InternalDatagram::peek_sender(dg.as_bytes()), None);
    }

    #[test]
    fn test_routed_set_field() {
        let original = InternalDatagram::routed(
            vec![4100],
            (5u64 << 32) | 9,
            InternalMessage::ObjectSetField {
                do_id: 4100,
                field: "login_with_email".to_string(),
                args: field_args!["guest", "guest"],
            },
        );
        let dg = original.encode().unwrap();

        assert_eq!(InternalDatagram::decode(dg.as_bytes()).unwrap(), original);
        assert_eq!(InternalDatagram::peek_sender(dg.as_bytes()), Some((5u64 << 32) | 9));
    }

    #[test]
    fn test_oversized_zone_list_is_rejected() {
        let message = ClientMessage::AddInterestMultiple {
            context: 1,
            interest_id: 1,
            parent_id: 4000,
            zones: vec![1; 70_000],
        };
        assert!(matches!(
            message.encode(),
            Err(DatagramError::TooManyEntries { count: 70_000, .. })
        ));
    }

    #[test]
    fn test_unhandled_internal_type_is_preserved() {
        let dg = Datagram::server_header(&[10], 20, 4321).unwrap();
        let decoded = InternalDatagram::decode(dg.as_bytes()).unwrap();
        assert_eq!(decoded.message, InternalMessage::Other { msg_type: 4321 });
    }

    #[test]
    fn test_malformed_body_keeps_sender_visible() {
        let mut dg = Datagram::server_header(&[4100], 77, STATESERVER_OBJECT_SET_FIELD).unwrap();
        dg.add_u32(4100);
        dg.add_u16(40);

        assert!(InternalDatagram::decode(dg.as_bytes()).is_err());
        assert_eq!(InternalDatagram::peek_sender(dg.as_bytes()), Some(77));
    }
}
