//! Client connection state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Login -> WaitForBaseInterest -> ChooseCharacter
//!                                                            \-> NoServers
//! (any) -> ConnectionFailure -> Exit | Disconnected (reconnect)
//! ```
//!
//! The machine consumes [`ClientEvent`]s drained from the repository. Every
//! transition runs the old state's exit side effects before the new state's
//! enter side effects. ConnectionFailure is guarded: once in it, further
//! failures (a lost connection right after an eject, say) are ignored so the
//! player sees exactly one failure.

use crate::error::ClientError;
use crate::interface::ClientInterface;
use crate::repository::{ClientEvent, ClientRepository};
use log::{debug, info, warn};
use rand::Rng;
use shared::config::{ClientConfig, FailurePolicy};
use shared::constants::{FAILURE_CODE_CONNECT, FAILURE_CODE_LOST_CONNECTION, STARTING_NETWORK_ZONES};
use shared::ZoneId;
use std::time::Duration;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

const LOST_CONNECTION_REASON: &str = "Connection to the game server was lost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Login,
    /// `armed` once the base interest was opened; completion is only
    /// honoured while armed.
    WaitForBaseInterest { armed: bool },
    NoServers,
    ChooseCharacter,
    ConnectionFailure { code: u16, reason: String },
    Exit,
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Idle,
    Connect { host: String, port: u16 },
    Reconnect { delay: Duration },
    Exit,
}

fn is_base_interest(zones: &[ZoneId]) -> bool {
    !zones.is_empty() && zones.iter().all(|zone| STARTING_NETWORK_ZONES.contains(zone))
}

fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = delay.as_millis() as u64 / 2;
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}

pub struct ConnectionStateMachine {
    state: ConnectionState,
    config: ClientConfig,
    interface: Box<dyn ClientInterface>,
    heartbeat_active: bool,
    reconnect_attempts: u32,
}

impl ConnectionStateMachine {
    pub fn new(config: ClientConfig, interface: Box<dyn ClientInterface>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            interface,
            heartbeat_active: false,
            reconnect_attempts: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_active
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// True when the driver should stop pumping and ask for a dismissal.
    pub fn awaiting_dismissal(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::ConnectionFailure { .. } | ConnectionState::NoServers
        )
    }

    /// Starts a connection attempt from Disconnected.
    pub fn connect(&mut self, repository: &mut ClientRepository) -> Result<Directive, ClientError> {
        if self.state != ConnectionState::Disconnected {
            warn!("Connect requested while {:?}, ignoring", self.state);
            return Ok(Directive::Idle);
        }

        self.transition(repository, ConnectionState::Connecting)?;
        Ok(Directive::Connect {
            host: self.config.ca_host.clone(),
            port: self.config.ca_port,
        })
    }

    /// Feeds every pending repository event through the machine.
    pub fn process_events(&mut self, repository: &mut ClientRepository) -> Result<(), ClientError> {
        loop {
            let events = repository.drain_events();
            if events.is_empty() {
                return Ok(());
            }
            for event in events {
                self.handle_event(repository, event)?;
            }
        }
    }

    pub fn handle_event(
        &mut self,
        repository: &mut ClientRepository,
        event: ClientEvent,
    ) -> Result<(), ClientError> {
        let state = self.state.clone();

        match (state, event) {
            (_, ClientEvent::Ejected { code, reason }) => self.fail(repository, code, reason),
            (_, ClientEvent::LostConnection) => self.fail(
                repository,
                FAILURE_CODE_LOST_CONNECTION,
                LOST_CONNECTION_REASON.to_string(),
            ),
            (_, ClientEvent::ShardListUpdated) => {
                self.interface.shard_list_updated(repository.shards());
                Ok(())
            }
            (ConnectionState::Connecting, ClientEvent::TransportConnected) => {
                let sent = repository.send_hello();
                self.fail_on_connection_error(repository, sent)
            }
            (ConnectionState::Connecting, ClientEvent::TransportFailed { reason }) => {
                self.fail(repository, FAILURE_CODE_CONNECT, reason)
            }
            (ConnectionState::Connecting, ClientEvent::HelloAcknowledged) => {
                self.reconnect_attempts = 0;
                repository.generate_global_objects()?;
                self.heartbeat_active = true;
                self.transition(repository, ConnectionState::Login)
            }
            (ConnectionState::Login, ClientEvent::AuthenticationSucceeded) => self.transition(
                repository,
                ConnectionState::WaitForBaseInterest { armed: false },
            ),
            (ConnectionState::Login, ClientEvent::AuthenticationFailed { code, message }) => {
                self.interface
                    .show_message("Login Failed", &format!("{} (code {})", message, code));
                Ok(())
            }
            (
                ConnectionState::WaitForBaseInterest { armed: false },
                ClientEvent::InterestAdded { zones, .. },
            ) => {
                if is_base_interest(&zones) {
                    self.state = ConnectionState::WaitForBaseInterest { armed: true };
                } else {
                    debug!("Interest on zones {:?} is not the base interest", zones);
                }
                Ok(())
            }
            (
                ConnectionState::WaitForBaseInterest { armed: true },
                ClientEvent::AllInterestsComplete,
            ) => {
                let next = if repository.has_available_shards() {
                    ConnectionState::ChooseCharacter
                } else {
                    ConnectionState::NoServers
                };
                self.transition(repository, next)
            }
            (state, event) => {
                debug!("Ignoring {:?} while {:?}", event, state);
                Ok(())
            }
        }
    }

    /// Sends credentials again after a failed attempt.
    pub fn retry_login(
        &mut self,
        repository: &mut ClientRepository,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        if self.state != ConnectionState::Login {
            warn!("Login retry requested while {:?}, ignoring", self.state);
            return Ok(());
        }
        let sent = repository.authenticate(email, password);
        self.fail_on_connection_error(repository, sent)
    }

    /// Sends a heartbeat if one is due in the current state.
    pub fn send_heartbeat(&mut self, repository: &mut ClientRepository) -> Result<(), ClientError> {
        if !self.heartbeat_active {
            return Ok(());
        }
        debug!("Sending heartbeat");
        let sent = repository.send_heartbeat();
        self.fail_on_connection_error(repository, sent)
    }

    /// Acknowledges a terminal screen. A connection failure either exits or
    /// schedules a reconnect, depending on the failure policy.
    pub fn dismiss(&mut self, repository: &mut ClientRepository) -> Result<Directive, ClientError> {
        match self.state {
            ConnectionState::ConnectionFailure { .. } => match self.config.failure_policy {
                FailurePolicy::Retry { attempts, delay } if self.reconnect_attempts < attempts => {
                    self.reconnect_attempts += 1;
                    let delay = with_jitter(delay);
                    info!(
                        "Reconnecting in {:?} (attempt {} of {})",
                        delay, self.reconnect_attempts, attempts
                    );
                    self.transition(repository, ConnectionState::Disconnected)?;
                    Ok(Directive::Reconnect { delay })
                }
                _ => {
                    self.transition(repository, ConnectionState::Exit)?;
                    Ok(Directive::Exit)
                }
            },
            ConnectionState::NoServers => {
                self.transition(repository, ConnectionState::Exit)?;
                Ok(Directive::Exit)
            }
            _ => Ok(Directive::Idle),
        }
    }

    /// A send that hit a dead connection ends the attempt instead of the
    /// process. Anything else is returned as is.
    fn fail_on_connection_error(
        &mut self,
        repository: &mut ClientRepository,
        result: Result<(), ClientError>,
    ) -> Result<(), ClientError> {
        match result {
            Err(e) if e.is_connection_error() => {
                warn!("Send to the Client Agent failed: {}", e);
                self.fail(
                    repository,
                    FAILURE_CODE_LOST_CONNECTION,
                    LOST_CONNECTION_REASON.to_string(),
                )
            }
            other => other,
        }
    }

    fn fail(
        &mut self,
        repository: &mut ClientRepository,
        code: u16,
        reason: String,
    ) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::ConnectionFailure { .. } | ConnectionState::Exit => {
                debug!("Ignoring failure {} ({}), already closed", code, reason);
                Ok(())
            }
            _ => self.transition(repository, ConnectionState::ConnectionFailure { code, reason }),
        }
    }

    fn transition(
        &mut self,
        repository: &mut ClientRepository,
        next: ConnectionState,
    ) -> Result<(), ClientError> {
        debug!("{:?} -> {:?}", self.state, next);
        self.exit_state(&next);
        self.state = next;
        self.enter_state(repository)
    }

    fn exit_state(&mut self, next: &ConnectionState) {
        let going_offline = matches!(
            next,
            ConnectionState::ConnectionFailure { .. }
                | ConnectionState::Disconnected
                | ConnectionState::Exit
        );
        if going_offline && self.heartbeat_active {
            debug!("Stopping heartbeat");
            self.heartbeat_active = false;
        }
    }

    fn enter_state(&mut self, repository: &mut ClientRepository) -> Result<(), ClientError> {
        match &self.state {
            ConnectionState::Connecting => {
                info!(
                    "Connecting to {}:{}...",
                    self.config.ca_host, self.config.ca_port
                );
            }
            ConnectionState::Login => match (&self.config.email, &self.config.password) {
                (Some(email), Some(password)) => {
                    let sent = repository.authenticate(email, password);
                    return self.fail_on_connection_error(repository, sent);
                }
                _ => {
                    warn!("No credentials configured, waiting for a manual login");
                    self.interface
                        .show_message("Login", "Set PQ_EMAIL and PQ_PASSWORD to log in.");
                }
            },
            ConnectionState::WaitForBaseInterest { .. } => {
                info!("Waiting for server to assign base interest...");
                if repository
                    .open_interests()
                    .any(|interest| is_base_interest(&interest.zones))
                {
                    self.state = ConnectionState::WaitForBaseInterest { armed: true };
                }
            }
            ConnectionState::NoServers => {
                warn!("There are no shards available to connect to");
                self.interface.show_message(
                    "No Servers",
                    "There are no game servers available right now.",
                );
            }
            ConnectionState::ChooseCharacter => {
                info!("Shard available, entering character selection");
                if repository.shards().active_shard_id().is_none() {
                    let first_available = repository
                        .shards()
                        .shards()
                        .into_iter()
                        .find(|shard| shard.available)
                        .map(|shard| shard.do_id);
                    if let Some(do_id) = first_available {
                        repository.select_shard(do_id);
                    }
                }
                self.interface.enter_character_selection(repository.shards());
            }
            ConnectionState::ConnectionFailure { code, reason } => {
                warn!(
                    "Connection to the game server has been closed (Code: {} | Reason: {})",
                    code, reason
                );
                let (code, reason) = (*code, reason.clone());
                self.interface.show_connection_failure(code, &reason);
            }
            ConnectionState::Disconnected | ConnectionState::Exit => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::RecordingInterface;
    use shared::constants::DOG_LOGIN_MANAGER;
    use shared::field_args;
    use shared::protocol::ClientMessage;
    use shared::schema::DISTRIBUTED_SHARD_SERVER;
    use shared::Datagram;
    use tokio::sync::mpsc;

    struct Harness {
        repository: ClientRepository,
        machine: ConnectionStateMachine,
        interface: RecordingInterface,
        sent: mpsc::UnboundedReceiver<Datagram>,
    }

    impl Harness {
        fn new(failure_policy: FailurePolicy) -> Self {
            let config = ClientConfig {
                ca_host: "127.0.0.1".to_string(),
                ca_port: 6667,
                email: Some("guest".to_string()),
                password: Some("guest".to_string()),
                manual_dc_hash: None,
                failure_policy,
            };
            let interface = RecordingInterface::new();
            let mut repository = ClientRepository::new(None).unwrap();
            let mut machine = ConnectionStateMachine::new(config, Box::new(interface.clone()));

            machine.connect(&mut repository).unwrap();
            let (tx, sent) = mpsc::unbounded_channel();
            repository.connect_transport(tx);
            machine.process_events(&mut repository).unwrap();

            Self {
                repository,
                machine,
                interface,
                sent,
            }
        }

        fn deliver(&mut self, message: ClientMessage) {
            let dg = message.encode().unwrap();
            self.repository.handle_datagram(dg.as_bytes()).unwrap();
            self.machine.process_events(&mut self.repository).unwrap();
        }

        fn sent(&mut self) -> Vec<ClientMessage> {
            let mut out = Vec::new();
            while let Ok(dg) = self.sent.try_recv() {
                out.push(ClientMessage::decode(dg.as_bytes()).unwrap());
            }
            out
        }

        fn login_manager(&mut self, field: &str, args: shared::FieldArgs) {
            self.deliver(ClientMessage::ObjectSetField {
                do_id: DOG_LOGIN_MANAGER,
                field: field.to_string(),
                args,
            });
        }

        fn logged_in(failure_policy: FailurePolicy) -> Self {
            let mut harness = Self::new(failure_policy);
            harness.deliver(ClientMessage::HelloResp);
            harness.login_manager("authentication_success", field_args![]);
            harness.sent();
            harness
        }
    }

    fn base_interest() -> ClientMessage {
        ClientMessage::AddInterestMultiple {
            context: 1,
            interest_id: 1,
            parent_id: 4000,
            zones: vec![1],
        }
    }

    fn base_interest_done() -> ClientMessage {
        ClientMessage::DoneInterestResp {
            context: 1,
            interest_id: 1,
        }
    }

    #[test]
    fn test_transport_connect_sends_hello() {
        let mut harness = Harness::new(FailurePolicy::Terminal);
        assert_eq!(harness.machine.state(), &ConnectionState::Connecting);
        assert!(matches!(
            harness.sent().as_slice(),
            [ClientMessage::Hello { .. }]
        ));
        assert!(!harness.machine.heartbeat_active());
    }

    #[test]
    fn test_hello_ack_enters_login_and_authenticates() {
        let mut harness = Harness::new(FailurePolicy::Terminal);
        harness.sent();
        harness.deliver(ClientMessage::HelloResp);

        assert_eq!(harness.machine.state(), &ConnectionState::Login);
        assert!(harness.machine.heartbeat_active());
        assert!(harness.repository.objects().contains(DOG_LOGIN_MANAGER));
        assert_eq!(
            harness.sent(),
            vec![ClientMessage::ObjectSetField {
                do_id: DOG_LOGIN_MANAGER,
                field: "login_with_email".to_string(),
                args: field_args!["guest", "guest"],
            }]
        );
    }

    #[test]
    fn test_auth_failure_stays_in_login_and_allows_retry() {
        let mut harness = Harness::new(FailurePolicy::Terminal);
        harness.deliver(ClientMessage::HelloResp);
        harness.sent();

        harness.login_manager(
            "authentication_failure",
            field_args![100u16, "Invalid email or password"],
        );
        assert_eq!(harness.machine.state(), &ConnectionState::Login);
        assert_eq!(harness.interface.messages().len(), 1);
        assert!(harness.interface.messages()[0].1.contains("100"));

        harness
            .machine
            .retry_login(&mut harness.repository, "guest", "guest")
            .unwrap();
        assert_eq!(harness.sent().len(), 1);

        harness.login_manager("authentication_success", field_args![]);
        assert_eq!(
            harness.machine.state(),
            &ConnectionState::WaitForBaseInterest { armed: false }
        );
    }

    #[test]
    fn test_unrelated_interest_does_not_arm() {
        let mut harness = Harness::logged_in(FailurePolicy::Terminal);
        harness.deliver(ClientMessage::AddInterestMultiple {
            context: 7,
            interest_id: 7,
            parent_id: 4000,
            zones: vec![2],
        });
        harness.deliver(ClientMessage::DoneInterestResp {
            context: 7,
            interest_id: 7,
        });
        assert_eq!(
            harness.machine.state(),
            &ConnectionState::WaitForBaseInterest { armed: false }
        );
    }

    #[test]
    fn test_base_interest_with_shard_chooses_character() {
        let mut harness = Harness::logged_in(FailurePolicy::Terminal);
        harness.deliver(base_interest());
        assert_eq!(
            harness.machine.state(),
            &ConnectionState::WaitForBaseInterest { armed: true }
        );

        harness.deliver(ClientMessage::EnterObjectRequired {
            do_id: 77,
            parent_id: 4000,
            zone_id: 1,
            class_name: DISTRIBUTED_SHARD_SERVER.to_string(),
            required: vec![
                ("set_name".to_string(), field_args!["Hacker Valley"]),
                ("set_available".to_string(), field_args![true]),
            ],
        });
        harness.deliver(base_interest_done());
        assert_eq!(harness.machine.state(), &ConnectionState::ChooseCharacter);
        assert_eq!(harness.repository.shards().active_shard_id(), Some(77));
    }

    #[test]
    fn test_base_interest_without_shards_offers_exit() {
        let mut harness = Harness::logged_in(FailurePolicy::Terminal);
        harness.deliver(base_interest());
        harness.deliver(base_interest_done());

        assert_eq!(harness.machine.state(), &ConnectionState::NoServers);
        assert!(harness.machine.awaiting_dismissal());
        assert_eq!(
            harness.machine.dismiss(&mut harness.repository).unwrap(),
            Directive::Exit
        );
        assert_eq!(harness.machine.state(), &ConnectionState::Exit);
    }

    #[test]
    fn test_eject_then_lost_connection_shows_one_failure() {
        let mut harness = Harness::logged_in(FailurePolicy::Terminal);
        harness.deliver(ClientMessage::Eject {
            code: 122,
            reason: "Bad credentials".to_string(),
        });
        harness.repository.handle_lost_connection();
        harness.machine.process_events(&mut harness.repository).unwrap();

        assert_eq!(
            harness.machine.state(),
            &ConnectionState::ConnectionFailure {
                code: 122,
                reason: "Bad credentials".to_string()
            }
        );
        assert_eq!(harness.interface.messages().len(), 1);
        assert!(!harness.machine.heartbeat_active());
    }

    #[test]
    fn test_send_after_writer_stopped_fails_the_connection() {
        let mut harness = Harness::new(FailurePolicy::Terminal);
        harness.sent.close();

        harness.deliver(ClientMessage::HelloResp);

        assert!(matches!(
            harness.machine.state(),
            ConnectionState::ConnectionFailure {
                code: FAILURE_CODE_LOST_CONNECTION,
                ..
            }
        ));
        assert_eq!(harness.interface.messages().len(), 1);
        assert!(!harness.machine.heartbeat_active());
        assert_eq!(
            harness.machine.dismiss(&mut harness.repository).unwrap(),
            Directive::Exit
        );
    }

    #[test]
    fn test_hello_on_closed_queue_fails_the_connection() {
        let config = ClientConfig {
            ca_host: "127.0.0.1".to_string(),
            ca_port: 6667,
            email: None,
            password: None,
            manual_dc_hash: None,
            failure_policy: FailurePolicy::Terminal,
        };
        let interface = RecordingInterface::new();
        let mut repository = ClientRepository::new(None).unwrap();
        let mut machine = ConnectionStateMachine::new(config, Box::new(interface.clone()));

        machine.connect(&mut repository).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        repository.connect_transport(tx);

        assert!(machine.process_events(&mut repository).is_ok());
        assert!(matches!(
            machine.state(),
            ConnectionState::ConnectionFailure { code: 2, .. }
        ));
        assert_eq!(interface.messages().len(), 1);
    }

    #[test]
    fn test_heartbeat_only_sent_while_active() {
        let mut harness = Harness::new(FailurePolicy::Terminal);
        harness.sent();

        harness.machine.send_heartbeat(&mut harness.repository).unwrap();
        assert!(harness.sent().is_empty());

        harness.deliver(ClientMessage::HelloResp);
        harness.sent();
        harness.machine.send_heartbeat(&mut harness.repository).unwrap();
        assert_eq!(harness.sent(), vec![ClientMessage::Heartbeat]);

        harness.sent.close();
        harness.machine.send_heartbeat(&mut harness.repository).unwrap();
        assert!(matches!(
            harness.machine.state(),
            ConnectionState::ConnectionFailure { code: 2, .. }
        ));
    }

    #[test]
    fn test_transport_failure_is_code_1() {
        let config = ClientConfig {
            ca_host: "127.0.0.1".to_string(),
            ca_port: 6667,
            email: None,
            password: None,
            manual_dc_hash: None,
            failure_policy: FailurePolicy::Terminal,
        };
        let mut repository = ClientRepository::new(None).unwrap();
        let mut machine = ConnectionStateMachine::new(config, Box::new(RecordingInterface::new()));

        machine.connect(&mut repository).unwrap();
        repository.transport_failed("connection refused");
        machine.process_events(&mut repository).unwrap();

        assert!(matches!(
            machine.state(),
            ConnectionState::ConnectionFailure { code: 1, .. }
        ));
        assert_eq!(machine.dismiss(&mut repository).unwrap(), Directive::Exit);
    }

    #[test]
    fn test_retry_policy_reconnects_until_attempts_run_out() {
        let delay = Duration::from_millis(200);
        let mut harness = Harness::new(FailurePolicy::Retry { attempts: 1, delay });
        harness.repository.handle_lost_connection();
        harness.machine.process_events(&mut harness.repository).unwrap();

        match harness.machine.dismiss(&mut harness.repository).unwrap() {
            Directive::Reconnect { delay: actual } => {
                assert!(actual >= delay);
                assert!(actual <= delay + delay / 2);
            }
            other => panic!("expected reconnect, got {:?}", other),
        }
        assert_eq!(harness.machine.state(), &ConnectionState::Disconnected);
        assert_eq!(harness.machine.reconnect_attempts(), 1);

        assert!(matches!(
            harness.machine.connect(&mut harness.repository).unwrap(),
            Directive::Connect { .. }
        ));
        harness.repository.transport_failed("connection refused");
        harness.machine.process_events(&mut harness.repository).unwrap();
        assert_eq!(
            harness.machine.dismiss(&mut harness.repository).unwrap(),
            Directive::Exit
        );
    }

    #[test]
    fn test_hello_ack_resets_reconnect_attempts() {
        let mut harness = Harness::new(FailurePolicy::Retry {
            attempts: 3,
            delay: Duration::from_millis(10),
        });
        harness.repository.handle_lost_connection();
        harness.machine.process_events(&mut harness.repository).unwrap();
        harness.machine.dismiss(&mut harness.repository).unwrap();
        assert_eq!(harness.machine.reconnect_attempts(), 1);

        harness.machine.connect(&mut harness.repository).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        harness.repository.connect_transport(tx);
        harness.deliver(ClientMessage::HelloResp);
        assert_eq!(harness.machine.reconnect_attempts(), 0);
    }
}
