//! Client network layer: Client Agent connection, heartbeat and reconnects.

use crate::error::ClientError;
use crate::interface::ClientInterface;
use crate::repository::ClientRepository;
use crate::state::{ConnectionState, ConnectionStateMachine, Directive, HEARTBEAT_INTERVAL};
use log::{info, warn};
use shared::config::ClientConfig;
use shared::transport::{spawn_reader, spawn_writer};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

pub struct Client {
    repository: ClientRepository,
    machine: ConnectionStateMachine,
    heartbeat_interval: Duration,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        interface: Box<dyn ClientInterface>,
    ) -> Result<Self, ClientError> {
        let repository = ClientRepository::instantiate_singleton(config.manual_dc_hash)?;
        Ok(Self::with_repository(repository, config, interface))
    }

    pub fn with_repository(
        repository: ClientRepository,
        config: ClientConfig,
        interface: Box<dyn ClientInterface>,
    ) -> Self {
        Self {
            repository,
            machine: ConnectionStateMachine::new(config, interface),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &ConnectionStateMachine {
        &self.machine
    }

    pub fn repository(&self) -> &ClientRepository {
        &self.repository
    }

    /// Runs connection attempts until the machine decides to exit.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let mut directive = self.machine.connect(&mut self.repository)?;

        loop {
            directive = match directive {
                Directive::Connect { host, port } => self.run_connection(&host, port).await?,
                Directive::Reconnect { delay } => {
                    sleep(delay).await;
                    self.machine.connect(&mut self.repository)?
                }
                Directive::Exit | Directive::Idle => break,
            };
        }

        info!("Client stopped");
        Ok(())
    }

    /// Drives one Client Agent connection and returns what to do after it.
    async fn run_connection(&mut self, host: &str, port: u16) -> Result<Directive, ClientError> {
        let stream = match TcpStream::connect((host, port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to {}:{}: {}", host, port, e);
                self.repository
                    .transport_failed("Connection could not be established");
                self.machine.process_events(&mut self.repository)?;
                return self.machine.dismiss(&mut self.repository);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle's algorithm: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let reader = spawn_reader(read_half, frames_tx);
        let writer = spawn_writer(write_half, outbound_rx);

        self.repository.connect_transport(outbound_tx);
        self.machine.process_events(&mut self.repository)?;

        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately
        heartbeat.tick().await;

        let directive = loop {
            if self.machine.awaiting_dismissal() {
                break self.machine.dismiss(&mut self.repository)?;
            }

            tokio::select! {
                frame = frames_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = self.repository.handle_datagram(&frame) {
                                warn!("Dropping malformed message: {}", e);
                            }
                        }
                        None => self.repository.handle_lost_connection(),
                    }
                    self.machine.process_events(&mut self.repository)?;
                }
                _ = heartbeat.tick() => {
                    self.machine.send_heartbeat(&mut self.repository)?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, disconnecting...");
                    break Directive::Exit;
                }
            }
        };

        self.repository.disconnect();
        reader.abort();
        if let Err(e) = writer.await {
            warn!("Writer task ended abnormally: {}", e);
        }
        Ok(directive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::RecordingInterface;
    use shared::config::FailurePolicy;
    use shared::constants::DOG_LOGIN_MANAGER;
    use shared::field_args;
    use shared::protocol::ClientMessage;
    use shared::transport::{read_frame, write_frame};
    use tokio::net::TcpListener;

    fn client(port: u16, failure_policy: FailurePolicy) -> (Client, RecordingInterface) {
        let config = ClientConfig {
            ca_host: "127.0.0.1".to_string(),
            ca_port: port,
            email: Some("guest".to_string()),
            password: Some("guest".to_string()),
            manual_dc_hash: None,
            failure_policy,
        };
        let interface = RecordingInterface::new();
        let repository = ClientRepository::new(None).unwrap();
        let client = Client::with_repository(repository, config, Box::new(interface.clone()));
        (client, interface)
    }

    /// A port nothing listens on once the temporary listener is dropped.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn next_message(stream: &mut TcpStream) -> Option<ClientMessage> {
        read_frame(stream)
            .await
            .unwrap()
            .map(|frame| ClientMessage::decode(&frame).unwrap())
    }

    async fn send(stream: &mut TcpStream, message: ClientMessage) {
        write_frame(stream, &message.encode().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connect_shows_one_failure_and_exits() {
        let (mut client, interface) = client(closed_port().await, FailurePolicy::Terminal);

        client.run().await.unwrap();

        assert_eq!(client.state(), &ConnectionState::Exit);
        assert_eq!(
            interface.messages(),
            vec![(
                "Connection Failure".to_string(),
                "Could not connect to the game server.".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_closed_connection_shows_one_failure_and_exits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let agent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let (mut client, interface) = client(port, FailurePolicy::Terminal);
        client.run().await.unwrap();
        agent.await.unwrap();

        assert_eq!(client.state(), &ConnectionState::Exit);
        let messages = interface.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, "The connection to the game server was lost.");
        assert!(!client.repository().is_connected());
    }

    #[tokio::test]
    async fn test_retry_policy_reconnects_before_exiting() {
        let (mut client, interface) = client(
            closed_port().await,
            FailurePolicy::Retry {
                attempts: 1,
                delay: Duration::from_millis(10),
            },
        );

        client.run().await.unwrap();

        assert_eq!(client.state(), &ConnectionState::Exit);
        assert_eq!(client.machine().reconnect_attempts(), 1);
        assert_eq!(interface.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_session_heartbeats_only_after_hello_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let agent = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();

            seen.push(next_message(&mut stream).await.unwrap());
            send(&mut stream, ClientMessage::HelloResp).await;
            seen.push(next_message(&mut stream).await.unwrap());
            seen.push(next_message(&mut stream).await.unwrap());

            send(
                &mut stream,
                ClientMessage::ObjectSetField {
                    do_id: DOG_LOGIN_MANAGER,
                    field: "authentication_success".to_string(),
                    args: field_args![],
                },
            )
            .await;
            send(
                &mut stream,
                ClientMessage::AddInterestMultiple {
                    context: 1,
                    interest_id: 1,
                    parent_id: 4000,
                    zones: vec![1],
                },
            )
            .await;
            send(
                &mut stream,
                ClientMessage::DoneInterestResp {
                    context: 1,
                    interest_id: 1,
                },
            )
            .await;

            while let Some(message) = next_message(&mut stream).await {
                seen.push(message);
            }
            seen
        });

        let (client, interface) = client(port, FailurePolicy::Terminal);
        let mut client = client.with_heartbeat_interval(Duration::from_millis(20));
        client.run().await.unwrap();
        let seen = agent.await.unwrap();

        assert!(matches!(seen[0], ClientMessage::Hello { .. }));
        assert_eq!(
            seen[1],
            ClientMessage::ObjectSetField {
                do_id: DOG_LOGIN_MANAGER,
                field: "login_with_email".to_string(),
                args: field_args!["guest", "guest"],
            }
        );
        assert_eq!(seen[2], ClientMessage::Heartbeat);
        assert_eq!(seen.last(), Some(&ClientMessage::Disconnect));

        assert_eq!(client.state(), &ConnectionState::Exit);
        let messages = interface.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "No Servers");
    }
}
