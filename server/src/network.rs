//! Server network layer: Message Director connection and the poll loop.

use crate::error::RepositoryError;
use crate::events::EventSink;
use crate::repository::InternalRepository;
use log::{info, warn};
use shared::config::InternalConfig;
use shared::transport::{spawn_reader, spawn_writer};
use shared::Datagram;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Drives one internal repository over a Message Director connection.
pub struct InternalServer {
    repository: InternalRepository,
    frames_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl InternalServer {
    /// Connects to the Message Director and builds the process repository.
    pub async fn connect(
        config: &InternalConfig,
        events: Box<dyn EventSink>,
    ) -> Result<Self, RepositoryError> {
        let address = format!("{}:{}", config.astron_host, config.astron_port);
        info!("Connecting to Message Director at {}", address);

        let stream = TcpStream::connect(&address).await?;
        stream.set_nodelay(true)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let repository = InternalRepository::instantiate_singleton(config, outbound_tx, events)?;
        Ok(Self::with_stream(stream, repository, outbound_rx))
    }

    /// Wires an already built repository to a connected stream.
    ///
    /// `outbound_rx` must be the receiving end of the repository's
    /// outbound queue.
    pub fn with_stream(
        stream: TcpStream,
        repository: InternalRepository,
        outbound_rx: mpsc::UnboundedReceiver<Datagram>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        Self {
            repository,
            frames_rx,
            reader: spawn_reader(read_half, frames_tx),
            writer: spawn_writer(write_half, outbound_rx),
        }
    }

    pub fn repository(&self) -> &InternalRepository {
        &self.repository
    }

    /// Runs until shutdown is requested, Ctrl+C is pressed or the Message
    /// Director goes away, then tears the role down and flushes the queue.
    pub async fn run(mut self) -> Result<(), RepositoryError> {
        self.repository.handle_connected()?;

        loop {
            tokio::select! {
                frame = self.frames_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = self.repository.poll_datagram(&frame) {
                                info!("Stopping poll loop: {}", e);
                                break;
                            }
                        }
                        None => {
                            warn!("Lost connection to the Message Director");
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    break;
                }
            }
        }

        let result = self.repository.shutdown();

        // Dropping the repository closes the outbound queue so the writer
        // drains what is left and exits.
        drop(self.repository);
        self.reader.abort();
        if let Err(e) = self.writer.await {
            warn!("Writer task ended abnormally: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use shared::config::{ServerRole, StartupVariables};
    use shared::protocol::{InternalDatagram, InternalMessage};
    use shared::transport::read_frame;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_run_subscribes_and_stops_on_lost_connection() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let vars =
                    StartupVariables::new(Vec::<(String, String)>::new(), Vec::<String>::new());
                let config = InternalConfig::from_vars(ServerRole::UberDog, &vars).unwrap();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let repository =
                    InternalRepository::new(&config, outbound_tx, Box::new(NullSink)).unwrap();

                let stream = TcpStream::connect(addr).await.unwrap();
                let (mut director, _) = listener.accept().await.unwrap();
                let server = InternalServer::with_stream(stream, repository, outbound_rx);
                let task = tokio::task::spawn_local(server.run());

                let first = read_frame(&mut director).await.unwrap().unwrap();
                let first = InternalDatagram::decode(&first).unwrap();
                assert_eq!(
                    first.message,
                    InternalMessage::AddChannel { channel: 300000 }
                );

                let second = read_frame(&mut director).await.unwrap().unwrap();
                let second = InternalDatagram::decode(&second).unwrap();
                assert_eq!(
                    second.message,
                    InternalMessage::SetConName {
                        name: "UberDOG 300000".to_string()
                    }
                );

                drop(director);
                assert!(task.await.unwrap().is_ok());
            })
            .await;
    }
}
