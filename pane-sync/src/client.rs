//! WebSocket client driving a [`SyncEngine`].
//!
//! Provides:
//! - Connection lifecycle (connect, handshake, reconnect with backoff)
//! - A command channel for editor input ([`ClientHandle`])
//! - Off-loop content verification
//!
//! Everything that touches sync state happens inside [`SyncClient::run`];
//! socket reader/writer tasks and verification jobs only pass messages.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::connection::{Backoff, Connection, ConnectionEvent, ConnectionState};
use crate::delta::Delta;
use crate::engine::{EditorHost, SyncEngine};
use crate::error::SyncError;
use crate::layout::SizeHint;
use crate::protocol::{Action, DocumentId, Version};

/// Input accepted by the client loop.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    Edit {
        id: DocumentId,
        delta: Delta,
        base: Version,
    },
    Action(Action),
    Flush,
    Move {
        id: DocumentId,
        x: f64,
        y: f64,
    },
    UpdateSizes(BTreeMap<DocumentId, SizeHint>),
    Shutdown,
}

/// Events from the socket tasks, tagged with the socket generation.
#[derive(Debug)]
enum SocketEvent {
    Message { generation: u64, text: String },
    Closed { generation: u64 },
}

/// Cloneable sender side of the client loop.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub async fn send(&self, command: ClientCommand) -> Result<(), SyncError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::Transport("client loop has stopped".into()))
    }

    pub async fn edit(&self, id: DocumentId, delta: Delta, base: Version) -> Result<(), SyncError> {
        self.send(ClientCommand::Edit { id, delta, base }).await
    }

    pub async fn action(&self, action: Action) -> Result<(), SyncError> {
        self.send(ClientCommand::Action(action)).await
    }

    pub async fn flush(&self) -> Result<(), SyncError> {
        self.send(ClientCommand::Flush).await
    }

    pub async fn move_row(&self, id: DocumentId, x: f64, y: f64) -> Result<(), SyncError> {
        self.send(ClientCommand::Move { id, x, y }).await
    }

    pub async fn update_sizes(&self, sizes: BTreeMap<DocumentId, SizeHint>) -> Result<(), SyncError> {
        self.send(ClientCommand::UpdateSizes(sizes)).await
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.send(ClientCommand::Shutdown).await
    }
}

/// The sync client.
pub struct SyncClient<H> {
    config: ClientConfig,
    engine: SyncEngine<H, Connection>,
    commands: mpsc::Receiver<ClientCommand>,
    socket_tx: mpsc::UnboundedSender<SocketEvent>,
    socket_rx: mpsc::UnboundedReceiver<SocketEvent>,
    verify_tx: mpsc::UnboundedSender<Result<(), SyncError>>,
    verify_rx: mpsc::UnboundedReceiver<Result<(), SyncError>>,
}

impl<H: EditorHost> SyncClient<H> {
    /// Create a new client and the handle that feeds it.
    pub fn new(config: ClientConfig, host: H) -> (Self, ClientHandle) {
        let (tx, commands) = mpsc::channel(config.command_capacity);
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (verify_tx, verify_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Backoff::new(config.initial_backoff, config.max_backoff));

        let client = Self {
            config,
            engine: SyncEngine::new(host, connection),
            commands,
            socket_tx,
            socket_rx,
            verify_tx,
            verify_rx,
        };
        (client, ClientHandle { tx })
    }

    pub fn engine(&self) -> &SyncEngine<H, Connection> {
        &self.engine
    }

    /// Open a socket, replacing any previous one.
    ///
    /// Spawns background tasks for reading/writing WebSocket frames.
    async fn connect(&mut self) -> Result<(), SyncError> {
        self.engine.transport_mut().close();
        log::info!("Connecting to {}", self.config.server_url);

        let (stream, _) = tokio_tungstenite::connect_async(self.config.server_url.as_str())
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (mut writer, mut reader) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let generation = self.engine.transport_mut().open(out_tx)?;

        // Writer task: forward outgoing channel to WebSocket
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if writer.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = writer.close().await;
        });

        // Reader task: hand text frames to the loop
        let events = self.socket_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(msg) if msg.is_text() => {
                        let Ok(text) = msg.to_text() else {
                            continue;
                        };
                        let event = SocketEvent::Message {
                            generation,
                            text: text.to_owned(),
                        };
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                }
            }
            let _ = events.send(SocketEvent::Closed { generation });
        });

        Ok(())
    }

    /// Connect, returning the reconnect delay on failure.
    async fn try_connect(&mut self) -> Option<Duration> {
        match self.connect().await {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Connection attempt failed: {}", e);
                self.engine.transport_mut().close();
                Some(self.engine.transport_mut().next_backoff())
            }
        }
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) -> Result<(), SyncError> {
        let mut reconnect_at = self.try_connect().await.map(|d| Instant::now() + d);

        loop {
            let deadline = reconnect_at;
            let reconnect = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(event) = self.socket_rx.recv() => {
                    if let Some(delay) = self.on_socket_event(event) {
                        reconnect_at = Some(Instant::now() + delay);
                    }
                }
                command = self.commands.recv() => match command {
                    None | Some(ClientCommand::Shutdown) => break,
                    Some(command) => self.on_command(command),
                },
                Some(result) = self.verify_rx.recv() => {
                    self.engine.report_verification(result);
                }
                _ = reconnect => {
                    reconnect_at = None;
                    if self.engine.transport().state() == ConnectionState::Disconnected {
                        reconnect_at = self.try_connect().await.map(|d| Instant::now() + d);
                    } else {
                        log::debug!("Reconnect timer fired with a live socket, skipping");
                    }
                }
            }

            self.spawn_verifications();
        }

        log::info!("Sync client shutting down");
        self.engine.transport_mut().close();
        Ok(())
    }

    fn on_socket_event(&mut self, event: SocketEvent) -> Option<Duration> {
        match event {
            SocketEvent::Closed { generation } => {
                let delay = self.engine.transport_mut().on_close(generation);
                if delay.is_some() {
                    log::info!("Connection lost");
                }
                delay
            }
            SocketEvent::Message { generation, text } => {
                if !self.engine.transport().is_current(generation) {
                    return None;
                }
                match self.engine.transport_mut().on_message(&text) {
                    Ok(ConnectionEvent::Ready { .. }) => {
                        self.engine.on_ready();
                        None
                    }
                    Ok(ConnectionEvent::SessionConflict { previous, current }) => {
                        let err = SyncError::SessionConflict { previous, current };
                        self.engine.host_mut().signal_error(&err);
                        self.engine.reset();
                        None
                    }
                    Ok(ConnectionEvent::Update(message)) => {
                        self.engine.handle_message(message);
                        None
                    }
                    Ok(ConnectionEvent::Ignored) => None,
                    Err(e) => {
                        log::warn!("Discarding frame: {}", e);
                        // a rejected handshake drops the socket
                        if self.engine.transport().state() == ConnectionState::Disconnected {
                            Some(self.engine.transport_mut().next_backoff())
                        } else {
                            None
                        }
                    }
                }
            }
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        let result = match command {
            ClientCommand::Edit { id, delta, base } => self.engine.record_local_edit(id, &delta, base),
            ClientCommand::Action(action) => self.engine.action(action),
            ClientCommand::Flush => self.engine.flush(None),
            ClientCommand::Move { id, x, y } => self
                .engine
                .move_row(id, x, y)
                .map(|_| ())
                .map_err(SyncError::from),
            ClientCommand::UpdateSizes(sizes) => {
                self.engine.update_sizes(&sizes);
                Ok(())
            }
            ClientCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            if e.is_recoverable() {
                log::debug!("Command failed: {}", e);
            } else {
                log::warn!("Command failed: {}", e);
            }
        }
    }

    fn spawn_verifications(&mut self) {
        for job in self.engine.take_verifications() {
            let tx = self.verify_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(job.run_blocking().await);
            });
        }
    }
}
