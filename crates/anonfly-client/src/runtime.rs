//! Connection runtime.
//!
//! A single task owns the [`ChatClient`] and the open [`Transport`]. It
//! processes user intents and inbound frames one at a time. When the channel
//! closes while a room is joined it waits `reconnect_delay`, reconnects once,
//! and re-joins the room, which renegotiates the room key from scratch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use anonfly_common::{ClientMessage, Error, Result, ServerMessage};

use crate::chat::{ChatClient, ChatEvent};
use crate::session::Session;
use crate::transport::{Connector, Transport};

/// User intents accepted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Join(String),
    Send(String),
    Leave,
    Shutdown,
}

/// Front-end side of a running chat session.
pub struct ChatHandle {
    intents: mpsc::UnboundedSender<Intent>,
    pub events: mpsc::UnboundedReceiver<ChatEvent>,
}

impl ChatHandle {
    pub fn join(&self, room_id: &str) -> Result<()> {
        self.intent(Intent::Join(room_id.to_string()))
    }

    pub fn send(&self, text: &str) -> Result<()> {
        self.intent(Intent::Send(text.to_string()))
    }

    pub fn leave(&self) -> Result<()> {
        self.intent(Intent::Leave)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.intent(Intent::Shutdown)
    }

    fn intent(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| Error::internal("chat runtime has stopped"))
    }
}

enum Step {
    Intent(Option<Intent>),
    Inbound(Option<Result<ServerMessage>>),
    Reconnect,
}

pub struct ChatRuntime {
    connector: Arc<dyn Connector>,
    session: Session,
    client: ChatClient,
    reconnect_delay: Duration,
    transport: Option<Box<dyn Transport>>,
    reconnect_at: Option<Instant>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ChatRuntime {
    /// Connect and spawn the runtime task.
    ///
    /// Fails if the first connection cannot be opened.
    pub async fn start(
        connector: Arc<dyn Connector>,
        session: Session,
        client: ChatClient,
        reconnect_delay: Duration,
    ) -> Result<(ChatHandle, JoinHandle<()>)> {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut runtime = Self {
            connector,
            session,
            client,
            reconnect_delay,
            transport: None,
            reconnect_at: None,
            events: event_tx,
        };
        runtime.connect().await?;

        let task = tokio::spawn(runtime.run(intent_rx));
        Ok((
            ChatHandle {
                intents: intent_tx,
                events: event_rx,
            },
            task,
        ))
    }

    async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) {
        loop {
            self.flush_events();

            let step = match self.transport.as_mut() {
                Some(transport) => tokio::select! {
                    intent = intents.recv() => Step::Intent(intent),
                    inbound = transport.recv() => Step::Inbound(inbound),
                },
                None => {
                    let deadline = self.reconnect_at;
                    tokio::select! {
                        intent = intents.recv() => Step::Intent(intent),
                        _ = wait_until(deadline) => Step::Reconnect,
                    }
                }
            };

            match step {
                Step::Intent(None) | Step::Intent(Some(Intent::Shutdown)) => break,
                Step::Intent(Some(intent)) => self.apply_intent(intent).await,
                Step::Inbound(Some(Ok(msg))) => {
                    let out = self.client.handle_inbound(msg);
                    self.send_all(out).await;
                }
                Step::Inbound(Some(Err(e))) => self.client.on_transport_error(&e),
                Step::Inbound(None) => self.on_closed(),
                Step::Reconnect => {
                    self.reconnect_at = None;
                    info!("Reconnecting");
                    if let Err(e) = self.connect().await {
                        error!("Reconnect failed: {}", e);
                    }
                }
            }
        }

        let out = self.client.leave();
        self.send_all(out).await;
        self.flush_events();
        info!("Chat runtime stopped");
    }

    async fn apply_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Join(room_id) => {
                let out = self.client.join(&room_id);
                if self.transport.is_some() {
                    self.send_all(out).await;
                } else if self.reconnect_at.is_none() {
                    // The join frame is re-sent by on_connected.
                    self.reconnect_at = Some(Instant::now());
                }
            }
            Intent::Send(text) => {
                if let Ok(frame) = self.client.send(&text) {
                    self.send_all(vec![frame]).await;
                }
            }
            Intent::Leave => {
                let out = self.client.leave();
                self.send_all(out).await;
            }
            Intent::Shutdown => {}
        }
    }

    /// Open the channel. On success the client re-joins its room.
    async fn connect(&mut self) -> Result<()> {
        match self.connector.connect(&self.session.token).await {
            Ok(transport) => {
                info!("Connected as {}", self.session.aid);
                self.transport = Some(transport);
                let out = self.client.on_connected();
                self.send_all(out).await;
                Ok(())
            }
            Err(e) => {
                self.client.on_transport_error(&e);
                self.flush_events();
                Err(e)
            }
        }
    }

    fn on_closed(&mut self) {
        warn!("Connection closed");
        self.transport = None;
        self.client.on_disconnected();
        if self.client.should_reconnect() {
            debug!("Reconnect scheduled in {:?}", self.reconnect_delay);
            self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        }
    }

    async fn send_all(&mut self, frames: Vec<ClientMessage>) {
        let Some(transport) = self.transport.as_mut() else {
            if !frames.is_empty() {
                debug!("Not connected, dropping {} frame(s)", frames.len());
            }
            return;
        };
        for frame in frames {
            if let Err(e) = transport.send(&frame).await {
                self.client.on_transport_error(&e);
                return;
            }
        }
    }

    fn flush_events(&mut self) {
        for event in self.client.drain_events() {
            // The front end may have gone away; keep running until told to stop.
            let _ = self.events.send(event);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
