//! One client's view of one document over one connection.

use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use veil_codec::{
    DocMessage, Message, SnapshotFrame, StateVector, SyncStep2Frame, UpdateFrame, UpdateRecord,
};
use veil_connection::{Connection, ConnectionEvent, ConnectionState};
use veil_primitives::{ClientId, DocumentId, SnapshotId};

use crate::SessionError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a session reports to the layer that owns the keys.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A full snapshot superseding everything applied so far.
    Snapshot { id: SnapshotId, payload: Bytes },

    /// One accepted update, in server order, to layer on the snapshot.
    Update(UpdateRecord),

    /// The catch-up exchange for this document completed.
    Synced,
}

/// Where the session stands against the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub snapshot_id: Option<SnapshotId>,
    pub server_version: u64,
    pub synced: bool,
}

impl SessionState {
    fn vector(&self) -> StateVector {
        StateVector::new(self.snapshot_id.clone(), self.server_version)
    }
}

/// A scoped subscription to session events; dropping it unsubscribes.
#[derive(Debug)]
pub struct SessionSubscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    /// The next event, or `None` once the session is detached.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind session events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

enum Command {
    QueueUpdate(Bytes),
    SubmitSnapshot { id: SnapshotId, payload: Bytes },
    SetAwareness(Bytes),
}

/// Handle to a running document session.
///
/// Cheap to clone. The session follows its connection: it re-advertises and
/// re-syncs on every reconnect, and ends when the connection is destroyed.
#[derive(Clone, Debug)]
pub struct DocumentSession {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
}

impl DocumentSession {
    /// Attaches a session for `document` on top of `connection`, writing as
    /// `client`.
    #[must_use]
    pub fn attach(connection: Connection, document: DocumentId, client: ClientId) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::default());

        let task = SessionTask {
            subscription: connection.subscribe(),
            connection,
            document,
            client,
            commands: command_rx,
            events: event_tx.clone(),
            state_tx,
            state: SessionState::default(),
            next_counter: 1,
            pending: Vec::new(),
        };

        drop(tokio::spawn(task.run()));

        Self {
            commands: command_tx,
            events: event_tx,
            state: state_rx,
        }
    }

    /// Stamps `payload` with this client's next Lamport counter and sends
    /// it. Queued locally until a snapshot is established.
    pub fn queue_update(&self, payload: Bytes) -> Result<(), SessionError> {
        self.command(Command::QueueUpdate(payload))
    }

    /// Submits a snapshot superseding the current one (or establishing the
    /// document, when there is none yet).
    pub fn submit_snapshot(&self, id: SnapshotId, payload: Bytes) -> Result<(), SessionError> {
        self.command(Command::SubmitSnapshot { id, payload })
    }

    /// Ephemeral presence payload; relayed to peers, never stored.
    pub fn set_awareness(&self, payload: Bytes) -> Result<(), SessionError> {
        self.command(Command::SetAwareness(payload))
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            receiver: self.events.subscribe(),
        }
    }

    /// Completes once the catch-up exchange has finished (or immediately if
    /// it already has).
    pub async fn wait_until_synced(&self) -> Result<(), SessionError> {
        let mut state = self.state.clone();

        state
            .wait_for(|state| state.synced)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Detached)
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Detached)
    }
}

struct SessionTask {
    connection: Connection,
    subscription: veil_connection::Subscription,
    document: DocumentId,
    client: ClientId,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,

    /// Counter for the next locally created update; restarts at 1 under
    /// every new snapshot.
    next_counter: u64,

    /// Updates created before a snapshot existed; drained on adoption.
    pending: Vec<Bytes>,
}

impl SessionTask {
    async fn run(mut self) {
        // The connection may already be up; a session attached late still
        // has to advertise.
        if self.connection.state().is_connected() {
            self.advertise();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                event = self.subscription.recv() => {
                    let Some(event) = event else {
                        debug!(document_id = %self.document, "connection destroyed; session ends");
                        break;
                    };
                    self.handle_connection_event(event);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::QueueUpdate(payload) => {
                if self.state.snapshot_id.is_some() {
                    self.send_update(payload);
                } else {
                    debug!(document_id = %self.document, "no snapshot yet; update held back");
                    self.pending.push(payload);
                }
            }
            Command::SubmitSnapshot { id, payload } => {
                let frame = UpdateFrame::Snapshot(SnapshotFrame {
                    id,
                    parent_id: self.state.snapshot_id.clone(),
                    payload,
                });

                self.send_doc(DocMessage::Update(frame));
            }
            Command::SetAwareness(payload) => {
                let _ = self.connection.send(Message::Awareness {
                    document: self.document.clone(),
                    payload,
                });
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(ConnectionState::Connected { .. }) => {
                self.advertise();
            }
            ConnectionEvent::Message(Message::Document { document, body })
                if document == self.document =>
            {
                match body {
                    DocMessage::SyncStep2(frame) => self.apply_sync_step2(frame),
                    DocMessage::Update(UpdateFrame::Snapshot(snapshot)) => {
                        self.adopt_snapshot(snapshot);
                    }
                    DocMessage::Update(UpdateFrame::Updates(updates)) => {
                        for update in updates {
                            self.apply_update(update);
                        }
                    }
                    DocMessage::SyncDone => {
                        if !self.state.synced {
                            info!(document_id = %self.document, "document synced");
                            self.state.synced = true;
                            self.publish_state();
                            let _ = self.events.send(SessionEvent::Synced);
                        }
                    }
                    // A server never asks us for step 1.
                    DocMessage::SyncStep1(_) => {}
                }
            }
            _ => {}
        }
    }

    /// Sends sync-step-1 with the current vector; every (re)connect starts
    /// a fresh exchange.
    fn advertise(&mut self) {
        debug!(
            document_id = %self.document,
            snapshot_id = ?self.state.snapshot_id,
            server_version = self.state.server_version,
            "advertising state"
        );

        self.state.synced = false;
        self.publish_state();

        self.send_doc(DocMessage::SyncStep1(self.state.vector().encode()));
    }

    fn apply_sync_step2(&mut self, frame: SyncStep2Frame) {
        if let Some(snapshot) = frame.snapshot {
            self.adopt_snapshot(snapshot);
        }

        for update in frame.updates {
            self.apply_update(update);
        }
    }

    fn adopt_snapshot(&mut self, snapshot: SnapshotFrame) {
        if self.state.snapshot_id.as_ref() == Some(&snapshot.id) {
            return;
        }

        info!(document_id = %self.document, snapshot_id = %snapshot.id, "snapshot adopted");

        self.state.snapshot_id = Some(snapshot.id.clone());
        self.state.server_version = 0;
        self.next_counter = 1;
        self.publish_state();

        let _ = self.events.send(SessionEvent::Snapshot {
            id: snapshot.id,
            payload: snapshot.payload,
        });

        for payload in std::mem::take(&mut self.pending) {
            self.send_update(payload);
        }
    }

    fn apply_update(&mut self, update: UpdateRecord) {
        if Some(&update.snapshot_id) != self.state.snapshot_id.as_ref() {
            debug!(
                document_id = %self.document,
                snapshot_id = %update.snapshot_id,
                "dropping update for a snapshot we do not hold"
            );
            return;
        }

        if let Some(version) = update.server_version {
            if version <= self.state.server_version {
                return;
            }

            self.state.server_version = version;
            self.publish_state();
        }

        let _ = self.events.send(SessionEvent::Update(update));
    }

    fn send_update(&mut self, payload: Bytes) {
        let Some(snapshot_id) = self.state.snapshot_id.clone() else {
            return;
        };

        let counter = self.next_counter;
        self.next_counter += 1;

        let frame = UpdateFrame::Updates(vec![UpdateRecord {
            snapshot_id,
            client: self.client,
            counter,
            server_version: None,
            payload,
        }]);

        self.send_doc(DocMessage::Update(frame));
    }

    fn send_doc(&self, body: DocMessage) {
        let _ = self.connection.send(Message::Document {
            document: self.document.clone(),
            body,
        });
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }
}
