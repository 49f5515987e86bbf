//! The connection handle and its single-task driver.

use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veil_codec::Message;

use crate::backoff::Backoff;
use crate::events::{ConnectionEvent, Subscription};
use crate::inflight::InFlightTracker;
use crate::options::ConnectionOptions;
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportConn, TransportError};
use crate::ConnectionError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

enum Command {
    Connect,
    Disconnect,
    Destroy,
    Send(Message),
    SetOnline(bool),
    AttemptResolved {
        attempt: u64,
        result: Result<(TransportConn, usize), TransportError>,
    },
}

/// Handle to one logical link.
///
/// Cheap to clone; all clones drive the same state machine. The link is torn
/// down by [`Connection::destroy`], not by dropping handles.
#[derive(Clone, Debug)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    released: CancellationToken,
    in_flight_count: Arc<AtomicUsize>,
    destroyed: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a connection over `transports`, tried in preference order.
    pub fn new(transports: Vec<Arc<dyn Transport>>, options: ConnectionOptions) -> Self {
        assert!(!transports.is_empty(), "at least one transport is required");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let in_flight_count = Arc::new(AtomicUsize::new(0));
        let released = CancellationToken::new();

        let auto_connect = options.connect;

        let driver = Driver {
            online: options.is_online,
            backoff: Backoff::new(options.initial_reconnect_delay, options.max_backoff_time),
            options,
            transports,
            commands: command_rx,
            command_tx: command_tx.clone(),
            state_tx,
            events: event_tx.clone(),
            released: released.clone(),
            in_flight_count: Arc::clone(&in_flight_count),
            conn: None,
            buffer: VecDeque::new(),
            in_flight: InFlightTracker::default(),
            attempt_seq: 0,
            selected_transport: 0,
            should_reconnect: false,
            explicitly_disconnected: false,
            destroyed: false,
            retry_at: None,
            heartbeat_at: None,
            idle_deadline: None,
        };

        drop(tokio::spawn(driver.run()));

        if auto_connect {
            let _ = command_tx.send(Command::Connect);
        }

        Self {
            commands: command_tx,
            state: state_rx,
            events: event_tx,
            released,
            in_flight_count,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts connecting. A no-op while already connecting or connected;
    /// restarts the machine from a terminal errored state.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        self.command(Command::Connect)
    }

    /// Tears the link down and stops reconnecting. The connection stays
    /// usable: a later `connect()` starts a fresh episode with the
    /// preferred transport restored.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.command(Command::Disconnect)
    }

    /// Permanently destroys the connection. Idempotent; everything pending
    /// is cancelled, subscribers are released.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Destroy);
        }
    }

    /// Queues a message. While not connected it is buffered in FIFO order
    /// and drained on the next connect — unless this connection was
    /// explicitly disconnected, in which case it is dropped.
    pub fn send(&self, message: Message) -> Result<(), ConnectionError> {
        self.command(Command::Send(message))
    }

    /// Feeds the external online/offline indicator. Going offline suspends
    /// reconnection; coming online resets the backoff and retries
    /// immediately.
    pub fn set_online(&self, online: bool) {
        let _ = self.command(Command::SetOnline(online));
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// The kind of the currently live transport, if any.
    #[must_use]
    pub fn connection_type(&self) -> Option<crate::transport::TransportKind> {
        if let ConnectionState::Connected { transport } = &*self.state.borrow() {
            Some(*transport)
        } else {
            None
        }
    }

    #[must_use]
    pub fn in_flight_message_count(&self) -> usize {
        self.in_flight_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe(), self.released.clone())
    }

    /// Completes on the next transition into the connected state (or
    /// immediately if already there).
    pub async fn wait_until_connected(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.clone();

        state
            .wait_for(ConnectionState::is_connected)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::Destroyed)
    }

    fn command(&self, command: Command) -> Result<(), ConnectionError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Destroyed);
        }

        self.commands
            .send(command)
            .map_err(|_| ConnectionError::Destroyed)
    }
}

enum Wakeup {
    Command(Option<Command>),
    Inbound(Option<Bytes>),
    RetryDue,
    HeartbeatDue,
    IdleDue,
}

struct Driver {
    options: ConnectionOptions,
    transports: Vec<Arc<dyn Transport>>,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    released: CancellationToken,
    in_flight_count: Arc<AtomicUsize>,

    conn: Option<TransportConn>,
    buffer: VecDeque<Message>,
    in_flight: InFlightTracker,
    backoff: Backoff,

    /// Monotonic attempt counter; resolutions carrying a stale id are
    /// superseded and ignored.
    attempt_seq: u64,

    /// Index into `transports`; sticks to the fallback once fallen back,
    /// restored to the preferred transport by an explicit disconnect.
    selected_transport: usize,

    online: bool,
    should_reconnect: bool,
    explicitly_disconnected: bool,
    destroyed: bool,

    retry_at: Option<Instant>,
    heartbeat_at: Option<Instant>,
    idle_deadline: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let wakeup = {
                let conn = &mut self.conn;

                tokio::select! {
                    biased;
                    command = self.commands.recv() => Wakeup::Command(command),
                    frame = next_frame(conn) => Wakeup::Inbound(frame),
                    () = sleep_until_opt(self.retry_at) => Wakeup::RetryDue,
                    () = sleep_until_opt(self.heartbeat_at) => Wakeup::HeartbeatDue,
                    () = sleep_until_opt(self.idle_deadline) => Wakeup::IdleDue,
                }
            };

            match wakeup {
                Wakeup::Command(Some(Command::Connect)) => self.handle_connect(),
                Wakeup::Command(Some(Command::Disconnect)) => self.teardown(),
                Wakeup::Command(Some(Command::Destroy)) | Wakeup::Command(None) => {
                    self.teardown();
                    self.destroyed = true;
                    self.released.cancel();
                }
                Wakeup::Command(Some(Command::Send(message))) => self.handle_send(message),
                Wakeup::Command(Some(Command::SetOnline(online))) => self.handle_set_online(online),
                Wakeup::Command(Some(Command::AttemptResolved { attempt, result })) => {
                    self.handle_attempt_resolved(attempt, result);
                }
                Wakeup::Inbound(Some(frame)) => self.handle_inbound(frame),
                Wakeup::Inbound(None) => self.handle_transport_lost(),
                Wakeup::RetryDue => {
                    self.retry_at = None;
                    self.begin_attempt();
                }
                Wakeup::HeartbeatDue => self.handle_heartbeat(),
                Wakeup::IdleDue => self.handle_idle_timeout(),
            }

            if self.destroyed {
                break;
            }
        }

        debug!("connection driver stopped");
    }

    fn handle_connect(&mut self) {
        self.explicitly_disconnected = false;
        self.should_reconnect = true;

        // Repeated connect() calls while busy are no-ops.
        {
            let state = self.state_tx.borrow();
            if state.is_connected() || state.is_connecting() {
                return;
            }
        }

        self.backoff.reset();
        self.retry_at = None;
        self.begin_attempt();
    }

    fn begin_attempt(&mut self) {
        if !self.online {
            debug!("offline; deferring connection attempt until online");
            return;
        }

        self.attempt_seq += 1;
        let attempt_id = self.attempt_seq;
        self.retry_at = None;

        self.set_state(ConnectionState::Connecting {
            attempt: self.backoff.failures() + 1,
        });

        let transports = self.transports.clone();
        let start = self.selected_transport;
        let timeout = self.options.websocket_timeout;
        let command_tx = self.command_tx.clone();

        drop(tokio::spawn(async move {
            let mut last_error = TransportError::Exhausted;

            for (index, transport) in transports.iter().enumerate().skip(start) {
                match time::timeout(timeout, transport.connect()).await {
                    Ok(Ok(conn)) => {
                        let _ = command_tx.send(Command::AttemptResolved {
                            attempt: attempt_id,
                            result: Ok((conn, index)),
                        });
                        return;
                    }
                    Ok(Err(error)) => {
                        debug!(kind = ?transport.kind(), %error, "transport attempt failed");
                        last_error = error;
                    }
                    Err(_elapsed) => {
                        debug!(kind = ?transport.kind(), "transport attempt timed out");
                        last_error = TransportError::Timeout;
                    }
                }
            }

            let _ = command_tx.send(Command::AttemptResolved {
                attempt: attempt_id,
                result: Err(last_error),
            });
        }));
    }

    fn handle_attempt_resolved(
        &mut self,
        attempt: u64,
        result: Result<(TransportConn, usize), TransportError>,
    ) {
        if attempt != self.attempt_seq {
            debug!(attempt, current = self.attempt_seq, "ignoring superseded connection attempt");

            if let Ok((conn, _)) = result {
                conn.close();
            }

            return;
        }

        match result {
            Ok((conn, index)) => {
                let kind = conn.kind();

                self.selected_transport = index;
                self.conn = Some(conn);
                self.backoff.reset();
                self.touch_idle_deadline();

                if !self.options.heartbeat_interval.is_zero() {
                    self.heartbeat_at = Some(Instant::now() + self.options.heartbeat_interval);
                }

                info!(transport = ?kind, "connected");
                self.set_state(ConnectionState::Connected { transport: kind });

                self.drain_buffer();
            }
            Err(error) => {
                let delay = self.backoff.next_delay();
                let exhausted = self.backoff.failures() >= self.options.max_reconnect_attempts;

                let will_retry = self.should_reconnect && !exhausted;

                if exhausted {
                    warn!(%error, failures = self.backoff.failures(), "reconnect attempts exhausted");
                } else if will_retry && self.online {
                    self.retry_at = Some(Instant::now() + delay);
                    debug!(%error, ?delay, "connection attempt failed; retry scheduled");
                }

                self.set_state(ConnectionState::Errored { error, will_retry });
            }
        }
    }

    fn handle_send(&mut self, message: Message) {
        if self.conn.is_some() {
            self.transmit(message);
        } else if self.explicitly_disconnected {
            debug!("dropping message sent after explicit disconnect");
        } else {
            self.buffer.push_back(message);
        }
    }

    /// Writes one message to the live transport, entering it in-flight at
    /// the moment of transmission.
    fn transmit(&mut self, message: Message) {
        let frame = message.encode();

        let was_empty = self.in_flight.is_empty();
        let tracked = self.in_flight.track(&message);
        self.sync_in_flight(was_empty);

        let send_result = self
            .conn
            .as_ref()
            .map_or(Err(TransportError::NotConnected), |conn| conn.send(frame));

        if let Err(error) = send_result {
            // Synchronous send failure: the entry comes back out and the
            // loss is handled by the state machine, not the caller.
            if let Some(message_id) = tracked {
                let was_empty = self.in_flight.is_empty();
                self.in_flight.remove(&message_id);
                self.sync_in_flight(was_empty);
            }

            warn!(%error, "send failed; tearing down transport");
            self.handle_transport_lost();
        }
    }

    fn drain_buffer(&mut self) {
        while self.conn.is_some() {
            let Some(message) = self.buffer.pop_front() else {
                break;
            };

            self.transmit(message);
        }
    }

    fn handle_inbound(&mut self, frame: Bytes) {
        self.touch_idle_deadline();

        match Message::decode(&frame) {
            Ok(message) => {
                if let Message::Ack { message_id } = &message {
                    let was_empty = self.in_flight.is_empty();

                    if self.in_flight.ack(message_id).is_some() {
                        self.sync_in_flight(was_empty);
                    }
                }

                self.emit(ConnectionEvent::Message(message));
            }
            Err(error) => warn!(%error, "dropping undecodable inbound frame"),
        }
    }

    fn handle_transport_lost(&mut self) {
        if self.conn.take().is_none() {
            return;
        }

        self.heartbeat_at = None;
        self.idle_deadline = None;
        self.clear_in_flight();

        self.set_state(ConnectionState::Disconnected);

        if self.should_reconnect && !self.explicitly_disconnected {
            info!("transport lost; reconnecting");
            self.begin_attempt();
        }
    }

    fn handle_heartbeat(&mut self) {
        self.heartbeat_at = None;

        let Some(conn) = &self.conn else {
            return;
        };

        if conn.send(Message::Ping.encode()).is_err() {
            self.handle_transport_lost();
            return;
        }

        self.heartbeat_at = Some(Instant::now() + self.options.heartbeat_interval);
    }

    fn handle_idle_timeout(&mut self) {
        self.idle_deadline = None;

        let Some(conn) = self.conn.take() else {
            return;
        };

        warn!(
            timeout = ?self.options.message_reconnect_timeout,
            "nothing received within the inactivity window; closing transport"
        );

        conn.close();
        drop(conn);

        self.heartbeat_at = None;
        self.clear_in_flight();

        let will_retry = self.should_reconnect && !self.explicitly_disconnected;

        self.set_state(ConnectionState::Errored {
            error: TransportError::Timeout,
            will_retry,
        });

        if will_retry && self.online {
            self.retry_at = Some(Instant::now() + self.backoff.next_delay());
        }
    }

    fn handle_set_online(&mut self, online: bool) {
        if self.online == online {
            return;
        }

        self.online = online;
        info!(online, "online indicator changed");

        if online {
            self.backoff.reset();

            if self.should_reconnect && self.conn.is_none() {
                self.retry_at = None;
                self.begin_attempt();
            }
        } else {
            // Reconnection is suspended; a live transport is left to fail
            // on its own.
            self.retry_at = None;
        }
    }

    /// Shared teardown for disconnect and destroy: cancels the in-progress
    /// attempt, clears timers, buffer, and in-flight entries, and restores
    /// the preferred-transport preference.
    fn teardown(&mut self) {
        self.explicitly_disconnected = true;
        self.should_reconnect = false;
        self.attempt_seq += 1;
        self.selected_transport = 0;

        self.retry_at = None;
        self.heartbeat_at = None;
        self.idle_deadline = None;

        self.buffer.clear();
        self.clear_in_flight();

        if let Some(conn) = self.conn.take() {
            conn.close();
        }

        info!("disconnected");
        self.set_state(ConnectionState::Disconnected);
    }

    fn clear_in_flight(&mut self) {
        let was_empty = self.in_flight.is_empty();
        self.in_flight.clear();
        self.sync_in_flight(was_empty);
    }

    fn touch_idle_deadline(&mut self) {
        if !self.options.message_reconnect_timeout.is_zero() && self.conn.is_some() {
            self.idle_deadline = Some(Instant::now() + self.options.message_reconnect_timeout);
        }
    }

    fn sync_in_flight(&mut self, was_empty: bool) {
        self.in_flight_count
            .store(self.in_flight.len(), Ordering::Relaxed);

        let is_empty = self.in_flight.is_empty();

        if was_empty != is_empty {
            self.emit(ConnectionEvent::MessagesInFlight(!is_empty));
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }

        let _ = self.state_tx.send(state.clone());
        self.emit(ConnectionEvent::StateChanged(state));
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_frame(conn: &mut Option<TransportConn>) -> Option<Bytes> {
    match conn {
        Some(conn) => conn.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
