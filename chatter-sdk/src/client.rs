//! Chat client: connection supervision, authentication handshake, and
//! gated sends.
//!
//! This is the main entry point for SDK consumers. One spawned task owns
//! the WebSocket halves, the reconnect state machine, and the shared read
//! models; consumers hold a [`ClientHandle`] and drain a
//! [`ClientEvent`](crate::event::ClientEvent) receiver.
//!
//! ## Reconnection
//!
//! Unexpected closures are retried with linear backoff: attempt *k* is
//! scheduled `k * base_delay` after the loss, up to `max_attempts`
//! (default 5 attempts at a 1 s base, so 1 s, 2 s, … 5 s). A successful
//! open resets the counter. Exhausting the budget leaves the client in
//! `Disconnected` until [`ClientHandle::reconnect`] is called;
//! [`ClientHandle::disconnect`] is terminal. Every open — first connect or
//! reconnect — re-sends the credential before anything else, because a
//! reconnect is a new session: no ordering or authentication guarantee
//! crosses it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::dispatch::{self, AuthSignal};
use crate::error::{Error, Result};
use crate::event::ClientEvent;
use crate::presence::Presence;
use crate::protocol::{self, ClientEnvelope};
use crate::store::{ChatEntry, ChatLog, LogAction};
use crate::transport::{Frame, FrameSink, FrameStream, Transport, WsTransport};

/// Idle time before the client sends a keepalive ping.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Inbound silence treated as connection loss.
const PING_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection lifecycle, owned by the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No physical connection. Either between retries or after the
    /// attempt budget ran out.
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// Physically connected, credential sent, waiting for the verdict.
    AwaitingAuth,
    /// The server accepted the credential; chat traffic flows.
    Authenticated,
    /// An intentional close is in progress.
    Closing,
    /// Terminal: the owner called `disconnect()`. No retries follow.
    Closed,
}

/// Configuration for connecting to a chat server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// REST root for history and presence snapshots, e.g.
    /// `http://127.0.0.1:8080/api`. `None` disables both fetches.
    pub api_base: Option<String>,
    /// How many history messages to seed the log with after auth.
    pub history_limit: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            api_base: None,
            history_limit: 50,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Retries per credential session before giving up.
    pub max_attempts: u32,
    /// Attempt *k* waits `k * base_delay`.
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Commands the consumer can send to the client task.
#[derive(Debug)]
enum Command {
    Send(String),
    Disconnect,
    Reconnect,
}

/// Read models shared between the client task and handles.
#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    log: Mutex<ChatLog>,
    presence: Mutex<Presence>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        *self.state.lock() = next;
    }
}

/// A handle to a running chat client.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Queue a chat message for sending.
    ///
    /// Fails synchronously with [`Error::NotConnected`] unless the
    /// connection is authenticated; nothing touches the transport on the
    /// failure path.
    pub fn send(&self, content: &str) -> Result<()> {
        if *self.shared.state.lock() != ConnectionState::Authenticated {
            return Err(Error::NotConnected);
        }
        self.cmd_tx
            .try_send(Command::Send(content.to_string()))
            .map_err(|_| Error::NotConnected)
    }

    /// Intentional close. Terminal: no reconnect attempts follow, and a
    /// pending reconnect timer is cancelled.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }

    /// Start a fresh connection attempt, resetting the retry budget.
    /// Supersedes any pending reconnect timer.
    pub async fn reconnect(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect).await;
    }

    /// Whether a physical connection is currently attached (authentication
    /// may still be pending; use [`ClientHandle::state`] to distinguish).
    pub fn is_connected(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            ConnectionState::AwaitingAuth | ConnectionState::Authenticated
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Read-only copy of the retained chat log, oldest first.
    pub fn log_snapshot(&self) -> Vec<ChatEntry> {
        self.shared.log.lock().snapshot()
    }

    /// Current online users and the server's authoritative count.
    pub fn online_users(&self) -> (Vec<String>, u32) {
        let presence = self.shared.presence.lock();
        (presence.users(), presence.count())
    }
}

/// Connect to a chat server over WebSocket.
///
/// Returns a handle for commands and a receiver for events. The
/// connection (and all reconnection) runs in a spawned task.
pub fn connect(
    config: ConnectConfig,
    token: impl Into<String>,
) -> (ClientHandle, mpsc::Receiver<ClientEvent>) {
    connect_with_transport(WsTransport, config, token)
}

/// Connect using a custom transport implementation.
///
/// This is the seam used by tests (scripted transports) and by embedders
/// with their own socket layers; [`connect`] is this with [`WsTransport`].
pub fn connect_with_transport<T: Transport>(
    transport: T,
    config: ConnectConfig,
    token: impl Into<String>,
) -> (ClientHandle, mpsc::Receiver<ClientEvent>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let shared = Arc::new(Shared {
        state: Mutex::new(ConnectionState::Disconnected),
        log: Mutex::new(ChatLog::new()),
        presence: Mutex::new(Presence::new()),
    });

    let handle = ClientHandle {
        cmd_tx,
        shared: Arc::clone(&shared),
    };

    tokio::spawn(run_client(
        transport,
        config,
        token.into(),
        shared,
        event_tx,
        cmd_rx,
    ));

    (handle, event_rx)
}

/// How a session ended, as seen by the supervisor.
enum SessionEnd {
    /// Unexpected closure or failure; the retry policy applies.
    Lost(String),
    /// The owner called `disconnect()`. Terminal.
    Intentional,
    /// The owner called `reconnect()`. Retry immediately, fresh budget.
    Restart,
}

/// Completions of background HTTP fetches, interleaved into the session.
enum SyncUpdate {
    History(Vec<ChatEntry>),
    HistoryFailed(String),
    Presence(crate::api::OnlineUsers),
    PresenceFailed(String),
}

async fn run_client<T: Transport>(
    mut transport: T,
    config: ConnectConfig,
    token: String,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let api = config
        .api_base
        .as_ref()
        .map(|base| ApiClient::new(base.clone(), token.clone()));
    // Retries already scheduled since the last successful open.
    let mut attempts: u32 = 0;
    // Bumped whenever a pending retry timer is invalidated; a timer only
    // fires if its captured generation is still current.
    let mut generation: u64 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        match transport.open(&config.url).await {
            Ok((sink, stream)) => {
                attempts = 0;
                let _ = event_tx.send(ClientEvent::Connected).await;
                let end = run_session(
                    sink,
                    stream,
                    &token,
                    config.history_limit,
                    api.as_ref(),
                    &shared,
                    &event_tx,
                    &mut cmd_rx,
                )
                .await;
                match end {
                    SessionEnd::Lost(reason) => {
                        tracing::info!(%reason, "connection lost");
                        let _ = event_tx.send(ClientEvent::Disconnected { reason }).await;
                    }
                    SessionEnd::Intentional => {
                        shared.set_state(ConnectionState::Closed);
                        shared.log.lock().apply(LogAction::Clear);
                        shared.presence.lock().clear();
                        let _ = event_tx
                            .send(ClientEvent::Disconnected {
                                reason: "disconnected".to_string(),
                            })
                            .await;
                        return;
                    }
                    SessionEnd::Restart => {
                        generation += 1;
                        let _ = event_tx
                            .send(ClientEvent::Disconnected {
                                reason: "reconnecting".to_string(),
                            })
                            .await;
                        continue;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %config.url, "connect failed");
                shared
                    .log
                    .lock()
                    .apply(LogAction::Append(ChatEntry::system(format!(
                        "Connection error: {e}"
                    ))));
                let _ = event_tx
                    .send(ClientEvent::TransportError {
                        message: e.to_string(),
                    })
                    .await;
                // Failure still closes the physical session.
                let _ = event_tx
                    .send(ClientEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        shared.set_state(ConnectionState::Disconnected);

        if attempts >= config.reconnect.max_attempts {
            // The budget for this credential session is spent. Stay
            // disconnected until the owner explicitly reconnects.
            tracing::warn!(
                attempts,
                "reconnect attempts exhausted; waiting for explicit reconnect"
            );
            shared
                .log
                .lock()
                .apply(LogAction::Append(ChatEntry::system(
                    "Connection lost; reconnect attempts exhausted",
                )));
            loop {
                match cmd_rx.recv().await {
                    Some(Command::Reconnect) => {
                        generation += 1;
                        attempts = 0;
                        break;
                    }
                    Some(Command::Disconnect) | None => {
                        shared.set_state(ConnectionState::Closed);
                        return;
                    }
                    Some(Command::Send(_)) => {
                        // Rejected at the handle; nothing to do here.
                    }
                }
            }
            continue;
        }

        attempts += 1;
        let delay = config.reconnect.base_delay * attempts;
        tracing::info!(
            attempt = attempts,
            max = config.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let timer_generation = generation;
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    // A timer connects only while it is still the current
                    // one; disconnect() and reconnect() invalidate it.
                    if generation == timer_generation {
                        break;
                    }
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Disconnect) | None => {
                        generation += 1;
                        shared.set_state(ConnectionState::Closed);
                        return;
                    }
                    Some(Command::Reconnect) => {
                        generation += 1;
                        attempts = 0;
                        break;
                    }
                    Some(Command::Send(_)) => {
                        // Rejected at the handle; ignore.
                    }
                },
            }
        }
    }
}

async fn run_session<S: FrameSink, R: FrameStream>(
    mut sink: S,
    mut stream: R,
    token: &str,
    history_limit: usize,
    api: Option<&ApiClient>,
    shared: &Arc<Shared>,
    event_tx: &mpsc::Sender<ClientEvent>,
    cmd_rx: &mut mpsc::Receiver<Command>,
) -> SessionEnd {
    // The credential is the first frame on the wire, before anything else.
    shared.set_state(ConnectionState::AwaitingAuth);
    let auth_frame = match protocol::encode(&ClientEnvelope::Auth {
        token: token.to_string(),
    }) {
        Ok(frame) => frame,
        Err(e) => return SessionEnd::Lost(format!("encode auth request: {e}")),
    };
    if let Err(e) = sink.send_text(&auth_frame).await {
        return SessionEnd::Lost(e.to_string());
    }

    let (sync_tx, mut sync_rx) = mpsc::channel::<SyncUpdate>(8);
    let mut last_activity = tokio::time::Instant::now();
    let mut next_ping = last_activity + PING_INTERVAL;

    loop {
        tokio::select! {
            frame = stream.next() => {
                last_activity = tokio::time::Instant::now();
                next_ping = last_activity + PING_INTERVAL;
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        match protocol::decode(&text) {
                            Ok(envelope) => {
                                let out = {
                                    let mut log = shared.log.lock();
                                    let mut presence = shared.presence.lock();
                                    dispatch::dispatch(envelope, &mut log, &mut presence)
                                };
                                if let Some(signal) = out.auth {
                                    handle_auth_signal(
                                        signal,
                                        history_limit,
                                        api,
                                        shared,
                                        &sync_tx,
                                    );
                                }
                                for event in out.events {
                                    if matches!(
                                        event,
                                        ClientEvent::UserJoined { .. } | ClientEvent::UserLeft { .. }
                                    ) && let Some(api) = api
                                    {
                                        // Heuristic set update just happened;
                                        // self-heal with a full snapshot.
                                        spawn_presence_fetch(api.clone(), sync_tx.clone());
                                    }
                                    let _ = event_tx.send(event).await;
                                }
                            }
                            Err(e) => {
                                // A single malformed frame is dropped; the
                                // connection and all later frames survive.
                                tracing::warn!(error = %e, "dropping unreadable frame");
                                shared.log.lock().apply(LogAction::Append(
                                    ChatEntry::system("Connection error: unreadable server frame"),
                                ));
                                let _ = event_tx
                                    .send(ClientEvent::TransportError {
                                        message: format!("protocol error: {e}"),
                                    })
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Frame::Ping(payload))) => {
                        if let Err(e) = sink.send_pong(payload).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    Some(Ok(Frame::Closed { code, reason })) => {
                        let reason = if reason.is_empty() {
                            format!("closed by server ({code})")
                        } else {
                            format!("closed by server ({code}): {reason}")
                        };
                        return SessionEnd::Lost(reason);
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("connection closed".to_string()),
                }
            }
            Some(update) = sync_rx.recv() => {
                apply_sync_update(update, shared);
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(content)) => {
                    if *shared.state.lock() != ConnectionState::Authenticated {
                        // Raced a state change after the handle's check;
                        // chat traffic tolerates the drop.
                        continue;
                    }
                    let frame = match protocol::encode(&ClientEnvelope::ChatMessage {
                        token: token.to_string(),
                        content,
                    }) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(error = %e, "encode outbound message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send_text(&frame).await {
                        let _ = event_tx
                            .send(ClientEvent::TransportError {
                                message: e.to_string(),
                            })
                            .await;
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                Some(Command::Disconnect) | None => {
                    shared.set_state(ConnectionState::Closing);
                    sink.close().await;
                    return SessionEnd::Intentional;
                }
                Some(Command::Reconnect) => {
                    sink.close().await;
                    return SessionEnd::Restart;
                }
            },
            _ = tokio::time::sleep_until(next_ping) => {
                if last_activity.elapsed() >= PING_TIMEOUT {
                    return SessionEnd::Lost("ping timeout".to_string());
                }
                if let Err(e) = sink.send_ping().await {
                    return SessionEnd::Lost(e.to_string());
                }
                next_ping = tokio::time::Instant::now() + PING_INTERVAL;
            }
        }
    }
}

fn handle_auth_signal(
    signal: AuthSignal,
    history_limit: usize,
    api: Option<&ApiClient>,
    shared: &Arc<Shared>,
    sync_tx: &mpsc::Sender<SyncUpdate>,
) {
    match signal {
        AuthSignal::Success { username } => {
            shared.set_state(ConnectionState::Authenticated);
            tracing::info!(%username, "authenticated");
            if let Some(api) = api {
                spawn_history_fetch(api.clone(), history_limit, sync_tx.clone());
                spawn_presence_fetch(api.clone(), sync_tx.clone());
            }
        }
        AuthSignal::Failure { message } => {
            // Stay attached; the server decides whether to close, and a
            // fresh credential may still arrive on this socket.
            tracing::warn!(%message, "authentication rejected");
        }
    }
}

fn spawn_history_fetch(api: ApiClient, limit: usize, tx: mpsc::Sender<SyncUpdate>) {
    tokio::spawn(async move {
        let update = match api.history(limit).await {
            Ok(entries) => SyncUpdate::History(entries),
            Err(e) => SyncUpdate::HistoryFailed(e.to_string()),
        };
        let _ = tx.send(update).await;
    });
}

fn spawn_presence_fetch(api: ApiClient, tx: mpsc::Sender<SyncUpdate>) {
    tokio::spawn(async move {
        let update = match api.online_users().await {
            Ok(snapshot) => SyncUpdate::Presence(snapshot),
            Err(e) => SyncUpdate::PresenceFailed(e.to_string()),
        };
        let _ = tx.send(update).await;
    });
}

fn apply_sync_update(update: SyncUpdate, shared: &Arc<Shared>) {
    match update {
        SyncUpdate::History(entries) => {
            tracing::debug!(count = entries.len(), "seeding history");
            shared.log.lock().apply(LogAction::Seed(entries));
        }
        SyncUpdate::HistoryFailed(e) => {
            tracing::warn!(error = %e, "history fetch failed");
            shared
                .log
                .lock()
                .apply(LogAction::Append(ChatEntry::system(
                    "Failed to load message history",
                )));
        }
        SyncUpdate::Presence(snapshot) => {
            shared
                .presence
                .lock()
                .resync(snapshot.users, snapshot.count);
        }
        SyncUpdate::PresenceFailed(e) => {
            tracing::warn!(error = %e, "presence snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntryKind, TOMBSTONE_TEXT};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::advance;

    /// One scripted physical connection: the frames the "server" will
    /// push, and a shared record of everything the client wrote.
    struct ScriptedSession {
        sent: Arc<Mutex<Vec<String>>>,
        frames: mpsc::UnboundedReceiver<Frame>,
    }

    /// Transport that hands out scripted sessions in order and refuses
    /// connections once the script is exhausted.
    struct ScriptedTransport {
        opens: Arc<AtomicUsize>,
        sessions: Arc<Mutex<VecDeque<ScriptedSession>>>,
    }

    struct ScriptedSink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedStream {
        frames: mpsc::UnboundedReceiver<Frame>,
    }

    impl Transport for ScriptedTransport {
        type Sink = ScriptedSink;
        type Stream = ScriptedStream;

        async fn open(&mut self, _url: &str) -> Result<(ScriptedSink, ScriptedStream)> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.sessions.lock().pop_front() {
                Some(session) => Ok((
                    ScriptedSink { sent: session.sent },
                    ScriptedStream {
                        frames: session.frames,
                    },
                )),
                None => Err(Error::Transport("connection refused".to_string())),
            }
        }
    }

    impl FrameSink for ScriptedSink {
        async fn send_text(&mut self, text: &str) -> Result<()> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        async fn send_ping(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send_pong(&mut self, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    impl FrameStream for ScriptedStream {
        async fn next(&mut self) -> Option<Result<Frame>> {
            self.frames.recv().await.map(Ok)
        }
    }

    fn transport_with(
        sessions: Vec<ScriptedSession>,
    ) -> (ScriptedTransport, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let transport = ScriptedTransport {
            opens: Arc::clone(&opens),
            sessions: Arc::new(Mutex::new(sessions.into())),
        };
        (transport, opens)
    }

    fn unreachable_transport() -> (ScriptedTransport, Arc<AtomicUsize>) {
        transport_with(Vec::new())
    }

    fn script_session() -> (
        ScriptedSession,
        mpsc::UnboundedSender<Frame>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            ScriptedSession {
                sent: Arc::clone(&sent),
                frames: frame_rx,
            },
            frame_tx,
            sent,
        )
    }

    /// Let the client task run until it blocks again.
    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn push(frame_tx: &mpsc::UnboundedSender<Frame>, text: &str) {
        frame_tx
            .send(Frame::Text(text.to_string()))
            .expect("session closed");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_linear_and_stops_after_five_attempts() {
        let (transport, opens) = unreachable_transport();
        let (handle, _events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        // Attempt 1 fires at exactly 1 s, not before.
        advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        // Then 2 s, 3 s, 4 s, 5 s.
        for (delay_secs, expected_opens) in [(2, 3), (3, 4), (4, 5), (5, 6)] {
            advance(Duration::from_secs(delay_secs)).await;
            settle().await;
            assert_eq!(opens.load(Ordering::SeqCst), expected_opens);
        }

        // Budget spent: no further attempt, ever.
        advance(Duration::from_secs(3600)).await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 6);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_pending_retry() {
        let (transport, opens) = unreachable_transport();
        let (handle, _events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        // A 1 s retry is pending; cancel it and advance well past it.
        handle.disconnect().await;
        settle().await;
        advance(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_reconnect_restores_the_attempt_budget() {
        let (transport, opens) = unreachable_transport();
        let (handle, _events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        // Walk past the whole 1+2+3+4+5 s schedule; each step lets the
        // task reschedule its next timer.
        for _ in 0..12 {
            advance(Duration::from_secs(5)).await;
            settle().await;
        }
        assert_eq!(opens.load(Ordering::SeqCst), 6);
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        handle.reconnect().await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn a_successful_open_resets_the_attempt_counter() {
        // Two sessions that end immediately (EOF), then refusals.
        let (first, first_tx, _) = script_session();
        let (second, second_tx, _) = script_session();
        drop(first_tx);
        drop(second_tx);
        let (transport, opens) = transport_with(vec![first, second]);
        let (_handle, _events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        // Each loss after a successful open retries at the base delay
        // again; a cumulative counter would have waited 2 s here.
        advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_request_is_the_first_frame_and_sends_are_gated() {
        let (session, frame_tx, sent) = script_session();
        let (transport, _opens) = transport_with(vec![session]);
        let (handle, mut events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok1");

        settle().await;
        {
            let sent = sent.lock();
            assert_eq!(sent.len(), 1);
            let first: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
            assert_eq!(first["type"], "auth");
            assert_eq!(first["token"], "tok1");
        }
        assert_eq!(handle.state(), ConnectionState::AwaitingAuth);

        // Not authenticated yet: rejected without touching the transport.
        assert!(matches!(handle.send("early"), Err(Error::NotConnected)));
        settle().await;
        assert_eq!(sent.lock().len(), 1);

        push(&frame_tx, r#"{"type":"auth_success","username":"alice"}"#);
        settle().await;
        assert_eq!(handle.state(), ConnectionState::Authenticated);
        assert!(handle.is_connected());

        handle.send("hi").unwrap();
        settle().await;
        {
            let sent = sent.lock();
            assert_eq!(sent.len(), 2);
            let second: serde_json::Value = serde_json::from_str(&sent[1]).unwrap();
            assert_eq!(second["type"], "chat_message");
            assert_eq!(second["token"], "tok1");
            assert_eq!(second["content"], "hi");
        }

        let seen = drain(&mut events);
        assert!(matches!(seen[0], ClientEvent::Connected));
        assert!(seen.iter().any(|e| matches!(
            e,
            ClientEvent::AuthSuccess { username } if username == "alice"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn a_malformed_frame_does_not_break_the_session() {
        let (session, frame_tx, _sent) = script_session();
        let (transport, opens) = transport_with(vec![session]);
        let (handle, mut events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        push(&frame_tx, r#"{"type":"auth_success","username":"alice"}"#);
        push(&frame_tx, "{{{ not json");
        push(
            &frame_tx,
            r#"{"type":"chat_message","id":1,"sender_username":"bob","content":"still here","timestamp":5}"#,
        );
        settle().await;

        // Still on the first connection, and the frame after the bad one
        // was delivered.
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        let seen = drain(&mut events);
        assert!(seen
            .iter()
            .any(|e| matches!(e, ClientEvent::TransportError { .. })));
        assert!(seen.iter().any(|e| matches!(
            e,
            ClientEvent::Message { entry } if entry.content == "still here"
        )));
        assert!(handle
            .log_snapshot()
            .iter()
            .any(|e| e.content == "still here"));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_error_keeps_the_connection_attached() {
        let (session, frame_tx, _sent) = script_session();
        let (transport, opens) = transport_with(vec![session]);
        let (handle, mut events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        push(&frame_tx, r#"{"type":"auth_error","message":"token expired"}"#);
        settle().await;

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ConnectionState::AwaitingAuth);
        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            ClientEvent::AuthError { message } if message == "token expired"
        )));
        // Visible in-band too.
        assert!(handle
            .log_snapshot()
            .iter()
            .any(|e| e.content == "Authentication failed: token expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_message_flow() {
        let (session, frame_tx, _sent) = script_session();
        let (transport, _opens) = transport_with(vec![session]);
        let (handle, mut events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok1");

        push(&frame_tx, r#"{"type":"auth_success","username":"alice"}"#);
        settle().await;
        assert_eq!(handle.state(), ConnectionState::Authenticated);

        push(
            &frame_tx,
            r#"{"type":"chat_message","id":7,"sender_username":"bob","content":"hi","timestamp":1000}"#,
        );
        settle().await;
        let log = handle.log_snapshot();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, Some(7));
        assert_eq!(log[0].content, "hi");
        assert_eq!(log[0].kind, EntryKind::Chat);

        push(
            &frame_tx,
            r#"{"type":"message_deleted","message_id":7,"deleted_by":"bob"}"#,
        );
        settle().await;
        let log = handle.log_snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, TOMBSTONE_TEXT);
        assert_eq!(log[0].timestamp, 1000);
        assert_eq!(log[1].kind, EntryKind::Notification);
        assert_eq!(log[1].content, "bob recalled a message");

        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            ClientEvent::MessageDeleted { message_id: 7, deleted_by } if deleted_by == "bob"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn presence_follows_join_and_leave_frames() {
        let (session, frame_tx, _sent) = script_session();
        let (transport, _opens) = transport_with(vec![session]);
        let (handle, mut events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        push(&frame_tx, r#"{"type":"auth_success","username":"alice"}"#);
        push(&frame_tx, r#"{"type":"user_joined","username":"carol","online_count":2}"#);
        settle().await;
        let (users, count) = handle.online_users();
        assert_eq!(count, 2);
        assert!(users.contains(&"carol".to_string()));

        push(&frame_tx, r#"{"type":"user_left","username":"carol","online_count":1}"#);
        settle().await;
        let (users, count) = handle.online_users();
        assert_eq!(count, 1);
        assert!(!users.contains(&"carol".to_string()));

        let seen = drain(&mut events);
        assert!(seen
            .iter()
            .any(|e| matches!(e, ClientEvent::UserJoined { online_count: 2, .. })));
        assert!(seen
            .iter()
            .any(|e| matches!(e, ClientEvent::UserLeft { online_count: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn a_silent_connection_times_out_and_reconnects() {
        let (session, frame_tx, _sent) = script_session();
        let (transport, opens) = transport_with(vec![session]);
        let (_handle, mut events) =
            connect_with_transport(transport, ConnectConfig::default(), "tok");

        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        // No inbound traffic at all: one keepalive ping at 60 s, loss
        // declared at 120 s, first retry 1 s later.
        advance(Duration::from_secs(60)).await;
        settle().await;
        advance(Duration::from_secs(60)).await;
        settle().await;
        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            ClientEvent::Disconnected { reason } if reason == "ping timeout"
        )));

        advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        drop(frame_tx);
    }
}
