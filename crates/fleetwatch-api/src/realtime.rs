//! Realtime change channels over a Phoenix websocket.
//!
//! The backend pushes row changes through Phoenix channels (protocol
//! `vsn=1.0.0`). One socket task owns the connection and multiplexes any
//! number of channels over it; each [`Channel`] receives the
//! `postgres_changes` frames for its topic. The task heartbeats, reconnects
//! with exponential backoff + jitter, and rejoins every live channel after
//! a reconnect. A rejoined channel receives one change of type
//! [`ChangeType::Unknown`], since rows committed during the outage were
//! never pushed.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetwatch_api::realtime::{PostgresChanges, RealtimeClient, RealtimeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = RealtimeClient::connect(&project_url, &api_key, RealtimeConfig::default(), CancellationToken::new())?;
//! let mut channel = client.join(PostgresChanges::all("public", "devices")).await?;
//!
//! while let Some(change) = channel.recv().await {
//!     println!("{:?} on {}", change.change_type, change.table);
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;

const PROTOCOL_VSN: &str = "1.0.0";
const PHOENIX_TOPIC: &str = "phoenix";

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for socket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Socket-level timing.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Interval between `heartbeat` frames on the `phoenix` topic.
    /// A heartbeat still unanswered at the next tick drops the connection.
    pub heartbeat_interval: Duration,
    /// How long [`RealtimeClient::join`] waits for the server's `phx_reply`.
    pub join_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            join_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────

/// One Phoenix message in the JSON object encoding used by `vsn=1.0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    fn join(topic: &str, changes: &PostgresChanges, access_token: &str, reference: String) -> Self {
        Self {
            topic: topic.to_owned(),
            event: "phx_join".into(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [changes],
                    "private": false,
                },
                "access_token": access_token,
            }),
            join_ref: Some(reference.clone()),
            reference: Some(reference),
        }
    }

    fn leave(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.to_owned(),
            event: "phx_leave".into(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }

    fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.into(),
            event: "heartbeat".into(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }
}

/// Parse one text frame from the socket.
pub fn decode_frame(text: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str(text)
}

/// The `postgres_changes` binding a channel asks the server for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresChanges {
    /// `"INSERT"`, `"UPDATE"`, `"DELETE"` or `"*"`.
    pub event: String,
    pub schema: String,
    pub table: String,
    /// Row filter in PostgREST operator syntax, e.g. `device_key=eq.a1b2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresChanges {
    /// Every change event on a table.
    pub fn all(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event: "*".into(),
            schema: schema.into(),
            table: table.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// A row change delivered on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Channel topic the change arrived on (filled in by the socket task).
    #[serde(default)]
    pub topic: String,
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: serde_json::Value,
}

impl ChangeEvent {
    /// Emitted on a channel after it is rejoined following a reconnect.
    /// Rows committed while the socket was down were never delivered, so
    /// the subscriber has to treat this as "anything may have changed".
    fn rejoined(topic: &str, changes: &PostgresChanges) -> Self {
        Self {
            topic: topic.to_owned(),
            schema: changes.schema.clone(),
            table: changes.table.clone(),
            change_type: ChangeType::Unknown,
            commit_timestamp: None,
            record: serde_json::Value::Null,
            old_record: serde_json::Value::Null,
        }
    }
}

// ── Client handle ────────────────────────────────────────────────────

enum Command {
    Join {
        topic: String,
        changes: PostgresChanges,
        events: mpsc::UnboundedSender<ChangeEvent>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Leave {
        topic: String,
    },
}

/// Handle to a running realtime socket.
///
/// Dropping the handle (or calling [`shutdown`](Self::shutdown)) stops
/// the socket task; every open [`Channel`] then ends.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    next_topic: AtomicU64,
    join_timeout: Duration,
    cancel: CancellationToken,
}

impl RealtimeClient {
    /// Spawn the socket task for a project URL (e.g. `https://abc.supabase.co`).
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background and joins issued before it completes are queued.
    pub fn connect(
        project_url: &Url,
        api_key: &SecretString,
        config: RealtimeConfig,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let ws_url = realtime_url(project_url, api_key)?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let join_timeout = config.join_timeout;

        let socket = Socket::new(api_key.clone());
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            socket_loop(ws_url, socket, command_rx, config, task_cancel).await;
        });

        Ok(Self {
            commands,
            next_topic: AtomicU64::new(0),
            join_timeout,
            cancel,
        })
    }

    /// Join a new channel bound to `changes` and wait for the server ack.
    ///
    /// Each call gets its own topic (`realtime:<table>:<n>`), so two
    /// bindings on the same table never share a channel.
    pub async fn join(&self, changes: PostgresChanges) -> Result<Channel, Error> {
        let n = self.next_topic.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:{}:{n}", changes.table);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.commands
            .send(Command::Join {
                topic: topic.clone(),
                changes,
                events: events_tx,
                reply: reply_tx,
            })
            .map_err(|_| Error::RealtimeClosed)?;

        // Leaves the channel unless the join is acknowledged, including
        // when this future is dropped before the ack arrives.
        let mut pending = PendingJoin {
            commands: &self.commands,
            topic: Some(topic),
        };

        match tokio::time::timeout(self.join_timeout, reply_rx).await {
            Ok(Ok(Ok(()))) => Ok(Channel {
                topic: pending.acknowledge(),
                events: events_rx,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::RealtimeClosed),
            Err(_) => Err(Error::Timeout {
                timeout_secs: self.join_timeout.as_secs(),
            }),
        }
    }

    /// Leave a channel. Its event stream ends once the socket task drops it.
    pub fn leave(&self, topic: &str) -> Result<(), Error> {
        self.commands
            .send(Command::Leave {
                topic: topic.to_owned(),
            })
            .map_err(|_| Error::RealtimeClosed)
    }

    /// Signal the socket task to close the connection and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PendingJoin<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    topic: Option<String>,
}

impl PendingJoin<'_> {
    fn acknowledge(&mut self) -> String {
        self.topic.take().unwrap_or_default()
    }
}

impl Drop for PendingJoin<'_> {
    fn drop(&mut self) {
        if let Some(topic) = self.topic.take() {
            let _ = self.commands.send(Command::Leave { topic });
        }
    }
}

/// A joined channel: the receiving side of one `postgres_changes` binding.
#[derive(Debug)]
pub struct Channel {
    topic: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Channel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next change, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        futures_util::stream::unfold(self.events, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }
}

/// Derive the websocket endpoint from a project URL.
///
/// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub fn realtime_url(project_url: &Url, api_key: &SecretString) -> Result<Url, Error> {
    let root = project_url.as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!("{root}/realtime/v1/websocket"))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported URL scheme for realtime: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot switch scheme to {scheme}")))?;

    url.query_pairs_mut()
        .append_pair("apikey", api_key.expose_secret())
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

// ── Socket state ─────────────────────────────────────────────────────

struct ChannelState {
    changes: PostgresChanges,
    events: mpsc::UnboundedSender<ChangeEvent>,
    pending_reply: Option<oneshot::Sender<Result<(), Error>>>,
    join_ref: Option<String>,
}

/// Channel bookkeeping owned by the socket task. Survives reconnects.
struct Socket {
    channels: HashMap<String, ChannelState>,
    next_ref: u64,
    pending_heartbeat: Option<String>,
    access_token: SecretString,
}

impl Socket {
    fn new(access_token: SecretString) -> Self {
        Self {
            channels: HashMap::new(),
            next_ref: 0,
            pending_heartbeat: None,
            access_token,
        }
    }

    fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn join_frame(&mut self, topic: &str) -> Option<Frame> {
        let reference = self.make_ref();
        let channel = self.channels.get_mut(topic)?;
        channel.join_ref = Some(reference.clone());
        Some(Frame::join(
            topic,
            &channel.changes,
            self.access_token.expose_secret(),
            reference,
        ))
    }

    /// Apply a client command. The returned frame is sent when connected
    /// and discarded otherwise (joins are replayed by [`rejoin_all`]).
    fn handle_command(&mut self, command: Command) -> Option<Frame> {
        match command {
            Command::Join {
                topic,
                changes,
                events,
                reply,
            } => {
                debug!(%topic, table = %changes.table, "joining channel");
                self.channels.insert(
                    topic.clone(),
                    ChannelState {
                        changes,
                        events,
                        pending_reply: Some(reply),
                        join_ref: None,
                    },
                );
                self.join_frame(&topic)
            }
            Command::Leave { topic } => {
                self.channels.remove(&topic)?;
                debug!(%topic, "leaving channel");
                let reference = self.make_ref();
                Some(Frame::leave(&topic, reference))
            }
        }
    }

    /// Join frames for every known channel, issued after (re)connecting.
    fn rejoin_all(&mut self) -> Vec<Frame> {
        let mut topics: Vec<String> = self.channels.keys().cloned().collect();
        topics.sort();
        topics
            .iter()
            .filter_map(|topic| self.join_frame(topic))
            .collect()
    }

    fn heartbeat_frame(&mut self) -> Frame {
        let reference = self.make_ref();
        self.pending_heartbeat = Some(reference.clone());
        Frame::heartbeat(reference)
    }

    fn handle_frame(&mut self, frame: Frame) {
        trace!(topic = %frame.topic, event = %frame.event, "frame received");
        match frame.event.as_str() {
            "phx_reply" => self.handle_reply(&frame),
            "postgres_changes" => self.route_change(frame),
            "phx_error" => warn!(topic = %frame.topic, "channel error reported by server"),
            "phx_close" => {
                let current = self
                    .channels
                    .get(&frame.topic)
                    .is_some_and(|ch| frame.join_ref.is_none() || frame.join_ref == ch.join_ref);
                if current {
                    self.channels.remove(&frame.topic);
                    debug!(topic = %frame.topic, "channel closed by server");
                }
            }
            "system" => debug!(topic = %frame.topic, payload = %frame.payload, "system message"),
            _ => {}
        }
    }

    fn handle_reply(&mut self, frame: &Frame) {
        if frame.topic == PHOENIX_TOPIC {
            if frame.reference.is_some() && frame.reference == self.pending_heartbeat {
                self.pending_heartbeat = None;
            }
            return;
        }

        let Some(channel) = self.channels.get_mut(&frame.topic) else {
            return;
        };
        if frame.reference.is_none() || frame.reference != channel.join_ref {
            return;
        }

        let status = frame
            .payload
            .get("status")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("error");

        if status == "ok" {
            if let Some(reply) = channel.pending_reply.take() {
                info!(topic = %frame.topic, "channel joined");
                let _ = reply.send(Ok(()));
            } else {
                info!(topic = %frame.topic, "channel rejoined");
                let _ = channel
                    .events
                    .send(ChangeEvent::rejoined(&frame.topic, &channel.changes));
            }
            return;
        }

        let reason = reply_reason(&frame.payload);
        warn!(topic = %frame.topic, %reason, "channel join rejected");
        if let Some(channel) = self.channels.remove(&frame.topic) {
            if let Some(reply) = channel.pending_reply {
                let _ = reply.send(Err(Error::ChannelRejected {
                    topic: frame.topic.clone(),
                    reason,
                }));
            }
        }
    }

    fn route_change(&mut self, frame: Frame) {
        let Some(channel) = self.channels.get(&frame.topic) else {
            return;
        };
        let Some(data) = frame.payload.get("data") else {
            debug!(topic = %frame.topic, "postgres_changes frame without data");
            return;
        };
        match serde_json::from_value::<ChangeEvent>(data.clone()) {
            Ok(mut event) => {
                event.topic = frame.topic;
                if channel.events.send(event).is_err() {
                    debug!("change dropped: channel receiver gone");
                }
            }
            Err(e) => debug!(error = %e, "could not decode change payload"),
        }
    }

    /// Fail outstanding joins and end every channel stream.
    fn close_all(&mut self) {
        for (_, channel) in self.channels.drain() {
            if let Some(reply) = channel.pending_reply {
                let _ = reply.send(Err(Error::RealtimeClosed));
            }
        }
    }
}

fn reply_reason(payload: &serde_json::Value) -> String {
    let response = payload.get("response");
    response
        .and_then(|r| r.get("reason"))
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || response.map_or_else(|| "unknown".into(), ToString::to_string),
            String::from,
        )
}

// ── Background reconnection loop ─────────────────────────────────────

enum Exit {
    Disconnected,
    Shutdown,
}

/// Main loop: connect → run → on error, backoff → reconnect.
async fn socket_loop(
    url: Url,
    mut socket: Socket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    config: RealtimeConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    'outer: loop {
        match connect_and_run(&url, &mut socket, &mut commands, &config, &cancel).await {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Disconnected) => {
                info!("realtime disconnected, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                warn!(error = %e, attempt, "realtime socket error");

                if let Some(max) = config.reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(max_retries = max, "realtime reconnection limit reached, giving up");
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &config.reconnect);
                debug!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");

                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break 'outer,
                        () = &mut sleep => break,
                        command = commands.recv() => match command {
                            Some(command) => { let _ = socket.handle_command(command); }
                            None => break 'outer,
                        },
                    }
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }

    socket.close_all();
    debug!("realtime socket task exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_run(
    url: &Url,
    socket: &mut Socket,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    config: &RealtimeConfig,
    cancel: &CancellationToken,
) -> Result<Exit, Error> {
    // The query string carries the API key; log the host only.
    info!(host = url.host_str().unwrap_or_default(), "connecting to realtime");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(Exit::Shutdown),
        result = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri)) => {
            result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
        }
    };

    info!("realtime connected");

    let (mut write, mut read) = ws_stream.split();

    socket.pending_heartbeat = None;
    for frame in socket.rejoin_all() {
        send_frame(&mut write, &frame).await?;
    }

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(Exit::Shutdown);
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                };
                if let Some(frame) = socket.handle_command(command) {
                    send_frame(&mut write, &frame).await?;
                }
            }
            _ = heartbeat.tick() => {
                if socket.pending_heartbeat.is_some() {
                    return Err(Error::Timeout {
                        timeout_secs: config.heartbeat_interval.as_secs(),
                    });
                }
                let frame = socket.heartbeat_frame();
                send_frame(&mut write, &frame).await?;
            }
            message = read.next() => {
                match message {
                    Some(Ok(tungstenite::Message::Text(text))) => match decode_frame(&text) {
                        Ok(frame) => socket.handle_frame(frame),
                        Err(e) => debug!(error = %e, "failed to parse realtime frame"),
                    },
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            }),
                            None => Ok(Exit::Disconnected),
                        };
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        info!("realtime stream ended");
                        return Ok(Exit::Disconnected);
                    }
                    // Ping/Pong/Binary: tungstenite answers pings itself
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &Frame) -> Result<(), Error>
where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: String::new(),
    })?;
    trace!(topic = %frame.topic, event = %frame.event, "sending frame");
    write
        .send(tungstenite::Message::text(text))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────
