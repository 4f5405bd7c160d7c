//! The failover orchestrator: presents one logical broker connection on top
//! of a set of candidate endpoints.
//!
//! Send paths (`oneway`, `request`) block while no physical transport is
//! usable, a background reconnect task walks the candidate list with
//! backoff, and tracked commands are replayed onto each new connection
//! before normal traffic resumes. Connection state is broadcast over a
//! `watch` channel so blocked senders wake exactly when the state they wait
//! for is published.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::backoff::{attempt_limit, budget_exhausted, BackoffScheduler};
use crate::command::{Command, CommandKind, Response};
use crate::config::FailoverConfig;
use crate::discovery::DiscoveryEvent;
use crate::error::{Result, TransportError};
use crate::state::{ConnectionState, StateSnapshot};
use crate::tracker::InFlightTracker;
use crate::transport::{PhysicalTransport, TransportEvent, TransportFactory};
use crate::uri::{BrokerUri, CompositeUri, UriPool};

/// How often the backup pool task re-checks for empty standby slots while
/// connected.
const BACKUP_FILL_INTERVAL: Duration = Duration::from_millis(100);

/// Notifications delivered to the layer above the failover transport.
#[derive(Debug, Clone)]
pub enum FailoverEvent {
    /// An unsolicited command pushed by the broker.
    Command(Command),
    /// A correlated response, including responses synthesized locally for
    /// acks that became stale while disconnected.
    Response(Response),
    /// The active connection was lost; a reconnect is under way.
    Interrupted,
    /// A connection was (re)established and replay has completed.
    Resumed,
    /// The retry budget is spent; the transport is closed for good.
    Failed(String),
}

/// Point-in-time counters and state for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverStats {
    /// Current connection state.
    pub state: ConnectionState,
    /// URI of the active physical transport, if connected.
    pub connected_uri: Option<String>,
    /// Number of candidate URIs in the pool.
    pub candidates: usize,
    /// Commands awaiting acknowledgement (the replay set).
    pub tracked_commands: usize,
    /// Tracked commands dropped due to the cache bound.
    pub evicted_commands: u64,
    /// Pre-connected standby transports currently held.
    pub backup_count: usize,
    /// Consecutive failed reconnect cycles in the current outage.
    pub connect_failures: u32,
    /// Total transport failures handled since start.
    pub failover_count: u64,
}

struct ActiveTransport {
    uri: BrokerUri,
    transport: Arc<dyn PhysicalTransport>,
    generation: u64,
}

struct BackupEntry {
    uri: BrokerUri,
    transport: Arc<dyn PhysicalTransport>,
    priority: bool,
}

struct Inner {
    state: ConnectionState,
    started: bool,
    uris: UriPool,
    active: Option<ActiveTransport>,
    backups: Vec<BackupEntry>,
    tracker: InFlightTracker,
    backoff: BackoffScheduler,
    connect_failures: u32,
    first_connection: bool,
    failure: Option<String>,
    replaying: bool,
    generation: u64,
    next_command_id: u64,
    failover_count: u64,
}

impl Inner {
    fn take_id(&mut self) -> u64 {
        let id = self.next_command_id;
        self.next_command_id += 1;
        id
    }
}

struct Shared {
    config: FailoverConfig,
    factory: Arc<dyn TransportFactory>,
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<StateSnapshot>,
    wake_reconnect: Notify,
    events: UnboundedSender<FailoverEvent>,
}

enum AttemptOutcome {
    Success,
    Retryable,
    Fatal(String),
    Shutdown,
}

enum Pending {
    Attempt,
    Idle,
    Shutdown,
}

/// Transparent reconnecting transport over a pool of broker endpoints.
#[derive(Clone)]
pub struct FailoverTransport {
    shared: Arc<Shared>,
}

impl FailoverTransport {
    /// Creates the transport from explicit parts. Returns the transport and
    /// the channel on which inbound traffic and lifecycle notifications are
    /// delivered.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        config: FailoverConfig,
        uris: Vec<BrokerUri>,
    ) -> (Self, UnboundedReceiver<FailoverEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let mut pool = UriPool::new();
        for uri in &config.priority_uris {
            pool.add_priority(uri.clone());
        }
        for uri in uris {
            pool.add(uri);
        }

        let inner = Inner {
            state: ConnectionState::Disconnected,
            started: false,
            uris: pool,
            active: None,
            backups: Vec::new(),
            tracker: InFlightTracker::new(config.max_cache_size),
            backoff: BackoffScheduler::new(config.backoff()),
            connect_failures: 0,
            first_connection: true,
            failure: None,
            replaying: false,
            generation: 0,
            next_command_id: 1,
            failover_count: 0,
        };
        let (snapshot_tx, _) = watch::channel(StateSnapshot::new(ConnectionState::Disconnected));

        let shared = Arc::new(Shared {
            config,
            factory,
            inner: Mutex::new(inner),
            snapshot_tx,
            wake_reconnect: Notify::new(),
            events,
        });
        (Self { shared }, events_rx)
    }

    /// Creates the transport from a composite connection string such as
    /// `failover:(tcp://a:61616,tcp://b:61616)?randomize=false`.
    pub fn from_uri(
        factory: Arc<dyn TransportFactory>,
        input: &str,
    ) -> Result<(Self, UnboundedReceiver<FailoverEvent>)> {
        let composite = CompositeUri::parse(input)?;
        let config = FailoverConfig::from_params(&composite.params)?;
        Ok(Self::new(factory, config, composite.components))
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &FailoverConfig {
        &self.shared.config
    }

    /// Begins connecting. Idempotent while running; fails once closed.
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state.is_terminal() {
                return Err(TransportError::TransportClosed);
            }
            if inner.started {
                return Ok(());
            }
            if inner.uris.is_empty() {
                return Err(TransportError::InvalidConfiguration {
                    reason: "no candidate uris configured".to_string(),
                });
            }
            inner.started = true;
            inner.state = ConnectionState::Connecting;
            Self::publish(&self.shared, &inner);
            info!(candidates = inner.uris.len(), "failover transport starting");
        }

        tokio::spawn(Self::run_reconnect(self.shared.clone()));
        if self.shared.config.backup || self.shared.config.priority_backup {
            tokio::spawn(Self::run_backup_pool(self.shared.clone()));
        }
        self.shared.wake_reconnect.notify_one();
        Ok(())
    }

    /// Sends a command without waiting for a broker response.
    ///
    /// Blocks (subject to the configured timeout) until a connection is
    /// usable. When a tracked command fails mid-send the call still
    /// succeeds: the command stays in the replay set and is resent on the
    /// next connection. Untracked commands are retried within the call.
    pub async fn oneway(&self, mut command: Command) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state.is_terminal() {
                return Err(TransportError::TransportClosed);
            }
            if !inner.state.is_usable() {
                match command.kind() {
                    // Telling a dead peer to shut down achieves nothing.
                    CommandKind::Shutdown => {
                        debug!("dropping shutdown command while disconnected");
                        return Ok(());
                    }
                    // An ack refers to delivery state the next connection
                    // will not share; answer it locally instead of queueing.
                    CommandKind::Ack => {
                        let id = command.assign_id(inner.take_id());
                        debug!(command_id = id, "resolving stale ack locally while disconnected");
                        if command.response_required() {
                            let _ = self
                                .shared
                                .events
                                .send(FailoverEvent::Response(Response::new(id, Bytes::new())));
                        }
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }

        loop {
            let (transport, generation) = self.wait_until_ready().await?;

            let tracked = {
                let mut inner = self.shared.inner.lock().await;
                if inner.state.is_terminal() {
                    return Err(TransportError::TransportClosed);
                }
                let id = inner.take_id();
                command.assign_id(id);
                let tracked = command.response_required() || self.shared.config.track_messages;
                if tracked {
                    inner.tracker.track(&command);
                }
                tracked
            };

            match transport.oneway(command.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    Self::handle_transport_failure(&self.shared, generation, error).await;
                    if tracked {
                        // Replay onto the next connection resends it; as far
                        // as the caller is concerned the send is accepted.
                        return Ok(());
                    }
                    debug!("untracked send failed, retrying after reconnect");
                }
            }
        }
    }

    /// Sends a command and waits for its correlated response.
    pub async fn request(&self, command: Command) -> Result<Response> {
        self.request_timeout(command, None).await
    }

    /// Sends a command and waits for its correlated response, bounding the
    /// per-attempt wait on the physical transport.
    pub async fn request_timeout(
        &self,
        mut command: Command,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        loop {
            let (transport, generation) = self.wait_until_ready().await?;

            {
                let mut inner = self.shared.inner.lock().await;
                if inner.state.is_terminal() {
                    return Err(TransportError::TransportClosed);
                }
                let id = inner.take_id();
                command.assign_id(id);
                inner.tracker.track(&command);
            }

            match transport.request(command.clone(), timeout).await {
                Ok(response) => {
                    let mut inner = self.shared.inner.lock().await;
                    inner.tracker.acknowledge(response.correlation_id());
                    return Ok(response);
                }
                Err(error) => {
                    // The retry below resends it; drop it from the replay
                    // set so the reconnect does not send a duplicate.
                    {
                        let mut inner = self.shared.inner.lock().await;
                        if let Some(id) = command.id() {
                            inner.tracker.acknowledge(id);
                        }
                    }
                    Self::handle_transport_failure(&self.shared, generation, error).await;
                    debug!("request failed, retrying once reconnected");
                }
            }
        }
    }

    /// Closes the transport permanently, releasing the active connection and
    /// any standby backups and unblocking every waiting sender. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let (active, backups) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state.is_terminal() {
                return Ok(());
            }
            inner.state = ConnectionState::Closed;
            inner.started = false;
            inner.replaying = false;
            inner.tracker.clear();
            let active = inner.active.take();
            let backups = std::mem::take(&mut inner.backups);
            Self::publish(&self.shared, &inner);
            (active, backups)
        };
        self.shared.wake_reconnect.notify_one();

        if let Some(active) = active {
            let _ = active.transport.close().await;
        }
        for entry in backups {
            let _ = entry.transport.close().await;
        }
        info!("failover transport closed");
        Ok(())
    }

    /// Stops the transport. Equivalent to [`close`](Self::close); a stopped
    /// transport cannot be restarted.
    pub async fn stop(&self) -> Result<()> {
        self.close().await
    }

    /// Adds a candidate broker endpoint at runtime. Returns false when the
    /// URI was already known or runtime updates are disabled.
    pub async fn add_uri(&self, uri: BrokerUri) -> Result<bool> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state.is_terminal() {
            return Err(TransportError::TransportClosed);
        }
        if !self.shared.config.update_uris_supported {
            debug!(%uri, "ignoring add_uri, runtime updates disabled");
            return Ok(false);
        }
        let added = inner.uris.add(uri);
        if added {
            // A fresh candidate may end an outage sooner.
            self.shared.wake_reconnect.notify_one();
        }
        Ok(added)
    }

    /// Removes a candidate broker endpoint at runtime. The last remaining
    /// candidate cannot be removed.
    pub async fn remove_uri(&self, uri: &BrokerUri) -> Result<bool> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state.is_terminal() {
            return Err(TransportError::TransportClosed);
        }
        if !self.shared.config.update_uris_supported {
            debug!(%uri, "ignoring remove_uri, runtime updates disabled");
            return Ok(false);
        }
        if inner.uris.contains(uri) && inner.uris.len() == 1 {
            return Err(TransportError::InvalidConfiguration {
                reason: "cannot remove the last candidate uri".to_string(),
            });
        }
        Ok(inner.uris.remove(uri))
    }

    /// Feeds discovery agent events into the candidate pool for the life of
    /// the channel.
    pub fn attach_discovery(&self, mut events: UnboundedReceiver<DiscoveryEvent>) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut inner = shared.inner.lock().await;
                if inner.state.is_terminal() {
                    break;
                }
                if !shared.config.update_uris_supported {
                    continue;
                }
                match event {
                    DiscoveryEvent::Added(uri) => {
                        if inner.uris.add(uri.clone()) {
                            info!(%uri, "discovered broker added to candidate pool");
                            shared.wake_reconnect.notify_one();
                        }
                    }
                    DiscoveryEvent::Removed(uri) => {
                        if inner.uris.len() > 1 && inner.uris.remove(&uri) {
                            info!(%uri, "discovered broker removed from candidate pool");
                        }
                    }
                }
            }
        });
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot_tx.borrow().state
    }

    /// True while a physical transport is established.
    pub fn is_connected(&self) -> bool {
        self.state().is_usable()
    }

    /// True once the transport is permanently closed.
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// URI of the active physical transport, if connected.
    pub async fn connected_uri(&self) -> Option<BrokerUri> {
        let inner = self.shared.inner.lock().await;
        inner.active.as_ref().map(|a| a.uri.clone())
    }

    /// Snapshot of counters and state for monitoring.
    pub async fn stats(&self) -> FailoverStats {
        let inner = self.shared.inner.lock().await;
        FailoverStats {
            state: inner.state,
            connected_uri: inner.active.as_ref().map(|a| a.uri.to_string()),
            candidates: inner.uris.len(),
            tracked_commands: inner.tracker.len(),
            evicted_commands: inner.tracker.evictions(),
            backup_count: inner.backups.len(),
            connect_failures: inner.connect_failures,
            failover_count: inner.failover_count,
        }
    }

    fn publish(shared: &Shared, inner: &Inner) {
        shared.snapshot_tx.send_replace(StateSnapshot {
            state: inner.state,
            replaying: inner.replaying,
        });
    }

    /// Blocks until a transport is usable and replay has finished, honoring
    /// the configured timeout. Returns the transport handle and its
    /// generation so failures observed by the caller can be attributed to
    /// the right connection.
    async fn wait_until_ready(&self) -> Result<(Arc<dyn PhysicalTransport>, u64)> {
        let mut rx = self.shared.snapshot_tx.subscribe();

        let deadline = match self.shared.config.timeout_ms {
            t if t < 0 => None,
            0 => {
                return match self.try_ready().await? {
                    Some(ready) => Ok(ready),
                    None => Err(TransportError::NotConnected),
                };
            }
            t => Some(tokio::time::Instant::now() + Duration::from_millis(t as u64)),
        };

        loop {
            if let Some(ready) = self.try_ready().await? {
                return Ok(ready);
            }
            match deadline {
                None => {
                    if rx.changed().await.is_err() {
                        return Err(TransportError::TransportClosed);
                    }
                }
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.changed()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(TransportError::TransportClosed),
                    Err(_) => {
                        return Err(TransportError::FailoverTimeout {
                            timeout_ms: self.shared.config.timeout_ms as u64,
                        })
                    }
                },
            }
        }
    }

    /// One readiness probe: `Ok(Some)` with the active transport, `Ok(None)`
    /// when waiting is worthwhile, `Err` once the transport is done for.
    async fn try_ready(&self) -> Result<Option<(Arc<dyn PhysicalTransport>, u64)>> {
        let inner = self.shared.inner.lock().await;
        if let Some(reason) = &inner.failure {
            return Err(TransportError::ConnectionFailed {
                reason: reason.clone(),
            });
        }
        if inner.state.is_terminal() {
            return Err(TransportError::TransportClosed);
        }
        if inner.state.is_usable() && !inner.replaying {
            if let Some(active) = &inner.active {
                return Ok(Some((active.transport.clone(), active.generation)));
            }
        }
        Ok(None)
    }

    async fn run_reconnect(shared: Arc<Shared>) {
        debug!("reconnect task running");
        let mut rx = shared.snapshot_tx.subscribe();
        loop {
            let pending = {
                let inner = shared.inner.lock().await;
                if inner.state.is_terminal() {
                    Pending::Shutdown
                } else if inner.started && !inner.state.is_usable() && inner.active.is_none() {
                    Pending::Attempt
                } else {
                    Pending::Idle
                }
            };
            match pending {
                Pending::Shutdown => break,
                Pending::Idle => {
                    tokio::select! {
                        _ = shared.wake_reconnect.notified() => {}
                        _ = Self::closed(&mut rx) => break,
                    }
                    continue;
                }
                Pending::Attempt => {}
            }

            match Self::attempt_cycle(&shared).await {
                AttemptOutcome::Success => {}
                AttemptOutcome::Shutdown => break,
                AttemptOutcome::Fatal(reason) => {
                    Self::fail(&shared, reason).await;
                    break;
                }
                AttemptOutcome::Retryable => {
                    let delay = {
                        let mut inner = shared.inner.lock().await;
                        inner.backoff.next_delay()
                    };
                    if !delay.is_zero() {
                        debug!(
                            delay_ms = delay.as_millis() as u64,
                            "backing off before next reconnect cycle"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = Self::closed(&mut rx) => break,
                        }
                    }
                }
            }
        }
        debug!("reconnect task exiting");
    }

    /// Resolves when the transport reaches its terminal state.
    async fn closed(rx: &mut watch::Receiver<StateSnapshot>) {
        let _ = rx.wait_for(|snapshot| snapshot.state.is_terminal()).await;
    }

    /// One pass over the candidates: promote a standby backup if one is
    /// held, otherwise walk the attempt order connecting from scratch.
    async fn attempt_cycle(shared: &Arc<Shared>) -> AttemptOutcome {
        let (backup, candidates) = {
            let mut inner = shared.inner.lock().await;
            if inner.state.is_terminal() {
                return AttemptOutcome::Shutdown;
            }
            if inner.active.is_some() {
                return AttemptOutcome::Success;
            }
            let backup = Self::pop_backup(&mut inner, &shared.config);
            let candidates = if backup.is_some() {
                Vec::new()
            } else {
                inner.uris.candidates(shared.config.randomize)
            };
            (backup, candidates)
        };

        if let Some(entry) = backup {
            debug!(uri = %entry.uri, "promoting standby backup transport");
            let (tx, events) = mpsc::unbounded_channel();
            entry.transport.set_listener(tx);
            return Self::adopt(shared, entry.uri, entry.transport, events).await;
        }

        let mut last_error: Option<TransportError> = None;
        for uri in candidates {
            match shared.factory.create(&uri).await {
                Ok(transport) => {
                    let (tx, events) = mpsc::unbounded_channel();
                    transport.set_listener(tx);
                    match transport.start().await {
                        Ok(()) => return Self::adopt(shared, uri, transport, events).await,
                        Err(error) => {
                            debug!(%uri, %error, "candidate failed to start");
                            let _ = transport.close().await;
                            last_error = Some(error);
                        }
                    }
                }
                Err(error) => {
                    debug!(%uri, %error, "candidate connect failed");
                    last_error = Some(error);
                }
            }
        }

        let mut inner = shared.inner.lock().await;
        if inner.state.is_terminal() {
            return AttemptOutcome::Shutdown;
        }
        inner.connect_failures += 1;
        let limit = attempt_limit(
            inner.first_connection,
            shared.config.startup_max_reconnect_attempts,
            shared.config.max_reconnect_attempts,
        );
        if budget_exhausted(inner.connect_failures, limit) {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no broker uris available".to_string());
            return AttemptOutcome::Fatal(reason);
        }
        warn!(
            failures = inner.connect_failures,
            "reconnect cycle exhausted all candidates"
        );
        AttemptOutcome::Retryable
    }

    /// Installs a started transport as the active connection, replays the
    /// in-flight set, then opens the gate for new traffic.
    async fn adopt(
        shared: &Arc<Shared>,
        uri: BrokerUri,
        transport: Arc<dyn PhysicalTransport>,
        events: UnboundedReceiver<TransportEvent>,
    ) -> AttemptOutcome {
        let (generation, replay) = {
            let mut inner = shared.inner.lock().await;
            if inner.state.is_terminal() {
                drop(inner);
                let _ = transport.close().await;
                return AttemptOutcome::Shutdown;
            }
            inner.generation += 1;
            let generation = inner.generation;
            inner.active = Some(ActiveTransport {
                uri: uri.clone(),
                transport: transport.clone(),
                generation,
            });
            inner.state = ConnectionState::Connected;
            inner.replaying = true;
            inner.connect_failures = 0;
            inner.first_connection = false;
            inner.backoff.reset();
            let replay = inner.tracker.drain_for_replay();
            Self::publish(shared, &inner);
            (generation, replay)
        };
        info!(%uri, "connected to broker");
        Self::spawn_dispatch(shared.clone(), generation, events);

        // Replay outside the lock; new senders are held off by the
        // replaying flag until the whole set has been resent.
        if !replay.is_empty() {
            debug!(count = replay.len(), "replaying in-flight commands");
        }
        for command in replay {
            if let Err(error) = transport.oneway(command).await {
                warn!(%error, "replay failed, connection abandoned");
                Self::handle_transport_failure(shared, generation, error).await;
                return AttemptOutcome::Retryable;
            }
        }

        let resumed = {
            let mut inner = shared.inner.lock().await;
            let resumed = Self::finish_replay(&mut inner, generation);
            if resumed {
                Self::publish(shared, &inner);
            }
            resumed
        };
        if resumed {
            let _ = shared.events.send(FailoverEvent::Resumed);
        }
        AttemptOutcome::Success
    }

    /// Clears the replay gate, but only when the connection that performed
    /// the replay is still the active one. A connection that died while
    /// replaying must not announce a resume.
    fn finish_replay(inner: &mut Inner, generation: u64) -> bool {
        if inner.generation == generation && inner.state.is_usable() {
            inner.replaying = false;
            true
        } else {
            false
        }
    }

    /// Forwards inbound traffic from one physical transport until it fails
    /// or is replaced.
    fn spawn_dispatch(
        shared: Arc<Shared>,
        generation: u64,
        mut events: UnboundedReceiver<TransportEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Response(response) => {
                        {
                            let mut inner = shared.inner.lock().await;
                            inner.tracker.acknowledge(response.correlation_id());
                        }
                        let _ = shared.events.send(FailoverEvent::Response(response));
                    }
                    TransportEvent::Command(command) => {
                        let _ = shared.events.send(FailoverEvent::Command(command));
                    }
                    TransportEvent::Error(error) => {
                        Self::handle_transport_failure(&shared, generation, error).await;
                        break;
                    }
                }
            }
        });
    }

    /// Reacts to a failure of the active transport. Reports against a stale
    /// generation are ignored; the first report tears the connection down,
    /// returns its URI to the candidate pool, and wakes the reconnect task
    /// (or fails the whole transport when reconnecting is not allowed).
    async fn handle_transport_failure(
        shared: &Arc<Shared>,
        generation: u64,
        error: TransportError,
    ) {
        let (transport, reconnect_allowed) = {
            let mut inner = shared.inner.lock().await;
            let current = inner
                .active
                .as_ref()
                .map(|a| a.generation == generation)
                .unwrap_or(false);
            if !current || inner.state.is_terminal() {
                return;
            }
            let active = match inner.active.take() {
                Some(active) => active,
                None => return,
            };
            // The endpoint may recover; keep it eligible for future cycles.
            inner.uris.add(active.uri.clone());
            inner.failover_count += 1;
            inner.replaying = false;

            let limit = attempt_limit(
                inner.first_connection,
                shared.config.startup_max_reconnect_attempts,
                shared.config.max_reconnect_attempts,
            );
            let reconnect_allowed = inner.started && limit != 0;
            if reconnect_allowed {
                inner.state = ConnectionState::Reconnecting;
            } else {
                inner.failure = Some(error.to_string());
                inner.state = ConnectionState::Closed;
            }
            Self::publish(shared, &inner);
            (active.transport, reconnect_allowed)
        };
        warn!(%error, "active transport failed");

        if reconnect_allowed {
            let _ = shared.events.send(FailoverEvent::Interrupted);
            shared.wake_reconnect.notify_one();
        } else {
            let _ = shared.events.send(FailoverEvent::Failed(error.to_string()));
        }
        let _ = transport.close().await;
    }

    /// Terminal failure: the retry budget is spent. Records the reason so
    /// blocked senders fail with it, then closes the state machine.
    async fn fail(shared: &Arc<Shared>, reason: String) {
        {
            let mut inner = shared.inner.lock().await;
            if inner.state.is_terminal() {
                return;
            }
            inner.failure = Some(reason.clone());
            inner.state = ConnectionState::Closed;
            inner.replaying = false;
            inner.tracker.clear();
            Self::publish(shared, &inner);
        }
        warn!(%reason, "reconnect budget exhausted, transport failed");
        let _ = shared.events.send(FailoverEvent::Failed(reason));
    }

    fn pop_backup(inner: &mut Inner, config: &FailoverConfig) -> Option<BackupEntry> {
        if inner.backups.is_empty() {
            return None;
        }
        let pos = if config.priority_backup {
            inner.backups.iter().position(|b| b.priority).unwrap_or(0)
        } else {
            0
        };
        Some(inner.backups.remove(pos))
    }

    /// Keeps the standby pool topped up while connected.
    async fn run_backup_pool(shared: Arc<Shared>) {
        debug!("backup pool task running");
        let mut rx = shared.snapshot_tx.subscribe();
        loop {
            let snapshot = *rx.borrow();
            if snapshot.state.is_terminal() {
                break;
            }
            if snapshot.state.is_usable() {
                Self::fill_backups(&shared).await;
                tokio::select! {
                    _ = tokio::time::sleep(BACKUP_FILL_INTERVAL) => {}
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            } else if rx.changed().await.is_err() {
                break;
            }
        }
        debug!("backup pool task exiting");
    }

    async fn fill_backups(shared: &Arc<Shared>) {
        let wanted: Vec<(BrokerUri, bool)> = {
            let inner = shared.inner.lock().await;
            if !inner.state.is_usable() {
                return;
            }
            let room = shared
                .config
                .backup_pool_size
                .saturating_sub(inner.backups.len());
            if room == 0 {
                return;
            }
            let active_uri = inner.active.as_ref().map(|a| a.uri.clone());
            let mut candidates: Vec<(BrokerUri, bool)> = inner
                .uris
                .uris()
                .into_iter()
                .filter(|uri| active_uri.as_ref() != Some(uri))
                .filter(|uri| !inner.backups.iter().any(|b| &b.uri == uri))
                .map(|uri| {
                    let priority = inner.uris.is_priority(&uri);
                    (uri, priority)
                })
                .collect();
            if shared.config.priority_backup {
                candidates.sort_by_key(|entry| !entry.1);
            }
            candidates.truncate(room);
            candidates
        };

        for (uri, priority) in wanted {
            let transport = match shared.factory.create(&uri).await {
                Ok(transport) => transport,
                Err(error) => {
                    debug!(%uri, %error, "backup candidate connect failed");
                    continue;
                }
            };
            let (tx, events) = mpsc::unbounded_channel();
            transport.set_listener(tx);
            if let Err(error) = transport.start().await {
                debug!(%uri, %error, "backup candidate failed to start");
                let _ = transport.close().await;
                continue;
            }

            let accepted = {
                let mut inner = shared.inner.lock().await;
                if inner.state.is_usable() && inner.backups.len() < shared.config.backup_pool_size
                {
                    inner.backups.push(BackupEntry {
                        uri: uri.clone(),
                        transport: transport.clone(),
                        priority,
                    });
                    true
                } else {
                    false
                }
            };
            if accepted {
                debug!(%uri, "standby backup transport ready");
                Self::spawn_backup_watch(shared.clone(), uri, events);
            } else {
                let _ = transport.close().await;
            }
        }
    }

    /// Discards a pooled backup the moment it reports a failure.
    fn spawn_backup_watch(
        shared: Arc<Shared>,
        uri: BrokerUri,
        mut events: UnboundedReceiver<TransportEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let TransportEvent::Error(error) = event {
                    debug!(%uri, %error, "standby backup failed, discarding");
                    let removed = {
                        let mut inner = shared.inner.lock().await;
                        match inner.backups.iter().position(|b| b.uri == uri) {
                            Some(pos) => Some(inner.backups.remove(pos)),
                            None => None,
                        }
                    };
                    if let Some(entry) = removed {
                        let _ = entry.transport.close().await;
                    }
                    break;
                }
            }
        });
    }
}
