//! Connection state machine for one armband session.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──▶ Discovering ──▶ Ready ◀──disarm── Streaming
//!       ▲                                                     │ ──────arm──────▶ │
//!       └──────────── Disconnecting ◀──────disconnect─────────┴──────────────────┘
//!
//!  any state ──link lost──▶ Disconnected   (Faulted if a command write was in flight)
//! ```
//!
//! Transitions are checked under the lifecycle lock, so an operation issued
//! in the wrong state fails before it touches the transport.  Link loss is
//! observed by the pump task, which drains the transport's event stream into
//! the [`Dispatcher`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared as SharedFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::{MyoError, Result, TransportError};
use crate::protocol::Command;
use crate::registry::{Channel, CharacteristicRegistry};
use crate::transport::{BleTransport, TransportEvent};
use crate::types::{MyoEvent, StreamModes};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
    Streaming,
    Disconnecting,
    /// The link dropped during a command write.  Terminal for this session;
    /// `connect` starts a fresh one.
    Faulted,
}

/// Per-operation timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub discover: Duration,
    pub write: Duration,
    pub subscribe: Duration,
    pub read: Duration,
    pub disconnect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            // BlueZ can block indefinitely on Device1.Connect when the band is
            // out of range; a BLE connect normally takes under 2 s.
            connect: Duration::from_secs(10),
            discover: Duration::from_secs(15),
            write: Duration::from_secs(5),
            subscribe: Duration::from_secs(5),
            read: Duration::from_secs(5),
            disconnect: Duration::from_secs(5),
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// Transport cleanup left behind by a cancelled `connect` or `arm`.
type Cleanup = SharedFuture<BoxFuture<'static, ()>>;

struct Lifecycle {
    state: SessionState,
    registry: Option<Arc<CharacteristicRegistry>>,
    /// Dispatcher generation of the current (or last) session.
    generation: u64,
    /// Bumped by every `connect`, so a superseded attempt can tell.
    attempt: u64,
    writes_in_flight: usize,
    modes: StreamModes,
    pump: Option<JoinHandle<()>>,
    /// Must finish before the next connect, arm, disarm or disconnect touches
    /// the transport.
    cleanup: Option<Cleanup>,
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    dispatcher: Dispatcher,
}

impl Shared {
    /// The transport reported link loss (or its event stream ended).
    fn link_lost(&self, generation: u64) {
        let event = {
            let mut lc = self.lifecycle.lock();
            if lc.generation != generation {
                return;
            }
            match lc.state {
                SessionState::Disconnected
                | SessionState::Disconnecting
                | SessionState::Faulted => return,
                _ => {}
            }
            let previous = lc.state;
            lc.registry = None;
            lc.pump = None;
            lc.modes = StreamModes::default();
            if lc.writes_in_flight > 0 {
                lc.state = SessionState::Faulted;
                warn!("session: link lost in {previous:?} during a command write, session faulted");
                MyoEvent::Faulted(format!("link lost in {previous:?} during a command write"))
            } else {
                lc.state = SessionState::Disconnected;
                warn!("session: link lost in {previous:?}");
                MyoEvent::Disconnected
            }
        };
        self.dispatcher.close(generation, event);
    }

    /// Return a connect attempt that did not reach `Ready` to `Disconnected`,
    /// unless `disconnect` or a newer attempt already moved on.
    fn abandon_connect(&self, attempt: u64) {
        let mut lc = self.lifecycle.lock();
        if lc.attempt == attempt
            && matches!(
                lc.state,
                SessionState::Connecting | SessionState::Discovering
            )
        {
            lc.state = SessionState::Disconnected;
            lc.registry = None;
        }
    }

    /// Spawn `fut` behind any cleanup still pending.  Used from `Drop`,
    /// where cleanup cannot be awaited.
    fn defer_cleanup<F>(&self, what: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("session: no runtime, skipping {what} cleanup");
            return;
        };
        let mut lc = self.lifecycle.lock();
        let previous = lc.cleanup.take();
        let task = runtime.spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            fut.await;
        });
        lc.cleanup = Some(task.map(|_| ()).boxed().shared());
    }

    /// Wait until cleanup from cancelled operations has reached the
    /// transport.
    async fn finish_cleanup(&self) {
        let pending = self.lifecycle.lock().cleanup.clone();
        let Some(pending) = pending else {
            return;
        };
        if pending.peek().is_none() {
            debug!("session: waiting for cleanup of a cancelled operation");
        }
        pending.await;
    }
}

async fn timed<R, F>(operation: &'static str, after: Duration, fut: F) -> Result<R>
where
    F: Future<Output = std::result::Result<R, TransportError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(MyoError::Transport),
        Err(_) => Err(MyoError::Timeout { operation, after }),
    }
}

// ── Cancellation guards ───────────────────────────────────────────────────────

/// Restores `Disconnected` and releases the link if a `connect` future is
/// dropped before it finishes.
struct ConnectRollback<T: BleTransport> {
    shared: Arc<Shared>,
    transport: Arc<T>,
    attempt: u64,
    timeout: Duration,
    armed: bool,
}

impl<T: BleTransport> Drop for ConnectRollback<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.abandon_connect(self.attempt);
        warn!("session: connect cancelled, releasing link");
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        self.shared.defer_cleanup("connect", async move {
            if let Err(e) = timed("disconnect", timeout, transport.disconnect()).await {
                debug!("session: disconnect after cancelled connect: {e}");
            }
        });
    }
}

/// Releases the subscriptions issued so far if an `arm` future is dropped.
struct ArmRollback<T: BleTransport> {
    shared: Arc<Shared>,
    transport: Arc<T>,
    timeout: Duration,
    issued: Vec<(Channel, Uuid)>,
    armed: bool,
}

impl<T: BleTransport> Drop for ArmRollback<T> {
    fn drop(&mut self) {
        if !self.armed || self.issued.is_empty() {
            return;
        }
        for (channel, _) in &self.issued {
            self.shared.dispatcher.disable(*channel);
        }
        warn!(
            "session: arm cancelled, releasing {} subscription(s)",
            self.issued.len()
        );
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        let issued = std::mem::take(&mut self.issued);
        self.shared.defer_cleanup("arm", async move {
            for (channel, uuid) in issued {
                if let Err(e) = timed("unsubscribe", timeout, transport.unsubscribe(uuid)).await {
                    debug!("session: unsubscribe {channel:?} after cancelled arm: {e}");
                }
            }
        });
    }
}

/// Counts a command write as in flight until dropped.
struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut lc = self.0.lifecycle.lock();
        lc.writes_in_flight = lc.writes_in_flight.saturating_sub(1);
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One armband session over an injected transport.
pub struct Session<T: BleTransport> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    timeouts: Timeouts,
    /// Serializes command writes in call order (tokio's mutex is FIFO).
    commands: tokio::sync::Mutex<()>,
    /// Serializes arm / disarm / disconnect.
    ops: tokio::sync::Mutex<()>,
}

impl<T: BleTransport> Session<T> {
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Self {
            transport: Arc::new(transport),
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: SessionState::Disconnected,
                    registry: None,
                    generation: 0,
                    attempt: 0,
                    writes_in_flight: 0,
                    modes: StreamModes::default(),
                    pump: None,
                    cleanup: None,
                }),
                dispatcher: Dispatcher::new(),
            }),
            timeouts,
            commands: tokio::sync::Mutex::new(()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lifecycle.lock().state
    }

    /// Modes set by the last successful `arm`, all off otherwise.
    pub fn modes(&self) -> StreamModes {
        self.shared.lifecycle.lock().modes
    }

    /// The validated registry while connected.
    pub fn registry(&self) -> Option<Arc<CharacteristicRegistry>> {
        self.shared.lifecycle.lock().registry.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Registry and generation, provided the session is in one of `allowed`.
    fn require(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(Arc<CharacteristicRegistry>, u64)> {
        let lc = self.shared.lifecycle.lock();
        match (&lc.registry, allowed.contains(&lc.state)) {
            (Some(registry), true) => Ok((Arc::clone(registry), lc.generation)),
            _ => Err(MyoError::InvalidState {
                operation,
                state: lc.state,
            }),
        }
    }

    // ── connect ───────────────────────────────────────────────────────────────

    /// Connect, discover and validate the peripheral.  Leaves the session
    /// `Ready` on success and `Disconnected` on any failure.
    pub async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut lc = self.shared.lifecycle.lock();
            match lc.state {
                SessionState::Disconnected | SessionState::Faulted => {
                    lc.state = SessionState::Connecting;
                    lc.attempt += 1;
                    lc.attempt
                }
                state => return Err(MyoError::AlreadyConnected(state)),
            }
        };
        let peripheral = self.transport.peripheral_id();
        info!("session: connecting to {peripheral}");

        let mut rollback = ConnectRollback {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            attempt,
            timeout: self.timeouts.disconnect,
            armed: true,
        };
        let result = self.establish(attempt, &peripheral).await;
        rollback.armed = false;

        match result {
            Ok(()) => {
                info!("session: {peripheral} ready");
                Ok(())
            }
            Err(e) => {
                warn!("session: connect to {peripheral} failed: {e}");
                self.shared.abandon_connect(attempt);
                if !matches!(e, MyoError::Connect(_)) {
                    self.release_link("failed connect").await;
                }
                Err(e)
            }
        }
    }

    async fn establish(&self, attempt: u64, peripheral: &str) -> Result<()> {
        self.shared.finish_cleanup().await;

        match tokio::time::timeout(self.timeouts.connect, self.transport.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(MyoError::Connect(e)),
            Err(_) => {
                return Err(MyoError::Timeout {
                    operation: "connect",
                    after: self.timeouts.connect,
                })
            }
        }
        self.advance(attempt, SessionState::Connecting, SessionState::Discovering)
            .await?;

        let services = timed(
            "discover",
            self.timeouts.discover,
            self.transport.discover_services(),
        )
        .await?;
        let registry = Arc::new(CharacteristicRegistry::discover(&services)?);
        let events = self.transport.events().await?;

        let generation = {
            let mut lc = self.shared.lifecycle.lock();
            if lc.attempt == attempt && lc.state == SessionState::Discovering {
                let generation = self.shared.dispatcher.open();
                lc.state = SessionState::Ready;
                lc.generation = generation;
                lc.writes_in_flight = 0;
                lc.registry = Some(Arc::clone(&registry));
                lc.modes = StreamModes::default();
                Some(generation)
            } else {
                None
            }
        };
        let Some(generation) = generation else {
            return Err(self.interrupted(SessionState::Discovering).await);
        };
        self.shared
            .dispatcher
            .broadcast(MyoEvent::Connected(peripheral.to_string()));

        let pump = tokio::spawn(pump(
            Arc::clone(&self.shared),
            registry,
            generation,
            events,
        ));
        let mut lc = self.shared.lifecycle.lock();
        if lc.generation == generation && lc.state == SessionState::Ready {
            lc.pump = Some(pump);
        } else {
            pump.abort();
        }
        Ok(())
    }

    /// Move `attempt` from `from` to `to`.  Fails and releases the link if
    /// `disconnect` ran while the transport was busy.
    async fn advance(&self, attempt: u64, from: SessionState, to: SessionState) -> Result<()> {
        {
            let mut lc = self.shared.lifecycle.lock();
            if lc.attempt == attempt && lc.state == from {
                lc.state = to;
                return Ok(());
            }
        }
        Err(self.interrupted(from).await)
    }

    async fn interrupted(&self, during: SessionState) -> MyoError {
        debug!(
            "session: connect interrupted in {during:?}, now {:?}",
            self.state()
        );
        self.release_link("interrupted connect").await;
        MyoError::Connect(TransportError::NotConnected)
    }

    async fn release_link(&self, after: &str) {
        if let Err(e) = timed(
            "disconnect",
            self.timeouts.disconnect,
            self.transport.disconnect(),
        )
        .await
        {
            debug!("session: releasing link after {after}: {e}");
        }
    }

    // ── arm / disarm ──────────────────────────────────────────────────────────

    /// Subscribe every channel `modes` implies, then enable the modes.
    ///
    /// Each subscription is acknowledged before the mode command is written,
    /// so no initial samples are lost.  On failure the subscriptions already
    /// issued are released and the session stays `Ready`.
    pub async fn arm(&self, modes: StreamModes) -> Result<()> {
        let _op = self.ops.lock().await;
        self.shared.finish_cleanup().await;
        let (registry, generation) = self.require("arm", &[SessionState::Ready])?;

        let targets = modes
            .channels()
            .into_iter()
            .map(|channel| registry.uuid(channel).map(|uuid| (channel, uuid)))
            .collect::<Result<Vec<_>>>()?;

        let mut rollback = ArmRollback {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            timeout: self.timeouts.subscribe,
            issued: Vec::with_capacity(targets.len()),
            armed: true,
        };
        let result = self.subscribe_then_enable(&mut rollback, &targets, modes, generation).await;
        rollback.armed = false;

        match result {
            Ok(()) => {
                info!(
                    "session: streaming {:?} on {} channel(s)",
                    modes,
                    targets.len()
                );
                Ok(())
            }
            Err(e) => {
                warn!("session: arm failed: {e}");
                for (channel, uuid) in std::mem::take(&mut rollback.issued) {
                    self.shared.dispatcher.disable(channel);
                    if let Err(release) = self.unsubscribe(uuid).await {
                        debug!("session: releasing {channel:?} after failed arm: {release}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn subscribe_then_enable(
        &self,
        rollback: &mut ArmRollback<T>,
        targets: &[(Channel, Uuid)],
        modes: StreamModes,
        generation: u64,
    ) -> Result<()> {
        for &(channel, uuid) in targets {
            if !self.shared.dispatcher.enable(generation, channel) {
                return Err(MyoError::Faulted("link lost while arming".into()));
            }
            rollback.issued.push((channel, uuid));
            timed("subscribe", self.timeouts.subscribe, self.transport.subscribe(uuid)).await?;
            debug!("session: subscribed {channel:?}");
        }

        self.write_command(&Command::SetMode {
            emg: modes.emg,
            imu: modes.imu,
            classifier: modes.classifier,
        })
        .await?;

        let mut lc = self.shared.lifecycle.lock();
        if lc.generation != generation || lc.state != SessionState::Ready {
            return Err(MyoError::Faulted(format!(
                "session left Ready while arming ({:?})",
                lc.state
            )));
        }
        lc.state = SessionState::Streaming;
        lc.modes = modes;
        Ok(())
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<()> {
        timed(
            "unsubscribe",
            self.timeouts.subscribe,
            self.transport.unsubscribe(uuid),
        )
        .await
    }

    /// Unsubscribe every channel and turn all modes off.
    pub async fn disarm(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        self.shared.finish_cleanup().await;
        self.disarm_locked().await
    }

    async fn disarm_locked(&self) -> Result<()> {
        let (registry, generation) = self.require("disarm", &[SessionState::Streaming])?;

        let mut first_error = None;
        for channel in self.shared.dispatcher.enabled() {
            self.shared.dispatcher.disable(channel);
            let Ok(uuid) = registry.uuid(channel) else {
                continue;
            };
            if let Err(e) = self.unsubscribe(uuid).await {
                warn!("session: unsubscribe {channel:?} failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        {
            let mut lc = self.shared.lifecycle.lock();
            if lc.generation == generation && lc.state == SessionState::Streaming {
                lc.state = SessionState::Ready;
                lc.modes = StreamModes::default();
            }
        }

        self.write_command(&Command::disable_all()).await?;
        info!("session: streaming stopped");
        first_error.map_or(Ok(()), Err)
    }

    // ── disconnect ────────────────────────────────────────────────────────────

    /// Tear the session down.  Disarms first when streaming; a no-op when
    /// already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        self.shared.finish_cleanup().await;
        let state = self.state();
        if state == SessionState::Disconnected {
            return Ok(());
        }
        if state == SessionState::Streaming {
            if let Err(e) = self.disarm_locked().await {
                warn!("session: disarm before disconnect failed: {e}");
            }
        }

        let (generation, pump) = {
            let mut lc = self.shared.lifecycle.lock();
            lc.state = SessionState::Disconnecting;
            (lc.generation, lc.pump.take())
        };
        if let Some(pump) = pump {
            pump.abort();
        }

        let result = timed(
            "disconnect",
            self.timeouts.disconnect,
            self.transport.disconnect(),
        )
        .await;

        {
            let mut lc = self.shared.lifecycle.lock();
            lc.state = SessionState::Disconnected;
            lc.registry = None;
            lc.modes = StreamModes::default();
        }
        self.shared
            .dispatcher
            .close(generation, MyoEvent::Disconnected);
        info!("session: disconnected from {}", self.transport.peripheral_id());
        result
    }

    // ── Commands and reads ────────────────────────────────────────────────────

    /// Encode and write one command.
    ///
    /// Writes are queued in call order and never overlap.  A failed write is
    /// reported, not retried: most commands have physical side effects.
    pub async fn write_command(&self, command: &Command) -> Result<()> {
        let payload = command.encode();
        let _turn = self.commands.lock().await;

        let (uuid, generation) = {
            let mut lc = self.shared.lifecycle.lock();
            let registry = match (&lc.registry, lc.state) {
                (Some(registry), SessionState::Ready | SessionState::Streaming) => registry,
                (_, state) => {
                    return Err(MyoError::InvalidState {
                        operation: command.name(),
                        state,
                    })
                }
            };
            let uuid = registry.uuid(Channel::Command)?;
            lc.writes_in_flight += 1;
            (uuid, lc.generation)
        };
        let _in_flight = InFlight(&self.shared);

        debug!("session: write {} {:02x?}", command.name(), payload);
        let result =
            tokio::time::timeout(self.timeouts.write, self.transport.write(uuid, &payload)).await;

        let link_lost = {
            let lc = self.shared.lifecycle.lock();
            lc.generation != generation
                || matches!(
                    lc.state,
                    SessionState::Disconnected | SessionState::Faulted
                )
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if link_lost => Err(MyoError::Faulted(format!(
                "link lost during {}: {e}",
                command.name()
            ))),
            Ok(Err(e)) => Err(MyoError::WriteFailed(e)),
            Err(_) => Err(MyoError::Timeout {
                operation: command.name(),
                after: self.timeouts.write,
            }),
        }
    }

    /// Read a readable channel (battery, firmware, info, name).
    pub async fn read(&self, channel: Channel) -> Result<Vec<u8>> {
        let (registry, _) = self.require(
            "read",
            &[SessionState::Ready, SessionState::Streaming],
        )?;
        let uuid = registry.uuid(channel)?;
        timed("read", self.timeouts.read, self.transport.read(uuid)).await
    }
}

impl<T: BleTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.shared.lifecycle.lock().pump.take() {
            pump.abort();
        }
    }
}

// ── Pump ──────────────────────────────────────────────────────────────────────

/// Drains the transport's event stream for one session generation.
async fn pump(
    shared: Arc<Shared>,
    registry: Arc<CharacteristicRegistry>,
    generation: u64,
    mut events: BoxStream<'static, TransportEvent>,
) {
    let mut count: u64 = 0;
    while let Some(event) = events.next().await {
        match event {
            TransportEvent::Notification { uuid, value } => {
                count += 1;
                if count <= 3 || count % 1000 == 0 {
                    debug!(
                        "pump: notification #{count} uuid={uuid} len={}",
                        value.len()
                    );
                }
                match registry.channel_for(uuid) {
                    Some(channel) => shared.dispatcher.dispatch(generation, channel, &value),
                    None => debug!("pump: notification from unknown characteristic {uuid}"),
                }
            }
            TransportEvent::Disconnected => {
                shared.link_lost(generation);
                return;
            }
        }
    }
    info!("pump: event stream ended after {count} notification(s)");
    shared.link_lost(generation);
}
