//! Connection manager for the single push channel of a signed-in session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::mpsc::UnboundedSender;
use futures_util::StreamExt;
use pizarra_shared::WireEvent;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::router::{EventRouter, HandlerTable};
use super::state::{ConnectionError, ConnectionState};
use super::transport::{Transport, TransportLink};
use crate::config::ReconnectConfig;
use crate::identity::IdentityCache;

/// Requests from the manager to its connection loop.
#[derive(Debug)]
enum Command {
    /// Re-send the registration handshake on the live link.
    Reregister,
    /// Send an event on the live link.
    Emit(WireEvent),
}

/// A link that stayed up this long counts as healthy even if it carried no
/// frames, and resets the reconnect budget when it drops.
const STABLE_LINK: Duration = Duration::from_secs(30);

/// Why a link stopped being pumped.
enum LinkEnd {
    /// Transport closed; reconnect. `stable` when the link delivered a frame
    /// or outlived [`STABLE_LINK`].
    Dropped { stable: bool },
    /// Manager side went away; stop.
    Shutdown,
}

/// Per-event wire listeners, attached once per connection loop.
type Listeners = HashMap<String, Box<dyn Fn(&Value) + Send + Sync>>;

/// The running connection loop.
struct LiveSession {
    user_id: Arc<AtomicU64>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Everything the connection loop needs, cloned into its task.
#[derive(Clone)]
struct LoopContext {
    transport: Arc<dyn Transport>,
    identity: IdentityCache,
    router: Arc<EventRouter>,
    reconnect: ReconnectConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    user_id: Arc<AtomicU64>,
    /// Current loop generation, bumped by the manager on restart and teardown.
    generation: Arc<AtomicU64>,
    /// Generation this loop was started with.
    epoch: u64,
}

impl LoopContext {
    /// Publish `state` unless this loop has been superseded. The check runs
    /// under the channel's write lock, so it cannot interleave with the
    /// manager's own `Disconnected` after a teardown.
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != self.epoch {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Owns the physical channel to the push server.
///
/// One instance per signed-in session. It is not tied to any screen: only
/// [`ConnectionManager::teardown`] (or dropping the manager) closes the
/// channel. Transport failures are logged and handled by the reconnect
/// loop; they are never returned to callers.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    identity: IdentityCache,
    router: Arc<EventRouter>,
    reconnect: ReconnectConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    generation: Arc<AtomicU64>,
    session: Mutex<Option<LiveSession>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: IdentityCache,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            identity,
            router: Arc::new(EventRouter::new()),
            reconnect,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    /// Start delivering events for `user_id`.
    ///
    /// Idempotent: while a connection loop is alive no second channel is
    /// opened. If the channel is already up, the registration handshake is
    /// re-sent, since the caller may be signalling a changed role or scope.
    /// After the reconnect budget is exhausted this is the only way to
    /// resume delivery.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initialize(&self, user_id: u64) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(live) = session.as_ref() {
            // A loop that reported `Failed` is on its way out even if its task
            // has not finished yet.
            if !live.task.is_finished() && !self.current_state().is_failed() {
                live.user_id.store(user_id, Ordering::SeqCst);
                if self.current_state().is_registered() {
                    crate::log_info!("Channel already open, re-running registration for {}", user_id);
                    let _ = live.commands.send(Command::Reregister);
                } else {
                    crate::log_debug!(
                        "Channel for {} is still connecting, registration will follow",
                        user_id
                    );
                }
                return;
            }
        }

        let epoch = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(stale) = session.take() {
            stale.task.abort();
        }

        let user_id = Arc::new(AtomicU64::new(user_id));
        let (commands, receiver) = mpsc::unbounded_channel();
        let ctx = LoopContext {
            transport: self.transport.clone(),
            identity: self.identity.clone(),
            router: self.router.clone(),
            reconnect: self.reconnect.clone(),
            state: self.state.clone(),
            user_id: user_id.clone(),
            generation: self.generation.clone(),
            epoch,
        };

        crate::log_info!("Opening push channel via {}", self.transport.name());
        let task = tokio::spawn(run_connection_loop(ctx, receiver));
        *session = Some(LiveSession {
            user_id,
            commands,
            task,
        });
    }

    /// Replace the business handlers. The channel is left untouched.
    pub fn register_handlers(&self, table: HandlerTable) {
        crate::log_debug!("Installing handlers for {:?}", table.event_names());
        self.router.replace(table);
    }

    /// Queue an outbound event on the live channel.
    ///
    /// Delivery is at-most-once: events queued while the channel is down are
    /// sent after the next handshake, events queued after the loop gave up
    /// are rejected.
    pub fn emit(&self, event: impl Into<String>, data: serde_json::Value) -> Result<(), ConnectionError> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let live = session.as_ref().ok_or(ConnectionError::NotInitialized)?;
        if live.task.is_finished() || self.current_state().is_failed() {
            return Err(ConnectionError::Stopped);
        }
        live.commands
            .send(Command::Emit(WireEvent::new(event, data)))
            .map_err(|_| ConnectionError::Stopped)
    }

    /// Close the channel and stop reconnecting.
    ///
    /// The loop may still be mid-poll on another worker; bumping the
    /// generation first keeps it from publishing any state after this.
    pub fn teardown(&self) {
        let live = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(live) = live {
            live.task.abort();
            crate::log_info!("Push channel torn down");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(live) = session.take() {
            live.task.abort();
        }
    }
}

/// Connect, register, pump, and reconnect until the budget runs out.
///
/// Every reconnect waits `delay_for_attempt`, whether the connect failed or
/// an open link dropped. Only a stable link resets the attempt counter, so a
/// server that accepts and drops straight away still exhausts the budget.
async fn run_connection_loop(ctx: LoopContext, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut attempt = 0u32;
    // Emits queued while no link is up; sent right after the next handshake.
    let mut deferred: Vec<WireEvent> = Vec::new();
    let mut listeners = Listeners::new();

    loop {
        if attempt == 0 {
            ctx.set_state(ConnectionState::Connecting);
        } else {
            ctx.set_state(ConnectionState::Reconnecting { attempt });
        }

        match ctx.transport.connect().await {
            Ok(link) => {
                ctx.set_state(ConnectionState::Connected);
                crate::log_info!("Push channel connected via {}", link.transport);

                match pump_link(&ctx, link, &mut commands, &mut deferred, &mut listeners).await {
                    LinkEnd::Shutdown => {
                        ctx.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    LinkEnd::Dropped { stable } => {
                        crate::log_warn!("Push channel dropped");
                        if stable {
                            attempt = 0;
                        }
                        ctx.set_state(ConnectionState::Disconnected);
                    }
                }
            }
            Err(e) => {
                crate::log_error!("Push channel connect failed: {}", e);
            }
        }

        if attempt >= ctx.reconnect.max_attempts {
            let reason = format!(
                "Max reconnect attempts ({}) exceeded",
                ctx.reconnect.max_attempts
            );
            crate::log_error!("{}", reason);
            if !deferred.is_empty() {
                crate::log_warn!("Dropping {} unsent outbound events", deferred.len());
            }
            ctx.set_state(ConnectionState::Failed { reason });
            return;
        }

        let delay = ctx.reconnect.delay_for_attempt(attempt);
        crate::log_info!(
            "Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            attempt + 1
        );
        if !wait_offline(delay, &mut commands, &mut deferred).await {
            ctx.set_state(ConnectionState::Disconnected);
            return;
        }
        attempt += 1;
    }
}

/// Sleep between attempts while still draining commands. Re-registrations
/// are dropped since the next handshake covers them. Returns `false` if the
/// manager side went away.
async fn wait_offline(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    deferred: &mut Vec<WireEvent>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = commands.recv() => match cmd {
                Some(Command::Emit(event)) => deferred.push(event),
                Some(Command::Reregister) => {}
                None => return false,
            },
        }
    }
}

/// Register on a freshly opened link, then dispatch inbound events and
/// serve commands until either side closes.
async fn pump_link(
    ctx: &LoopContext,
    link: TransportLink,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    deferred: &mut Vec<WireEvent>,
    listeners: &mut Listeners,
) -> LinkEnd {
    let TransportLink {
        outbound,
        mut inbound,
        ..
    } = link;
    let opened = Instant::now();
    let mut delivered = false;
    let dropped = |delivered: bool| LinkEnd::Dropped {
        stable: delivered || opened.elapsed() >= STABLE_LINK,
    };

    // A re-registration queued before this link existed is covered by the
    // handshake below.
    while let Ok(cmd) = commands.try_recv() {
        if let Command::Emit(event) = cmd {
            deferred.push(event);
        }
    }

    // No inbound frame is read before the handshake is queued.
    if !register(ctx, &outbound).await {
        return dropped(delivered);
    }
    for event in deferred.drain(..) {
        if outbound.unbounded_send(event).is_err() {
            return dropped(delivered);
        }
    }

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(event) => {
                    delivered = true;
                    if !listeners.contains_key(&event.event) {
                        let listener = ctx.router.trampoline(event.event.clone());
                        listeners.insert(event.event.clone(), Box::new(listener));
                    }
                    if let Some(listener) = listeners.get(&event.event) {
                        listener(&event.data);
                    }
                }
                None => return dropped(delivered),
            },
            cmd = commands.recv() => match cmd {
                Some(Command::Reregister) => {
                    if !register(ctx, &outbound).await {
                        return dropped(delivered);
                    }
                }
                Some(Command::Emit(event)) => {
                    if outbound.unbounded_send(event).is_err() {
                        return dropped(delivered);
                    }
                }
                None => return LinkEnd::Shutdown,
            },
        }
    }
}

/// Build the registration descriptor from the freshest cached identity and
/// queue it. Returns `false` if the link is already closed.
async fn register(ctx: &LoopContext, outbound: &UnboundedSender<WireEvent>) -> bool {
    let user_id = ctx.user_id.load(Ordering::SeqCst);
    let payload = ctx.identity.registration(user_id).await;

    if payload.is_scoped() {
        crate::log_info!(
            "Registering user {} as {:?} for courses {:?}",
            payload.user_id,
            payload.rol,
            payload.cursos.as_deref().unwrap_or_default()
        );
    } else {
        crate::log_warn!("Registering user {} without role scope", payload.user_id);
    }

    if outbound.unbounded_send(payload.to_wire()).is_err() {
        crate::log_error!("Link closed before registration could be sent");
        return false;
    }
    ctx.set_state(ConnectionState::Registered);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{COURSES_KEY, ROLE_KEY, USER_KEY};
    use crate::storage::MemoryStore;
    use crate::ws::transport::TransportError;
    use async_trait::async_trait;
    use futures_channel::mpsc::{unbounded, UnboundedReceiver};
    use pizarra_shared::{RegisterPayload, Role, REGISTER_EVENT};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// The server's side of one accepted link.
    struct ServerEnd {
        from_client: UnboundedReceiver<WireEvent>,
        to_client: UnboundedSender<WireEvent>,
    }

    impl ServerEnd {
        async fn next_frame(&mut self) -> Option<WireEvent> {
            tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
                .await
                .expect("timed out waiting for client frame")
        }

        fn push(&self, event: &str, data: serde_json::Value) {
            self.to_client
                .unbounded_send(WireEvent::new(event, data))
                .expect("client side closed");
        }
    }

    /// Accepts or refuses connects according to a script; refuses once the
    /// script runs out.
    struct ScriptedTransport {
        script: Mutex<VecDeque<bool>>,
        accepted: mpsc::UnboundedSender<ServerEnd>,
        connects: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
            let (accepted, servers) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                accepted,
                connects: AtomicUsize::new(0),
            });
            (transport, servers)
        }

        fn allow(&self, accepts: &[bool]) {
            self.script.lock().unwrap().extend(accepts.iter().copied());
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn connect(&self) -> Result<TransportLink, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let accept = self.script.lock().unwrap().pop_front().unwrap_or(false);
            if !accept {
                return Err(TransportError::WebSocket("connection refused".to_string()));
            }

            let (outbound, from_client) = unbounded();
            let (to_client, inbound) = unbounded();
            let _ = self.accepted.send(ServerEnd {
                from_client,
                to_client,
            });
            Ok(TransportLink {
                transport: self.name(),
                outbound,
                inbound,
            })
        }
    }

    fn student_identity() -> IdentityCache {
        IdentityCache::new(Arc::new(MemoryStore::with_entries([
            (USER_KEY, r#"{"id": 42}"#),
            (ROLE_KEY, "estudiante"),
            (COURSES_KEY, "[7]"),
        ])))
    }

    fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
        tokio::time::timeout(Duration::from_secs(5), servers.recv())
            .await
            .expect("timed out waiting for connect")
            .expect("transport dropped")
    }

    async fn wait_for_state(
        manager: &ConnectionManager,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = manager.state();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for state")
            .expect("state sender dropped")
            .clone();
        state
    }

    fn expected_register() -> WireEvent {
        RegisterPayload::scoped(42, Role::Student, vec![7]).to_wire()
    }

    #[tokio::test]
    async fn handshake_sent_on_connect() {
        let (transport, mut servers) = ScriptedTransport::new(&[true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));

        manager.initialize(42);
        let mut server = next_server(&mut servers).await;

        let frame = server.next_frame().await.unwrap();
        assert_eq!(frame.event, REGISTER_EVENT);
        assert_eq!(frame, expected_register());
        wait_for_state(&manager, |s| s.is_registered()).await;
    }

    #[tokio::test]
    async fn events_are_dispatched_only_after_registration() {
        let (transport, mut servers) = ScriptedTransport::new(&[true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));

        let state = manager.state();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let log = observed.clone();
        manager.register_handlers(HandlerTable::new().on("anuncio", move |payload| {
            log.lock()
                .unwrap()
                .push((state.borrow().clone(), payload["n"].as_i64()));
        }));

        manager.initialize(42);
        let mut server = next_server(&mut servers).await;
        // Pushed before the client had a chance to register.
        server.push("anuncio", json!({ "n": 1 }));
        server.push("anuncio", json!({ "n": 2 }));

        assert_eq!(server.next_frame().await.unwrap(), expected_register());

        tokio::time::timeout(Duration::from_secs(5), async {
            while observed.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let observed = observed.lock().unwrap();
        assert_eq!(
            *observed,
            vec![
                (ConnectionState::Registered, Some(1)),
                (ConnectionState::Registered, Some(2)),
            ]
        );
    }

    async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("handler channel closed")
    }

    /// Drop the server side and wait until the client has closed its end.
    async fn drop_link(server: ServerEnd) {
        let ServerEnd {
            mut from_client,
            to_client,
        } = server;
        drop(to_client);
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while from_client.next().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "client kept the link open");
    }

    #[tokio::test]
    async fn each_reconnect_carries_exactly_one_handshake() {
        let (transport, mut servers) = ScriptedTransport::new(&[true, true, true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));

        let state = manager.state();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        manager.register_handlers(HandlerTable::new().on("anuncio", move |payload| {
            let _ = seen_tx.send((state.borrow().clone(), payload["n"].as_u64()));
        }));
        manager.initialize(42);

        for n in 0..3u64 {
            let mut server = next_server(&mut servers).await;
            assert_eq!(server.next_frame().await.unwrap(), expected_register());

            server.push("anuncio", json!({ "n": n }));
            let (state, seen) = recv_within(&mut seen_rx).await;
            assert_eq!(state, ConnectionState::Registered);
            assert_eq!(seen, Some(n));
            // Only the one handshake went out on this link.
            assert!(server.from_client.try_next().is_err());

            if n < 2 {
                drop_link(server).await;
            } else {
                // Initial handshake plus two after reconnects, one link each.
                assert_eq!(transport.connects(), 3);
                assert!(seen_rx.try_recv().is_err());
                manager.teardown();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_server_backs_off_and_exhausts_budget() {
        let (transport, mut servers) = ScriptedTransport::new(&[true; 10]);
        let manager = ConnectionManager::new(
            transport.clone(),
            student_identity(),
            ReconnectConfig::default(),
        );
        // Accept, then drop every link straight away.
        tokio::spawn(async move {
            while let Some(server) = servers.recv().await {
                drop(server);
            }
        });

        let started = Instant::now();
        manager.initialize(42);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connects(), 1);

        let mut state = manager.state();
        let failed = state.wait_for(|s| s.is_failed()).await.unwrap().clone();
        assert_eq!(
            failed,
            ConnectionState::Failed {
                reason: "Max reconnect attempts (5) exceeded".to_string()
            }
        );
        assert_eq!(transport.connects(), 6);
        // 1s + 2s + 4s + 5s + 5s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(17));
    }

    #[tokio::test]
    async fn links_that_deliver_frames_reset_the_budget() {
        let (transport, mut servers) = ScriptedTransport::new(&[true, true, true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(1));

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        manager.register_handlers(HandlerTable::new().on("anuncio", move |_| {
            let _ = seen_tx.send(());
        }));
        manager.initialize(42);

        for _ in 0..3 {
            let server = next_server(&mut servers).await;
            server.push("anuncio", json!({}));
            recv_within(&mut seen_rx).await;
            drop_link(server).await;
        }

        wait_for_state(&manager, |s| s.is_failed()).await;
        // Three healthy links, then one refused connect with a budget of one.
        assert_eq!(transport.connects(), 4);
    }

    #[test]
    fn superseded_loop_cannot_publish_state() {
        let (transport, _servers) = ScriptedTransport::new(&[]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));
        let ctx = LoopContext {
            transport,
            identity: student_identity(),
            router: manager.router(),
            reconnect: fast_reconnect(5),
            state: manager.state.clone(),
            user_id: Arc::new(AtomicU64::new(42)),
            generation: manager.generation.clone(),
            epoch: manager.generation.load(Ordering::SeqCst),
        };

        ctx.set_state(ConnectionState::Connected);
        assert_eq!(manager.current_state(), ConnectionState::Connected);

        manager.teardown();
        ctx.set_state(ConnectionState::Registered);
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn fails_after_budget_and_resumes_on_initialize() {
        let (transport, mut servers) = ScriptedTransport::new(&[]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(2));

        manager.initialize(42);
        let state = wait_for_state(&manager, |s| s.is_failed()).await;
        assert_eq!(
            state,
            ConnectionState::Failed {
                reason: "Max reconnect attempts (2) exceeded".to_string()
            }
        );
        // Initial attempt plus two retries.
        assert_eq!(transport.connects(), 3);
        assert_eq!(manager.emit("ping", json!({})), Err(ConnectionError::Stopped));

        transport.allow(&[true]);
        manager.initialize(42);
        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_frame().await.unwrap(), expected_register());
        wait_for_state(&manager, |s| s.is_registered()).await;
    }

    #[tokio::test]
    async fn initialize_on_live_channel_only_reregisters() {
        let (transport, mut servers) = ScriptedTransport::new(&[true, true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));

        manager.initialize(42);
        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_frame().await.unwrap(), expected_register());
        wait_for_state(&manager, |s| s.is_registered()).await;

        manager.initialize(42);
        assert_eq!(server.next_frame().await.unwrap(), expected_register());
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn handler_swap_keeps_connection() {
        let (transport, mut servers) = ScriptedTransport::new(&[true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<&'static str>();

        let tx = seen_tx.clone();
        manager.register_handlers(HandlerTable::new().on("anuncio", move |_| {
            let _ = tx.send("old");
        }));
        manager.initialize(42);
        let mut server = next_server(&mut servers).await;
        server.next_frame().await.unwrap();

        server.push("anuncio", json!({}));
        assert_eq!(seen_rx.recv().await, Some("old"));

        let tx = seen_tx.clone();
        manager.register_handlers(HandlerTable::new().on("anuncio", move |_| {
            let _ = tx.send("new");
        }));
        server.push("anuncio", json!({}));
        assert_eq!(seen_rx.recv().await, Some("new"));
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn emit_goes_out_after_handshake() {
        let (transport, mut servers) = ScriptedTransport::new(&[true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));
        assert_eq!(manager.emit("typing", json!({})), Err(ConnectionError::NotInitialized));

        manager.initialize(42);
        manager.emit("typing", json!({ "curso": 7 })).unwrap();

        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_frame().await.unwrap().event, REGISTER_EVENT);
        let emitted = server.next_frame().await.unwrap();
        assert_eq!(emitted.event, "typing");
        assert_eq!(emitted.data["curso"], 7);
    }

    #[tokio::test]
    async fn missing_identity_registers_bare() {
        let (transport, mut servers) = ScriptedTransport::new(&[true]);
        let identity = IdentityCache::new(Arc::new(MemoryStore::new()));
        let manager = ConnectionManager::new(transport.clone(), identity, fast_reconnect(5));

        manager.initialize(42);
        let mut server = next_server(&mut servers).await;
        let frame = server.next_frame().await.unwrap();
        assert_eq!(frame.data, json!({ "userId": 42, "id_usuario": 42 }));
    }

    #[tokio::test]
    async fn teardown_closes_channel() {
        let (transport, mut servers) = ScriptedTransport::new(&[true]);
        let manager = ConnectionManager::new(transport.clone(), student_identity(), fast_reconnect(5));

        manager.initialize(42);
        let mut server = next_server(&mut servers).await;
        server.next_frame().await.unwrap();

        manager.teardown();
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert!(server.next_frame().await.is_none());
        assert_eq!(manager.emit("x", json!({})), Err(ConnectionError::NotInitialized));
    }
}
