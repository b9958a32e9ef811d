//! The voice session state machine.

use super::{
    BackoffPolicy, ConnectionStatus, ExponentialBackoff, SessionEvent, SessionState,
    SpeechOptions, SpeechSynthesizer, SynthesizedAudio, Transport, VoiceSession,
};
use crate::config::SessionConfig;
use crate::error::{Result, VoiceCommandError};
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 128;

struct Core {
    session: VoiceSession,
    last_activity: Instant,
    /// Bumped whenever in-flight work (a connect, a timer) must be
    /// invalidated. Tasks compare against the value they started with.
    generation: u64,
    /// Set while a `transport.establish()` call is awaited, manual or
    /// automatic. At most one is ever in flight.
    establishing: bool,
    health: Option<CancellationToken>,
    reconnect: Option<CancellationToken>,
}

impl Core {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.session.last_activity_at = Some(Utc::now());
    }

    fn cancel_timers(&mut self) {
        if let Some(token) = self.health.take() {
            token.cancel();
        }
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
    }
}

struct Inner {
    config: Mutex<SessionConfig>,
    core: Mutex<Core>,
    transport: Arc<dyn Transport>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    backoff: Arc<dyn BackoffPolicy>,
    events: broadcast::Sender<SessionEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(|e| e.into_inner());
        core.cancel_timers();
    }
}

enum ConnectOutcome {
    Connected,
    Failed(String),
    Superseded { established: bool },
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn config(&self) -> SessionConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply a mutation and broadcast the derived state change, if any.
    fn update(&self, core: &mut Core, f: impl FnOnce(&mut Core)) {
        let from = core.session.state();
        f(core);
        let to = core.session.state();
        if from != to {
            tracing::debug!(%from, %to, "voice session state changed");
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    /// Clear listening/speaking/processing and emit the matching end events.
    fn stop_activity(&self, core: &mut Core) {
        let was_listening = core.session.is_listening;
        let was_speaking = core.session.is_speaking;
        self.update(core, |c| {
            c.session.is_listening = false;
            c.session.is_speaking = false;
            c.session.is_processing = false;
        });
        if was_listening {
            self.emit(SessionEvent::ListeningEnded);
        }
        if was_speaking {
            self.emit(SessionEvent::SpeakingEnded);
        }
    }

    /// Tear down session state. Returns whether a live connection must be
    /// closed on the transport.
    fn shut_down(&self, core: &mut Core) -> bool {
        let was_connected = core.session.status == ConnectionStatus::Connected;
        core.cancel_timers();
        core.generation += 1;
        self.stop_activity(core);
        self.update(core, |c| {
            c.session.status = ConnectionStatus::Disconnected;
            c.session.session_id = None;
            c.session.reconnect_attempts = 0;
            c.session.error = None;
        });
        was_connected
    }

    fn mark_connected(self: &Arc<Self>, core: &mut Core) {
        self.update(core, |c| {
            c.session.status = ConnectionStatus::Connected;
            c.session.reconnect_attempts = 0;
            c.session.error = None;
        });
        core.touch();
        self.start_health_check(core);
    }

    fn start_health_check(self: &Arc<Self>, core: &mut Core) {
        if let Some(previous) = core.health.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        core.health = Some(token.clone());
        let generation = core.generation;
        if !spawn_detached(health_loop(Arc::downgrade(self), token, generation)) {
            tracing::warn!("no async runtime, health checks disabled");
        }
    }

    /// React to a lost or unhealthy connection: schedule a reconnect with
    /// backoff, or give up once the attempt budget is spent.
    fn handle_connection_error(self: &Arc<Self>, core: &mut Core, reason: String) {
        let config = self.config();
        tracing::warn!(error = %reason, "voice connection error");
        self.emit(SessionEvent::Error {
            message: reason.clone(),
        });

        core.cancel_timers();
        core.generation += 1;
        self.stop_activity(core);
        core.session.error = Some(reason);

        if !core.session.enabled {
            self.update(core, |c| {
                c.session.status = ConnectionStatus::Disconnected;
                c.session.session_id = None;
            });
            return;
        }

        let attempts_made = core.session.reconnect_attempts;
        if attempts_made >= config.reconnect_attempts {
            tracing::warn!(attempts = attempts_made, "reconnection attempts exhausted");
            self.update(core, |c| {
                c.session.status = ConnectionStatus::Failed;
                c.session.session_id = None;
            });
            return;
        }

        let delay = self.backoff.delay(attempts_made, config.reconnect_delay());
        let attempt = attempts_made + 1;
        let token = CancellationToken::new();
        let generation = core.generation;
        self.update(core, |c| {
            c.session.status = ConnectionStatus::Reconnecting;
            c.session.session_id = None;
            c.session.reconnect_attempts = attempt;
            c.reconnect = Some(token.clone());
        });
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.emit(SessionEvent::ReconnectScheduled { attempt, delay });

        let weak = Arc::downgrade(self);
        let spawned = spawn_detached(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.reconnect_attempt(generation).await;
                    }
                }
            }
        });
        if !spawned {
            self.update(core, |c| {
                c.session.status = ConnectionStatus::Failed;
                c.session.error = Some("no async runtime to schedule reconnection".to_owned());
            });
        }
    }

    async fn reconnect_attempt(self: &Arc<Self>, generation: u64) {
        let attempt = {
            let mut core = self.lock();
            if core.generation != generation
                || core.session.status != ConnectionStatus::Reconnecting
                || !core.session.enabled
            {
                return;
            }
            if core.establishing {
                tracing::debug!("connect already in flight, skipping scheduled retry");
                return;
            }
            core.reconnect = None;
            core.establishing = true;
            core.session.session_id = Some(Uuid::new_v4());
            core.session.reconnect_attempts
        };

        tracing::info!(attempt, "reconnecting voice session");
        let result = self.transport.establish().await;

        let stale_connection = {
            let mut core = self.lock();
            core.establishing = false;
            if core.generation != generation {
                result.is_ok()
            } else {
                match result {
                    Ok(()) => {
                        tracing::info!(attempt, "voice session reconnected");
                        self.mark_connected(&mut core);
                    }
                    Err(e) => {
                        self.handle_connection_error(&mut core, format!("reconnect failed: {e}"));
                    }
                }
                false
            }
        };

        if stale_connection {
            if let Err(e) = self.transport.teardown().await {
                tracing::warn!("teardown of superseded connection failed: {e}");
            }
        }
    }
}

fn require_connected(core: &Core) -> Result<()> {
    if !core.session.enabled {
        return Err(VoiceCommandError::SessionState(
            "voice control is disabled".to_owned(),
        ));
    }
    if core.session.status != ConnectionStatus::Connected {
        return Err(VoiceCommandError::SessionState(format!(
            "not connected (session is {})",
            core.session.state()
        )));
    }
    Ok(())
}

fn spawn_detached<F>(future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
            true
        }
        Err(_) => false,
    }
}

async fn health_loop(weak: Weak<Inner>, token: CancellationToken, generation: u64) {
    loop {
        let interval = match weak.upgrade() {
            Some(inner) => inner.config().health_check_interval(),
            None => return,
        };
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let timeout = inner.config().session_timeout();
        let timed_out = {
            let mut core = inner.lock();
            if core.generation != generation
                || core.session.status != ConnectionStatus::Connected
            {
                return;
            }
            let idle = core.last_activity.elapsed();
            if idle >= timeout {
                inner.handle_connection_error(
                    &mut core,
                    format!("no activity for {} ms", idle.as_millis()),
                );
                true
            } else {
                false
            }
        };
        if timed_out {
            return;
        }
    }
}

/// Owns the voice session and drives it through its lifecycle.
///
/// Cheap to clone; clones share the same session. Operations that race
/// the session state (a second `connect()`, listening while speaking) fail
/// fast with [`VoiceCommandError::SessionState`] instead of waiting.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a disabled session with uncapped exponential backoff.
    /// Nothing is spawned until [`SessionManager::enable`].
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self::with_backoff(
            config,
            transport,
            synthesizer,
            Arc::new(ExponentialBackoff::default()),
        )
    }

    /// Like [`SessionManager::new`] with a custom retry delay policy.
    pub fn with_backoff(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        backoff: Arc<dyn BackoffPolicy>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                core: Mutex::new(Core {
                    session: VoiceSession::default(),
                    last_activity: Instant::now(),
                    generation: 0,
                    establishing: false,
                    health: None,
                    reconnect: None,
                }),
                transport,
                synthesizer,
                backoff,
                events,
            }),
        }
    }

    /// Copy of the current session.
    pub fn snapshot(&self) -> VoiceSession {
        self.inner.lock().session.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    /// Receive state changes, speech results and errors. A slow subscriber
    /// lags and loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> SessionConfig {
        self.inner.config()
    }

    /// Replace the session settings. Running timers pick up the new values
    /// on their next tick.
    pub fn update_settings(&self, config: SessionConfig) {
        *self.inner.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Turn voice control on, connecting immediately if `auto_connect` is set.
    ///
    /// # Errors
    ///
    /// Fails if already enabled. If the automatic connect fails the session
    /// is left disabled and the connection error is returned.
    pub async fn enable(&self) -> Result<()> {
        let auto_connect = {
            let mut core = self.inner.lock();
            if core.session.enabled {
                return Err(VoiceCommandError::SessionState(
                    "voice control is already enabled".to_owned(),
                ));
            }
            self.inner.update(&mut core, |c| c.session.enabled = true);
            self.inner.config().auto_connect
        };
        tracing::info!("voice control enabled");

        if auto_connect {
            if let Err(e) = self.connect().await {
                let mut core = self.inner.lock();
                self.inner.shut_down(&mut core);
                self.inner.update(&mut core, |c| c.session.enabled = false);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Turn voice control off. Cancels pending reconnects and disconnects.
    /// Disabling an already disabled session is a no-op.
    pub async fn disable(&self) -> Result<()> {
        let needs_teardown = {
            let mut core = self.inner.lock();
            if !core.session.enabled {
                return Ok(());
            }
            let needs_teardown = self.inner.shut_down(&mut core);
            self.inner.update(&mut core, |c| c.session.enabled = false);
            needs_teardown
        };
        tracing::info!("voice control disabled");
        self.teardown(needs_teardown).await;
        Ok(())
    }

    /// Establish the transport and start health checks.
    ///
    /// Allowed from `Disconnected`, `Failed`, or `Reconnecting` while the
    /// retry is still waiting out its backoff (the retry is cancelled). On failure the session is left
    /// `Disconnected`; no automatic retry is scheduled.
    ///
    /// # Errors
    ///
    /// [`VoiceCommandError::SessionState`] if disabled, already connected,
    /// or another connect (manual or automatic) is in flight; [`VoiceCommandError::Connection`]
    /// if the transport fails.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let generation = {
            let mut core = inner.lock();
            if !core.session.enabled {
                return Err(VoiceCommandError::SessionState(
                    "voice control is disabled".to_owned(),
                ));
            }
            if core.establishing {
                return Err(VoiceCommandError::SessionState(
                    "a connection attempt is already in progress".to_owned(),
                ));
            }
            match core.session.status {
                ConnectionStatus::Connecting => {
                    return Err(VoiceCommandError::SessionState(
                        "a connection attempt is already in progress".to_owned(),
                    ));
                }
                ConnectionStatus::Connected => {
                    return Err(VoiceCommandError::SessionState(
                        "already connected".to_owned(),
                    ));
                }
                ConnectionStatus::Disconnected
                | ConnectionStatus::Reconnecting
                | ConnectionStatus::Failed => {}
            }
            if let Some(token) = core.reconnect.take() {
                token.cancel();
            }
            core.generation += 1;
            core.establishing = true;
            inner.update(&mut core, |c| {
                c.session.status = ConnectionStatus::Connecting;
                c.session.session_id = Some(Uuid::new_v4());
                c.session.error = None;
            });
            core.generation
        };

        let result = inner.transport.establish().await;

        let outcome = {
            let mut core = inner.lock();
            core.establishing = false;
            if core.generation != generation {
                ConnectOutcome::Superseded {
                    established: result.is_ok(),
                }
            } else {
                match result {
                    Ok(()) => {
                        inner.mark_connected(&mut core);
                        tracing::info!(
                            session_id = ?core.session.session_id,
                            "voice session connected"
                        );
                        ConnectOutcome::Connected
                    }
                    Err(e) => {
                        let message = e.to_string();
                        inner.emit(SessionEvent::Error {
                            message: message.clone(),
                        });
                        inner.update(&mut core, |c| {
                            c.session.status = ConnectionStatus::Disconnected;
                            c.session.session_id = None;
                            c.session.error = Some(message.clone());
                        });
                        ConnectOutcome::Failed(message)
                    }
                }
            }
        };

        match outcome {
            ConnectOutcome::Connected => Ok(()),
            ConnectOutcome::Failed(message) => {
                tracing::warn!(error = %message, "voice connection failed");
                Err(VoiceCommandError::Connection(message))
            }
            ConnectOutcome::Superseded { established } => {
                self.teardown(established).await;
                Err(VoiceCommandError::SessionState(
                    "connection attempt was cancelled".to_owned(),
                ))
            }
        }
    }

    /// Close the session. Disconnecting a disconnected session succeeds
    /// without doing anything.
    pub async fn disconnect(&self) -> Result<()> {
        let needs_teardown = {
            let mut core = self.inner.lock();
            self.inner.shut_down(&mut core)
        };
        if needs_teardown {
            tracing::info!("voice session disconnected");
        }
        self.teardown(needs_teardown).await;
        Ok(())
    }

    async fn teardown(&self, needed: bool) {
        if !needed {
            return;
        }
        if let Err(e) = self.inner.transport.teardown().await {
            tracing::warn!("transport teardown failed: {e}");
        }
    }

    /// Start capturing speech. No-op if already listening.
    ///
    /// # Errors
    ///
    /// Fails unless enabled and connected, or while speaking.
    pub fn start_listening(&self) -> Result<()> {
        let mut core = self.inner.lock();
        require_connected(&core)?;
        if core.session.is_speaking {
            return Err(VoiceCommandError::SessionState(
                "cannot listen while speaking".to_owned(),
            ));
        }
        if core.session.is_listening {
            return Ok(());
        }
        self.inner.update(&mut core, |c| c.session.is_listening = true);
        core.touch();
        self.inner.emit(SessionEvent::ListeningStarted);
        Ok(())
    }

    /// Stop capturing speech. No-op if not listening.
    pub fn stop_listening(&self) -> Result<()> {
        let mut core = self.inner.lock();
        require_connected(&core)?;
        if !core.session.is_listening {
            return Ok(());
        }
        self.inner.update(&mut core, |c| c.session.is_listening = false);
        core.touch();
        self.inner.emit(SessionEvent::ListeningEnded);
        Ok(())
    }

    /// Synthesize `text`. Stops listening first; the speaking flag is
    /// cleared when synthesis finishes or fails.
    ///
    /// # Errors
    ///
    /// [`VoiceCommandError::SessionState`] unless connected or while
    /// already speaking; [`VoiceCommandError::Tts`] if TTS is disabled or
    /// synthesis fails.
    pub async fn speak(&self, text: &str) -> Result<SynthesizedAudio> {
        let (generation, options) = {
            let mut core = self.inner.lock();
            require_connected(&core)?;
            let config = self.inner.config();
            if !config.tts_enabled {
                return Err(VoiceCommandError::Tts("text-to-speech is disabled".to_owned()));
            }
            if core.session.is_speaking {
                return Err(VoiceCommandError::SessionState("already speaking".to_owned()));
            }
            if core.session.is_listening {
                self.inner.update(&mut core, |c| c.session.is_listening = false);
                self.inner.emit(SessionEvent::ListeningEnded);
            }
            self.inner.update(&mut core, |c| c.session.is_speaking = true);
            core.touch();
            self.inner.emit(SessionEvent::SpeakingStarted);
            let options = SpeechOptions {
                voice: config.voice,
                rate: config.speech_rate,
            };
            (core.generation, options)
        };

        let result = self.inner.synthesizer.synthesize(text, &options).await;

        {
            let mut core = self.inner.lock();
            // A disconnect while speaking already cleared the flag.
            if core.generation == generation && core.session.is_speaking {
                self.inner.update(&mut core, |c| c.session.is_speaking = false);
                core.touch();
                self.inner.emit(SessionEvent::SpeakingEnded);
            }
        }

        result.map_err(|e| VoiceCommandError::Tts(e.to_string()))
    }

    /// Mark whether a transcript is being interpreted.
    pub fn set_processing(&self, active: bool) -> Result<()> {
        let mut core = self.inner.lock();
        if !core.session.enabled {
            return Err(VoiceCommandError::SessionState(
                "voice control is disabled".to_owned(),
            ));
        }
        self.inner.update(&mut core, |c| c.session.is_processing = active);
        core.touch();
        Ok(())
    }

    /// Publish recognized speech as a [`SessionEvent::Transcript`].
    ///
    /// # Errors
    ///
    /// Fails unless connected and listening.
    pub fn submit_transcript(&self, text: &str) -> Result<()> {
        let mut core = self.inner.lock();
        require_connected(&core)?;
        if !core.session.is_listening {
            return Err(VoiceCommandError::SessionState("not listening".to_owned()));
        }
        core.touch();
        self.inner.emit(SessionEvent::Transcript {
            text: text.to_owned(),
        });
        Ok(())
    }

    /// Reset the idle timer used by the health check.
    pub fn record_activity(&self) {
        self.inner.lock().touch();
    }

    /// Report that the transport dropped. Schedules reconnection when the
    /// session was connected; ignored otherwise.
    pub fn connection_lost(&self, reason: &str) {
        let mut core = self.inner.lock();
        if core.session.status != ConnectionStatus::Connected {
            tracing::debug!(reason, status = ?core.session.status, "ignoring connection loss");
            return;
        }
        self.inner
            .handle_connection_error(&mut core, format!("connection lost: {reason}"));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::session::{LoopbackTransport, SilentSynthesizer};

    fn manager() -> (SessionManager, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::default());
        let config = SessionConfig {
            session_timeout_ms: 3_600_000,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(config, transport.clone(), Arc::new(SilentSynthesizer));
        (manager, transport)
    }

    #[tokio::test]
    async fn enable_auto_connects() {
        let (manager, transport) = manager();
        manager.enable().await.unwrap();
        let session = manager.snapshot();
        assert_eq!(session.status, ConnectionStatus::Connected);
        assert!(session.session_id.is_some());
        assert_eq!(transport.established_count(), 1);
    }

    #[tokio::test]
    async fn enable_twice_fails() {
        let (manager, _) = manager();
        manager.enable().await.unwrap();
        assert!(matches!(
            manager.enable().await,
            Err(VoiceCommandError::SessionState(_))
        ));
    }

    #[tokio::test]
    async fn connect_requires_enabled() {
        let (manager, _) = manager();
        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state(), SessionState::Disabled);
    }

    #[tokio::test]
    async fn disconnect_clears_session_and_tears_down() {
        let (manager, transport) = manager();
        manager.enable().await.unwrap();
        manager.start_listening().unwrap();
        manager.disconnect().await.unwrap();

        let session = manager.snapshot();
        assert_eq!(session.status, ConnectionStatus::Disconnected);
        assert!(session.session_id.is_none());
        assert!(!session.is_listening);
        assert_eq!(transport.teardown_count(), 1);

        manager.disconnect().await.unwrap();
        assert_eq!(transport.teardown_count(), 1);
    }

    #[tokio::test]
    async fn each_connect_gets_a_fresh_session_id() {
        let (manager, _) = manager();
        manager.enable().await.unwrap();
        let first = manager.snapshot().session_id;
        manager.disconnect().await.unwrap();
        manager.connect().await.unwrap();
        let second = manager.snapshot().session_id;
        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn listening_requires_connection() {
        let (manager, _) = manager();
        assert!(manager.start_listening().is_err());
        manager.enable().await.unwrap();
        manager.start_listening().unwrap();
        manager.start_listening().unwrap();
        assert_eq!(manager.state(), SessionState::Listening);
        manager.stop_listening().unwrap();
        assert_eq!(manager.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn transcript_requires_listening() {
        let (manager, _) = manager();
        manager.enable().await.unwrap();
        let mut events = manager.subscribe();
        assert!(manager.submit_transcript("hello").is_err());
        manager.start_listening().unwrap();
        manager.submit_transcript("list tasks").unwrap();

        let mut saw_transcript = false;
        while let Ok(event) = events.try_recv() {
            if event == (SessionEvent::Transcript { text: "list tasks".to_owned() }) {
                saw_transcript = true;
            }
        }
        assert!(saw_transcript);
    }

    #[tokio::test]
    async fn tts_disabled_rejects_speak() {
        let (manager, _) = manager();
        manager.update_settings(SessionConfig {
            tts_enabled: false,
            ..manager.config()
        });
        manager.enable().await.unwrap();
        assert!(matches!(
            manager.speak("hi").await,
            Err(VoiceCommandError::Tts(_))
        ));
    }

    #[tokio::test]
    async fn connection_lost_when_disconnected_is_ignored() {
        let (manager, _) = manager();
        manager.enable().await.unwrap();
        manager.disconnect().await.unwrap();
        manager.connection_lost("socket closed");
        assert_eq!(manager.state(), SessionState::Disconnected);
    }
}
