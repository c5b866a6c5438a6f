//! The composition root: one viewing Session wired to its collaborators.

use crate::{
    channel::{Inbound, route},
    view::ViewState,
};
use facewatch_core::{
    ControlError, Identity, RecognitionEvent,
    announce::{AnnouncementDeduplicator, GreetingBook},
    backend::Backend,
    health::{HealthMonitor, HealthStatus},
    stream::{PushChannel, StopReport, StreamController, StreamSnapshot, StreamState},
    voice::{SpeechSynthesizer, VoiceAnnouncer},
};
use socketio_client::{ChannelEvent, ChannelStatus};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info, instrument, warn};
use uuid::Uuid;

/// Something the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Start,
    Stop,
    ResetSpokenNames,
    Status,
    Quit,
}

impl FromStr for UserAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "reset" => Ok(Self::ResetSpokenNames),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!(
                "unknown action '{}' (expected start, stop, reset, status or quit)",
                other
            )),
        }
    }
}

/// The collaborators a Session talks to.
pub struct SessionDeps {
    pub backend: Arc<dyn Backend>,
    pub channel: Arc<dyn PushChannel>,
    /// Notifications from every handle `channel` opens.
    pub inbox: mpsc::UnboundedReceiver<ChannelEvent>,
    pub channel_status: watch::Receiver<ChannelStatus>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub greetings: GreetingBook,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub locale: String,
}

/// Result of a Start or Stop that ran in the background.
#[derive(Debug)]
enum ControlOutcome {
    Started(Result<(), ControlError>),
    Stopped(Result<StopReport, ControlError>),
}

/// Owns every piece of Session state: health, stream, spoken names and the
/// detected-persons list. Dropping it without [`unmount`] leaves the channel
/// to its own `Drop`.
///
/// [`unmount`]: RecognitionStreamClient::unmount
pub struct RecognitionStreamClient {
    session_id: Uuid,
    health: Arc<HealthMonitor>,
    health_rx: watch::Receiver<HealthStatus>,
    health_task: Option<JoinHandle<()>>,
    controller: Arc<StreamController>,
    stream_rx: watch::Receiver<StreamSnapshot>,
    channel: Arc<dyn PushChannel>,
    channel_status: watch::Receiver<ChannelStatus>,
    inbox: mpsc::UnboundedReceiver<ChannelEvent>,
    deduplicator: AnnouncementDeduplicator,
    voice: VoiceAnnouncer,
    detected_persons: Vec<Identity>,
    alert: Option<String>,
    outcomes_tx: mpsc::UnboundedSender<ControlOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ControlOutcome>,
    /// Background Start/Stop calls that may still be running.
    control_tasks: Vec<JoinHandle<()>>,
}

impl RecognitionStreamClient {
    /// Creates the Session and starts health polling. Must be called inside
    /// a Tokio runtime.
    pub fn mount(deps: SessionDeps, settings: SessionSettings) -> Self {
        let session_id = Uuid::new_v4();
        info!(%session_id, "Mounting session");

        let health = Arc::new(HealthMonitor::new(
            deps.backend.clone(),
            settings.health_timeout,
        ));
        let health_rx = health.subscribe();
        let health_task = health.clone().spawn(settings.health_interval);

        let controller = Arc::new(StreamController::new(
            deps.backend,
            deps.channel.clone(),
            health_rx.clone(),
        ));
        let stream_rx = controller.subscribe();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        Self {
            session_id,
            health,
            health_rx,
            health_task: Some(health_task),
            controller,
            stream_rx,
            channel: deps.channel,
            channel_status: deps.channel_status,
            inbox: deps.inbox,
            deduplicator: AnnouncementDeduplicator::new(deps.greetings),
            voice: VoiceAnnouncer::new(deps.synthesizer, settings.locale),
            detected_persons: vec![Identity::unknown()],
            alert: None,
            outcomes_tx,
            outcomes_rx,
            control_tasks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn health_updates(&self) -> watch::Receiver<HealthStatus> {
        self.health_rx.clone()
    }

    /// Runs a liveness check right away instead of waiting for the next tick.
    pub async fn check_health_now(&self) -> HealthStatus {
        self.health.check_health().await
    }

    pub async fn start(&mut self) -> Result<(), ControlError> {
        let result = self.controller.start().await;
        self.record_start(&result);
        result
    }

    pub async fn stop(&mut self) -> Result<StopReport, ControlError> {
        let result = self.controller.stop().await;
        self.record_stop(&result);
        result
    }

    pub fn reset_spoken_names(&mut self) {
        self.deduplicator.reset();
        self.alert = Some("Spoken names have been reset.".to_string());
    }

    /// Applies one push-channel notification to the Session.
    ///
    /// Recognition events only count while a stream is starting or live;
    /// anything arriving after Stop is dropped.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match route(event) {
            Inbound::Recognized(event) => self.apply_recognition(event).await,
            Inbound::Malformed(_) | Inbound::Ignored => {}
            Inbound::Notice(notice) => debug!(%notice, "Channel notice"),
        }
    }

    async fn apply_recognition(&mut self, event: RecognitionEvent) {
        let state = self.stream_rx.borrow().state;
        if !matches!(state, StreamState::Starting | StreamState::Live) {
            debug!(?state, "Dropping recognition event outside a live stream");
            return;
        }
        debug!(names = ?event.names, "Persons recognized");
        self.deduplicator.announce(&event.names, &self.voice).await;
        self.detected_persons = event.names;
    }

    pub fn view(&self) -> ViewState {
        ViewState {
            stream: self.stream_rx.borrow().clone(),
            detected_persons: self.detected_persons.clone(),
            health: *self.health_rx.borrow(),
            channel: *self.channel_status.borrow(),
            alert: self.alert.clone(),
        }
    }

    /// Processes user actions until `Quit` or until `actions` closes,
    /// calling `render` after every change.
    ///
    /// Start and Stop run in the background so recognition events keep
    /// flowing while the backend answers.
    #[instrument(name = "session", skip_all, fields(session_id = %self.session_id))]
    pub async fn run(
        &mut self,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
        mut render: impl FnMut(&ViewState),
    ) {
        render(&self.view());
        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    None | Some(UserAction::Quit) => {
                        info!("Leaving session");
                        break;
                    }
                    Some(UserAction::Start) => self.spawn_start(),
                    Some(UserAction::Stop) => self.spawn_stop(),
                    Some(UserAction::ResetSpokenNames) => self.reset_spoken_names(),
                    Some(UserAction::Status) => {
                        info!(spoken = self.deduplicator.spoken_count(), "Status requested");
                    }
                },
                Some(outcome) = self.outcomes_rx.recv() => match outcome {
                    ControlOutcome::Started(result) => self.record_start(&result),
                    ControlOutcome::Stopped(result) => self.record_stop(&result),
                },
                Some(event) = self.inbox.recv() => self.handle_channel_event(event).await,
                Ok(()) = self.stream_rx.changed() => {}
                Ok(()) = self.health_rx.changed() => {}
                Ok(()) = self.channel_status.changed() => {}
            }
            render(&self.view());
        }
    }

    fn spawn_start(&mut self) {
        let controller = self.controller.clone();
        let outcomes = self.outcomes_tx.clone();
        self.track(tokio::spawn(
            async move {
                let result = controller.start().await;
                let _ = outcomes.send(ControlOutcome::Started(result));
            }
            .in_current_span(),
        ));
    }

    fn spawn_stop(&mut self) {
        let controller = self.controller.clone();
        let outcomes = self.outcomes_tx.clone();
        self.track(tokio::spawn(
            async move {
                let result = controller.stop().await;
                let _ = outcomes.send(ControlOutcome::Stopped(result));
            }
            .in_current_span(),
        ));
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.control_tasks.retain(|t| !t.is_finished());
        self.control_tasks.push(task);
    }

    fn record_start(&mut self, result: &Result<(), ControlError>) {
        match result {
            Ok(()) => self.alert = None,
            Err(e) => {
                warn!(error = %e, "Start rejected");
                self.alert = Some(e.to_string());
            }
        }
    }

    fn record_stop(&mut self, result: &Result<StopReport, ControlError>) {
        match result {
            Ok(report) if report.was_live => {
                self.detected_persons = vec![Identity::unknown()];
                self.alert = report
                    .backend_error
                    .as_ref()
                    .map(|e| format!("Stream stopped locally; backend did not confirm: {}", e));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Stop rejected");
                self.alert = Some(e.to_string());
            }
        }
    }

    /// Ends the Session: stops health polling, cancels Start/Stop calls
    /// still in flight and closes the push channel.
    pub async fn unmount(mut self) {
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
        // A cancelled Start must not open the channel after it is closed.
        for task in self.control_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.channel.close().await;
        info!(session_id = %self.session_id, "Session unmounted");
    }
}

impl Drop for RecognitionStreamClient {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
        for task in self.control_tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facewatch_core::{
        BackendError, SpeechError,
        backend::HealthReply,
        voice::{Utterance, Voice},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeBackend {
        healthy: AtomicBool,
        fail_stop: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn check_health(&self) -> Result<HealthReply, BackendError> {
            let status = if self.healthy.load(Ordering::SeqCst) {
                "healthy"
            } else {
                "unhealthy"
            };
            Ok(HealthReply {
                status: status.to_string(),
                timestamp: None,
            })
        }

        async fn start_video_feed(&self) -> Result<(), BackendError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_video_feed(&self) -> Result<(), BackendError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop.load(Ordering::SeqCst) {
                Err(BackendError::Status(500))
            } else {
                Ok(())
            }
        }

        fn stream_locator(&self) -> String {
            "http://127.0.0.1:8000/video_feed?_=42".to_string()
        }
    }

    #[derive(Default)]
    struct FakeChannel {
        opens: AtomicUsize,
        closes: AtomicUsize,
        /// When set, `open` waits for a permit before doing anything.
        gate: Option<Arc<Notify>>,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl PushChannel for FakeChannel {
        async fn open(&self) -> bool {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push("open");
            true
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push("close");
        }
    }

    #[derive(Default)]
    struct RecordingSynth {
        said: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn voices(&self) -> Result<Vec<Voice>, SpeechError> {
            Ok(vec![Voice {
                id: "en-in".to_string(),
                name: "English (India)".to_string(),
                language: "en-IN".to_string(),
                gender: None,
            }])
        }

        async fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
            self.said.lock().unwrap().push(utterance.text);
            Ok(())
        }
    }

    struct Harness {
        backend: Arc<FakeBackend>,
        channel: Arc<FakeChannel>,
        synth: Arc<RecordingSynth>,
        client: RecognitionStreamClient,
        _status_tx: watch::Sender<ChannelStatus>,
        _inbox_tx: mpsc::UnboundedSender<ChannelEvent>,
    }

    async fn mount(healthy: bool) -> Harness {
        mount_with_channel(healthy, FakeChannel::default()).await
    }

    async fn mount_with_channel(healthy: bool, channel: FakeChannel) -> Harness {
        let backend = Arc::new(FakeBackend::default());
        backend.healthy.store(healthy, Ordering::SeqCst);
        let channel = Arc::new(channel);
        let synth = Arc::new(RecordingSynth::default());
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let greetings = GreetingBook::new(
            HashMap::from([
                ("Unknown".to_string(), " ".to_string()),
                (
                    "A. Samuvel".to_string(),
                    "Congrats A. Saaamuyel".to_string(),
                ),
            ]),
            "Congrats {name}",
        );

        let client = RecognitionStreamClient::mount(
            SessionDeps {
                backend: backend.clone(),
                channel: channel.clone(),
                inbox,
                channel_status: status_rx,
                synthesizer: synth.clone(),
                greetings,
            },
            SessionSettings {
                health_interval: Duration::from_secs(3600),
                health_timeout: Duration::from_secs(1),
                locale: "en-IN".to_string(),
            },
        );
        // Let the first scheduled check land before the test drives anything.
        client
            .health_updates()
            .wait_for(|h| h.last_checked_at.is_some())
            .await
            .unwrap();

        Harness {
            backend,
            channel,
            synth,
            client,
            _status_tx: status_tx,
            _inbox_tx: inbox_tx,
        }
    }

    fn recognized(names: &[&str]) -> ChannelEvent {
        ChannelEvent::Event {
            name: "persons_recognized".to_string(),
            payload: json!({ "names": names }),
        }
    }

    fn said(h: &Harness) -> Vec<String> {
        h.synth.said.lock().unwrap().clone()
    }

    #[test]
    fn test_parse_user_actions() {
        assert_eq!("start".parse::<UserAction>(), Ok(UserAction::Start));
        assert_eq!(" STOP \n".parse::<UserAction>(), Ok(UserAction::Stop));
        assert_eq!(
            "reset".parse::<UserAction>(),
            Ok(UserAction::ResetSpokenNames)
        );
        assert_eq!("exit".parse::<UserAction>(), Ok(UserAction::Quit));
        assert!("launch".parse::<UserAction>().is_err());
    }

    #[tokio::test]
    async fn test_full_viewing_scenario() {
        let mut h = mount(false).await;

        // Unhealthy: start is refused before the backend is asked.
        assert_eq!(h.client.start().await, Err(ControlError::BackendUnavailable));
        assert_eq!(h.backend.starts.load(Ordering::SeqCst), 0);
        assert_eq!(h.client.view().stream.state, StreamState::Idle);
        assert_eq!(
            h.client.view().alert.as_deref(),
            Some("Backend is not healthy. Please try again later.")
        );

        h.backend.healthy.store(true, Ordering::SeqCst);
        assert!(h.client.check_health_now().await.healthy);

        h.client.start().await.unwrap();
        let view = h.client.view();
        assert!(view.is_streaming());
        assert_eq!(
            view.stream.locator.as_deref(),
            Some("http://127.0.0.1:8000/video_feed?_=42")
        );
        assert_eq!(view.alert, None);
        assert_eq!(h.channel.opens.load(Ordering::SeqCst), 1);

        h.client
            .handle_channel_event(recognized(&["Unknown", "A. Samuvel"]))
            .await;
        assert_eq!(
            h.client.view().detected_persons,
            vec![Identity::unknown(), Identity::from("A. Samuvel")]
        );
        assert_eq!(said(&h), vec!["Congrats A. Saaamuyel"]);

        h.client
            .handle_channel_event(recognized(&["Unknown", "A. Samuvel"]))
            .await;
        assert_eq!(said(&h), vec!["Congrats A. Saaamuyel"]);

        let report = h.client.stop().await.unwrap();
        assert!(report.was_live);
        let view = h.client.view();
        assert_eq!(view.stream, StreamSnapshot::default());
        assert_eq!(view.detected_persons, vec![Identity::unknown()]);
        assert_eq!(h.channel.closes.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detected_list_follows_latest_valid_event() {
        let mut h = mount(true).await;
        h.client.start().await.unwrap();

        h.client.handle_channel_event(recognized(&["Sujith"])).await;
        h.client
            .handle_channel_event(ChannelEvent::Event {
                name: "persons_recognized".to_string(),
                payload: json!({ "names": [1, 2] }),
            })
            .await;
        assert_eq!(
            h.client.view().detected_persons,
            vec![Identity::from("Sujith")]
        );

        h.client.handle_channel_event(recognized(&[])).await;
        assert!(h.client.view().detected_persons.is_empty());
        assert_eq!(said(&h), vec!["Congrats Sujith"]);
    }

    #[tokio::test]
    async fn test_events_while_idle_are_dropped() {
        let mut h = mount(true).await;
        h.client.handle_channel_event(recognized(&["Sujith"])).await;
        assert_eq!(h.client.view().detected_persons, vec![Identity::unknown()]);
        assert!(said(&h).is_empty());
    }

    #[tokio::test]
    async fn test_reset_rearms_greetings_and_survives_stop() {
        let mut h = mount(true).await;
        h.client.start().await.unwrap();
        h.client.handle_channel_event(recognized(&["Sujith"])).await;
        h.client.stop().await.unwrap();

        // Spoken names outlive a stop.
        h.client.start().await.unwrap();
        h.client.handle_channel_event(recognized(&["Sujith"])).await;
        assert_eq!(said(&h), vec!["Congrats Sujith"]);

        h.client.reset_spoken_names();
        h.client.handle_channel_event(recognized(&["Sujith"])).await;
        assert_eq!(said(&h), vec!["Congrats Sujith", "Congrats Sujith"]);
    }

    #[tokio::test]
    async fn test_stop_reports_unconfirmed_backend() {
        let mut h = mount(true).await;
        h.backend.fail_stop.store(true, Ordering::SeqCst);
        h.client.start().await.unwrap();

        let report = h.client.stop().await.unwrap();
        assert!(report.backend_error.is_some());
        let view = h.client.view();
        assert_eq!(view.stream.state, StreamState::Idle);
        assert!(view.alert.unwrap().contains("backend did not confirm"));
        assert_eq!(h.channel.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_loop_starts_stream_and_quits() {
        let mut h = mount(true).await;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(UserAction::Start).unwrap();

        let quit = tx.clone();
        let mut frames: Vec<ViewState> = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            h.client.run(rx, |view| {
                if view.is_streaming() {
                    let _ = quit.send(UserAction::Quit);
                }
                frames.push(view.clone());
            }),
        )
        .await
        .expect("run loop did not finish");

        assert!(!frames[0].is_streaming());
        assert!(frames.iter().any(ViewState::is_streaming));
        assert_eq!(h.backend.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmount_closes_channel() {
        let h = mount(true).await;
        let channel = h.channel.clone();
        h.client.unmount().await;
        assert_eq!(channel.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmount_cancels_start_before_closing_channel() {
        let gate = Arc::new(Notify::new());
        let mut h = mount_with_channel(
            true,
            FakeChannel {
                gate: Some(gate.clone()),
                ..FakeChannel::default()
            },
        )
        .await;

        h.client.spawn_start();
        h.client
            .stream_rx
            .clone()
            .wait_for(|s| s.state == StreamState::Starting)
            .await
            .unwrap();

        let channel = h.channel.clone();
        let backend = h.backend.clone();
        h.client.unmount().await;

        // Releasing the gate now must not reach the cancelled Start.
        gate.notify_one();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*channel.calls.lock().unwrap(), vec!["close"]);
        assert_eq!(channel.opens.load(Ordering::SeqCst), 0);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);
    }
}
