//! Chat session controller with state machine.
//!
//! IDLE → AWAITING_REPLY → REVEALING → IDLE
//!
//! The controller is the only writer of the transcript. Gateway replies,
//! reveal ticks and voice transcriptions come back as events on one
//! channel and are applied on the controller's task, in order.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Capability, ChatError};
use crate::gateway::{ChatReply, Gateway};
use crate::notifier::Notifier;
use crate::reveal::RevealScheduler;
use crate::transcript::{TranscriptStore, Turn};
use crate::voice::VoiceBridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    AwaitingReply,
    Revealing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::AwaitingReply => write!(f, "AWAITING_REPLY"),
            Self::Revealing => write!(f, "REVEALING"),
        }
    }
}

/// User intents, from the terminal or the local control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    Stop,
    NewChat,
    Listen,
    ToggleSpeech,
    Quit,
}

/// Incremental changes for renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    UserTurn(String),
    Partial(String),
    Completed {
        reply: String,
        image_url: Option<String>,
    },
    Stopped,
    Cleared,
    Hydrated(Vec<Turn>),
    Greeting(String),
    Notice(String),
}

/// Everything a renderer needs to draw the chat view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub turns: Vec<Turn>,
    pub attached_image: Option<String>,
    pub speaking: bool,
    pub user_name: Option<String>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            turns: Vec::new(),
            attached_image: None,
            speaking: false,
            user_name: None,
        }
    }
}

/// Collaborators injected into one session.
pub struct SessionContext {
    pub gateway: Arc<dyn Gateway>,
    pub voice: Arc<dyn VoiceBridge>,
    pub notifier: Notifier,
}

enum SessionEvent {
    Reply {
        request: u64,
        result: Result<ChatReply, ChatError>,
    },
    Tick {
        job: u64,
        partial: String,
    },
    RevealDone {
        job: u64,
    },
    Heard(Result<String, ChatError>),
    SpeechEnded {
        utterance: u64,
    },
}

pub struct ChatController {
    gateway: Arc<dyn Gateway>,
    voice: Arc<dyn VoiceBridge>,
    notifier: Notifier,
    speak_replies: bool,

    state: SessionState,
    transcript: TranscriptStore,
    scheduler: RevealScheduler,
    user_name: Option<String>,

    in_flight: Option<(u64, CancellationToken)>,
    next_request: u64,
    reveal_job: Option<u64>,
    next_job: u64,
    pending_reply: Option<ChatReply>,
    utterance: Option<u64>,
    next_utterance: u64,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
    view: watch::Sender<SessionView>,
}

impl ChatController {
    pub fn new(ctx: SessionContext, config: &Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(SessionView::default());

        Self {
            gateway: ctx.gateway,
            voice: ctx.voice,
            notifier: ctx.notifier,
            speak_replies: config.voice.speak_replies,
            state: SessionState::Idle,
            transcript: TranscriptStore::new(),
            scheduler: RevealScheduler::new(config.reveal.tick_interval()),
            user_name: None,
            in_flight: None,
            next_request: 0,
            reveal_job: None,
            next_job: 0,
            pending_reply: None,
            utterance: None,
            next_utterance: 0,
            events_tx,
            events_rx,
            updates: None,
            view,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.transcript.snapshot()
    }

    /// Stream of incremental updates. Replaces any earlier subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Load the user's name and previous conversation. Failures leave the
    /// session empty but usable.
    pub async fn hydrate(&mut self) {
        match self.gateway.profile().await {
            Ok(profile) => {
                info!("Hello, {}", profile.name);
                self.emit(SessionUpdate::Greeting(profile.name.clone()));
                self.user_name = Some(profile.name);
            }
            Err(e) => warn!("Failed to fetch user profile: {e}"),
        }

        match self.gateway.history().await {
            Ok(turns) if self.state == SessionState::Idle => {
                info!("Loaded {} turns of history", turns.len());
                self.transcript.replace(turns.clone());
                self.emit(SessionUpdate::Hydrated(turns));
            }
            Ok(_) => debug!("Session already active, skipping history"),
            Err(e) => warn!("Failed to fetch chat history: {e}"),
        }
        self.publish();
    }

    /// Submit a user message.
    ///
    /// Blank input is ignored without any state change. A submit while a
    /// reply is pending or being revealed is rejected with `Busy`.
    pub fn submit(&mut self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        if self.state != SessionState::Idle {
            let err = ChatError::Busy;
            self.notice(&err);
            return Err(err);
        }

        self.transcript.append(Turn::user(text));
        self.transcript.clear_image();
        self.set_state(SessionState::AwaitingReply);
        self.emit(SessionUpdate::UserTurn(text.to_string()));

        self.next_request += 1;
        let request = self.next_request;
        let cancel = CancellationToken::new();
        self.in_flight = Some((request, cancel.clone()));

        let gateway = self.gateway.clone();
        let events = self.events_tx.clone();
        let prompt = text.to_string();
        tokio::spawn(async move {
            let result = gateway.chat(&prompt, cancel).await;
            let _ = events.send(SessionEvent::Reply { request, result });
        });

        self.publish();
        Ok(())
    }

    /// Stop the current reply and any speech. Whatever was already revealed
    /// stays in the transcript.
    pub fn stop(&mut self) {
        self.silence();
        if self.state == SessionState::Idle {
            self.publish();
            return;
        }

        if let Some((request, cancel)) = self.in_flight.take() {
            debug!("Aborting request {request}");
            cancel.cancel();
        }
        self.scheduler.cancel();
        self.reveal_job = None;
        self.pending_reply = None;

        self.set_state(SessionState::Idle);
        self.emit(SessionUpdate::Stopped);
        self.publish();
    }

    /// Start a fresh conversation. Only allowed while idle.
    pub fn new_chat(&mut self) -> Result<(), ChatError> {
        if self.state != SessionState::Idle {
            let err = ChatError::Busy;
            self.notice(&err);
            return Err(err);
        }

        self.scheduler.cancel();
        self.transcript.clear();
        info!("New chat");
        self.emit(SessionUpdate::Cleared);
        self.publish();
        Ok(())
    }

    /// Capture one spoken message and submit it.
    pub fn listen(&mut self) {
        if !self.voice.supports_input() {
            self.notice(&ChatError::UnsupportedCapability(Capability::SpeechInput));
            return;
        }

        let voice = self.voice.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let heard = voice.listen().await;
            let _ = events.send(SessionEvent::Heard(heard));
        });
    }

    /// Stop speaking if speaking, otherwise read the last turn aloud.
    pub fn toggle_speech(&mut self) {
        if !self.voice.supports_output() {
            self.notice(&ChatError::UnsupportedCapability(Capability::SpeechOutput));
            return;
        }

        if self.utterance.is_some() || self.voice.is_speaking() {
            self.silence();
        } else if let Some(turn) = self.transcript.last() {
            let text = turn.content.clone();
            self.speak(text);
        }
        self.publish();
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(text) => {
                let _ = self.submit(&text);
            }
            Command::Stop => self.stop(),
            Command::NewChat => {
                let _ = self.new_chat();
            }
            Command::Listen => self.listen(),
            Command::ToggleSpeech => self.toggle_speech(),
            Command::Quit => self.stop(),
        }
    }

    /// Wait for and apply the next internal event.
    pub async fn step(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    /// Drive the session until `Quit` or until every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.hydrate().await;
        info!("Session ready");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => {
                        self.stop();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        info!("Session closed");
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Reply { request, result } => self.on_reply(request, result),
            SessionEvent::Tick { job, partial } => self.on_tick(job, partial),
            SessionEvent::RevealDone { job } => self.on_reveal_done(job),
            SessionEvent::Heard(Ok(text)) => {
                info!("Heard: '{text}'");
                let _ = self.submit(&text);
            }
            SessionEvent::Heard(Err(e)) => self.notice(&e),
            SessionEvent::SpeechEnded { utterance } => {
                if self.utterance == Some(utterance) {
                    self.utterance = None;
                }
                self.publish();
            }
        }
    }

    fn on_reply(&mut self, request: u64, result: Result<ChatReply, ChatError>) {
        if self.in_flight.as_ref().map(|(id, _)| *id) != Some(request) {
            debug!("Ignoring reply to stale request {request}");
            return;
        }
        self.in_flight = None;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.set_state(SessionState::Idle);
                self.notice(&e);
                self.publish();
                return;
            }
        };

        self.transcript.append(Turn::assistant(""));
        self.set_state(SessionState::Revealing);

        self.next_job += 1;
        let job = self.next_job;
        self.reveal_job = Some(job);

        let tick_tx = self.events_tx.clone();
        let done_tx = self.events_tx.clone();
        let text = reply.reply.clone();
        self.pending_reply = Some(reply);
        let scheduled = self.scheduler.start(
            &text,
            move |partial| {
                let _ = tick_tx.send(SessionEvent::Tick { job, partial });
            },
            move || {
                let _ = done_tx.send(SessionEvent::RevealDone { job });
            },
        );
        debug!("Reveal job {scheduled} started for request {request}");
        self.publish();
    }

    fn on_tick(&mut self, job: u64, partial: String) {
        if self.reveal_job != Some(job) {
            return;
        }
        if let Err(e) = self.transcript.mutate_last(&partial) {
            debug_assert!(false, "reveal tick without assistant turn: {e}");
            warn!("Dropping reveal tick: {e}");
            return;
        }
        self.emit(SessionUpdate::Partial(partial));
        self.publish();
    }

    fn on_reveal_done(&mut self, job: u64) {
        if self.reveal_job != Some(job) {
            return;
        }
        self.reveal_job = None;
        let Some(reply) = self.pending_reply.take() else {
            debug_assert!(false, "reveal finished without a pending reply");
            self.set_state(SessionState::Idle);
            return;
        };

        if let Some(url) = reply.image_url.clone() {
            if let Err(e) = self.transcript.attach_image(url) {
                debug_assert!(false, "image without assistant turn: {e}");
                warn!("Dropping reply image: {e}");
            }
        }
        self.set_state(SessionState::Idle);

        if self.speak_replies && self.voice.supports_output() {
            self.speak(reply.reply.clone());
        }
        self.emit(SessionUpdate::Completed {
            reply: reply.reply,
            image_url: reply.image_url,
        });
        self.publish();
    }

    /// Start speaking `text`. The utterance counts as active from here
    /// until its `SpeechEnded` arrives or it is silenced.
    fn speak(&mut self, text: String) {
        self.next_utterance += 1;
        let utterance = self.next_utterance;
        self.utterance = Some(utterance);

        let voice = self.voice.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = voice.speak(&text).await {
                warn!("Speech output failed: {e}");
            }
            let _ = events.send(SessionEvent::SpeechEnded { utterance });
        });
    }

    fn silence(&mut self) {
        self.voice.cancel_output();
        self.utterance = None;
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!("State: {} → {}", self.state, next);
            self.state = next;
        }
    }

    fn notice(&self, err: &ChatError) {
        warn!("{err}");
        self.notifier.notify_error(err);
        self.emit(SessionUpdate::Notice(err.to_string()));
    }

    fn emit(&self, update: SessionUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }

    fn publish(&self) {
        self.view.send_replace(SessionView {
            state: self.state,
            turns: self.transcript.snapshot(),
            attached_image: self.transcript.attached_image().map(str::to_string),
            speaking: self.utterance.is_some(),
            user_name: self.user_name.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Profile;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeGateway {
        replies: Mutex<VecDeque<Result<ChatReply, ChatError>>>,
        prompts: Mutex<Vec<String>>,
        history: Vec<Turn>,
        hold: Option<Arc<Notify>>,
    }

    impl FakeGateway {
        fn replying(replies: Vec<Result<ChatReply, ChatError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn profile(&self) -> Result<Profile, ChatError> {
            Ok(Profile {
                name: "Maggie".into(),
            })
        }

        async fn history(&self) -> Result<Vec<Turn>, ChatError> {
            Ok(self.history.clone())
        }

        async fn chat(&self, prompt: &str, cancel: CancellationToken) -> Result<ChatReply, ChatError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(hold) = &self.hold {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                    _ = hold.notified() => {}
                }
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::NetworkFailure("no scripted reply".into())))
        }

        async fn login(&self, _email: &str, _password: &str) -> Result<(), ChatError> {
            Ok(())
        }

        async fn register(&self, _name: &str, _email: &str, _password: &str) -> Result<(), ChatError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeVoice {
        input: Option<String>,
        output: bool,
        spoken: Mutex<Vec<String>>,
        cancels: AtomicUsize,
        speaking: AtomicBool,
        hold: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl VoiceBridge for FakeVoice {
        fn supports_input(&self) -> bool {
            self.input.is_some()
        }

        fn supports_output(&self) -> bool {
            self.output
        }

        async fn listen(&self) -> Result<String, ChatError> {
            self.input
                .clone()
                .ok_or(ChatError::UnsupportedCapability(Capability::SpeechInput))
        }

        async fn speak(&self, text: &str) -> Result<(), ChatError> {
            self.spoken.lock().unwrap().push(text.to_string());
            if let Some(hold) = &self.hold {
                self.speaking.store(true, Ordering::SeqCst);
                hold.notified().await;
                self.speaking.store(false, Ordering::SeqCst);
            }
            Ok(())
        }

        fn cancel_output(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.speaking.store(false, Ordering::SeqCst);
        }

        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }
    }

    fn reply(text: &str) -> Result<ChatReply, ChatError> {
        Ok(ChatReply {
            reply: text.into(),
            image_url: None,
        })
    }

    fn controller(gateway: Arc<FakeGateway>, voice: Arc<FakeVoice>) -> ChatController {
        let ctx = SessionContext {
            gateway,
            voice,
            notifier: Notifier::new(false),
        };
        ChatController::new(ctx, &Config::default())
    }

    async fn settle(ctrl: &mut ChatController) {
        while ctrl.state() != SessionState::Idle {
            ctrl.step().await;
        }
    }

    fn drain(ctrl: &mut ChatController) {
        while let Ok(event) = ctrl.events_rx.try_recv() {
            ctrl.handle_event(event);
        }
    }

    fn partials(updates: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(update) = updates.try_recv() {
            if let SessionUpdate::Partial(p) = update {
                out.push(p);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn submit_appends_user_turn_before_reply() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("Hi there")]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));

        ctrl.submit("Hello").unwrap();

        assert_eq!(ctrl.state(), SessionState::AwaitingReply);
        assert_eq!(ctrl.snapshot(), vec![Turn::user("Hello")]);
    }

    #[tokio::test(start_paused = true)]
    async fn hello_reveals_hi_there_in_eight_steps() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("Hi there")]));
        let mut ctrl = controller(gateway.clone(), Arc::new(FakeVoice::default()));
        let mut updates = ctrl.subscribe();

        ctrl.submit("Hello").unwrap();
        ctrl.step().await;
        assert_eq!(ctrl.state(), SessionState::Revealing);
        settle(&mut ctrl).await;

        assert_eq!(
            ctrl.snapshot(),
            vec![Turn::user("Hello"), Turn::assistant("Hi there")]
        );
        let seen = partials(&mut updates);
        let expected: Vec<String> = (1..=8).map(|k| "Hi there"[..k].to_string()).collect();
        assert_eq!(seen, expected);
        assert_eq!(gateway.prompts(), vec!["Hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_submit_is_ignored() {
        let gateway = Arc::new(FakeGateway::default());
        let mut ctrl = controller(gateway.clone(), Arc::new(FakeVoice::default()));

        ctrl.submit("").unwrap();
        ctrl.submit("   ").unwrap();
        tokio::task::yield_now().await;

        assert_eq!(ctrl.state(), SessionState::Idle);
        assert!(ctrl.snapshot().is_empty());
        assert!(gateway.prompts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_failure_returns_to_idle_and_keeps_user_turn() {
        let gateway = Arc::new(FakeGateway::replying(vec![Err(ChatError::NetworkFailure(
            "offline".into(),
        ))]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));
        let mut updates = ctrl.subscribe();

        ctrl.submit("Hello").unwrap();
        ctrl.step().await;

        assert_eq!(ctrl.state(), SessionState::Idle);
        assert_eq!(ctrl.snapshot(), vec![Turn::user("Hello")]);
        let mut notices = Vec::new();
        while let Ok(u) = updates.try_recv() {
            if let SessionUpdate::Notice(n) = u {
                notices.push(n);
            }
        }
        assert_eq!(notices, vec!["network failure: offline".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_reply_is_surfaced_like_network_failure() {
        let gateway = Arc::new(FakeGateway::replying(vec![Err(ChatError::InvalidReply(
            "no text".into(),
        ))]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));

        ctrl.submit("Hello").unwrap();
        ctrl.step().await;

        assert_eq!(ctrl.state(), SessionState::Idle);
        assert_eq!(ctrl.snapshot(), vec![Turn::user("Hello")]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_reveal_keeps_revealed_prefix() {
        let text = "The quick brown fox";
        for k in [0usize, 1, 4, 10] {
            let gateway = Arc::new(FakeGateway::replying(vec![reply(text)]));
            let voice = Arc::new(FakeVoice::default());
            let mut ctrl = controller(gateway, voice.clone());
            let mut updates = ctrl.subscribe();

            ctrl.submit("go").unwrap();
            ctrl.step().await;
            let mut seen = 0;
            while seen < k {
                ctrl.step().await;
                seen = partials(&mut updates).len() + seen;
            }

            ctrl.stop();
            tokio::time::sleep(Duration::from_secs(1)).await;
            drain(&mut ctrl);

            assert_eq!(ctrl.state(), SessionState::Idle);
            let turns = ctrl.snapshot();
            assert_eq!(turns.last().unwrap().content, &text[..k], "stopped at {k}");
            assert!(partials(&mut updates).is_empty());
            assert!(voice.cancels.load(Ordering::SeqCst) >= 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_awaiting_aborts_request() {
        let hold = Arc::new(Notify::new());
        let gateway = Arc::new(FakeGateway {
            hold: Some(hold.clone()),
            ..FakeGateway::replying(vec![reply("answer"), reply("unused")])
        });
        let mut ctrl = controller(gateway.clone(), Arc::new(FakeVoice::default()));

        ctrl.submit("first").unwrap();
        tokio::task::yield_now().await;
        ctrl.stop();
        assert_eq!(ctrl.state(), SessionState::Idle);

        // The aborted call reports back as a stale reply and is ignored. It
        // never took a scripted reply, so "answer" goes to the second prompt.
        ctrl.step().await;
        assert_eq!(ctrl.state(), SessionState::Idle);
        assert_eq!(ctrl.snapshot(), vec![Turn::user("first")]);

        ctrl.submit("second").unwrap();
        tokio::task::yield_now().await;
        hold.notify_one();
        settle(&mut ctrl).await;

        assert_eq!(
            ctrl.snapshot(),
            vec![
                Turn::user("first"),
                Turn::user("second"),
                Turn::assistant("answer")
            ]
        );
        assert_eq!(gateway.prompts(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_while_busy_is_rejected() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("one"), reply("two")]));
        let mut ctrl = controller(gateway.clone(), Arc::new(FakeVoice::default()));

        ctrl.submit("a").unwrap();
        assert!(matches!(ctrl.submit("b"), Err(ChatError::Busy)));
        ctrl.step().await;
        assert_eq!(ctrl.state(), SessionState::Revealing);
        assert!(matches!(ctrl.submit("c"), Err(ChatError::Busy)));
        settle(&mut ctrl).await;

        assert_eq!(gateway.prompts(), vec!["a".to_string()]);
        assert_eq!(ctrl.snapshot(), vec![Turn::user("a"), Turn::assistant("one")]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_chat_from_idle_clears_everything() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("hey")]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));

        ctrl.submit("hi").unwrap();
        settle(&mut ctrl).await;
        assert_eq!(ctrl.snapshot().len(), 2);

        ctrl.new_chat().unwrap();
        assert!(ctrl.snapshot().is_empty());
        assert!(!ctrl.scheduler.is_active());
        assert_eq!(ctrl.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn new_chat_while_revealing_is_rejected() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("a long reply")]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));

        ctrl.submit("hi").unwrap();
        ctrl.step().await;
        assert!(matches!(ctrl.new_chat(), Err(ChatError::Busy)));
        settle(&mut ctrl).await;
        assert_eq!(ctrl.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn image_is_attached_only_after_reveal_completes() {
        let gateway = Arc::new(FakeGateway::replying(vec![Ok(ChatReply {
            reply: "Here".into(),
            image_url: Some("https://img.example/cat.png".into()),
        })]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));

        ctrl.submit("draw a cat").unwrap();
        ctrl.step().await;
        ctrl.step().await;
        assert_eq!(ctrl.state(), SessionState::Revealing);
        assert_eq!(ctrl.transcript.attached_image(), None);

        settle(&mut ctrl).await;
        assert_eq!(ctrl.transcript.attached_image(), Some("https://img.example/cat.png"));
        assert_eq!(
            ctrl.snapshot().last().unwrap().image_url.as_deref(),
            Some("https://img.example/cat.png")
        );

        ctrl.submit("again").unwrap();
        assert_eq!(ctrl.transcript.attached_image(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_reply_is_spoken_when_output_supported() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("Hi there")]));
        let voice = Arc::new(FakeVoice {
            output: true,
            ..FakeVoice::default()
        });
        let mut ctrl = controller(gateway, voice.clone());

        ctrl.submit("Hello").unwrap();
        settle(&mut ctrl).await;
        ctrl.step().await;

        assert_eq!(*voice.spoken.lock().unwrap(), vec!["Hi there".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn view_reports_speaking_for_the_whole_utterance() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("Hi")]));
        let hold = Arc::new(Notify::new());
        let voice = Arc::new(FakeVoice {
            output: true,
            hold: Some(hold.clone()),
            ..FakeVoice::default()
        });
        let mut ctrl = controller(gateway, voice.clone());
        let view = ctrl.watch_view();

        ctrl.submit("Hello").unwrap();
        settle(&mut ctrl).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(voice.is_speaking());
        assert!(view.borrow().speaking);

        hold.notify_one();
        ctrl.step().await;
        assert!(!voice.is_speaking());
        assert!(!view.borrow().speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_speech_silences_active_utterance() {
        let gateway = Arc::new(FakeGateway::default());
        let hold = Arc::new(Notify::new());
        let voice = Arc::new(FakeVoice {
            output: true,
            hold: Some(hold.clone()),
            ..FakeVoice::default()
        });
        let mut ctrl = controller(gateway, voice.clone());
        let view = ctrl.watch_view();
        ctrl.transcript.append(Turn::assistant("read me"));

        ctrl.toggle_speech();
        assert!(view.borrow().speaking);
        tokio::task::yield_now().await;
        assert_eq!(*voice.spoken.lock().unwrap(), vec!["read me".to_string()]);

        ctrl.toggle_speech();
        assert!(!view.borrow().speaking);
        assert_eq!(voice.cancels.load(Ordering::SeqCst), 1);

        // A late end-of-speech for the silenced utterance changes nothing.
        hold.notify_one();
        ctrl.step().await;
        assert!(!view.borrow().speaking);
        assert_eq!(voice.spoken.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reply_completes_without_ticks() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("")]));
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));
        let mut updates = ctrl.subscribe();

        ctrl.submit("Hello").unwrap();
        settle(&mut ctrl).await;

        assert_eq!(ctrl.snapshot(), vec![Turn::user("Hello"), Turn::assistant("")]);
        assert!(partials(&mut updates).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn listen_submits_recognized_text() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("It is noon")]));
        let voice = Arc::new(FakeVoice {
            input: Some("what time is it".into()),
            ..FakeVoice::default()
        });
        let mut ctrl = controller(gateway.clone(), voice);

        ctrl.listen();
        ctrl.step().await;
        assert_eq!(ctrl.state(), SessionState::AwaitingReply);
        settle(&mut ctrl).await;

        assert_eq!(gateway.prompts(), vec!["what time is it".to_string()]);
        assert_eq!(ctrl.snapshot()[1], Turn::assistant("It is noon"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_voice_capabilities_degrade_to_notices() {
        let gateway = Arc::new(FakeGateway::default());
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));
        let mut updates = ctrl.subscribe();

        ctrl.listen();
        ctrl.toggle_speech();

        let mut notices = Vec::new();
        while let Ok(u) = updates.try_recv() {
            if let SessionUpdate::Notice(n) = u {
                notices.push(n);
            }
        }
        assert_eq!(
            notices,
            vec![
                "speech recognition is not supported on this system".to_string(),
                "speech synthesis is not supported on this system".to_string(),
            ]
        );
        assert_eq!(ctrl.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_loads_history_and_name() {
        let gateway = Arc::new(FakeGateway {
            history: vec![Turn::user("old"), Turn::assistant("reply")],
            ..FakeGateway::default()
        });
        let mut ctrl = controller(gateway, Arc::new(FakeVoice::default()));
        let view = ctrl.watch_view();
        let mut updates = ctrl.subscribe();

        ctrl.hydrate().await;

        assert_eq!(ctrl.snapshot().len(), 2);
        assert_eq!(
            updates.try_recv().unwrap(),
            SessionUpdate::Greeting("Maggie".into())
        );
        assert!(matches!(updates.try_recv().unwrap(), SessionUpdate::Hydrated(t) if t.len() == 2));
        let view = view.borrow();
        assert_eq!(view.user_name.as_deref(), Some("Maggie"));
        assert_eq!(view.turns.len(), 2);
        assert_eq!(view.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_processes_commands_until_quit() {
        let gateway = Arc::new(FakeGateway::replying(vec![reply("ok")]));
        let ctrl = controller(gateway, Arc::new(FakeVoice::default()));
        let mut view = ctrl.watch_view();
        let (tx, rx) = mpsc::channel(8);
        let session = tokio::spawn(ctrl.run(rx));

        tx.send(Command::Submit("ping".into())).await.unwrap();
        view.wait_for(|v| v.state == SessionState::Idle && v.turns.len() == 2 && v.turns[1].content == "ok")
            .await
            .unwrap();

        tx.send(Command::Quit).await.unwrap();
        session.await.unwrap();
    }
}
