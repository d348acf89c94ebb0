// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Session supervision.
//!
//! The supervisor owns one voice session end to end: joining the channel,
//! tracking which speakers are listened to, spawning and tearing down their
//! listener tasks, wiring the transcript aggregator to the turn dispatcher and
//! the playback scheduler, and persisting a session record so a restarted
//! process can resume where it left off.
//!
//! Listener handles live exclusively inside the supervisor. Everything else
//! observes speakers only through [`Membership`], which is why a listener can
//! check "am I still wanted?" without reaching back into the supervisor.

pub mod record;

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::aggregator::TranscriptAggregator;
use crate::config::{
    AggregatorConfig, AudioConfig, DispatchConfig, PlaybackConfig, VadParams,
};
use crate::dispatch::TurnDispatcher;
use crate::listener::{spawn_listener, ListenerContext, ListenerHandle};
use crate::playback::{CompletionCallback, PlaybackScheduler};
use crate::services::{
    AudioCodec, AudioPlayer, GatewayError, MembershipChange, MembershipEvent, Notifier, Responder,
    SpeakerInfo, TranscriptionService, VoiceGateway,
};
use record::{RecordError, SessionCommand, SessionRecord, SessionRecordStore};

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// The set of currently tracked speakers and the channel each was tracked in.
///
/// Shared read-mostly state: listeners poll it before re-arming, the
/// supervisor mutates it. Lock poisoning is recovered rather than propagated
/// since the map carries no invariants a panicked writer could break.
#[derive(Debug, Default)]
pub struct Membership {
    entries: RwLock<HashMap<String, String>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, speaker_id: &str, channel_id: &str) {
        self.write()
            .insert(speaker_id.to_string(), channel_id.to_string());
    }

    pub fn untrack(&self, speaker_id: &str) {
        self.write().remove(speaker_id);
    }

    pub fn is_tracked(&self, speaker_id: &str) -> bool {
        self.read().contains_key(speaker_id)
    }

    pub fn tracked_speakers(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("a session is already active in channel {0}")]
    AlreadyActive(String),
    #[error("no active session")]
    NotActive,
}

/// External collaborators required to run a session.
pub struct SessionDeps {
    pub gateway: Arc<dyn VoiceGateway>,
    pub codec: Arc<dyn AudioCodec>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub responder: Arc<dyn Responder>,
    pub notifier: Arc<dyn Notifier>,
    pub player: Arc<dyn AudioPlayer>,
}

/// Session-wide configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub vad: VadParams,
    pub aggregator: AggregatorConfig,
    pub dispatch: DispatchConfig,
    pub playback: PlaybackConfig,
    /// Path of the persisted session record.
    pub record_path: std::path::PathBuf,
}

/// A tracked speaker's listener together with the identity it was spawned
/// with, so re-arming can reuse the original display name.
struct TrackedListener {
    speaker: SpeakerInfo,
    handle: ListenerHandle,
}

type ListenerMap = Arc<Mutex<HashMap<String, TrackedListener>>>;

/// Everything that exists only while a session is joined.
struct ActiveSession {
    command: SessionCommand,
    channel_id: String,
    /// Listen-all sessions started with an opt-in set track only speakers in
    /// the set, including those who join later.
    opt_in: Option<HashSet<String>>,
    listeners: ListenerMap,
    listener_ctx: Arc<ListenerContext>,
    aggregator: TranscriptAggregator,
    dispatcher: TurnDispatcher,
    dispatcher_task: JoinHandle<()>,
    scheduler: PlaybackScheduler,
    playback_task: JoinHandle<()>,
}

/// Supervises one voice session at a time.
pub struct SessionSupervisor {
    deps: SessionDeps,
    config: SessionConfig,
    membership: Arc<Membership>,
    store: SessionRecordStore,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionSupervisor {
    pub fn new(deps: SessionDeps, config: SessionConfig) -> Self {
        let store = SessionRecordStore::new(config.record_path.clone());
        Self {
            deps,
            config,
            membership: Arc::new(Membership::new()),
            store,
            active: Mutex::new(None),
        }
    }

    /// The shared membership view.
    pub fn membership(&self) -> Arc<Membership> {
        self.membership.clone()
    }

    /// Whether a session is currently joined.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Join a channel and listen to one speaker.
    pub async fn listen(
        &self,
        guild_id: &str,
        channel_id: &str,
        text_channel_id: &str,
        speaker: SpeakerInfo,
    ) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            return Err(SessionError::AlreadyActive(session.channel_id.clone()));
        }

        self.deps.gateway.join(guild_id, channel_id).await?;
        let session = self.start_session(SessionCommand::Listen, channel_id, text_channel_id, None);

        self.add_speaker(&session, channel_id, &speaker).await;

        self.store
            .save(&SessionRecord {
                command: SessionCommand::Listen,
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
                text_channel_id: text_channel_id.to_string(),
                speaker_id: Some(speaker.speaker_id.clone()),
            })
            .await?;

        *active = Some(session);
        Ok(())
    }

    /// Join a channel and listen to every non-system member. When `opt_in`
    /// is given, only members in the set are tracked.
    pub async fn listen_all(
        &self,
        guild_id: &str,
        channel_id: &str,
        text_channel_id: &str,
        opt_in: Option<&HashSet<String>>,
    ) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            return Err(SessionError::AlreadyActive(session.channel_id.clone()));
        }

        self.deps.gateway.join(guild_id, channel_id).await?;
        let session = self.start_session(
            SessionCommand::ListenAll,
            channel_id,
            text_channel_id,
            opt_in.cloned(),
        );

        let members = self.deps.gateway.members(channel_id).await?;
        for speaker in members {
            if speaker.is_system {
                continue;
            }
            if let Some(allowed) = opt_in {
                if !allowed.contains(&speaker.speaker_id) {
                    continue;
                }
            }
            self.add_speaker(&session, channel_id, &speaker).await;
        }

        self.store
            .save(&SessionRecord {
                command: SessionCommand::ListenAll,
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
                text_channel_id: text_channel_id.to_string(),
                speaker_id: None,
            })
            .await?;

        *active = Some(session);
        Ok(())
    }

    /// Stop listening to one speaker. Unknown speakers are a no-op.
    pub async fn unlisten(&self, speaker_id: &str) -> Result<(), SessionError> {
        let active = self.active.lock().await;
        let session = active.as_ref().ok_or(SessionError::NotActive)?;

        self.membership.untrack(speaker_id);
        if let Some(tracked) = session.listeners.lock().await.remove(speaker_id) {
            tracked.handle.stop();
        }
        session.dispatcher.forget_conversation(speaker_id).await;
        Ok(())
    }

    /// Leave the channel, tearing the whole session down. Open utterances are
    /// discarded; transcriptions already in flight complete but their turns
    /// go nowhere.
    pub async fn leave(&self) -> Result<(), SessionError> {
        let Some(session) = self.active.lock().await.take() else {
            return Err(SessionError::NotActive);
        };

        self.membership.clear();
        {
            let mut listeners = session.listeners.lock().await;
            for (_, tracked) in listeners.drain() {
                tracked.handle.stop();
            }
        }

        session.scheduler.stop();
        session.dispatcher.stop();
        session.aggregator.shutdown().await;
        let _ = session.dispatcher_task.await;
        let _ = session.playback_task.await;

        self.deps.gateway.destroy_connection().await;
        self.store.clear().await?;
        tracing::debug!(channel = %session.channel_id, "session torn down");
        Ok(())
    }

    /// React to a channel membership change reported by the gateway.
    ///
    /// Joins only matter in listen-all mode; a leave tears the speaker's
    /// listener down in either mode, and drops their per-speaker
    /// conversation.
    pub async fn handle_membership_change(&self, event: MembershipEvent) {
        let active = self.active.lock().await;
        let Some(session) = active.as_ref() else {
            return;
        };
        if event.channel_id != session.channel_id {
            return;
        }

        match event.change {
            MembershipChange::Joined => {
                if session.command != SessionCommand::ListenAll {
                    return;
                }
                if event.speaker.is_system || self.membership.is_tracked(&event.speaker.speaker_id)
                {
                    return;
                }
                if let Some(allowed) = &session.opt_in {
                    if !allowed.contains(&event.speaker.speaker_id) {
                        tracing::debug!(
                            speaker = %event.speaker.speaker_id,
                            "joined speaker not in opt-in set, ignoring"
                        );
                        return;
                    }
                }
                tracing::debug!(speaker = %event.speaker.speaker_id, "speaker joined, tracking");
                self.add_speaker(session, &event.channel_id, &event.speaker).await;
            }
            MembershipChange::Left => {
                let speaker_id = &event.speaker.speaker_id;
                if !self.membership.is_tracked(speaker_id) {
                    return;
                }
                tracing::debug!(speaker = %speaker_id, "speaker left, untracking");
                self.membership.untrack(speaker_id);
                if let Some(tracked) = session.listeners.lock().await.remove(speaker_id) {
                    tracked.handle.stop();
                }
                session.dispatcher.forget_conversation(speaker_id).await;
            }
        }
    }

    /// Resume a previously persisted session, silently: no announcements, no
    /// greeting, just the same listening state as before the restart.
    ///
    /// Returns `false` when there is nothing to resume. A record pointing at
    /// a channel that no longer exists, or a tracked speaker who is gone, is
    /// cleared instead of resumed.
    pub async fn try_resume(&self) -> Result<bool, SessionError> {
        let record = match self.store.load().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(false),
            Err(err) => {
                tracing::warn!(%err, "session record unreadable, clearing");
                self.store.clear().await?;
                return Ok(false);
            }
        };

        if !self.deps.gateway.channel_exists(&record.channel_id).await {
            tracing::debug!(channel = %record.channel_id, "recorded channel gone, clearing record");
            self.store.clear().await?;
            return Ok(false);
        }

        match record.command {
            SessionCommand::Listen => {
                let Some(speaker_id) = record.speaker_id.as_deref() else {
                    self.store.clear().await?;
                    return Ok(false);
                };
                let members = self.deps.gateway.members(&record.channel_id).await?;
                let Some(speaker) = members
                    .into_iter()
                    .find(|m| m.speaker_id == speaker_id)
                else {
                    tracing::debug!(%speaker_id, "recorded speaker gone, clearing record");
                    self.store.clear().await?;
                    return Ok(false);
                };
                self.listen(
                    &record.guild_id,
                    &record.channel_id,
                    &record.text_channel_id,
                    speaker,
                )
                .await?;
            }
            SessionCommand::ListenAll => {
                self.listen_all(
                    &record.guild_id,
                    &record.channel_id,
                    &record.text_channel_id,
                    None,
                )
                .await?;
            }
        }

        tracing::debug!(channel = %record.channel_id, "session resumed");
        Ok(true)
    }

    /// Build the per-session pipeline: playback scheduler, turn dispatcher,
    /// transcript aggregator, and the shared listener context.
    fn start_session(
        &self,
        command: SessionCommand,
        channel_id: &str,
        text_channel_id: &str,
        opt_in: Option<HashSet<String>>,
    ) -> ActiveSession {
        let (scheduler, playback_task) =
            PlaybackScheduler::spawn(self.deps.player.clone(), self.deps.notifier.clone());

        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));

        let mut dispatcher = TurnDispatcher::new(
            self.config.dispatch.clone(),
            self.deps.responder.clone(),
            self.deps.notifier.clone(),
            scheduler.clone(),
        )
        .with_text_channel(text_channel_id);

        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        let aggregator = TranscriptAggregator::spawn(self.config.aggregator.clone(), turn_tx);

        let listener_ctx = Arc::new(ListenerContext {
            gateway: self.deps.gateway.clone(),
            codec: self.deps.codec.clone(),
            transcription: self.deps.transcription.clone(),
            membership: self.membership.clone(),
            line_tx: aggregator.line_sender(),
            audio: self.config.audio.clone(),
            vad: self.config.vad.clone(),
        });

        if self.config.playback.auto_restart {
            dispatcher = dispatcher.with_on_reply_played(restart_callback(
                listeners.clone(),
                listener_ctx.clone(),
            ));
        }
        let dispatcher_task = dispatcher.spawn(turn_rx);

        ActiveSession {
            command,
            channel_id: channel_id.to_string(),
            opt_in,
            listeners,
            listener_ctx,
            aggregator,
            dispatcher,
            dispatcher_task,
            scheduler,
            playback_task,
        }
    }

    /// Track a speaker and spawn their listener. Already-tracked speakers are
    /// a no-op so a duplicate request never yields a second subscription.
    async fn add_speaker(&self, session: &ActiveSession, channel_id: &str, speaker: &SpeakerInfo) {
        let mut listeners = session.listeners.lock().await;
        if listeners.contains_key(&speaker.speaker_id) {
            tracing::debug!(speaker = %speaker.speaker_id, "already tracked, ignoring");
            return;
        }
        self.membership.track(&speaker.speaker_id, channel_id);
        let handle = spawn_listener(session.listener_ctx.clone(), speaker.clone());
        listeners.insert(
            speaker.speaker_id.clone(),
            TrackedListener {
                speaker: speaker.clone(),
                handle,
            },
        );
    }
}

impl std::fmt::Debug for SessionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("config", &self.config)
            .finish()
    }
}

/// After a reply finishes playing, respawn any tracked listener whose task
/// has exited. Used in single-speaker sessions where the gateway stops a
/// stream while the reply plays.
fn restart_callback(listeners: ListenerMap, ctx: Arc<ListenerContext>) -> CompletionCallback {
    Arc::new(move || {
        let listeners = listeners.clone();
        let ctx = ctx.clone();
        Box::pin(async move {
            let mut listeners = listeners.lock().await;
            let stale: Vec<SpeakerInfo> = listeners
                .values()
                .filter(|tracked| {
                    tracked.handle.is_finished()
                        && ctx.membership.is_tracked(&tracked.speaker.speaker_id)
                })
                .map(|tracked| tracked.speaker.clone())
                .collect();
            for speaker in stale {
                tracing::debug!(speaker = %speaker.speaker_id, "re-arming listener after reply");
                let handle = spawn_listener(ctx.clone(), speaker.clone());
                listeners.insert(
                    speaker.speaker_id.clone(),
                    TrackedListener { speaker, handle },
                );
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        AudioSubscription, DecodeError, EndBehavior, NotifyError, PlaybackError, ReplyTurn,
        ResponderError, SpeechSource, SynthesisRef, TranscriptionError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeGateway {
        members: Vec<SpeakerInfo>,
        channel_exists: bool,
        joins: StdMutex<Vec<(String, String)>>,
        subscribes: AtomicUsize,
        destroys: AtomicUsize,
        // Keeps subscription streams open.
        holds: StdMutex<Vec<mpsc::Sender<Vec<u8>>>>,
    }

    impl FakeGateway {
        fn new(members: Vec<SpeakerInfo>) -> Self {
            Self {
                members,
                channel_exists: true,
                joins: StdMutex::new(Vec::new()),
                subscribes: AtomicUsize::new(0),
                destroys: AtomicUsize::new(0),
                holds: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VoiceGateway for FakeGateway {
        async fn join(&self, guild_id: &str, channel_id: &str) -> Result<(), GatewayError> {
            self.joins
                .lock()
                .unwrap()
                .push((guild_id.to_string(), channel_id.to_string()));
            Ok(())
        }

        async fn channel_exists(&self, _channel_id: &str) -> bool {
            self.channel_exists
        }

        async fn members(&self, _channel_id: &str) -> Result<Vec<SpeakerInfo>, GatewayError> {
            Ok(self.members.clone())
        }

        async fn subscribe(
            &self,
            _speaker_id: &str,
            _end_behavior: EndBehavior,
        ) -> Result<AudioSubscription, GatewayError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            self.holds.lock().unwrap().push(tx);
            Ok(AudioSubscription { frames: rx })
        }

        async fn destroy_connection(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoopCodec;

    impl AudioCodec for NoopCodec {
        fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, DecodeError> {
            Ok(encoded.to_vec())
        }
    }

    struct NoopTranscription;

    #[async_trait]
    impl TranscriptionService for NoopTranscription {
        async fn transcribe(&self, _canonical_wav: &[u8]) -> Result<String, TranscriptionError> {
            Ok(String::new())
        }
    }

    struct NoopResponder;

    #[async_trait]
    impl Responder for NoopResponder {
        async fn connect(&self, _character_id: &str) -> Result<(), ResponderError> {
            Ok(())
        }

        async fn resolve_conversation(&self) -> Result<String, ResponderError> {
            Ok("conv".into())
        }

        async fn send_message(
            &self,
            _text: &str,
            _conversation_id: &str,
            _timeout: Duration,
        ) -> Result<ReplyTurn, ResponderError> {
            Ok(ReplyTurn {
                text: "ok".into(),
                speaker_name: "Bot".into(),
                synthesis: SynthesisRef {
                    turn_id: "t".into(),
                    candidate_id: "c".into(),
                },
            })
        }

        async fn request_speech(
            &self,
            _synthesis: &SynthesisRef,
            _voice_id: &str,
        ) -> Result<SpeechSource, ResponderError> {
            Ok(SpeechSource::Bytes(Vec::new()))
        }

        async fn disconnect(&self, _character_id: &str) -> Result<(), ResponderError> {
            Ok(())
        }
    }

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify(&self, _channel_id: &str, _text: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    struct NoopPlayer;

    #[async_trait]
    impl AudioPlayer for NoopPlayer {
        async fn play(&self, _audio: &[u8]) -> Result<(), PlaybackError> {
            Ok(())
        }
    }

    fn speaker(id: &str, is_system: bool) -> SpeakerInfo {
        SpeakerInfo {
            speaker_id: id.to_string(),
            display_name: id.to_uppercase(),
            is_system,
        }
    }

    fn supervisor(
        gateway: Arc<FakeGateway>,
        record_path: std::path::PathBuf,
    ) -> SessionSupervisor {
        SessionSupervisor::new(
            SessionDeps {
                gateway,
                codec: Arc::new(NoopCodec),
                transcription: Arc::new(NoopTranscription),
                responder: Arc::new(NoopResponder),
                notifier: Arc::new(NoopNotifier),
                player: Arc::new(NoopPlayer),
            },
            SessionConfig {
                audio: AudioConfig::default(),
                vad: VadParams::default(),
                aggregator: AggregatorConfig::default(),
                dispatch: DispatchConfig::default(),
                playback: PlaybackConfig { auto_restart: false },
                record_path,
            },
        )
    }

    #[tokio::test]
    async fn listen_all_tracks_non_system_members() {
        let gateway = Arc::new(FakeGateway::new(vec![
            speaker("ana", false),
            speaker("bot", true),
            speaker("ben", false),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway.clone(), dir.path().join("session.json"));

        sup.listen_all("g1", "voice", "text", None).await.unwrap();

        let mut tracked = sup.membership().tracked_speakers();
        tracked.sort();
        assert_eq!(tracked, vec!["ana", "ben"]);
        assert!(sup.is_active().await);

        // Second session in parallel is refused.
        let err = sup.listen_all("g1", "other", "text", None).await;
        assert!(matches!(err, Err(SessionError::AlreadyActive(_))));

        sup.leave().await.unwrap();
        assert!(!sup.is_active().await);
        assert_eq!(gateway.destroys.load(Ordering::SeqCst), 1);
        assert!(sup.membership().tracked_speakers().is_empty());
    }

    #[tokio::test]
    async fn listen_all_honors_opt_in() {
        let gateway = Arc::new(FakeGateway::new(vec![
            speaker("ana", false),
            speaker("ben", false),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway, dir.path().join("session.json"));

        let allowed: HashSet<String> = ["ben".to_string()].into();
        sup.listen_all("g1", "voice", "text", Some(&allowed))
            .await
            .unwrap();

        assert_eq!(sup.membership().tracked_speakers(), vec!["ben"]);
        sup.leave().await.unwrap();
    }

    #[tokio::test]
    async fn late_joiner_outside_opt_in_is_ignored() {
        let gateway = Arc::new(FakeGateway::new(vec![
            speaker("ana", false),
            speaker("ben", false),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway, dir.path().join("session.json"));

        let allowed: HashSet<String> = ["ben".to_string(), "cam".to_string()].into();
        sup.listen_all("g1", "voice", "text", Some(&allowed))
            .await
            .unwrap();
        assert_eq!(sup.membership().tracked_speakers(), vec!["ben"]);

        // A late joiner inside the opt-in set is picked up.
        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("cam", false),
            channel_id: "voice".into(),
            change: MembershipChange::Joined,
        })
        .await;
        assert!(sup.membership().is_tracked("cam"));

        // One outside the set stays untracked.
        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("dan", false),
            channel_id: "voice".into(),
            change: MembershipChange::Joined,
        })
        .await;
        assert!(!sup.membership().is_tracked("dan"));

        sup.leave().await.unwrap();
    }

    #[tokio::test]
    async fn rearm_reuses_original_speaker_info() {
        let gateway = Arc::new(FakeGateway::new(Vec::new()));
        let membership = Arc::new(Membership::new());
        membership.track("ana", "voice");

        let (turn_tx, _turn_rx) = mpsc::unbounded_channel();
        let aggregator = TranscriptAggregator::spawn(AggregatorConfig::default(), turn_tx);
        let ctx = Arc::new(ListenerContext {
            gateway,
            codec: Arc::new(NoopCodec),
            transcription: Arc::new(NoopTranscription),
            membership,
            line_tx: aggregator.line_sender(),
            audio: AudioConfig::default(),
            vad: VadParams::default(),
        });

        let handle = spawn_listener(ctx.clone(), speaker("ana", false));
        handle.stop();
        for _ in 0..100 {
            if handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_finished());

        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        listeners.lock().await.insert(
            "ana".into(),
            TrackedListener {
                speaker: speaker("ana", false),
                handle,
            },
        );

        let rearm = restart_callback(listeners.clone(), ctx);
        rearm().await;

        let guard = listeners.lock().await;
        let tracked = guard.get("ana").unwrap();
        assert_eq!(tracked.speaker.display_name, "ANA");
        assert!(!tracked.handle.is_finished());
        drop(guard);
        aggregator.shutdown().await;
    }

    #[tokio::test]
    async fn membership_left_tears_listener_down() {
        let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway, dir.path().join("session.json"));

        sup.listen_all("g1", "voice", "text", None).await.unwrap();
        assert!(sup.membership().is_tracked("ana"));

        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("ana", false),
            channel_id: "voice".into(),
            change: MembershipChange::Left,
        })
        .await;

        assert!(!sup.membership().is_tracked("ana"));
        sup.leave().await.unwrap();
    }

    #[tokio::test]
    async fn membership_joined_tracks_new_speaker_in_listen_all() {
        let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway.clone(), dir.path().join("session.json"));

        sup.listen_all("g1", "voice", "text", None).await.unwrap();

        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("ben", false),
            channel_id: "voice".into(),
            change: MembershipChange::Joined,
        })
        .await;
        assert!(sup.membership().is_tracked("ben"));

        // A duplicate join for an already-tracked speaker is a no-op: no
        // second subscription appears.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = gateway.subscribes.load(Ordering::SeqCst);
        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("ben", false),
            channel_id: "voice".into(),
            change: MembershipChange::Joined,
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway.subscribes.load(Ordering::SeqCst), before);

        // System members and other channels are ignored.
        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("bot", true),
            channel_id: "voice".into(),
            change: MembershipChange::Joined,
        })
        .await;
        assert!(!sup.membership().is_tracked("bot"));

        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("cam", false),
            channel_id: "elsewhere".into(),
            change: MembershipChange::Joined,
        })
        .await;
        assert!(!sup.membership().is_tracked("cam"));

        sup.leave().await.unwrap();
    }

    #[tokio::test]
    async fn single_speaker_session_ignores_joins() {
        let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway, dir.path().join("session.json"));

        sup.listen("g1", "voice", "text", speaker("ana", false))
            .await
            .unwrap();

        sup.handle_membership_change(MembershipEvent {
            speaker: speaker("ben", false),
            channel_id: "voice".into(),
            change: MembershipChange::Joined,
        })
        .await;
        assert!(!sup.membership().is_tracked("ben"));

        sup.leave().await.unwrap();
    }

    #[tokio::test]
    async fn resume_restores_listen_all_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        // First process: starts a session, then "crashes" (no leave).
        {
            let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
            let sup = supervisor(gateway, path.clone());
            sup.listen_all("g1", "voice", "text", None).await.unwrap();
        }

        let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
        let sup = supervisor(gateway.clone(), path);
        assert!(sup.try_resume().await.unwrap());
        assert!(sup.is_active().await);
        assert!(sup.membership().is_tracked("ana"));
        assert_eq!(gateway.joins.lock().unwrap().len(), 1);

        sup.leave().await.unwrap();
    }

    #[tokio::test]
    async fn resume_clears_stale_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        // No record at all.
        {
            let gateway = Arc::new(FakeGateway::new(Vec::new()));
            let sup = supervisor(gateway, path.clone());
            assert!(!sup.try_resume().await.unwrap());
        }

        // Recorded channel no longer exists.
        {
            let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
            let sup = supervisor(gateway, path.clone());
            sup.listen("g1", "voice", "text", speaker("ana", false))
                .await
                .unwrap();
        }
        let mut gateway = FakeGateway::new(vec![speaker("ana", false)]);
        gateway.channel_exists = false;
        let sup = supervisor(Arc::new(gateway), path.clone());
        assert!(!sup.try_resume().await.unwrap());
        assert!(!sup.is_active().await);

        // Record was cleared, so a second resume finds nothing.
        let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
        let sup = supervisor(gateway, path);
        assert!(!sup.try_resume().await.unwrap());
    }

    #[tokio::test]
    async fn resume_skips_departed_single_speaker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let gateway = Arc::new(FakeGateway::new(vec![speaker("ana", false)]));
            let sup = supervisor(gateway, path.clone());
            sup.listen("g1", "voice", "text", speaker("ana", false))
                .await
                .unwrap();
        }

        // Speaker is no longer in the channel.
        let gateway = Arc::new(FakeGateway::new(Vec::new()));
        let sup = supervisor(gateway, path);
        assert!(!sup.try_resume().await.unwrap());
        assert!(!sup.is_active().await);
    }

    #[tokio::test]
    async fn unlisten_is_scoped_to_one_speaker() {
        let gateway = Arc::new(FakeGateway::new(vec![
            speaker("ana", false),
            speaker("ben", false),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(gateway, dir.path().join("session.json"));

        sup.listen_all("g1", "voice", "text", None).await.unwrap();
        sup.unlisten("ana").await.unwrap();

        assert!(!sup.membership().is_tracked("ana"));
        assert!(sup.membership().is_tracked("ben"));

        sup.leave().await.unwrap();
    }
}
