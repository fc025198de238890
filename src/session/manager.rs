//! Session manager: the signaling state machine.
//!
//! One task owns all session state. Store subscriptions and media events
//! are pumped into a single queue tagged with the epoch that produced them,
//! so an answer, a candidate and a disconnect never interleave halfway, and
//! anything left over from a previous epoch is dropped on arrival.

use crate::config::Config;
use crate::error::SessionError;
use crate::logger::dump_candidate;
use crate::peer::types::{ConnectionState, IceCandidate, ServerConfig, SessionDescription};
use crate::peer::{analyze_candidates, MediaEngine};
use crate::session::events::{
    pump_answers, pump_media, pump_remote_candidates, Inbound, InboundTx, SessionEvent,
};
use crate::session::reconnect::{ReconnectController, RestartCause};
use crate::session::state::{Attempt, SessionPhase};
use crate::signaling::document::{candidate_fields, offer_fields, STATUS};
use crate::signaling::{SessionStatus, SignalingChannel, CALLEE_CANDIDATES, CALLER_CANDIDATES};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Builds and starts sessions. Holds the collaborators, not the state.
pub struct SessionManager {
    config: Arc<Config>,
    channel: Arc<dyn SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    ice_servers: Vec<ServerConfig>,
}

impl SessionManager {
    pub fn new(
        config: Arc<Config>,
        channel: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        let ice_servers = config.ice_servers.clone();
        Self {
            config,
            channel,
            engine,
            ice_servers,
        }
    }

    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Runs the first epoch up to `AwaitingAnswer`, then hands the session
    /// to its own task. Fails without retry on a missing identity or a
    /// negotiation fault.
    pub async fn start(self, identity: Option<&str>) -> Result<SessionHandle, SessionError> {
        let session_id = identity
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(SessionError::NoIdentity)?
            .to_string();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::New);

        let mut session = Session {
            doc_id: self.config.session_path(&session_id),
            reconnect: ReconnectController::new(self.config.reconnect.clone()),
            config: self.config,
            channel: self.channel,
            engine: self.engine,
            ice_servers: self.ice_servers,
            inbound: inbound_tx.clone(),
            phase: phase_tx,
            connection: connection_tx,
            epoch: 0,
            attempt: None,
            retry: None,
        };

        session.begin_attempt().await?;
        let task = tokio::spawn(session.run(inbound_rx));

        Ok(SessionHandle {
            session_id,
            inbound: inbound_tx,
            phase: phase_rx,
            connection: connection_rx,
            task: Some(task),
        })
    }
}

/// Host-side handle of a running session. Dropping it stops the session.
pub struct SessionHandle {
    session_id: String,
    inbound: InboundTx,
    phase: watch::Receiver<SessionPhase>,
    connection: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Tears the session down and waits for its task to finish.
    pub async fn stop(mut self) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self.inbound.send(Inbound::Stop(ack_tx)).is_ok();
        let task = self.task.take();
        if !sent {
            return Err(SessionError::Closed);
        }
        let _ = ack_rx.await;
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let (ack_tx, _) = oneshot::channel();
            let _ = self.inbound.send(Inbound::Stop(ack_tx));
        }
    }
}

/// State owned by the session task.
struct Session {
    config: Arc<Config>,
    channel: Arc<dyn SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    ice_servers: Vec<ServerConfig>,
    doc_id: String,
    inbound: InboundTx,
    phase: watch::Sender<SessionPhase>,
    connection: watch::Sender<ConnectionState>,
    reconnect: ReconnectController,
    epoch: u64,
    attempt: Option<Attempt>,
    retry: Option<JoinHandle<()>>,
}

impl Session {
    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!("Session {} phase {previous:?} -> {phase:?}", self.doc_id);
        }
    }

    async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(message) = inbound.recv().await {
            match message {
                Inbound::Event { epoch, event } => {
                    if epoch != self.epoch || self.attempt.is_none() {
                        trace!("Dropping {event:?} from stale epoch {epoch}");
                        continue;
                    }
                    self.handle(event).await;
                }
                Inbound::Retry { epoch } => {
                    if epoch != self.epoch || self.attempt.is_some() {
                        continue;
                    }
                    self.retry = None;
                    info!("Retrying restart of {} (epoch {epoch} failed)", self.doc_id);
                    if let Err(e) = self.begin_attempt().await {
                        self.schedule_retry(e);
                    }
                }
                Inbound::Stop(ack) => {
                    self.shutdown().await;
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AnswerReceived(answer) => self.on_answer(answer).await,
            SessionEvent::RemoteCandidateReceived(candidate) => {
                self.on_remote_candidate(candidate).await
            }
            SessionEvent::LocalCandidateGenerated(candidate) => {
                self.on_local_candidate(candidate).await
            }
            SessionEvent::StatusChanged(status) => {
                trace!("Status of {} is {}", self.doc_id, status.as_str());
                if let Some(cause) = self.reconnect.on_status(status) {
                    warn!("Receiver disconnected from {}, resetting", self.doc_id);
                    self.restart(cause).await;
                }
            }
            SessionEvent::ConnectionStateChanged(state) => self.on_connection_state(state),
        }
    }

    /// CreatingOffer -> OfferPublished -> AwaitingAnswer for a new epoch.
    async fn begin_attempt(&mut self) -> Result<(), SessionError> {
        self.epoch += 1;
        let epoch = self.epoch;
        self.set_phase(SessionPhase::CreatingOffer);

        // Nothing from a previous epoch may survive into this one.
        if let Err(e) = self.channel.delete(&self.doc_id).await {
            error!("Failed to clear {} before publishing: {e}", self.doc_id);
            self.set_phase(SessionPhase::Idle);
            return Err(e.into());
        }

        let (media, events) = match self.engine.create(&self.ice_servers).await {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to create media session: {e}");
                self.set_phase(SessionPhase::Idle);
                return Err(e.into());
            }
        };

        let mut attempt = Attempt::new(epoch, media);
        attempt.track(pump_media(events, epoch, self.inbound.clone()));

        if let Err(e) = self.negotiate(&mut attempt).await {
            error!("Session attempt {epoch} for {} failed: {e}", self.doc_id);
            attempt.close().await;
            let published = *self.phase.borrow() != SessionPhase::CreatingOffer;
            if published {
                if let Err(e) = self.channel.delete(&self.doc_id).await {
                    warn!("Failed to delete call {}: {e}", self.doc_id);
                }
            }
            self.set_phase(SessionPhase::Idle);
            return Err(e);
        }

        self.reconnect.on_offer_published();
        self.attempt = Some(attempt);
        self.set_phase(SessionPhase::AwaitingAnswer);
        Ok(())
    }

    async fn negotiate(&self, attempt: &mut Attempt) -> Result<(), SessionError> {
        let media = attempt.media.as_ref();
        let track = media.create_local_audio_track(&self.config.track_id).await?;
        media
            .add_track(&track, std::slice::from_ref(&self.config.stream_label))
            .await?;

        let offer = media.create_offer().await?;
        media.set_local_description(offer.clone()).await?;

        // A single replace, never a partial update: the epoch starts here.
        self.channel
            .replace(&self.doc_id, offer_fields(&offer))
            .await?;
        self.set_phase(SessionPhase::OfferPublished);
        info!("Offer posted to {} (epoch {})", self.doc_id, attempt.epoch);

        let answers = self.channel.subscribe_document(&self.doc_id).await?;
        attempt.track(pump_answers(answers, attempt.epoch, self.inbound.clone()));

        let candidates = self
            .channel
            .subscribe_collection(&self.doc_id, CALLEE_CANDIDATES)
            .await?;
        attempt.track(pump_remote_candidates(
            candidates,
            attempt.epoch,
            self.inbound.clone(),
        ));

        let status = ReconnectController::watch(
            self.channel.as_ref(),
            &self.doc_id,
            attempt.epoch,
            self.inbound.clone(),
        )
        .await?;
        attempt.track(status);
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        let applied = {
            let Some(attempt) = self.attempt.as_mut() else {
                return;
            };
            // The document subscription redelivers the same answer.
            if attempt.remote_description_set {
                trace!("Answer already applied in epoch {}", attempt.epoch);
                return;
            }
            match attempt.media.set_remote_description(answer).await {
                Ok(()) => {
                    attempt.remote_description_set = true;
                    let buffered = attempt.pending.len();
                    let accepted = attempt.pending.apply(attempt.media.as_ref()).await;
                    Ok((buffered, accepted))
                }
                Err(e) => Err(e),
            }
        };

        match applied {
            Ok((buffered, accepted)) => {
                info!("Remote SDP set ({accepted}/{buffered} buffered candidates applied)");
                self.reconnect.on_connected();
                self.set_phase(SessionPhase::Connected);
                if let Err(e) = self
                    .channel
                    .update(&self.doc_id, STATUS, SessionStatus::Connected.to_value())
                    .await
                {
                    warn!("Failed to mark {} connected: {e}", self.doc_id);
                }
            }
            Err(e) => {
                error!("Set remote SDP failed: {e}");
                if let Some(cause) = self.reconnect.on_negotiation_fault() {
                    self.restart(cause).await;
                }
            }
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        dump_candidate("REMOTE", &candidate);
        if !attempt.remote_description_set {
            attempt.pending.push(candidate);
            return;
        }
        if let Err(e) = attempt.media.add_ice_candidate(candidate).await {
            warn!("Failed to add remote candidate: {e}");
        }
    }

    async fn on_local_candidate(&mut self, candidate: IceCandidate) {
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        let fields = candidate_fields(&candidate);
        attempt.published.push(candidate);
        if let Err(e) = self
            .channel
            .append(&self.doc_id, CALLER_CANDIDATES, fields)
            .await
        {
            warn!("Failed to publish local candidate: {e}");
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        info!("Media connection of {} is {state:?}", self.doc_id);
        self.connection.send_replace(state);
        if state == ConnectionState::Failed {
            if let Some(attempt) = &self.attempt {
                analyze_candidates(&attempt.published);
            }
        }
    }

    /// Connected/AwaitingAnswer -> Restarting -> CreatingOffer.
    async fn restart(&mut self, cause: RestartCause) {
        self.set_phase(SessionPhase::Restarting);
        let count = self.reconnect.record_restart();
        info!("Restarting {} after {cause:?} (restart #{count})", self.doc_id);

        if let Some(attempt) = self.attempt.take() {
            self.reconnect
                .teardown(self.channel.as_ref(), &self.doc_id, attempt)
                .await;
        }
        self.connection.send_replace(ConnectionState::New);

        if let Err(e) = self.begin_attempt().await {
            self.schedule_retry(e);
        }
    }

    /// Keeps a failed restart in `Restarting` and queues another attempt.
    fn schedule_retry(&mut self, cause: SessionError) {
        let delay = self.reconnect.next_retry_delay();
        warn!(
            "Restart of {} failed, retrying in {delay:?}: {cause}",
            self.doc_id
        );
        self.set_phase(SessionPhase::Restarting);
        let retry = ReconnectController::schedule_retry(self.inbound.clone(), self.epoch, delay);
        if let Some(previous) = self.retry.replace(retry) {
            previous.abort();
        }
    }

    /// Any phase -> Closed.
    async fn shutdown(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
        if let Some(mut attempt) = self.attempt.take() {
            attempt.cancel_subscriptions();
            attempt.close().await;
        }
        match self.channel.delete(&self.doc_id).await {
            Ok(()) => debug!("Call {} deleted on stop", self.doc_id),
            Err(e) => warn!("Failed to delete call {} on stop: {e}", self.doc_id),
        }
        self.connection.send_replace(ConnectionState::Closed);
        self.set_phase(SessionPhase::Closed);
        info!("Session {} closed", self.doc_id);
    }
}
