//! Call engine - the actor that owns the call session
//!
//! Everything that touches the session happens on this one task, one event at
//! a time: user intents, inbound signaling, peer transport events and the
//! completions of suspended work (device acquisition, SDP creation, timers).
//! Suspended work runs in spawned tasks tagged with the call id; a completion
//! whose call is gone releases what it carries instead of applying it.

use crate::application::negotiation::Negotiation;
use crate::application::orchestrator::Collaborators;
use crate::config::OrchestratorConfig;
use crate::domain::call::{CallDirection, CallSession, CallState, CallStatus, EndReason, Participant};
use crate::domain::media::{acquire_local_media, LocalMedia, MediaError, MediaSource, MediaTrack};
use crate::domain::peer::{
    PeerError, PeerEvent, PeerEventSink, PeerTransport, PeerTransportFactory,
};
use crate::domain::shared::{CallError, CallId, Result, UserId};
use crate::domain::signaling::{
    IceCandidate, SessionDescription, SignalingInbox, SignalingMessage, SignalingTransport,
};
use metrics::counter;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

type PeerResult<T> = std::result::Result<T, PeerError>;

/// Finished calls remembered to drop late duplicates of their messages
const RECENT_CALLS: usize = 32;

/// User intents
pub(crate) enum Command {
    Initiate {
        recipient: Participant,
        reply: oneshot::Sender<Result<CallId>>,
    },
    Accept {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    Reject {
        call_id: CallId,
        reply: oneshot::Sender<()>,
    },
    End {
        reply: oneshot::Sender<()>,
    },
    ToggleMute {
        reply: oneshot::Sender<bool>,
    },
    ToggleVideo {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results of suspended work
enum Completion {
    MediaAcquired {
        call_id: CallId,
        result: std::result::Result<LocalMedia, MediaError>,
    },
    PeerReady {
        call_id: CallId,
        result: PeerResult<Arc<dyn PeerTransport>>,
    },
    OfferCreated {
        call_id: CallId,
        result: PeerResult<SessionDescription>,
    },
    AnswerCreated {
        call_id: CallId,
        result: PeerResult<SessionDescription>,
    },
    AnswerApplied {
        call_id: CallId,
        result: PeerResult<()>,
    },
    CandidatesApplied {
        call_id: CallId,
        result: PeerResult<()>,
    },
    RingTimeout {
        call_id: CallId,
    },
}

/// Reply owed to a caller of `initiate_call` / `accept_call`
enum PendingReply {
    Initiate(oneshot::Sender<Result<CallId>>),
    Accept(oneshot::Sender<Result<()>>),
}

impl PendingReply {
    fn fail(self, error: CallError) {
        match self {
            PendingReply::Initiate(reply) => {
                let _ = reply.send(Err(error));
            }
            PendingReply::Accept(reply) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// What to tell the remote party when tearing down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Farewell {
    None,
    End,
    Reject,
}

pub(crate) struct EngineChannels {
    completions: mpsc::UnboundedReceiver<Completion>,
    peer_events: mpsc::UnboundedReceiver<(CallId, PeerEvent)>,
}

pub(crate) struct CallEngine {
    config: OrchestratorConfig,
    signaling: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerTransportFactory>,
    session: Option<CallSession>,
    negotiation: Negotiation,
    pending: Option<PendingReply>,
    tasks: Vec<JoinHandle<()>>,
    recent: VecDeque<CallId>,
    last_end: Option<EndReason>,
    completions: mpsc::UnboundedSender<Completion>,
    peer_events: mpsc::UnboundedSender<(CallId, PeerEvent)>,
    state_tx: watch::Sender<CallState>,
}

impl CallEngine {
    pub(crate) fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        state_tx: watch::Sender<CallState>,
    ) -> (Self, EngineChannels) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();

        let engine = Self {
            config,
            signaling: collaborators.signaling,
            media: collaborators.media,
            peers: collaborators.peers,
            session: None,
            negotiation: Negotiation::default(),
            pending: None,
            tasks: Vec::new(),
            recent: VecDeque::with_capacity(RECENT_CALLS),
            last_end: None,
            completions: completions_tx,
            peer_events: peer_events_tx,
            state_tx,
        };
        let channels = EngineChannels {
            completions: completions_rx,
            peer_events: peer_events_rx,
        };
        (engine, channels)
    }

    /// Process events until shutdown or until every handle is dropped
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbox: SignalingInbox,
        mut channels: EngineChannels,
    ) {
        info!("Call engine started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown(EndReason::Shutdown, Farewell::End).await;
                        self.publish();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown(EndReason::Shutdown, Farewell::End).await;
                        self.publish();
                        break;
                    }
                },
                Some(message) = inbox.recv() => self.handle_signal(message).await,
                Some(completion) = channels.completions.recv() => {
                    self.handle_completion(completion).await
                }
                Some((call_id, event)) = channels.peer_events.recv() => {
                    self.handle_peer_event(call_id, event).await
                }
            }
            self.publish();
        }
        info!("Call engine stopped");
    }

    fn publish(&self) {
        let state = match (&self.session, &self.last_end) {
            (Some(session), _) => session.snapshot(),
            (None, Some(reason)) => CallState::idle_after(reason.clone()),
            (None, None) => CallState::idle(),
        };
        self.state_tx.send_replace(state);
    }

    // ---- intents ---------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initiate { recipient, reply } => self.initiate(recipient, reply),
            Command::Accept { call_id, reply } => self.accept(call_id, reply),
            Command::Reject { call_id, reply } => {
                self.reject(call_id).await;
                let _ = reply.send(());
            }
            Command::End { reply } => {
                self.end().await;
                let _ = reply.send(());
            }
            Command::ToggleMute { reply } => {
                let muted = self.session.as_mut().map(|s| s.toggle_mute()).unwrap_or(false);
                self.publish();
                let _ = reply.send(muted);
            }
            Command::ToggleVideo { reply } => {
                let off = self.session.as_mut().map(|s| s.toggle_video()).unwrap_or(false);
                self.publish();
                let _ = reply.send(off);
            }
            Command::Shutdown { reply } => {
                // handled by the run loop; answer anyway
                let _ = reply.send(());
            }
        }
    }

    fn initiate(&mut self, recipient: Participant, reply: oneshot::Sender<Result<CallId>>) {
        if let Some(session) = &self.session {
            warn!(
                call_id = %session.call_id(),
                "Ignoring call to {}, already {}",
                recipient.user_id(),
                session.status()
            );
            let _ = reply.send(Err(CallError::Busy));
            return;
        }

        let call_id = CallId::generate();
        info!(call_id = %call_id, "Calling {}", recipient.user_id());
        counter!("peercall_calls_started_total", "direction" => "outgoing").increment(1);

        self.begin(CallSession::outgoing(call_id.clone(), recipient));
        self.pending = Some(PendingReply::Initiate(reply));
        self.acquire_media(call_id);
    }

    fn accept(&mut self, call_id: CallId, reply: oneshot::Sender<Result<()>>) {
        let Some(session) = self.session.as_mut().filter(|s| {
            s.call_id() == &call_id && s.is_incoming() && s.status() == CallStatus::Ringing
        }) else {
            debug!(call_id = %call_id, "No ringing call to accept");
            let _ = reply.send(Err(CallError::NoSuchCall(call_id)));
            return;
        };

        if let Err(e) = session.connect() {
            let _ = reply.send(Err(e));
            return;
        }

        info!(call_id = %call_id, "Accepting call");
        self.pending = Some(PendingReply::Accept(reply));
        self.acquire_media(call_id);
    }

    async fn reject(&mut self, call_id: CallId) {
        let Some(session) = &self.session else {
            debug!(call_id = %call_id, "Reject while idle");
            return;
        };
        if session.call_id() != &call_id {
            debug!(call_id = %call_id, "Reject for a call that is not current");
            return;
        }

        let (reason, farewell) =
            if session.is_incoming() && session.status() != CallStatus::Active {
                (EndReason::Declined, Farewell::Reject)
            } else {
                (EndReason::LocalHangup, Farewell::End)
            };
        self.teardown(reason, farewell).await;
    }

    async fn end(&mut self) {
        if self.session.is_none() {
            debug!("End while idle");
            return;
        }
        self.teardown(EndReason::LocalHangup, Farewell::End).await;
    }

    // ---- inbound signaling ------------------------------------------------

    async fn handle_signal(&mut self, message: SignalingMessage) {
        trace!(call_id = %message.call_id(), "Inbound {}", message.kind());
        match message {
            SignalingMessage::IncomingCall {
                call_id,
                initiator_id,
                initiator_name,
            } => self.on_incoming_call(call_id, initiator_id, initiator_name),
            SignalingMessage::AcceptCall { call_id } => self.on_remote_accept(call_id),
            SignalingMessage::RejectCall { call_id } => {
                self.on_remote_terminal(call_id, EndReason::RemoteDeclined).await
            }
            SignalingMessage::EndCall { call_id } => {
                self.on_remote_terminal(call_id, EndReason::RemoteHangup).await
            }
            SignalingMessage::Offer { call_id, sdp } => self.on_remote_offer(call_id, sdp),
            SignalingMessage::Answer { call_id, sdp } => self.on_remote_answer(call_id, sdp),
            SignalingMessage::IceCandidate { call_id, candidate } => {
                self.on_remote_candidate(call_id, candidate)
            }
            SignalingMessage::StartCall { call_id, .. } => {
                warn!(call_id = %call_id, "Dropping relay-bound start message");
            }
        }
    }

    fn on_incoming_call(&mut self, call_id: CallId, initiator_id: UserId, initiator_name: String) {
        if self.recent.contains(&call_id) {
            debug!(call_id = %call_id, "Late duplicate of a finished call, dropping");
            return;
        }
        if let Some(session) = &self.session {
            if session.call_id() == &call_id {
                debug!(call_id = %call_id, "Duplicate incoming call, dropping");
                return;
            }
            info!(
                call_id = %call_id,
                "Busy with {}, rejecting call from {}",
                session.call_id(),
                initiator_id
            );
            counter!("peercall_calls_rejected_busy_total").increment(1);
            self.emit(SignalingMessage::RejectCall { call_id });
            return;
        }

        info!(call_id = %call_id, "Incoming call from {} ({})", initiator_name, initiator_id);
        counter!("peercall_calls_started_total", "direction" => "incoming").increment(1);
        self.begin(CallSession::incoming(
            call_id.clone(),
            Participant::new(initiator_id, initiator_name),
        ));
        self.start_ring_timer(call_id);
    }

    fn on_remote_accept(&mut self, call_id: CallId) {
        let Some(session) = self.current_mut(&call_id) else {
            return;
        };
        if session.is_incoming() || session.status() != CallStatus::Ringing {
            debug!(call_id = %call_id, "Ignoring accept while {}", session.status());
            return;
        }
        if let Err(e) = session.connect() {
            warn!(call_id = %call_id, "{}", e);
            return;
        }

        info!(call_id = %call_id, "Call accepted by remote party");
        self.advance_negotiation();
    }

    async fn on_remote_terminal(&mut self, call_id: CallId, reason: EndReason) {
        if self.current(&call_id).is_none() {
            return;
        }
        self.teardown(reason, Farewell::None).await;
    }

    fn on_remote_offer(&mut self, call_id: CallId, offer: SessionDescription) {
        let Some(session) = self.current(&call_id) else {
            return;
        };
        if !session.is_incoming() {
            warn!(call_id = %call_id, "Ignoring offer on an outgoing call");
            return;
        }
        if !negotiating(session.status()) {
            debug!(call_id = %call_id, "Ignoring offer while {}", session.status());
            return;
        }
        if self.negotiation.offer_received {
            debug!(call_id = %call_id, "Duplicate offer, dropping");
            return;
        }

        self.negotiation.offer_received = true;
        self.negotiation.pending_offer = Some(offer);
        self.advance_negotiation();
    }

    fn on_remote_answer(&mut self, call_id: CallId, answer: SessionDescription) {
        let Some(session) = self.current(&call_id) else {
            return;
        };
        if session.is_incoming() {
            warn!(call_id = %call_id, "Ignoring answer on an incoming call");
            return;
        }
        if !negotiating(session.status()) {
            debug!(call_id = %call_id, "Ignoring answer while {}", session.status());
            return;
        }
        if self.negotiation.answer_received {
            debug!(call_id = %call_id, "Duplicate answer, dropping");
            return;
        }

        self.negotiation.answer_received = true;
        self.negotiation.pending_answer = Some(answer);
        self.advance_negotiation();
    }

    fn on_remote_candidate(&mut self, call_id: CallId, candidate: IceCandidate) {
        let Some(session) = self.current(&call_id) else {
            return;
        };
        if !negotiating(session.status()) {
            debug!(call_id = %call_id, "Ignoring candidate while {}", session.status());
            return;
        }

        match self.negotiation.accept_candidate(candidate) {
            Some(candidate) => {
                if let Some(peer) = self.negotiation.peer.clone() {
                    self.apply_candidates(call_id, peer, vec![candidate]);
                }
            }
            None => trace!(call_id = %call_id, "Buffered early candidate"),
        }
    }

    // ---- peer transport events -------------------------------------------

    async fn handle_peer_event(&mut self, call_id: CallId, event: PeerEvent) {
        if self.current(&call_id).is_none() {
            trace!(call_id = %call_id, "Peer event for a finished call");
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.emit(SignalingMessage::IceCandidate { call_id, candidate });
            }
            PeerEvent::RemoteTrack(track) => {
                let kind = track.kind();
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match session.add_remote_track(track) {
                    Ok(true) => {
                        info!(call_id = %call_id, "Call active, remote {} arrived", kind);
                        counter!("peercall_calls_connected_total").increment(1);
                    }
                    Ok(false) => debug!(call_id = %call_id, "Remote {} track added", kind),
                    Err(e) => warn!(call_id = %call_id, "{}", e),
                }
            }
            PeerEvent::ConnectionStateChanged(state) if state.is_fatal() => {
                warn!(call_id = %call_id, "Peer connection {}", state);
                self.teardown(
                    EndReason::TransportFailed(format!("peer connection {}", state)),
                    Farewell::End,
                )
                .await;
            }
            PeerEvent::ConnectionStateChanged(state) => {
                debug!(call_id = %call_id, "Peer connection {}", state);
            }
        }
    }

    // ---- completions -----------------------------------------------------

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::MediaAcquired { call_id, result } => self.on_media(call_id, result).await,
            Completion::PeerReady { call_id, result } => self.on_peer_ready(call_id, result).await,
            Completion::OfferCreated { call_id, result } => {
                self.on_offer_created(call_id, result).await
            }
            Completion::AnswerCreated { call_id, result } => {
                self.on_answer_created(call_id, result).await
            }
            Completion::AnswerApplied { call_id, result } => {
                self.on_answer_applied(call_id, result).await
            }
            Completion::CandidatesApplied { call_id, result } => {
                if let Err(e) = result {
                    if self.current(&call_id).is_some() {
                        self.fail_negotiation(e).await;
                    }
                }
            }
            Completion::RingTimeout { call_id } => self.on_ring_timeout(call_id).await,
        }
    }

    async fn on_media(
        &mut self,
        call_id: CallId,
        result: std::result::Result<LocalMedia, MediaError>,
    ) {
        if self.current(&call_id).is_none() {
            if result.is_ok() {
                debug!(call_id = %call_id, "Releasing media acquired for a finished call");
            }
            return;
        }

        let media = match result {
            Ok(media) => media,
            Err(error) => {
                counter!("peercall_media_failures_total", "kind" => error.kind()).increment(1);
                warn!(call_id = %call_id, "Media acquisition failed: {}", error);
                let incoming = self.session.as_ref().map(|s| s.is_incoming()).unwrap_or(false);
                let farewell = if incoming { Farewell::Reject } else { Farewell::None };
                self.teardown(EndReason::MediaFailure(error), farewell).await;
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.attach_local_media(media);

        match session.direction() {
            CallDirection::Outgoing => {
                if let Err(e) = session.ring() {
                    warn!(call_id = %call_id, "{}", e);
                    return;
                }
                let recipient_id = session.participant().user_id().clone();
                let sent = self.emit(SignalingMessage::StartCall {
                    call_id: call_id.clone(),
                    recipient_id,
                });
                if !sent {
                    self.signaling_lost().await;
                    return;
                }
                self.start_ring_timer(call_id.clone());
                self.publish();
                if let Some(PendingReply::Initiate(reply)) = self.pending.take() {
                    let _ = reply.send(Ok(call_id));
                }
            }
            CallDirection::Incoming => {
                if !self.emit(SignalingMessage::AcceptCall { call_id }) {
                    self.signaling_lost().await;
                    return;
                }
                self.publish();
                if let Some(PendingReply::Accept(reply)) = self.pending.take() {
                    let _ = reply.send(Ok(()));
                }
                self.advance_negotiation();
            }
        }
    }

    async fn on_peer_ready(&mut self, call_id: CallId, result: PeerResult<Arc<dyn PeerTransport>>) {
        if self.current(&call_id).is_none() || self.negotiation.peer.is_some() {
            if let Ok(peer) = result {
                debug!(call_id = %call_id, "Closing peer transport created for a finished call");
                peer.close().await;
            }
            return;
        }

        match result {
            Ok(peer) => {
                debug!(call_id = %call_id, "Peer transport ready");
                self.negotiation.peer = Some(peer);
                self.advance_negotiation();
            }
            Err(e) => self.fail_negotiation(e).await,
        }
    }

    async fn on_offer_created(&mut self, call_id: CallId, result: PeerResult<SessionDescription>) {
        if self.current(&call_id).is_none() {
            return;
        }
        match result {
            Ok(offer) => {
                if !self.emit(SignalingMessage::Offer { call_id, sdp: offer }) {
                    self.signaling_lost().await;
                    return;
                }
                self.negotiation.offer_sent = true;
                self.advance_negotiation();
            }
            Err(e) => self.fail_negotiation(e).await,
        }
    }

    async fn on_answer_created(&mut self, call_id: CallId, result: PeerResult<SessionDescription>) {
        if self.current(&call_id).is_none() {
            return;
        }
        match result {
            Ok(answer) => {
                self.negotiation.remote_description_set = true;
                if !self.emit(SignalingMessage::Answer {
                    call_id: call_id.clone(),
                    sdp: answer,
                }) {
                    self.signaling_lost().await;
                    return;
                }
                self.flush_candidates(call_id);
            }
            Err(e) => self.fail_negotiation(e).await,
        }
    }

    async fn on_answer_applied(&mut self, call_id: CallId, result: PeerResult<()>) {
        if self.current(&call_id).is_none() {
            return;
        }
        match result {
            Ok(()) => {
                debug!(call_id = %call_id, "Remote answer applied");
                self.negotiation.remote_description_set = true;
                self.flush_candidates(call_id);
            }
            Err(e) => self.fail_negotiation(e).await,
        }
    }

    async fn on_ring_timeout(&mut self, call_id: CallId) {
        let Some(session) = self.current(&call_id) else {
            return;
        };
        if session.status() != CallStatus::Ringing {
            return;
        }

        let farewell = if session.is_incoming() {
            Farewell::Reject
        } else {
            Farewell::End
        };
        info!(call_id = %call_id, "No answer, giving up");
        self.teardown(EndReason::NoAnswer, farewell).await;
    }

    // ---- negotiation steps -----------------------------------------------

    /// Start whichever negotiation step the session is ready for
    fn advance_negotiation(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        if !negotiating(session.status()) {
            return;
        }
        // the transport is only built once local tracks exist
        let Some(local) = session.local_stream() else {
            return;
        };
        let call_id = session.call_id().clone();
        let incoming = session.is_incoming();
        let tracks: Vec<Arc<dyn MediaTrack>> = local.tracks().to_vec();

        let Some(peer) = self.negotiation.peer.clone() else {
            let needed = !incoming || self.negotiation.pending_offer.is_some();
            if needed && !self.negotiation.peer_requested {
                self.negotiation.peer_requested = true;
                self.create_peer(call_id, tracks);
            }
            return;
        };

        if incoming {
            if let Some(offer) = self.negotiation.pending_offer.take() {
                self.answer_offer(call_id, peer, offer);
            }
        } else if !self.negotiation.offer_requested {
            self.negotiation.offer_requested = true;
            self.create_offer(call_id, peer);
        } else if self.negotiation.offer_sent {
            if let Some(answer) = self.negotiation.pending_answer.take() {
                self.apply_answer(call_id, peer, answer);
            }
        }
    }

    fn create_peer(&mut self, call_id: CallId, tracks: Vec<Arc<dyn MediaTrack>>) {
        let factory = Arc::clone(&self.peers);
        let sink = PeerEventSink::new(call_id.clone(), self.peer_events.clone());
        let completions = self.completions.clone();
        // never aborted: the transport always comes back to be kept or closed
        tokio::spawn(async move {
            let result = open_peer(factory, sink, tracks).await;
            if let Err(mpsc::error::SendError(Completion::PeerReady {
                result: Ok(peer), ..
            })) = completions.send(Completion::PeerReady { call_id, result })
            {
                peer.close().await;
            }
        });
    }

    fn create_offer(&mut self, call_id: CallId, peer: Arc<dyn PeerTransport>) {
        let completions = self.completions.clone();
        self.spawn(async move {
            let result = peer.create_offer().await;
            let _ = completions.send(Completion::OfferCreated { call_id, result });
        });
    }

    fn answer_offer(&mut self, call_id: CallId, peer: Arc<dyn PeerTransport>, offer: SessionDescription) {
        let completions = self.completions.clone();
        self.spawn(async move {
            let result = answer(peer, offer).await;
            let _ = completions.send(Completion::AnswerCreated { call_id, result });
        });
    }

    fn apply_answer(&mut self, call_id: CallId, peer: Arc<dyn PeerTransport>, answer: SessionDescription) {
        let completions = self.completions.clone();
        self.spawn(async move {
            let result = peer.set_remote_description(answer).await;
            let _ = completions.send(Completion::AnswerApplied { call_id, result });
        });
    }

    fn flush_candidates(&mut self, call_id: CallId) {
        let Some(peer) = self.negotiation.peer.clone() else {
            return;
        };
        let candidates = self.negotiation.candidates.drain();
        if candidates.is_empty() {
            return;
        }
        debug!(call_id = %call_id, "Applying {} buffered candidates", candidates.len());
        self.apply_candidates(call_id, peer, candidates);
    }

    fn apply_candidates(
        &mut self,
        call_id: CallId,
        peer: Arc<dyn PeerTransport>,
        candidates: Vec<IceCandidate>,
    ) {
        let completions = self.completions.clone();
        self.spawn(async move {
            let result = add_candidates(peer, candidates).await;
            let _ = completions.send(Completion::CandidatesApplied { call_id, result });
        });
    }

    fn acquire_media(&mut self, call_id: CallId) {
        let media = Arc::clone(&self.media);
        let constraints = self.config.media.clone();
        let completions = self.completions.clone();
        self.spawn(async move {
            let result = acquire_local_media(media.as_ref(), &constraints).await;
            // an undeliverable result is dropped here, which stops its tracks
            let _ = completions.send(Completion::MediaAcquired { call_id, result });
        });
    }

    fn start_ring_timer(&mut self, call_id: CallId) {
        let Some(timeout) = self.config.ring_timeout() else {
            return;
        };
        let completions = self.completions.clone();
        self.spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = completions.send(Completion::RingTimeout { call_id });
        });
    }

    // ---- teardown --------------------------------------------------------

    async fn fail_negotiation(&mut self, error: PeerError) {
        counter!("peercall_negotiation_failures_total").increment(1);
        self.teardown(EndReason::NegotiationFailed(error.to_string()), Farewell::End)
            .await;
    }

    async fn signaling_lost(&mut self) {
        self.teardown(
            EndReason::TransportFailed("signaling unavailable".to_string()),
            Farewell::None,
        )
        .await;
    }

    /// The single exit path. Aborts suspended work, notifies the remote party,
    /// closes the transport and stops local tracks before publishing idle.
    async fn teardown(&mut self, reason: EndReason, farewell: Farewell) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let Some(mut session) = self.session.take() else {
            return;
        };
        let call_id = session.call_id().clone();

        // nobody has heard of a call that is still acquiring media
        let farewell = if session.status() == CallStatus::Initiating {
            Farewell::None
        } else {
            farewell
        };
        match farewell {
            Farewell::End => {
                self.emit(SignalingMessage::EndCall {
                    call_id: call_id.clone(),
                });
            }
            Farewell::Reject => {
                self.emit(SignalingMessage::RejectCall {
                    call_id: call_id.clone(),
                });
            }
            Farewell::None => {}
        }

        if let Some(peer) = self.negotiation.take_peer() {
            peer.close().await;
        }
        self.negotiation = Negotiation::default();
        session.release_media();
        if let Err(e) = session.end(reason.clone()) {
            warn!(call_id = %call_id, "{}", e);
        }
        self.state_tx.send_replace(session.snapshot());

        if reason.is_failure() {
            warn!(call_id = %call_id, "Call ended: {}", reason);
        } else {
            info!(call_id = %call_id, "Call ended: {}", reason);
        }
        counter!("peercall_calls_ended_total", "reason" => reason.label()).increment(1);

        if self.recent.len() == RECENT_CALLS {
            self.recent.pop_front();
        }
        self.recent.push_back(call_id);
        let error = error_for(&reason);
        self.last_end = Some(reason);
        self.publish();

        if let Some(pending) = self.pending.take() {
            pending.fail(error);
        }
    }

    // ---- helpers ---------------------------------------------------------

    fn begin(&mut self, session: CallSession) {
        self.session = Some(session);
        self.negotiation = Negotiation::default();
        self.last_end = None;
    }

    fn current(&self, call_id: &CallId) -> Option<&CallSession> {
        self.session.as_ref().filter(|s| s.call_id() == call_id)
    }

    fn current_mut(&mut self, call_id: &CallId) -> Option<&mut CallSession> {
        self.session.as_mut().filter(|s| s.call_id() == call_id)
    }

    fn emit(&self, message: SignalingMessage) -> bool {
        let kind = message.kind();
        let call_id = message.call_id().clone();
        match self.signaling.send(message) {
            Ok(()) => {
                trace!(call_id = %call_id, "Sent {}", kind);
                true
            }
            Err(e) => {
                warn!(call_id = %call_id, "Failed to send {}: {}", kind, e);
                counter!("peercall_signaling_failures_total", "kind" => kind).increment(1);
                false
            }
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(task));
    }
}

fn negotiating(status: CallStatus) -> bool {
    matches!(status, CallStatus::Connecting | CallStatus::Active)
}

fn error_for(reason: &EndReason) -> CallError {
    match reason {
        EndReason::MediaFailure(e) => CallError::MediaUnavailable(e.clone()),
        EndReason::NegotiationFailed(detail) => CallError::Negotiation(detail.clone()),
        EndReason::TransportFailed(detail) => CallError::Transport(detail.clone()),
        EndReason::Shutdown => CallError::Shutdown,
        _ => CallError::Cancelled,
    }
}

/// Create the transport and attach every local track before any SDP exists
async fn open_peer(
    factory: Arc<dyn PeerTransportFactory>,
    sink: PeerEventSink,
    tracks: Vec<Arc<dyn MediaTrack>>,
) -> PeerResult<Arc<dyn PeerTransport>> {
    let peer = factory.create(sink).await?;
    for track in tracks {
        if let Err(e) = peer.add_track(track).await {
            peer.close().await;
            return Err(e);
        }
    }
    Ok(peer)
}

async fn answer(
    peer: Arc<dyn PeerTransport>,
    offer: SessionDescription,
) -> PeerResult<SessionDescription> {
    peer.set_remote_description(offer).await?;
    peer.create_answer().await
}

async fn add_candidates(peer: Arc<dyn PeerTransport>, candidates: Vec<IceCandidate>) -> PeerResult<()> {
    for candidate in candidates {
        peer.add_ice_candidate(candidate).await?;
    }
    Ok(())
}
