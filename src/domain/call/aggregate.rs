//! Call session aggregate root

use crate::domain::call::entity::Participant;
use crate::domain::call::state::CallState;
use crate::domain::call::value_object::{CallDirection, CallStatus, EndReason};
use crate::domain::media::{LocalMedia, MediaStream, MediaTrack};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallId;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The single live call of a client
///
/// Owns the local capture for its whole lifetime. `is_muted` / `is_video_off`
/// always mirror the enabled flag of the corresponding local track.
#[derive(Debug)]
pub struct CallSession {
    call_id: CallId,
    direction: CallDirection,
    status: CallStatus,
    participant: Participant,
    local_media: Option<LocalMedia>,
    remote_stream: Option<MediaStream>,
    is_muted: bool,
    is_video_off: bool,
    started_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
}

impl CallSession {
    /// A call we are placing; starts by acquiring media
    pub fn outgoing(call_id: CallId, callee: Participant) -> Self {
        Self::new(call_id, CallDirection::Outgoing, CallStatus::Initiating, callee)
    }

    /// A call we are being offered; starts ringing
    pub fn incoming(call_id: CallId, caller: Participant) -> Self {
        Self::new(call_id, CallDirection::Incoming, CallStatus::Ringing, caller)
    }

    fn new(
        call_id: CallId,
        direction: CallDirection,
        status: CallStatus,
        participant: Participant,
    ) -> Self {
        Self {
            call_id,
            direction,
            status,
            participant,
            local_media: None,
            remote_stream: None,
            is_muted: false,
            is_video_off: false,
            started_at: Utc::now(),
            connected_at: None,
            end_reason: None,
        }
    }

    /// Outgoing call announced to the callee
    pub fn ring(&mut self) -> Result<()> {
        self.transition_to(CallStatus::Ringing)
    }

    /// Call accepted, negotiation starts
    pub fn connect(&mut self) -> Result<()> {
        self.transition_to(CallStatus::Connecting)
    }

    /// Take ownership of the local capture
    pub fn attach_local_media(&mut self, media: LocalMedia) {
        let stream = media.stream();
        self.is_muted = stream.audio_track().map(|t| !t.is_enabled()).unwrap_or(false);
        self.is_video_off = stream.video_track().map(|t| !t.is_enabled()).unwrap_or(true);
        self.local_media = Some(media);
    }

    /// Record a remote track. Returns true if this made the call active.
    pub fn add_remote_track(&mut self, track: Arc<dyn MediaTrack>) -> Result<bool> {
        if !matches!(self.status, CallStatus::Connecting | CallStatus::Active) {
            return Err(CallError::InvalidStateTransition(format!(
                "Remote track while {}",
                self.status
            )));
        }

        let call_id = &self.call_id;
        self.remote_stream
            .get_or_insert_with(|| MediaStream::empty(format!("remote-{}", call_id)))
            .add_track(track);

        if self.status == CallStatus::Connecting {
            self.transition_to(CallStatus::Active)?;
            self.connected_at = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    /// Flip the microphone. Returns the resulting muted flag; no-op without audio.
    pub fn toggle_mute(&mut self) -> bool {
        if let Some(track) = self.local_media.as_ref().and_then(|m| m.stream().audio_track()) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            self.is_muted = !enabled;
        }
        self.is_muted
    }

    /// Flip the camera. Returns the resulting video-off flag; no-op without video.
    pub fn toggle_video(&mut self) -> bool {
        if let Some(track) = self.local_media.as_ref().and_then(|m| m.stream().video_track()) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            self.is_video_off = !enabled;
        }
        self.is_video_off
    }

    /// Stop every local track and forget both streams
    pub fn release_media(&mut self) {
        if let Some(media) = self.local_media.take() {
            media.release();
        }
        self.remote_stream = None;
    }

    /// End the call
    pub fn end(&mut self, reason: EndReason) -> Result<()> {
        self.transition_to(CallStatus::Ended)?;
        self.end_reason = Some(reason);
        Ok(())
    }

    /// Transition to a new state
    fn transition_to(&mut self, new_status: CallStatus) -> Result<()> {
        if !self.status.can_transition_to(&new_status) {
            return Err(CallError::InvalidStateTransition(format!(
                "Cannot transition from {} to {}",
                self.status, new_status
            )));
        }

        self.status = new_status;
        Ok(())
    }

    pub fn snapshot(&self) -> CallState {
        CallState {
            call_id: Some(self.call_id.clone()),
            status: self.status,
            direction: Some(self.direction),
            is_active: self.status.is_in_call(),
            is_incoming: self.is_incoming(),
            participant: Some(self.participant.clone()),
            local_stream: self.local_media.as_ref().map(|m| m.stream().clone()),
            remote_stream: self.remote_stream.clone(),
            is_muted: self.is_muted,
            is_video_off: self.is_video_off,
            started_at: Some(self.started_at),
            connected_at: self.connected_at,
            end_reason: self.end_reason.clone(),
            last_error: self.end_reason.as_ref().and_then(|r| r.user_message()),
        }
    }

    // Getters
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == CallDirection::Incoming
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_media.as_ref().map(|m| m.stream())
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_video_off(&self) -> bool {
        self.is_video_off
    }

    pub fn connected_at(&self) -> Option<&DateTime<Utc>> {
        self.connected_at.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::{TrackHandle, TrackKind};

    fn local_media() -> (LocalMedia, Arc<TrackHandle>, Arc<TrackHandle>) {
        let audio = Arc::new(TrackHandle::new(TrackKind::Audio));
        let video = Arc::new(TrackHandle::new(TrackKind::Video));
        let stream = MediaStream::new(
            "local",
            vec![audio.clone() as Arc<dyn MediaTrack>, video.clone()],
        );
        (LocalMedia::new(stream), audio, video)
    }

    fn outgoing() -> CallSession {
        CallSession::outgoing(CallId::from("c1"), Participant::new("bob", "Bob"))
    }

    #[test]
    fn test_outgoing_lifecycle() {
        let mut session = outgoing();
        assert_eq!(session.status(), CallStatus::Initiating);

        let (media, _, _) = local_media();
        session.attach_local_media(media);
        session.ring().unwrap();
        session.connect().unwrap();
        assert!(session.connected_at().is_none());

        let remote: Arc<dyn MediaTrack> = Arc::new(TrackHandle::new(TrackKind::Audio));
        assert!(session.add_remote_track(remote).unwrap());
        assert_eq!(session.status(), CallStatus::Active);
        assert!(session.connected_at().is_some());

        let second: Arc<dyn MediaTrack> = Arc::new(TrackHandle::new(TrackKind::Video));
        assert!(!session.add_remote_track(second).unwrap());
        assert_eq!(session.remote_stream().unwrap().tracks().len(), 2);

        session.end(EndReason::LocalHangup).unwrap();
        assert_eq!(session.snapshot().status, CallStatus::Ended);
    }

    #[test]
    fn test_remote_track_before_accept_is_rejected() {
        let mut session =
            CallSession::incoming(CallId::from("c1"), Participant::new("alice", "Alice"));
        let remote: Arc<dyn MediaTrack> = Arc::new(TrackHandle::new(TrackKind::Audio));
        assert!(session.add_remote_track(remote).is_err());
        assert!(session.connected_at().is_none());
    }

    #[test]
    fn test_invalid_state_transition() {
        let mut session = outgoing();
        assert!(session.connect().is_err());
    }

    #[test]
    fn test_toggle_mute_flips_track_and_flag_together() {
        let mut session = outgoing();
        let (media, audio, _) = local_media();
        session.attach_local_media(media);

        assert!(session.toggle_mute());
        assert!(!audio.is_enabled());
        assert!(session.is_muted());

        assert!(!session.toggle_mute());
        assert!(audio.is_enabled());
        assert!(!session.is_muted());
    }

    #[test]
    fn test_toggle_video_flips_track_and_flag_together() {
        let mut session = outgoing();
        let (media, _, video) = local_media();
        session.attach_local_media(media);

        assert!(session.toggle_video());
        assert!(!video.is_enabled());
        assert!(!session.toggle_video());
        assert!(video.is_enabled());
    }

    #[test]
    fn test_toggles_without_media_are_noops() {
        let mut session = outgoing();
        assert!(!session.toggle_mute());
        assert!(!session.toggle_video());
    }

    #[test]
    fn test_release_media_stops_tracks() {
        let mut session = outgoing();
        let (media, audio, video) = local_media();
        session.attach_local_media(media);

        session.release_media();

        assert!(!audio.is_live());
        assert!(!video.is_live());
        assert!(session.local_stream().is_none());
        assert!(session.snapshot().local_stream.is_none());
    }
}
