//! UI-facing call state snapshot

use crate::domain::call::entity::Participant;
use crate::domain::call::value_object::{CallDirection, CallStatus, EndReason};
use crate::domain::media::MediaStream;
use crate::domain::shared::value_objects::CallId;
use chrono::{DateTime, Utc};

/// Read-only view of the current call, published on every change
#[derive(Debug, Clone)]
pub struct CallState {
    pub call_id: Option<CallId>,
    pub status: CallStatus,
    pub direction: Option<CallDirection>,
    /// A call is in progress (any status other than idle/ended)
    pub is_active: bool,
    pub is_incoming: bool,
    pub participant: Option<Participant>,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Set when remote media first arrives; the duration timer runs from here
    pub connected_at: Option<DateTime<Utc>>,
    /// Why the previous (or just ended) call ended
    pub end_reason: Option<EndReason>,
    /// One user-facing message for the last failure
    pub last_error: Option<String>,
}

impl CallState {
    pub fn idle() -> Self {
        Self {
            call_id: None,
            status: CallStatus::Idle,
            direction: None,
            is_active: false,
            is_incoming: false,
            participant: None,
            local_stream: None,
            remote_stream: None,
            is_muted: false,
            is_video_off: false,
            started_at: None,
            connected_at: None,
            end_reason: None,
            last_error: None,
        }
    }

    /// Idle again after a call ended
    pub fn idle_after(reason: EndReason) -> Self {
        Self {
            last_error: reason.user_message(),
            end_reason: Some(reason),
            ..Self::idle()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == CallStatus::Idle
    }

    /// Time since the call became active
    pub fn call_duration(&self) -> Option<chrono::Duration> {
        self.connected_at.map(|connected| Utc::now() - connected)
    }
}

impl Default for CallState {
    fn default() -> Self {
        Self::idle()
    }
}
