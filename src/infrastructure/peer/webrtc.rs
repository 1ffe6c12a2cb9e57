//! WebRTC peer transport over `RTCPeerConnection`
//!
//! Local tracks are announced as `TrackLocalStaticSample`s; writing encoded
//! samples into them is left to the capture pipeline (see
//! [`WebRtcPeer::local_tracks`]).

use crate::config::IceConfig;
use crate::domain::media::{MediaTrack, TrackHandle, TrackKind};
use crate::domain::peer::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerTransport, PeerTransportFactory,
};
use crate::domain::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn backend(e: webrtc::Error) -> PeerError {
    PeerError::Backend(e.to_string())
}

fn map_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

/// Creates one `RTCPeerConnection` per call
pub struct WebRtcPeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcPeerFactory {
    pub fn new(ice: &IceConfig) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(backend)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice.stun_servers.clone(),
                ..Default::default()
            }]
        };

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerTransport>, PeerError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let connection = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| PeerError::Creation(e.to_string()))?;
        let connection = Arc::new(connection);

        let sink = events.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    })),
                    Err(e) => warn!(call_id = %sink.call_id(), "Unusable local candidate: {}", e),
                }
            })
        }));

        let sink = events.clone();
        connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!(call_id = %sink.call_id(), "Peer connection state {}", state);
                    sink.emit(PeerEvent::ConnectionStateChanged(map_state(state)));
                })
            },
        ));

        let sink = events.clone();
        connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => return,
                    };
                    info!(call_id = %sink.call_id(), "Remote {} track {}", kind, track.id());
                    let remote = TrackHandle::with_id(track.id(), kind);
                    sink.emit(PeerEvent::RemoteTrack(Arc::new(remote)));
                })
            },
        ));

        Ok(Arc::new(WebRtcPeer {
            connection,
            local_tracks: Mutex::new(Vec::new()),
        }))
    }
}

pub struct WebRtcPeer {
    connection: Arc<RTCPeerConnection>,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPeer {
    /// Sample sinks for the attached local tracks
    pub fn local_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().clone()
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        if self.connection.local_description().await.is_some() {
            return Err(PeerError::InvalidState(
                "tracks must be added before negotiation".to_string(),
            ));
        }
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind()),
            track.id().to_string(),
            "peercall".to_string(),
        ));
        self.connection
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(backend)?;
        self.local_tracks.lock().push(local);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self.connection.create_offer(None).await.map_err(backend)?;
        let sdp = offer.sdp.clone();
        self.connection
            .set_local_description(offer)
            .await
            .map_err(backend)?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self.connection.create_answer(None).await.map_err(backend)?;
        let sdp = answer.sdp.clone();
        self.connection
            .set_local_description(answer)
            .await
            .map_err(backend)?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| PeerError::InvalidDescription(e.to_string()))?;

        self.connection
            .set_remote_description(remote)
            .await
            .map_err(|e| PeerError::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }

    fn connection_state(&self) -> PeerConnectionState {
        map_state(self.connection.connection_state())
    }

    async fn close(&self) {
        if let Err(e) = self.connection.close().await {
            warn!("Error closing peer connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::CallId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_offer_announces_local_audio() {
        let factory = WebRtcPeerFactory::new(&IceConfig {
            stun_servers: Vec::new(),
        })
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = factory
            .create(PeerEventSink::new(CallId::from("c1"), tx))
            .await
            .unwrap();

        peer.add_track(Arc::new(TrackHandle::new(TrackKind::Audio)))
            .await
            .unwrap();
        let offer = peer.create_offer().await.unwrap();

        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        peer.close().await;
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Failed),
            PeerConnectionState::Failed
        );
        assert!(map_state(RTCPeerConnectionState::Disconnected).is_fatal());
        assert!(!map_state(RTCPeerConnectionState::Connected).is_fatal());
    }
}
