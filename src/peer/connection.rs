use crate::error::MediaError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::types::{
    ConnectionState, IceCandidate, LocalTrack, SdpType, ServerConfig, SessionDescription,
    TrackKind,
};
use crate::peer::{MediaEngine, MediaEvent, MediaEvents, MediaSession};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as CodecRegistry, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Opus at 48 kHz, the only codec the outgoing audio track negotiates.
const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_CHANNELS: u16 = 2;

type AudioSlot = watch::Sender<Option<Arc<TrackLocalStaticSample>>>;

/// [`MediaEngine`] backed by the `webrtc` crate.
///
/// The outgoing audio track of the live session is published through
/// [`RtcMediaEngine::subscribe_audio_track`], so the capture side can follow
/// it across restarts and write Opus samples into it.
#[derive(Debug, Clone)]
pub struct RtcMediaEngine {
    audio: Arc<AudioSlot>,
}

impl Default for RtcMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcMediaEngine {
    pub fn new() -> Self {
        let (audio, _) = watch::channel(None);
        Self {
            audio: Arc::new(audio),
        }
    }

    /// Track of the live session, `None` between sessions.
    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.borrow().clone()
    }

    pub fn subscribe_audio_track(&self) -> watch::Receiver<Option<Arc<TrackLocalStaticSample>>> {
        self.audio.subscribe()
    }
}

fn new_api() -> Result<API, MediaError> {
    let mut codecs = CodecRegistry::default();
    codecs
        .register_default_codecs()
        .map_err(|e| MediaError::EngineUnavailable(format!("register codecs: {e}")))?;

    let registry = register_default_interceptors(Registry::new(), &mut codecs)
        .map_err(|e| MediaError::EngineUnavailable(format!("register interceptors: {e}")))?;

    Ok(APIBuilder::new()
        .with_media_engine(codecs)
        .with_interceptor_registry(registry)
        .build())
}

/// Peer connection configuration for one session
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn connection_state(st: RTCPeerConnectionState) -> ConnectionState {
    match st {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let parsed = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| MediaError::DescriptionRejected(e.to_string()))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, MediaError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        other => {
            return Err(MediaError::DescriptionRejected(format!(
                "unsupported description type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

#[async_trait]
impl MediaEngine for RtcMediaEngine {
    async fn create(
        &self,
        servers: &[ServerConfig],
    ) -> Result<(Box<dyn MediaSession>, MediaEvents), MediaError> {
        let api = new_api()?;
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(servers))
                .await
                .map_err(|e| MediaError::EngineUnavailable(e.to_string()))?,
        );

        let (tx, rx) = mpsc::unbounded_channel();

        let candidate_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(c) = cand else {
                    debug!("ICE candidate gathering completed");
                    return;
                };
                match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid.unwrap_or_default(),
                            sdp_mline_index: init.sdp_mline_index.unwrap_or_default(),
                        };
                        dump_candidate("LOCAL", &candidate);
                        let _ = tx.send(MediaEvent::LocalCandidateGenerated(candidate));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                }
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state}");
            Box::pin(async {})
        }));

        // Weak, so the handler does not keep the peer connection alive
        let weak: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {st}");
            let state = connection_state(st);
            let _ = tx.send(MediaEvent::ConnectionStateChanged(state));

            if state == ConnectionState::Failed {
                if let Some(pc) = weak.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            Box::pin(async {})
        }));

        let session = RtcMediaSession {
            pc,
            audio: Arc::clone(&self.audio),
            track: Mutex::new(None),
        };
        Ok((Box::new(session), rx))
    }
}

/// [`MediaSession`] over one `RTCPeerConnection`.
pub struct RtcMediaSession {
    pc: Arc<RTCPeerConnection>,
    audio: Arc<AudioSlot>,
    track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
}

#[async_trait]
impl MediaSession for RtcMediaSession {
    async fn create_local_audio_track(&self, track_id: &str) -> Result<LocalTrack, MediaError> {
        Ok(LocalTrack {
            id: track_id.to_string(),
            kind: TrackKind::Audio,
        })
    }

    async fn add_track(
        &self,
        track: &LocalTrack,
        stream_labels: &[String],
    ) -> Result<(), MediaError> {
        if stream_labels.len() > 1 {
            debug!("Only the first stream label is used: {:?}", stream_labels);
        }
        let stream_id = stream_labels
            .first()
            .cloned()
            .unwrap_or_else(|| track.id.clone());

        let sample_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                ..Default::default()
            },
            track.id.clone(),
            stream_id.clone(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::TrackFailed(e.to_string()))?;

        // RTCP must be drained or the interceptors stall
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        info!("AudioTrack {} added with stream ID {stream_id}", track.id);
        *self.track.lock() = Some(Arc::clone(&sample_track));
        self.audio.send_replace(Some(sample_track));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| MediaError::OfferCreationFailed(e.to_string()))?;
        from_rtc(offer).map_err(|e| MediaError::OfferCreationFailed(e.to_string()))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| MediaError::DescriptionRejected(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| MediaError::DescriptionRejected(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: Some(candidate.sdp_mid),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| MediaError::CandidateRejected(e.to_string()))
    }

    async fn close(&self) {
        // Only withdraw the published track if a newer session has not replaced it.
        if let Some(mine) = self.track.lock().take() {
            self.audio.send_if_modified(|current| {
                let is_mine = current.as_ref().is_some_and(|live| Arc::ptr_eq(live, &mine));
                if is_mine {
                    *current = None;
                }
                is_mine
            });
        }
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_get_scheme_and_credentials() {
        let servers = vec![
            ServerConfig::stun("s", "stun.example.org:3478"),
            ServerConfig {
                id: "t".into(),
                r#type: "turn".into(),
                url: "turn.example.org:3478".into(),
                username: Some("user".into()),
                credential: Some("secret".into()),
            },
        ];

        let rtc = ice_servers(&servers);
        assert_eq!(rtc.len(), 2);
        assert_eq!(rtc[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert_eq!(rtc[0].username, "");
        assert_eq!(rtc[1].urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(rtc[1].username, "user");
        assert_eq!(rtc[1].credential, "secret");
    }

    #[test]
    fn maps_peer_connection_states() {
        assert_eq!(
            connection_state(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
        assert_eq!(
            connection_state(RTCPeerConnectionState::Failed),
            ConnectionState::Failed
        );
    }

    #[tokio::test]
    async fn offer_carries_audio_section() {
        let engine = RtcMediaEngine::new();
        let (session, _events) = engine.create(&[]).await.expect("peer connection");

        let track = session.create_local_audio_track("audio").await.unwrap();
        session
            .add_track(&track, &["stream1".to_string()])
            .await
            .unwrap();

        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));

        session.close().await;
    }

    #[tokio::test]
    async fn audio_track_follows_the_live_session() {
        let engine = RtcMediaEngine::new();
        let mut updates = engine.subscribe_audio_track();
        assert!(engine.audio_track().is_none());

        let (first, _events) = engine.create(&[]).await.expect("peer connection");
        let track = first.create_local_audio_track("audio").await.unwrap();
        first.add_track(&track, &["stream1".to_string()]).await.unwrap();
        updates.changed().await.unwrap();
        let published = engine.audio_track().expect("track published");
        assert_eq!(published.id(), "audio");
        assert_eq!(published.stream_id(), "stream1");

        let (second, _events) = engine.create(&[]).await.expect("peer connection");
        second.add_track(&track, &["stream1".to_string()]).await.unwrap();
        let current = engine.audio_track().expect("track published");
        assert!(!Arc::ptr_eq(&current, &published));

        // Closing the replaced session leaves the live track in place.
        first.close().await;
        assert!(engine.audio_track().is_some());

        second.close().await;
        assert!(engine.audio_track().is_none());
    }
}
