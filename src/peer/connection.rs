use crate::error::{CoordinatorError, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::{LocalTrack, MediaHandle};
use crate::peer::transport::{
    LinkState, PeerTransport, TransportEvents, TransportFactory,
};
use crate::peer::types::{IceCandidate, IceServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Фабрика peer-соединений поверх webrtc-rs
pub struct WebRtcTransportFactory {
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcTransportFactory {
    /// Проверяет серверы заранее, чтобы ошибка конфигурации не всплыла посреди open
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Result<Self> {
        for server in &ice_servers {
            server
                .validate()
                .map_err(CoordinatorError::TransportFailure)?;
        }
        Ok(Self { ice_servers })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        media: &MediaHandle,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>> {
        let pc = new_peer(&self.ice_servers, events).await?;
        Ok(Arc::new(WebRtcTransport {
            pc,
            tracks: media.tracks.clone(),
        }))
    }
}

/// создаём Peer и вешаем обработчики; события уходят в inbox координатора
async fn new_peer(
    ice_servers: &[IceServerConfig],
    events: TransportEvents,
) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
    debug!(slot = events.slot(), session = events.session_id(), "peer connection created");

    // Обработчик для сбора локальных кандидатов
    let cand_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = cand_events.clone();
        Box::pin(async move {
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c);
                    if let Ok(init) = c.to_json() {
                        events.local_candidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mline_index: init.sdp_mline_index,
                            sdp_mid: init.sdp_mid,
                        });
                    }
                }
                // None означает конец сбора
                None => events.gathering_complete(),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(
            slot = state_events.slot(),
            session = state_events.session_id(),
            "peer connection state changed to: {:?}",
            st
        );
        state_events.state_changed(map_state(st));
        Box::pin(async {})
    }));

    Ok(pc)
}

fn map_state(st: RTCPeerConnectionState) -> LinkState {
    match st {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn to_rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Одно peer-соединение слота
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    tracks: Vec<LocalTrack>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn apply_offer(&self, offer: &SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::offer(offer.sdp.clone())?;
        self.pc.set_remote_description(desc).await?;

        // треки добавляются после offer, чтобы занять recvonly-трансиверы сервера
        for track in &self.tracks {
            let sender = self.pc.add_track(track.clone()).await?;
            tokio::spawn(async move {
                // RTCP надо вычитывать, иначе interceptors не работают
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        let local = self.pc.local_description().await.ok_or_else(|| {
            CoordinatorError::TransportFailure("local description missing after answer".into())
        })?;
        Ok(SessionDescription {
            kind: local.sdp_type.to_string(),
            sdp: local.sdp,
        })
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn dump_stats(&self, moment: &str) {
        dump_selected_pair(&self.pc, moment).await;
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
