//! WHIP publishing against the local media server.
//!
//! One outbound session at a time: build a send-only peer connection, wait
//! (bounded) for ICE gathering, POST the offer, apply the answer. Teardown
//! DELETEs the session resource and closes the peer connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pebble_common::{Error, Result};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;

use crate::settings::StreamerSettings;

const SDP_CONTENT_TYPE: &str = "application/sdp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhipOptions {
    /// Total POST attempts, first one included.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Upper bound on waiting for ICE gathering before sending the offer.
    pub ice_gather_timeout: Duration,
}

impl Default for WhipOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(1000),
            ice_gather_timeout: Duration::from_secs(5),
        }
    }
}

/// Peer connection state as seen by the session owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PublishState {
    /// Terminal for an established session; nothing here reconnects.
    pub fn is_session_ending(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl From<RTCPeerConnectionState> for PublishState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

pub type StateCallback = Arc<dyn Fn(PublishState) + Send + Sync>;

/// Local tracks to publish.
#[derive(Clone, Default)]
pub struct MediaStream {
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self { tracks }
    }

    pub fn with_track(mut self, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.tracks.iter().map(|t| t.id()).collect();
        f.debug_struct("MediaStream").field("tracks", &ids).finish()
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Negotiates one outbound session, replacing any existing one.
    async fn publish(&self, media: MediaStream, on_state: StateCallback) -> Result<()>;

    /// Tears the session down. Idempotent and infallible.
    async fn stop(&self);
}

/// Stable reorder putting every codec with `mime_type` first.
pub fn prefer_codec(mut codecs: Vec<RTCRtpCodecParameters>, mime_type: &str) -> Vec<RTCRtpCodecParameters> {
    codecs.sort_by_key(|codec| !codec.capability.mime_type.eq_ignore_ascii_case(mime_type));
    codecs
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhipAnswer {
    /// Session resource for teardown; absent when the server sent no Location.
    pub resource_url: Option<Url>,
    pub sdp: String,
}

/// The HTTP half of WHIP: offer POST with retries and resource DELETE.
#[derive(Debug, Clone)]
pub struct WhipSignaling {
    client: reqwest::Client,
    endpoint: Url,
    options: WhipOptions,
}

impl WhipSignaling {
    pub fn new(endpoint: &str, options: WhipOptions) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid WHIP endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            options,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POSTs `offer_sdp`, retrying the request on transport errors and
    /// non-success statuses. The last failure is returned once the attempt
    /// budget is spent.
    pub async fn post_offer(&self, offer_sdp: &str) -> Result<WhipAnswer> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut last_error = Error::negotiation("WHIP POST was never attempted");

        for attempt in 1..=max_attempts {
            let sent = self
                .client
                .post(self.endpoint.clone())
                .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
                .body(offer_sdp.to_string())
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    let resource_url = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|value| value.to_str().ok())
                        .and_then(|location| self.endpoint.join(location).ok());
                    let sdp = response.text().await.map_err(Error::http)?;
                    debug!(attempt, "WHIP offer accepted");
                    return Ok(WhipAnswer { resource_url, sdp });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    last_error = Error::negotiation(format!(
                        "WHIP POST returned {}{}",
                        status,
                        if body.trim().is_empty() {
                            String::new()
                        } else {
                            format!(": {}", body.trim())
                        }
                    ));
                }
                Err(e) => {
                    last_error = Error::http(format!("WHIP POST to {} failed: {}", self.endpoint, e));
                }
            }

            if attempt < max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    "{}; retrying in {:?}",
                    last_error.message(),
                    self.options.retry_delay
                );
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        Err(last_error)
    }

    /// Best effort; the server may already be gone.
    pub async fn delete(&self, resource_url: &Url) {
        match self.client.delete(resource_url.clone()).send().await {
            Ok(response) if !response.status().is_success() => {
                debug!("WHIP DELETE {} returned {}", resource_url, response.status());
            }
            Ok(_) => debug!("WHIP session {} deleted", resource_url),
            Err(e) => debug!("WHIP DELETE {} failed: {}", resource_url, e),
        }
    }
}

struct ActiveSession {
    pc: Arc<RTCPeerConnection>,
    resource_url: Option<Url>,
}

pub struct WhipClient {
    signaling: WhipSignaling,
    options: WhipOptions,
    session: Mutex<Option<ActiveSession>>,
}

impl WhipClient {
    pub fn new(endpoint: &str, options: WhipOptions) -> Result<Self> {
        Ok(Self {
            signaling: WhipSignaling::new(endpoint, options)?,
            options,
            session: Mutex::new(None),
        })
    }

    pub fn from_settings(settings: &StreamerSettings) -> Result<Self> {
        Self::new(&settings.whip_url(), settings.whip)
    }

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn new_peer_connection() -> Result<RTCPeerConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::internal(format!("codec registration failed: {}", e)))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::internal(format!("interceptor registration failed: {}", e)))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // Loopback only, so no STUN/TURN.
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| Error::negotiation(format!("peer connection setup failed: {}", e)))
    }

    /// Moves H.264 to the front of a video transceiver's codec list. Any
    /// failure leaves the platform order in place.
    async fn prefer_h264(transceiver: &Arc<RTCRtpTransceiver>) {
        let parameters = transceiver.sender().await.get_parameters().await;
        let codecs = parameters.rtp_parameters.codecs;
        if codecs.is_empty() {
            return;
        }
        if !codecs
            .iter()
            .any(|c| c.capability.mime_type.eq_ignore_ascii_case(MIME_TYPE_H264))
        {
            debug!("H.264 unavailable, keeping default codec order");
            return;
        }
        if let Err(e) = transceiver
            .set_codec_preferences(prefer_codec(codecs, MIME_TYPE_H264))
            .await
        {
            debug!("could not set codec preferences: {}", e);
        }
    }

    /// Offer/answer on `pc`. Returns the session resource on success.
    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        media: MediaStream,
        on_state: StateCallback,
    ) -> Result<Option<Url>> {
        for track in media.tracks {
            let kind = track.kind();
            let transceiver = pc
                .add_transceiver_from_track(
                    track,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Sendonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| Error::negotiation(format!("failed to add track: {}", e)))?;
            if kind == RTPCodecType::Video {
                Self::prefer_h264(&transceiver).await;
            }
        }

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("peer connection state: {}", state);
            on_state(PublishState::from(state));
            Box::pin(async {})
        }));

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| Error::negotiation(format!("create offer failed: {}", e)))?;
        let mut gathering_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| Error::negotiation(format!("set local description failed: {}", e)))?;

        if tokio::time::timeout(self.options.ice_gather_timeout, gathering_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering incomplete after {:?}, sending current offer",
                self.options.ice_gather_timeout
            );
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::negotiation("no local description after offer"))?;
        let answer = self.signaling.post_offer(&local.sdp).await?;

        let applied = match RTCSessionDescription::answer(answer.sdp) {
            Ok(description) => pc
                .set_remote_description(description)
                .await
                .map_err(|e| Error::negotiation(format!("could not apply answer: {}", e))),
            Err(e) => Err(Error::negotiation(format!("malformed SDP answer: {}", e))),
        };
        if let Err(e) = applied {
            if let Some(resource_url) = &answer.resource_url {
                self.signaling.delete(resource_url).await;
            }
            return Err(e);
        }

        Ok(answer.resource_url)
    }

    /// Forgets `pc` if it is still the current session.
    async fn release(&self, pc: &Arc<RTCPeerConnection>) {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| Arc::ptr_eq(&s.pc, pc)) {
            *session = None;
        }
    }
}

#[async_trait]
impl Publisher for WhipClient {
    async fn publish(&self, media: MediaStream, on_state: StateCallback) -> Result<()> {
        if media.is_empty() {
            return Err(Error::validation("media stream has no tracks"));
        }
        self.stop().await;

        let pc = Arc::new(Self::new_peer_connection().await?);
        *self.session.lock().await = Some(ActiveSession {
            pc: Arc::clone(&pc),
            resource_url: None,
        });

        match self.negotiate(&pc, media, on_state).await {
            Ok(resource_url) => {
                let mut session = self.session.lock().await;
                match session.as_mut() {
                    Some(active) if Arc::ptr_eq(&active.pc, &pc) => {
                        info!(
                            "WHIP session established at {}",
                            resource_url
                                .as_ref()
                                .map_or_else(|| self.signaling.endpoint().to_string(), Url::to_string)
                        );
                        active.resource_url = resource_url;
                        Ok(())
                    }
                    _ => {
                        // stop() ran while the offer was in flight.
                        drop(session);
                        if let Some(resource_url) = &resource_url {
                            self.signaling.delete(resource_url).await;
                        }
                        let _ = pc.close().await;
                        Err(Error::negotiation("publish abandoned by stop"))
                    }
                }
            }
            Err(e) => {
                self.release(&pc).await;
                if let Err(close_err) = pc.close().await {
                    debug!("closing failed peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        let Some(active) = self.session.lock().await.take() else {
            return;
        };
        if let Some(resource_url) = &active.resource_url {
            self.signaling.delete(resource_url).await;
        }
        if let Err(e) = active.pc.close().await {
            debug!("closing peer connection: {}", e);
        }
        info!("WHIP session stopped");
    }
}
