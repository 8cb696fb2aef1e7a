//! Захват локальных аудио/видео устройств
//!
//! Сам захват и кодирование делает хост; здесь только учёт владения:
//! не больше одного `MediaHandle`, освобождается когда уходит последний слот.

use crate::error::{CoordinatorError, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Состояние разрешения на захват
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
}

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Ссылка на захваченное устройство
#[derive(Clone)]
pub struct MediaHandle {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl MediaHandle {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: random_id(),
            tracks,
        }
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Устройство захвата хоста
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn permission(&self) -> PermissionState;

    /// Может вызвать запрос разрешения у пользователя
    async fn acquire(&self) -> Result<MediaHandle>;

    async fn release(&self, handle: MediaHandle);
}

/// Учёт единственного `MediaHandle` с подсчётом слотов-держателей
pub struct MediaGuard {
    device: Arc<dyn CaptureDevice>,
    handle: Option<MediaHandle>,
    holders: HashSet<String>,
}

impl MediaGuard {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            handle: None,
            holders: HashSet::new(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Выдаёт общий handle; первый держатель захватывает устройство
    pub async fn acquire(&mut self, slot: &str) -> Result<MediaHandle> {
        if let Some(handle) = &self.handle {
            self.holders.insert(slot.to_string());
            debug!(slot, handle = %handle.id, "reusing capture handle");
            return Ok(handle.clone());
        }

        if self.device.permission().await == PermissionState::Denied {
            warn!(slot, "capture permission denied");
            return Err(CoordinatorError::PermissionDenied);
        }

        let handle = self.device.acquire().await?;
        info!(slot, handle = %handle.id, tracks = handle.tracks.len(), "capture acquired");
        self.holders.insert(slot.to_string());
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Снимает слот с учёта; устройство отпускается вместе с последним держателем
    pub async fn release(&mut self, slot: &str) {
        self.holders.remove(slot);
        if !self.holders.is_empty() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            info!(slot, handle = %handle.id, "capture released");
            self.device.release(handle).await;
        }
    }
}

/// Устройство по умолчанию: VP8 видео и Opus аудио,
/// хост сам пишет в них сэмплы через `push_video` / `push_audio`
pub struct SampleCaptureDevice {
    stream_id: String,
    permission: Mutex<PermissionState>,
    current: Mutex<Option<(Arc<TrackLocalStaticSample>, Arc<TrackLocalStaticSample>)>>,
}

impl SampleCaptureDevice {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            permission: Mutex::new(PermissionState::Prompt),
            current: Mutex::new(None),
        }
    }

    /// Хост сообщает результат запроса разрешения
    pub async fn set_permission(&self, state: PermissionState) {
        *self.permission.lock().await = state;
    }

    pub async fn push_video(&self, data: Bytes, duration: Duration) -> Result<()> {
        let track = { self.current.lock().await.as_ref().map(|(v, _)| v.clone()) };
        write_sample(track, data, duration).await
    }

    pub async fn push_audio(&self, data: Bytes, duration: Duration) -> Result<()> {
        let track = { self.current.lock().await.as_ref().map(|(_, a)| a.clone()) };
        write_sample(track, data, duration).await
    }
}

async fn write_sample(
    track: Option<Arc<TrackLocalStaticSample>>,
    data: Bytes,
    duration: Duration,
) -> Result<()> {
    let track = track.ok_or_else(|| {
        CoordinatorError::DeviceUnavailable("capture is not acquired".into())
    })?;
    track
        .write_sample(&Sample {
            data,
            duration,
            ..Default::default()
        })
        .await
        .map_err(|e| CoordinatorError::DeviceUnavailable(e.to_string()))
}

#[async_trait]
impl CaptureDevice for SampleCaptureDevice {
    async fn permission(&self) -> PermissionState {
        *self.permission.lock().await
    }

    async fn acquire(&self) -> Result<MediaHandle> {
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            self.stream_id.clone(),
        ));
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        ));

        *self.current.lock().await = Some((video.clone(), audio.clone()));
        *self.permission.lock().await = PermissionState::Granted;

        Ok(MediaHandle::new(vec![
            video as LocalTrack,
            audio as LocalTrack,
        ]))
    }

    async fn release(&self, _handle: MediaHandle) {
        self.current.lock().await.take();
    }
}
