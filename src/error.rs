//! Ошибки координатора

use thiserror::Error;

/// Ошибки, которые может вернуть координатор соединений
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Пользователь запретил доступ к камере/микрофону
    #[error("capture permission denied")]
    PermissionDenied,

    /// Устройство захвата не найдено или не поддерживается
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Любой сбой HTTP-сигналинга (не-2xx, транспорт, разбор ответа)
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// Транспорт сообщил failed
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Потеря push-канала
    #[error("push channel lost: {0}")]
    ChannelLost(String),

    /// Управляющий цикл остановлен
    #[error("coordinator is shut down")]
    Shutdown,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Потеря push-канала переподключается сама и пользователю не показывается
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, CoordinatorError::ChannelLost(_))
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(e: reqwest::Error) -> Self {
        CoordinatorError::SignalingUnavailable(e.to_string())
    }
}

impl From<webrtc::Error> for CoordinatorError {
    fn from(e: webrtc::Error) -> Self {
        CoordinatorError::TransportFailure(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CoordinatorError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CoordinatorError::ChannelLost(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
