use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Описание сессии в формате `{type, sdp}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".into(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".into(),
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind.eq_ignore_ascii_case("offer")
    }
}

/// ICE кандидат в том виде, в каком его ходит сервер
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
}

impl IceCandidate {
    /// Пустая строка кандидата означает конец сбора
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Ответ `/request_connection/{name}`: offer закодирован JSON-строкой
#[derive(Deserialize, Debug, Clone)]
pub struct OfferResponse {
    pub offer_sdp: String,
}

/// Ответ `/ice_candidates/{name}`
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CandidateBatch {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
}

/// Подтверждение сервера. Сервер может вернуть 200 со `status: "error"`
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Ack {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Ack {
    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }
}

/// Статус соединения в словаре UI и сервера
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Состояние одного потока в снимке сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamState {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connected: ConnectionStatus,
}

/// Полный снимок `/chat_state`; заменяется целиком при каждом обновлении
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatState {
    #[serde(default)]
    pub streams: HashMap<String, StreamState>,
}

impl ChatState {
    pub fn status_of(&self, name: &str) -> ConnectionStatus {
        self.streams
            .get(name)
            .map(|s| s.connected)
            .unwrap_or_default()
    }
}

/// Сообщения push-канала сервер → клиент
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    StateUpdate { state: ChatState },
    Pong,
    #[serde(other)]
    Unknown,
}

/// Сообщения клиент → сервер
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushRequest {
    RequestState,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// Серверы по умолчанию
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::stun("default-stun", "stun:stun.l.google.com:19302"),
            Self::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
            Self::stun("default-stun-2", "stun:stun2.l.google.com:19302"),
            Self::stun("cloudflare-stun", "stun:stun.cloudflare.com:3478"),
        ]
    }

    /// Пустой URL и TURN без логина/пароля недопустимы
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err(format!("ICE server {} has an empty URL", self.id));
        }
        if self.r#type == "turn" && (self.username.is_none() || self.credential.is_none()) {
            return Err(format!(
                "TURN server {} requires username and credential",
                self.id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_snapshot() {
        let raw = r#"{"streams": {
            "board": {"name": "board", "connected": "connected", "is_board": true},
            "gm": {"name": "gm", "connected": "disconnected", "is_board": false},
            "player_1": {"name": "player_1", "connected": "connecting", "is_board": false}
        }}"#;
        let state: ChatState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.status_of("board"), ConnectionStatus::Connected);
        assert_eq!(state.status_of("player_1"), ConnectionStatus::Connecting);
        assert_eq!(state.status_of("player_5"), ConnectionStatus::Disconnected);
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
            sdp_mline_index: Some(0),
            sdp_mid: Some("0".into()),
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["sdpMLineIndex"], 0);
        assert_eq!(v["sdpMid"], "0");
    }

    #[test]
    fn push_message_variants() {
        let msg: PushMessage =
            serde_json::from_str(r#"{"type":"state_update","state":{"streams":{}}}"#).unwrap();
        assert_eq!(
            msg,
            PushMessage::StateUpdate {
                state: ChatState::default()
            }
        );
        let msg: PushMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(msg, PushMessage::Pong);
        let msg: PushMessage = serde_json::from_str(r#"{"type":"whatever"}"#).unwrap();
        assert_eq!(msg, PushMessage::Unknown);
        assert_eq!(
            serde_json::to_string(&PushRequest::RequestState).unwrap(),
            r#"{"type":"request_state"}"#
        );
    }

    #[test]
    fn turn_requires_credentials() {
        let mut turn = IceServerConfig::stun("relay", "turn:relay.example:3478");
        turn.r#type = "turn".into();
        assert!(turn.validate().is_err());
        turn.username = Some("u".into());
        turn.credential = Some("p".into());
        assert!(turn.validate().is_ok());
    }
}
