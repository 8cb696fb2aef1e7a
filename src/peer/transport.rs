//! Граница между координатором и real-time стеком
//!
//! Колбэки транспорта не трогают состояние напрямую: каждое событие
//! превращается в `TransportEvent` и уходит в inbox управляющего цикла.

use crate::error::Result;
use crate::media::MediaHandle;
use crate::peer::types::{ConnectionStatus, IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Идентификатор поколения сессии; события от старых сессий отбрасываются
pub type SessionId = u64;

/// Состояние соединения, как его сообщает транспорт
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// Проекция на словарь UI `{connecting, connected, disconnected}`
    pub fn as_status(self) -> ConnectionStatus {
        match self {
            LinkState::New | LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Connected => ConnectionStatus::Connected,
            LinkState::Disconnected | LinkState::Failed | LinkState::Closed => {
                ConnectionStatus::Disconnected
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    State(LinkState),
}

/// Событие транспорта, адресованное конкретной сессии слота
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub slot: String,
    pub session_id: SessionId,
    pub kind: TransportEventKind,
}

/// Отправитель событий, который получает транспорт при создании
#[derive(Debug, Clone)]
pub struct TransportEvents {
    slot: String,
    session_id: SessionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    pub fn new(
        slot: impl Into<String>,
        session_id: SessionId,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            slot: slot.into(),
            session_id,
            tx,
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn send(&self, kind: TransportEventKind) {
        // управляющий цикл мог уже завершиться
        let _ = self.tx.send(TransportEvent {
            slot: self.slot.clone(),
            session_id: self.session_id,
            kind,
        });
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.send(TransportEventKind::LocalCandidate(candidate));
    }

    pub fn gathering_complete(&self) {
        self.send(TransportEventKind::GatheringComplete);
    }

    pub fn state_changed(&self, state: LinkState) {
        self.send(TransportEventKind::State(state));
    }
}

/// Одно peer-соединение, принадлежащее сессии
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Применяет offer сервера как remote description
    async fn apply_offer(&self, offer: &SessionDescription) -> Result<()>;

    /// Создаёт answer и ставит его как local description
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Снимок выбранной пары перед обработкой сбоя; по умолчанию ничего
    async fn dump_stats(&self, _moment: &str) {}

    async fn close(&self) -> Result<()>;
}

/// Фабрика транспортов; медиа-треки берутся из `MediaHandle`
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        media: &MediaHandle,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>>;
}
