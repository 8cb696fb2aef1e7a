use crate::media::MediaHandle;
use crate::peer::ice::{CandidateLedger, IcePoller};
use crate::peer::transport::{LinkState, PeerTransport, SessionId};
use crate::peer::types::ConnectionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

// ========== SLOT STATE MACHINE ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Idle,
    Connecting,
    Signaling,
    Connected,
    Closing,
    Failed,
}

impl SlotStatus {
    pub fn is_active(self) -> bool {
        self != SlotStatus::Idle
    }

    /// Держит ли слот в этом состоянии устройство захвата
    pub fn holds_media(self) -> bool {
        matches!(
            self,
            SlotStatus::Connecting | SlotStatus::Signaling | SlotStatus::Connected
        )
    }

    pub fn as_link_status(self) -> ConnectionStatus {
        match self {
            SlotStatus::Connecting | SlotStatus::Signaling => ConnectionStatus::Connecting,
            SlotStatus::Connected => ConnectionStatus::Connected,
            SlotStatus::Idle | SlotStatus::Closing | SlotStatus::Failed => {
                ConnectionStatus::Disconnected
            }
        }
    }

    fn can_move_to(self, to: SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Signaling)
                | (Connecting, Failed)
                | (Connecting, Closing)
                | (Signaling, Connected)
                | (Signaling, Failed)
                | (Signaling, Closing)
                // повторное согласование после сбоя транспорта
                | (Connected, Signaling)
                | (Connected, Failed)
                | (Connected, Closing)
                | (Closing, Idle)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotStatus::Idle => "idle",
            SlotStatus::Connecting => "connecting",
            SlotStatus::Signaling => "signaling",
            SlotStatus::Connected => "connected",
            SlotStatus::Closing => "closing",
            SlotStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("slot {slot}: illegal transition {from} -> {to}")]
    Illegal {
        slot: String,
        from: SlotStatus,
        to: SlotStatus,
    },

    #[error("slot {slot} cannot start while {active} is active")]
    AnotherActive { slot: String, active: String },
}

// ========== SESSION ==========

/// Живая медиа-сессия слота. Принадлежит только своему слоту
pub struct Session {
    pub id: SessionId,
    pub transport: Arc<dyn PeerTransport>,
    pub media: MediaHandle,
    pub candidates: CandidateLedger,
    /// Последнее состояние транспорта; его слушает опросчик кандидатов
    pub link: watch::Sender<LinkState>,
    pub poller: Option<IcePoller>,
    /// Повторное согласование уже было
    pub renegotiated: bool,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, transport: Arc<dyn PeerTransport>, media: MediaHandle) -> Self {
        let (link, _) = watch::channel(LinkState::New);
        Self {
            id,
            transport,
            media,
            candidates: CandidateLedger::new(),
            link,
            poller: None,
            renegotiated: false,
            opened_at: Utc::now(),
        }
    }

    pub fn cancel_poller(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.cancel();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("media", &self.media)
            .field("candidates", &self.candidates)
            .field("polling", &self.poller.is_some())
            .field("renegotiated", &self.renegotiated)
            .finish()
    }
}

#[derive(Debug)]
pub struct StreamSlot {
    pub name: String,
    pub status: SlotStatus,
    pub session: Option<Session>,
    pub created_at: DateTime<Utc>,
}

impl StreamSlot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SlotStatus::Idle,
            session: None,
            created_at: Utc::now(),
        }
    }
}

// ========== REGISTRY ==========

/// Все слоты процесса. Пишет только управляющий цикл
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: BTreeMap<String, StreamSlot>,
    next_session: SessionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Слот создаётся при первом обращении по имени
    pub fn slot(&mut self, name: &str) -> &mut StreamSlot {
        self.slots
            .entry(name.to_string())
            .or_insert_with(|| StreamSlot::new(name))
    }

    pub fn status(&self, name: &str) -> SlotStatus {
        self.slots
            .get(name)
            .map(|s| s.status)
            .unwrap_or(SlotStatus::Idle)
    }

    /// Единственный не-idle слот, если он есть
    pub fn active(&self) -> Option<&str> {
        self.slots
            .values()
            .find(|s| s.status.is_active())
            .map(|s| s.name.as_str())
    }

    pub fn active_count(&self) -> usize {
        self.slots.values().filter(|s| s.status.is_active()).count()
    }

    pub fn statuses(&self) -> BTreeMap<String, SlotStatus> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.status))
            .collect()
    }

    pub fn next_session_id(&mut self) -> SessionId {
        self.next_session += 1;
        self.next_session
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.slots.get_mut(name).and_then(|s| s.session.as_mut())
    }

    /// Сессия слота, если её id совпадает; иначе событие устарело
    pub fn current_session(&mut self, name: &str, id: SessionId) -> Option<&mut Session> {
        self.session_mut(name).filter(|s| s.id == id)
    }

    pub fn install_session(&mut self, name: &str, session: Session) -> Option<Session> {
        self.slot(name).session.replace(session)
    }

    pub fn take_session(&mut self, name: &str) -> Option<Session> {
        self.slots.get_mut(name).and_then(|s| s.session.take())
    }

    /// Переход с проверкой автомата и инварианта «не больше одного активного слота»
    pub fn transition(&mut self, name: &str, to: SlotStatus) -> Result<SlotStatus, TransitionError> {
        let from = self.status(name);
        if !from.can_move_to(to) {
            return Err(TransitionError::Illegal {
                slot: name.to_string(),
                from,
                to,
            });
        }
        if from == SlotStatus::Idle {
            if let Some(active) = self.active().filter(|a| *a != name) {
                return Err(TransitionError::AnotherActive {
                    slot: name.to_string(),
                    active: active.to_string(),
                });
            }
        }
        self.slot(name).status = to;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_created_idle_on_first_reference() {
        let mut reg = SessionRegistry::new();
        assert_eq!(reg.status("gm"), SlotStatus::Idle);
        assert!(reg.statuses().is_empty());
        let created = reg.slot("gm").created_at;
        assert!(created <= Utc::now());
        assert_eq!(reg.statuses().get("gm"), Some(&SlotStatus::Idle));
    }

    #[test]
    fn full_lifecycle_is_legal() {
        let mut reg = SessionRegistry::new();
        for to in [
            SlotStatus::Connecting,
            SlotStatus::Signaling,
            SlotStatus::Connected,
            SlotStatus::Signaling,
            SlotStatus::Connected,
            SlotStatus::Closing,
            SlotStatus::Idle,
        ] {
            reg.transition("board", to).unwrap();
        }
        assert_eq!(reg.active(), None);
    }

    #[test]
    fn rejects_illegal_moves() {
        let mut reg = SessionRegistry::new();
        assert!(matches!(
            reg.transition("gm", SlotStatus::Connected),
            Err(TransitionError::Illegal { .. })
        ));
        reg.transition("gm", SlotStatus::Connecting).unwrap();
        reg.transition("gm", SlotStatus::Failed).unwrap();
        assert!(reg.transition("gm", SlotStatus::Connected).is_err());
        reg.transition("gm", SlotStatus::Idle).unwrap();
    }

    #[test]
    fn only_one_slot_may_be_active() {
        let mut reg = SessionRegistry::new();
        reg.transition("gm", SlotStatus::Connecting).unwrap();
        let err = reg.transition("player_1", SlotStatus::Connecting).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AnotherActive {
                slot: "player_1".into(),
                active: "gm".into()
            }
        );
        assert_eq!(reg.active_count(), 1);
        assert_eq!(reg.status("player_1"), SlotStatus::Idle);
    }

    #[test]
    fn link_status_projection() {
        assert_eq!(SlotStatus::Signaling.as_link_status(), ConnectionStatus::Connecting);
        assert_eq!(SlotStatus::Connected.as_link_status(), ConnectionStatus::Connected);
        assert_eq!(SlotStatus::Failed.as_link_status(), ConnectionStatus::Disconnected);
        assert!(SlotStatus::Signaling.holds_media());
        assert!(!SlotStatus::Closing.holds_media());
    }
}
