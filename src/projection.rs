//! Наблюдатель для UI: координатор отдаёт события, UI сам решает как рисовать

use crate::error::CoordinatorError;
use crate::peer::state::SlotStatus;
use crate::peer::types::{ChatState, ConnectionStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Слоты, которые знает сервер
pub const KNOWN_STREAMS: [&str; 7] = [
    "board", "gm", "player_1", "player_2", "player_3", "player_4", "player_5",
];

pub const BOARD_STREAM: &str = "board";

/// Какой механизм сейчас держит снимок сервера актуальным
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Push,
    Polling,
    Reconnecting,
    Stopped,
}

/// Все методы по умолчанию пустые
pub trait Projection: Send + Sync {
    fn slot_status(&self, _slot: &str, _status: SlotStatus) {}

    /// Состояние транспорта в словаре `{connecting, connected, disconnected}`
    fn link_status(&self, _slot: &str, _status: ConnectionStatus) {}

    fn snapshot_changed(&self, _snapshot: &ChatState) {}

    fn channel_status(&self, _status: ChannelStatus) {}

    /// Ошибка open, показывается пользователю один раз
    fn error(&self, _slot: &str, _error: &CoordinatorError) {}
}

pub struct NullProjection;

impl Projection for NullProjection {}

/// Всё пишет в лог
pub struct LogProjection;

impl Projection for LogProjection {
    fn slot_status(&self, slot: &str, status: SlotStatus) {
        info!(slot, %status, "slot status");
    }

    fn link_status(&self, slot: &str, status: ConnectionStatus) {
        info!(slot, %status, "link status");
    }

    fn snapshot_changed(&self, snapshot: &ChatState) {
        info!(streams = snapshot.streams.len(), "server snapshot replaced");
    }

    fn channel_status(&self, status: ChannelStatus) {
        info!(?status, "state channel");
    }

    fn error(&self, slot: &str, error: &CoordinatorError) {
        warn!(slot, "open failed: {error}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    Connect,
    Wait,
    Disconnect,
}

/// Представление одного слота для кнопки/индикатора
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub name: String,
    pub is_board: bool,
    /// Статус по мнению сервера
    pub reported: ConnectionStatus,
    /// Локальный статус, если этот участник держит слот
    pub local: Option<SlotStatus>,
    pub action: ButtonAction,
    pub label: &'static str,
    pub status_text: String,
    pub enabled: bool,
}

/// Снимок сервера + локальные статусы → кнопки.
/// Известные слоты идут первыми, затем всё что сообщил сервер сверх них
pub fn reconcile(snapshot: &ChatState, local: &BTreeMap<String, SlotStatus>) -> Vec<SlotView> {
    let mut names: Vec<String> = KNOWN_STREAMS.iter().map(|s| s.to_string()).collect();
    let mut extra: Vec<&String> = snapshot
        .streams
        .keys()
        .chain(local.keys())
        .filter(|n| !KNOWN_STREAMS.contains(&n.as_str()))
        .collect();
    extra.sort();
    extra.dedup();
    names.extend(extra.into_iter().cloned());

    names
        .into_iter()
        .map(|name| {
            let reported = snapshot.status_of(&name);
            let local_status = local.get(&name).copied().filter(|s| s.is_active());
            view_for(name, reported, local_status)
        })
        .collect()
}

fn view_for(name: String, reported: ConnectionStatus, local: Option<SlotStatus>) -> SlotView {
    // локальное состояние важнее: сервер подтверждает с задержкой
    let effective = match local {
        Some(status) => status.as_link_status(),
        None => reported,
    };

    let (action, label) = match (local, effective) {
        (Some(SlotStatus::Closing), _) | (Some(SlotStatus::Failed), _) => {
            (ButtonAction::Wait, "Closing...")
        }
        (_, ConnectionStatus::Connecting) => (ButtonAction::Wait, "Connecting..."),
        (_, ConnectionStatus::Connected) => (ButtonAction::Disconnect, "Disconnect"),
        (_, ConnectionStatus::Disconnected) => (ButtonAction::Connect, "Connect"),
    };

    let status_text = match local {
        Some(status) => format!("{effective} ({status})"),
        None => effective.to_string(),
    };

    SlotView {
        is_board: name == BOARD_STREAM,
        name,
        reported,
        local,
        action,
        label,
        status_text,
        enabled: action != ButtonAction::Wait,
    }
}
