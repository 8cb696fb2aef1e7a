//! Координатор жизненного цикла соединений
//!
//! `Coordinator` это дешёвый клонируемый handle. Вся логика живёт в одной
//! задаче (`LifecycleManager`), которая получает команды, события транспорта
//! и результаты опроса кандидатов как типизированные сообщения и обрабатывает
//! их строго по одному. Отсюда порядок close-before-open без блокировок.

mod manager;

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::media::{CaptureDevice, MediaGuard};
use crate::peer::connection::WebRtcTransportFactory;
use crate::peer::ice::PollerConfig;
use crate::peer::state::SlotStatus;
use crate::peer::transport::TransportFactory;
use crate::projection::Projection;
use crate::signaling::{HttpSignaling, SignalingApi};
use manager::LifecycleManager;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Результат `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Слот дошёл до connected
    Opened,
    /// Повторный вход: open этого слота уже идёт или слот уже активен
    Ignored,
}

pub(crate) enum Command {
    Open {
        slot: String,
        reply: oneshot::Sender<Result<OpenOutcome>>,
    },
    Close {
        slot: String,
        reply: oneshot::Sender<()>,
    },
    CloseAll {
        reply: oneshot::Sender<()>,
    },
    Status {
        slot: String,
        reply: oneshot::Sender<SlotStatus>,
    },
    Statuses {
        reply: oneshot::Sender<BTreeMap<String, SlotStatus>>,
    },
    MediaHeld {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Внешние участники, с которыми работает координатор
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureDevice>,
    pub signaling: Arc<dyn SignalingApi>,
    pub transports: Arc<dyn TransportFactory>,
    pub projection: Arc<dyn Projection>,
}

impl Collaborators {
    /// Боевой набор: HTTP сигналинг и webrtc-rs
    pub fn with_defaults(
        config: &CoordinatorConfig,
        capture: Arc<dyn CaptureDevice>,
        projection: Arc<dyn Projection>,
    ) -> Result<Self> {
        Ok(Self {
            capture,
            signaling: Arc::new(HttpSignaling::new(config)?),
            transports: Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone())?),
            projection,
        })
    }
}

/// Флаг «open уже идёт» для слота; снимается при drop
struct BusyGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    slot: String,
}

impl BusyGuard {
    fn claim(busy: &Arc<Mutex<HashSet<String>>>, slot: &str) -> Option<Self> {
        let mut set = busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(slot.to_string()) {
            return None;
        }
        Some(Self {
            busy: busy.clone(),
            slot: slot.to_string(),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.slot);
    }
}

#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Command>,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl Coordinator {
    /// Запускает управляющий цикл в отдельной задаче
    pub fn spawn(config: &CoordinatorConfig, deps: Collaborators) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller_config = PollerConfig {
            interval: config.ice_poll_interval,
            max_attempts: config.ice_poll_max_attempts,
        };
        let (manager, inbox) = LifecycleManager::new(
            MediaGuard::new(deps.capture),
            deps.signaling,
            deps.transports,
            deps.projection,
            poller_config,
            rx,
        );
        let handle = tokio::spawn(manager.run(inbox));
        let coordinator = Self {
            tx,
            busy: Arc::new(Mutex::new(HashSet::new())),
        };
        (coordinator, handle)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| CoordinatorError::Shutdown)?;
        rx.await.map_err(|_| CoordinatorError::Shutdown)
    }

    /// Открывает слот; другой активный слот сначала закрывается полностью
    pub async fn open(&self, slot: &str) -> Result<OpenOutcome> {
        let Some(_guard) = BusyGuard::claim(&self.busy, slot) else {
            debug!(slot, "open already in flight, ignoring re-entry");
            return Ok(OpenOutcome::Ignored);
        };
        let slot = slot.to_string();
        self.request(|reply| Command::Open { slot, reply }).await?
    }

    /// Идемпотентно: для idle слота ничего не делает
    pub async fn close(&self, slot: &str) -> Result<()> {
        let slot = slot.to_string();
        self.request(|reply| Command::Close { slot, reply }).await
    }

    pub async fn close_all(&self) -> Result<()> {
        self.request(|reply| Command::CloseAll { reply }).await
    }

    pub async fn status(&self, slot: &str) -> Result<SlotStatus> {
        let slot = slot.to_string();
        self.request(|reply| Command::Status { slot, reply }).await
    }

    pub async fn statuses(&self) -> Result<BTreeMap<String, SlotStatus>> {
        self.request(|reply| Command::Statuses { reply }).await
    }

    pub async fn active_slot(&self) -> Result<Option<String>> {
        let statuses = self.statuses().await?;
        Ok(statuses
            .into_iter()
            .find(|(_, status)| status.is_active())
            .map(|(name, _)| name))
    }

    pub async fn media_held(&self) -> Result<bool> {
        self.request(|reply| Command::MediaHeld { reply }).await
    }

    /// Закрывает всё и останавливает цикл
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
