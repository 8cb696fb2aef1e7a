use crate::peer::transport::{LinkState, SessionId};
use crate::peer::types::IceCandidate;
use crate::signaling::SignalingApi;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Что делать с пришедшим удалённым кандидатом
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDisposition {
    /// Уже применялся, пропускаем
    Duplicate,
    /// Remote description ещё не установлен, кандидат отложен
    Queued,
    Apply,
}

/// Кандидаты одной сессии: только добавление, дедупликация по строке кандидата
#[derive(Debug, Default)]
pub struct CandidateLedger {
    local: Vec<IceCandidate>,
    local_seen: HashSet<String>,
    remote: Vec<IceCandidate>,
    remote_seen: HashSet<String>,
    pending: Vec<IceCandidate>,
    remote_description_set: bool,
}

impl CandidateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// true, если кандидат новый
    pub fn record_local(&mut self, candidate: &IceCandidate) -> bool {
        if !self.local_seen.insert(candidate.candidate.clone()) {
            return false;
        }
        self.local.push(candidate.clone());
        true
    }

    pub fn accept_remote(&mut self, candidate: &IceCandidate) -> RemoteDisposition {
        if !self.remote_seen.insert(candidate.candidate.clone()) {
            return RemoteDisposition::Duplicate;
        }
        self.remote.push(candidate.clone());
        if self.remote_description_set {
            RemoteDisposition::Apply
        } else {
            self.pending.push(candidate.clone());
            RemoteDisposition::Queued
        }
    }

    /// Отмечает установку remote description и отдаёт отложенных кандидатов
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        self.pending.drain(..).collect()
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn local(&self) -> &[IceCandidate] {
        &self.local
    }

    pub fn remote(&self) -> &[IceCandidate] {
        &self.remote
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Почему опрос закончился
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Транспорт сообщил connected
    Connected { attempts: u32 },
    /// Достигнут потолок попыток
    Exhausted { attempts: u32 },
    /// Сессия исчезла
    Cancelled { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollerEventKind {
    Candidates(Vec<IceCandidate>),
    Finished(PollOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerEvent {
    pub slot: String,
    pub session_id: SessionId,
    pub kind: PollerEventKind,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Опрос удалённых кандидатов одной сессии. Drop отменяет задачу
pub struct IcePoller {
    handle: Option<JoinHandle<()>>,
}

impl IcePoller {
    pub fn spawn(
        slot: String,
        session_id: SessionId,
        signaling: Arc<dyn SignalingApi>,
        link: watch::Receiver<LinkState>,
        out: mpsc::UnboundedSender<PollerEvent>,
        config: PollerConfig,
    ) -> Self {
        let handle = tokio::spawn(run_poller(slot, session_id, signaling, link, out, config));
        Self {
            handle: Some(handle),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for IcePoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_poller(
    slot: String,
    session_id: SessionId,
    signaling: Arc<dyn SignalingApi>,
    mut link: watch::Receiver<LinkState>,
    out: mpsc::UnboundedSender<PollerEvent>,
    config: PollerConfig,
) {
    let mut attempts = 0u32;

    let outcome = loop {
        if *link.borrow() == LinkState::Connected {
            break PollOutcome::Connected { attempts };
        }
        if attempts >= config.max_attempts {
            break PollOutcome::Exhausted { attempts };
        }

        tokio::select! {
            _ = sleep(config.interval) => {}
            res = link.wait_for(|s| *s == LinkState::Connected) => {
                break match res {
                    Ok(_) => PollOutcome::Connected { attempts },
                    Err(_) => PollOutcome::Cancelled { attempts },
                };
            }
        }

        attempts += 1;
        match signaling.poll_remote_candidates(&slot).await {
            Ok(candidates) if !candidates.is_empty() => {
                debug!(slot, attempt = attempts, count = candidates.len(), "remote candidates polled");
                let evt = PollerEvent {
                    slot: slot.clone(),
                    session_id,
                    kind: PollerEventKind::Candidates(candidates),
                };
                if out.send(evt).is_err() {
                    break PollOutcome::Cancelled { attempts };
                }
            }
            Ok(_) => {}
            Err(e) => warn!(slot, attempt = attempts, "candidate poll failed: {e}"),
        }
    };

    info!(slot, session = session_id, "ICE poller finished: {:?}", outcome);
    let _ = out.send(PollerEvent {
        slot,
        session_id,
        kind: PollerEventKind::Finished(outcome),
    });
}
