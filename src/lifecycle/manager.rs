use super::{Command, OpenOutcome};
use crate::error::{CoordinatorError, Result};
use crate::logger::analyze_candidates;
use crate::media::{MediaGuard, MediaHandle};
use crate::peer::ice::{
    IcePoller, PollOutcome, PollerConfig, PollerEvent, PollerEventKind, RemoteDisposition,
};
use crate::peer::state::{Session, SessionRegistry, SlotStatus};
use crate::peer::transport::{
    LinkState, PeerTransport, TransportEvent, TransportEventKind, TransportEvents,
    TransportFactory,
};
use crate::peer::types::IceCandidate;
use crate::projection::Projection;
use crate::signaling::SignalingApi;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Автомат слотов. Живёт в одной задаче и владеет реестром целиком
pub(crate) struct LifecycleManager {
    registry: SessionRegistry,
    media: MediaGuard,
    signaling: Arc<dyn SignalingApi>,
    transports: Arc<dyn TransportFactory>,
    projection: Arc<dyn Projection>,
    poller_config: PollerConfig,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    poller_tx: mpsc::UnboundedSender<PollerEvent>,
}

pub(crate) struct Inbox {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub transport: mpsc::UnboundedReceiver<TransportEvent>,
    pub poller: mpsc::UnboundedReceiver<PollerEvent>,
}

impl LifecycleManager {
    pub(crate) fn new(
        media: MediaGuard,
        signaling: Arc<dyn SignalingApi>,
        transports: Arc<dyn TransportFactory>,
        projection: Arc<dyn Projection>,
        poller_config: PollerConfig,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> (Self, Inbox) {
        let (transport_tx, transport) = mpsc::unbounded_channel();
        let (poller_tx, poller) = mpsc::unbounded_channel();
        let manager = Self {
            registry: SessionRegistry::new(),
            media,
            signaling,
            transports,
            projection,
            poller_config,
            transport_tx,
            poller_tx,
        };
        let inbox = Inbox {
            commands,
            transport,
            poller,
        };
        (manager, inbox)
    }

    /// Управляющий цикл: одно сообщение за раз, до конца
    pub(crate) async fn run(mut self, mut inbox: Inbox) {
        info!("lifecycle loop started");
        loop {
            tokio::select! {
                biased;
                cmd = inbox.commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.close_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        self.close_all().await;
                        break;
                    }
                },
                Some(evt) = inbox.transport.recv() => self.on_transport_event(evt).await,
                Some(evt) = inbox.poller.recv() => self.on_poller_event(evt).await,
            }
        }
        info!("lifecycle loop stopped");
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open { slot, reply } => {
                let res = self.open(&slot).await;
                let _ = reply.send(res);
            }
            Command::Close { slot, reply } => {
                self.close(&slot).await;
                let _ = reply.send(());
            }
            Command::CloseAll { reply } => {
                self.close_all().await;
                let _ = reply.send(());
            }
            Command::Status { slot, reply } => {
                let _ = reply.send(self.registry.status(&slot));
            }
            Command::Statuses { reply } => {
                let _ = reply.send(self.registry.statuses());
            }
            Command::MediaHeld { reply } => {
                let _ = reply.send(self.media.is_held());
            }
            // обрабатывается в run
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn set_status(&mut self, slot: &str, to: SlotStatus) -> bool {
        match self.registry.transition(slot, to) {
            Ok(from) => {
                debug!(slot, %from, %to, "slot transition");
                self.projection.slot_status(slot, to);
                true
            }
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    // ========== OPEN ==========

    async fn open(&mut self, slot: &str) -> Result<OpenOutcome> {
        let current = self.registry.status(slot);
        if current.is_active() {
            info!(slot, %current, "slot already active, open ignored");
            return Ok(OpenOutcome::Ignored);
        }

        // close-before-open: старый слот полностью закрыт до начала нового
        if let Some(other) = self.registry.active().map(str::to_string) {
            info!(slot, previous = %other, "closing previous slot first");
            self.close(&other).await;
        }

        if !self.set_status(slot, SlotStatus::Connecting) {
            return Err(CoordinatorError::TransportFailure(format!(
                "slot {slot} could not enter connecting"
            )));
        }

        match self.establish(slot).await {
            Ok(()) => Ok(OpenOutcome::Opened),
            Err(e) => {
                warn!(slot, "open failed: {e}");
                self.fail(slot, &e).await;
                Err(e)
            }
        }
    }

    async fn establish(&mut self, slot: &str) -> Result<()> {
        let media = self.media.acquire(slot).await?;
        self.set_status(slot, SlotStatus::Signaling);
        self.negotiate(slot, media, false).await?;
        self.set_status(slot, SlotStatus::Connected);
        self.start_poller(slot);
        Ok(())
    }

    /// offer → transport → answer. Сессия ставится в слот сразу после создания транспорта,
    /// чтобы при ошибке дальше её было что закрыть
    async fn negotiate(&mut self, slot: &str, media: MediaHandle, renegotiated: bool) -> Result<()> {
        let offer = self.signaling.request_offer(slot).await?;

        let session_id = self.registry.next_session_id();
        let events = TransportEvents::new(slot, session_id, self.transport_tx.clone());
        let transport = self.transports.create(&media, events).await?;

        let mut session = Session::new(session_id, transport.clone(), media);
        session.renegotiated = renegotiated;
        self.registry.install_session(slot, session);
        info!(slot, session = session_id, renegotiated, "session created");

        transport.apply_offer(&offer).await?;
        let pending = match self.registry.session_mut(slot) {
            Some(session) => session.candidates.mark_remote_description_set(),
            None => Vec::new(),
        };
        for candidate in pending {
            apply_remote(slot, &*transport, &candidate).await;
        }

        let answer = transport.create_answer().await?;
        self.signaling.post_answer(slot, &answer).await?;
        info!(slot, session = session_id, "answer accepted by server");
        Ok(())
    }

    fn start_poller(&mut self, slot: &str) {
        let signaling = self.signaling.clone();
        let out = self.poller_tx.clone();
        let config = self.poller_config;
        if let Some(session) = self.registry.session_mut(slot) {
            let link = session.link.subscribe();
            session.poller = Some(IcePoller::spawn(
                slot.to_string(),
                session.id,
                signaling,
                link,
                out,
                config,
            ));
        }
    }

    /// Failed → очистка → Idle; ошибка показывается один раз.
    /// Сервер уведомляется, если слот дошёл до signaling: offer мог уже создать peer на сервере
    async fn fail(&mut self, slot: &str, err: &CoordinatorError) {
        let engaged = matches!(
            self.registry.status(slot),
            SlotStatus::Signaling | SlotStatus::Connected
        );
        self.set_status(slot, SlotStatus::Failed);
        self.teardown_session(slot).await;
        if engaged {
            self.notify_close(slot).await;
        }
        self.media.release(slot).await;
        self.set_status(slot, SlotStatus::Idle);
        if err.is_user_visible() {
            self.projection.error(slot, err);
        }
    }

    // ========== CLOSE ==========

    async fn close(&mut self, slot: &str) {
        let status = self.registry.status(slot);
        if !status.is_active() {
            debug!(slot, "close on idle slot ignored");
            return;
        }

        self.set_status(slot, SlotStatus::Closing);
        self.teardown_session(slot).await;
        self.notify_close(slot).await;
        self.media.release(slot).await;
        self.set_status(slot, SlotStatus::Idle);
        self.projection
            .link_status(slot, SlotStatus::Idle.as_link_status());
        info!(slot, "slot closed");
    }

    async fn close_all(&mut self) {
        while let Some(slot) = self.registry.active().map(str::to_string) {
            self.close(&slot).await;
        }
    }

    /// Закрывает сессию слота, если она есть: опросчик, затем транспорт
    async fn teardown_session(&mut self, slot: &str) {
        let Some(mut session) = self.registry.take_session(slot) else {
            return;
        };
        session.cancel_poller();
        if let Err(e) = session.transport.close().await {
            warn!(slot, session = session.id, "transport close failed: {e}");
        }
        debug!(slot, session = session.id, "session torn down");
    }

    /// Best-effort: ошибка только в лог
    async fn notify_close(&self, slot: &str) {
        if let Err(e) = self.signaling.request_close(slot).await {
            warn!(slot, "close notification failed: {e}");
        }
    }

    // ========== TRANSPORT EVENTS ==========

    async fn on_transport_event(&mut self, evt: TransportEvent) {
        let slot = evt.slot.as_str();
        let signaling = self.signaling.clone();
        let Some(session) = self.registry.current_session(slot, evt.session_id) else {
            debug!(slot, session = evt.session_id, "stale transport event dropped");
            return;
        };

        match evt.kind {
            TransportEventKind::LocalCandidate(candidate) => {
                if candidate.is_end_of_candidates() || !session.candidates.record_local(&candidate) {
                    return;
                }
                let slot = slot.to_string();
                tokio::spawn(async move {
                    if let Err(e) = signaling.post_local_candidate(&slot, &candidate).await {
                        warn!(slot, "local candidate dropped: {e}");
                    }
                });
            }
            TransportEventKind::GatheringComplete => {
                analyze_candidates(slot, session.candidates.local());
            }
            TransportEventKind::State(state) => {
                session.link.send_replace(state);
                self.projection.link_status(slot, state.as_status());
                match state {
                    LinkState::Connected => info!(slot, "transport connected"),
                    LinkState::Failed => self.on_transport_failure(&evt.slot).await,
                    other => debug!(slot, "transport state {:?}", other),
                }
            }
        }
    }

    /// Один повтор согласования, затем Failed
    async fn on_transport_failure(&mut self, slot: &str) {
        let (transport, renegotiated) = match self.registry.session_mut(slot) {
            Some(session) => (session.transport.clone(), session.renegotiated),
            None => return,
        };
        transport.dump_stats("BEFORE-FAIL").await;

        if renegotiated {
            let err =
                CoordinatorError::TransportFailure("transport failed after renegotiation".into());
            warn!(slot, "{err}");
            self.fail(slot, &err).await;
            return;
        }

        warn!(slot, "transport failed, renegotiating once");
        if !self.set_status(slot, SlotStatus::Signaling) {
            return;
        }
        let media = match self.registry.session_mut(slot) {
            Some(session) => session.media.clone(),
            None => return,
        };
        self.teardown_session(slot).await;

        match self.negotiate(slot, media, true).await {
            Ok(()) => {
                self.set_status(slot, SlotStatus::Connected);
                self.start_poller(slot);
            }
            Err(e) => {
                let err = CoordinatorError::TransportFailure(format!("renegotiation failed: {e}"));
                warn!(slot, "{err}");
                self.fail(slot, &err).await;
            }
        }
    }

    // ========== POLLER EVENTS ==========

    async fn on_poller_event(&mut self, evt: PollerEvent) {
        let slot = evt.slot.as_str();
        let Some(session) = self.registry.current_session(slot, evt.session_id) else {
            return;
        };

        match evt.kind {
            PollerEventKind::Candidates(candidates) => {
                let transport = session.transport.clone();
                let mut to_apply = Vec::new();
                for candidate in candidates {
                    if candidate.is_end_of_candidates() {
                        continue;
                    }
                    match session.candidates.accept_remote(&candidate) {
                        RemoteDisposition::Apply => to_apply.push(candidate),
                        RemoteDisposition::Queued => debug!(slot, "remote candidate queued"),
                        RemoteDisposition::Duplicate => {}
                    }
                }
                for candidate in to_apply {
                    apply_remote(slot, &*transport, &candidate).await;
                }
            }
            PollerEventKind::Finished(outcome) => {
                session.poller = None;
                match outcome {
                    PollOutcome::Exhausted { attempts }
                        if *session.link.borrow() != LinkState::Connected =>
                    {
                        warn!(slot, attempts, "candidate polling exhausted before transport connected");
                    }
                    _ => debug!(slot, "candidate polling done: {:?}", outcome),
                }
            }
        }
    }
}

async fn apply_remote(slot: &str, transport: &dyn PeerTransport, candidate: &IceCandidate) {
    match transport.add_remote_candidate(candidate).await {
        Ok(()) => debug!(slot, candidate = %candidate.candidate, "remote candidate applied"),
        Err(e) => warn!(slot, "failed to apply remote candidate: {e}"),
    }
}
