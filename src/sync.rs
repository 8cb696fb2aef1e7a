//! Зеркало серверного состояния слотов
//!
//! Основной путь: push-канал `/ws` с переподключением через фиксированную паузу.
//! Если канал не поднимается, работает опрос `/chat_state`, пока канал не вернётся.
//! Одновременно активен только один из двух механизмов.

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::peer::types::{ChatState, PushMessage, PushRequest};
use crate::projection::{ChannelStatus, Projection};
use crate::signaling::SignalingApi;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Открытая подписка на push-канал
#[async_trait]
pub trait PushSubscription: Send {
    /// `None` когда сервер закрыл канал
    async fn next(&mut self) -> Option<Result<PushMessage>>;
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushSubscription>>;
}

/// Push-канал поверх tokio-tungstenite
pub struct WsPushConnector {
    url: Url,
}

impl WsPushConnector {
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        Ok(Self {
            url: config.ws_url()?,
        })
    }
}

struct WsSubscription {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self) -> Result<Box<dyn PushSubscription>> {
        let (mut stream, _) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, "push channel connected");

        // просим полный снимок сразу
        let hello = serde_json::to_string(&PushRequest::RequestState)?;
        stream.send(Message::Text(hello)).await?;
        Ok(Box::new(WsSubscription { stream }))
    }
}

#[async_trait]
impl PushSubscription for WsSubscription {
    async fn next(&mut self) -> Option<Result<PushMessage>> {
        loop {
            let text = match self.stream.next().await? {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            };
            return Some(serde_json::from_str(&text).map_err(CoordinatorError::from));
        }
    }
}

enum PumpEnd {
    Stopped,
    Lost(String),
}

struct Worker {
    connector: Arc<dyn PushConnector>,
    signaling: Arc<dyn SignalingApi>,
    projection: Arc<dyn Projection>,
    snapshot: watch::Sender<ChatState>,
    status: watch::Sender<ChannelStatus>,
    stop: watch::Receiver<bool>,
    reconnect_delay: Duration,
    poll_interval: Duration,
}

async fn wait_stop(stop: &mut watch::Receiver<bool>) {
    // отправитель уничтожен = тоже стоп
    let _ = stop.wait_for(|s| *s).await;
}

impl Worker {
    async fn run(mut self) {
        let mut pending: Option<Box<dyn PushSubscription>> = None;

        loop {
            let attempt = match pending.take() {
                Some(sub) => Ok(sub),
                None => self.connector.connect().await,
            };

            match attempt {
                Ok(sub) => {
                    self.set_status(ChannelStatus::Push);
                    self.refresh().await;
                    match self.pump(sub).await {
                        PumpEnd::Stopped => break,
                        PumpEnd::Lost(reason) => {
                            let err = CoordinatorError::ChannelLost(reason);
                            warn!("{err}; reconnecting in {:?}", self.reconnect_delay);
                            self.set_status(ChannelStatus::Reconnecting);
                            if self.pause(self.reconnect_delay).await {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("push channel unavailable ({e}), falling back to polling");
                    self.set_status(ChannelStatus::Polling);
                    match self.poll_until_reconnected().await {
                        Some(sub) => pending = Some(sub),
                        None => break,
                    }
                }
            }
        }

        self.set_status(ChannelStatus::Stopped);
        info!("state sync stopped");
    }

    fn set_status(&self, status: ChannelStatus) {
        if *self.status.borrow() == status {
            return;
        }
        self.status.send_replace(status);
        self.projection.channel_status(status);
    }

    /// Снимок заменяется целиком, без слияния
    fn replace(&self, state: ChatState) {
        self.projection.snapshot_changed(&state);
        self.snapshot.send_replace(state);
    }

    async fn refresh(&self) {
        match self.signaling.fetch_state().await {
            Ok(state) => self.replace(state),
            Err(e) => warn!("state fetch failed: {e}"),
        }
    }

    /// true если пришёл стоп
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = wait_stop(&mut self.stop) => true,
        }
    }

    async fn pump(&mut self, mut sub: Box<dyn PushSubscription>) -> PumpEnd {
        loop {
            let msg = tokio::select! {
                biased;
                _ = wait_stop(&mut self.stop) => return PumpEnd::Stopped,
                msg = sub.next() => msg,
            };
            match msg {
                Some(Ok(PushMessage::StateUpdate { state })) => self.replace(state),
                Some(Ok(PushMessage::Pong)) => {}
                Some(Ok(PushMessage::Unknown)) => debug!("unknown push message ignored"),
                Some(Err(CoordinatorError::Json(e))) => warn!("malformed push message: {e}"),
                Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                None => return PumpEnd::Lost("closed by server".into()),
            }
        }
    }

    /// Опрос снимка каждые `poll_interval`; раз в `reconnect_delay` пробуем канал
    async fn poll_until_reconnected(&mut self) -> Option<Box<dyn PushSubscription>> {
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry = interval_at(Instant::now() + self.reconnect_delay, self.reconnect_delay);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_stop(&mut self.stop) => return None,
                _ = poll.tick() => self.refresh().await,
                _ = retry.tick() => match self.connector.connect().await {
                    Ok(sub) => {
                        info!("push channel is back, polling stops");
                        return Some(sub);
                    }
                    Err(e) => debug!("push channel still unavailable: {e}"),
                },
            }
        }
    }
}

/// Handle канала синхронизации; снимок доступен только на чтение
pub struct StateSync {
    snapshot: watch::Receiver<ChatState>,
    status: watch::Receiver<ChannelStatus>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl StateSync {
    pub fn spawn(
        config: &CoordinatorConfig,
        connector: Arc<dyn PushConnector>,
        signaling: Arc<dyn SignalingApi>,
        projection: Arc<dyn Projection>,
    ) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(ChatState::default());
        let (status_tx, status) = watch::channel(ChannelStatus::Reconnecting);
        let (stop, stop_rx) = watch::channel(false);

        let worker = Worker {
            connector,
            signaling,
            projection,
            snapshot: snapshot_tx,
            status: status_tx,
            stop: stop_rx,
            reconnect_delay: config.reconnect_delay,
            poll_interval: config.state_poll_interval,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            snapshot,
            status,
            stop,
            handle,
        }
    }

    pub fn snapshot(&self) -> ChatState {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.snapshot.clone()
    }

    pub fn channel_status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Останавливает и канал, и опрос
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
