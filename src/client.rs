//! Сборка координатора и синхронизации состояния в один объект для хоста

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::lifecycle::{Collaborators, Coordinator};
use crate::logger::init_tracing;
use crate::media::CaptureDevice;
use crate::projection::{reconcile, Projection, SlotView};
use crate::sync::{PushConnector, StateSync, WsPushConnector};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct StreamClient {
    coordinator: Coordinator,
    sync: StateSync,
    control: JoinHandle<()>,
}

impl StreamClient {
    /// HTTP сигналинг, webrtc-rs и `/ws`. Нужен запущенный tokio runtime
    pub fn start(
        config: CoordinatorConfig,
        capture: Arc<dyn CaptureDevice>,
        projection: Arc<dyn Projection>,
    ) -> Result<Self> {
        init_tracing();
        let deps = Collaborators::with_defaults(&config, capture, projection)?;
        let connector = Arc::new(WsPushConnector::new(&config)?);
        info!(server = %config.server_url, "starting stream client");
        Ok(Self::with_parts(&config, deps, connector))
    }

    pub fn with_parts(
        config: &CoordinatorConfig,
        deps: Collaborators,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let sync = StateSync::spawn(
            config,
            connector,
            deps.signaling.clone(),
            deps.projection.clone(),
        );
        let (coordinator, control) = Coordinator::spawn(config, deps);
        Self {
            coordinator,
            sync,
            control,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn sync(&self) -> &StateSync {
        &self.sync
    }

    /// Кнопки слотов: снимок сервера поверх локальных статусов
    pub async fn views(&self) -> Result<Vec<SlotView>> {
        let local = self.coordinator.statuses().await?;
        Ok(reconcile(&self.sync.snapshot(), &local))
    }

    pub async fn shutdown(self) -> Result<()> {
        self.sync.stop().await;
        let res = self.coordinator.shutdown().await;
        let _ = self.control.await;
        info!("stream client stopped");
        res
    }
}
