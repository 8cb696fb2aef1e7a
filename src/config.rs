// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::peer::types::IceServerConfig;
use serde::Deserialize;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Фильтр tracing по умолчанию, если RUST_LOG не задан
pub const DEFAULT_LOG_FILTER: &str = "slotcast_lib=info";

/// Интервал опроса удалённых ICE кандидатов
pub const ICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Потолок попыток опроса кандидатов на одну сессию
pub const ICE_POLL_MAX_ATTEMPTS: u32 = 30;

/// Задержка перед переподключением push-канала
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Интервал fallback-опроса /chat_state
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Настройки координатора
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Базовый URL сервера, например `http://127.0.0.1:8000`
    pub server_url: String,
    /// Путь push-канала на том же хосте
    pub ws_path: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_poll_interval: Duration,
    pub ice_poll_max_attempts: u32,
    pub reconnect_delay: Duration,
    pub state_poll_interval: Duration,
    /// Таймаут одного HTTP-запроса сигналинга
    pub request_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            ws_path: "/ws".into(),
            ice_servers: IceServerConfig::defaults(),
            ice_poll_interval: ICE_POLL_INTERVAL,
            ice_poll_max_attempts: ICE_POLL_MAX_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
            state_poll_interval: STATE_POLL_INTERVAL,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordinatorConfig {
    /// Значения по умолчанию, переопределённые из окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_string("SLOTCAST_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(ms) = env_millis("SLOTCAST_ICE_POLL_MS") {
            config.ice_poll_interval = ms;
        }
        if let Some(ms) = env_millis("SLOTCAST_RECONNECT_MS") {
            config.reconnect_delay = ms;
        }
        if let Some(ms) = env_millis("SLOTCAST_STATE_POLL_MS") {
            config.state_poll_interval = ms;
        }
        config
    }

    /// URL push-канала: http(s) схема меняется на ws(s)
    pub fn ws_url(&self) -> crate::Result<url::Url> {
        crate::utils::derive_ws_url(&self.server_url, &self.ws_path)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
