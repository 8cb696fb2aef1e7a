use crate::error::{CoordinatorError, Result};
use crate::peer::types::IceServerConfig;
use rand::Rng;
use url::Url;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// `{base}/{path}/{name}` с аккуратной склейкой слэшей
pub fn endpoint_url(base: &str, path: &str, name: Option<&str>) -> String {
    let mut url = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_matches('/')
    );
    if let Some(name) = name {
        url.push('/');
        url.push_str(name);
    }
    url
}

/// http → ws, https → wss; путь заменяется на `ws_path`
pub fn derive_ws_url(server_url: &str, ws_path: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| CoordinatorError::ChannelLost(format!("bad server url {server_url}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoordinatorError::ChannelLost(format!(
                "unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| CoordinatorError::ChannelLost(format!("cannot switch scheme to {scheme}")))?;
    url.set_path(ws_path);
    Ok(url)
}
