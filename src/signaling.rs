//! HTTP сигналинг: offer, answer, ICE кандидаты, закрытие, снимок состояния

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::peer::types::{
    Ack, CandidateBatch, ChatState, IceCandidate, OfferResponse, SessionDescription,
};
use crate::utils::endpoint_url;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Запрос/ответ протокол с сервером; без собственного состояния
#[async_trait]
pub trait SignalingApi: Send + Sync {
    /// GET `/chat_state`
    async fn fetch_state(&self) -> Result<ChatState>;

    /// POST `/request_connection/{name}`
    async fn request_offer(&self, slot: &str) -> Result<SessionDescription>;

    /// POST `/webrtc_answer/{name}`
    async fn post_answer(&self, slot: &str, answer: &SessionDescription) -> Result<()>;

    /// POST `/ice_candidate/{name}`
    async fn post_local_candidate(&self, slot: &str, candidate: &IceCandidate) -> Result<()>;

    /// GET `/ice_candidates/{name}`
    async fn poll_remote_candidates(&self, slot: &str) -> Result<Vec<IceCandidate>>;

    /// POST `/close_connection/{name}`
    async fn request_close(&self, slot: &str) -> Result<()>;
}

/// Offer приходит JSON-строкой внутри JSON
pub fn decode_offer(resp: &OfferResponse) -> Result<SessionDescription> {
    let offer: SessionDescription = serde_json::from_str(&resp.offer_sdp).map_err(|e| {
        CoordinatorError::SignalingUnavailable(format!("malformed offer_sdp: {e}"))
    })?;
    if !offer.is_offer() {
        return Err(CoordinatorError::SignalingUnavailable(format!(
            "expected offer, server sent {}",
            offer.kind
        )));
    }
    Ok(offer)
}

/// Реализация поверх reqwest
pub struct HttpSignaling {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignaling {
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.server_url.clone(),
        })
    }

    fn url(&self, path: &str, slot: Option<&str>) -> String {
        endpoint_url(&self.base_url, path, slot)
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        what: &str,
        resp: reqwest::Response,
    ) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            return Err(CoordinatorError::SignalingUnavailable(format!(
                "{what} failed with {status}"
            )));
        }
        resp.json::<T>().await.map_err(|e| {
            CoordinatorError::SignalingUnavailable(format!("{what}: invalid payload: {e}"))
        })
    }

    async fn read_ack(&self, what: &str, resp: reqwest::Response) -> Result<()> {
        let ack: Ack = self.read_json(what, resp).await?;
        if ack.is_error() {
            return Err(CoordinatorError::SignalingUnavailable(format!(
                "{what} rejected: {}",
                ack.message.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingApi for HttpSignaling {
    async fn fetch_state(&self) -> Result<ChatState> {
        let resp = self.client.get(self.url("chat_state", None)).send().await?;
        self.read_json("chat_state", resp).await
    }

    async fn request_offer(&self, slot: &str) -> Result<SessionDescription> {
        debug!(slot, "requesting offer");
        let resp = self
            .client
            .post(self.url("request_connection", Some(slot)))
            .send()
            .await?;
        let body: OfferResponse = self.read_json("request_connection", resp).await?;
        decode_offer(&body)
    }

    async fn post_answer(&self, slot: &str, answer: &SessionDescription) -> Result<()> {
        debug!(slot, "posting answer");
        let resp = self
            .client
            .post(self.url("webrtc_answer", Some(slot)))
            .json(answer)
            .send()
            .await?;
        self.read_ack("webrtc_answer", resp).await
    }

    async fn post_local_candidate(&self, slot: &str, candidate: &IceCandidate) -> Result<()> {
        let resp = self
            .client
            .post(self.url("ice_candidate", Some(slot)))
            .json(candidate)
            .send()
            .await?;
        self.read_ack("ice_candidate", resp).await
    }

    async fn poll_remote_candidates(&self, slot: &str) -> Result<Vec<IceCandidate>> {
        let resp = self
            .client
            .get(self.url("ice_candidates", Some(slot)))
            .send()
            .await?;
        let batch: CandidateBatch = self.read_json("ice_candidates", resp).await?;
        if batch.status.as_deref() == Some("error") {
            warn!(slot, message = ?batch.message, "server refused candidate poll");
            return Err(CoordinatorError::SignalingUnavailable(
                batch.message.unwrap_or_else(|| "ice_candidates error".into()),
            ));
        }
        Ok(batch.candidates)
    }

    async fn request_close(&self, slot: &str) -> Result<()> {
        debug!(slot, "requesting close");
        let resp = self
            .client
            .post(self.url("close_connection", Some(slot)))
            .send()
            .await?;
        self.read_ack("close_connection", resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    /// Минимальный HTTP/1.1 сервер: на каждый запрос отдаёт следующий ответ из списка
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_srv = seen.clone();

        tokio::spawn(async move {
            for (code, body) in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let request = read_request(&mut sock).await;
                seen_srv.lock().await.push(request);
                let reply = format!(
                    "HTTP/1.1 {code} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                sock.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        (format!("http://{addr}"), seen)
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    fn client(base: String) -> HttpSignaling {
        HttpSignaling::new(&CoordinatorConfig {
            server_url: base,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn offer_string_is_decoded() {
        let resp = OfferResponse {
            offer_sdp: r#"{"type": "offer", "sdp": "v=0\r\n"}"#.into(),
        };
        assert_eq!(decode_offer(&resp).unwrap(), SessionDescription::offer("v=0\r\n"));

        let wrong = OfferResponse {
            offer_sdp: r#"{"type": "answer", "sdp": "v=0"}"#.into(),
        };
        assert!(matches!(
            decode_offer(&wrong),
            Err(CoordinatorError::SignalingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn request_offer_hits_slot_endpoint() {
        let (base, seen) = serve(vec![(
            200,
            r#"{"offer_sdp": "{\"type\": \"offer\", \"sdp\": \"v=0\"}"}"#,
        )])
        .await;
        let offer = client(base).request_offer("gm").await.unwrap();
        assert_eq!(offer.sdp, "v=0");
        assert!(seen.lock().await[0].starts_with("POST /request_connection/gm "));
    }

    #[tokio::test]
    async fn non_2xx_is_signaling_unavailable() {
        let (base, _) = serve(vec![(500, r#"{"detail": "boom"}"#)]).await;
        let err = client(base).request_offer("gm").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::SignalingUnavailable(_)));
    }

    #[tokio::test]
    async fn error_status_in_body_fails_answer() {
        let (base, seen) = serve(vec![(
            200,
            r#"{"status": "error", "message": "No peer connection found for stream: gm"}"#,
        )])
        .await;
        let err = client(base)
            .post_answer("gm", &SessionDescription::answer("v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::SignalingUnavailable(_)));
        let req = seen.lock().await[0].clone();
        assert!(req.starts_with("POST /webrtc_answer/gm "));
        assert!(req.contains(r#""type":"answer""#));
    }

    #[tokio::test]
    async fn polls_candidates_and_state() {
        let (base, _) = serve(vec![
            (
                200,
                r#"{"status": "success", "candidates": [{"candidate": "candidate:1 1 udp 1 10.0.0.1 4000 typ host", "sdpMLineIndex": 0, "sdpMid": "0"}]}"#,
            ),
            (200, r#"{"streams": {"gm": {"name": "gm", "connected": "connected"}}}"#),
        ])
        .await;
        let api = client(base);
        let cands = api.poll_remote_candidates("gm").await.unwrap();
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].sdp_mid.as_deref(), Some("0"));

        let state = api.fetch_state().await.unwrap();
        assert_eq!(
            state.status_of("gm"),
            crate::peer::types::ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_signaling_unavailable() {
        // порт занят и сразу освобождён: соединение будет отклонено
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(format!("http://{addr}"))
            .request_close("gm")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::SignalingUnavailable(_)));
    }
}
