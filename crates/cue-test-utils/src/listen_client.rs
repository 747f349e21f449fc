use cue_protocol::CueFrame;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A listener connection to the server's `/api/listen` endpoint.
pub struct ListenClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

/// Build the listen URL for a set of subscription patterns.
///
/// `addr` is the server's host:port; patterns are percent-encoded into
/// repeated `name=` query values.
pub fn listen_url(addr: &str, patterns: &[&str]) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for p in patterns {
        query.append_pair("name", p);
    }
    format!("ws://{}/api/listen?{}", addr, query.finish())
}

impl ListenClient {
    /// Connect with an `Authorization: Bearer <key>` header.
    pub async fn connect(
        addr: &str,
        key: &str,
        patterns: &[&str],
    ) -> Result<Self, Box<dyn std::error::Error>> {
        use tokio_tungstenite::tungstenite::handshake::client::generate_key;
        let url = listen_url(addr, patterns);
        let uri: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
        let host = uri.host().unwrap_or("localhost").to_owned();
        let host_header = match uri.port_u16() {
            Some(p) => format!("{}:{}", host, p),
            None => host,
        };
        let request = Request::builder()
            .uri(url)
            .header("Host", host_header)
            .header("Authorization", format!("Bearer {}", key))
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Receive the next cue frame, skipping transport-level frames.
    pub async fn recv_frame(&mut self) -> Result<CueFrame, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: CueFrame = serde_json::from_str(&text)?;
                    return Ok(frame);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Receive the next frame or return `None` after `timeout`.
    ///
    /// Used by tests that assert a cue was NOT delivered.
    pub async fn recv_frame_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CueFrame>, Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv_frame()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the server to close the connection and return the close code.
    pub async fn recv_close(&mut self) -> Result<Option<u16>, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Close(frame))) => {
                    return Ok(frame.map(|f| f.code.into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    /// Send an arbitrary text frame; the server discards inbound data, so
    /// this only exercises the keepalive path.
    pub async fn send_text(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_url_encodes_repeated_patterns() {
        let url = listen_url("127.0.0.1:8080", &["build.*", "eu west"]);
        assert_eq!(
            url,
            "ws://127.0.0.1:8080/api/listen?name=build.*&name=eu+west"
        );
    }
}
