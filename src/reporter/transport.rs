//! Ingest channel transports

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use super::protocol::IngestMessage;
use crate::config::{Config, TlsConfig};
use crate::error::ReportError;

/// Path of the ingest endpoint on the ingestion server
pub const INGEST_PATH: &str = "/ingest_extracted_content";

/// Opens one ingest session per task report
#[async_trait]
pub trait IngestTransport: Send + Sync {
    /// Connect to ingestion
    async fn open(&self) -> Result<Box<dyn IngestSession>, ReportError>;
}

/// An open duplex channel to ingestion
#[async_trait]
pub trait IngestSession: Send {
    /// Send one message
    async fn send(&mut self, message: IngestMessage) -> Result<(), ReportError>;

    /// Wait for the acknowledgement and close the channel
    ///
    /// A peer that closes with an error status is reported as
    /// [`ReportError::Rejected`] by the caller; this method returns
    /// the raw acknowledgement object.
    async fn finish(self: Box<Self>) -> Result<Acknowledgement, ReportError>;
}

/// How ingestion ended a session
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    /// JSON reply
    Reply(serde_json::Value),
    /// Peer closed the connection with an error status instead of replying
    ClosedWithError(String),
}

/// Websocket transport to `{ws|wss}://{ingestion_addr}/ingest_extracted_content`
pub struct WebSocketTransport {
    url: String,
    connector: Option<native_tls::TlsConnector>,
}

impl WebSocketTransport {
    /// Build the transport from config
    pub fn new(config: &Config) -> Result<Self, ReportError> {
        let url = format!("{}://{}{}", config.ws_scheme(), config.ingestion.addr, INGEST_PATH);
        let connector = config.tls.as_ref().map(tls_connector).transpose()?;
        Ok(Self { url, connector })
    }

    /// Endpoint this transport connects to
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn tls_connector(tls: &TlsConfig) -> Result<native_tls::TlsConnector, ReportError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|e| ReportError::Tls(format!("{}: {}", path.display(), e)))
    };
    let ca = read(&tls.ca_bundle)?;
    let cert = read(&tls.cert_file)?;
    let key = read(&tls.key_file)?;

    let ca = native_tls::Certificate::from_pem(&ca).map_err(|e| ReportError::Tls(e.to_string()))?;
    let identity =
        native_tls::Identity::from_pkcs8(&cert, &key).map_err(|e| ReportError::Tls(e.to_string()))?;

    native_tls::TlsConnector::builder()
        .add_root_certificate(ca)
        .identity(identity)
        .build()
        .map_err(|e| ReportError::Tls(e.to_string()))
}

#[async_trait]
impl IngestTransport for WebSocketTransport {
    async fn open(&self) -> Result<Box<dyn IngestSession>, ReportError> {
        let connector = self.connector.clone().map(Connector::NativeTls);
        let (stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(self.url.as_str(), None, false, connector)
                .await?;
        Ok(Box::new(WebSocketSession { stream }))
    }
}

struct WebSocketSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl IngestSession for WebSocketSession {
    async fn send(&mut self, message: IngestMessage) -> Result<(), ReportError> {
        let text = serde_json::to_string(&message)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Acknowledgement, ReportError> {
        let mut stream = self.stream;
        stream.flush().await?;

        let ack = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value = serde_json::from_str(&text).map_err(|e| {
                        ReportError::Protocol(format!("acknowledgement is not JSON: {}", e))
                    })?;
                    break Acknowledgement::Reply(value);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let value = serde_json::from_slice(&bytes).map_err(|e| {
                        ReportError::Protocol(format!("acknowledgement is not JSON: {}", e))
                    })?;
                    break Acknowledgement::Reply(value);
                }
                Some(Ok(Message::Close(Some(frame)))) if frame.code != CloseCode::Normal => {
                    break Acknowledgement::ClosedWithError(format!(
                        "{} ({})",
                        frame.reason,
                        u16::from(frame.code)
                    ));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ReportError::Protocol(
                        "connection closed before acknowledgement".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };

        // Best effort; the acknowledgement is what counts
        stream.close(None).await.ok();
        Ok(ack)
    }
}
