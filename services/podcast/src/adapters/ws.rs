//! services/podcast/src/adapters/ws.rs
//!
//! This module contains the WebSocket transport for the podcast service.
//! It implements the `Connector` port from the `core` crate.

use crate::config::Config;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use podcast_core::ports::{Connection, Connector, FrameSink, InboundFrame, PortError, PortResult};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest, handshake::client::Request, http::HeaderValue, Error as WsError,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Opens WebSocket connections to the podcast endpoint with credential headers.
#[derive(Clone)]
pub struct WsConnector {
    endpoint: String,
    app_id: String,
    app_key: String,
    access_key: String,
    resource_id: String,
}

impl WsConnector {
    /// Creates a new `WsConnector`.
    pub fn new(
        endpoint: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        access_key: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            access_key: access_key.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.app_id.clone(),
            config.app_key.clone(),
            config.access_key.clone(),
            config.resource_id.clone(),
        )
    }

    /// Builds the upgrade request carrying the credential headers.
    fn build_request(&self, connect_id: &str) -> PortResult<Request> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| PortError::Connection(format!("invalid endpoint: {}", e)))?;

        let pairs: [(&'static str, &str); 5] = [
            ("X-Api-App-Id", self.app_id.as_str()),
            ("X-Api-App-Key", self.app_key.as_str()),
            ("X-Api-Access-Key", self.access_key.as_str()),
            ("X-Api-Resource-Id", self.resource_id.as_str()),
            ("X-Api-Connect-Id", connect_id),
        ];

        let headers = request.headers_mut();
        for (name, value) in pairs {
            let value = HeaderValue::from_str(value)
                .map_err(|e| PortError::Connection(format!("invalid {} header: {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(request)
    }
}

//=========================================================================================
// `Connector` Trait Implementation
//=========================================================================================

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> PortResult<Connection> {
        let connect_id = Uuid::new_v4().to_string();
        let request = self.build_request(&connect_id)?;

        info!(
            "Connecting to {} (resource {}, connect id {})",
            self.endpoint, self.resource_id, connect_id
        );
        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| PortError::Connection(e.to_string()))?;
        debug!("WebSocket handshake completed with status {}", response.status());

        let (sender, receiver) = ws_stream.split();
        let frames = receiver
            .map(|item| match item {
                Ok(Message::Binary(data)) => Ok(InboundFrame::Binary(Bytes::from(data))),
                Ok(Message::Text(text)) => Ok(InboundFrame::Text(text)),
                Ok(Message::Close(_)) => Ok(InboundFrame::Close),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    Ok(InboundFrame::Control)
                }
                Err(e) => Err(PortError::Connection(e.to_string())),
            })
            .boxed();

        Ok(Connection {
            sink: Box::new(WsSink {
                inner: sender,
                closed: false,
            }),
            frames,
        })
    }
}

/// The outbound half of one WebSocket connection.
struct WsSink {
    inner: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Bytes) -> PortResult<()> {
        if self.closed {
            return Err(PortError::Closed);
        }
        self.inner
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => PortError::Closed,
                other => PortError::Connection(other.to_string()),
            })
    }

    async fn close(&mut self) -> PortResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(PortError::Connection(e.to_string())),
        }
    }
}
