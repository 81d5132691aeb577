#![forbid(unsafe_code)]

use fleet_api::ApiConfig;
use fleet_core::Collection;
use futures::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::{LiveError, PushConnector, PushStream};

/// WebSocket connector for `/ws/{collection}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: url::Url,
}

impl WsConnector {
    pub fn new(url: url::Url) -> Self {
        Self { url }
    }

    pub fn for_collection(cfg: &ApiConfig, collection: Collection) -> Result<Self, LiveError> {
        let url = cfg.socket_url(collection).map_err(|e| LiveError::Url(e.to_string()))?;
        Ok(Self::new(url))
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

#[async_trait::async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self) -> Result<PushStream, LiveError> {
        let (ws, _resp) = connect_async(self.url.as_str()).await.map_err(|e| LiveError::Connect(e.to_string()))?;
        debug!(url = %self.url, "websocket open");
        let frames = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                // Control and binary frames carry no signal.
                Ok(_) => None,
                Err(e) => Some(Err(LiveError::Transport(e.to_string()))),
            }
        });
        Ok(frames.boxed())
    }
}
