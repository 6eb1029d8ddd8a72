use anyhow::Result;
use async_trait::async_trait;
use serenity::{http::Http, model::id::ChannelId};
use std::sync::Arc;

/// Envío de respuestas de texto al canal de origen
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, channel_id: ChannelId, content: &str) -> Result<()>;
}

pub struct SerenityTransport {
    http: Arc<Http>,
}

impl SerenityTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatTransport for SerenityTransport {
    async fn send(&self, channel_id: ChannelId, content: &str) -> Result<()> {
        channel_id.say(self.http.as_ref(), content).await?;
        Ok(())
    }
}
