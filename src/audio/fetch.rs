use anyhow::Result;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use tracing::debug;

/// Resultado de abrir una rendition remota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx: se puede entregar al sink
    Ready,
    /// 3xx: la URL expiró o fue movida
    Redirect(u16),
    /// Cualquier otro estado
    Rejected(u16),
}

#[async_trait]
pub trait RenditionFetcher: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome>;
}

/// Fetcher HTTP que no sigue redirecciones; un 3xx se reporta como `Redirect`
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RenditionFetcher for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        debug!("have response: {} ({})", status, url);

        Ok(if status.is_success() {
            ProbeOutcome::Ready
        } else if status.is_redirection() {
            ProbeOutcome::Redirect(status.as_u16())
        } else {
            ProbeOutcome::Rejected(status.as_u16())
        })
    }
}
