//! Delivery providers
//!
//! The queue drain is provider-agnostic: anything implementing [`Mailer`]
//! can deliver. `LogMailer` is the development provider; `HttpMailer`
//! posts to a JSON delivery API.

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::info;

use yiba_common::{Error, Result};

/// One message handed to a provider
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> BoxFuture<'a, Result<()>>;
}

/// Development provider: logs the message instead of delivering it
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(
                "mail (log provider) to={} subject={:?}",
                message.to, message.subject
            );
            Ok(())
        })
    }
}

/// JSON HTTP delivery API provider
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

impl Mailer for HttpMailer {
    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(message)
                .send()
                .await
                .map_err(|e| Error::Internal(format!("mail provider request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(Error::Internal(format!(
                    "mail provider returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}
