//! Outbound side of the request path
//!
//! The controller never talks to the network itself. Replies go through a
//! [`ConfigSender`], which the embedding transport implements.
//! [`ChannelSender`] forwards replies as [`SenderEvent`]s over a tokio
//! channel, which is what tests and in-process transports use.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::address::{Address, NetworkId};
use crate::compiler::NetworkConfig;
use crate::error::ResultCode;

/// Delivers replies to requesting members
#[async_trait]
pub trait ConfigSender: Send + Sync {
    async fn send_config(
        &self,
        network: NetworkId,
        request_id: u64,
        destination: Address,
        config: NetworkConfig,
    );

    async fn send_error(
        &self,
        network: NetworkId,
        request_id: u64,
        destination: Address,
        code: ResultCode,
    );
}

/// A reply as seen by the receiving end of a [`ChannelSender`]
#[derive(Debug, Clone, PartialEq)]
pub enum SenderEvent {
    Config {
        network: NetworkId,
        request_id: u64,
        destination: Address,
        config: Box<NetworkConfig>,
    },
    Error {
        network: NetworkId,
        request_id: u64,
        destination: Address,
        code: ResultCode,
    },
}

/// Sender backed by a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<SenderEvent>,
}

impl ChannelSender {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SenderEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn deliver(&self, event: SenderEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("Reply channel closed, dropping reply");
        }
    }
}

#[async_trait]
impl ConfigSender for ChannelSender {
    async fn send_config(
        &self,
        network: NetworkId,
        request_id: u64,
        destination: Address,
        config: NetworkConfig,
    ) {
        self.deliver(SenderEvent::Config {
            network,
            request_id,
            destination,
            config: Box::new(config),
        })
        .await;
    }

    async fn send_error(
        &self,
        network: NetworkId,
        request_id: u64,
        destination: Address,
        code: ResultCode,
    ) {
        self.deliver(SenderEvent::Error {
            network,
            request_id,
            destination,
            code,
        })
        .await;
    }
}
