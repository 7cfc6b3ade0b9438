//! The network controller
//!
//! [`NetworkController`] answers members' config requests and carries the
//! administrative API (see [`crate::admin`]). Every write touching a
//! network's records happens under that network's lock, which makes
//! address allocation and its claim atomic.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use rand::rngs::OsRng;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::address::{Address, NetworkId};
use crate::allocator::allocated_ips;
use crate::compiler::{ConfigCompiler, NetworkConfig};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result, ResultCode};
use crate::identity::{Identity, Signer};
use crate::model::ClientMetadata;
use crate::ratelimit::{RateDecision, RequestRateLimiter};
use crate::resolver::{MemberResolver, Resolution};
use crate::sender::ConfigSender;
use crate::store::DocumentStore;

/// Current wall clock in ms since the epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Exclusive hold on one network's records
///
/// The table entry is removed on release unless another task is waiting
/// for it, so the table only holds networks with work in flight.
pub(crate) struct NetworkLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    network: NetworkId,
    locks: &'a DashMap<NetworkId, Arc<Mutex<()>>>,
}

impl Drop for NetworkLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.network, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// A config request as received from a member
#[derive(Debug, Clone)]
pub struct ConfigRequest {
    pub network: NetworkId,
    pub request_id: u64,
    pub requester: Identity,
    pub metadata: ClientMetadata,
    /// Physical source of the request, kept in the member's history
    pub from: Option<SocketAddr>,
}

pub struct NetworkController {
    pub(crate) identity: Identity,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) signer: Arc<dyn Signer>,
    sender: Arc<dyn ConfigSender>,
    pub(crate) config: ControllerConfig,
    rate_limiter: RequestRateLimiter,
    network_locks: DashMap<NetworkId, Arc<Mutex<()>>>,
}

impl NetworkController {
    /// Build a controller signing with `identity`
    ///
    /// The identity must hold its secret key; requests for networks whose
    /// ID does not start with the identity's address are refused.
    pub fn new(
        identity: Identity,
        store: Arc<dyn DocumentStore>,
        signer: Arc<dyn Signer>,
        sender: Arc<dyn ConfigSender>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !identity.has_secret() {
            return Err(ControllerError::MissingSecretKey(identity.address()));
        }
        info!(controller = %identity.address(), "Network controller ready");
        Ok(Self {
            rate_limiter: RequestRateLimiter::from_config(&config),
            identity,
            store,
            signer,
            sender,
            config,
            network_locks: DashMap::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Serialize work on one network
    pub(crate) async fn lock_network(&self, network: NetworkId) -> NetworkLock<'_> {
        let lock = Arc::clone(self.network_locks.entry(network).or_default().value());
        NetworkLock {
            guard: Some(lock.lock_owned().await),
            network,
            locks: &self.network_locks,
        }
    }

    #[cfg(test)]
    pub(crate) fn network_lock_count(&self) -> usize {
        self.network_locks.len()
    }

    pub(crate) fn forget_network(&self, network: NetworkId) {
        self.rate_limiter.forget_network(network);
    }

    /// Handle a config request at the current time
    pub async fn request_config(&self, request: &ConfigRequest) -> ResultCode {
        self.request_config_at(request, now_ms()).await
    }

    /// Handle a config request as if received at `now` (ms)
    ///
    /// Errors are reported to the requester through the sender, except for
    /// throttled requests and requests this controller cannot serve at all.
    pub async fn request_config_at(&self, request: &ConfigRequest, now: i64) -> ResultCode {
        let network = request.network;
        let member = request.requester.address();

        if let Err(e) = self.check_serves(network) {
            error!(network_id = %network, member = %member, error = %e, "Cannot serve network");
            return e.result_code();
        }

        if self.rate_limiter.check(network, member, now) == RateDecision::Throttle {
            debug!(network_id = %network, member = %member, "Request throttled");
            return ResultCode::Ignore;
        }

        match self.serve(request, now).await {
            Ok(config) => {
                debug!(network_id = %network, member = %member, revision = config.revision, "Sending network config");
                self.sender
                    .send_config(network, request.request_id, member, config)
                    .await;
                ResultCode::Ok
            }
            Err(code) => {
                self.sender
                    .send_error(network, request.request_id, member, code)
                    .await;
                code
            }
        }
    }

    fn check_serves(&self, network: NetworkId) -> Result<()> {
        if !self.identity.has_secret() {
            return Err(ControllerError::MissingSecretKey(self.identity.address()));
        }
        if network.controller() != self.identity.address() {
            return Err(ControllerError::ForeignNetwork {
                network,
                controller: self.identity.address(),
            });
        }
        Ok(())
    }

    async fn serve(
        &self,
        request: &ConfigRequest,
        now: i64,
    ) -> std::result::Result<NetworkConfig, ResultCode> {
        let network_id = request.network;
        let _guard = self.lock_network(network_id).await;

        self.serve_locked(request, now).await.map_err(|e| {
            let code = e.result_code();
            match code {
                ResultCode::ObjectNotFound | ResultCode::AccessDenied => {
                    debug!(network_id = %network_id, error = %e, "Config request refused");
                }
                _ => warn!(network_id = %network_id, error = %e, "Config request failed"),
            }
            code
        })
    }

    async fn serve_locked(&self, request: &ConfigRequest, now: i64) -> Result<NetworkConfig> {
        let network = self
            .store
            .read_network(request.network)
            .await?
            .ok_or(ControllerError::NetworkNotFound(request.network))?;

        let resolver = MemberResolver::new(self.store.as_ref(), self.signer.as_ref(), &self.config);
        let mut member = match resolver
            .resolve(&network, &request.requester, &request.metadata, request.from, now)
            .await?
        {
            Resolution::Authorized(member) => member,
            Resolution::Denied => {
                return Err(ControllerError::AccessDenied {
                    network: network.id,
                    member: request.requester.address(),
                })
            }
        };

        let members = self.store.members(network.id).await?;
        let allocated = allocated_ips(&members);

        let compiler = ConfigCompiler::new(&self.config, self.signer.as_ref(), &self.identity);
        let config = compiler.compile(
            &network,
            &mut member,
            &request.metadata,
            &allocated,
            now,
            &mut OsRng,
        )?;
        self.store.write_member(&member).await?;
        Ok(config)
    }
}
