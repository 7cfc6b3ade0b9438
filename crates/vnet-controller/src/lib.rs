//! Virtual network controller
//!
//! The control plane of a peer-to-peer virtual network overlay. Member nodes
//! periodically ask the controller for their network's configuration; the
//! controller decides whether the node may join, compiles the network's flow
//! rules and routes, allocates managed IP addresses, signs the member's
//! capability and tag credentials and, on private networks, a certificate of
//! membership.
//!
//! Request path:
//! [`RequestRateLimiter`] → [`MemberResolver`] → [`ConfigCompiler`]
//! ([`AddressAllocator`], [`rules`], [`CertificateOfMembership`],
//! [`Capability`], [`Tag`]) →
//! [`DocumentStore`] → [`ConfigSender`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vnet_controller::{
//!     ChannelSender, ControllerConfig, Ed25519Signer, Identity, InMemoryStore, NetworkController,
//!     NetworkPatch,
//! };
//!
//! # async fn run() -> vnet_controller::Result<()> {
//! let (sender, _replies) = ChannelSender::new(1024);
//! let controller = NetworkController::new(
//!     Identity::generate(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(Ed25519Signer),
//!     Arc::new(sender),
//!     ControllerConfig::default(),
//! )?;
//! let network = controller
//!     .create_or_update_network(None, NetworkPatch::default())
//!     .await?;
//! println!("created {}", network.id);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod admin;
pub mod allocator;
pub mod certificate;
pub mod compiler;
pub mod config;
pub mod controller;
pub mod credential;
pub mod error;
pub mod identity;
pub mod model;
pub mod ratelimit;
pub mod resolver;
pub mod rules;
pub mod sender;
pub mod store;

pub use address::{Address, Mac, NetworkId, ParseAddressError};
pub use admin::{ControllerStatus, MemberPatch, NetworkPatch, NetworkSummary, V6AssignModePatch};
pub use allocator::{rfc4193_address, six_plane_address, AddressAllocator, Assignment};
pub use certificate::CertificateOfMembership;
pub use compiler::{ConfigCompiler, NetworkConfig};
pub use config::{ConfigLimits, ControllerConfig, CredentialConfig, MtuConfig, RateLimiterConfig};
pub use controller::{now_ms, ConfigRequest, NetworkController};
pub use credential::{Capability, Tag};
pub use error::{ControllerError, Result, ResultCode, RuleError};
pub use identity::{Ed25519Signer, Identity, Signature, Signer};
pub use model::{
    CapabilityDefinition, ClientMetadata, DnsConfig, IpAssignmentPool, MemberRecord,
    NetworkRecord, RequestRecord, Route, TagDefinition, V4AssignMode, V6AssignMode,
};
pub use ratelimit::{RateDecision, RequestRateLimiter};
pub use resolver::{MemberResolver, Resolution};
pub use rules::{Rule, RuleKind};
pub use sender::{ChannelSender, ConfigSender, SenderEvent};
pub use store::{DocumentStore, InMemoryStore, RedbStore, StoreError};
