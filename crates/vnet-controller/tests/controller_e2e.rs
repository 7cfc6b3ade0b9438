//! End-to-end tests for the network controller.
//!
//! Drive the public API the way an embedding transport would: networks are
//! set up through the administrative calls, members ask for configs, and
//! replies are read back from a `ChannelSender`.
//!
//! ```sh
//! cargo test -p vnet-controller --test controller_e2e
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Once};

use ipnet::IpNet;
use serde_json::json;
use tokio::sync::mpsc;
use vnet_controller::{
    ChannelSender, ClientMetadata, ConfigRequest, ControllerConfig, DocumentStore, Ed25519Signer,
    Identity, InMemoryStore, MemberPatch, NetworkConfig, NetworkController, NetworkId,
    NetworkPatch, RedbStore, ResultCode, Rule, SenderEvent,
};
use vnet_observability::{init_logging, LogLevel, LoggingConfig};

static LOGGING: Once = Once::new();

fn init_test_logging() {
    LOGGING.call_once(|| {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            ..Default::default()
        };
        // another test binary or harness may already own the subscriber
        let _ = init_logging(&config);
    });
}

struct Setup {
    controller: Arc<NetworkController>,
    identity: Identity,
    store: Arc<dyn DocumentStore>,
    replies: mpsc::Receiver<SenderEvent>,
}

fn setup_with_store(store: Arc<dyn DocumentStore>) -> Setup {
    init_test_logging();
    let identity = Identity::generate();
    let (sender, replies) = ChannelSender::new(1024);
    let controller = NetworkController::new(
        identity.clone(),
        Arc::clone(&store),
        Arc::new(Ed25519Signer),
        Arc::new(sender),
        ControllerConfig::default(),
    )
    .expect("controller should start");
    Setup {
        controller: Arc::new(controller),
        identity,
        store,
        replies,
    }
}

fn setup() -> Setup {
    setup_with_store(Arc::new(InMemoryStore::new()))
}

/// Private /24 with a managed IPv4 pool
fn lab_network_patch(private: bool) -> NetworkPatch {
    serde_json::from_value(json!({
        "name": "lab",
        "private": private,
        "routes": [{ "target": "10.0.0.0/24" }],
        "ipAssignmentPools": [{ "ipRangeStart": "10.0.0.1", "ipRangeEnd": "10.0.0.254" }],
        "v4AssignMode": { "zt": true }
    }))
    .expect("valid patch")
}

fn request(network: NetworkId, node: &Identity) -> ConfigRequest {
    ConfigRequest {
        network,
        request_id: 1,
        requester: node.to_public(),
        metadata: ClientMetadata {
            rules_engine_rev: Some(1),
            ..Default::default()
        },
        from: None,
    }
}

fn expect_config(event: Option<SenderEvent>) -> NetworkConfig {
    match event {
        Some(SenderEvent::Config { config, .. }) => *config,
        other => panic!("expected a config reply, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Deny, authorize, serve, throttle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_private_network_join_flow() -> anyhow::Result<()> {
    let mut s = setup();
    let network = s
        .controller
        .create_or_update_network(None, lab_network_patch(true))
        .await?;
    let node = Identity::generate();
    let req = request(network.id, &node);

    // unauthorized: denied, but the attempt is recorded
    assert_eq!(s.controller.request_config_at(&req, 10_000).await, ResultCode::AccessDenied);
    assert!(matches!(
        s.replies.recv().await,
        Some(SenderEvent::Error { code: ResultCode::AccessDenied, .. })
    ));
    let member = s.controller.get_member(network.id, node.address()).await?;
    assert_eq!(member.history.len(), 1);
    assert_eq!(member.member_revision, 1);
    assert!(member.ip_assignments.is_empty());

    s.controller
        .create_or_update_member(
            network.id,
            node.address(),
            MemberPatch {
                authorized: Some(true),
                ..Default::default()
            },
        )
        .await?;

    assert_eq!(s.controller.request_config_at(&req, 20_000).await, ResultCode::Ok);
    let config = expect_config(s.replies.recv().await);
    assert_eq!(config.network_id, network.id);
    assert_eq!(config.revision, network.revision);
    assert_eq!(config.static_ips.len(), 1);
    let ip = config.static_ips[0];
    assert_eq!(ip.prefix_len(), 24);
    assert!("10.0.0.0/24".parse::<IpNet>()?.contains(&ip.addr()));

    let com = config.com.expect("private networks issue a certificate");
    assert_eq!(com.issued_to, node.address());
    assert!(com.verify(&Ed25519Signer, &s.identity.to_public()));

    // within the request interval: ignored, nothing sent, nothing written
    assert_eq!(s.controller.request_config_at(&req, 20_500).await, ResultCode::Ignore);
    assert!(s.replies.try_recv().is_err());
    let member = s.controller.get_member(network.id, node.address()).await?;
    assert_eq!(member.history.len(), 2);
    assert_eq!(member.member_revision, 3);
    assert_eq!(member.ip_assignments, vec![ip.addr()]);
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Cascade delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_deleted_network_is_not_found() -> anyhow::Result<()> {
    let mut s = setup();
    let network = s
        .controller
        .create_or_update_network(None, lab_network_patch(false))
        .await?;
    let node = Identity::generate();

    assert_eq!(
        s.controller.request_config_at(&request(network.id, &node), 1_000).await,
        ResultCode::Ok
    );
    expect_config(s.replies.recv().await);

    s.controller.delete_network(network.id).await?;
    assert!(s.store.list_members(network.id).await?.is_empty());

    assert_eq!(
        s.controller.request_config_at(&request(network.id, &node), 5_000).await,
        ResultCode::ObjectNotFound
    );
    assert!(matches!(
        s.replies.recv().await,
        Some(SenderEvent::Error { code: ResultCode::ObjectNotFound, .. })
    ));
    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Rules and addressing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_network_without_rules_accepts_everything() -> anyhow::Result<()> {
    let mut s = setup();
    let network = s
        .controller
        .create_or_update_network(None, NetworkPatch {
            private: Some(false),
            ..Default::default()
        })
        .await?;

    s.controller
        .request_config_at(&request(network.id, &Identity::generate()), 1_000)
        .await;
    let config = expect_config(s.replies.recv().await);
    assert_eq!(config.rules, vec![Rule::accept_all()]);
    assert!(config.static_ips.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stored_mask_is_replaced_by_route_prefix() -> anyhow::Result<()> {
    let mut s = setup();
    let network = s
        .controller
        .create_or_update_network(None, lab_network_patch(false))
        .await?;
    let node = Identity::generate();
    s.controller
        .create_or_update_member(
            network.id,
            node.address(),
            MemberPatch {
                ip_assignments: Some(vec!["10.0.0.5/16".into()]),
                ..Default::default()
            },
        )
        .await?;

    s.controller
        .request_config_at(&request(network.id, &node), 1_000)
        .await;
    let config = expect_config(s.replies.recv().await);
    assert_eq!(config.static_ips, vec!["10.0.0.5/24".parse::<IpNet>()?]);
    Ok(())
}

#[tokio::test]
async fn test_token_admits_member_to_private_network() -> anyhow::Result<()> {
    let mut s = setup();
    let mut patch = lab_network_patch(true);
    patch.auth_tokens = Some([("join-me".to_string(), 0)].into_iter().collect());
    let network = s.controller.create_or_update_network(None, patch).await?;

    let node = Identity::generate();
    let mut req = request(network.id, &node);
    req.metadata.auth = Some("token:join-me".into());

    assert_eq!(s.controller.request_config_at(&req, 1_000).await, ResultCode::Ok);
    expect_config(s.replies.recv().await);
    let member = s.controller.get_member(network.id, node.address()).await?;
    assert!(member.authorized);
    assert_eq!(member.last_authorized_credential_type.as_deref(), Some("token"));
    Ok(())
}

#[tokio::test]
async fn test_capabilities_tags_and_dns_reach_members() -> anyhow::Result<()> {
    let mut s = setup();
    let patch: NetworkPatch = serde_json::from_value(json!({
        "private": false,
        "rules": [
            { "type": "MATCH_TAGS_EQUAL", "id": 100, "value": 1 },
            { "type": "ACTION_ACCEPT" },
            { "type": "ACTION_DROP" }
        ],
        "capabilities": [
            { "id": 1, "default": true, "rules": [{ "type": "ACTION_ACCEPT" }] },
            { "id": 2, "rules": [{ "type": "ACTION_DROP" }] }
        ],
        "tags": [{ "id": 100, "default": 1 }],
        "dns": { "domain": "lab.example", "servers": ["10.0.0.53"] }
    }))?;
    let network = s.controller.create_or_update_network(None, patch).await?;
    let node = Identity::generate();

    assert_eq!(
        s.controller.request_config_at(&request(network.id, &node), 1_000).await,
        ResultCode::Ok
    );
    let config = expect_config(s.replies.recv().await);
    assert_eq!(config.rules.len(), 3);
    assert_eq!(config.capabilities.len(), 1);
    assert_eq!(config.capabilities[0].id, 1);
    assert!(config.capabilities[0].verify(&Ed25519Signer, &s.identity));
    assert_eq!(config.tags.len(), 1);
    assert_eq!((config.tags[0].id, config.tags[0].value), (100, 1));
    assert!(config.tags[0].verify(&Ed25519Signer, &s.identity));
    assert_eq!(config.dns.map(|dns| dns.domain), Some("lab.example".to_string()));

    // the default tag is recorded; an admin override is issued next time
    let member = s.controller.get_member(network.id, node.address()).await?;
    assert_eq!(member.tags.get(&100), Some(&1));
    let patch: MemberPatch = serde_json::from_value(json!({
        "capabilities": [2],
        "tags": [[100, 0]]
    }))?;
    s.controller
        .create_or_update_member(network.id, node.address(), patch)
        .await?;

    s.controller
        .request_config_at(&request(network.id, &node), 5_000)
        .await;
    let config = expect_config(s.replies.recv().await);
    assert_eq!(config.capabilities.len(), 1);
    assert_eq!(config.capabilities[0].id, 2);
    assert_eq!((config.tags[0].id, config.tags[0].value), (100, 0));
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Concurrent allocation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_members_get_distinct_addresses() -> anyhow::Result<()> {
    const MEMBERS: usize = 48;

    let mut s = setup();
    let network = s
        .controller
        .create_or_update_network(None, lab_network_patch(false))
        .await?;

    let nodes: Vec<Identity> = (0..MEMBERS).map(|_| Identity::generate()).collect();
    let mut handles = Vec::new();
    for node in &nodes {
        let controller = Arc::clone(&s.controller);
        let req = request(network.id, node);
        handles.push(tokio::spawn(async move {
            controller.request_config_at(&req, 1_000).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await?, ResultCode::Ok);
    }

    let mut seen = HashSet::new();
    for _ in 0..MEMBERS {
        let config = expect_config(s.replies.recv().await);
        assert_eq!(config.static_ips.len(), 1);
        assert!(seen.insert(config.static_ips[0].addr()));
    }

    let mut stored: HashSet<IpAddr> = HashSet::new();
    for member in s.store.members(network.id).await? {
        assert_eq!(member.ip_assignments.len(), 1);
        assert!(stored.insert(member.ip_assignments[0]));
    }
    assert_eq!(stored.len(), MEMBERS);
    assert_eq!(stored, seen);
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_claims_survive_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("controller.redb");
    let node = Identity::generate();

    let (network_id, ip) = {
        let mut s = setup_with_store(Arc::new(RedbStore::open(&path)?));
        let network = s
            .controller
            .create_or_update_network(None, lab_network_patch(false))
            .await?;
        s.controller
            .request_config_at(&request(network.id, &node), 1_000)
            .await;
        let config = expect_config(s.replies.recv().await);
        (network.id, config.static_ips[0].addr())
    };

    let reopened = RedbStore::open(&path)?;
    let member = reopened
        .read_member(network_id, node.address())
        .await?
        .expect("member persisted");
    assert_eq!(member.ip_assignments, vec![ip]);
    assert_eq!(member.identity.as_ref(), Some(&node));
    Ok(())
}
