// Path: crates/engine/tests/common/mod.rs
//! A small network of engine nodes sharing one fake ledger.

#![allow(dead_code)]

use anyhow::Result;
use ndid_api::storage::KvStore;
use ndid_engine::{Engine, EngineDeps, EngineHandle};
use ndid_storage::MemoryKvStore;
use ndid_test_utils::assertions::eventually;
use ndid_test_utils::{fixtures, FakeLedger, LoopbackTransport, ManualClock, RecordingCallbackSender};
use ndid_types::app::{AsNode, NodeId, PeerAddress, Role};
use ndid_types::config::{CallbackConfig, NodeConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const RP_CALLBACK: &str = "http://rp1.test/callback";
pub const IDP_INCOMING: &str = "http://idp1.test/incoming";
pub const IDP_RESULT: &str = "http://idp1.test/result";
pub const AS_DATA_REQUEST: &str = "http://as1.test/bank_statement";
pub const AS_RESULT: &str = "http://as1.test/result";

pub const NAMESPACE: &str = "citizen_id";
pub const IDENTIFIER: &str = "1234567890123";
pub const SERVICE: &str = "bank_statement";

/// Start of the manual clock, unix milliseconds.
pub const T0: u64 = 1_700_000_000_000;

fn role_of(node: &str) -> Result<(Role, u16)> {
    Ok(match node {
        "rp1" => (Role::Rp, 7001),
        "idp1" => (Role::Idp, 7002),
        "idp2" => (Role::Idp, 7003),
        "as1" => (Role::As, 7004),
        other => anyhow::bail!("no test node named {other}"),
    })
}

pub struct Net {
    pub ledger: Arc<FakeLedger>,
    pub transport: Arc<LoopbackTransport>,
    pub callbacks: Arc<RecordingCallbackSender>,
    pub clock: Arc<ManualClock>,
}

impl Net {
    /// Registers `nodes`, `accessor1` and `bank_statement` served by `as1`.
    pub fn new(nodes: &[&str]) -> Result<Self> {
        let ledger = Arc::new(FakeLedger::new());
        for node in nodes {
            let (role, port) = role_of(node)?;
            ledger.register_node(fixtures::node_info(node, role, port)?);
        }
        ledger.register_accessor(fixtures::accessor_info("accessor1", "accessor1")?);
        ledger.register_service(
            SERVICE,
            AsNode {
                node_id: NodeId::from("as1"),
                min_ial: 1.1,
                min_aal: 1.0,
            },
        );
        Ok(Self {
            ledger,
            transport: Arc::new(LoopbackTransport::new()),
            callbacks: Arc::new(RecordingCallbackSender::new()),
            clock: Arc::new(ManualClock::new(T0)),
        })
    }

    pub fn address(node: &str) -> Result<PeerAddress> {
        let (_, port) = role_of(node)?;
        Ok(PeerAddress {
            node_id: NodeId::from(node),
            ip: "127.0.0.1".into(),
            port,
            public_key: fixtures::public_pem(node)?.to_string(),
        })
    }

    /// Starts `node` on a fresh store and routes its inbound traffic.
    pub async fn start(&self, node: &str) -> Result<EngineHandle> {
        self.start_on(node, Arc::new(MemoryKvStore::new())).await
    }

    /// Starts `node` on `kv`, which may hold state of an earlier run.
    pub async fn start_on(&self, node: &str, kv: Arc<dyn KvStore>) -> Result<EngineHandle> {
        let handle = self.start_detached(node, kv).await?;
        self.attach(node, &handle)?;
        Ok(handle)
    }

    /// Starts `node` without attaching it to the transport.
    pub async fn start_detached(&self, node: &str, kv: Arc<dyn KvStore>) -> Result<EngineHandle> {
        let (role, _) = role_of(node)?;
        let mut config = NodeConfig::with_defaults(NodeId::from(node), role);
        config.callback = CallbackConfig {
            min_delay_ms: 20,
            max_delay_ms: 200,
            factor: 2.0,
            jitter: false,
            total_timeout_ms: 30_000,
            attempt_timeout_ms: 1_000,
        };
        let handle = Engine::start(EngineDeps {
            config,
            ledger: self.ledger.clone(),
            signer: fixtures::signer(node)?,
            kv,
            transport: self.transport.clone(),
            callbacks: self.callbacks.clone(),
            clock: self.clock.clone(),
        })
        .await?;
        Ok(handle)
    }

    /// Pipes payloads sent to `node` into `handle`.
    pub fn attach(&self, node: &str, handle: &EngineHandle) -> Result<()> {
        let mut rx = self.transport.attach(&Self::address(node)?);
        let handle = handle.clone();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if !handle.deliver(payload) {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Number of committed transactions of `function`.
    pub fn committed(&self, function: &str) -> usize {
        self.ledger
            .committed_functions()
            .iter()
            .filter(|f| f.as_str() == function)
            .count()
    }
}

/// Polls `check` every 20ms for up to ten seconds.
pub async fn wait_for<F, Fut>(check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    eventually(500, Duration::from_millis(20), check).await
}
