// Path: crates/engine/src/engine.rs
//! Wiring a node together and the handle its embedder talks to.

use crate::as_node;
use crate::callback::CallbackQueue;
use crate::context::NodeContext;
use crate::dispatcher::{resync, run, EngineEvent};
use crate::error::EngineError;
use crate::idp;
use crate::lock::RequestLocks;
use crate::params::{CreateRequestParams, CreateResponseParams, SendDataParams};
use crate::request::RequestStatusReport;
use crate::rp;
use crate::timeout::TimeoutScheduler;
use ndid_api::callback::{CallbackSender, HttpCallbackSender};
use ndid_api::crypto::NodeSigner;
use ndid_api::ledger::LedgerBackend;
use ndid_api::storage::KvStore;
use ndid_api::time::{Clock, SystemClock};
use ndid_api::transport::PeerTransport;
use ndid_client::LedgerClient;
use ndid_crypto::sign::{HttpExternalSigner, LocalSigner};
use ndid_networking::PeerCodec;
use ndid_storage::{OrchestrationStore, RedbKvStore};
use ndid_types::app::{AsDataRecord, NodeId, RequestId, Role};
use ndid_types::config::NodeConfig;
use ndid_types::error::RequestError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Everything a node needs from the outside world.
pub struct EngineDeps {
    pub config: NodeConfig,
    pub ledger: Arc<dyn LedgerBackend>,
    pub signer: Arc<dyn NodeSigner>,
    pub kv: Arc<dyn KvStore>,
    pub transport: Arc<dyn PeerTransport>,
    pub callbacks: Arc<dyn CallbackSender>,
    pub clock: Arc<dyn Clock>,
}

impl EngineDeps {
    /// Production wiring from a node config: a redb store at
    /// `config.store_path`, HTTP callbacks and the system clock.
    ///
    /// The external signer wins when configured, otherwise `signing_key_pem`
    /// must hold the node's PKCS#8 private key.
    pub fn from_config(
        config: NodeConfig,
        ledger: Arc<dyn LedgerBackend>,
        transport: Arc<dyn PeerTransport>,
        signing_key_pem: Option<&str>,
    ) -> Result<Self, EngineError> {
        let signer: Arc<dyn NodeSigner> = match (&config.external_signer, signing_key_pem) {
            (Some(external), _) => {
                Arc::new(HttpExternalSigner::new(config.node_id.clone(), external)?)
            }
            (None, Some(pem)) => Arc::new(LocalSigner::from_pem(config.node_id.clone(), pem)?),
            (None, None) => {
                return Err(RequestError::InvalidArgument(
                    "no external signer configured and no signing key given".into(),
                )
                .into())
            }
        };
        let kv = Arc::new(RedbKvStore::open(&config.store_path)?);
        let callbacks = HttpCallbackSender::new(Duration::from_millis(
            config.callback.attempt_timeout_ms,
        ))
        .map_err(|e| RequestError::InvalidArgument(format!("callback client: {e}")))?;
        tracing::debug!(
            target: "engine",
            node_id = %config.node_id,
            store = %config.store_path.display(),
            external_signer = config.external_signer.is_some(),
            "dependencies built from config"
        );
        Ok(Self {
            config,
            ledger,
            signer,
            kv,
            transport,
            callbacks: Arc::new(callbacks),
            clock: Arc::new(SystemClock),
        })
    }
}

/// Entry point for starting a node.
#[derive(Debug)]
pub struct Engine;

impl Engine {
    /// Opens the store, catches up with the ledger, restarts persisted
    /// timers and callbacks, then spawns the dispatcher.
    ///
    /// Inbound peer payloads are handed over with [`EngineHandle::deliver`].
    pub async fn start(deps: EngineDeps) -> Result<EngineHandle, EngineError> {
        let EngineDeps {
            config,
            ledger,
            signer,
            kv,
            transport,
            callbacks,
            clock,
        } = deps;
        if signer.node_id() != &config.node_id {
            return Err(RequestError::InvalidArgument(format!(
                "signer is for {}, config is for {}",
                signer.node_id(),
                config.node_id
            ))
            .into());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let store = OrchestrationStore::new(kv, config.node_id.clone());
        let client = Arc::new(LedgerClient::new(
            ledger,
            Arc::clone(&signer),
            store.clone(),
            Arc::clone(&clock),
            config.ledger.clone(),
        )?);
        // Subscribe before catching up so nothing committed meanwhile is missed.
        let ledger_rx = client.subscribe();

        let callback_queue = CallbackQueue::new(
            store.clone(),
            callbacks,
            Arc::clone(&client),
            Arc::clone(&clock),
            config.callback.clone(),
            events_tx.clone(),
        );
        let timeouts = TimeoutScheduler::new(store.clone(), Arc::clone(&clock), events_tx.clone());
        let ctx = Arc::new(NodeContext {
            codec: PeerCodec::new(config.wire.clone()),
            locks: RequestLocks::new(config.node_id.clone()),
            config,
            store,
            ledger: client,
            signer,
            transport,
            callbacks: callback_queue,
            timeouts,
            clock,
        });

        resync(&ctx).await;
        let timers = ctx.timeouts.rearm_all()?;
        let queued = ctx.callbacks.resume_all()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(Arc::clone(&ctx), ledger_rx, events_rx, shutdown_rx));
        tracing::info!(
            target: "engine",
            node_id = %ctx.node_id(),
            role = %ctx.role(),
            latest_height = ctx.ledger.latest_height(),
            timers,
            queued,
            "node started"
        );
        Ok(EngineHandle {
            ctx,
            events: events_tx,
            shutdown: Arc::new(shutdown_tx),
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// A running node. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    ctx: Arc<NodeContext>,
    events: mpsc::UnboundedSender<EngineEvent>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    pub fn node_id(&self) -> &NodeId {
        self.ctx.node_id()
    }

    pub fn role(&self) -> Role {
        self.ctx.role()
    }

    /// The highest block height this node has observed.
    pub fn latest_height(&self) -> u64 {
        self.ctx.ledger.latest_height()
    }

    /// Request deadlines with a running timer.
    pub fn armed_timeouts(&self) -> usize {
        self.ctx.timeouts.armed()
    }

    /// Hands an inbound peer payload to the dispatcher. Returns `false` once
    /// the node has stopped.
    pub fn deliver(&self, payload: Vec<u8>) -> bool {
        self.events.send(EngineEvent::Inbound(payload)).is_ok()
    }

    /// RP: creates a request and returns its id once it is submitted.
    pub async fn create_request(
        &self,
        params: CreateRequestParams,
    ) -> Result<RequestId, EngineError> {
        rp::create_request(&self.ctx, params).await
    }

    /// RP: closes an open request.
    pub async fn close_request(&self, request_id: &RequestId) -> Result<(), EngineError> {
        rp::close_request(&self.ctx, request_id).await
    }

    pub async fn get_request_status(
        &self,
        request_id: &RequestId,
    ) -> Result<RequestStatusReport, EngineError> {
        rp::get_request_status(&self.ctx, request_id).await
    }

    pub fn request_id_by_reference(&self, reference_id: &str) -> Result<RequestId, EngineError> {
        rp::request_id_by_reference(&self.ctx, reference_id)
    }

    /// RP: data delivered by AS nodes, one entry per `(service, AS)`.
    pub fn get_data_from_as(&self, request_id: &RequestId) -> Result<Vec<AsDataRecord>, EngineError> {
        rp::get_data_from_as(&self.ctx, request_id)
    }

    /// IdP: answers an incoming request.
    pub async fn create_response(&self, params: CreateResponseParams) -> Result<(), EngineError> {
        idp::create_response(&self.ctx, params).await
    }

    /// AS: supplies data for a service of a validated data request.
    pub async fn process_data_request(&self, params: SendDataParams) -> Result<(), EngineError> {
        as_node::process_data_request(&self.ctx, params).await
    }

    pub fn set_incoming_request_url(&self, url: &str) -> Result<(), EngineError> {
        self.ctx.set_incoming_request_url(url)
    }

    pub fn set_data_request_url(&self, service_id: &str, url: &str) -> Result<(), EngineError> {
        self.ctx.set_data_request_url(service_id, url)
    }

    /// Stops the dispatcher, timers and callback deliveries.
    ///
    /// Persisted state stays, so a node started on the same store resumes
    /// where this one stopped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(target: "engine", error = %e, "dispatcher ended abnormally");
            }
        }
        self.ctx.timeouts.shutdown();
        self.ctx.callbacks.shutdown();
        tracing::info!(target: "engine", node_id = %self.ctx.node_id(), "node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_test_utils::{fixtures, FakeLedger, LoopbackTransport};
    use ndid_types::config::ExternalSignerConfig;

    fn config(dir: &tempfile::TempDir) -> NodeConfig {
        let mut config = NodeConfig::with_defaults(NodeId::from("rp1"), Role::Rp);
        config.store_path = dir.path().join("nested").join("rp1.redb");
        config
    }

    #[tokio::test]
    async fn from_config_opens_the_store_and_starts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(&dir);
        let store_path = config.store_path.clone();
        let deps = EngineDeps::from_config(
            config,
            Arc::new(FakeLedger::new()),
            Arc::new(LoopbackTransport::new()),
            Some(fixtures::private_pem("rp1")?),
        )?;
        assert_eq!(deps.signer.node_id(), &NodeId::from("rp1"));
        assert!(store_path.exists());

        let handle = Engine::start(deps).await?;
        assert_eq!(handle.role(), Role::Rp);
        assert_eq!(handle.armed_timeouts(), 0);
        handle.shutdown().await;
        Ok(())
    }

    #[test]
    fn from_config_needs_a_key_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = EngineDeps::from_config(
            config(&dir),
            Arc::new(FakeLedger::new()),
            Arc::new(LoopbackTransport::new()),
            None,
        );
        assert!(matches!(
            result,
            Err(EngineError::Request(RequestError::InvalidArgument(_)))
        ));
        Ok(())
    }

    #[test]
    fn external_signer_takes_precedence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config(&dir);
        config.external_signer = Some(ExternalSignerConfig {
            url: "http://signer.test/sign".into(),
            timeout_ms: 1_000,
        });
        let deps = EngineDeps::from_config(
            config,
            Arc::new(FakeLedger::new()),
            Arc::new(LoopbackTransport::new()),
            Some("not a pem"),
        )?;
        assert_eq!(deps.signer.node_id(), &NodeId::from("rp1"));
        Ok(())
    }
}
