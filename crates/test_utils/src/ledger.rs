// Path: crates/test_utils/src/ledger.rs
//! An in-memory ledger double.
//!
//! It keeps only the bookkeeping the engine reads back: the node registry,
//! accessors, service providers, request records, identity proofs and data
//! signatures. Every committed block emits `NewBlock` followed by one
//! `TxCommitted` per transaction.

use async_trait::async_trait;
use ndid_api::ledger::{LedgerBackend, LedgerError};
use ndid_crypto::algorithms::hash::{sha256_hex, unb64};
use ndid_crypto::sign::verify_sha256;
use ndid_types::app::{
    AccessorArgs, AccessorInfo, AsNode, CreateIdpResponseArgs, CreateRequestArgs,
    DataSignatureArgs, DataSignatureRecord, DeclareIdentityProofArgs, FinishRequestArgs,
    GetIdpNodesArgs, IdentityProofArgs, IdentityProofRecord, IdpNode, IdpResponse, LedgerEvent,
    LedgerQuery, NodeId, NodeIdArgs, NodeInfo, RequestDetail, RequestId, RequestIdArgs, Role,
    ServiceDetail, ServiceIdArgs, SetDataReceivedArgs, SignDataArgs, TxHash, TxResult,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Default)]
struct State {
    height: u64,
    nodes: BTreeMap<NodeId, NodeInfo>,
    services: BTreeMap<String, Vec<AsNode>>,
    accessors: BTreeMap<String, AccessorInfo>,
    requests: BTreeMap<RequestId, RequestDetail>,
    identity_proofs: BTreeMap<(RequestId, NodeId), Vec<String>>,
    data_signatures: BTreeMap<(RequestId, String, NodeId), String>,
    tx_results: HashMap<TxHash, TxResult>,
    functions: Vec<String>,
    pending: Vec<(TxHash, Vec<u8>)>,
    failing_queries: u32,
    rejected_broadcasts: u32,
}

/// A single-process ledger shared by every node under test.
pub struct FakeLedger {
    state: Mutex<State>,
    events: broadcast::Sender<LedgerEvent>,
    auto_commit: AtomicBool,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

struct Tx {
    function: String,
    args: Vec<u8>,
    node_id: NodeId,
}

fn parse_payload(payload: &[u8], nodes: &BTreeMap<NodeId, NodeInfo>) -> Result<Tx, String> {
    let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
    let parts: Vec<&str> = text.split('|').collect();
    let [function, args, nonce, signature, node_id] = parts.as_slice() else {
        return Err(format!("expected 5 payload fields, got {}", parts.len()));
    };
    let node_id = String::from_utf8(unb64(node_id).map_err(|e| e.to_string())?)
        .map(NodeId)
        .map_err(|e| e.to_string())?;
    let node = nodes
        .get(&node_id)
        .ok_or_else(|| format!("unknown node {node_id}"))?;
    let signature = unb64(signature).map_err(|e| e.to_string())?;
    verify_sha256(
        &node.public_key,
        format!("{function}|{args}|{nonce}").as_bytes(),
        &signature,
    )
    .map_err(|e| format!("bad transaction signature: {e}"))?;
    Ok(Tx {
        function: function.to_string(),
        args: unb64(args).map_err(|e| e.to_string())?,
        node_id,
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

impl State {
    fn require_role(&self, node: &NodeId, role: Role) -> Result<(), String> {
        match self.nodes.get(node) {
            Some(info) if info.role == role && info.active => Ok(()),
            _ => Err(format!("{node} is not an active {role}")),
        }
    }

    fn open_request(&mut self, request_id: &RequestId) -> Result<&mut RequestDetail, String> {
        let request = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| format!("request {request_id} not found"))?;
        if request.is_finished() {
            return Err(format!("request {request_id} is closed or timed out"));
        }
        Ok(request)
    }

    fn apply(&mut self, tx: Tx, height: u64) -> Result<(), String> {
        let sender = tx.node_id;
        match tx.function.as_str() {
            "CreateRequest" => {
                self.require_role(&sender, Role::Rp)?;
                let args: CreateRequestArgs = decode(&tx.args)?;
                if self.requests.contains_key(&args.request_id) {
                    return Err("duplicate request id".into());
                }
                let detail = RequestDetail {
                    request_id: args.request_id.clone(),
                    requester_node_id: sender,
                    mode: args.mode,
                    min_idp: args.min_idp,
                    min_ial: args.min_ial,
                    min_aal: args.min_aal,
                    request_timeout: args.request_timeout,
                    idp_id_list: args.idp_id_list,
                    request_message_hash: args.request_message_hash,
                    data_request_list: args
                        .data_request_list
                        .into_iter()
                        .map(|s| ServiceDetail {
                            service_id: s.service_id,
                            as_id_list: s.as_id_list,
                            min_as: s.min_as,
                            request_params_hash: s.request_params_hash,
                            answered_as_id_list: vec![],
                            received_data_from_list: vec![],
                        })
                        .collect(),
                    responses: vec![],
                    closed: false,
                    timed_out: false,
                    creation_block_height: height,
                };
                self.requests.insert(args.request_id, detail);
            }
            "DeclareIdentityProof" => {
                self.require_role(&sender, Role::Idp)?;
                let args: DeclareIdentityProofArgs = decode(&tx.args)?;
                self.open_request(&args.request_id)?;
                self.identity_proofs
                    .entry((args.request_id, sender))
                    .or_insert(args.identity_proof);
            }
            "CreateIdpResponse" => {
                self.require_role(&sender, Role::Idp)?;
                let args: CreateIdpResponseArgs = decode(&tx.args)?;
                let request = self.open_request(&args.request_id)?;
                if !request.idp_id_list.is_empty() && !request.idp_id_list.contains(&sender) {
                    return Err(format!("{sender} was not asked"));
                }
                if request.response_of(&sender).is_some() {
                    return Err(format!("{sender} already responded"));
                }
                request.responses.push(IdpResponse {
                    idp_id: sender,
                    status: args.status,
                    ial: args.ial,
                    aal: args.aal,
                    signature: args.signature,
                    accessor_id: args.accessor_id,
                    identity_proof: args.identity_proof,
                    private_proof_hash: args.private_proof_hash,
                });
            }
            "SignData" => {
                self.require_role(&sender, Role::As)?;
                let args: SignDataArgs = decode(&tx.args)?;
                let request = self.open_request(&args.request_id)?;
                let service = request
                    .data_request_list
                    .iter_mut()
                    .find(|s| s.service_id == args.service_id)
                    .ok_or("service not requested")?;
                if service.answered_as_id_list.contains(&sender) {
                    return Err("data already signed".into());
                }
                service.answered_as_id_list.push(sender.clone());
                self.data_signatures
                    .insert((args.request_id, args.service_id, sender), args.signature);
            }
            "SetDataReceived" => {
                let args: SetDataReceivedArgs = decode(&tx.args)?;
                let request = self.open_request(&args.request_id)?;
                if request.requester_node_id != sender {
                    return Err("only the requester may acknowledge data".into());
                }
                let service = request
                    .data_request_list
                    .iter_mut()
                    .find(|s| s.service_id == args.service_id)
                    .ok_or("service not requested")?;
                if !service.answered_as_id_list.contains(&args.as_id) {
                    return Err("AS has not signed data".into());
                }
                if service.received_data_from_list.contains(&args.as_id) {
                    return Err("data already received".into());
                }
                service.received_data_from_list.push(args.as_id);
            }
            "CloseRequest" | "TimeOutRequest" => {
                let args: FinishRequestArgs = decode(&tx.args)?;
                let request = self.open_request(&args.request_id)?;
                if request.requester_node_id != sender {
                    return Err("only the requester may finish a request".into());
                }
                if tx.function == "CloseRequest" {
                    request.closed = true;
                } else {
                    request.timed_out = true;
                }
            }
            other => return Err(format!("unknown function {other}")),
        }
        Ok(())
    }
}

impl FakeLedger {
    /// An empty ledger at height 0 that commits every transaction in its own block.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(4096);
        Self {
            state: Mutex::new(State::default()),
            events,
            auto_commit: AtomicBool::new(true),
        }
    }

    /// Registers or replaces a node.
    pub fn register_node(&self, info: NodeInfo) {
        self.state.lock().nodes.insert(info.node_id.clone(), info);
    }

    /// Registers an AS as a provider of `service_id`.
    pub fn register_service(&self, service_id: &str, provider: AsNode) {
        self.state
            .lock()
            .services
            .entry(service_id.to_string())
            .or_default()
            .push(provider);
    }

    /// Registers or replaces an accessor.
    pub fn register_accessor(&self, info: AccessorInfo) {
        self.state
            .lock()
            .accessors
            .insert(info.accessor_id.clone(), info);
    }

    /// When off, broadcasts are queued until [`FakeLedger::mine`].
    pub fn set_auto_commit(&self, on: bool) {
        self.auto_commit.store(on, Ordering::SeqCst);
    }

    /// Makes the next `n` queries fail with a transient error.
    pub fn fail_next_queries(&self, n: u32) {
        self.state.lock().failing_queries = n;
    }

    /// Makes the next `n` broadcasts fail.
    pub fn reject_next_broadcasts(&self, n: u32) {
        self.state.lock().rejected_broadcasts = n;
    }

    /// The ledger's copy of a request.
    pub fn request(&self, request_id: &RequestId) -> Option<RequestDetail> {
        self.state.lock().requests.get(request_id).cloned()
    }

    /// Functions of every applied transaction, in commit order.
    pub fn committed_functions(&self) -> Vec<String> {
        self.state.lock().functions.clone()
    }

    /// Current height.
    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Commits every queued transaction in one new block and returns its height.
    ///
    /// With nothing queued this produces an empty block.
    pub fn mine(&self) -> u64 {
        let (height, results) = {
            let mut state = self.state.lock();
            state.height += 1;
            let height = state.height;
            let pending = std::mem::take(&mut state.pending);
            let mut results = Vec::with_capacity(pending.len());
            for (tx_hash, payload) in pending {
                let outcome = parse_payload(&payload, &state.nodes).and_then(|tx| {
                    let function = tx.function.clone();
                    state.apply(tx, height).map(|_| function)
                });
                let result = match outcome {
                    Ok(function) => {
                        state.functions.push(function);
                        TxResult {
                            height,
                            success: true,
                            error: None,
                        }
                    }
                    Err(reason) => {
                        tracing::debug!(target: "ledger", tx_hash = %tx_hash, %reason, "fake ledger rejected tx");
                        TxResult {
                            height,
                            success: false,
                            error: Some(reason),
                        }
                    }
                };
                state.tx_results.insert(tx_hash.clone(), result.clone());
                results.push((tx_hash, result));
            }
            (height, results)
        };
        let _ = self.events.send(LedgerEvent::NewBlock {
            height,
            missing_block_count: 0,
        });
        for (tx_hash, result) in results {
            let _ = self.events.send(LedgerEvent::TxCommitted { tx_hash, result });
        }
        height
    }

    /// Mines an empty block every `every` until the handle is aborted.
    pub fn spawn_block_producer(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                ledger.mine();
            }
        })
    }

    fn answer<A: DeserializeOwned, R: Serialize>(
        query: LedgerQuery,
        args: serde_json::Value,
        f: impl FnOnce(A) -> Option<R>,
    ) -> Result<Option<serde_json::Value>, LedgerError> {
        let args: A = serde_json::from_value(args).map_err(|e| LedgerError::Query {
            query: query.as_str(),
            reason: e.to_string(),
        })?;
        f(args)
            .map(|r| serde_json::to_value(r).map_err(|e| LedgerError::Decode(e.to_string())))
            .transpose()
    }
}

#[async_trait]
impl LedgerBackend for FakeLedger {
    async fn query(
        &self,
        query: LedgerQuery,
        args: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, LedgerError> {
        let mut state = self.state.lock();
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(LedgerError::Unavailable("injected query failure".into()));
        }
        match query {
            LedgerQuery::GetRequestDetail => Self::answer(query, args, |a: RequestIdArgs| {
                state.requests.get(&a.request_id).cloned()
            }),
            LedgerQuery::GetNodeInfo => Self::answer(query, args, |a: NodeIdArgs| {
                state.nodes.get(&a.node_id).cloned()
            }),
            LedgerQuery::GetIdpNodes => Self::answer(query, args, |a: GetIdpNodesArgs| {
                let nodes: Vec<IdpNode> = state
                    .nodes
                    .values()
                    .filter(|n| n.role == Role::Idp && n.active)
                    .filter(|n| n.max_ial >= a.min_ial && n.max_aal >= a.min_aal)
                    .filter(|n| a.node_id_list.is_empty() || a.node_id_list.contains(&n.node_id))
                    .map(|n| IdpNode {
                        node_id: n.node_id.clone(),
                        max_ial: n.max_ial,
                        max_aal: n.max_aal,
                    })
                    .collect();
                Some(nodes)
            }),
            LedgerQuery::GetAsNodesByServiceId => Self::answer(query, args, |a: ServiceIdArgs| {
                Some(state.services.get(&a.service_id).cloned().unwrap_or_default())
            }),
            LedgerQuery::GetAccessor => Self::answer(query, args, |a: AccessorArgs| {
                state.accessors.get(&a.accessor_id).cloned()
            }),
            LedgerQuery::GetIdentityProof => Self::answer(query, args, |a: IdentityProofArgs| {
                state
                    .identity_proofs
                    .get(&(a.request_id, a.idp_id))
                    .map(|p| IdentityProofRecord {
                        identity_proof: p.clone(),
                    })
            }),
            LedgerQuery::GetDataSignature => Self::answer(query, args, |a: DataSignatureArgs| {
                state
                    .data_signatures
                    .get(&(a.request_id, a.service_id, a.node_id))
                    .map(|s| DataSignatureRecord {
                        signature: s.clone(),
                    })
            }),
        }
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<Option<u64>, LedgerError> {
        let tx_hash = TxHash(sha256_hex(&payload));
        {
            let mut state = self.state.lock();
            if state.rejected_broadcasts > 0 {
                state.rejected_broadcasts -= 1;
                return Err(LedgerError::BroadcastRejected("injected rejection".into()));
            }
            state.pending.push((tx_hash, payload));
        }
        if self.auto_commit.load(Ordering::SeqCst) {
            Ok(Some(self.mine()))
        } else {
            Ok(None)
        }
    }

    async fn tx_result(&self, tx_hash: &TxHash) -> Result<Option<TxResult>, LedgerError> {
        Ok(self.state.lock().tx_results.get(tx_hash).cloned())
    }

    async fn latest_height(&self) -> Result<u64, LedgerError> {
        Ok(self.height())
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn mine_emits_block_then_commits() {
        let ledger = FakeLedger::new();
        ledger.set_auto_commit(false);
        let mut events = ledger.subscribe();

        assert_eq!(ledger.broadcast(b"garbage".to_vec()).await.unwrap(), None);
        assert_eq!(ledger.mine(), 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            LedgerEvent::NewBlock { height: 1, .. }
        ));
        match events.recv().await.unwrap() {
            LedgerEvent::TxCommitted { result, .. } => assert!(!result.success),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn idp_query_filters_by_level_and_list() {
        let ledger = FakeLedger::new();
        let mut low = fixtures::node_info("idp1", Role::Idp, 1).unwrap();
        low.max_ial = 1.1;
        ledger.register_node(low);
        ledger.register_node(fixtures::node_info("idp2", Role::Idp, 2).unwrap());

        let args = serde_json::to_value(GetIdpNodesArgs {
            min_ial: 2.3,
            min_aal: 1.0,
            node_id_list: vec![],
        })
        .unwrap();
        let found: Vec<IdpNode> = serde_json::from_value(
            ledger
                .query(LedgerQuery::GetIdpNodes, args)
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_id.as_str(), "idp2");
    }

    #[tokio::test]
    async fn injected_query_failures_are_transient() {
        let ledger = FakeLedger::new();
        ledger.fail_next_queries(1);
        let args = serde_json::json!({ "node_id": "rp1" });
        let err = ledger
            .query(LedgerQuery::GetNodeInfo, args.clone())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.query(LedgerQuery::GetNodeInfo, args).await.unwrap(), None);
    }
}
