// Path: crates/storage/src/orchestration.rs
//! Typed access to the orchestration state of one node.

use crate::keys::{self, tables};
use ndid_api::storage::{be64, KvStore, StorageError};
use ndid_types::app::{
    AsDataRecord, AsRequestRecord, CallbackEntry, CallbackUrls, ExpectedTx, IdpResponseDraft,
    IdpResponseMessage, IncomingRequestRecord, NodeId, RequestId, RequestRecord, TxHash,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

const CALLBACK_URLS: &str = "callback_urls";
const LATEST_HEIGHT: &str = "latest_height";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
}

/// A message parked by the block-height gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateEntry {
    /// Store key, used to take the entry exactly once.
    pub key: Vec<u8>,
    /// Height the sender declared.
    pub height: u64,
    /// The request the message belongs to.
    pub request_id: RequestId,
    /// The encoded message.
    pub payload: Vec<u8>,
}

/// The typed store of one node. Cheap to clone.
#[derive(Clone)]
pub struct OrchestrationStore {
    kv: Arc<dyn KvStore>,
    node_id: NodeId,
}

impl OrchestrationStore {
    /// Wraps a key-value backend for `node_id`.
    pub fn new(kv: Arc<dyn KvStore>, node_id: NodeId) -> Self {
        Self { kv, node_id }
    }

    /// The node whose state this is.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn key(&self, parts: &[&str]) -> Vec<u8> {
        keys::scoped(&self.node_id, parts)
    }

    fn get_json<T: DeserializeOwned>(&self, table: &str, key: &[u8]) -> Result<Option<T>, StorageError> {
        self.kv.get(table, key)?.map(|v| decode(&v)).transpose()
    }

    fn put_json<T: Serialize>(&self, table: &str, key: &[u8], value: &T) -> Result<(), StorageError> {
        self.kv.put(table, key, &encode(value)?)
    }

    fn take_json<T: DeserializeOwned>(&self, table: &str, key: &[u8]) -> Result<Option<T>, StorageError> {
        self.kv.take(table, key)?.map(|v| decode(&v)).transpose()
    }

    fn scan_json<T: DeserializeOwned>(&self, table: &str, prefix: &[u8]) -> Result<Vec<T>, StorageError> {
        self.kv
            .scan_prefix(table, prefix)?
            .into_iter()
            .map(|(_, v)| decode(&v))
            .collect()
    }

    // ---- RP requests ----

    /// Inserts or replaces a request record.
    pub fn put_request(&self, record: &RequestRecord) -> Result<(), StorageError> {
        self.put_json(tables::REQUESTS, &self.key(&[record.request_id.as_str()]), record)
    }

    /// Loads a request record.
    pub fn request(&self, request_id: &RequestId) -> Result<Option<RequestRecord>, StorageError> {
        self.get_json(tables::REQUESTS, &self.key(&[request_id.as_str()]))
    }

    /// Binds a client reference to a request id.
    ///
    /// Returns the id already bound when the reference was used before.
    pub fn bind_reference(
        &self,
        reference_id: &str,
        request_id: &RequestId,
    ) -> Result<Option<RequestId>, StorageError> {
        let key = self.key(&[reference_id]);
        if self.kv.put_if_absent(tables::REFERENCES, &key, request_id.as_str().as_bytes())? {
            return Ok(None);
        }
        self.request_by_reference(reference_id)
    }

    /// Drops a reference binding so the client can retry under the same key.
    pub fn release_reference(&self, reference_id: &str) -> Result<bool, StorageError> {
        self.kv.delete(tables::REFERENCES, &self.key(&[reference_id]))
    }

    /// Looks up the request bound to a client reference.
    pub fn request_by_reference(&self, reference_id: &str) -> Result<Option<RequestId>, StorageError> {
        self.kv
            .get(tables::REFERENCES, &self.key(&[reference_id]))?
            .map(|v| {
                String::from_utf8(v)
                    .map(RequestId)
                    .map_err(|e| StorageError::Decode(e.to_string()))
            })
            .transpose()
    }

    // ---- timeouts ----

    /// Persists the absolute deadline of a request.
    pub fn put_timeout(&self, request_id: &RequestId, deadline_ms: u64) -> Result<(), StorageError> {
        self.kv.put(
            tables::TIMEOUTS,
            &self.key(&[request_id.as_str()]),
            &be64(deadline_ms),
        )
    }

    /// Removes a deadline. Returns whether one was armed.
    pub fn remove_timeout(&self, request_id: &RequestId) -> Result<bool, StorageError> {
        self.kv.delete(tables::TIMEOUTS, &self.key(&[request_id.as_str()]))
    }

    /// Whether a deadline is armed for the request.
    pub fn has_timeout(&self, request_id: &RequestId) -> Result<bool, StorageError> {
        Ok(self
            .kv
            .get(tables::TIMEOUTS, &self.key(&[request_id.as_str()]))?
            .is_some())
    }

    /// Every armed deadline.
    pub fn timeouts(&self) -> Result<Vec<(RequestId, u64)>, StorageError> {
        let prefix = keys::node_prefix(&self.node_id);
        self.kv
            .scan_prefix(tables::TIMEOUTS, &prefix)?
            .into_iter()
            .map(|(k, v)| {
                let rid = k
                    .get(prefix.len()..k.len().saturating_sub(1))
                    .and_then(|b| std::str::from_utf8(b).ok())
                    .ok_or_else(|| StorageError::Decode("timeout key".into()))?;
                let deadline: [u8; 8] = v
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Decode("timeout deadline".into()))?;
                Ok((RequestId::new(rid), u64::from_be_bytes(deadline)))
            })
            .collect()
    }

    // ---- expected transactions ----

    /// Records a transaction before it is broadcast.
    pub fn put_expected_tx(&self, tx: &ExpectedTx) -> Result<(), StorageError> {
        self.put_json(tables::EXPECTED_TX, &self.key(&[tx.tx_hash.0.as_str()]), tx)
    }

    /// Removes and returns an expected transaction. Exactly one caller wins.
    pub fn take_expected_tx(&self, tx_hash: &TxHash) -> Result<Option<ExpectedTx>, StorageError> {
        self.take_json(tables::EXPECTED_TX, &self.key(&[tx_hash.0.as_str()]))
    }

    /// Every transaction still awaiting its result.
    pub fn expected_txs(&self) -> Result<Vec<ExpectedTx>, StorageError> {
        self.scan_json(tables::EXPECTED_TX, &keys::node_prefix(&self.node_id))
    }

    // ---- block-height gate ----

    /// Parks a message until `height` is observed.
    ///
    /// Returns the entry key, or `None` when the same message is already parked.
    pub fn buffer_message(
        &self,
        height: u64,
        request_id: &RequestId,
        digest: &str,
        payload: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let key = keys::gate_key(&self.node_id, height, request_id, digest);
        if self.kv.put_if_absent(tables::GATE, &key, payload)? {
            Ok(Some(key))
        } else {
            Ok(None)
        }
    }

    /// Removes a parked message. Only one caller observes `Some`.
    pub fn take_buffered(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.kv.take(tables::GATE, key)
    }

    /// Parked messages whose height is at most `latest`, in height order.
    pub fn buffered_up_to(&self, latest: u64) -> Result<Vec<GateEntry>, StorageError> {
        let mut out = Vec::new();
        for (key, payload) in self
            .kv
            .scan_prefix(tables::GATE, &keys::node_prefix(&self.node_id))?
        {
            let Some((height, request_id)) = keys::parse_gate_key(&self.node_id, &key) else {
                tracing::warn!(target: "storage", key = %hex::encode(&key), "skipping malformed gate key");
                continue;
            };
            if height > latest {
                break;
            }
            out.push(GateEntry {
                key,
                height,
                request_id,
                payload,
            });
        }
        Ok(out)
    }

    fn purge_buffered(&self, request_id: &RequestId) -> Result<usize, StorageError> {
        let mut removed = 0;
        for (key, _) in self
            .kv
            .scan_prefix(tables::GATE, &keys::node_prefix(&self.node_id))?
        {
            if keys::parse_gate_key(&self.node_id, &key).is_some_and(|(_, rid)| &rid == request_id)
                && self.kv.delete(tables::GATE, &key)?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ---- callbacks ----

    /// Inserts or replaces a queued callback.
    pub fn put_callback(&self, entry: &CallbackEntry) -> Result<(), StorageError> {
        self.put_json(tables::CALLBACKS, &self.key(&[entry.callback_id.as_str()]), entry)
    }

    /// Loads a queued callback.
    pub fn callback(&self, callback_id: &str) -> Result<Option<CallbackEntry>, StorageError> {
        self.get_json(tables::CALLBACKS, &self.key(&[callback_id]))
    }

    /// Drops a queued callback. Returns whether it was still queued.
    pub fn remove_callback(&self, callback_id: &str) -> Result<bool, StorageError> {
        self.kv.delete(tables::CALLBACKS, &self.key(&[callback_id]))
    }

    /// Every queued callback.
    pub fn callbacks(&self) -> Result<Vec<CallbackEntry>, StorageError> {
        self.scan_json(tables::CALLBACKS, &keys::node_prefix(&self.node_id))
    }

    // ---- IdP ----

    /// Inserts or replaces the response draft of a request.
    pub fn put_idp_draft(&self, draft: &IdpResponseDraft) -> Result<(), StorageError> {
        self.put_json(tables::IDP_DRAFTS, &self.key(&[draft.request_id.as_str()]), draft)
    }

    /// Discards the response draft of a request.
    pub fn remove_idp_draft(&self, request_id: &RequestId) -> Result<bool, StorageError> {
        self.kv.delete(tables::IDP_DRAFTS, &self.key(&[request_id.as_str()]))
    }

    /// Loads the response draft of a request.
    pub fn idp_draft(&self, request_id: &RequestId) -> Result<Option<IdpResponseDraft>, StorageError> {
        self.get_json(tables::IDP_DRAFTS, &self.key(&[request_id.as_str()]))
    }

    /// Records a validated consent request. Returns false if it was already recorded.
    pub fn insert_incoming(&self, record: &IncomingRequestRecord) -> Result<bool, StorageError> {
        let key = self.key(&[record.message.request_id.as_str()]);
        self.kv.put_if_absent(tables::INCOMING, &key, &encode(record)?)
    }

    /// Loads a validated consent request.
    pub fn incoming(&self, request_id: &RequestId) -> Result<Option<IncomingRequestRecord>, StorageError> {
        self.get_json(tables::INCOMING, &self.key(&[request_id.as_str()]))
    }

    // ---- RP proof sessions ----

    /// Stores the challenge issued to an IdP unless one exists, and returns the stored one.
    pub fn challenge_or_insert(
        &self,
        request_id: &RequestId,
        idp_id: &NodeId,
        challenge: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let key = self.key(&[request_id.as_str(), idp_id.as_str()]);
        if self.kv.put_if_absent(tables::RP_CHALLENGES, &key, &encode(&challenge)?)? {
            return Ok(challenge.to_vec());
        }
        self.get_json(tables::RP_CHALLENGES, &key)?
            .ok_or(StorageError::NotFound)
    }

    /// The challenge issued to an IdP.
    pub fn challenge(&self, request_id: &RequestId, idp_id: &NodeId) -> Result<Option<Vec<String>>, StorageError> {
        self.get_json(
            tables::RP_CHALLENGES,
            &self.key(&[request_id.as_str(), idp_id.as_str()]),
        )
    }

    /// Keeps the proof material an IdP relayed.
    pub fn put_idp_proof(&self, message: &IdpResponseMessage) -> Result<(), StorageError> {
        self.put_json(
            tables::IDP_PROOFS,
            &self.key(&[message.request_id.as_str(), message.idp_id.as_str()]),
            message,
        )
    }

    /// Every IdP response message received for a request.
    pub fn idp_proofs(&self, request_id: &RequestId) -> Result<Vec<IdpResponseMessage>, StorageError> {
        self.scan_json(tables::IDP_PROOFS, &self.key(&[request_id.as_str()]))
    }

    // ---- AS ----

    /// Records a validated data request. Returns false if it was already recorded.
    pub fn insert_as_request(&self, record: &AsRequestRecord) -> Result<bool, StorageError> {
        let key = self.key(&[record.message.request_id.as_str()]);
        self.kv.put_if_absent(tables::AS_REQUESTS, &key, &encode(record)?)
    }

    /// Replaces a data request record.
    pub fn put_as_request(&self, record: &AsRequestRecord) -> Result<(), StorageError> {
        self.put_json(
            tables::AS_REQUESTS,
            &self.key(&[record.message.request_id.as_str()]),
            record,
        )
    }

    /// Loads a data request record.
    pub fn as_request(&self, request_id: &RequestId) -> Result<Option<AsRequestRecord>, StorageError> {
        self.get_json(tables::AS_REQUESTS, &self.key(&[request_id.as_str()]))
    }

    /// Stores data an AS delivered. Returns false if this AS already delivered it.
    pub fn insert_as_data(&self, record: &AsDataRecord) -> Result<bool, StorageError> {
        let key = self.key(&[
            record.request_id.as_str(),
            record.service_id.as_str(),
            record.as_id.as_str(),
        ]);
        self.kv.put_if_absent(tables::AS_DATA, &key, &encode(record)?)
    }

    /// Forgets an AS delivery whose receipt never made it onto the ledger,
    /// so a redelivered copy is processed again.
    pub fn remove_as_data(
        &self,
        request_id: &RequestId,
        service_id: &str,
        as_id: &NodeId,
    ) -> Result<bool, StorageError> {
        let key = self.key(&[request_id.as_str(), service_id, as_id.as_str()]);
        self.kv.delete(tables::AS_DATA, &key)
    }

    /// Every AS delivery received for a request.
    pub fn as_data(&self, request_id: &RequestId) -> Result<Vec<AsDataRecord>, StorageError> {
        self.scan_json(tables::AS_DATA, &self.key(&[request_id.as_str()]))
    }

    // ---- settings ----

    /// Node-level callback destinations.
    pub fn callback_urls(&self) -> Result<CallbackUrls, StorageError> {
        Ok(self
            .get_json(tables::META, &self.key(&[CALLBACK_URLS]))?
            .unwrap_or_default())
    }

    /// Replaces the node-level callback destinations.
    pub fn set_callback_urls(&self, urls: &CallbackUrls) -> Result<(), StorageError> {
        self.put_json(tables::META, &self.key(&[CALLBACK_URLS]), urls)
    }

    /// Highest block height observed, 0 before the first block.
    pub fn latest_height(&self) -> Result<u64, StorageError> {
        let Some(v) = self.kv.get(tables::META, &self.key(&[LATEST_HEIGHT]))? else {
            return Ok(0);
        };
        let bytes: [u8; 8] = v
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Decode("latest height".into()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Raises the stored height to `height` if it is higher. Returns the stored height.
    pub fn advance_latest_height(&self, height: u64) -> Result<u64, StorageError> {
        let current = self.latest_height()?;
        if height <= current {
            return Ok(current);
        }
        self.kv
            .put(tables::META, &self.key(&[LATEST_HEIGHT]), &be64(height))?;
        Ok(height)
    }

    /// Drops the per-request working state once a request ends.
    ///
    /// The reference mapping, the RP request record and received AS data stay.
    pub fn purge_request_sessions(&self, request_id: &RequestId) -> Result<(), StorageError> {
        let rid = request_id.as_str();
        let buffered = self.purge_buffered(request_id)?;
        let challenges = self
            .kv
            .delete_prefix(tables::RP_CHALLENGES, &self.key(&[rid]))?;
        let proofs = self.kv.delete_prefix(tables::IDP_PROOFS, &self.key(&[rid]))?;
        self.kv.delete(tables::IDP_DRAFTS, &self.key(&[rid]))?;
        self.kv.delete(tables::INCOMING, &self.key(&[rid]))?;
        self.kv.delete(tables::AS_REQUESTS, &self.key(&[rid]))?;
        tracing::debug!(
            target: "storage",
            request_id = %request_id,
            buffered,
            challenges,
            proofs,
            "purged request sessions"
        );
        Ok(())
    }
}
