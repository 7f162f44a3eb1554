// Path: crates/client/src/ledger_client/queries.rs

//! Typed wrappers over the ledger queries the engine issues.

use super::LedgerClient;
use ndid_api::ledger::LedgerError;
use ndid_types::app::{
    AccessorArgs, AccessorInfo, AsNode, DataSignatureArgs, DataSignatureRecord, GetIdpNodesArgs,
    IdentityProofArgs, IdentityProofRecord, IdpNode, LedgerQuery, NodeId, NodeIdArgs, NodeInfo,
    PeerAddress, RequestDetail, RequestId, RequestIdArgs, ServiceIdArgs,
};

impl LedgerClient {
    pub async fn request_detail(&self, request_id: &RequestId) -> Result<Option<RequestDetail>, LedgerError> {
        let args = RequestIdArgs {
            request_id: request_id.clone(),
        };
        self.query(LedgerQuery::GetRequestDetail, &args).await
    }

    pub async fn node_info(&self, node_id: &NodeId) -> Result<Option<NodeInfo>, LedgerError> {
        let args = NodeIdArgs {
            node_id: node_id.clone(),
        };
        self.query(LedgerQuery::GetNodeInfo, &args).await
    }

    /// Active IdPs able to assert `min_ial`/`min_aal`, restricted to `node_id_list` when non-empty.
    pub async fn idp_nodes(
        &self,
        min_ial: f64,
        min_aal: f64,
        node_id_list: &[NodeId],
    ) -> Result<Vec<IdpNode>, LedgerError> {
        let args = GetIdpNodesArgs {
            min_ial,
            min_aal,
            node_id_list: node_id_list.to_vec(),
        };
        Ok(self
            .query(LedgerQuery::GetIdpNodes, &args)
            .await?
            .unwrap_or_default())
    }

    pub async fn as_nodes(&self, service_id: &str) -> Result<Vec<AsNode>, LedgerError> {
        let args = ServiceIdArgs {
            service_id: service_id.to_string(),
        };
        Ok(self
            .query(LedgerQuery::GetAsNodesByServiceId, &args)
            .await?
            .unwrap_or_default())
    }

    pub async fn accessor(&self, accessor_id: &str) -> Result<Option<AccessorInfo>, LedgerError> {
        let args = AccessorArgs {
            accessor_id: accessor_id.to_string(),
        };
        self.query(LedgerQuery::GetAccessor, &args).await
    }

    /// Commitments `idp_id` declared for a request.
    pub async fn identity_proof(
        &self,
        request_id: &RequestId,
        idp_id: &NodeId,
    ) -> Result<Option<Vec<String>>, LedgerError> {
        let args = IdentityProofArgs {
            request_id: request_id.clone(),
            idp_id: idp_id.clone(),
        };
        let record: Option<IdentityProofRecord> =
            self.query(LedgerQuery::GetIdentityProof, &args).await?;
        Ok(record.map(|r| r.identity_proof))
    }

    /// Signature an AS recorded with `SignData`.
    pub async fn data_signature(
        &self,
        request_id: &RequestId,
        service_id: &str,
        as_id: &NodeId,
    ) -> Result<Option<String>, LedgerError> {
        let args = DataSignatureArgs {
            request_id: request_id.clone(),
            service_id: service_id.to_string(),
            node_id: as_id.clone(),
        };
        let record: Option<DataSignatureRecord> =
            self.query(LedgerQuery::GetDataSignature, &args).await?;
        Ok(record.map(|r| r.signature))
    }

    /// Where a node receives peer messages. `None` if it is unknown, inactive
    /// or has no registered address.
    pub async fn peer_address(&self, node_id: &NodeId) -> Result<Option<PeerAddress>, LedgerError> {
        let Some(info) = self.node_info(node_id).await? else {
            return Ok(None);
        };
        if !info.active {
            return Ok(None);
        }
        Ok(match (info.ip, info.port) {
            (Some(ip), Some(port)) => Some(PeerAddress {
                node_id: info.node_id,
                ip,
                port,
                public_key: info.public_key,
            }),
            _ => None,
        })
    }
}
