// Path: crates/storage/src/keys.rs
//! Table names and key layouts of the orchestration store.
//!
//! Every key starts with `node_id \0`. Textual parts follow, each terminated
//! by `\0`. Gate keys embed the height as big-endian bytes so a prefix scan
//! yields entries in height order.

use ndid_api::storage::be64;
use ndid_types::app::{NodeId, RequestId};

/// Table names.
pub mod tables {
    /// RP request records.
    pub const REQUESTS: &str = "requests";
    /// RP `reference_id -> request_id`.
    pub const REFERENCES: &str = "references";
    /// Absolute timeout deadlines.
    pub const TIMEOUTS: &str = "timeouts";
    /// Submitted transactions awaiting commit.
    pub const EXPECTED_TX: &str = "expected_tx";
    /// Messages waiting for a block height.
    pub const GATE: &str = "gate";
    /// Client callbacks awaiting delivery.
    pub const CALLBACKS: &str = "callbacks";
    /// IdP responses in flight.
    pub const IDP_DRAFTS: &str = "idp_drafts";
    /// Consent requests an IdP accepted.
    pub const INCOMING: &str = "incoming";
    /// Challenges an RP issued, per IdP.
    pub const RP_CHALLENGES: &str = "rp_challenges";
    /// IdP response messages an RP received, per IdP.
    pub const IDP_PROOFS: &str = "idp_proofs";
    /// Data requests an AS validated.
    pub const AS_REQUESTS: &str = "as_requests";
    /// AS data an RP received.
    pub const AS_DATA: &str = "as_data";
    /// Node settings and counters.
    pub const META: &str = "meta";
}

const SEP: u8 = 0;

/// `node \0`
pub fn node_prefix(node: &NodeId) -> Vec<u8> {
    let mut k = Vec::with_capacity(node.as_str().len() + 1);
    k.extend_from_slice(node.as_str().as_bytes());
    k.push(SEP);
    k
}

/// `node \0 part1 \0 part2 \0 ...`
pub fn scoped(node: &NodeId, parts: &[&str]) -> Vec<u8> {
    let mut k = node_prefix(node);
    for p in parts {
        k.extend_from_slice(p.as_bytes());
        k.push(SEP);
    }
    k
}

/// `node \0 be64(height) request_id \0 digest`
pub fn gate_key(node: &NodeId, height: u64, request_id: &RequestId, digest: &str) -> Vec<u8> {
    let mut k = node_prefix(node);
    k.extend_from_slice(&be64(height));
    k.extend_from_slice(request_id.as_str().as_bytes());
    k.push(SEP);
    k.extend_from_slice(digest.as_bytes());
    k
}

/// Splits a gate key back into height and request id.
pub fn parse_gate_key(node: &NodeId, key: &[u8]) -> Option<(u64, RequestId)> {
    let rest = key.strip_prefix(node_prefix(node).as_slice())?;
    let (height, rest) = rest.split_first_chunk::<8>()?;
    let end = rest.iter().position(|b| *b == SEP)?;
    let rid = std::str::from_utf8(rest.get(..end)?).ok()?;
    Some((u64::from_be_bytes(*height), RequestId::new(rid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_keys_sort_by_height() {
        let node = NodeId::from("rp1");
        let rid = RequestId::from("ab");
        let low = gate_key(&node, 9, &rid, "ff");
        let high = gate_key(&node, 256, &rid, "00");
        assert!(low < high);
        assert_eq!(parse_gate_key(&node, &high), Some((256, rid)));
    }

    #[test]
    fn scoped_keys_do_not_collide_across_nodes() {
        let a = scoped(&NodeId::from("n1"), &["r"]);
        let b = scoped(&NodeId::from("n10"), &["r"]);
        assert!(!b.starts_with(&node_prefix(&NodeId::from("n1"))));
        assert_ne!(a, b);
    }
}
