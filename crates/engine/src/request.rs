// Path: crates/engine/src/request.rs
//! Request status derivation.

use ndid_types::app::{
    CallbackBody, Mode, NodeId, RequestDetail, RequestId, RequestRecord, RequestStatus,
    ResponseStatus, ResponseValidity, ServiceStatus,
};
use serde::{Deserialize, Serialize};

/// Derives the status of a request from its ledger record and the
/// requester's judgements of the responses.
///
/// An accept judged invalid counts as a reject. Responses without a
/// judgement are taken as the ledger records them. `closed` and `timed_out`
/// are not folded in; they are reported next to the derived status.
pub fn derive_status(detail: &RequestDetail, validity: &[ResponseValidity]) -> RequestStatus {
    if detail.responses.is_empty() {
        return RequestStatus::Pending;
    }
    let judged_invalid = |idp_id: &NodeId| {
        validity
            .iter()
            .any(|v| &v.idp_id == idp_id && !v.is_valid())
    };
    let accepted = detail
        .responses
        .iter()
        .filter(|r| r.status == ResponseStatus::Accept && !judged_invalid(&r.idp_id))
        .count();
    let rejected = detail.responses.len() - accepted;
    let status = match (accepted > 0, rejected > 0) {
        (true, false) => RequestStatus::Confirmed,
        (false, true) => RequestStatus::Rejected,
        _ => RequestStatus::Complicated,
    };
    if status != RequestStatus::Confirmed {
        return status;
    }

    let complete = if detail.data_request_list.is_empty() {
        u32::try_from(detail.responses.len()).is_ok_and(|n| n == detail.min_idp)
    } else {
        detail
            .data_request_list
            .iter()
            .all(|s| s.signed_count() >= s.min_as && s.received_count() >= s.min_as)
    };
    if complete {
        RequestStatus::Completed
    } else {
        status
    }
}

/// The status of a request as reported to the RP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatusReport {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub mode: Mode,
    pub min_idp: u32,
    pub answered_idp_count: u32,
    pub closed: bool,
    pub timed_out: bool,
    pub service_list: Vec<ServiceStatus>,
    pub response_valid_list: Vec<ResponseValidity>,
    pub block_height: u64,
}

impl RequestStatusReport {
    /// Builds the report from the ledger record and, when this node is the
    /// requester, its local validity judgements.
    pub fn new(detail: &RequestDetail, record: Option<&RequestRecord>, block_height: u64) -> Self {
        Self {
            request_id: detail.request_id.clone(),
            status: derive_status(
                detail,
                record
                    .map(|r| r.response_validity.as_slice())
                    .unwrap_or_default(),
            ),
            mode: detail.mode,
            min_idp: detail.min_idp,
            answered_idp_count: u32::try_from(detail.responses.len()).unwrap_or(u32::MAX),
            closed: detail.closed,
            timed_out: detail.timed_out,
            service_list: detail
                .data_request_list
                .iter()
                .map(|s| ServiceStatus {
                    service_id: s.service_id.clone(),
                    min_as: s.min_as,
                    signed_data_count: s.signed_count(),
                    received_data_count: s.received_count(),
                })
                .collect(),
            response_valid_list: record
                .map(|r| r.response_validity.clone())
                .unwrap_or_default(),
            block_height,
        }
    }

    /// Whether the request is done from the RP's point of view.
    pub fn is_completed(&self) -> bool {
        self.status == RequestStatus::Completed
    }

    pub fn into_callback(self) -> CallbackBody {
        CallbackBody::RequestStatusUpdate {
            request_id: self.request_id,
            status: self.status,
            mode: self.mode,
            min_idp: self.min_idp,
            answered_idp_count: self.answered_idp_count,
            closed: self.closed,
            timed_out: self.timed_out,
            service_list: self.service_list,
            response_valid_list: self.response_valid_list,
            block_height: self.block_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_types::app::{IdpResponse, ServiceDetail};

    fn detail(min_idp: u32) -> RequestDetail {
        RequestDetail {
            request_id: RequestId::from("r1"),
            requester_node_id: NodeId::from("rp1"),
            mode: Mode::One,
            min_idp,
            min_ial: 1.1,
            min_aal: 1.0,
            request_timeout: 60,
            idp_id_list: vec![NodeId::from("idp1"), NodeId::from("idp2")],
            request_message_hash: String::new(),
            data_request_list: vec![],
            responses: vec![],
            closed: false,
            timed_out: false,
            creation_block_height: 1,
        }
    }

    fn response(idp: &str, status: ResponseStatus) -> IdpResponse {
        IdpResponse {
            idp_id: NodeId::from(idp),
            status,
            ial: 2.3,
            aal: 2.2,
            signature: String::new(),
            accessor_id: None,
            identity_proof: None,
            private_proof_hash: None,
        }
    }

    fn service(min_as: u32, signed: &[&str], received: &[&str]) -> ServiceDetail {
        ServiceDetail {
            service_id: "bank_statement".into(),
            as_id_list: vec![NodeId::from("as1"), NodeId::from("as2")],
            min_as,
            request_params_hash: String::new(),
            answered_as_id_list: signed.iter().map(|s| NodeId::from(*s)).collect(),
            received_data_from_list: received.iter().map(|s| NodeId::from(*s)).collect(),
        }
    }

    #[test]
    fn response_mix_decides_the_base_status() {
        let mut d = detail(2);
        assert_eq!(derive_status(&d, &[]), RequestStatus::Pending);
        d.responses.push(response("idp1", ResponseStatus::Accept));
        assert_eq!(derive_status(&d, &[]), RequestStatus::Confirmed);
        d.responses.push(response("idp2", ResponseStatus::Reject));
        assert_eq!(derive_status(&d, &[]), RequestStatus::Complicated);
        d.responses.remove(0);
        assert_eq!(derive_status(&d, &[]), RequestStatus::Rejected);
    }

    #[test]
    fn without_services_completion_needs_min_idp_responses() {
        let mut d = detail(2);
        d.responses.push(response("idp1", ResponseStatus::Accept));
        assert_eq!(derive_status(&d, &[]), RequestStatus::Confirmed);
        d.responses.push(response("idp2", ResponseStatus::Accept));
        assert_eq!(derive_status(&d, &[]), RequestStatus::Completed);
    }

    #[test]
    fn with_services_completion_needs_signed_and_received_data() {
        let mut d = detail(1);
        d.responses.push(response("idp1", ResponseStatus::Accept));
        d.data_request_list.push(service(1, &[], &[]));
        assert_eq!(derive_status(&d, &[]), RequestStatus::Confirmed);

        d.data_request_list[0] = service(1, &["as1"], &[]);
        assert_eq!(derive_status(&d, &[]), RequestStatus::Confirmed);

        d.data_request_list[0] = service(1, &["as1"], &["as1"]);
        assert_eq!(derive_status(&d, &[]), RequestStatus::Completed);

        d.data_request_list[0] = service(2, &["as1"], &["as1"]);
        assert_eq!(derive_status(&d, &[]), RequestStatus::Confirmed);
    }

    fn invalid(idp: &str) -> ResponseValidity {
        ResponseValidity {
            idp_id: NodeId::from(idp),
            valid_signature: Some(true),
            valid_proof: Some(false),
            valid_ial: Some(true),
        }
    }

    #[test]
    fn accept_with_a_failed_proof_counts_as_reject() {
        let mut d = detail(1);
        d.mode = Mode::Three;
        d.responses.push(response("idp1", ResponseStatus::Accept));
        assert_eq!(derive_status(&d, &[invalid("idp1")]), RequestStatus::Rejected);

        d.min_idp = 2;
        d.responses.push(response("idp2", ResponseStatus::Accept));
        assert_eq!(derive_status(&d, &[invalid("idp1")]), RequestStatus::Complicated);

        let mut valid = invalid("idp1");
        valid.valid_proof = Some(true);
        assert_eq!(derive_status(&d, &[valid]), RequestStatus::Completed);
    }

    #[test]
    fn status_report_uses_the_local_judgements() {
        let mut d = detail(1);
        d.responses.push(response("idp1", ResponseStatus::Accept));
        let record = RequestRecord {
            request_id: RequestId::from("r1"),
            reference_id: "ref-1".into(),
            callback_url: "http://rp1.test/callback".into(),
            mode: Mode::Three,
            identity: ndid_types::app::Identity::new("citizen_id", "1234567890123"),
            request_message: "consent?".into(),
            request_message_salt: "c2FsdA==".into(),
            idp_id_list: vec![NodeId::from("idp1")],
            min_idp: 1,
            min_ial: 1.1,
            min_aal: 1.0,
            request_timeout: 60,
            data_request_list: vec![],
            created_at_ms: 0,
            data_request_forwarded: false,
            response_validity: vec![invalid("idp1")],
        };
        let report = RequestStatusReport::new(&d, Some(&record), 3);
        assert_eq!(report.status, RequestStatus::Rejected);
        assert!(!report.is_completed());
        assert_eq!(report.response_valid_list.len(), 1);
    }

    #[test]
    fn flags_are_reported_not_derived() {
        let mut d = detail(1);
        d.responses.push(response("idp1", ResponseStatus::Accept));
        d.closed = true;
        let report = RequestStatusReport::new(&d, None, 9);
        assert_eq!(report.status, RequestStatus::Completed);
        assert!(report.closed);
        assert_eq!(report.answered_idp_count, 1);
    }
}
