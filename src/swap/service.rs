use tonic::{Request, Response, Status};

use crate::proto::v1 as pb;
use crate::swap::gateway::SwapGateway;
use crate::swap::{SwapError, SwapId, SwapRecord, SwapState};

/// gRPC front of [`SwapGateway`].
#[derive(Clone)]
pub struct SwapServiceImpl {
    gateway: SwapGateway,
}

impl SwapServiceImpl {
    pub fn new(gateway: SwapGateway) -> Self {
        Self { gateway }
    }
}

pub fn state_to_proto(state: SwapState) -> pb::SwapState {
    match state {
        SwapState::AwaitingFunds => pb::SwapState::AwaitingFunds,
        SwapState::FundsDetected => pb::SwapState::FundsDetected,
        SwapState::Settling => pb::SwapState::Settling,
        SwapState::Settled => pb::SwapState::Settled,
        SwapState::SettlementFailed => pb::SwapState::SettlementFailed,
    }
}

pub fn state_from_proto(state: pb::SwapState) -> Option<SwapState> {
    match state {
        pb::SwapState::Unspecified => None,
        pb::SwapState::AwaitingFunds => Some(SwapState::AwaitingFunds),
        pb::SwapState::FundsDetected => Some(SwapState::FundsDetected),
        pb::SwapState::Settling => Some(SwapState::Settling),
        pb::SwapState::Settled => Some(SwapState::Settled),
        pb::SwapState::SettlementFailed => Some(SwapState::SettlementFailed),
    }
}

pub fn record_to_proto(record: &SwapRecord) -> pb::Swap {
    pb::Swap {
        swap_id: record.swap_id.0,
        bolt11_invoice: record.bolt11_invoice.clone(),
        payment_hash: record.payment_hash.clone(),
        deposit_address: record.deposit_address.clone(),
        requested_amount_sat: record.requested_amount_sat,
        fee_sat: record.fee_sat,
        payout_amount_sat: record.payout_amount_sat,
        state: state_to_proto(record.state) as i32,
        receipt_txid: record.receipt_txid.clone(),
        received_amount_sat: record.received_amount_sat,
        payment_ref: record.payment_ref.clone(),
        failure_reason: record.failure_reason.clone(),
        reconciliation_required: record.reconciliation_required,
        reconciliation_note: record.reconciliation_note.clone(),
        created_at: record.created_at.timestamp(),
        updated_at: record.updated_at.timestamp(),
    }
}

fn status_from_error(err: SwapError) -> Status {
    match err {
        SwapError::RejectedTooSmall { .. } | SwapError::InvalidInvoice(_) => {
            Status::invalid_argument(err.to_string())
        }
        SwapError::NotFound(_) => Status::not_found(err.to_string()),
        SwapError::BackendUnavailable(_) => Status::unavailable(err.to_string()),
        SwapError::Internal(err) => Status::internal(format!("{err:#}")),
    }
}

#[tonic::async_trait]
impl pb::swap_service_server::SwapService for SwapServiceImpl {
    async fn create_swap(
        &self,
        request: Request<pb::CreateSwapRequest>,
    ) -> Result<Response<pb::CreateSwapResponse>, Status> {
        let req = request.into_inner();
        if req.bolt11_invoice.trim().is_empty() {
            return Err(Status::invalid_argument("bolt11_invoice is required"));
        }

        let record = self
            .gateway
            .create_swap(&req.bolt11_invoice, req.requested_amount_sat)
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(pb::CreateSwapResponse {
            swap: Some(record_to_proto(&record)),
        }))
    }

    async fn get_swap(
        &self,
        request: Request<pb::GetSwapRequest>,
    ) -> Result<Response<pb::Swap>, Status> {
        let req = request.into_inner();
        if req.swap_id == 0 {
            return Err(Status::invalid_argument("swap_id is required"));
        }

        let record = self
            .gateway
            .get_swap(SwapId(req.swap_id))
            .map_err(status_from_error)?;
        Ok(Response::new(record_to_proto(&record)))
    }

    async fn list_swaps(
        &self,
        request: Request<pb::ListSwapsRequest>,
    ) -> Result<Response<pb::ListSwapsResponse>, Status> {
        let req = request.into_inner();
        let state = pb::SwapState::try_from(req.state)
            .map_err(|_| Status::invalid_argument(format!("unknown state {}", req.state)))?;

        let swaps = self
            .gateway
            .list_swaps(state_from_proto(state), req.reconciliation_required_only)
            .map_err(status_from_error)?;

        Ok(Response::new(pb::ListSwapsResponse {
            swaps: swaps.iter().map(record_to_proto).collect(),
        }))
    }
}
