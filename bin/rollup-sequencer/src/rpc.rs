//! JSON-RPC ingress and block distribution.

use std::{collections::BTreeMap, fmt::Display, net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jsonrpsee::{
    core::RpcResult,
    proc_macros::rpc,
    server::{ServerBuilder, ServerHandle},
    types::{
        error::{INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE},
        ErrorObjectOwned,
    },
    RpcModule,
};
use rollup_block_cache::{BlockCache, BlockCacheError};
use rollup_codec::{Block, CodecResult, GetBlocksResponse, InnerProofData};
use rollup_proof_pipeline::TxProof;
use rollup_publish_timer::{BridgeId, PublishTimeManager, RollupTimeout};
use rollup_sequencer::{
    BridgeClaim, SequencerError, SequencerHandle, SequencerStatus, TxKind, TxSubmission,
};
use serde::{Deserialize, Serialize};
use tracing::*;

/// Most blocks returned by a single `getBlocks` call.
const MAX_BLOCKS_PER_REQUEST: u32 = 100;

/// The identifier has used up its daily quota.
const ADMISSION_REJECTED_CODE: i32 = -32001;

/// This replica is on standby.
const NOT_LEADER_CODE: i32 = -32002;

/// A batch is in a state that forbids the request.
const BATCH_STATE_CODE: i32 = -32003;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RpcBridgeClaim {
    pub bridge_id: BridgeId,
    pub interaction_nonce: u32,
    #[serde(with = "hex")]
    pub claim_data: Vec<u8>,
}

/// A client tx with its proof bytes hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RpcPendingTx {
    pub identifier: String,
    pub kind: TxKind,
    pub fee_asset: u32,
    pub fee_amount: u64,
    #[serde(with = "hex")]
    pub proof_data: Vec<u8>,
    /// Encoded inner proof record of the tx.
    #[serde(with = "hex")]
    pub public_inputs: Vec<u8>,
    #[serde(default)]
    pub claim: Option<RpcBridgeClaim>,
}

impl RpcPendingTx {
    fn into_submission(self) -> CodecResult<TxSubmission> {
        let public_inputs = InnerProofData::read_from(&self.public_inputs)?;
        Ok(TxSubmission {
            identifier: self.identifier,
            kind: self.kind,
            fee_asset: self.fee_asset,
            fee_amount: self.fee_amount,
            proof: TxProof {
                proof_data: self.proof_data,
                public_inputs,
            },
            claim: self.claim.map(|c| BridgeClaim {
                bridge_id: c.bridge_id,
                interaction_nonce: c.interaction_nonce,
                claim_data: c.claim_data,
            }),
        })
    }
}

/// Upcoming publish deadline, for the base interval and each bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RpcTimeout {
    pub rollup_number: u64,
    pub timeout_ms: u64,
    /// `timeout_ms` as RFC 3339.
    pub timeout: Option<String>,
    pub bridge_timeouts: BTreeMap<BridgeId, RollupTimeout>,
}

#[rpc(server, namespace = "rollup")]
pub(crate) trait RollupRpc {
    /// Admits a tx. Returns its id.
    #[method(name = "submitTx")]
    async fn submit_tx(&self, tx: RpcPendingTx) -> RpcResult<String>;

    /// Published blocks from `from` onwards, as a hex encoded `GetBlocksResponse`.
    ///
    /// Stops at the first block the cache does not hold.
    #[method(name = "getBlocks")]
    async fn get_blocks(&self, from: u32, take: u32) -> RpcResult<String>;

    #[method(name = "getStatus")]
    async fn get_status(&self) -> RpcResult<SequencerStatus>;

    /// `None` when the publish interval is disabled.
    #[method(name = "getNextPublishTime")]
    async fn get_next_publish_time(&self) -> RpcResult<Option<RpcTimeout>>;

    /// Closes a batch from the pending txs at the next evaluation.
    #[method(name = "flush")]
    async fn flush(&self) -> RpcResult<()>;

    /// Settles a rollup whose publication outcome was unknown.
    #[method(name = "resolveUnconfirmed")]
    async fn resolve_unconfirmed(&self, landed: bool) -> RpcResult<u32>;
}

#[derive(Debug)]
pub(crate) struct RollupRpcImpl {
    handle: SequencerHandle,
    blocks: Arc<BlockCache<Block>>,
    timer: PublishTimeManager,
}

impl RollupRpcImpl {
    pub(crate) fn new(
        handle: SequencerHandle,
        blocks: Arc<BlockCache<Block>>,
        timer: PublishTimeManager,
    ) -> Self {
        Self {
            handle,
            blocks,
            timer,
        }
    }
}

#[async_trait]
impl RollupRpcServer for RollupRpcImpl {
    async fn submit_tx(&self, tx: RpcPendingTx) -> RpcResult<String> {
        let submission = tx.into_submission().map_err(invalid_params_error)?;
        let id = self
            .handle
            .submit_tx(submission)
            .await
            .map_err(map_sequencer_error_to_rpc)?;
        Ok(hex::encode(id))
    }

    async fn get_blocks(&self, from: u32, take: u32) -> RpcResult<String> {
        let response = blocks_response(&self.blocks, from, take).map_err(invalid_params_error)?;
        let encoded = response.encode().map_err(internal_error)?;
        Ok(hex::encode(encoded))
    }

    async fn get_status(&self) -> RpcResult<SequencerStatus> {
        self.handle
            .get_status()
            .await
            .map_err(map_sequencer_error_to_rpc)
    }

    async fn get_next_publish_time(&self) -> RpcResult<Option<RpcTimeout>> {
        Ok(next_publish_time(&self.timer))
    }

    async fn flush(&self) -> RpcResult<()> {
        self.handle
            .flush()
            .await
            .map_err(map_sequencer_error_to_rpc)
    }

    async fn resolve_unconfirmed(&self, landed: bool) -> RpcResult<u32> {
        self.handle
            .resolve_unconfirmed(landed)
            .await
            .map_err(map_sequencer_error_to_rpc)
    }
}

/// Starts the RPC server on `addr`.
pub(crate) async fn start_rpc(addr: SocketAddr, server: RollupRpcImpl) -> Result<ServerHandle> {
    let mut module = RpcModule::new(());
    module
        .merge(RollupRpcServer::into_rpc(server))
        .map_err(|e| anyhow!("Failed to merge rollup RPC module: {e}"))?;

    let rpc_server = ServerBuilder::new()
        .build(addr)
        .await
        .map_err(|e| anyhow!("Failed to build RPC server on {addr}: {e}"))?;

    Ok(rpc_server.start(module))
}

/// Contiguous published blocks starting at `from`, capped at [`MAX_BLOCKS_PER_REQUEST`].
fn blocks_response(
    blocks: &BlockCache<Block>,
    from: u32,
    take: u32,
) -> Result<GetBlocksResponse, BlockCacheError> {
    let take = take.min(MAX_BLOCKS_PER_REQUEST);
    let query = blocks.get_blocks(from as usize, take as usize)?;
    let latest_rollup_id = blocks
        .latest_index()
        .map_or(-1, |idx| i32::try_from(idx).unwrap_or(i32::MAX));

    Ok(GetBlocksResponse {
        latest_rollup_id,
        blocks: query.results.into_iter().map_while(|slot| slot).collect(),
    })
}

fn next_publish_time(timer: &PublishTimeManager) -> Option<RpcTimeout> {
    let next = timer.next_timeout()?;
    Some(RpcTimeout {
        rollup_number: next.rollup_number,
        timeout_ms: next.timeout_ms,
        timeout: next.as_datetime().map(|dt| dt.to_rfc3339()),
        bridge_timeouts: timer.next_bridge_timeouts(),
    })
}

// === RPC Error Helpers ===

/// Creates an RPC error for internal failures.
fn internal_error(msg: impl Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INTERNAL_ERROR_CODE, msg.to_string(), None::<()>)
}

/// Creates an RPC error for invalid parameters.
fn invalid_params_error(msg: impl Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INVALID_PARAMS_CODE, msg.to_string(), None::<()>)
}

/// Maps sequencer errors to RPC errors with appropriate error codes.
fn map_sequencer_error_to_rpc(err: SequencerError) -> ErrorObjectOwned {
    match &err {
        SequencerError::AdmissionRejected { .. } => {
            ErrorObjectOwned::owned(ADMISSION_REJECTED_CODE, err.to_string(), None::<()>)
        }
        SequencerError::NotLeader => {
            ErrorObjectOwned::owned(NOT_LEADER_CODE, err.to_string(), None::<()>)
        }
        SequencerError::BatchInProgress(_)
        | SequencerError::UnconfirmedBatch(_)
        | SequencerError::NoUnconfirmedBatch
        | SequencerError::NothingToClose => {
            ErrorObjectOwned::owned(BATCH_STATE_CODE, err.to_string(), None::<()>)
        }
        SequencerError::DuplicateTx(_) | SequencerError::Codec(_) => {
            invalid_params_error(err)
        }
        SequencerError::ProofJobFailed(_)
        | SequencerError::RollupMismatch { .. }
        | SequencerError::PublishFailed(_)
        | SequencerError::WorldState(_)
        | SequencerError::BlockCache(_)
        | SequencerError::Lock(_)
        | SequencerError::Unrecorded { .. }
        | SequencerError::Halted(_)
        | SequencerError::RequestChannelClosed
        | SequencerError::ResponseChannelClosed => {
            error!(?err, "Internal sequencer error");
            internal_error(err)
        }
    }
}
