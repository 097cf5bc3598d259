use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::node::{Node, NodeError, TransactionMiner};
use crate::wallet::{Address, Transaction, TransactionError};

/// Node shared by every handler
pub type NodeData = web::Data<Node>;

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Arbitrary payload stored in the block
    #[schema(value_type = Object)]
    pub data: Value,
}

/// Request for the transact endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactRequest {
    /// The recipient's address
    pub recipient: Address,

    /// The amount to send
    pub amount: u64,
}

/// Response for the transact endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactResponse {
    /// The pooled transaction, as created or amended
    pub transaction: Transaction,
}

fn error_response(err: NodeError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        NodeError::Transaction(TransactionError::AmountExceedsBalance { .. }) => {
            HttpResponse::BadRequest().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/api/blocks",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = Vec<Block>)
    )
)]
pub async fn get_blocks(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.chain())
}

/// Get the transaction pool
///
/// Returns pooled transactions keyed by id
#[utoipa::path(
    get,
    path = "/api/transaction-pool-map",
    responses(
        (status = 200, description = "Transaction pool retrieved successfully", body = Object)
    )
)]
pub async fn get_transaction_pool_map(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.transaction_map())
}

/// Mine a block holding arbitrary data
///
/// The block is appended to the local chain and the chain is broadcast.
/// Returns the updated chain.
#[utoipa::path(
    post,
    path = "/api/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = Vec<Block>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine(node: NodeData, mine_req: web::Json<MineRequest>) -> impl Responder {
    match node.mine_raw(mine_req.into_inner().data).await {
        Ok(_) => HttpResponse::Ok().json(node.chain()),
        Err(err) => error_response(err),
    }
}

/// Send coins from the node wallet
///
/// Amends this wallet's pooled transaction when there is one, creates a new
/// transaction otherwise. The result is pooled and broadcast.
#[utoipa::path(
    post,
    path = "/api/transact",
    request_body = TransactRequest,
    responses(
        (status = 200, description = "Transaction pooled successfully", body = TransactResponse),
        (status = 400, description = "Amount exceeds balance"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn transact(node: NodeData, transact_req: web::Json<TransactRequest>) -> impl Responder {
    let TransactRequest { recipient, amount } = transact_req.into_inner();

    match node.transact(recipient, amount).await {
        Ok(transaction) => HttpResponse::Ok().json(TransactResponse { transaction }),
        Err(err) => error_response(err),
    }
}

/// Mine the pooled transactions
///
/// Valid pooled transactions and a reward for this node go into a new block.
/// Returns the updated chain.
#[utoipa::path(
    post,
    path = "/api/mine-transactions",
    responses(
        (status = 200, description = "Transactions mined successfully", body = Vec<Block>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_transactions(node: NodeData) -> impl Responder {
    let miner = TransactionMiner::new(node.get_ref().clone());

    match miner.mine_transactions().await {
        Ok(_) => HttpResponse::Ok().json(node.chain()),
        Err(err) => error_response(err),
    }
}

/// Get the node wallet
///
/// The balance is replayed from the local chain
#[utoipa::path(
    get,
    path = "/api/wallet-info",
    responses(
        (status = 200, description = "Wallet info retrieved successfully", body = WalletInfo)
    )
)]
pub async fn wallet_info(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.wallet_info())
}

/// Check if the local chain is valid
#[utoipa::path(
    get,
    path = "/api/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.is_chain_valid())
}
