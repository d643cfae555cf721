use actix_web::{web, HttpResponse, Responder};
use dashmap::DashMap;
use log::{error, info};

use super::schema::{
    BlockAdmittedResponse, BlockResponse, ChainResponse, SubmitTransactionRequest,
    TransferRequest, ValidationResponse, WalletResponse,
};
use crate::blockchain::{Address, Block, DigitalSignature, Ledger, LedgerError, Transaction, Wallet};

/// Shared ledger handle
pub type LedgerData = web::Data<Ledger>;

/// Wallets custodied by this node, keyed by address
pub type WalletRegistry = DashMap<Address, Wallet>;

/// Shared wallet registry handle
pub type WalletData = web::Data<WalletRegistry>;

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

/// Maps a failed admission to an HTTP response
fn ledger_error_response(err: &LedgerError) -> HttpResponse {
    match err {
        LedgerError::InvalidSignature | LedgerError::PayerMismatch { .. } | LedgerError::Block(_) => {
            HttpResponse::BadRequest().json(error_body(format!("Transaction rejected: {}", err)))
        }
        LedgerError::Mining(_) => {
            HttpResponse::ServiceUnavailable().json(error_body(format!("Failed to mine block: {}", err)))
        }
        _ => {
            error!("Ledger failure: {}", err);
            HttpResponse::InternalServerError().json(error_body(err.to_string()))
        }
    }
}

/// Runs ledger work on the blocking thread pool so no async worker waits on
/// the chain lock or on mining
async fn run_blocking<F, R>(work: F) -> Result<R, HttpResponse>
where
    F: FnOnce() -> Result<R, LedgerError> + Send + 'static,
    R: Send + 'static,
{
    match web::block(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ledger_error_response(&err)),
        Err(err) => {
            error!("Ledger task failed: {}", err);
            Err(HttpResponse::InternalServerError().json(error_body("Ledger task failed".to_string())))
        }
    }
}

/// Runs an admission and renders the mined block
async fn admit_response<F>(admit: F) -> HttpResponse
where
    F: FnOnce() -> Result<Block, LedgerError> + Send + 'static,
{
    match run_blocking(admit).await {
        Ok(block) => HttpResponse::Created().json(BlockAdmittedResponse {
            message: "New Block Mined".to_string(),
            block: BlockResponse::from(&block),
        }),
        Err(response) => response,
    }
}

/// Get the full blockchain
///
/// Returns every block and the chain's validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.get_ref().clone();

    let snapshot = run_blocking(move || {
        let chain = ledger.chain()?;
        // Validity describes exactly the snapshot being returned
        let is_valid = ledger.validate_blocks(&chain).is_ok();

        Ok(ChainResponse {
            length: chain.len(),
            chain: chain.iter().map(BlockResponse::from).collect(),
            is_valid,
            difficulty: ledger.proof_of_work().difficulty(),
        })
    })
    .await;

    match snapshot {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Get the tip of the chain
#[utoipa::path(
    get,
    path = "/api/v1/chain/last",
    responses(
        (status = 200, description = "Last block retrieved successfully", body = BlockResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_last_block(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.get_ref().clone();

    match run_blocking(move || ledger.last_block()).await {
        Ok(block) => HttpResponse::Ok().json(BlockResponse::from(&block)),
        Err(response) => response,
    }
}

/// Check if the blockchain is valid
///
/// Validates linkage and proof of work across the entire chain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.get_ref().clone();

    let validation = match run_blocking(move || Ok(ledger.validate())).await {
        Ok(validation) => validation,
        Err(response) => return response,
    };

    let response = match validation {
        Ok(()) => ValidationResponse {
            is_valid: true,
            error: None,
        },
        Err(err) => ValidationResponse {
            is_valid: false,
            error: Some(err.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Create a new wallet
///
/// Generates a key pair held by this node and returns its address
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet(wallets: WalletData) -> impl Responder {
    let wallet = Wallet::new();
    let address = wallet.address().clone();
    info!("Created wallet {}", address);

    wallets.insert(address.clone(), wallet);

    HttpResponse::Created().json(WalletResponse { address: address.0 })
}

/// Transfer funds from a node wallet
///
/// Signs the transfer with the custodied wallet and mines it into a new block
#[utoipa::path(
    post,
    path = "/api/v1/transfer",
    request_body = TransferRequest,
    responses(
        (status = 201, description = "Transfer mined into a new block", body = BlockAdmittedResponse),
        (status = 400, description = "Invalid payee address or transaction rejected"),
        (status = 404, description = "Unknown wallet"),
        (status = 503, description = "Mining gave up before finding a solution")
    )
)]
pub async fn transfer(
    ledger: LedgerData,
    wallets: WalletData,
    transfer_req: web::Json<TransferRequest>,
) -> impl Responder {
    let transfer_req = transfer_req.into_inner();

    let wallet = match wallets.get(&Address(transfer_req.from.clone())) {
        Some(wallet) => wallet.value().clone(),
        None => {
            return HttpResponse::NotFound().json(error_body(format!(
                "Unknown wallet: {}",
                transfer_req.from
            )));
        }
    };

    let payee: Address = match transfer_req.to.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!(
                "Invalid payee address: {}",
                err
            )));
        }
    };
    let amount = transfer_req.amount;
    let ledger = ledger.get_ref().clone();

    admit_response(move || wallet.initiate_transfer(amount, &payee, &ledger)).await
}

/// Submit an externally signed transaction
#[utoipa::path(
    post,
    path = "/api/v1/transactions/submit",
    request_body = SubmitTransactionRequest,
    responses(
        (status = 201, description = "Transaction mined into a new block", body = BlockAdmittedResponse),
        (status = 400, description = "Transaction rejected"),
        (status = 503, description = "Mining gave up before finding a solution")
    )
)]
pub async fn submit_transaction(
    ledger: LedgerData,
    submit_req: web::Json<SubmitTransactionRequest>,
) -> impl Responder {
    let submit_req = submit_req.into_inner();

    let payer = Address(submit_req.payer);
    let transaction = Transaction::new(submit_req.amount, payer.clone(), Address(submit_req.payee));
    let signature = DigitalSignature(submit_req.signature);
    let ledger = ledger.get_ref().clone();

    admit_response(move || ledger.admit(transaction, &payer, &signature)).await
}
