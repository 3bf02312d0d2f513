use super::types::*;
use super::RpcState;
use crate::error::WebWalletError;
use crate::wallet::WebWallet;
use axum::{debug_handler, extract::State, Json};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Main dispatcher: routes incoming JSON-RPC requests to the correct handler.
#[debug_handler]
pub async fn handle_rpc_request(
    State(state): State<RpcState>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    debug!("RPC Request: method={}, id={}", req.method, req.id);
    let ww = state.wallet.as_ref();

    let result = match req.method.as_str() {
        // Polling
        "heartbeat" => handle_heartbeat(ww).await,
        "getBalance" => handle_get_balance(ww, req.params).await,
        "getBlockHeight" => handle_get_block_height(ww, req.params).await,
        "getBootstrapperProgress" => to_json(&ProgressInfo {
            progress: ww.bootstrapper_progress(),
        }),
        "getConsensusBuilderProgress" => to_json(&ProgressInfo {
            progress: ww.consensus_builder_progress(),
        }),
        // Node startup
        "getNodeStage" => to_json(&ww.node_stage()),
        "initializeBootstrapper" => handle_initialize_bootstrapper(ww).await,
        "initializeConsensusBuilder" => handle_initialize_consensus_builder(ww).await,
        // Pages
        "renderPage" => handle_render_page(ww, req.params).await,
        "getActionStatus" => handle_get_action_status(ww, req.params).await,
        "showForm" => handle_show_form(ww, req.params).await,
        "getPrivacy" => handle_get_privacy(ww, req.params).await,
        "expandMenu" => handle_expand_menu(ww, req.params).await,
        "collapseMenu" => handle_collapse_menu(ww, req.params).await,
        "setHistoryPage" => handle_set_history_page(ww, req.params).await,
        "exportHistoryCsv" => handle_export_history_csv(ww, req.params).await,
        // Wallet actions
        "unlockWallet" => handle_unlock_wallet(ww, req.params).await,
        "initializeSeed" => handle_initialize_seed(ww, req.params).await,
        "restoreSeed" => handle_restore_seed(ww, req.params).await,
        "lockWallet" => handle_lock_wallet(ww, req.params).await,
        "changeLock" => handle_change_lock(ww, req.params).await,
        "sendCoins" => handle_send_coins(ww, req.params).await,
        "recoverSeed" => handle_recover_seed(ww, req.params).await,
        "getReceiveAddress" => handle_get_receive_address(ww, req.params).await,
        "getTransaction" => handle_get_transaction(ww, req.params).await,
        _ => Err(RpcError {
            code: -32601,
            message: format!("Method not found: {}", req.method),
        }),
    };

    // Build response
    match result {
        Ok(val) => Json(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(val),
            error: None,
            id: req.id,
        }),
        Err(err) => Json(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(err),
            id: req.id,
        }),
    }
}

//
// === Helper Functions ===
//

/// Safely serialize to JSON value
fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError {
        code: -32603,
        message: format!("Serialization error: {}", e),
    })
}

/// Missing params are read as an empty object.
fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, RpcError> {
    let params = if params.is_null() {
        serde_json::json!({})
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| RpcError {
        code: -32602,
        message: format!("Invalid params: {}", e),
    })
}

fn to_rpc_error(err: WebWalletError) -> RpcError {
    warn!("RPC call failed: {}", err);
    let code = match err {
        WebWalletError::NotReady(_) => -32002,
        WebWalletError::Busy(_) => -32001,
        _ => -32000,
    };
    RpcError {
        code,
        message: err.to_string(),
    }
}

//
// === Individual Handlers ===
//

/// Handle heartbeat
async fn handle_heartbeat(ww: &WebWallet) -> Result<serde_json::Value, RpcError> {
    let beat = ww.heartbeat();
    to_json(&HeartbeatInfo {
        beat,
        timeout_ms: ww.config().server.heartbeat_timeout_ms,
    })
}

/// Handle getBalance
async fn handle_get_balance(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.balances(p.session_id.as_deref().unwrap_or_default()))
}

/// Handle getBlockHeight
async fn handle_get_block_height(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.block_height(p.session_id.as_deref().unwrap_or_default()))
}

async fn handle_initialize_bootstrapper(ww: &WebWallet) -> Result<serde_json::Value, RpcError> {
    let stage = ww.initialize_bootstrapper().map_err(to_rpc_error)?;
    to_json(&stage)
}

async fn handle_initialize_consensus_builder(ww: &WebWallet) -> Result<serde_json::Value, RpcError> {
    let stage = ww.initialize_consensus_builder().await.map_err(to_rpc_error)?;
    to_json(&stage)
}

async fn handle_render_page(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.gui(p.session_id.as_deref()))
}

async fn handle_get_action_status(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.action_status(p.session_id.as_deref()))
}

async fn handle_show_form(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: ShowFormParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    to_json(&ww.respond(id, ww.show_form(id, p.form)))
}

async fn handle_get_privacy(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.privacy(p.session_id.as_deref()))
}

async fn handle_expand_menu(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.expand_menu(p.session_id.as_deref()))
}

async fn handle_collapse_menu(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    to_json(&ww.collapse_menu(p.session_id.as_deref()))
}

async fn handle_set_history_page(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SetHistoryPageParams = parse_params(params)?;
    to_json(&ww.set_history_page(p.session_id.as_deref(), p.page))
}

/// Handle exportHistoryCsv. A failed export downloads as `failed`.
async fn handle_export_history_csv(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    let content = ww
        .history_csv(p.session_id.as_deref().unwrap_or_default())
        .unwrap_or_else(|e| {
            warn!("Unable to export history: {}", e);
            "failed".to_string()
        });
    to_json(&CsvExport {
        filename: "history.csv".to_string(),
        content,
    })
}

async fn handle_unlock_wallet(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: UnlockWalletParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    let result = ww.unlock(id, &p.wallet, &p.password).await;
    to_json(&ww.respond(id, result))
}

async fn handle_initialize_seed(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: InitializeSeedParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    let result = ww
        .initialize_seed(id, &p.wallet, &p.new_password, &p.confirm_password)
        .await;
    to_json(&ww.respond(id, result))
}

async fn handle_restore_seed(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: RestoreSeedParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    let result = ww
        .restore_seed(id, &p.wallet, &p.new_password, &p.confirm_password, &p.seed)
        .await;
    to_json(&ww.respond(id, result))
}

async fn handle_lock_wallet(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    to_json(&ww.respond(id, ww.lock_wallet(id)))
}

async fn handle_change_lock(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: ChangeLockParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    let result = ww.change_lock(id, &p.orig_password, &p.new_password, &p.confirm_password);
    to_json(&ww.respond(id, result))
}

async fn handle_send_coins(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SendCoinsParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    let result = ww.send(id, &p.destination, &p.amount, &p.coin_type);
    to_json(&ww.respond(id, result))
}

async fn handle_recover_seed(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    to_json(&ww.respond(id, ww.recover_seed(id)))
}

async fn handle_get_receive_address(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SessionParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    to_json(&ww.respond(id, ww.receive_address(id)))
}

async fn handle_get_transaction(ww: &WebWallet, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: GetTransactionParams = parse_params(params)?;
    let id = p.session_id.as_deref();
    to_json(&ww.respond(id, ww.transaction(id, &p.transaction_id)))
}
