// JSON-RPC 2.0 envelope and the parameters of each wallet method
use serde::{Deserialize, Serialize};

use crate::wallet::view::Form;

#[derive(Deserialize, Debug)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Method-specific parameter types

#[derive(Deserialize, Debug, Default)]
pub struct SessionParams {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UnlockWalletParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub wallet: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct InitializeSeedParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub wallet: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Deserialize, Debug)]
pub struct RestoreSeedParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub wallet: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub seed: String,
}

#[derive(Deserialize, Debug)]
pub struct ChangeLockParams {
    pub session_id: Option<String>,
    #[serde(default)]
    pub orig_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Deserialize, Debug)]
pub struct SendCoinsParams {
    pub session_id: Option<String>,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub coin_type: String,
}

#[derive(Deserialize, Debug)]
pub struct GetTransactionParams {
    pub session_id: Option<String>,
    #[serde(default)]
    pub transaction_id: String,
}

#[derive(Deserialize, Debug)]
pub struct SetHistoryPageParams {
    pub session_id: Option<String>,
    pub page: usize,
}

#[derive(Deserialize, Debug)]
pub struct ShowFormParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub form: Form,
}

#[derive(Serialize, Debug)]
pub struct ProgressInfo {
    pub progress: String,
}

#[derive(Serialize, Debug)]
pub struct HeartbeatInfo {
    pub beat: u64,
    pub timeout_ms: u64,
}

#[derive(Serialize, Debug)]
pub struct CsvExport {
    pub filename: String,
    pub content: String,
}
