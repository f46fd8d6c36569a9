//! RPC command handlers.
//!
//! Each submodule implements the commands for one resource.

pub mod draws;
pub mod subscribers;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::rpc::RpcError;

type Result = std::result::Result<Value, RpcError>;

/// Decode method params; a missing params member reads as `{}`.
fn params<T: DeserializeOwned>(params: &Value) -> std::result::Result<T, RpcError> {
    let value = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}
