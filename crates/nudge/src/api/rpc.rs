//! JSON request/response surface for frontends
//!
//! A request names an `action` and carries an action-specific `payload`. Every
//! request with a non-empty `id` and `action` gets exactly one response
//! echoing that `id`.

use nudge_api::{Config, SyncError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::engine::SyncEngine;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error code from `SyncError::kind`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl RpcResponse {
    fn ok(id: &str, data: Option<Value>) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            data,
            error: None,
            error_kind: None,
        }
    }

    fn failed(id: &str, error: String, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            data: None,
            error: Some(error),
            error_kind: Some(kind.to_string()),
        }
    }

    fn from_error(id: &str, err: &SyncError) -> Self {
        Self::failed(id, err.to_string(), err.kind())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenPayload {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResolvePayload {
    database_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListPayload {
    database_key: String,
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateStatusPayload {
    database_key: String,
    task_id: String,
    action: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateHabitPayload {
    database_key: String,
    task_id: String,
    checked: bool,
}

/// An absent or `null` payload reads as `{}`.
fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, String> {
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload.clone()
    };
    serde_json::from_value(payload).map_err(|e| e.to_string())
}

fn to_data<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Runs one request against the engine.
///
/// Returns `None` for requests without an id or action; those are dropped
/// silently since there is no one to answer.
pub async fn dispatch(engine: &Arc<SyncEngine>, request: RpcRequest) -> Option<RpcResponse> {
    let RpcRequest {
        id,
        action,
        payload,
    } = request;
    if id.is_empty() || action.is_empty() {
        return None;
    }
    debug!("[rpc] {} ({})", action, id);

    macro_rules! payload {
        ($ty:ty) => {
            match parse_payload::<$ty>(&payload) {
                Ok(p) => p,
                Err(e) => return Some(RpcResponse::failed(&id, e, "validation")),
            }
        };
    }

    let result: Result<Option<Value>, SyncError> = match action.as_str() {
        "getConfig" => engine.load_config().await.map(|c| to_data(&c)),
        "saveConfig" => {
            let config: Config = payload!(Config);
            engine.save_config(config).await.map(|c| to_data(&c))
        }
        "getTokenStatus" => engine.token_status().await.map(|s| Some(Value::Bool(s))),
        "setToken" => {
            let p = payload!(TokenPayload);
            engine.set_token(&p.token).await.map(|_| None)
        }
        "clearToken" => engine.clear_token().await.map(|_| None),
        "resolveDataSourceID" => {
            let p = payload!(ResolvePayload);
            engine
                .resolve_data_source_id(&p.database_id)
                .await
                .map(|id| Some(Value::String(id)))
        }
        "resolveTitlePropertyName" => {
            let p = payload!(ResolvePayload);
            engine
                .resolve_title_property_name(&p.database_id)
                .await
                .map(|name| Some(Value::String(name)))
        }
        "getTasks" => {
            let p = payload!(ListPayload);
            engine
                .get_tasks(&p.database_key, p.force)
                .await
                .map(|t| to_data(&t))
        }
        "getHabits" => {
            let p = payload!(ListPayload);
            engine
                .get_habits(&p.database_key, p.force)
                .await
                .map(|h| to_data(&h))
        }
        "updateStatus" => {
            let p = payload!(UpdateStatusPayload);
            engine
                .update_task_status(&p.database_key, &p.task_id, &p.action)
                .await
                .map(|_| None)
        }
        "updateHabitCheck" => {
            let p = payload!(UpdateHabitPayload);
            engine
                .update_habit_check(&p.database_key, &p.task_id, p.checked)
                .await
                .map(|_| None)
        }
        "refreshAll" => engine.refresh_all().await.map(|_| None),
        "startPolling" => {
            engine.start_polling().await;
            Ok(None)
        }
        "stopPolling" => {
            engine.stop_polling();
            Ok(None)
        }
        _ => {
            return Some(RpcResponse::failed(
                &id,
                "unknown action".to_string(),
                "validation",
            ))
        }
    };

    Some(match result {
        Ok(data) => RpcResponse::ok(&id, data),
        Err(e) => RpcResponse::from_error(&id, &e),
    })
}
