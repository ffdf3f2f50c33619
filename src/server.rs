use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use tracing::{info, warn};
use serde_json::{json, Value};

use crate::computation::SettlementDisposition;
use crate::config::ServerConfig;
use crate::settlement::SettlementController;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;

// the synchronous trigger: a two-phase surface over the same controller
// as the event watcher. handlers only translate transport formats and
// always answer with a two-element [status, message] array.

#[derive(Clone)]
struct AppState {
    controller: Arc<SettlementController>,
    request_timeout: Duration,
}

pub fn router(controller: Arc<SettlementController>, config: &ServerConfig) -> Router {
    let state = AppState {
        controller,
        request_timeout: Duration::from_secs(
            config.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
        ),
    };
    Router::new()
        .route("/exec/create", post(create_exec))
        .route("/exec/run", post(run_exec))
        .with_state(state)
}

pub async fn serve(
    controller: Arc<SettlementController>,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    let app = router(controller, config);
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Oracle server listening at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateExecBody {
    #[serde(rename = "containerID")]
    container_id: String,

    #[serde(rename = "swHash")]
    sw_hash: String,

    #[serde(rename = "datasetRef")]
    dataset_ref: String,

    #[serde(rename = "pubUserKey")]
    pub_user_key: String,
}

async fn create_exec(
    State(state): State<AppState>,
    Json(body): Json<CreateExecBody>,
) -> Json<Value> {
    info!("[CreateExec] container `{}`", body.container_id);
    let created = tokio::time::timeout(
        state.request_timeout,
        state.controller.prepare_execution(
            &body.container_id,
            &body.dataset_ref,
            &body.sw_hash,
            &body.pub_user_key,
        ),
    )
    .await;
    match created {
        Ok(Ok(handle)) => Json(json!(["Success", handle.id])),

        Ok(Err(message)) => {
            warn!("Exec creation for `{}` failed: {message}", body.container_id);
            Json(json!(["Failure", message]))
        }

        Err(_) => Json(json!(["Failure", "Exec creation timed out."])),
    }
}

#[derive(Debug, Deserialize)]
struct RunExecBody {
    #[serde(rename = "execID")]
    exec_id: String,

    #[serde(rename = "paymentID")]
    payment_id: String,
}

async fn run_exec(
    State(state): State<AppState>,
    Json(body): Json<RunExecBody>,
) -> Json<Value> {
    info!("[RunExec] exec `{}`, payment `{}`", body.exec_id, body.payment_id);
    // the settlement itself is never cancelled once started; only the
    // answer to the caller is bounded
    let controller = state.controller.clone();
    let exec_id = body.exec_id.clone();
    let payment_id = body.payment_id.clone();
    let settlement = tokio::spawn(async move {
        controller.settle_execution(&exec_id, &payment_id).await
    });
    match tokio::time::timeout(state.request_timeout, settlement).await {
        Ok(Ok(SettlementDisposition::Committed(address))) => {
            Json(json!(["Success", address]))
        }

        Ok(Ok(SettlementDisposition::Reverted(message))) => {
            Json(json!(["Failure", message]))
        }

        Ok(Err(e)) => {
            warn!("Settlement task for `{}` died: `{e}`", body.payment_id);
            Json(json!(["Failure", "Settlement failed internally."]))
        }

        Err(_) => {
            warn!(
                "Settlement for `{}` is outliving the request window.",
                body.payment_id
            );
            Json(json!(["Failure", "Settlement is still in progress."]))
        }
    }
}
