use emberlink_types::{
    Flow, FlowEventType, FlowNode, FlowRun, FlowRunStatus, FlowStatus,
    FlowTrigger, PromptField, UiPrompt,
};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{ApiError, ApiResult},
    tenant::TenantScope,
};

#[derive(FromRow)]
struct FlowRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    trigger: String,
    status: String,
    version: i32,
    nodes: Value,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<FlowRow> for Flow {
    type Error = ApiError;

    fn try_from(row: FlowRow) -> Result<Self, Self::Error> {
        // Node configs are validated here, at load time; a stored flow with
        // an unknown node type never reaches the engine.
        let nodes: Vec<FlowNode> = serde_json::from_value(row.nodes)
            .map_err(|e| {
                ApiError::Internal(format!("malformed flow nodes: {e}"))
            })?;
        Ok(Flow {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            trigger: row
                .trigger
                .parse::<FlowTrigger>()
                .map_err(ApiError::Internal)?,
            status: row
                .status
                .parse::<FlowStatus>()
                .map_err(ApiError::Internal)?,
            version: row.version,
            nodes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const FLOW_COLS: &str =
    "id, tenant_id, name, trigger, status, version, nodes, created_at, updated_at";

/// The flow that runs for a trigger: enabled, highest version.
pub async fn get_active(
    pool: &DbPool,
    scope: &TenantScope,
    trigger: FlowTrigger,
) -> ApiResult<Option<Flow>> {
    let row = sqlx::query_as::<_, FlowRow>(&format!(
        r#"
        SELECT {FLOW_COLS} FROM flows
        WHERE tenant_id = $1 AND trigger = $2 AND status = 'enabled'
        ORDER BY version DESC
        LIMIT 1
        "#,
    ))
    .bind(scope.id())
    .bind(trigger.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(Flow::try_from).transpose()
}

pub async fn get_by_id(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<Option<Flow>> {
    let row = sqlx::query_as::<_, FlowRow>(&format!(
        "SELECT {FLOW_COLS} FROM flows WHERE tenant_id = $1 AND id = $2",
    ))
    .bind(scope.id())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(Flow::try_from).transpose()
}

#[derive(FromRow)]
struct UiPromptRow {
    id: Uuid,
    tenant_id: Uuid,
    title: String,
    description: Option<String>,
    fields: Value,
    timeout_sec: i32,
}

impl TryFrom<UiPromptRow> for UiPrompt {
    type Error = ApiError;

    fn try_from(row: UiPromptRow) -> Result<Self, Self::Error> {
        let fields: Vec<PromptField> = serde_json::from_value(row.fields)
            .map_err(|e| {
                ApiError::Internal(format!("malformed prompt fields: {e}"))
            })?;
        Ok(UiPrompt {
            id: row.id,
            tenant_id: row.tenant_id,
            title: row.title,
            description: row.description,
            fields,
            timeout_sec: row.timeout_sec,
        })
    }
}

pub async fn get_prompt(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<Option<UiPrompt>> {
    let row = sqlx::query_as::<_, UiPromptRow>(
        "SELECT id, tenant_id, title, description, fields, timeout_sec \
         FROM ui_prompts WHERE tenant_id = $1 AND id = $2",
    )
    .bind(scope.id())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(UiPrompt::try_from).transpose()
}

#[derive(FromRow)]
struct FlowRunRow {
    id: Uuid,
    tenant_id: Uuid,
    flow_id: Uuid,
    user_id: Option<Uuid>,
    request_rid: String,
    trigger: String,
    context: Value,
    status: String,
    current_node_id: Option<String>,
    started_at: OffsetDateTime,
    finished_at: Option<OffsetDateTime>,
    last_error: Option<String>,
}

impl TryFrom<FlowRunRow> for FlowRun {
    type Error = ApiError;

    fn try_from(row: FlowRunRow) -> Result<Self, Self::Error> {
        Ok(FlowRun {
            id: row.id,
            tenant_id: row.tenant_id,
            flow_id: row.flow_id,
            user_id: row.user_id,
            request_rid: row.request_rid,
            trigger: row
                .trigger
                .parse::<FlowTrigger>()
                .map_err(ApiError::Internal)?,
            context: row.context,
            status: row
                .status
                .parse::<FlowRunStatus>()
                .map_err(ApiError::Internal)?,
            current_node_id: row.current_node_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            last_error: row.last_error,
        })
    }
}

const RUN_COLS: &str = "id, tenant_id, flow_id, user_id, request_rid, \
     trigger, context, status, current_node_id, started_at, finished_at, \
     last_error";

pub async fn insert_run(
    pool: &DbPool,
    scope: &TenantScope,
    flow_id: Uuid,
    user_id: Option<Uuid>,
    request_rid: &str,
    trigger: FlowTrigger,
    context: &Value,
) -> ApiResult<FlowRun> {
    let row = sqlx::query_as::<_, FlowRunRow>(&format!(
        r#"
        INSERT INTO flow_runs
            (tenant_id, flow_id, user_id, request_rid, trigger, context)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {RUN_COLS}
        "#,
    ))
    .bind(scope.id())
    .bind(flow_id)
    .bind(user_id)
    .bind(request_rid)
    .bind(trigger.to_string())
    .bind(context)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

pub async fn get_run(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<Option<FlowRun>> {
    let row = sqlx::query_as::<_, FlowRunRow>(&format!(
        "SELECT {RUN_COLS} FROM flow_runs WHERE tenant_id = $1 AND id = $2",
    ))
    .bind(scope.id())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(FlowRun::try_from).transpose()
}

/// Persist the engine's position between nodes.
pub async fn save_progress(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
    context: &Value,
    current_node_id: Option<&str>,
    status: FlowRunStatus,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE flow_runs SET context = $3, current_node_id = $4, \
         status = $5 WHERE tenant_id = $1 AND id = $2",
    )
    .bind(scope.id())
    .bind(id)
    .bind(context)
    .bind(current_node_id)
    .bind(status.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_run(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
    status: FlowRunStatus,
    last_error: Option<&str>,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE flow_runs SET status = $3, last_error = $4, \
         finished_at = now() WHERE tenant_id = $1 AND id = $2",
    )
    .bind(scope.id())
    .bind(id)
    .bind(status.to_string())
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_event(
    pool: &DbPool,
    scope: &TenantScope,
    flow_run_id: Uuid,
    node_id: &str,
    event_type: FlowEventType,
    metadata: &Value,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO flow_events
            (tenant_id, flow_run_id, node_id, event_type, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(scope.id())
    .bind(flow_run_id)
    .bind(node_id)
    .bind(event_type.to_string())
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(())
}
