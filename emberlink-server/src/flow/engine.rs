use emberlink_types::{
    ActionRoute, Flow, FlowEventType, FlowNode, FlowPromptDescriptor,
    FlowRun, FlowRunStatus, FlowTrigger, NodeConfig, PromptField, PromptKind,
    UiPrompt, User,
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{captcha, signals};
use crate::{
    crypto,
    error::{ApiError, ApiResult},
    ops::RequestInfo,
    queries,
    state::AppState,
    store::{PendingAuthRequest, ResumeToken},
    tenant::TenantScope,
};

const RESUME_TTL_SECS: u64 = 10 * 60;

/// Outcome of driving a flow for a login.
#[derive(Debug)]
pub enum FlowResult {
    /// No enabled flow for the trigger; authorization proceeds normally.
    Skipped,
    Success,
    /// A node needs user input; the descriptor renders the form.
    Suspended(FlowPromptDescriptor),
    Failed(String),
}

/// The document every node reads and writes, persisted between nodes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowContext {
    pub user: Value,
    pub pending: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<signals::Signals>,
    #[serde(default)]
    pub prompts: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha: Option<Value>,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

/// What one node execution decided.
enum Step {
    Next,
    Jump(String),
    Suspend(Box<PromptSpec>),
    Finish,
    Fail(String),
}

struct PromptSpec {
    kind: PromptKind,
    title: String,
    description: Option<String>,
    fields: Vec<PromptField>,
    meta: HashMap<String, Value>,
}

pub struct FlowEngine<'a> {
    state: &'a AppState,
    scope: &'a TenantScope,
}

impl<'a> FlowEngine<'a> {
    pub fn new(state: &'a AppState, scope: &'a TenantScope) -> Self {
        Self { state, scope }
    }

    /// Run the enabled flow for a trigger, if any. Called after a channel
    /// (magic link, federated callback) has attached the user.
    pub async fn run_for_trigger(
        &self,
        trigger: FlowTrigger,
        pending: &PendingAuthRequest,
        user: &User,
        info: &RequestInfo,
    ) -> ApiResult<FlowResult> {
        let Some(flow) = queries::flows::get_active(
            &self.state.db_pool,
            self.scope,
            trigger,
        )
        .await?
        else {
            return Ok(FlowResult::Skipped);
        };

        let context = FlowContext {
            user: json!({
                "id": user.id,
                "email": user.email,
                "name": user.name,
            }),
            pending: json!({
                "rid": pending.rid,
                "client_id": pending.client_id,
                "scope": pending.scope,
            }),
            ..FlowContext::default()
        };

        let run = queries::flows::insert_run(
            &self.state.db_pool,
            self.scope,
            flow.id,
            Some(user.id),
            &pending.rid,
            trigger,
            &serde_json::to_value(&context)
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        )
        .await?;

        self.drive(&flow, run, context, None, info, None).await
    }

    /// Resume an interrupted run from a prompt submission. The resume token
    /// is single-use and must reference the node the run is parked on.
    pub async fn resume(
        &self,
        token: &str,
        fields: HashMap<String, String>,
        info: &RequestInfo,
    ) -> ApiResult<(FlowResult, FlowRun)> {
        let resume: ResumeToken = self
            .state
            .session_store
            .take_resume(token)
            .await?
            .ok_or_else(|| {
                ApiError::InvalidRequest(
                    "resume token expired or already used".into(),
                )
            })?;

        let run = queries::flows::get_run(
            &self.state.db_pool,
            self.scope,
            resume.run_id,
        )
        .await?
        .ok_or(ApiError::NotFound)?;
        self.scope.ensure(run.tenant_id)?;

        if run.status != FlowRunStatus::Interrupted
            || run.current_node_id.as_deref() != Some(resume.node_id.as_str())
        {
            return Err(ApiError::InvalidRequest(
                "flow run is not awaiting this prompt".into(),
            ));
        }

        let flow = queries::flows::get_by_id(
            &self.state.db_pool,
            self.scope,
            run.flow_id,
        )
        .await?
        .ok_or(ApiError::NotFound)?;

        self.record_event(
            &run,
            &resume.node_id,
            FlowEventType::Resume,
            json!({}),
        )
        .await;

        let context: FlowContext =
            serde_json::from_value(run.context.clone()).map_err(|e| {
                ApiError::Internal(format!("malformed run context: {e}"))
            })?;

        let result = self
            .drive(
                &flow,
                run.clone(),
                context,
                Some(resume.node_id),
                info,
                Some(fields),
            )
            .await?;
        Ok((result, run))
    }

    /// The execution loop: advance node by node, persisting position and
    /// context between nodes. Iterations are capped at 4x the node count so
    /// a routing cycle cannot livelock a login.
    async fn drive(
        &self,
        flow: &Flow,
        run: FlowRun,
        mut context: FlowContext,
        start_node: Option<String>,
        info: &RequestInfo,
        mut submission: Option<HashMap<String, String>>,
    ) -> ApiResult<FlowResult> {
        let nodes = flow.ordered_nodes();
        if nodes.is_empty() {
            return self.finish(&run, FlowRunStatus::Success, None).await;
        }

        let mut index = match &start_node {
            Some(id) => match nodes.iter().position(|n| &n.id == id) {
                Some(index) => index,
                None => {
                    return self
                        .finish(
                            &run,
                            FlowRunStatus::Failed,
                            Some("resume node no longer exists"),
                        )
                        .await;
                }
            },
            // execution starts at the begin marker, or the first node when
            // the flow has none
            None => nodes
                .iter()
                .position(|n| matches!(n.config, NodeConfig::Begin))
                .unwrap_or(0),
        };

        let max_steps = nodes.len() * 4;
        let mut steps = 0usize;

        loop {
            steps += 1;
            if steps > max_steps {
                return self
                    .finish(
                        &run,
                        FlowRunStatus::Failed,
                        Some("node iteration limit exceeded"),
                    )
                    .await;
            }

            let node = nodes[index];
            self.record_event(&run, &node.id, FlowEventType::Enter, json!({}))
                .await;

            let step = self
                .exec_node(&run, node, &mut context, submission.take(), info)
                .await;

            match step {
                Err(error) => {
                    let message = error.to_string();
                    self.record_event(
                        &run,
                        &node.id,
                        FlowEventType::Error,
                        json!({ "error": message }),
                    )
                    .await;
                    return self
                        .finish(&run, FlowRunStatus::Failed, Some(&message))
                        .await;
                }
                Ok(Step::Suspend(spec)) => {
                    return self.suspend(&run, node, &context, *spec).await;
                }
                Ok(Step::Finish) => {
                    self.record_event(
                        &run,
                        &node.id,
                        FlowEventType::Exit,
                        json!({}),
                    )
                    .await;
                    return self
                        .finish(&run, FlowRunStatus::Success, None)
                        .await;
                }
                Ok(Step::Fail(message)) => {
                    self.record_event(
                        &run,
                        &node.id,
                        FlowEventType::Error,
                        json!({ "error": message }),
                    )
                    .await;
                    return self
                        .finish(&run, FlowRunStatus::Failed, Some(&message))
                        .await;
                }
                Ok(Step::Next) => {
                    self.record_event(
                        &run,
                        &node.id,
                        FlowEventType::Exit,
                        json!({}),
                    )
                    .await;
                    index += 1;
                    if index >= nodes.len() {
                        return self
                            .finish(&run, FlowRunStatus::Success, None)
                            .await;
                    }
                }
                Ok(Step::Jump(target)) => {
                    self.record_event(
                        &run,
                        &node.id,
                        FlowEventType::Exit,
                        json!({ "jump": target }),
                    )
                    .await;
                    match nodes.iter().position(|n| n.id == target) {
                        Some(target_index) => index = target_index,
                        None => {
                            return self
                                .finish(
                                    &run,
                                    FlowRunStatus::Failed,
                                    Some("jump target does not exist"),
                                )
                                .await;
                        }
                    }
                }
            }

            self.save_progress(&run, &context, Some(nodes[index].id.as_str()))
                .await?;
        }
    }

    async fn exec_node(
        &self,
        run: &FlowRun,
        node: &FlowNode,
        context: &mut FlowContext,
        submission: Option<HashMap<String, String>>,
        info: &RequestInfo,
    ) -> ApiResult<Step> {
        match &node.config {
            NodeConfig::Begin => Ok(Step::Next),

            NodeConfig::Finish => Ok(Step::Finish),

            NodeConfig::ReadSignals => {
                context.signals = Some(signals::read(info));
                Ok(Step::Next)
            }

            NodeConfig::GeolocationCheck { namespace, key } => {
                let user_id = run.user_id.ok_or_else(|| {
                    ApiError::Internal("geolocation check without a user".into())
                })?;
                let stored = queries::metadata::get(
                    &self.state.db_pool,
                    self.scope,
                    user_id,
                    namespace,
                )
                .await?
                .and_then(|doc| {
                    doc.get(key).and_then(Value::as_str).map(str::to_string)
                });
                let current = context
                    .signals
                    .as_ref()
                    .and_then(|s| s.geo_country.clone());

                Ok(geolocation_step(
                    stored.as_deref(),
                    current.as_deref(),
                    node.failure_node_id.as_deref(),
                ))
            }

            NodeConfig::CheckCaptcha { provider, secret, min_score } => {
                let Some(fields) = submission else {
                    return Ok(Step::Suspend(Box::new(captcha_prompt(
                        *provider, None,
                    ))));
                };
                let token = fields
                    .get("captcha_token")
                    .map(String::as_str)
                    .unwrap_or("");
                let passed = captcha::verify(
                    self.state,
                    *provider,
                    secret.as_deref(),
                    *min_score,
                    token,
                )
                .await?;
                if !passed {
                    return Ok(Step::Suspend(Box::new(captcha_prompt(
                        *provider,
                        Some("captcha verification failed"),
                    ))));
                }
                context.captcha = Some(json!({
                    "provider": provider,
                    "verified": true,
                }));
                Ok(Step::Next)
            }

            NodeConfig::PromptUi { ui_prompt_id, action_routing } => {
                self.run_prompt(
                    run,
                    node,
                    context,
                    submission,
                    *ui_prompt_id,
                    action_routing,
                    false,
                )
                .await
            }

            NodeConfig::RequireReauth { ui_prompt_id, action_routing } => {
                self.run_prompt(
                    run,
                    node,
                    context,
                    submission,
                    *ui_prompt_id,
                    action_routing,
                    true,
                )
                .await
            }

            NodeConfig::MetadataWrite { namespace, values } => {
                let user_id = run.user_id.ok_or_else(|| {
                    ApiError::Internal("metadata write without a user".into())
                })?;
                let doc = Value::Object(
                    values
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                );
                queries::metadata::upsert(
                    &self.state.db_pool,
                    self.scope,
                    user_id,
                    namespace,
                    &doc,
                )
                .await?;
                merge_namespace(&mut context.metadata, namespace, &doc);
                Ok(Step::Next)
            }

            NodeConfig::MfaTotp { meta } => {
                let Some(fields) = submission else {
                    return Ok(Step::Suspend(Box::new(mfa_prompt(
                        "totp", meta, None,
                    ))));
                };
                let code = fields.get("code").map(String::as_str).unwrap_or("");
                if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
                {
                    Ok(Step::Next)
                } else {
                    Ok(Step::Suspend(Box::new(mfa_prompt(
                        "totp",
                        meta,
                        Some("enter the 6-digit code"),
                    ))))
                }
            }

            NodeConfig::MfaEmail { meta } => {
                let Some(fields) = submission else {
                    let code = format!("{:06}", OsRng.next_u32() % 1_000_000);
                    context.extras.insert(
                        "mfa_email_hash".into(),
                        Value::String(crypto::sha256_hex(code.as_bytes())),
                    );
                    let email = context
                        .user
                        .get("email")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    self.state.mailer.send_code(&email, &code).await?;
                    return Ok(Step::Suspend(Box::new(mfa_prompt(
                        "email", meta, None,
                    ))));
                };
                let code = fields.get("code").map(String::as_str).unwrap_or("");
                let expected = context
                    .extras
                    .get("mfa_email_hash")
                    .and_then(Value::as_str);
                if expected == Some(crypto::sha256_hex(code.as_bytes()).as_str())
                {
                    context.extras.remove("mfa_email_hash");
                    Ok(Step::Next)
                } else {
                    Ok(Step::Suspend(Box::new(mfa_prompt(
                        "email",
                        meta,
                        Some("the code did not match"),
                    ))))
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_prompt(
        &self,
        run: &FlowRun,
        node: &FlowNode,
        context: &mut FlowContext,
        submission: Option<HashMap<String, String>>,
        ui_prompt_id: Uuid,
        action_routing: &HashMap<String, ActionRoute>,
        reauth: bool,
    ) -> ApiResult<Step> {
        let prompt = queries::flows::get_prompt(
            &self.state.db_pool,
            self.scope,
            ui_prompt_id,
        )
        .await?
        .ok_or_else(|| {
            ApiError::Internal(format!("ui prompt {ui_prompt_id} missing"))
        })?;

        let Some(fields) = submission else {
            return Ok(Step::Suspend(Box::new(form_prompt(&prompt, None))));
        };

        if let Some(missing) = first_missing_field(&prompt, &fields) {
            return Ok(Step::Suspend(Box::new(form_prompt(
                &prompt,
                Some(format!("{missing} is required")),
            ))));
        }

        if reauth {
            let user_id = run.user_id.ok_or_else(|| {
                ApiError::Internal("reauth without a user".into())
            })?;
            let user = queries::users::get_by_id(
                &self.state.db_pool,
                self.scope,
                user_id,
            )
            .await?
            .ok_or(ApiError::NotFound)?;
            if let Some(hash) = &user.password_hash {
                let password =
                    fields.get("password").map(String::as_str).unwrap_or("");
                if !crypto::verify_password(password, hash) {
                    return Ok(Step::Suspend(Box::new(form_prompt(
                        &prompt,
                        Some("invalid credentials".into()),
                    ))));
                }
            }
        }

        context.prompts.insert(
            node.id.clone(),
            serde_json::to_value(&fields)
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        );

        Ok(route_action(
            fields.get("action").map(String::as_str),
            action_routing,
            node.failure_node_id.as_deref(),
        ))
    }

    async fn suspend(
        &self,
        run: &FlowRun,
        node: &FlowNode,
        context: &FlowContext,
        spec: PromptSpec,
    ) -> ApiResult<FlowResult> {
        let context_json = serde_json::to_value(context)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        queries::flows::save_progress(
            &self.state.db_pool,
            self.scope,
            run.id,
            &context_json,
            Some(&node.id),
            FlowRunStatus::Interrupted,
        )
        .await?;

        let token = crypto::mint_token(24);
        self.state
            .session_store
            .put_resume(
                &token,
                &ResumeToken {
                    run_id: run.id,
                    node_id: node.id.clone(),
                    rid: run.request_rid.clone(),
                    expires_at: OffsetDateTime::now_utc()
                        + Duration::seconds(RESUME_TTL_SECS as i64),
                },
            )
            .await?;

        self.record_event(
            run,
            &node.id,
            FlowEventType::Prompt,
            json!({ "kind": spec.kind }),
        )
        .await;

        Ok(FlowResult::Suspended(FlowPromptDescriptor {
            run_id: run.id,
            node_id: node.id.clone(),
            resume_token: token,
            kind: spec.kind,
            title: spec.title,
            description: spec.description,
            fields: spec.fields,
            meta: spec.meta,
        }))
    }

    async fn save_progress(
        &self,
        run: &FlowRun,
        context: &FlowContext,
        current_node: Option<&str>,
    ) -> ApiResult<()> {
        let context_json = serde_json::to_value(context)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        queries::flows::save_progress(
            &self.state.db_pool,
            self.scope,
            run.id,
            &context_json,
            current_node,
            FlowRunStatus::Running,
        )
        .await
    }

    async fn finish(
        &self,
        run: &FlowRun,
        status: FlowRunStatus,
        last_error: Option<&str>,
    ) -> ApiResult<FlowResult> {
        queries::flows::finish_run(
            &self.state.db_pool,
            self.scope,
            run.id,
            status,
            last_error,
        )
        .await?;
        Ok(match status {
            FlowRunStatus::Success => FlowResult::Success,
            _ => FlowResult::Failed(
                last_error.unwrap_or("flow failed").to_string(),
            ),
        })
    }

    async fn record_event(
        &self,
        run: &FlowRun,
        node_id: &str,
        event_type: FlowEventType,
        metadata: Value,
    ) {
        if let Err(error) = queries::flows::insert_event(
            &self.state.db_pool,
            self.scope,
            run.id,
            node_id,
            event_type,
            &metadata,
        )
        .await
        {
            log::warn!("failed to record flow event: {error}");
        }
    }
}

/// Mismatch jumps to the failure node; a missing stored value means there is
/// nothing to compare and the node passes.
fn geolocation_step(
    stored: Option<&str>,
    current: Option<&str>,
    failure_node: Option<&str>,
) -> Step {
    let Some(stored) = stored else {
        return Step::Next;
    };
    if current == Some(stored) {
        return Step::Next;
    }
    match failure_node {
        Some(target) => Step::Jump(target.to_string()),
        None => Step::Fail("geolocation mismatch".into()),
    }
}

fn first_missing_field(
    prompt: &UiPrompt,
    fields: &HashMap<String, String>,
) -> Option<String> {
    prompt
        .fields
        .iter()
        .filter(|f| f.required)
        .find(|f| fields.get(&f.name).map(String::as_str).unwrap_or("") == "")
        .map(|f| f.label.clone())
}

fn route_action(
    action: Option<&str>,
    routing: &HashMap<String, ActionRoute>,
    failure_node: Option<&str>,
) -> Step {
    let Some(route) = action.and_then(|a| routing.get(a)) else {
        return Step::Next;
    };
    if route.failure {
        return match failure_node {
            Some(target) => Step::Jump(target.to_string()),
            None => Step::Fail("prompt action failed".into()),
        };
    }
    match &route.next_node_id {
        Some(target) => Step::Jump(target.clone()),
        None => Step::Next,
    }
}

fn merge_namespace(
    metadata: &mut Map<String, Value>,
    namespace: &str,
    doc: &Value,
) {
    match metadata.get_mut(namespace) {
        Some(Value::Object(existing)) => {
            if let Value::Object(new) = doc {
                for (k, v) in new {
                    existing.insert(k.clone(), v.clone());
                }
            }
        }
        _ => {
            metadata.insert(namespace.to_string(), doc.clone());
        }
    }
}

fn form_prompt(prompt: &UiPrompt, error: Option<String>) -> PromptSpec {
    let mut meta = HashMap::new();
    if let Some(error) = error {
        meta.insert("error".to_string(), Value::String(error));
    }
    meta.insert("timeout_sec".to_string(), json!(prompt.timeout_sec));
    PromptSpec {
        kind: PromptKind::Form,
        title: prompt.title.clone(),
        description: prompt.description.clone(),
        fields: prompt.fields.clone(),
        meta,
    }
}

fn captcha_prompt(
    provider: emberlink_types::CaptchaProvider,
    error: Option<&str>,
) -> PromptSpec {
    let mut meta = HashMap::new();
    meta.insert("provider".to_string(), json!(provider));
    if let Some(error) = error {
        meta.insert("error".to_string(), Value::String(error.to_string()));
    }
    PromptSpec {
        kind: PromptKind::Captcha,
        title: "Verify you are human".into(),
        description: None,
        fields: vec![PromptField {
            name: "captcha_token".into(),
            label: "Captcha".into(),
            kind: "captcha".into(),
            required: true,
        }],
        meta,
    }
}

fn mfa_prompt(
    method: &str,
    challenge_meta: &HashMap<String, Value>,
    error: Option<&str>,
) -> PromptSpec {
    let mut meta: HashMap<String, Value> = challenge_meta.clone();
    meta.insert("method".to_string(), Value::String(method.to_string()));
    if let Some(error) = error {
        meta.insert("error".to_string(), Value::String(error.to_string()));
    }
    PromptSpec {
        kind: PromptKind::Mfa,
        title: "Confirm it is you".into(),
        description: None,
        fields: vec![PromptField {
            name: "code".into(),
            label: "Code".into(),
            kind: "text".into(),
            required: true,
        }],
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geolocation_passes_when_nothing_is_stored() {
        assert!(matches!(
            geolocation_step(None, Some("DE"), Some("deny")),
            Step::Next
        ));
    }

    #[test]
    fn geolocation_jumps_to_failure_node_on_mismatch() {
        match geolocation_step(Some("DE"), Some("US"), Some("deny")) {
            Step::Jump(target) => assert_eq!(target, "deny"),
            _ => panic!("expected a jump"),
        }
        assert!(matches!(
            geolocation_step(Some("DE"), Some("DE"), Some("deny")),
            Step::Next
        ));
    }

    #[test]
    fn geolocation_without_failure_node_fails_the_run() {
        assert!(matches!(
            geolocation_step(Some("DE"), None, None),
            Step::Fail(_)
        ));
    }

    #[test]
    fn action_routing_follows_configured_edges() {
        let mut routing = HashMap::new();
        routing.insert(
            "deny".to_string(),
            ActionRoute { next_node_id: None, failure: true },
        );
        routing.insert(
            "more".to_string(),
            ActionRoute {
                next_node_id: Some("extra".into()),
                failure: false,
            },
        );

        assert!(matches!(
            route_action(Some("continue"), &routing, None),
            Step::Next
        ));
        match route_action(Some("more"), &routing, None) {
            Step::Jump(target) => assert_eq!(target, "extra"),
            _ => panic!("expected a jump"),
        }
        assert!(matches!(
            route_action(Some("deny"), &routing, None),
            Step::Fail(_)
        ));
        match route_action(Some("deny"), &routing, Some("fallback")) {
            Step::Jump(target) => assert_eq!(target, "fallback"),
            _ => panic!("expected a jump to the failure node"),
        }
    }

    #[test]
    fn required_fields_are_enforced() {
        let prompt = UiPrompt {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            title: "Confirm".into(),
            description: None,
            fields: vec![
                PromptField {
                    name: "reason".into(),
                    label: "Reason".into(),
                    kind: "text".into(),
                    required: true,
                },
                PromptField {
                    name: "note".into(),
                    label: "Note".into(),
                    kind: "text".into(),
                    required: false,
                },
            ],
            timeout_sec: 300,
        };

        let mut fields = HashMap::new();
        assert_eq!(
            first_missing_field(&prompt, &fields).as_deref(),
            Some("Reason")
        );
        fields.insert("reason".to_string(), "travel".to_string());
        assert_eq!(first_missing_field(&prompt, &fields), None);
    }

    #[test]
    fn metadata_merge_preserves_existing_keys() {
        let mut metadata = Map::new();
        merge_namespace(&mut metadata, "profile", &json!({"a": 1}));
        merge_namespace(&mut metadata, "profile", &json!({"b": 2}));
        assert_eq!(metadata["profile"], json!({"a": 1, "b": 2}));
    }
}
