use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Login phase a flow attaches to. One enabled flow runs per
/// (tenant, trigger); the highest version wins.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowTrigger {
    Signin,
    Signup,
    PreConsent,
    PostConsent,
    Custom,
}

impl std::fmt::Display for FlowTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowTrigger::Signin => "signin",
            FlowTrigger::Signup => "signup",
            FlowTrigger::PreConsent => "pre_consent",
            FlowTrigger::PostConsent => "post_consent",
            FlowTrigger::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FlowTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signin" => Ok(FlowTrigger::Signin),
            "signup" => Ok(FlowTrigger::Signup),
            "pre_consent" => Ok(FlowTrigger::PreConsent),
            "post_consent" => Ok(FlowTrigger::PostConsent),
            "custom" => Ok(FlowTrigger::Custom),
            other => Err(format!("unknown flow trigger: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Enabled,
    Disabled,
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStatus::Enabled => write!(f, "enabled"),
            FlowStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(FlowStatus::Enabled),
            "disabled" => Ok(FlowStatus::Disabled),
            other => Err(format!("unknown flow status: {other}")),
        }
    }
}

/// An admin-defined step sequence, stored as an ordered node array.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub trigger: FlowTrigger,
    pub status: FlowStatus,
    pub version: i32,
    pub nodes: Vec<FlowNode>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Flow {
    /// Nodes in execution order.
    pub fn ordered_nodes(&self) -> Vec<&FlowNode> {
        let mut nodes: Vec<&FlowNode> = self.nodes.iter().collect();
        nodes.sort_by_key(|n| n.order);
        nodes
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One step of a flow. The typed `config` variant carries everything the
/// node needs; unknown JSON is rejected when the flow is loaded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowNode {
    pub id: String,
    pub order: i32,
    #[serde(flatten)]
    pub config: NodeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_node_id: Option<String>,
}

/// Tagged node configuration. The tag is the node type as stored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Entry marker; no behavior.
    Begin,
    /// Populate `context.signals` from the request: ip, user agent, parsed
    /// device, geo headers, heuristic risk score.
    ReadSignals,
    /// Compare the current country against stored user metadata; jump to the
    /// failure node on mismatch.
    GeolocationCheck {
        namespace: String,
        key: String,
    },
    /// Suspend for a captcha round-trip, then verify the response token.
    CheckCaptcha {
        provider: CaptchaProvider,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_score: Option<f64>,
    },
    /// Suspend with a form built from a referenced UI prompt.
    PromptUi {
        ui_prompt_id: Uuid,
        #[serde(default)]
        action_routing: HashMap<String, ActionRoute>,
    },
    /// Like `prompt_ui`, but the submission must re-prove the user: a
    /// password field is verified against the stored hash when one exists.
    RequireReauth {
        ui_prompt_id: Uuid,
        #[serde(default)]
        action_routing: HashMap<String, ActionRoute>,
    },
    /// Upsert a user-metadata document and mirror it into the context.
    MetadataWrite {
        namespace: String,
        values: HashMap<String, Value>,
    },
    /// Suspend with a TOTP challenge prompt.
    MfaTotp {
        #[serde(default)]
        meta: HashMap<String, Value>,
    },
    /// Email a one-time code, suspend, verify the code on resume.
    MfaEmail {
        #[serde(default)]
        meta: HashMap<String, Value>,
    },
    /// Mark the run successful and stop.
    Finish,
}

impl NodeConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeConfig::Begin => "begin",
            NodeConfig::ReadSignals => "read_signals",
            NodeConfig::GeolocationCheck { .. } => "geolocation_check",
            NodeConfig::CheckCaptcha { .. } => "check_captcha",
            NodeConfig::PromptUi { .. } => "prompt_ui",
            NodeConfig::RequireReauth { .. } => "require_reauth",
            NodeConfig::MetadataWrite { .. } => "metadata_write",
            NodeConfig::MfaTotp { .. } => "mfa_totp",
            NodeConfig::MfaEmail { .. } => "mfa_email",
            NodeConfig::Finish => "finish",
        }
    }
}

/// Where a prompt action leads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
    #[serde(default)]
    pub failure: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaProvider {
    Turnstile,
    Hcaptcha,
    Mock,
}

/// Admin-managed form definition referenced by prompt nodes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UiPrompt {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<PromptField>,
    pub timeout_sec: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PromptField {
    pub name: String,
    pub label: String,
    #[serde(default = "default_field_kind")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
}

fn default_field_kind() -> String {
    "text".to_string()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowRunStatus {
    Running,
    Success,
    Failed,
    Interrupted,
}

impl std::fmt::Display for FlowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowRunStatus::Running => "running",
            FlowRunStatus::Success => "success",
            FlowRunStatus::Failed => "failed",
            FlowRunStatus::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FlowRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(FlowRunStatus::Running),
            "success" => Ok(FlowRunStatus::Success),
            "failed" => Ok(FlowRunStatus::Failed),
            "interrupted" => Ok(FlowRunStatus::Interrupted),
            other => Err(format!("unknown flow run status: {other}")),
        }
    }
}

/// One execution of a flow for a pending authorization request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub flow_id: Uuid,
    pub user_id: Option<Uuid>,
    pub request_rid: String,
    pub trigger: FlowTrigger,
    pub context: Value,
    pub status: FlowRunStatus,
    pub current_node_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventType {
    Enter,
    Exit,
    Prompt,
    Resume,
    Error,
}

impl std::fmt::Display for FlowEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowEventType::Enter => "enter",
            FlowEventType::Exit => "exit",
            FlowEventType::Prompt => "prompt",
            FlowEventType::Resume => "resume",
            FlowEventType::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Append-only trace of a flow run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowEvent {
    pub id: i64,
    pub tenant_id: Uuid,
    pub flow_run_id: Uuid,
    pub node_id: String,
    pub event_type: FlowEventType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub metadata: Value,
}

/// What the engine hands back when a node needs user input: enough to render
/// the form and a single-use resume token to continue the run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowPromptDescriptor {
    pub run_id: Uuid,
    pub node_id: String,
    pub resume_token: String,
    pub kind: PromptKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<PromptField>,
    /// Challenge parameters for captcha / MFA variants.
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Form,
    Captcha,
    Mfa,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_round_trips_through_tagged_json() {
        let node = FlowNode {
            id: "n2".into(),
            order: 2,
            config: NodeConfig::GeolocationCheck {
                namespace: "profile".into(),
                key: "home_country".into(),
            },
            failure_node_id: Some("deny".into()),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "geolocation_check");
        assert_eq!(json["namespace"], "profile");
        let back: FlowNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let json = serde_json::json!({
            "id": "n1",
            "order": 1,
            "type": "launch_missiles"
        });
        assert!(serde_json::from_value::<FlowNode>(json).is_err());
    }

    #[test]
    fn ordered_nodes_sorts_by_order() {
        let mk = |id: &str, order| FlowNode {
            id: id.into(),
            order,
            config: NodeConfig::Begin,
            failure_node_id: None,
        };
        let flow = Flow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "f".into(),
            trigger: FlowTrigger::Signin,
            status: FlowStatus::Enabled,
            version: 1,
            nodes: vec![mk("c", 30), mk("a", 10), mk("b", 20)],
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let ids: Vec<&str> =
            flow.ordered_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
