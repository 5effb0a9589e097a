//! Two-turn confirmation gate for mutating calls.
//!
//! A call moves `Proposed -> Confirmed -> Executed`. Nothing about a pending
//! call is persisted: the caller re-submits the full arguments together with
//! either the affirmation token in its latest message or the ticket echoed by
//! the proposal. Tickets are digests bound to the exact caller, operation,
//! namespace and arguments, so they cannot confirm a different call.

use std::fmt::Write as _;

use recall_access::{Namespace, Operation};
use recall_core::CooperativeCancellationToken;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const CONFIRMATION_TICKET_DOMAIN: &str = "recall-confirmation-v1";
pub const REQUIRES_CONFIRMATION_STATUS: &str = "requires confirmation";

fn default_affirmation_token() -> String {
    "YES".to_string()
}

fn default_case_sensitive() -> bool {
    true
}

fn default_accept_message_affirmation() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// How affirmations are recognised.
pub struct ConfirmationConfig {
    #[serde(default = "default_affirmation_token")]
    pub affirmation_token: String,
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    #[serde(default = "default_accept_message_affirmation")]
    pub accept_message_affirmation: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            affirmation_token: default_affirmation_token(),
            case_sensitive: default_case_sensitive(),
            accept_message_affirmation: default_accept_message_affirmation(),
        }
    }
}

/// Per-call caller context: identity, latest caller-authored message, optional ticket.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub caller_id: String,
    pub latest_message: Option<String>,
    pub confirmation_ticket: Option<String>,
    pub cancellation: Option<CooperativeCancellationToken>,
}

impl CallContext {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Self::default()
        }
    }

    pub fn with_latest_message(mut self, message: impl Into<String>) -> Self {
        self.latest_message = Some(message.into());
        self
    }

    pub fn with_confirmation_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.confirmation_ticket = Some(ticket.into());
        self
    }

    pub fn with_cancellation(mut self, token: CooperativeCancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn caller_id(&self) -> &str {
        self.caller_id.trim()
    }
}

/// Lifecycle of one gated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Proposed,
    Confirmed,
    Executed,
}

/// Which signal confirmed a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffirmationSource {
    Ticket,
    Message,
}

/// Echo of a held call, returned instead of executing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub operation: Operation,
    pub namespace: Namespace,
    pub args: Value,
    pub prompt: String,
    pub ticket: String,
}

impl Proposal {
    pub fn state(&self) -> ConfirmationState {
        ConfirmationState::Proposed
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": REQUIRES_CONFIRMATION_STATUS,
            "state": self.state(),
            "operation": self.operation,
            "namespace": self.namespace,
            "args": self.args,
            "prompt": self.prompt,
            "confirmation_ticket": self.ticket,
        })
    }
}

/// Gate verdict for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Proposed(Proposal),
    Confirmed(AffirmationSource),
}

/// Result of a gated mutation: either held for confirmation or executed.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome<T> {
    RequiresConfirmation(Proposal),
    Executed(T),
}

impl<T> GateOutcome<T> {
    pub fn state(&self) -> ConfirmationState {
        match self {
            Self::RequiresConfirmation(_) => ConfirmationState::Proposed,
            Self::Executed(_) => ConfirmationState::Executed,
        }
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        match self {
            Self::RequiresConfirmation(proposal) => Some(proposal),
            Self::Executed(_) => None,
        }
    }

    pub fn executed(self) -> Option<T> {
        match self {
            Self::RequiresConfirmation(_) => None,
            Self::Executed(value) => Some(value),
        }
    }
}

/// Stateless confirmation gate.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationGate {
    config: ConfirmationConfig,
}

impl ConfirmationGate {
    pub fn new(config: ConfirmationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// Substring test of the affirmation token against one caller message.
    pub fn message_affirms(&self, message: &str) -> bool {
        let token = self.config.affirmation_token.trim();
        if token.is_empty() {
            return false;
        }
        if self.config.case_sensitive {
            message.contains(token)
        } else {
            message.to_lowercase().contains(&token.to_lowercase())
        }
    }

    /// Ticket binding a confirmation to one exact call.
    pub fn ticket_for(
        &self,
        caller_id: &str,
        operation: Operation,
        namespace: Namespace,
        args: &Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(CONFIRMATION_TICKET_DOMAIN.as_bytes());
        hasher.update(b"\n");
        hasher.update(caller_id.trim().to_ascii_lowercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(operation.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(namespace.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_json(args).as_bytes());
        let digest = hasher.finalize();
        let mut output = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(&mut output, "{byte:02x}");
        }
        output
    }

    /// Decides whether the call may proceed or must be proposed first.
    pub fn evaluate(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        args: Value,
    ) -> GateDecision {
        let ticket = self.ticket_for(context.caller_id(), operation, namespace, &args);
        let ticket_matches = context
            .confirmation_ticket
            .as_deref()
            .map(str::trim)
            .map(|presented| presented.eq_ignore_ascii_case(&ticket))
            .unwrap_or(false);
        if ticket_matches {
            return GateDecision::Confirmed(AffirmationSource::Ticket);
        }

        let message_affirms = self.config.accept_message_affirmation
            && context
                .latest_message
                .as_deref()
                .map(|message| self.message_affirms(message))
                .unwrap_or(false);
        if message_affirms {
            return GateDecision::Confirmed(AffirmationSource::Message);
        }

        let prompt = self.prompt_for(operation, namespace, &args, &ticket);
        tracing::debug!(
            operation = %operation,
            namespace = %namespace,
            "mutation held for confirmation"
        );
        GateDecision::Proposed(Proposal {
            operation,
            namespace,
            args,
            prompt,
            ticket,
        })
    }

    fn prompt_for(
        &self,
        operation: Operation,
        namespace: Namespace,
        args: &Value,
        ticket: &str,
    ) -> String {
        let target = args
            .get("id")
            .and_then(Value::as_str)
            .map(|id| format!(" record '{id}'"))
            .unwrap_or_default();
        let mut prompt = format!(
            "Please confirm: {operation}{target} in namespace '{namespace}' with the arguments shown."
        );
        if self.config.accept_message_affirmation {
            let _ = write!(
                prompt,
                " Reply '{}' to proceed, or",
                self.config.affirmation_token.trim()
            );
        } else {
            prompt.push_str(" To proceed,");
        }
        let _ = write!(
            prompt,
            " resubmit the same call with confirmation_ticket '{ticket}'."
        );
        prompt
    }
}

/// Serializes `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut output = String::new();
    write_canonical(value, &mut output);
    output
}

fn write_canonical(value: &Value, output: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            output.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                output.push_str(&Value::String(key.clone()).to_string());
                output.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, output);
                }
            }
            output.push('}');
        }
        Value::Array(items) => {
            output.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                write_canonical(item, output);
            }
            output.push(']');
        }
        scalar => output.push_str(&scalar.to_string()),
    }
}
