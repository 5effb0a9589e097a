use serde::{Deserialize, Serialize};

use crate::namespace::{Namespace, Operation};

const ALLOW_SUPERUSER: &str = "allow_superuser";
const ALLOW_OWNER_IDENTITY: &str = "allow_owner_identity";
const ALLOW_TEAM_DOMAIN: &str = "allow_team_domain";
const ALLOW_RECORD_OWNER: &str = "allow_record_owner";
const ALLOW_RECORD_IDENTIFIER: &str = "allow_record_identifier";
const DENY_CALLER_ID_MISSING: &str = "deny_caller_id_missing";
const DENY_PERSONAL_OWNER_ONLY: &str = "deny_personal_owner_only";
const DENY_TEAM_DOMAIN_MISMATCH: &str = "deny_team_domain_mismatch";
const DENY_PEOPLE_NOT_VISIBLE: &str = "deny_people_not_visible";
const DENY_DELETE_REQUIRES_SUPERUSER: &str = "deny_delete_requires_superuser";
const DENY_RECORD_NOT_OWNED: &str = "deny_record_not_owned";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Identities and domain suffix that drive namespace visibility.
pub struct AccessPolicyConfig {
    #[serde(default)]
    pub owner_identity: String,
    #[serde(default)]
    pub team_domain: String,
    #[serde(default)]
    pub superusers: Vec<String>,
}

impl AccessPolicyConfig {
    pub fn is_superuser(&self, caller_id: &str) -> bool {
        self.superusers
            .iter()
            .any(|superuser| identity_matches(superuser, caller_id))
    }

    fn is_owner(&self, caller_id: &str) -> bool {
        identity_matches(&self.owner_identity, caller_id)
    }

    fn in_team_domain(&self, caller_id: &str) -> bool {
        let domain = self.team_domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        let suffix = if domain.starts_with('@') {
            domain
        } else {
            format!("@{domain}")
        };
        let caller = caller_id.trim().to_ascii_lowercase();
        caller.len() > suffix.len() && caller.ends_with(suffix.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `AccessDecision` values.
pub enum AccessDecision {
    Allow { reason_code: String },
    Deny { reason_code: String },
}

impl AccessDecision {
    fn allow(reason_code: &str) -> Self {
        Self::Allow {
            reason_code: reason_code.to_string(),
        }
    }

    fn deny(reason_code: &str) -> Self {
        Self::Deny {
            reason_code: reason_code.to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn reason_code(&self) -> &str {
        match self {
            Self::Allow { reason_code } | Self::Deny { reason_code } => reason_code,
        }
    }
}

/// Ownership facts read from the stored record for the post-confirmation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOwnership<'a> {
    Memory { owner_id: &'a str },
    Person { identifier_values: &'a [String] },
}

/// Compares two identities trimmed and ASCII case-insensitively.
pub fn identity_matches(expected: &str, caller_id: &str) -> bool {
    let expected = expected.trim();
    !expected.is_empty() && expected.eq_ignore_ascii_case(caller_id.trim())
}

/// Evaluates the namespace-level policy for `operation`.
pub fn evaluate_access(
    config: &AccessPolicyConfig,
    caller_id: &str,
    namespace: Namespace,
    operation: Operation,
) -> AccessDecision {
    if caller_id.trim().is_empty() {
        return AccessDecision::deny(DENY_CALLER_ID_MISSING);
    }
    if config.is_superuser(caller_id) {
        return AccessDecision::allow(ALLOW_SUPERUSER);
    }
    match operation {
        Operation::Delete => AccessDecision::deny(DENY_DELETE_REQUIRES_SUPERUSER),
        Operation::Read | Operation::List | Operation::Create | Operation::Update => {
            evaluate_visibility(config, caller_id, namespace)
        }
    }
}

fn evaluate_visibility(
    config: &AccessPolicyConfig,
    caller_id: &str,
    namespace: Namespace,
) -> AccessDecision {
    match namespace {
        Namespace::Personal => {
            if config.is_owner(caller_id) {
                AccessDecision::allow(ALLOW_OWNER_IDENTITY)
            } else {
                AccessDecision::deny(DENY_PERSONAL_OWNER_ONLY)
            }
        }
        Namespace::Professional => {
            if config.in_team_domain(caller_id) {
                AccessDecision::allow(ALLOW_TEAM_DOMAIN)
            } else {
                AccessDecision::deny(DENY_TEAM_DOMAIN_MISMATCH)
            }
        }
        Namespace::People => {
            if config.is_owner(caller_id) {
                AccessDecision::allow(ALLOW_OWNER_IDENTITY)
            } else if config.in_team_domain(caller_id) {
                AccessDecision::allow(ALLOW_TEAM_DOMAIN)
            } else {
                AccessDecision::deny(DENY_PEOPLE_NOT_VISIBLE)
            }
        }
    }
}

/// Returns true when the namespace policy permits `operation`.
pub fn allowed(
    config: &AccessPolicyConfig,
    caller_id: &str,
    namespace: Namespace,
    operation: Operation,
) -> bool {
    evaluate_access(config, caller_id, namespace, operation).is_allowed()
}

/// Checks that `caller_id` may update the record described by `ownership`.
pub fn authorize_record_update(
    config: &AccessPolicyConfig,
    caller_id: &str,
    ownership: RecordOwnership<'_>,
) -> AccessDecision {
    if caller_id.trim().is_empty() {
        return AccessDecision::deny(DENY_CALLER_ID_MISSING);
    }
    if config.is_superuser(caller_id) {
        return AccessDecision::allow(ALLOW_SUPERUSER);
    }
    let decision = match ownership {
        RecordOwnership::Memory { owner_id } if identity_matches(owner_id, caller_id) => {
            AccessDecision::allow(ALLOW_RECORD_OWNER)
        }
        RecordOwnership::Person { identifier_values }
            if identifier_values
                .iter()
                .any(|value| identity_matches(value, caller_id)) =>
        {
            AccessDecision::allow(ALLOW_RECORD_IDENTIFIER)
        }
        _ => AccessDecision::deny(DENY_RECORD_NOT_OWNED),
    };
    if !decision.is_allowed() {
        tracing::warn!(
            caller_id,
            reason_code = decision.reason_code(),
            "record-level update check denied"
        );
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::{
        allowed, authorize_record_update, evaluate_access, AccessPolicyConfig, RecordOwnership,
    };
    use crate::{Namespace, Operation};

    fn policy() -> AccessPolicyConfig {
        AccessPolicyConfig {
            owner_identity: "owner@home.net".to_string(),
            team_domain: "example.com".to_string(),
            superusers: vec!["root@example.com".to_string()],
        }
    }

    #[test]
    fn unit_superuser_is_allowed_everywhere() {
        let policy = policy();
        for namespace in [Namespace::Personal, Namespace::Professional, Namespace::People] {
            for operation in [
                Operation::Read,
                Operation::List,
                Operation::Create,
                Operation::Update,
                Operation::Delete,
            ] {
                assert!(allowed(&policy, "ROOT@example.com", namespace, operation));
            }
        }
    }

    #[test]
    fn unit_personal_namespace_is_owner_only() {
        let policy = policy();
        assert!(allowed(&policy, "owner@home.net", Namespace::Personal, Operation::Read));
        assert!(allowed(&policy, "owner@home.net", Namespace::Personal, Operation::Create));
        let decision = evaluate_access(
            &policy,
            "alice@example.com",
            Namespace::Personal,
            Operation::List,
        );
        assert!(!decision.is_allowed());
        assert_eq!(decision.reason_code(), "deny_personal_owner_only");
    }

    #[test]
    fn unit_professional_namespace_requires_team_domain_suffix() {
        let policy = policy();
        assert!(allowed(
            &policy,
            "alice@example.com",
            Namespace::Professional,
            Operation::Read
        ));
        assert!(allowed(
            &policy,
            "alice@example.com",
            Namespace::Professional,
            Operation::Update
        ));
        assert!(!allowed(
            &policy,
            "bob@other.com",
            Namespace::Professional,
            Operation::Read
        ));
        assert!(!allowed(
            &policy,
            "mallory@notexample.com",
            Namespace::Professional,
            Operation::Read
        ));
    }

    #[test]
    fn unit_delete_requires_superuser_regardless_of_namespace() {
        let policy = policy();
        let decision = evaluate_access(
            &policy,
            "owner@home.net",
            Namespace::Personal,
            Operation::Delete,
        );
        assert_eq!(decision.reason_code(), "deny_delete_requires_superuser");
        assert!(!allowed(
            &policy,
            "alice@example.com",
            Namespace::Professional,
            Operation::Delete
        ));
    }

    #[test]
    fn unit_people_namespace_visible_to_owner_and_team() {
        let policy = policy();
        assert!(allowed(&policy, "owner@home.net", Namespace::People, Operation::Create));
        assert!(allowed(&policy, "alice@example.com", Namespace::People, Operation::Read));
        assert!(!allowed(&policy, "bob@other.com", Namespace::People, Operation::Read));
    }

    #[test]
    fn regression_empty_caller_and_empty_domain_fail_closed() {
        let policy = AccessPolicyConfig::default();
        let decision = evaluate_access(&policy, "  ", Namespace::Professional, Operation::Read);
        assert_eq!(decision.reason_code(), "deny_caller_id_missing");
        assert!(!allowed(
            &policy,
            "alice@example.com",
            Namespace::Professional,
            Operation::Read
        ));
        assert!(!allowed(&policy, "", Namespace::Personal, Operation::Read));
    }

    #[test]
    fn functional_record_update_requires_owner_or_identifier_match() {
        let policy = policy();
        let memory = RecordOwnership::Memory {
            owner_id: "alice@example.com",
        };
        assert!(authorize_record_update(&policy, "Alice@Example.com", memory).is_allowed());
        assert!(!authorize_record_update(&policy, "carol@example.com", memory).is_allowed());
        assert!(authorize_record_update(&policy, "root@example.com", memory).is_allowed());

        let identifiers = vec!["+15550100".to_string(), "dave@example.com".to_string()];
        let person = RecordOwnership::Person {
            identifier_values: &identifiers,
        };
        let decision = authorize_record_update(&policy, "dave@example.com", person);
        assert_eq!(decision.reason_code(), "allow_record_identifier");
        let decision = authorize_record_update(&policy, "carol@example.com", person);
        assert_eq!(decision.reason_code(), "deny_record_not_owned");
    }
}
