use std::sync::Arc;

use recall_access::{AccessPolicyConfig, Namespace};
use recall_core::VirtualPollClock;
use recall_memory::{
    decode_memory, is_memory_id, CallContext, GatewayConfig, HashEmbeddingProvider,
    InMemoryVectorStore, MemoryGateway, WriteVisibility, REQUIRES_CONFIRMATION_STATUS,
};
use recall_tools::{
    RecallToolRegistry, ToolExecutionResult, STATUS_FAILED, STATUS_OK, STATUS_RESTRICTED,
    STATUS_TIMEOUT,
};
use serde_json::{json, Value};

const OWNER: &str = "owner@home.net";
const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@other.com";
const ROOT: &str = "root@example.com";

/// One scripted conversation against a shared registry and store.
struct Conversation {
    store: Arc<InMemoryVectorStore>,
    clock: Arc<VirtualPollClock>,
    registry: RecallToolRegistry,
}

impl Conversation {
    fn new() -> Self {
        recall_core::init_tracing();
        let store = Arc::new(InMemoryVectorStore::new());
        let clock = Arc::new(VirtualPollClock::new());
        let config = GatewayConfig {
            access: AccessPolicyConfig {
                owner_identity: OWNER.to_string(),
                team_domain: "@example.com".to_string(),
                superusers: vec![ROOT.to_string()],
            },
            ..GatewayConfig::default()
        };
        let gateway = MemoryGateway::new(
            store.clone(),
            Arc::new(HashEmbeddingProvider::default()),
            config,
        )
        .with_poll_clock(clock.clone());
        Self {
            store,
            clock,
            registry: RecallToolRegistry::new(Arc::new(gateway)),
        }
    }

    async fn turn(
        &self,
        caller: &str,
        message: &str,
        tool: &str,
        arguments: Value,
    ) -> ToolExecutionResult {
        let context = CallContext::new(caller).with_latest_message(message);
        self.registry.dispatch(tool, arguments, &context).await
    }
}

fn id_of(result: &ToolExecutionResult) -> String {
    result.content["id"]
        .as_str()
        .expect("result carries an id")
        .to_string()
}

#[tokio::test]
async fn integration_create_requires_affirmation_before_any_write() {
    let conversation = Conversation::new();
    let arguments = json!({ "namespace": "professional", "text": "Budget review moved to May" });

    let proposal = conversation
        .turn(ALICE, "please remember the budget review date", "create_memory", arguments.clone())
        .await;
    assert_eq!(proposal.status(), Some(REQUIRES_CONFIRMATION_STATUS));
    assert_eq!(proposal.content["args"]["text"], "Budget review moved to May");
    assert_eq!(conversation.store.total_calls(), 0);

    let created = conversation
        .turn(ALICE, "YES", "create_memory", arguments)
        .await;
    assert_eq!(created.status(), Some(STATUS_OK), "{}", created.as_text());
    assert!(is_memory_id(&id_of(&created)));
    assert_eq!(conversation.store.upsert_calls(), 1);
    assert_eq!(created.content["verification_attempts"], 1);
}

#[tokio::test]
async fn integration_outsider_and_wrong_role_calls_never_reach_store() {
    let conversation = Conversation::new();

    let search = conversation
        .turn(
            BOB,
            "what do you know?",
            "search_memory",
            json!({ "namespace": "professional", "query": "budget" }),
        )
        .await;
    assert_eq!(search.status(), Some(STATUS_RESTRICTED));

    let personal = conversation
        .turn(
            ALICE,
            "YES",
            "create_memory",
            json!({ "namespace": "personal", "text": "Alice's diary" }),
        )
        .await;
    assert_eq!(personal.status(), Some(STATUS_RESTRICTED));

    let update = conversation
        .turn(
            ALICE,
            "YES",
            "update_memory",
            json!({
                "namespace": "professional",
                "id": "mem_2024_05_01_0000beef",
                "fields": { "namespace": "personal" }
            }),
        )
        .await;
    assert_eq!(update.status(), Some(STATUS_FAILED));
    assert_eq!(update.content["reason_code"], "validation_error");

    let delete = conversation
        .turn(
            ALICE,
            "YES",
            "delete_memory",
            json!({ "namespace": "professional", "id": "mem_2024_05_01_0000beef" }),
        )
        .await;
    assert_eq!(delete.status(), Some(STATUS_RESTRICTED));

    assert_eq!(conversation.store.total_calls(), 0);
}

#[tokio::test]
async fn integration_linked_memories_stay_bidirectional_through_delete() {
    let conversation = Conversation::new();
    let cause = conversation
        .turn(
            OWNER,
            "YES",
            "create_memory",
            json!({ "namespace": "personal", "text": "Started running every morning" }),
        )
        .await;
    let cause_id = id_of(&cause);

    let effect = conversation
        .turn(
            OWNER,
            "YES",
            "create_memory",
            json!({
                "namespace": "personal",
                "text": "Resting heart rate dropped",
                "related_memories": [{ "id": cause_id, "relation_type": "caused_by" }]
            }),
        )
        .await;
    assert_eq!(effect.status(), Some(STATUS_OK), "{}", effect.as_text());
    let effect_id = id_of(&effect);

    let cause_row = conversation
        .store
        .peek(Namespace::Personal, &cause_id)
        .await
        .expect("cause row");
    let cause_record = decode_memory(&cause_row).expect("decode cause");
    assert_eq!(cause_record.related_memories.len(), 1);
    assert_eq!(cause_record.related_memories[0].id, effect_id);
    assert_eq!(cause_record.related_memories[0].relation_type, "causes");

    let deleted = conversation
        .turn(
            ROOT,
            "YES",
            "delete_memory",
            json!({ "namespace": "personal", "id": effect_id }),
        )
        .await;
    assert_eq!(deleted.status(), Some(STATUS_OK), "{}", deleted.as_text());
    assert_eq!(deleted.content["unlinked"], json!([cause_id.clone()]));

    let cause_row = conversation
        .store
        .peek(Namespace::Personal, &cause_id)
        .await
        .expect("cause row");
    assert!(decode_memory(&cause_row)
        .expect("decode cause")
        .related_memories
        .is_empty());

    let again = conversation
        .turn(
            ROOT,
            "YES",
            "delete_memory",
            json!({ "namespace": "personal", "id": effect_id }),
        )
        .await;
    assert_eq!(again.status(), Some(STATUS_OK));
    assert_eq!(again.content["already_absent"], true);
}

#[tokio::test]
async fn integration_unreflected_write_reports_timeout_after_bounded_polling() {
    let conversation = Conversation::new();
    conversation.store.set_write_visibility(WriteVisibility::Never);

    let result = conversation
        .turn(
            ALICE,
            "YES",
            "create_memory",
            json!({ "namespace": "professional", "text": "Vendor contract signed" }),
        )
        .await;
    assert_eq!(result.status(), Some(STATUS_TIMEOUT));
    assert!(result.content["record_id"].is_string());
    assert_eq!(conversation.store.upsert_calls(), 1);
    assert_eq!(conversation.clock.sleep_count(), 9);
}

#[tokio::test]
async fn integration_lagging_write_converges_without_timeout() {
    let conversation = Conversation::new();
    conversation
        .store
        .set_write_visibility(WriteVisibility::AfterReads(3));

    let result = conversation
        .turn(
            ALICE,
            "YES",
            "create_memory",
            json!({ "namespace": "professional", "text": "Hiring freeze lifted" }),
        )
        .await;
    assert_eq!(result.status(), Some(STATUS_OK), "{}", result.as_text());
    assert!(result.content["verification_attempts"].as_u64().expect("attempts") > 1);
}
