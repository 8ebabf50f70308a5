//! Multi-instance scenarios: several agents sharing one in-memory bus.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabcast_core::{Envelope, InstanceId, ModuleCatalog, ModuleDeclaration, Mutation};
use tabcast_sync::transport::memory::MemoryBus;
use tabcast_sync::{
    ChannelOptions, ContextKind, DeliveryMode, MemoryStore, RouteOutcome, StoreModule, SyncAgent,
    SyncAgentHandle, SyncConfig, SyncError, SyncResult, SyncStatus, Transport,
};
use tokio::time::{sleep, timeout};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Todo {
    #[serde(rename = "_id")]
    id: String,
    value: String,
}

/// Todo list module. `clear` exists in the store but is never declared for
/// broadcast.
#[derive(Default)]
struct Todos {
    items: Vec<Todo>,
}

impl StoreModule for Todos {
    fn mutation_names(&self) -> Vec<String> {
        vec!["pushTodo".into(), "removeTodo".into(), "clear".into()]
    }

    fn commit(&mut self, name: &str, payload: &Value) -> SyncResult<()> {
        match name {
            "pushTodo" => {
                let todo: Todo = serde_json::from_value(payload.clone()).map_err(|e| {
                    SyncError::InvalidPayload {
                        mutation_type: "todos/pushTodo".into(),
                        reason: e.to_string(),
                    }
                })?;
                self.items.push(todo);
            }
            "removeTodo" => {
                let id = payload.as_str().unwrap_or_default();
                self.items.retain(|todo| todo.id != id);
            }
            "clear" => self.items.clear(),
            other => return Err(SyncError::UnknownMutation(other.into())),
        }
        Ok(())
    }

    fn action(&self, name: &str, _payload: &Value) -> SyncResult<Vec<(String, Value)>> {
        Err(SyncError::UnknownAction(name.into()))
    }

    fn state(&self) -> Value {
        json!({ "items": self.items })
    }
}

/// Local-only module.
#[derive(Default)]
struct Session {
    user: Option<String>,
}

impl StoreModule for Session {
    fn mutation_names(&self) -> Vec<String> {
        vec!["login".into()]
    }

    fn commit(&mut self, _name: &str, payload: &Value) -> SyncResult<()> {
        self.user = payload.as_str().map(str::to_string);
        Ok(())
    }

    fn action(&self, name: &str, _payload: &Value) -> SyncResult<Vec<(String, Value)>> {
        Err(SyncError::UnknownAction(name.into()))
    }

    fn state(&self) -> Value {
        json!({ "user": self.user })
    }
}

fn config() -> SyncConfig {
    SyncConfig::new().with_modules(
        ModuleCatalog::new()
            .with_module("todos", ModuleDeclaration::broadcast(["pushTodo", "removeTodo"]))
            .with_module("session", ModuleDeclaration::local(["login"])),
    )
}

fn election_config() -> SyncConfig {
    let mut config = config().with_election(true);
    config.election.response_time_ms = 100;
    config.election.fallback_interval_ms = 300;
    config
}

fn spawn_instance(bus: &MemoryBus, config: SyncConfig) -> SyncAgentHandle {
    let store = MemoryStore::new()
        .with_module("todos", Todos::default())
        .unwrap()
        .with_module("session", Session::default())
        .unwrap();
    SyncAgent::init(config, store, bus.transport(ContextKind::Window))
        .unwrap()
        .spawn()
}

async fn wait_for(handle: &SyncAgentHandle, predicate: impl FnMut(&SyncStatus) -> bool) -> SyncStatus {
    let mut status = handle.subscribe_status();
    let current = timeout(Duration::from_secs(5), status.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("agent stopped");
    current.clone()
}

async fn todos(handle: &SyncAgentHandle) -> Vec<Todo> {
    let state = handle.module_state("todos").await.unwrap().unwrap();
    serde_json::from_value(state["items"].clone()).unwrap()
}

fn todo(id: &str, value: &str) -> Value {
    json!({ "_id": id, "value": value })
}

/// Posts a raw envelope on `channel` from outside any agent.
fn inject(bus: &MemoryBus, channel: &str, envelope: &Envelope) {
    let endpoint = bus
        .transport(ContextKind::Window)
        .open(channel, &ChannelOptions::default())
        .unwrap();
    endpoint.post(&envelope.to_json().unwrap()).unwrap();
}

// =============================================================================
// Broadcast
// =============================================================================

#[tokio::test]
async fn test_round_trip_between_two_instances() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, config());
    let b = spawn_instance(&bus, config());

    let outcome = a.commit("todos/pushTodo", todo("a1", "buy milk")).await.unwrap();
    assert_eq!(outcome, RouteOutcome::Sent { channel: "todos".into() });

    let status = wait_for(&b, |s| s.applied == 1).await;
    assert_eq!(status.broadcast, 0);

    let expected = vec![Todo {
        id: "a1".into(),
        value: "buy milk".into(),
    }];
    assert_eq!(todos(&a).await, expected);
    assert_eq!(todos(&b).await, expected);
    assert_eq!(bus.posted("todos"), 1);
    assert_eq!(a.status().broadcast, 1);
}

#[tokio::test]
async fn test_three_instances_converge() {
    let bus = MemoryBus::new();
    let instances: Vec<_> = (0..3).map(|_| spawn_instance(&bus, config())).collect();

    instances[0].commit("todos/pushTodo", todo("1", "one")).await.unwrap();
    instances[1].commit("todos/pushTodo", todo("2", "two")).await.unwrap();
    let _ = wait_for(&instances[2], |s| s.applied == 2).await;
    instances[2].commit("todos/removeTodo", json!("1")).await.unwrap();

    for handle in &instances {
        let _ = wait_for(handle, |s| s.applied + s.broadcast == 3).await;
    }
    for handle in &instances {
        assert_eq!(
            todos(handle).await,
            vec![Todo {
                id: "2".into(),
                value: "two".into()
            }]
        );
    }
    assert_eq!(bus.posted("todos"), 3);
}

#[tokio::test]
async fn test_mutation_without_channel_is_not_posted() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, config());
    let _b = spawn_instance(&bus, config());

    let outcome = a.commit("session/login", json!("ada")).await.unwrap();

    assert_eq!(outcome, RouteOutcome::NoChannel);
    assert_eq!(bus.total_posted(), 0);
    assert_eq!(a.module_state("session").await.unwrap(), Some(json!({ "user": "ada" })));
}

#[tokio::test]
async fn test_sync_module_is_never_broadcast() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, config());
    let b = spawn_instance(&bus, config());

    a.dispatch("tabcast/setUid", json!("renamed")).await.unwrap();
    a.dispatch("tabcast/setLeader", Value::Null).await.unwrap();

    assert_eq!(bus.total_posted(), 0);
    let state = a.sync_state().await.unwrap();
    assert_eq!(state.uid.as_deref(), Some("renamed"));
    assert!(state.is_leader);

    let other = b.sync_state().await.unwrap();
    assert_eq!(other.uid.as_deref(), Some(b.identity().as_str()));
    assert!(!other.is_leader);
}

#[tokio::test]
async fn test_replayed_mutations_are_not_rebroadcast() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, config());
    let b = spawn_instance(&bus, config());
    let c = spawn_instance(&bus, config());

    a.commit("todos/pushTodo", todo("a1", "x")).await.unwrap();
    let _ = wait_for(&b, |s| s.applied == 1).await;
    let _ = wait_for(&c, |s| s.applied == 1).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(bus.posted("todos"), 1);
    assert_eq!(b.status().broadcast, 0);
    assert_eq!(c.status().broadcast, 0);
}

// =============================================================================
// Inbound Filtering
// =============================================================================

#[tokio::test]
async fn test_same_envelope_twice_commits_once() {
    let bus = MemoryBus::new();
    let b = spawn_instance(&bus, config());
    let envelope = Envelope::new(
        InstanceId::from("peer"),
        Mutation::new("todos/pushTodo", todo("p1", "dup")),
    );

    inject(&bus, "todos", &envelope);
    inject(&bus, "todos", &envelope);

    let status = wait_for(&b, |s| s.applied + s.suppressed == 2).await;
    assert_eq!(status.applied, 1);
    assert_eq!(status.suppressed, 1);
    assert_eq!(todos(&b).await.len(), 1);
}

#[tokio::test]
async fn test_only_last_message_is_compared() {
    let bus = MemoryBus::new();
    let b = spawn_instance(&bus, config());
    let first = Envelope::new(InstanceId::from("peer"), Mutation::new("todos/pushTodo", todo("1", "x")));
    let second = Envelope::new(InstanceId::from("peer"), Mutation::new("todos/pushTodo", todo("2", "y")));

    inject(&bus, "todos", &first);
    inject(&bus, "todos", &second);
    inject(&bus, "todos", &first);

    let status = wait_for(&b, |s| s.applied == 3).await;
    assert_eq!(status.suppressed, 0);
    assert_eq!(todos(&b).await.len(), 3);
}

#[tokio::test]
async fn test_type_outside_allow_list_is_rejected() {
    let bus = MemoryBus::new();
    let b = spawn_instance(&bus, config());
    b.commit("todos/pushTodo", todo("1", "keep")).await.unwrap();

    let clear = Envelope::new(InstanceId::from("peer"), Mutation::new("todos/clear", Value::Null));
    inject(&bus, "todos", &clear);
    let marker = Envelope::new(
        InstanceId::from("peer"),
        Mutation::new("todos/pushTodo", todo("2", "marker")),
    );
    inject(&bus, "todos", &marker);

    let status = wait_for(&b, |s| s.applied == 1).await;
    assert_eq!(status.suppressed, 0);
    let ids: Vec<String> = todos(&b).await.into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let bus = MemoryBus::new();
    let b = spawn_instance(&bus, config());
    let raw = bus
        .transport(ContextKind::Window)
        .open("todos", &ChannelOptions::default())
        .unwrap();

    raw.post("not json at all").unwrap();
    raw.post(r#"{"from":"peer"}"#).unwrap();
    let valid = Envelope::new(InstanceId::from("peer"), Mutation::new("todos/pushTodo", todo("1", "ok")));
    raw.post(&valid.to_json().unwrap()).unwrap();

    let status = wait_for(&b, |s| s.applied == 1).await;
    assert_eq!(status.suppressed, 0);
    assert_eq!(todos(&b).await.len(), 1);
}

#[tokio::test]
async fn test_echo_is_suppressed_under_full_mesh() {
    let bus = MemoryBus::new();
    let mut mesh = config();
    mesh.channel.mode = DeliveryMode::FullMesh;
    let a = spawn_instance(&bus, mesh.clone());
    let b = spawn_instance(&bus, mesh);

    a.commit("todos/pushTodo", todo("a1", "once")).await.unwrap();

    let a_status = wait_for(&a, |s| s.suppressed == 1).await;
    assert_eq!(a_status.applied, 0);
    let _ = wait_for(&b, |s| s.applied == 1).await;

    assert_eq!(todos(&a).await.len(), 1);
    assert_eq!(todos(&b).await.len(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_transport_fault_reaches_committer() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, config());

    bus.set_offline(true);
    let err = a.commit("todos/pushTodo", todo("1", "offline")).await.unwrap_err();
    assert!(err.is_transport_error());

    // The local commit itself stands.
    assert_eq!(todos(&a).await.len(), 1);

    bus.set_offline(false);
    let outcome = a.commit("todos/pushTodo", todo("2", "online")).await.unwrap();
    assert!(matches!(outcome, RouteOutcome::Sent { .. }));
}

#[tokio::test]
async fn test_store_rejection_reaches_committer() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, config());

    let err = a.commit("todos/pushTodo", json!("not a todo")).await.unwrap_err();
    assert!(err.is_store_error());
    assert_eq!(bus.total_posted(), 0);
}

// =============================================================================
// Leader Election
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_exactly_one_leader_among_racing_instances() {
    let bus = MemoryBus::new();
    let instances: Vec<_> = (0..3).map(|_| spawn_instance(&bus, election_config())).collect();

    sleep(Duration::from_millis(250)).await;
    let leaders = instances.iter().filter(|h| h.is_leader()).count();
    assert_eq!(leaders, 1);

    sleep(Duration::from_secs(3)).await;
    let mut flagged = 0;
    for handle in &instances {
        if handle.sync_state().await.unwrap().is_leader {
            flagged += 1;
        }
    }
    assert_eq!(flagged, 1);
    assert_eq!(instances.iter().filter(|h| h.is_leader()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_leader_death_triggers_reelection() {
    let bus = MemoryBus::new();
    let mut slow_fallback = election_config();
    slow_fallback.election.fallback_interval_ms = 60_000;
    let a = spawn_instance(&bus, slow_fallback.clone());
    let b = spawn_instance(&bus, slow_fallback);

    sleep(Duration::from_millis(250)).await;
    let (leader, follower) = if a.is_leader() { (a, b) } else { (b, a) };
    assert!(!follower.is_leader());

    leader.shutdown().await.unwrap();

    let _ = wait_for(&follower, |s| s.is_leader).await;
    assert!(follower.sync_state().await.unwrap().is_leader);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_leadership_resolves_for_lone_instance() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, election_config());

    timeout(Duration::from_secs(1), a.wait_for_leadership())
        .await
        .expect("election did not finish")
        .unwrap();
    assert!(a.sync_state().await.unwrap().is_leader);
    assert!(bus.posted("tabcast") >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_election_traffic_does_not_touch_stores() {
    let bus = MemoryBus::new();
    let a = spawn_instance(&bus, election_config());
    let b = spawn_instance(&bus, election_config());

    sleep(Duration::from_secs(1)).await;

    for handle in [&a, &b] {
        let status = handle.status();
        assert_eq!(status.applied, 0);
        assert_eq!(status.suppressed, 0);
        assert!(todos(handle).await.is_empty());
    }
    assert_eq!(bus.posted("todos"), 0);
}
