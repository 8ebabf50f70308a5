//! Todo list store module used by the demo.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabcast_sync::{StoreModule, SyncError, SyncResult};

/// Mutations the todo module declares for broadcast.
pub const MUTATIONS: [&str; 2] = ["pushTodo", "removeTodo"];

/// One todo item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(rename = "_id")]
    pub id: String,
    pub value: String,
}

impl Todo {
    /// Payload for `todos/pushTodo`.
    pub fn payload(id: &str, value: &str) -> Value {
        json!({ "_id": id, "value": value })
    }
}

/// The `todos` module.
#[derive(Debug, Default)]
pub struct Todos {
    items: Vec<Todo>,
}

impl StoreModule for Todos {
    fn mutation_names(&self) -> Vec<String> {
        MUTATIONS.iter().map(|name| name.to_string()).collect()
    }

    fn commit(&mut self, name: &str, payload: &Value) -> SyncResult<()> {
        match name {
            "pushTodo" => {
                let todo = serde_json::from_value(payload.clone()).map_err(|e| {
                    SyncError::InvalidPayload {
                        mutation_type: "todos/pushTodo".into(),
                        reason: e.to_string(),
                    }
                })?;
                self.items.push(todo);
            }
            "removeTodo" => {
                let id = payload.as_str().ok_or_else(|| SyncError::InvalidPayload {
                    mutation_type: "todos/removeTodo".into(),
                    reason: "expected a todo id".into(),
                })?;
                self.items.retain(|todo| todo.id != id);
            }
            other => return Err(SyncError::UnknownMutation(other.to_string())),
        }
        Ok(())
    }

    fn action(&self, name: &str, _payload: &Value) -> SyncResult<Vec<(String, Value)>> {
        Err(SyncError::UnknownAction(name.to_string()))
    }

    fn state(&self) -> Value {
        json!({ "items": self.items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_remove() {
        let mut todos = Todos::default();
        todos.commit("pushTodo", &Todo::payload("a1", "milk")).unwrap();
        todos.commit("pushTodo", &Todo::payload("a2", "eggs")).unwrap();
        todos.commit("removeTodo", &json!("a1")).unwrap();

        assert_eq!(
            todos.state(),
            json!({ "items": [{ "_id": "a2", "value": "eggs" }] })
        );
    }

    #[test]
    fn test_rejects_bad_payloads() {
        let mut todos = Todos::default();
        assert!(todos.commit("pushTodo", &json!("milk")).is_err());
        assert!(todos.commit("removeTodo", &json!(1)).is_err());
        assert!(todos.commit("clear", &Value::Null).is_err());
    }
}
