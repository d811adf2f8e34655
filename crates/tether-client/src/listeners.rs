//! Notification listener registry.

use std::collections::HashMap;
use std::sync::Arc;
use tether_core::Response;

/// Handle identifying one registration, for [`Client::off`](crate::Client::off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Callback invoked with the response type name and the decoded response.
pub type Listener = Arc<dyn Fn(&str, &Response) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    priority: i32,
    callback: Listener,
}

/// Listeners per response type, highest priority first. Equal priorities
/// keep registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    by_name: HashMap<String, Vec<Registration>>,
}

impl Listeners {
    pub fn add(&mut self, name: String, id: ListenerId, priority: i32, callback: Listener) {
        let list = self.by_name.entry(name).or_default();
        let at = list
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(list.len());
        list.insert(
            at,
            Registration {
                id,
                priority,
                callback,
            },
        );
    }

    /// Remove one registration, or all of them for `name` when `id` is `None`.
    pub fn remove(&mut self, name: &str, id: Option<ListenerId>) {
        match id {
            None => {
                self.by_name.remove(name);
            }
            Some(id) => {
                if let Some(list) = self.by_name.get_mut(name) {
                    list.retain(|r| r.id != id);
                    if list.is_empty() {
                        self.by_name.remove(name);
                    }
                }
            }
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.by_name.get(name).is_some_and(|l| !l.is_empty())
    }

    /// Callbacks for `name` in delivery order, detached from the registry.
    pub fn snapshot(&self, name: &str) -> Vec<Listener> {
        self.by_name
            .get(name)
            .map(|list| list.iter().map(|r| r.callback.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
    }
}
