#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use std::collections::HashSet;

use tokio::sync::{RwLock, mpsc, watch};

use crate::engine::EngineError;
use crate::models::{ArcEventTx, Conversation, Event, OrderedSet};
use crate::storage::Snapshot;

#[derive(Default)]
struct StoreState {
    conversations: Vec<Conversation>,
    selected: OrderedSet<String>,
}

/// Single owner of the conversation collection and of the selection.
///
/// Every mutation goes through one write lock, is published as an
/// [`Event`] and, when a persistence channel is attached, handed over as a
/// full [`Snapshot`]. The set of streaming conversations is mirrored in a
/// watch channel so callers can wait for a group of them to go idle.
pub struct ConversationStore {
    state: RwLock<StoreState>,
    streaming: watch::Sender<HashSet<String>>,
    event_tx: ArcEventTx,
    persist_tx: Option<mpsc::UnboundedSender<Snapshot>>,
}

impl ConversationStore {
    pub fn new(event_tx: ArcEventTx) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            streaming: watch::Sender::new(HashSet::new()),
            event_tx,
            persist_tx: None,
        }
    }

    pub fn with_persistence(mut self, persist_tx: mpsc::UnboundedSender<Snapshot>) -> Self {
        self.persist_tx = Some(persist_tx);
        self
    }

    /// Replace the collection with previously persisted state. Nothing is
    /// streaming after a load, selected ids that no longer exist are dropped.
    pub async fn load(&self, conversations: Vec<Conversation>, selected_ids: Vec<String>) {
        let mut state = self.state.write().await;
        state.conversations = conversations
            .into_iter()
            .map(|mut conversation| {
                conversation.is_message_streaming = false;
                conversation
            })
            .collect();
        let selected: OrderedSet<String> = selected_ids
            .into_iter()
            .filter(|id| state.conversations.iter().any(|c| &c.id == id))
            .collect();
        state.selected = selected;
        self.streaming.send_replace(HashSet::new());
        log::debug!(
            "Loaded {} conversations, {} selected",
            state.conversations.len(),
            state.selected.len()
        );
    }

    pub async fn get(&self, id: &str) -> Option<Conversation> {
        let state = self.state.read().await;
        state.conversations.iter().find(|c| c.id == id).cloned()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn selected_ids(&self) -> Vec<String> {
        self.state.read().await.selected.to_vec()
    }

    pub async fn selected_conversations(&self) -> Vec<Conversation> {
        let state = self.state.read().await;
        state
            .selected
            .iter()
            .filter_map(|id| state.conversations.iter().find(|c| &c.id == id))
            .cloned()
            .collect()
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.streaming.borrow().contains(id)
    }

    pub fn any_streaming(&self, ids: &[String]) -> bool {
        let streaming = self.streaming.borrow();
        ids.iter().any(|id| streaming.contains(id))
    }

    /// Resolve once none of `ids` is streaming.
    pub async fn wait_until_idle(&self, ids: &[String]) {
        let mut rx = self.streaming.subscribe();
        // the sender lives as long as `self`, the wait can't fail
        let _ = rx
            .wait_for(|streaming| ids.iter().all(|id| !streaming.contains(id)))
            .await;
    }

    pub async fn insert(&self, conversation: Conversation) {
        let snapshot = conversation.clone();
        {
            let mut state = self.state.write().await;
            self.sync_streaming(&conversation);
            match state.conversations.iter_mut().find(|c| c.id == conversation.id) {
                Some(existing) => *existing = conversation,
                None => state.conversations.push(conversation),
            }
            self.persist(&state);
        }
        self.publish(Event::ConversationUpdated(snapshot)).await;
    }

    /// Apply `f` to the conversation `id` under the write lock. Nothing is
    /// published when `f` rejects the update, `f` must leave the
    /// conversation untouched in that case.
    pub async fn try_update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Conversation) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let (ret, snapshot) = {
            let mut state = self.state.write().await;
            let conversation = state
                .conversations
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| EngineError::ConversationNotFound(id.to_string()))?;

            let ret = f(conversation)?;
            let snapshot = conversation.clone();
            self.sync_streaming(&snapshot);
            self.persist(&state);
            (ret, snapshot)
        };

        self.publish(Event::ConversationUpdated(snapshot)).await;
        Ok(ret)
    }

    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut Conversation) -> R) -> Option<R> {
        self.try_update(id, |conversation| Ok(f(conversation))).await.ok()
    }

    pub async fn delete(&self, ids: &[String]) {
        {
            let mut state = self.state.write().await;
            state.conversations.retain(|c| !ids.contains(&c.id));
            for id in ids {
                state.selected.remove(id);
            }
            self.streaming.send_if_modified(|streaming| {
                let before = streaming.len();
                streaming.retain(|id| !ids.contains(id));
                before != streaming.len()
            });
            self.persist(&state);
        }
        self.publish(Event::ConversationsDeleted(ids.to_vec())).await;
    }

    /// Replace the selection. Unknown ids are ignored.
    pub async fn select(&self, ids: &[String]) {
        let selected = {
            let mut state = self.state.write().await;
            let selected: OrderedSet<String> = ids
                .iter()
                .filter(|id| state.conversations.iter().any(|c| &c.id == *id))
                .cloned()
                .collect();
            state.selected = selected;
            self.persist(&state);
            state.selected.to_vec()
        };
        self.publish(Event::SelectionChanged(selected)).await;
    }

    pub async fn unselect(&self, ids: &[String]) {
        let selected = {
            let mut state = self.state.write().await;
            for id in ids {
                state.selected.remove(id);
            }
            self.persist(&state);
            state.selected.to_vec()
        };
        self.publish(Event::SelectionChanged(selected)).await;
    }

    pub async fn publish(&self, event: Event) {
        self.event_tx.send(event).await.unwrap_or_else(|err| {
            log::error!("Failed to publish event: {}", err);
        });
    }

    fn sync_streaming(&self, conversation: &Conversation) {
        self.streaming.send_if_modified(|streaming| {
            if conversation.is_message_streaming {
                streaming.insert(conversation.id.clone())
            } else {
                streaming.remove(&conversation.id)
            }
        });
    }

    fn persist(&self, state: &StoreState) {
        let Some(persist_tx) = self.persist_tx.as_ref() else {
            return;
        };

        let snapshot = Snapshot {
            conversations: state.conversations.clone(),
            selected_ids: state.selected.to_vec(),
        };
        if persist_tx.send(snapshot).is_err() {
            log::debug!("Persistence channel closed, snapshot dropped");
        }
    }
}
