use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::types::{ChatId, UserId};

/// One playable media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    /// URL o URI ya resuelta
    pub url: String,
    /// Segundos; 0 = en vivo / sin límite
    pub duration: u64,
    pub requested_by: UserId,
    pub is_video: bool,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, url: impl Into<String>, duration: u64, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            duration,
            requested_by,
            is_video: false,
            added_at: Utc::now(),
        }
    }

    pub fn with_video(mut self, is_video: bool) -> Self {
        self.is_video = is_video;
        self
    }

    pub fn is_live(&self) -> bool {
        self.duration == 0
    }
}

/// Per-chat FIFO queues. The head of each queue is the track playing now.
///
/// A chat with no entry and a chat with an empty queue are the same state:
/// the entry is removed as soon as the last track leaves.
#[derive(Debug, Default)]
pub struct QueueStore {
    queues: DashMap<ChatId, VecDeque<Track>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track. Con `force` (o sin cola previa) empieza una cola nueva.
    ///
    /// Returns the 0-based position; 0 means it plays right away.
    pub fn enqueue(&self, chat: ChatId, track: Track, force: bool) -> usize {
        let title = track.title.clone();
        let mut queue = self.queues.entry(chat).or_default();
        if force {
            queue.clear();
        }
        queue.push_back(track);
        let position = queue.len() - 1;

        let action = if force { "Forzado" } else { "Agregado" };
        info!(
            "➕ {} '{}' en la cola del chat {} (posición {})",
            action, title, chat, position
        );
        position
    }

    /// Agrega al final y retorna la posición
    pub fn append(&self, chat: ChatId, track: Track) -> usize {
        let mut queue = self.queues.entry(chat).or_default();
        queue.push_back(track);
        queue.len() - 1
    }

    /// Agrega al principio; siempre posición 0
    pub fn prepend(&self, chat: ChatId, track: Track) -> usize {
        self.queues.entry(chat).or_default().push_front(track);
        0
    }

    pub fn peek_head(&self, chat: ChatId) -> Option<Track> {
        self.queues.get(&chat)?.front().cloned()
    }

    /// Removes and returns the head. Deletes the chat entry once empty.
    pub fn advance(&self, chat: ChatId) -> Option<Track> {
        let track = {
            let mut queue = self.queues.get_mut(&chat)?;
            queue.pop_front()
        };
        self.queues.remove_if(&chat, |_, queue| queue.is_empty());

        if let Some(ref track) = track {
            info!("⏭️ Sacado '{}' de la cola del chat {}", track.title, chat);
        }
        track
    }

    /// Removes a 1-based position. Position 1 (the playing track) is protected.
    pub fn remove_at(&self, chat: ChatId, position: usize) -> Option<Track> {
        let mut queue = self.queues.get_mut(&chat)?;
        if position <= 1 || position > queue.len() {
            return None;
        }
        let removed = queue.remove(position - 1);
        if let Some(ref track) = removed {
            debug!("❌ Track '{}' eliminado en posición {}", track.title, position);
        }
        removed
    }

    /// Mezcla todo menos la cabeza. Retorna cuántos se mezclaron.
    pub fn shuffle(&self, chat: ChatId) -> usize {
        let Some(mut queue) = self.queues.get_mut(&chat) else {
            return 0;
        };
        if queue.len() < 3 {
            return 0;
        }

        let mut rest: Vec<Track> = queue.drain(1..).collect();
        rest.shuffle(&mut rand::thread_rng());
        let shuffled = rest.len();
        queue.extend(rest);

        info!("🔀 Cola del chat {} mezclada ({} tracks)", chat, shuffled);
        shuffled
    }

    /// Exact locator match or case-insensitive exact title match.
    pub fn has_duplicate(&self, chat: ChatId, url: &str, title: &str) -> bool {
        let Some(queue) = self.queues.get(&chat) else {
            return false;
        };

        let normalized = title.trim().to_lowercase();
        queue.iter().any(|track| {
            (!url.is_empty() && track.url == url)
                || (!normalized.is_empty() && track.title.trim().to_lowercase() == normalized)
        })
    }

    pub fn size(&self, chat: ChatId) -> usize {
        self.queues.get(&chat).map_or(0, |queue| queue.len())
    }

    pub fn clear(&self, chat: ChatId) {
        if self.queues.remove(&chat).is_some() {
            info!("🗑️ Cola del chat {} limpiada", chat);
        }
    }

    /// Deja solo la cabeza. Retorna cuántos se quitaron.
    pub fn clear_pending(&self, chat: ChatId) -> usize {
        let Some(mut queue) = self.queues.get_mut(&chat) else {
            return 0;
        };
        let removed = queue.len().saturating_sub(1);
        queue.truncate(1);
        removed
    }

    /// Read-only snapshot, head first.
    pub fn snapshot(&self, chat: ChatId) -> Vec<Track> {
        self.queues
            .get(&chat)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_duration(&self, chat: ChatId) -> Duration {
        self.queues.get(&chat).map_or(Duration::ZERO, |queue| {
            Duration::from_secs(queue.iter().map(|track| track.duration).sum())
        })
    }

    pub fn active_count(&self) -> usize {
        self.queues.len()
    }

    pub fn chats(&self) -> Vec<ChatId> {
        self.queues.iter().map(|entry| *entry.key()).collect()
    }

    /// Vacía todas las colas. Retorna cuántas había.
    pub fn clear_all(&self) -> usize {
        let count = self.queues.len();
        self.queues.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CHAT: ChatId = ChatId(-1001);

    fn track(title: &str) -> Track {
        Track::new(title, format!("https://media.example/{title}"), 180, UserId(42))
    }

    fn titles(store: &QueueStore) -> Vec<String> {
        store.snapshot(CHAT).into_iter().map(|t| t.title).collect()
    }

    #[test]
    fn test_enqueue_then_advance_returns_same_track() {
        let store = QueueStore::new();
        let a = track("A");
        assert_eq!(store.enqueue(CHAT, a.clone(), false), 0);
        assert_eq!(store.advance(CHAT), Some(a));
    }

    #[test]
    fn test_positions_and_force_replaces_queue() {
        let store = QueueStore::new();
        assert_eq!(store.enqueue(CHAT, track("A"), false), 0);
        assert_eq!(store.enqueue(CHAT, track("B"), false), 1);
        assert_eq!(store.enqueue(CHAT, track("C"), false), 2);

        assert_eq!(store.enqueue(CHAT, track("F"), true), 0);
        assert_eq!(titles(&store), vec!["F"]);
    }

    #[test]
    fn test_advance_to_empty_removes_chat_entry() {
        let store = QueueStore::new();
        store.enqueue(CHAT, track("A"), false);
        store.advance(CHAT);

        assert_eq!(store.size(CHAT), 0);
        assert_eq!(store.peek_head(CHAT), None);
        assert_eq!(store.active_count(), 0);
        assert!(store.chats().is_empty());
        assert_eq!(store.advance(CHAT), None);
    }

    #[test]
    fn test_remove_at_protects_head_and_bounds() {
        let store = QueueStore::new();
        for name in ["A", "B", "C"] {
            store.enqueue(CHAT, track(name), false);
        }

        assert_eq!(store.remove_at(CHAT, 1), None);
        assert_eq!(store.remove_at(CHAT, 0), None);
        assert_eq!(store.remove_at(CHAT, 4), None);
        assert_eq!(store.remove_at(CHAT, 2).map(|t| t.title), Some("B".to_string()));
        assert_eq!(titles(&store), vec!["A", "C"]);
        assert_eq!(store.remove_at(ChatId(5), 2), None);
    }

    #[test]
    fn test_shuffle_small_queue_is_noop() {
        let store = QueueStore::new();
        store.enqueue(CHAT, track("A"), false);
        store.enqueue(CHAT, track("B"), false);

        assert_eq!(store.shuffle(CHAT), 0);
        assert_eq!(titles(&store), vec!["A", "B"]);
        assert_eq!(store.shuffle(ChatId(77)), 0);
    }

    #[test]
    fn test_shuffle_keeps_head() {
        let store = QueueStore::new();
        for i in 0..10 {
            store.enqueue(CHAT, track(&format!("T{i}")), false);
        }

        assert_eq!(store.shuffle(CHAT), 9);
        let after = titles(&store);
        assert_eq!(after[0], "T0");
        assert_eq!(after.len(), 10);

        let mut sorted = after.clone();
        sorted.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("T{i}")).collect();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_has_duplicate_by_url_or_title() {
        let store = QueueStore::new();
        store.enqueue(CHAT, Track::new("Song A", "url-1", 200, UserId(1)), false);

        assert!(store.has_duplicate(CHAT, "url-1", "song a"));
        assert!(store.has_duplicate(CHAT, "url-1", "Something Else"));
        assert!(store.has_duplicate(CHAT, "url-2", "  SONG A "));
        assert!(!store.has_duplicate(CHAT, "url-2", "Song A (Live)"));
        assert!(!store.has_duplicate(CHAT, "", ""));
        assert!(!store.has_duplicate(ChatId(1), "url-1", "Song A"));
    }

    #[test]
    fn test_loop_primitives() {
        let store = QueueStore::new();
        store.enqueue(CHAT, track("A"), false);
        store.enqueue(CHAT, track("B"), false);

        let popped = store.advance(CHAT).unwrap();
        assert_eq!(store.append(CHAT, popped), 1);
        assert_eq!(titles(&store), vec!["B", "A"]);

        assert_eq!(store.prepend(CHAT, track("Z")), 0);
        assert_eq!(titles(&store), vec!["Z", "B", "A"]);
    }

    #[test]
    fn test_clear_pending_keeps_current() {
        let store = QueueStore::new();
        assert_eq!(store.clear_pending(CHAT), 0);
        for name in ["A", "B", "C"] {
            store.enqueue(CHAT, track(name), false);
        }
        assert_eq!(store.clear_pending(CHAT), 2);
        assert_eq!(titles(&store), vec!["A"]);
        assert_eq!(store.clear_pending(CHAT), 0);
    }

    #[test]
    fn test_total_duration_and_clear_all() {
        let store = QueueStore::new();
        store.enqueue(CHAT, track("A"), false);
        store.enqueue(CHAT, Track::new("Radio", "live://x", 0, UserId(1)), false);
        store.enqueue(ChatId(2), track("B"), false);

        assert_eq!(store.total_duration(CHAT), Duration::from_secs(180));
        assert_eq!(store.clear_all(), 2);
        assert_eq!(store.size(ChatId(2)), 0);
    }
}
