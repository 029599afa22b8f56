use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use shared::domain::ConversationId;

// Fallback expiry when the configured ttl overflows `Instant`.
const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct TypingTracker {
    ttl: Duration,
    entries: HashMap<ConversationId, BTreeMap<String, Instant>>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starting (or repeating) refreshes the expiry; stopping clears at once.
    pub fn set_typing(
        &mut self,
        conversation: &ConversationId,
        who: &str,
        is_typing: bool,
        now: Instant,
    ) {
        if is_typing {
            let expires_at = now
                .checked_add(self.ttl)
                .or_else(|| now.checked_add(MAX_TTL))
                .unwrap_or(now);
            self.entries
                .entry(conversation.clone())
                .or_default()
                .insert(who.to_string(), expires_at);
            return;
        }
        if let Some(names) = self.entries.get_mut(conversation) {
            names.remove(who);
            if names.is_empty() {
                self.entries.remove(conversation);
            }
        }
    }

    pub fn list_typing(
        &self,
        conversation: &ConversationId,
        excluding: Option<&str>,
        now: Instant,
    ) -> Vec<String> {
        self.entries
            .get(conversation)
            .map(|names| {
                names
                    .iter()
                    .filter(|(name, expires_at)| {
                        **expires_at > now && Some(name.as_str()) != excluding
                    })
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, names| {
            let before = names.len();
            names.retain(|_, expires_at| *expires_at > now);
            evicted += before - names.len();
            !names.is_empty()
        });
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
