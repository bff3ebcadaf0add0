//! Per-sender bounded conversation history.
//!
//! Only the dispatch loop mutates this, while holding the relay lock. Trimming
//! is by entry count: at most `2 * exchanges` turns, oldest dropped first.
use crate::backend::{user_turn_content, Turn};
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub struct ConversationManager {
    max_entries: usize,
    conversations: HashMap<u32, VecDeque<Turn>>,
}

impl ConversationManager {
    pub fn new(exchanges: usize) -> Self {
        Self {
            max_entries: exchanges.max(1) * 2,
            conversations: HashMap::new(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Current turns for `sender`, oldest first. Empty if never seen.
    pub fn history(&self, sender: u32) -> Vec<Turn> {
        self.conversations
            .get(&sender)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, sender: u32) -> usize {
        self.conversations.get(&sender).map_or(0, VecDeque::len)
    }

    pub fn senders(&self) -> usize {
        self.conversations.len()
    }

    /// Record `"<name>:<text>"` as a user turn.
    pub fn push_user(&mut self, sender: u32, display_name: &str, text: &str) {
        self.push(sender, Turn::user(user_turn_content(display_name, text)));
    }

    pub fn push_assistant(&mut self, sender: u32, reply: &str) {
        self.push(sender, Turn::assistant(reply));
    }

    fn push(&mut self, sender: u32, turn: Turn) {
        let max = self.max_entries;
        let entries = self.conversations.entry(sender).or_default();
        entries.push_back(turn);
        while entries.len() > max {
            entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;

    #[test]
    fn user_turns_carry_display_name() {
        let mut m = ConversationManager::new(10);
        m.push_user(7, "Alice", "hi");
        assert_eq!(m.history(7), vec![Turn::user("Alice:hi")]);
    }

    #[test]
    fn never_exceeds_bound_and_drops_oldest() {
        let mut m = ConversationManager::new(10);
        for i in 0..50 {
            m.push_user(1, "A", &format!("q{}", i));
            assert!(m.len(1) <= 20);
            m.push_assistant(1, &format!("r{}", i));
            assert!(m.len(1) <= 20);
        }
        let h = m.history(1);
        assert_eq!(h.len(), 20);
        assert_eq!(h[0], Turn::user("A:q40"));
        assert_eq!(h[19].role, Role::Assistant);
        assert_eq!(h[19].content, "r49");
    }

    #[test]
    fn senders_are_isolated() {
        let mut m = ConversationManager::new(2);
        m.push_user(1, "A", "x");
        m.push_user(2, "B", "y");
        assert_eq!(m.len(1), 1);
        assert_eq!(m.len(2), 1);
        assert_eq!(m.senders(), 2);
        assert!(m.history(3).is_empty());
    }
}
