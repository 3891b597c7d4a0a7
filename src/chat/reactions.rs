//! Emoji reaction toggling.
//!
//! A reaction is add-if-absent / remove-if-present for one `(emoji, user)`
//! pair. Other users' reactions under the same emoji are never touched, and an
//! emoji whose last reactor is removed disappears from the map entirely.

use crate::db::models::Reactions;

/// Maximum emoji length in bytes.
pub const MAX_EMOJI_LEN: usize = 64;

/// What a toggle did to the reaction map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Removed,
}

/// Toggle `user_id`'s reaction with `emoji` in place.
pub fn toggle(reactions: &mut Reactions, emoji: &str, user_id: &str) -> ReactionChange {
    if let Some(users) = reactions.get_mut(emoji) {
        if users.remove(user_id) {
            if users.is_empty() {
                reactions.remove(emoji);
            }
            return ReactionChange::Removed;
        }
        users.insert(user_id.to_string());
        return ReactionChange::Added;
    }

    reactions
        .entry(emoji.to_string())
        .or_default()
        .insert(user_id.to_string());
    ReactionChange::Added
}

/// Trim and validate an emoji supplied by a client.
pub fn normalize_emoji(raw: &str) -> Option<&str> {
    let emoji = raw.trim();
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
        return None;
    }
    Some(emoji)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_reaction_creates_emoji_entry() {
        let mut reactions = Reactions::new();
        assert_eq!(toggle(&mut reactions, "👍", "alice"), ReactionChange::Added);
        assert_eq!(reactions.get("👍"), Some(&set(&["alice"])));
    }

    #[test]
    fn test_second_toggle_removes_empty_emoji_key() {
        let mut reactions = Reactions::new();
        toggle(&mut reactions, "👍", "alice");
        assert_eq!(toggle(&mut reactions, "👍", "alice"), ReactionChange::Removed);
        assert!(reactions.get("👍").is_none());
        assert!(reactions.is_empty());
    }

    #[test]
    fn test_toggle_leaves_other_users_alone() {
        let mut reactions = Reactions::new();
        toggle(&mut reactions, "👍", "alice");
        toggle(&mut reactions, "👍", "bob");
        toggle(&mut reactions, "❤️", "alice");

        toggle(&mut reactions, "👍", "alice");

        assert_eq!(reactions.get("👍"), Some(&set(&["bob"])));
        assert_eq!(reactions.get("❤️"), Some(&set(&["alice"])));
    }

    #[test]
    fn test_double_toggle_restores_prior_state() {
        let mut base = Reactions::new();
        base.insert("🎉".to_string(), set(&["carol", "dave"]));
        base.insert("👍".to_string(), set(&["bob"]));

        for (emoji, user) in [("🎉", "carol"), ("🎉", "erin"), ("👀", "bob"), ("👍", "bob")] {
            let mut reactions = base.clone();
            toggle(&mut reactions, emoji, user);
            toggle(&mut reactions, emoji, user);
            assert_eq!(reactions, base, "toggle({emoji}, {user}) twice changed state");
        }
    }

    #[test]
    fn test_normalize_emoji_bounds() {
        assert_eq!(normalize_emoji("  👍 "), Some("👍"));
        assert_eq!(normalize_emoji("   "), None);
        assert_eq!(normalize_emoji(&"x".repeat(MAX_EMOJI_LEN + 1)), None);
    }
}
