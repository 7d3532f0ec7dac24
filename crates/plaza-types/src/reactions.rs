use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// The closed set of reactions a post accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Emoji {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

impl Emoji {
    pub const ALL: [Emoji; 6] = [
        Emoji::Like,
        Emoji::Love,
        Emoji::Haha,
        Emoji::Wow,
        Emoji::Sad,
        Emoji::Angry,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Emoji::Like => "like",
            Emoji::Love => "love",
            Emoji::Haha => "haha",
            Emoji::Wow => "wow",
            Emoji::Sad => "sad",
            Emoji::Angry => "angry",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Emoji::Like => "👍",
            Emoji::Love => "❤️",
            Emoji::Haha => "😂",
            Emoji::Wow => "😮",
            Emoji::Sad => "😢",
            Emoji::Angry => "😡",
        }
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Emoji {
    type Err = ValidationError;

    /// Accepts the kind name (any case) or the glyph. The heart is also
    /// accepted without its variation selector.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Emoji::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(s) || e.glyph() == s)
            .or_else(|| (s == "\u{2764}").then_some(Emoji::Love))
            .ok_or_else(|| ValidationError::UnsupportedReaction(s.to_string()))
    }
}

impl TryFrom<String> for Emoji {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Emoji> for String {
    fn from(value: Emoji) -> Self {
        value.name().to_string()
    }
}

/// What a toggle did to the requesting user's reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Toggle {
    Added { emoji: Emoji },
    Switched { from: Emoji, to: Emoji },
    Removed { emoji: Emoji },
}

impl Toggle {
    /// The user's reaction after the toggle.
    pub fn current(self) -> Option<Emoji> {
        match self {
            Toggle::Added { emoji } => Some(emoji),
            Toggle::Switched { to, .. } => Some(to),
            Toggle::Removed { .. } => None,
        }
    }
}

/// Emoji → users who reacted with it.
///
/// A user sits in at most one set and empty sets are never kept. Maps loaded
/// from storage with [`ReactionMap::insert_raw`] may violate the first rule;
/// every [`ReactionMap::toggle`] restores it for the toggling user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionMap(BTreeMap<Emoji, BTreeSet<Uuid>>);

impl ReactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stored reaction as-is, without enforcing exclusivity.
    pub fn insert_raw(&mut self, emoji: Emoji, user_id: Uuid) {
        self.0.entry(emoji).or_default().insert(user_id);
    }

    /// The user's reaction, scanning in emoji order.
    pub fn reaction_of(&self, user_id: Uuid) -> Option<Emoji> {
        self.0
            .iter()
            .find(|(_, users)| users.contains(&user_id))
            .map(|(emoji, _)| *emoji)
    }

    /// Apply one reaction toggle for `user_id`.
    ///
    /// Same emoji as the current one clears it; anything else replaces it.
    pub fn toggle(&mut self, user_id: Uuid, emoji: Emoji) -> Toggle {
        let current = self.reaction_of(user_id);
        self.remove_user(user_id);

        match current {
            Some(existing) if existing == emoji => Toggle::Removed { emoji },
            Some(existing) => {
                self.insert_raw(emoji, user_id);
                Toggle::Switched { from: existing, to: emoji }
            }
            None => {
                self.insert_raw(emoji, user_id);
                Toggle::Added { emoji }
            }
        }
    }

    /// Drop `user_id` from every set, pruning sets that become empty.
    pub fn remove_user(&mut self, user_id: Uuid) {
        self.0.retain(|_, users| {
            users.remove(&user_id);
            !users.is_empty()
        });
    }

    pub fn users(&self, emoji: Emoji) -> impl Iterator<Item = &Uuid> {
        self.0.get(&emoji).into_iter().flatten()
    }

    /// Per-emoji counts, omitting empty sets.
    pub fn counts(&self) -> BTreeMap<Emoji, usize> {
        self.0
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(emoji, users)| (*emoji, users.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// True when no user appears under two emoji.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.0.values().flatten().all(|user| seen.insert(*user))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emoji, &BTreeSet<Uuid>)> {
        self.0.iter().map(|(emoji, users)| (*emoji, users))
    }
}

impl FromIterator<(Emoji, Uuid)> for ReactionMap {
    fn from_iter<I: IntoIterator<Item = (Emoji, Uuid)>>(iter: I) -> Self {
        let mut map = ReactionMap::new();
        for (emoji, user_id) in iter {
            map.insert_raw(emoji, user_id);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_glyphs() {
        assert_eq!("love".parse::<Emoji>().unwrap(), Emoji::Love);
        assert_eq!("LIKE".parse::<Emoji>().unwrap(), Emoji::Like);
        assert_eq!("❤️".parse::<Emoji>().unwrap(), Emoji::Love);
        assert_eq!("\u{2764}".parse::<Emoji>().unwrap(), Emoji::Love);
        assert_eq!("😡".parse::<Emoji>().unwrap(), Emoji::Angry);
        assert_eq!(
            "🎉".parse::<Emoji>(),
            Err(ValidationError::UnsupportedReaction("🎉".into()))
        );
    }

    #[test]
    fn toggle_scenario() {
        let b = Uuid::new_v4();
        let mut map = ReactionMap::new();

        assert_eq!(map.toggle(b, Emoji::Love), Toggle::Added { emoji: Emoji::Love });
        assert_eq!(map.users(Emoji::Love).collect::<Vec<_>>(), vec![&b]);
        assert_eq!(map.total(), 1);

        assert_eq!(map.toggle(b, Emoji::Love), Toggle::Removed { emoji: Emoji::Love });
        assert!(map.is_empty());
        assert_eq!(map, ReactionMap::new());

        map.toggle(b, Emoji::Like);
        assert_eq!(
            map.toggle(b, Emoji::Love),
            Toggle::Switched { from: Emoji::Like, to: Emoji::Love }
        );
        assert_eq!(map.counts(), BTreeMap::from([(Emoji::Love, 1)]));
        assert_eq!(map.reaction_of(b), Some(Emoji::Love));
    }

    #[test]
    fn double_toggle_restores_prior_state() {
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut map = ReactionMap::new();
        map.toggle(users[0], Emoji::Wow);
        map.toggle(users[1], Emoji::Sad);
        map.toggle(users[2], Emoji::Wow);

        for user in &users {
            for emoji in Emoji::ALL {
                let before = map.clone();
                if before.reaction_of(*user).is_some_and(|e| e != emoji) {
                    // switching is not involutive, only same-emoji toggles are
                    continue;
                }
                map.toggle(*user, emoji);
                map.toggle(*user, emoji);
                assert_eq!(map, before, "{user} {emoji}");
            }
        }
    }

    #[test]
    fn every_sequence_keeps_one_reaction_per_user() {
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut map = ReactionMap::new();

        // Deterministic pseudo-random walk over (user, emoji) pairs.
        let mut state: u32 = 7;
        for _ in 0..500 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let user = users[(state >> 8) as usize % users.len()];
            let emoji = Emoji::ALL[(state >> 16) as usize % Emoji::ALL.len()];
            map.toggle(user, emoji);
            assert!(map.is_consistent());
            assert!(map.iter().all(|(_, set)| !set.is_empty()));
        }
    }

    #[test]
    fn toggle_repairs_inconsistent_state() {
        let u = Uuid::new_v4();
        let mut map: ReactionMap = [(Emoji::Like, u), (Emoji::Sad, u)].into_iter().collect();
        assert!(!map.is_consistent());

        assert_eq!(
            map.toggle(u, Emoji::Love),
            Toggle::Switched { from: Emoji::Like, to: Emoji::Love }
        );
        assert!(map.is_consistent());
        assert_eq!(map.reaction_of(u), Some(Emoji::Love));
        assert_eq!(map.total(), 1);

        let mut map: ReactionMap = [(Emoji::Like, u), (Emoji::Sad, u)].into_iter().collect();
        assert_eq!(map.toggle(u, Emoji::Like), Toggle::Removed { emoji: Emoji::Like });
        assert!(map.is_empty());
    }

    #[test]
    fn serializes_with_kind_names() {
        let u: Uuid = "6b1d6a53-46b8-4a84-8d5f-9f1e7ab4a0c1".parse().unwrap();
        let mut map = ReactionMap::new();
        map.toggle(u, Emoji::Love);

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({ "love": [u] }));

        let back: ReactionMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
