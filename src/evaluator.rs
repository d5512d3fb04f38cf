//! Alert Evaluator (C3): a pure function over `(event, rules, dedup)` →
//! zero or more `(rule, matched_trigger)` pairs. No I/O; this module
//! never suspends.

use dashmap::DashMap;
use parking_lot::Mutex;
use regex::RegexBuilder;
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::models::Rule;

/// The alert worker's own messages are prefixed/marked this way so the
/// self-suppression fallback (used when the bot's platform id isn't
/// known yet) can recognize and skip them textually.
pub const ALERT_PREFIX: &str = "\u{1f6a8} TeleGuard Alert";
pub const ALERT_MARKER: &str = "TeleGuard Alert Triggered";

/// Dedup cache is cleared wholesale once it exceeds this many entries.
const DEDUP_CLEAR_THRESHOLD: usize = 5_000;

/// A single inbound message event, platform-agnostic so the Evaluator
/// has no dependency on the upstream client crate.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub outgoing: bool,
    pub body: String,
}

/// One matched rule for one event.
#[derive(Debug, Clone)]
pub struct Match {
    pub rule: Rule,
    pub matched_trigger: String,
}

/// Process-local, cross-user dedup cache keyed by `(chat_id, message_id)`.
/// Correct across users because that pair is globally unique on the
/// upstream platform.
pub struct DedupCache {
    seen: Mutex<HashSet<(i64, i32)>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` if this is the first time `key` has been seen
    /// (and records it), `false` if it's a repeat.
    fn check_and_insert(&self, key: (i64, i32)) -> bool {
        let mut seen = self.seen.lock();
        if seen.len() > DEDUP_CLEAR_THRESHOLD {
            seen.clear();
        }
        seen.insert(key)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates events against rules. Owns the dedup cache and a compiled-
/// regex cache keyed by `(rule_id, pattern)` so per-message evaluation
/// never recompiles a pattern it has already seen.
pub struct Evaluator {
    dedup: DedupCache,
    regex_cache: DashMap<(Uuid, String), Option<regex::Regex>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            dedup: DedupCache::new(),
            regex_cache: DashMap::new(),
        }
    }

    /// Evaluate one event against a user's active rules.
    ///
    /// `bot_id` is the control bot's own platform user id, once known
    /// (see C5 init); while unknown, self-message suppression falls
    /// back to the textual prefix/marker check.
    pub fn evaluate(&self, event: &MessageEvent, rules: &[Rule], bot_id: Option<i64>) -> Vec<Match> {
        if !self.dedup.check_and_insert((event.chat_id, event.message_id)) {
            return Vec::new();
        }

        if event.outgoing {
            return Vec::new();
        }

        match bot_id {
            Some(id) if event.sender_id == Some(id) => return Vec::new(),
            Some(_) => {}
            None => {
                if event.body.starts_with(ALERT_PREFIX) || event.body.contains(ALERT_MARKER) {
                    return Vec::new();
                }
            }
        }

        let body_lower = event.body.to_lowercase();
        let mut matches = Vec::new();

        for rule in rules {
            if rule.is_paused {
                continue;
            }

            if let Some(source_id) = rule.source_id
                && source_id != event.chat_id
            {
                continue;
            }

            if rule
                .excluded_keywords
                .iter()
                .any(|exc| !exc.trim().is_empty() && body_lower.contains(&exc.to_lowercase()))
            {
                continue;
            }

            if let Some(trigger) = self.find_trigger(rule, &event.body, &body_lower) {
                matches.push(Match {
                    rule: rule.clone(),
                    matched_trigger: trigger,
                });
            }
        }

        matches
    }

    fn find_trigger(&self, rule: &Rule, body: &str, body_lower: &str) -> Option<String> {
        if rule.is_regex {
            for pattern in &rule.keywords {
                if pattern.trim().is_empty() {
                    continue;
                }
                let compiled = self
                    .regex_cache
                    .entry((rule.id, pattern.clone()))
                    .or_insert_with(|| {
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| warn!(rule_id = %rule.id, pattern = %pattern, error = %e, "invalid regex trigger"))
                            .ok()
                    })
                    .clone();
                if let Some(re) = compiled
                    && re.is_match(body)
                {
                    return Some(pattern.clone());
                }
            }
            None
        } else {
            rule.keywords
                .iter()
                .find(|kw| !kw.trim().is_empty() && body_lower.contains(&kw.to_lowercase()))
                .cloned()
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn base_rule(keywords: Vec<&str>) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source_id: None,
            source_name: None,
            keywords: keywords.into_iter().map(String::from).collect(),
            excluded_keywords: vec![],
            is_regex: false,
            notify_email: true,
            notify_bot: true,
            webhook_url: None,
            is_paused: false,
            trigger_count: 0,
            created_at: Utc::now(),
        }
    }

    fn event(chat_id: i64, message_id: i32, body: &str) -> MessageEvent {
        MessageEvent {
            chat_id,
            message_id,
            sender_id: Some(999),
            sender_username: Some("alice".to_string()),
            outgoing: false,
            body: body.to_string(),
        }
    }

    // S1 — substring hit.
    #[test]
    fn substring_match_fires() {
        let evaluator = Evaluator::new();
        let rule = base_rule(vec!["bitcoin"]);
        let ev = event(10, 7, "Buying Bitcoin now");

        let matches = evaluator.evaluate(&ev, &[rule], None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_trigger, "bitcoin");
    }

    // S2 — exclusion blocks.
    #[test]
    fn exclusion_blocks_match() {
        let evaluator = Evaluator::new();
        let mut rule = base_rule(vec!["bitcoin"]);
        rule.excluded_keywords = vec!["airdrop".to_string()];
        let ev = event(10, 7, "bitcoin airdrop scam");

        let matches = evaluator.evaluate(&ev, &[rule], None);
        assert!(matches.is_empty());
    }

    // S3 — source filter.
    #[test]
    fn source_filter_restricts_chat() {
        let evaluator = Evaluator::new();
        let mut rule = base_rule(vec!["bitcoin"]);
        rule.source_id = Some(555);

        let wrong_chat = event(10, 1, "bitcoin");
        assert!(evaluator.evaluate(&wrong_chat, &[rule.clone()], None).is_empty());

        let right_chat = event(555, 2, "bitcoin");
        assert_eq!(evaluator.evaluate(&right_chat, &[rule], None).len(), 1);
    }

    // S4 — regex with one broken pattern.
    #[test]
    fn regex_with_broken_pattern_still_matches_good_one() {
        let evaluator = Evaluator::new();
        let mut rule = base_rule(vec!["[unclosed", "crypto.*coin"]);
        rule.is_regex = true;
        let ev = event(10, 1, "a cryptocurrency_coin surge");

        let matches = evaluator.evaluate(&ev, &[rule], None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_trigger, "crypto.*coin");
    }

    // S5 — dedup.
    #[test]
    fn duplicate_event_fires_once() {
        let evaluator = Evaluator::new();
        let rule = base_rule(vec!["bitcoin"]);
        let ev = event(10, 7, "bitcoin");

        assert_eq!(evaluator.evaluate(&ev, &[rule.clone()], None).len(), 1);
        assert_eq!(evaluator.evaluate(&ev, &[rule], None).len(), 0);
    }

    #[test]
    fn paused_rule_never_matches() {
        let evaluator = Evaluator::new();
        let mut rule = base_rule(vec!["bitcoin"]);
        rule.is_paused = true;
        let ev = event(10, 1, "bitcoin");

        assert!(evaluator.evaluate(&ev, &[rule], None).is_empty());
    }

    #[test]
    fn outgoing_events_never_match() {
        let evaluator = Evaluator::new();
        let rule = base_rule(vec!["bitcoin"]);
        let mut ev = event(10, 1, "bitcoin");
        ev.outgoing = true;

        assert!(evaluator.evaluate(&ev, &[rule], None).is_empty());
    }

    #[test]
    fn known_bot_sender_is_suppressed() {
        let evaluator = Evaluator::new();
        let rule = base_rule(vec!["bitcoin"]);
        let mut ev = event(10, 1, "bitcoin");
        ev.sender_id = Some(42);

        assert!(evaluator.evaluate(&ev, &[rule], Some(42)).is_empty());
    }

    #[test]
    fn unknown_bot_id_falls_back_to_textual_marker() {
        let evaluator = Evaluator::new();
        let rule = base_rule(vec!["bitcoin"]);
        let ev = event(10, 1, "\u{1f6a8} TeleGuard Alert: bitcoin spotted");

        assert!(evaluator.evaluate(&ev, &[rule], None).is_empty());
    }

    #[test]
    fn empty_trigger_never_matches() {
        let evaluator = Evaluator::new();
        let rule = base_rule(vec![""]);
        let ev = event(10, 1, "anything at all");

        assert!(evaluator.evaluate(&ev, &[rule], None).is_empty());
    }

    #[test]
    fn whitespace_only_exclusion_does_not_match() {
        let evaluator = Evaluator::new();
        let mut rule = base_rule(vec!["bitcoin"]);
        rule.excluded_keywords = vec!["   ".to_string()];
        let ev = event(10, 1, "bitcoin   ");

        assert_eq!(evaluator.evaluate(&ev, &[rule], None).len(), 1);
    }

    #[test]
    fn multiple_rules_can_all_fire_on_one_event() {
        let evaluator = Evaluator::new();
        let rule_a = base_rule(vec!["bitcoin"]);
        let rule_b = base_rule(vec!["buying"]);
        let ev = event(10, 1, "Buying Bitcoin now");

        let matches = evaluator.evaluate(&ev, &[rule_a, rule_b], None);
        assert_eq!(matches.len(), 2);
    }
}
