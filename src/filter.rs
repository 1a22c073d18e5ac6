use std::collections::HashMap;
use std::sync::Mutex;

use crate::storage::models::{MessageFilterMode, SourceChannel};

/// Compiled, case-insensitive substring matcher over a keyword list (spec
/// §4.9). Keywords are split by newline and trimmed; blank lines ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatcherKey {
    mode: MessageFilterMode,
    keywords: String,
}

#[derive(Debug, Clone)]
struct CompiledMatcher {
    lowercased_keywords: Vec<String>,
}

impl CompiledMatcher {
    fn compile(raw: &str) -> Self {
        let lowercased_keywords = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self { lowercased_keywords }
    }

    fn matches(&self, text: &str) -> bool {
        if text.is_empty() || self.lowercased_keywords.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        self.lowercased_keywords.iter().any(|kw| lowered.contains(kw.as_str()))
    }
}

/// Keyword filter decisions, memoized per `(mode, keywords)` tuple so that
/// repeated checks against the same channel during a history sync don't
/// recompile the matcher for every message (spec §4.9).
pub struct FilterEngine {
    global_keywords: String,
    compiled: Mutex<HashMap<MatcherKey, CompiledMatcher>>,
}

impl FilterEngine {
    pub fn new(global_keywords: String) -> Self {
        Self {
            global_keywords,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Empty text is never filtered, regardless of mode.
    pub fn is_filtered(&self, channel: &SourceChannel, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        match channel.message_filter_mode {
            MessageFilterMode::Disabled => false,
            MessageFilterMode::Custom => {
                self.check(MessageFilterMode::Custom, &channel.message_filter_keywords, text)
            }
            MessageFilterMode::Inherit => {
                self.check(MessageFilterMode::Inherit, &self.global_keywords, text)
            }
        }
    }

    fn check(&self, mode: MessageFilterMode, keywords: &str, text: &str) -> bool {
        let key = MatcherKey {
            mode,
            keywords: keywords.to_string(),
        };

        let mut guard = self.compiled.lock().expect("filter matcher cache poisoned");
        let matcher = guard
            .entry(key)
            .or_insert_with(|| CompiledMatcher::compile(keywords));
        matcher.matches(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn channel(mode: MessageFilterMode, keywords: &str) -> SourceChannel {
        SourceChannel {
            id: 1,
            channel_identifier: "@test".to_string(),
            telegram_id: Some(100),
            access_hash: Some(200),
            name: Some("test".to_string()),
            username: None,
            member_count: None,
            total_messages: None,
            is_protected: Some(false),
            is_active: true,
            priority: 0,
            mirror_mode: crate::storage::models::MirrorMode::Forward,
            message_filter_mode: mode,
            message_filter_keywords: keywords.to_string(),
            group_name: String::new(),
            sync_status: crate::storage::models::SyncStatus::Pending,
            last_sync_at: None,
            last_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn disabled_never_filters() {
        let engine = FilterEngine::new("spam".to_string());
        let ch = channel(MessageFilterMode::Disabled, "spam");
        assert!(!engine.is_filtered(&ch, "this is spam"));
    }

    #[test]
    fn custom_matches_case_insensitively() {
        let engine = FilterEngine::new(String::new());
        let ch = channel(MessageFilterMode::Custom, "Spam\n\n  ad  \n");
        assert!(engine.is_filtered(&ch, "this message is SPAM-like"));
        assert!(engine.is_filtered(&ch, "buy this ad now"));
        assert!(!engine.is_filtered(&ch, "totally normal text"));
    }

    #[test]
    fn inherit_uses_global_keywords() {
        let engine = FilterEngine::new("blocked".to_string());
        let ch = channel(MessageFilterMode::Inherit, "ignored because mode is inherit");
        assert!(engine.is_filtered(&ch, "this is blocked content"));
    }

    #[test]
    fn empty_text_is_never_filtered() {
        let engine = FilterEngine::new("anything".to_string());
        let ch = channel(MessageFilterMode::Custom, "anything");
        assert!(!engine.is_filtered(&ch, ""));
    }
}
