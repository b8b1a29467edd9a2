//! Rule data model.
//!
//! A [`Rule`] is a stored row: pattern text, reply template, priority and a
//! few flags. Before matching, rules are compiled once per snapshot into
//! [`CompiledRule`]s; a pattern that does not compile is kept but never
//! matches, so one bad row cannot take the rest of the set down with it.

use std::sync::Arc;

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single reply rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Row id when the rule came from the database.
    pub id: Option<i64>,
    /// Regular expression searched (case-insensitively) in comment text.
    pub pattern: String,
    /// Reply template; may contain a `{name}` placeholder.
    pub response: String,
    /// Higher runs first.
    pub priority: i64,
    pub tag: Option<String>,
    /// `None` for global rules.
    pub post_id: Option<String>,
    /// Rules with `auto_reply = false` are stored but never fire.
    pub auto_reply: bool,
    pub reply_once: bool,
}

impl Rule {
    /// A global rule with default flags and priority 0.
    pub fn global(pattern: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            id: None,
            pattern: pattern.into(),
            response: response.into(),
            priority: 0,
            tag: None,
            post_id: None,
            auto_reply: true,
            reply_once: false,
        }
    }

    /// A rule scoped to one post.
    pub fn for_post(
        post_id: impl Into<String>,
        pattern: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            post_id: Some(post_id.into()),
            ..Self::global(pattern, response)
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_global(&self) -> bool {
        self.post_id.is_none()
    }
}

/// A rule together with its compiled pattern.
#[derive(Debug)]
pub struct CompiledRule {
    pub rule: Rule,
    /// `None` when the pattern failed to compile.
    regex: Option<Regex>,
}

impl CompiledRule {
    /// Compile a rule's pattern case-insensitively. Invalid patterns are
    /// logged and the rule is kept in a never-matching state.
    pub fn compile(rule: Rule) -> Self {
        let regex = match RegexBuilder::new(&rule.pattern)
            .case_insensitive(true)
            .build()
        {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(
                    rule_id = ?rule.id,
                    pattern = %rule.pattern,
                    "Invalid rule pattern, skipping: {e}"
                );
                None
            }
        };
        Self { rule, regex }
    }

    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    /// Unanchored search. Always false for an invalid pattern.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(text))
    }

    pub fn pattern(&self) -> &str {
        &self.rule.pattern
    }
}

/// The effective, priority-ordered rules for one post.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<CompiledRule>>,
}

impl RuleSet {
    /// Build from already-ordered compiled rules. Ordering is the caller's
    /// contract; see [`RuleSet::from_rules`] for the sorting constructor.
    pub fn new(rules: Vec<Arc<CompiledRule>>) -> Self {
        Self { rules }
    }

    /// Compile and stable-sort by priority, highest first.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut compiled: Vec<Arc<CompiledRule>> = rules
            .into_iter()
            .map(|r| Arc::new(CompiledRule::compile(r)))
            .collect();
        sort_by_priority(&mut compiled);
        Self { rules: compiled }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Patterns in evaluation order.
    pub fn patterns(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.pattern()).collect()
    }
}

/// Stable sort, priority descending; ties keep insertion order.
pub(crate) fn sort_by_priority(rules: &mut [Arc<CompiledRule>]) {
    rules.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
}

// ── File-backed responses ───────────────────────────────────────────

/// The `responses.json` document: pattern → reply maps, global and per post.
///
/// Both maps keep file order. A key repeated in the file keeps its first
/// position and takes the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsesConfig {
    #[serde(default)]
    pub global_responses: IndexMap<String, String>,
    #[serde(default)]
    pub post_responses: IndexMap<String, IndexMap<String, String>>,
}

impl ResponsesConfig {
    /// Global entries as rules, in file order.
    pub fn global_rules(&self) -> Vec<Rule> {
        self.global_responses
            .iter()
            .map(|(pattern, reply)| Rule::global(pattern.as_str(), reply.as_str()))
            .collect()
    }

    /// Per-post entries as `(post key, rules)`, in file order.
    pub fn post_rules(&self) -> Vec<(String, Vec<Rule>)> {
        self.post_responses
            .iter()
            .map(|(post_key, responses)| {
                let rules = responses
                    .iter()
                    .map(|(pattern, reply)| {
                        Rule::for_post(post_key.as_str(), pattern.as_str(), reply.as_str())
                    })
                    .collect();
                (post_key.clone(), rules)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_is_case_insensitive_and_unanchored() {
        let rule = CompiledRule::compile(Rule::global("price", "DM us"));
        assert!(rule.is_valid());
        assert!(rule.is_match("What's the PRICE please?"));
        assert!(!rule.is_match("how much"));
    }

    #[test]
    fn invalid_pattern_never_matches() {
        let rule = CompiledRule::compile(Rule::global("(unclosed", "x"));
        assert!(!rule.is_valid());
        assert!(!rule.is_match("(unclosed"));
    }

    #[test]
    fn rule_set_sorts_stably_by_priority() {
        let set = RuleSet::from_rules(vec![
            Rule::global("a", "1").with_priority(1),
            Rule::global("b", "2").with_priority(5),
            Rule::global("c", "3").with_priority(1),
            Rule::global("d", "4").with_priority(5),
        ]);
        assert_eq!(set.patterns(), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn responses_config_keeps_file_order() {
        let json = r#"{
            "global_responses": {"zeta": "z", "alpha": "a", "mid": "m"},
            "post_responses": {"222": {"b": "B", "a": "A"}}
        }"#;
        let cfg: ResponsesConfig = serde_json::from_str(json).unwrap();
        let globals: Vec<String> = cfg.global_rules().into_iter().map(|r| r.pattern).collect();
        assert_eq!(globals, vec!["zeta", "alpha", "mid"]);

        let posts = cfg.post_rules();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "222");
        assert_eq!(posts[0].1[0].pattern, "b");
        assert_eq!(posts[0].1[0].post_id.as_deref(), Some("222"));
    }

    #[test]
    fn duplicate_json_keys_replace_in_place() {
        let json = r#"{"global_responses": {"x": "first", "y": "why", "x": "second"}}"#;
        let cfg: ResponsesConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.global_responses.len(), 2);
        assert_eq!(cfg.global_responses.get("x").map(String::as_str), Some("second"));
        let first_key = cfg.global_responses.keys().next().map(String::as_str);
        assert_eq!(first_key, Some("x"));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let cfg: ResponsesConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.global_responses.is_empty());
        assert!(cfg.post_responses.is_empty());
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut cfg = ResponsesConfig::default();
        cfg.global_responses.insert("b".to_string(), "2".to_string());
        cfg.global_responses.insert("a".to_string(), "1".to_string());
        let out = serde_json::to_string(&cfg).unwrap();
        assert!(out.find("\"b\"").unwrap() < out.find("\"a\"").unwrap());
    }
}
