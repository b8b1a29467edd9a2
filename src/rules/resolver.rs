//! Rule resolution — turns a pattern-store snapshot into the effective
//! [`RuleSet`] for one post.
//!
//! Post-specific rules are looked up by the full post id first, then by the
//! trailing segment after the last `_` (page-qualified ids look like
//! `"{page_id}_{post_id}"`). A post-specific rule overrides every global rule
//! with an identical pattern and takes the first such rule's place; all
//! other global rules stay. The merged list is then stable-sorted by
//! priority, highest first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RuleSourceError;
use crate::rules::model::{CompiledRule, Rule, RuleSet, sort_by_priority};

/// A pattern store that can produce a fresh snapshot.
///
/// Both backing representations (relational rows and the JSON responses
/// file) sit behind this trait so matching and orchestration never see
/// which one is in use.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Load the full set of rules as an immutable snapshot.
    async fn load(&self) -> Result<RuleSnapshot, RuleSourceError>;
}

/// Immutable, pre-compiled view of a pattern store.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    global: Vec<Arc<CompiledRule>>,
    by_post: HashMap<String, Vec<Arc<CompiledRule>>>,
}

impl RuleSnapshot {
    /// Build from global rules and `(post key, rules)` groups, each in
    /// store order. Rules with `auto_reply` disabled are dropped here.
    pub fn new(
        global: impl IntoIterator<Item = Rule>,
        post_groups: impl IntoIterator<Item = (String, Vec<Rule>)>,
    ) -> Self {
        let global = compile_enabled(global);
        let mut by_post: HashMap<String, Vec<Arc<CompiledRule>>> = HashMap::new();
        for (key, rules) in post_groups {
            by_post.entry(key).or_default().extend(compile_enabled(rules));
        }
        Self { global, by_post }
    }

    /// Build from a flat list of rows, splitting on `post_id`.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut global = Vec::new();
        let mut groups: Vec<(String, Vec<Rule>)> = Vec::new();
        for rule in rules {
            match rule.post_id.clone() {
                None => global.push(rule),
                Some(key) => match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, bucket)) => bucket.push(rule),
                    None => groups.push((key, vec![rule])),
                },
            }
        }
        Self::new(global, groups)
    }

    /// Total rules held (global + all posts).
    pub fn rule_count(&self) -> usize {
        self.global.len() + self.by_post.values().map(Vec::len).sum::<usize>()
    }

    /// Post-specific rules for `post_id`, by full id then short id.
    fn post_specific(&self, post_id: &str) -> &[Arc<CompiledRule>] {
        self.by_post
            .get(post_id)
            .or_else(|| self.by_post.get(short_post_id(post_id)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Effective rules for a post. Pure; unknown posts get the global rules.
    pub fn resolve(&self, post_id: &str) -> RuleSet {
        let mut merged = merge_rules(&self.global, self.post_specific(post_id));
        sort_by_priority(&mut merged);
        RuleSet::new(merged)
    }
}

/// Trailing segment after the last `_`, or the whole id.
pub fn short_post_id(post_id: &str) -> &str {
    post_id.rsplit('_').next().unwrap_or(post_id)
}

/// Merge global and post-specific rules keyed by pattern text.
///
/// Each global rule whose pattern also appears post-specifically is
/// replaced, at the position of its first occurrence, by every
/// post-specific rule with that pattern. Remaining post-specific rules are
/// appended in order.
pub fn merge_rules(
    global: &[Arc<CompiledRule>],
    specific: &[Arc<CompiledRule>],
) -> Vec<Arc<CompiledRule>> {
    let overridden: HashSet<&str> = specific.iter().map(|r| r.pattern()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut merged = Vec::with_capacity(global.len() + specific.len());

    for rule in global {
        let key = rule.pattern();
        if !overridden.contains(key) {
            merged.push(Arc::clone(rule));
        } else if placed.insert(key) {
            merged.extend(specific.iter().filter(|s| s.pattern() == key).cloned());
        }
    }

    merged.extend(
        specific
            .iter()
            .filter(|s| !placed.contains(s.pattern()))
            .cloned(),
    );
    merged
}

fn compile_enabled(rules: impl IntoIterator<Item = Rule>) -> Vec<Arc<CompiledRule>> {
    rules
        .into_iter()
        .filter(|r| r.auto_reply)
        .map(|r| Arc::new(CompiledRule::compile(r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(set: &RuleSet) -> Vec<&str> {
        set.iter().map(|r| r.rule.response.as_str()).collect()
    }

    #[test]
    fn post_rule_overrides_global_with_same_pattern() {
        let snap = RuleSnapshot::new(
            vec![
                Rule::global("price", "global price"),
                Rule::global("hello", "global hello"),
            ],
            vec![(
                "post1".to_string(),
                vec![Rule::for_post("post1", "price", "post price")],
            )],
        );

        let set = snap.resolve("post1");
        assert_eq!(responses(&set), vec!["post price", "global hello"]);
    }

    #[test]
    fn unknown_post_gets_global_only() {
        let snap = RuleSnapshot::new(
            vec![Rule::global("hi", "hello!")],
            vec![("other".to_string(), vec![Rule::for_post("other", "x", "y")])],
        );
        let set = snap.resolve("nobody");
        assert_eq!(responses(&set), vec!["hello!"]);
    }

    #[test]
    fn composite_id_falls_back_to_short_id() {
        let snap = RuleSnapshot::new(
            vec![Rule::global("hi", "global")],
            vec![("222".to_string(), vec![Rule::for_post("222", "deal", "post deal")])],
        );
        let set = snap.resolve("111_222");
        assert_eq!(set.patterns(), vec!["hi", "deal"]);
    }

    #[test]
    fn full_id_wins_over_short_id() {
        let snap = RuleSnapshot::new(
            Vec::new(),
            vec![
                ("222".to_string(), vec![Rule::for_post("222", "a", "short")]),
                ("111_222".to_string(), vec![Rule::for_post("111_222", "a", "full")]),
            ],
        );
        assert_eq!(responses(&snap.resolve("111_222")), vec!["full"]);
    }

    #[test]
    fn merged_set_is_sorted_by_priority() {
        let snap = RuleSnapshot::new(
            vec![
                Rule::global("low", "l").with_priority(1),
                Rule::global("high", "h").with_priority(10),
            ],
            vec![("p".to_string(), vec![Rule::for_post("p", "mid", "m").with_priority(5)])],
        );
        assert_eq!(snap.resolve("p").patterns(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn disabled_rules_are_excluded() {
        let mut off = Rule::global("quiet", "never");
        off.auto_reply = false;
        let snap = RuleSnapshot::new(vec![off, Rule::global("loud", "yes")], Vec::new());
        assert_eq!(snap.resolve("p").patterns(), vec!["loud"]);
        assert_eq!(snap.rule_count(), 1);
    }

    #[test]
    fn from_rules_groups_by_post_id() {
        let snap = RuleSnapshot::from_rules(vec![
            Rule::global("g", "G"),
            Rule::for_post("p1", "a", "A"),
            Rule::for_post("p2", "b", "B"),
            Rule::for_post("p1", "c", "C"),
        ]);
        assert_eq!(snap.resolve("p1").patterns(), vec!["g", "a", "c"]);
        assert_eq!(snap.resolve("p2").patterns(), vec!["g", "b"]);
        assert_eq!(snap.rule_count(), 4);
    }

    #[test]
    fn resolve_is_deterministic() {
        let snap = RuleSnapshot::from_rules(vec![
            Rule::global("a", "1"),
            Rule::global("b", "2"),
            Rule::for_post("p", "a", "3"),
        ]);
        assert_eq!(snap.resolve("p").patterns(), snap.resolve("p").patterns());
    }

    #[test]
    fn short_id_without_separator_is_identity() {
        assert_eq!(short_post_id("12345"), "12345");
        assert_eq!(short_post_id("page_post"), "post");
        assert_eq!(short_post_id("a_b_c"), "c");
    }
}
