//! Comment matching — picks the reply for a comment from a [`RuleSet`].

use std::collections::HashSet;
use std::str::FromStr;

use tracing::debug;

use crate::rules::model::RuleSet;

/// How matching rules are turned into a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// The first matching rule in set order wins; its template is sent
    /// verbatim.
    FirstMatch,
    /// Every matching rule contributes its rendered template, duplicates
    /// dropped, joined with newlines.
    #[default]
    CombineAll,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-match" | "first_match" => Ok(Self::FirstMatch),
            "combine" | "combine-all" | "combine_all" | "all" => Ok(Self::CombineAll),
            other => Err(format!("unknown match policy '{other}' (expected first or combine)")),
        }
    }
}

/// Per-comment rendering inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext<'a> {
    /// Replaces `{name}` in combine mode.
    pub name: &'a str,
}

/// Evaluates comment text against a rule set under one policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentMatcher {
    policy: MatchPolicy,
}

impl CommentMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Reply text for a comment, or `None` when nothing should be sent.
    ///
    /// Empty or whitespace-only comments never match, and a reply that
    /// renders to whitespace is treated as no match.
    pub fn match_comment(
        &self,
        text: &str,
        rules: &RuleSet,
        ctx: &MatchContext<'_>,
    ) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let reply = match self.policy {
            MatchPolicy::FirstMatch => first_match(text, rules),
            MatchPolicy::CombineAll => combine_all(text, rules, ctx),
        }?;

        if reply.trim().is_empty() {
            debug!("Matched rule rendered an empty reply, skipping");
            return None;
        }
        Some(reply)
    }
}

fn first_match(text: &str, rules: &RuleSet) -> Option<String> {
    let rule = rules.iter().find(|r| r.is_match(text))?;
    debug!(
        pattern = %rule.pattern(),
        tag = ?rule.rule.tag,
        "Comment matched rule"
    );
    Some(rule.rule.response.clone())
}

fn combine_all(text: &str, rules: &RuleSet, ctx: &MatchContext<'_>) -> Option<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut lines: Vec<String> = Vec::new();

    for rule in rules.iter().filter(|r| r.is_match(text)) {
        debug!(
            pattern = %rule.pattern(),
            tag = ?rule.rule.tag,
            priority = rule.rule.priority,
            "Comment matched rule"
        );
        if rule.rule.response.is_empty() {
            continue;
        }
        let rendered = render(&rule.rule.response, ctx);
        if seen.insert(rendered.clone()) {
            lines.push(rendered);
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Substitute the `{name}` placeholder.
pub fn render(template: &str, ctx: &MatchContext<'_>) -> String {
    template.replace("{name}", ctx.name)
}
