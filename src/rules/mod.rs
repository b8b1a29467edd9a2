//! Reply rules: data model, per-post resolution, and comment matching.
//!
//! Flow for one comment:
//! 1. `RuleSource::load()` — snapshot of the pattern store (reloaded on a timer)
//! 2. `RuleSnapshot::resolve()` — global + post-specific rules, merged and ordered
//! 3. `CommentMatcher::match_comment()` — first-match or combine-all reply text

pub mod matcher;
pub mod model;
pub mod resolver;
pub mod sources;

pub use matcher::{CommentMatcher, MatchContext, MatchPolicy};
pub use model::{CompiledRule, ResponsesConfig, Rule, RuleSet};
pub use resolver::{RuleSnapshot, RuleSource};
pub use sources::{ResponsesFileSource, RuleStoreSource};
