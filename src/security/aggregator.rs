//! Pure aggregation over rule results and the processed-id set.

use std::collections::BTreeSet;

use crate::security::types::{Level, RuleResult};

fn needs_processing<'a>(
    results: &'a [RuleResult],
    processed: &'a BTreeSet<String>,
) -> impl Iterator<Item = &'a RuleResult> + 'a {
    results
        .iter()
        .filter(move |r| r.enable && r.level.needs_processing() && !processed.contains(&r.id))
}

/// Highest-precedence level among enabled, unprocessed results.
pub fn aggregate_level(results: &[RuleResult], processed: &BTreeSet<String>) -> Option<Level> {
    needs_processing(results, processed).map(|r| r.level).max_by_key(|l| l.precedence())
}

/// Whether confirm is blocked on the user acknowledging results.
///
/// An enabled SAFE result lifts the block, except when one of
/// `true_danger_ids` is unprocessed at DANGER.
pub fn has_unprocessed(results: &[RuleResult], processed: &BTreeSet<String>, true_danger_ids: &[String]) -> bool {
    let mut pending = needs_processing(results, processed).peekable();
    if pending.peek().is_none() {
        return false;
    }

    let true_danger = needs_processing(results, processed)
        .any(|r| r.level == Level::Danger && true_danger_ids.iter().any(|id| id == &r.id));
    if true_danger {
        return true;
    }

    let has_safe = results.iter().any(|r| r.enable && r.level == Level::Safe);
    !has_safe
}

pub fn pending_rule_ids(results: &[RuleResult], processed: &BTreeSet<String>) -> Vec<String> {
    needs_processing(results, processed).map(|r| r.id.clone()).collect()
}
