//! Session-scoped rule results and acknowledgements.

use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::schema::SecurityConfig;
use crate::security::aggregator::{aggregate_level, has_unprocessed, pending_rule_ids};
use crate::security::types::{RuleResult, SecurityVerdict};

/// Results and processed ids for one approval.
///
/// The verdict is recomputed only when the results or the processed set
/// actually change; each change bumps `revision`.
#[derive(Debug, Clone)]
pub struct SecuritySession {
    id: Uuid,
    true_danger_ids: Vec<String>,
    results: Vec<RuleResult>,
    processed: BTreeSet<String>,
    revision: u64,
    verdict: SecurityVerdict,
}

impl SecuritySession {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            true_danger_ids: config.true_danger_rule_ids.clone(),
            results: Vec::new(),
            processed: BTreeSet::new(),
            revision: 0,
            verdict: SecurityVerdict::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start a new approval: fresh id, no results, nothing processed.
    pub fn reset(&mut self) {
        self.id = Uuid::new_v4();
        self.results.clear();
        self.processed.clear();
        self.changed();
    }

    pub fn set_results(&mut self, results: Vec<RuleResult>) {
        if results == self.results {
            return;
        }
        self.results = results;
        self.changed();
    }

    /// Replace the exception list, e.g. after a config reload.
    pub fn set_true_danger_ids(&mut self, ids: Vec<String>) {
        if ids == self.true_danger_ids {
            return;
        }
        self.true_danger_ids = ids;
        self.changed();
    }

    pub fn results(&self) -> &[RuleResult] {
        &self.results
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    /// "Ignore this rule". Returns false if it was already processed.
    pub fn process_rule(&mut self, id: &str) -> bool {
        if !self.processed.insert(id.to_string()) {
            return false;
        }
        tracing::debug!(session = %self.id, rule = id, "Rule processed");
        self.changed();
        true
    }

    /// "Undo ignore".
    pub fn unprocess_rule(&mut self, id: &str) -> bool {
        if !self.processed.remove(id) {
            return false;
        }
        tracing::debug!(session = %self.id, rule = id, "Rule unprocessed");
        self.changed();
        true
    }

    /// "Ignore all" current results.
    pub fn process_all(&mut self) {
        let before = self.processed.len();
        self.processed.extend(self.results.iter().map(|r| r.id.clone()));
        if self.processed.len() != before {
            self.changed();
        }
    }

    pub fn verdict(&self) -> &SecurityVerdict {
        &self.verdict
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn changed(&mut self) {
        self.revision += 1;
        self.verdict = SecurityVerdict {
            level: aggregate_level(&self.results, &self.processed),
            has_unprocessed: has_unprocessed(&self.results, &self.processed, &self.true_danger_ids),
            pending_rule_ids: pending_rule_ids(&self.results, &self.processed),
            revision: self.revision,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::types::Level;

    #[test]
    fn test_processing_1016_unblocks() {
        let mut session = SecuritySession::new(&SecurityConfig::default());
        session.set_results(vec![RuleResult::new("1016", Level::Danger)]);
        assert!(session.verdict().has_unprocessed);
        assert_eq!(session.verdict().level, Some(Level::Danger));

        assert!(session.process_rule("1016"));
        assert!(!session.verdict().has_unprocessed);
        assert_eq!(session.verdict().level, None);

        assert!(session.unprocess_rule("1016"));
        assert!(session.verdict().has_unprocessed);
    }

    #[test]
    fn test_another_blocker_remains() {
        let mut session = SecuritySession::new(&SecurityConfig::default());
        session.set_results(vec![
            RuleResult::new("1016", Level::Danger),
            RuleResult::new("1090", Level::Forbidden),
        ]);
        session.process_rule("1090");
        assert_eq!(session.verdict().level, Some(Level::Danger));
        assert!(session.verdict().has_unprocessed);

        session.process_all();
        assert!(!session.verdict().has_unprocessed);
    }

    #[test]
    fn test_unchanged_inputs_do_not_recompute() {
        let mut session = SecuritySession::new(&SecurityConfig::default());
        let results = vec![RuleResult::new("1", Level::Warning)];
        session.set_results(results.clone());
        let rev = session.revision();

        session.set_results(results);
        assert!(session.process_rule("1"));
        assert!(!session.process_rule("1"));
        assert_eq!(session.revision(), rev + 1);
        assert_eq!(session.verdict().revision, rev + 1);
    }

    #[test]
    fn test_reset_does_not_leak() {
        let mut session = SecuritySession::new(&SecurityConfig::default());
        let first = session.id();
        session.set_results(vec![RuleResult::new("1", Level::Danger)]);
        session.process_rule("1");

        session.reset();
        assert_ne!(session.id(), first);
        assert!(session.results().is_empty());
        assert!(session.processed().is_empty());
        assert_eq!(session.verdict().level, None);
    }
}
