//! Reconciliation of an editor's intended diff against the live tag set.
//!
//! The caller fresh-reads the post's persisted tags immediately before
//! calling in, so a concurrent editor's independent changes survive: we
//! apply only the intent (`added`/`removed`) on top of whatever is live,
//! never the editor's stale full set.

use std::collections::BTreeSet;

use super::diff::TagDiff;

/// What a merge resolved to: the canonical final set plus the deltas
/// against the live set that the store must apply to registry counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Sorted, deduplicated final tag list.
    pub final_tags: Vec<String>,
    /// Tags entering the set relative to live.
    pub added: Vec<String>,
    /// Tags leaving the set relative to live.
    pub removed: Vec<String>,
}

impl MergeOutcome {
    /// Canonical space-joined rendering, suitable for `Post::tag_string`.
    pub fn tag_string(&self) -> String {
        self.final_tags.join(" ")
    }
}

/// `final = (live − intent.removed) ∪ intent.added`.
///
/// The union is applied after the difference, so when one editor removes
/// a tag and another re-adds it, the add wins and both converge on the
/// same final set regardless of commit order.
pub fn merge(live: &[String], intent: &TagDiff) -> MergeOutcome {
    let live_set: BTreeSet<String> = live.iter().cloned().collect();
    let mut final_set: BTreeSet<String> = live_set
        .iter()
        .filter(|tag| !intent.removed.contains(*tag))
        .cloned()
        .collect();
    final_set.extend(intent.added.iter().cloned());

    let added = final_set.difference(&live_set).cloned().collect();
    let removed = live_set.difference(&final_set).cloned().collect();

    MergeOutcome {
        final_tags: final_set.into_iter().collect(),
        added,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::super::diff::diff;
    use super::*;

    fn tags(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn applies_intent_on_top_of_live() {
        // Editor saw "aaa bbb", wants "aaa ccc"; meanwhile someone added "ddd".
        let intent = diff(&tags("aaa bbb"), &tags("aaa ccc"));
        let outcome = merge(&tags("aaa bbb ddd"), &intent);
        assert_eq!(outcome.final_tags, tags("aaa ccc ddd"));
        assert_eq!(outcome.added, tags("ccc"));
        assert_eq!(outcome.removed, tags("bbb"));
    }

    #[test]
    fn independent_edits_commute() {
        let baseline = tags("aaa bbb ccc");
        let e1 = diff(&baseline, &tags("aaa bbb ccc ddd")); // adds ddd
        let e2 = diff(&baseline, &tags("aaa bbb eee")); // removes ccc, adds eee

        let one_then_two = merge(&merge(&baseline, &e1).final_tags, &e2);
        let two_then_one = merge(&merge(&baseline, &e2).final_tags, &e1);
        assert_eq!(one_then_two.final_tags, two_then_one.final_tags);
        assert_eq!(one_then_two.final_tags, tags("aaa bbb ddd eee"));
    }

    #[test]
    fn add_wins_over_remove_of_the_same_tag() {
        let intent = TagDiff {
            added: tags("aaa").into_iter().collect(),
            removed: tags("aaa").into_iter().collect(),
        };
        let outcome = merge(&tags("aaa bbb"), &intent);
        assert_eq!(outcome.final_tags, tags("aaa bbb"));
        assert!(outcome.added.is_empty());
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn empty_desired_set_removes_everything() {
        let intent = diff(&tags("aaa bbb"), &tags(""));
        let outcome = merge(&tags("aaa bbb"), &intent);
        assert!(outcome.final_tags.is_empty());
        assert_eq!(outcome.removed, tags("aaa bbb"));
    }

    #[test]
    fn final_set_is_sorted() {
        let intent = diff(&tags(""), &tags("zzz mmm aaa"));
        let outcome = merge(&[], &intent);
        assert_eq!(outcome.tag_string(), "aaa mmm zzz");
    }
}
