use crate::store::{MatchSet, SubjectId};

/// Running fold over a walk's match sets, past to future. Each subject is
/// attributed to the first offset it matched at.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    seen: MatchSet,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `matched - seen`, then adds all of `matched` to `seen`.
    pub fn push(&mut self, matched: &MatchSet) -> MatchSet {
        let fresh: MatchSet = matched.difference(&self.seen).cloned().collect();
        self.seen.extend(matched.iter().cloned());
        fresh
    }

    pub fn has_seen(&self, subject: &SubjectId) -> bool {
        self.seen.contains(subject)
    }

    pub fn seen(&self) -> &MatchSet {
        &self.seen
    }
}

/// Apply [`Deduplicator::push`] across an ordered sequence, keeping each
/// item's key alongside its pruned set.
pub fn dedupe<K>(shifted_matches: impl IntoIterator<Item = (K, MatchSet)>) -> Vec<(K, MatchSet)> {
    let mut dedup = Deduplicator::new();
    shifted_matches
        .into_iter()
        .map(|(key, matched)| {
            let fresh = dedup.push(&matched);
            (key, fresh)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> MatchSet {
        ids.iter().map(|s| SubjectId::from(*s)).collect()
    }

    #[test]
    fn earliest_offset_owns_subject() {
        let out = dedupe(vec![
            (-1, set(&["a", "b"])),
            (0, set(&["b", "c"])),
            (1, set(&["a", "c", "d"])),
        ]);
        assert_eq!(out[0].1, set(&["a", "b"]));
        assert_eq!(out[1].1, set(&["c"]));
        assert_eq!(out[2].1, set(&["d"]));
    }

    #[test]
    fn seen_grows_by_original_set() {
        let mut d = Deduplicator::new();
        d.push(&set(&["a"]));
        let fresh = d.push(&set(&["a", "b"]));
        assert_eq!(fresh, set(&["b"]));
        assert!(d.has_seen(&SubjectId::from("a")));
        assert_eq!(d.seen(), &set(&["a", "b"]));
    }

    #[test]
    fn empty_sets_pass_through() {
        let out = dedupe(vec![(0, MatchSet::new()), (1, set(&["x"]))]);
        assert!(out[0].1.is_empty());
        assert_eq!(out[1].1, set(&["x"]));
    }
}
