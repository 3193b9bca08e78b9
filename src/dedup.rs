//! Time-windowed near-duplicate suppression over canonical plate text.
//!
//! A plate in view is recognized on many consecutive frames, often with one
//! character misread. `DuplicateFilter` remembers when each canonical text was
//! last admitted and suppresses exact or near matches inside the window.
//!
//! The filter is owned by a single session loop and is not `Sync`-shared;
//! concurrent sessions each own their own instance.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::plate::EMPTY_SENTINEL;

pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Outcome of one `observe` call.
#[derive(Clone, Debug, PartialEq)]
pub enum DedupDecision {
    /// Novel text. Recorded as last seen `now`.
    Admitted,
    /// Seen too recently, either exactly or within the similarity threshold.
    Suppressed(DuplicateMatch),
    /// Empty or sentinel text. Never suppressed, never recorded.
    Untracked,
}

impl DedupDecision {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, DedupDecision::Suppressed(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateMatch {
    /// Tracked text that caused the suppression.
    pub matched: String,
    /// 1.0 for exact matches.
    pub similarity: f64,
    pub age: Duration,
}

/// Read-only counters exposed for status lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub tracked: usize,
    pub suppressed_total: u64,
}

#[derive(Debug)]
pub struct DuplicateFilter {
    last_seen: HashMap<String, Instant>,
    time_window: Duration,
    similarity_threshold: f64,
    suppressed_total: u64,
}

impl DuplicateFilter {
    pub fn new(time_window: Duration, similarity_threshold: f64) -> Self {
        Self {
            last_seen: HashMap::new(),
            time_window,
            similarity_threshold,
            suppressed_total: 0,
        }
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Decide whether `canonical` seen at `now` is a repeat.
    ///
    /// Every call first evicts entries older than twice the window, so the
    /// tracked set stays bounded by arrival rate times window without a timer.
    pub fn observe(&mut self, canonical: &str, now: Instant) -> DedupDecision {
        self.evict_stale(now);

        if canonical.is_empty() || canonical == EMPTY_SENTINEL {
            return DedupDecision::Untracked;
        }

        if let Some(&seen) = self.last_seen.get(canonical) {
            let age = now.saturating_duration_since(seen);
            if age < self.time_window {
                self.suppressed_total += 1;
                return DedupDecision::Suppressed(DuplicateMatch {
                    matched: canonical.to_string(),
                    similarity: 1.0,
                    age,
                });
            }
        }

        let near = self
            .last_seen
            .iter()
            .filter_map(|(text, &seen)| {
                let age = now.saturating_duration_since(seen);
                (age < self.time_window).then(|| (text, age, similarity(canonical, text)))
            })
            .find(|(_, _, score)| *score > self.similarity_threshold);
        if let Some((text, age, score)) = near {
            let found = DuplicateMatch {
                matched: text.clone(),
                similarity: score,
                age,
            };
            self.suppressed_total += 1;
            return DedupDecision::Suppressed(found);
        }

        self.last_seen.insert(canonical.to_string(), now);
        DedupDecision::Admitted
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            tracked: self.last_seen.len(),
            suppressed_total: self.suppressed_total,
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        let grace = self.time_window.saturating_mul(2);
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= grace);
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_WINDOW, DEFAULT_SIMILARITY_THRESHOLD)
    }
}

/// Positional similarity: equal characters at equal index over the longer length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let same = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    same as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> (DuplicateFilter, Instant) {
        (DuplicateFilter::new(Duration::from_secs(30), 0.8), Instant::now())
    }

    #[test]
    fn exact_repeat_inside_window_is_suppressed() {
        let (mut dedup, t0) = filter();
        assert_eq!(dedup.observe("30A12345", t0), DedupDecision::Admitted);
        let second = dedup.observe("30A12345", t0 + Duration::from_secs(5));
        assert!(second.is_suppressed());
    }

    #[test]
    fn repeat_after_window_is_admitted() {
        let (mut dedup, t0) = filter();
        dedup.observe("30A12345", t0);
        let later = dedup.observe("30A12345", t0 + Duration::from_secs(31));
        assert_eq!(later, DedupDecision::Admitted);
    }

    #[test]
    fn one_char_off_in_seven_is_a_duplicate() {
        let (mut dedup, t0) = filter();
        dedup.observe("29C1234", t0);
        match dedup.observe("29C1235", t0 + Duration::from_secs(1)) {
            DedupDecision::Suppressed(m) => {
                assert_eq!(m.matched, "29C1234");
                assert!((m.similarity - 6.0 / 7.0).abs() < 1e-9);
            }
            other => panic!("expected suppression, got {:?}", other),
        }
    }

    #[test]
    fn two_chars_off_in_seven_is_novel() {
        let (mut dedup, t0) = filter();
        dedup.observe("29C1234", t0);
        let decision = dedup.observe("29C1256", t0 + Duration::from_secs(1));
        assert_eq!(decision, DedupDecision::Admitted);
        assert_eq!(dedup.stats().tracked, 2);
    }

    #[test]
    fn length_difference_lowers_similarity() {
        assert!((similarity("30A12345", "30A1234") - 7.0 / 8.0).abs() < 1e-9);
        assert_eq!(similarity("ABC", ""), 0.0);
    }

    #[test]
    fn empty_and_sentinel_are_untracked() {
        let (mut dedup, t0) = filter();
        for _ in 0..3 {
            assert_eq!(dedup.observe("", t0), DedupDecision::Untracked);
            assert_eq!(dedup.observe(EMPTY_SENTINEL, t0), DedupDecision::Untracked);
        }
        assert_eq!(dedup.stats(), DedupStats::default());
    }

    #[test]
    fn stale_entries_are_evicted_on_next_call() {
        let (mut dedup, t0) = filter();
        dedup.observe("30A12345", t0);
        dedup.observe("51G67890", t0 + Duration::from_secs(50));
        assert_eq!(dedup.stats().tracked, 2);

        dedup.observe("", t0 + Duration::from_secs(61));
        let stats = dedup.stats();
        assert_eq!(stats.tracked, 1);
    }

    #[test]
    fn fuzzy_scan_ignores_entries_outside_window() {
        let (mut dedup, t0) = filter();
        dedup.observe("29C1234", t0);
        let decision = dedup.observe("29C1235", t0 + Duration::from_secs(45));
        assert_eq!(decision, DedupDecision::Admitted);
    }

    #[test]
    fn suppression_does_not_refresh_last_seen() {
        let (mut dedup, t0) = filter();
        dedup.observe("30A12345", t0);
        assert!(dedup
            .observe("30A12345", t0 + Duration::from_secs(20))
            .is_suppressed());
        assert_eq!(
            dedup.observe("30A12345", t0 + Duration::from_secs(35)),
            DedupDecision::Admitted
        );
        assert_eq!(dedup.stats().suppressed_total, 1);
    }
}
