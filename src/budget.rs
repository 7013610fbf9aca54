//! Detail-level resource budgets
//!
//! Maps the 1–10 detail knob onto learning counts, token ceilings and a
//! verbosity label. Every function here is pure and total: out-of-range
//! detail levels are clamped, never rejected.

use std::time::Duration;

/// Lowest accepted detail level
pub const MIN_DETAIL: u8 = 1;

/// Highest accepted detail level
pub const MAX_DETAIL: u8 = 10;

/// Detail level from which learnings are materialized in the detailed form
pub const DETAILED_LEARNING_THRESHOLD: u8 = 6;

/// Upper bound for a detail-scaled generation timeout
const MAX_GENERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// The three detail bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailBand {
    /// 1–3: many short learnings
    Low,
    /// 4–7
    Medium,
    /// 8–10: few long learnings
    High,
}

impl DetailBand {
    /// Band containing the (clamped) detail level
    pub fn of(detail_level: u8) -> Self {
        match clamp_detail(detail_level) {
            1..=3 => DetailBand::Low,
            4..=7 => DetailBand::Medium,
            _ => DetailBand::High,
        }
    }

    /// Inclusive detail range covered by the band
    pub fn range(&self) -> (u8, u8) {
        match self {
            DetailBand::Low => (1, 3),
            DetailBand::Medium => (4, 7),
            DetailBand::High => (8, 10),
        }
    }
}

/// Floor/ceiling pair per band; values are interpolated across each band
#[derive(Debug, Clone, Copy)]
struct BandCurve {
    low: (u32, u32),
    medium: (u32, u32),
    high: (u32, u32),
}

impl BandCurve {
    fn at(&self, detail_level: u8) -> u32 {
        let level = clamp_detail(detail_level);
        let band = DetailBand::of(level);
        let (floor, ceiling) = match band {
            DetailBand::Low => self.low,
            DetailBand::Medium => self.medium,
            DetailBand::High => self.high,
        };
        let (start, end) = band.range();
        let step = u32::from(level - start);
        let span = u32::from(end - start);
        floor + (ceiling - floor) * step / span
    }
}

const LEARNING_TOKENS: BandCurve = BandCurve {
    low: (150, 350),
    medium: (400, 900),
    high: (1000, 2000),
};

const REPORT_TOKENS: BandCurve = BandCurve {
    low: (1500, 3000),
    medium: (3500, 7000),
    high: (8000, 16000),
};

/// How many learnings a band asks for, bounded by the branch's breadth
#[derive(Debug, Clone, Copy)]
struct CountPolicy {
    target: usize,
    min: usize,
    max: usize,
    breadth_offset: isize,
}

impl CountPolicy {
    fn for_band(band: DetailBand) -> Self {
        match band {
            DetailBand::Low => CountPolicy { target: 6, min: 3, max: 8, breadth_offset: 2 },
            DetailBand::Medium => CountPolicy { target: 4, min: 2, max: 6, breadth_offset: 1 },
            DetailBand::High => CountPolicy { target: 3, min: 2, max: 4, breadth_offset: -1 },
        }
    }

    fn count(&self, breadth: usize) -> usize {
        let by_breadth = (breadth as isize + self.breadth_offset).max(0) as usize;
        let upper = self.max.min(by_breadth).max(self.min);
        self.target.clamp(self.min, upper)
    }
}

/// Everything the extractor and report writer need from one detail level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Budget {
    pub detail_level: u8,
    pub band: DetailBand,
    pub learning_count: usize,
    pub learning_tokens: u32,
    pub report_tokens: u32,
    pub verbosity: &'static str,
}

impl Budget {
    pub fn new(detail_level: u8, breadth: usize) -> Self {
        let detail_level = clamp_detail(detail_level);
        Self {
            detail_level,
            band: DetailBand::of(detail_level),
            learning_count: learning_count(detail_level, breadth),
            learning_tokens: learning_token_ceiling(detail_level),
            report_tokens: report_token_ceiling(detail_level),
            verbosity: verbosity_label(detail_level),
        }
    }

    /// Whether learnings at this level use the titled, multi-section form
    pub fn detailed_learnings(&self) -> bool {
        self.detail_level >= DETAILED_LEARNING_THRESHOLD
    }

    /// Token ceiling for one extraction call covering every learning
    pub fn extraction_tokens(&self) -> u32 {
        self.learning_tokens * self.learning_count as u32
    }
}

pub fn clamp_detail(detail_level: u8) -> u8 {
    detail_level.clamp(MIN_DETAIL, MAX_DETAIL)
}

/// Number of learnings to request from one branch
pub fn learning_count(detail_level: u8, breadth: usize) -> usize {
    CountPolicy::for_band(DetailBand::of(detail_level)).count(breadth)
}

/// Token ceiling for a single learning
pub fn learning_token_ceiling(detail_level: u8) -> u32 {
    LEARNING_TOKENS.at(detail_level)
}

/// Token ceiling for the final report
pub fn report_token_ceiling(detail_level: u8) -> u32 {
    REPORT_TOKENS.at(detail_level)
}

/// Word-count band the report prompt asks for
pub fn report_word_target(detail_level: u8) -> (u32, u32) {
    let tokens = report_token_ceiling(detail_level);
    (tokens * 2 / 5, tokens * 3 / 5)
}

pub fn verbosity_label(detail_level: u8) -> &'static str {
    match clamp_detail(detail_level) {
        1 => "very concise",
        2 | 3 => "concise",
        4 | 5 => "moderately detailed",
        6 | 7 => "detailed",
        8 | 9 => "highly detailed",
        _ => "exhaustive",
    }
}

/// Breadth of the next recursion level: `ceil(breadth * 0.75)`, never below 1
pub fn child_breadth(breadth: usize) -> usize {
    (breadth * 3).div_ceil(4).max(1)
}

/// Generation timeout grows with detail: `base * (1 + detail / 5)`, capped
pub fn generation_timeout(base: Duration, detail_level: u8) -> Duration {
    let level = u32::from(clamp_detail(detail_level));
    let scaled = base.saturating_add(base.saturating_mul(level) / 5);
    scaled.min(MAX_GENERATION_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(DetailBand::of(1), DetailBand::Low);
        assert_eq!(DetailBand::of(3), DetailBand::Low);
        assert_eq!(DetailBand::of(4), DetailBand::Medium);
        assert_eq!(DetailBand::of(7), DetailBand::Medium);
        assert_eq!(DetailBand::of(8), DetailBand::High);
        assert_eq!(DetailBand::of(10), DetailBand::High);
    }

    #[test]
    fn test_out_of_range_detail_is_clamped() {
        assert_eq!(DetailBand::of(0), DetailBand::Low);
        assert_eq!(DetailBand::of(42), DetailBand::High);
        assert_eq!(learning_token_ceiling(0), learning_token_ceiling(1));
        assert_eq!(report_token_ceiling(200), report_token_ceiling(10));
    }

    #[test]
    fn test_token_ceilings_interpolate_within_bands() {
        assert_eq!(learning_token_ceiling(1), 150);
        assert_eq!(learning_token_ceiling(2), 250);
        assert_eq!(learning_token_ceiling(3), 350);
        assert_eq!(learning_token_ceiling(4), 400);
        assert_eq!(learning_token_ceiling(7), 900);
        assert_eq!(learning_token_ceiling(8), 1000);
        assert_eq!(learning_token_ceiling(10), 2000);

        assert_eq!(report_token_ceiling(1), 1500);
        assert_eq!(report_token_ceiling(10), 16000);
    }

    #[test]
    fn test_token_ceilings_non_decreasing() {
        for level in MIN_DETAIL..MAX_DETAIL {
            assert!(learning_token_ceiling(level + 1) >= learning_token_ceiling(level));
            assert!(report_token_ceiling(level + 1) >= report_token_ceiling(level));
        }
    }

    #[test]
    fn test_report_ceiling_exceeds_learning_ceiling() {
        for level in MIN_DETAIL..=MAX_DETAIL {
            assert!(report_token_ceiling(level) > learning_token_ceiling(level));
        }
    }

    #[test]
    fn test_learning_count_shrinks_with_detail() {
        for breadth in 1..=10 {
            assert!(learning_count(10, breadth) <= learning_count(1, breadth));
        }
        assert_eq!(learning_count(1, 4), 6);
        assert_eq!(learning_count(5, 4), 4);
        assert_eq!(learning_count(9, 4), 3);
    }

    #[test]
    fn test_learning_count_respects_band_bounds() {
        for level in MIN_DETAIL..=MAX_DETAIL {
            let policy = CountPolicy::for_band(DetailBand::of(level));
            for breadth in 0..=20 {
                let count = learning_count(level, breadth);
                assert!(count >= policy.min, "level {level} breadth {breadth}");
                assert!(count <= policy.max, "level {level} breadth {breadth}");
            }
        }
    }

    #[test]
    fn test_learning_count_bounded_by_breadth() {
        // breadth 1 in the low band allows 1 + 2 = 3 learnings
        assert_eq!(learning_count(2, 1), 3);
        // breadth 2 in the high band sits at the band minimum
        assert_eq!(learning_count(9, 2), 2);
    }

    #[test]
    fn test_child_breadth() {
        assert_eq!(child_breadth(4), 3);
        assert_eq!(child_breadth(3), 3);
        assert_eq!(child_breadth(2), 2);
        assert_eq!(child_breadth(5), 4);
        assert_eq!(child_breadth(1), 1);
        assert_eq!(child_breadth(0), 1);

        for breadth in 1..=100 {
            let child = child_breadth(breadth);
            assert!(child >= 1);
            assert!(child <= breadth);
        }
    }

    #[test]
    fn test_verbosity_labels() {
        assert_eq!(verbosity_label(1), "very concise");
        assert_eq!(verbosity_label(5), "moderately detailed");
        assert_eq!(verbosity_label(10), "exhaustive");
    }

    #[test]
    fn test_budget_detailed_threshold() {
        assert!(!Budget::new(5, 4).detailed_learnings());
        assert!(Budget::new(6, 4).detailed_learnings());
        assert_eq!(Budget::new(9, 4).band, DetailBand::High);
    }

    #[test]
    fn test_generation_timeout_scales_and_caps() {
        let base = Duration::from_secs(60);
        assert_eq!(generation_timeout(base, 5), Duration::from_secs(120));
        assert!(generation_timeout(base, 10) > generation_timeout(base, 1));
        assert_eq!(
            generation_timeout(Duration::from_secs(500), 10),
            MAX_GENERATION_TIMEOUT
        );
    }

    #[test]
    fn test_generation_timeout_huge_base_saturates() {
        assert_eq!(generation_timeout(Duration::MAX, 10), MAX_GENERATION_TIMEOUT);
        assert_eq!(
            generation_timeout(Duration::from_secs(u64::MAX / 2), 7),
            MAX_GENERATION_TIMEOUT
        );
    }

    #[test]
    fn test_report_word_target_ordered() {
        for level in MIN_DETAIL..=MAX_DETAIL {
            let (min, max) = report_word_target(level);
            assert!(min < max);
        }
    }
}
