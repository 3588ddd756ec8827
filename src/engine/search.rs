// src/engine/search.rs
//
// Target-size search: a fixed-budget binary search over encoder quality that
// keeps whichever candidate landed closest to the requested byte size.

use crate::error::SqueezeError;
use std::num::NonZeroU64;
use std::time::Instant;
use tracing::{debug, warn};

type SearchResult<T> = std::result::Result<T, SqueezeError>;

/// Lower bound of the quality window.
pub const SEARCH_LOW: i32 = 30;
/// The upper bound is never below this, even for low base qualities.
pub const SEARCH_HIGH_FLOOR: i32 = 40;
/// Encode attempts per search.
pub const SEARCH_ITERATIONS: u32 = 8;
/// Window step past the probed quality after each attempt.
pub const SEARCH_STEP: i32 = 2;

/// One encode performed during the search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchAttempt {
    pub quality: u8,
    pub size: u64,
}

/// Closest candidate found, with the full attempt log.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub attempts: Vec<SearchAttempt>,
    /// The deadline stopped the search before its iteration budget ran out.
    pub cut_short: bool,
}

struct Candidate {
    bytes: Vec<u8>,
    quality: u8,
    diff: u64,
}

/// Mutable state of one search. Owned by a single job.
struct SearchState {
    low: i32,
    high: i32,
    best: Option<Candidate>,
    iterations_remaining: u32,
}

impl SearchState {
    fn new(base_quality: u8) -> Self {
        Self {
            low: SEARCH_LOW,
            high: (base_quality as i32).max(SEARCH_HIGH_FLOOR),
            best: None,
            iterations_remaining: SEARCH_ITERATIONS,
        }
    }

    /// Midpoint with halves rounded up, clamped to what encoders accept.
    fn probe(&self) -> u8 {
        (self.low + self.high + 1).div_euclid(2).clamp(1, 100) as u8
    }

    fn record(&mut self, quality: u8, bytes: Vec<u8>, target: u64) {
        let len = bytes.len() as u64;
        let diff = len.abs_diff(target);
        // strict: on a tie the earlier candidate stays
        let improves = self.best.as_ref().map_or(true, |best| diff < best.diff);
        if improves {
            self.best = Some(Candidate {
                bytes,
                quality,
                diff,
            });
        }

        let q = quality as i32;
        if len > target {
            self.high = q - SEARCH_STEP;
        } else {
            self.low = q + SEARCH_STEP;
        }
    }
}

/// Search for the quality whose output size is closest to `target`.
///
/// `encode_at` is called once per attempt and its errors propagate unchanged.
/// The deadline is only consulted between attempts, so at least one encode
/// always completes.
pub fn search_target_size<F>(
    base_quality: u8,
    target: NonZeroU64,
    deadline: Option<Instant>,
    mut encode_at: F,
) -> SearchResult<SearchOutcome>
where
    F: FnMut(u8) -> SearchResult<Vec<u8>>,
{
    let target = target.get();
    let mut state = SearchState::new(base_quality);
    let mut attempts = Vec::with_capacity(SEARCH_ITERATIONS as usize);
    let mut cut_short = false;

    while state.iterations_remaining > 0 {
        if !attempts.is_empty() && deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(
                target_bytes = target,
                attempts = attempts.len(),
                "target-size search stopped at deadline"
            );
            cut_short = true;
            break;
        }
        state.iterations_remaining -= 1;

        let quality = state.probe();
        let bytes = encode_at(quality)?;
        let size = bytes.len() as u64;
        attempts.push(SearchAttempt { quality, size });
        state.record(quality, bytes, target);

        debug!(
            quality,
            size,
            diff = size.abs_diff(target),
            low = state.low,
            high = state.high,
            "search iteration"
        );
    }

    let outcome = match state.best {
        Some(best) => SearchOutcome {
            bytes: best.bytes,
            quality: best.quality,
            attempts,
            cut_short,
        },
        // Only reachable with a zero iteration budget
        None => {
            let quality = base_quality.clamp(1, 100);
            let bytes = encode_at(quality)?;
            attempts.push(SearchAttempt {
                quality,
                size: bytes.len() as u64,
            });
            SearchOutcome {
                bytes,
                quality,
                attempts,
                cut_short,
            }
        }
    };

    debug!(
        quality = outcome.quality,
        size = outcome.bytes.len(),
        target_bytes = target,
        attempts = outcome.attempts.len(),
        "search finished"
    );
    Ok(outcome)
}
