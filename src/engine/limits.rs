// src/engine/limits.rs
//
// Per-job resource limits: input size, decoded pixel count and a wall-clock
// budget that becomes the target-size search deadline.

use crate::error::SqueezeError;
use std::time::{Duration, Instant};

const STRICT_MAX_PIXELS: u64 = 40_000_000; // ~8K x 5K
const LENIENT_MAX_PIXELS: u64 = 75_000_000; // generous but below global MAX_PIXELS
const STRICT_MAX_BYTES: u64 = 32 * 1024 * 1024;
const LENIENT_MAX_BYTES: u64 = 48 * 1024 * 1024;
const STRICT_TIMEOUT_MS: u64 = 5_000;
const LENIENT_TIMEOUT_MS: u64 = 30_000; // AVIF searches on large inputs need the headroom

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitPolicy {
    Disabled,
    Strict,
    Lenient,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobLimits {
    pub policy: LimitPolicy,
    pub max_pixels: Option<u64>,
    pub max_bytes: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self::disabled()
    }
}

impl JobLimits {
    pub fn disabled() -> Self {
        Self {
            policy: LimitPolicy::Disabled,
            max_pixels: None,
            max_bytes: None,
            timeout_ms: None,
        }
    }

    pub fn strict() -> Self {
        Self {
            policy: LimitPolicy::Strict,
            max_pixels: Some(STRICT_MAX_PIXELS),
            max_bytes: Some(STRICT_MAX_BYTES),
            timeout_ms: Some(STRICT_TIMEOUT_MS),
        }
    }

    pub fn lenient() -> Self {
        Self {
            policy: LimitPolicy::Lenient,
            max_pixels: Some(LENIENT_MAX_PIXELS),
            max_bytes: Some(LENIENT_MAX_BYTES),
            timeout_ms: Some(LENIENT_TIMEOUT_MS),
        }
    }

    /// Start from no limits and set only what the caller needs.
    pub fn custom() -> Self {
        Self {
            policy: LimitPolicy::Custom,
            ..Self::disabled()
        }
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = Some(max_pixels);
        self.enable();
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self.enable();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self.enable();
        self
    }

    /// Setting any cap on a disabled policy turns it into a custom one.
    fn enable(&mut self) {
        if self.policy == LimitPolicy::Disabled {
            self.policy = LimitPolicy::Custom;
        }
    }

    fn enabled(&self) -> bool {
        self.policy != LimitPolicy::Disabled
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<(), SqueezeError> {
        if !self.enabled() {
            return Ok(());
        }
        if let Some(limit) = self.max_bytes {
            let len_u64 = len as u64;
            if len_u64 > limit {
                return Err(SqueezeError::limit_exceeded(format!(
                    "input size {len_u64} bytes exceeds limit of {limit} bytes"
                )));
            }
        }
        Ok(())
    }

    pub fn enforce_pixels(&self, width: u32, height: u32) -> Result<(), SqueezeError> {
        if !self.enabled() {
            return Ok(());
        }
        if let Some(limit) = self.max_pixels {
            let pixels = width as u64 * height as u64;
            if pixels > limit {
                return Err(SqueezeError::limit_exceeded(format!(
                    "{width}x{height} ({pixels} pixels) exceeds limit of {limit} pixels"
                )));
            }
        }
        Ok(())
    }

    /// Deadline for a job that started at `started_at`, if a timeout is configured.
    pub fn deadline_from(&self, started_at: Instant) -> Option<Instant> {
        if !self.enabled() {
            return None;
        }
        self.timeout_ms
            .map(|ms| started_at + Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_disabled_allows_everything() {
        let limits = JobLimits::disabled();
        assert!(limits.enforce_source_len(usize::MAX).is_ok());
        assert!(limits.enforce_pixels(u32::MAX, u32::MAX).is_ok());
        assert_eq!(limits.deadline_from(Instant::now()), None);
    }

    #[test]
    fn test_strict_rejects_large_input() {
        let limits = JobLimits::strict();
        let err = limits
            .enforce_source_len((STRICT_MAX_BYTES + 1) as usize)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ResourceLimit);
        assert!(limits.enforce_pixels(8000, 6000).is_err());
        assert!(limits.enforce_pixels(4000, 3000).is_ok());
    }

    #[test]
    fn test_builders_enable_disabled_limits() {
        let start = Instant::now();
        let limits = JobLimits::default().with_timeout_ms(500);
        assert_eq!(limits.policy, LimitPolicy::Custom);
        assert_eq!(
            limits.deadline_from(start),
            Some(start + Duration::from_millis(500))
        );

        let limits = JobLimits::disabled().with_max_bytes(10).with_max_pixels(100);
        assert!(limits.enforce_source_len(11).is_err());
        assert!(limits.enforce_pixels(20, 20).is_err());

        let strict = JobLimits::strict().with_timeout_ms(10);
        assert_eq!(strict.policy, LimitPolicy::Strict);
    }

    #[test]
    fn test_custom_timeout_sets_deadline() {
        let start = Instant::now();
        let limits = JobLimits::custom().with_timeout_ms(250);
        assert_eq!(
            limits.deadline_from(start),
            Some(start + Duration::from_millis(250))
        );
        assert!(limits.enforce_source_len(1 << 30).is_ok());
    }
}
