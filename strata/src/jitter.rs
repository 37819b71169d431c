use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Error, Result, TtlMs};
use std::time::Duration;

/// Source of uniformly distributed integers, shared by all engines of a registry.
pub trait RandomSource: Send + Sync + 'static {
    /// Uniform integer in `[low, high]`, both ends inclusive.
    fn between(&self, low: u64, high: u64) -> u64;
}

/// Mutex-guarded `StdRng`, safe to call from any number of tasks
pub struct SharedRng {
    rng: Mutex<StdRng>,
}

impl SharedRng {
    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequence, for tests and reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

impl RandomSource for SharedRng {
    fn between(&self, low: u64, high: u64) -> u64 {
        self.rng.lock().random_range(low..=high)
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRng").finish_non_exhaustive()
    }
}

const OFFSET_SCALE: u128 = 1_000_000;

/// Bounds for randomized remote TTLs: `[base * (1 - offset), base * (1 + offset)]`.
///
/// Spreading expirations keeps keys written together from expiring together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryWindow {
    base_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl ExpiryWindow {
    pub fn new(base: Duration, offset: f64) -> Result<Self> {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        if base_ms == 0 {
            return Err(Error::Config(
                "remote expiration must be at least one millisecond".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&offset) {
            return Err(Error::Config(format!(
                "expire offset must be in [0, 1), got {offset}"
            )));
        }

        // Whole milliseconds inside the real-valued window. The
        // offset is truncated to millionths so the bounds never move outward.
        let offset_ppm = (offset * OFFSET_SCALE as f64).floor() as u128;
        let base = u128::from(base_ms);
        let min_ms = (base * (OFFSET_SCALE - offset_ppm)).div_ceil(OFFSET_SCALE);
        let max_ms = base * (OFFSET_SCALE + offset_ppm) / OFFSET_SCALE;

        Ok(Self {
            base_ms,
            min_ms: u64::try_from(min_ms).unwrap_or(base_ms).max(1),
            max_ms: u64::try_from(max_ms).unwrap_or(u64::MAX),
        })
    }

    pub fn base_ms(&self) -> u64 {
        self.base_ms
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    pub fn contains(&self, ttl: TtlMs) -> bool {
        (self.min_ms..=self.max_ms).contains(&ttl.0)
    }

    pub fn draw(&self, random: &dyn RandomSource) -> TtlMs {
        TtlMs(random.between(self.min_ms, self.max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_minutes_with_twenty_percent() {
        let window = ExpiryWindow::new(Duration::from_secs(600), 0.2).unwrap();
        assert_eq!(window.base_ms(), 600_000);
        assert_eq!(window.min_ms(), 480_000);
        assert_eq!(window.max_ms(), 720_000);
    }

    #[test]
    fn test_draws_stay_in_bounds() {
        let window = ExpiryWindow::new(Duration::from_millis(1000), 0.5).unwrap();
        let rng = SharedRng::seeded(7);
        for _ in 0..10_000 {
            let ttl = window.draw(&rng);
            assert!(window.contains(ttl), "{ttl:?} outside {window:?}");
        }
    }

    #[test]
    fn test_fractional_bounds_round_inward() {
        // real window is [1.5, 4.5]
        let window = ExpiryWindow::new(Duration::from_millis(3), 0.5).unwrap();
        assert_eq!((window.min_ms(), window.max_ms()), (2, 4));

        let rng = SharedRng::seeded(11);
        for _ in 0..1_000 {
            let ttl = window.draw(&rng).0 as f64;
            assert!((1.5..=4.5).contains(&ttl));
        }

        // real window is [0.7, 1.3]
        let window = ExpiryWindow::new(Duration::from_millis(1), 0.3).unwrap();
        assert_eq!((window.min_ms(), window.max_ms()), (1, 1));
    }

    #[test]
    fn test_zero_offset_is_fixed() {
        let window = ExpiryWindow::new(Duration::from_millis(250), 0.0).unwrap();
        let rng = SharedRng::seeded(1);
        assert_eq!(window.draw(&rng), TtlMs(250));
    }

    #[test]
    fn test_zero_expiration_is_rejected() {
        let result = ExpiryWindow::new(Duration::ZERO, 0.2);
        assert!(matches!(result, Err(Error::Config(_))));

        let result = ExpiryWindow::new(Duration::from_micros(900), 0.2);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_offset_out_of_range_is_rejected() {
        assert!(ExpiryWindow::new(Duration::from_secs(1), 1.0).is_err());
        assert!(ExpiryWindow::new(Duration::from_secs(1), -0.1).is_err());
        assert!(ExpiryWindow::new(Duration::from_secs(1), f64::NAN).is_err());
    }

    #[test]
    fn test_shared_rng_across_threads() {
        let rng = std::sync::Arc::new(SharedRng::seeded(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rng = rng.clone();
                std::thread::spawn(move || {
                    (0..1000).all(|_| (10..=20).contains(&rng.between(10, 20)))
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
