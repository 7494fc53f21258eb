use std::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// The single source of randomness for result selection and synthesis.
///
/// Seeded runs are fully reproducible; the default draws from OS entropy.
pub struct SelectionRng {
    seed: Option<u64>,
    inner: Mutex<StdRng>,
}

impl SelectionRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            seed: None,
            inner: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_seed_option(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Uniform index in `0..len`, or `None` when `len` is zero.
    pub fn index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.inner.lock().gen_range(0..len))
    }

    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut *self.inner.lock())
    }

    /// Uniform integer in `low..=high`.
    pub fn between(&self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        self.inner.lock().gen_range(low..=high)
    }

    /// Uniform float in `low..high`, rounded to two decimals.
    pub fn unit_between(&self, low: f64, high: f64) -> f64 {
        if low >= high {
            return low;
        }
        let raw: f64 = self.inner.lock().gen_range(low..high);
        (raw * 100.0).round() / 100.0
    }

    pub fn bytes16(&self) -> [u8; 16] {
        self.inner.lock().r#gen()
    }
}

impl Default for SelectionRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl fmt::Debug for SelectionRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionRng")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}
