//! Block discovery: when the next block is found and by whom.
//!
//! Time is discretized into ticks (`time_precision` per second). With a mean
//! block interval of `d` ticks, each tick finds a block with probability
//! `1/d`, so the gap to the next block is geometric. It is drawn by inverse
//! CDF:
//!
//! ```text
//!   fk = ln(u) / ln(1 - 1/d),   k = ceil(fk),   residual = k - fk
//! ```
//!
//! Draws above `3·ceil(d)` ticks are cut: the threshold is consumed and the
//! draw repeated. The distribution is memoryless, so this only bounds the
//! size of any single step. The residual of the final draw becomes the
//! block's tie-break value.

use crate::SimError;
use pivotsim_types::NodeIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Cumulative hash-power table for picking the miner of each block.
#[derive(Debug, Clone)]
pub struct MinerTable {
    cumulative: Vec<f64>,
}

impl MinerTable {
    pub fn new(weights: &[f64]) -> Result<Self, SimError> {
        if weights.is_empty() {
            return Err(SimError::NoMiners);
        }
        let total: f64 = weights.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(SimError::ZeroTotalWeight);
        }
        let mut running = 0.0;
        let cumulative = weights
            .iter()
            .map(|w| {
                running += w / total;
                running
            })
            .collect();
        Ok(Self { cumulative })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Normalized hash power of `node`.
    pub fn share(&self, node: NodeIndex) -> f64 {
        let i = node as usize;
        match i {
            0 => self.cumulative[0],
            _ => self.cumulative[i] - self.cumulative[i - 1],
        }
    }

    /// Draw a miner with probability proportional to its weight.
    pub fn pick(&self, rng: &mut ChaCha8Rng) -> NodeIndex {
        let u: f64 = rng.gen();
        let i = self.cumulative.partition_point(|&c| c <= u);
        // Rounding can leave the last entry a hair below 1.
        i.min(self.cumulative.len() - 1) as NodeIndex
    }
}

/// Geometric gap sampler on the tick grid.
#[derive(Debug, Clone)]
pub struct MiningClock {
    difficulty: f64,
    threshold: u64,
    precision: f64,
}

impl MiningClock {
    pub fn new(block_interval_secs: f64, time_precision: f64) -> Self {
        let difficulty = block_interval_secs * time_precision;
        Self {
            difficulty,
            threshold: 3 * difficulty.ceil() as u64,
            precision: time_precision,
        }
    }

    /// Mean gap in ticks.
    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Ticks until the next block, and the residual of the final draw.
    pub fn sample_gap(&self, rng: &mut ChaCha8Rng) -> (u64, f64) {
        let log_miss = (1.0 - 1.0 / self.difficulty).ln();
        let mut elapsed = 0;
        loop {
            // In (0, 1], so ln(u) is finite.
            let u = 1.0 - rng.gen::<f64>();
            let fk = u.ln() / log_miss;
            let k = fk.ceil();
            if k > self.threshold as f64 {
                elapsed += self.threshold;
                continue;
            }
            return (elapsed + k as u64, k - fk);
        }
    }

    /// Simulated time of an absolute tick count.
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::from_secs_f64(ticks as f64 / self.precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_gap_mean_matches_interval() {
        let clock = MiningClock::new(1.0, 100.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let samples = 20_000;
        let mut total = 0u64;
        for _ in 0..samples {
            let (gap, residual) = clock.sample_gap(&mut rng);
            assert!((0.0..1.0).contains(&residual), "residual {residual}");
            total += gap;
        }
        let mean = total as f64 / samples as f64;
        assert!((mean - 100.0).abs() < 3.0, "mean gap {mean}");
    }

    #[test]
    fn test_long_gaps_cross_the_threshold() {
        let clock = MiningClock::new(1.0, 10.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let longest = (0..5_000)
            .map(|_| clock.sample_gap(&mut rng).0)
            .max()
            .unwrap();
        assert!(longest > clock.threshold, "longest gap {longest}");
    }

    #[test]
    fn test_ticks_convert_to_seconds() {
        let clock = MiningClock::new(5.0, 1e5);
        assert_eq!(clock.ticks_to_duration(250_000), Duration::from_millis(2500));
    }

    #[test]
    fn test_miner_table_follows_weights() {
        let table = MinerTable::new(&[1.0, 3.0]).unwrap();
        assert!((table.share(0) - 0.25).abs() < 1e-12);
        assert!((table.share(1) - 0.75).abs() < 1e-12);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let draws = 40_000;
        let ones = (0..draws).filter(|_| table.pick(&mut rng) == 1).count();
        let frac = ones as f64 / draws as f64;
        assert!((frac - 0.75).abs() < 0.01, "fraction {frac}");
    }

    #[test]
    fn test_zero_weight_miner_is_never_picked() {
        let table = MinerTable::new(&[0.0, 1.0, 0.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!((0..1_000).all(|_| table.pick(&mut rng) == 1));
    }

    #[test]
    fn test_miner_table_rejects_empty_weights() {
        assert_eq!(MinerTable::new(&[]).unwrap_err(), SimError::NoMiners);
        assert_eq!(MinerTable::new(&[0.0]).unwrap_err(), SimError::ZeroTotalWeight);
    }
}
