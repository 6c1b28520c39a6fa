//! Seeded radio impairment: frame loss, bit corruption, duplication and
//! inter-frame noise, applied to each unit the sender hands the channel.

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;

/// Impairment parameters for one direction of a simulated radio.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpairmentConfig {
    /// Chance a frame is lost entirely.
    pub loss_percent: f32,
    /// Chance a frame has one to three bits flipped.
    pub corrupt_percent: f32,
    /// Chance a frame is received twice.
    pub duplicate_percent: f32,
    /// Chance random bytes precede a frame.
    pub noise_percent: f32,
    pub max_noise_bytes: usize,
    /// Upper bound on bytes returned by one receive; 0 means unbounded.
    pub max_chunk: usize,
    pub seed: u64,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        Self::clean()
    }
}

impl ImpairmentConfig {
    /// A perfect channel.
    pub fn clean() -> Self {
        Self {
            loss_percent: 0.0,
            corrupt_percent: 0.0,
            duplicate_percent: 0.0,
            noise_percent: 0.0,
            max_noise_bytes: 0,
            max_chunk: 0,
            seed: 0,
        }
    }

    /// A moderately hostile channel exercising every impairment.
    pub fn noisy(seed: u64) -> Self {
        Self {
            loss_percent: 8.0,
            corrupt_percent: 8.0,
            duplicate_percent: 4.0,
            noise_percent: 20.0,
            max_noise_bytes: 40,
            max_chunk: 64,
            seed,
        }
    }
}

/// What the impairment did so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpairmentStats {
    pub frames: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub noise_bytes: u64,
}

/// Deterministic impairment engine for one direction.
#[derive(Debug)]
pub struct Impairment {
    cfg: ImpairmentConfig,
    rng: StdRng,
    stats: ImpairmentStats,
}

impl Impairment {
    pub fn new(cfg: ImpairmentConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng,
            stats: ImpairmentStats::default(),
        }
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.cfg
    }

    pub fn stats(&self) -> ImpairmentStats {
        self.stats
    }

    fn chance(&mut self, percent: f32) -> bool {
        percent > 0.0 && self.rng.random::<f64>() * 100.0 < f64::from(percent)
    }

    /// Uniform in `1..=max`.
    fn up_to(&mut self, max: usize) -> usize {
        1 + (self.rng.random::<u32>() as usize) % max.max(1)
    }

    /// Bytes the receiver will see for one transmitted frame (possibly none).
    pub fn apply(&mut self, frame: &[u8]) -> Vec<u8> {
        self.stats.frames += 1;
        let mut out = Vec::with_capacity(frame.len() * 2);

        if self.cfg.max_noise_bytes > 0 && self.chance(self.cfg.noise_percent) {
            let n = self.up_to(self.cfg.max_noise_bytes);
            out.extend((0..n).map(|_| self.rng.random::<u8>()));
            self.stats.noise_bytes += n as u64;
        }

        if self.chance(self.cfg.loss_percent) {
            self.stats.dropped += 1;
            tracing::trace!(len = frame.len(), "impairment: frame lost");
            return out;
        }

        let start = out.len();
        out.extend_from_slice(frame);
        if !frame.is_empty() && self.chance(self.cfg.corrupt_percent) {
            let flips = self.up_to(3);
            let mut bits = Vec::with_capacity(flips);
            while bits.len() < flips {
                let bit = (self.rng.random::<u32>() as usize) % (frame.len() * 8);
                if !bits.contains(&bit) {
                    bits.push(bit);
                }
            }
            for bit in bits {
                out[start + bit / 8] ^= 1 << (bit % 8);
            }
            self.stats.corrupted += 1;
            tracing::trace!(flips, "impairment: frame corrupted");
        }

        if self.chance(self.cfg.duplicate_percent) {
            out.extend_from_slice(frame);
            self.stats.duplicated += 1;
        }
        out
    }

    /// Size of the next receive chunk, bounded by `max_len`.
    pub fn chunk(&mut self, max_len: usize) -> usize {
        if self.cfg.max_chunk == 0 {
            max_len
        } else {
            self.up_to(self.cfg.max_chunk).min(max_len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_channel_is_transparent() {
        let mut imp = Impairment::new(ImpairmentConfig::clean());
        let frame = vec![7u8; 146];
        for _ in 0..100 {
            assert_eq!(imp.apply(&frame), frame);
        }
        assert_eq!(imp.stats().frames, 100);
        assert_eq!(imp.stats().dropped, 0);
        assert_eq!(imp.chunk(146), 146);
    }

    #[test]
    fn same_seed_same_damage() {
        let frame: Vec<u8> = (0..146u8).collect();
        let mut a = Impairment::new(ImpairmentConfig::noisy(42));
        let mut b = Impairment::new(ImpairmentConfig::noisy(42));
        for _ in 0..200 {
            assert_eq!(a.apply(&frame), b.apply(&frame));
        }
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn total_loss_drops_everything() {
        let mut imp = Impairment::new(ImpairmentConfig {
            loss_percent: 100.0,
            ..ImpairmentConfig::clean()
        });
        assert!(imp.apply(&[1, 2, 3]).is_empty());
        assert_eq!(imp.stats().dropped, 1);
    }

    #[test]
    fn corruption_keeps_length() {
        let mut imp = Impairment::new(ImpairmentConfig {
            corrupt_percent: 100.0,
            seed: 3,
            ..ImpairmentConfig::clean()
        });
        let frame = vec![0u8; 146];
        for _ in 0..50 {
            let out = imp.apply(&frame);
            assert_eq!(out.len(), frame.len());
            let flipped: u32 = out.iter().map(|b| b.count_ones()).sum();
            assert!((1..=3).contains(&flipped));
        }
    }

    #[test]
    fn rates_roughly_match_configuration() {
        let mut imp = Impairment::new(ImpairmentConfig {
            loss_percent: 25.0,
            seed: 11,
            ..ImpairmentConfig::clean()
        });
        for _ in 0..4_000 {
            imp.apply(&[0u8; 10]);
        }
        let dropped = imp.stats().dropped;
        assert!((800..1_200).contains(&dropped), "dropped {dropped}");
    }

    #[test]
    fn chunks_stay_in_bounds() {
        let mut imp = Impairment::new(ImpairmentConfig {
            max_chunk: 16,
            ..ImpairmentConfig::clean()
        });
        for _ in 0..500 {
            let n = imp.chunk(10);
            assert!((1..=10).contains(&n));
        }
    }
}
