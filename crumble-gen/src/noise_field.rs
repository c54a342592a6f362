use noise::{NoiseFn, Simplex};

/// Seeded 2D coherent noise, normalized to `[0, 1]`.
#[derive(Clone)]
pub struct NoiseField {
    simplex: Simplex,
    seed: u32,
}

impl NoiseField {
    pub fn new(seed: &str) -> Self {
        Self::from_hash(seed_hash(seed))
    }

    pub fn from_hash(seed: u32) -> Self {
        Self {
            simplex: Simplex::new(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Single sample mapped from `[-1, 1]` to `[0, 1]`.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        ((self.simplex.get([x, y]) + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    /// Mean of `octaves` samples, octave `i` (1-based) at frequency `i`.
    pub fn octave_sum(&self, x: f64, y: f64, octaves: u32) -> f64 {
        let mut sum = 0.0;
        for i in 1..=octaves {
            let f = i as f64;
            sum += self.sample(x * f, y * f);
        }
        sum / octaves as f64
    }

    /// Mean of `samples` samples at `scale / i`, squared to bias toward low
    /// values.
    pub fn biome_sum(&self, x: f64, y: f64, samples: u32, scale: f64) -> f64 {
        let mut sum = 0.0;
        for i in 1..=samples {
            let f = scale / i as f64;
            sum += self.sample(x * f, y * f);
        }
        let mean = sum / samples as f64;
        mean * mean
    }
}

// FNV-1a 64-bit hash, folded to 32 bits
pub fn seed_hash(text: &str) -> u32 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    ((hash >> 32) ^ hash) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_hash_stable() {
        assert_eq!(seed_hash("mgdlnkczmr"), seed_hash("mgdlnkczmr"));
        assert_ne!(seed_hash("mgdlnkczmr"), seed_hash("mgdlnkczms"));
    }

    #[test]
    fn test_samples_normalized() {
        let field = NoiseField::new("range");
        for i in 0..200 {
            let x = i as f64 * 0.137;
            let y = i as f64 * -0.071;
            let s = field.sample(x, y);
            assert!((0.0..=1.0).contains(&s), "sample {} out of range", s);
            let o = field.octave_sum(x, y, 3);
            assert!((0.0..=1.0).contains(&o));
            let b = field.biome_sum(x, y, 5, 0.1);
            assert!((0.0..=1.0).contains(&b));
        }
    }

    #[test]
    fn test_same_seed_same_field() {
        let a = NoiseField::new("alpha");
        let b = NoiseField::new("alpha");
        assert_eq!(a.sample(1.5, -2.25).to_bits(), b.sample(1.5, -2.25).to_bits());
    }
}
