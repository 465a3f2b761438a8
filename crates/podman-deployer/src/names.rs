use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random suffix appended to every container name.
pub const SUFFIX_LENGTH: usize = 10;

/// Draws `len` characters uniformly from `[a-zA-Z0-9]`. Not suitable for
/// anything security related.
pub fn random_string<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Seed used when the configuration leaves `rngSeed` at zero.
pub fn seed_or_now(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .map(|nanos| nanos as u64)
        .unwrap_or_else(|| now.timestamp_micros() as u64)
}

/// Hands out container names for one connector. Names already issued (and
/// not yet released) are never handed out again.
#[derive(Debug)]
pub struct NameAllocator {
    rng: StdRng,
    prefix: String,
    issued: HashSet<String>,
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            prefix: prefix.into(),
            issued: HashSet::new(),
        }
    }

    pub fn next_name(&mut self) -> String {
        loop {
            let name = format!(
                "{}_{}",
                self.prefix,
                random_string(&mut self.rng, SUFFIX_LENGTH)
            );
            if self.issued.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Forgets a name whose container has been removed.
    pub fn release(&mut self, name: &str) {
        self.issued.remove(name);
    }

    pub fn live_names(&self) -> usize {
        self.issued.len()
    }
}
