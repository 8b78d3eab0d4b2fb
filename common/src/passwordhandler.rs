use rand::{
    Rng,
    distr::{Alphanumeric, Distribution, uniform::Uniform},
    rng,
};

/// Random alphanumeric value, used for the gatekeeper session secret
pub fn generate(length: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Uniformly pick a value in `[0, upper]`, used to spread retries
pub fn jitter(upper: u64) -> u64 {
    match Uniform::new_inclusive(0, upper) {
        Ok(dist) => dist.sample(&mut rng()),
        Err(_) => 0,
    }
}
