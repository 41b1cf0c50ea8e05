// ============================================================================
// GENERATION
// ============================================================================

use rand::Rng;
use tracing::{debug, instrument};

use crate::alphabet::Alphabet;
use crate::error::{Result, TextgenError};
use crate::network::{InferenceSession, Network};

#[derive(Clone, Debug, PartialEq)]
pub struct SampleConfig {
    pub temperature: f32,
    pub length: usize,
    /// Primes the recurrence; not part of the output.
    pub seed: Option<u8>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        SampleConfig { temperature: 0.5, length: 1000, seed: None }
    }
}

impl SampleConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(TextgenError::InvalidConfig(format!("temperature must be positive, got {}", self.temperature)));
        }
        Ok(())
    }
}

/// Inverse-CDF draw: the first index whose cumulative probability reaches `r`,
/// or the last index when rounding keeps the total below `r`.
pub fn draw_categorical(probs: &[f32], r: f32) -> Result<usize> {
    let total: f32 = probs.iter().sum();
    if !total.is_finite() || total <= 0.0 || probs.iter().any(|p| !p.is_finite()) {
        return Err(TextgenError::DegenerateDistribution(total));
    }
    let mut acc = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        acc += p;
        if acc >= r { return Ok(i); }
    }
    Ok(probs.len() - 1)
}

/// Generates `config.length` bytes from `network`, feeding every drawn symbol
/// back as the next input.
#[instrument(skip_all, fields(temperature = config.temperature, length = config.length))]
pub fn sample<R: Rng + ?Sized>(
    network: &Network,
    alphabet: &Alphabet,
    config: &SampleConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    config.validate()?;
    if alphabet.len() != network.n_in() {
        return Err(TextgenError::AlphabetMismatch { alphabet: alphabet.len(), network: network.n_in() });
    }
    let mut symbol = match config.seed {
        Some(byte) => alphabet.index_of(byte).ok_or(TextgenError::UnknownByte(byte))? as usize,
        None => rng.gen_range(0..alphabet.len()),
    };
    debug!("initial symbol {}", symbol);

    let mut session = InferenceSession::start(network)?;
    session.set_temperature(config.temperature)?;
    let mut out = Vec::with_capacity(config.length);
    for _ in 0..config.length {
        let probs = session.apply_symbol(symbol)?;
        let r: f32 = rng.gen();
        symbol = draw_categorical(probs, r)?;
        let byte = alphabet.byte_at(symbol).ok_or(TextgenError::SymbolOutOfRange { symbol, width: alphabet.len() })?;
        out.push(byte);
    }
    Ok(out)
}
