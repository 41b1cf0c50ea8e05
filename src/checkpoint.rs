// ============================================================================
// CHECKPOINT SERIALIZATION
// Network config, flat parameters and the byte table in one bincode blob.
// The path "-" reads from stdin / writes to stdout.
// ============================================================================

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alphabet::Alphabet;
use crate::error::{Result, TextgenError};
use crate::network::{Network, NetworkConfig};

pub const FORMAT_VERSION: &str = "1.0-bin";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SavedModel {
    pub version: String,
    pub timestamp: String,
    /// JSON object, e.g. `{"epoch": 3, "cost": 1.42}`.
    pub metadata: Option<String>,
    pub config: NetworkConfig,
    pub params: Vec<f32>,
    /// byte → index, `-1` for bytes outside the alphabet.
    pub alphabet: Vec<i32>,
}

impl SavedModel {
    pub fn new(network: &Network, alphabet: &Alphabet, metadata: serde_json::Value) -> Result<Self> {
        if alphabet.len() != network.n_in() {
            return Err(TextgenError::AlphabetMismatch { alphabet: alphabet.len(), network: network.n_in() });
        }
        Ok(SavedModel {
            version: FORMAT_VERSION.to_string(),
            timestamp: iso_timestamp(),
            metadata: Some(serde_json::to_string(&metadata)?),
            config: network.config().clone(),
            params: network.parameters().to_vec(),
            alphabet: alphabet.table(),
        })
    }

    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.metadata.as_deref().and_then(|m| serde_json::from_str(m).ok())
    }

    pub fn into_parts(self) -> Result<(Network, Alphabet)> {
        if self.version != FORMAT_VERSION {
            return Err(TextgenError::Checkpoint(format!(
                "unsupported format version '{}' (expected '{}')", self.version, FORMAT_VERSION)));
        }
        let alphabet = Alphabet::from_table(&self.alphabet)?;
        if alphabet.len() != self.config.n_in {
            return Err(TextgenError::AlphabetMismatch { alphabet: alphabet.len(), network: self.config.n_in });
        }
        let network = Network::from_params(self.config, self.params).map_err(|e| match e {
            TextgenError::ShapeMismatch { expected, actual } => TextgenError::Checkpoint(format!(
                "config needs {} parameters, file holds {}", expected, actual)),
            other => other,
        })?;
        Ok((network, alphabet))
    }
}

pub fn save(path: &Path, network: &Network, alphabet: &Alphabet, metadata: serde_json::Value) -> Result<()> {
    let bytes = bincode::serialize(&SavedModel::new(network, alphabet, metadata)?)?;
    if path.as_os_str() == "-" {
        let mut out = io::stdout().lock();
        out.write_all(&bytes)?;
        out.flush()?;
    } else {
        fs::write(path, &bytes)?;
    }
    info!("saved model to {} ({} params, {:.2} MB)", path.display(), network.n_params(), bytes.len() as f64 / 1_048_576.0);
    Ok(())
}

pub fn read(path: &Path) -> Result<SavedModel> {
    let bytes = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        io::stdin().lock().read_to_end(&mut buf)?;
        buf
    } else {
        fs::read(path)?
    };
    Ok(bincode::deserialize(&bytes)?)
}

pub fn load(path: &Path) -> Result<(Network, Alphabet)> {
    let (network, alphabet) = read(path)?.into_parts()?;
    info!("loaded model from {} ({} cell, {} params, alphabet size {})",
        path.display(), network.config().cell, network.n_params(), alphabet.len());
    Ok((network, alphabet))
}

fn iso_timestamp() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0) as i64;
    let (days, tod) = (secs.div_euclid(86_400), secs.rem_euclid(86_400));

    // days since 1970-01-01 → civil date (proleptic Gregorian, 400-year eras)
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z", year, month, day, tod / 3600, tod % 3600 / 60, tod % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn model() -> (Network, Alphabet) {
        let alphabet = Alphabet::from_bytes(b"hello world");
        let config = NetworkConfig { cell: CellKind::Lstm, n_in: alphabet.len(), n_hidden: 6, n_layers: 2, dropout: 0.25 };
        let net = Network::new(config, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        (net, alphabet)
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let (net, alphabet) = model();
        save(&path, &net, &alphabet, serde_json::json!({"epoch": 2, "cost": 1.5})).unwrap();

        let saved = read(&path).unwrap();
        assert_eq!(saved.metadata().unwrap()["epoch"], 2);
        assert_eq!(saved.timestamp.len(), 20);

        let (restored, restored_alphabet) = load(&path).unwrap();
        assert_eq!(restored.config(), net.config());
        assert_eq!(restored.parameters(), net.parameters());
        assert_eq!(restored_alphabet, alphabet);
    }

    #[test]
    fn test_rejects_version_and_count() {
        let (net, alphabet) = model();
        let mut saved = SavedModel::new(&net, &alphabet, serde_json::Value::Null).unwrap();
        saved.version = "0.1".to_string();
        assert!(matches!(saved.clone().into_parts(), Err(TextgenError::Checkpoint(_))));

        saved.version = FORMAT_VERSION.to_string();
        saved.params.pop();
        assert!(matches!(saved.clone().into_parts(), Err(TextgenError::Checkpoint(_))));
    }

    #[test]
    fn test_rejects_alphabet_mismatch() {
        let (net, _) = model();
        let other = Alphabet::from_bytes(b"ab");
        assert!(matches!(SavedModel::new(&net, &other, serde_json::Value::Null),
            Err(TextgenError::AlphabetMismatch { alphabet: 2, .. })));
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(load(&path), Err(TextgenError::Serialization(_))));
        assert!(matches!(load(&dir.path().join("missing.bin")), Err(TextgenError::Io(_))));
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = iso_timestamp();
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
        assert!(ts.ends_with('Z'));
    }
}
