// ============================================================================
// BYTE ALPHABET + ENCODED CORPUS
// Exactly the distinct bytes of a corpus, numbered 0..n in increasing byte
// order. Every symbol index fits in a u8.
// ============================================================================

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::info;

use crate::error::{Result, TextgenError};

/// Width of the persisted byte→index table.
pub const TABLE_LEN: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alphabet {
    to_index: [Option<u8>; TABLE_LEN],
    to_byte: Vec<u8>,
}

impl Alphabet {
    /// Builds the alphabet of the bytes present in `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut seen = [false; TABLE_LEN];
        for &b in data { seen[b as usize] = true; }
        let mut to_index = [None; TABLE_LEN];
        let mut to_byte = Vec::new();
        for b in 0..TABLE_LEN {
            if !seen[b] { continue; }
            to_index[b] = Some(to_byte.len() as u8);
            to_byte.push(b as u8);
        }
        Alphabet { to_index, to_byte }
    }

    /// Rebuilds an alphabet from a persisted table (`-1` marks absent bytes).
    pub fn from_table(table: &[i32]) -> Result<Self> {
        if table.len() != TABLE_LEN {
            return Err(TextgenError::InvalidAlphabet(format!("table has {} entries", table.len())));
        }
        let present = table.iter().filter(|&&v| v >= 0).count();
        let mut to_index = [None; TABLE_LEN];
        let mut to_byte = vec![None; present];
        for (b, &idx) in table.iter().enumerate() {
            if idx < 0 { continue; }
            let slot = to_byte.get_mut(idx as usize).ok_or_else(|| {
                TextgenError::InvalidAlphabet(format!("index {} out of range for {} symbols", idx, present))
            })?;
            if slot.is_some() {
                return Err(TextgenError::InvalidAlphabet(format!("index {} assigned twice", idx)));
            }
            *slot = Some(b as u8);
            to_index[b] = Some(idx as u8);
        }
        // present entries are distinct and < present, so every slot is filled
        let to_byte = to_byte.into_iter().flatten().collect();
        Ok(Alphabet { to_index, to_byte })
    }

    pub fn table(&self) -> Vec<i32> {
        self.to_index.iter().map(|i| i.map_or(-1, i32::from)).collect()
    }

    pub fn len(&self) -> usize { self.to_byte.len() }

    pub fn is_empty(&self) -> bool { self.to_byte.is_empty() }

    pub fn index_of(&self, byte: u8) -> Option<u8> { self.to_index[byte as usize] }

    pub fn byte_at(&self, index: usize) -> Option<u8> { self.to_byte.get(index).copied() }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        data.iter()
            .map(|&b| self.index_of(b).ok_or(TextgenError::UnknownByte(b)))
            .collect()
    }

    pub fn decode(&self, symbols: &[u8]) -> Result<Vec<u8>> {
        symbols.iter()
            .map(|&s| self.byte_at(s as usize).ok_or_else(|| {
                TextgenError::InvalidAlphabet(format!("symbol {} outside alphabet of {}", s, self.len()))
            }))
            .collect()
    }
}

/// A corpus encoded over its own alphabet.
#[derive(Clone, Debug)]
pub struct Corpus {
    pub alphabet: Alphabet,
    pub symbols: Vec<u8>,
}

impl Corpus {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() { return Err(TextgenError::EmptyCorpus); }
        let alphabet = Alphabet::from_bytes(data);
        let symbols = alphabet.encode(data)?;
        Ok(Corpus { alphabet, symbols })
    }

    /// Reads a corpus from `path`, or from stdin when the path is `-`.
    pub fn read(path: &Path) -> Result<Self> {
        let data = if path.as_os_str() == "-" {
            let mut buf = Vec::new();
            io::stdin().lock().read_to_end(&mut buf)?;
            buf
        } else {
            fs::read(path)?
        };
        let corpus = Self::from_bytes(&data)?;
        info!("read {} characters; alphabet size {}", corpus.len(), corpus.alphabet.len());
        Ok(corpus)
    }

    pub fn len(&self) -> usize { self.symbols.len() }

    pub fn is_empty(&self) -> bool { self.symbols.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_is_contiguous() {
        let a = Alphabet::from_bytes(b"hello world");
        assert_eq!(a.len(), 8);
        let mut image: Vec<u8> = (0..=255u8).filter_map(|b| a.index_of(b)).collect();
        image.sort();
        assert_eq!(image, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_indices_follow_byte_order() {
        let a = Alphabet::from_bytes(b"cab");
        assert_eq!(a.index_of(b'a'), Some(0));
        assert_eq!(a.index_of(b'b'), Some(1));
        assert_eq!(a.index_of(b'c'), Some(2));
        assert_eq!(a.index_of(b'd'), None);
    }

    #[test]
    fn test_round_trip() {
        let text: Vec<u8> = (0..=255u8).rev().chain(b"the quick brown fox".iter().copied()).collect();
        let corpus = Corpus::from_bytes(&text).unwrap();
        assert_eq!(corpus.alphabet.len(), 256);
        assert_eq!(corpus.alphabet.decode(&corpus.symbols).unwrap(), text);
    }

    #[test]
    fn test_unknown_byte() {
        let a = Alphabet::from_bytes(b"ab");
        assert!(matches!(a.encode(b"abc"), Err(TextgenError::UnknownByte(b'c'))));
        assert!(a.decode(&[2]).is_err());
    }

    #[test]
    fn test_table_round_trip() {
        let a = Alphabet::from_bytes(b"\n\tabcXYZ");
        let table = a.table();
        assert_eq!(table.len(), TABLE_LEN);
        assert_eq!(table[b'q' as usize], -1);
        assert_eq!(Alphabet::from_table(&table).unwrap(), a);
    }

    #[test]
    fn test_table_rejects_duplicates_and_gaps() {
        let mut table = vec![-1; TABLE_LEN];
        table[b'a' as usize] = 0;
        table[b'b' as usize] = 0;
        assert!(Alphabet::from_table(&table).is_err());

        let mut table = vec![-1; TABLE_LEN];
        table[b'a' as usize] = 0;
        table[b'b' as usize] = 2;
        assert!(Alphabet::from_table(&table).is_err());

        assert!(Alphabet::from_table(&[0; 12]).is_err());
    }

    #[test]
    fn test_empty_corpus() {
        assert!(matches!(Corpus::from_bytes(b""), Err(TextgenError::EmptyCorpus)));
    }

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        fs::write(&path, b"abcabc").unwrap();
        let corpus = Corpus::read(&path).unwrap();
        assert_eq!(corpus.len(), 6);
        assert_eq!(corpus.symbols, vec![0, 1, 2, 0, 1, 2]);
    }
}
