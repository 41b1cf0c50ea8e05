//! Character-level recurrent text generation.
//!
//! A corpus is read as raw bytes and mapped onto its own alphabet. A stacked
//! RNN, LSTM or GRU network is trained with truncated backpropagation through
//! time: the corpus is walked in windows of `T` steps, recurrent state is
//! carried from each window into the next, and gradients of `B` consecutive
//! windows are averaged into one RMSprop update. A trained network samples
//! text one symbol at a time with temperature-scaled softmax.
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rnn_textgen::{sample, train, Corpus, Network, NetworkConfig, SampleConfig, TrainConfig};
//!
//! # fn main() -> rnn_textgen::Result<()> {
//! let mut rng = ChaCha8Rng::seed_from_u64(11);
//! let corpus = Corpus::read("input.txt".as_ref())?;
//! let config = NetworkConfig { n_in: corpus.alphabet.len(), ..NetworkConfig::default() };
//! let mut network = Network::new(config, &mut rng)?;
//! train(&mut network, &corpus, &TrainConfig::default(), &mut rng, |_| ControlFlow::Continue(()))?;
//! let text = sample(&network, &corpus.alphabet, &SampleConfig::default(), &mut rng)?;
//! # Ok(())
//! # }
//! ```

pub mod alphabet;
pub mod batch;
pub mod cell;
pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod network;
pub mod ops;
pub mod optim;
pub mod params;
pub mod sample;
pub mod train;
pub mod unroll;

pub use alphabet::{Alphabet, Corpus};
pub use cell::CellKind;
pub use error::{Result, TextgenError};
pub use network::{InferenceSession, Network, NetworkConfig};
pub use optim::{RmsProp, RmsPropConfig};
pub use sample::{draw_categorical, sample, SampleConfig};
pub use train::{evaluate, train, EpochReport, TrainConfig, TrainSummary};
pub use unroll::{RecurrentState, Unrolled};
