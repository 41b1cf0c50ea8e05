// ============================================================================
// RNN-TEXTGEN COMMAND LINE
// With a corpus argument: train (optionally continuing from -i), save to -o.
// Without one: load -i and print sampled text.
// ============================================================================

use std::io::Write;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rnn_textgen::{checkpoint, sample, train, CellKind, Corpus, Network, NetworkConfig, SampleConfig, TrainConfig};

/// Character-level RNN/LSTM/GRU text generator.
#[derive(Parser, Debug)]
#[command(name = "rnn-textgen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Training corpus ("-" for stdin); sample from -i when absent
    corpus: Option<PathBuf>,

    /// Read trained model from FILE
    #[arg(short = 'i', value_name = "FILE")]
    input: Option<PathBuf>,

    /// Save trained model to FILE
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Random seed
    #[arg(short = 's', default_value_t = 11)]
    seed: u64,

    /// Number of hidden layers
    #[arg(short = 'l', default_value_t = 1)]
    layers: usize,

    /// Number of hidden neurons per layer
    #[arg(short = 'n', default_value_t = 128)]
    neurons: usize,

    /// Model: rnn, lstm or gru
    #[arg(short = 'M', default_value_t = CellKind::Rnn)]
    model: CellKind,

    /// Learning rate
    #[arg(short = 'r', default_value_t = 0.01)]
    learning_rate: f32,

    /// Dropout at the hidden layer(s)
    #[arg(short = 'd', default_value_t = 0.0)]
    dropout: f32,

    /// Max number of epochs
    #[arg(short = 'm', default_value_t = 20)]
    epochs: usize,

    /// Mini-batch size
    #[arg(short = 'B', default_value_t = 64)]
    batch_size: usize,

    /// Max unroll
    #[arg(short = 'u', default_value_t = 40)]
    unroll: usize,

    /// Sampling temperature
    #[arg(short = 'T', default_value_t = 0.5)]
    temperature: f32,

    /// Number of bytes to generate
    #[arg(short = 'L', default_value_t = 1000)]
    length: usize,

    /// Save the model to FILE after every epoch
    #[arg(short = 'C', value_name = "FILE")]
    checkpoint: Option<PathBuf>,
}

impl Cli {
    fn network_config(&self, n_in: usize) -> NetworkConfig {
        NetworkConfig { cell: self.model, n_in, n_hidden: self.neurons, n_layers: self.layers, dropout: self.dropout }
    }

    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            learning_rate: self.learning_rate,
            unroll: self.unroll,
            batch_size: self.batch_size,
            max_epochs: self.epochs,
            checkpoint: self.checkpoint.clone(),
            ..TrainConfig::default()
        }
    }

    fn sample_config(&self) -> SampleConfig {
        SampleConfig { temperature: self.temperature, length: self.length, seed: None }
    }
}

fn run_training(cli: &Cli, path: &Path, rng: &mut ChaCha8Rng) -> anyhow::Result<()> {
    let corpus = Corpus::read(path).with_context(|| format!("reading corpus {}", path.display()))?;
    let mut network = match &cli.input {
        Some(model) => {
            let (network, alphabet) = checkpoint::load(model)
                .with_context(|| format!("loading model {}", model.display()))?;
            if alphabet != corpus.alphabet {
                bail!("corpus alphabet ({} symbols) differs from the model's ({} symbols)",
                    corpus.alphabet.len(), alphabet.len());
            }
            network
        }
        None => Network::new(cli.network_config(corpus.alphabet.len()), rng)?,
    };

    let summary = train(&mut network, &corpus, &cli.train_config(), rng, |_| ControlFlow::Continue(()))?;
    if let Some(out) = &cli.output {
        let meta = serde_json::json!({"epoch": summary.epochs, "cost": summary.final_cost});
        checkpoint::save(out, &network, &corpus.alphabet, meta)
            .with_context(|| format!("saving model {}", out.display()))?;
    }
    Ok(())
}

fn run_sampling(cli: &Cli, rng: &mut ChaCha8Rng) -> anyhow::Result<()> {
    let Some(model) = &cli.input else {
        bail!("nothing to do: give a corpus to train on or a model (-i) to sample from");
    };
    let (network, alphabet) = checkpoint::load(model)
        .with_context(|| format!("loading model {}", model.display()))?;
    let text = sample(&network, &alphabet, &cli.sample_config(), rng)?;
    let mut out = std::io::stdout().lock();
    out.write_all(&text)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("seed {}", cli.seed);
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    match &cli.corpus {
        Some(path) => run_training(&cli, path, &mut rng),
        None => run_sampling(&cli, &mut rng),
    }
}
