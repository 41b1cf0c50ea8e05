// ============================================================================
// TRAINING
// Truncated BPTT over one rolling state chain: every epoch walks the corpus
// front to back in mini-batches of B consecutive windows and applies one
// RMSprop update per mini-batch.
// ============================================================================

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, instrument};

use crate::alphabet::Corpus;
use crate::batch::Batcher;
use crate::checkpoint;
use crate::error::{Result, TextgenError};
use crate::network::Network;
use crate::optim::{RmsProp, RmsPropConfig};
use crate::unroll::{Mode, RecurrentState};

#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub unroll: usize,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub rho: f32,
    pub weight_decay: f32,
    /// Saved after every epoch when set.
    pub checkpoint: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            learning_rate: 0.01,
            unroll: 40,
            batch_size: 64,
            max_epochs: 20,
            rho: 0.9,
            weight_decay: 0.0,
            checkpoint: None,
        }
    }
}

impl TrainConfig {
    pub fn optimizer(&self) -> RmsPropConfig {
        RmsPropConfig { lr: self.learning_rate, rho: self.rho, weight_decay: self.weight_decay, ..RmsPropConfig::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.unroll == 0 {
            return Err(TextgenError::InvalidConfig("unroll length must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TextgenError::InvalidConfig("mini-batch size must be positive".to_string()));
        }
        self.optimizer().validate()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    /// Average cost per consumed symbol.
    pub cost: f32,
    pub batches: usize,
    pub symbols: usize,
    pub elapsed: Duration,
    /// Recurrent state the first window of the epoch started from.
    pub start_state: RecurrentState,
    /// State carried out of the last window of the epoch.
    pub end_state: RecurrentState,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainSummary {
    pub epochs: usize,
    pub final_cost: Option<f32>,
    pub stopped_early: bool,
    pub elapsed: Duration,
}

fn check_corpus(network: &Network, corpus: &Corpus, unroll: usize, batch_size: usize) -> Result<()> {
    if corpus.is_empty() {
        return Err(TextgenError::EmptyCorpus);
    }
    if corpus.alphabet.len() != network.n_in() {
        return Err(TextgenError::AlphabetMismatch { alphabet: corpus.alphabet.len(), network: network.n_in() });
    }
    let needed = unroll * batch_size + 1;
    if corpus.len() < needed {
        return Err(TextgenError::CorpusTooShort { len: corpus.len(), needed });
    }
    Ok(())
}

/// Trains `network` in place on `corpus`.
///
/// `on_epoch` sees every epoch's report; returning `ControlFlow::Break` ends
/// training after that epoch.
#[instrument(skip_all, fields(cell = %network.config().cell, epochs = config.max_epochs))]
pub fn train<R, F>(
    network: &mut Network,
    corpus: &Corpus,
    config: &TrainConfig,
    rng: &mut R,
    mut on_epoch: F,
) -> Result<TrainSummary>
where
    R: Rng + ?Sized,
    F: FnMut(&EpochReport) -> ControlFlow<()>,
{
    config.validate()?;
    check_corpus(network, corpus, config.unroll, config.batch_size)?;

    let mut batcher = Batcher::new(config.unroll, config.batch_size, network.n_params())?;
    let mut optimizer = RmsProp::new(config.optimizer(), network.n_params())?;
    let mut window = network.unroll(config.unroll)?;
    let plan = batcher.plan(corpus.len());
    info!("{} params; {} mini-batches of {} symbols per epoch, {} left over",
        network.n_params(), plan.batches, batcher.stride(), plan.tail);

    let t0 = Instant::now();
    let mut summary = TrainSummary { epochs: 0, final_cost: None, stopped_early: false, elapsed: Duration::ZERO };

    // one state chain for the whole run; epochs continue where the last one stopped
    window.reset_state();
    for epoch in 1..=config.max_epochs {
        let started = Instant::now();
        let start_state = window.initial_state();
        let (mut cost_sum, mut symbols, mut batches) = (0.0f32, 0usize, 0usize);

        for cursor in batcher.cursors(corpus.len()) {
            let cost = batcher.run(&mut window, network.params_mut(), &corpus.symbols, cursor, epoch, rng)?;
            optimizer.step(&mut network.params_mut().data, batcher.gradient())?;
            cost_sum += cost.cost_sum;
            symbols += cost.symbols;
            batches += 1;
        }

        let cost = cost_sum / symbols as f32;
        info!("epoch: {}; running cost: {}", epoch, cost);
        if let Some(path) = &config.checkpoint {
            checkpoint::save(path, network, &corpus.alphabet, serde_json::json!({"epoch": epoch, "cost": cost}))?;
        }

        summary.epochs = epoch;
        summary.final_cost = Some(cost);
        let report = EpochReport {
            epoch,
            cost,
            batches,
            symbols,
            elapsed: started.elapsed(),
            start_state,
            end_state: window.initial_state(),
        };
        if on_epoch(&report).is_break() {
            summary.stopped_early = epoch < config.max_epochs;
            break;
        }
    }

    summary.elapsed = t0.elapsed();
    info!("done in {:.1}s", summary.elapsed.as_secs_f64());
    Ok(summary)
}

/// Epoch-average cost of `network` on `corpus` with the same windowing as
/// training, without dropout or updates.
pub fn evaluate(network: &Network, corpus: &Corpus, unroll: usize, batch_size: usize) -> Result<f32> {
    check_corpus(network, corpus, unroll, batch_size)?;
    let batcher = Batcher::new(unroll, batch_size, 0)?;
    let mut window = network.build(unroll, Mode::Eval)?;
    let (mut cost_sum, mut symbols) = (0.0f32, 0usize);
    for cursor in batcher.cursors(corpus.len()) {
        let cost = batcher.run_cost(&mut window, network.params(), &corpus.symbols, cursor)?;
        cost_sum += cost.cost_sum;
        symbols += cost.symbols;
    }
    Ok(cost_sum / symbols as f32)
}
