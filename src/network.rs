// ============================================================================
// RECURRENT NETWORK
// Stacked cells + dense softmax head over one flat parameter vector.
// `build` expands the network into a static graph of `depth` steps; every
// expansion shares the same `Params` through offsets.
// ============================================================================

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cell::{CellKind, CellNodes, Dense, Layer};
use crate::error::{Result, TextgenError};
use crate::graph::{Graph, TID};
use crate::params::{ParamLayout, Params};
use crate::unroll::{Mode, RecurrentState, Unrolled};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub cell: CellKind,
    /// Input and output width; equals the alphabet size.
    pub n_in: usize,
    pub n_hidden: usize,
    pub n_layers: usize,
    /// Hidden-layer dropout rate, training only.
    pub dropout: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig { cell: CellKind::Rnn, n_in: 0, n_hidden: 128, n_layers: 1, dropout: 0.0 }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_in == 0 || self.n_in > crate::alphabet::TABLE_LEN {
            return Err(TextgenError::InvalidConfig(format!("input width must be in 1..=256, got {}", self.n_in)));
        }
        if self.n_hidden == 0 {
            return Err(TextgenError::InvalidConfig("hidden size must be positive".to_string()));
        }
        if self.n_layers == 0 {
            return Err(TextgenError::InvalidConfig("layer count must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TextgenError::InvalidConfig(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        Ok(())
    }
}

pub struct Network {
    config: NetworkConfig,
    layers: Vec<Layer>,
    head: Dense,
    params: Params,
}

fn lay_out(config: &NetworkConfig) -> (Vec<Layer>, Dense, ParamLayout) {
    let mut layout = ParamLayout::new();
    let mut layers = Vec::with_capacity(config.n_layers);
    for i in 0..config.n_layers {
        let inp = if i == 0 { config.n_in } else { config.n_hidden };
        layers.push(Layer::new(config.cell, inp, config.n_hidden, &mut layout));
    }
    let head = Dense::new(config.n_hidden, config.n_in, &mut layout);
    (layers, head, layout)
}

impl Network {
    pub fn new<R: Rng + ?Sized>(config: NetworkConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let (layers, head, layout) = lay_out(&config);
        let mut params = Params::zeros(layout.len());
        params.initialize(&layout, rng);
        Ok(Network { config, layers, head, params })
    }

    /// Restores a network from a flat parameter vector laid out for `config`.
    pub fn from_params(config: NetworkConfig, data: Vec<f32>) -> Result<Self> {
        config.validate()?;
        let (layers, head, layout) = lay_out(&config);
        if data.len() != layout.len() {
            return Err(TextgenError::ShapeMismatch { expected: layout.len(), actual: data.len() });
        }
        let grad = vec![0.0; data.len()];
        Ok(Network { config, layers, head, params: Params { data, grad } })
    }

    pub fn config(&self) -> &NetworkConfig { &self.config }

    pub fn n_in(&self) -> usize { self.config.n_in }

    pub fn n_out(&self) -> usize { self.config.n_in }

    pub fn n_params(&self) -> usize { self.params.len() }

    pub fn params(&self) -> &Params { &self.params }

    pub fn params_mut(&mut self) -> &mut Params { &mut self.params }

    pub fn parameters(&self) -> &[f32] { &self.params.data }

    pub fn gradients(&self) -> &[f32] { &self.params.grad }

    /// Training expansion of `depth` steps: dropout active, gradients flow
    /// into this network's gradient buffer on `Unrolled::eval`.
    pub fn unroll(&self, depth: usize) -> Result<Unrolled> {
        self.build(depth, Mode::Train)
    }

    pub(crate) fn build(&self, depth: usize, mode: Mode) -> Result<Unrolled> {
        if depth == 0 {
            return Err(TextgenError::InvalidConfig("unroll length must be positive".to_string()));
        }
        let width = self.config.n_in;
        let mut g = Graph::new(mode == Mode::Train);

        // holds 1/τ; only read by inference heads
        let temperature = g.leaf(1, 1);
        g.set(temperature, &[1.0])?;

        let mut state: Vec<Vec<TID>> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let mut slots = Vec::with_capacity(layer.state_slots());
            for _ in 0..layer.state_slots() {
                slots.push(g.leaf(1, layer.n_hidden()));
            }
            state.push(slots);
        }
        let state_in: Vec<TID> = state.iter().flatten().copied().collect();

        let cells: Vec<CellNodes> = self.layers.iter().map(|l| l.instantiate(&mut g)).collect();
        let (wo, bo) = self.head.instantiate(&mut g);
        let rate = if mode == Mode::Train { self.config.dropout } else { 0.0 };

        let mut inputs = Vec::with_capacity(depth);
        let mut targets = Vec::new();
        let mut outputs = Vec::new();
        let mut ces = Vec::new();

        for _ in 0..depth {
            let x = g.leaf(1, width);
            inputs.push(x);

            let mut h = x;
            for (cell, prev) in cells.iter().zip(state.iter_mut()) {
                let next = cell.step(&mut g, h, prev);
                // the carried state is taken before dropout
                h = if rate > 0.0 { g.dropout(next[0], rate) } else { next[0] };
                *prev = next;
            }

            let hw = g.matmul(h, wo);
            let logits = g.add(hw, bo);
            match mode {
                Mode::Infer => {
                    let scaled = g.scale_by(logits, temperature);
                    outputs.push(g.softmax(scaled));
                }
                Mode::Train | Mode::Eval => {
                    let y = g.leaf(1, width);
                    targets.push(y);
                    ces.push(g.softmax_ce(logits, y));
                }
            }
        }

        let cost = match ces.split_first() {
            Some((&first, rest)) => {
                let mut total = first;
                for &ce in rest { total = g.add(total, ce); }
                Some(g.scalar_div(total, depth as f32))
            }
            None => None,
        };
        let state_out: Vec<TID> = state.into_iter().flatten().collect();

        Ok(Unrolled { graph: g, mode, width, inputs, targets, outputs, cost, temperature, state_in, state_out })
    }
}

// ============================================================================
// SINGLE-STEP INFERENCE
// ============================================================================

/// One-step expansion that keeps its recurrent state between calls.
pub struct InferenceSession<'a> {
    network: &'a Network,
    window: Unrolled,
}

impl<'a> InferenceSession<'a> {
    /// Starts from the zero state at temperature 1.
    pub fn start(network: &'a Network) -> Result<Self> {
        let window = network.build(1, Mode::Infer)?;
        Ok(InferenceSession { network, window })
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        self.window.set_temperature(temperature)
    }

    /// Runs one step on a dense input vector and returns the output
    /// distribution. The state produced by this step feeds the next call.
    pub fn apply(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.window.bind_input(0, input)?;
        self.advance()
    }

    pub fn apply_symbol(&mut self, symbol: usize) -> Result<&[f32]> {
        self.window.bind_input_symbol(0, symbol)?;
        self.advance()
    }

    fn advance(&mut self) -> Result<&[f32]> {
        self.window.infer(self.network.params())?;
        self.window.carry_state();
        self.window.probabilities(0)
    }

    pub fn reset_state(&mut self) {
        self.window.reset_state();
    }

    pub fn state(&self) -> RecurrentState {
        self.window.initial_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn config(cell: CellKind, n_layers: usize) -> NetworkConfig {
        NetworkConfig { cell, n_in: 3, n_hidden: 4, n_layers, dropout: 0.0 }
    }

    #[test]
    fn test_config_validation() {
        assert!(config(CellKind::Rnn, 1).validate().is_ok());
        assert!(NetworkConfig::default().validate().is_err());
        assert!(NetworkConfig { n_hidden: 0, ..config(CellKind::Rnn, 1) }.validate().is_err());
        assert!(NetworkConfig { n_layers: 0, ..config(CellKind::Rnn, 1) }.validate().is_err());
        assert!(NetworkConfig { dropout: 1.0, ..config(CellKind::Rnn, 1) }.validate().is_err());
        assert!(NetworkConfig { n_in: 257, ..config(CellKind::Rnn, 1) }.validate().is_err());
    }

    #[test]
    fn test_n_params() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let head = 4 * 3 + 3;
        for (cell, gates) in [(CellKind::Rnn, 1), (CellKind::Lstm, 4), (CellKind::Gru, 3)] {
            let net = Network::new(config(cell, 2), &mut rng).unwrap();
            let first = gates * (3 * 4 + 4 * 4 + 4);
            let second = gates * (4 * 4 + 4 * 4 + 4);
            assert_eq!(net.n_params(), first + second + head);
            assert_eq!(net.gradients().len(), net.n_params());
            assert_eq!(net.n_out(), 3);
        }
    }

    #[test]
    fn test_from_params_checks_length() {
        let net = Network::new(config(CellKind::Gru, 1), &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        let restored = Network::from_params(config(CellKind::Gru, 1), net.parameters().to_vec()).unwrap();
        assert_eq!(restored.parameters(), net.parameters());
        assert!(matches!(
            Network::from_params(config(CellKind::Gru, 1), vec![0.0; 5]),
            Err(TextgenError::ShapeMismatch { actual: 5, .. })
        ));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let window = [0u8, 2, 1, 1, 0];
        for cell in [CellKind::Rnn, CellKind::Lstm, CellKind::Gru] {
            let mut net = Network::new(config(cell, 2), &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
            let mut train = net.unroll(4).unwrap();
            train.bind_window(&window).unwrap();
            train.eval(net.params_mut(), &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
            let analytic = net.gradients().to_vec();

            let mut eval = net.build(4, Mode::Eval).unwrap();
            eval.bind_window(&window).unwrap();
            let eps = 1e-2f32;
            for i in 0..net.n_params() {
                let orig = net.params().data[i];
                net.params_mut().data[i] = orig + eps;
                let up = eval.eval_cost(net.params()).unwrap();
                net.params_mut().data[i] = orig - eps;
                let down = eval.eval_cost(net.params()).unwrap();
                net.params_mut().data[i] = orig;
                let numeric = (up - down) / (2.0 * eps);
                assert!((numeric - analytic[i]).abs() < 5e-3 + 2e-2 * numeric.abs(),
                    "{} param {}: numeric {} analytic {}", cell, i, numeric, analytic[i]);
            }
        }
    }

    #[test]
    fn test_dropout_changes_training_cost_only() {
        let cfg = NetworkConfig { dropout: 0.5, n_hidden: 16, ..config(CellKind::Rnn, 1) };
        let mut net = Network::new(cfg, &mut ChaCha8Rng::seed_from_u64(4)).unwrap();
        let window = [0u8, 1, 2, 0, 1];

        let mut eval = net.build(4, Mode::Eval).unwrap();
        eval.bind_window(&window).unwrap();
        let c1 = eval.eval_cost(net.params()).unwrap();
        let c2 = eval.eval_cost(net.params()).unwrap();
        assert_eq!(c1, c2);

        let mut train = net.unroll(4).unwrap();
        train.bind_window(&window).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let t1 = train.eval(net.params_mut(), &mut rng).unwrap();
        let t2 = train.eval(net.params_mut(), &mut rng).unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_session_matches_unrolled_window() {
        let net = Network::new(config(CellKind::Lstm, 2), &mut ChaCha8Rng::seed_from_u64(6)).unwrap();
        let symbols = [2u8, 0, 1, 1];

        let mut session = InferenceSession::start(&net).unwrap();
        for &s in &symbols {
            let probs = session.apply_symbol(s as usize).unwrap();
            assert_eq!(probs.len(), 3);
            assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }

        let mut eval = net.build(4, Mode::Eval).unwrap();
        eval.bind_window(&[2, 0, 1, 1, 0]).unwrap();
        eval.eval_cost(net.params()).unwrap();
        assert!(session.state().max_abs_diff(&eval.final_state()) < 1e-5);

        session.reset_state();
        assert!(session.state().slots.iter().all(|s| s.iter().all(|&x| x == 0.0)));
    }

    #[test]
    fn test_session_temperature_sharpens() {
        let net = Network::new(config(CellKind::Gru, 1), &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
        let mut warm = InferenceSession::start(&net).unwrap();
        let p_warm = warm.apply(&[1.0, 0.0, 0.0]).unwrap().to_vec();
        let mut cold = InferenceSession::start(&net).unwrap();
        cold.set_temperature(0.1).unwrap();
        let p_cold = cold.apply(&[1.0, 0.0, 0.0]).unwrap().to_vec();

        let argmax = p_warm.iter().enumerate().fold(0, |b, (i, &p)| if p > p_warm[b] { i } else { b });
        assert!(p_cold[argmax] > p_warm[argmax]);
    }
}
