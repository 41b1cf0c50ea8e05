// ============================================================================
// UNROLLED TRAINING WINDOW
// A fixed window of `depth` steps over the network's parameters. It owns its
// activations and binding slots; the weights are only referenced by offset,
// so evaluation borrows `Params` and gradients land in the shared buffer.
// `carry_state` stitches consecutive windows into one long recurrent pass.
// ============================================================================

use rand::Rng;

use crate::error::{Result, TextgenError};
use crate::graph::{Graph, TID};
use crate::ops::one_hot_into;
use crate::params::Params;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Cost + gradients, dropout active.
    Train,
    /// Cost only, dropout off.
    Eval,
    /// Temperature-scaled output distribution per step, no targets.
    Infer,
}

/// Hidden (and LSTM cell) vectors carried between windows, layer by layer.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentState {
    pub slots: Vec<Vec<f32>>,
}

impl RecurrentState {
    pub fn max_abs_diff(&self, other: &RecurrentState) -> f32 {
        self.slots.iter().zip(&other.slots)
            .flat_map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x - y).abs()))
            .fold(0.0, f32::max)
    }
}

pub struct Unrolled {
    pub(crate) graph: Graph,
    pub(crate) mode: Mode,
    pub(crate) width: usize,
    pub(crate) inputs: Vec<TID>,
    pub(crate) targets: Vec<TID>,
    pub(crate) outputs: Vec<TID>,
    pub(crate) cost: Option<TID>,
    pub(crate) temperature: TID,
    pub(crate) state_in: Vec<TID>,
    pub(crate) state_out: Vec<TID>,
}

impl Unrolled {
    pub fn depth(&self) -> usize { self.inputs.len() }

    pub fn width(&self) -> usize { self.width }

    pub fn mode(&self) -> Mode { self.mode }

    fn check_step(&self, step: usize) -> Result<()> {
        if step >= self.depth() {
            return Err(TextgenError::StepOutOfRange { step, depth: self.depth() });
        }
        Ok(())
    }

    fn check_symbol(&self, symbol: usize) -> Result<()> {
        if symbol >= self.width {
            return Err(TextgenError::SymbolOutOfRange { symbol, width: self.width });
        }
        Ok(())
    }

    fn target(&self, step: usize) -> Result<TID> {
        self.check_step(step)?;
        self.targets.get(step).copied().ok_or_else(|| {
            TextgenError::InvalidConfig("inference windows take no targets".to_string())
        })
    }

    pub fn bind_input(&mut self, step: usize, x: &[f32]) -> Result<()> {
        self.check_step(step)?;
        self.graph.set(self.inputs[step], x)
    }

    pub fn bind_target(&mut self, step: usize, y: &[f32]) -> Result<()> {
        let t = self.target(step)?;
        self.graph.set(t, y)
    }

    pub fn bind_input_symbol(&mut self, step: usize, symbol: usize) -> Result<()> {
        self.check_step(step)?;
        self.check_symbol(symbol)?;
        one_hot_into(symbol, self.graph.leaf_mut(self.inputs[step]));
        Ok(())
    }

    pub fn bind_target_symbol(&mut self, step: usize, symbol: usize) -> Result<()> {
        let t = self.target(step)?;
        self.check_symbol(symbol)?;
        one_hot_into(symbol, self.graph.leaf_mut(t));
        Ok(())
    }

    /// Binds `x[k] = window[k]`, `y[k] = window[k + 1]` for every step, so
    /// `window` must hold `depth + 1` symbols.
    pub fn bind_window(&mut self, window: &[u8]) -> Result<()> {
        if window.len() != self.depth() + 1 {
            return Err(TextgenError::ShapeMismatch { expected: self.depth() + 1, actual: window.len() });
        }
        for (k, pair) in window.windows(2).enumerate() {
            self.bind_input_symbol(k, pair[0] as usize)?;
            self.bind_target_symbol(k, pair[1] as usize)?;
        }
        Ok(())
    }

    /// Forward and backward pass over the bound window.
    ///
    /// Returns the mean cost over the window. The gradient buffer of `params`
    /// is zeroed first and then holds the gradient of that mean.
    pub fn eval<R: Rng + ?Sized>(&mut self, params: &mut Params, rng: &mut R) -> Result<f32> {
        let cost = match (self.mode, self.cost) {
            (Mode::Train, Some(c)) => c,
            _ => return Err(TextgenError::InvalidConfig("gradients need a training window".to_string())),
        };
        self.graph.sample_dropout(rng);
        params.zero_grad();
        self.graph.forward(params);
        self.graph.backward(cost, params);
        Ok(self.graph.activation(cost)[0])
    }

    /// Forward pass only; returns the mean cost over the window.
    pub fn eval_cost(&mut self, params: &Params) -> Result<f32> {
        let cost = match (self.mode, self.cost) {
            (Mode::Eval, Some(c)) => c,
            _ => return Err(TextgenError::InvalidConfig("forward-only cost needs an eval window".to_string())),
        };
        self.graph.forward(params);
        Ok(self.graph.activation(cost)[0])
    }

    /// Forward pass of an inference window.
    pub fn infer(&mut self, params: &Params) -> Result<()> {
        if self.mode != Mode::Infer {
            return Err(TextgenError::InvalidConfig("not an inference window".to_string()));
        }
        self.graph.forward(params);
        Ok(())
    }

    /// Temperature-scaled output distribution of `step` after `infer`.
    pub fn probabilities(&self, step: usize) -> Result<&[f32]> {
        self.check_step(step)?;
        let t = self.outputs.get(step).copied().ok_or_else(|| {
            TextgenError::InvalidConfig("only inference windows produce distributions".to_string())
        })?;
        Ok(self.graph.activation(t))
    }

    /// Sets the inverse temperature applied to logits (inference windows only).
    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        if !(temperature > 0.0 && temperature.is_finite()) {
            return Err(TextgenError::InvalidConfig(format!("temperature must be positive, got {}", temperature)));
        }
        self.graph.set(self.temperature, &[1.0 / temperature])
    }

    // ------------------------------------------------------------------
    // State transfer
    // ------------------------------------------------------------------

    /// Transfers the last step's recurrent state into the first step's
    /// previous-state slots.
    ///
    /// Pre: the window has been evaluated since its inputs were last bound.
    /// Post: every previous-state slot equals the matching final-step state, so
    /// the next window continues the recurrence where this one stopped.
    pub fn carry_state(&mut self) {
        for (&from, &to) in self.state_out.iter().zip(&self.state_in) {
            self.graph.copy_into_leaf(from, to);
        }
    }

    /// Zeroes the previous-state slots.
    pub fn reset_state(&mut self) {
        for &t in &self.state_in {
            self.graph.leaf_mut(t).iter_mut().for_each(|x| *x = 0.0);
        }
    }

    pub fn initial_state(&self) -> RecurrentState {
        RecurrentState { slots: self.state_in.iter().map(|&t| self.graph.activation(t).to_vec()).collect() }
    }

    /// State produced by the last step of the most recent evaluation.
    pub fn final_state(&self) -> RecurrentState {
        RecurrentState { slots: self.state_out.iter().map(|&t| self.graph.activation(t).to_vec()).collect() }
    }

    pub fn set_state(&mut self, state: &RecurrentState) -> Result<()> {
        if state.slots.len() != self.state_in.len() {
            return Err(TextgenError::ShapeMismatch { expected: self.state_in.len(), actual: state.slots.len() });
        }
        for (&t, slot) in self.state_in.iter().zip(&state.slots) {
            self.graph.set(t, slot)?;
        }
        Ok(())
    }
}
