// ============================================================================
// MINI-BATCHES + GRADIENT ACCUMULATION
// A mini-batch at `cursor` covers B back-to-back windows of T inputs at
// `cursor + b*T`. The last window also reads one trailing target, so a
// mini-batch fits iff `cursor + T*B < L`; the tail of an epoch is skipped.
// ============================================================================

use rand::Rng;
use tracing::debug;

use crate::error::{Result, TextgenError};
use crate::ops::{all_finite, vec_add_inplace, vec_scale_inplace};
use crate::params::Params;
use crate::unroll::Unrolled;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochPlan {
    pub batches: usize,
    /// Input positions left unused at the end of the epoch.
    pub tail: usize,
}

/// Yields mini-batch start positions `0, T·B, 2·T·B, …` while a batch fits.
#[derive(Clone, Debug)]
pub struct Cursors {
    next: usize,
    stride: usize,
    len: usize,
}

impl Iterator for Cursors {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next + self.stride >= self.len { return None; }
        let c = self.next;
        self.next += self.stride;
        Some(c)
    }
}

/// Sum of per-window gradients, divided by the window count on `average`.
#[derive(Clone, Debug)]
pub struct GradientAccumulator {
    sum: Vec<f32>,
    count: usize,
}

impl GradientAccumulator {
    pub fn new(n: usize) -> Self {
        GradientAccumulator { sum: vec![0.0; n], count: 0 }
    }

    pub fn add(&mut self, grad: &[f32]) -> Result<()> {
        if grad.len() != self.sum.len() {
            return Err(TextgenError::ShapeMismatch { expected: self.sum.len(), actual: grad.len() });
        }
        vec_add_inplace(&mut self.sum, grad);
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize { self.count }

    /// Divides the running sum by the number of added gradients.
    pub fn average(&mut self) -> &[f32] {
        if self.count > 0 {
            vec_scale_inplace(&mut self.sum, 1.0 / self.count as f32);
            self.count = 1;
        }
        &self.sum
    }

    pub fn clear(&mut self) {
        self.sum.iter_mut().for_each(|x| *x = 0.0);
        self.count = 0;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchCost {
    /// Σ window mean cost · T.
    pub cost_sum: f32,
    pub symbols: usize,
}

pub struct Batcher {
    unroll: usize,
    batch_size: usize,
    accumulator: GradientAccumulator,
}

impl Batcher {
    pub fn new(unroll: usize, batch_size: usize, n_params: usize) -> Result<Self> {
        if unroll == 0 || batch_size == 0 {
            return Err(TextgenError::InvalidConfig(format!(
                "unroll ({}) and batch size ({}) must be positive", unroll, batch_size)));
        }
        Ok(Batcher { unroll, batch_size, accumulator: GradientAccumulator::new(n_params) })
    }

    /// Input symbols consumed by one mini-batch.
    pub fn stride(&self) -> usize { self.unroll * self.batch_size }

    pub fn plan(&self, len: usize) -> EpochPlan {
        let usable = len.saturating_sub(1);
        EpochPlan { batches: usable / self.stride(), tail: usable % self.stride() }
    }

    pub fn cursors(&self, len: usize) -> Cursors {
        Cursors { next: 0, stride: self.stride(), len }
    }

    fn check_fits(&self, symbols: &[u8], cursor: usize) -> Result<()> {
        let needed = cursor + self.stride() + 1;
        if needed > symbols.len() {
            return Err(TextgenError::CorpusTooShort { len: symbols.len(), needed });
        }
        Ok(())
    }

    /// Averaged gradient of the last `run`.
    pub fn gradient(&self) -> &[f32] { &self.accumulator.sum }

    /// Evaluates the `B` windows of the mini-batch at `cursor`, carrying state
    /// from each window into the next, and leaves their mean gradient in
    /// `gradient()`.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        window: &mut Unrolled,
        params: &mut Params,
        symbols: &[u8],
        cursor: usize,
        epoch: usize,
        rng: &mut R,
    ) -> Result<BatchCost> {
        self.check_fits(symbols, cursor)?;
        let t = self.unroll;
        self.accumulator.clear();
        let mut cost = BatchCost::default();
        for b in 0..self.batch_size {
            let offset = cursor + b * t;
            window.bind_window(&symbols[offset..offset + t + 1])?;
            let c = window.eval(params, rng)?;
            if !c.is_finite() {
                return Err(TextgenError::NonFiniteCost { epoch, cost: c });
            }
            cost.cost_sum += c * t as f32;
            cost.symbols += t;
            self.accumulator.add(&params.grad)?;
            window.carry_state();
        }
        if !all_finite(self.accumulator.average()) {
            return Err(TextgenError::NonFiniteGradient { epoch });
        }
        debug!(cursor, cost = cost.cost_sum / cost.symbols as f32, "mini-batch");
        Ok(cost)
    }

    /// Forward-only counterpart of `run`.
    pub fn run_cost(&self, window: &mut Unrolled, params: &Params, symbols: &[u8], cursor: usize) -> Result<BatchCost> {
        self.check_fits(symbols, cursor)?;
        let t = self.unroll;
        let mut cost = BatchCost::default();
        for b in 0..self.batch_size {
            let offset = cursor + b * t;
            window.bind_window(&symbols[offset..offset + t + 1])?;
            cost.cost_sum += window.eval_cost(params)? * t as f32;
            cost.symbols += t;
            window.carry_state();
        }
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKind;
    use crate::network::{Network, NetworkConfig};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_plan_discards_tail() {
        let batcher = Batcher::new(10, 3, 0).unwrap();
        assert_eq!(batcher.plan(100), EpochPlan { batches: 3, tail: 9 });
        assert_eq!(batcher.cursors(100).collect::<Vec<_>>(), vec![0, 30, 60]);
    }

    #[test]
    fn test_plan_edges() {
        let batcher = Batcher::new(4, 2, 0).unwrap();
        // exactly T·B inputs plus one target
        assert_eq!(batcher.plan(9), EpochPlan { batches: 1, tail: 0 });
        assert_eq!(batcher.cursors(9).count(), 1);
        assert_eq!(batcher.plan(8), EpochPlan { batches: 0, tail: 7 });
        assert_eq!(batcher.cursors(8).count(), 0);
        assert_eq!(batcher.plan(0).batches, 0);
        for len in 0..50 {
            assert_eq!(batcher.plan(len).batches, batcher.cursors(len).count());
        }
    }

    #[test]
    fn test_batcher_rejects_zero() {
        assert!(Batcher::new(0, 3, 1).is_err());
        assert!(Batcher::new(3, 0, 1).is_err());
    }

    #[test]
    fn test_accumulator_sum_then_divide() {
        let mut acc = GradientAccumulator::new(3);
        acc.add(&[1.0, 2.0, 3.0]).unwrap();
        acc.add(&[3.0, 0.0, -3.0]).unwrap();
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.average(), &[2.0, 1.0, 0.0]);
        acc.clear();
        assert_eq!(acc.average(), &[0.0, 0.0, 0.0]);
        assert!(acc.add(&[1.0]).is_err());
    }

    #[test]
    fn test_run_averages_per_window_gradients() {
        let config = NetworkConfig { cell: CellKind::Gru, n_in: 3, n_hidden: 5, n_layers: 1, dropout: 0.0 };
        let mut net = Network::new(config, &mut ChaCha8Rng::seed_from_u64(12)).unwrap();
        let symbols: Vec<u8> = (0..40).map(|i| (i * 7 % 3) as u8).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let mut batcher = Batcher::new(4, 3, net.n_params()).unwrap();
        let mut window = net.unroll(4).unwrap();
        let cost = batcher.run(&mut window, net.params_mut(), &symbols, 0, 1, &mut rng).unwrap();
        assert_eq!(cost.symbols, 12);
        let averaged = batcher.gradient().to_vec();

        let mut single = net.unroll(4).unwrap();
        let mut expected = vec![0.0f32; net.n_params()];
        let mut expected_cost = 0.0;
        for b in 0..3 {
            single.bind_window(&symbols[b * 4..b * 4 + 5]).unwrap();
            expected_cost += single.eval(net.params_mut(), &mut rng).unwrap() * 4.0;
            for (e, g) in expected.iter_mut().zip(net.gradients()) { *e += g / 3.0; }
            single.carry_state();
        }
        assert!((cost.cost_sum - expected_cost).abs() < 1e-4);
        for (a, e) in averaged.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-5, "{} vs {}", a, e);
        }
    }

    #[test]
    fn test_cursor_past_last_batch_is_an_error() {
        let config = NetworkConfig { cell: CellKind::Rnn, n_in: 3, n_hidden: 4, n_layers: 1, dropout: 0.0 };
        let mut net = Network::new(config, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
        let symbols: Vec<u8> = (0..25).map(|i| (i % 3) as u8).collect();
        let mut batcher = Batcher::new(4, 3, net.n_params()).unwrap();
        let mut window = net.unroll(4).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        // 12 inputs + 1 target from cursor 12 reach index 24, the last symbol
        assert!(batcher.run(&mut window, net.params_mut(), &symbols, 12, 1, &mut rng).is_ok());
        assert!(matches!(batcher.run(&mut window, net.params_mut(), &symbols, 13, 1, &mut rng),
            Err(TextgenError::CorpusTooShort { len: 25, needed: 26 })));

        let mut eval = net.build(4, crate::unroll::Mode::Eval).unwrap();
        assert!(matches!(batcher.run_cost(&mut eval, net.params(), &symbols, 24),
            Err(TextgenError::CorpusTooShort { len: 25, needed: 37 })));
    }
}
