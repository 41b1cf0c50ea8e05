// ============================================================================
// RMSPROP OPTIMIZER (vectorized)
// ============================================================================

use crate::error::{Result, TextgenError};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RmsPropConfig {
    pub lr: f32,
    pub rho: f32,
    pub eps: f32,
    pub weight_decay: f32,
}

impl Default for RmsPropConfig {
    fn default() -> Self {
        RmsPropConfig { lr: 0.01, rho: 0.9, eps: 1e-6, weight_decay: 0.0 }
    }
}

impl RmsPropConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(TextgenError::InvalidConfig(format!("learning rate must be positive, got {}", self.lr)));
        }
        if !(self.rho > 0.0 && self.rho < 1.0) {
            return Err(TextgenError::InvalidConfig(format!("rho must be in (0, 1), got {}", self.rho)));
        }
        if !(self.weight_decay >= 0.0 && self.weight_decay.is_finite()) {
            return Err(TextgenError::InvalidConfig(format!("weight decay must be non-negative, got {}", self.weight_decay)));
        }
        Ok(())
    }
}

pub struct RmsProp {
    config: RmsPropConfig,
    second_moment: Vec<f32>,
}

impl RmsProp {
    pub fn new(config: RmsPropConfig, n_params: usize) -> Result<Self> {
        config.validate()?;
        Ok(RmsProp { config, second_moment: vec![0.0; n_params] })
    }

    pub fn second_moment(&self) -> &[f32] { &self.second_moment }

    pub fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        let n = self.second_moment.len();
        if params.len() != n || grad.len() != n {
            let actual = if params.len() != n { params.len() } else { grad.len() };
            return Err(TextgenError::ShapeMismatch { expected: n, actual });
        }
        let RmsPropConfig { lr, rho, eps, weight_decay } = self.config;
        for ((p, &g), s) in params.iter_mut().zip(grad).zip(self.second_moment.iter_mut()) {
            let g = g + weight_decay * *p;
            *s = rho * *s + (1.0 - rho) * g * g;
            *p -= lr * g / (*s + eps).sqrt();
        }
        Ok(())
    }
}
