// ============================================================================
// PARAMETER STORAGE
// One flat weight vector and its gradient; layers and graphs refer to slices
// of it through `ParamView`s and never own a copy.
// ============================================================================

use std::ops::Range;

use rand::Rng;

/// A `[rows, cols]` matrix living at `offset` in the flat parameter vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamView {
    pub offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl ParamView {
    pub fn len(&self) -> usize { self.rows * self.cols }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn range(&self) -> Range<usize> { self.offset..self.offset + self.len() }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Init {
    /// Scaled normal, `sqrt(2 / (rows + cols))`.
    Normal,
    Constant(f32),
}

/// Hands out consecutive views while a network is being laid out.
#[derive(Debug, Default)]
pub struct ParamLayout {
    entries: Vec<(ParamView, Init)>,
    len: usize,
}

impl ParamLayout {
    pub fn new() -> Self { Self::default() }

    pub fn alloc(&mut self, rows: usize, cols: usize, init: Init) -> ParamView {
        let view = ParamView { offset: self.len, rows, cols };
        self.len += view.len();
        self.entries.push((view, init));
        view
    }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn entries(&self) -> &[(ParamView, Init)] { &self.entries }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub data: Vec<f32>,
    pub grad: Vec<f32>,
}

impl Params {
    pub fn zeros(n: usize) -> Self {
        Params { data: vec![0.0; n], grad: vec![0.0; n] }
    }

    pub fn len(&self) -> usize { self.data.len() }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn zero_grad(&mut self) {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn view(&self, v: ParamView) -> &[f32] { &self.data[v.range()] }

    /// Fills every view of `layout` according to its `Init`.
    pub fn initialize<R: Rng + ?Sized>(&mut self, layout: &ParamLayout, rng: &mut R) {
        for &(view, init) in layout.entries() {
            let dst = &mut self.data[view.range()];
            match init {
                Init::Normal => {
                    let scale = (2.0 / (view.rows + view.cols) as f32).sqrt();
                    dst.copy_from_slice(&rand_normal(view.len(), scale, rng));
                }
                Init::Constant(c) => dst.iter_mut().for_each(|x| *x = c),
            }
        }
    }
}

pub fn rand_normal<R: Rng + ?Sized>(n: usize, scale: f32, rng: &mut R) -> Vec<f32> {
    (0..n).map(|_| {
        let u1: f32 = rng.gen::<f32>().max(1e-10);
        let u2: f32 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos() * scale
    }).collect()
}
