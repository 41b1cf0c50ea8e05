// ============================================================================
// STATIC TENSOR AUTODIFF GRAPH
// Each node = dense row-major matrix. A graph is built once, then re-evaluated
// as many times as needed: bind leaves, `forward`, `backward`.
// Parameter nodes hold no data of their own; they are views into `Params`.
// ============================================================================

use rand::Rng;

use crate::error::{Result, TextgenError};
use crate::ops::{softmax_into, vec_add_inplace, vec_max};
use crate::params::{ParamView, Params};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TID(usize);

#[derive(Clone, Copy, Debug)]
enum TensorOp {
    /// Bound from outside: inputs, targets, carried state, scalars.
    Leaf,
    Param { offset: usize },
    MatMul { a: TID, b: TID, m: usize, k: usize, n: usize },
    Add { a: TID, b: TID },
    Mul { a: TID, b: TID },
    OneMinus { a: TID },
    Sigmoid { a: TID },
    Tanh { a: TID },
    ScaleBy { a: TID, s: TID },
    Dropout { a: TID, rate: f32 },
    Softmax { a: TID },
    SoftmaxCE { logits: TID, target: TID },
    ScalarDiv { a: TID, n: f32 },
}

struct TensorNode {
    data: Vec<f32>,
    grad: Vec<f32>,
    mask: Vec<f32>,
    rows: usize,
    cols: usize,
    op: TensorOp,
}

impl TensorNode {
    fn len(&self) -> usize { self.rows * self.cols }
}

pub struct Graph {
    nodes: Vec<TensorNode>,
    training: bool,
}

fn value<'a>(nodes: &'a [TensorNode], pdata: &'a [f32], t: TID) -> &'a [f32] {
    let node = &nodes[t.0];
    match node.op {
        TensorOp::Param { offset } => &pdata[offset..offset + node.len()],
        _ => &node.data,
    }
}

fn accumulate(nodes: &mut [TensorNode], pgrad: &mut [f32], t: TID, delta: &[f32]) {
    let node = &mut nodes[t.0];
    match node.op {
        TensorOp::Param { offset } => vec_add_inplace(&mut pgrad[offset..offset + delta.len()], delta),
        // truncation point: nothing flows past a leaf
        TensorOp::Leaf => {}
        _ => vec_add_inplace(&mut node.grad, delta),
    }
}

impl Graph {
    pub fn new(training: bool) -> Self {
        Graph { nodes: Vec::with_capacity(1024), training }
    }

    pub fn is_training(&self) -> bool { self.training }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn shape(&self, t: TID) -> (usize, usize) {
        let n = &self.nodes[t.0];
        (n.rows, n.cols)
    }

    fn push(&mut self, rows: usize, cols: usize, op: TensorOp) -> TID {
        let len = rows * cols;
        let (data, grad) = match op {
            TensorOp::Param { .. } => (Vec::new(), Vec::new()),
            TensorOp::Leaf => (vec![0.0; len], Vec::new()),
            _ => (vec![0.0; len], vec![0.0; len]),
        };
        let mask = match op {
            TensorOp::Dropout { .. } => vec![1.0; len],
            _ => Vec::new(),
        };
        let id = self.nodes.len();
        self.nodes.push(TensorNode { data, grad, mask, rows, cols, op });
        TID(id)
    }

    pub fn leaf(&mut self, rows: usize, cols: usize) -> TID {
        self.push(rows, cols, TensorOp::Leaf)
    }

    pub fn param(&mut self, view: ParamView) -> TID {
        self.push(view.rows, view.cols, TensorOp::Param { offset: view.offset })
    }

    // ------------------------------------------------------------------
    // Builders: record one node each; values appear on `forward`
    // ------------------------------------------------------------------

    pub fn matmul(&mut self, a: TID, b: TID) -> TID {
        let (m, k) = self.shape(a);
        let (kb, n) = self.shape(b);
        debug_assert_eq!(k, kb, "matmul shape [{},{}] @ [{},{}]", m, k, kb, n);
        self.push(m, n, TensorOp::MatMul { a, b, m, k, n })
    }

    pub fn add(&mut self, a: TID, b: TID) -> TID {
        debug_assert_eq!(self.shape(a), self.shape(b));
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::Add { a, b })
    }

    pub fn mul(&mut self, a: TID, b: TID) -> TID {
        debug_assert_eq!(self.shape(a), self.shape(b));
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::Mul { a, b })
    }

    pub fn one_minus(&mut self, a: TID) -> TID {
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::OneMinus { a })
    }

    pub fn sigmoid(&mut self, a: TID) -> TID {
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::Sigmoid { a })
    }

    pub fn tanh_op(&mut self, a: TID) -> TID {
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::Tanh { a })
    }

    /// `a * s` where `s` is a `[1,1]` node.
    pub fn scale_by(&mut self, a: TID, s: TID) -> TID {
        debug_assert_eq!(self.shape(s), (1, 1));
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::ScaleBy { a, s })
    }

    /// Inverted dropout; identity outside training graphs.
    pub fn dropout(&mut self, a: TID, rate: f32) -> TID {
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::Dropout { a, rate })
    }

    pub fn softmax(&mut self, a: TID) -> TID {
        let (r, c) = self.shape(a);
        debug_assert_eq!(r, 1);
        self.push(r, c, TensorOp::Softmax { a })
    }

    /// Cross-entropy of `softmax(logits)` against the distribution bound in `target`.
    pub fn softmax_ce(&mut self, logits: TID, target: TID) -> TID {
        debug_assert_eq!(self.shape(logits), self.shape(target));
        self.push(1, 1, TensorOp::SoftmaxCE { logits, target })
    }

    pub fn scalar_div(&mut self, a: TID, n: f32) -> TID {
        let (r, c) = self.shape(a);
        self.push(r, c, TensorOp::ScalarDiv { a, n })
    }

    // ------------------------------------------------------------------
    // Binding and reading
    // ------------------------------------------------------------------

    /// Overwrites the value of a leaf node.
    pub fn set(&mut self, t: TID, values: &[f32]) -> Result<()> {
        let node = &mut self.nodes[t.0];
        debug_assert!(matches!(node.op, TensorOp::Leaf), "only leaves can be bound");
        if values.len() != node.data.len() {
            return Err(TextgenError::ShapeMismatch { expected: node.data.len(), actual: values.len() });
        }
        node.data.copy_from_slice(values);
        Ok(())
    }

    /// Mutable access to a leaf's storage for in-place binding.
    pub fn leaf_mut(&mut self, t: TID) -> &mut [f32] {
        let node = &mut self.nodes[t.0];
        debug_assert!(matches!(node.op, TensorOp::Leaf), "only leaves can be bound");
        &mut node.data
    }

    pub fn data<'a>(&'a self, t: TID, params: &'a Params) -> &'a [f32] {
        value(&self.nodes, &params.data, t)
    }

    /// Value of a non-parameter node.
    pub fn activation(&self, t: TID) -> &[f32] {
        debug_assert!(!matches!(self.nodes[t.0].op, TensorOp::Param { .. }));
        &self.nodes[t.0].data
    }

    /// Copies the current value of `from` into the leaf `to`.
    pub fn copy_into_leaf(&mut self, from: TID, to: TID) {
        debug_assert!(from.0 != to.0);
        debug_assert!(matches!(self.nodes[to.0].op, TensorOp::Leaf));
        debug_assert!(!matches!(self.nodes[from.0].op, TensorOp::Param { .. }));
        if from.0 < to.0 {
            let (lo, hi) = self.nodes.split_at_mut(to.0);
            hi[0].data.copy_from_slice(&lo[from.0].data);
        } else {
            let (lo, hi) = self.nodes.split_at_mut(from.0);
            lo[to.0].data.copy_from_slice(&hi[0].data);
        }
    }

    /// Draws fresh dropout masks; a no-op for inference graphs.
    pub fn sample_dropout<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if !self.training { return; }
        for node in self.nodes.iter_mut() {
            if let TensorOp::Dropout { rate, .. } = node.op {
                if rate <= 0.0 { continue; }
                let keep = 1.0 / (1.0 - rate);
                for m in node.mask.iter_mut() {
                    *m = if rng.gen::<f32>() < rate { 0.0 } else { keep };
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Forward: nodes are stored in topological order
    // ------------------------------------------------------------------

    pub fn forward(&mut self, params: &Params) {
        let training = self.training;
        let pdata: &[f32] = &params.data;
        for i in 0..self.nodes.len() {
            let (done, rest) = self.nodes.split_at_mut(i);
            let done: &[TensorNode] = done;
            let node = &mut rest[0];
            match node.op {
                TensorOp::Leaf | TensorOp::Param { .. } => {}

                TensorOp::MatMul { a, b, m, k, n } => {
                    let ad = value(done, pdata, a);
                    let bd = value(done, pdata, b);
                    unsafe {
                        matrixmultiply::sgemm(
                            m, k, n,
                            1.0,
                            ad.as_ptr(), k as isize, 1,
                            bd.as_ptr(), n as isize, 1,
                            0.0,
                            node.data.as_mut_ptr(), n as isize, 1,
                        );
                    }
                }

                TensorOp::Add { a, b } => {
                    let (ad, bd) = (value(done, pdata, a), value(done, pdata, b));
                    for ((o, x), y) in node.data.iter_mut().zip(ad).zip(bd) { *o = x + y; }
                }

                TensorOp::Mul { a, b } => {
                    let (ad, bd) = (value(done, pdata, a), value(done, pdata, b));
                    for ((o, x), y) in node.data.iter_mut().zip(ad).zip(bd) { *o = x * y; }
                }

                TensorOp::OneMinus { a } => {
                    for (o, x) in node.data.iter_mut().zip(value(done, pdata, a)) { *o = 1.0 - x; }
                }

                TensorOp::Sigmoid { a } => {
                    for (o, &x) in node.data.iter_mut().zip(value(done, pdata, a)) {
                        *o = crate::ops::sigmoid(x);
                    }
                }

                TensorOp::Tanh { a } => {
                    for (o, &x) in node.data.iter_mut().zip(value(done, pdata, a)) { *o = x.tanh(); }
                }

                TensorOp::ScaleBy { a, s } => {
                    let sv = value(done, pdata, s)[0];
                    for (o, x) in node.data.iter_mut().zip(value(done, pdata, a)) { *o = x * sv; }
                }

                TensorOp::Dropout { a, .. } => {
                    let ad = value(done, pdata, a);
                    if training {
                        for ((o, x), m) in node.data.iter_mut().zip(ad).zip(&node.mask) { *o = x * m; }
                    } else {
                        node.data.copy_from_slice(ad);
                    }
                }

                TensorOp::Softmax { a } => softmax_into(value(done, pdata, a), &mut node.data),

                TensorOp::SoftmaxCE { logits, target } => {
                    let ld = value(done, pdata, logits);
                    let td = value(done, pdata, target);
                    let mx = vec_max(ld);
                    let lse = ld.iter().map(|&l| (l - mx).exp()).sum::<f32>().ln() + mx;
                    node.data[0] = ld.iter().zip(td).map(|(&l, &t)| t * (lse - l)).sum();
                }

                TensorOp::ScalarDiv { a, n } => {
                    for (o, x) in node.data.iter_mut().zip(value(done, pdata, a)) { *o = x / n; }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Backward: accumulates into node grads and `params.grad`
    // ------------------------------------------------------------------

    /// Reverse pass from the scalar `loss`. Parameter gradients are added to
    /// `params.grad`; callers zero it when a fresh gradient is wanted.
    pub fn backward(&mut self, loss: TID, params: &mut Params) {
        debug_assert_eq!(self.shape(loss), (1, 1));
        let training = self.training;
        for node in self.nodes.iter_mut() {
            node.grad.iter_mut().for_each(|g| *g = 0.0);
        }
        self.nodes[loss.0].grad[0] = 1.0;
        let pdata: &[f32] = &params.data;
        let pgrad: &mut [f32] = &mut params.grad;

        for i in (0..=loss.0).rev() {
            let (done, rest) = self.nodes.split_at_mut(i);
            let node = &rest[0];
            if node.grad.iter().all(|&g| g == 0.0) { continue; }
            let g = &node.grad;

            match node.op {
                TensorOp::Leaf | TensorOp::Param { .. } => {}

                TensorOp::MatMul { a, b, m, k, n } => {
                    let (da, db) = {
                        let ad = value(done, pdata, a);
                        let bd = value(done, pdata, b);
                        // dA = dOut @ B^T
                        let mut da = vec![0.0f32; m * k];
                        // dB = A^T @ dOut
                        let mut db = vec![0.0f32; k * n];
                        unsafe {
                            matrixmultiply::sgemm(
                                m, n, k,
                                1.0,
                                g.as_ptr(), n as isize, 1,
                                bd.as_ptr(), 1, n as isize,
                                0.0,
                                da.as_mut_ptr(), k as isize, 1,
                            );
                            matrixmultiply::sgemm(
                                k, m, n,
                                1.0,
                                ad.as_ptr(), 1, k as isize,
                                g.as_ptr(), n as isize, 1,
                                0.0,
                                db.as_mut_ptr(), n as isize, 1,
                            );
                        }
                        (da, db)
                    };
                    accumulate(done, pgrad, a, &da);
                    accumulate(done, pgrad, b, &db);
                }

                TensorOp::Add { a, b } => {
                    accumulate(done, pgrad, a, g);
                    accumulate(done, pgrad, b, g);
                }

                TensorOp::Mul { a, b } => {
                    let (da, db): (Vec<f32>, Vec<f32>) = {
                        let ad = value(done, pdata, a);
                        let bd = value(done, pdata, b);
                        (g.iter().zip(bd).map(|(g, y)| g * y).collect(),
                         g.iter().zip(ad).map(|(g, x)| g * x).collect())
                    };
                    accumulate(done, pgrad, a, &da);
                    accumulate(done, pgrad, b, &db);
                }

                TensorOp::OneMinus { a } => {
                    let da: Vec<f32> = g.iter().map(|g| -g).collect();
                    accumulate(done, pgrad, a, &da);
                }

                TensorOp::Sigmoid { a } => {
                    let da: Vec<f32> = g.iter().zip(&node.data).map(|(g, s)| g * s * (1.0 - s)).collect();
                    accumulate(done, pgrad, a, &da);
                }

                TensorOp::Tanh { a } => {
                    let da: Vec<f32> = g.iter().zip(&node.data).map(|(g, t)| g * (1.0 - t * t)).collect();
                    accumulate(done, pgrad, a, &da);
                }

                TensorOp::ScaleBy { a, s } => {
                    let (da, ds) = {
                        let ad = value(done, pdata, a);
                        let sv = value(done, pdata, s)[0];
                        let da: Vec<f32> = g.iter().map(|g| g * sv).collect();
                        let ds: f32 = g.iter().zip(ad).map(|(g, x)| g * x).sum();
                        (da, ds)
                    };
                    accumulate(done, pgrad, a, &da);
                    accumulate(done, pgrad, s, &[ds]);
                }

                TensorOp::Dropout { a, .. } => {
                    if training {
                        let da: Vec<f32> = g.iter().zip(&node.mask).map(|(g, m)| g * m).collect();
                        accumulate(done, pgrad, a, &da);
                    } else {
                        accumulate(done, pgrad, a, g);
                    }
                }

                TensorOp::Softmax { a } => {
                    let dot: f32 = g.iter().zip(&node.data).map(|(g, p)| g * p).sum();
                    let da: Vec<f32> = g.iter().zip(&node.data).map(|(g, p)| p * (g - dot)).collect();
                    accumulate(done, pgrad, a, &da);
                }

                TensorOp::SoftmaxCE { logits, target } => {
                    let gv = g[0];
                    let dl = {
                        let ld = value(done, pdata, logits);
                        let td = value(done, pdata, target);
                        let mut probs = vec![0.0f32; ld.len()];
                        softmax_into(ld, &mut probs);
                        let mass: f32 = td.iter().sum();
                        probs.iter().zip(td).map(|(p, t)| gv * (p * mass - t)).collect::<Vec<f32>>()
                    };
                    accumulate(done, pgrad, logits, &dl);
                }

                TensorOp::ScalarDiv { a, n } => {
                    let da: Vec<f32> = g.iter().map(|g| g / n).collect();
                    accumulate(done, pgrad, a, &da);
                }
            }
        }
    }
}
