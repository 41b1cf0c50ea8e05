// ============================================================================
// RECURRENT CELLS: vanilla RNN, LSTM, GRU
// A `Layer` is a set of parameter views; `instantiate` binds those views
// into a graph once, and `CellNodes::step` wires one time step.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TextgenError;
use crate::graph::{Graph, TID};
use crate::params::{Init, ParamLayout, ParamView};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Rnn,
    Lstm,
    Gru,
}

impl CellKind {
    fn gates(self) -> usize {
        match self {
            CellKind::Rnn => 1,
            CellKind::Lstm => 4,
            CellKind::Gru => 3,
        }
    }

    /// Number of `[1, hidden]` vectors carried between steps.
    pub fn state_slots(self) -> usize {
        match self {
            CellKind::Lstm => 2,
            CellKind::Rnn | CellKind::Gru => 1,
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CellKind::Rnn => "rnn",
            CellKind::Lstm => "lstm",
            CellKind::Gru => "gru",
        })
    }
}

impl FromStr for CellKind {
    type Err = TextgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rnn" => Ok(CellKind::Rnn),
            "lstm" => Ok(CellKind::Lstm),
            "gru" => Ok(CellKind::Gru),
            other => Err(TextgenError::InvalidConfig(format!("unknown cell type '{}'", other))),
        }
    }
}

/// `x·W + h·U + b`
#[derive(Clone, Copy, Debug)]
struct Gate {
    w: ParamView,
    u: ParamView,
    b: ParamView,
}

#[derive(Clone, Copy, Debug)]
struct GateNodes {
    w: TID,
    u: TID,
    b: TID,
}

impl GateNodes {
    fn pre(&self, g: &mut Graph, x: TID, h: TID) -> TID {
        let wx = g.matmul(x, self.w);
        let uh = g.matmul(h, self.u);
        let s = g.add(wx, uh);
        g.add(s, self.b)
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    kind: CellKind,
    n_hidden: usize,
    gates: Vec<Gate>,
}

impl Layer {
    pub fn new(kind: CellKind, n_in: usize, n_hidden: usize, layout: &mut ParamLayout) -> Self {
        let gates = (0..kind.gates()).map(|gi| {
            // LSTM gate order is i, f, o, g; the forget gate starts open
            let bias = if kind == CellKind::Lstm && gi == 1 { 1.0 } else { 0.0 };
            Gate {
                w: layout.alloc(n_in, n_hidden, Init::Normal),
                u: layout.alloc(n_hidden, n_hidden, Init::Normal),
                b: layout.alloc(1, n_hidden, Init::Constant(bias)),
            }
        }).collect();
        Layer { kind, n_hidden, gates }
    }

    pub fn kind(&self) -> CellKind { self.kind }

    pub fn n_hidden(&self) -> usize { self.n_hidden }

    pub fn state_slots(&self) -> usize { self.kind.state_slots() }

    pub fn instantiate(&self, g: &mut Graph) -> CellNodes {
        let gates = self.gates.iter()
            .map(|gate| GateNodes { w: g.param(gate.w), u: g.param(gate.u), b: g.param(gate.b) })
            .collect();
        CellNodes { kind: self.kind, gates }
    }
}

pub struct CellNodes {
    kind: CellKind,
    gates: Vec<GateNodes>,
}

impl CellNodes {
    /// Wires one step. `prev` holds the layer's carried state (`[h]`, or `[h, c]`
    /// for LSTM); the returned vector has the same layout, `h` first.
    pub fn step(&self, g: &mut Graph, x: TID, prev: &[TID]) -> Vec<TID> {
        debug_assert_eq!(prev.len(), self.kind.state_slots());
        match self.kind {
            CellKind::Rnn => {
                let pre = self.gates[0].pre(g, x, prev[0]);
                vec![g.tanh_op(pre)]
            }

            CellKind::Lstm => {
                let (h_prev, c_prev) = (prev[0], prev[1]);
                let i_pre = self.gates[0].pre(g, x, h_prev);
                let i = g.sigmoid(i_pre);
                let f_pre = self.gates[1].pre(g, x, h_prev);
                let f = g.sigmoid(f_pre);
                let o_pre = self.gates[2].pre(g, x, h_prev);
                let o = g.sigmoid(o_pre);
                let c_pre = self.gates[3].pre(g, x, h_prev);
                let cand = g.tanh_op(c_pre);

                // c = f*c_prev + i*cand; h = o*tanh(c)
                let keep = g.mul(f, c_prev);
                let write = g.mul(i, cand);
                let c = g.add(keep, write);
                let tc = g.tanh_op(c);
                let h = g.mul(o, tc);
                vec![h, c]
            }

            CellKind::Gru => {
                let h_prev = prev[0];
                let z_pre = self.gates[0].pre(g, x, h_prev);
                let z = g.sigmoid(z_pre);
                let r_pre = self.gates[1].pre(g, x, h_prev);
                let r = g.sigmoid(r_pre);

                // h_cand = tanh(x @ Wh + (r*h_prev) @ Uh + bh)
                let rh = g.mul(r, h_prev);
                let h_pre = self.gates[2].pre(g, x, rh);
                let h_cand = g.tanh_op(h_pre);

                // h = (1-z)*h_prev + z*h_cand
                let omz = g.one_minus(z);
                let h_part1 = g.mul(omz, h_prev);
                let h_part2 = g.mul(z, h_cand);
                vec![g.add(h_part1, h_part2)]
            }
        }
    }
}

/// Output projection `h·W + b`.
#[derive(Clone, Copy, Debug)]
pub struct Dense {
    w: ParamView,
    b: ParamView,
}

impl Dense {
    pub fn new(n_in: usize, n_out: usize, layout: &mut ParamLayout) -> Self {
        Dense {
            w: layout.alloc(n_in, n_out, Init::Normal),
            b: layout.alloc(1, n_out, Init::Constant(0.0)),
        }
    }

    pub fn instantiate(&self, g: &mut Graph) -> (TID, TID) {
        (g.param(self.w), g.param(self.b))
    }
}
