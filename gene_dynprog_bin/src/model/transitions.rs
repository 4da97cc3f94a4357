use crate::model::{Error, Result};
use ndarray::{Array2, ArrayView2};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
    pub segment_id: usize,
}

impl Transition {
    pub fn new(from: usize, to: usize, weight: f64) -> Transition {
        Transition { from, to, weight, segment_id: 0 }
    }

    pub fn with_segment_id(mut self, segment_id: usize) -> Transition {
        self.segment_id = segment_id;
        self
    }
}

/// One incoming edge of a target state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionEdge {
    pub from: usize,
    pub weight: f64,
    pub segment_id: usize,
}

/// Sparse per-target predecessor lists, mirrored into dense `[from, to]` matrices.
#[derive(Clone, Debug)]
pub struct TransitionTable {
    num_states: usize,
    forward: Vec<Vec<TransitionEdge>>,
    weights: Array2<f64>,
    segment_ids: Array2<usize>,
    allowed: Array2<bool>,
    max_segment_id: usize,
}

impl TransitionTable {
    pub fn empty(num_states: usize) -> TransitionTable {
        TransitionTable {
            num_states,
            forward: vec![Vec::new(); num_states],
            weights: Array2::zeros((num_states, num_states)),
            segment_ids: Array2::zeros((num_states, num_states)),
            allowed: Array2::from_elem((num_states, num_states), false),
            max_segment_id: 0,
        }
    }

    /// Predecessors of each target keep the order in which they appear in `transitions`.
    pub fn new(num_states: usize, transitions: &[Transition]) -> Result<TransitionTable> {
        let mut table = TransitionTable::empty(num_states);

        for trans in transitions.iter() {
            if trans.from >= num_states {
                return Err(Error::StateOutOfRange("transition source", trans.from, num_states));
            }
            if trans.to >= num_states {
                return Err(Error::StateOutOfRange("transition target", trans.to, num_states));
            }
            if !trans.weight.is_finite() && trans.weight != f64::NEG_INFINITY {
                return Err(Error::InvalidValue(format!(
                    "Transition {} -> {} has weight {}",
                    trans.from, trans.to, trans.weight
                )));
            }
            if table.allowed[[trans.from, trans.to]] {
                return Err(Error::DuplicateValue(format!("Transition {} -> {}", trans.from, trans.to)));
            }

            table.allowed[[trans.from, trans.to]] = true;
            table.weights[[trans.from, trans.to]] = trans.weight;
            table.segment_ids[[trans.from, trans.to]] = trans.segment_id;
            table.max_segment_id = table.max_segment_id.max(trans.segment_id);

            table.forward[trans.to].push(TransitionEdge {
                from: trans.from,
                weight: trans.weight,
                segment_id: trans.segment_id,
            });
        }

        Ok(table)
    }

    /// Rows of `from, to, weight[, segment_id]`.
    pub fn from_trans_matrix(num_states: usize, a_trans: ArrayView2<f64>) -> Result<TransitionTable> {
        let cols = a_trans.ncols();
        if cols != 3 && cols != 4 {
            return Err(Error::MismatchedDimensions("transition matrix columns", cols, 4));
        }

        let mut transitions = Vec::with_capacity(a_trans.nrows());
        for row in a_trans.rows() {
            let from = matrix_index(row[0], "transition source")?;
            let to = matrix_index(row[1], "transition target")?;
            let segment_id = if cols == 4 { matrix_index(row[3], "segment id")? } else { 0 };

            transitions.push(Transition::new(from, to, row[2]).with_segment_id(segment_id));
        }

        TransitionTable::new(num_states, &transitions)
    }

    pub fn get_num_states(&self) -> usize { self.num_states }

    pub fn get_max_segment_id(&self) -> usize { self.max_segment_id }

    pub fn predecessors(&self, to: usize) -> &[TransitionEdge] { &self.forward[to] }

    pub fn is_allowed(&self, from: usize, to: usize) -> bool { self.allowed[[from, to]] }

    pub fn weight(&self, from: usize, to: usize) -> f64 { self.weights[[from, to]] }

    pub fn segment_id(&self, from: usize, to: usize) -> usize { self.segment_ids[[from, to]] }

    pub fn iter(&self) -> impl Iterator<Item = Transition> + '_ {
        self.forward.iter().enumerate().flat_map(|(to, edges)| {
            edges.iter().map(move |e| Transition { from: e.from, to, weight: e.weight, segment_id: e.segment_id })
        })
    }

    pub fn len(&self) -> usize {
        self.forward.iter().map(|edges| edges.len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

fn matrix_index(value: f64, what: &str) -> Result<usize> {
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(Error::InvalidValue(format!("{} must be a non-negative integer, found {}", what, value)));
    }
    Ok(value as usize)
}
