use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::error::{NeatError, NeatResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSpaceKind {
    Continuous,
    Discrete,
}

/// Shape of a genome's output layer.
///
/// Continuous spaces have one output per action dimension. Discrete spaces are
/// split into branches, each branch choosing one of `branches[i]` options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSpace {
    Continuous { size: usize },
    Discrete { branches: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Continuous(Vec<f64>),
    Discrete(Vec<usize>),
}

impl ActionSpace {
    pub fn continuous(size: usize) -> ActionSpace {
        ActionSpace::Continuous { size }
    }

    pub fn discrete(branches: Vec<usize>) -> ActionSpace {
        ActionSpace::Discrete { branches }
    }

    pub fn kind(&self) -> ActionSpaceKind {
        match self {
            ActionSpace::Continuous { .. } => ActionSpaceKind::Continuous,
            ActionSpace::Discrete { .. } => ActionSpaceKind::Discrete,
        }
    }

    /// Number of output nodes a genome needs for this space.
    pub fn n_outputs(&self) -> usize {
        match self {
            ActionSpace::Continuous { size } => *size,
            ActionSpace::Discrete { branches } => branches.iter().sum(),
        }
    }

    pub fn validate(&self) -> NeatResult<()> {
        match self {
            ActionSpace::Continuous { size: 0 } => Err(NeatError::InvalidActionSpace("continuous space has no outputs".into())),
            ActionSpace::Discrete { branches } if branches.is_empty() => Err(NeatError::InvalidActionSpace("discrete space has no branches".into())),
            ActionSpace::Discrete { branches } if branches.contains(&0) => Err(NeatError::InvalidActionSpace(format!("discrete branch of size 0 in {:?}", branches))),
            _ => Ok(()),
        }
    }

    /// `tanh` of every raw output.
    pub fn decode_continuous(&self, raw: &[f64]) -> NeatResult<Vec<f64>> {
        if self.kind() != ActionSpaceKind::Continuous {
            return Err(NeatError::ActionSpaceMismatch {
                requested: ActionSpaceKind::Continuous,
                actual: self.kind(),
            });
        }
        Ok(raw.iter().map(|x| x.tanh()).collect())
    }

    /// Arg-max of the softmax within each branch.
    pub fn decode_discrete(&self, raw: &[f64]) -> NeatResult<Vec<usize>> {
        let branches = match self {
            ActionSpace::Discrete { branches } => branches,
            ActionSpace::Continuous { .. } => {
                return Err(NeatError::ActionSpaceMismatch {
                    requested: ActionSpaceKind::Discrete,
                    actual: ActionSpaceKind::Continuous,
                })
            }
        };

        let mut offset = 0;
        let mut res = Vec::with_capacity(branches.len());
        for &size in branches {
            let start = std::cmp::min(offset, raw.len());
            let end = std::cmp::min(offset + size, raw.len());
            let probs = softmax(&raw[start..end]);
            let choice = probs.iter().position_max_by(|a, b| a.total_cmp(b)).unwrap_or(0);
            res.push(choice);
            offset += size;
        }
        Ok(res)
    }

    pub fn decode(&self, raw: &[f64]) -> NeatResult<Action> {
        match self.kind() {
            ActionSpaceKind::Continuous => self.decode_continuous(raw).map(Action::Continuous),
            ActionSpaceKind::Discrete => self.decode_discrete(raw).map(Action::Discrete),
        }
    }
}

/// Numerically stable softmax. Returns an empty vector for empty input.
pub fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        let n = values.len() as f64;
        return values.iter().map(|_| 1. / n).collect();
    }
    let exps = values.iter().map(|v| (v - max).exp()).collect_vec();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
