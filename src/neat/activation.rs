use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

/// Element-wise functions a node applies to its summed input.
///
/// Hidden nodes each carry their own activation, picked at random when the
/// node is created and re-rolled by node mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Activation {
    #[default]
    Identity,
    Sigmoid,
    Tanh,
    ReLU,
    LeakyReLU,
    Sine,
    Cosine,
    Gaussian,
    Abs,
    Step,
}

impl Activation {
    pub const ALL: [Activation; 10] = [
        Activation::Identity,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::ReLU,
        Activation::LeakyReLU,
        Activation::Sine,
        Activation::Cosine,
        Activation::Gaussian,
        Activation::Abs,
        Activation::Step,
    ];

    /// NaN propagates unchanged; infinities map to the function's limit where one exists.
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }

        match self {
            Activation::Identity => x,
            Activation::Sigmoid => {
                let clamped = x.clamp(-700.0, 700.0);
                1.0 / (1.0 + (-clamped).exp())
            }
            Activation::Tanh => x.tanh(),
            Activation::ReLU => x.max(0.0),
            Activation::LeakyReLU => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
            Activation::Sine => {
                if x.is_infinite() {
                    0.0
                } else {
                    x.sin()
                }
            }
            Activation::Cosine => {
                if x.is_infinite() {
                    0.0
                } else {
                    x.cos()
                }
            }
            Activation::Gaussian => {
                if x.abs() > 38.0 {
                    0.0
                } else {
                    (-x * x).exp()
                }
            }
            Activation::Abs => x.abs(),
            Activation::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Uniform pick from `choices`, falling back to the full set when it is empty.
    pub fn random<R: Rng>(rng: &mut R, choices: &[Activation]) -> Activation {
        let pool = if choices.is_empty() { &Activation::ALL[..] } else { choices };
        pool.choose(rng).copied().unwrap_or_default()
    }
}
