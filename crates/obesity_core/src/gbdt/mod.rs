//! Fixed-point gradient boosted tree ensembles
//!
//! - `tree`: integer-only nodes and traversal (`feature <= threshold` goes left)
//! - `model`: the multiclass [`Booster`], softmax probabilities and hashing
//!
//! All three training strategies produce the same `Booster` format; they
//! differ only in how trees are grown.

pub mod model;
pub mod tree;

pub use model::{
    argmax_level, from_fixed, softmax, to_fixed, tree_contribution, Booster, ModelError,
    BOOSTER_VERSION, SCALE,
};
pub use tree::{Node, Tree};
