//! Zero handling strategies.

pub mod pseudocount;

pub use pseudocount::{add_pseudocount, min_pseudocount, resolve_pseudocount};
