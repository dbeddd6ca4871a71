//! Binary solvers consumed by the classifier ensembles
//!
//! The Sequential Minimal Optimization (SMO) solver trains one linear binary
//! machine; Platt scaling turns its decision values into probabilities.

pub mod platt;
pub mod smo;

pub use self::platt::*;
pub use self::smo::*;
