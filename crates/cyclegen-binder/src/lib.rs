//! Deterministic per-cycle value generation: the [`Combiner`] label space,
//! stateless hashing and [`Binding`] function chains.

pub mod binding;
pub mod combiner;
pub mod error;
pub mod hash;

pub use binding::{Binding, BoundValue};
pub use combiner::Combiner;
pub use error::{BinderError, BinderResult};
pub use hash::{hash_range, hash_u64, hash_unit};
