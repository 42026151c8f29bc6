//! Lowering compiler for nested data-parallel programs. A typed unit is read
//! by the [`frontend`], lowered by the passes in [`middle::passes`] and
//! printed as C++ source by the [`backend`].

pub mod backend;
pub mod error;
pub mod frontend;
pub mod middle;
