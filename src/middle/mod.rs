//! Everything between reading a typed unit and printing it: the program tree,
//! source and implementation types, the procedure registry and the passes
//! that lower the tree step by step.

pub mod ast;
pub mod ctype;
pub mod environment;
pub mod names;
pub mod passes;
pub mod primitive;
pub mod registry;
pub mod ty;
