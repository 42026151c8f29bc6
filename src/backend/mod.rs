//! The backend turns the fully lowered tree into C++ source for one of the
//! parallel runtimes. Nothing here changes the tree; every decision about
//! representation and ordering was made by the passes, so printing only has
//! to spell it out.

use strum::{Display, EnumIter, EnumString};

pub mod pretty_print;
pub mod type_printer;

/// The runtime the generated code is compiled against. It only selects the
/// execution tag of sequence types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Target {
    #[default]
    Cuda,
    Omp,
    Tbb,
    Cpp,
}

impl Target {
    pub fn tag(self) -> &'static str {
        match self {
            Target::Cuda => "cuda_tag",
            Target::Omp => "omp_tag",
            Target::Tbb => "tbb_tag",
            Target::Cpp => "cpp_tag",
        }
    }
}
