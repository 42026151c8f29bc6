use strum::{EnumIter, EnumString, IntoStaticStr};

/// The fixed set of scalar monotypes. Any other named monotype is opaque to
/// the compiler and flows through type conversion unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, IntoStaticStr)]
pub enum ScalarKind {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bool,
    Void,
}

impl ScalarKind {
    /// Spelling of the scalar in generated source
    pub fn c_name(&self) -> &'static str {
        match self {
            ScalarKind::Int32 => "int",
            ScalarKind::Int64 => "long",
            ScalarKind::Uint32 => "unsigned int",
            ScalarKind::Uint64 => "unsigned long",
            ScalarKind::Float32 => "float",
            ScalarKind::Float64 => "double",
            ScalarKind::Bool => "bool",
            ScalarKind::Void => "void",
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.into()
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::Uint32 | ScalarKind::Uint64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }
}

impl core::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source_name())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn scalar_names_round_trip_through_strum() {
        for kind in ScalarKind::iter() {
            assert_eq!(kind.source_name().parse::<ScalarKind>(), Ok(kind));
        }

        assert!("Float16".parse::<ScalarKind>().is_err());
        assert_eq!(ScalarKind::Uint64.c_name(), "unsigned long");
    }
}
