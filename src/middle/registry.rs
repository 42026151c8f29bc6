use hashbrown::HashMap;
use strum::{Display, EnumString};

use crate::{
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{primitive::ScalarKind, ty::Type},
};

/// How a call to a procedure relates to the kernels producing its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Synchronization {
    /// Launches a kernel that reads its aggregate arguments in full, so every
    /// pending argument has to be realized first. The result is complete.
    Forces,
    /// Composes another lazy view over its arguments. The result is pending.
    Propagates,
    /// Scalar or host work that neither forces nor defers anything
    Opaque,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureInfo {
    pub name: InternedSymbol,
    pub signature: Type,
    pub synchronization: Synchronization,
}

/// Known procedure signatures, keyed by name
#[derive(Debug, Clone)]
pub struct Registry {
    procedures: HashMap<InternedSymbol, ProcedureInfo>,
}

/// Scalar operators the frontend lowers infix syntax to
pub const SCALAR_OPERATORS: &[(&str, &str)] = &[
    ("op_add", "+"),
    ("op_sub", "-"),
    ("op_mul", "*"),
    ("op_div", "/"),
    ("op_mod", "%"),
    ("op_eq", "=="),
    ("op_ne", "!="),
    ("op_lt", "<"),
    ("op_le", "<="),
    ("op_gt", ">"),
    ("op_ge", ">="),
    ("op_and", "&&"),
    ("op_or", "||"),
];

/// Infix spelling of a scalar operator procedure
pub fn operator_symbol(name: InternedSymbol) -> Option<&'static str> {
    SCALAR_OPERATORS
        .iter()
        .find(|(op, _)| *op == name.value())
        .map(|(_, symbol)| *symbol)
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let a = Type::named("a");
        let bool_ty = Type::scalar(ScalarKind::Bool);

        for (name, _) in SCALAR_OPERATORS {
            let signature = match *name {
                "op_add" | "op_sub" | "op_mul" | "op_div" | "op_mod" => Type::polytype(
                    [a.clone()],
                    Type::function([a.clone(), a.clone()], a.clone()),
                ),
                "op_and" | "op_or" => {
                    Type::function([bool_ty.clone(), bool_ty.clone()], bool_ty.clone())
                }
                _ => Type::polytype(
                    [a.clone()],
                    Type::function([a.clone(), a.clone()], bool_ty.clone()),
                ),
            };

            registry.insert(InternedSymbol::new(name), signature, Synchronization::Opaque);
        }

        registry.insert(
            InternedSymbol::new("op_not"),
            Type::function([bool_ty.clone()], bool_ty),
            Synchronization::Opaque,
        );

        registry
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        name: InternedSymbol,
        signature: Type,
        synchronization: Synchronization,
    ) {
        self.procedures.insert(
            name,
            ProcedureInfo {
                name,
                signature,
                synchronization,
            },
        );
    }

    pub fn get(&self, name: InternedSymbol) -> Option<&ProcedureInfo> {
        self.procedures.get(&name)
    }

    pub fn contains(&self, name: InternedSymbol) -> bool {
        self.procedures.contains_key(&name)
    }

    /// Like [`Registry::get`], but a missing entry is an error
    pub fn lookup(&self, name: InternedSymbol) -> CompileResult<&ProcedureInfo> {
        self.get(name)
            .ok_or_else(|| CompileError::UnregisteredProcedure(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_operators_are_opaque() {
        let registry = Registry::default();

        for (name, _) in SCALAR_OPERATORS {
            let info = registry.lookup(InternedSymbol::new(name)).expect("registered");
            assert_eq!(info.synchronization, Synchronization::Opaque);
        }

        assert_eq!(operator_symbol(InternedSymbol::new("op_ne")), Some("!="));
    }

    #[test]
    fn missing_procedures_are_fatal() {
        let registry = Registry::empty();

        assert_eq!(
            registry.lookup(InternedSymbol::new("scan")),
            Err(CompileError::UnregisteredProcedure("scan".into()))
        );
        assert_eq!("propagates".parse::<Synchronization>(), Ok(Synchronization::Propagates));
    }
}
