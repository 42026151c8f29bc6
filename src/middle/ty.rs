//! Source types as assigned by the frontend. A type is either a monotype or a
//! polytype quantified over type variables. Type variables are represented as
//! parameterless named monotypes; they only mean something inside the
//! polytype that binds them.

use std::rc::Rc;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::{frontend::intern::InternedSymbol, middle::primitive::ScalarKind};

/// Thin pointer to a shared type kind. Equality is structural.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type(Rc<TypeKind>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Int32, Float64, Point, a
    ///
    /// A named type with optional parameters. Scalars and type variables are
    /// named monotypes without parameters.
    Named {
        name: InternedSymbol,
        parameters: Rc<[Type]>,
    },
    /// [T]
    Sequence(Type),
    /// (T1, T2, ...)
    Tuple(Rc<[Type]>),
    /// fn(T1, T2) -> R
    Function {
        parameters: Rc<[Type]>,
        result: Type,
    },
    /// forall a b. fn(a, b) -> a
    Polytype {
        variables: Rc<[Type]>,
        monotype: Type,
    },
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn scalar(kind: ScalarKind) -> Self {
        Self::named(kind.source_name())
    }

    pub fn named(name: &str) -> Self {
        Self::new(TypeKind::Named {
            name: InternedSymbol::new(name),
            parameters: Rc::new([]),
        })
    }

    pub fn parametrized(name: &str, parameters: impl IntoIterator<Item = Type>) -> Self {
        Self::new(TypeKind::Named {
            name: InternedSymbol::new(name),
            parameters: parameters.into_iter().collect(),
        })
    }

    pub fn sequence(element: Type) -> Self {
        Self::new(TypeKind::Sequence(element))
    }

    pub fn tuple(fields: impl IntoIterator<Item = Type>) -> Self {
        Self::new(TypeKind::Tuple(fields.into_iter().collect()))
    }

    pub fn function(parameters: impl IntoIterator<Item = Type>, result: Type) -> Self {
        Self::new(TypeKind::Function {
            parameters: parameters.into_iter().collect(),
            result,
        })
    }

    pub fn polytype(variables: impl IntoIterator<Item = Type>, monotype: Type) -> Self {
        Self::new(TypeKind::Polytype {
            variables: variables.into_iter().collect(),
            monotype,
        })
    }

    /// Splits a (possibly quantified) function type into its parameter and
    /// result types after matching the parameters against the supplied
    /// argument types. Type variables bound by the match are substituted
    /// everywhere, unbound ones are left in place. Returns `None` when this is
    /// not a function type or the arity or shape of the arguments does not
    /// fit.
    pub fn instantiate(&self, arguments: &[Type]) -> Option<(Vec<Type>, Type)> {
        let (variables, monotype) = match &**self {
            TypeKind::Polytype {
                variables,
                monotype,
            } => (
                variables
                    .iter()
                    .filter_map(|v| v.variable_name())
                    .collect::<Vec<_>>(),
                monotype,
            ),
            _ => (Vec::new(), self),
        };

        let TypeKind::Function { parameters, result } = &**monotype else {
            return None;
        };

        if parameters.len() != arguments.len() {
            return None;
        }

        let mut bindings = HashMap::new();

        for (parameter, argument) in parameters.iter().zip(arguments) {
            if !parameter.bind_variables(argument, &variables, &mut bindings) {
                return None;
            }
        }

        Some((
            parameters
                .iter()
                .map(|p| p.substitute(&bindings))
                .collect(),
            result.substitute(&bindings),
        ))
    }

    fn bind_variables(
        &self,
        concrete: &Type,
        variables: &[InternedSymbol],
        bindings: &mut HashMap<InternedSymbol, Type>,
    ) -> bool {
        if let Some(name) = self.variable_name().filter(|n| variables.contains(n)) {
            // The first occurrence decides; later ones are not checked since
            // the frontend has already unified them
            bindings.entry(name).or_insert_with(|| concrete.clone());
            return true;
        }

        match (&**self, &**concrete) {
            (
                TypeKind::Named {
                    name: a,
                    parameters: ap,
                },
                TypeKind::Named {
                    name: b,
                    parameters: bp,
                },
            ) => {
                a == b
                    && ap.len() == bp.len()
                    && ap
                        .iter()
                        .zip(bp.iter())
                        .all(|(a, b)| a.bind_variables(b, variables, bindings))
            }
            (TypeKind::Sequence(a), TypeKind::Sequence(b)) => {
                a.bind_variables(b, variables, bindings)
            }
            (TypeKind::Tuple(a), TypeKind::Tuple(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|(a, b)| a.bind_variables(b, variables, bindings))
            }
            (
                TypeKind::Function {
                    parameters: ap,
                    result: ar,
                },
                TypeKind::Function {
                    parameters: bp,
                    result: br,
                },
            ) => {
                ap.len() == bp.len()
                    && ap
                        .iter()
                        .zip(bp.iter())
                        .all(|(a, b)| a.bind_variables(b, variables, bindings))
                    && ar.bind_variables(br, variables, bindings)
            }
            _ => false,
        }
    }

    pub fn substitute(&self, bindings: &HashMap<InternedSymbol, Type>) -> Type {
        if bindings.is_empty() {
            return self.clone();
        }

        match &**self {
            TypeKind::Named { name, parameters } if parameters.is_empty() => {
                bindings.get(name).cloned().unwrap_or_else(|| self.clone())
            }
            TypeKind::Named { name, parameters } => Type::new(TypeKind::Named {
                name: *name,
                parameters: parameters.iter().map(|p| p.substitute(bindings)).collect(),
            }),
            TypeKind::Sequence(element) => Type::sequence(element.substitute(bindings)),
            TypeKind::Tuple(fields) => Type::tuple(fields.iter().map(|f| f.substitute(bindings))),
            TypeKind::Function { parameters, result } => Type::function(
                parameters.iter().map(|p| p.substitute(bindings)),
                result.substitute(bindings),
            ),
            TypeKind::Polytype {
                variables,
                monotype,
            } => {
                // Inner quantifiers shadow the outer bindings
                let mut inner = bindings.clone();

                for name in variables.iter().filter_map(|v| v.variable_name()) {
                    inner.remove(&name);
                }

                Type::polytype(variables.iter().cloned(), monotype.substitute(&inner))
            }
        }
    }
}

impl TypeKind {
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            TypeKind::Named { name, parameters } if parameters.is_empty() => {
                name.value().parse().ok()
            }
            _ => None,
        }
    }

    /// Name of a parameterless, non-scalar named type. Inside a polytype these
    /// are the candidates for type variables.
    pub fn variable_name(&self) -> Option<InternedSymbol> {
        match self {
            TypeKind::Named { name, parameters }
                if parameters.is_empty() && self.scalar_kind().is_none() =>
            {
                Some(*name)
            }
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, TypeKind::Sequence(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, TypeKind::Tuple(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, TypeKind::Function { .. } | TypeKind::Polytype { .. })
    }

    /// Whether values of this type contain sequence data somewhere
    pub fn is_aggregate(&self) -> bool {
        match self {
            TypeKind::Sequence(_) => true,
            TypeKind::Tuple(fields) => fields.iter().any(|f| f.is_aggregate()),
            TypeKind::Named { .. } | TypeKind::Function { .. } | TypeKind::Polytype { .. } => {
                false
            }
        }
    }

    pub fn tuple_fields(&self) -> Option<&[Type]> {
        match self {
            TypeKind::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    /// Result type of a function or polytype
    pub fn result_type(&self) -> Option<&Type> {
        match self {
            TypeKind::Function { result, .. } => Some(result),
            TypeKind::Polytype { monotype, .. } => monotype.result_type(),
            _ => None,
        }
    }
}

impl core::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Type").field(&self.0).finish()
    }
}

impl core::ops::Deref for Type {
    type Target = TypeKind;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Repr form: `Seq(Float32)`, `Tuple(Int32, Bool)`, `Fn(Tuple(a), a)`
impl core::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeKind::Named { name, parameters } if parameters.is_empty() => write!(f, "{name}"),
            TypeKind::Named { name, parameters } => {
                write!(f, "{name}({})", parameters.iter().join(", "))
            }
            TypeKind::Sequence(element) => write!(f, "Seq({element})"),
            TypeKind::Tuple(fields) => write!(f, "Tuple({})", fields.iter().join(", ")),
            TypeKind::Function { parameters, result } => {
                write!(f, "Fn(Tuple({}), {result})", parameters.iter().join(", "))
            }
            TypeKind::Polytype {
                variables,
                monotype,
            } => write!(f, "Polytype({}, {monotype})", variables.iter().join(", ")),
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", **self)
    }
}

impl From<Type> for colored::ColoredString {
    fn from(s: Type) -> Self {
        (*s).to_string().into()
    }
}

impl Type {
    pub fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;

        colored::ColoredString::from(self.clone()).yellow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float() -> Type {
        Type::scalar(ScalarKind::Float32)
    }

    #[test]
    fn repr_of_nested_types() {
        let ty = Type::function(
            [Type::sequence(Type::tuple([float(), Type::named("Point")]))],
            Type::scalar(ScalarKind::Bool),
        );

        assert_eq!(ty.to_string(), "Fn(Tuple(Seq(Tuple(Float32, Point))), Bool)");
    }

    #[test]
    fn instantiate_binds_type_variables() {
        let a = Type::named("a");
        let b = Type::named("b");
        let map = Type::polytype(
            [a.clone(), b.clone()],
            Type::function(
                [Type::function([a.clone()], b.clone()), Type::sequence(a.clone())],
                Type::sequence(b.clone()),
            ),
        );

        let (parameters, result) = map
            .instantiate(&[
                Type::function([float()], Type::scalar(ScalarKind::Int32)),
                Type::sequence(float()),
            ])
            .expect("map should instantiate");

        assert_eq!(parameters[1], Type::sequence(float()));
        assert_eq!(result, Type::sequence(Type::scalar(ScalarKind::Int32)));
    }

    #[test]
    fn instantiate_rejects_wrong_arity_and_shape() {
        let add = Type::function([float(), float()], float());

        assert!(add.instantiate(&[float()]).is_none());
        assert!(add.instantiate(&[float(), Type::sequence(float())]).is_none());
        assert!(float().instantiate(&[]).is_none());
    }

    #[test]
    fn aggregates_are_types_holding_sequences() {
        assert!(Type::sequence(float()).is_aggregate());
        assert!(Type::tuple([float(), Type::sequence(float())]).is_aggregate());
        assert!(!Type::tuple([float(), float()]).is_aggregate());
        assert_eq!(float().scalar_kind(), Some(ScalarKind::Float32));
        assert_eq!(Type::named("a").variable_name(), Some(InternedSymbol::new("a")));
    }
}
