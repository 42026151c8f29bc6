//! Implementation types. These mirror source types but describe how a value
//! is laid out physically: plain scalars, views over sequences, zipped
//! (structure of arrays) sequences, owning containers and tuples of fields.

use std::rc::Rc;

use itertools::Itertools;

use crate::{frontend::intern::InternedSymbol, middle::primitive::ScalarKind};

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CType(Rc<CTypeKind>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CTypeKind {
    Scalar(ScalarKind),
    /// A named type the compiler knows nothing about. Also used for type
    /// variables inside polytypes.
    Monotype {
        name: InternedSymbol,
        parameters: Rc<[CType]>,
    },
    /// A view over a sequence of `T`. `T` is never a tuple.
    Sequence(CType),
    /// A sequence of tuples stored as a tuple of per-field sequences. The inner
    /// type is always a [`CTypeKind::Tuple`] of sequence-like types.
    ZippedSequence(CType),
    /// Owning storage for a sequence of `T`
    Container(CType),
    Tuple(Rc<[CType]>),
    Function {
        parameters: Rc<[CType]>,
        result: CType,
    },
    Polytype {
        variables: Rc<[CType]>,
        monotype: CType,
    },
}

impl CType {
    pub fn new(kind: CTypeKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn scalar(kind: ScalarKind) -> Self {
        Self::new(CTypeKind::Scalar(kind))
    }

    pub fn monotype(name: InternedSymbol, parameters: impl IntoIterator<Item = CType>) -> Self {
        Self::new(CTypeKind::Monotype {
            name,
            parameters: parameters.into_iter().collect(),
        })
    }

    pub fn sequence(element: CType) -> Self {
        Self::new(CTypeKind::Sequence(element))
    }

    pub fn zipped_sequence(fields: CType) -> Self {
        Self::new(CTypeKind::ZippedSequence(fields))
    }

    pub fn container(element: CType) -> Self {
        Self::new(CTypeKind::Container(element))
    }

    pub fn tuple(fields: impl IntoIterator<Item = CType>) -> Self {
        Self::new(CTypeKind::Tuple(fields.into_iter().collect()))
    }

    pub fn function(parameters: impl IntoIterator<Item = CType>, result: CType) -> Self {
        Self::new(CTypeKind::Function {
            parameters: parameters.into_iter().collect(),
            result,
        })
    }

    pub fn polytype(variables: impl IntoIterator<Item = CType>, monotype: CType) -> Self {
        Self::new(CTypeKind::Polytype {
            variables: variables.into_iter().collect(),
            monotype,
        })
    }

    /// The owning-storage counterpart of a view type. Sequences become
    /// containers, zipped sequences become a tuple of field containers and
    /// tuples are mapped field by field. Everything else is its own container.
    pub fn container_type(&self) -> CType {
        match &**self {
            CTypeKind::Sequence(element) => CType::container(element.clone()),
            CTypeKind::ZippedSequence(fields) => fields.container_type(),
            CTypeKind::Tuple(fields) => {
                let converted = fields.iter().map(|f| f.container_type()).collect::<Vec<_>>();

                if converted.iter().zip(fields.iter()).all(|(a, b)| a == b) {
                    self.clone()
                } else {
                    CType::tuple(converted)
                }
            }
            CTypeKind::Scalar(_)
            | CTypeKind::Monotype { .. }
            | CTypeKind::Container(_)
            | CTypeKind::Function { .. }
            | CTypeKind::Polytype { .. } => self.clone(),
        }
    }

    /// Whether a value of this type is a view that needs separate owning
    /// storage before it can leave the procedure
    pub fn needs_container(&self) -> bool {
        self.container_type() != *self
    }
}

impl CTypeKind {
    pub fn is_container(&self) -> bool {
        matches!(self, CTypeKind::Container(_))
    }

    pub fn tuple_fields(&self) -> Option<&[CType]> {
        match self {
            CTypeKind::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn result_type(&self) -> Option<&CType> {
        match self {
            CTypeKind::Function { result, .. } => Some(result),
            CTypeKind::Polytype { monotype, .. } => monotype.result_type(),
            _ => None,
        }
    }
}

impl core::fmt::Debug for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CType").field(&self.0).finish()
    }
}

impl core::ops::Deref for CType {
    type Target = CTypeKind;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Repr form, independent of any target: `Seq(float)`,
/// `Zip(Tuple(Seq(int), Seq(float)))`, `Container(float)`
impl core::fmt::Display for CTypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CTypeKind::Scalar(kind) => f.write_str(kind.c_name()),
            CTypeKind::Monotype { name, parameters } if parameters.is_empty() => {
                write!(f, "{name}")
            }
            CTypeKind::Monotype { name, parameters } => {
                write!(f, "{name}({})", parameters.iter().join(", "))
            }
            CTypeKind::Sequence(element) => write!(f, "Seq({element})"),
            CTypeKind::ZippedSequence(fields) => write!(f, "Zip({fields})"),
            CTypeKind::Container(element) => write!(f, "Container({element})"),
            CTypeKind::Tuple(fields) => write!(f, "Tuple({})", fields.iter().join(", ")),
            CTypeKind::Function { parameters, result } => {
                write!(f, "Fn(Tuple({}), {result})", parameters.iter().join(", "))
            }
            CTypeKind::Polytype {
                variables,
                monotype,
            } => write!(f, "Polytype({}, {monotype})", variables.iter().join(", ")),
        }
    }
}

impl core::fmt::Display for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", **self)
    }
}
