//! Assigns an implementation type to every expression in the tree. This is
//! the only pass that decides physical representation; the rule it enforces
//! is that a sequence of tuples is always stored as a tuple of sequences.

use std::rc::Rc;

use hashbrown::HashMap;
use tracing::debug;

use crate::{
    error::CompileResult,
    middle::{
        ast::{
            Expression, Suite,
            rewrite::{self, Rewriter},
        },
        ctype::{CType, CTypeKind},
        ty::{Type, TypeKind},
    },
};

/// Converts source types to implementation types, remembering every result
/// so that equal source types always map to the same allocation
#[derive(Debug, Default)]
pub struct TypeConverter {
    cache: HashMap<Type, CType>,
}

impl TypeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&mut self, ty: &Type) -> CType {
        if let Some(converted) = self.cache.get(ty) {
            return converted.clone();
        }

        let converted = match &**ty {
            TypeKind::Named { name, parameters } => match ty.scalar_kind() {
                Some(kind) => CType::scalar(kind),
                None => CType::monotype(*name, parameters.iter().map(|p| self.convert(p))),
            },
            TypeKind::Sequence(element) => {
                let element = self.convert(element);

                match &*element {
                    CTypeKind::Tuple(fields) => {
                        CType::zipped_sequence(CType::tuple(fields.iter().map(sequence_of)))
                    }
                    _ => CType::sequence(element.clone()),
                }
            }
            TypeKind::Tuple(fields) => CType::tuple(fields.iter().map(|f| self.convert(f))),
            TypeKind::Function { parameters, result } => {
                let result = self.convert(result);

                CType::function(parameters.iter().map(|p| self.convert(p)), result)
            }
            TypeKind::Polytype {
                variables,
                monotype,
            } => {
                let monotype = self.convert(monotype);

                CType::polytype(variables.iter().map(|v| self.convert(v)), monotype)
            }
        };

        self.cache.insert(ty.clone(), converted.clone());
        converted
    }
}

/// The sequence form of an already converted field. A tuple field turns into a
/// nested zipped sequence so the layout stays columnar all the way down.
fn sequence_of(field: &CType) -> CType {
    match &**field {
        CTypeKind::Tuple(inner) => CType::zipped_sequence(CType::tuple(inner.iter().map(sequence_of))),
        _ => CType::sequence(field.clone()),
    }
}

/// Converts a single source type without sharing a cache
pub fn convert_type(ty: &Type) -> CType {
    TypeConverter::new().convert(ty)
}

impl Rewriter for TypeConverter {
    fn rewrite_expression(&mut self, expression: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        let walked = rewrite::walk_expression(self, expression)?;
        let ctype = self.convert(&walked.ty);

        if walked.ctype.as_ref() == Some(&ctype) {
            return Ok(walked);
        }

        Ok(Expression::new(walked.kind.clone(), walked.ty.clone(), Some(ctype)))
    }
}

pub fn type_convert(module: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
    let mut converter = TypeConverter::new();
    let converted = rewrite::walk_module(&mut converter, module)?;

    debug!(distinct_types = converter.cache.len(), "type conversion finished");

    Ok(converted)
}

/// Whether every expression in the tree carries an implementation type
pub fn is_fully_typed(module: &Rc<Suite>) -> bool {
    struct Checker {
        missing: bool,
    }

    impl Rewriter for Checker {
        fn rewrite_expression(
            &mut self,
            expression: &Rc<Expression>,
        ) -> CompileResult<Rc<Expression>> {
            if expression.ctype.is_none() {
                self.missing = true;
            }

            rewrite::walk_expression(self, expression)
        }
    }

    let mut checker = Checker { missing: false };

    rewrite::walk_module(&mut checker, module).is_ok() && !checker.missing
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::primitive::ScalarKind;

    fn float() -> Type {
        Type::scalar(ScalarKind::Float32)
    }

    fn int() -> Type {
        Type::scalar(ScalarKind::Int32)
    }

    #[test]
    fn scalars_use_fixed_types() {
        for (name, expected) in [
            ("Int32", "int"),
            ("Int64", "long"),
            ("Uint32", "unsigned int"),
            ("Uint64", "unsigned long"),
            ("Float32", "float"),
            ("Float64", "double"),
            ("Bool", "bool"),
            ("Void", "void"),
        ] {
            assert_eq!(convert_type(&Type::named(name)).to_string(), expected);
        }
    }

    #[test]
    fn unknown_monotypes_pass_through() {
        let ty = Type::parametrized("Matrix", [float()]);

        assert_eq!(
            convert_type(&ty),
            CType::monotype("Matrix".into(), [CType::scalar(ScalarKind::Float32)])
        );
    }

    #[test]
    fn sequences_of_tuples_are_zipped() {
        let ty = Type::sequence(Type::tuple([float(), float()]));

        assert_eq!(
            convert_type(&ty).to_string(),
            "Zip(Tuple(Seq(float), Seq(float)))"
        );
    }

    #[test]
    fn nested_tuples_stay_columnar() {
        let ty = Type::sequence(Type::tuple([int(), Type::tuple([float(), float()])]));

        assert_eq!(
            convert_type(&ty).to_string(),
            "Zip(Tuple(Seq(int), Zip(Tuple(Seq(float), Seq(float)))))"
        );
    }

    #[test]
    fn bare_tuples_are_not_zipped() {
        let ty = Type::tuple([Type::sequence(float()), int()]);

        assert_eq!(convert_type(&ty).to_string(), "Tuple(Seq(float), int)");
    }

    #[test]
    fn functions_and_polytypes_keep_their_shape() {
        let a = Type::named("a");
        let ty = Type::polytype(
            [a.clone()],
            Type::function([Type::sequence(a.clone())], Type::sequence(Type::tuple([a.clone(), int()]))),
        );

        assert_eq!(
            convert_type(&ty).to_string(),
            "Polytype(a, Fn(Tuple(Seq(a)), Zip(Tuple(Seq(a), Seq(int)))))"
        );
    }

    #[test]
    fn conversion_is_memoized() {
        let mut converter = TypeConverter::new();
        let ty = Type::sequence(Type::tuple([float(), int()]));

        let first = converter.convert(&ty);
        let second = converter.convert(&Type::sequence(Type::tuple([float(), int()])));

        assert_eq!(first, second);
        assert!(core::ptr::eq(&*first, &*second));
    }

    #[test]
    fn every_expression_gets_a_ctype() {
        let xs = Expression::name("xs".into(), Type::sequence(float()), None);
        let module = Suite::new(vec![crate::middle::ast::Statement::ret(Expression::tuple(
            vec![xs.clone(), xs],
            Type::tuple([Type::sequence(float()), Type::sequence(float())]),
            None,
        ))]);

        assert!(!is_fully_typed(&module));

        let converted = type_convert(&module).expect("conversion never fails");

        assert!(is_fully_typed(&converted));

        // A second run finds nothing to do
        let again = type_convert(&converted).expect("conversion never fails");
        assert!(Rc::ptr_eq(&converted, &again));
    }
}
