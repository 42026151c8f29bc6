//! Removes tuple structure from bind statements so that every later pass
//! only ever sees a single name on the left of a bind.
//!
//! - `(a, b) = (c, d)` becomes `a = c; b = d`
//! - `(a, b) = f(x)` becomes `_tup0 = f(x); a = get<0>(_tup0); b = get<1>(_tup0)`
//! - `t = (c, d)` becomes `t = make_tuple(c, d)`

use std::rc::Rc;

use tracing::trace;

use crate::{
    error::{CompileError, CompileResult},
    middle::{
        ast::{
            Expression, ExpressionKind, Procedure, Statement, Suite,
            rewrite::{self, Rewriter},
        },
        names::{NameSupply, snippet},
    },
};

#[derive(Debug)]
pub struct TupleBreaker {
    supply: NameSupply,
}

impl Default for TupleBreaker {
    fn default() -> Self {
        Self {
            supply: NameSupply::new("_tup"),
        }
    }
}

impl TupleBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    fn break_bind(
        &mut self,
        lhs: &Rc<Expression>,
        rhs: &Rc<Expression>,
        output: &mut Vec<Rc<Statement>>,
    ) -> CompileResult<()> {
        match (&lhs.kind, &rhs.kind) {
            (ExpressionKind::Tuple(targets), ExpressionKind::Tuple(values)) => {
                if targets.len() != values.len() {
                    return Err(CompileError::ArityMismatch {
                        lhs: targets.len(),
                        rhs: values.len(),
                    });
                }

                for (target, value) in targets.iter().zip(values.iter()) {
                    self.break_bind(target, value, output)?;
                }
            }
            (ExpressionKind::Tuple(targets), _) => {
                // Calls are evaluated exactly once no matter how wide the tuple
                let source = if rhs.is_apply() {
                    let temporary = rhs.renamed(self.supply.next());

                    trace!(temporary = %temporary, value = %rhs, "caching tuple-valued call");

                    output.push(Statement::bind(temporary.clone(), rhs.clone()));
                    temporary
                } else {
                    rhs.clone()
                };

                for (index, target) in targets.iter().enumerate() {
                    let projection = Expression::apply_snippet(
                        snippet::get(index),
                        vec![source.clone()],
                        target.ty.clone(),
                        target.ctype.clone(),
                    );

                    self.break_bind(target, &projection, output)?;
                }
            }
            (_, ExpressionKind::Tuple(values)) => {
                let pack = Expression::apply_snippet(
                    snippet::make_tuple(),
                    values.to_vec(),
                    rhs.ty.clone(),
                    rhs.ctype.clone(),
                );

                output.push(Statement::bind(lhs.clone(), pack));
            }
            _ => output.push(Statement::bind(lhs.clone(), rhs.clone())),
        }

        Ok(())
    }
}

impl Rewriter for TupleBreaker {
    fn rewrite_bind(
        &mut self,
        statement: &Rc<Statement>,
        lhs: &Rc<Expression>,
        rhs: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        if !lhs.is_tuple() && !rhs.is_tuple() {
            return Ok(vec![statement.clone()]);
        }

        let mut output = Vec::new();
        self.break_bind(lhs, rhs, &mut output)?;

        Ok(output)
    }

    fn rewrite_procedure(&mut self, procedure: &Rc<Procedure>) -> CompileResult<Rc<Procedure>> {
        if let Some(argument) = procedure.arguments.iter().find(|a| !a.is_name()) {
            return Err(CompileError::ExpectedName {
                context: "procedure arguments",
                found: argument.to_string(),
            });
        }

        rewrite::walk_procedure(self, procedure)
    }
}

pub fn tuple_break(module: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
    rewrite::walk_module(&mut TupleBreaker::new(), module)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::{primitive::ScalarKind, ty::Type},
    };

    fn int() -> Type {
        Type::scalar(ScalarKind::Int32)
    }

    fn name(value: &str) -> Rc<Expression> {
        Expression::name(InternedSymbol::new(value), int(), None)
    }

    fn tuple(names: &[&str]) -> Rc<Expression> {
        Expression::tuple(
            names.iter().map(|n| name(n)).collect(),
            Type::tuple(names.iter().map(|_| int())),
            None,
        )
    }

    fn run(lhs: Rc<Expression>, rhs: Rc<Expression>) -> CompileResult<Vec<String>> {
        let suite = Suite::new(vec![Statement::bind(lhs, rhs)]);
        let broken = rewrite::walk_suite(&mut TupleBreaker::new(), &suite)?;

        Ok(broken
            .statements
            .iter()
            .map(|s| match &**s {
                Statement::Bind { lhs, rhs } => format!("{lhs} = {rhs}"),
                other => format!("{other:?}"),
            })
            .collect())
    }

    #[test]
    fn tuple_to_tuple_binds_elementwise() {
        let lines = run(tuple(&["a", "b", "c"]), tuple(&["x", "y", "z"])).expect("valid bind");

        assert_eq!(lines, ["a = x", "b = y", "c = z"]);
    }

    #[test]
    fn mismatched_arity_is_fatal() {
        assert_eq!(
            run(tuple(&["a", "b"]), tuple(&["x", "y", "z"])),
            Err(CompileError::ArityMismatch { lhs: 2, rhs: 3 })
        );
    }

    #[test]
    fn unpacking_a_call_caches_it_once() {
        let call = Expression::apply(name("f"), vec![name("x")], Type::tuple((0..4).map(|_| int())), None);
        let lines = run(tuple(&["a", "b", "c", "d"]), call).expect("valid bind");

        assert_eq!(
            lines,
            [
                "_tup0 = f(x)",
                "a = thrust::get<0>(_tup0)",
                "b = thrust::get<1>(_tup0)",
                "c = thrust::get<2>(_tup0)",
                "d = thrust::get<3>(_tup0)",
            ]
        );
    }

    #[test]
    fn unpacking_a_name_needs_no_temporary() {
        let lines = run(tuple(&["a", "b"]), name("t")).expect("valid bind");

        assert_eq!(lines, ["a = thrust::get<0>(t)", "b = thrust::get<1>(t)"]);
    }

    #[test]
    fn packing_builds_a_tuple() {
        let lines = run(name("t"), tuple(&["x", "y"])).expect("valid bind");

        assert_eq!(lines, ["t = thrust::make_tuple(x, y)"]);
    }

    #[test]
    fn plain_binds_are_shared() {
        let bind = Statement::bind(name("a"), name("b"));
        let suite = Suite::new(vec![bind.clone()]);
        let broken = rewrite::walk_suite(&mut TupleBreaker::new(), &suite).expect("valid bind");

        assert!(Rc::ptr_eq(&suite, &broken));
    }

    #[test]
    fn procedure_arguments_must_be_names() {
        let procedure = Rc::new(Procedure {
            name: Expression::name("f".into(), Type::function([int()], int()), None),
            arguments: vec![tuple(&["a", "b"])].into(),
            body: Suite::new(vec![Statement::ret(name("a"))]),
        });
        let module = Suite::new(vec![Rc::new(Statement::Procedure(procedure))]);

        assert!(matches!(
            tuple_break(&module),
            Err(CompileError::ExpectedName { .. })
        ));
    }
}
