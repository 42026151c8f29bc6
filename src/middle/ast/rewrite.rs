//! The rewriting visitor all passes are built on. Every hook defaults to the
//! matching `walk_*` function, which rewrites the children and rebuilds the
//! node only when one of them came back as a different allocation. A rewriter
//! that overrides nothing therefore returns its input unchanged, down to the
//! pointer.
//!
//! Statement hooks return a list so a pass can drop a statement or splice
//! several in its place.

use std::rc::Rc;

use super::{Expression, ExpressionKind, Procedure, Statement, Suite};
use crate::{error::CompileResult, frontend::intern::InternedSymbol};

pub trait Rewriter: Sized {
    fn rewrite_suite(&mut self, suite: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
        walk_suite(self, suite)
    }

    fn rewrite_statement(&mut self, statement: &Rc<Statement>) -> CompileResult<Vec<Rc<Statement>>> {
        walk_statement(self, statement)
    }

    fn rewrite_bind(
        &mut self,
        statement: &Rc<Statement>,
        lhs: &Rc<Expression>,
        rhs: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        walk_bind(self, statement, lhs, rhs)
    }

    fn rewrite_return(
        &mut self,
        statement: &Rc<Statement>,
        value: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        walk_return(self, statement, value)
    }

    fn rewrite_procedure(&mut self, procedure: &Rc<Procedure>) -> CompileResult<Rc<Procedure>> {
        walk_procedure(self, procedure)
    }

    fn rewrite_conditional(
        &mut self,
        statement: &Rc<Statement>,
        test: &Rc<Expression>,
        then: &Rc<Suite>,
        orelse: &Rc<Suite>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        walk_conditional(self, statement, test, then, orelse)
    }

    fn rewrite_while(
        &mut self,
        statement: &Rc<Statement>,
        predicate: &Rc<Expression>,
        body: &Rc<Suite>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        walk_while(self, statement, predicate, body)
    }

    fn rewrite_expression(&mut self, expression: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        walk_expression(self, expression)
    }

    fn rewrite_name(
        &mut self,
        expression: &Rc<Expression>,
        _symbol: InternedSymbol,
    ) -> CompileResult<Rc<Expression>> {
        Ok(expression.clone())
    }

    fn rewrite_literal(&mut self, expression: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        Ok(expression.clone())
    }

    fn rewrite_tuple(
        &mut self,
        expression: &Rc<Expression>,
        elements: &Rc<[Rc<Expression>]>,
    ) -> CompileResult<Rc<Expression>> {
        walk_tuple(self, expression, elements)
    }

    fn rewrite_apply(
        &mut self,
        expression: &Rc<Expression>,
        function: &Rc<Expression>,
        arguments: &Rc<[Rc<Expression>]>,
    ) -> CompileResult<Rc<Expression>> {
        walk_apply(self, expression, function, arguments)
    }

    fn rewrite_closure(
        &mut self,
        expression: &Rc<Expression>,
        function: &Rc<Expression>,
        captured: &Rc<[Rc<Expression>]>,
    ) -> CompileResult<Rc<Expression>> {
        walk_closure(self, expression, function, captured)
    }
}

pub fn unchanged<T: ?Sized>(before: &Rc<T>, after: &Rc<T>) -> bool {
    Rc::ptr_eq(before, after)
}

/// Rewrites a list of expressions, handing back the original slice when no
/// element changed
pub fn rewrite_expressions(
    rewriter: &mut impl Rewriter,
    expressions: &Rc<[Rc<Expression>]>,
) -> CompileResult<Rc<[Rc<Expression>]>> {
    let rewritten = expressions
        .iter()
        .map(|e| rewriter.rewrite_expression(e))
        .collect::<CompileResult<Vec<_>>>()?;

    if rewritten
        .iter()
        .zip(expressions.iter())
        .all(|(after, before)| unchanged(before, after))
    {
        return Ok(expressions.clone());
    }

    Ok(rewritten.into())
}

/// Reassembles a suite from rewritten statements, reusing the original when
/// every statement came back as itself
pub fn rebuild_suite(suite: &Rc<Suite>, rewritten: Vec<Vec<Rc<Statement>>>) -> Rc<Suite> {
    let same = rewritten.len() == suite.statements.len()
        && rewritten
            .iter()
            .zip(suite.statements.iter())
            .all(|(after, before)| after.len() == 1 && unchanged(before, &after[0]));

    if same {
        return suite.clone();
    }

    Suite::new(rewritten.into_iter().flatten().collect())
}

pub fn walk_module(rewriter: &mut impl Rewriter, module: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
    rewriter.rewrite_suite(module)
}

pub fn walk_suite(rewriter: &mut impl Rewriter, suite: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
    let rewritten = suite
        .statements
        .iter()
        .map(|s| rewriter.rewrite_statement(s))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(rebuild_suite(suite, rewritten))
}

pub fn walk_statement(
    rewriter: &mut impl Rewriter,
    statement: &Rc<Statement>,
) -> CompileResult<Vec<Rc<Statement>>> {
    match &**statement {
        Statement::Bind { lhs, rhs } => rewriter.rewrite_bind(statement, lhs, rhs),
        Statement::Return(value) => rewriter.rewrite_return(statement, value),
        Statement::Procedure(procedure) => {
            let rewritten = rewriter.rewrite_procedure(procedure)?;

            if unchanged(procedure, &rewritten) {
                return Ok(vec![statement.clone()]);
            }

            Ok(vec![Rc::new(Statement::Procedure(rewritten))])
        }
        Statement::Conditional { test, then, orelse } => {
            rewriter.rewrite_conditional(statement, test, then, orelse)
        }
        Statement::While { predicate, body } => rewriter.rewrite_while(statement, predicate, body),
        Statement::Structure {
            name,
            type_variables,
            body,
        } => {
            let new_body = rewriter.rewrite_suite(body)?;

            if unchanged(body, &new_body) {
                return Ok(vec![statement.clone()]);
            }

            Ok(vec![Rc::new(Statement::Structure {
                name: *name,
                type_variables: type_variables.clone(),
                body: new_body,
            })])
        }
        Statement::Namespace { name, body } => {
            let new_body = rewriter.rewrite_suite(body)?;

            if unchanged(body, &new_body) {
                return Ok(vec![statement.clone()]);
            }

            Ok(vec![Rc::new(Statement::Namespace {
                name: *name,
                body: new_body,
            })])
        }
        Statement::Declare(value) => {
            let new_value = rewriter.rewrite_expression(value)?;

            if unchanged(value, &new_value) {
                return Ok(vec![statement.clone()]);
            }

            Ok(vec![Rc::new(Statement::Declare(new_value))])
        }
        Statement::Typedef { .. } | Statement::Include { .. } => Ok(vec![statement.clone()]),
    }
}

pub fn walk_bind(
    rewriter: &mut impl Rewriter,
    statement: &Rc<Statement>,
    lhs: &Rc<Expression>,
    rhs: &Rc<Expression>,
) -> CompileResult<Vec<Rc<Statement>>> {
    let new_rhs = rewriter.rewrite_expression(rhs)?;
    let new_lhs = rewriter.rewrite_expression(lhs)?;

    if unchanged(lhs, &new_lhs) && unchanged(rhs, &new_rhs) {
        return Ok(vec![statement.clone()]);
    }

    Ok(vec![Statement::bind(new_lhs, new_rhs)])
}

pub fn walk_return(
    rewriter: &mut impl Rewriter,
    statement: &Rc<Statement>,
    value: &Rc<Expression>,
) -> CompileResult<Vec<Rc<Statement>>> {
    let new_value = rewriter.rewrite_expression(value)?;

    if unchanged(value, &new_value) {
        return Ok(vec![statement.clone()]);
    }

    Ok(vec![Statement::ret(new_value)])
}

pub fn walk_procedure(
    rewriter: &mut impl Rewriter,
    procedure: &Rc<Procedure>,
) -> CompileResult<Rc<Procedure>> {
    let name = rewriter.rewrite_expression(&procedure.name)?;
    let arguments = rewrite_expressions(rewriter, &procedure.arguments)?;
    let body = rewriter.rewrite_suite(&procedure.body)?;

    if unchanged(&procedure.name, &name)
        && unchanged(&procedure.arguments, &arguments)
        && unchanged(&procedure.body, &body)
    {
        return Ok(procedure.clone());
    }

    Ok(Rc::new(Procedure {
        name,
        arguments,
        body,
    }))
}

pub fn walk_conditional(
    rewriter: &mut impl Rewriter,
    statement: &Rc<Statement>,
    test: &Rc<Expression>,
    then: &Rc<Suite>,
    orelse: &Rc<Suite>,
) -> CompileResult<Vec<Rc<Statement>>> {
    let new_test = rewriter.rewrite_expression(test)?;
    let new_then = rewriter.rewrite_suite(then)?;
    let new_orelse = rewriter.rewrite_suite(orelse)?;

    if unchanged(test, &new_test) && unchanged(then, &new_then) && unchanged(orelse, &new_orelse) {
        return Ok(vec![statement.clone()]);
    }

    Ok(vec![Rc::new(Statement::Conditional {
        test: new_test,
        then: new_then,
        orelse: new_orelse,
    })])
}

pub fn walk_while(
    rewriter: &mut impl Rewriter,
    statement: &Rc<Statement>,
    predicate: &Rc<Expression>,
    body: &Rc<Suite>,
) -> CompileResult<Vec<Rc<Statement>>> {
    let new_predicate = rewriter.rewrite_expression(predicate)?;
    let new_body = rewriter.rewrite_suite(body)?;

    if unchanged(predicate, &new_predicate) && unchanged(body, &new_body) {
        return Ok(vec![statement.clone()]);
    }

    Ok(vec![Rc::new(Statement::While {
        predicate: new_predicate,
        body: new_body,
    })])
}

pub fn walk_expression(
    rewriter: &mut impl Rewriter,
    expression: &Rc<Expression>,
) -> CompileResult<Rc<Expression>> {
    match &expression.kind {
        ExpressionKind::Name(symbol) => rewriter.rewrite_name(expression, *symbol),
        ExpressionKind::Literal(_) => rewriter.rewrite_literal(expression),
        ExpressionKind::Tuple(elements) => rewriter.rewrite_tuple(expression, elements),
        ExpressionKind::Apply {
            function,
            arguments,
        } => rewriter.rewrite_apply(expression, function, arguments),
        ExpressionKind::Closure { function, captured } => {
            rewriter.rewrite_closure(expression, function, captured)
        }
    }
}

pub fn walk_tuple(
    rewriter: &mut impl Rewriter,
    expression: &Rc<Expression>,
    elements: &Rc<[Rc<Expression>]>,
) -> CompileResult<Rc<Expression>> {
    let new_elements = rewrite_expressions(rewriter, elements)?;

    if unchanged(elements, &new_elements) {
        return Ok(expression.clone());
    }

    Ok(Expression::new(
        ExpressionKind::Tuple(new_elements),
        expression.ty.clone(),
        expression.ctype.clone(),
    ))
}

pub fn walk_apply(
    rewriter: &mut impl Rewriter,
    expression: &Rc<Expression>,
    function: &Rc<Expression>,
    arguments: &Rc<[Rc<Expression>]>,
) -> CompileResult<Rc<Expression>> {
    let new_function = rewriter.rewrite_expression(function)?;
    let new_arguments = rewrite_expressions(rewriter, arguments)?;

    if unchanged(function, &new_function) && unchanged(arguments, &new_arguments) {
        return Ok(expression.clone());
    }

    Ok(Expression::new(
        ExpressionKind::Apply {
            function: new_function,
            arguments: new_arguments,
        },
        expression.ty.clone(),
        expression.ctype.clone(),
    ))
}

pub fn walk_closure(
    rewriter: &mut impl Rewriter,
    expression: &Rc<Expression>,
    function: &Rc<Expression>,
    captured: &Rc<[Rc<Expression>]>,
) -> CompileResult<Rc<Expression>> {
    let new_function = rewriter.rewrite_expression(function)?;
    let new_captured = rewrite_expressions(rewriter, captured)?;

    if unchanged(function, &new_function) && unchanged(captured, &new_captured) {
        return Ok(expression.clone());
    }

    Ok(Expression::new(
        ExpressionKind::Closure {
            function: new_function,
            captured: new_captured,
        },
        expression.ty.clone(),
        expression.ctype.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::{
        ctype::CType,
        primitive::ScalarKind,
        ty::Type,
    };

    struct Identity;

    impl Rewriter for Identity {}

    /// Renames one symbol everywhere
    struct Rename {
        from: InternedSymbol,
        to: InternedSymbol,
    }

    impl Rewriter for Rename {
        fn rewrite_name(
            &mut self,
            expression: &Rc<Expression>,
            symbol: InternedSymbol,
        ) -> CompileResult<Rc<Expression>> {
            if symbol == self.from {
                return Ok(expression.renamed(self.to));
            }

            Ok(expression.clone())
        }
    }

    fn int() -> Type {
        Type::scalar(ScalarKind::Int32)
    }

    fn name(value: &str) -> Rc<Expression> {
        Expression::name(InternedSymbol::new(value), int(), None)
    }

    fn sample_unit() -> Rc<Suite> {
        let body = Suite::new(vec![
            Statement::bind(
                name("y"),
                Expression::apply(name("op_add"), vec![name("x"), name("x")], int(), None),
            ),
            Rc::new(Statement::Conditional {
                test: name("c"),
                then: Suite::new(vec![Statement::ret(name("y"))]),
                orelse: Suite::new(vec![Rc::new(Statement::While {
                    predicate: name("c"),
                    body: Suite::new(vec![Statement::bind(
                        name("f"),
                        Expression::new(
                            ExpressionKind::Closure {
                                function: name("g"),
                                captured: vec![name("x")].into(),
                            },
                            int(),
                            None,
                        ),
                    )]),
                })]),
            }),
            Rc::new(Statement::Declare(name("z"))),
            Statement::ret(Expression::tuple(
                vec![name("x"), Expression::literal(InternedSymbol::new("1"), int(), None)],
                Type::tuple([int(), int()]),
                None,
            )),
        ]);

        Suite::new(vec![
            Rc::new(Statement::Include {
                path: InternedSymbol::new("prelude.h"),
                system: false,
            }),
            Rc::new(Statement::Typedef {
                origin: CType::scalar(ScalarKind::Int32),
                rename: InternedSymbol::new("index_t"),
            }),
            Rc::new(Statement::Namespace {
                name: InternedSymbol::new("unit"),
                body: Suite::new(vec![Rc::new(Statement::Structure {
                    name: InternedSymbol::new("state"),
                    type_variables: vec![InternedSymbol::new("T")].into(),
                    body: Suite::new(vec![Rc::new(Statement::Declare(name("w")))]),
                })]),
            }),
            Rc::new(Statement::Procedure(Rc::new(Procedure {
                name: Expression::name(
                    InternedSymbol::new("main"),
                    Type::function([int()], int()),
                    None,
                ),
                arguments: vec![name("x")].into(),
                body,
            }))),
        ])
    }

    #[test]
    fn identity_rewrite_returns_the_same_tree() {
        let unit = sample_unit();
        let rewritten = walk_module(&mut Identity, &unit).expect("identity never fails");

        assert!(Rc::ptr_eq(&unit, &rewritten));
        assert_eq!(*unit, *rewritten);
    }

    #[test]
    fn unchanged_siblings_stay_shared() {
        let unit = sample_unit();
        let mut rename = Rename {
            from: InternedSymbol::new("y"),
            to: InternedSymbol::new("y2"),
        };

        let rewritten = walk_module(&mut rename, &unit).expect("rename never fails");

        assert!(!Rc::ptr_eq(&unit, &rewritten));

        // Only the procedure mentions `y`, everything before it is shared
        for i in 0..3 {
            assert!(Rc::ptr_eq(&unit.statements[i], &rewritten.statements[i]));
        }

        let (Statement::Procedure(before), Statement::Procedure(after)) =
            (&*unit.statements[3], &*rewritten.statements[3])
        else {
            panic!("expected procedures");
        };

        assert!(Rc::ptr_eq(&before.arguments, &after.arguments));
        // The trailing declaration and return do not mention `y`
        assert!(Rc::ptr_eq(&before.body.statements[2], &after.body.statements[2]));
        assert!(Rc::ptr_eq(&before.body.statements[3], &after.body.statements[3]));
        assert!(after.body.referenced_names().contains(&InternedSymbol::new("y2")));
    }
}
