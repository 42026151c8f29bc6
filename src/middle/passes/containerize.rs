//! Makes sure values the entry procedure hands back to its caller are backed
//! by owning containers rather than by views. Only the entry procedure is
//! touched; every other procedure works on views alone.

use std::rc::Rc;

use hashbrown::HashSet;
use tracing::trace;

use crate::{
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{
        ast::{
            Expression, ExpressionKind, Procedure, Statement, Suite,
            rewrite::{self, Rewriter},
        },
        ctype::CType,
        environment::Environment,
        names::{container_name, snippet},
    },
};

pub struct Containerizer {
    entry_point: InternedSymbol,
    in_entry: bool,
    /// Every name seen so far, including the container forms
    declared: Environment<InternedSymbol, ()>,
}

/// The container form of a view-typed name
pub fn container_of(name: &Expression) -> CompileResult<Rc<Expression>> {
    let symbol = expect_name(name, "container reassignment")?;
    let ctype = implementation_type(name)?;

    Ok(Expression::name(
        container_name(symbol),
        name.ty.clone(),
        Some(ctype.container_type()),
    ))
}

fn expect_name(expression: &Expression, context: &'static str) -> CompileResult<InternedSymbol> {
    expression.as_name().ok_or_else(|| CompileError::ExpectedName {
        context,
        found: expression.to_string(),
    })
}

fn implementation_type(expression: &Expression) -> CompileResult<&CType> {
    expression
        .ctype
        .as_ref()
        .ok_or_else(|| CompileError::MissingImplementationType(expression.to_string()))
}

/// Rebinding a view also has to rebind its backing storage. When both sides
/// have a declared container, a container bind is emitted ahead of the view
/// bind. Otherwise the view bind is returned on its own.
pub fn reassign(
    lhs: &Rc<Expression>,
    rhs: &Rc<Expression>,
    is_declared: impl Fn(InternedSymbol) -> bool,
) -> CompileResult<Vec<Rc<Statement>>> {
    let lhs_name = expect_name(lhs, "the target of a reassignment")?;
    let rhs_name = expect_name(rhs, "the source of a reassignment")?;
    let view_bind = Statement::bind(lhs.clone(), rhs.clone());

    if !is_declared(container_name(lhs_name)) || !is_declared(container_name(rhs_name)) {
        return Ok(vec![view_bind]);
    }

    trace!(lhs = %lhs_name, rhs = %rhs_name, "reassigning container");

    Ok(vec![
        Statement::bind(container_of(lhs)?, container_of(rhs)?),
        view_bind,
    ])
}

/// Names whose container form is known to exist anywhere in `procedure`:
/// everything it mentions, plus the containers the caller supplies for the
/// aggregate arguments of the entry procedure
pub fn declared_containers(procedure: &Procedure, is_entry: bool) -> HashSet<InternedSymbol> {
    let mut declared = procedure
        .body
        .referenced_names()
        .into_iter()
        .collect::<HashSet<_>>();

    for argument in procedure.arguments.iter() {
        if let Some(symbol) = argument.as_name() {
            declared.insert(symbol);

            if is_entry && argument.needs_container() {
                declared.insert(container_name(symbol));
            }
        }
    }

    declared
}

impl Containerizer {
    pub fn new(entry_point: InternedSymbol) -> Self {
        Self {
            entry_point,
            in_entry: false,
            declared: Environment::new(),
        }
    }

    fn is_declared(&self, symbol: InternedSymbol) -> bool {
        self.declared.contains(&symbol)
    }

    fn containerize_tuple(
        &mut self,
        statement: &Rc<Statement>,
        lhs: &Rc<Expression>,
        rhs: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        let arguments = rhs.arguments();
        let argument_ctypes = arguments
            .iter()
            .map(|a| implementation_type(a).cloned())
            .collect::<CompileResult<Vec<_>>>()?;
        let container_ctype = CType::tuple(argument_ctypes).container_type();

        // Nothing in the tuple needed a container, e.g. a pair of scalars
        if lhs.ctype.as_ref() == Some(&container_ctype) {
            return Ok(vec![statement.clone()]);
        }

        let mut container_arguments = Vec::with_capacity(arguments.len());

        for argument in arguments {
            match &argument.kind {
                ExpressionKind::Literal(_) => container_arguments.push(argument.clone()),
                ExpressionKind::Name(_) if !argument.needs_container() => {
                    container_arguments.push(argument.clone())
                }
                ExpressionKind::Name(symbol) => {
                    // Built from temporaries that are never returned, so no
                    // container is needed
                    if !self.is_declared(container_name(*symbol)) {
                        return Ok(vec![statement.clone()]);
                    }

                    container_arguments.push(container_of(argument)?);
                }
                _ => {
                    return Err(CompileError::ExpectedName {
                        context: "a tuple construction",
                        found: argument.to_string(),
                    });
                }
            }
        }

        let lhs_name = expect_name(lhs, "the target of a tuple construction")?;
        let container = Expression::name(
            container_name(lhs_name),
            lhs.ty.clone(),
            Some(container_ctype.clone()),
        );

        trace!(container = %container, "containerizing tuple");

        self.declared.declare(container_name(lhs_name));

        Ok(vec![
            statement.clone(),
            Statement::bind(
                container,
                Expression::apply_snippet(
                    snippet::make_tuple(),
                    container_arguments,
                    rhs.ty.clone(),
                    Some(container_ctype),
                ),
            ),
        ])
    }
}

impl Rewriter for Containerizer {
    fn rewrite_name(
        &mut self,
        expression: &Rc<Expression>,
        symbol: InternedSymbol,
    ) -> CompileResult<Rc<Expression>> {
        self.declared.declare(symbol);

        Ok(expression.clone())
    }

    fn rewrite_procedure(&mut self, procedure: &Rc<Procedure>) -> CompileResult<Rc<Procedure>> {
        self.in_entry = procedure.symbol() == Some(self.entry_point);

        if !self.in_entry {
            return Ok(procedure.clone());
        }

        self.declared.begin_scope();

        for argument in procedure.arguments.iter() {
            if let Some(symbol) = argument.as_name().filter(|_| argument.needs_container()) {
                self.declared.declare(container_name(symbol));
            }
        }

        let result = rewrite::walk_procedure(self, procedure);

        self.declared.end_scope();
        self.in_entry = false;

        result
    }

    fn rewrite_suite(&mut self, suite: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
        self.declared.begin_scope();
        let result = rewrite::walk_suite(self, suite);
        self.declared.end_scope();

        result
    }

    fn rewrite_bind(
        &mut self,
        statement: &Rc<Statement>,
        lhs: &Rc<Expression>,
        rhs: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        if !self.in_entry {
            return Ok(vec![statement.clone()]);
        }

        // Record every name in the bind
        self.rewrite_expression(lhs)?;

        if rhs.is_name() {
            let declared = &self.declared;
            let statements = reassign(lhs, rhs, |s| declared.contains(&s))?;

            self.rewrite_expression(rhs)?;
            return Ok(statements);
        }

        let is_tuple_construction = rhs.callee() == Some(snippet::make_tuple());

        self.rewrite_expression(rhs)?;

        if !is_tuple_construction {
            return Ok(vec![statement.clone()]);
        }

        self.containerize_tuple(statement, lhs, rhs)
    }
}

pub fn containerize(module: &Rc<Suite>, entry_point: InternedSymbol) -> CompileResult<Rc<Suite>> {
    rewrite::walk_module(&mut Containerizer::new(entry_point), module)
}
