//! Turns self tail calls into loops.
//!
//! A procedure of the shape
//!
//! ```text
//! prefix
//! if test { ...; return f(e0, e1) } else { base }
//! ```
//!
//! becomes
//!
//! ```text
//! prefix
//! while test { ...; p0 = e0; p1 = e1; prefix }
//! base
//! ```
//!
//! with the test negated when the call sits in the `else` branch. Anything
//! else, including recursion outside tail position, is left alone.

use std::rc::Rc;

use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::{
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{
        ast::{
            Expression, ExpressionKind, Procedure, Statement, Suite,
            rewrite::{self, Rewriter},
        },
        names::{NameSupply, container_name},
        passes::containerize::{declared_containers, reassign},
    },
};

/// A recognized self tail call
struct TailCall {
    prefix: Vec<Rc<Statement>>,
    test: Rc<Expression>,
    recursive_in_then: bool,
    /// The recursive branch up to the call
    leading: Vec<Rc<Statement>>,
    arguments: Rc<[Rc<Expression>]>,
    base: Rc<Suite>,
}

fn mentions(statements: &[Rc<Statement>], symbol: InternedSymbol) -> bool {
    statements
        .iter()
        .any(|s| s.referenced_names().contains(&symbol))
}

/// Splits a branch ending in `return f(args)` or `r = f(args); return r`
fn split_tail_call(
    suite: &Suite,
    symbol: InternedSymbol,
) -> Option<(Vec<Rc<Statement>>, Rc<[Rc<Expression>]>)> {
    let (last, rest) = suite.statements.split_last()?;
    let Statement::Return(value) = &**last else {
        return None;
    };

    let (leading, call) = if value.callee() == Some(symbol) {
        (rest, value)
    } else {
        let result = value.as_name()?;
        let (bind, leading) = rest.split_last()?;

        match &**bind {
            Statement::Bind { lhs, rhs }
                if lhs.as_name() == Some(result) && rhs.callee() == Some(symbol) =>
            {
                (leading, rhs)
            }
            _ => return None,
        }
    };

    let ExpressionKind::Apply { arguments, .. } = &call.kind else {
        return None;
    };

    Some((leading.to_vec(), arguments.clone()))
}

impl TailCall {
    fn find(procedure: &Procedure, symbol: InternedSymbol) -> Option<Self> {
        let (last, prefix) = procedure.body.statements.split_last()?;
        let Statement::Conditional { test, then, orelse } = &**last else {
            return None;
        };

        let (recursive_in_then, (leading, arguments), base) = match (
            split_tail_call(then, symbol),
            split_tail_call(orelse, symbol),
        ) {
            (Some(call), None) => (true, call, orelse),
            (None, Some(call)) => (false, call, then),
            _ => return None,
        };

        let other_calls = mentions(prefix, symbol)
            || test.referenced_names().contains(&symbol)
            || mentions(&leading, symbol)
            || arguments
                .iter()
                .any(|a| a.referenced_names().contains(&symbol))
            || mentions(&base.statements, symbol);

        if other_calls {
            return None;
        }

        Some(Self {
            prefix: prefix.to_vec(),
            test: test.clone(),
            recursive_in_then,
            leading,
            arguments,
            base: base.clone(),
        })
    }
}

/// The comparison that holds exactly when `operator` does not
fn flipped_comparison(operator: InternedSymbol) -> Option<InternedSymbol> {
    let flipped = match operator.value() {
        "op_eq" => "op_ne",
        "op_ne" => "op_eq",
        "op_lt" => "op_ge",
        "op_ge" => "op_lt",
        "op_le" => "op_gt",
        "op_gt" => "op_le",
        _ => return None,
    };

    Some(InternedSymbol::new(flipped))
}

fn negate(test: &Rc<Expression>) -> Rc<Expression> {
    if let ExpressionKind::Apply {
        function,
        arguments,
    } = &test.kind
    {
        if let Some(flipped) = function.as_name().and_then(flipped_comparison) {
            return Expression::apply(
                function.renamed(flipped),
                arguments.to_vec(),
                test.ty.clone(),
                test.ctype.clone(),
            );
        }
    }

    Expression::apply_snippet(
        InternedSymbol::new("op_not"),
        vec![test.clone()],
        test.ty.clone(),
        test.ctype.clone(),
    )
}

pub struct Iterizer {
    entry_point: InternedSymbol,
    supply: NameSupply,
}

impl Iterizer {
    pub fn new(entry_point: InternedSymbol) -> Self {
        Self {
            entry_point,
            supply: NameSupply::new("_iter"),
        }
    }

    /// Assigns the tail call's arguments to the parameters as if all at
    /// once. An argument reading a parameter that an earlier assignment
    /// overwrites is staged in a temporary first.
    fn reassign_parameters(
        &mut self,
        parameters: &[Rc<Expression>],
        arguments: &[Rc<Expression>],
        declared: &mut HashSet<InternedSymbol>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        let names = parameters
            .iter()
            .map(|p| {
                p.as_name().ok_or_else(|| CompileError::ExpectedName {
                    context: "procedure arguments",
                    found: p.to_string(),
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let mut statements = Vec::new();
        let mut values = Vec::with_capacity(arguments.len());

        for (index, argument) in arguments.iter().enumerate() {
            let clobbered = argument
                .referenced_names()
                .iter()
                .any(|n| names[..index].contains(n));

            if !clobbered {
                values.push(argument.clone());
                continue;
            }

            let temporary_symbol = self.supply.next();
            let temporary = argument.renamed(temporary_symbol);

            trace!(temporary = %temporary_symbol, value = %argument, "staging tail call argument");

            match argument.as_name() {
                Some(source) if declared.contains(&container_name(source)) => {
                    declared.insert(container_name(temporary_symbol));
                    statements.extend(reassign(&temporary, argument, |s| declared.contains(&s))?);
                }
                _ => statements.push(Statement::bind(temporary.clone(), argument.clone())),
            }

            values.push(temporary);
        }

        for ((parameter, name), value) in parameters.iter().zip(&names).zip(values) {
            match value.as_name() {
                Some(source) if source == *name => {}
                Some(_) => {
                    statements.extend(reassign(parameter, &value, |s| declared.contains(&s))?)
                }
                None => statements.push(Statement::bind(parameter.clone(), value)),
            }
        }

        Ok(statements)
    }
}

impl Rewriter for Iterizer {
    fn rewrite_procedure(&mut self, procedure: &Rc<Procedure>) -> CompileResult<Rc<Procedure>> {
        let Some(symbol) = procedure.symbol() else {
            return Ok(procedure.clone());
        };
        let Some(tail_call) = TailCall::find(procedure, symbol) else {
            return Ok(procedure.clone());
        };

        if tail_call.arguments.len() != procedure.arguments.len() {
            return Err(CompileError::MalformedApplication {
                callee: symbol.to_string(),
                reason: format!(
                    "expected {} arguments but found {}",
                    procedure.arguments.len(),
                    tail_call.arguments.len()
                ),
            });
        }

        debug!(procedure = %symbol, "turning tail recursion into a loop");

        let mut declared = declared_containers(procedure, symbol == self.entry_point);
        let mut body = tail_call.leading;

        body.extend(self.reassign_parameters(
            &procedure.arguments,
            &tail_call.arguments,
            &mut declared,
        )?);
        body.extend(tail_call.prefix.iter().cloned());

        let predicate = if tail_call.recursive_in_then {
            tail_call.test
        } else {
            negate(&tail_call.test)
        };

        let mut statements = tail_call.prefix;
        statements.push(Rc::new(Statement::While {
            predicate,
            body: Suite::new(body),
        }));
        statements.extend(tail_call.base.statements.iter().cloned());

        Ok(Rc::new(Procedure {
            name: procedure.name.clone(),
            arguments: procedure.arguments.clone(),
            body: Suite::new(statements),
        }))
    }
}

pub fn iterize(module: &Rc<Suite>, entry_point: InternedSymbol) -> CompileResult<Rc<Suite>> {
    rewrite::walk_module(&mut Iterizer::new(entry_point), module)
}
