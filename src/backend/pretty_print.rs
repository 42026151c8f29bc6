//! Renders the lowered tree as C++ source. The first bind of a name in a
//! scope declares it with its implementation type; later binds assign.

use core::fmt::Write;
use std::rc::Rc;

use colored::Colorize;
use hashbrown::HashSet;
use itertools::Itertools;

use crate::{
    backend::{Target, type_printer::print_ctype},
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{
        ast::{Expression, ExpressionKind, Procedure, Statement, Suite},
        ctype::{CType, CTypeKind},
        environment::Environment,
        registry::operator_symbol,
    },
};

pub struct PrettyPrinter {
    target: Target,
    output: String,
    depth: usize,
    declared: Environment<InternedSymbol, ()>,
}

/// Renders a whole unit. The result is colored; strip the escapes before
/// writing it anywhere but a terminal.
pub fn pretty_print(module: &Suite, target: Target) -> CompileResult<String> {
    let mut printer = PrettyPrinter::new(target);

    for (index, statement) in module.statements.iter().enumerate() {
        if index > 0 {
            printer.output.push('\n');
        }

        printer.statement(statement)?;
    }

    Ok(printer.output)
}

fn implementation_type(expression: &Expression) -> CompileResult<&CType> {
    expression
        .ctype
        .as_ref()
        .ok_or_else(|| CompileError::MissingImplementationType(expression.to_string()))
}

fn expect_name(expression: &Expression, context: &'static str) -> CompileResult<InternedSymbol> {
    expression.as_name().ok_or_else(|| CompileError::ExpectedName {
        context,
        found: expression.to_string(),
    })
}

impl PrettyPrinter {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            output: String::new(),
            depth: 0,
            declared: Environment::new(),
        }
    }

    fn line(&mut self, text: impl core::fmt::Display) {
        let indent = "    ".repeat(self.depth);
        let _ = writeln!(self.output, "{indent}{text}");
    }

    fn ctype(&self, ctype: &CType) -> String {
        print_ctype(ctype, self.target).yellow().to_string()
    }

    fn expression_type(&self, expression: &Expression) -> CompileResult<String> {
        Ok(self.ctype(implementation_type(expression)?))
    }

    fn block(&mut self, suite: &Suite) -> CompileResult<()> {
        self.depth += 1;
        self.declared.begin_scope();

        let result = self.statements(&suite.statements);

        self.declared.end_scope();
        self.depth -= 1;

        result
    }

    /// Names first bound inside a conditional or loop but read after it are
    /// declared ahead of it, so the nested binds only assign
    fn statements(&mut self, statements: &[Rc<Statement>]) -> CompileResult<()> {
        for (index, statement) in statements.iter().enumerate() {
            if matches!(**statement, Statement::Conditional { .. } | Statement::While { .. }) {
                let read_later = statements[index + 1..]
                    .iter()
                    .flat_map(|s| s.referenced_names())
                    .collect::<HashSet<_>>();

                for target in statement.bound_targets() {
                    let symbol = expect_name(&target, "the target of a bind")?;

                    if read_later.contains(&symbol) && !self.declared.contains(&symbol) {
                        self.statement(&Statement::Declare(target))?;
                    }
                }
            }

            self.statement(statement)?;
        }

        Ok(())
    }

    /// Operator applications nested in another operator get parentheses
    fn operand(&self, expression: &Expression) -> CompileResult<String> {
        let text = self.expression(expression)?;
        let is_operator = expression
            .callee()
            .is_some_and(|c| operator_symbol(c).is_some() || c.value() == "op_not");

        Ok(if is_operator { format!("({text})") } else { text })
    }

    fn expressions(&self, expressions: &[Rc<Expression>]) -> CompileResult<String> {
        Ok(expressions
            .iter()
            .map(|e| self.expression(e))
            .collect::<CompileResult<Vec<_>>>()?
            .join(", "))
    }

    fn expression(&self, expression: &Expression) -> CompileResult<String> {
        implementation_type(expression)?;

        let text = match &expression.kind {
            ExpressionKind::Name(symbol) => symbol.to_string(),
            ExpressionKind::Literal(symbol) => symbol.value().purple().to_string(),
            ExpressionKind::Tuple(elements) => {
                format!("thrust::make_tuple({})", self.expressions(elements)?)
            }
            ExpressionKind::Closure { function, captured } => {
                let mut parts = vec![self.expression(function)?];
                parts.extend(captured.iter().map(|c| self.expression(c)).collect::<CompileResult<Vec<_>>>()?);

                format!("{}({})", "closure".magenta(), parts.join(", "))
            }
            ExpressionKind::Apply {
                function,
                arguments,
            } => {
                let callee = expect_name(function, "the function of an application")?;

                match (operator_symbol(callee), &arguments[..]) {
                    (Some(operator), [lhs, rhs]) => {
                        format!("{} {operator} {}", self.operand(lhs)?, self.operand(rhs)?)
                    }
                    (None, [operand]) if callee.value() == "op_not" => {
                        format!("!{}", self.operand(operand)?)
                    }
                    _ => format!("{}({})", callee.value().blue(), self.expressions(arguments)?),
                }
            }
        };

        Ok(text)
    }

    fn procedure(&mut self, procedure: &Procedure) -> CompileResult<()> {
        let name = expect_name(&procedure.name, "a procedure name")?;
        let ctype = implementation_type(&procedure.name)?;

        let (variables, monotype) = match &**ctype {
            CTypeKind::Polytype {
                variables,
                monotype,
            } => (&variables[..], monotype),
            _ => (&[][..], ctype),
        };

        if !variables.is_empty() {
            self.line(format!(
                "{}<{}>",
                "template".magenta(),
                variables
                    .iter()
                    .map(|v| format!("{} {}", "typename".magenta(), print_ctype(v, self.target)))
                    .join(", ")
            ));
        }

        let result = monotype
            .result_type()
            .ok_or_else(|| CompileError::MissingImplementationType(procedure.name.to_string()))?;
        let parameters = procedure
            .arguments
            .iter()
            .map(|a| Ok(format!("{} {a}", self.expression_type(a)?)))
            .collect::<CompileResult<Vec<_>>>()?;

        self.line(format!(
            "{} {}({}) {{",
            self.ctype(result),
            name.value().blue(),
            parameters.join(", ")
        ));

        self.declared.begin_scope();

        for argument in procedure.arguments.iter() {
            self.declared.declare(expect_name(argument, "procedure arguments")?);
        }

        let result = self.block(&procedure.body);
        self.declared.end_scope();
        result?;

        self.line("}");

        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Bind { lhs, rhs } => {
                let target = expect_name(lhs, "the target of a bind")?;
                let value = self.expression(rhs)?;

                if self.declared.contains(&target) {
                    self.line(format!("{target} = {value};"));
                } else {
                    let ctype = self.expression_type(lhs)?;

                    self.declared.declare(target);
                    self.line(format!("{ctype} {target} = {value};"));
                }

                if statement.is_phase_boundary() {
                    self.line("// phase boundary".bright_black());
                }
            }
            Statement::Return(value) => {
                let value = self.expression(value)?;

                self.line(format!("{} {value};", "return".magenta()));
            }
            Statement::Procedure(procedure) => self.procedure(procedure)?,
            Statement::Conditional { test, then, orelse } => {
                let test = self.expression(test)?;

                self.line(format!("{} ({test}) {{", "if".magenta()));
                self.block(then)?;
                self.line(format!("}} {} {{", "else".magenta()));
                self.block(orelse)?;
                self.line("}");
            }
            Statement::While { predicate, body } => {
                let predicate = self.expression(predicate)?;

                self.line(format!("{} ({predicate}) {{", "while".magenta()));
                self.block(body)?;
                self.line("}");
            }
            Statement::Structure {
                name,
                type_variables,
                body,
            } => {
                if !type_variables.is_empty() {
                    self.line(format!(
                        "{}<{}>",
                        "template".magenta(),
                        type_variables
                            .iter()
                            .map(|v| format!("{} {v}", "typename".magenta()))
                            .join(", ")
                    ));
                }

                self.line(format!("{} {name} {{", "struct".magenta()));
                self.block(body)?;
                self.line("};");
            }
            Statement::Typedef { origin, rename } => {
                self.line(format!("{} {} {rename};", "typedef".magenta(), self.ctype(origin)));
            }
            Statement::Namespace { name, body } => {
                self.line(format!("{} {name} {{", "namespace".magenta()));
                self.block(body)?;
                self.line("}");
            }
            Statement::Include { path, system } => {
                let path = if *system {
                    format!("<{path}>")
                } else {
                    format!("\"{path}\"")
                };

                self.line(format!("{} {}", "#include".magenta(), path.green()));
            }
            Statement::Declare(value) => {
                let symbol = expect_name(value, "a declaration")?;
                let ctype = self.expression_type(value)?;

                self.declared.declare(symbol);
                self.line(format!("{ctype} {symbol};"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::parse_str,
        middle::{
            passes::{Compiler, CompilerOptions, type_convert::convert_type},
            primitive::ScalarKind,
            ty::Type,
        },
    };

    const PRELUDE: &str = indoc! {"
        declare map : forall a b . fn(fn(a) -> b, [a]) -> [b] propagates;
        declare reduce : forall a . fn(fn(a, a) -> a, a, [a]) -> a forces;
        declare incr : fn(Float32) -> Float32 opaque;
        declare add : fn(Float32, Float32) -> Float32 opaque;
    "};

    fn compile_and_print(source: &str, target: Target) -> String {
        let unit = parse_str(&format!("{PRELUDE}{source}")).expect("valid source");
        let output = Compiler::new(CompilerOptions::default(), &unit.registry)
            .compile(&unit.module)
            .expect("valid unit");

        strip_ansi_escapes::strip_str(pretty_print(&output.module, target).expect("fully typed"))
    }

    fn typed_name(name: &str, ty: Type) -> Rc<Expression> {
        let ctype = convert_type(&ty);
        Expression::name(name.into(), ty, Some(ctype))
    }

    #[test]
    fn compiled_units_print_as_cpp() {
        let text = compile_and_print(
            indoc! {"
                procedure entry(xs: [Float32]) -> Float32 {
                    ys: [Float32] = map(incr, xs);
                    s: Float32 = reduce(add, 0.0, ys);
                    return s + 1.0;
                }
            "},
            Target::Cuda,
        );

        assert_eq!(
            text,
            indoc! {"
                float entry(sequence<cuda_tag, float> xs) {
                    sequence<cuda_tag, float> ys = map(incr, xs);
                    sp_cuarray ys_phase0 = phase_boundary(ys);
                    // phase boundary
                    float s = reduce(add, 0.0, ys_phase0);
                    return s + 1.0;
                }

                float _wrap_entry(sp_cuarray xs_array) {
                    sequence<cuda_tag, float> xs = make_sequence(xs_array);
                    return entry(xs);
                }
            "}
        );
    }

    #[test]
    fn loops_assign_instead_of_declaring() {
        let text = compile_and_print(
            indoc! {"
                procedure count(i: Int32, acc: Int32) -> Int32 {
                    if i == 0 {
                        return acc;
                    } else {
                        return count(i - 1, acc + i * 2);
                    }
                }
                procedure entry(n: Int32) -> Int32 {
                    r: Int32 = count(n, 0);
                    return r;
                }
            "},
            Target::Omp,
        );

        assert_eq!(
            text,
            indoc! {"
                int count(int i, int acc) {
                    while (i != 0) {
                        int _iter0 = acc + (i * 2);
                        i = i - 1;
                        acc = _iter0;
                    }
                    return acc;
                }

                int entry(int n) {
                    int r = count(n, 0);
                    return r;
                }

                int _wrap_entry(int n) {
                    return entry(n);
                }
            "}
        );
    }

    #[test]
    fn names_bound_in_branches_are_declared_before_them() {
        let text = compile_and_print(
            indoc! {"
                procedure entry(xs: [Float32], c: Bool) -> Float32 {
                    ys: [Float32] = map(incr, xs);
                    if c {
                        s: Float32 = reduce(add, 0.0, ys);
                    } else {
                        s: Float32 = 0.0;
                    }
                    t: Float32 = reduce(add, s, ys);
                    return t;
                }
            "},
            Target::Cuda,
        );

        assert!(
            text.starts_with(indoc! {"
                float entry(sequence<cuda_tag, float> xs, bool c) {
                    sequence<cuda_tag, float> ys = map(incr, xs);
                    float s;
                    if (c) {
                        sp_cuarray ys_phase0 = phase_boundary(ys);
                        // phase boundary
                        s = reduce(add, 0.0, ys_phase0);
                    } else {
                        s = 0.0;
                    }
                    sp_cuarray ys_phase1 = phase_boundary(ys);
                    // phase boundary
                    float t = reduce(add, s, ys_phase1);
                    return t;
                }
            "}),
            "{text}"
        );
    }

    #[test]
    fn declarations_and_directives() {
        let float = Type::scalar(ScalarKind::Float32);
        let module = Suite::new(vec![
            Rc::new(Statement::Include {
                path: "thrust/tuple.h".into(),
                system: true,
            }),
            Rc::new(Statement::Include {
                path: "prelude.hpp".into(),
                system: false,
            }),
            Rc::new(Statement::Namespace {
                name: "kernels".into(),
                body: Suite::new(vec![
                    Rc::new(Statement::Typedef {
                        origin: convert_type(&Type::sequence(float.clone())),
                        rename: "floats".into(),
                    }),
                    Rc::new(Statement::Declare(typed_name("count", Type::scalar(ScalarKind::Int32)))),
                ]),
            }),
            Rc::new(Statement::Structure {
                name: "pair".into(),
                type_variables: Rc::from(vec![InternedSymbol::new("a")]),
                body: Suite::new(vec![Rc::new(Statement::Declare(typed_name(
                    "first",
                    Type::named("a"),
                )))]),
            }),
        ]);

        let text = strip_ansi_escapes::strip_str(pretty_print(&module, Target::Cuda).expect("fully typed"));

        assert_eq!(
            text,
            indoc! {r#"
                #include <thrust/tuple.h>

                #include "prelude.hpp"

                namespace kernels {
                    typedef sequence<cuda_tag, float> floats;
                    int count;
                }

                template<typename a>
                struct pair {
                    a first;
                };
            "#}
        );
    }

    #[test]
    fn untyped_nodes_cannot_be_printed() {
        let unit = parse_str(indoc! {"
            procedure entry(x: Int32) -> Int32 {
                return x;
            }
        "})
        .expect("valid source");

        assert!(matches!(
            pretty_print(&unit.module, Target::Cuda),
            Err(CompileError::MissingImplementationType(_))
        ));
    }
}
