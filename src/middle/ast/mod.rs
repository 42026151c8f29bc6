//! The typed program tree every pass consumes and produces. Nodes are
//! immutable and shared through [`Rc`], so a pass that only touches a few
//! statements hands most of the previous tree to the next pass untouched.
//!
//! Expressions carry their source type from the frontend. The implementation
//! type is filled in by type conversion and is required by everything
//! downstream of it.

use std::rc::Rc;

use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{ctype::CType, names, ty::Type},
};

pub mod rewrite;

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub ty: Type,
    pub ctype: Option<CType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// xs
    Name(InternedSymbol),
    /// 1, 2.5, true
    Literal(InternedSymbol),
    /// (a, b)
    Tuple(Rc<[Rc<Expression>]>),
    /// f(a, b)
    ///
    /// The function is always a name, either of a procedure or of a compiler
    /// snippet like `thrust::get<0>`
    Apply {
        function: Rc<Expression>,
        arguments: Rc<[Rc<Expression>]>,
    },
    /// closure f [a, b]
    ///
    /// A deferred call of `function` with `captured` bound ahead of the
    /// remaining arguments
    Closure {
        function: Rc<Expression>,
        captured: Rc<[Rc<Expression>]>,
    },
}

impl Expression {
    pub fn new(kind: ExpressionKind, ty: Type, ctype: Option<CType>) -> Rc<Self> {
        Rc::new(Self { kind, ty, ctype })
    }

    pub fn name(symbol: InternedSymbol, ty: Type, ctype: Option<CType>) -> Rc<Self> {
        Self::new(ExpressionKind::Name(symbol), ty, ctype)
    }

    pub fn literal(symbol: InternedSymbol, ty: Type, ctype: Option<CType>) -> Rc<Self> {
        Self::new(ExpressionKind::Literal(symbol), ty, ctype)
    }

    pub fn tuple(elements: Vec<Rc<Expression>>, ty: Type, ctype: Option<CType>) -> Rc<Self> {
        Self::new(ExpressionKind::Tuple(elements.into()), ty, ctype)
    }

    pub fn apply(
        function: Rc<Expression>,
        arguments: Vec<Rc<Expression>>,
        ty: Type,
        ctype: Option<CType>,
    ) -> Rc<Self> {
        Self::new(
            ExpressionKind::Apply {
                function,
                arguments: arguments.into(),
            },
            ty,
            ctype,
        )
    }

    /// Applies a compiler snippet such as `thrust::make_tuple`. The snippet
    /// name gets a function type built from the argument and result types.
    pub fn apply_snippet(
        snippet: InternedSymbol,
        arguments: Vec<Rc<Expression>>,
        ty: Type,
        ctype: Option<CType>,
    ) -> Rc<Self> {
        let function_ty = Type::function(arguments.iter().map(|a| a.ty.clone()), ty.clone());
        let function_ctype = ctype.as_ref().and_then(|result| {
            arguments
                .iter()
                .map(|a| a.ctype.clone())
                .collect::<Option<Vec<_>>>()
                .map(|parameters| CType::function(parameters, result.clone()))
        });

        Self::apply(
            Self::name(snippet, function_ty, function_ctype),
            arguments,
            ty,
            ctype,
        )
    }

    /// A copy of this expression under a different implementation type
    pub fn with_ctype(&self, ctype: CType) -> Rc<Self> {
        Self::new(self.kind.clone(), self.ty.clone(), Some(ctype))
    }

    /// A name expression with the same types as this one
    pub fn renamed(&self, symbol: InternedSymbol) -> Rc<Self> {
        Self::name(symbol, self.ty.clone(), self.ctype.clone())
    }

    pub fn as_name(&self) -> Option<InternedSymbol> {
        match self.kind {
            ExpressionKind::Name(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn is_name(&self) -> bool {
        self.as_name().is_some()
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind, ExpressionKind::Tuple(_))
    }

    pub fn is_apply(&self) -> bool {
        matches!(self.kind, ExpressionKind::Apply { .. })
    }

    /// The name of the called function when this is an application
    pub fn callee(&self) -> Option<InternedSymbol> {
        match &self.kind {
            ExpressionKind::Apply { function, .. } => function.as_name(),
            _ => None,
        }
    }

    pub fn arguments(&self) -> &[Rc<Expression>] {
        match &self.kind {
            ExpressionKind::Apply { arguments, .. } => arguments,
            _ => &[],
        }
    }

    /// Whether this value holds sequence data that lives in a view rather
    /// than an owning container
    pub fn needs_container(&self) -> bool {
        self.ctype
            .as_ref()
            .map(|c| c.needs_container())
            .unwrap_or_else(|| self.ty.is_aggregate())
    }

    /// Every name referenced anywhere in this expression, in order of
    /// appearance
    pub fn referenced_names(&self) -> Vec<InternedSymbol> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<InternedSymbol>) {
        match &self.kind {
            ExpressionKind::Name(symbol) => names.push(*symbol),
            ExpressionKind::Literal(_) => {}
            ExpressionKind::Tuple(elements) => {
                for element in elements.iter() {
                    element.collect_names(names);
                }
            }
            ExpressionKind::Apply {
                function,
                arguments,
            } => {
                function.collect_names(names);

                for argument in arguments.iter() {
                    argument.collect_names(names);
                }
            }
            ExpressionKind::Closure { function, captured } => {
                function.collect_names(names);

                for value in captured.iter() {
                    value.collect_names(names);
                }
            }
        }
    }
}

impl core::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExpressionKind::Name(symbol) | ExpressionKind::Literal(symbol) => write!(f, "{symbol}"),
            ExpressionKind::Tuple(elements) => write!(f, "({})", elements.iter().join(", ")),
            ExpressionKind::Apply {
                function,
                arguments,
            } => write!(f, "{function}({})", arguments.iter().join(", ")),
            ExpressionKind::Closure { function, captured } => {
                write!(f, "closure {function} [{}]", captured.iter().join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    /// The procedure's name, typed with its (poly)function type
    pub name: Rc<Expression>,
    pub arguments: Rc<[Rc<Expression>]>,
    pub body: Rc<Suite>,
}

impl Procedure {
    pub fn symbol(&self) -> Option<InternedSymbol> {
        self.name.as_name()
    }

    /// Names of the formal parameters. Fails on the first parameter that is
    /// not a plain name.
    pub fn argument_names(&self) -> Option<Vec<InternedSymbol>> {
        self.arguments.iter().map(|a| a.as_name()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// lhs = rhs
    Bind {
        lhs: Rc<Expression>,
        rhs: Rc<Expression>,
    },
    /// return value
    Return(Rc<Expression>),
    Procedure(Rc<Procedure>),
    /// if test { then } else { orelse }
    Conditional {
        test: Rc<Expression>,
        then: Rc<Suite>,
        orelse: Rc<Suite>,
    },
    /// while predicate { body }
    While {
        predicate: Rc<Expression>,
        body: Rc<Suite>,
    },
    /// A templated struct definition
    Structure {
        name: InternedSymbol,
        type_variables: Rc<[InternedSymbol]>,
        body: Rc<Suite>,
    },
    /// typedef origin rename
    Typedef {
        origin: CType,
        rename: InternedSymbol,
    },
    Namespace {
        name: InternedSymbol,
        body: Rc<Suite>,
    },
    /// #include <path> or #include "path"
    Include {
        path: InternedSymbol,
        system: bool,
    },
    /// A declaration without initializer
    Declare(Rc<Expression>),
}

impl Statement {
    pub fn bind(lhs: Rc<Expression>, rhs: Rc<Expression>) -> Rc<Self> {
        Rc::new(Statement::Bind { lhs, rhs })
    }

    pub fn ret(value: Rc<Expression>) -> Rc<Self> {
        Rc::new(Statement::Return(value))
    }

    /// Whether this statement is a `phase_boundary` bind
    pub fn is_phase_boundary(&self) -> bool {
        match self {
            Statement::Bind { rhs, .. } => rhs.callee() == Some(names::snippet::phase_boundary()),
            _ => false,
        }
    }

    /// Every name referenced by this statement and the statements nested in
    /// it, in order of appearance
    pub fn referenced_names(&self) -> Vec<InternedSymbol> {
        match self {
            Statement::Bind { lhs, rhs } => {
                let mut names = lhs.referenced_names();
                names.extend(rhs.referenced_names());
                names
            }
            Statement::Return(value) | Statement::Declare(value) => value.referenced_names(),
            Statement::Procedure(procedure) => {
                let mut names = procedure.name.referenced_names();

                for argument in procedure.arguments.iter() {
                    names.extend(argument.referenced_names());
                }

                names.extend(procedure.body.referenced_names());
                names
            }
            Statement::Conditional { test, then, orelse } => {
                let mut names = test.referenced_names();
                names.extend(then.referenced_names());
                names.extend(orelse.referenced_names());
                names
            }
            Statement::While { predicate, body } => {
                let mut names = predicate.referenced_names();
                names.extend(body.referenced_names());
                names
            }
            Statement::Structure { body, .. } | Statement::Namespace { body, .. } => {
                body.referenced_names()
            }
            Statement::Typedef { .. } | Statement::Include { .. } => Vec::new(),
        }
    }

    /// Targets of the binds in this statement and in the conditionals and
    /// loops nested in it, first binding of each name only
    pub fn bound_targets(&self) -> Vec<Rc<Expression>> {
        let mut targets = Vec::new();
        self.collect_bound_targets(&mut targets);

        targets
            .into_iter()
            .unique_by(|target| target.as_name())
            .collect()
    }

    fn collect_bound_targets(&self, targets: &mut Vec<Rc<Expression>>) {
        match self {
            Statement::Bind { lhs, .. } if lhs.is_name() => targets.push(lhs.clone()),
            Statement::Conditional { then, orelse, .. } => {
                for statement in then.statements.iter().chain(orelse.statements.iter()) {
                    statement.collect_bound_targets(targets);
                }
            }
            Statement::While { body, .. } => {
                for statement in body.statements.iter() {
                    statement.collect_bound_targets(targets);
                }
            }
            _ => {}
        }
    }
}

impl Statement {
    fn write_indented(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        let indent = "    ".repeat(depth);

        match self {
            Statement::Bind { lhs, rhs } => writeln!(f, "{indent}{lhs} = {rhs}"),
            Statement::Return(value) => writeln!(f, "{indent}return {value}"),
            Statement::Procedure(procedure) => {
                writeln!(
                    f,
                    "{indent}procedure {}({}) {{",
                    procedure.name,
                    procedure.arguments.iter().join(", ")
                )?;
                procedure.body.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Statement::Conditional { test, then, orelse } => {
                writeln!(f, "{indent}if {test} {{")?;
                then.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}} else {{")?;
                orelse.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Statement::While { predicate, body } => {
                writeln!(f, "{indent}while {predicate} {{")?;
                body.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Statement::Structure {
                name,
                type_variables,
                body,
            } => {
                writeln!(f, "{indent}struct {name}<{}> {{", type_variables.iter().join(", "))?;
                body.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Statement::Typedef { origin, rename } => writeln!(f, "{indent}typedef {origin} {rename}"),
            Statement::Namespace { name, body } => {
                writeln!(f, "{indent}namespace {name} {{")?;
                body.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Statement::Include { path, system: true } => writeln!(f, "{indent}include <{path}>"),
            Statement::Include { path, system: false } => writeln!(f, "{indent}include \"{path}\""),
            Statement::Declare(value) => writeln!(f, "{indent}declare {value}"),
        }
    }
}

/// One statement per line, nested blocks indented by four spaces
impl core::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_indented(f, 0)
    }
}

/// An ordered sequence of statements. A translation unit is a suite whose
/// statements are procedures.
#[derive(Debug, Clone, PartialEq)]
pub struct Suite {
    pub statements: Rc<[Rc<Statement>]>,
}

impl Suite {
    pub fn new(statements: Vec<Rc<Statement>>) -> Rc<Self> {
        Rc::new(Self {
            statements: statements.into(),
        })
    }

    pub fn procedures(&self) -> impl Iterator<Item = &Rc<Procedure>> {
        self.statements.iter().filter_map(|s| match &**s {
            Statement::Procedure(procedure) => Some(procedure),
            _ => None,
        })
    }

    pub fn find_procedure(&self, name: InternedSymbol) -> Option<&Rc<Procedure>> {
        self.procedures().find(|p| p.symbol() == Some(name))
    }

    pub fn referenced_names(&self) -> Vec<InternedSymbol> {
        self.statements
            .iter()
            .flat_map(|s| s.referenced_names())
            .collect()
    }

    /// Splits the statements into the groups separated by phase boundaries.
    /// Each boundary closes the group it appears in. Everything written in
    /// one group is visible to every later group.
    pub fn phases(&self) -> Vec<Vec<Rc<Statement>>> {
        let mut phases = vec![Vec::new()];

        for statement in self.statements.iter() {
            if let Some(current) = phases.last_mut() {
                current.push(statement.clone());
            }

            if statement.is_phase_boundary() {
                phases.push(Vec::new());
            }
        }

        if phases.len() > 1 && phases.last().is_some_and(|p| p.is_empty()) {
            phases.pop();
        }

        phases
    }

    fn write_indented(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        for statement in self.statements.iter() {
            statement.write_indented(f, depth)?;
        }

        Ok(())
    }

    /// The rendered statements of the procedure called `name`, one line each.
    /// Mostly useful for inspecting pass output.
    pub fn procedure_lines(&self, name: &str) -> Option<Vec<String>> {
        let procedure = self.find_procedure(InternedSymbol::new(name))?;

        Some(
            procedure
                .body
                .to_string()
                .lines()
                .map(str::to_owned)
                .collect(),
        )
    }
}

impl core::fmt::Display for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{primitive::ScalarKind, ty::Type};

    fn seq() -> Type {
        Type::sequence(Type::scalar(ScalarKind::Float32))
    }

    fn name(value: &str) -> Rc<Expression> {
        Expression::name(InternedSymbol::new(value), seq(), None)
    }

    #[test]
    fn phases_split_after_each_boundary() {
        let boundary = Statement::bind(
            name("xs_phase0"),
            Expression::apply_snippet(names::snippet::phase_boundary(), vec![name("xs")], seq(), None),
        );
        let suite = Suite::new(vec![
            Statement::bind(name("xs"), name("ys")),
            boundary.clone(),
            Statement::ret(name("xs_phase0")),
        ]);

        let phases = suite.phases();

        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].len(), 2);
        assert!(Rc::ptr_eq(&phases[0][1], &boundary));
        assert_eq!(phases[1].len(), 1);
    }

    #[test]
    fn referenced_names_walk_nested_expressions() {
        let call = Expression::apply(
            name("f"),
            vec![name("a"), Expression::tuple(vec![name("b"), name("c")], seq(), None)],
            seq(),
            None,
        );

        let names = call
            .referenced_names()
            .into_iter()
            .map(|n| n.value())
            .collect::<Vec<_>>();

        assert_eq!(names, ["f", "a", "b", "c"]);
        assert_eq!(call.to_string(), "f(a, (b, c))");
    }

    #[test]
    fn bound_targets_reach_into_branches_and_loops() {
        let conditional = Rc::new(Statement::Conditional {
            test: name("c"),
            then: Suite::new(vec![Statement::bind(name("s"), name("xs"))]),
            orelse: Suite::new(vec![
                Statement::bind(name("s"), name("ys")),
                Rc::new(Statement::While {
                    predicate: name("c"),
                    body: Suite::new(vec![Statement::bind(name("t"), name("s"))]),
                }),
            ]),
        });

        let targets = conditional
            .bound_targets()
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>();

        assert_eq!(targets, ["s", "t"]);
        assert!(Statement::ret(name("s")).bound_targets().is_empty());
    }
}
