//! Inserts phase boundaries so that no kernel reads a value whose producing
//! kernels may still be in flight.
//!
//! Every binding carries a [`Completion`]. Calls to procedures registered as
//! [`Synchronization::Forces`] need their aggregate arguments complete, so
//! pending ones are realized right before the call with
//! `x_phaseN = phase_boundary(x)`. Later reads of `x` in the same scope go
//! through the realized name. The entry procedure additionally has to hand
//! back values that are complete and backed by a container.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use strum::Display;
use tracing::{debug, trace};

use crate::{
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{
        ast::{
            Expression, ExpressionKind, Procedure, Statement, Suite,
            rewrite::{self, Rewriter, unchanged},
        },
        ctype::CType,
        environment::Environment,
        names::{NameSupply, container_name, snippet},
        passes::containerize::container_of,
        registry::{Registry, Synchronization},
        ty::Type,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Completion {
    /// Not seen yet on every path reaching this point
    Unknown,
    /// A pending composition of views
    Incomplete,
    /// Fully computed
    Complete,
}

impl Completion {
    /// Joins the states of two control flow paths. A value pending on either
    /// path is pending after the join.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Completion::Incomplete, _) | (_, Completion::Incomplete) => Completion::Incomplete,
            (Completion::Complete, Completion::Complete) => Completion::Complete,
            _ => Completion::Unknown,
        }
    }

    fn all(completions: impl IntoIterator<Item = Completion>) -> Self {
        completions
            .into_iter()
            .fold(Completion::Complete, Completion::merge)
    }
}

type Components = Rc<[Rc<Expression>]>;

pub struct PhaseAnalyzer {
    registry: Registry,
    entry_point: InternedSymbol,
    analyzed: HashSet<InternedSymbol>,
    active: bool,
    in_entry: bool,

    completions: Environment<InternedSymbol, Completion>,
    /// Realized replacements for names read after a boundary. `None` shadows
    /// an outer replacement after a rebind.
    substitutions: Environment<InternedSymbol, Option<Rc<Expression>>>,
    /// Fields of names bound to `make_tuple`
    components: Environment<InternedSymbol, Option<Components>>,
    closures: Environment<InternedSymbol, Option<Rc<Expression>>>,
    /// Names bound in the current scope
    bound: Environment<InternedSymbol, ()>,
    /// Names holding the result of a self call of the entry procedure
    self_results: HashSet<InternedSymbol>,

    /// Statements to emit ahead of the statement being rewritten
    pre_boundaries: Vec<Rc<Statement>>,
    phases: NameSupply,
    temporaries: NameSupply,
    boundaries: usize,
}

/// Resolves the parameter type a call demands of an argument. A bare type
/// variable demands whatever the argument actually is.
fn resolve_demand(demand: &Type, actual: &Type) -> Type {
    if demand.variable_name().is_some() {
        actual.clone()
    } else {
        demand.clone()
    }
}

fn field_demands(demand: &Type, fields: &[Rc<Expression>]) -> Vec<Type> {
    match demand.tuple_fields() {
        Some(demands) if demands.len() == fields.len() => demands.to_vec(),
        _ => fields.iter().map(|f| f.ty.clone()).collect(),
    }
}

fn all_unchanged(before: &[Rc<Expression>], after: &[Rc<Expression>]) -> bool {
    before.len() == after.len() && before.iter().zip(after).all(|(b, a)| unchanged(b, a))
}

fn rebuild_apply(expression: &Rc<Expression>, arguments: Vec<Rc<Expression>>) -> Rc<Expression> {
    match &expression.kind {
        ExpressionKind::Apply {
            function,
            arguments: before,
        } if !all_unchanged(before, &arguments) => Expression::apply(
            function.clone(),
            arguments,
            expression.ty.clone(),
            expression.ctype.clone(),
        ),
        _ => expression.clone(),
    }
}

fn rebuild_closure(expression: &Rc<Expression>, captured: Vec<Rc<Expression>>) -> Rc<Expression> {
    match &expression.kind {
        ExpressionKind::Closure {
            function,
            captured: before,
        } if !all_unchanged(before, &captured) => Expression::new(
            ExpressionKind::Closure {
                function: function.clone(),
                captured: captured.into(),
            },
            expression.ty.clone(),
            expression.ctype.clone(),
        ),
        _ => expression.clone(),
    }
}

fn rebuild_tuple(expression: &Rc<Expression>, elements: Vec<Rc<Expression>>) -> Rc<Expression> {
    match &expression.kind {
        ExpressionKind::Tuple(before) if !all_unchanged(before, &elements) => Expression::tuple(
            elements,
            expression.ty.clone(),
            expression.ctype.clone(),
        ),
        _ => expression.clone(),
    }
}

/// The entry procedure and every procedure of the unit it calls, directly or
/// not
fn reachable_procedures(module: &Suite, entry_point: InternedSymbol) -> HashSet<InternedSymbol> {
    let mut reachable = HashSet::new();
    let mut pending = vec![entry_point];

    while let Some(symbol) = pending.pop() {
        let Some(procedure) = module.find_procedure(symbol) else {
            continue;
        };

        if reachable.insert(symbol) {
            pending.extend(procedure.body.referenced_names());
        }
    }

    reachable
}

impl PhaseAnalyzer {
    /// Procedures defined in the unit but missing from `registry` are
    /// registered as forcing their arguments with their own signature.
    pub fn new(module: &Suite, registry: &Registry, entry_point: InternedSymbol) -> Self {
        let mut registry = registry.clone();

        for procedure in module.procedures() {
            if let Some(symbol) = procedure.symbol().filter(|s| !registry.contains(*s)) {
                registry.insert(symbol, procedure.name.ty.clone(), Synchronization::Forces);
            }
        }

        Self {
            registry,
            entry_point,
            analyzed: reachable_procedures(module, entry_point),
            active: false,
            in_entry: false,
            completions: Environment::new(),
            substitutions: Environment::new(),
            components: Environment::new(),
            closures: Environment::new(),
            bound: Environment::new(),
            self_results: HashSet::new(),
            pre_boundaries: Vec::new(),
            phases: NameSupply::new("_phase"),
            temporaries: NameSupply::new("_sync"),
            boundaries: 0,
        }
    }

    fn begin_scope(&mut self) {
        self.completions.begin_scope();
        self.substitutions.begin_scope();
        self.components.begin_scope();
        self.closures.begin_scope();
        self.bound.begin_scope();
    }

    /// Pops a scope, handing back its completions and the names it bound
    fn end_scope(&mut self) -> (HashMap<InternedSymbol, Completion>, Vec<InternedSymbol>) {
        self.substitutions.end_scope();
        self.components.end_scope();
        self.closures.end_scope();

        let bound = self.bound.end_scope().into_keys().collect();

        (self.completions.end_scope(), bound)
    }

    /// Forgets what is known about the value of a name that was rebound in a
    /// nested scope
    fn invalidate(&mut self, symbol: InternedSymbol) {
        self.substitutions.insert(symbol, None);
        self.components.insert(symbol, None);
        self.closures.insert(symbol, None);
    }

    /// The expression to read in place of `expression`
    fn current(&self, expression: &Rc<Expression>) -> Rc<Expression> {
        expression
            .as_name()
            .and_then(|symbol| self.substitutions.get(&symbol).cloned().flatten())
            .unwrap_or_else(|| expression.clone())
    }

    fn completion_of(&self, symbol: InternedSymbol) -> Completion {
        self.completions
            .get(&symbol)
            .copied()
            .unwrap_or(Completion::Unknown)
    }

    fn completion_of_value(&self, expression: &Expression) -> Completion {
        match &expression.kind {
            ExpressionKind::Name(symbol) => self.completion_of(*symbol),
            ExpressionKind::Tuple(elements) => {
                Completion::all(elements.iter().map(|e| self.completion_of_value(e)))
            }
            ExpressionKind::Literal(_)
            | ExpressionKind::Apply { .. }
            | ExpressionKind::Closure { .. } => Completion::Complete,
        }
    }

    fn components_of(&self, symbol: InternedSymbol) -> Option<Components> {
        self.components.get(&symbol).cloned().flatten()
    }

    fn closure_of(&self, symbol: InternedSymbol) -> Option<Rc<Expression>> {
        self.closures.get(&symbol).cloned().flatten()
    }

    /// Whether a container form of this value is bound, or it needs none
    fn is_backed(&self, value: &Expression) -> bool {
        !value.needs_container()
            || value
                .as_name()
                .is_some_and(|symbol| self.completions.contains(&container_name(symbol)))
    }

    fn record(&mut self, target: InternedSymbol, value: &Rc<Expression>, completion: Completion) {
        let components = if value.callee() == Some(snippet::make_tuple()) {
            Some(value.arguments().into())
        } else {
            value.as_name().and_then(|s| self.components_of(s))
        };
        let closure = match &value.kind {
            ExpressionKind::Closure { .. } => Some(value.clone()),
            ExpressionKind::Name(symbol) => self.closure_of(*symbol),
            _ => None,
        };

        trace!(name = %target, %completion, "binding");

        self.completions.insert(target, completion);
        self.components.insert(target, components);
        self.closures.insert(target, closure);
        self.bound.declare(target);

        if value.callee() == Some(self.entry_point) {
            self.self_results.insert(target);
        } else {
            self.self_results.remove(&target);
        }

        if self.substitutions.contains(&target) {
            self.substitutions.insert(target, None);
        }
    }

    /// Emits `x_phaseN = phase_boundary(x)` and reads `x` through the new
    /// name from here on
    fn insert_boundary(&mut self, value: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        let symbol = value.as_name().ok_or_else(|| CompileError::ExpectedName {
            context: "a phase boundary",
            found: value.to_string(),
        })?;
        let ctype = value
            .ctype
            .as_ref()
            .ok_or_else(|| CompileError::MissingImplementationType(value.to_string()))?
            .container_type();
        let realized_symbol = self.phases.derive(symbol);
        let realized = Expression::name(realized_symbol, value.ty.clone(), Some(ctype.clone()));

        debug!(value = %symbol, realized = %realized_symbol, "inserting phase boundary");

        self.pre_boundaries.push(Statement::bind(
            realized.clone(),
            Expression::apply_snippet(
                snippet::phase_boundary(),
                vec![value.clone()],
                value.ty.clone(),
                Some(ctype),
            ),
        ));
        self.boundaries += 1;

        self.completions.insert(realized_symbol, Completion::Complete);
        self.completions.insert(symbol, Completion::Complete);
        self.substitutions.insert(symbol, Some(realized.clone()));

        Ok(realized)
    }

    /// Binds a rebuilt tuple under a fresh name derived from `symbol`
    fn bind_tuple(
        &mut self,
        symbol: InternedSymbol,
        like: &Rc<Expression>,
        fields: Vec<Rc<Expression>>,
        ctype: Option<CType>,
    ) -> Rc<Expression> {
        let fresh_symbol = self.phases.derive(symbol);
        let fresh = Expression::name(fresh_symbol, like.ty.clone(), ctype.clone());
        let completion = Completion::all(fields.iter().map(|f| self.completion_of_value(f)));

        self.pre_boundaries.push(Statement::bind(
            fresh.clone(),
            Expression::apply_snippet(snippet::make_tuple(), fields.clone(), like.ty.clone(), ctype),
        ));

        self.completions.insert(fresh_symbol, completion);
        self.completions.insert(symbol, completion);
        self.components.insert(fresh_symbol, Some(fields.into()));
        self.substitutions.insert(symbol, Some(fresh.clone()));

        fresh
    }

    fn analyze_all(
        &mut self,
        expressions: &[Rc<Expression>],
    ) -> CompileResult<(Vec<Rc<Expression>>, Completion)> {
        let mut analyzed = Vec::with_capacity(expressions.len());
        let mut completion = Completion::Complete;

        for expression in expressions {
            let (value, value_completion) = self.analyze_expression(expression)?;

            analyzed.push(value);
            completion = completion.merge(value_completion);
        }

        Ok((analyzed, completion))
    }

    /// Rewrites reads through realized names and works out the completion of
    /// the value
    fn analyze_expression(
        &mut self,
        expression: &Rc<Expression>,
    ) -> CompileResult<(Rc<Expression>, Completion)> {
        match &expression.kind {
            ExpressionKind::Name(_) => {
                let current = self.current(expression);
                let completion = self.completion_of_value(&current);

                Ok((current, completion))
            }
            ExpressionKind::Literal(_) => Ok((expression.clone(), Completion::Complete)),
            ExpressionKind::Tuple(elements) => {
                let (elements, completion) = self.analyze_all(elements)?;

                Ok((rebuild_tuple(expression, elements), completion))
            }
            // Captures keep whatever state they have; only the call that
            // eventually runs the closure can force them
            ExpressionKind::Closure { captured, .. } => {
                let (captured, _) = self.analyze_all(captured)?;

                Ok((rebuild_closure(expression, captured), Completion::Complete))
            }
            ExpressionKind::Apply { .. } => self.analyze_apply(expression),
        }
    }

    fn analyze_apply(
        &mut self,
        expression: &Rc<Expression>,
    ) -> CompileResult<(Rc<Expression>, Completion)> {
        let arguments = expression.arguments();
        let callee = expression
            .callee()
            .ok_or_else(|| CompileError::MalformedApplication {
                callee: expression.to_string(),
                reason: "the called function is not a name".to_owned(),
            })?;

        let (arguments, completion) = if callee == snippet::make_tuple() {
            self.analyze_all(arguments)?
        } else if let Some(index) = snippet::get_index(callee) {
            let (analyzed, completion) = self.analyze_all(arguments)?;
            let field = analyzed
                .first()
                .and_then(|source| source.as_name())
                .and_then(|source| self.components_of(source))
                .and_then(|fields| fields.get(index).cloned());
            let completion = match field {
                Some(field) => self.completion_of_value(&field),
                None => completion,
            };

            (analyzed, completion)
        } else if callee == snippet::phase_boundary() || callee == snippet::make_sequence() {
            (self.analyze_all(arguments)?.0, Completion::Complete)
        } else {
            let info = self.registry.lookup(callee)?.clone();
            let argument_types = arguments.iter().map(|a| a.ty.clone()).collect::<Vec<_>>();
            let (parameters, _) = info.signature.instantiate(&argument_types).ok_or_else(|| {
                CompileError::MalformedApplication {
                    callee: callee.to_string(),
                    reason: format!(
                        "arguments ({}) do not fit {}",
                        argument_types.iter().join(", "),
                        info.signature
                    ),
                }
            })?;

            match info.synchronization {
                Synchronization::Forces => {
                    let forced = arguments
                        .iter()
                        .zip(&parameters)
                        .map(|(argument, parameter)| self.force(argument, parameter))
                        .collect::<CompileResult<Vec<_>>>()?;

                    (forced, Completion::Complete)
                }
                Synchronization::Propagates => {
                    let (analyzed, _) = self.analyze_all(arguments)?;
                    let completion = if expression.ty.is_aggregate() {
                        Completion::Incomplete
                    } else {
                        Completion::Complete
                    };

                    (analyzed, completion)
                }
                Synchronization::Opaque => (self.analyze_all(arguments)?.0, Completion::Complete),
            }
        };

        Ok((rebuild_apply(expression, arguments), completion))
    }

    /// Makes `value` complete in every part `demand` treats as an aggregate
    fn force(&mut self, value: &Rc<Expression>, demand: &Type) -> CompileResult<Rc<Expression>> {
        match &value.kind {
            ExpressionKind::Name(symbol) => {
                let current = self.current(value);
                let forced = self.force_name(&current, demand)?;

                if !unchanged(&current, &forced) {
                    self.substitutions.insert(*symbol, Some(forced.clone()));
                }

                Ok(forced)
            }
            ExpressionKind::Literal(_) => Ok(value.clone()),
            ExpressionKind::Tuple(elements) => {
                let demand = resolve_demand(demand, &value.ty);
                let forced = elements
                    .iter()
                    .zip(field_demands(&demand, elements))
                    .map(|(element, demand)| self.force(element, &demand))
                    .collect::<CompileResult<Vec<_>>>()?;

                Ok(rebuild_tuple(value, forced))
            }
            ExpressionKind::Closure { .. } => self.force_captures(value),
            ExpressionKind::Apply { .. } => {
                let (analyzed, completion) = self.analyze_apply(value)?;

                if completion != Completion::Incomplete
                    || !resolve_demand(demand, &analyzed.ty).is_aggregate()
                {
                    return Ok(analyzed);
                }

                // A pending call nested in a forcing one is bound first so
                // the boundary has a name to realize
                let temporary_symbol = self.temporaries.next();
                let temporary = analyzed.renamed(temporary_symbol);

                self.pre_boundaries
                    .push(Statement::bind(temporary.clone(), analyzed.clone()));
                self.record(temporary_symbol, &analyzed, completion);

                self.force_name(&temporary, demand)
            }
        }
    }

    fn force_name(
        &mut self,
        current: &Rc<Expression>,
        demand: &Type,
    ) -> CompileResult<Rc<Expression>> {
        let Some(symbol) = current.as_name() else {
            return Ok(current.clone());
        };
        let demand = resolve_demand(demand, &current.ty);

        if let Some(closure) = self.closure_of(symbol) {
            let forced = self.force_captures(&closure)?;

            if unchanged(&closure, &forced) {
                return Ok(current.clone());
            }

            let fresh_symbol = self.phases.derive(symbol);
            let fresh = current.renamed(fresh_symbol);

            self.pre_boundaries
                .push(Statement::bind(fresh.clone(), forced.clone()));
            self.completions.insert(fresh_symbol, Completion::Complete);
            self.closures.insert(fresh_symbol, Some(forced));

            return Ok(fresh);
        }

        if !demand.is_aggregate() {
            return Ok(current.clone());
        }

        if let Some(fields) = self.components_of(symbol) {
            let forced = fields
                .iter()
                .zip(field_demands(&demand, &fields))
                .map(|(field, demand)| self.force(field, &demand))
                .collect::<CompileResult<Vec<_>>>()?;

            if all_unchanged(&fields, &forced) {
                return Ok(current.clone());
            }

            return Ok(self.bind_tuple(symbol, current, forced, current.ctype.clone()));
        }

        match self.completion_of(symbol) {
            Completion::Incomplete => self.insert_boundary(current),
            Completion::Complete | Completion::Unknown => Ok(current.clone()),
        }
    }

    fn force_captures(&mut self, closure: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        let ExpressionKind::Closure { captured, .. } = &closure.kind else {
            return Ok(closure.clone());
        };

        let forced = captured
            .iter()
            .map(|value| {
                let demand = value.ty.clone();
                self.force(value, &demand)
            })
            .collect::<CompileResult<Vec<_>>>()?;

        Ok(rebuild_closure(closure, forced))
    }

    /// The form of a value the entry procedure may hand to its caller:
    /// complete, and backed by a container wherever it holds sequences
    fn force_for_return(&mut self, value: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        match &value.kind {
            // The result of a self call is handed back by some other return,
            // which is forced where it appears
            ExpressionKind::Name(symbol) if self.self_results.contains(symbol) => {
                Ok(self.current(value))
            }
            ExpressionKind::Apply { .. } if value.callee() == Some(self.entry_point) => {
                Ok(self.analyze_apply(value)?.0)
            }
            ExpressionKind::Name(_) => {
                let current = self.current(value);
                let Some(symbol) = current.as_name() else {
                    return Ok(current);
                };

                if let Some(fields) = self.components_of(symbol) {
                    let forced = fields
                        .iter()
                        .map(|field| self.force_for_return(field))
                        .collect::<CompileResult<Vec<_>>>()?;

                    if all_unchanged(&fields, &forced) && self.is_backed(&current) {
                        return Ok(current);
                    }

                    let containers = forced
                        .iter()
                        .map(|field| self.container_form(field))
                        .collect::<CompileResult<Vec<_>>>()?;
                    let ctype = containers
                        .iter()
                        .map(|c| c.ctype.clone())
                        .collect::<Option<Vec<_>>>()
                        .map(CType::tuple);

                    return Ok(self.bind_tuple(symbol, &current, containers, ctype));
                }

                if self.completion_of(symbol) == Completion::Incomplete || !self.is_backed(&current)
                {
                    return self.insert_boundary(&current);
                }

                Ok(current)
            }
            ExpressionKind::Literal(_) => Ok(value.clone()),
            ExpressionKind::Tuple(elements) => {
                let forced = elements
                    .iter()
                    .map(|element| self.force_for_return(element))
                    .collect::<CompileResult<Vec<_>>>()?;

                Ok(rebuild_tuple(value, forced))
            }
            ExpressionKind::Closure { .. } => Ok(self.analyze_expression(value)?.0),
            ExpressionKind::Apply { .. } => {
                let (analyzed, completion) = self.analyze_apply(value)?;

                if !analyzed.needs_container() {
                    return Ok(analyzed);
                }

                let temporary_symbol = self.temporaries.next();
                let temporary = analyzed.renamed(temporary_symbol);

                self.pre_boundaries
                    .push(Statement::bind(temporary.clone(), analyzed.clone()));
                self.record(temporary_symbol, &analyzed, completion);

                self.force_for_return(&temporary)
            }
        }
    }

    fn container_form(&self, value: &Rc<Expression>) -> CompileResult<Rc<Expression>> {
        if !value.needs_container() {
            return Ok(value.clone());
        }

        match value.as_name() {
            Some(symbol) if self.completions.contains(&container_name(symbol)) => {
                container_of(value)
            }
            _ => Ok(value.clone()),
        }
    }

    /// Rewrites a branch in a scope of its own
    fn analyze_branch(
        &mut self,
        suite: &Rc<Suite>,
    ) -> CompileResult<(Rc<Suite>, HashMap<InternedSymbol, Completion>, Vec<InternedSymbol>)> {
        self.begin_scope();
        let result = self.rewrite_suite(suite);
        let (completions, bound) = self.end_scope();

        Ok((result?, completions, bound))
    }
}

impl Rewriter for PhaseAnalyzer {
    fn rewrite_suite(&mut self, suite: &Rc<Suite>) -> CompileResult<Rc<Suite>> {
        if !self.active {
            return rewrite::walk_suite(self, suite);
        }

        let mut rewritten = Vec::with_capacity(suite.statements.len());

        for statement in suite.statements.iter() {
            let mut group = self.rewrite_statement(statement)?;

            if !self.pre_boundaries.is_empty() {
                let mut statements = std::mem::take(&mut self.pre_boundaries);
                statements.append(&mut group);
                group = statements;
            }

            rewritten.push(group);
        }

        Ok(rewrite::rebuild_suite(suite, rewritten))
    }

    fn rewrite_procedure(&mut self, procedure: &Rc<Procedure>) -> CompileResult<Rc<Procedure>> {
        let Some(symbol) = procedure.symbol().filter(|s| self.analyzed.contains(s)) else {
            return Ok(procedure.clone());
        };

        debug!(procedure = %symbol, "analyzing phases");

        self.active = true;
        self.in_entry = symbol == self.entry_point;
        self.self_results.clear();
        self.begin_scope();

        for argument in procedure.arguments.iter() {
            if let Some(name) = argument.as_name() {
                self.completions.insert(name, Completion::Complete);

                if self.in_entry && argument.needs_container() {
                    self.completions
                        .insert(container_name(name), Completion::Complete);
                }
            }
        }

        let result = self.rewrite_suite(&procedure.body);

        self.end_scope();
        self.active = false;
        self.in_entry = false;

        let body = result?;

        if unchanged(&procedure.body, &body) {
            return Ok(procedure.clone());
        }

        Ok(Rc::new(Procedure {
            name: procedure.name.clone(),
            arguments: procedure.arguments.clone(),
            body,
        }))
    }

    fn rewrite_bind(
        &mut self,
        statement: &Rc<Statement>,
        lhs: &Rc<Expression>,
        rhs: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        if !self.active {
            return Ok(vec![statement.clone()]);
        }

        let target = lhs.as_name().ok_or_else(|| CompileError::ExpectedName {
            context: "the target of a bind",
            found: lhs.to_string(),
        })?;
        let (value, completion) = self.analyze_expression(rhs)?;

        self.record(target, &value, completion);

        if unchanged(rhs, &value) {
            return Ok(vec![statement.clone()]);
        }

        Ok(vec![Statement::bind(lhs.clone(), value)])
    }

    fn rewrite_return(
        &mut self,
        statement: &Rc<Statement>,
        value: &Rc<Expression>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        if !self.active {
            return Ok(vec![statement.clone()]);
        }

        let returned = if self.in_entry {
            self.force_for_return(value)?
        } else {
            self.analyze_expression(value)?.0
        };

        if unchanged(value, &returned) {
            return Ok(vec![statement.clone()]);
        }

        Ok(vec![Statement::ret(returned)])
    }

    fn rewrite_conditional(
        &mut self,
        statement: &Rc<Statement>,
        test: &Rc<Expression>,
        then: &Rc<Suite>,
        orelse: &Rc<Suite>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        if !self.active {
            return Ok(vec![statement.clone()]);
        }

        let (new_test, _) = self.analyze_expression(test)?;
        // Boundaries for the test belong in front of the whole conditional
        let pending = std::mem::take(&mut self.pre_boundaries);

        let (new_then, then_completions, then_bound) = self.analyze_branch(then)?;
        let (new_orelse, orelse_completions, orelse_bound) = self.analyze_branch(orelse)?;

        let names = then_completions
            .keys()
            .chain(orelse_completions.keys())
            .copied()
            .collect::<HashSet<_>>();

        for name in names {
            let outer = self.completion_of(name);
            let merged = then_completions
                .get(&name)
                .copied()
                .unwrap_or(outer)
                .merge(orelse_completions.get(&name).copied().unwrap_or(outer));

            self.completions.insert(name, merged);
        }

        for name in then_bound.into_iter().chain(orelse_bound) {
            self.invalidate(name);
        }

        self.pre_boundaries = pending;

        if unchanged(test, &new_test) && unchanged(then, &new_then) && unchanged(orelse, &new_orelse)
        {
            return Ok(vec![statement.clone()]);
        }

        Ok(vec![Rc::new(Statement::Conditional {
            test: new_test,
            then: new_then,
            orelse: new_orelse,
        })])
    }

    fn rewrite_while(
        &mut self,
        statement: &Rc<Statement>,
        predicate: &Rc<Expression>,
        body: &Rc<Suite>,
    ) -> CompileResult<Vec<Rc<Statement>>> {
        if !self.active {
            return Ok(vec![statement.clone()]);
        }

        // Every iteration after the first reads the values the body rebinds,
        // never what was realized before the loop
        let rebound = body
            .statements
            .iter()
            .flat_map(|s| s.bound_targets())
            .filter_map(|target| target.as_name())
            .collect::<Vec<_>>();

        for name in &rebound {
            self.invalidate(*name);
        }

        let (new_predicate, _) = self.analyze_expression(predicate)?;
        let pending = std::mem::take(&mut self.pre_boundaries);

        // States at the loop head, refined until one more trip through the
        // body changes nothing
        let mut head = HashMap::<InternedSymbol, Completion>::new();
        let (phases, temporaries, boundaries) =
            (self.phases.clone(), self.temporaries.clone(), self.boundaries);

        let (new_body, exit) = loop {
            // Names drawn by a discarded trip are handed out again
            self.phases = phases.clone();
            self.temporaries = temporaries.clone();
            self.boundaries = boundaries;

            self.begin_scope();

            for (name, completion) in &head {
                self.completions.insert(*name, *completion);
            }

            let result = self.rewrite_suite(body);
            let (completions, _) = self.end_scope();
            let new_body = result?;

            let mut exit = HashMap::new();
            let mut changed = false;

            for (name, inner) in completions {
                let at_head = head
                    .get(&name)
                    .copied()
                    .unwrap_or_else(|| self.completion_of(name));
                let merged = at_head.merge(inner);

                if merged != at_head {
                    head.insert(name, merged);
                    changed = true;
                }

                exit.insert(name, merged);
            }

            if !changed {
                break (new_body, exit);
            }

            trace!("loop state changed, analyzing the body again");
        };

        for (name, completion) in exit {
            self.completions.insert(name, completion);
        }

        self.pre_boundaries = pending;

        if unchanged(predicate, &new_predicate) && unchanged(body, &new_body) {
            return Ok(vec![statement.clone()]);
        }

        Ok(vec![Rc::new(Statement::While {
            predicate: new_predicate,
            body: new_body,
        })])
    }
}

pub fn phase_analyze(
    module: &Rc<Suite>,
    registry: &Registry,
    entry_point: InternedSymbol,
) -> CompileResult<Rc<Suite>> {
    let mut analyzer = PhaseAnalyzer::new(module, registry, entry_point);
    let analyzed = rewrite::walk_module(&mut analyzer, module)?;

    debug!(
        procedures = analyzer.analyzed.len(),
        boundaries = analyzer.boundaries,
        "phase analysis finished"
    );

    Ok(analyzed)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::parse_str,
        middle::passes::{containerize::containerize, tuple_break::tuple_break, type_convert::type_convert},
    };

    const PRELUDE: &str = indoc! {"
        declare map : forall a b . fn(fn(a) -> b, [a]) -> [b] propagates;
        declare reduce : forall a . fn(fn(a, a) -> a, a, [a]) -> a forces;
        declare dot : fn(([Float32], [Float32])) -> Float32 forces;
        declare apply_all : fn(fn(Float32) -> Float32, [Float32]) -> [Float32] forces;
        declare lookup : fn([Float32], Float32) -> Float32 opaque;
        declare incr : fn(Float32) -> Float32 opaque;
        declare add : fn(Float32, Float32) -> Float32 opaque;
    "};

    fn analyze_with(source: &str, registry: Option<Registry>) -> CompileResult<Rc<Suite>> {
        let unit = parse_str(&format!("{PRELUDE}{source}")).expect("valid source");
        let module = type_convert(&unit.module)?;
        let module = tuple_break(&module)?;
        let module = containerize(&module, "entry".into())?;

        phase_analyze(&module, &registry.unwrap_or(unit.registry), "entry".into())
    }

    fn analyze(source: &str) -> Vec<String> {
        analyze_with(source, None)
            .expect("analysis succeeds")
            .procedure_lines("entry")
            .expect("entry is defined")
    }

    #[test]
    fn merging_prefers_incomplete() {
        use Completion::*;

        for (a, b, expected) in [
            (Complete, Complete, Complete),
            (Complete, Incomplete, Incomplete),
            (Unknown, Incomplete, Incomplete),
            (Complete, Unknown, Unknown),
            (Unknown, Unknown, Unknown),
        ] {
            assert_eq!(a.merge(b), expected);
            assert_eq!(b.merge(a), expected);
        }
    }

    #[test]
    fn forcing_call_realizes_pending_argument() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32]) -> Float32 {
                ys: [Float32] = map(incr, xs);
                s: Float32 = reduce(add, 0.0, ys);
                return s;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "ys_phase0 = phase_boundary(ys)",
                "s = reduce(add, 0.0, ys_phase0)",
                "return s",
            ]
        );
    }

    #[test]
    fn complete_arguments_get_no_boundary() {
        let source = indoc! {"
            procedure entry(xs: [Float32]) -> Float32 {
                s: Float32 = reduce(add, 0.0, xs);
                t: Float32 = reduce(add, s, xs);
                return t;
            }
        "};
        let unit = parse_str(&format!("{PRELUDE}{source}")).expect("valid source");
        let module = containerize(
            &tuple_break(&type_convert(&unit.module).expect("typed")).expect("flat"),
            "entry".into(),
        )
        .expect("containerized");

        let analyzed = phase_analyze(&module, &unit.registry, "entry".into()).expect("analysis succeeds");

        assert!(Rc::ptr_eq(&module, &analyzed));
    }

    #[test]
    fn realized_values_are_reused() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32]) -> Float32 {
                ys: [Float32] = map(incr, xs);
                a: Float32 = reduce(add, 0.0, ys);
                b: Float32 = reduce(add, 1.0, ys);
                return a + b;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "ys_phase0 = phase_boundary(ys)",
                "a = reduce(add, 0.0, ys_phase0)",
                "b = reduce(add, 1.0, ys_phase0)",
                "return op_add(a, b)",
            ]
        );
    }

    #[test]
    fn only_pending_tuple_fields_are_forced() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32]) -> Float32 {
                ys: [Float32] = map(incr, xs);
                p: ([Float32], [Float32]) = (ys, xs);
                d: Float32 = dot(p);
                return d;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "p = thrust::make_tuple(ys, xs)",
                "ys_phase0 = phase_boundary(ys)",
                "p_phase1 = thrust::make_tuple(ys_phase0, xs)",
                "d = dot(p_phase1)",
                "return d",
            ]
        );
    }

    #[test]
    fn closures_force_captures_only_when_run() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32]) -> [Float32] {
                ys: [Float32] = map(incr, xs);
                g: fn(Float32) -> Float32 = closure lookup [ys];
                zs: [Float32] = apply_all(g, xs);
                return zs;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "g = closure lookup [ys]",
                "ys_phase0 = phase_boundary(ys)",
                "g_phase1 = closure lookup [ys_phase0]",
                "zs = apply_all(g_phase1, xs)",
                "zs_phase2 = phase_boundary(zs)",
                "return zs_phase2",
            ]
        );
    }

    #[test]
    fn nested_pending_calls_are_bound_first() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32]) -> Float32 {
                s: Float32 = reduce(add, 0.0, map(incr, xs));
                return s;
            }
        "});

        assert_eq!(
            lines,
            [
                "_sync0 = map(incr, xs)",
                "_sync0_phase0 = phase_boundary(_sync0)",
                "s = reduce(add, 0.0, _sync0_phase0)",
                "return s",
            ]
        );
    }

    #[test]
    fn branches_merge_to_incomplete() {
        let lines = analyze(indoc! {"
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
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "if c {",
                "    ys_phase0 = phase_boundary(ys)",
                "    s = reduce(add, 0.0, ys_phase0)",
                "} else {",
                "    s = 0.0",
                "}",
                "ys_phase1 = phase_boundary(ys)",
                "t = reduce(add, s, ys_phase1)",
                "return t",
            ]
        );
    }

    #[test]
    fn loops_are_analyzed_until_stable() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32], n: Int32) -> Float32 {
                ys: [Float32] = xs;
                i: Int32 = 0;
                s: Float32 = 0.0;
                while i < n {
                    s: Float32 = reduce(add, s, ys);
                    ys: [Float32] = map(incr, ys);
                    i: Int32 = i + 1;
                }
                return s;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = xs",
                "i = 0",
                "s = 0.0",
                "while op_lt(i, n) {",
                "    ys_phase0 = phase_boundary(ys)",
                "    s = reduce(add, s, ys_phase0)",
                "    ys = map(incr, ys_phase0)",
                "    i = op_add(i, 1)",
                "}",
                "return s",
            ]
        );
    }

    #[test]
    fn loops_read_rebound_values_instead_of_earlier_realizations() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32], n: Int32) -> Float32 {
                ys: [Float32] = map(incr, xs);
                s: Float32 = reduce(add, 0.0, ys);
                i: Int32 = 0;
                while i < n {
                    s: Float32 = reduce(add, s, ys);
                    ys: [Float32] = map(incr, ys);
                    i: Int32 = i + 1;
                }
                return s;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "ys_phase0 = phase_boundary(ys)",
                "s = reduce(add, 0.0, ys_phase0)",
                "i = 0",
                "while op_lt(i, n) {",
                "    ys_phase1 = phase_boundary(ys)",
                "    s = reduce(add, s, ys_phase1)",
                "    ys = map(incr, ys_phase1)",
                "    i = op_add(i, 1)",
                "}",
                "return s",
            ]
        );
    }

    #[test]
    fn repeated_loop_analysis_reuses_boundary_names() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32], n: Int32) -> Float32 {
                ys: [Float32] = map(incr, xs);
                zs: [Float32] = xs;
                s: Float32 = 0.0;
                i: Int32 = 0;
                while i < n {
                    s: Float32 = reduce(add, s, ys);
                    s: Float32 = reduce(add, s, zs);
                    zs: [Float32] = map(incr, zs);
                    i: Int32 = i + 1;
                }
                return s;
            }
        "});

        assert_eq!(
            lines,
            [
                "ys = map(incr, xs)",
                "zs = xs",
                "s = 0.0",
                "i = 0",
                "while op_lt(i, n) {",
                "    ys_phase0 = phase_boundary(ys)",
                "    s = reduce(add, s, ys_phase0)",
                "    zs_phase1 = phase_boundary(zs)",
                "    s = reduce(add, s, zs_phase1)",
                "    zs = map(incr, zs_phase1)",
                "    i = op_add(i, 1)",
                "}",
                "return s",
            ]
        );
    }

    #[test]
    fn self_calls_of_the_entry_are_returned_as_is() {
        let source = indoc! {"
            procedure entry(xs: [Float32], ys: [Float32], n: Int32) -> [Float32] {
                if n == 0 {
                    return xs;
                } else {
                    r: [Float32] = entry(ys, xs, n - 1);
                    return r;
                }
            }
        "};

        assert_eq!(
            analyze(source),
            [
                "if op_eq(n, 0) {",
                "    return xs",
                "} else {",
                "    r = entry(ys, xs, op_sub(n, 1))",
                "    return r",
                "}",
            ]
        );
    }

    #[test]
    fn returned_tuples_are_container_backed() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32], ys: [Float32]) -> [(Float32, Float32)] {
                zs: [Float32] = map(incr, xs);
                r: [(Float32, Float32)] = (zs, ys);
                return r;
            }
        "});

        assert_eq!(
            lines,
            [
                "zs = map(incr, xs)",
                "r = thrust::make_tuple(zs, ys)",
                "zs_phase0 = phase_boundary(zs)",
                "r_phase1 = thrust::make_tuple(zs_phase0, ys_array)",
                "return r_phase1",
            ]
        );
    }

    #[test]
    fn returned_argument_tuples_need_no_boundary() {
        let lines = analyze(indoc! {"
            procedure entry(xs: [Float32], ys: [Float32]) -> [(Float32, Float32)] {
                r: [(Float32, Float32)] = (xs, ys);
                return r;
            }
        "});

        assert_eq!(
            lines,
            [
                "r = thrust::make_tuple(xs, ys)",
                "r_array = thrust::make_tuple(xs_array, ys_array)",
                "return r",
            ]
        );
    }

    #[test]
    fn unreachable_procedures_are_untouched() {
        let module = analyze_with(
            indoc! {"
                procedure helper(xs: [Float32]) -> Float32 {
                    ys: [Float32] = map(incr, xs);
                    s: Float32 = reduce(add, 0.0, ys);
                    return s;
                }
                procedure entry(xs: [Float32]) -> [Float32] {
                    return xs;
                }
            "},
            None,
        )
        .expect("analysis succeeds");

        assert_eq!(
            module.procedure_lines("helper").expect("helper is defined"),
            [
                "ys = map(incr, xs)",
                "s = reduce(add, 0.0, ys)",
                "return s",
            ]
        );
    }

    #[test]
    fn called_procedures_are_analyzed() {
        let module = analyze_with(
            indoc! {"
                procedure helper(xs: [Float32]) -> Float32 {
                    ys: [Float32] = map(incr, xs);
                    s: Float32 = reduce(add, 0.0, ys);
                    return s;
                }
                procedure entry(xs: [Float32]) -> Float32 {
                    s: Float32 = helper(xs);
                    return s;
                }
            "},
            None,
        )
        .expect("analysis succeeds");

        assert_eq!(
            module.procedure_lines("helper").expect("helper is defined"),
            [
                "ys = map(incr, xs)",
                "ys_phase0 = phase_boundary(ys)",
                "s = reduce(add, 0.0, ys_phase0)",
                "return s",
            ]
        );
    }

    #[test]
    fn unregistered_calls_are_fatal() {
        let result = analyze_with(
            indoc! {"
                procedure entry(xs: [Float32]) -> [Float32] {
                    ys: [Float32] = map(incr, xs);
                    return ys;
                }
            "},
            Some(Registry::default()),
        );

        assert_eq!(result, Err(CompileError::UnregisteredProcedure("map".to_owned())));
    }
}
