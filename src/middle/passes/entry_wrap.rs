//! Appends the host-callable wrapper around the entry procedure. The host
//! hands over owning containers; the wrapper derives views from them, calls
//! the entry procedure and returns its container-backed result.

use std::rc::Rc;

use tracing::debug;

use crate::{
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{
        ast::{Expression, Procedure, Statement, Suite},
        ctype::CType,
        names::{container_name, snippet, wrapper_name},
        ty::{Type, TypeKind},
    },
};

/// What the host marshaling layer needs to know to call the wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct WrapInfo {
    pub name: InternedSymbol,
    pub result: CType,
    /// Wrapper parameters in call order
    pub arguments: Vec<(InternedSymbol, CType)>,
}

fn malformed(entry_point: InternedSymbol, reason: impl Into<String>) -> CompileError {
    CompileError::MalformedEntryPoint {
        name: entry_point.to_string(),
        reason: reason.into(),
    }
}

fn implementation_type(expression: &Expression) -> CompileResult<&CType> {
    expression
        .ctype
        .as_ref()
        .ok_or_else(|| CompileError::MissingImplementationType(expression.to_string()))
}

pub fn entry_wrap(
    module: &Rc<Suite>,
    entry_point: InternedSymbol,
) -> CompileResult<(Rc<Suite>, WrapInfo)> {
    let procedure = module
        .find_procedure(entry_point)
        .ok_or_else(|| CompileError::MissingEntryPoint(entry_point.to_string()))?;

    let TypeKind::Function { result, .. } = &*procedure.name.ty else {
        return Err(malformed(
            entry_point,
            format!("`{}` is not a monomorphic function type", procedure.name.ty),
        ));
    };
    let result_ctype = implementation_type(&procedure.name)?
        .result_type()
        .cloned()
        .ok_or_else(|| malformed(entry_point, "its implementation type is not a function"))?;

    let mut parameters = Vec::with_capacity(procedure.arguments.len());
    let mut arguments = Vec::with_capacity(procedure.arguments.len());
    let mut body = Vec::new();

    for argument in procedure.arguments.iter() {
        let symbol = argument
            .as_name()
            .ok_or_else(|| malformed(entry_point, format!("argument `{argument}` is not a name")))?;
        let ctype = implementation_type(argument)?;

        if !argument.needs_container() {
            parameters.push(argument.clone());
            arguments.push((symbol, ctype.clone()));
            continue;
        }

        let container_symbol = container_name(symbol);
        let container = Expression::name(
            container_symbol,
            argument.ty.clone(),
            Some(ctype.container_type()),
        );

        body.push(Statement::bind(
            argument.clone(),
            Expression::apply_snippet(
                snippet::make_sequence(),
                vec![container.clone()],
                argument.ty.clone(),
                Some(ctype.clone()),
            ),
        ));
        parameters.push(container);
        arguments.push((container_symbol, ctype.container_type()));
    }

    let result_container = result_ctype.container_type();

    body.push(Statement::ret(Expression::apply(
        procedure.name.clone(),
        procedure.arguments.to_vec(),
        result.clone(),
        Some(result_ctype),
    )));

    let info = WrapInfo {
        name: wrapper_name(entry_point),
        result: result_container.clone(),
        arguments,
    };

    let wrapper = Procedure {
        name: Expression::name(
            info.name,
            Type::function(parameters.iter().map(|p| p.ty.clone()), result.clone()),
            Some(CType::function(
                info.arguments.iter().map(|(_, ctype)| ctype.clone()),
                result_container,
            )),
        ),
        arguments: parameters.into(),
        body: Suite::new(body),
    };

    debug!(wrapper = %info.name, arguments = info.arguments.len(), "wrapped entry procedure");

    let mut statements = module.statements.to_vec();
    statements.push(Rc::new(Statement::Procedure(Rc::new(wrapper))));

    Ok((Suite::new(statements), info))
}
