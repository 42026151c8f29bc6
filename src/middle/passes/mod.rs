//! The lowering pipeline. Each pass is a function from one tree to the next
//! and they always run in the order [`Compiler::compile`] lists them.

use std::rc::Rc;

use tracing::{debug, info};

use crate::{
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    middle::{ast::Suite, registry::Registry},
};

pub mod containerize;
pub mod entry_wrap;
pub mod iterize;
pub mod phase_analyze;
pub mod tuple_break;
pub mod type_convert;

use entry_wrap::WrapInfo;

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// The procedure the host calls into
    pub entry_point: InternedSymbol,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            entry_point: InternedSymbol::new("entry"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerOutput {
    pub module: Rc<Suite>,
    pub wrap: WrapInfo,
}

pub struct Compiler<'a> {
    options: CompilerOptions,
    registry: &'a Registry,
}

impl<'a> Compiler<'a> {
    pub fn new(options: CompilerOptions, registry: &'a Registry) -> Self {
        Self { options, registry }
    }

    /// Runs every pass over one translation unit. The first failing pass
    /// aborts the unit.
    pub fn compile(&self, module: &Rc<Suite>) -> CompileResult<CompilerOutput> {
        let entry_point = self.options.entry_point;

        if module.find_procedure(entry_point).is_none() {
            return Err(CompileError::MissingEntryPoint(entry_point.to_string()));
        }

        info!(entry = %entry_point, procedures = module.procedures().count(), "compiling unit");

        let module = type_convert::type_convert(module)?;
        debug!("converted types");

        let module = tuple_break::tuple_break(&module)?;
        debug!("flattened tuple binds");

        let module = containerize::containerize(&module, entry_point)?;
        debug!("containerized entry procedure");

        let module = phase_analyze::phase_analyze(&module, self.registry, entry_point)?;
        debug!("inserted phase boundaries");

        let module = iterize::iterize(&module, entry_point)?;
        debug!("eliminated tail recursion");

        let (module, wrap) = entry_wrap::entry_wrap(&module, entry_point)?;

        info!(wrapper = %wrap.name, "compiled unit");

        Ok(CompilerOutput { module, wrap })
    }
}
