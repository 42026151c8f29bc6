//! Spells implementation types as C++ template types.

use itertools::Itertools;

use crate::{
    backend::Target,
    middle::ctype::{CType, CTypeKind},
};

/// `name<parameters>`, keeping nested closing brackets apart so that older
/// compilers do not lex them as a shift
fn template(name: &str, parameters: impl IntoIterator<Item = String>) -> String {
    let inner = parameters.into_iter().join(", ");

    if inner.ends_with('>') {
        format!("{name}<{inner} >")
    } else {
        format!("{name}<{inner}>")
    }
}

pub fn print_ctype(ctype: &CType, target: Target) -> String {
    match &**ctype {
        CTypeKind::Scalar(kind) => kind.c_name().to_owned(),
        CTypeKind::Monotype { name, parameters } if parameters.is_empty() => name.to_string(),
        CTypeKind::Monotype { name, parameters } => template(
            name.value(),
            parameters.iter().map(|p| print_ctype(p, target)),
        ),
        CTypeKind::Sequence(element) => template(
            "sequence",
            [target.tag().to_owned(), print_ctype(element, target)],
        ),
        CTypeKind::ZippedSequence(fields) => {
            template("zipped_sequence", [print_ctype(fields, target)])
        }
        CTypeKind::Container(_) => "sp_cuarray".to_owned(),
        CTypeKind::Tuple(fields) => template(
            "thrust::tuple",
            fields.iter().map(|f| print_ctype(f, target)),
        ),
        CTypeKind::Function { parameters, result } => format!(
            "{}(*)({})",
            print_ctype(result, target),
            parameters.iter().map(|p| print_ctype(p, target)).join(", ")
        ),
        CTypeKind::Polytype {
            variables,
            monotype,
        } => template(
            &print_ctype(monotype, target),
            variables.iter().map(|v| print_ctype(v, target)),
        ),
    }
}
