//! Naming conventions shared between the passes: fresh temporaries, the
//! container form of a view name and the snippets of generated code the
//! passes splice into the tree.

use crate::frontend::intern::InternedSymbol;

/// Hands out fresh names with a fixed prefix. Names starting with an
/// underscore are rejected by the frontend, so supplies use one to stay clear
/// of program names.
#[derive(Debug, Clone)]
pub struct NameSupply {
    prefix: &'static str,
    next: usize,
}

impl NameSupply {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    pub fn next(&mut self) -> InternedSymbol {
        let symbol = InternedSymbol::new(&format!("{}{}", self.prefix, self.next));
        self.next += 1;
        symbol
    }

    /// A fresh name derived from an existing one, e.g. `xs_phase0`
    pub fn derive(&mut self, base: InternedSymbol) -> InternedSymbol {
        let symbol = InternedSymbol::new(&format!("{base}{}{}", self.prefix, self.next));
        self.next += 1;
        symbol
    }
}

/// The name of the owning container backing the view `name`
pub fn container_name(name: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("{name}_array"))
}

/// The name of the host-callable wrapper around an entry procedure
pub fn wrapper_name(entry: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("_wrap_{entry}"))
}

pub mod snippet {
    use crate::frontend::intern::InternedSymbol;

    const GET_PREFIX: &str = "thrust::get<";

    pub fn make_tuple() -> InternedSymbol {
        InternedSymbol::new("thrust::make_tuple")
    }

    /// Projection of field `index` out of a tuple
    pub fn get(index: usize) -> InternedSymbol {
        InternedSymbol::new(&format!("{GET_PREFIX}{index}>"))
    }

    /// The field index of a `thrust::get<i>` snippet
    pub fn get_index(symbol: InternedSymbol) -> Option<usize> {
        symbol
            .value()
            .strip_prefix(GET_PREFIX)?
            .strip_suffix('>')?
            .parse()
            .ok()
    }

    /// Waits for every kernel producing the argument and materializes it
    pub fn phase_boundary() -> InternedSymbol {
        InternedSymbol::new("phase_boundary")
    }

    /// Derives a view from an owning container
    pub fn make_sequence() -> InternedSymbol {
        InternedSymbol::new("make_sequence")
    }

    /// Snippets are handled by the passes themselves and never looked up in
    /// the procedure registry
    pub fn is_snippet(symbol: InternedSymbol) -> bool {
        symbol == make_tuple()
            || symbol == phase_boundary()
            || symbol == make_sequence()
            || get_index(symbol).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplies_never_repeat() {
        let mut supply = NameSupply::new("_tup");

        assert_eq!(supply.next().value(), "_tup0");
        assert_eq!(supply.next().value(), "_tup1");

        let mut phases = NameSupply::new("_phase");
        assert_eq!(phases.derive(InternedSymbol::new("xs")).value(), "xs_phase0");
    }

    #[test]
    fn get_snippets_carry_their_index() {
        assert_eq!(snippet::get_index(snippet::get(3)), Some(3));
        assert_eq!(snippet::get_index(snippet::make_tuple()), None);
        assert!(snippet::is_snippet(snippet::get(0)));
        assert!(!snippet::is_snippet(InternedSymbol::new("map")));
        assert_eq!(container_name(InternedSymbol::new("r")).value(), "r_array");
    }
}
