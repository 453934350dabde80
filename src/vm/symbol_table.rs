//! Lexical scopes and name resolution for the compiler.
//!
//! One table per scope, chained through `outer`. Function-level tables own
//! their slot counters; block tables (blocks, loop bodies, try/catch bodies)
//! borrow slots from the nearest function-level table so that every local of
//! a function gets a distinct stack slot.

use ahash::AHashMap;

use super::compiler_types::StaticType;

/// Where a resolved name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    /// Captured from an enclosing function when the closure was created.
    Free,
    Builtin,
    /// The function currently executing (its own name, for recursion).
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    pub is_const: bool,
    /// Declared type from an annotation, `Any` when unannotated.
    pub declared: StaticType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Global,
    Function,
    Block,
}

#[derive(Debug)]
pub struct SymbolTable {
    pub outer: Option<Box<SymbolTable>>,
    store: AHashMap<String, Symbol>,
    /// Symbols of the enclosing function captured by this function, in
    /// capture order. Only populated on function-level tables.
    pub free_symbols: Vec<Symbol>,
    num_definitions: usize,
    kind: TableKind,
}

impl SymbolTable {
    /// The outermost (global) table.
    pub fn new() -> Self {
        Self::with_kind(TableKind::Global, None)
    }

    /// A table for a new function body nested in `outer`.
    pub fn new_function(outer: SymbolTable) -> Self {
        Self::with_kind(TableKind::Function, Some(Box::new(outer)))
    }

    /// A block scope nested in `outer`. At the top level a block behaves
    /// like the global table it sits in.
    pub fn new_block(outer: SymbolTable) -> Self {
        Self::with_kind(TableKind::Block, Some(Box::new(outer)))
    }

    fn with_kind(kind: TableKind, outer: Option<Box<SymbolTable>>) -> Self {
        Self {
            outer,
            store: AHashMap::new(),
            free_symbols: Vec::new(),
            num_definitions: 0,
            kind,
        }
    }

    /// Detach and return the enclosing table.
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    /// Slots allocated so far by the table that owns this scope's slots.
    pub fn num_definitions(&self) -> usize {
        match (self.kind, &self.outer) {
            (TableKind::Block, Some(outer)) => outer.num_definitions(),
            _ => self.num_definitions,
        }
    }

    /// Whether definitions in this scope become globals.
    pub fn is_global_scope(&self) -> bool {
        match (self.kind, &self.outer) {
            (TableKind::Global, _) => true,
            (TableKind::Block, Some(outer)) => outer.is_global_scope(),
            _ => false,
        }
    }

    fn next_slot(&mut self) -> usize {
        match (self.kind, self.outer.as_mut()) {
            (TableKind::Block, Some(outer)) => outer.next_slot(),
            _ => {
                let slot = self.num_definitions;
                self.num_definitions += 1;
                slot
            }
        }
    }

    /// Declare `name` in this scope. A second declaration of the same name
    /// shadows the first with a fresh slot.
    pub fn define(&mut self, name: &str, is_const: bool, declared: StaticType) -> Symbol {
        let scope = if self.is_global_scope() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.next_slot(),
            is_const,
            declared,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
            is_const: true,
            declared: StaticType::Function,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind the name of the function being compiled to the running closure.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
            is_const: true,
            declared: StaticType::Function,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Resolve `name`, promoting captures from enclosing functions to free
    /// symbols of this function.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let kind = self.kind;
        let outer = self.outer.as_mut()?;
        let symbol = outer.resolve(name)?;
        if kind != TableKind::Function
            || matches!(symbol.scope, SymbolScope::Global | SymbolScope::Builtin)
        {
            return Some(symbol);
        }
        Some(self.define_free(symbol))
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
            is_const: original.is_const,
            declared: original.declared,
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Declared type of `name` without promoting it.
    pub fn declared_type(&self, name: &str) -> Option<StaticType> {
        match self.store.get(name) {
            Some(symbol) => Some(symbol.declared),
            None => self.outer.as_ref()?.declared_type(name),
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn define(table: &mut SymbolTable, name: &str) -> Symbol {
        table.define(name, false, StaticType::Any)
    }

    #[test]
    fn test_define_global_and_local() {
        let mut global = SymbolTable::new();
        assert_eq!(define(&mut global, "a").scope, SymbolScope::Global);
        assert_eq!(define(&mut global, "b").index, 1);

        let mut local = SymbolTable::new_function(global);
        let c = define(&mut local, "c");
        assert_eq!(c.scope, SymbolScope::Local);
        assert_eq!(c.index, 0);
    }

    #[test]
    fn test_resolve_global_at_any_depth() {
        let mut global = SymbolTable::new();
        define(&mut global, "g");
        let first = SymbolTable::new_function(global);
        let mut second = SymbolTable::new_function(first);

        let g = second.resolve("g").unwrap();
        assert_eq!(g.scope, SymbolScope::Global);
        assert_eq!(g.index, 0);
        assert!(second.free_symbols.is_empty());
    }

    #[test]
    fn test_resolve_promotes_free_variables() {
        let global = SymbolTable::new();
        let mut first = SymbolTable::new_function(global);
        define(&mut first, "a");
        define(&mut first, "b");
        let mut second = SymbolTable::new_function(first);
        define(&mut second, "c");

        let b = second.resolve("b").unwrap();
        assert_eq!(b.scope, SymbolScope::Free);
        assert_eq!(b.index, 0);
        let a = second.resolve("a").unwrap();
        assert_eq!(a.index, 1);

        // Second lookup reuses the promoted symbol.
        assert_eq!(second.resolve("b").unwrap().index, 0);
        assert_eq!(second.free_symbols.len(), 2);
        assert_eq!(second.free_symbols[0].scope, SymbolScope::Local);
        assert_eq!(second.free_symbols[0].index, 1);

        assert_eq!(second.resolve("c").unwrap().scope, SymbolScope::Local);
    }

    #[test]
    fn test_nested_promotion_chains_through_middle_function() {
        let global = SymbolTable::new();
        let mut first = SymbolTable::new_function(global);
        define(&mut first, "x");
        let second = SymbolTable::new_function(first);
        let mut third = SymbolTable::new_function(second);

        let x = third.resolve("x").unwrap();
        assert_eq!(x.scope, SymbolScope::Free);
        // The middle function captured it too, so it can pass it on.
        assert_eq!(third.free_symbols[0].scope, SymbolScope::Free);
        let second = third.into_outer().unwrap();
        assert_eq!(second.free_symbols[0].scope, SymbolScope::Local);
    }

    #[test]
    fn test_block_scopes_share_function_slots() {
        let global = SymbolTable::new();
        let mut func = SymbolTable::new_function(global);
        define(&mut func, "a");
        let mut block = SymbolTable::new_block(func);
        let b = define(&mut block, "b");
        assert_eq!(b.scope, SymbolScope::Local);
        assert_eq!(b.index, 1);
        assert_eq!(block.resolve("a").unwrap().scope, SymbolScope::Local);
        assert!(block.free_symbols.is_empty());

        let mut func = block.into_outer().unwrap();
        assert!(func.resolve("b").is_none());
        assert_eq!(define(&mut func, "c").index, 2);
    }

    #[test]
    fn test_top_level_block_defines_globals() {
        let mut global = SymbolTable::new();
        define(&mut global, "a");
        let mut block = SymbolTable::new_block(global);
        let b = define(&mut block, "b");
        assert_eq!(b.scope, SymbolScope::Global);
        assert_eq!(b.index, 1);
    }

    #[test]
    fn test_redefinition_shadows() {
        let mut global = SymbolTable::new();
        define(&mut global, "a");
        let again = define(&mut global, "a");
        assert_eq!(again.index, 1);
        assert_eq!(global.resolve("a").unwrap().index, 1);
    }

    #[test]
    fn test_builtins_and_function_name() {
        let mut global = SymbolTable::new();
        global.define_builtin(3, "len");
        let mut func = SymbolTable::new_function(global);
        func.define_function_name("fib");

        assert_eq!(func.resolve("len").unwrap().scope, SymbolScope::Builtin);
        assert_eq!(func.resolve("len").unwrap().index, 3);
        assert_eq!(func.resolve("fib").unwrap().scope, SymbolScope::Function);

        let mut inner = SymbolTable::new_function(func);
        // A nested function captures the outer function's self reference.
        assert_eq!(inner.resolve("fib").unwrap().scope, SymbolScope::Free);
        assert_eq!(inner.free_symbols[0].scope, SymbolScope::Function);
    }

    #[test]
    fn test_unresolved() {
        let mut table = SymbolTable::new_function(SymbolTable::new());
        assert!(table.resolve("missing").is_none());
    }
}
