/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use crate::ast::SourceLoc;
use crate::errors::AssemblyError;
use crate::isa::IsaSpec;
use crate::sandbox::{self, Host};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Label,
    Constant,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Local,
    Global,
    External,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: i64,
    pub kind: SymbolKind,
    pub scope: SymbolScope,
    pub defined: bool,
    pub references: Vec<SourceLoc>,
}

// Local symbols live under (file, name); globals under (None, name).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SymbolKey {
    file: Option<String>,
    name: String,
}

// The symbol table stores label and constant names with their resolved
// values, pass 1 having placed every definition before pass 2 reads it.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: HashMap<SymbolKey, Symbol>,
    exported: Vec<String>,
    case_sensitive: bool,
    local_prefix: String,
}

impl SymbolTable {
    pub fn new(isa: &IsaSpec) -> Self {
        Self {
            symbols: HashMap::new(),
            exported: Vec::new(),
            case_sensitive: isa.case_sensitive,
            local_prefix: isa.local_label_prefix.clone(),
        }
    }

    fn fold(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_ascii_lowercase()
        }
    }

    fn is_local(&self, name: &str) -> bool {
        !self.local_prefix.is_empty() && name.starts_with(&self.local_prefix)
    }

    fn key(&self, file: &str, name: &str) -> SymbolKey {
        SymbolKey {
            file: self.is_local(name).then(|| file.to_string()),
            name: self.fold(name),
        }
    }

    /// Defines a symbol; duplicate definitions in the same scope fail.
    pub fn define(
        &mut self,
        file: &str,
        name: &str,
        value: i64,
        kind: SymbolKind,
        loc: &SourceLoc,
    ) -> Result<(), AssemblyError> {
        let key = self.key(file, name);
        let scope = if key.file.is_some() {
            SymbolScope::Local
        } else {
            SymbolScope::Global
        };
        match self.symbols.get_mut(&key) {
            Some(existing) if existing.defined => Err(AssemblyError::Symbol {
                line: loc.line,
                reason: format!("Duplicate symbol definition: {}", name),
            }),
            Some(placeholder) => {
                // forward references created a placeholder earlier
                placeholder.value = value;
                placeholder.kind = kind;
                placeholder.defined = true;
                Ok(())
            }
            None => {
                self.symbols.insert(
                    key,
                    Symbol {
                        name: name.to_string(),
                        value,
                        kind,
                        scope,
                        defined: true,
                        references: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Records a reference site; creates an undefined placeholder when
    /// the symbol does not exist yet. Never fails.
    pub fn reference(&mut self, file: &str, name: &str, loc: SourceLoc) {
        let key = self.key(file, name);
        let scope = if key.file.is_some() {
            SymbolScope::Local
        } else {
            SymbolScope::Global
        };
        self.symbols
            .entry(key)
            .or_insert_with(|| Symbol {
                name: name.to_string(),
                value: 0,
                kind: SymbolKind::Label,
                scope,
                defined: false,
                references: Vec::new(),
            })
            .references
            .push(loc);
    }

    /// Resolves a name: local-in-current-file first, then global.
    pub fn resolve(&self, file: &str, name: &str) -> Option<i64> {
        self.get(file, name).map(|s| s.value)
    }

    pub fn get(&self, file: &str, name: &str) -> Option<&Symbol> {
        let folded = self.fold(name);
        let local = SymbolKey {
            file: Some(file.to_string()),
            name: folded.clone(),
        };
        let global = SymbolKey {
            file: None,
            name: folded,
        };
        self.symbols
            .get(&local)
            .or_else(|| self.symbols.get(&global))
            .filter(|s| s.defined)
    }

    /// Marks a symbol as exported (`.global NAME`).
    pub fn mark_global(&mut self, name: &str) {
        let folded = self.fold(name);
        if !self.exported.contains(&folded) {
            self.exported.push(folded);
        }
    }

    /// First exported symbol with a definition, in `.global` order.
    pub fn first_exported(&self) -> Option<i64> {
        self.exported.iter().find_map(|name| {
            self.symbols
                .get(&SymbolKey {
                    file: None,
                    name: name.clone(),
                })
                .filter(|s| s.defined)
                .map(|s| s.value)
        })
    }

    /// Evaluates a restricted operand expression: symbols, integer
    /// literals, the usual operators, `name[high:low]` bitfield
    /// extraction, and `.` for the supplied pc.
    pub fn resolve_expression(
        &mut self,
        file: &str,
        text: &str,
        pc: i64,
        loc: &SourceLoc,
    ) -> Result<i64, AssemblyError> {
        let expr = sandbox::parse_expression(text).map_err(|e| AssemblyError::Symbol {
            line: loc.line,
            reason: match e {
                AssemblyError::Sandbox { reason } => reason,
                other => other.to_string(),
            },
        })?;
        let mut host = ExprHost {
            table: self,
            file,
            pc,
            loc: loc.clone(),
        };
        expr.eval(&mut host).map_err(|e| AssemblyError::Symbol {
            line: loc.line,
            reason: match e {
                AssemblyError::Sandbox { reason } => reason,
                other => other.to_string(),
            },
        })
    }

    /// Fails if any recorded reference still points at an undefined
    /// symbol at the end of pass 2.
    pub fn finalize(&self) -> Result<(), AssemblyError> {
        for symbol in self.symbols.values() {
            if !symbol.defined && !symbol.references.is_empty() {
                let site = &symbol.references[0];
                return Err(AssemblyError::Symbol {
                    line: site.line,
                    reason: format!(
                        "Undefined symbol: {} (first referenced at {})",
                        symbol.name, site
                    ),
                });
            }
        }
        Ok(())
    }

    /// Every defined global symbol with its final value, for the
    /// symbol-table side output.
    pub fn export_map(&self) -> BTreeMap<String, u32> {
        self.symbols
            .values()
            .filter(|s| s.defined && s.scope != SymbolScope::Local)
            .map(|s| (s.name.clone(), s.value as u32))
            .collect()
    }
}

// Operand expressions get constant folding and symbol lookup only; the
// sandbox helper operations stay forbidden here.
struct ExprHost<'a> {
    table: &'a mut SymbolTable,
    file: &'a str,
    pc: i64,
    loc: SourceLoc,
}

impl Host for ExprHost<'_> {
    fn resolve_symbol(&mut self, name: &str) -> Option<i64> {
        match self.table.resolve(self.file, name) {
            Some(value) => Some(value),
            None => {
                self.table.reference(self.file, name, self.loc.clone());
                None
            }
        }
    }

    fn pc(&self) -> Option<i64> {
        Some(self.pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::builtin;

    fn table() -> SymbolTable {
        SymbolTable::new(&IsaSpec::from_json(builtin::ZX16).unwrap())
    }

    fn loc(line: usize) -> SourceLoc {
        SourceLoc::new("test.s", line, 1)
    }

    #[test]
    fn test_define_and_resolve() {
        let mut t = table();
        t.define("test.s", "start", 0x20, SymbolKind::Label, &loc(1))
            .unwrap();
        assert_eq!(t.resolve("test.s", "start"), Some(0x20));
        assert_eq!(t.resolve("other.s", "start"), Some(0x20));
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let mut t = table();
        t.define("test.s", "start", 0x20, SymbolKind::Label, &loc(1))
            .unwrap();
        let err = t
            .define("test.s", "start", 0x22, SymbolKind::Label, &loc(5))
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_local_symbols_are_per_file() {
        let mut t = table();
        t.define("a.s", ".loop", 0x20, SymbolKind::Label, &loc(1))
            .unwrap();
        t.define("b.s", ".loop", 0x40, SymbolKind::Label, &loc(1))
            .unwrap();
        assert_eq!(t.resolve("a.s", ".loop"), Some(0x20));
        assert_eq!(t.resolve("b.s", ".loop"), Some(0x40));
        assert_eq!(t.resolve("c.s", ".loop"), None);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut t = table();
        t.define("test.s", "Start", 0x20, SymbolKind::Label, &loc(1))
            .unwrap();
        assert_eq!(t.resolve("test.s", "START"), Some(0x20));
    }

    #[test]
    fn test_expression_with_pc_and_arithmetic() {
        let mut t = table();
        t.define("test.s", "end", 0x30, SymbolKind::Label, &loc(1))
            .unwrap();
        let value = t
            .resolve_expression("test.s", "end - . + 2", 0x20, &loc(2))
            .unwrap();
        assert_eq!(value, 0x12);
    }

    #[test]
    fn test_expression_bitfield() {
        let mut t = table();
        t.define("test.s", "data", 0xABCD, SymbolKind::Constant, &loc(1))
            .unwrap();
        let value = t
            .resolve_expression("test.s", "data[15:8]", 0, &loc(2))
            .unwrap();
        assert_eq!(value, 0xAB);
    }

    #[test]
    fn test_expression_undefined_symbol_records_reference() {
        let mut t = table();
        assert!(
            t.resolve_expression("test.s", "missing + 1", 0, &loc(3))
                .is_err()
        );
        let err = t.finalize().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_finalize_passes_when_all_defined() {
        let mut t = table();
        t.reference("test.s", "late", loc(1));
        t.define("test.s", "late", 5, SymbolKind::Label, &loc(4))
            .unwrap();
        t.finalize().unwrap();
    }

    #[test]
    fn test_exported_symbols() {
        let mut t = table();
        t.define("test.s", "init", 0x40, SymbolKind::Label, &loc(1))
            .unwrap();
        t.mark_global("init");
        assert_eq!(t.first_exported(), Some(0x40));
    }

    #[test]
    fn test_export_map_skips_locals() {
        let mut t = table();
        t.define("test.s", "global", 1, SymbolKind::Label, &loc(1))
            .unwrap();
        t.define("test.s", ".local", 2, SymbolKind::Label, &loc(2))
            .unwrap();
        let map = t.export_map();
        assert!(map.contains_key("global"));
        assert!(!map.contains_key(".local"));
    }
}
