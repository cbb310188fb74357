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

pub mod assembler;
pub mod ast;
pub mod bits;
pub mod disassembler;
pub mod errors;
pub mod image;
pub mod isa;
pub mod parser;
pub mod reporter;
pub mod sandbox;

use anyhow::{Context, Result};
pub use assembler::{AssembleOptions, AssemblyOutput};
pub use disassembler::DisassembleOptions;
use isa::IsaSpec;
pub use isa::IsaRegistry;

/// A named source unit; local symbols are scoped to the file they are
/// defined in.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Loads and validates an ISA description from JSON text.
pub fn load_isa(json: &str) -> Result<IsaSpec> {
    IsaSpec::from_json(json).context("Failed during ISA validation")
}

/// Parses a single source file into its node sequence.
pub fn parse(isa: &IsaSpec, source: &SourceFile) -> Result<Vec<ast::SourceLine>> {
    parser::parse_source(isa, &source.name, &source.text)
        .with_context(|| format!("Failed during parsing stage ({})", source.name))
}

/// Assembles source files into a binary image with symbol and section
/// side outputs.
pub fn assemble(
    isa: &IsaSpec,
    sources: &[SourceFile],
    options: &AssembleOptions,
) -> Result<AssemblyOutput> {
    let mut parsed = Vec::new();
    for source in sources {
        let nodes = parser::parse_source(isa, &source.name, &source.text)
            .with_context(|| format!("Failed during parsing stage ({})", source.name))?;
        parsed.push((source.name.clone(), nodes));
    }
    assembler::assemble_sources(isa, &parsed, options).context("Failed during assembly")
}

/// Disassembles a headered or raw binary image into source text.
pub fn disassemble(
    isa: &IsaSpec,
    input: &[u8],
    options: &DisassembleOptions,
) -> Result<String> {
    disassembler::disassemble(isa, input, options).context("Failed during disassembly")
}
