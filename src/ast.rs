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

// Where a node came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLoc {
    pub fn new(file: &str, line: usize, column: usize) -> Self {
        Self {
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

// Operands and directive arguments stay untyped text until the assembler
// classifies them against the ISA model.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Label(String),
    Instruction {
        mnemonic: String,
        operands: Vec<String>,
    },
    Directive {
        name: String,
        args: Vec<String>,
    },
    Comment(String),
}

// Represents a single parsed line of source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub loc: SourceLoc,
    pub statement: Statement,
}
