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

use super::symbol_table::SymbolTable;
use crate::ast::{SourceLine, SourceLoc, Statement};
use crate::bits;
use crate::errors::AssemblyError;
use crate::isa::{FieldKind, Instruction, IsaSpec, OffsetBase, PseudoInstruction};
use crate::parser;

pub const MAX_EXPANSION_DEPTH: usize = 4;

/// Byte length an instruction or pseudo-instruction statement will
/// occupy, for pass 1. Pseudo sizes are the sum of their expansions.
pub fn statement_size(
    isa: &IsaSpec,
    mnemonic: &str,
    loc: &SourceLoc,
    depth: usize,
) -> Result<u32, AssemblyError> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!(
                "pseudo-instruction {} expands deeper than {} levels",
                mnemonic, MAX_EXPANSION_DEPTH
            ),
        });
    }
    if let Some(instruction) = isa.lookup_instruction(mnemonic) {
        return Ok(instruction.length_bytes());
    }
    if let Some(pseudo) = isa.lookup_pseudo(mnemonic) {
        let mut total = 0;
        for line in &pseudo.expansion_lines {
            let inner = line
                .split_whitespace()
                .next()
                .expect("expansion lines are validated non-blank");
            total += statement_size(isa, inner, loc, depth + 1)?;
        }
        return Ok(total);
    }
    Err(AssemblyError::Encoding {
        line: loc.line,
        reason: format!("Unknown instruction: {}", mnemonic),
    })
}

/// Encodes one real instruction at `current_address`. Operands are bound
/// to encoding fields by name through the syntax template, never by
/// field position.
pub fn encode_instruction(
    isa: &IsaSpec,
    instruction: &Instruction,
    operands: &[String],
    symbols: &mut SymbolTable,
    loc: &SourceLoc,
    current_address: u32,
) -> Result<Vec<u8>, AssemblyError> {
    if operands.len() != instruction.operand_order.len() {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!(
                "{} takes {} operand(s), found {}; syntax: {}",
                instruction.mnemonic,
                instruction.operand_order.len(),
                operands.len(),
                instruction.syntax
            ),
        });
    }

    let mut word = instruction.pattern;
    for field in &instruction.encoding {
        if field.kind == FieldKind::Fixed {
            continue;
        }
        let position = instruction
            .operand_order
            .iter()
            .position(|name| *name == field.name)
            .expect("load-time validation matched fields to syntax");
        let text = operands[position].trim();

        let encoded = match field.kind {
            FieldKind::Register => {
                let (index, _) = isa.lookup_register(text).ok_or_else(|| {
                    AssemblyError::Encoding {
                        line: loc.line,
                        reason: format!(
                            "unknown register {} in operand {} of {}",
                            text, field.name, instruction.mnemonic
                        ),
                    }
                })?;
                index
            }
            FieldKind::Immediate | FieldKind::Address => {
                let text = text
                    .strip_prefix(&isa.formatting.immediate_prefix)
                    .unwrap_or(text);
                let value =
                    symbols.resolve_expression(&loc.file, text, current_address as i64, loc)?;
                let value = if field.kind == FieldKind::Address
                    && instruction.is_control_flow()
                {
                    value - pc_base(isa, instruction, current_address)
                } else {
                    value
                };
                check_immediate(instruction, field, value, loc)?
            }
            FieldKind::Fixed => unreachable!(),
        };
        word = bits::insert(word, field.high, field.low, encoded).map_err(|e| {
            AssemblyError::Encoding {
                line: loc.line,
                reason: e.to_string(),
            }
        })?;
    }

    bits::to_bytes(word, instruction.length_bytes() as usize, isa.endianness).map_err(|e| {
        AssemblyError::Encoding {
            line: loc.line,
            reason: e.to_string(),
        }
    })
}

/// Reference address for a PC-relative operand during assembly.
pub fn pc_base(isa: &IsaSpec, instruction: &Instruction, current_address: u32) -> i64 {
    match isa.offset_base_for(instruction) {
        OffsetBase::Current => current_address as i64,
        OffsetBase::Next => current_address as i64 + instruction.length_bytes() as i64,
    }
}

fn check_immediate(
    instruction: &Instruction,
    field: &crate::isa::Field,
    value: i64,
    loc: &SourceLoc,
) -> Result<u64, AssemblyError> {
    let width = field.width();
    if field.signed {
        let min = -(1i64 << (width - 1));
        let max = (1i64 << (width - 1)) - 1;
        if value < min || value > max {
            return Err(AssemblyError::Encoding {
                line: loc.line,
                reason: format!(
                    "value {} does not fit in the {}-bit signed field {} of {}; \
                     legal range {}..{}",
                    value, width, field.name, instruction.mnemonic, min, max
                ),
            });
        }
        Ok((value as u64) & bits::mask(width - 1, 0))
    } else {
        let max = if width == 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        if value < 0 || value as u64 > max {
            return Err(AssemblyError::Encoding {
                line: loc.line,
                reason: format!(
                    "value {} does not fit in the {}-bit unsigned field {} of {}; \
                     legal range 0..{}",
                    value, width, field.name, instruction.mnemonic, max
                ),
            });
        }
        Ok(value as u64)
    }
}

/// Substitutes the pseudo's operands into its expansion template and
/// re-parses the result into instruction nodes carrying the call site's
/// location.
pub fn expand_pseudo(
    isa: &IsaSpec,
    pseudo: &PseudoInstruction,
    operands: &[String],
    loc: &SourceLoc,
) -> Result<Vec<SourceLine>, AssemblyError> {
    if operands.len() != pseudo.operand_order.len() {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!(
                "{} takes {} operand(s), found {}; syntax: {}",
                pseudo.mnemonic,
                pseudo.operand_order.len(),
                operands.len(),
                pseudo.syntax
            ),
        });
    }
    let mut nodes = Vec::new();
    for template in &pseudo.expansion_lines {
        let line = substitute(isa, template, &pseudo.operand_order, operands);
        let node = parser::parse_line(isa, &loc.file, &line)?.ok_or_else(|| {
            AssemblyError::Encoding {
                line: loc.line,
                reason: format!(
                    "pseudo-instruction {} expanded to an empty line",
                    pseudo.mnemonic
                ),
            }
        })?;
        if !matches!(node.statement, Statement::Instruction { .. }) {
            return Err(AssemblyError::Encoding {
                line: loc.line,
                reason: format!(
                    "pseudo-instruction {} expanded to a non-instruction line: {}",
                    pseudo.mnemonic, line
                ),
            });
        }
        nodes.push(SourceLine {
            loc: loc.clone(),
            statement: node.statement,
        });
    }
    Ok(nodes)
}

// Replaces identifier tokens that name pseudo operands with the caller's
// operand text; all other text passes through untouched.
fn substitute(isa: &IsaSpec, template: &str, names: &[String], operands: &[String]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut token = String::new();
    let flush = |token: &mut String, result: &mut String| {
        if token.is_empty() {
            return;
        }
        let replacement = names
            .iter()
            .position(|n| isa.fold(n) == isa.fold(token))
            .map(|i| operands[i].as_str());
        result.push_str(replacement.unwrap_or(token.as_str()));
        token.clear();
    };
    for ch in template.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            token.push(ch);
        } else {
            flush(&mut token, &mut result);
            result.push(ch);
        }
    }
    flush(&mut token, &mut result);
    result
}
