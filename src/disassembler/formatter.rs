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

use super::{DisassembleOptions, DisassembledInstruction, Item};
use crate::bits;
use crate::errors::AssemblyError;
use crate::isa::{Field, FieldKind, Instruction, IsaSpec, OffsetBase};
use crate::parser;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Renders one decoded instruction with operands in syntax order.
pub(super) fn render_instruction(
    isa: &IsaSpec,
    instruction: &Instruction,
    word: u64,
    addr: u32,
    bytes: Vec<u8>,
    labels: &BTreeSet<u32>,
    symbols: &BTreeMap<String, u32>,
) -> Result<DisassembledInstruction, AssemblyError> {
    let mut operands = vec![String::new(); instruction.operand_order.len()];
    let mut comment = None;

    for field in &instruction.encoding {
        if field.kind == FieldKind::Fixed {
            continue;
        }
        let raw = bits::extract(word, field.high, field.low).map_err(|e| {
            AssemblyError::Decoding {
                address: addr,
                reason: e.to_string(),
            }
        })?;
        let position = instruction
            .operand_order
            .iter()
            .position(|name| *name == field.name)
            .expect("load-time validation matched fields to syntax");

        operands[position] = match field.kind {
            FieldKind::Register => format!(
                "{}{}",
                isa.formatting.register_prefix,
                isa.registers[raw as usize].name
            ),
            FieldKind::Address if instruction.is_control_flow() => {
                let offset = if field.signed {
                    bits::sign_extend(raw, field.width(), 64).map_err(|e| {
                        AssemblyError::Decoding {
                            address: addr,
                            reason: e.to_string(),
                        }
                    })?
                } else {
                    raw as i64
                };
                let base = match isa.pc.disassembly_base {
                    OffsetBase::Current => addr as i64,
                    OffsetBase::Next => addr as i64 + instruction.length_bytes() as i64,
                };
                let target = base + offset;
                if target >= 0
                    && !isa
                        .memory_layout
                        .code_section
                        .contains(target as u32)
                {
                    comment = Some(format!(
                        "target {}{:X} outside code section",
                        isa.formatting.hex_prefix, target
                    ));
                }
                render_target(isa, target, labels, symbols)
            }
            _ => format_immediate(isa, instruction, field, raw),
        };
    }

    Ok(DisassembledInstruction {
        address: addr,
        bytes,
        mnemonic: instruction.mnemonic.clone(),
        operands,
        comment,
    })
}

fn render_target(
    isa: &IsaSpec,
    target: i64,
    labels: &BTreeSet<u32>,
    symbols: &BTreeMap<String, u32>,
) -> String {
    if target >= 0 {
        let target = target as u32;
        if let Some((name, _)) = symbols.iter().find(|(_, v)| **v == target) {
            return name.clone();
        }
        if labels.contains(&target) {
            return format!("L_{:0width$X}", target, width = isa.address_hex_width());
        }
    }
    format!("{}{:X}", isa.formatting.hex_prefix, target.max(0))
}

// Signed fields print sign-extended decimal so they always re-assemble;
// unsigned fields follow the ISA's decimal/hex preference lists.
fn format_immediate(isa: &IsaSpec, instruction: &Instruction, field: &Field, raw: u64) -> String {
    let prefix = &isa.formatting.immediate_prefix;
    if field.signed {
        let value = bits::sign_extend(raw, field.width(), 64).unwrap_or(raw as i64);
        return format!("{}{}", prefix, value);
    }
    let prefers_hex = isa
        .formatting
        .always_hex_for
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&instruction.mnemonic));
    let prefers_decimal = isa
        .formatting
        .always_decimal_for
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&instruction.mnemonic))
        || instruction.category == "arithmetic";
    if prefers_hex || !prefers_decimal {
        format!("{}{}{:X}", prefix, isa.formatting.hex_prefix, raw)
    } else {
        format!("{}{}", prefix, raw)
    }
}

/// Replaces runs of decoded instructions with pseudo-instructions whose
/// expansion matches, first declared pseudo winning. Operand names in
/// the expansion template bind to decoded operand text; everything else
/// must match literally.
pub(super) fn reconstruct_pseudos(isa: &IsaSpec, items: Vec<Item>) -> Vec<Item> {
    let mut out = Vec::with_capacity(items.len());
    let mut index = 0;
    while index < items.len() {
        if let Some((pseudo_idx, consumed, bindings)) = match_pseudo_at(isa, &items, index) {
            let pseudo = &isa.pseudo_instructions[pseudo_idx];
            let mut bytes = Vec::new();
            let mut first_address = 0;
            let mut comment = None;
            for (offset, item) in items[index..index + consumed].iter().enumerate() {
                if let Item::Instruction(decoded) = item {
                    if offset == 0 {
                        first_address = decoded.address;
                        comment = decoded.comment.clone();
                    }
                    bytes.extend_from_slice(&decoded.bytes);
                }
            }
            let operands = if pseudo.disassembly.hide_operands {
                Vec::new()
            } else {
                pseudo
                    .operand_order
                    .iter()
                    .map(|name| bindings[&isa.fold(name)].clone())
                    .collect()
            };
            out.push(Item::Instruction(DisassembledInstruction {
                address: first_address,
                bytes,
                mnemonic: pseudo.mnemonic.clone(),
                operands,
                comment,
            }));
            index += consumed;
        } else {
            out.push(items[index].clone());
            index += 1;
        }
    }
    out
}

fn match_pseudo_at(
    isa: &IsaSpec,
    items: &[Item],
    index: usize,
) -> Option<(usize, usize, HashMap<String, String>)> {
    'pseudo: for (pseudo_idx, pseudo) in isa.pseudo_instructions.iter().enumerate() {
        if !pseudo.disassembly.show_as_pseudo {
            continue;
        }
        let consumed = pseudo.expansion_lines.len();
        if index + consumed > items.len() {
            continue;
        }
        let operand_names: Vec<String> =
            pseudo.operand_order.iter().map(|n| isa.fold(n)).collect();
        let mut bindings: HashMap<String, String> = HashMap::new();

        for (template, item) in pseudo.expansion_lines.iter().zip(&items[index..]) {
            let Item::Instruction(decoded) = item else {
                continue 'pseudo;
            };
            let Ok(Some(node)) = parser::parse_line(isa, "<pseudo>", template) else {
                continue 'pseudo;
            };
            let crate::ast::Statement::Instruction { mnemonic, operands } = node.statement
            else {
                continue 'pseudo;
            };
            if isa.fold(&mnemonic) != isa.fold(&decoded.mnemonic)
                || operands.len() != decoded.operands.len()
            {
                continue 'pseudo;
            }
            for (template_op, decoded_op) in operands.iter().zip(&decoded.operands) {
                let key = isa.fold(template_op.trim());
                if operand_names.contains(&key) {
                    match bindings.get(&key) {
                        Some(bound) if bound != decoded_op => continue 'pseudo,
                        Some(_) => {}
                        None => {
                            bindings.insert(key, decoded_op.clone());
                        }
                    }
                } else if isa.fold(template_op.trim()) != isa.fold(decoded_op.trim()) {
                    continue 'pseudo;
                }
            }
        }
        return Some((pseudo_idx, consumed, bindings));
    }
    None
}

/// Renders items into assembly source that re-assembles to the same
/// bytes: an `.org` preamble, synthesized or known labels at their
/// addresses, instructions, and `.word`/`.byte` data lines.
pub(super) fn render(
    isa: &IsaSpec,
    items: &[Item],
    start: u32,
    labels: &BTreeSet<u32>,
    options: &DisassembleOptions,
) -> String {
    let width = isa.address_hex_width();
    let comment_char = *isa.formatting.comment_chars.first().unwrap_or(&';');
    let label_suffix = isa.formatting.label_suffix;
    let mut names_at: BTreeMap<u32, &str> = BTreeMap::new();
    for (name, addr) in &options.symbols {
        names_at.entry(*addr).or_insert(name.as_str());
    }

    let mut out = String::new();
    out.push_str(&format!(
        ".org {}{:0width$X}\n\n",
        isa.formatting.hex_prefix, start
    ));

    let emit_label = |out: &mut String, addr: u32| {
        if let Some(name) = names_at.get(&addr) {
            out.push_str(&format!("{}{}\n", name, label_suffix));
        } else if labels.contains(&addr) {
            out.push_str(&format!("L_{:0width$X}{}\n", addr, label_suffix));
        }
    };

    for item in items {
        match item {
            Item::Instruction(decoded) => {
                emit_label(&mut out, decoded.address);
                out.push_str("    ");
                out.push_str(&decoded.mnemonic);
                if !decoded.operands.is_empty() {
                    out.push(' ');
                    out.push_str(&decoded.operands.join(&format!(
                        "{} ",
                        isa.formatting.operand_separator
                    )));
                }
                if let Some(comment) = &decoded.comment {
                    out.push_str(&format!("    {} {}", comment_char, comment));
                }
                out.push('\n');
            }
            Item::Data { address, bytes } => {
                let word_bytes = isa.word_bytes();
                let has_mark = |addr: u32| {
                    labels.contains(&addr) || names_at.contains_key(&addr)
                };
                let mut pos = 0usize;
                while pos < bytes.len() {
                    let addr = address + pos as u32;
                    emit_label(&mut out, addr);
                    let fits_word = pos + word_bytes <= bytes.len()
                        && !(1..word_bytes as u32).any(|k| has_mark(addr + k));
                    if fits_word {
                        let value =
                            bits::from_bytes(&bytes[pos..pos + word_bytes], isa.endianness)
                                .unwrap_or(0);
                        out.push_str(&format!(
                            "    .word {}{:0w$X}\n",
                            isa.formatting.hex_prefix,
                            value,
                            w = word_bytes * 2
                        ));
                        pos += word_bytes;
                    } else {
                        out.push_str(&format!(
                            "    .byte {}{:02X}\n",
                            isa.formatting.hex_prefix, bytes[pos]
                        ));
                        pos += 1;
                    }
                }
            }
        }
    }
    out
}
