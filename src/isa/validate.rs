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

use super::*;
use crate::bits;
use std::collections::HashSet;

const MAX_PSEUDO_DEPTH: usize = 4;

fn load_err(reason: String) -> AssemblyError {
    AssemblyError::IsaLoad { reason }
}

/// Validates a freshly deserialized description and fills in every
/// precomputed part: field ranges, opcode patterns, masks, lengths,
/// syntax-order operand lists, lookup indexes, and compiled sandbox
/// bodies. Fatal on the first violation; no partial model escapes.
pub(super) fn compile(spec: &mut IsaSpec) -> Result<(), AssemblyError> {
    if spec.instruction_size == 0
        || spec.instruction_size > bits::MAX_FIELD_WIDTH
        || spec.instruction_size % 8 != 0
    {
        return Err(load_err(format!(
            "instruction size {} must be a byte multiple between 8 and {}",
            spec.instruction_size,
            bits::MAX_FIELD_WIDTH
        )));
    }
    if spec.word_bits() == 0 || spec.word_bits() % 8 != 0 || spec.word_bits() > 64 {
        return Err(load_err(format!(
            "word size {} must be a byte multiple between 8 and 64",
            spec.word_bits()
        )));
    }
    if spec.address_bits == 0 || spec.address_bits > 32 {
        return Err(load_err(format!(
            "address space of {} bits is outside the supported 1..=32",
            spec.address_bits
        )));
    }

    check_formatting(spec)?;
    check_registers(spec)?;
    check_memory_layout(spec)?;
    compile_instructions(spec)?;
    compile_pseudo_instructions(spec)?;
    compile_directives(spec)?;
    build_indexes(spec)?;
    Ok(())
}

// The parser canonicalizes the configured label suffix and operand
// separator onto the grammar's `:`/`,` tokens, so neither may collide
// with characters that carry meaning inside operand expressions, with
// the comment characters, or with each other.
fn check_formatting(spec: &IsaSpec) -> Result<(), AssemblyError> {
    const RESERVED: &str = "_$.\"'()[]+-*/%&|^~<>=! \t";
    let formatting = &spec.formatting;
    for (what, ch) in [
        ("label_suffix", formatting.label_suffix),
        ("operand_separator", formatting.operand_separator),
    ] {
        if ch.is_ascii_alphanumeric() || RESERVED.contains(ch) {
            return Err(load_err(format!(
                "{} {:?} collides with operand syntax; \
                 pick punctuation outside the expression language",
                what, ch
            )));
        }
        if formatting.comment_chars.contains(&ch) {
            return Err(load_err(format!(
                "{} {:?} is also a comment character",
                what, ch
            )));
        }
    }
    if formatting.label_suffix == formatting.operand_separator {
        return Err(load_err(
            "label_suffix and operand_separator must differ".to_string(),
        ));
    }
    if formatting.operand_separator == ':' || formatting.label_suffix == ',' {
        return Err(load_err(
            "':' and ',' cannot swap roles between label suffix and \
             operand separator"
                .to_string(),
        ));
    }
    Ok(())
}

fn check_registers(spec: &IsaSpec) -> Result<(), AssemblyError> {
    if spec.registers.is_empty() {
        return Err(load_err("ISA declares no registers".to_string()));
    }
    if !spec.registers.len().is_power_of_two() {
        return Err(load_err(format!(
            "register count {} is not a power of two",
            spec.registers.len()
        )));
    }
    for register in &spec.registers {
        if register.width == 0 || register.width > bits::MAX_FIELD_WIDTH {
            return Err(load_err(format!(
                "register {} has invalid width {}",
                register.name, register.width
            )));
        }
    }
    Ok(())
}

fn check_memory_layout(spec: &IsaSpec) -> Result<(), AssemblyError> {
    let layout = &spec.memory_layout;
    let top = spec.address_space_end();
    let named: [(&str, &Region); 5] = [
        ("interrupt_vectors", &layout.interrupt_vectors),
        ("code_section", &layout.code_section),
        ("data_section", &layout.data_section),
        ("stack_section", &layout.stack_section),
        ("mmio", &layout.mmio),
    ];
    for (name, region) in named {
        if region.start > region.end {
            return Err(load_err(format!(
                "memory region {} starts at 0x{:X} but ends at 0x{:X}",
                name, region.start, region.end
            )));
        }
        if region.end as u64 > top {
            return Err(load_err(format!(
                "memory region {} ends at 0x{:X}, past the {}-bit address space",
                name, region.end, spec.address_bits
            )));
        }
    }
    if layout.code_section.overlaps(&layout.data_section) {
        return Err(load_err(
            "code_section and data_section overlap".to_string(),
        ));
    }
    // interrupt vectors and mmio may only overlap another region by
    // nesting entirely inside it
    for (name, special) in [
        ("interrupt_vectors", &layout.interrupt_vectors),
        ("mmio", &layout.mmio),
    ] {
        for (other_name, other) in [
            ("code_section", &layout.code_section),
            ("data_section", &layout.data_section),
            ("stack_section", &layout.stack_section),
        ] {
            if special.overlaps(other) && !special.is_within(other) {
                return Err(load_err(format!(
                    "{} partially overlaps {}; it must be a sub-range or disjoint",
                    name, other_name
                )));
            }
        }
    }
    Ok(())
}

fn compile_instructions(spec: &mut IsaSpec) -> Result<(), AssemblyError> {
    let register_width = spec.register_field_width();
    let mut seen_patterns: HashSet<(u32, u64, u64)> = HashSet::new();

    for instruction in &mut spec.instructions {
        let length_bits = instruction.length.unwrap_or(spec.instruction_size);
        if !spec.variable_length && length_bits != spec.instruction_size {
            return Err(load_err(format!(
                "instruction {} declares length {} but the ISA is fixed at {} bits",
                instruction.mnemonic, length_bits, spec.instruction_size
            )));
        }
        if length_bits == 0 || length_bits % 8 != 0 || length_bits > bits::MAX_FIELD_WIDTH {
            return Err(load_err(format!(
                "instruction {} has invalid length {} bits",
                instruction.mnemonic, length_bits
            )));
        }
        instruction.length_bits = length_bits;

        let mut coverage: u64 = 0;
        let mut pattern: u64 = 0;
        let mut mask: u64 = 0;
        for field in &mut instruction.encoding {
            let (high, low) = bits::parse_range(&field.bits).map_err(|e| {
                load_err(format!(
                    "instruction {}, field {}: {}",
                    instruction.mnemonic, field.name, e
                ))
            })?;
            if high >= length_bits {
                return Err(load_err(format!(
                    "instruction {}, field {}: bit {} is outside the {}-bit word",
                    instruction.mnemonic, field.name, high, length_bits
                )));
            }
            let field_mask = bits::mask(high, low);
            if coverage & field_mask != 0 {
                return Err(load_err(format!(
                    "instruction {}, field {} overlaps an earlier field",
                    instruction.mnemonic, field.name
                )));
            }
            coverage |= field_mask;
            field.high = high;
            field.low = low;

            match field.kind {
                FieldKind::Fixed => {
                    let value = field.value.ok_or_else(|| {
                        load_err(format!(
                            "instruction {}, fixed field {} has no value",
                            instruction.mnemonic, field.name
                        ))
                    })?;
                    pattern = bits::insert(pattern, high, low, value).map_err(|_| {
                        load_err(format!(
                            "instruction {}, field {}: literal 0x{:X} does not fit {} bits",
                            instruction.mnemonic,
                            field.name,
                            value,
                            high - low + 1
                        ))
                    })?;
                    mask |= field_mask;
                }
                FieldKind::Register => {
                    if field.value.is_some() {
                        return Err(load_err(format!(
                            "instruction {}, register field {} must not carry a value",
                            instruction.mnemonic, field.name
                        )));
                    }
                    if high - low + 1 != register_width {
                        return Err(load_err(format!(
                            "instruction {}, register field {} is {} bits wide; \
                             {} registers need exactly {}",
                            instruction.mnemonic,
                            field.name,
                            high - low + 1,
                            spec.registers.len(),
                            register_width
                        )));
                    }
                }
                FieldKind::Immediate | FieldKind::Address => {
                    if field.value.is_some() {
                        return Err(load_err(format!(
                            "instruction {}, operand field {} must not carry a value",
                            instruction.mnemonic, field.name
                        )));
                    }
                }
            }
        }

        let full = bits::mask(length_bits - 1, 0);
        if coverage != full {
            return Err(load_err(format!(
                "instruction {}: encoding fields cover 0x{:X} of the word, expected 0x{:X}",
                instruction.mnemonic, coverage, full
            )));
        }

        if !seen_patterns.insert((length_bits, mask, pattern)) {
            return Err(load_err(format!(
                "instruction {} duplicates another instruction's opcode pattern \
                 (pattern 0x{:X}, mask 0x{:X}); decoding would be ambiguous",
                instruction.mnemonic, pattern, mask
            )));
        }
        instruction.pattern = pattern;
        instruction.mask = mask;

        instruction.operand_order =
            syntax_operands(&instruction.syntax, &instruction.mnemonic)?;
        let mut field_names: Vec<&str> = instruction
            .encoding
            .iter()
            .filter(|f| f.kind != FieldKind::Fixed)
            .map(|f| f.name.as_str())
            .collect();
        let mut syntax_names: Vec<&str> = instruction
            .operand_order
            .iter()
            .map(|s| s.as_str())
            .collect();
        field_names.sort_unstable();
        syntax_names.sort_unstable();
        if field_names != syntax_names {
            return Err(load_err(format!(
                "instruction {}: syntax operands {:?} do not match encoding fields {:?}",
                instruction.mnemonic, instruction.operand_order, field_names
            )));
        }

        if let Some(body) = &instruction.semantics {
            let program = Program::compile(body).map_err(|e| {
                load_err(format!(
                    "instruction {} semantics: {}",
                    instruction.mnemonic, e
                ))
            })?;
            instruction.semantics_program = Some(program);
        }
    }
    Ok(())
}

fn compile_pseudo_instructions(spec: &mut IsaSpec) -> Result<(), AssemblyError> {
    let real: HashSet<String> = spec
        .instructions
        .iter()
        .map(|i| spec.fold(&i.mnemonic))
        .collect();
    let pseudo: HashMap<String, usize> = spec
        .pseudo_instructions
        .iter()
        .enumerate()
        .map(|(idx, p)| (spec.fold(&p.mnemonic), idx))
        .collect();

    let mut compiled: Vec<(Vec<String>, Vec<String>)> = Vec::new();
    for p in &spec.pseudo_instructions {
        let lines = match &p.expansion {
            Expansion::One(line) => vec![line.clone()],
            Expansion::Many(lines) => lines.clone(),
        };
        if lines.is_empty() {
            return Err(load_err(format!(
                "pseudo-instruction {} has an empty expansion",
                p.mnemonic
            )));
        }
        let operands = syntax_operands(&p.syntax, &p.mnemonic)?;
        compiled.push((operands, lines));
    }
    for (p, (operands, lines)) in spec.pseudo_instructions.iter_mut().zip(compiled) {
        p.operand_order = operands;
        p.expansion_lines = lines;
    }

    // every expansion must bottom out in real mnemonics within the depth cap
    for idx in 0..spec.pseudo_instructions.len() {
        check_expansion_depth(spec, &real, &pseudo, idx, 1, &mut vec![idx])?;
    }
    Ok(())
}

fn check_expansion_depth(
    spec: &IsaSpec,
    real: &HashSet<String>,
    pseudo: &HashMap<String, usize>,
    idx: usize,
    depth: usize,
    trail: &mut Vec<usize>,
) -> Result<(), AssemblyError> {
    if depth > MAX_PSEUDO_DEPTH {
        return Err(load_err(format!(
            "pseudo-instruction {} expands deeper than {} levels",
            spec.pseudo_instructions[trail[0]].mnemonic, MAX_PSEUDO_DEPTH
        )));
    }
    for line in &spec.pseudo_instructions[idx].expansion_lines {
        let mnemonic = line.split_whitespace().next().ok_or_else(|| {
            load_err(format!(
                "pseudo-instruction {} has a blank expansion line",
                spec.pseudo_instructions[idx].mnemonic
            ))
        })?;
        let key = spec.fold(mnemonic);
        if real.contains(&key) {
            continue;
        }
        match pseudo.get(&key) {
            Some(&next) => {
                if trail.contains(&next) {
                    return Err(load_err(format!(
                        "pseudo-instruction {} expansion is cyclic",
                        spec.pseudo_instructions[trail[0]].mnemonic
                    )));
                }
                trail.push(next);
                check_expansion_depth(spec, real, pseudo, next, depth + 1, trail)?;
                trail.pop();
            }
            None => {
                return Err(load_err(format!(
                    "pseudo-instruction {} expands to unknown mnemonic {}",
                    spec.pseudo_instructions[idx].mnemonic, mnemonic
                )));
            }
        }
    }
    Ok(())
}

fn compile_directives(spec: &mut IsaSpec) -> Result<(), AssemblyError> {
    for directive in &mut spec.directives {
        if !directive.name.starts_with('.') {
            return Err(load_err(format!(
                "directive {} must start with '.'",
                directive.name
            )));
        }
        let program = Program::compile(&directive.body)
            .map_err(|e| load_err(format!("directive {}: {}", directive.name, e)))?;
        directive.program = Some(program);
    }
    Ok(())
}

fn build_indexes(spec: &mut IsaSpec) -> Result<(), AssemblyError> {
    let mut register_index = HashMap::new();
    for (idx, register) in spec.registers.iter().enumerate() {
        for name in std::iter::once(&register.name).chain(register.aliases.iter()) {
            if register_index.insert(spec.fold(name), idx).is_some() {
                return Err(load_err(format!(
                    "register name {} is declared twice",
                    name
                )));
            }
        }
    }

    let mut instruction_index = HashMap::new();
    for (idx, instruction) in spec.instructions.iter().enumerate() {
        if instruction_index
            .insert(spec.fold(&instruction.mnemonic), idx)
            .is_some()
        {
            return Err(load_err(format!(
                "instruction mnemonic {} is declared twice",
                instruction.mnemonic
            )));
        }
    }

    let mut pseudo_index = HashMap::new();
    for (idx, pseudo) in spec.pseudo_instructions.iter().enumerate() {
        let key = spec.fold(&pseudo.mnemonic);
        if instruction_index.contains_key(&key) || pseudo_index.insert(key, idx).is_some() {
            return Err(load_err(format!(
                "pseudo-instruction {} collides with another mnemonic",
                pseudo.mnemonic
            )));
        }
    }

    let mut directive_index = HashMap::new();
    for (idx, directive) in spec.directives.iter().enumerate() {
        if directive_index
            .insert(spec.fold(&directive.name), idx)
            .is_some()
        {
            return Err(load_err(format!(
                "directive {} is declared twice",
                directive.name
            )));
        }
    }

    let mut decode_order: Vec<usize> = (0..spec.instructions.len()).collect();
    decode_order.sort_by_key(|&idx| {
        (
            std::cmp::Reverse(spec.instructions[idx].mask.count_ones()),
            idx,
        )
    });

    spec.register_index = register_index;
    spec.instruction_index = instruction_index;
    spec.pseudo_index = pseudo_index;
    spec.directive_index = directive_index;
    spec.decode_order = decode_order;
    Ok(())
}

/// Extracts operand names from a syntax template in display order, e.g.
/// "ADD rd, rs2" yields ["rd", "rs2"].
fn syntax_operands(syntax: &str, mnemonic: &str) -> Result<Vec<String>, AssemblyError> {
    let trimmed = syntax.trim_start();
    if !trimmed
        .get(..mnemonic.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(mnemonic))
    {
        return Err(load_err(format!(
            "syntax template \"{}\" does not start with its mnemonic {}",
            syntax, mnemonic
        )));
    }
    let rest = &trimmed[mnemonic.len()..];
    let mut operands = Vec::new();
    let mut current = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            operands.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        operands.push(current);
    }
    Ok(operands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_isa(instructions: &str) -> String {
        format!(
            r#"{{
                "name": "TEST8",
                "instruction_size": 8,
                "endianness": "little",
                "address_bits": 16,
                "memory_layout": {{
                    "interrupt_vectors": {{ "start": 0, "end": 15 }},
                    "code_section": {{ "start": 16, "end": 32767 }},
                    "data_section": {{ "start": 32768, "end": 49151 }},
                    "stack_section": {{ "start": 49152, "end": 65023 }},
                    "mmio": {{ "start": 65024, "end": 65535 }}
                }},
                "registers": [
                    {{ "name": "r0", "width": 8 }},
                    {{ "name": "r1", "width": 8 }}
                ],
                "instructions": {instructions}
            }}"#
        )
    }

    #[test]
    fn test_minimal_isa_loads() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "MOV",
                "syntax": "MOV rd, rs",
                "encoding": [
                    { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                    { "name": "rd", "bits": "1:1", "kind": "register" },
                    { "name": "rs", "bits": "0:0", "kind": "register" }
                ]
            }]"#,
        );
        let spec = IsaSpec::from_json(&json).unwrap();
        let mov = spec.lookup_instruction("mov").unwrap();
        assert_eq!(mov.pattern, 0b0000_0100);
        assert_eq!(mov.mask, 0b1111_1100);
        assert_eq!(mov.operand_order, vec!["rd", "rs"]);
    }

    #[test]
    fn test_uncovered_bits_rejected() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "BAD",
                "syntax": "BAD",
                "encoding": [
                    { "name": "opcode", "bits": "7:4", "kind": "fixed", "value": 1 }
                ]
            }]"#,
        );
        let err = IsaSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("cover"));
    }

    #[test]
    fn test_overlapping_fields_rejected() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "BAD",
                "syntax": "BAD",
                "encoding": [
                    { "name": "a", "bits": "7:3", "kind": "fixed", "value": 0 },
                    { "name": "b", "bits": "4:0", "kind": "fixed", "value": 0 }
                ]
            }]"#,
        );
        let err = IsaSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_fixed_literal_must_fit() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "BAD",
                "syntax": "BAD",
                "encoding": [
                    { "name": "opcode", "bits": "7:0", "kind": "fixed", "value": 256 }
                ]
            }]"#,
        );
        assert!(IsaSpec::from_json(&json).is_err());
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let json = minimal_isa(
            r#"[
                {
                    "mnemonic": "A",
                    "syntax": "A",
                    "encoding": [
                        { "name": "opcode", "bits": "7:0", "kind": "fixed", "value": 7 }
                    ]
                },
                {
                    "mnemonic": "B",
                    "syntax": "B",
                    "encoding": [
                        { "name": "opcode", "bits": "7:0", "kind": "fixed", "value": 7 }
                    ]
                }
            ]"#,
        );
        let err = IsaSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_register_field_width_must_match_count() {
        // two registers need exactly one bit
        let json = minimal_isa(
            r#"[{
                "mnemonic": "MOV",
                "syntax": "MOV rd",
                "encoding": [
                    { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                    { "name": "rd", "bits": "1:0", "kind": "register" }
                ]
            }]"#,
        );
        let err = IsaSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("register field"));
    }

    #[test]
    fn test_syntax_field_mismatch_rejected() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "MOV",
                "syntax": "MOV rd, imm",
                "encoding": [
                    { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                    { "name": "rd", "bits": "1:1", "kind": "register" },
                    { "name": "other", "bits": "0:0", "kind": "immediate" }
                ]
            }]"#,
        );
        let err = IsaSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("do not match"));
    }

    #[test]
    fn test_syntax_operand_extraction() {
        assert_eq!(
            syntax_operands("ADD rd, rs2", "ADD").unwrap(),
            vec!["rd", "rs2"]
        );
        assert_eq!(
            syntax_operands("LD.b rd, (rs)", "LD.b").unwrap(),
            vec!["rd", "rs"]
        );
        assert_eq!(syntax_operands("RET", "RET").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_unknown_pseudo_expansion_rejected() {
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_isa(
                r#"[{
                    "mnemonic": "MOV",
                    "syntax": "MOV rd, rs",
                    "encoding": [
                        { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                        { "name": "rd", "bits": "1:1", "kind": "register" },
                        { "name": "rs", "bits": "0:0", "kind": "register" }
                    ]
                }]"#,
            ))
            .unwrap();
        json["pseudo_instructions"] = serde_json::json!([
            { "mnemonic": "NOPE", "syntax": "NOPE", "expansion": "MISSING r0" }
        ]);
        let err = IsaSpec::from_json(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("unknown mnemonic"));
    }

    #[test]
    fn test_cyclic_pseudo_rejected() {
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_isa(
                r#"[{
                    "mnemonic": "MOV",
                    "syntax": "MOV rd, rs",
                    "encoding": [
                        { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                        { "name": "rd", "bits": "1:1", "kind": "register" },
                        { "name": "rs", "bits": "0:0", "kind": "register" }
                    ]
                }]"#,
            ))
            .unwrap();
        json["pseudo_instructions"] = serde_json::json!([
            { "mnemonic": "A", "syntax": "A", "expansion": "B" },
            { "mnemonic": "B", "syntax": "B", "expansion": "A" }
        ]);
        let err = IsaSpec::from_json(&json.to_string()).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("cyclic") || text.contains("deeper"));
    }

    fn mov_isa() -> String {
        minimal_isa(
            r#"[{
                "mnemonic": "MOV",
                "syntax": "MOV rd, rs",
                "encoding": [
                    { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                    { "name": "rd", "bits": "1:1", "kind": "register" },
                    { "name": "rs", "bits": "0:0", "kind": "register" }
                ]
            }]"#,
        )
    }

    #[test]
    fn test_custom_formatting_accepted() {
        let mut doc: serde_json::Value = serde_json::from_str(&mov_isa()).unwrap();
        doc["formatting"] = serde_json::json!({
            "comment_chars": ["#"],
            "label_suffix": "@",
            "operand_separator": ";"
        });
        let spec = IsaSpec::from_json(&doc.to_string()).unwrap();
        assert_eq!(spec.formatting.label_suffix, '@');
        assert_eq!(spec.formatting.operand_separator, ';');
    }

    #[test]
    fn test_operand_syntax_characters_rejected_as_separator() {
        let mut doc: serde_json::Value = serde_json::from_str(&mov_isa()).unwrap();
        doc["formatting"] = serde_json::json!({ "operand_separator": "+" });
        let err = IsaSpec::from_json(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("collides with operand syntax"));
    }

    #[test]
    fn test_comment_char_collision_rejected() {
        // ';' is a comment character by default
        let mut doc: serde_json::Value = serde_json::from_str(&mov_isa()).unwrap();
        doc["formatting"] = serde_json::json!({ "label_suffix": ";" });
        let err = IsaSpec::from_json(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("comment character"));
    }

    #[test]
    fn test_equal_suffix_and_separator_rejected() {
        let mut doc: serde_json::Value = serde_json::from_str(&mov_isa()).unwrap();
        doc["formatting"] = serde_json::json!({
            "comment_chars": ["#"],
            "label_suffix": "@",
            "operand_separator": "@"
        });
        let err = IsaSpec::from_json(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_swapped_canonical_tokens_rejected() {
        let mut doc: serde_json::Value = serde_json::from_str(&mov_isa()).unwrap();
        doc["formatting"] = serde_json::json!({
            "comment_chars": ["#"],
            "label_suffix": "@",
            "operand_separator": ":"
        });
        let err = IsaSpec::from_json(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("swap roles"));
    }

    #[test]
    fn test_variable_length_isa_loads() {
        let mut doc: serde_json::Value = serde_json::from_str(&minimal_isa(
            r#"[
                {
                    "mnemonic": "SHORT",
                    "syntax": "SHORT r",
                    "encoding": [
                        { "name": "opcode", "bits": "7:1", "kind": "fixed", "value": 3 },
                        { "name": "r", "bits": "0:0", "kind": "register" }
                    ]
                },
                {
                    "mnemonic": "LONG",
                    "syntax": "LONG imm",
                    "length": 16,
                    "encoding": [
                        { "name": "imm", "bits": "15:8", "kind": "immediate" },
                        { "name": "opcode", "bits": "7:0", "kind": "fixed", "value": 7 }
                    ]
                }
            ]"#,
        ))
        .unwrap();
        doc["variable_length"] = serde_json::json!(true);
        let spec = IsaSpec::from_json(&doc.to_string()).unwrap();
        assert_eq!(spec.lookup_instruction("SHORT").unwrap().length_bytes(), 1);
        assert_eq!(spec.lookup_instruction("LONG").unwrap().length_bytes(), 2);
        assert_eq!(spec.max_instruction_bytes(), 2);
        // the wider mask decodes first
        assert_eq!(spec.decode_order()[0], 1);
    }

    #[test]
    fn test_per_instruction_length_needs_variable_flag() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "LONG",
                "syntax": "LONG imm",
                "length": 16,
                "encoding": [
                    { "name": "imm", "bits": "15:8", "kind": "immediate" },
                    { "name": "opcode", "bits": "7:0", "kind": "fixed", "value": 7 }
                ]
            }]"#,
        );
        let err = IsaSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("fixed at 8 bits"));
    }

    #[test]
    fn test_partial_region_overlap_rejected() {
        let json = minimal_isa(
            r#"[{
                "mnemonic": "MOV",
                "syntax": "MOV rd, rs",
                "encoding": [
                    { "name": "opcode", "bits": "7:2", "kind": "fixed", "value": 1 },
                    { "name": "rd", "bits": "1:1", "kind": "register" },
                    { "name": "rs", "bits": "0:0", "kind": "register" }
                ]
            }]"#,
        );
        let mut doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        // straddles the code/data boundary
        doc["memory_layout"]["mmio"] = serde_json::json!({ "start": 32000, "end": 33000 });
        let err = IsaSpec::from_json(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("partially overlaps"));
    }
}
