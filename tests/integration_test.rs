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

use std::collections::BTreeMap;
use xasm::isa::{IsaSpec, builtin};
use xasm::{AssembleOptions, DisassembleOptions, SourceFile};

fn zx16() -> IsaSpec {
    IsaSpec::from_json(builtin::ZX16).unwrap()
}

fn assemble(isa: &IsaSpec, source: &str, raw: bool) -> Vec<u8> {
    let options = AssembleOptions {
        raw,
        ..Default::default()
    };
    xasm::assemble(isa, &[SourceFile::new("test.s", source)], &options)
        .unwrap()
        .image
}

#[test]
fn test_minimal_headered_assembly() {
    let isa = zx16();
    let source = "_start:\nLI x0, 10\nADD x0, x1\nECALL 0x3FF\n";
    let image = assemble(&isa, source, false);

    // magic, name length, name
    assert_eq!(&image[0..4], &[0x49, 0x53, 0x41, 0x01]);
    assert_eq!(image[4], 4);
    assert_eq!(&image[5..9], b"ZX16");
    // code size 6, entry point = default code start
    assert_eq!(&image[9..13], &[6, 0, 0, 0]);
    assert_eq!(&image[13..17], &[0x20, 0, 0, 0]);
    // LI x0, 10
    assert_eq!(&image[17..19], &[0x29, 0x14]);
    // ADD x0, x1
    assert_eq!(&image[19..21], &[0x00, 0x02]);
    // ECALL 0x3FF
    assert_eq!(&image[21..23], &[0xC7, 0xFF]);
    assert_eq!(image.len(), 23);
}

#[test]
fn test_forward_reference_offset() {
    let isa = zx16();
    let code = assemble(&isa, "J end\nNOP\nend:\nNOP\n", true);
    // end = 0x24, J at 0x20 with offset_base = current: offset 4
    let word = u16::from_le_bytes([code[0], code[1]]);
    assert_eq!(word >> 9, 4);
}

#[test]
fn test_immediate_overflow_reports_range() {
    let isa = zx16();
    let err = xasm::assemble(
        &isa,
        &[SourceFile::new("test.s", "LI x0, 100\n")],
        &AssembleOptions::default(),
    )
    .unwrap_err();
    let text = format!("{:#}", err);
    assert!(text.contains("100"), "missing value in: {text}");
    assert!(text.contains("7-bit"), "missing width in: {text}");
    assert!(text.contains("-64..63"), "missing range in: {text}");
    assert!(text.contains("imm"), "missing field name in: {text}");
}

#[test]
fn test_binary_round_trip_smart_off() {
    let isa = zx16();
    let source = "\
_start:
    LI x0, 10
    LI x1, -3
    ADD x0, x1
    CALL helper
    J done
helper:
    ADDI x6, 1
    RET
done:
    ECALL 0x3FF
    .word 0xBEEF
    .byte 0x7F
";
    let first = assemble(&isa, source, false);
    let text = xasm::disassemble(&isa, &first, &DisassembleOptions::default()).unwrap();
    let second = assemble(&isa, &text, false);

    // the reconstructed source carries no _start, so only the entry
    // point field may differ; code bytes must be identical
    let (header_a, code_a) = xasm::image::parse_image(&first).unwrap().unwrap();
    let (header_b, code_b) = xasm::image::parse_image(&second).unwrap().unwrap();
    assert_eq!(code_a, code_b);
    assert_eq!(header_a.code_size, header_b.code_size);

    // a second disassembly round is a fixed point
    let text_again = xasm::disassemble(&isa, &second, &DisassembleOptions::default()).unwrap();
    let third = assemble(&isa, &text_again, false);
    assert_eq!(&second[17..], &third[17..]);
}

#[test]
fn test_code_data_partition() {
    let isa = zx16();
    // 30 vector bytes (values that would decode as instructions),
    // padded to the code start, then real instructions
    let mut image = Vec::new();
    for _ in 0..15 {
        image.extend_from_slice(&[0x29, 0x14]);
    }
    image.extend_from_slice(&[0x00, 0x00]);
    image.extend_from_slice(&[0x05, 0x00]); // NOP at 0x20
    image.extend_from_slice(&[0xC7, 0xFF]); // ECALL 0x3FF at 0x22

    let options = DisassembleOptions {
        start_address: Some(0),
        ..Default::default()
    };
    let text = xasm::disassemble(&isa, &image, &options).unwrap();

    let nop_line = text.find("NOP").expect("code must decode");
    let last_word = text.rfind(".word").expect("vectors must be data");
    assert!(
        last_word < nop_line,
        "data must precede code:\n{text}"
    );
    assert!(!text.contains("LI"), "vector bytes must not decode:\n{text}");
    assert!(text.contains("ECALL 0x3FF"));
}

#[test]
fn test_pseudo_reconstruction_modes() {
    let isa = zx16();
    let code = assemble(&isa, "CALL target\nNOP\ntarget:\nNOP\n", true);

    let smart = DisassembleOptions {
        smart: true,
        start_address: Some(0x20),
        ..Default::default()
    };
    let text = xasm::disassemble(&isa, &code, &smart).unwrap();
    assert!(text.contains("CALL L_0024"), "smart output:\n{text}");
    assert!(!text.contains("JAL"));

    let plain = DisassembleOptions {
        start_address: Some(0x20),
        ..Default::default()
    };
    let text = xasm::disassemble(&isa, &code, &plain).unwrap();
    assert!(text.contains("JAL x1, L_0024"), "plain output:\n{text}");
    assert!(!text.contains("CALL"));
}

#[test]
fn test_assembly_is_deterministic() {
    let isa = zx16();
    let source = "\
_start:
    .equ LIMIT, 8
    LI x0, LIMIT
.loop:
    ADDI x0, -1
    BNE x0, x1, .loop
    ECALL 0
data:
    .word 0x1234, data
";
    let options = AssembleOptions::default();
    let sources = [SourceFile::new("test.s", source)];
    let first = xasm::assemble(&isa, &sources, &options).unwrap();
    let second = xasm::assemble(&isa, &sources, &options).unwrap();
    assert_eq!(first.image, second.image);
    assert_eq!(first.symbols, second.symbols);
    assert_eq!(first.sections, second.sections);
}

#[test]
fn test_symbol_and_section_outputs() {
    let isa = zx16();
    let source = "_start:\nNOP\n.data\nvalues:\n.word 1, 2\n";
    let out = xasm::assemble(
        &isa,
        &[SourceFile::new("test.s", source)],
        &AssembleOptions::default(),
    )
    .unwrap();
    assert_eq!(out.symbols.get("_start"), Some(&0x20));
    assert_eq!(out.symbols.get("values"), Some(&0x22));
    assert_eq!(out.sections.get("text"), Some(&(0x20, 2)));
    assert_eq!(out.sections.get("data"), Some(&(0x22, 4)));
}

#[test]
fn test_label_arithmetic_operands() {
    let isa = zx16();
    let source = "\
.equ BASE, 0x1200
_start:
    LI x0, BASE[12:9]
    LI x1, (BASE >> 12) & 0xF
    ADDI x2, end - _start
end:
";
    let code = assemble(&isa, source, true);
    let first = u16::from_le_bytes([code[0], code[1]]);
    let second = u16::from_le_bytes([code[2], code[3]]);
    let third = u16::from_le_bytes([code[4], code[5]]);
    assert_eq!(first >> 9, 0x9); // bits 12:9 of 0x1200
    assert_eq!(second >> 9, 0x1);
    assert_eq!(third >> 9, 6); // three 2-byte instructions
}

#[test]
fn test_known_symbols_round_trip_through_disassembly() {
    let isa = zx16();
    let source = "_start:\nJ handler\nNOP\nhandler:\nECALL 1\n";
    let out = xasm::assemble(
        &isa,
        &[SourceFile::new("test.s", source)],
        &AssembleOptions::default(),
    )
    .unwrap();
    let options = DisassembleOptions {
        symbols: out.symbols.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        ..Default::default()
    };
    let text = xasm::disassemble(&isa, &out.image, &options).unwrap();
    assert!(text.contains("J handler"), "output:\n{text}");
    assert!(text.contains("handler:"), "output:\n{text}");
}

#[test]
fn test_disassembler_rejects_wrong_isa_header() {
    let isa = zx16();
    let image = xasm::image::write_image("OTHER", 0, &[0x05, 0x00]).unwrap();
    let err = xasm::disassemble(&isa, &image, &DisassembleOptions::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("OTHER"));
}

#[test]
fn test_file_based_flow() {
    let isa = zx16();
    let dir = tempfile::tempdir().unwrap();
    let asm_path = dir.path().join("prog.s");
    let bin_path = dir.path().join("prog.bin");
    std::fs::write(&asm_path, "_start:\nLI x6, 42\nECALL 0\n").unwrap();

    let text = std::fs::read_to_string(&asm_path).unwrap();
    let out = xasm::assemble(
        &isa,
        &[SourceFile::new(asm_path.display().to_string(), text)],
        &AssembleOptions::default(),
    )
    .unwrap();
    std::fs::write(&bin_path, &out.image).unwrap();

    let image = std::fs::read(&bin_path).unwrap();
    let listing = xasm::disassemble(&isa, &image, &DisassembleOptions::default()).unwrap();
    assert!(listing.contains("LI x6, 42"));
    assert!(listing.contains("ECALL 0x0"));
}

#[test]
fn test_custom_isa_from_json() {
    // an 8-bit accumulator machine exercises non-builtin loading and
    // big-endian multi-byte words
    let json = r#"{
        "name": "ACC8",
        "instruction_size": 8,
        "word_size": 16,
        "endianness": "big",
        "address_bits": 16,
        "memory_layout": {
            "interrupt_vectors": { "start": 0, "end": 7 },
            "code_section": { "start": 8, "end": 255 },
            "data_section": { "start": 256, "end": 511 },
            "stack_section": { "start": 512, "end": 767 },
            "mmio": { "start": 768, "end": 1023 }
        },
        "registers": [
            { "name": "a", "width": 8 },
            { "name": "b", "width": 8 }
        ],
        "instructions": [
            {
                "mnemonic": "INC",
                "syntax": "INC r",
                "encoding": [
                    { "name": "opcode", "bits": "7:1", "kind": "fixed", "value": 1 },
                    { "name": "r", "bits": "0:0", "kind": "register" }
                ]
            },
            {
                "mnemonic": "HALT",
                "syntax": "HALT",
                "encoding": [
                    { "name": "opcode", "bits": "7:0", "kind": "fixed", "value": 255 }
                ]
            }
        ]
    }"#;
    let isa = xasm::load_isa(json).unwrap();
    let out = xasm::assemble(
        &isa,
        &[SourceFile::new("t.s", "INC b\nHALT\n.word 0x1234\n")],
        &AssembleOptions {
            raw: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(out.code, vec![0x03, 0xFF, 0x12, 0x34]);
    assert_eq!(out.origin, 8);
}

#[test]
fn test_registry_lookup_is_case_insensitive() {
    let registry = xasm::IsaRegistry::with_builtins().unwrap();
    assert!(registry.get("ZX16").is_some());
    assert!(registry.get("zx16").is_some());
    assert!(registry.get("missing").is_none());
    assert_eq!(registry.names(), vec!["ZX16".to_string()]);
}

#[test]
fn test_error_accumulation_limit() {
    let isa = zx16();
    let mut source = String::from("_start:\n");
    for _ in 0..6 {
        source.push_str("LI x0, 999\n");
    }
    let options = AssembleOptions {
        max_errors: 3,
        ..Default::default()
    };
    let err = xasm::assemble(&isa, &[SourceFile::new("test.s", source)], &options)
        .unwrap_err();
    let text = format!("{:#}", err);
    assert!(text.contains("6 errors"), "got: {text}");
    assert!(text.contains("and 3 more errors"), "got: {text}");
}

#[test]
fn test_data_region_override() {
    let isa = zx16();
    let code = assemble(&isa, "NOP\nNOP\nNOP\n", true);
    let options = DisassembleOptions {
        start_address: Some(0x20),
        data_regions: vec![(0x22, 0x23)],
        ..Default::default()
    };
    let text = xasm::disassemble(&isa, &code, &options).unwrap();
    // the middle NOP is forced to data
    assert_eq!(text.matches("NOP").count(), 2, "output:\n{text}");
    assert!(text.contains(".word"), "output:\n{text}");
}

#[test]
fn test_symbols_map_is_plain_data() {
    let isa = zx16();
    let out = xasm::assemble(
        &isa,
        &[SourceFile::new("test.s", "_start:\nNOP\n")],
        &AssembleOptions::default(),
    )
    .unwrap();
    let expected: BTreeMap<String, u32> = BTreeMap::from([("_start".to_string(), 0x20)]);
    assert_eq!(out.symbols, expected);
}
