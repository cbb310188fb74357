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

mod formatter;

use crate::bits;
use crate::errors::AssemblyError;
use crate::image;
use crate::isa::{FieldKind, Instruction, IsaSpec, OffsetBase, RegionKind};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MAX_CONSECUTIVE_NOPS: usize = 8;

#[derive(Debug, Clone)]
pub struct DisassembleOptions {
    /// Reconstruct pseudo-instructions and symbolic targets.
    pub smart: bool,
    /// Overrides the header/layout-derived start address.
    pub start_address: Option<u32>,
    /// Caller-supplied `[start, end]` ranges that are always data.
    pub data_regions: Vec<(u32, u32)>,
    /// Fail on an undecodable word instead of switching to data.
    pub strict: bool,
    /// NOP run length that flips decoding into data mode.
    pub max_consecutive_nops: usize,
    /// Known symbols rendered instead of synthesized labels.
    pub symbols: BTreeMap<String, u32>,
}

impl Default for DisassembleOptions {
    fn default() -> Self {
        Self {
            smart: false,
            start_address: None,
            data_regions: Vec::new(),
            strict: false,
            max_consecutive_nops: DEFAULT_MAX_CONSECUTIVE_NOPS,
            symbols: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisassembledInstruction {
    pub address: u32,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    /// Rendered in syntax-template order, never encoding order.
    pub operands: Vec<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Instruction(DisassembledInstruction),
    Data { address: u32, bytes: Vec<u8> },
}

/// Disassembles a headered or raw image into source text.
pub fn disassemble(
    isa: &IsaSpec,
    input: &[u8],
    options: &DisassembleOptions,
) -> Result<String, AssemblyError> {
    let (code, header_start) = match image::parse_image(input)? {
        Some((header, code)) => {
            if !header.isa_name.eq_ignore_ascii_case(&isa.name) {
                return Err(AssemblyError::Validation {
                    reason: format!(
                        "image was assembled for ISA {}, not {}",
                        header.isa_name, isa.name
                    ),
                });
            }
            (code, Some(header.entry_point))
        }
        None => (input, None),
    };
    let start = options
        .start_address
        .or(header_start)
        .unwrap_or(isa.memory_layout.code_section.start);

    let items = disassemble_items(isa, code, start, options)?;
    let labels = collect_label_addresses(isa, code, start, options);
    Ok(formatter::render(isa, &items, start, &labels, options))
}

/// Decodes a code buffer into instruction and data items. Two sweeps: a
/// preliminary one collects jump targets, the second uses them for
/// data-to-code switching and label knowledge.
pub fn disassemble_items(
    isa: &IsaSpec,
    code: &[u8],
    start: u32,
    options: &DisassembleOptions,
) -> Result<Vec<Item>, AssemblyError> {
    let walker = Walker {
        isa,
        code,
        start,
        options,
    };
    let (_, targets) = walker.walk(&BTreeSet::new())?;
    let (items, _) = walker.walk(&targets)?;
    let items = if options.smart {
        formatter::reconstruct_pseudos(isa, items)
    } else {
        items
    };
    Ok(items)
}

/// Branch/jump target addresses discovered by the preliminary sweep,
/// merged with the caller's known symbols.
fn collect_label_addresses(
    isa: &IsaSpec,
    code: &[u8],
    start: u32,
    options: &DisassembleOptions,
) -> BTreeSet<u32> {
    let walker = Walker {
        isa,
        code,
        start,
        options,
    };
    let mut labels = match walker.walk(&BTreeSet::new()) {
        Ok((_, targets)) => targets,
        Err(_) => BTreeSet::new(),
    };
    labels.extend(options.symbols.values().copied());
    labels
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Data,
}

struct Walker<'a> {
    isa: &'a IsaSpec,
    code: &'a [u8],
    start: u32,
    options: &'a DisassembleOptions,
}

impl Walker<'_> {
    fn forced_data(&self, addr: u32) -> bool {
        self.options
            .data_regions
            .iter()
            .any(|(lo, hi)| addr >= *lo && addr <= *hi)
    }

    fn region_mode(&self, addr: u32) -> Mode {
        match self.isa.memory_layout.region_of(addr) {
            Some(RegionKind::Code) | None => Mode::Code,
            Some(_) => Mode::Data,
        }
    }

    fn decode_at(&self, offset: usize) -> Option<(&Instruction, u64)> {
        for &idx in self.isa.decode_order() {
            let instruction = &self.isa.instructions[idx];
            let nbytes = instruction.length_bytes() as usize;
            if offset + nbytes > self.code.len() {
                continue;
            }
            let word = match bits::from_bytes(&self.code[offset..offset + nbytes], self.isa.endianness)
            {
                Ok(word) => word,
                Err(_) => continue,
            };
            if word & instruction.mask == instruction.pattern {
                return Some((instruction, word));
            }
        }
        None
    }

    /// PC base mirrored during disassembly for PC-relative operands.
    fn disassembly_base(&self, instruction: &Instruction, addr: u32) -> i64 {
        match self.isa.pc.disassembly_base {
            OffsetBase::Current => addr as i64,
            OffsetBase::Next => addr as i64 + instruction.length_bytes() as i64,
        }
    }

    /// Absolute target of a control-flow instruction's address field.
    fn jump_target(&self, instruction: &Instruction, word: u64, addr: u32) -> Option<i64> {
        if !instruction.is_control_flow() {
            return None;
        }
        let field = instruction
            .encoding
            .iter()
            .find(|f| f.kind == FieldKind::Address)?;
        let raw = bits::extract(word, field.high, field.low).ok()?;
        let offset = if field.signed {
            bits::sign_extend(raw, field.width(), 64).ok()?
        } else {
            raw as i64
        };
        Some(self.disassembly_base(instruction, addr) + offset)
    }

    fn walk(
        &self,
        targets: &BTreeSet<u32>,
    ) -> Result<(Vec<Item>, BTreeSet<u32>), AssemblyError> {
        let mut items = Vec::new();
        let mut found: BTreeSet<u32> = targets.clone();
        let mut offset = 0usize;
        let mut mode = if self.forced_data(self.start) {
            Mode::Data
        } else {
            self.region_mode(self.start)
        };
        let mut region = self.isa.memory_layout.region_of(self.start);
        let mut nop_run = 0usize;
        let mut data_start = self.start;
        let mut data_buf: Vec<u8> = Vec::new();
        let mut in_forced = self.forced_data(self.start);

        while offset < self.code.len() {
            let addr = self.start.wrapping_add(offset as u32);

            // pre-partition by memory layout at region boundaries;
            // explicit caller ranges always win
            let here = self.isa.memory_layout.region_of(addr);
            if here != region {
                region = here;
                mode = self.region_mode(addr);
                nop_run = 0;
            }
            if self.forced_data(addr) {
                mode = Mode::Data;
                in_forced = true;
            } else {
                if in_forced {
                    // leaving an explicit range restores the layout mode
                    in_forced = false;
                    mode = self.region_mode(addr);
                    nop_run = 0;
                }
                if mode == Mode::Data && found.contains(&addr) {
                    // a known jump target flips data back to code
                    mode = Mode::Code;
                    nop_run = 0;
                }
            }

            if mode == Mode::Data {
                if data_buf.is_empty() {
                    data_start = addr;
                }
                data_buf.push(self.code[offset]);
                offset += 1;
                continue;
            }

            if !data_buf.is_empty() {
                items.push(Item::Data {
                    address: data_start,
                    bytes: std::mem::take(&mut data_buf),
                });
            }

            match self.decode_at(offset) {
                Some((instruction, word)) => {
                    let nbytes = instruction.length_bytes() as usize;
                    let bytes = self.code[offset..offset + nbytes].to_vec();

                    // only targets inside the buffer can carry labels or
                    // flip data back to code
                    if let Some(target) = self.jump_target(instruction, word, addr) {
                        let lo = self.start as i64;
                        let hi = lo + self.code.len() as i64;
                        if target >= lo && target < hi {
                            found.insert(target as u32);
                        }
                    }

                    let decoded = formatter::render_instruction(
                        self.isa,
                        instruction,
                        word,
                        addr,
                        bytes,
                        &found,
                        &self.options.symbols,
                    )?;
                    items.push(Item::Instruction(decoded));
                    offset += nbytes;

                    if instruction.is_nop() {
                        nop_run += 1;
                        if nop_run > self.options.max_consecutive_nops {
                            mode = Mode::Data;
                            nop_run = 0;
                        }
                    } else {
                        nop_run = 0;
                    }

                    // past a return with no outstanding forward targets,
                    // what follows is data until a target is reached
                    if instruction.is_return() {
                        let next = self.start as u64 + offset as u64;
                        if found.iter().all(|t| (*t as u64) < next) {
                            mode = Mode::Data;
                        }
                    }
                }
                None => {
                    if self.options.strict {
                        return Err(AssemblyError::Decoding {
                            address: addr,
                            reason: "no instruction matches this word".to_string(),
                        });
                    }
                    mode = Mode::Data;
                    data_start = addr;
                    data_buf.push(self.code[offset]);
                    offset += 1;
                }
            }
        }
        if !data_buf.is_empty() {
            items.push(Item::Data {
                address: data_start,
                bytes: data_buf,
            });
        }
        Ok((items, found))
    }
}
