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

pub mod builtin;
mod validate;

use crate::bits::Endianness;
use crate::errors::AssemblyError;
use crate::sandbox::Program;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Fixed,
    Register,
    Immediate,
    Address,
}

// One contiguous bit range inside an instruction word.
#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    pub name: String,
    pub bits: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub value: Option<u64>,
    #[serde(default)]
    pub signed: bool,
    // filled in at load time from `bits`
    #[serde(skip)]
    pub high: u32,
    #[serde(skip)]
    pub low: u32,
}

impl Field {
    pub fn width(&self) -> u32 {
        self.high - self.low + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetBase {
    Current,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcPointsTo {
    CurrentInstruction,
    NextInstruction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PcBehavior {
    #[serde(default = "default_points_to")]
    pub points_to: PcPointsTo,
    #[serde(default = "default_offset_base")]
    pub offset_base: OffsetBase,
    #[serde(default = "default_offset_base")]
    pub disassembly_base: OffsetBase,
}

fn default_points_to() -> PcPointsTo {
    PcPointsTo::CurrentInstruction
}

fn default_offset_base() -> OffsetBase {
    OffsetBase::Current
}

impl Default for PcBehavior {
    fn default() -> Self {
        Self {
            points_to: default_points_to(),
            offset_base: default_offset_base(),
            disassembly_base: default_offset_base(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Register {
    pub name: String,
    pub width: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instruction {
    pub mnemonic: String,
    pub syntax: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub encoding: Vec<Field>,
    #[serde(default)]
    pub offset_base: Option<OffsetBase>,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub semantics: Option<String>,
    // precomputed at load time
    #[serde(skip)]
    pub pattern: u64,
    #[serde(skip)]
    pub mask: u64,
    #[serde(skip)]
    pub length_bits: u32,
    #[serde(skip)]
    pub operand_order: Vec<String>,
    #[serde(skip)]
    pub semantics_program: Option<Program>,
}

impl Instruction {
    pub fn length_bytes(&self) -> u32 {
        self.length_bits / 8
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.encoding.iter().find(|f| f.name == name)
    }

    /// Control-flow instructions get PC-relative treatment for their
    /// address fields.
    pub fn is_control_flow(&self) -> bool {
        matches!(self.category.as_str(), "control" | "branch" | "jump")
    }

    pub fn is_return(&self) -> bool {
        if self.category == "return" {
            return true;
        }
        let lower = self.mnemonic.to_ascii_lowercase();
        matches!(lower.as_str(), "ret" | "reti" | "jr")
    }

    pub fn is_nop(&self) -> bool {
        self.mnemonic.eq_ignore_ascii_case("nop")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconstruction {
    ExactMatch,
    JumpWithReturn,
}

impl Default for Reconstruction {
    fn default() -> Self {
        Reconstruction::ExactMatch
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PseudoDisassembly {
    #[serde(default)]
    pub hide_operands: bool,
    #[serde(default = "default_true")]
    pub show_as_pseudo: bool,
    #[serde(default)]
    pub reconstruction: Reconstruction,
}

fn default_true() -> bool {
    true
}

impl Default for PseudoDisassembly {
    fn default() -> Self {
        Self {
            hide_operands: false,
            show_as_pseudo: true,
            reconstruction: Reconstruction::default(),
        }
    }
}

// The expansion may be written as a single line or a list of lines.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expansion {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PseudoInstruction {
    pub mnemonic: String,
    pub syntax: String,
    pub expansion: Expansion,
    #[serde(default)]
    pub disassembly: PseudoDisassembly,
    // precomputed at load time
    #[serde(skip)]
    pub operand_order: Vec<String>,
    #[serde(skip)]
    pub expansion_lines: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectiveDef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub body: String,
    #[serde(skip)]
    pub program: Option<Program>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr <= self.end
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn is_within(&self, other: &Region) -> bool {
        self.start >= other.start && self.end <= other.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    InterruptVectors,
    Code,
    Data,
    Stack,
    Mmio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryLayout {
    pub interrupt_vectors: Region,
    pub code_section: Region,
    pub data_section: Region,
    pub stack_section: Region,
    pub mmio: Region,
}

impl MemoryLayout {
    pub fn region_of(&self, addr: u32) -> Option<RegionKind> {
        // interrupt vectors and mmio take precedence since they may nest
        // inside the larger regions
        if self.interrupt_vectors.contains(addr) {
            Some(RegionKind::InterruptVectors)
        } else if self.mmio.contains(addr) {
            Some(RegionKind::Mmio)
        } else if self.code_section.contains(addr) {
            Some(RegionKind::Code)
        } else if self.data_section.contains(addr) {
            Some(RegionKind::Data)
        } else if self.stack_section.contains(addr) {
            Some(RegionKind::Stack)
        } else {
            None
        }
    }
}

fn default_comment_chars() -> Vec<char> {
    vec!['#', ';']
}

fn default_label_suffix() -> char {
    ':'
}

fn default_separator() -> char {
    ','
}

fn default_hex_prefix() -> String {
    "0x".to_string()
}

fn default_binary_prefix() -> String {
    "0b".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Formatting {
    #[serde(default)]
    pub register_prefix: String,
    #[serde(default)]
    pub immediate_prefix: String,
    #[serde(default = "default_comment_chars")]
    pub comment_chars: Vec<char>,
    #[serde(default = "default_label_suffix")]
    pub label_suffix: char,
    #[serde(default = "default_separator")]
    pub operand_separator: char,
    #[serde(default = "default_hex_prefix")]
    pub hex_prefix: String,
    #[serde(default = "default_binary_prefix")]
    pub binary_prefix: String,
    #[serde(default)]
    pub always_decimal_for: Vec<String>,
    #[serde(default)]
    pub always_hex_for: Vec<String>,
}

impl Default for Formatting {
    fn default() -> Self {
        Self {
            register_prefix: String::new(),
            immediate_prefix: String::new(),
            comment_chars: default_comment_chars(),
            label_suffix: default_label_suffix(),
            operand_separator: default_separator(),
            hex_prefix: default_hex_prefix(),
            binary_prefix: default_binary_prefix(),
            always_decimal_for: Vec::new(),
            always_hex_for: Vec::new(),
        }
    }
}

fn default_local_prefix() -> String {
    ".".to_string()
}

fn default_alignment() -> u32 {
    1
}

// The whole declarative ISA description. Immutable once loaded; freely
// shareable between assembler and disassembler instances.
#[derive(Debug, Clone, Deserialize)]
pub struct IsaSpec {
    pub name: String,
    pub instruction_size: u32,
    #[serde(default)]
    word_size: Option<u32>,
    pub endianness: Endianness,
    pub address_bits: u32,
    #[serde(default = "default_alignment")]
    pub alignment: u32,
    #[serde(default)]
    pub variable_length: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_local_prefix")]
    pub local_label_prefix: String,
    pub memory_layout: MemoryLayout,
    #[serde(default)]
    pub pc: PcBehavior,
    pub registers: Vec<Register>,
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub pseudo_instructions: Vec<PseudoInstruction>,
    #[serde(default)]
    pub directives: Vec<DirectiveDef>,
    #[serde(default)]
    pub formatting: Formatting,
    // lookup indexes, built at load time
    #[serde(skip)]
    register_index: HashMap<String, usize>,
    #[serde(skip)]
    instruction_index: HashMap<String, usize>,
    #[serde(skip)]
    pseudo_index: HashMap<String, usize>,
    #[serde(skip)]
    directive_index: HashMap<String, usize>,
    #[serde(skip)]
    decode_order: Vec<usize>,
}

impl IsaSpec {
    /// Loads and validates a JSON ISA description.
    pub fn from_json(text: &str) -> Result<Self, AssemblyError> {
        let mut spec: IsaSpec =
            serde_json::from_str(text).map_err(|e| AssemblyError::IsaLoad {
                reason: format!("malformed ISA description: {}", e),
            })?;
        validate::compile(&mut spec)?;
        Ok(spec)
    }

    /// Folds identifier case according to the ISA setting.
    pub fn fold(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_ascii_lowercase()
        }
    }

    pub fn word_bits(&self) -> u32 {
        self.word_size.unwrap_or(self.instruction_size)
    }

    pub fn word_bytes(&self) -> usize {
        (self.word_bits() / 8) as usize
    }

    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Bits needed to address every register.
    pub fn register_field_width(&self) -> u32 {
        (self.registers.len() as u64).trailing_zeros()
    }

    pub fn lookup_register(&self, name: &str) -> Option<(u64, &Register)> {
        let mut key = self.fold(name);
        if let Some(stripped) = name.strip_prefix(&self.formatting.register_prefix) {
            if !self.formatting.register_prefix.is_empty()
                && !self.register_index.contains_key(&key)
            {
                key = self.fold(stripped);
            }
        }
        let idx = *self.register_index.get(&key)?;
        Some((idx as u64, &self.registers[idx]))
    }

    pub fn lookup_instruction(&self, mnemonic: &str) -> Option<&Instruction> {
        let idx = *self.instruction_index.get(&self.fold(mnemonic))?;
        Some(&self.instructions[idx])
    }

    pub fn lookup_pseudo(&self, mnemonic: &str) -> Option<&PseudoInstruction> {
        let idx = *self.pseudo_index.get(&self.fold(mnemonic))?;
        Some(&self.pseudo_instructions[idx])
    }

    pub fn lookup_directive(&self, name: &str) -> Option<&DirectiveDef> {
        let idx = *self.directive_index.get(&self.fold(name))?;
        Some(&self.directives[idx])
    }

    /// Instruction indexes in decode precedence order: most specific mask
    /// first, declaration order breaking ties.
    pub fn decode_order(&self) -> &[usize] {
        &self.decode_order
    }

    pub fn max_instruction_bytes(&self) -> usize {
        self.instructions
            .iter()
            .map(|i| i.length_bytes() as usize)
            .max()
            .unwrap_or((self.instruction_size / 8) as usize)
    }

    /// PC base for a given instruction's address fields when assembling.
    pub fn offset_base_for(&self, instruction: &Instruction) -> OffsetBase {
        instruction.offset_base.unwrap_or(self.pc.offset_base)
    }

    pub fn address_space_end(&self) -> u64 {
        if self.address_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.address_bits) - 1
        }
    }

    /// Hex digit count used when rendering addresses.
    pub fn address_hex_width(&self) -> usize {
        (self.address_bits as usize).div_ceil(4)
    }
}

// An explicit registry value threaded through the assembler and
// disassembler constructors; ISA models are shared immutably.
#[derive(Debug, Default)]
pub struct IsaRegistry {
    isas: BTreeMap<String, Arc<IsaSpec>>,
}

impl IsaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with every built-in ISA.
    pub fn with_builtins() -> Result<Self, AssemblyError> {
        let mut registry = Self::new();
        for (_, json) in builtin::all() {
            registry.load_json(json)?;
        }
        Ok(registry)
    }

    pub fn load_json(&mut self, text: &str) -> Result<Arc<IsaSpec>, AssemblyError> {
        let spec = Arc::new(IsaSpec::from_json(text)?);
        self.isas
            .insert(spec.name.to_ascii_lowercase(), Arc::clone(&spec));
        Ok(spec)
    }

    pub fn get(&self, name: &str) -> Option<Arc<IsaSpec>> {
        self.isas.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.isas.values().map(|isa| isa.name.clone()).collect()
    }
}
