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

pub mod encoder;
pub mod symbol_table;

use crate::ast::{SourceLine, SourceLoc, Statement};
use crate::bits;
use crate::errors::AssemblyError;
use crate::image;
use crate::isa::IsaSpec;
use crate::parser;
use crate::reporter::{DEFAULT_ERROR_LIMIT, ErrorReporter};
use crate::sandbox::Host;
use encoder::MAX_EXPANSION_DEPTH;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use symbol_table::{SymbolKind, SymbolTable};

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Emit machine code only, without the headered container.
    pub raw: bool,
    /// Pass-2 errors accumulated before giving up (0 = default limit).
    pub max_errors: usize,
    /// Checked between nodes in both passes.
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyOutput {
    /// Final image bytes, headered or raw per the options.
    pub image: Vec<u8>,
    /// Machine code without the container.
    pub code: Vec<u8>,
    /// Address of the first code byte.
    pub origin: u32,
    pub entry_point: u32,
    /// Global symbols with their final values.
    pub symbols: BTreeMap<String, u32>,
    /// Section name to (start, size).
    pub sections: BTreeMap<String, (u32, u32)>,
}

/// Assembles parsed sources in two passes: pass 1 places every symbol,
/// pass 2 emits bytes with the full table in view.
pub fn assemble_sources(
    isa: &IsaSpec,
    sources: &[(String, Vec<SourceLine>)],
    options: &AssembleOptions,
) -> Result<AssemblyOutput, AssemblyError> {
    let mut symbols = SymbolTable::new(isa);

    // pass 1: addresses and symbols; first error aborts
    let origin = {
        let mut ctx = PassCtx::new(isa, &mut symbols, 1, options);
        for (_, nodes) in sources {
            for node in nodes {
                ctx.check_cancel()?;
                process_node(&mut ctx, node, 0)?;
                ctx.check_address(&node.loc)?;
            }
        }
        ctx.origin
    };

    // pass 2: emission; errors accumulate up to the limit
    let limit = if options.max_errors == 0 {
        DEFAULT_ERROR_LIMIT
    } else {
        options.max_errors
    };
    let mut reporter = ErrorReporter::new(limit);
    let mut ctx = PassCtx::new(isa, &mut symbols, 2, options);
    ctx.address = origin as u64;
    ctx.origin = origin;
    ctx.sections.switch("text");
    for (_, nodes) in sources {
        for node in nodes {
            ctx.check_cancel()?;
            if let Err(e) = process_node(&mut ctx, node, 0) {
                if e == AssemblyError::Cancelled {
                    return Err(e);
                }
                reporter.record(e);
                ctx.resync(node);
            }
            ctx.check_address(&node.loc)?;
        }
    }
    let code = ctx.out;
    let sections = ctx.sections.map;
    reporter.into_result(())?;
    symbols.finalize()?;

    let entry_point = symbols
        .resolve("", "_start")
        .or_else(|| symbols.resolve("", "main"))
        .or_else(|| symbols.first_exported())
        .map(|v| v as u32)
        .unwrap_or(origin);

    let image = if options.raw {
        code.clone()
    } else {
        image::write_image(&isa.name, entry_point, &code)?
    };
    Ok(AssemblyOutput {
        image,
        code,
        origin,
        entry_point,
        symbols: symbols.export_map(),
        sections,
    })
}

#[derive(Debug, Default)]
struct SectionTracker {
    map: BTreeMap<String, (u32, u32)>,
    current: String,
}

impl SectionTracker {
    fn switch(&mut self, name: &str) {
        self.current = name.to_string();
    }

    fn record(&mut self, address: u32, len: u32) {
        if self.current.is_empty() {
            self.current = "text".to_string();
        }
        let entry = self
            .map
            .entry(self.current.clone())
            .or_insert((address, 0));
        entry.1 += len;
    }
}

struct PassCtx<'a> {
    isa: &'a IsaSpec,
    symbols: &'a mut SymbolTable,
    pass: u8,
    address: u64,
    origin: u32,
    emitted: bool,
    out: Vec<u8>,
    sections: SectionTracker,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> PassCtx<'a> {
    fn new(
        isa: &'a IsaSpec,
        symbols: &'a mut SymbolTable,
        pass: u8,
        options: &AssembleOptions,
    ) -> Self {
        let start = isa.memory_layout.code_section.start;
        Self {
            isa,
            symbols,
            pass,
            address: start as u64,
            origin: start,
            emitted: false,
            out: Vec::new(),
            sections: SectionTracker::default(),
            cancel: options.cancel.clone(),
        }
    }

    fn check_cancel(&self) -> Result<(), AssemblyError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(AssemblyError::Cancelled),
            _ => Ok(()),
        }
    }

    fn check_address(&self, loc: &SourceLoc) -> Result<(), AssemblyError> {
        let top = self.isa.address_space_end();
        if self.address > top + 1 {
            return Err(AssemblyError::Encoding {
                line: loc.line,
                reason: format!(
                    "address 0x{:X} is beyond the {}-bit address space",
                    self.address, self.isa.address_bits
                ),
            });
        }
        Ok(())
    }

    /// Advances the address without bytes (pass 1).
    fn advance(&mut self, len: u64) {
        self.address += len;
        self.emitted = true;
    }

    fn emit(&mut self, bytes: &[u8]) {
        if self.pass == 2 {
            self.out.extend_from_slice(bytes);
            self.sections
                .record(self.address as u32, bytes.len() as u32);
        }
        self.advance(bytes.len() as u64);
    }

    fn emit_zeros(&mut self, count: u64) {
        if self.pass == 2 {
            self.out.resize(self.out.len() + count as usize, 0x00);
            self.sections.record(self.address as u32, count as u32);
        }
        self.advance(count);
    }

    fn eval(&mut self, text: &str, loc: &SourceLoc) -> Result<i64, AssemblyError> {
        let pc = self.address as i64;
        self.symbols.resolve_expression(&loc.file, text, pc, loc)
    }

    /// After a recorded pass-2 error, keeps later addresses aligned with
    /// the pass-1 layout by padding the skipped statement's size.
    fn resync(&mut self, node: &SourceLine) {
        if let Statement::Instruction { mnemonic, .. } = &node.statement {
            let here = self.out.len() as u64 + self.origin as u64;
            if self.address == here {
                if let Ok(size) = encoder::statement_size(self.isa, mnemonic, &node.loc, 0) {
                    self.emit_zeros(size as u64);
                }
            }
        }
    }
}

fn process_node(
    ctx: &mut PassCtx,
    node: &SourceLine,
    depth: usize,
) -> Result<(), AssemblyError> {
    match &node.statement {
        Statement::Comment(_) => Ok(()),
        Statement::Label(name) => {
            if ctx.pass == 1 {
                let value = ctx.address as i64;
                ctx.symbols
                    .define(&node.loc.file, name, value, SymbolKind::Label, &node.loc)?;
            }
            Ok(())
        }
        Statement::Directive { name, args } => run_directive(ctx, name, args, &node.loc),
        Statement::Instruction { mnemonic, operands } => {
            process_instruction(ctx, mnemonic, operands, &node.loc, depth)
        }
    }
}

fn process_instruction(
    ctx: &mut PassCtx,
    mnemonic: &str,
    operands: &[String],
    loc: &SourceLoc,
    depth: usize,
) -> Result<(), AssemblyError> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!(
                "pseudo-instruction expansion deeper than {} levels",
                MAX_EXPANSION_DEPTH
            ),
        });
    }
    if let Some(instruction) = ctx.isa.lookup_instruction(mnemonic) {
        if ctx.pass == 1 {
            ctx.advance(instruction.length_bytes() as u64);
        } else {
            let address = ctx.address as u32;
            let bytes = encoder::encode_instruction(
                ctx.isa,
                instruction,
                operands,
                ctx.symbols,
                loc,
                address,
            )?;
            ctx.emit(&bytes);
        }
        return Ok(());
    }
    if let Some(pseudo) = ctx.isa.lookup_pseudo(mnemonic) {
        if ctx.pass == 1 {
            let size = encoder::statement_size(ctx.isa, mnemonic, loc, 0)?;
            ctx.advance(size as u64);
        } else {
            let nodes = encoder::expand_pseudo(ctx.isa, pseudo, operands, loc)?;
            for node in &nodes {
                process_node(ctx, node, depth + 1)?;
            }
        }
        return Ok(());
    }
    Err(AssemblyError::Encoding {
        line: loc.line,
        reason: format!("Unknown instruction: {}", mnemonic),
    })
}

fn one_arg<'s>(
    name: &str,
    args: &'s [String],
    loc: &SourceLoc,
) -> Result<&'s str, AssemblyError> {
    if args.len() != 1 {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!("{} takes exactly one argument", name),
        });
    }
    Ok(args[0].as_str())
}

fn run_directive(
    ctx: &mut PassCtx,
    name: &str,
    args: &[String],
    loc: &SourceLoc,
) -> Result<(), AssemblyError> {
    match ctx.isa.fold(name).as_str() {
        ".org" => {
            let target = ctx.eval(one_arg(name, args, loc)?, loc)?;
            if target < 0 {
                return Err(AssemblyError::Encoding {
                    line: loc.line,
                    reason: format!(".org address {} is negative", target),
                });
            }
            let target = target as u64;
            if !ctx.emitted {
                // nothing placed yet: this sets the image origin
                ctx.origin = target as u32;
                ctx.address = target;
            } else if target < ctx.address {
                return Err(AssemblyError::Encoding {
                    line: loc.line,
                    reason: format!(
                        ".org cannot move the address backwards \
                         (current 0x{:04X}, requested 0x{:04X})",
                        ctx.address, target
                    ),
                });
            } else {
                ctx.emit_zeros(target - ctx.address);
            }
            Ok(())
        }
        ".word" => {
            let word_bytes = ctx.isa.word_bytes();
            let word_bits = ctx.isa.word_bits();
            for arg in args {
                if ctx.pass == 1 {
                    ctx.advance(word_bytes as u64);
                    continue;
                }
                let value = ctx.eval(arg, loc)?;
                let encoded = fit_word(value, word_bits, loc)?;
                let bytes = bits::to_bytes(encoded, word_bytes, ctx.isa.endianness)
                    .map_err(|e| AssemblyError::Encoding {
                        line: loc.line,
                        reason: e.to_string(),
                    })?;
                ctx.emit(&bytes);
            }
            Ok(())
        }
        ".byte" => {
            for arg in args {
                if ctx.pass == 1 {
                    ctx.advance(1);
                    continue;
                }
                let value = ctx.eval(arg, loc)?;
                let encoded = fit_word(value, 8, loc)?;
                ctx.emit(&[encoded as u8]);
            }
            Ok(())
        }
        ".space" => {
            let count = ctx.eval(one_arg(name, args, loc)?, loc)?;
            if count < 0 {
                return Err(AssemblyError::Encoding {
                    line: loc.line,
                    reason: format!(".space count {} is negative", count),
                });
            }
            ctx.emit_zeros(count as u64);
            Ok(())
        }
        ".ascii" | ".asciiz" => {
            let terminate = ctx.isa.fold(name) == ".asciiz";
            if args.is_empty() {
                return Err(AssemblyError::Encoding {
                    line: loc.line,
                    reason: format!("{} needs at least one string argument", name),
                });
            }
            for arg in args {
                let text = parser::unquote(arg, loc)?;
                ctx.emit(text.as_bytes());
                if terminate {
                    ctx.emit(&[0x00]);
                }
            }
            Ok(())
        }
        ".align" => {
            let alignment = ctx.eval(one_arg(name, args, loc)?, loc)?;
            if alignment <= 0 {
                return Err(AssemblyError::Encoding {
                    line: loc.line,
                    reason: format!(".align boundary {} must be positive", alignment),
                });
            }
            let alignment = alignment as u64;
            let pad = (alignment - ctx.address % alignment) % alignment;
            ctx.emit_zeros(pad);
            Ok(())
        }
        ".global" => {
            let symbol = one_arg(name, args, loc)?;
            if ctx.pass == 1 {
                ctx.symbols.mark_global(symbol.trim());
            }
            Ok(())
        }
        ".equ" => {
            if args.len() != 2 {
                return Err(AssemblyError::Encoding {
                    line: loc.line,
                    reason: ".equ takes a name and a value".to_string(),
                });
            }
            if ctx.pass == 1 {
                let value = ctx.eval(&args[1], loc)?;
                ctx.symbols.define(
                    &loc.file,
                    args[0].trim(),
                    value,
                    SymbolKind::Constant,
                    loc,
                )?;
            }
            Ok(())
        }
        ".section" => {
            let section = one_arg(name, args, loc)?.trim_start_matches('.');
            ctx.sections.switch(section);
            Ok(())
        }
        ".text" => {
            ctx.sections.switch("text");
            Ok(())
        }
        ".data" => {
            ctx.sections.switch("data");
            Ok(())
        }
        _ => run_custom_directive(ctx, name, args, loc),
    }
}

// Masks a directive value into `width` bits, accepting anything that
// fits as signed or unsigned.
fn fit_word(value: i64, width: u32, loc: &SourceLoc) -> Result<u64, AssemblyError> {
    let min = if width >= 64 {
        i64::MIN
    } else {
        -(1i64 << (width - 1))
    };
    let max_unsigned = bits::mask(width - 1, 0);
    if value < min || (value > 0 && value as u64 > max_unsigned) {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!(
                "value {} does not fit in {} bits; legal range {}..{}",
                value, width, min, max_unsigned
            ),
        });
    }
    Ok((value as u64) & max_unsigned)
}

fn run_custom_directive(
    ctx: &mut PassCtx,
    name: &str,
    args: &[String],
    loc: &SourceLoc,
) -> Result<(), AssemblyError> {
    let Some(directive) = ctx.isa.lookup_directive(name) else {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!("Unknown directive: {}", name),
        });
    };
    if args.len() != directive.args.len() {
        return Err(AssemblyError::Encoding {
            line: loc.line,
            reason: format!(
                "{} takes {} argument(s), found {}",
                directive.name,
                directive.args.len(),
                args.len()
            ),
        });
    }

    // bind declared arguments before the body runs
    let mut int_args: Vec<Option<i64>> = Vec::with_capacity(args.len());
    let mut str_args: Vec<Option<Vec<u8>>> = Vec::with_capacity(args.len());
    for (kind, text) in directive.args.iter().zip(args) {
        match kind.as_str() {
            "string" => {
                int_args.push(None);
                str_args.push(Some(parser::unquote(text, loc)?.into_bytes()));
            }
            _ => {
                int_args.push(Some(ctx.eval(text, loc)?));
                str_args.push(None);
            }
        }
    }

    let program = directive
        .program
        .as_ref()
        .expect("directive bodies are compiled at ISA load");
    let mut host = DirectiveHost {
        symbols: ctx.symbols,
        file: &loc.file,
        address: ctx.address as i64,
        int_args,
        str_args,
        emitted: Vec::new(),
        advanced: 0,
    };
    program.run(&mut host).map_err(|e| match e {
        AssemblyError::Sandbox { reason } => AssemblyError::Sandbox {
            reason: format!("{} (in directive {})", reason, directive.name),
        },
        other => other,
    })?;

    let emitted = host.emitted;
    let advanced = host.advanced;
    ctx.emit(&emitted);
    if advanced > 0 {
        ctx.emit_zeros(advanced as u64);
    }
    Ok(())
}

// Host for ISA-declared directive bodies: byte emission and address
// movement only; the simulator-side helpers stay forbidden.
struct DirectiveHost<'a> {
    symbols: &'a SymbolTable,
    file: &'a str,
    address: i64,
    int_args: Vec<Option<i64>>,
    str_args: Vec<Option<Vec<u8>>>,
    emitted: Vec<u8>,
    advanced: i64,
}

impl Host for DirectiveHost<'_> {
    fn resolve_symbol(&mut self, name: &str) -> Option<i64> {
        self.symbols.resolve(self.file, name)
    }

    fn pc(&self) -> Option<i64> {
        Some(self.address + self.emitted.len() as i64 + self.advanced)
    }

    fn call(&mut self, name: &str, args: &[i64]) -> Result<i64, AssemblyError> {
        let arg_index = |args: &[i64], i: usize| -> Result<usize, AssemblyError> {
            args.get(i)
                .copied()
                .filter(|v| *v >= 0)
                .map(|v| v as usize)
                .ok_or_else(|| AssemblyError::Sandbox {
                    reason: format!("{} needs an argument index", name),
                })
        };
        match name {
            "append_bytes" => {
                for value in args {
                    if !(0..=255).contains(value) {
                        return Err(AssemblyError::Sandbox {
                            reason: format!("append_bytes value {} is not a byte", value),
                        });
                    }
                    self.emitted.push(*value as u8);
                }
                Ok(0)
            }
            "advance_address" => {
                let delta = args.first().copied().unwrap_or(0);
                if delta < 0 {
                    return Err(AssemblyError::Sandbox {
                        reason: format!("advance_address delta {} is negative", delta),
                    });
                }
                self.advanced += delta;
                Ok(0)
            }
            "argc" => Ok(self.int_args.len() as i64),
            "arg" => {
                let index = arg_index(args, 0)?;
                self.int_args
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or_else(|| AssemblyError::Sandbox {
                        reason: format!("argument {} is not an integer", index),
                    })
            }
            "len" => {
                let index = arg_index(args, 0)?;
                self.str_args
                    .get(index)
                    .and_then(|s| s.as_ref())
                    .map(|s| s.len() as i64)
                    .ok_or_else(|| AssemblyError::Sandbox {
                        reason: format!("argument {} is not a string", index),
                    })
            }
            "arg_byte" => {
                let index = arg_index(args, 0)?;
                let offset = arg_index(args, 1)?;
                self.str_args
                    .get(index)
                    .and_then(|s| s.as_ref())
                    .and_then(|s| s.get(offset))
                    .map(|b| *b as i64)
                    .ok_or_else(|| AssemblyError::Sandbox {
                        reason: format!("arg_byte({}, {}) is out of range", index, offset),
                    })
            }
            _ => Err(AssemblyError::Sandbox {
                reason: format!("operation {} is not available during assembly", name),
            }),
        }
    }
}
