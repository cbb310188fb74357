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

use anyhow::{Context, Result, anyhow};
use clap::Parser as clap_parser;
use clap::Subcommand;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use xasm::errors::AssemblyError;
use xasm::isa::{IsaRegistry, IsaSpec};
use xasm::{AssembleOptions, DisassembleOptions, SourceFile};

#[derive(clap_parser)]
#[clap(version = "0.1.0", about = "ISA-driven assembler and disassembler")]
struct Opts {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate an ISA description
    Validate {
        /// Built-in ISA name or path to a .json description
        #[clap(short = 'a', long)]
        isa: String,
    },
    /// Parse a source file and print its node sequence
    Parse {
        #[clap(short = 'a', long)]
        isa: String,
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Assemble source files into a binary image
    Assemble {
        #[clap(short = 'a', long)]
        isa: String,
        /// One or more source files, assembled in order
        #[clap(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[clap(short, long)]
        output: PathBuf,
        /// Emit machine code without the headered container
        #[clap(long)]
        raw: bool,
    },
    /// Disassemble a binary image into source text
    Disassemble {
        #[clap(short = 'a', long)]
        isa: String,
        #[clap(short, long)]
        input: PathBuf,
        #[clap(short, long)]
        output: PathBuf,
        /// Reconstruct pseudo-instructions and symbolic targets
        #[clap(long)]
        smart: bool,
        /// Overrides the start address from the header or memory layout
        #[clap(long)]
        start_address: Option<String>,
        /// Address ranges that are always data, as START-END
        #[clap(long, num_args = 0..)]
        data_regions: Vec<String>,
    },
    /// List the built-in ISA descriptions
    ListIsas,
}

fn main() -> ExitCode {
    let opts: Opts = Opts::parse();
    match run(&opts.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            ExitCode::from(exit_code(&opts.command, &error))
        }
    }
}

// 0 success, 1 runtime error, 2 validation error: validate/parse report
// model and source problems as validation failures.
fn exit_code(command: &Commands, error: &anyhow::Error) -> u8 {
    let semantic = error.chain().any(|cause| cause.is::<AssemblyError>());
    match command {
        Commands::Validate { .. } | Commands::Parse { .. } if semantic => 2,
        _ => 1,
    }
}

fn run(command: &Commands) -> Result<()> {
    match command {
        Commands::Validate { isa } => {
            let spec = resolve_isa(isa)?;
            println!(
                "ISA {} is valid: {} instructions, {} registers",
                spec.name,
                spec.instructions.len(),
                spec.registers.len()
            );
            Ok(())
        }
        Commands::Parse { isa, input } => {
            let spec = resolve_isa(isa)?;
            let source = read_source(input)?;
            let nodes = xasm::parse(&spec, &source)?;
            for node in &nodes {
                println!("{}: {:?}", node.loc, node.statement);
            }
            Ok(())
        }
        Commands::Assemble {
            isa,
            input,
            output,
            raw,
        } => {
            let spec = resolve_isa(isa)?;
            let mut sources = Vec::new();
            for path in input {
                sources.push(read_source(path)?);
            }
            let options = AssembleOptions {
                raw: *raw,
                ..Default::default()
            };
            let result = xasm::assemble(&spec, &sources, &options)?;
            fs::write(output, &result.image)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Successfully assembled {} byte(s) to {} (entry point 0x{:04X})",
                result.image.len(),
                output.display(),
                result.entry_point
            );
            for (name, address) in &result.symbols {
                println!("  {} = 0x{:04X}", name, address);
            }
            Ok(())
        }
        Commands::Disassemble {
            isa,
            input,
            output,
            smart,
            start_address,
            data_regions,
        } => {
            let spec = resolve_isa(isa)?;
            let image = fs::read(input)
                .with_context(|| format!("Failed to read input file: {}", input.display()))?;
            let options = DisassembleOptions {
                smart: *smart,
                start_address: start_address
                    .as_deref()
                    .map(parse_number)
                    .transpose()?,
                data_regions: data_regions
                    .iter()
                    .map(|r| parse_range(r))
                    .collect::<Result<Vec<_>>>()?,
                ..Default::default()
            };
            let text = xasm::disassemble(&spec, &image, &options)?;
            fs::write(output, text)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Successfully disassembled {} to {}",
                input.display(),
                output.display()
            );
            Ok(())
        }
        Commands::ListIsas => {
            let registry = IsaRegistry::with_builtins()?;
            for name in registry.names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

// --isa accepts a built-in name first, then a filesystem path.
fn resolve_isa(name: &str) -> Result<IsaSpec> {
    if let Ok(registry) = IsaRegistry::with_builtins() {
        if let Some(spec) = registry.get(name) {
            return Ok((*spec).clone());
        }
    }
    let path = Path::new(name);
    let json = fs::read_to_string(path)
        .with_context(|| format!("ISA {} is neither built-in nor a readable file", name))?;
    xasm::load_isa(&json)
}

fn read_source(path: &Path) -> Result<SourceFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    Ok(SourceFile::new(path.display().to_string(), text))
}

fn parse_number(text: &str) -> Result<u32> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b") {
        u32::from_str_radix(bin, 2)
    } else {
        text.parse()
    };
    parsed.map_err(|_| anyhow!("invalid number: {}", text))
}

fn parse_range(text: &str) -> Result<(u32, u32)> {
    let (start, end) = text
        .split_once('-')
        .ok_or_else(|| anyhow!("data region {} must be START-END", text))?;
    Ok((parse_number(start)?, parse_number(end)?))
}
