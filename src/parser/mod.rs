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

use crate::ast::{SourceLine, SourceLoc, Statement};
use crate::errors::AssemblyError;
use crate::isa::IsaSpec;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "parser/grammar.pest"]
struct AsmParser;

/// Parses a whole source file into a node sequence. Comment text is kept
/// as nodes; everything else stays untyped until assembly.
pub fn parse_source(
    isa: &IsaSpec,
    file: &str,
    source: &str,
) -> Result<Vec<SourceLine>, AssemblyError> {
    let (cleaned, mut comments) = strip_comments(isa, file, source)?;

    let pairs = AsmParser::parse(Rule::program, &cleaned)
        .map_err(|e| map_pest_error(file, &cleaned, e))?;

    let mut nodes = Vec::new();
    for statement in pairs.flatten().filter(|p| p.as_rule() == Rule::statement) {
        let (line, column) = statement.as_span().start_pos().line_col();
        let loc = SourceLoc::new(file, line, column);
        let inner = statement
            .into_inner()
            .next()
            .expect("statement holds one node");
        let statement = match inner.as_rule() {
            Rule::label_def => {
                let name = inner
                    .into_inner()
                    .next()
                    .expect("label_def holds a name")
                    .as_str()
                    .to_string();
                Statement::Label(name)
            }
            Rule::directive => {
                let mut parts = inner.into_inner();
                let name = parts.next().expect("directive holds a name").as_str();
                Statement::Directive {
                    name: name.to_string(),
                    args: collect_args(parts.next()),
                }
            }
            Rule::instruction => {
                let mut parts = inner.into_inner();
                let mnemonic = parts.next().expect("instruction holds a mnemonic").as_str();
                Statement::Instruction {
                    mnemonic: mnemonic.to_string(),
                    operands: collect_args(parts.next()),
                }
            }
            _ => unreachable!(),
        };
        nodes.push(SourceLine { loc, statement });
    }

    nodes.append(&mut comments);
    nodes.sort_by(|a, b| (a.loc.line, a.loc.column).cmp(&(b.loc.line, b.loc.column)));
    Ok(nodes)
}

/// Parses one synthesized line (pseudo-instruction expansions re-enter
/// the pipeline through this).
pub fn parse_line(
    isa: &IsaSpec,
    file: &str,
    text: &str,
) -> Result<Option<SourceLine>, AssemblyError> {
    let nodes = parse_source(isa, file, text)?;
    Ok(nodes
        .into_iter()
        .find(|n| !matches!(n.statement, Statement::Comment(_))))
}

fn collect_args(arg_list: Option<Pair<Rule>>) -> Vec<String> {
    match arg_list {
        Some(list) => list
            .into_inner()
            .map(|arg| arg.as_str().trim().to_string())
            .collect(),
        None => Vec::new(),
    }
}

/// Removes comments per the ISA's configured comment characters while
/// respecting quoted strings, and canonicalizes the ISA's configured
/// label suffix and operand separator onto the grammar's `:`/`,` tokens.
/// Line structure is preserved so locations still point into the
/// original text. Whole-line comments come back as nodes.
fn strip_comments(
    isa: &IsaSpec,
    file: &str,
    source: &str,
) -> Result<(String, Vec<SourceLine>), AssemblyError> {
    let comment_chars = &isa.formatting.comment_chars;
    let separator = isa.formatting.operand_separator;
    let suffix = isa.formatting.label_suffix;
    let mut cleaned = String::with_capacity(source.len());
    let mut comments = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let mut kept = String::with_capacity(line.len());
        let mut comment: Option<(usize, &str)> = None;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut column = 0usize;
        for (pos, ch) in line.char_indices() {
            column += 1;
            if escaped {
                escaped = false;
                kept.push(ch);
                continue;
            }
            match quote {
                Some(open) => {
                    if ch == '\\' {
                        escaped = true;
                    } else if ch == open {
                        quote = None;
                    }
                    kept.push(ch);
                }
                None => {
                    if ch == '"' || ch == '\'' {
                        quote = Some(ch);
                        kept.push(ch);
                    } else if comment_chars.contains(&ch) {
                        comment = Some((column, &line[pos..]));
                        break;
                    } else if ch == separator && separator != ',' {
                        kept.push(',');
                    } else if ch == suffix && suffix != ':' {
                        kept.push(':');
                    } else {
                        kept.push(ch);
                    }
                }
            }
        }
        if quote.is_some() {
            return Err(AssemblyError::Parse {
                file: file.to_string(),
                line: line_no,
                column: line.chars().count(),
                reason: "unterminated string".to_string(),
            });
        }
        if let Some((column, text)) = comment {
            if kept.trim().is_empty() {
                let marker_len = text.chars().next().map_or(0, |c| c.len_utf8());
                comments.push(SourceLine {
                    loc: SourceLoc::new(file, line_no, column),
                    statement: Statement::Comment(text[marker_len..].trim().to_string()),
                });
            }
        }
        cleaned.push_str(&kept);
        cleaned.push('\n');
    }
    Ok((cleaned, comments))
}

/// Unquotes a string argument, applying backslash escapes. The escape
/// set is fixed: \n \t \r \0 \\ \" \'.
pub fn unquote(text: &str, loc: &SourceLoc) -> Result<String, AssemblyError> {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let open = chars.next();
    let close = trimmed.chars().last();
    if trimmed.len() < 2 || open != close || !matches!(open, Some('"') | Some('\'')) {
        return Err(AssemblyError::Parse {
            file: loc.file.clone(),
            line: loc.line,
            column: loc.column,
            reason: format!("expected a quoted string, found {}", trimmed),
        });
    }
    let body = &trimmed[1..trimmed.len() - 1];
    let mut result = String::with_capacity(body.len());
    let mut iter = body.chars();
    while let Some(ch) = iter.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match iter.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            other => {
                return Err(AssemblyError::Parse {
                    file: loc.file.clone(),
                    line: loc.line,
                    column: loc.column,
                    reason: match other {
                        Some(c) => format!("unknown escape \\{}", c),
                        None => "dangling backslash in string".to_string(),
                    },
                });
            }
        }
    }
    Ok(result)
}

fn map_pest_error(
    file: &str,
    cleaned: &str,
    error: pest::error::Error<Rule>,
) -> AssemblyError {
    let (line, column) = match error.line_col {
        pest::error::LineColLocation::Pos((line, column)) => (line, column),
        pest::error::LineColLocation::Span((line, column), _) => (line, column),
    };
    // a colon the grammar refuses is almost always a label with trailing
    // text or a label-shaped typo
    let reason = if cleaned
        .lines()
        .nth(line.saturating_sub(1))
        .is_some_and(|l| l.chars().take(column.saturating_sub(1)).any(|c| c == ':'))
    {
        "stray colon; label definitions must occupy their own line".to_string()
    } else {
        format!("malformed statement: {}", error.variant.message())
    };
    AssemblyError::Parse {
        file: file.to_string(),
        line,
        column,
        reason,
    }
}
