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

use super::{BinaryOp, Expr, Stmt, UnaryOp};
use crate::errors::AssemblyError;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "sandbox/sandbox.pest"]
struct SandboxParser;

/// Nesting allowed while building the AST; deeper bodies are rejected at
/// load time so evaluation can never recurse past this.
pub const MAX_DEPTH: usize = 32;

fn syntax_err(text: &str, detail: impl std::fmt::Display) -> AssemblyError {
    AssemblyError::Sandbox {
        reason: format!("syntax error in \"{}\": {}", text.trim(), detail),
    }
}

fn depth_err() -> AssemblyError {
    AssemblyError::Sandbox {
        reason: format!("expression nests deeper than {} levels", MAX_DEPTH),
    }
}

pub(super) fn parse_program(text: &str) -> Result<Vec<Stmt>, AssemblyError> {
    let mut pairs =
        SandboxParser::parse(Rule::program, text).map_err(|e| syntax_err(text, e))?;
    let program = pairs.next().expect("grammar always yields a program");
    let mut stmts = Vec::new();
    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::stmt => stmts.push(build_stmt(pair, 0)?),
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    Ok(stmts)
}

pub(super) fn parse_expr_text(text: &str) -> Result<Expr, AssemblyError> {
    let mut pairs =
        SandboxParser::parse(Rule::expr_entry, text).map_err(|e| syntax_err(text, e))?;
    let entry = pairs.next().expect("grammar always yields an entry");
    let expr = entry
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .expect("entry always holds an expr");
    build_expr(expr, 0)
}

fn build_stmt(pair: Pair<Rule>, depth: usize) -> Result<Stmt, AssemblyError> {
    if depth > MAX_DEPTH {
        return Err(depth_err());
    }
    let inner = pair.into_inner().next().expect("stmt holds one node");
    match inner.as_rule() {
        Rule::if_stmt => build_if(inner, depth),
        Rule::for_stmt => {
            let mut parts = inner.into_inner();
            let var = parts.next().unwrap().as_str().to_string();
            let start = build_expr(parts.next().unwrap(), depth + 1)?;
            let end = build_expr(parts.next().unwrap(), depth + 1)?;
            let body = build_block(parts.next().unwrap(), depth + 1)?;
            Ok(Stmt::For {
                var,
                start,
                end,
                body,
            })
        }
        Rule::let_stmt => {
            let mut parts = inner.into_inner();
            let name = parts.next().unwrap().as_str().to_string();
            let value = build_expr(parts.next().unwrap(), depth + 1)?;
            Ok(Stmt::Let(name, value))
        }
        Rule::call_stmt => {
            let call = inner.into_inner().next().unwrap();
            Ok(Stmt::Call(build_call(call, depth + 1)?))
        }
        _ => unreachable!(),
    }
}

fn build_if(pair: Pair<Rule>, depth: usize) -> Result<Stmt, AssemblyError> {
    if depth > MAX_DEPTH {
        return Err(depth_err());
    }
    let mut parts = pair.into_inner();
    let cond = build_expr(parts.next().unwrap(), depth + 1)?;
    let then_body = build_block(parts.next().unwrap(), depth + 1)?;
    let else_body = match parts.next() {
        Some(clause) => {
            let inner = clause.into_inner().next().expect("else holds one node");
            match inner.as_rule() {
                Rule::if_stmt => vec![build_if(inner, depth + 1)?],
                Rule::block => build_block(inner, depth + 1)?,
                _ => unreachable!(),
            }
        }
        None => Vec::new(),
    };
    Ok(Stmt::If {
        cond,
        then_body,
        else_body,
    })
}

fn build_block(pair: Pair<Rule>, depth: usize) -> Result<Vec<Stmt>, AssemblyError> {
    pair.into_inner()
        .map(|stmt| build_stmt(stmt, depth + 1))
        .collect()
}

fn build_expr(pair: Pair<Rule>, depth: usize) -> Result<Expr, AssemblyError> {
    if depth > MAX_DEPTH {
        return Err(depth_err());
    }
    let mut inner = pair.into_inner();
    let first = build_unary(inner.next().unwrap(), depth + 1)?;
    let mut rest: Vec<(BinaryOp, Expr)> = Vec::new();
    while let Some(op_pair) = inner.next() {
        let op = binary_op(op_pair.as_rule());
        let rhs = build_unary(inner.next().unwrap(), depth + 1)?;
        rest.push((op, rhs));
    }
    Ok(fold_binary(first, &rest))
}

fn binary_op(rule: Rule) -> BinaryOp {
    match rule {
        Rule::add => BinaryOp::Add,
        Rule::sub => BinaryOp::Sub,
        Rule::mul => BinaryOp::Mul,
        Rule::div => BinaryOp::Div,
        Rule::rem => BinaryOp::Rem,
        Rule::bit_and => BinaryOp::And,
        Rule::bit_or => BinaryOp::Or,
        Rule::bit_xor => BinaryOp::Xor,
        Rule::shl => BinaryOp::Shl,
        Rule::shr => BinaryOp::Shr,
        Rule::eq => BinaryOp::Eq,
        Rule::ne => BinaryOp::Ne,
        Rule::lt => BinaryOp::Lt,
        Rule::le => BinaryOp::Le,
        Rule::gt => BinaryOp::Gt,
        Rule::ge => BinaryOp::Ge,
        _ => unreachable!(),
    }
}

fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 10,
        BinaryOp::Add | BinaryOp::Sub => 9,
        BinaryOp::Shl | BinaryOp::Shr => 8,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
        BinaryOp::Eq | BinaryOp::Ne => 6,
        BinaryOp::And => 5,
        BinaryOp::Xor => 4,
        BinaryOp::Or => 3,
    }
}

// Conventional precedence over the flat operator list; every operator is
// left-associative.
fn fold_binary(first: Expr, rest: &[(BinaryOp, Expr)]) -> Expr {
    fn climb(lhs: Expr, rest: &[(BinaryOp, Expr)], pos: &mut usize, min_prec: u8) -> Expr {
        let mut lhs = lhs;
        while *pos < rest.len() {
            let (op, _) = rest[*pos];
            if precedence(op) < min_prec {
                break;
            }
            let (_, ref rhs) = rest[*pos];
            let mut rhs = rhs.clone();
            *pos += 1;
            while *pos < rest.len() {
                let (next_op, _) = rest[*pos];
                if precedence(next_op) <= precedence(op) {
                    break;
                }
                rhs = climb(rhs, rest, pos, precedence(op) + 1);
            }
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        lhs
    }
    let mut pos = 0;
    climb(first, rest, &mut pos, 0)
}

fn build_unary(pair: Pair<Rule>, depth: usize) -> Result<Expr, AssemblyError> {
    if depth > MAX_DEPTH {
        return Err(depth_err());
    }
    let inner = pair.into_inner().next().expect("unary holds one node");
    match inner.as_rule() {
        Rule::neg => {
            let operand = build_unary(inner.into_inner().next().unwrap(), depth + 1)?;
            Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)))
        }
        Rule::not => {
            let operand = build_unary(inner.into_inner().next().unwrap(), depth + 1)?;
            Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
        }
        Rule::primary => build_primary(inner, depth + 1),
        _ => unreachable!(),
    }
}

fn build_primary(pair: Pair<Rule>, depth: usize) -> Result<Expr, AssemblyError> {
    if depth > MAX_DEPTH {
        return Err(depth_err());
    }
    let inner = pair.into_inner().next().expect("primary holds one node");
    match inner.as_rule() {
        Rule::literal => build_literal(inner),
        Rule::call => build_call(inner, depth + 1),
        Rule::bitfield => {
            let mut parts = inner.into_inner();
            let name = parts.next().unwrap().as_str().to_string();
            let high = build_expr(parts.next().unwrap(), depth + 1)?;
            let low = build_expr(parts.next().unwrap(), depth + 1)?;
            Ok(Expr::BitField {
                name,
                high: Box::new(high),
                low: Box::new(low),
            })
        }
        Rule::symbol => Ok(Expr::Symbol(inner.as_str().to_string())),
        Rule::pc => Ok(Expr::Pc),
        Rule::expr => build_expr(inner, depth + 1),
        _ => unreachable!(),
    }
}

fn build_call(pair: Pair<Rule>, depth: usize) -> Result<Expr, AssemblyError> {
    let mut parts = pair.into_inner();
    let name = parts.next().unwrap().as_str().to_string();
    let mut args = Vec::new();
    if let Some(arg_list) = parts.next() {
        for arg in arg_list.into_inner() {
            args.push(build_expr(arg, depth + 1)?);
        }
    }
    Ok(Expr::Call(name, args))
}

fn build_literal(pair: Pair<Rule>) -> Result<Expr, AssemblyError> {
    let text = pair.as_str();
    let value = if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else {
        text.parse::<u64>()
    };
    match value {
        Ok(v) => Ok(Expr::Int(v as i64)),
        Err(_) => Err(AssemblyError::Sandbox {
            reason: format!("integer literal {} is out of range", text),
        }),
    }
}
