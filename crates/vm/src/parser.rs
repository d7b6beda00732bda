use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use types::{Instruction, Opcode};

/// Structural errors when building a program from text. Semantic problems
/// (bad literals, undeclared variables) are left to the interpreter so they
/// crash the owning process at run time instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownOpcode(String),
    UnbalancedQuote,
    UnbalancedBracket,
    MissingLoopBody,
    NestingTooDeep(usize),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty instruction"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode '{op}'"),
            Self::UnbalancedQuote => write!(f, "unbalanced string literal"),
            Self::UnbalancedBracket => write!(f, "unbalanced FOR brackets"),
            Self::MissingLoopBody => write!(f, "FOR requires a [ ... ] body"),
            Self::NestingTooDeep(depth) => write!(f, "FOR nesting deeper than {depth}"),
        }
    }
}

impl std::error::Error for ParseError {}

static PRINT_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PRINT\s*\((?s)(.*)\)$").unwrap());

/// Parse a `;`-separated program.
///
/// Two PRINT spellings are accepted: the token form (`PRINT "a" x`) and the
/// concatenation form (`PRINT("a" + x)`). Both are normalized to a flat list
/// of operand tokens; the token form gets explicit single-space literals
/// between its operands so the log rendering matches what was written.
/// FOR takes a bracketed body, `FOR 3 [ PRINT "a"; ADD x x 1 ]`, and may
/// nest up to `max_for_depth` levels.
pub fn parse_program(src: &str, max_for_depth: usize) -> Result<Vec<Instruction>, ParseError> {
    let mut program = Vec::new();
    for piece in split_top_level(src)? {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        program.push(parse_instruction(piece, max_for_depth, 0)?);
    }
    if program.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(program)
}

fn parse_instruction(src: &str, max_for_depth: usize, depth: usize) -> Result<Instruction, ParseError> {
    if let Some(caps) = PRINT_CALL.captures(src) {
        let operands = split_concat_operands(&caps[1])?;
        return Ok(Instruction::new(Opcode::Print, operands));
    }

    let (head, rest) = match src.find(char::is_whitespace) {
        Some(at) => (&src[..at], src[at..].trim_start()),
        None => (src, ""),
    };
    let opcode = Opcode::parse(head).ok_or_else(|| ParseError::UnknownOpcode(head.to_string()))?;

    if opcode == Opcode::For {
        return parse_for(rest, max_for_depth, depth);
    }

    let tokens = tokenize(rest)?;
    if opcode == Opcode::Print {
        return Ok(Instruction::new(Opcode::Print, space_separated(tokens)));
    }
    Ok(Instruction::new(opcode, tokens))
}

fn parse_for(rest: &str, max_for_depth: usize, depth: usize) -> Result<Instruction, ParseError> {
    if depth >= max_for_depth {
        return Err(ParseError::NestingTooDeep(max_for_depth));
    }
    let open = rest.find('[').ok_or(ParseError::MissingLoopBody)?;
    let count = rest[..open].trim();
    if count.is_empty() {
        return Err(ParseError::MissingLoopBody);
    }
    let body_src = rest[open..]
        .strip_prefix('[')
        .and_then(|s| s.trim_end().strip_suffix(']'))
        .ok_or(ParseError::UnbalancedBracket)?;

    let mut body = Vec::new();
    for piece in split_top_level(body_src)? {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        body.push(parse_instruction(piece, max_for_depth, depth + 1)?);
    }
    if body.is_empty() {
        return Err(ParseError::MissingLoopBody);
    }
    Ok(Instruction::with_body(Opcode::For, vec![count.to_string()], body))
}

/// Split on `;` outside quotes and outside `[ ... ]` bodies.
fn split_top_level(src: &str) -> Result<Vec<String>, ParseError> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut bracket_depth = 0usize;
    for ch in src.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '[' if !in_quotes => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' if !in_quotes => {
                bracket_depth = bracket_depth.checked_sub(1).ok_or(ParseError::UnbalancedBracket)?;
                current.push(ch);
            }
            ';' if !in_quotes && bracket_depth == 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(ParseError::UnbalancedQuote);
    }
    if bracket_depth != 0 {
        return Err(ParseError::UnbalancedBracket);
    }
    pieces.push(current);
    Ok(pieces)
}

/// Whitespace tokenizer that keeps quoted strings (with their quotes) as
/// single tokens.
fn tokenize(src: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in src.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(ParseError::UnbalancedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Split `"a" + x + "b"` on `+` outside quotes.
fn split_concat_operands(src: &str) -> Result<Vec<String>, ParseError> {
    let mut operands = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in src.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '+' if !in_quotes => {
                operands.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(ParseError::UnbalancedQuote);
    }
    operands.push(current.trim().to_string());
    operands.retain(|op| !op.is_empty());
    Ok(operands)
}

/// Interleave explicit single-space literals so the token form of PRINT
/// renders with the spacing it was written with.
fn space_separated(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len() * 2);
    for (i, token) in tokens.into_iter().enumerate() {
        if i > 0 {
            out.push("\" \"".to_string());
        }
        out.push(token);
    }
    out
}
