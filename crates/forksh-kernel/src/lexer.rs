//! Shell-style word splitting.
//!
//! Uses the logos lexer generator for raw fragments, then joins adjacent
//! fragments into words the way a POSIX shell does:
//!
//! - single quotes are literal: `'{"@id": 1}'`
//! - double quotes honour backslash escapes for `"`, `\`, `$` and backtick
//! - a backslash outside quotes escapes the next character
//! - fragments with no whitespace between them form one word: `a'b'"c"` → `abc`
//!
//! Operators are recognised even without surrounding whitespace. Only `>`,
//! `|`, `(` and `)` mean anything to the tree builder; the rest are lexed so
//! they can be rejected by name.

use logos::Logos;

use crate::error::ParseError;

/// A word or an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Op(&'static str),
}

#[derive(Logos, Debug, Clone, PartialEq)]
enum Raw {
    #[regex(r"[ \t\r\n]+")]
    Space,

    #[regex(r"'[^']*'", |lex| single_quoted(lex.slice()))]
    #[regex(r#""([^"\\]|\\.)*""#, |lex| double_quoted(lex.slice()))]
    #[regex(r"\\.", |lex| lex.slice()[1..].to_string())]
    #[regex(r#"[^ \t\r\n'"\\()<>|&;]+"#, |lex| lex.slice().to_string())]
    Fragment(String),

    #[token("&&", op)]
    #[token("||", op)]
    #[token(";;", op)]
    #[token("|&", op)]
    #[token("<(", op)]
    #[token(">>", op)]
    #[token(">&", op)]
    #[token("&", op)]
    #[token(";", op)]
    #[token("(", op)]
    #[token(")", op)]
    #[token("|", op)]
    #[token("<", op)]
    #[token(">", op)]
    Op(&'static str),

    #[regex(r"'[^']*")]
    #[regex(r#""([^"\\]|\\.)*\\?"#)]
    Unterminated,
}

/// Every operator the lexer recognises.
const OPERATORS: &[&str] = &["&&", "||", ";;", "|&", "<(", ">>", ">&", "&", ";", "(", ")", "|", "<", ">"];

fn op(lex: &mut logos::Lexer<Raw>) -> Option<&'static str> {
    OPERATORS.iter().copied().find(|candidate| *candidate == lex.slice())
}

fn single_quoted(slice: &str) -> String {
    slice[1..slice.len() - 1].to_string()
}

fn double_quoted(slice: &str) -> String {
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next @ ('"' | '\\' | '$' | '`')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split a line into words and operators.
pub fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut word: Option<String> = None;
    let mut lex = Raw::lexer(line);

    while let Some(raw) = lex.next() {
        match raw {
            Ok(Raw::Space) => flush(&mut word, &mut tokens),
            Ok(Raw::Fragment(fragment)) => word.get_or_insert_with(String::new).push_str(&fragment),
            Ok(Raw::Op(op)) => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Op(op));
            }
            Ok(Raw::Unterminated) => return Err(ParseError::UnterminatedQuote),
            Err(()) => return Err(ParseError::UnexpectedInput(lex.slice().to_string())),
        }
    }
    flush(&mut word, &mut tokens);
    Ok(tokens)
}

fn flush(word: &mut Option<String>, tokens: &mut Vec<Token>) {
    if let Some(word) = word.take() {
        tokens.push(Token::Word(word));
    }
}

/// Split a line into words only, failing on any operator.
pub fn split_words(line: &str) -> Result<Vec<String>, ParseError> {
    tokenize(line)?
        .into_iter()
        .map(|token| match token {
            Token::Word(word) => Ok(word),
            Token::Op(op) => Err(ParseError::UnsupportedOperator(op.to_string())),
        })
        .collect()
}
