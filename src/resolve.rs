//! Dollar-argument and abbreviation resolution.
//!
//! Raw creation arguments (or the contents of a message box) are compiled once
//! into an [`ArgResolver`], a list of per-position transfer functions, and then
//! applied to as many context argument lists as needed. The context list is
//! `[$0, $1, $2, ...]`: for object creation `$0` is the enclosing root's patch
//! id followed by the root's own arguments, for message boxes `$0` is `0`
//! followed by the atoms of the incoming message.

use core::fmt::Write;

use crate::error::PatchError;
use crate::message::Atom;

const ABBREVIATIONS: [(&str, &str); 5] = [
    ("b", "bang"),
    ("f", "float"),
    ("s", "symbol"),
    ("a", "anything"),
    ("l", "list"),
];

#[derive(Clone, Debug, PartialEq)]
enum Piece {
    Text(String),
    Arg(usize),
}

#[derive(Clone, Debug, PartialEq)]
enum Transfer {
    Literal(Atom),
    /// The whole token is `$N`: copied verbatim, type preserved.
    Whole(usize),
    /// The token contains `$N` substrings: substituted as text.
    Interpolated(Vec<Piece>),
}

/// Compiled dollar/abbreviation transform for one argument list.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgResolver {
    transfers: Vec<Transfer>,
}

impl ArgResolver {
    pub fn compile(raw: &[Atom]) -> Self {
        let transfers = raw.iter().map(compile_atom).collect();
        Self { transfers }
    }

    /// Whether any position depends on the context arguments.
    pub fn has_dollars(&self) -> bool {
        self.transfers.iter().any(|t| !matches!(t, Transfer::Literal(_)))
    }

    /// Apply the compiled transform to `context`.
    ///
    /// Fails with [`PatchError::ArgumentOutOfRange`] if any `$N` is not a
    /// valid index into `context`.
    pub fn resolve(&self, context: &[Atom]) -> Result<Vec<Atom>, PatchError> {
        let lookup = |index: usize| {
            context
                .get(index)
                .ok_or(PatchError::ArgumentOutOfRange { index, len: context.len() })
        };

        self.transfers
            .iter()
            .map(|transfer| match transfer {
                Transfer::Literal(atom) => Ok(atom.clone()),
                Transfer::Whole(index) => lookup(*index).map(Clone::clone),
                Transfer::Interpolated(pieces) => {
                    let mut text = String::new();
                    for piece in pieces {
                        match piece {
                            Piece::Text(s) => text.push_str(s),
                            Piece::Arg(index) => {
                                let _ = write!(text, "{}", lookup(*index)?);
                            }
                        }
                    }
                    Ok(Atom::Symbol(text))
                }
            })
            .collect()
    }
}

/// One-shot convenience over [`ArgResolver`].
pub fn resolve(raw: &[Atom], context: &[Atom]) -> Result<Vec<Atom>, PatchError> {
    ArgResolver::compile(raw).resolve(context)
}

fn compile_atom(atom: &Atom) -> Transfer {
    let token = match atom {
        Atom::Float(_) => return Transfer::Literal(atom.clone()),
        Atom::Symbol(s) => s.as_str(),
    };

    if let Some((_, full)) = ABBREVIATIONS.iter().find(|(short, _)| *short == token) {
        return Transfer::Literal(Atom::symbol(*full));
    }

    let pieces = split_dollars(token);
    match pieces.as_slice() {
        [Piece::Arg(index)] => Transfer::Whole(*index),
        _ if pieces.iter().any(|p| matches!(p, Piece::Arg(_))) => Transfer::Interpolated(pieces),
        _ => Transfer::Literal(atom.clone()),
    }
}

fn split_dollars(token: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = token.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let digits_start = start + c.len_utf8();
        let digit_count = token[digits_start..].chars().take_while(char::is_ascii_digit).count();

        if c != '$' || digit_count == 0 {
            text.push(c);
            continue;
        }

        let digits = &token[digits_start..digits_start + digit_count];
        // ascii digits only, so this can only overflow on absurd indices
        let index = digits.parse().unwrap_or(usize::MAX);
        if !text.is_empty() {
            pieces.push(Piece::Text(core::mem::take(&mut text)));
        }
        pieces.push(Piece::Arg(index));

        for _ in 0..digit_count {
            chars.next();
        }
    }

    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    pieces
}
