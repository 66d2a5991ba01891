// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The type signature grammar.
//!
//! ```text
//! S    := base | 'm' S | 'a' S | '(' S* ')' | '{' base S '}' | 'v'
//! base := 'b' 'y' 'n' 'q' 'i' 'u' 'x' 't' 'd' 's' 'o' 'g' '*' '?'
//! ```
//!
//! Signatures form a prefix code: no valid signature is a prefix of another.
//! This lets a member signature be sliced out of its parent's signature
//! without copying, and lets an embedded signature go unterminated (its
//! length is fully determined by [`length`]).
//!
//! The grammar above departs from a strict reading of the source's `S+`
//! production for structures: the source's own `()` unit type has zero
//! members, so we accept zero-or-more. See `DESIGN.md`.

use crate::error::ParseError;
use core::fmt;
use core::ops::Deref;

/// Recursion is bounded to guard against pathological/adversarial input;
/// matches the limit used by the reference implementation this crate is
/// modeled on.
const MAX_DEPTH: u32 = 64;

fn is_concrete_base_char(c: u8) -> bool {
    matches!(
        c,
        b'b' | b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
    )
}

/// Whether `c` may appear in the `base` production, including the two
/// wildcard characters.
pub fn is_base_char(c: u8) -> bool {
    is_concrete_base_char(c) || c == b'*' || c == b'?'
}

fn scan_one(data: &[u8], mut pos: usize, limit: usize, depth: u32) -> Result<usize, ParseError> {
    if depth > MAX_DEPTH {
        return Err(ParseError::UnbalancedBrackets);
    }
    if pos >= limit {
        return Err(ParseError::Truncated);
    }
    let c = data[pos];
    pos += 1;

    match c {
        _ if is_base_char(c) => Ok(pos),
        b'v' => Ok(pos),
        b'm' | b'a' => scan_one(data, pos, limit, depth + 1),
        b'(' => {
            loop {
                if pos >= limit {
                    return Err(ParseError::UnbalancedBrackets);
                }
                if data[pos] == b')' {
                    pos += 1;
                    break;
                }
                pos = scan_one(data, pos, limit, depth + 1)?;
            }
            Ok(pos)
        }
        b'{' => {
            if pos >= limit || !is_concrete_base_char(data[pos]) {
                return Err(ParseError::NonBaseDictKey);
            }
            pos = scan_one(data, pos, limit, depth + 1)?;
            if pos >= limit {
                return Err(ParseError::UnbalancedBrackets);
            }
            pos = scan_one(data, pos, limit, depth + 1)?;
            if pos >= limit || data[pos] != b'}' {
                return Err(ParseError::UnbalancedBrackets);
            }
            Ok(pos + 1)
        }
        other => Err(ParseError::UnexpectedByte(other)),
    }
}

/// Advances a cursor through exactly one complete signature starting at
/// `data[0]`, never reading at or past `limit`. Returns the number of
/// bytes consumed.
pub fn scan(data: &[u8], limit: usize) -> Result<usize, ParseError> {
    if data.is_empty() {
        return Err(ParseError::Empty);
    }
    scan_one(data, 0, limit.min(data.len()), 0)
}

/// Bytes consumed by the first complete signature starting at `sig`.
///
/// A signature sliced out of a parent need not be nul-terminated: because
/// the grammar is a prefix code, this fully determines its extent.
pub fn length(sig: &[u8]) -> Result<usize, ParseError> {
    scan(sig, sig.len())
}

/// Scans `s` and additionally requires it be exactly one signature with no
/// trailing bytes.
pub fn validate(s: &str) -> Result<(), ParseError> {
    let consumed = scan(s.as_bytes(), s.len())?;
    if consumed != s.len() {
        return Err(ParseError::TrailingBytes);
    }
    Ok(())
}

/// Whether `s` is exactly one well-formed signature.
pub fn is_valid(s: &str) -> bool {
    validate(s).is_ok()
}

/// Whether `sig` contains no wildcard characters.
pub fn is_concrete(sig: &str) -> bool {
    is_valid(sig) && !sig.bytes().any(|b| b == b'*' || b == b'?')
}

/// Structural hash over the signature bytes: the rolling polynomial
/// `h = (h << 5) - h + c`, i.e. `h = h*31 + c`.
pub fn hash(sig: &str) -> u32 {
    let mut h: u32 = 0;
    for &c in sig.as_bytes() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as u32);
    }
    h
}

/// Structural equality over signature bytes.
pub fn equal(a: &str, b: &str) -> bool {
    a == b
}

fn matches_at<'a>(
    pattern: &'a [u8],
    p: usize,
    concrete: &'a [u8],
    c: usize,
) -> Result<(usize, usize), ()> {
    let pc = *pattern.get(p).ok_or(())?;

    match pc {
        b'*' => {
            let clen = length(&concrete[c..]).map_err(|_| ())?;
            Ok((p + 1, c + clen))
        }
        b'?' => {
            let cc = *concrete.get(c).ok_or(())?;
            if is_concrete_base_char(cc) {
                Ok((p + 1, c + 1))
            } else {
                Err(())
            }
        }
        b'r' => {
            if concrete.get(c) != Some(&b'(') {
                return Err(());
            }
            let clen = length(&concrete[c..]).map_err(|_| ())?;
            Ok((p + 1, c + clen))
        }
        b'm' | b'a' => {
            if concrete.get(c) != Some(&pc) {
                return Err(());
            }
            matches_at(pattern, p + 1, concrete, c + 1)
        }
        b'(' => {
            if concrete.get(c) != Some(&b'(') {
                return Err(());
            }
            let (mut pp, mut cc) = (p + 1, c + 1);
            loop {
                let p_done = pattern.get(pp) == Some(&b')');
                let c_done = concrete.get(cc) == Some(&b')');
                if p_done && c_done {
                    return Ok((pp + 1, cc + 1));
                }
                if p_done != c_done {
                    return Err(());
                }
                let (np, nc) = matches_at(pattern, pp, concrete, cc)?;
                pp = np;
                cc = nc;
            }
        }
        b'{' => {
            if concrete.get(c) != Some(&b'{') {
                return Err(());
            }
            let (pp, cc) = matches_at(pattern, p + 1, concrete, c + 1)?;
            let (pp, cc) = matches_at(pattern, pp, concrete, cc)?;
            if pattern.get(pp) == Some(&b'}') && concrete.get(cc) == Some(&b'}') {
                Ok((pp + 1, cc + 1))
            } else {
                Err(())
            }
        }
        b'v' => {
            if concrete.get(c) == Some(&b'v') {
                Ok((p + 1, c + 1))
            } else {
                Err(())
            }
        }
        literal if is_concrete_base_char(literal) => {
            if concrete.get(c) == Some(&literal) {
                Ok((p + 1, c + 1))
            } else {
                Err(())
            }
        }
        _ => Err(()),
    }
}

/// True iff `concrete` can be produced by expanding each wildcard in
/// `pattern`. `*` consumes one sub-signature, `?` one base character,
/// `r` one struct of any arity, and all other characters match literally.
pub fn matches(pattern: &str, concrete: &str) -> bool {
    match matches_at(pattern.as_bytes(), 0, concrete.as_bytes(), 0) {
        Ok((p, c)) => p == pattern.len() && c == concrete.len(),
        Err(()) => false,
    }
}

/// Per-base-class wire metadata (§4.2's table).
pub fn base_align_mask(base: u8) -> u8 {
    match base {
        b'b' | b'y' => 0,
        b'n' | b'q' => 1,
        b'i' | b'u' => 3,
        b'x' | b't' | b'd' => 7,
        b's' | b'o' | b'g' => 0,
        _ => 0,
    }
}

/// `None` means variable-size.
pub fn base_fixed_size(base: u8) -> Option<u32> {
    match base {
        b'b' | b'y' => Some(1),
        b'n' | b'q' => Some(2),
        b'i' | b'u' => Some(4),
        b'x' | b't' | b'd' => Some(8),
        b's' | b'o' | b'g' => None,
        _ => None,
    }
}

/// The top-level shape of a signature, without recursing into children.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind<'a> {
    Basic(u8),
    Maybe(&'a str),
    Array(&'a str),
    Tuple(&'a str),
    DictEntry(&'a str),
    Variant,
}

/// Classifies the outermost constructor of `sig`. Does not validate
/// nested content; callers that need that should call [`validate`] first.
pub fn classify(sig: &str) -> Result<Kind<'_>, ParseError> {
    let b = sig.as_bytes();
    let first = *b.first().ok_or(ParseError::Empty)?;
    match first {
        _ if is_concrete_base_char(first) || first == b'*' || first == b'?' => {
            Ok(Kind::Basic(first))
        }
        b'v' => Ok(Kind::Variant),
        b'm' => Ok(Kind::Maybe(&sig[1..])),
        b'a' => Ok(Kind::Array(&sig[1..])),
        b'(' => Ok(Kind::Tuple(sig)),
        b'{' => Ok(Kind::DictEntry(sig)),
        other => Err(ParseError::UnexpectedByte(other)),
    }
}

/// Iterates the direct members of a struct or dict-entry signature.
///
/// Built on `first`/`next` from §4.1: `first` skips the opening bracket,
/// `next` advances past a balanced child, and the iterator ends at the
/// closing bracket.
pub struct Members<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Members<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let c = *self.data.get(self.pos)?;
        if c == b')' || c == b'}' {
            return None;
        }
        let len = length(&self.data[self.pos..]).ok()?;
        let s = core::str::from_utf8(&self.data[self.pos..self.pos + len]).ok()?;
        self.pos += len;
        Some(s)
    }
}

/// Builds a [`Members`] iterator over a struct (`(...)`) or dict-entry
/// (`{...}`) signature's direct children.
pub fn members(sig: &str) -> Result<Members<'_>, ParseError> {
    let b = sig.as_bytes();
    match b.first() {
        Some(b'(') | Some(b'{') => Ok(Members { data: b, pos: 1 }),
        Some(&other) => Err(ParseError::UnexpectedByte(other)),
        None => Err(ParseError::Empty),
    }
}

/// An owned, validated, immutable signature.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Signature(Box<str>);

impl Signature {
    /// Validates and wraps `s`.
    pub fn new(s: impl Into<Box<str>>) -> Result<Self, ParseError> {
        let s = s.into();
        validate(&s)?;
        Ok(Self(s))
    }

    /// Validates that `s` is concrete (no wildcards) and wraps it.
    pub fn new_concrete(s: impl Into<Box<str>>) -> Result<Self, ParseError> {
        let sig = Self::new(s)?;
        if !sig.is_concrete() {
            return Err(ParseError::NotConcrete(sig.0));
        }
        Ok(sig)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_concrete(&self) -> bool {
        is_concrete(&self.0)
    }

    pub fn hash_value(&self) -> u32 {
        hash(&self.0)
    }

    pub fn classify(&self) -> Kind<'_> {
        classify(&self.0).expect("signature was validated at construction")
    }

    pub fn members(&self) -> Members<'_> {
        members(&self.0).expect("members() only valid on tuple/dict-entry signatures")
    }

    pub fn matches(&self, concrete: &str) -> bool {
        matches(&self.0, concrete)
    }
}

impl Deref for Signature {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_base_types() {
        for b in "bynqiuxtdsog".bytes() {
            assert!(is_valid(core::str::from_utf8(&[b]).unwrap()));
        }
    }

    #[test]
    fn scans_containers() {
        assert!(is_valid("mi"));
        assert!(is_valid("as"));
        assert!(is_valid("a(ss)"));
        assert!(is_valid("(syus)"));
        assert!(is_valid("()"));
        assert!(is_valid("{sv}"));
        assert!(is_valid("v"));
        assert!(is_valid("a{sv}"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(!is_valid(""));
        assert!(!is_valid("("));
        assert!(!is_valid("(s"));
        assert!(!is_valid("s)"));
        assert!(!is_valid("{s}"));
        assert!(!is_valid("{ss"));
        assert!(!is_valid("{(s)s}"));
        assert!(!is_valid("z"));
        assert!(!is_valid("ss"));
    }

    #[test]
    fn prefix_code_deletion_breaks_validity() {
        let sig = "a(ss)";
        for i in 0..sig.len() {
            let mut mutated = sig.to_string();
            mutated.remove(i);
            assert!(
                !is_valid(&mutated),
                "deleting byte {i} from {sig} should invalidate it, got {mutated}"
            );
        }
    }

    #[test]
    fn concreteness() {
        assert!(is_concrete("a(ss)"));
        assert!(!is_concrete("a*"));
        assert!(!is_concrete("a?"));
        assert!(is_concrete("v"));
    }

    #[test]
    fn hash_is_stable_and_distinguishes() {
        assert_eq!(hash("s"), hash("s"));
        assert_ne!(hash("s"), hash("i"));
    }

    #[test]
    fn pattern_matching() {
        assert!(matches("*", "s"));
        assert!(matches("*", "a(ss)"));
        assert!(matches("?", "s"));
        assert!(!matches("?", "v"));
        assert!(matches("as", "as"));
        assert!(!matches("as", "ai"));
        assert!(matches("a*", "as"));
        assert!(matches("a*", "a(ss)"));
        assert!(matches("r", "(ss)"));
        assert!(matches("r", "()"));
        assert!(!matches("r", "s"));
        assert!(matches("(*s)", "(is)"));
        assert!(!matches("(*s)", "(ii)"));
        assert!(matches("{s*}", "{sv}"));
        assert!(matches("mi", "mi"));
        assert!(!matches("mi", "ms"));
    }

    #[test]
    fn member_iteration() {
        let members: Vec<_> = members("(syus)").unwrap().collect();
        assert_eq!(members, vec!["s", "y", "u", "s"]);
        let members: Vec<_> = members("()").unwrap().collect();
        assert!(members.is_empty());
        let members: Vec<_> = members("{sv}").unwrap().collect();
        assert_eq!(members, vec!["s", "v"]);
    }

    #[test]
    fn nested_signature_length_without_nul_terminator() {
        // "as" is embedded inside "a(as)" without its own terminator; length()
        // must determine its extent from the prefix code alone.
        let parent = "a(as)";
        let body = &parent[2..parent.len() - 1];
        assert_eq!(length(body.as_bytes()).unwrap(), body.len());
    }
}
