// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Textual markup (§10.4): prints and parses the human-readable
//! notation `gvariant-cat`/`gvariant-serialise` use (`'hi'`, `42`,
//! `[1, 2, 3]`, `('a', 1.5)`, `<@s 'x'>`, `@mi nothing`/`just 4`,
//! `{'key': 'value'}`).
//!
//! Built entirely on [`crate::builder::ContainerBuilder`] and
//! [`Value::get_child`] — no byte-layout knowledge lives here.

use crate::builder::{BuilderKind, ContainerBuilder};
use crate::error::{GVariantError, Result};
use crate::typeinfo::{self, TypeInfo, TypeInfoKind};
use crate::value::Value;
use std::sync::Arc;

/// Renders `value` in the textual notation.
pub fn print(value: &Value) -> Result<String> {
    let mut out = String::new();
    print_value(value, &mut out)?;
    Ok(out)
}

fn print_value(value: &Value, out: &mut String) -> Result<()> {
    let ti = value.type_info().clone();
    match &ti.kind {
        TypeInfoKind::Basic if ti.is_variant() => {
            let child = value.get_child(0)?;
            out.push('<');
            out.push('@');
            out.push_str(&child.type_info().signature);
            out.push(' ');
            print_value(&child, out)?;
            out.push('>');
            Ok(())
        }
        TypeInfoKind::Basic => print_basic(&ti, value, out),
        TypeInfoKind::Maybe { .. } => {
            if value.n_children()? == 0 {
                out.push_str("nothing");
            } else {
                out.push_str("just ");
                print_value(&value.get_child(0)?, out)?;
            }
            Ok(())
        }
        TypeInfoKind::Array { element } => {
            if matches!(element.kind, TypeInfoKind::Tuple { is_dict_entry: true, .. }) {
                out.push('{');
                let n = value.n_children()?;
                for i in 0..n {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    print_dict_entry(&value.get_child(i)?, out)?;
                }
                out.push('}');
            } else {
                out.push('[');
                let n = value.n_children()?;
                for i in 0..n {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    print_value(&value.get_child(i)?, out)?;
                }
                out.push(']');
            }
            Ok(())
        }
        TypeInfoKind::Tuple { is_dict_entry: true, .. } => print_dict_entry(value, out),
        TypeInfoKind::Tuple { members, .. } => {
            out.push('(');
            for (i, _) in members.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_value(&value.get_child(i)?, out)?;
            }
            if members.len() == 1 {
                out.push(',');
            }
            out.push(')');
            Ok(())
        }
    }
}

fn print_dict_entry(entry: &Value, out: &mut String) -> Result<()> {
    print_value(&entry.get_child(0)?, out)?;
    out.push_str(": ");
    print_value(&entry.get_child(1)?, out)
}

fn print_basic(ti: &Arc<TypeInfo>, value: &Value, out: &mut String) -> Result<()> {
    let data = value.to_bytes()?;
    let base = ti.signature.as_bytes()[0];
    match base {
        b'b' => out.push_str(if data.first() == Some(&1) { "true" } else { "false" }),
        b'y' => out.push_str(&data[0].to_string()),
        b'n' => out.push_str(&i16::from_le_bytes(data[..2].try_into().unwrap()).to_string()),
        b'q' => out.push_str(&u16::from_le_bytes(data[..2].try_into().unwrap()).to_string()),
        b'i' => out.push_str(&i32::from_le_bytes(data[..4].try_into().unwrap()).to_string()),
        b'u' => out.push_str(&u32::from_le_bytes(data[..4].try_into().unwrap()).to_string()),
        b'x' => out.push_str(&i64::from_le_bytes(data[..8].try_into().unwrap()).to_string()),
        b't' => out.push_str(&u64::from_le_bytes(data[..8].try_into().unwrap()).to_string()),
        b'd' => {
            let f = f64::from_le_bytes(data[..8].try_into().unwrap());
            if f.fract() == 0.0 && f.is_finite() {
                out.push_str(&format!("{f:.1}"));
            } else {
                out.push_str(&f.to_string());
            }
        }
        b's' | b'o' | b'g' => print_quoted_string(&data[..data.len().saturating_sub(1)], out),
        other => {
            return Err(GVariantError::BuilderContract(format!(
                "no textual form for base type {}",
                other as char
            )))
        }
    }
    Ok(())
}

fn print_quoted_string(bytes: &[u8], out: &mut String) {
    out.push('\'');
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            _ => out.push(b as char),
        }
    }
    out.push('\'');
}

/// Parses `text` as a value of the given concrete `signature`.
pub fn parse(signature: &str, text: &str) -> Result<Value> {
    let ti = typeinfo::get(signature)?;
    let mut cursor = Cursor { s: text, pos: 0 };
    let value = parse_value(&ti, &mut cursor)?;
    cursor.skip_ws();
    if cursor.pos != cursor.s.len() {
        return Err(GVariantError::BuilderContract(format!(
            "trailing input after value: {:?}",
            &cursor.s[cursor.pos..]
        )));
    }
    Ok(value)
}

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += self.peek().unwrap().len_utf8();
        }
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.bump() == Some(c) {
            Ok(())
        } else {
            Err(GVariantError::BuilderContract(format!(
                "expected {c:?} at byte offset {}",
                self.pos
            )))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.pos += self.peek().unwrap().len_utf8();
        }
        &self.s[start..self.pos]
    }
}

fn parse_value(ti: &Arc<TypeInfo>, c: &mut Cursor) -> Result<Value> {
    c.skip_ws();
    match &ti.kind {
        TypeInfoKind::Basic if ti.is_variant() => {
            c.expect('<')?;
            c.skip_ws();
            c.expect('@')?;
            let sig = c.take_while(|ch| !ch.is_whitespace());
            let inner_ti = typeinfo::get(sig)?;
            let inner = parse_value(&inner_ti, c)?;
            c.skip_ws();
            c.expect('>')?;
            let mut b = ContainerBuilder::new(BuilderKind::Variant, None)?;
            b.add(inner)?;
            b.end()
        }
        TypeInfoKind::Basic => parse_basic(ti, c),
        TypeInfoKind::Maybe { element } => {
            if c.s[c.pos..].starts_with("nothing") {
                c.pos += "nothing".len();
                ContainerBuilder::new(BuilderKind::Maybe, Some(ti.clone()))?.end()
            } else if c.s[c.pos..].starts_with("just") {
                c.pos += "just".len();
                let child = parse_value(element, c)?;
                let mut b = ContainerBuilder::new(BuilderKind::Maybe, Some(ti.clone()))?;
                b.add(child)?;
                b.end()
            } else {
                Err(GVariantError::BuilderContract(
                    "expected 'nothing' or 'just ...'".into(),
                ))
            }
        }
        TypeInfoKind::Array { element } => {
            let is_dict = matches!(element.kind, TypeInfoKind::Tuple { is_dict_entry: true, .. });
            let (open, close) = if is_dict { ('{', '}') } else { ('[', ']') };
            c.expect(open)?;
            let mut b = ContainerBuilder::new(BuilderKind::Array, Some(ti.clone()))?;
            c.skip_ws();
            if c.peek() != Some(close) {
                loop {
                    let item = if is_dict {
                        parse_dict_entry(element, c)?
                    } else {
                        parse_value(element, c)?
                    };
                    b.add(item)?;
                    c.skip_ws();
                    if c.peek() == Some(',') {
                        c.bump();
                        c.skip_ws();
                    } else {
                        break;
                    }
                }
            }
            c.expect(close)?;
            b.end()
        }
        TypeInfoKind::Tuple {
            members,
            is_dict_entry: false,
        } => {
            c.expect('(')?;
            let mut b = ContainerBuilder::new(BuilderKind::Tuple, Some(ti.clone()))?;
            for (i, m) in members.iter().enumerate() {
                if i > 0 {
                    c.expect(',')?;
                }
                let child = parse_value(&m.type_info, c)?;
                b.add(child)?;
            }
            c.skip_ws();
            if members.len() == 1 && c.peek() == Some(',') {
                c.bump();
            }
            c.expect(')')?;
            b.end()
        }
        TypeInfoKind::Tuple {
            is_dict_entry: true,
            ..
        } => parse_dict_entry(ti, c),
    }
}

fn parse_dict_entry(ti: &Arc<TypeInfo>, c: &mut Cursor) -> Result<Value> {
    let key_ti = ti
        .member(0)
        .map(|m| m.type_info.clone())
        .ok_or_else(|| GVariantError::BuilderContract("dict entry type has no key member".into()))?;
    let value_ti = ti
        .member(1)
        .map(|m| m.type_info.clone())
        .ok_or_else(|| GVariantError::BuilderContract("dict entry type has no value member".into()))?;
    let key = parse_value(&key_ti, c)?;
    c.expect(':')?;
    let value = parse_value(&value_ti, c)?;
    let mut b = ContainerBuilder::new(BuilderKind::DictEntry, Some(ti.clone()))?;
    b.add(key)?;
    b.add(value)?;
    b.end()
}

fn parse_basic(ti: &Arc<TypeInfo>, c: &mut Cursor) -> Result<Value> {
    let base = ti.signature.as_bytes()[0];
    match base {
        b'b' => {
            if c.s[c.pos..].starts_with("true") {
                c.pos += 4;
                Ok(Value::new_basic(ti.clone(), &[1]))
            } else if c.s[c.pos..].starts_with("false") {
                c.pos += 5;
                Ok(Value::new_basic(ti.clone(), &[0]))
            } else {
                Err(GVariantError::BuilderContract("expected true/false".into()))
            }
        }
        b's' | b'o' | b'g' => {
            let bytes = parse_quoted_string(c)?;
            let mut payload = bytes;
            payload.push(0);
            Ok(Value::new_basic(ti.clone(), &payload))
        }
        b'd' => {
            let tok = c.take_while(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E'));
            let f: f64 = tok
                .parse()
                .map_err(|_| GVariantError::BuilderContract(format!("invalid double: {tok:?}")))?;
            Ok(Value::new_basic(ti.clone(), &f.to_le_bytes()))
        }
        b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' => {
            let tok = c.take_while(|ch| ch.is_ascii_digit() || ch == '-');
            let n: i128 = tok
                .parse()
                .map_err(|_| GVariantError::BuilderContract(format!("invalid integer: {tok:?}")))?;
            let payload = match base {
                b'y' => vec![n as u8],
                b'n' => (n as i16).to_le_bytes().to_vec(),
                b'q' => (n as u16).to_le_bytes().to_vec(),
                b'i' => (n as i32).to_le_bytes().to_vec(),
                b'u' => (n as u32).to_le_bytes().to_vec(),
                b'x' => (n as i64).to_le_bytes().to_vec(),
                b't' => (n as u64).to_le_bytes().to_vec(),
                _ => unreachable!(),
            };
            Ok(Value::new_basic(ti.clone(), &payload))
        }
        other => Err(GVariantError::BuilderContract(format!(
            "no textual form for base type {}",
            other as char
        ))),
    }
}

fn parse_quoted_string(c: &mut Cursor) -> Result<Vec<u8>> {
    c.skip_ws();
    c.expect('\'')?;
    let mut out = Vec::new();
    loop {
        match c.bump() {
            None => return Err(GVariantError::BuilderContract("unterminated string".into())),
            Some('\'') => break,
            Some('\\') => match c.bump() {
                Some('\\') => out.push(b'\\'),
                Some('\'') => out.push(b'\''),
                Some('n') => out.push(b'\n'),
                Some('t') => out.push(b'\t'),
                Some(other) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes())
                }
                None => return Err(GVariantError::BuilderContract("unterminated escape".into())),
            },
            Some(ch) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::LoadFlags;
    use bytes::Bytes;

    #[test]
    fn round_trips_a_struct_with_string_and_double() {
        let text = "('a', 1.5)";
        let v = parse("(sd)", text).unwrap();
        assert_eq!(print(&v).unwrap(), text);
    }

    #[test]
    fn prints_and_parses_array_of_strings() {
        let v = parse("as", "['foo', 'bar', 'se']").unwrap();
        assert_eq!(print(&v).unwrap(), "['foo', 'bar', 'se']");
        assert_eq!(v.n_children().unwrap(), 3);
    }

    #[test]
    fn prints_and_parses_maybe() {
        let nothing = parse("mi", "nothing").unwrap();
        assert_eq!(print(&nothing).unwrap(), "nothing");
        let just = parse("mi", "just 42").unwrap();
        assert_eq!(print(&just).unwrap(), "just 42");
    }

    #[test]
    fn prints_and_parses_variant() {
        let v = parse("v", "<@s 'x'>").unwrap();
        assert_eq!(print(&v).unwrap(), "<@s 'x'>");
    }

    #[test]
    fn prints_and_parses_dict_entries_array() {
        let v = parse("a{sv}", "{'key': <@s 'value'>}").unwrap();
        assert_eq!(print(&v).unwrap(), "{'key': <@s 'value'>}");
    }

    #[test]
    fn round_trips_through_real_bytes() {
        let v = parse("as", "['foo', 'bar', 'se']").unwrap();
        let bytes = v.to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x66, 0x6F, 0x6F, 0x00, 0x62, 0x61, 0x72, 0x00, 0x73, 0x65, 0x00, 0x04, 0x08, 0x0B]
        );
        let loaded =
            Value::from_bytes(typeinfo::get("as").unwrap(), Bytes::from(bytes.to_vec()), LoadFlags::TRUSTED)
                .unwrap();
        assert_eq!(print(&loaded).unwrap(), "['foo', 'bar', 'se']");
    }
}
