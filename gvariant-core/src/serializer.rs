// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The binary codec (§4.3, §4.4): frame sizing, offset-table layout, and
//! the read/write logic that turns a [`TypeInfo`] plus a byte slice into
//! child ranges, or a set of already-serialized children into a frame.
//!
//! Ported from the source's `gvariant-serialiser.c`. Where the source
//! uses `g_assert` to state an invariant that can't hold for trusted
//! data but *can* be violated by a hostile byte stream, this module
//! returns [`GVariantError::Framing`] instead, so that malformed input
//! degrades to an error (and, at the value layer, a default value)
//! rather than a panic.

use crate::error::{GVariantError, Result};
use crate::typeinfo::{MemberSize, TypeInfo, TypeInfoKind, NO_INDEX};
use bytes::BufMut;
use std::ops::Range;
use std::sync::Arc;

fn framing(msg: &'static str) -> GVariantError {
    GVariantError::Framing(msg)
}

/// Smallest offset width, in bytes, able to address `container_size`
/// (§4.3's "reverse-growing offset table... sized to the smallest of
/// 1, 2, 4, or 8 bytes able to index the frame").
pub fn offset_size(container_size: usize) -> u8 {
    if container_size == 0 {
        0
    } else if container_size <= u8::MAX as usize {
        1
    } else if container_size <= u16::MAX as usize {
        2
    } else if container_size <= u32::MAX as usize {
        4
    } else {
        8
    }
}

/// Total frame size for `content_end` bytes of child data plus
/// `n_offsets` offset-table entries, choosing the narrowest width for
/// which the whole frame still fits (the width must cover the frame
/// it is itself part of). `non_zero` forces a nonzero result even when
/// `content_end` is 0 (used by fixed-size maybe and empty-tuple framing).
pub fn determine_size(content_end: usize, n_offsets: usize, non_zero: bool) -> usize {
    if !non_zero && content_end == 0 {
        return 0;
    }
    if content_end + n_offsets <= u8::MAX as usize {
        return content_end + n_offsets;
    }
    if content_end + n_offsets * 2 <= u16::MAX as usize {
        return content_end + n_offsets * 2;
    }
    if content_end + n_offsets * 4 <= u32::MAX as usize {
        return content_end + n_offsets * 4;
    }
    content_end + n_offsets * 8
}

fn read_uint(bytes: &[u8], width: u8) -> Option<usize> {
    match width {
        0 => Some(0),
        1 => bytes.first().map(|&b| b as usize),
        2 => bytes
            .get(..2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize),
        4 => bytes
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize),
        8 => bytes.get(..8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as usize
        }),
        _ => None,
    }
}

fn write_uint(out: &mut impl BufMut, value: usize, width: u8) {
    match width {
        0 => {}
        1 => out.put_u8(value as u8),
        2 => out.put_u16_le(value as u16),
        4 => out.put_u32_le(value as u32),
        8 => out.put_u64_le(value as u64),
        _ => unreachable!("offset width is always 0, 1, 2, 4, or 8"),
    }
}

/// Reads offset-table entry `index`, counting from the container's own
/// end backwards (entry 0 is the last one written, i.e. closest to
/// `container.len()`).
fn dereference(container: &[u8], width: u8, index: usize) -> Result<usize> {
    if width == 0 {
        return Err(framing("dereference of empty offset table"));
    }
    let n_entries = container.len() / width as usize;
    if index >= n_entries {
        return Err(framing("offset-table index out of range"));
    }
    let end = container.len() - index * width as usize;
    let start = end
        .checked_sub(width as usize)
        .ok_or_else(|| framing("offset-table entry truncated"))?;
    let value = read_uint(&container[start..end], width).ok_or_else(|| framing("short offset"))?;
    if value > container.len() {
        return Err(framing("offset exceeds container size"));
    }
    Ok(value)
}

/// Number of elements in a variable-element-size array, derived from
/// the last offset-table entry (§4.4's array length rule).
fn array_length(container: &[u8], width: u8) -> Result<usize> {
    if width == 0 {
        return Err(framing("array_length of empty container"));
    }
    let last = dereference(container, width, 0)?;
    let tail = container
        .len()
        .checked_sub(last)
        .ok_or_else(|| framing("array length offset exceeds container"))?;
    if tail % width as usize != 0 {
        return Err(framing("array tail not a multiple of offset width"));
    }
    Ok(tail / width as usize)
}

/// A read-only view of a serialized value: its compiled type plus the
/// bytes that hold it.
#[derive(Clone)]
pub struct Serialized<'a> {
    pub type_info: Arc<TypeInfo>,
    pub data: &'a [u8],
}

impl<'a> Serialized<'a> {
    pub fn new(type_info: Arc<TypeInfo>, data: &'a [u8]) -> Self {
        Serialized { type_info, data }
    }

    /// Number of logical children, per §4.4 (1 for variant, `n_members`
    /// for tuples, 0 or 2 for dict-entries, 0/1 for maybe, derived from
    /// the offset table or element size for arrays).
    pub fn n_children(&self) -> Result<usize> {
        match &self.type_info.kind {
            TypeInfoKind::Basic if self.type_info.is_variant() => Ok(1),
            TypeInfoKind::Basic => Ok(0),
            TypeInfoKind::Tuple { members, .. } => Ok(members.len()),
            TypeInfoKind::Maybe { element } => {
                if self.data.is_empty() {
                    return Ok(0);
                }
                if let Some(size) = element.fixed_size {
                    if self.data.len() as u32 != size {
                        return Err(framing("maybe frame size mismatch"));
                    }
                }
                Ok(1)
            }
            TypeInfoKind::Array { element } => {
                if self.data.is_empty() {
                    return Ok(0);
                }
                match element.fixed_size {
                    Some(size) if size > 0 => {
                        if self.data.len() % size as usize != 0 {
                            return Err(framing("array frame size not a multiple of element size"));
                        }
                        Ok(self.data.len() / size as usize)
                    }
                    _ => {
                        let width = offset_size(self.data.len());
                        array_length(self.data, width)
                    }
                }
            }
        }
    }

    /// Returns the byte range (relative to `self.data`) and compiled
    /// type of child `index`.
    pub fn child(&self, index: usize) -> Result<(Arc<TypeInfo>, Range<usize>)> {
        match &self.type_info.kind {
            TypeInfoKind::Basic if self.type_info.is_variant() => self.variant_child(),
            TypeInfoKind::Basic => Err(framing("basic types have no children")),
            TypeInfoKind::Tuple { members, .. } => self.tuple_child(members, index),
            TypeInfoKind::Maybe { element } => self.maybe_child(element, index),
            TypeInfoKind::Array { element } => self.array_child(element, index),
        }
    }

    fn maybe_child(&self, element: &Arc<TypeInfo>, index: usize) -> Result<(Arc<TypeInfo>, Range<usize>)> {
        if index != 0 || self.data.is_empty() {
            return Err(framing("maybe has no such child"));
        }
        let end = match element.fixed_size {
            Some(size) => {
                if self.data.len() as u32 != size {
                    return Err(framing("maybe frame size mismatch"));
                }
                self.data.len()
            }
            None => self
                .data
                .len()
                .checked_sub(1)
                .ok_or_else(|| framing("maybe frame missing trailing marker byte"))?,
        };
        Ok((element.clone(), 0..end))
    }

    fn array_child(&self, element: &Arc<TypeInfo>, index: usize) -> Result<(Arc<TypeInfo>, Range<usize>)> {
        match element.fixed_size {
            Some(size) if size > 0 => {
                let size = size as usize;
                if self.data.len() % size != 0 || size * (index + 1) > self.data.len() {
                    return Err(framing("array index out of range"));
                }
                Ok((element.clone(), size * index..size * (index + 1)))
            }
            _ => {
                let width = offset_size(self.data.len());
                let length = array_length(self.data, width)?;
                if index >= length {
                    return Err(framing("array index out of range"));
                }
                let start = if index == 0 {
                    0
                } else {
                    let mut s = dereference(self.data, width, length - index)?;
                    s += s.wrapping_neg() & element.align_mask as usize;
                    s
                };
                let end = dereference(self.data, width, length - index - 1)?;
                if start > end || end > self.data.len() {
                    return Err(framing("array element offsets out of order"));
                }
                Ok((element.clone(), start..end))
            }
        }
    }

    fn tuple_child(
        &self,
        members: &[crate::typeinfo::MemberInfo],
        index: usize,
    ) -> Result<(Arc<TypeInfo>, Range<usize>)> {
        let info = members
            .get(index)
            .ok_or_else(|| framing("struct member index out of range"))?;
        let width = offset_size(self.data.len());

        let base = if info.index == NO_INDEX {
            0
        } else {
            dereference(self.data, width, info.index as usize)?
        };
        let start = (base.wrapping_add(info.plus) & info.and) | info.or;

        let end = match info.size {
            MemberSize::Fixed(size) => start
                .checked_add(size as usize)
                .ok_or_else(|| framing("struct member overflow"))?,
            MemberSize::Last => {
                let n_offsets = if info.index == NO_INDEX {
                    0
                } else {
                    info.index as usize + 1
                };
                self.data
                    .len()
                    .checked_sub(n_offsets * width as usize)
                    .ok_or_else(|| framing("struct offset table larger than frame"))?
            }
            MemberSize::Variable => {
                let next = if info.index == NO_INDEX {
                    0
                } else {
                    info.index as usize + 1
                };
                dereference(self.data, width, next)?
            }
        };

        if start > end || end > self.data.len() {
            return Err(framing("struct member offsets out of order"));
        }
        Ok((info.type_info.clone(), start..end))
    }

    fn variant_child(&self) -> Result<(Arc<TypeInfo>, Range<usize>)> {
        if self.data.is_empty() {
            return Err(framing("variant frame is empty"));
        }
        let mut end = self.data.len();
        while end > 0 && self.data[end - 1] != 0 {
            end -= 1;
        }
        if end == 0 {
            return Err(framing("variant frame has no type-string separator"));
        }
        let type_string = &self.data[end..];
        let type_string = std::str::from_utf8(type_string).unwrap_or("");
        let type_info = if gvariant_types::is_valid(type_string) && gvariant_types::is_concrete(type_string) {
            crate::typeinfo::get(type_string).unwrap_or_else(|_| crate::typeinfo::get("()").unwrap())
        } else {
            crate::typeinfo::get("()").unwrap()
        };
        let content_end = end - 1;
        if let Some(expected) = type_info.fixed_size {
            if content_end as u32 != expected {
                return Err(framing("variant payload size disagrees with its own type"));
            }
        }
        Ok((type_info, 0..content_end))
    }
}

/// One child ready to be written: its compiled type and already-
/// serialized bytes.
pub struct Child<'a> {
    pub type_info: Arc<TypeInfo>,
    pub data: &'a [u8],
}

/// A child's type and serialized length, without requiring its bytes to
/// exist yet. [`needed_size`] only needs lengths, so a tree-form value
/// can size itself by recursing into its children's own (possibly
/// still-memoized) sizes, without flattening them first.
pub struct ChildSize {
    pub type_info: Arc<TypeInfo>,
    pub len: usize,
}

impl From<&Child<'_>> for ChildSize {
    fn from(c: &Child<'_>) -> Self {
        ChildSize {
            type_info: c.type_info.clone(),
            len: c.data.len(),
        }
    }
}

/// Computes the frame size a container needs before any bytes are
/// written (§4.3's sizing pass, run once so the caller can allocate).
pub fn needed_size(type_info: &TypeInfo, children: &[ChildSize]) -> usize {
    match &type_info.kind {
        TypeInfoKind::Basic if type_info.is_variant() => {
            let child = &children[0];
            child.len + 1 + child.type_info.signature.len()
        }
        TypeInfoKind::Basic => type_info.fixed_size.unwrap_or(0) as usize,
        TypeInfoKind::Maybe { element } => {
            if children.is_empty() {
                0
            } else if element.fixed_size.is_some() {
                children[0].len
            } else {
                children[0].len + 1
            }
        }
        TypeInfoKind::Array { element } => {
            if children.is_empty() {
                return 0;
            }
            match element.fixed_size {
                Some(size) if size > 0 => size as usize * children.len(),
                _ => {
                    let mut end = 0usize;
                    for c in children {
                        end += end.wrapping_neg() & element.align_mask as usize;
                        end += c.len;
                    }
                    determine_size(end, children.len(), true)
                }
            }
        }
        TypeInfoKind::Tuple { members, .. } => {
            if let Some(size) = type_info.fixed_size {
                return size as usize;
            }
            let mut offset = 0usize;
            let mut n_offsets = 0usize;
            for (member, child) in members.iter().zip(children) {
                let align = child.type_info.align_mask as usize;
                offset += offset.wrapping_neg() & align;
                offset += child.len;
                if matches!(member.size, MemberSize::Variable) {
                    n_offsets += 1;
                }
            }
            offset + n_offsets * offset_size(determine_size(offset, n_offsets, false))
        }
    }
}

/// Writes a container frame given its already-serialized children,
/// mirroring `g_variant_serialiser_serialise` (§4.3's write-side rules:
/// zero-pad to alignment between children, append the offset table in
/// reverse-growing order for variable members).
pub fn serialize(type_info: &TypeInfo, children: &[Child<'_>], out: &mut impl BufMut) {
    match &type_info.kind {
        TypeInfoKind::Basic if type_info.is_variant() => {
            let child = &children[0];
            out.put_slice(child.data);
            out.put_u8(0);
            out.put_slice(child.type_info.signature.as_bytes());
        }
        TypeInfoKind::Basic => {
            out.put_slice(children.first().map(|c| c.data).unwrap_or(&[]));
        }
        TypeInfoKind::Maybe { element } => {
            if let Some(child) = children.first() {
                out.put_slice(child.data);
                if element.fixed_size.is_none() {
                    out.put_u8(0);
                }
            }
        }
        TypeInfoKind::Array { element } => {
            if children.is_empty() {
                return;
            }
            match element.fixed_size {
                Some(_) => {
                    for c in children {
                        out.put_slice(c.data);
                    }
                }
                _ => {
                    let mut offset = 0usize;
                    let mut offsets = Vec::with_capacity(children.len());
                    let mut buf = Vec::new();
                    for c in children {
                        let pad = offset.wrapping_neg() & element.align_mask as usize;
                        for _ in 0..pad {
                            buf.push(0u8);
                        }
                        offset += pad;
                        buf.extend_from_slice(c.data);
                        offset += c.data.len();
                        offsets.push(offset);
                    }
                    let width = offset_size(determine_size(offset, children.len(), true));
                    out.put_slice(&buf);
                    // Array offsets grow forward (element 0's end closest to the
                    // payload, the last element's end closest to the frame end),
                    // unlike a struct's offset table below.
                    for &o in offsets.iter() {
                        write_uint(out, o, width);
                    }
                }
            }
        }
        TypeInfoKind::Tuple { members, .. } => {
            if members.is_empty() {
                // A unit struct still occupies fixed_size bytes (typeinfo.rs's
                // zero-member override), so the writer must agree with it.
                let size = type_info.fixed_size.unwrap_or(0) as usize;
                for _ in 0..size {
                    out.put_u8(0);
                }
                return;
            }
            let width = {
                let mut offset = 0usize;
                let mut n_offsets = 0usize;
                for (member, child) in members.iter().zip(children) {
                    offset += offset.wrapping_neg() & child.type_info.align_mask as usize;
                    offset += child.data.len();
                    if matches!(member.size, MemberSize::Variable) {
                        n_offsets += 1;
                    }
                }
                offset_size(determine_size(offset, n_offsets, false))
            };

            let mut offset = 0usize;
            let mut tail_offsets = Vec::new();
            for (member, child) in members.iter().zip(children) {
                let pad = offset.wrapping_neg() & child.type_info.align_mask as usize;
                for _ in 0..pad {
                    out.put_u8(0);
                }
                offset += pad;
                out.put_slice(child.data);
                offset += child.data.len();
                if matches!(member.size, MemberSize::Variable) {
                    tail_offsets.push(offset);
                }
            }
            for &o in tail_offsets.iter().rev() {
                write_uint(out, o, width);
            }
        }
    }
}

/// Swaps a frame's primitives between little-endian wire order and host
/// order, in place (§4.3's byte-swap rule). Offset-table entries are
/// always little-endian on the wire regardless of payload endianness,
/// so child ranges are located the normal way before any swapping
/// happens; strings, signatures, and single bytes never move.
pub fn byteswap_in_place(type_info: &Arc<TypeInfo>, data: &mut [u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }

    let ranges = {
        let view = Serialized::new(type_info.clone(), data);
        let n = view.n_children().unwrap_or(0);
        let mut ranges = Vec::with_capacity(n);
        for i in 0..n {
            if let Ok(child) = view.child(i) {
                ranges.push(child);
            }
        }
        ranges
    };

    if ranges.is_empty() {
        if let Some(size) = type_info.fixed_size {
            if type_info.align_mask as usize + 1 == size as usize {
                data.reverse();
            }
        }
        return Ok(());
    }

    for (child_type, range) in ranges {
        byteswap_in_place(&child_type, &mut data[range])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo;
    use bytes::BytesMut;

    #[test]
    fn offset_width_grows_with_size() {
        assert_eq!(offset_size(0), 0);
        assert_eq!(offset_size(255), 1);
        assert_eq!(offset_size(256), 2);
        assert_eq!(offset_size(u16::MAX as usize + 1), 4);
    }

    #[test]
    fn fixed_struct_round_trips_through_child_ranges() {
        let ti = typeinfo::get("(iy)").unwrap();
        let i_bytes = 4i32.to_le_bytes().to_vec();
        let y_byte = vec![7u8];
        let children = [
            Child { type_info: typeinfo::get("i").unwrap(), data: &i_bytes },
            Child { type_info: typeinfo::get("y").unwrap(), data: &y_byte },
        ];
        let mut out = BytesMut::new();
        serialize(&ti, &children, &mut out);
        assert_eq!(out.len(), ti.fixed_size.unwrap() as usize);

        let view = Serialized::new(ti.clone(), &out);
        assert_eq!(view.n_children().unwrap(), 2);
        let (y_ti, range) = view.child(1).unwrap();
        assert_eq!(y_ti.signature.as_ref(), "y");
        assert_eq!(out[range][0], 7);
    }

    #[test]
    fn variable_struct_writes_trailing_offset_table() {
        let ti = typeinfo::get("(sy)").unwrap();
        let s_bytes = b"hi\0".to_vec();
        let y_byte = vec![9u8];
        let children = [
            Child { type_info: typeinfo::get("s").unwrap(), data: &s_bytes },
            Child { type_info: typeinfo::get("y").unwrap(), data: &y_byte },
        ];
        let mut out = BytesMut::new();
        serialize(&ti, &children, &mut out);

        let view = Serialized::new(ti, &out);
        let (_, s_range) = view.child(0).unwrap();
        let (_, y_range) = view.child(1).unwrap();
        assert_eq!(&out[s_range], b"hi\0");
        assert_eq!(out[y_range][0], 9);
    }

    #[test]
    fn empty_array_has_no_children() {
        let ti = typeinfo::get("ai").unwrap();
        let view = Serialized::new(ti, &[]);
        assert_eq!(view.n_children().unwrap(), 0);
    }

    #[test]
    fn fixed_element_array_indexes_by_multiplication() {
        let ti = typeinfo::get("ai").unwrap();
        let elem = typeinfo::get("i").unwrap();
        let a = 1i32.to_le_bytes().to_vec();
        let b = 2i32.to_le_bytes().to_vec();
        let children = [
            Child { type_info: elem.clone(), data: &a },
            Child { type_info: elem, data: &b },
        ];
        let mut out = BytesMut::new();
        serialize(&ti, &children, &mut out);

        let view = Serialized::new(ti, &out);
        assert_eq!(view.n_children().unwrap(), 2);
        let (_, r1) = view.child(1).unwrap();
        assert_eq!(&out[r1], &2i32.to_le_bytes());
    }

    #[test]
    fn variant_frame_round_trips_type_string() {
        let ti = typeinfo::get("v").unwrap();
        let inner_ti = typeinfo::get("i").unwrap();
        let inner_bytes = 42i32.to_le_bytes().to_vec();
        let children = [Child { type_info: inner_ti, data: &inner_bytes }];
        let mut out = BytesMut::new();
        serialize(&ti, &children, &mut out);

        let view = Serialized::new(ti, &out);
        let (child_ti, range) = view.child(0).unwrap();
        assert_eq!(child_ti.signature.as_ref(), "i");
        assert_eq!(&out[range], &42i32.to_le_bytes());
    }

    #[test]
    fn needed_size_matches_actual_write_size() {
        let ti = typeinfo::get("(sy)").unwrap();
        let s_bytes = b"hi\0".to_vec();
        let y_byte = vec![9u8];
        let children = [
            Child { type_info: typeinfo::get("s").unwrap(), data: &s_bytes },
            Child { type_info: typeinfo::get("y").unwrap(), data: &y_byte },
        ];
        let sizes: Vec<ChildSize> = children.iter().map(ChildSize::from).collect();
        let predicted = needed_size(&ti, &sizes);

        let mut out = BytesMut::new();
        serialize(&ti, &children, &mut out);
        assert_eq!(predicted, out.len());
    }

    #[test]
    fn truncated_frame_yields_framing_error_not_panic() {
        let ti = typeinfo::get("(sy)").unwrap();
        let view = Serialized::new(ti, &[1, 2, 3]);
        assert!(view.child(0).is_err() || view.child(1).is_err());
    }

    #[test]
    fn byteswap_flips_fixed_width_scalars_only() {
        let ti = typeinfo::get("i").unwrap();
        let mut bytes = 0x01020304i32.to_le_bytes();
        byteswap_in_place(&ti, &mut bytes).unwrap();
        assert_eq!(i32::from_le_bytes(bytes), 0x04030201);

        let ti = typeinfo::get("y").unwrap();
        let mut byte = [0x42u8];
        byteswap_in_place(&ti, &mut byte).unwrap();
        assert_eq!(byte, [0x42]);
    }

    #[test]
    fn byteswap_recurses_into_struct_members() {
        let ti = typeinfo::get("(ii)").unwrap();
        let a = 1i32.to_le_bytes().to_vec();
        let b = 2i32.to_le_bytes().to_vec();
        let children = [
            Child { type_info: typeinfo::get("i").unwrap(), data: &a },
            Child { type_info: typeinfo::get("i").unwrap(), data: &b },
        ];
        let mut out = BytesMut::new();
        serialize(&ti, &children, &mut out);
        let mut buf = out.to_vec();
        byteswap_in_place(&ti, &mut buf).unwrap();
        assert_eq!(i32::from_le_bytes(buf[0..4].try_into().unwrap()), 0x01000000);
        assert_eq!(i32::from_le_bytes(buf[4..8].try_into().unwrap()), 0x02000000);
    }
}
