// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The value core (§4.4, §5): a reference-counted handle over one of
//! four representations, with lazy flattening and a per-value
//! meta-lock guarding the lazy-mutation operations (flatten, endian
//! fix-up, size memoization).
//!
//! The source protects these with a bit flag plus a process-wide
//! contention mutex and wait-list. `std::sync::Mutex` already gives the
//! fast-uncontested-lock / sleep-on-contention behavior that scheme is
//! built to provide, so each value simply owns one. See `DESIGN.md`.

use crate::error::{GVariantError, Result};
use crate::serializer::{self, Child, ChildSize, Serialized};
use crate::typeinfo::{TypeInfo, TypeInfoKind};
use bitflags::bitflags;
use bytes::Bytes;
use std::ops::Range;
use std::sync::{Arc, Mutex};

bitflags! {
    /// Flags accepted by [`Value::from_bytes`] (§4.4, §6).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LoadFlags: u8 {
        /// Data is asserted to already be in normal form; skip checks.
        const TRUSTED = 0b0000_0001;
        /// Swap primitives to host order immediately.
        const BYTESWAP_NOW = 0b0000_0010;
        /// Defer the swap until the value's bytes are first exposed.
        const BYTESWAP_LAZY = 0b0000_0100;
        /// Fail the load if the data is not in normal form.
        const NORMALISE = 0b0000_1000;
        /// The byte buffer is a `v` frame; return its unwrapped payload.
        const EMBED_SIGNATURE = 0b0001_0000;
    }
}

const INLINE_CAP: usize = 8;

enum Repr {
    Inline([u8; INLINE_CAP], u8),
    Owned(Bytes),
    Shared {
        source: Value,
        range: Range<usize>,
    },
    Tree {
        children: Vec<Value>,
        size: Option<usize>,
    },
}

struct State {
    repr: Repr,
    native_endian: bool,
    trusted: bool,
}

struct Inner {
    type_info: Arc<TypeInfo>,
    state: Mutex<State>,
}

/// A reference-counted handle to a gvariant value (§3, §4.4).
#[derive(Clone)]
pub struct Value(Arc<Inner>);

impl Value {
    pub fn type_info(&self) -> &Arc<TypeInfo> {
        &self.0.type_info
    }

    pub fn is_trusted(&self) -> bool {
        self.0.state.lock().unwrap().trusted
    }

    /// Builds a leaf value directly from already-native-endian payload
    /// bytes (§4.4's "builders assemble tree values" / convenience
    /// constructors in `convenience.rs`).
    pub fn new_basic(type_info: Arc<TypeInfo>, payload: &[u8]) -> Value {
        let repr = if payload.len() <= INLINE_CAP {
            let mut arr = [0u8; INLINE_CAP];
            arr[..payload.len()].copy_from_slice(payload);
            Repr::Inline(arr, payload.len() as u8)
        } else {
            Repr::Owned(Bytes::copy_from_slice(payload))
        };
        Value(Arc::new(Inner {
            type_info,
            state: Mutex::new(State {
                repr,
                native_endian: true,
                trusted: true,
            }),
        }))
    }

    /// Builds a tree value out of already-built children (§4.5's
    /// container builder uses this as its `end()`).
    pub fn from_children(type_info: Arc<TypeInfo>, children: Vec<Value>, trusted: bool) -> Value {
        Value(Arc::new(Inner {
            type_info,
            state: Mutex::new(State {
                repr: Repr::Tree {
                    children,
                    size: None,
                },
                native_endian: true,
                trusted,
            }),
        }))
    }

    /// The canonical zero/empty value of `type_info`, used when a child
    /// access lands on malformed bytes (§4.7: "the affected sub-tree
    /// yields default/zero values of the expected type").
    pub fn default_for(type_info: &Arc<TypeInfo>) -> Value {
        match &type_info.kind {
            TypeInfoKind::Basic if type_info.is_variant() => {
                let unit = crate::typeinfo::get("()").expect("unit type always compiles");
                let child = Value::default_for(&unit);
                Value::from_children(type_info.clone(), vec![child], true)
            }
            TypeInfoKind::Basic => match type_info.fixed_size {
                Some(n) => Value::new_basic(type_info.clone(), &vec![0u8; n as usize]),
                None => Value::new_basic(type_info.clone(), &[0u8]),
            },
            TypeInfoKind::Maybe { .. } | TypeInfoKind::Array { .. } => {
                Value::from_children(type_info.clone(), Vec::new(), true)
            }
            TypeInfoKind::Tuple { members, .. } => {
                let children = members
                    .iter()
                    .map(|m| Value::default_for(&m.type_info))
                    .collect();
                Value::from_children(type_info.clone(), children, true)
            }
        }
    }

    /// Loads a value from externally-sourced bytes (§4.4, §6).
    pub fn from_bytes(type_info: Arc<TypeInfo>, mut bytes: Bytes, flags: LoadFlags) -> Result<Value> {
        if flags.contains(LoadFlags::TRUSTED) && flags.contains(LoadFlags::NORMALISE) {
            return Err(GVariantError::BuilderContract(
                "trusted and normalise load flags are mutually exclusive".into(),
            ));
        }
        if flags.contains(LoadFlags::BYTESWAP_NOW) && flags.contains(LoadFlags::BYTESWAP_LAZY) {
            return Err(GVariantError::BuilderContract(
                "byteswap_now and byteswap_lazy load flags are mutually exclusive".into(),
            ));
        }

        if flags.contains(LoadFlags::EMBED_SIGNATURE) {
            let variant_ti = crate::typeinfo::get("v")?;
            let view = Serialized::new(variant_ti, &bytes);
            let (child_ti, range) = view.child(0)?;
            bytes = bytes.slice(range);
            let mut inner = flags;
            inner.remove(LoadFlags::EMBED_SIGNATURE);
            return Value::from_bytes(child_ti, bytes, inner);
        }

        let trusted = flags.contains(LoadFlags::TRUSTED);
        let wants_swap = flags.intersects(LoadFlags::BYTESWAP_NOW | LoadFlags::BYTESWAP_LAZY);
        let defer_swap = flags.contains(LoadFlags::BYTESWAP_LAZY) && bytes.len() > INLINE_CAP;

        let (repr, native_endian) = if bytes.len() <= INLINE_CAP {
            // Inline values are always swapped eagerly on load (§4.4):
            // there is no benefit to deferring a swap of 8 bytes or less.
            let mut arr = [0u8; INLINE_CAP];
            arr[..bytes.len()].copy_from_slice(&bytes);
            if wants_swap {
                serializer::byteswap_in_place(&type_info, &mut arr[..bytes.len()])?;
            }
            (Repr::Inline(arr, bytes.len() as u8), true)
        } else if wants_swap && !defer_swap {
            let mut buf = bytes.to_vec();
            serializer::byteswap_in_place(&type_info, &mut buf)?;
            (Repr::Owned(Bytes::from(buf)), true)
        } else {
            (Repr::Owned(bytes), !defer_swap)
        };

        let value = Value(Arc::new(Inner {
            type_info,
            state: Mutex::new(State {
                repr,
                native_endian,
                trusted,
            }),
        }));

        if flags.contains(LoadFlags::NORMALISE) && !value.is_normal_form()? {
            return Err(GVariantError::Unnormalized);
        }

        Ok(value)
    }

    /// Total serialized size, computed and memoized for tree values
    /// (§4.4's lazy `size`).
    pub fn size(&self) -> Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        match &mut state.repr {
            Repr::Inline(_, len) => Ok(*len as usize),
            Repr::Owned(bytes) => Ok(bytes.len()),
            Repr::Shared { range, .. } => Ok(range.end - range.start),
            Repr::Tree { children, size } => {
                if let Some(s) = *size {
                    return Ok(s);
                }
                let sizes = child_sizes(children)?;
                let total = serializer::needed_size(&self.0.type_info, &sizes);
                *size = Some(total);
                Ok(total)
            }
        }
    }

    /// Serializes the value (if it is still a tree) and returns its
    /// native-endian bytes. Switches a flattened tree's representation
    /// to owned/inline and drops the child references (§4.4's `store`
    /// / `get_data`).
    fn flatten(&self) -> Result<Bytes> {
        let mut state = self.0.state.lock().unwrap();
        match &state.repr {
            Repr::Inline(buf, len) => Ok(Bytes::copy_from_slice(&buf[..*len as usize])),
            Repr::Owned(bytes) => Ok(bytes.clone()),
            Repr::Shared { source, range } => {
                let range = range.clone();
                let source = source.clone();
                drop(state);
                Ok(source.flatten()?.slice(range))
            }
            Repr::Tree { .. } => {
                let children = match std::mem::replace(
                    &mut state.repr,
                    Repr::Owned(Bytes::new()),
                ) {
                    Repr::Tree { children, .. } => children,
                    _ => unreachable!(),
                };

                let sizes = child_sizes(&children)?;
                let total = serializer::needed_size(&self.0.type_info, &sizes);

                let mut child_bufs = Vec::with_capacity(children.len());
                for child in &children {
                    child_bufs.push(child.flatten()?);
                }
                let child_refs: Vec<Child> = children
                    .iter()
                    .zip(&child_bufs)
                    .map(|(c, buf)| Child {
                        type_info: c.type_info().clone(),
                        data: buf.as_ref(),
                    })
                    .collect();

                let mut out = bytes::BytesMut::with_capacity(total);
                serializer::serialize(&self.0.type_info, &child_refs, &mut out);
                let bytes = out.freeze();

                state.repr = if bytes.len() <= INLINE_CAP {
                    let mut arr = [0u8; INLINE_CAP];
                    arr[..bytes.len()].copy_from_slice(&bytes);
                    Repr::Inline(arr, bytes.len() as u8)
                } else {
                    Repr::Owned(bytes.clone())
                };
                Ok(bytes)
            }
        }
    }

    /// Ensures the value's own frame is in host byte order (§4.4,
    /// §5's ordering guarantee: once this returns, the flag is
    /// permanently set).
    pub fn ensure_native_endian(&self) -> Result<()> {
        let mut state = self.0.state.lock().unwrap();
        if state.native_endian {
            return Ok(());
        }
        match &mut state.repr {
            Repr::Inline(..) => {}
            Repr::Owned(bytes) => {
                let mut buf = bytes.to_vec();
                serializer::byteswap_in_place(&self.0.type_info, &mut buf)?;
                *bytes = Bytes::from(buf);
            }
            Repr::Shared { source, .. } => {
                let source = source.clone();
                drop(state);
                source.ensure_native_endian()?;
                let mut state = self.0.state.lock().unwrap();
                state.native_endian = true;
                return Ok(());
            }
            Repr::Tree { .. } => {}
        }
        state.native_endian = true;
        Ok(())
    }

    /// Returns the value's own bytes in host byte order.
    pub fn to_bytes(&self) -> Result<Bytes> {
        self.ensure_native_endian()?;
        self.flatten()
    }

    /// Writes the value's frame into `dst`, which must be at least
    /// `size()` bytes.
    pub fn store(&self, dst: &mut [u8]) -> Result<()> {
        let bytes = self.to_bytes()?;
        if dst.len() < bytes.len() {
            return Err(GVariantError::BuilderContract(
                "destination buffer smaller than the value's size".into(),
            ));
        }
        dst[..bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    /// Logical child count (§4.4's abstract API, §4.3's per-class rules).
    pub fn n_children(&self) -> Result<usize> {
        match &self.0.type_info.kind {
            TypeInfoKind::Tuple { members, .. } => Ok(members.len()),
            TypeInfoKind::Basic if self.0.type_info.is_variant() => Ok(1),
            TypeInfoKind::Basic => Ok(0),
            TypeInfoKind::Maybe { .. } | TypeInfoKind::Array { .. } => {
                {
                    let state = self.0.state.lock().unwrap();
                    if let Repr::Tree { children, .. } = &state.repr {
                        return Ok(children.len());
                    }
                }
                self.ensure_native_endian()?;
                let data = self.flatten()?;
                Serialized::new(self.0.type_info.clone(), &data).n_children()
            }
        }
    }

    fn expected_child_type(&self, index: usize) -> Result<Arc<TypeInfo>> {
        match &self.0.type_info.kind {
            TypeInfoKind::Tuple { members, .. } => members
                .get(index)
                .map(|m| m.type_info.clone())
                .ok_or(GVariantError::OutOfRange {
                    index,
                    n_children: members.len(),
                }),
            TypeInfoKind::Maybe { element } | TypeInfoKind::Array { element } => {
                Ok(element.clone())
            }
            TypeInfoKind::Basic if self.0.type_info.is_variant() => crate::typeinfo::get("()"),
            _ => Err(GVariantError::Framing("type has no children")),
        }
    }

    /// Returns child `index`. A framing error in the underlying bytes
    /// yields the default value of the expected type rather than
    /// propagating, per §4.7.
    pub fn get_child(&self, index: usize) -> Result<Value> {
        {
            let state = self.0.state.lock().unwrap();
            if let Repr::Tree { children, .. } = &state.repr {
                return children
                    .get(index)
                    .cloned()
                    .ok_or(GVariantError::OutOfRange {
                        index,
                        n_children: children.len(),
                    });
            }
        }

        self.ensure_native_endian()?;
        let data = self.flatten()?;
        let view = Serialized::new(self.0.type_info.clone(), &data);
        let (child_ti, range) = match view.child(index) {
            Ok(v) => v,
            Err(GVariantError::Framing(_)) => {
                return Ok(Value::default_for(&self.expected_child_type(index)?));
            }
            Err(e) => return Err(e),
        };

        // Root the slice at a non-shared ancestor: shared-slice values
        // never chain (§4.4's invariant).
        let trusted = self.0.state.lock().unwrap().trusted;
        let (root, root_range) = {
            let state = self.0.state.lock().unwrap();
            match &state.repr {
                Repr::Shared {
                    source,
                    range: parent_range,
                } => (
                    source.clone(),
                    (parent_range.start + range.start)..(parent_range.start + range.end),
                ),
                _ => (self.clone(), range),
            }
        };

        Ok(Value(Arc::new(Inner {
            type_info: child_ti,
            state: Mutex::new(State {
                repr: Repr::Shared {
                    source: root,
                    range: root_range,
                },
                native_endian: true,
                trusted,
            }),
        })))
    }

    /// §4.3/§4.4's normalization predicate: every child is normal, and
    /// (for already-serialized containers) the frame is exactly the
    /// minimal size its children require. Tree values built through the
    /// container builder are normal by construction.
    pub fn is_normal_form(&self) -> Result<bool> {
        let type_info = self.0.type_info.clone();
        match &type_info.kind {
            TypeInfoKind::Basic if type_info.is_variant() => self.get_child(0)?.is_normal_form(),
            TypeInfoKind::Basic => self.basic_is_normal(),
            _ => {
                let is_tree = matches!(self.0.state.lock().unwrap().repr, Repr::Tree { .. });
                let n = self.n_children()?;
                let mut children = Vec::with_capacity(n);
                for i in 0..n {
                    let child = self.get_child(i)?;
                    if !child.is_normal_form()? {
                        return Ok(false);
                    }
                    children.push(child);
                }
                if is_tree {
                    return Ok(true);
                }
                let sizes = child_sizes(&children)?;
                let minimal = serializer::needed_size(&type_info, &sizes);
                Ok(self.size()? == minimal)
            }
        }
    }

    fn basic_is_normal(&self) -> Result<bool> {
        let sig = self.0.type_info.signature.clone();
        self.ensure_native_endian()?;
        let data = self.flatten()?;
        Ok(match sig.as_bytes()[0] {
            b'b' => data.len() == 1 && (data[0] == 0 || data[0] == 1),
            b's' | b'o' => is_nul_terminated_no_embedded_nul(&data),
            b'g' => {
                is_nul_terminated_no_embedded_nul(&data) && is_signature_concatenation(&data[..data.len() - 1])
            }
            _ => true,
        })
    }

    /// Returns a value guaranteed to be in normal form: `self` if it
    /// already is, otherwise a rebuilt copy (§6's `normalize`).
    pub fn normalize(&self) -> Result<Value> {
        if self.is_normal_form()? {
            return Ok(self.clone());
        }
        match &self.0.type_info.kind {
            TypeInfoKind::Basic if self.0.type_info.is_variant() => {
                let child = self.get_child(0)?.normalize()?;
                Ok(Value::from_children(
                    self.0.type_info.clone(),
                    vec![child],
                    true,
                ))
            }
            TypeInfoKind::Basic => self.repair_basic(),
            _ => {
                let n = self.n_children()?;
                let mut children = Vec::with_capacity(n);
                for i in 0..n {
                    children.push(self.get_child(i)?.normalize()?);
                }
                Ok(Value::from_children(self.0.type_info.clone(), children, true))
            }
        }
    }

    fn repair_basic(&self) -> Result<Value> {
        let type_info = self.0.type_info.clone();
        let data = self.flatten()?;
        let repaired = match type_info.signature.as_bytes()[0] {
            b'b' => vec![if data.first().copied().unwrap_or(0) != 0 { 1 } else { 0 }],
            b's' | b'o' | b'g' => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let mut buf = data[..end].to_vec();
                buf.push(0);
                buf
            }
            _ => return Ok(self.clone()),
        };
        Ok(Value::new_basic(type_info, &repaired))
    }
}

fn child_sizes(children: &[Value]) -> Result<Vec<ChildSize>> {
    children
        .iter()
        .map(|c| {
            Ok(ChildSize {
                type_info: c.type_info().clone(),
                len: c.size()?,
            })
        })
        .collect()
}

fn is_nul_terminated_no_embedded_nul(data: &[u8]) -> bool {
    match data.split_last() {
        Some((&0, rest)) => !rest.contains(&0),
        _ => false,
    }
}

fn is_signature_concatenation(mut rest: &[u8]) -> bool {
    while !rest.is_empty() {
        match gvariant_types::scan(rest, rest.len()) {
            Ok(n) if n > 0 => rest = &rest[n..],
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo;

    #[test]
    fn inline_round_trip() {
        let ti = typeinfo::get("i").unwrap();
        let v = Value::new_basic(ti, &42i32.to_le_bytes());
        assert_eq!(v.size().unwrap(), 4);
        let bytes = v.to_bytes().unwrap();
        assert_eq!(i32::from_le_bytes(bytes[..].try_into().unwrap()), 42);
    }

    #[test]
    fn tree_struct_flattens_lazily_and_memoizes_size() {
        let ti = typeinfo::get("(iy)").unwrap();
        let i = Value::new_basic(typeinfo::get("i").unwrap(), &7i32.to_le_bytes());
        let y = Value::new_basic(typeinfo::get("y").unwrap(), &[9]);
        let v = Value::from_children(ti.clone(), vec![i, y], true);
        assert_eq!(v.size().unwrap(), 8);
        assert_eq!(v.size().unwrap(), 8);

        let child = v.get_child(1).unwrap();
        assert_eq!(child.to_bytes().unwrap()[0], 9);
    }

    #[test]
    fn malformed_struct_child_yields_default_value() {
        let ti = typeinfo::get("(sy)").unwrap();
        let v = Value::from_bytes(ti, Bytes::from_static(&[1, 2, 3]), LoadFlags::TRUSTED).unwrap();
        let y = v.get_child(1).unwrap();
        assert_eq!(y.to_bytes().unwrap().as_ref(), &[0]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let ti = typeinfo::get("(iy)").unwrap();
        let i = Value::new_basic(typeinfo::get("i").unwrap(), &0i32.to_le_bytes());
        let y = Value::new_basic(typeinfo::get("y").unwrap(), &[0]);
        let v = Value::from_children(ti, vec![i, y], true);
        assert!(matches!(
            v.get_child(5),
            Err(GVariantError::OutOfRange { .. })
        ));
    }

    #[test]
    fn mutually_exclusive_load_flags_are_rejected() {
        let ti = typeinfo::get("y").unwrap();
        let err = Value::from_bytes(
            ti,
            Bytes::from_static(&[1]),
            LoadFlags::TRUSTED | LoadFlags::NORMALISE,
        );
        assert!(err.is_err());
    }

    #[test]
    fn normalize_clamps_non_bool_byte() {
        let ti = typeinfo::get("b").unwrap();
        let v = Value::from_bytes(ti, Bytes::from_static(&[42]), LoadFlags::empty()).unwrap();
        assert!(!v.is_normal_form().unwrap());
        let fixed = v.normalize().unwrap();
        assert_eq!(fixed.to_bytes().unwrap().as_ref(), &[1]);
    }

    #[test]
    fn shared_slices_do_not_chain() {
        let outer_ti = typeinfo::get("((iy)y)").unwrap();
        let inner_ti = typeinfo::get("(iy)").unwrap();
        let tree = Value::from_children(
            outer_ti.clone(),
            vec![
                Value::from_children(
                    inner_ti,
                    vec![
                        Value::new_basic(typeinfo::get("i").unwrap(), &1i32.to_le_bytes()),
                        Value::new_basic(typeinfo::get("y").unwrap(), &[2]),
                    ],
                    true,
                ),
                Value::new_basic(typeinfo::get("y").unwrap(), &[3]),
            ],
            true,
        );
        let bytes = tree.to_bytes().unwrap();
        let loaded = Value::from_bytes(outer_ti, bytes, LoadFlags::TRUSTED).unwrap();

        // both of these resolve through `loaded`'s own buffer, never
        // through a shared-slice-of-a-shared-slice chain.
        let first = loaded.get_child(0).unwrap();
        let nested = first.get_child(1).unwrap();
        assert_eq!(nested.to_bytes().unwrap().as_ref(), &[2]);
    }
}
