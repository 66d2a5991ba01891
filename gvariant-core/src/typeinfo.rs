// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The type-info cache (§4.2): compiled per-signature metadata, interned
//! and reference-counted.
//!
//! The source protects the interning table with a single recursive
//! mutex, because building a container's type-info recurses into
//! building its members'/element's type-info. A non-reentrant
//! [`std::sync::Mutex`] would deadlock under that scheme, so construction
//! here is restructured to be bottom-up instead: children are built (and,
//! in doing so, briefly lock and unlock the table themselves) before the
//! table is locked again to insert the parent. See `DESIGN.md`.

use crate::error::{GVariantError, Result};
use gvariant_types::{base_align_mask, base_fixed_size, Kind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Sentinel used in place of a real offset-table index when a member's
/// start position is derived purely from alignment (§3).
pub const NO_INDEX: u32 = u32::MAX;

/// The end-position policy for one struct/dict-entry member (§3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberSize {
    /// Fixed-size member; end = start + this size.
    Fixed(u32),
    /// Last member of a variable-size container; its end is the frame
    /// end minus the trailing offsets not belonging to it.
    Last,
    /// A variable-size member that is not last; its end is read from the
    /// offset table.
    Variable,
}

/// Precomputed offset-arithmetic for one member (§3, §4.3).
///
/// `start = ((offset_table[index] + plus) & and) | or`, where
/// `offset_table[NO_INDEX]` is defined as 0.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    pub type_info: Arc<TypeInfo>,
    pub index: u32,
    pub plus: usize,
    pub and: usize,
    pub or: usize,
    pub size: MemberSize,
}

impl MemberInfo {
    pub fn start(&self, offset_table: &dyn Fn(usize) -> usize) -> usize {
        let base = if self.index == NO_INDEX {
            0
        } else {
            offset_table(self.index as usize)
        };
        (base.wrapping_add(self.plus) & self.and) | self.or
    }
}

/// The compositional shape of a type-info record.
#[derive(Debug)]
pub enum TypeInfoKind {
    /// `b y n q i u x t d s o g v` — no children.
    Basic,
    Maybe { element: Arc<TypeInfo> },
    Array { element: Arc<TypeInfo> },
    /// Structs and dict-entries share representation; dict-entries
    /// always have exactly two members, the first base-class.
    Tuple {
        members: Vec<MemberInfo>,
        is_dict_entry: bool,
    },
}

/// A compiled, interned, reference-counted per-signature record (§3).
#[derive(Debug)]
pub struct TypeInfo {
    pub signature: Box<str>,
    pub align_mask: u8,
    pub fixed_size: Option<u32>,
    pub kind: TypeInfoKind,
}

impl TypeInfo {
    pub fn n_members(&self) -> usize {
        match &self.kind {
            TypeInfoKind::Tuple { members, .. } => members.len(),
            _ => 0,
        }
    }

    pub fn member(&self, index: usize) -> Option<&MemberInfo> {
        match &self.kind {
            TypeInfoKind::Tuple { members, .. } => members.get(index),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&Arc<TypeInfo>> {
        match &self.kind {
            TypeInfoKind::Maybe { element } | TypeInfoKind::Array { element } => Some(element),
            _ => None,
        }
    }

    pub fn is_variant(&self) -> bool {
        matches!(self.kind, TypeInfoKind::Basic) && self.signature.as_ref() == "v"
    }

    pub fn is_dict_entry(&self) -> bool {
        matches!(self.kind, TypeInfoKind::Tuple { is_dict_entry: true, .. })
    }
}

type Cache = Mutex<HashMap<Box<str>, std::sync::Weak<TypeInfo>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Looks up or builds the type-info for `signature`, interning the
/// result. `signature` must be concrete.
pub fn get(signature: &str) -> Result<Arc<TypeInfo>> {
    if !gvariant_types::is_concrete(signature) {
        if !gvariant_types::is_valid(signature) {
            gvariant_types::validate(signature)?;
        }
        return Err(GVariantError::Signature(
            gvariant_types::ParseError::NotConcrete(signature.into()),
        ));
    }

    {
        let table = cache().lock().unwrap();
        if let Some(weak) = table.get(signature) {
            if let Some(ti) = weak.upgrade() {
                return Ok(ti);
            }
        }
    }

    // Build bottom-up, without holding the table lock: child lookups
    // below will themselves lock/unlock it.
    let built = Arc::new(build(signature)?);

    let mut table = cache().lock().unwrap();
    table
        .entry(signature.into())
        .and_modify(|slot| {
            if slot.upgrade().is_none() {
                *slot = Arc::downgrade(&built);
            }
        })
        .or_insert_with(|| Arc::downgrade(&built));
    log::trace!("interned type-info for signature {signature:?}");
    Ok(built)
}

fn build(signature: &str) -> Result<TypeInfo> {
    match gvariant_types::classify(signature)? {
        Kind::Basic(b) if b == b'v' => Ok(TypeInfo {
            signature: signature.into(),
            align_mask: 7,
            fixed_size: None,
            kind: TypeInfoKind::Basic,
        }),
        Kind::Basic(b) => Ok(TypeInfo {
            signature: signature.into(),
            align_mask: base_align_mask(b),
            fixed_size: base_fixed_size(b),
            kind: TypeInfoKind::Basic,
        }),
        Kind::Variant => Ok(TypeInfo {
            signature: signature.into(),
            align_mask: 7,
            fixed_size: None,
            kind: TypeInfoKind::Basic,
        }),
        Kind::Maybe(elem_sig) => {
            let element = get(elem_sig)?;
            Ok(TypeInfo {
                align_mask: element.align_mask,
                fixed_size: None,
                signature: signature.into(),
                kind: TypeInfoKind::Maybe { element },
            })
        }
        Kind::Array(elem_sig) => {
            let element = get(elem_sig)?;
            Ok(TypeInfo {
                align_mask: element.align_mask,
                fixed_size: None,
                signature: signature.into(),
                kind: TypeInfoKind::Array { element },
            })
        }
        Kind::Tuple(full) => build_tuple(signature, full, false),
        Kind::DictEntry(full) => build_tuple(signature, full, true),
    }
}

/// Ports `struct_info_new` from the source's `gvarianttypeinfo.c`
/// verbatim, modulo the zero-member override noted below.
fn build_tuple(signature: &str, full: &str, is_dict_entry: bool) -> Result<TypeInfo> {
    let member_sigs: Vec<&str> = gvariant_types::members(full)?.collect();
    if is_dict_entry && member_sigs.len() != 2 {
        return Err(GVariantError::Signature(
            gvariant_types::ParseError::DictEntryArity,
        ));
    }
    if is_dict_entry && member_sigs[0].len() != 1 {
        // The grammar's `{` base S `}` production already forces a
        // single-byte base-class key for any signature that scanned
        // successfully; this is a defense-in-depth re-check.
        return Err(GVariantError::Signature(
            gvariant_types::ParseError::NonBaseDictKey,
        ));
    }

    let mut members = Vec::with_capacity(member_sigs.len());

    let mut alignment: u8 = 0;
    let mut fixed = true;

    let mut aligned: usize = 0;
    let mut before: usize = 0;
    let mut after: usize = 0;
    let mut index: i64 = -1;

    for member_sig in &member_sigs {
        let member_ti = get(member_sig)?;
        let item_alignment = member_ti.align_mask as usize;
        let item_fixed_size = member_ti.fixed_size;

        alignment |= member_ti.align_mask;

        if item_alignment > aligned {
            before = before
                .wrapping_add(after)
                .wrapping_add(after.wrapping_neg() & aligned)
                .wrapping_add(item_alignment);
            aligned = item_alignment;
            after = 0;
        } else {
            after = after.wrapping_add(after.wrapping_neg() & item_alignment);
        }

        before = before.wrapping_add(after & !aligned);
        after &= aligned;

        let member_index = if index < 0 { NO_INDEX } else { index as u32 };
        let plus = before;
        let and = !aligned;
        let or = after;

        let size = match item_fixed_size {
            None => {
                fixed = false;
                aligned = 0;
                before = 0;
                after = 0;
                index += 1;
                MemberSize::Variable
            }
            Some(sz) => {
                after = after.wrapping_add(sz as usize);
                MemberSize::Fixed(sz)
            }
        };

        members.push(MemberInfo {
            type_info: member_ti,
            index: member_index,
            plus,
            and,
            or,
            size,
        });
    }

    if let Some(last) = members.last_mut() {
        if last.size == MemberSize::Variable {
            last.size = MemberSize::Last;
        }
    }

    let fixed_size = if fixed {
        let mut size = (before & !aligned).wrapping_add(after);
        size = size.wrapping_add(size.wrapping_neg() & (alignment as usize));
        // §4.2: "never 0 — a unit struct has fixed_size 1".
        Some(if size == 0 { 1 } else { size as u32 })
    } else {
        None
    };

    Ok(TypeInfo {
        signature: signature.into(),
        align_mask: alignment,
        fixed_size,
        kind: TypeInfoKind::Tuple {
            members,
            is_dict_entry,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_types_have_expected_metadata() {
        let b = get("y").unwrap();
        assert_eq!(b.align_mask, 0);
        assert_eq!(b.fixed_size, Some(1));

        let i = get("i").unwrap();
        assert_eq!(i.align_mask, 3);
        assert_eq!(i.fixed_size, Some(4));

        let s = get("s").unwrap();
        assert_eq!(s.align_mask, 0);
        assert_eq!(s.fixed_size, None);

        let v = get("v").unwrap();
        assert_eq!(v.align_mask, 7);
        assert_eq!(v.fixed_size, None);
    }

    #[test]
    fn unit_struct_has_fixed_size_one() {
        let unit = get("()").unwrap();
        assert_eq!(unit.fixed_size, Some(1));
        assert_eq!(unit.n_members(), 0);
    }

    #[test]
    fn all_fixed_struct_is_fixed_size() {
        // (syus) has a variable member (s) so isn't fixed; use an all-fixed one.
        let ti = get("(iy)").unwrap();
        assert_eq!(ti.fixed_size, Some(8)); // i:4 aligned, y:1, padded to alignment 3 -> 8
        assert_eq!(ti.align_mask, 3);
    }

    #[test]
    fn variable_struct_is_not_fixed_size() {
        let ti = get("(syus)").unwrap();
        assert_eq!(ti.fixed_size, None);
        assert_eq!(ti.n_members(), 4);
    }

    #[test]
    fn dict_entry_requires_base_key() {
        let err = get("{(s)s}");
        assert!(err.is_err());
    }

    #[test]
    fn array_and_maybe_inherit_element_alignment() {
        let a = get("ax").unwrap();
        assert_eq!(a.align_mask, 7);
        assert_eq!(a.fixed_size, None);

        let m = get("mx").unwrap();
        assert_eq!(m.align_mask, 7);
        assert_eq!(m.fixed_size, None);
    }

    #[test]
    fn interning_returns_same_instance() {
        let a = get("a(ss)").unwrap();
        let b = get("a(ss)").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
