// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The container builder (§4.5): a stateful assembler that accumulates
//! children for one variant/maybe/array/struct/dict-entry and infers a
//! concrete signature from them when none is declared up front.

use crate::error::{GVariantError, Result};
use crate::typeinfo::{self, TypeInfo, TypeInfoKind};
use crate::value::Value;
use std::sync::Arc;

/// The compound shape being assembled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuilderKind {
    Variant,
    Maybe,
    Array,
    Tuple,
    DictEntry,
}

/// Assembles one container's children, then finalizes into a [`Value`]
/// (§4.5). `open`/`close` nest builders for sub-containers.
pub struct ContainerBuilder {
    kind: BuilderKind,
    declared: Option<Arc<TypeInfo>>,
    element_type: Option<Arc<TypeInfo>>,
    children: Vec<Value>,
    trusted: bool,
    open_child: Option<(BuilderKind, Box<ContainerBuilder>)>,
}

impl ContainerBuilder {
    /// Starts a new builder. `declared` is required for an array or
    /// maybe that may end up empty (there is no element to infer a
    /// type from); when present it must be concrete and compatible
    /// with `kind`.
    pub fn new(kind: BuilderKind, declared: Option<Arc<TypeInfo>>) -> Result<Self> {
        let element_type = match (&kind, &declared) {
            (BuilderKind::Maybe, Some(ti)) => match &ti.kind {
                TypeInfoKind::Maybe { element } => Some(element.clone()),
                _ => {
                    return Err(GVariantError::BuilderContract(
                        "declared type for a maybe builder must be a maybe type".into(),
                    ))
                }
            },
            (BuilderKind::Array, Some(ti)) => match &ti.kind {
                TypeInfoKind::Array { element } => Some(element.clone()),
                _ => {
                    return Err(GVariantError::BuilderContract(
                        "declared type for an array builder must be an array type".into(),
                    ))
                }
            },
            _ => None,
        };

        Ok(ContainerBuilder {
            kind,
            declared,
            element_type,
            children: Vec::new(),
            trusted: true,
            open_child: None,
        })
    }

    /// Whether `value` may be appended next, without mutating state.
    pub fn check_add(&self, value: &Value) -> bool {
        if self.open_child.is_some() {
            return false;
        }
        match self.kind {
            BuilderKind::Variant => self.children.is_empty(),
            BuilderKind::Maybe => {
                self.children.is_empty()
                    && self
                        .element_type
                        .as_ref()
                        .map_or(true, |et| et.signature == value.type_info().signature)
            }
            BuilderKind::Array => self
                .element_type
                .as_ref()
                .map_or(true, |et| et.signature == value.type_info().signature),
            BuilderKind::Tuple => match &self.declared {
                Some(ti) => ti
                    .member(self.children.len())
                    .map_or(false, |m| m.type_info.signature == value.type_info().signature),
                None => true,
            },
            BuilderKind::DictEntry => {
                if self.children.len() >= 2 {
                    false
                } else if self.children.len() == 0 {
                    matches!(value.type_info().kind, TypeInfoKind::Basic)
                        && !value.type_info().is_variant()
                } else {
                    true
                }
            }
        }
    }

    /// Appends `value`, failing the same way `check_add` would have
    /// reported.
    pub fn add(&mut self, value: Value) -> Result<()> {
        if !self.check_add(&value) {
            return Err(GVariantError::BuilderContract(format!(
                "value of type {:?} not permitted here",
                value.type_info().signature
            )));
        }
        if self.element_type.is_none()
            && matches!(self.kind, BuilderKind::Maybe | BuilderKind::Array)
        {
            self.element_type = Some(value.type_info().clone());
        }
        self.trusted = self.trusted && value.is_trusted();
        self.children.push(value);
        Ok(())
    }

    /// Opens a sub-builder for the next child. Only one may be open at
    /// a time; call [`ContainerBuilder::close`] before adding anything
    /// else at this level.
    pub fn open(&mut self, kind: BuilderKind, declared: Option<Arc<TypeInfo>>) -> Result<()> {
        if self.open_child.is_some() {
            return Err(GVariantError::BuilderContract(
                "a child builder is already open".into(),
            ));
        }
        self.open_child = Some((kind, Box::new(ContainerBuilder::new(kind, declared)?)));
        Ok(())
    }

    /// Finalizes the currently open sub-builder and adds its value
    /// here.
    pub fn close(&mut self) -> Result<()> {
        let (_, child) = self
            .open_child
            .take()
            .ok_or_else(|| GVariantError::BuilderContract("no child builder is open".into()))?;
        let value = child.end()?;
        self.add(value)
    }

    /// Releases all children and any open sub-builder. Taking `self`
    /// by value and dropping it is enough in a Rust rendition; this
    /// exists to name the operation the contract describes.
    pub fn abort(self) {}

    /// Finalizes the builder into a value, inferring a concrete
    /// signature where one was not declared.
    pub fn end(self) -> Result<Value> {
        if self.open_child.is_some() {
            return Err(GVariantError::BuilderContract(
                "cannot finalize while a child builder is open".into(),
            ));
        }

        match self.kind {
            BuilderKind::Variant => {
                if self.children.len() != 1 {
                    return Err(GVariantError::BuilderContract(
                        "variant requires exactly one child".into(),
                    ));
                }
                let ti = typeinfo::get("v")?;
                Ok(Value::from_children(ti, self.children, self.trusted))
            }
            BuilderKind::Maybe => {
                let element = self.element_type.ok_or_else(|| {
                    GVariantError::BuilderContract(
                        "empty maybe with no declared or inferred element type".into(),
                    )
                })?;
                let sig = format!("m{}", element.signature);
                let ti = typeinfo::get(&sig)?;
                Ok(Value::from_children(ti, self.children, self.trusted))
            }
            BuilderKind::Array => {
                let element = self.element_type.ok_or_else(|| {
                    GVariantError::BuilderContract(
                        "empty array with no declared or inferred element type".into(),
                    )
                })?;
                let sig = format!("a{}", element.signature);
                let ti = typeinfo::get(&sig)?;
                Ok(Value::from_children(ti, self.children, self.trusted))
            }
            BuilderKind::Tuple => {
                if let Some(declared) = &self.declared {
                    if declared.n_members() != self.children.len() {
                        return Err(GVariantError::BuilderContract(format!(
                            "struct of type {} needs {} members, got {}",
                            declared.signature,
                            declared.n_members(),
                            self.children.len()
                        )));
                    }
                }
                let mut sig = String::from("(");
                for c in &self.children {
                    sig.push_str(&c.type_info().signature);
                }
                sig.push(')');
                let ti = typeinfo::get(&sig)?;
                Ok(Value::from_children(ti, self.children, self.trusted))
            }
            BuilderKind::DictEntry => {
                if self.children.len() != 2 {
                    return Err(GVariantError::BuilderContract(
                        "dict entry requires exactly two children".into(),
                    ));
                }
                let sig = format!(
                    "{{{}{}}}",
                    self.children[0].type_info().signature,
                    self.children[1].type_info().signature
                );
                let ti = typeinfo::get(&sig)?;
                Ok(Value::from_children(ti, self.children, self.trusted))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_infers_signature_from_children() {
        let mut b = ContainerBuilder::new(BuilderKind::Tuple, None).unwrap();
        b.add(Value::new_basic(typeinfo::get("i").unwrap(), &7i32.to_le_bytes()))
            .unwrap();
        b.add(Value::new_basic(typeinfo::get("y").unwrap(), &[9]))
            .unwrap();
        let v = b.end().unwrap();
        assert_eq!(v.type_info().signature.as_ref(), "(iy)");
    }

    #[test]
    fn array_rejects_mismatched_element_type() {
        let mut b = ContainerBuilder::new(BuilderKind::Array, None).unwrap();
        b.add(Value::new_basic(typeinfo::get("i").unwrap(), &1i32.to_le_bytes()))
            .unwrap();
        let mismatched = Value::new_basic(typeinfo::get("s").unwrap(), b"x\0");
        assert!(!b.check_add(&mismatched));
        assert!(b.add(mismatched).is_err());
    }

    #[test]
    fn empty_array_without_declared_type_fails_to_end() {
        let b = ContainerBuilder::new(BuilderKind::Array, None).unwrap();
        assert!(b.end().is_err());
    }

    #[test]
    fn empty_array_with_declared_type_ends_with_zero_children() {
        let ti = typeinfo::get("as").unwrap();
        let b = ContainerBuilder::new(BuilderKind::Array, Some(ti)).unwrap();
        let v = b.end().unwrap();
        assert_eq!(v.n_children().unwrap(), 0);
    }

    #[test]
    fn variant_requires_exactly_one_child() {
        let b = ContainerBuilder::new(BuilderKind::Variant, None).unwrap();
        assert!(b.end().is_err());
    }

    #[test]
    fn dict_entry_requires_base_class_key() {
        let mut b = ContainerBuilder::new(BuilderKind::DictEntry, None).unwrap();
        let struct_key = {
            let mut inner = ContainerBuilder::new(BuilderKind::Tuple, None).unwrap();
            inner
                .add(Value::new_basic(typeinfo::get("y").unwrap(), &[1]))
                .unwrap();
            inner.end().unwrap()
        };
        assert!(!b.check_add(&struct_key));
        assert!(b.add(struct_key).is_err());

        b.add(Value::new_basic(typeinfo::get("s").unwrap(), b"k\0"))
            .unwrap();
        b.add(Value::new_basic(typeinfo::get("i").unwrap(), &1i32.to_le_bytes()))
            .unwrap();
        let v = b.end().unwrap();
        assert_eq!(v.type_info().signature.as_ref(), "{si}");
    }

    #[test]
    fn open_close_nests_a_sub_builder() {
        let mut outer = ContainerBuilder::new(BuilderKind::Tuple, None).unwrap();
        outer.open(BuilderKind::Array, None).unwrap();
        assert!(outer
            .add(Value::new_basic(typeinfo::get("y").unwrap(), &[1]))
            .is_err());
        if let Some((_, child)) = outer.open_child.as_mut() {
            child
                .add(Value::new_basic(typeinfo::get("y").unwrap(), &[1]))
                .unwrap();
        }
        outer.close().unwrap();
        let v = outer.end().unwrap();
        assert_eq!(v.type_info().signature.as_ref(), "(ay)");
    }
}
