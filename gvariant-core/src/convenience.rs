// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ergonomic constructors (§10.5): `From` impls and small helpers
//! layered over [`ContainerBuilder`], for callers who would otherwise
//! hand-roll a one-child builder for every primitive.

use crate::builder::{BuilderKind, ContainerBuilder};
use crate::error::Result;
use crate::typeinfo;
use crate::value::Value;

macro_rules! basic_from_impl {
    ($ty:ty, $sig:literal, $to_bytes:expr) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Value {
                let ti = typeinfo::get($sig).expect("base type signature always compiles");
                let bytes: Vec<u8> = ($to_bytes)(v);
                Value::new_basic(ti, &bytes)
            }
        }
    };
}

basic_from_impl!(bool, "b", |v: bool| vec![v as u8]);
basic_from_impl!(u8, "y", |v: u8| vec![v]);
basic_from_impl!(i16, "n", |v: i16| v.to_le_bytes().to_vec());
basic_from_impl!(u16, "q", |v: u16| v.to_le_bytes().to_vec());
basic_from_impl!(i32, "i", |v: i32| v.to_le_bytes().to_vec());
basic_from_impl!(u32, "u", |v: u32| v.to_le_bytes().to_vec());
basic_from_impl!(i64, "x", |v: i64| v.to_le_bytes().to_vec());
basic_from_impl!(u64, "t", |v: u64| v.to_le_bytes().to_vec());
basic_from_impl!(f64, "d", |v: f64| v.to_le_bytes().to_vec());

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        let ti = typeinfo::get("s").expect("\"s\" always compiles");
        let mut payload = s.as_bytes().to_vec();
        payload.push(0);
        Value::new_basic(ti, &payload)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::from(s.as_str())
    }
}

/// Builds a struct value from already-built children, inferring its
/// signature the way [`ContainerBuilder`] would.
pub fn tuple(children: &[Value]) -> Result<Value> {
    let mut b = ContainerBuilder::new(BuilderKind::Tuple, None)?;
    for child in children {
        b.add(child.clone())?;
    }
    b.end()
}

/// Wraps `child` in a variant.
pub fn variant(child: Value) -> Result<Value> {
    let mut b = ContainerBuilder::new(BuilderKind::Variant, None)?;
    b.add(child)?;
    b.end()
}

/// Builds an array from already-built, same-typed children.
pub fn array(children: &[Value]) -> Result<Value> {
    let mut b = ContainerBuilder::new(BuilderKind::Array, None)?;
    for child in children {
        b.add(child.clone())?;
    }
    b.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bool_and_i32_build_basics() {
        let b = Value::from(true);
        assert_eq!(b.to_bytes().unwrap().as_ref(), &[1]);

        let i = Value::from(42i32);
        assert_eq!(i.to_bytes().unwrap().as_ref(), &42i32.to_le_bytes());
    }

    #[test]
    fn from_str_is_nul_terminated() {
        let s = Value::from("hi");
        assert_eq!(s.to_bytes().unwrap().as_ref(), b"hi\0");
    }

    #[test]
    fn tuple_helper_infers_signature() {
        let v = tuple(&[Value::from(7i32), Value::from(9u8)]).unwrap();
        assert_eq!(v.type_info().signature.as_ref(), "(iy)");
    }

    #[test]
    fn variant_helper_wraps_child() {
        let v = variant(Value::from("x")).unwrap();
        assert_eq!(v.type_info().signature.as_ref(), "v");
        assert_eq!(v.get_child(0).unwrap().to_bytes().unwrap().as_ref(), b"x\0");
    }
}
