// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The child iterator (§4.6): binds to one value, strongly references
//! it while items remain, and releases that reference the moment it is
//! exhausted or cancelled. Not restartable.

use crate::error::Result;
use crate::value::Value;

/// One-shot iterator over a container value's children.
pub struct ValueIter {
    value: Option<Value>,
    next_index: usize,
    len: usize,
}

impl ValueIter {
    /// Binds to `value`'s children. Fails only if `value`'s own child
    /// count cannot be determined (e.g. malformed framing at the top
    /// level).
    pub fn new(value: Value) -> Result<Self> {
        let len = value.n_children()?;
        Ok(ValueIter {
            value: Some(value),
            next_index: 0,
            len,
        })
    }

    /// Remaining item count.
    pub fn len(&self) -> usize {
        self.len.saturating_sub(self.next_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases the bound value early, as if the iterator had been
    /// exhausted.
    pub fn cancel(&mut self) {
        self.value = None;
    }
}

impl Iterator for ValueIter {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Result<Value>> {
        let value = self.value.as_ref()?;
        if self.next_index >= self.len {
            self.value = None;
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        let item = value.get_child(index);
        if self.next_index >= self.len {
            self.value = None;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len();
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo;

    #[test]
    fn iterates_exactly_n_children_then_releases() {
        let ti = typeinfo::get("(iy)").unwrap();
        let i = Value::new_basic(typeinfo::get("i").unwrap(), &1i32.to_le_bytes());
        let y = Value::new_basic(typeinfo::get("y").unwrap(), &[2]);
        let v = Value::from_children(ti, vec![i, y], true);

        let mut it = ValueIter::new(v).unwrap();
        assert_eq!(it.len(), 2);
        let first = it.next().unwrap().unwrap();
        assert_eq!(first.to_bytes().unwrap().as_ref(), &1i32.to_le_bytes());
        let second = it.next().unwrap().unwrap();
        assert_eq!(second.to_bytes().unwrap().as_ref(), &[2]);
        assert!(it.next().is_none());
        assert!(it.value.is_none());
    }

    #[test]
    fn cancel_releases_before_exhaustion() {
        let ti = typeinfo::get("ay").unwrap();
        let v = Value::from_children(
            ti,
            vec![
                Value::new_basic(typeinfo::get("y").unwrap(), &[1]),
                Value::new_basic(typeinfo::get("y").unwrap(), &[2]),
            ],
            true,
        );
        let mut it = ValueIter::new(v).unwrap();
        it.next();
        it.cancel();
        assert!(it.value.is_none());
        assert!(it.next().is_none());
    }
}
