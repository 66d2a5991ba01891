// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors produced while scanning, validating, or otherwise reasoning
/// about a type signature.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    /// The signature is empty.
    #[error("signature is empty")]
    Empty,

    /// The cursor reached the scan limit before a signature completed.
    #[error("signature is truncated")]
    Truncated,

    /// A byte was encountered that cannot begin or continue a signature.
    #[error("unexpected byte 0x{0:02x} in signature")]
    UnexpectedByte(u8),

    /// A `(` or `{` was never closed.
    #[error("unbalanced brackets in signature")]
    UnbalancedBrackets,

    /// A dict-entry's key was not a base type.
    #[error("dict-entry key must be a base type")]
    NonBaseDictKey,

    /// A dict-entry did not have exactly two members.
    #[error("dict-entry must have exactly two members")]
    DictEntryArity,

    /// `is_valid` found trailing bytes after a complete signature.
    #[error("trailing bytes after signature")]
    TrailingBytes,

    /// An operation required a concrete signature but a wildcard was present.
    #[error("signature is not concrete: {0}")]
    NotConcrete(Box<str>),
}
