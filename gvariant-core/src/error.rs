// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crate-wide error type (§7).

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = GVariantError> = core::result::Result<T, E>;

/// Errors raised by the type-info cache, serializer, value core, and
/// container builder.
#[derive(Debug, Error)]
pub enum GVariantError {
    /// A signature failed to scan/validate, or a builder was asked for a
    /// non-concrete required type.
    #[error(transparent)]
    Signature(#[from] gvariant_types::ParseError),

    /// Child access on malformed bytes. Callers that want §4.7's
    /// "sub-tree yields a default value" behavior should use the
    /// `_or_default` accessors instead of propagating this.
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// A builder contract was violated: wrong type, too many/few
    /// children, or a non-base dict-entry key.
    #[error("builder contract violation: {0}")]
    BuilderContract(String),

    /// The `normalise` load flag was used and the data was not in normal
    /// form. Fails only the value being loaded, not sibling values.
    #[error("value is not normalized")]
    Unnormalized,

    /// An explicit index was outside `0..n_children`.
    #[error("index {index} out of range (n_children = {n_children})")]
    OutOfRange { index: usize, n_children: usize },

    /// I/O failure, surfaced by the CLI and by `from_reader`-style helpers.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
