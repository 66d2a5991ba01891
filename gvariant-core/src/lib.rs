// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Type-info cache, binary codec, and value core for the gvariant value
//! system.
//!
//! Built on top of `gvariant_types`'s signature grammar:
//!
//! - [`typeinfo`] compiles and interns per-signature metadata (§4.2).
//! - [`serializer`] reads and writes the framed byte layout (§4.3).
//! - [`value`] is the lazily-(de)serializing handle applications hold
//!   (§4.4).
//! - [`builder`] assembles values from their children (§4.5).
//! - [`iter`] walks a container's children once (§4.6).
//! - [`text`] renders and parses the textual markup (§10.4).
//! - [`convenience`] offers shorthand constructors for common shapes
//!   (§10.5).

pub mod builder;
pub mod convenience;
pub mod error;
pub mod iter;
pub mod serializer;
pub mod text;
pub mod typeinfo;
pub mod value;

pub use error::{GVariantError, Result};
pub use value::{LoadFlags, Value};
