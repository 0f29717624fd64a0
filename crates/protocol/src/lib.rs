//! Wire-level building blocks for the rill durable-streams protocol.
//!
//! Everything in this crate is a pure function over primitive inputs:
//! offset algebra, path and ETag codecs, content-type rules, TTL and
//! absolute-expiry validation, the trailing-comma JSON convention, and the
//! cursor system used by live readers. Storage substrates and the HTTP
//! adapter build on top of these without adding any format decisions of
//! their own.

pub mod content_type;
pub mod cursor;
pub mod error;
pub mod etag;
pub mod expiry;
pub mod headers;
pub mod json;
pub mod offset;
pub mod path;

pub use cursor::CursorOptions;
pub use error::StoreError;
pub use offset::Offset;
