mod json;

pub use json::{CANONICAL_INDENT, CanonicalJson};
