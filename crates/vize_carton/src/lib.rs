//! Carton - The artist's toolbox for Vize.
//!
//! This crate provides the small shared utilities that the Vize bundler
//! integration crates lean on, much like a carton (artist's portfolio case)
//! holds the essential tools an artist carries from one workshop to the next.
//!
//! # Modules
//!
//! - **hash**: xxHash3 digests for component ids
//! - **path**: module id and path normalization shared by every bundler host
//!
//! # Example
//!
//! ```
//! use vize_carton::{clean_id, short_hash};
//!
//! assert_eq!(clean_id("/src/App.vue?vue&type=style&index=0"), "/src/App.vue");
//! assert_eq!(short_hash("src/App.vue").len(), 8);
//! ```

pub mod hash;
pub mod path;

// Re-export rustc-hash for fast hash maps/sets
pub use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

// Re-export shared utilities
pub use hash::{hash_str, short_hash};
pub use path::{clean_id, normalize_path, relative_to};
