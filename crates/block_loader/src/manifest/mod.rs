//! src/manifest/mod.rs
//!
//! Manifest model: a tab delimited listing of records, partitioned into
//! fixed-size blocks.
//!
//! ```text
//! @FILE<TAB>STRING
//! # comment lines are skipped
//! images/0001.jpg<TAB>cat
//! images/0002.jpg<TAB>dog
//! ```
//!
//! The optional `@` line declares the type of every column. Without it all
//! columns are `FILE`.

mod block;
mod file;
mod sequence;

use std::fmt;

pub use block::{generate_block_list, BlockInfo};
pub use file::{ManifestFile, ManifestOptions, Record};
pub use sequence::BlockSequence;

/// Marks the column type header line.
pub const METADATA_MARKER: char = '@';
/// Marks a line to be skipped.
pub const COMMENT_MARKER: char = '#';
/// Separates columns (and type tokens in the header).
pub const DELIMITER: char = '\t';

/// Seed offsets keeping the independent generators of one manifest apart.
pub(crate) const SUBSET_SEED_OFFSET: u64 = 1 << 32;
pub(crate) const SEQUENCE_SEED_OFFSET: u64 = 2 << 32;

/// How the value in a manifest column is turned into element bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Path to a file whose contents become the element.
    File,
    /// Base64 encoded bytes.
    Binary,
    /// The column text itself.
    String,
    /// Decimal integer stored as 4 little-endian bytes (`i32`).
    AsciiInt,
    /// Decimal number stored as 4 little-endian bytes (`f32`).
    AsciiFloat,
}

impl ElementType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "FILE" => Some(ElementType::File),
            "BINARY" => Some(ElementType::Binary),
            "STRING" => Some(ElementType::String),
            "ASCII_INT" => Some(ElementType::AsciiInt),
            "ASCII_FLOAT" => Some(ElementType::AsciiFloat),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            ElementType::File => "FILE",
            ElementType::Binary => "BINARY",
            ElementType::String => "STRING",
            ElementType::AsciiInt => "ASCII_INT",
            ElementType::AsciiFloat => "ASCII_FLOAT",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
