//! Secondary indexes layered over the B+tree environment (C3, C4, C5).

pub mod equality;
pub mod fulltext;
pub mod type_index;

pub use equality::EqualityIndex;
pub use fulltext::FulltextIndex;
pub use type_index::{Adaptor, Comparator, PropertyValue, TypeIndex};
