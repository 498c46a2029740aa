//! Distributed maps and the dense data that lives on them.

pub mod directory;
pub mod dist_map;
pub mod import;
pub mod multi_vector;
pub mod strided_map;

pub use directory::Directory;
pub use dist_map::DistMap;
pub use import::{CombineMode, Importer};
pub use multi_vector::MultiVector;
pub use strided_map::StridedMap;
