pub mod chunker;
pub mod extract;
pub mod index;

pub use extract::ExtractJob;
pub use index::IndexJob;
