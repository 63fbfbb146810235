pub mod index;
pub mod matching;
pub mod tree;
