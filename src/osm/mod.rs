pub mod data;
pub mod download;
pub mod reader;
