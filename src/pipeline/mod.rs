pub mod ensure;
pub mod import;
