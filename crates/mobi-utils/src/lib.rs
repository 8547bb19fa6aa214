pub mod encoding;
pub mod fs;
pub mod xml;
