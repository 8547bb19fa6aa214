pub mod book;
pub mod cancel;
pub mod diagnostics;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod plugin;
