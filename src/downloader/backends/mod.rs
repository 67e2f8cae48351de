// Retrieval backends, in fallback order: python module first, then the binary

pub mod cli;
pub mod python;
pub mod ytdlp;

pub use cli::CliYtDlp;
pub use python::PythonYtDlp;
