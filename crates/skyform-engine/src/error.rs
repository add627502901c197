//! Error types for the Skyform engine binary.
//!
//! [`EngineError`] wraps every failure that ends the process with a
//! non-zero exit code.

/// Top-level error for the Skyform engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The command line was not `<program> <figure_file>`.
    #[error("usage: {program} <figure_file>")]
    Usage {
        /// Name the binary was invoked as.
        program: String,
    },

    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: skyform_core::config::ConfigError,
    },

    /// The figure or one of its scripts could not be loaded.
    #[error("input error: {source}")]
    Input {
        /// The underlying input error.
        #[from]
        source: skyform_core::input::InputError,
    },

    /// The run failed during teardown.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: skyform_core::runner::RunnerError,
    },
}
