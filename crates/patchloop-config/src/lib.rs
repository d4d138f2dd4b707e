//! Configuration for patchloop.
//!
//! Values are resolved with precedence CLI > `.patchloop/config.toml` >
//! built-in defaults, and every key remembers where its value came from.

mod builder;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use model::{
    CONFIG_DIR_NAME, CliArgs, Config, ConfigSource, GitConfig, LlmConfig, SandboxConfig,
    TestsConfig, WorkflowConfig, default_copy_excludes,
};
