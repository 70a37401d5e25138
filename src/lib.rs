//! Drives interactive command-line programs from a YAML rule set: output is
//! split into logical lines, matched against ordered rules, and answered with
//! keystrokes, optionally publishing the captured context.

pub mod config;
pub mod engine;
pub mod error;
pub mod ruler;
pub mod terminal;
pub mod upload;

pub use config::{LoadedConfig, load_config, parse_config};
pub use engine::{Engine, EngineState, SessionOutcome};
pub use error::{ActionError, EngineError, SupervisorError, UploadError};
pub use ruler::RuleSet;
pub use terminal::{ProcessSupervisor, ScriptHandle, ScriptedProcess};
pub use upload::{FileUploader, MemoryUploader, NullUploader, Uploader};
