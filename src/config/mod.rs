pub mod helper;
pub mod loader;
pub mod rule;
pub mod session;
pub mod types;
pub mod upload;

pub use loader::{LoadedConfig, load_config, parse_config};
pub use rule::{CompiledRule, Pattern, Rule, RuleId, RuleTrigger};
pub use session::{EngineSettings, LaunchSpec, ProcessMode, TimeoutPolicy};
pub use types::{Action, Key};
pub use upload::{UploadConfig, UploadKind};
