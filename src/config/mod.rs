// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{apply_legacy_env, load_config, load_from_toml_str, resolve_config_path};
pub use settings::{
    AgentSettings, IngestionSettings, LlmSettings, OrchestrationSettings, RetrievalSettings,
    SecuritySettings, ServerSettings, Settings, StorageSettings,
};
