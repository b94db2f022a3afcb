use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_steps() -> usize {
    20
}

fn default_sub_agent_max_steps() -> usize {
    10
}

fn default_bus_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model calls allowed in one top-level turn.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_sub_agent_max_steps")]
    pub sub_agent_max_steps: usize,
    /// Per-subscriber event buffer.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            sub_agent_max_steps: default_sub_agent_max_steps(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryhiveConfig {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Expands `${VAR}` placeholders from the environment. Unset variables
/// expand to the empty string; an unterminated placeholder is kept verbatim.
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Loads `<root>/main.yaml`, expands placeholders and validates.
pub fn load_config(root: &Path) -> Result<StoryhiveConfig> {
    let mut config: StoryhiveConfig = read_yaml_file(&root.join("main.yaml"))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &StoryhiveConfig) -> Result<()> {
    if config.database.path.trim().is_empty() {
        return Err(anyhow!("database.path must not be empty"));
    }
    if config.model.provider.trim().is_empty() {
        return Err(anyhow!("model.provider must not be empty"));
    }
    if config.model.model.trim().is_empty() {
        return Err(anyhow!("model.model must not be empty"));
    }
    if config.model.max_tokens == 0 {
        return Err(anyhow!("model.max_tokens must be positive"));
    }
    if config.engine.max_steps == 0 {
        return Err(anyhow!("engine.max_steps must be at least 1"));
    }
    if config.engine.sub_agent_max_steps == 0 {
        return Err(anyhow!("engine.sub_agent_max_steps must be at least 1"));
    }
    if config.engine.bus_capacity == 0 {
        return Err(anyhow!("engine.bus_capacity must be at least 1"));
    }
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut StoryhiveConfig) {
    config.app.name = resolve_env_var(&config.app.name);
    config.app.env = resolve_env_var(&config.app.env);
    config.database.path = resolve_env_var(&config.database.path);
    config.model.provider = resolve_env_var(&config.model.provider);
    config.model.model = resolve_env_var(&config.model.model);
}
