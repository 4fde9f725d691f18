use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::{env, fs, path::PathBuf};
use tracing::{error, info};

/// Immutable key/value view taken from a provider exactly once, when the
/// host starts. Service callbacks read configuration through this, so a
/// provider changing underneath never affects a running host.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    values: HashMap<String, String>,
}

impl ConfigSnapshot {
    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
pub trait ConfigProviderType: Send + Sync {
    async fn snapshot(&self) -> ConfigSnapshot {
        let mut values = HashMap::new();
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                values.insert(key, value);
            }
        }
        ConfigSnapshot { values }
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str);
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn ConfigProviderType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigProvider(pub Box<dyn ConfigProviderType>);

impl ConfigProvider {
    pub fn into_inner(self) -> Box<dyn ConfigProviderType> {
        self.0
    }
}

impl Clone for ConfigProvider {
    fn clone(&self) -> Self {
        ConfigProvider(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads from the process environment, optionally seeded from a .env file.
#[derive(Clone, Debug)]
pub struct EnvConfigProvider {
    env_file: PathBuf,
}

impl EnvConfigProvider {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            dotenvy::from_path(env_file.clone()).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            error!("could not load .env from {}", env_file.display())
        }

        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigProviderType for EnvConfigProvider {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        // Update .env file
        let env_path = &self.env_file;
        let content = fs::read_to_string(env_path).unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;

        for line in content.lines() {
            if let Some((k, _)) = line.split_once('=') {
                if k.trim() == key {
                    lines.push(format!("{key}={value}"));
                    found = true;
                } else {
                    lines.push(line.to_string());
                }
            } else {
                lines.push(line.to_string());
            }
        }

        if !found {
            lines.push(format!("{key}={value}"));
        }

        fs::write(env_path, lines.join("\n")).map_err(|e| e.to_string())?;

        Ok(())
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
        // Remove from file
        let env_path = &self.env_file;
        if let Ok(content) = fs::read_to_string(env_path) {
            let lines: Vec<String> = content
                .lines()
                .filter(|line| {
                    if let Some((k, _)) = line.split_once('=') {
                        k.trim() != key
                    } else {
                        true
                    }
                })
                .map(|l| l.to_string())
                .collect();

            let _ = fs::write(env_path, lines.join("\n"));
        }
    }

    fn clone_box(&self) -> Box<dyn ConfigProviderType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "EnvConfigProvider".to_string()
    }
}

/// Plain in-memory provider; the default a host starts with.
#[derive(Debug, Clone)]
pub struct MapConfigProvider {
    map: DashMap<String, String>,
}

impl MapConfigProvider {
    pub fn new() -> Box<Self> {
        Box::new(Self {
            map: DashMap::new(),
        })
    }
}

impl Default for MapConfigProvider {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

#[async_trait]
impl ConfigProviderType for MapConfigProvider {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigProviderType> {
        Box::new(self.clone())
    }
    fn debug_box(&self) -> String {
        format!("MapConfigProvider({} entries)", self.map.len())
    }
}
