use crate::error::{Result, VfsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How aggressively cached node state is refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Cached state is only dropped by an explicit refresh.
    Manual,
    /// Every resolve detaches and reattaches the node it returns.
    #[default]
    OnResolve,
    /// Every operation on a node refreshes it first.
    OnCall,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::Manual => "manual",
            CacheStrategy::OnResolve => "on-resolve",
            CacheStrategy::OnCall => "on-call",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(CacheStrategy::Manual),
            "on-resolve" | "on_resolve" => Ok(CacheStrategy::OnResolve),
            "on-call" | "on_call" => Ok(CacheStrategy::OnCall),
            other => Err(VfsError::configuration(format!(
                "unknown cache strategy {:?}",
                other
            ))),
        }
    }
}

/// Backing store of the process-wide node cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilesCacheKind {
    /// Strong references, never evicts.
    #[default]
    Default,
    /// Bounded, least recently used entries evicted first.
    Lru,
    /// Entries vanish once no handle holds the node.
    Weak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub cache_strategy: CacheStrategy,
    pub files_cache: FilesCacheKind,
    pub lru_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            cache_strategy: CacheStrategy::OnResolve,
            files_cache: FilesCacheKind::Default,
            lru_capacity: 100,
        }
    }
}

impl ManagerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ManagerConfig = serde_json::from_str(json)
            .map_err(|e| VfsError::configuration(format!("invalid manager config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.files_cache == FilesCacheKind::Lru && self.lru_capacity == 0 {
            return Err(VfsError::configuration("lru_capacity must be positive"));
        }
        Ok(())
    }
}
