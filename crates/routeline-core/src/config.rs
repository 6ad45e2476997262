//! Configuration loaded from TOML.
//!
//! ```toml
//! tick_interval_ms = 1000
//! block_size = 400
//! workers = 4
//! share_root = "/srv/routeline/share"
//!
//! [local_cache]
//! dir = "/var/cache/routeline"
//! ceiling_bytes = 536870912
//!
//! [engine]
//! program = "/opt/router/bin/route"
//! args = ["--quiet"]
//!
//! [retry.fetch]
//! max_attempts = 3
//! base_delay_ms = 5000
//! multiplier = 1.0
//!
//! [[watches]]
//! name = "line3"
//! drop = { host = "fab01", share = "measure", path = "line3/drop" }
//! output = { host = "fab01", share = "panels", path = "line3" }
//!
//! [[design_locations]]
//! host = "fab01"
//! share = "designs"
//! path = "released"
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::app::PipelineSettings;
use crate::app::tasks::{Aggregate, FetchDesign, FetchMeasurements, RouteBlock, WriteOutput};
use crate::cache::CacheTtls;
use crate::domain::{
    Credentials, DEFAULT_BLOCK_SIZE, DesignLocation, FileGrammar, NetworkLocation, PipelineError,
    Result, Watch,
};
use crate::ports::{IdGenerator, Ledger};
use crate::queue::{InMemoryTaskQueue, RetryPolicy};
use crate::typed::Task;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tick_interval_ms: u64,
    pub lease_ttl_secs: u64,
    pub blob_ttl_secs: u64,
    pub claim_ttl_secs: u64,
    pub result_ttl_secs: u64,
    pub block_size: usize,
    pub workers: usize,
    /// Finished task records the queue keeps for inspection.
    pub retained_tasks: usize,
    pub scratch_dir: PathBuf,
    /// Root directory standing in for the network share.
    pub share_root: PathBuf,
    pub local_cache: LocalCacheConfig,
    pub grammar: GrammarConfig,
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub watches: Vec<WatchConfig>,
    pub design_locations: Vec<LocationConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            lease_ttl_secs: 10,
            blob_ttl_secs: 50 * 60,
            claim_ttl_secs: 10 * 60,
            result_ttl_secs: 50 * 60,
            block_size: DEFAULT_BLOCK_SIZE,
            workers: 4,
            retained_tasks: 1024,
            scratch_dir: std::env::temp_dir().join("routeline"),
            share_root: PathBuf::from("share"),
            local_cache: LocalCacheConfig::default(),
            grammar: GrammarConfig::default(),
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
            watches: Vec::new(),
            design_locations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    pub dir: PathBuf,
    pub ceiling_bytes: u64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ceiling_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    pub measurement_extension: String,
    pub design_extension: String,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            measurement_extension: "shifts".into(),
            design_extension: "layout".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("route-engine"),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// 1.0 gives a fixed backoff.
    pub multiplier: f64,
}

impl RetryPolicyConfig {
    const fn fixed(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            multiplier: 1.0,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
        )
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self::fixed(3, 5_000)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub fetch: RetryPolicyConfig,
    pub routing: RetryPolicyConfig,
    pub aggregation: RetryPolicyConfig,
    pub output: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch: RetryPolicyConfig::fixed(3, 5_000),
            routing: RetryPolicyConfig::fixed(3, 2_000),
            aggregation: RetryPolicyConfig::fixed(3, 2_000),
            output: RetryPolicyConfig::fixed(5, 2_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationConfig {
    pub host: String,
    pub share: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl LocationConfig {
    fn to_location(&self, ids: &dyn IdGenerator) -> NetworkLocation {
        let credentials = self.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        });
        NetworkLocation {
            id: ids.generate_location_id(),
            host: self.host.clone(),
            share: self.share.clone(),
            path: self.path.clone(),
            credentials,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchConfig {
    pub name: String,
    pub drop: LocationConfig,
    pub output: LocationConfig,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("lease_ttl_secs", self.lease_ttl_secs),
            ("blob_ttl_secs", self.blob_ttl_secs),
            ("claim_ttl_secs", self.claim_ttl_secs),
            ("result_ttl_secs", self.result_ttl_secs),
            ("block_size", self.block_size as u64),
            ("workers", self.workers as u64),
            ("local_cache.ceiling_bytes", self.local_cache.ceiling_bytes),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("{field} must be greater than 0")));
            }
        }

        for (stage, retry) in self.retry_policies() {
            if retry.max_attempts == 0 {
                return Err(PipelineError::Config(format!(
                    "retry.{stage}.max_attempts must be at least 1"
                )));
            }
            if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
                return Err(PipelineError::Config(format!(
                    "retry.{stage}.multiplier must be a finite number >= 1.0"
                )));
            }
        }

        self.grammar()?;
        Ok(())
    }

    fn retry_policies(&self) -> [(&'static str, RetryPolicyConfig); 4] {
        [
            ("fetch", self.retry.fetch),
            ("routing", self.retry.routing),
            ("aggregation", self.retry.aggregation),
            ("output", self.retry.output),
        ]
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            block_size: self.block_size,
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            scratch_dir: self.scratch_dir.clone(),
        }
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            claim: Duration::from_secs(self.claim_ttl_secs),
            blob: Duration::from_secs(self.blob_ttl_secs),
            result: Duration::from_secs(self.result_ttl_secs),
        }
    }

    pub fn grammar(&self) -> Result<FileGrammar> {
        FileGrammar::new(
            &self.grammar.measurement_extension,
            &self.grammar.design_extension,
        )
    }

    /// Task queue with each stage's retry policy.
    pub fn task_queue(&self) -> InMemoryTaskQueue {
        InMemoryTaskQueue::new(RetryPolicy::default())
            .with_policy(FetchDesign::TYPE, self.retry.fetch.policy())
            .with_policy(FetchMeasurements::TYPE, self.retry.fetch.policy())
            .with_policy(RouteBlock::TYPE, self.retry.routing.policy())
            .with_policy(Aggregate::TYPE, self.retry.aggregation.policy())
            .with_policy(WriteOutput::TYPE, self.retry.output.policy())
            .with_retained_finished(self.retained_tasks)
    }

    /// Register the configured watches and design locations.
    pub async fn seed_ledger(&self, ledger: &dyn Ledger, ids: &dyn IdGenerator) -> Result<()> {
        for watch in &self.watches {
            ledger
                .add_watch(Watch {
                    id: ids.generate_watch_id(),
                    name: watch.name.clone(),
                    drop_location: watch.drop.to_location(ids),
                    output_location: watch.output.to_location(ids),
                })
                .await?;
        }
        for location in &self.design_locations {
            let location = location.to_location(ids);
            ledger
                .add_design_location(DesignLocation {
                    id: location.id,
                    location,
                })
                .await?;
        }
        Ok(())
    }
}
