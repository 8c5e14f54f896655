use crate::AppError;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Default,
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    #[default]
    None,
    ExpectGenEqual,
    ExpectGenGt,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordExistsAction {
    #[default]
    Update,
    UpdateOnly,
    Replace,
    ReplaceOnly,
    CreateOnly,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Zero means no timeout.
    pub timeout: Duration,
    pub max_retries: u32,
    pub sleep_between_retries: Duration,
    pub priority: Priority,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self { timeout: Duration::ZERO, max_retries: 1, sleep_between_retries: Duration::from_millis(500), priority: Priority::Default }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WritePolicy {
    pub base: ReadPolicy,
    /// Seconds, zero leaves the namespace default.
    pub expiration: u32,
    pub generation: u32,
    pub generation_policy: GenerationPolicy,
    pub record_exists_action: RecordExistsAction,
    pub send_key: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPolicy {
    pub base: ReadPolicy,
    pub max_concurrent_threads: u32,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self { base: ReadPolicy::default(), max_concurrent_threads: 1 }
    }
}

/// Policies cached on an entity structure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Policies {
    pub read: ReadPolicy,
    pub write: WritePolicy,
    pub batch: BatchPolicy,
}

impl Policies {
    pub fn fetch(source: &dyn PolicySource, class_name: &str) -> Self {
        Self {
            read: source.read_policy_for(class_name),
            write: source.write_policy_for(class_name),
            batch: source.batch_policy_for(class_name),
        }
    }
}

pub trait PolicySource: Send + Sync {
    fn read_policy_for(&self, class_name: &str) -> ReadPolicy;
    fn write_policy_for(&self, class_name: &str) -> WritePolicy;
    fn batch_policy_for(&self, class_name: &str) -> BatchPolicy;
}

/// Built-in defaults for every class.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPolicySource;

impl PolicySource for DefaultPolicySource {
    fn read_policy_for(&self, _class_name: &str) -> ReadPolicy {
        ReadPolicy::default()
    }
    fn write_policy_for(&self, _class_name: &str) -> WritePolicy {
        WritePolicy::default()
    }
    fn batch_policy_for(&self, _class_name: &str) -> BatchPolicy {
        BatchPolicy::default()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub sleep_between_retries_ms: Option<u64>,
    pub priority: Option<Priority>,
    pub expiration: Option<u32>,
    pub generation: Option<u32>,
    pub generation_policy: Option<GenerationPolicy>,
    pub record_exists_action: Option<RecordExistsAction>,
    pub send_key: Option<bool>,
    pub max_concurrent_threads: Option<u32>,
}

impl PolicyOverrides {
    fn apply_read(&self, policy: &mut ReadPolicy) {
        if let Some(ms) = self.timeout_ms {
            policy.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.max_retries {
            policy.max_retries = n;
        }
        if let Some(ms) = self.sleep_between_retries_ms {
            policy.sleep_between_retries = Duration::from_millis(ms);
        }
        if let Some(p) = self.priority {
            policy.priority = p;
        }
    }

    fn apply_write(&self, policy: &mut WritePolicy) {
        self.apply_read(&mut policy.base);
        if let Some(e) = self.expiration {
            policy.expiration = e;
        }
        if let Some(g) = self.generation {
            policy.generation = g;
        }
        if let Some(gp) = self.generation_policy {
            policy.generation_policy = gp;
        }
        if let Some(a) = self.record_exists_action {
            policy.record_exists_action = a;
        }
        if let Some(s) = self.send_key {
            policy.send_key = s;
        }
    }

    fn apply_batch(&self, policy: &mut BatchPolicy) {
        self.apply_read(&mut policy.base);
        if let Some(t) = self.max_concurrent_threads {
            policy.max_concurrent_threads = t;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub read: PolicyOverrides,
    pub write: PolicyOverrides,
    pub batch: PolicyOverrides,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub defaults: PolicySection,
    /// Keyed by type name, matched ignoring case.
    pub classes: HashMap<String, PolicySection>,
}

impl PolicySettings {
    fn class(&self, class_name: &str) -> Option<&PolicySection> {
        self.classes.iter().find(|(name, _)| name.eq_ignore_ascii_case(class_name)).map(|(_, section)| section)
    }
}

#[derive(Clone, Debug)]
enum Origin {
    Path(String),
    Inline(String),
}

/// Policies read from a settings file (or inline TOML) with `BINMAP__...` environment overrides.
/// Class sections win over `defaults`, which win over the built-in defaults.
pub struct ConfigPolicySource {
    origin: Origin,
    settings: RwLock<PolicySettings>,
}

impl ConfigPolicySource {
    pub fn load(path: &str) -> Result<Self, AppError> {
        let origin = Origin::Path(path.to_string());
        let settings = Self::build(&origin)?;
        Ok(Self { origin, settings: RwLock::new(settings) })
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, AppError> {
        let origin = Origin::Inline(toml.to_string());
        let settings = Self::build(&origin)?;
        Ok(Self { origin, settings: RwLock::new(settings) })
    }

    fn build(origin: &Origin) -> Result<PolicySettings, AppError> {
        let builder = match origin {
            Origin::Path(path) => {
                info!(path = %path, "Reading policy configuration");
                Config::builder().add_source(File::with_name(path).required(true))
            }
            Origin::Inline(toml) => Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        };
        let settings =
            builder
                .add_source(Environment::with_prefix("BINMAP").try_parsing(true).separator("__"))
                .build()?
                .try_deserialize::<PolicySettings>()?;
        Ok(settings)
    }

    /// Re-reads the original source. On failure the previous settings stay in effect.
    pub fn reload(&self) -> Result<(), AppError> {
        let fresh = Self::build(&self.origin)?;
        *self.settings.write()? = fresh;
        Ok(())
    }

    fn with_settings<T>(&self, f: impl FnOnce(&PolicySettings) -> T) -> T {
        match self.settings.read() {
            Ok(settings) => f(&settings),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl PolicySource for ConfigPolicySource {
    fn read_policy_for(&self, class_name: &str) -> ReadPolicy {
        self.with_settings(|s| {
            let mut policy = ReadPolicy::default();
            s.defaults.read.apply_read(&mut policy);
            if let Some(class) = s.class(class_name) {
                class.read.apply_read(&mut policy);
            }
            policy
        })
    }

    fn write_policy_for(&self, class_name: &str) -> WritePolicy {
        self.with_settings(|s| {
            let mut policy = WritePolicy::default();
            s.defaults.write.apply_write(&mut policy);
            if let Some(class) = s.class(class_name) {
                class.write.apply_write(&mut policy);
            }
            policy
        })
    }

    fn batch_policy_for(&self, class_name: &str) -> BatchPolicy {
        self.with_settings(|s| {
            let mut policy = BatchPolicy::default();
            s.defaults.batch.apply_batch(&mut policy);
            if let Some(class) = s.class(class_name) {
                class.batch.apply_batch(&mut policy);
            }
            policy
        })
    }
}
