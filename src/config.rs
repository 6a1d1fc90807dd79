use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub reputation: ReputationConfig,
    pub classifier: ClassifierConfig,
    pub resolver: ResolverConfig,
    pub guard: GuardConfig,
    pub thresholds: Thresholds,
    pub evidence: EvidenceConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Hides internal error detail from responses
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub base_url: String,
    // Transport-level ceiling; the classifier call has no other cancellation
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub timeout_ms: u64,
    pub max_redirects: u8,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Also resolve the hostname and reject private addresses it points to.
    /// Off by default: the guard matches hostname strings only.
    pub resolve_hostnames: bool,
}

/// Decision matrix cut-offs. A count at or above the threshold triggers the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub speculative_classifier: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub field_name: String,
    /// Largest width or height, in pixels, an uploaded image may declare
    pub max_dimension: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "0.0.0.0:3000".to_string(),
            production: false,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        ReputationConfig {
            api_key: String::new(),
            base_url: "https://www.virustotal.com/api/v3".to_string(),
            timeout_seconds: 15,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            base_url: "http://127.0.0.1:5055".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            timeout_ms: 5000,
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            malicious: 2,
            suspicious: 2,
            harmless: 4,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_bytes: 5 * 1024 * 1024,
            field_name: "qrfile".to_string(),
            max_dimension: 4096,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fold process environment into the loaded file. Called once at startup;
    /// nothing reads the environment after this.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.reputation.api_key.is_empty() {
            if let Some(key) = lookup("VIRUSTOTAL_API_KEY").filter(|k| !k.is_empty()) {
                self.reputation.api_key = key;
            }
        }

        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = self
                .server
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.listen = format!("{host}:{port}");
        }

        if lookup("QRGUARD_ENV").as_deref() == Some("production") {
            self.server.production = true;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.resolver.timeout_ms == 0 {
            anyhow::bail!("resolver.timeout_ms must be greater than zero");
        }
        if self.classifier.timeout_seconds == 0 || self.reputation.timeout_seconds == 0 {
            anyhow::bail!("client timeouts must be greater than zero");
        }
        let t = &self.thresholds;
        if t.malicious == 0 || t.suspicious == 0 || t.harmless == 0 {
            anyhow::bail!("decision thresholds must be greater than zero");
        }
        if self.upload.max_bytes == 0 {
            anyhow::bail!("upload.max_bytes must be greater than zero");
        }
        if self.upload.max_dimension == 0 {
            anyhow::bail!("upload.max_dimension must be greater than zero");
        }
        Ok(())
    }

    pub fn has_reputation_credential(&self) -> bool {
        !self.reputation.api_key.is_empty()
    }
}
