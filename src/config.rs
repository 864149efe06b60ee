use crate::error::PortError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "portassign.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV_VAR: &str = "PORTASSIGN_CONFIG";

/// Global configuration for port assignment and provisioning
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Registry file locations and port defaults
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Settings for the generated vhost and process descriptor
    #[serde(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Frontend port map (maintained externally, never written here)
    #[serde(default = "default_frontend_map")]
    pub frontend_map: PathBuf,

    /// Backend port map (appended to on every new assignment)
    #[serde(default = "default_backend_map")]
    pub backend_map: PathBuf,

    /// First port handed out when the backend map is empty (default: 3333)
    #[serde(default = "default_backend_port")]
    pub default_backend_port: u16,

    /// Frontend port reported when a subdomain has no frontend entry (default: 3000)
    #[serde(default = "default_frontend_port")]
    pub default_frontend_port: u16,

    /// Highest port the allocator may hand out (default: 65535)
    #[serde(default = "default_max_port")]
    pub max_port: u16,

    /// Hold an advisory lock on the backend map while assigning (default: true)
    #[serde(default = "default_true")]
    pub lock: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            frontend_map: default_frontend_map(),
            backend_map: default_backend_map(),
            default_backend_port: default_backend_port(),
            default_frontend_port: default_frontend_port(),
            max_port: default_max_port(),
            lock: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvisionConfig {
    /// Parent domain; vhosts are served as `<subdomain>.<domain>`
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Directory the vhost file is written to
    #[serde(default = "default_sites_available")]
    pub sites_available: PathBuf,

    /// Directory the vhost symlink is created in
    #[serde(default = "default_sites_enabled")]
    pub sites_enabled: PathBuf,

    /// Parent of each backend release directory
    #[serde(default = "default_releases_dir")]
    pub releases_dir: PathBuf,

    /// Prefix for the process manager app name (default: "api-")
    #[serde(default = "default_process_prefix")]
    pub process_prefix: String,

    /// Subdomain whose frontend port serves versioned builds
    #[serde(default = "default_builder_subdomain")]
    pub builder_subdomain: String,

    /// Subdomains whose vhost routes by version through the backend auth check
    #[serde(default = "default_versioned_hosts")]
    pub versioned_hosts: Vec<String>,

    /// Run `nginx -t` and reload nginx after writing the vhost (default: true)
    #[serde(default = "default_true")]
    pub reload_nginx: bool,

    /// Prefix privileged commands with sudo (default: true)
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            sites_available: default_sites_available(),
            sites_enabled: default_sites_enabled(),
            releases_dir: default_releases_dir(),
            process_prefix: default_process_prefix(),
            builder_subdomain: default_builder_subdomain(),
            versioned_hosts: default_versioned_hosts(),
            reload_nginx: true,
            use_sudo: true,
        }
    }
}

impl ProvisionConfig {
    /// Whether a subdomain gets the version-routing vhost
    pub fn is_versioned(&self, subdomain: &str) -> bool {
        self.versioned_hosts.iter().any(|h| h == subdomain)
    }
}

// Default value functions
fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("/home/ubuntu"))
}

fn default_frontend_map() -> PathBuf {
    home_dir().join("scripts").join("frontend-port-map.txt")
}

fn default_backend_map() -> PathBuf {
    home_dir().join("scripts").join("backend-port-map.txt")
}

fn default_backend_port() -> u16 {
    3333
}

fn default_frontend_port() -> u16 {
    3000
}

fn default_max_port() -> u16 {
    65535
}

fn default_true() -> bool {
    true
}

fn default_domain() -> String {
    "ecstaging.org".to_string()
}

fn default_sites_available() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-available")
}

fn default_sites_enabled() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-enabled")
}

fn default_releases_dir() -> PathBuf {
    home_dir().join("backend").join("releases")
}

fn default_process_prefix() -> String {
    "api-".to_string()
}

fn default_builder_subdomain() -> String {
    "builder".to_string()
}

fn default_versioned_hosts() -> Vec<String> {
    vec!["builder-test".to_string()]
}

impl Config {
    /// Load and validate a config file; a missing file is an error
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PortError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PortError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            PortError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, PortError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate all configuration
    pub fn validate(&self) -> Result<(), PortError> {
        let mut errors = Vec::new();
        let reg = &self.registry;

        if reg.default_backend_port == 0 {
            errors.push("registry.default_backend_port must be greater than 0".to_string());
        }
        if reg.default_frontend_port == 0 {
            errors.push("registry.default_frontend_port must be greater than 0".to_string());
        }
        if reg.default_backend_port > reg.max_port {
            errors.push(format!(
                "registry.default_backend_port ({}) exceeds registry.max_port ({})",
                reg.default_backend_port, reg.max_port
            ));
        }
        if reg.frontend_map.as_os_str().is_empty() {
            errors.push("registry.frontend_map must not be empty".to_string());
        }
        if reg.backend_map.as_os_str().is_empty() {
            errors.push("registry.backend_map must not be empty".to_string());
        }
        if self.provision.domain.trim().is_empty() {
            errors.push("provision.domain must not be empty".to_string());
        }

        if !errors.is_empty() {
            return Err(PortError::Config(format!(
                "Configuration errors:\n  - {}",
                errors.join("\n  - ")
            )));
        }

        Ok(())
    }
}
