//! PM2 ecosystem file for a tenant backend

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name PM2 looks for in the release directory
pub const ECOSYSTEM_FILE: &str = "ecosystem.config.js";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessDescriptor {
    pub apps: Vec<AppDescriptor>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppDescriptor {
    pub name: String,
    pub script: String,
    pub cwd: PathBuf,
    pub instances: String,
    pub exec_mode: String,
    pub autorestart: bool,
    pub max_memory_restart: String,
    pub env: BTreeMap<String, serde_json::Value>,
}

impl ProcessDescriptor {
    /// Single clustered `server.js` app listening on `port`
    pub fn new(name: &str, cwd: &Path, port: u16) -> Self {
        let mut env = BTreeMap::new();
        env.insert("PORT".to_string(), serde_json::Value::from(port));

        Self {
            apps: vec![AppDescriptor {
                name: name.to_string(),
                script: "server.js".to_string(),
                cwd: cwd.to_path_buf(),
                instances: "1".to_string(),
                exec_mode: "cluster".to_string(),
                autorestart: true,
                max_memory_restart: "1000M".to_string(),
                env,
            }],
        }
    }

    /// `module.exports = {...}`
    pub fn render(&self) -> Result<String> {
        let json = serde_json::to_string(self).context("Failed to serialize PM2 config")?;
        Ok(format!("module.exports = {}", json))
    }

    /// Write `ecosystem.config.js` into `dir`, creating the directory if needed
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create release directory {}", dir.display()))?;

        let path = dir.join(ECOSYSTEM_FILE);
        std::fs::write(&path, self.render()?)
            .with_context(|| format!("Failed to write PM2 config {}", path.display()))?;

        info!(path = %path.display(), "PM2 config written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_descriptor_fields() {
        let desc = ProcessDescriptor::new("api-acme", Path::new("/srv/releases/acme"), 3333);
        let app = &desc.apps[0];

        assert_eq!(desc.apps.len(), 1);
        assert_eq!(app.name, "api-acme");
        assert_eq!(app.script, "server.js");
        assert_eq!(app.instances, "1");
        assert_eq!(app.exec_mode, "cluster");
        assert!(app.autorestart);
        assert_eq!(app.max_memory_restart, "1000M");
        assert_eq!(app.env.get("PORT"), Some(&serde_json::json!(3333)));
    }

    #[test]
    fn test_render() {
        let desc = ProcessDescriptor::new("api-acme", Path::new("/srv/releases/acme"), 3333);
        let rendered = desc.render().unwrap();

        let json = rendered.strip_prefix("module.exports = ").unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["apps"][0]["cwd"], "/srv/releases/acme");
        assert_eq!(value["apps"][0]["env"]["PORT"], 3333);
    }

    #[test]
    fn test_write_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("releases").join("acme");
        let desc = ProcessDescriptor::new("api-acme", &dir, 3334);

        let path = desc.write(&dir).unwrap();
        assert_eq!(path, dir.join(ECOSYSTEM_FILE));
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("\"PORT\":3334"));
    }
}
