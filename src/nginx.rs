//! Nginx virtual host generation
//!
//! Renders one `server` block per tenant subdomain, writes it to
//! `sites-available`, links it into `sites-enabled`, then validates and reloads
//! nginx.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Headers shared by every proxied websocket-capable location
const PROXY_HEADERS: &str = "    proxy_http_version 1.1;
    proxy_set_header Upgrade $http_upgrade;
    proxy_set_header Connection 'upgrade';
    proxy_set_header Host $host;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_set_header Accept-Encoding \"\";
    proxy_set_header Proxy \"\";
    proxy_cache_bypass $http_upgrade;
";

/// Resolved ports for one vhost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostSpec {
    pub subdomain: String,
    pub domain: String,
    pub frontend_port: u16,
    pub backend_port: u16,
    /// Set for versioned hosts: frontend port of the builder deployment
    pub builder_port: Option<u16>,
}

impl VhostSpec {
    /// `<subdomain>.<domain>`, also used as the vhost file name
    pub fn server_name(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain)
    }

    pub fn is_versioned(&self) -> bool {
        self.builder_port.is_some()
    }
}

/// Render the nginx configuration for a vhost
pub fn render_vhost(spec: &VhostSpec) -> String {
    let fport = spec.frontend_port;
    let bport = spec.backend_port;
    let mut out = String::new();

    if let Some(builder_port) = spec.builder_port {
        let _ = write!(
            out,
            "map $version $proxy_target {{\n  \
             1       http://localhost:{fport};\n  \
             2       http://127.0.0.1:{builder_port};\n  \
             default http://localhost:{fport};\n\
             }}\n\n"
        );
    }

    let _ = write!(
        out,
        "server {{\n  listen 80;\n\n  server_name {};\n\n",
        spec.server_name()
    );

    if spec.is_versioned() {
        let _ = write!(
            out,
            "  location ^~ /_next/ {{\n    \
             proxy_pass http://localhost:{fport};\n    \
             proxy_set_header Host $host;\n    \
             proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n    \
             proxy_set_header X-Forwarded-Proto $scheme;\n  \
             }}\n\n  \
             location / {{\n    \
             auth_request /auth;\n    \
             auth_request_set $version $upstream_http_x_version;\n    \
             proxy_pass $proxy_target;\n\
             {PROXY_HEADERS}  \
             }}\n\n  \
             location = /auth {{\n    \
             internal;\n    \
             proxy_pass http://localhost:{bport}/tma/auth/check-version?host=$host&uri=https://$host$request_uri;\n    \
             proxy_pass_request_body on;\n    \
             proxy_set_header Content-Length \"\";\n    \
             proxy_set_header X-Original-URI $request_uri;\n  \
             }}\n\n"
        );
    } else {
        let _ = write!(
            out,
            "  location / {{\n    \
             proxy_pass http://localhost:{fport}/;\n\
             {PROXY_HEADERS}  \
             }}\n\n"
        );
    }

    let _ = write!(
        out,
        "  location /api/ {{\n    \
         rewrite ^/api/(.*) /$1 break;\n    \
         proxy_pass http://localhost:{bport}/;\n\
         {PROXY_HEADERS}  \
         }}\n\n  \
         location /ezy-scorm-files/ {{\n    \
         proxy_pass https://ezyscorm.b-cdn.net/;\n    \
         proxy_http_version 1.1;\n    \
         proxy_set_header Host \"ezyscorm.b-cdn.net\";\n    \
         proxy_set_header X-Real-IP $remote_addr;\n    \
         proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n    \
         proxy_set_header X-Forwarded-Proto $scheme;\n    \
         proxy_set_header Upgrade $http_upgrade;\n    \
         proxy_set_header Connection 'upgrade';\n    \
         proxy_cache_bypass $http_upgrade;\n    \
         proxy_ignore_headers \"Cache-Control\" \"Expires\";\n  \
         }}\n}}\n"
    );

    out
}

/// A rendered vhost ready to be installed
#[derive(Debug, Clone)]
pub struct NginxSite {
    file_name: String,
    content: String,
}

impl NginxSite {
    pub fn new(spec: &VhostSpec) -> Self {
        Self {
            file_name: spec.server_name(),
            content: render_vhost(spec),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Write the vhost into `sites_available`, replacing any previous version
    pub fn write(&self, sites_available: &Path) -> Result<PathBuf> {
        let path = sites_available.join(&self.file_name);
        info!(path = %path.display(), "Writing nginx config");
        std::fs::write(&path, &self.content)
            .with_context(|| format!("Failed to write nginx config {}", path.display()))?;
        Ok(path)
    }

    /// Link the vhost into `sites_enabled`. Returns false if the link already existed.
    #[cfg(unix)]
    pub fn enable(&self, sites_available: &Path, sites_enabled: &Path) -> Result<bool> {
        let target = sites_available.join(&self.file_name);
        let link = sites_enabled.join(&self.file_name);

        match std::os::unix::fs::symlink(&target, &link) {
            Ok(()) => {
                info!(link = %link.display(), target = %target.display(), "Symbolic link created");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(link = %link.display(), "Symbolic link already exists, skipping creation");
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create symbolic link {}", link.display())),
        }
    }

    #[cfg(not(unix))]
    pub fn enable(&self, _sites_available: &Path, _sites_enabled: &Path) -> Result<bool> {
        anyhow::bail!("Enabling nginx sites requires a unix host")
    }
}

/// Runs nginx validation and reload commands
#[derive(Debug, Clone)]
pub struct NginxControl {
    use_sudo: bool,
}

impl NginxControl {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    /// Argument vector for a privileged command, `sudo`-prefixed when configured
    pub fn command_line(&self, program: &str, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if self.use_sudo {
            argv.push("sudo".to_string());
        }
        argv.push(program.to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// `nginx -t`
    pub async fn test_config(&self) -> Result<()> {
        let stdout = self.run("nginx", &["-t"]).await.context("NGINX config test failed")?;
        info!(output = %stdout.trim(), "NGINX config test passed");
        Ok(())
    }

    /// `systemctl reload nginx`
    pub async fn reload(&self) -> Result<()> {
        self.run("systemctl", &["reload", "nginx"])
            .await
            .context("Error reloading NGINX")?;
        info!("NGINX reloaded");
        Ok(())
    }

    /// `nginx -t`, then reload only if the test passed
    pub async fn test_and_reload(&self) -> Result<()> {
        self.test_config().await?;
        self.reload().await
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let argv = self.command_line(program, args);
        debug!(command = %argv.join(" "), "Running command");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", argv.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                argv.join(" "),
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(builder_port: Option<u16>) -> VhostSpec {
        VhostSpec {
            subdomain: "acme".to_string(),
            domain: "ecstaging.org".to_string(),
            frontend_port: 3001,
            backend_port: 3333,
            builder_port,
        }
    }

    #[test]
    fn test_server_name() {
        assert_eq!(spec(None).server_name(), "acme.ecstaging.org");
    }

    #[test]
    fn test_render_plain_vhost() {
        let conf = render_vhost(&spec(None));

        assert!(conf.starts_with("server {\n  listen 80;"));
        assert!(conf.contains("server_name acme.ecstaging.org;"));
        assert!(conf.contains("proxy_pass http://localhost:3001/;"));
        assert!(conf.contains("location /api/ {"));
        assert!(conf.contains("rewrite ^/api/(.*) /$1 break;"));
        assert!(conf.contains("proxy_pass http://localhost:3333/;"));
        assert!(conf.contains("location /ezy-scorm-files/ {"));
        assert!(!conf.contains("map $version"));
        assert!(!conf.contains("auth_request"));
        assert!(conf.ends_with("}\n"));
    }

    #[test]
    fn test_render_versioned_vhost() {
        let conf = render_vhost(&spec(Some(3100)));

        assert!(conf.starts_with("map $version $proxy_target {"));
        assert!(conf.contains("2       http://127.0.0.1:3100;"));
        assert!(conf.contains("default http://localhost:3001;"));
        assert!(conf.contains("location ^~ /_next/ {"));
        assert!(conf.contains("auth_request /auth;"));
        assert!(conf.contains("proxy_pass $proxy_target;"));
        assert!(conf.contains(
            "proxy_pass http://localhost:3333/tma/auth/check-version?host=$host&uri=https://$host$request_uri;"
        ));
    }

    #[test]
    fn test_braces_balanced() {
        for s in [spec(None), spec(Some(3100))] {
            let conf = render_vhost(&s);
            assert_eq!(conf.matches('{').count(), conf.matches('}').count());
        }
    }

    #[test]
    fn test_write_site() {
        let tmp = TempDir::new().unwrap();
        let site = NginxSite::new(&spec(None));
        let path = site.write(tmp.path()).unwrap();

        assert_eq!(path, tmp.path().join("acme.ecstaging.org"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), site.content());
    }

    #[cfg(unix)]
    #[test]
    fn test_enable_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let available = tmp.path().join("sites-available");
        let enabled = tmp.path().join("sites-enabled");
        std::fs::create_dir_all(&available).unwrap();
        std::fs::create_dir_all(&enabled).unwrap();

        let site = NginxSite::new(&spec(None));
        site.write(&available).unwrap();

        assert!(site.enable(&available, &enabled).unwrap());
        assert!(!site.enable(&available, &enabled).unwrap());

        let link = enabled.join(site.file_name());
        assert_eq!(std::fs::read_link(&link).unwrap(), available.join(site.file_name()));
    }

    #[test]
    fn test_command_line_sudo() {
        let with_sudo = NginxControl::new(true);
        assert_eq!(with_sudo.command_line("nginx", &["-t"]), vec!["sudo", "nginx", "-t"]);

        let without = NginxControl::new(false);
        assert_eq!(
            without.command_line("systemctl", &["reload", "nginx"]),
            vec!["systemctl", "reload", "nginx"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_reports_error() {
        let control = NginxControl::new(false);
        let err = control
            .run("portassign-test-no-such-binary", &[])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to run portassign-test-no-such-binary"));
    }
}
