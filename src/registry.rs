//! Line-oriented port registries
//!
//! Each registry is a text file with one `<port> <subdomain>` mapping per line.
//! Lines whose port field does not parse are skipped during scans so that manual
//! edits cannot break lookups. The only write is a single-line append.

use crate::error::{PortError, Step};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A persisted `<port> <subdomain>` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub port: u16,
    pub subdomain: String,
}

impl PortMapping {
    /// Create a mapping, rejecting tokens that would corrupt the line format
    pub fn new(port: u16, subdomain: &str) -> Result<Self, PortError> {
        if port == 0 {
            return Err(PortError::InvalidArgument("port must be greater than 0".into()));
        }
        Self::validate_subdomain(subdomain)?;
        Ok(Self {
            port,
            subdomain: subdomain.to_string(),
        })
    }

    /// A subdomain must be a single non-empty token to round-trip through a line
    pub fn validate_subdomain(subdomain: &str) -> Result<(), PortError> {
        if subdomain.is_empty() {
            return Err(PortError::InvalidArgument("subdomain is empty".into()));
        }
        if subdomain.chars().any(char::is_whitespace) {
            return Err(PortError::InvalidArgument(format!(
                "subdomain '{}' contains whitespace",
                subdomain
            )));
        }
        Ok(())
    }

    /// Parse one registry line. Returns `None` for blank or malformed lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }

        let mut fields = line.split(' ');
        let port_field = fields.next()?;
        let subdomain = fields.next().unwrap_or("");

        match port_field.parse::<u16>() {
            Ok(port) if port > 0 => Some(Self {
                port,
                subdomain: subdomain.to_string(),
            }),
            _ => {
                debug!(line = %line, "Skipping malformed registry line");
                None
            }
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.port, self.subdomain)
    }
}

/// Held for the duration of a read-modify-append sequence; releases on drop
#[derive(Debug)]
pub struct RegistryGuard {
    file: Option<File>,
}

impl RegistryGuard {
    /// A guard that holds nothing (in-memory stores, locking disabled)
    pub fn unlocked() -> Self {
        Self { file: None }
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }
}

/// Storage behind a port registry
///
/// Implementors only need [`mappings`](RegistryStore::mappings) and
/// [`append`](RegistryStore::append); the queries are derived from the scan.
pub trait RegistryStore {
    /// Human-readable location, used in logs and errors
    fn location(&self) -> PathBuf;

    /// All parsable mappings in append order. A missing store is empty.
    fn mappings(&self) -> Result<Vec<PortMapping>, PortError>;

    /// Append one mapping
    fn append(&mut self, mapping: &PortMapping) -> Result<(), PortError>;

    /// Take an exclusive lock across processes sharing this store
    fn lock_exclusive(&self) -> Result<RegistryGuard, PortError> {
        Ok(RegistryGuard::unlocked())
    }

    /// Port of the first mapping whose subdomain equals `subdomain` exactly
    fn lookup(&self, subdomain: &str) -> Result<Option<u16>, PortError> {
        Ok(self
            .mappings()?
            .into_iter()
            .find(|m| m.subdomain == subdomain)
            .map(|m| m.port))
    }

    /// Whether any mapping holds `port`
    fn is_port_claimed(&self, port: u16) -> Result<bool, PortError> {
        Ok(self.mappings()?.iter().any(|m| m.port == port))
    }

    /// Highest parsable port, or `None` when there is none
    fn max_port(&self) -> Result<Option<u16>, PortError> {
        Ok(self.mappings()?.iter().map(|m| m.port).max())
    }
}

/// Registry backed by a text file
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file used for advisory locking: `<registry>.lock`
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn read(&self) -> Result<Vec<u8>, PortError> {
        match std::fs::read(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(PortError::io(Step::Lookup, &self.path, e)),
        }
    }
}

impl RegistryStore for FileRegistry {
    fn location(&self) -> PathBuf {
        self.path.clone()
    }

    fn mappings(&self) -> Result<Vec<PortMapping>, PortError> {
        let content = self.read()?;
        let mappings = content
            .split(|b| *b == b'\n')
            .filter_map(|raw| match std::str::from_utf8(raw) {
                Ok(line) => PortMapping::parse_line(line),
                Err(_) => {
                    debug!(line = %String::from_utf8_lossy(raw), "Skipping non-UTF-8 registry line");
                    None
                }
            })
            .collect();
        Ok(mappings)
    }

    fn append(&mut self, mapping: &PortMapping) -> Result<(), PortError> {
        let persist_err = |e| PortError::io(Step::Persist, &self.path, e);

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(persist_err)?;

        // A hand-edited file may lack a trailing newline
        let needs_newline = if file.metadata().map_err(persist_err)?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).map_err(persist_err)?;
            file.read_exact(&mut last).map_err(persist_err)?;
            last[0] != b'\n'
        } else {
            false
        };

        let line = if needs_newline {
            format!("\n{}\n", mapping)
        } else {
            format!("{}\n", mapping)
        };

        // One write per line so a crash cannot interleave partial lines
        file.write_all(line.as_bytes()).map_err(persist_err)?;
        file.sync_data().map_err(persist_err)?;

        debug!(path = %self.path.display(), mapping = %mapping, "Appended registry line");
        Ok(())
    }

    #[cfg(unix)]
    fn lock_exclusive(&self) -> Result<RegistryGuard, PortError> {
        use std::os::unix::io::AsRawFd;

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| PortError::io(Step::Lookup, &lock_path, e))?;

        // Blocks until any other assigner releases the lock
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            return Err(PortError::io(Step::Lookup, &lock_path, err));
        }

        debug!(path = %lock_path.display(), "Registry lock acquired");
        Ok(RegistryGuard { file: Some(file) })
    }
}

/// Registry held in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    lines: Vec<String>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with raw lines, malformed ones included
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.as_ref().to_string()).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl RegistryStore for MemoryRegistry {
    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }

    fn mappings(&self) -> Result<Vec<PortMapping>, PortError> {
        Ok(self
            .lines
            .iter()
            .filter_map(|l| PortMapping::parse_line(l))
            .collect())
    }

    fn append(&mut self, mapping: &PortMapping) -> Result<(), PortError> {
        self.lines.push(mapping.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            PortMapping::parse_line("3333 acme"),
            Some(PortMapping { port: 3333, subdomain: "acme".into() })
        );
        assert_eq!(
            PortMapping::parse_line("3334 beta\r").map(|m| m.subdomain),
            Some("beta".to_string())
        );
        assert_eq!(PortMapping::parse_line("notaport foo"), None);
        assert_eq!(PortMapping::parse_line(""), None);
        assert_eq!(PortMapping::parse_line("   "), None);
        assert_eq!(PortMapping::parse_line("70000 big"), None);
        assert_eq!(PortMapping::parse_line("0 zero"), None);
    }

    #[test]
    fn test_mapping_rejects_bad_tokens() {
        assert!(PortMapping::new(3333, "").is_err());
        assert!(PortMapping::new(3333, "two words").is_err());
        assert!(PortMapping::new(0, "acme").is_err());
        assert_eq!(PortMapping::new(3333, "acme").unwrap().to_string(), "3333 acme");

        assert!(PortMapping::validate_subdomain("acme-corp").is_ok());
        assert!(matches!(
            PortMapping::validate_subdomain("a\tb"),
            Err(PortError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_lookup_first_match_case_sensitive() {
        let reg = MemoryRegistry::from_lines(&["3333 acme", "3334 Acme", "3335 acme"]);
        assert_eq!(reg.lookup("acme").unwrap(), Some(3333));
        assert_eq!(reg.lookup("Acme").unwrap(), Some(3334));
        assert_eq!(reg.lookup("ACME").unwrap(), None);
    }

    #[test]
    fn test_is_port_claimed_compares_integers() {
        let reg = MemoryRegistry::from_lines(&["300 wide", "3000 site"]);
        assert!(reg.is_port_claimed(300).unwrap());
        assert!(reg.is_port_claimed(3000).unwrap());
        assert!(!reg.is_port_claimed(30).unwrap());
        assert!(!reg.is_port_claimed(30000).unwrap());
    }

    #[test]
    fn test_max_port_skips_malformed() {
        let reg = MemoryRegistry::from_lines(&["notaport foo", "3333 acme"]);
        assert_eq!(reg.max_port().unwrap(), Some(3333));

        let only_bad = MemoryRegistry::from_lines(&["x y", ""]);
        assert_eq!(only_bad.max_port().unwrap(), None);
        assert_eq!(MemoryRegistry::new().max_port().unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let reg = FileRegistry::new(tmp.path().join("absent.txt"));
        assert!(reg.mappings().unwrap().is_empty());
        assert_eq!(reg.lookup("acme").unwrap(), None);
        assert_eq!(reg.max_port().unwrap(), None);
        assert!(!reg.is_port_claimed(3333).unwrap());
    }

    #[test]
    fn test_file_append_and_scan() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backend-port-map.txt");
        let mut reg = FileRegistry::new(&path);

        reg.append(&PortMapping::new(3333, "acme").unwrap()).unwrap();
        reg.append(&PortMapping::new(3334, "beta").unwrap()).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3333 acme\n3334 beta\n");
        assert_eq!(reg.lookup("beta").unwrap(), Some(3334));
        assert_eq!(reg.max_port().unwrap(), Some(3334));
    }

    #[test]
    fn test_append_repairs_missing_trailing_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backend-port-map.txt");
        std::fs::write(&path, "3333 acme").unwrap();

        let mut reg = FileRegistry::new(&path);
        reg.append(&PortMapping::new(3334, "beta").unwrap()).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3333 acme\n3334 beta\n");
    }

    #[test]
    fn test_append_to_unwritable_location_fails() {
        let tmp = TempDir::new().unwrap();
        let mut reg = FileRegistry::new(tmp.path().join("missing-dir").join("map.txt"));
        let err = reg.append(&PortMapping::new(3333, "acme").unwrap()).unwrap_err();
        assert!(matches!(err, PortError::Io { step: Step::Persist, .. }));
    }

    #[test]
    fn test_read_error_is_not_absent() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be read as a file
        let reg = FileRegistry::new(tmp.path());
        let err = reg.lookup("acme").unwrap_err();
        assert!(matches!(err, PortError::Io { step: Step::Lookup, .. }));
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backend-port-map.txt");
        std::fs::write(&path, b"3333 acme\n\xff\xfe garbage\n3335 caf\xc3\xa9\n").unwrap();

        let reg = FileRegistry::new(&path);
        assert_eq!(reg.lookup("acme").unwrap(), Some(3333));
        assert_eq!(reg.lookup("caf\u{e9}").unwrap(), Some(3335));
        assert_eq!(reg.mappings().unwrap().len(), 2);
        assert_eq!(reg.max_port().unwrap(), Some(3335));
    }

    #[test]
    fn test_lock_path() {
        let reg = FileRegistry::new("/srv/maps/backend-port-map.txt");
        assert_eq!(reg.lock_path(), PathBuf::from("/srv/maps/backend-port-map.txt.lock"));
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_exclusive_creates_lock_file() {
        let tmp = TempDir::new().unwrap();
        let reg = FileRegistry::new(tmp.path().join("backend-port-map.txt"));
        let guard = reg.lock_exclusive().unwrap();
        assert!(guard.is_locked());
        assert!(reg.lock_path().exists());
        drop(guard);

        // Re-acquirable once released
        assert!(reg.lock_exclusive().unwrap().is_locked());
    }

    #[test]
    fn test_memory_store_is_unlocked() {
        let reg = MemoryRegistry::new();
        assert!(!reg.lock_exclusive().unwrap().is_locked());
    }
}
