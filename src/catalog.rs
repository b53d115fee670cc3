// src/catalog.rs
//
// Discovery and parsing of IPsec configuration files. The catalog is rebuilt
// wholesale on every load; nothing here mutates a previous snapshot.
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{DEFAULT_IPSEC_CONF, DEFAULT_IPSEC_CONF_DIR};

/// Sentinel returned when none of the address attributes are present.
pub const SERVER_ADDRESS_NOT_FOUND: &str = "Server address not found";

/// Parsed view of one `conn <name>` stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDetails {
    pub name: String,
    pub source_file: PathBuf,
    pub server_address: String,
    pub attributes: HashMap<String, String>,
}

impl ConnectionDetails {
    /// Empty-detail result for a name no config file declares.
    pub fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_file: PathBuf::new(),
            server_address: SERVER_ADDRESS_NOT_FOUND.to_string(),
            attributes: HashMap::new(),
        }
    }
}

/// Ordered connection names plus a name -> source file lookup.
///
/// When the same name is declared in more than one file, the first file in
/// discovery order wins.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCatalog {
    names: Vec<String>,
    sources: HashMap<String, PathBuf>,
}

impl ConnectionCatalog {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }
}

/// Locates IPsec configuration files and extracts connection definitions.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    primary: PathBuf,
    fragment_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(primary: PathBuf, fragment_dir: PathBuf) -> Self {
        Self {
            primary,
            fragment_dir,
        }
    }

    pub fn system_default() -> Self {
        Self::new(
            PathBuf::from(DEFAULT_IPSEC_CONF),
            PathBuf::from(DEFAULT_IPSEC_CONF_DIR),
        )
    }

    /// Primary config file first, then every `.conf` file in the fragment
    /// directory in enumeration order. Missing paths are not an error; files
    /// that do not exist simply parse to nothing later.
    pub fn list_config_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.primary.clone()];
        if let Ok(entries) = fs::read_dir(&self.fragment_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("conf") {
                    files.push(path);
                }
            }
        }
        files
    }

    /// Rebuilds the catalog from scratch.
    pub fn load_catalog(&self) -> ConnectionCatalog {
        let mut catalog = ConnectionCatalog::default();
        for file in self.list_config_files() {
            for name in parse_connection_names(&file) {
                if !catalog.sources.contains_key(&name) {
                    catalog.names.push(name.clone());
                    catalog.sources.insert(name, file.clone());
                }
            }
        }
        debug!(
            "catalog reload: {} connection(s) from {} and {}",
            catalog.names.len(),
            self.primary.display(),
            self.fragment_dir.display()
        );
        catalog
    }

    /// First file in discovery order that declares `conn <name>`.
    pub fn find_file_containing(&self, name: &str) -> Option<PathBuf> {
        self.list_config_files().into_iter().find(|file| {
            fs::read_to_string(file)
                .map(|content| declares_connection(&content, name))
                .unwrap_or(false)
        })
    }

    /// Full detail lookup; `None` when no file declares the connection.
    pub fn details(&self, name: &str) -> Option<ConnectionDetails> {
        let source_file = self.find_file_containing(name)?;
        let attributes = extract_section(&source_file, name);
        let server_address = server_address(&attributes);
        Some(ConnectionDetails {
            name: name.to_string(),
            source_file,
            server_address,
            attributes,
        })
    }
}

/// Scans a file for `conn <name>` declarations. A missing or unreadable file
/// yields an empty list.
pub fn parse_connection_names(file: &Path) -> Vec<String> {
    let Ok(content) = fs::read_to_string(file) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(connection_name_of_line)
        .map(str::to_string)
        .collect()
}

/// Extracts the `key = value` attributes between `conn <name>` and the next
/// `conn` declaration (or end of file). Malformed lines are skipped. Within
/// a section the last occurrence of a key wins.
pub fn extract_section(file: &Path, name: &str) -> HashMap<String, String> {
    let Ok(content) = fs::read_to_string(file) else {
        return HashMap::new();
    };

    let mut attributes = HashMap::new();
    let mut in_section = false;
    for line in content.lines() {
        match connection_name_of_line(line) {
            Some(declared) if declared == name => {
                in_section = true;
                continue;
            }
            Some(_) if in_section => break,
            _ => {}
        }
        if in_section
            && let Some((key, value)) = parse_attribute_line(line)
        {
            attributes.insert(key, value);
        }
    }
    attributes
}

/// Resolves the server address from a connection's attributes:
/// `right`, else `alsoip`, else the network part of `rightsubnet`.
/// The precedence reflects common IPsec config idioms; do not reorder.
pub fn server_address(attributes: &HashMap<String, String>) -> String {
    if let Some(right) = attributes.get("right") {
        return right.clone();
    }
    if let Some(alsoip) = attributes.get("alsoip") {
        return alsoip.clone();
    }
    if let Some(subnet) = attributes.get("rightsubnet") {
        return subnet.split('/').next().unwrap_or(subnet).to_string();
    }
    SERVER_ADDRESS_NOT_FOUND.to_string()
}

fn declares_connection(content: &str, name: &str) -> bool {
    content
        .lines()
        .any(|line| connection_name_of_line(line) == Some(name))
}

/// `conn <name>` anchored at line start (leading whitespace allowed), name
/// bounded by whitespace, `#` or end of line. Names starting with `#` are
/// excluded.
fn connection_name_of_line(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("conn")?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let token = rest.trim_start();
    let end = token
        .find(|c: char| c.is_whitespace() || c == '#')
        .unwrap_or(token.len());
    let name = &token[..end];
    if name.is_empty() || name.starts_with('#') {
        None
    } else {
        Some(name)
    }
}

/// One `key = value` line, trimmed, with trailing same-line comments
/// stripped. Comment-only, blank and malformed lines yield `None`.
fn parse_attribute_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    let value = match value.find('#') {
        Some(pos) => &value[..pos],
        None => value,
    };
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    struct TempTree {
        root: PathBuf,
    }

    impl TempTree {
        fn new(label: &str) -> Self {
            let root = std::env::temp_dir().join(format!("ipsec-gui-{}-{}", label, std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("ipsec.d")).unwrap();
            Self { root }
        }

        fn primary(&self) -> PathBuf {
            self.root.join("ipsec.conf")
        }

        fn fragment_dir(&self) -> PathBuf {
            self.root.join("ipsec.d")
        }

        fn store(&self) -> ConfigStore {
            ConfigStore::new(self.primary(), self.fragment_dir())
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn round_trip_single_connection() {
        let tree = TempTree::new("roundtrip");
        fs::write(
            tree.primary(),
            "config setup\n    charondebug=\"ike 1\"\n\nconn demo\n    right=1.2.3.4\n    authby=secret\n",
        )
        .unwrap();

        let store = tree.store();
        let catalog = store.load_catalog();
        assert_eq!(catalog.names(), ["demo".to_string()]);

        let details = store.details("demo").unwrap();
        assert_eq!(details.attributes.get("right").unwrap(), "1.2.3.4");
        assert_eq!(details.server_address, "1.2.3.4");
        assert_eq!(details.source_file, tree.primary());
    }

    #[test]
    fn absent_name_yields_no_file_and_sentinel_details() {
        let tree = TempTree::new("absent");
        fs::write(tree.primary(), "conn demo\n    right=1.2.3.4\n").unwrap();

        let store = tree.store();
        assert!(store.find_file_containing("ghost").is_none());
        assert!(store.details("ghost").is_none());

        let fallback = ConnectionDetails::not_found("ghost");
        assert_eq!(fallback.server_address, SERVER_ADDRESS_NOT_FOUND);
        assert!(fallback.attributes.is_empty());
    }

    #[test]
    fn missing_paths_parse_to_nothing() {
        let store = ConfigStore::new(
            PathBuf::from("/nonexistent/ipsec.conf"),
            PathBuf::from("/nonexistent/ipsec.d"),
        );
        assert!(store.load_catalog().is_empty());
        assert!(store.find_file_containing("demo").is_none());
    }

    #[test]
    fn fragment_files_follow_primary_and_first_match_wins() {
        let tree = TempTree::new("fragments");
        fs::write(tree.primary(), "conn office\n    right=10.0.0.1\n").unwrap();
        fs::write(
            tree.fragment_dir().join("extra.conf"),
            "conn office\n    right=10.9.9.9\nconn lab\n    right=10.0.0.2\n",
        )
        .unwrap();
        fs::write(tree.fragment_dir().join("notes.txt"), "conn ignored\n").unwrap();

        let store = tree.store();
        let catalog = store.load_catalog();
        assert!(catalog.contains("office"));
        assert!(catalog.contains("lab"));
        assert!(!catalog.contains("ignored"));

        // "office" is declared in both files; the primary file wins.
        assert_eq!(store.find_file_containing("office").unwrap(), tree.primary());
        let details = store.details("office").unwrap();
        assert_eq!(details.server_address, "10.0.0.1");
    }

    #[test]
    fn name_is_not_matched_as_prefix_of_longer_name() {
        let tree = TempTree::new("prefix");
        fs::write(
            tree.primary(),
            "conn demo-backup\n    right=5.6.7.8\nconn demo\n    right=1.2.3.4\n",
        )
        .unwrap();

        let store = tree.store();
        let details = store.details("demo").unwrap();
        assert_eq!(details.server_address, "1.2.3.4");

        let backup = store.details("demo-backup").unwrap();
        assert_eq!(backup.server_address, "5.6.7.8");
    }

    #[test]
    fn section_parsing_skips_comments_and_malformed_lines() {
        let tree = TempTree::new("comments");
        fs::write(
            tree.primary(),
            concat!(
                "conn demo\n",
                "    # full comment line\n",
                "    right = 1.2.3.4  # gateway\n",
                "    ike=aes256-sha1-modp1024\n",
                "    ike=aes256-sha256-modp2048\n",
                "    not a key value line\n",
                "    =orphan\n",
                "\n",
                "conn other\n",
                "    right=9.9.9.9\n",
            ),
        )
        .unwrap();

        let attributes = extract_section(&tree.primary(), "demo");
        assert_eq!(attributes.get("right").unwrap(), "1.2.3.4");
        // Last occurrence of a duplicated key wins.
        assert_eq!(attributes.get("ike").unwrap(), "aes256-sha256-modp2048");
        assert!(!attributes.contains_key("not a key value line"));
        assert!(attributes.values().all(|v| v != "9.9.9.9"));
    }

    #[test]
    fn commented_out_conn_lines_are_excluded() {
        let tree = TempTree::new("commented");
        fs::write(
            tree.primary(),
            "#conn disabled\n  # conn alsodisabled\nconn live # trailing\n    right=1.1.1.1\n",
        )
        .unwrap();

        let names = parse_connection_names(&tree.primary());
        assert_eq!(names, ["live".to_string()]);
    }

    #[test]
    fn server_address_precedence() {
        let mut attributes = HashMap::new();
        assert_eq!(server_address(&attributes), SERVER_ADDRESS_NOT_FOUND);

        attributes.insert("rightsubnet".to_string(), "192.168.10.0/24".to_string());
        assert_eq!(server_address(&attributes), "192.168.10.0");

        attributes.insert("alsoip".to_string(), "172.16.0.1".to_string());
        assert_eq!(server_address(&attributes), "172.16.0.1");

        attributes.insert("right".to_string(), "vpn.example.com".to_string());
        assert_eq!(server_address(&attributes), "vpn.example.com");
    }
}
