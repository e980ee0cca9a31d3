//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the metadata store lifecycle manager."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Node environment file: `KEY="value"` lines shared with the service units.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::{IoResultExt, Result};

/// Proxy mode flag, `on` or `off`.
pub const ENV_PROXY: &str = "ETCD_PROXY";
pub const ENV_MEMBER_NAME: &str = "ETCD_MEMBER_NAME";
pub const ENV_INITIAL_CLUSTER: &str = "ETCD_INITIAL_CLUSTER";
pub const ENV_INITIAL_CLUSTER_STATE: &str = "ETCD_INITIAL_CLUSTER_STATE";

pub const PROXY_ON: &str = "on";
pub const PROXY_OFF: &str = "off";

/// Ordered key/value view of the node environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeEnvironment {
    vars: IndexMap<String, String>,
}

impl NodeEnvironment {
    /// Read the environment file. A missing file is reported as not found.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .or_system(|| format!("reading node environment {}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    /// Parse file contents. Blank lines, comments and lines without `=` are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut vars = IndexMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            vars.insert(key.to_owned(), unquote(value.trim()).to_owned());
        }
        Self { vars }
    }

    /// Persist the environment, replacing the file contents.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .or_system(|| format!("creating directory {}", parent.display()))?;
        }
        fs::write(path, self.render())
            .or_system(|| format!("writing node environment {}", path.display()))
    }

    pub fn render(&self) -> String {
        self.vars
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\"\n"))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Insert or replace a value, keeping the original position of existing keys.
    pub fn upsert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Whether the node is configured as a non-voting proxy.
    pub fn proxy_enabled(&self) -> bool {
        self.get(ENV_PROXY) == Some(PROXY_ON)
    }

    /// Whether the node is explicitly configured as a voting member.
    pub fn proxy_disabled(&self) -> bool {
        self.get(ENV_PROXY) == Some(PROXY_OFF)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
        })
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_quoted_and_bare_values() {
        let env = NodeEnvironment::parse(
            "# managed by installer\nETCD_PROXY=\"on\"\nKUBE_MASTER=10.0.0.1\n\nbogus line\n",
        );
        assert_eq!(env.get(ENV_PROXY), Some("on"));
        assert_eq!(env.get("KUBE_MASTER"), Some("10.0.0.1"));
        assert_eq!(env.len(), 2);
        assert!(env.proxy_enabled());
    }

    #[test]
    fn initial_cluster_values_keep_embedded_equals() {
        let env = NodeEnvironment::parse(
            "ETCD_INITIAL_CLUSTER=\"a=https://10.0.0.1:2380,b=https://10.0.0.2:2380\"\n",
        );
        assert_eq!(
            env.get(ENV_INITIAL_CLUSTER),
            Some("a=https://10.0.0.1:2380,b=https://10.0.0.2:2380")
        );
    }

    #[test]
    fn upsert_preserves_order_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etc/container-environment");
        let mut env = NodeEnvironment::parse("A=1\nETCD_PROXY=on\nB=2\n");
        env.upsert(ENV_PROXY, PROXY_OFF);
        env.upsert(ENV_MEMBER_NAME, "node-2");
        env.write(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(
            raw,
            "A=\"1\"\nETCD_PROXY=\"off\"\nB=\"2\"\nETCD_MEMBER_NAME=\"node-2\"\n"
        );
        let reread = NodeEnvironment::read(&path).unwrap();
        assert!(reread.proxy_disabled());
        assert_eq!(reread, env);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = NodeEnvironment::read(dir.path().join("absent")).unwrap_err();
        assert!(err.is_not_found());
    }
}
