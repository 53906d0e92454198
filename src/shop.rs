//! Shop identity resolution.
//!
//! Each till's host name embeds the shop name; the shop map (`id,name` rows)
//! turns it into the identifier used in output file names. Multi-till sites
//! are told apart by the trailing digit of the host name.

use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

use crate::config::ShopSettings;
use crate::error::{Result, TallyError};

pub const UNKNOWN_SHOP: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShopEntry {
    id: String,
    /// Lower-case ASCII alphanumerics only.
    name_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct ShopDirectory {
    shops: Vec<ShopEntry>,
}

/// Lower-case and drop everything but ASCII letters and digits.
fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl ShopDirectory {
    /// Build from `(id, name)` pairs in file order.
    pub fn from_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let shops = rows
            .into_iter()
            .filter_map(|(id, name)| {
                let id = id.as_ref().trim();
                let name_key = normalize_name(name.as_ref());
                if id.is_empty() || name_key.is_empty() {
                    return None;
                }
                Some(ShopEntry {
                    id: id.to_string(),
                    name_key,
                })
            })
            .collect();
        Self { shops }
    }

    /// Load the comma-separated shop map (no header row).
    pub fn load(path: &Path) -> Result<Self> {
        let map_err = |source| TallyError::ShopMap {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(map_err)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(map_err)?;
            match (record.get(0), record.get(1)) {
                (Some(id), Some(name)) => rows.push((id.to_string(), name.to_string())),
                _ => warn!(row = ?record, "Skipping malformed shop map row"),
            }
        }
        let directory = Self::from_rows(rows);
        info!(path = %path.display(), count = directory.shops.len(), "Shop map loaded");
        Ok(directory)
    }

    /// Output identifier for `hostname`: the first shop whose name is
    /// contained in the host name, else [`UNKNOWN_SHOP`], suffixed with
    /// `_<digit>` when the host name ends in a digit.
    pub fn resolve(&self, hostname: &str) -> String {
        let host_key = normalize_name(hostname);
        let base = self
            .shops
            .iter()
            .find(|shop| host_key.contains(&shop.name_key))
            .map(|shop| shop.id.clone())
            .unwrap_or_else(|| UNKNOWN_SHOP.to_string());

        match hostname.trim().chars().last().filter(char::is_ascii_digit) {
            Some(digit) => format!("{base}_{digit}"),
            None => base,
        }
    }
}

/// Host name of this till: configured override, then environment, then the
/// `hostname` tool.
pub fn local_hostname(settings: &ShopSettings) -> Option<String> {
    let from_settings = settings.hostname.clone();
    let from_env = || {
        ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|key| std::env::var(key).ok())
    };
    let from_tool = || {
        Command::new("hostname")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
    };

    from_settings
        .or_else(from_env)
        .or_else(from_tool)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Resolve this till's shop identifier from settings.
pub fn resolve_shop_id(settings: &ShopSettings) -> Result<String> {
    let directory = ShopDirectory::load(&settings.map_file)?;
    let hostname = local_hostname(settings).unwrap_or_else(|| {
        warn!("Host name unavailable, shop will resolve as unknown");
        String::new()
    });
    let shop_id = directory.resolve(&hostname);
    info!(hostname = %hostname, shop_id = %shop_id, "Shop identity resolved");
    Ok(shop_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn directory() -> ShopDirectory {
        ShopDirectory::from_rows([("S01", "High Street"), ("S02", "St. Mary's")])
    }

    #[test]
    fn test_resolve_matches_normalized_name() {
        assert_eq!(directory().resolve("HIGHSTREET-TILL"), "S01");
        assert_eq!(directory().resolve("pos-stmarys"), "S02");
    }

    #[test]
    fn test_resolve_appends_trailing_digit() {
        assert_eq!(directory().resolve("highstreet-till2"), "S01_2");
        assert_eq!(directory().resolve("stmarys3"), "S02_3");
    }

    #[test]
    fn test_resolve_unknown() {
        assert_eq!(directory().resolve("warehouse"), "UNKNOWN");
        assert_eq!(directory().resolve("warehouse7"), "UNKNOWN_7");
        assert_eq!(directory().resolve(""), "UNKNOWN");
    }

    #[test]
    fn test_load_skips_malformed_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "S01, High Street\nbroken\nS02,Market Square").unwrap();
        let dir = ShopDirectory::load(file.path()).unwrap();
        assert_eq!(dir.resolve("marketsquare1"), "S02_1");
        assert_eq!(dir.resolve("highstreet"), "S01");
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ShopDirectory::load(&dir.path().join("shops.csv")),
            Err(TallyError::ShopMap { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_hostname_prefers_settings_then_env() {
        std::env::set_var("HOSTNAME", "env-host1");
        let mut settings = ShopSettings {
            hostname: Some(" configured-host ".into()),
            ..ShopSettings::default()
        };
        assert_eq!(local_hostname(&settings).as_deref(), Some("configured-host"));

        settings.hostname = None;
        assert_eq!(local_hostname(&settings).as_deref(), Some("env-host1"));
        std::env::remove_var("HOSTNAME");
    }

    #[test]
    #[serial]
    fn test_resolve_shop_id_from_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "S01,High Street").unwrap();
        let settings = ShopSettings {
            map_file: file.path().to_path_buf(),
            hostname: Some("highstreet-2".into()),
        };
        assert_eq!(resolve_shop_id(&settings).unwrap(), "S01_2");
    }
}
