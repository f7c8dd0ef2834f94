//! Configuration for Deferral.
//!
//! Settings live in `config.kdl` inside the data directory, so every
//! process sharing a directory agrees on lock timing. See [`schema`] for
//! the keys and [`resolver`] for precedence.

pub mod resolver;
pub mod schema;

pub use resolver::{ConfigOverrides, Resolved, ResolvedConfig, ValueSource, resolve_config};
#[cfg(unix)]
pub use schema::CONFIG_FILE_MODE;
pub use schema::{CONFIG_KEYS, DeferralConfig};

use crate::{Error, Result};
use kdl::KdlDocument;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Config file name inside a data directory.
pub const CONFIG_FILE_NAME: &str = "config.kdl";

/// Path of config.kdl for a data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Load config.kdl. A missing file is an empty config; out-of-range values
/// in a hand-edited file are a `Config` error.
pub fn load_config(data_dir: &Path) -> Result<DeferralConfig> {
    let path = config_path(data_dir);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DeferralConfig::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let doc: KdlDocument = text
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let config = DeferralConfig::from_kdl(&doc);
    config
        .validate()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}

/// Validate and write config.kdl (owner read/write only).
pub fn save_config(data_dir: &Path, config: &DeferralConfig) -> Result<()> {
    config.validate().map_err(Error::Config)?;
    fs::create_dir_all(data_dir)?;

    let mut tmp = NamedTempFile::new_in(data_dir)?;
    tmp.write_all(config.to_kdl().to_string().as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(CONFIG_FILE_MODE))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(config_path(data_dir))
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Set one key in config.kdl and return the updated config.
pub fn set_config_value(data_dir: &Path, key: &str, value: &str) -> Result<DeferralConfig> {
    let mut config = load_config(data_dir)?;
    config.set(key, value).map_err(Error::Config)?;
    save_config(data_dir, &config)?;
    Ok(config)
}
