//! Asset file environment
//!
//! The engine loads resource files (routing databases and the like) by path.
//! Paths under a fixed virtual prefix are served from the asset root; any
//! other path is opened as is. The mapping is installed once per process.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Virtual directory the engine is told its assets live in
pub const ASSET_PREFIX: &str = "/dev/libv2rayfs0/asset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetConfig {
    /// Real directory backing the virtual prefix
    pub asset_root: PathBuf,
    pub virtual_prefix: PathBuf,
}

impl AssetConfig {
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            virtual_prefix: PathBuf::from(ASSET_PREFIX),
        }
    }
}

/// Process-wide asset mapping
#[derive(Debug)]
pub struct AssetEnv {
    config: AssetConfig,
}

static ASSET_ENV: OnceLock<AssetEnv> = OnceLock::new();

impl AssetEnv {
    /// Install the mapping for this process. Installing the same mapping
    /// again is a no-op; a different one is rejected.
    pub fn init(config: AssetConfig) -> Result<&'static AssetEnv> {
        let mut installed = false;
        let env = ASSET_ENV.get_or_init(|| {
            installed = true;
            AssetEnv {
                config: config.clone(),
            }
        });
        if installed {
            info!(
                "Assets under {} served from {}",
                env.config.virtual_prefix.display(),
                env.config.asset_root.display()
            );
        } else if env.config != config {
            warn!(
                "Asset root already set to {}, refusing {}",
                env.config.asset_root.display(),
                config.asset_root.display()
            );
            return Err(Error::Settings(format!(
                "asset root already set to {}",
                env.config.asset_root.display()
            )));
        }
        Ok(env)
    }

    pub fn get() -> Option<&'static AssetEnv> {
        ASSET_ENV.get()
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    /// Map a requested path onto the file system
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.config.virtual_prefix) {
            Ok(relative) => self.config.asset_root.join(relative),
            Err(_) => path.to_path_buf(),
        }
    }

    pub fn open(&self, path: &Path) -> io::Result<File> {
        let real = self.resolve(path);
        debug!("Opening asset {} -> {}", path.display(), real.display());
        File::open(real)
    }
}

/// Open a file the way the engine sees it. Before any mapping is installed
/// paths are opened as is.
pub fn open_asset(path: impl AsRef<Path>) -> io::Result<File> {
    let path = path.as_ref();
    match AssetEnv::get() {
        Some(env) => env.open(path),
        None => {
            debug!("No asset mapping installed, opening {}", path.display());
            File::open(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use std::io::{Read, Write};

    fn env(root: &Path) -> AssetEnv {
        AssetEnv {
            config: AssetConfig::new(root),
        }
    }

    #[test]
    fn test_resolve_maps_prefix_only() {
        let env = env(Path::new("/opt/assets"));
        assert_eq!(
            env.resolve(Path::new("/dev/libv2rayfs0/asset/geoip.dat")),
            PathBuf::from("/opt/assets/geoip.dat")
        );
        assert_eq!(
            env.resolve(Path::new("/etc/hosts")),
            PathBuf::from("/etc/hosts")
        );
        // Sibling directories sharing the textual prefix are not remapped
        assert_eq!(
            env.resolve(Path::new("/dev/libv2rayfs0/assets/x")),
            PathBuf::from("/dev/libv2rayfs0/assets/x")
        );
    }

    #[test]
    fn test_open_reads_from_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("geosite.dat")).unwrap();
        file.write_all(b"sites").unwrap();

        let env = env(dir.path());
        let mut content = String::new();
        env.open(Path::new("/dev/libv2rayfs0/asset/geosite.dat"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "sites");

        assert!(env
            .open(Path::new("/dev/libv2rayfs0/asset/missing.dat"))
            .is_err());
    }

    #[test]
    fn test_open_asset_passes_real_paths_through() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hosts").unwrap();

        let mut content = String::new();
        open_asset(file.path())
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hosts");
    }

    #[test]
    fn test_init_is_idempotent_and_rejects_other_roots() {
        // Controllers built by other tests in this binary install the same mapping
        let config = ControllerConfig::new("com.example.vpn").asset_config();
        let first = AssetEnv::init(config.clone()).unwrap();
        let second = AssetEnv::init(config.clone()).unwrap();
        assert!(std::ptr::eq(first, second));

        assert!(matches!(
            AssetEnv::init(AssetConfig::new("/somewhere/else")),
            Err(Error::Settings(_))
        ));
        assert_eq!(AssetEnv::get().unwrap().config(), &config);
    }
}
