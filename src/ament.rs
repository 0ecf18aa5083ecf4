use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// The ament environment, providing access to installed ROS 2 packages.
///
/// Packages are looked up through the ament resource index of each prefix in
/// `AMENT_PREFIX_PATH`, earlier prefixes taking priority.
#[derive(Debug, Clone)]
pub struct Env {
    prefixes: Vec<PathBuf>,
}

/// An installed ROS 2 package discovered from the ament index.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// The ament prefix directory containing this package.
    pub prefix: PathBuf,
}

impl Env {
    /// Creates an ament environment from `AMENT_PREFIX_PATH`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("AMENT_PREFIX_PATH")
            .map_err(|_| anyhow::anyhow!("AMENT_PREFIX_PATH is not set"))?;
        Ok(Self::from_path(&path))
    }

    /// Creates an ament environment from a colon-separated prefix path string.
    pub fn from_path(path: &str) -> Self {
        let prefixes = path
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// Returns all installed packages discovered from ament index directories.
    /// Earlier prefixes take priority for duplicate package names.
    pub fn packages(&self) -> Vec<Package> {
        let mut packages = Vec::new();
        let mut seen = HashSet::new();

        for prefix in &self.prefixes {
            if let Ok(entries) = std::fs::read_dir(index_dir(prefix)) {
                for entry in entries.flatten() {
                    if let Some(name) = entry.file_name().to_str()
                        && seen.insert(name.to_string())
                    {
                        packages.push(Package {
                            name: name.to_string(),
                            prefix: prefix.clone(),
                        });
                    }
                }
            }
        }

        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages
    }

    /// Returns the ament prefix path for a package, or `None` if not found.
    pub fn package_prefix(&self, name: &str) -> Option<PathBuf> {
        self.prefixes
            .iter()
            .find(|prefix| index_dir(prefix).join(name).exists())
            .cloned()
    }

    /// Resolves the installed share directory (`<prefix>/share/<package>`) of a package.
    pub fn share_directory(&self, package: &str) -> Result<PathBuf> {
        let Some(prefix) = self.package_prefix(package) else {
            let prefixes: Vec<_> = self
                .prefixes
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            let similar = self.similar_packages(package);
            if similar.is_empty() {
                anyhow::bail!(
                    "Package '{package}' not found in ament prefixes [{}]",
                    prefixes.join(", ")
                );
            }
            anyhow::bail!(
                "Package '{package}' not found in ament prefixes [{}]. Similar installed packages: {}",
                prefixes.join(", "),
                similar.join(", ")
            );
        };
        Ok(prefix.join("share").join(package))
    }

    /// Installed packages sharing the first `_`-separated word of `package`.
    pub fn similar_packages(&self, package: &str) -> Vec<String> {
        let stem = package.split('_').next().unwrap_or(package);
        if stem.is_empty() {
            return Vec::new();
        }
        self.packages()
            .into_iter()
            .filter(|p| p.name.split('_').next() == Some(stem))
            .map(|p| p.name)
            .collect()
    }

    /// Resolves the path of an executable installed under `<prefix>/lib/<package>/`.
    pub fn executable_path(&self, package: &str, executable: &str) -> Result<PathBuf> {
        let prefix = self
            .package_prefix(package)
            .with_context(|| format!("Package '{package}' not found"))?;
        let path = prefix.join("lib").join(package).join(executable);
        if !path.is_file() {
            anyhow::bail!(
                "Executable not found: {package}/{executable}. Package may not be built or installed."
            );
        }
        Ok(path)
    }
}

fn index_dir(prefix: &Path) -> PathBuf {
    prefix
        .join("share")
        .join("ament_index")
        .join("resource_index")
        .join("packages")
}
