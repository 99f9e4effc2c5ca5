//! Where files live: in the remote repository, inside the index archive, and
//! in the local cache.
//!
//! All paths here are relative and are carried as data so that alternative
//! repository conventions can be expressed without code changes.

/// Identifies one package at one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    /// The package name, e.g. `acme`.
    pub name: String,
    /// The package version, e.g. `1.2.0`.
    pub version: String,
}

impl PackageId {
    /// Creates a package identifier from a name and version.
    pub fn new<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// Expands the `{pkg}` and `{version}` placeholders in a path template.
fn expand(template: &str, package: &PackageId) -> String {
    template
        .replace("{pkg}", &package.name)
        .replace("{version}", &package.version)
}

/// Paths of the repository as served by mirrors, relative to a mirror's base
/// URL.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    /// Path of the timestamp role file.
    pub timestamp_path: String,
    /// Path of the root role file.
    pub root_path: String,
    /// Path of the snapshot role file.
    pub snapshot_path: String,
    /// Path of the mirrors role file.
    pub mirrors_path: String,
    /// Path of the compressed package index archive.
    pub index_tar_gz_path: String,
    /// Path of the uncompressed package index archive, used for byte-range
    /// downloads.
    pub index_tar_path: String,
    /// Template for a package tarball, with `{pkg}` and `{version}`
    /// placeholders.
    pub package_tarball_template: String,
    /// Template for a package's build metadata file.
    pub package_metadata_template: String,
}

impl Default for RepoLayout {
    fn default() -> Self {
        Self {
            timestamp_path: "timestamp.json".to_owned(),
            root_path: "root.json".to_owned(),
            snapshot_path: "snapshot.json".to_owned(),
            mirrors_path: "mirrors.json".to_owned(),
            index_tar_gz_path: "01-index.tar.gz".to_owned(),
            index_tar_path: "01-index.tar".to_owned(),
            package_tarball_template: "{pkg}-{version}/{pkg}-{version}.tar.gz".to_owned(),
            package_metadata_template: "{pkg}-{version}/{pkg}.cabal".to_owned(),
        }
    }
}

impl RepoLayout {
    /// The repository path of a package's tarball.
    pub fn package_tarball_path(&self, package: &PackageId) -> String {
        expand(&self.package_tarball_template, package)
    }

    /// The file name of a package's tarball, i.e. the final segment of
    /// [`Self::package_tarball_path`]. Targets metadata is keyed by this name.
    pub fn package_tarball_name(&self, package: &PackageId) -> String {
        let path = self.package_tarball_path(package);
        match path.rsplit('/').next() {
            Some(name) => name.to_owned(),
            None => path,
        }
    }

    /// The repository path of a package's build metadata file.
    pub fn package_metadata_path(&self, package: &PackageId) -> String {
        expand(&self.package_metadata_template, package)
    }
}

/// Paths of files inside the index archive.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    /// Template for a package's targets file inside the archive.
    pub package_targets_template: String,
    /// Template for a package's build metadata file inside the archive.
    pub package_metadata_template: String,
}

impl Default for IndexLayout {
    fn default() -> Self {
        Self {
            package_targets_template: "{pkg}/{version}/package.json".to_owned(),
            package_metadata_template: "{pkg}/{version}/{pkg}.cabal".to_owned(),
        }
    }
}

impl IndexLayout {
    /// The archive-internal path of a package's targets file.
    pub fn package_targets_path(&self, package: &PackageId) -> String {
        expand(&self.package_targets_template, package)
    }

    /// The archive-internal path of a package's build metadata file.
    pub fn package_metadata_path(&self, package: &PackageId) -> String {
        expand(&self.package_metadata_template, package)
    }
}

/// Paths of files inside the local cache directory. The client never touches
/// absolute paths except through this layout.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    /// Cache path of the trusted root file.
    pub root_path: String,
    /// Cache path of the trusted timestamp file.
    pub timestamp_path: String,
    /// Cache path of the trusted snapshot file.
    pub snapshot_path: String,
    /// Cache path of the trusted mirrors file.
    pub mirrors_path: String,
    /// Cache path of the uncompressed index archive.
    pub index_tar_path: String,
    /// Cache path of the compressed index archive.
    pub index_tar_gz_path: String,
    /// Cache path of the tar-index sidecar. The sidecar is rebuildable from
    /// the archive and is not security sensitive.
    pub tar_index_path: String,
}

impl Default for CacheLayout {
    fn default() -> Self {
        Self {
            root_path: "root.json".to_owned(),
            timestamp_path: "timestamp.json".to_owned(),
            snapshot_path: "snapshot.json".to_owned(),
            mirrors_path: "mirrors.json".to_owned(),
            index_tar_path: "01-index.tar".to_owned(),
            index_tar_gz_path: "01-index.tar.gz".to_owned(),
            tar_index_path: "01-index.tar.idx".to_owned(),
        }
    }
}
