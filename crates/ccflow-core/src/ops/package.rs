//! Deployment packager.
//!
//! Bundles chaincode sources into a content-addressed, gzipped tar archive
//! with every entry under `src/<path>/`. Output is a pure function of
//! (source content, declared name): files are visited in sorted order, tar
//! headers are pinned (mtime 0, mode 0644, uid/gid 0) and so is the gzip
//! header (mtime 0, no file name).

use crate::{
    ids::ChaincodeId,
    log,
    log::Topic,
};
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use std::{
    fmt, fs, io,
    path::{Component, Path, PathBuf},
};
use tar::{Builder, EntryType, Header};
use thiserror::Error as ThisError;
use walkdir::WalkDir;

const ENTRY_MODE: u32 = 0o644;

/// Extension every chaincode source directory must contain at its top level.
pub const SOURCE_EXTENSION: &str = "go";

///
/// PackageError
///

#[derive(Debug, ThisError)]
pub enum PackageError {
    #[error("build root '{0}' does not exist")]
    BuildRootMissing(PathBuf),

    #[error("build root '{path}' is misconfigured: {reason}")]
    BuildRootInvalid { path: PathBuf, reason: String },

    #[error("chaincode source '{0}' not found")]
    SourceNotFound(PathBuf),

    #[error("invalid module layout at '{path}': {reason}")]
    InvalidLayout { path: PathBuf, reason: String },

    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PackageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

///
/// PackageSource
///
/// `path` is the chaincode import path relative to `<build_root>/src`,
/// mirroring a GOPATH-style build environment.
///

#[derive(Clone, Debug)]
pub struct PackageSource {
    pub name: ChaincodeId,
    pub path: String,
    pub build_root: PathBuf,
}

impl PackageSource {
    pub fn new(name: ChaincodeId, path: impl Into<String>, build_root: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
            build_root: build_root.into(),
        }
    }
}

///
/// PackageArtifact
/// Opaque installable bundle plus its content address.
///

#[derive(Clone, Eq, PartialEq)]
pub struct PackageArtifact {
    pub name: ChaincodeId,
    pub path: String,
    pub bytes: Vec<u8>,
    pub hash: [u8; 32],
    pub file_count: usize,
}

impl PackageArtifact {
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PackageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageArtifact")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("len", &self.bytes.len())
            .field("hash", &self.hash_hex())
            .field("file_count", &self.file_count)
            .finish()
    }
}

///
/// Packager
///

pub struct Packager;

impl Packager {
    /// Package a chaincode source tree. Touches the local filesystem only.
    #[allow(clippy::cast_precision_loss)]
    pub fn package(source: &PackageSource) -> Result<PackageArtifact, PackageError> {
        let source_dir = Self::resolve_source_dir(source)?;
        let files = Self::collect_files(&source_dir)?;

        let encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::with_capacity(4096), Compression::default());
        let mut archive = Builder::new(encoder);

        let prefix = format!("src/{}", source.path.trim_matches('/'));
        for (rel, abs) in &files {
            let content = fs::read(abs).map_err(|e| PackageError::io(abs, e))?;
            let mut header = entry_header(content.len() as u64);

            archive
                .append_data(&mut header, format!("{prefix}/{rel}"), content.as_slice())
                .map_err(|e| PackageError::io(abs, e))?;
        }

        let bytes = archive
            .into_inner()
            .and_then(flate2::write::GzEncoder::finish)
            .map_err(|e| PackageError::io(&source_dir, e))?;
        let hash = content_address(&source.name, &bytes);

        let artifact = PackageArtifact {
            name: source.name.clone(),
            path: source.path.clone(),
            bytes,
            hash,
            file_count: files.len(),
        };

        log!(
            Topic::Package,
            Info,
            "📦 package: {} ({} files, {:.2} KB, sha256 {})",
            artifact.name,
            artifact.file_count,
            artifact.len() as f64 / 1000.0,
            artifact.hash_hex()
        );

        Ok(artifact)
    }

    fn resolve_source_dir(source: &PackageSource) -> Result<PathBuf, PackageError> {
        let root = &source.build_root;
        if !root.is_dir() {
            return Err(PackageError::BuildRootMissing(root.clone()));
        }

        let src_root = root.join("src");
        if !src_root.is_dir() {
            return Err(PackageError::BuildRootInvalid {
                path: root.clone(),
                reason: "missing 'src' directory".to_string(),
            });
        }

        let rel = Path::new(source.path.trim_matches('/'));
        if source.path.trim().is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PackageError::InvalidLayout {
                path: rel.to_path_buf(),
                reason: "chaincode path must be a relative import path".to_string(),
            });
        }

        let dir = src_root.join(rel);
        if !dir.exists() {
            return Err(PackageError::SourceNotFound(dir));
        }
        if !dir.is_dir() {
            return Err(PackageError::InvalidLayout {
                path: dir,
                reason: "chaincode path is not a directory".to_string(),
            });
        }

        Ok(dir)
    }

    // Sorted (relative path, absolute path) pairs; hidden entries are skipped.
    fn collect_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, PackageError> {
        let mut files = Vec::new();
        let mut has_top_level_source = false;

        let walker = WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop"));
                PackageError::Io { path, source }
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| PackageError::InvalidLayout {
                    path: entry.path().to_path_buf(),
                    reason: "entry escapes the source directory".to_string(),
                })?;

            if entry.depth() == 1
                && rel.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
            {
                has_top_level_source = true;
            }

            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((rel, entry.path().to_path_buf()));
        }

        if !has_top_level_source {
            return Err(PackageError::InvalidLayout {
                path: dir.to_path_buf(),
                reason: format!("no .{SOURCE_EXTENSION} source files at the module root"),
            });
        }

        Ok(files)
    }
}

fn entry_header(size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(ENTRY_MODE);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    header
}

fn content_address(name: &ChaincodeId, bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(name.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes);

    hasher.finalize().into()
}

///
/// TESTS
///
