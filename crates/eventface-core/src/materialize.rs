//! Export of matched photos into a per-person output directory.

use crate::types::{OutputSummary, PersonSearchResult};
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Maps backend identities onto files on disk.
#[derive(Debug, Clone)]
pub struct ArchiveResolver {
    base_dir: PathBuf,
}

impl ArchiveResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute identities are used verbatim (older indexes stored full
    /// paths); relative ones are joined onto the archive base directory.
    pub fn resolve(&self, identity: &str) -> PathBuf {
        let path = Path::new(identity);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Copies the photos of a [`PersonSearchResult`] into `<output_root>/<person name>`.
#[derive(Debug, Clone)]
pub struct OutputMaterializer {
    resolver: ArchiveResolver,
}

impl OutputMaterializer {
    pub fn new(resolver: ArchiveResolver) -> Self {
        Self { resolver }
    }

    /// Copy every match, in ranking order, into the person's directory.
    ///
    /// Existing files are never overwritten: a name that is taken gets a
    /// `_1`, `_2`, ... suffix before its extension. Missing sources and
    /// failed copies are recorded in `skipped_files`; only failing to create
    /// the directory itself is an error.
    pub fn materialize(
        &self,
        result: &PersonSearchResult,
        output_root: &Path,
    ) -> Result<OutputSummary, MaterializeError> {
        let dest_dir = output_root.join(&result.person_name);
        let create_err = |source| MaterializeError::CreateDir {
            path: dest_dir.clone(),
            source,
        };
        fs::create_dir_all(&dest_dir).map_err(create_err)?;
        let output_path = fs::canonicalize(&dest_dir).map_err(create_err)?;

        let mut copied_count = 0;
        let mut skipped_files = Vec::new();

        for m in &result.matches {
            let source = self.resolver.resolve(&m.identity);
            if !source.exists() {
                tracing::warn!(identity = %m.identity, source = %source.display(), "matched photo missing");
                skipped_files.push(format!("Missing: {}", m.identity));
                continue;
            }

            let Some(file_name) = source.file_name() else {
                skipped_files.push(format!("Copy failed {}: no file name", m.identity));
                continue;
            };

            match copy_unique(&source, &output_path, file_name) {
                Ok(dest) => {
                    tracing::debug!(source = %source.display(), dest = %dest.display(), "copied match");
                    copied_count += 1;
                }
                Err(e) => {
                    let name = file_name.to_string_lossy();
                    tracing::warn!(source = %source.display(), error = %e, "copy failed");
                    skipped_files.push(format!("Copy failed {name}: {e}"));
                }
            }
        }

        tracing::info!(
            person = %result.person_name,
            copied = copied_count,
            skipped = skipped_files.len(),
            output = %output_path.display(),
            "matches exported"
        );

        Ok(OutputSummary {
            copied_count,
            output_path,
            skipped_files,
        })
    }
}

/// Copy `source` into `dir` under a name no existing file uses.
fn copy_unique(source: &Path, dir: &Path, file_name: &OsStr) -> io::Result<PathBuf> {
    let mut input = File::open(source)?;
    let metadata = input.metadata()?;
    let (mut output, dest) = reserve_destination(dir, file_name)?;

    let copied = io::copy(&mut input, &mut output).and_then(|_| {
        if let Ok(modified) = metadata.modified() {
            output.set_modified(modified)?;
        }
        output.set_permissions(metadata.permissions())
    });

    if let Err(e) = copied {
        drop(output);
        let _ = fs::remove_file(&dest);
        return Err(e);
    }
    Ok(dest)
}

/// Atomically claim the first free name among `name.ext`, `name_1.ext`, `name_2.ext`, ...
fn reserve_destination(dir: &Path, file_name: &OsStr) -> io::Result<(File, PathBuf)> {
    let mut attempt = 0usize;
    loop {
        let candidate = dir.join(suffixed_name(file_name, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

fn suffixed_name(file_name: &OsStr, attempt: usize) -> OsString {
    if attempt == 0 {
        return file_name.to_os_string();
    }
    let path = Path::new(file_name);
    let mut name = path.file_stem().unwrap_or(file_name).to_os_string();
    name.push(format!("_{attempt}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}
