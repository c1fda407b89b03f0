//! Zip bundles for folder and multi-file sends.
//!
//! The wire protocol carries one regular file per connection, so a folder
//! (or a set of files the user wants bundled) is packed into a temporary
//! zip first and sent under the archive's name. The temporary file is
//! deleted when the [`Archive`] is dropped.

use crate::error::{Result, TransferError};
use crate::transfer::SendItem;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive name used when bundling loose files without an explicit name
pub const DEFAULT_FILES_ZIP: &str = "files.zip";

/// A packed zip waiting to be sent
#[derive(Debug)]
pub struct Archive {
    file: NamedTempFile,
    name: String,
    entries: usize,
}

impl Archive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Name the receiver stores the archive under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Files and directories written into the archive
    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn send_item(&self) -> SendItem {
        SendItem::named(self.path(), self.name.clone())
    }
}

/// Zip the contents of `dir`. Entry paths are relative to `dir`; the name
/// defaults to `<dir name>.zip`.
pub async fn zip_directory(dir: impl Into<PathBuf>, name: Option<String>) -> Result<Archive> {
    let dir = dir.into();
    run_blocking(move || zip_directory_sync(&dir, name)).await
}

/// Zip `files` flat, each under its own file name.
pub async fn zip_files(files: Vec<PathBuf>, name: Option<String>) -> Result<Archive> {
    run_blocking(move || zip_files_sync(&files, name)).await
}

async fn run_blocking<F>(f: F) -> Result<Archive>
where
    F: FnOnce() -> Result<Archive> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Io(io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

fn zip_directory_sync(dir: &Path, name: Option<String>) -> Result<Archive> {
    if !dir.is_dir() {
        return Err(TransferError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }
    let name = match name {
        Some(name) => name,
        None => default_directory_zip_name(dir)?,
    };

    let temp = temp_zip()?;
    let mut zip = ZipWriter::new(temp.as_file());
    let mut entries = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let entry_name = relative_entry_name(dir, entry.path())?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            zip.add_directory(entry_name, options())?;
        } else if file_type.is_file() {
            zip.start_file(entry_name, options())?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
        } else {
            tracing::debug!("Skipping {} (not a regular file)", entry.path().display());
            continue;
        }
        entries += 1;
    }
    zip.finish()?;
    drop(zip);

    tracing::info!(
        "Packed {} ({} entries) into {}",
        dir.display(),
        entries,
        name
    );
    Ok(Archive {
        file: temp,
        name,
        entries,
    })
}

fn zip_files_sync(files: &[PathBuf], name: Option<String>) -> Result<Archive> {
    let name = name.unwrap_or_else(|| DEFAULT_FILES_ZIP.to_string());

    let temp = temp_zip()?;
    let mut zip = ZipWriter::new(temp.as_file());
    for path in files {
        if !path.is_file() {
            return Err(TransferError::NotAFile { path: path.clone() });
        }
        let entry_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(TransferError::InvalidField { field: "filename" })?;
        zip.start_file(entry_name, options())?;
        io::copy(&mut File::open(path)?, &mut zip)?;
    }
    zip.finish()?;
    drop(zip);

    tracing::info!("Packed {} files into {}", files.len(), name);
    Ok(Archive {
        file: temp,
        name,
        entries: files.len(),
    })
}

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn temp_zip() -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix("filedrop_send_")
        .suffix(".zip")
        .tempfile()?)
}

fn default_directory_zip_name(dir: &Path) -> Result<String> {
    let dir = dir.canonicalize()?;
    let base = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(TransferError::InvalidField { field: "folder name" })?;
    Ok(format!("{base}.zip"))
}

/// Zip entry names always use `/`, whatever the platform separator.
fn relative_entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| TransferError::InvalidField { field: "archive entry" })?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or(TransferError::InvalidField { field: "archive entry" })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_entry(path: &Path, name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        content
    }

    #[tokio::test]
    async fn test_zip_directory_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        std::fs::create_dir_all(photos.join("2024").join("empty")).unwrap();
        std::fs::write(photos.join("cover.jpg"), b"cover").unwrap();
        std::fs::write(photos.join("2024").join("beach.jpg"), b"beach").unwrap();

        let archive = zip_directory(&photos, None).await.unwrap();
        assert_eq!(archive.name(), "photos.zip");
        assert_eq!(archive.entries(), 4);

        let mut names: Vec<String> = ZipArchive::new(File::open(archive.path()).unwrap())
            .unwrap()
            .file_names()
            .map(str::to_owned)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["2024/", "2024/beach.jpg", "2024/empty/", "cover.jpg"]
        );
        assert_eq!(read_entry(archive.path(), "2024/beach.jpg"), b"beach");
    }

    #[tokio::test]
    async fn test_zip_directory_honours_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let archive = zip_directory(dir.path(), Some("bundle.zip".into()))
            .await
            .unwrap();
        assert_eq!(archive.name(), "bundle.zip");
        let item = archive.send_item();
        assert_eq!(item.display_name.as_deref(), Some("bundle.zip"));
        assert_eq!(item.path, archive.path());
    }

    #[tokio::test]
    async fn test_zip_files_is_flat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("sub").join("b.txt");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, b"second").unwrap();

        let archive = zip_files(vec![a, b], None).await.unwrap();
        assert_eq!(archive.name(), DEFAULT_FILES_ZIP);
        assert_eq!(read_entry(archive.path(), "a.txt"), b"first");
        assert_eq!(read_entry(archive.path(), "b.txt"), b"second");
    }

    #[tokio::test]
    async fn test_zip_files_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = zip_files(vec![dir.path().to_path_buf()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotAFile { .. }));
    }

    #[tokio::test]
    async fn test_temporary_zip_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let archive = zip_directory(dir.path(), None).await.unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_zip_directory_requires_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(zip_directory(&file, None).await.is_err());
    }
}
