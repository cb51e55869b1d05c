//! Zip packing of the bridge auth directory.
//!
//! The zip work is synchronous and runs on the blocking pool.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{RelayError, Result};

fn zip_err(e: zip::result::ZipError) -> RelayError {
    RelayError::Session(e.to_string())
}

/// Zip every file under `dir`, with paths relative to it.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = std::fs::read_dir(&current)?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let rel = path
                .strip_prefix(dir)
                .map_err(|e| RelayError::Session(e.to_string()))?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type()?.is_dir() {
                writer
                    .add_directory(format!("{}/", name), options)
                    .map_err(zip_err)?;
                pending.push(path);
            } else {
                writer.start_file(name, options).map_err(zip_err)?;
                let mut buf = Vec::new();
                std::fs::File::open(&path)?.read_to_end(&mut buf)?;
                writer.write_all(&buf)?;
            }
        }
    }

    Ok(writer.finish().map_err(zip_err)?.into_inner())
}

/// Extract `bytes` into `dir`, returning the number of files written.
///
/// Entries are confined to `dir`: leading slashes are stripped and any
/// `..` component rejects the whole archive.
pub fn unpack_into(bytes: &[u8], dir: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;
    std::fs::create_dir_all(dir)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_err)?;

        let name = file.name().to_string();
        let name = name.trim_start_matches('/');
        if name.split(['/', '\\']).any(|part| part == "..") {
            return Err(RelayError::Session(format!(
                "session archive contains path traversal: {}",
                name
            )));
        }

        let out_path = dir.join(name);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&out_path)?;
            std::io::copy(&mut file, &mut out)?;
            written += 1;
        }
    }
    Ok(written)
}

/// [`pack_dir`] on the blocking pool.
pub async fn pack(dir: PathBuf) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || pack_dir(&dir))
        .await
        .map_err(|e| RelayError::Session(e.to_string()))?
}

/// [`unpack_into`] on the blocking pool.
pub async fn unpack(bytes: Vec<u8>, dir: PathBuf) -> Result<usize> {
    tokio::task::spawn_blocking(move || unpack_into(&bytes, &dir))
        .await
        .map_err(|e| RelayError::Session(e.to_string()))?
}
