use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::Result;

use crate::error::AppError;

/// Anything below this is not a plausible zip (empty body, error page).
const MIN_ARCHIVE_BYTES: u64 = 100;

/// Extracts `archive_path` into `dest_dir` and returns the entry document
/// for the embedded viewer. Any pre-existing destination for the same item
/// is removed first, so re-extraction is idempotent.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    if !archive_path.exists() {
        return Err(AppError::InvalidArchive(format!(
            "archive not found at {}",
            archive_path.display()
        ))
        .into());
    }
    let size = std::fs::metadata(archive_path)?.len();
    if size < MIN_ARCHIVE_BYTES {
        return Err(AppError::InvalidArchive(format!(
            "archive is too small to be valid ({size} bytes)"
        ))
        .into());
    }

    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)?;
    }
    std::fs::create_dir_all(dest_dir)?;

    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| AppError::Extraction(format!("unreadable archive: {err}")))?;
    for idx in 0..archive.len() {
        let mut entry = archive
            .by_index(idx)
            .map_err(|err| AppError::Extraction(format!("bad archive entry: {err}")))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = dest_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|err| AppError::Extraction(format!("decode {}: {err}", entry.name())))?;
    }

    Ok(find_entry_document(dest_dir).unwrap_or_else(|| dest_dir.to_path_buf()))
}

/// Depth-first walk, files before descending, for the first
/// `index.html`/`index.htm` (case-insensitive).
pub fn find_entry_document(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name == "index.html" || name == "index.htm" {
                return Some(path);
            }
        } else if path.is_dir() {
            subdirs.push(path);
        }
    }
    for subdir in subdirs {
        if let Some(found) = find_entry_document(&subdir) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_tour_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut zip = zip::ZipWriter::new(file);
        let opts = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, opts).expect("start zip entry");
            zip.write_all(content).expect("write zip entry");
        }
        zip.finish().expect("finish zip");
    }

    #[test]
    fn extracts_and_finds_nested_entry_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("tour_1.zip");
        let padding = vec![b'x'; 512];
        write_tour_zip(
            &archive,
            &[
                ("assets/style.css", b"body{}".as_slice()),
                ("site/Index.HTML", b"<html></html>".as_slice()),
                ("readme.txt", padding.as_slice()),
            ],
        );

        let dest = dir.path().join("unzipped_1");
        let entry = extract(&archive, &dest).expect("extract");
        assert_eq!(entry, dest.join("site/Index.HTML"));
        assert!(dest.join("assets/style.css").exists());
    }

    #[test]
    fn falls_back_to_extraction_root_without_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("tour_2.zip");
        let padding = vec![b'y'; 512];
        write_tour_zip(&archive, &[("data/blob.bin", padding.as_slice())]);

        let dest = dir.path().join("unzipped_2");
        let entry = extract(&archive, &dest).expect("extract");
        assert_eq!(entry, dest);
    }

    #[test]
    fn re_extraction_replaces_previous_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("tour_3.zip");
        let padding = vec![b'z'; 512];
        write_tour_zip(&archive, &[("index.html", padding.as_slice())]);

        let dest = dir.path().join("unzipped_3");
        std::fs::create_dir_all(&dest).expect("pre-create dest");
        std::fs::write(dest.join("stale.txt"), b"old").expect("seed stale file");

        extract(&archive, &dest).expect("extract");
        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("index.html").exists());
    }

    #[test]
    fn missing_or_tiny_archives_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("unzipped_4");

        let missing = dir.path().join("absent.zip");
        let err = extract(&missing, &dest).expect_err("missing archive");
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::InvalidArchive(_))
        ));

        let tiny = dir.path().join("tiny.zip");
        std::fs::write(&tiny, b"PK").expect("write tiny file");
        let err = extract(&tiny, &dest).expect_err("tiny archive");
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::InvalidArchive(_))
        ));
    }

    #[test]
    fn garbage_archive_is_an_extraction_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("unzipped_5");
        let garbage = dir.path().join("garbage.zip");
        std::fs::write(&garbage, vec![0u8; 4096]).expect("write garbage");

        let err = extract(&garbage, &dest).expect_err("garbage archive");
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::Extraction(_))
        ));
    }
}
