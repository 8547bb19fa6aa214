//! OEB output plugin: writes the decoded book as a directory of loose files
//! (HTML, `styles.css`, JPEG images, an OPF package and an optional NCX).

pub mod ncx;
pub mod opf;

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use mobi_core::book::BookDocument;
use mobi_core::error::{MobiError, Result};
use mobi_core::options::DecodeOptions;
use mobi_core::plugin::{DecodeContext, OutputPlugin, ResultMetadata, UnpackResult};
use mobi_utils::fs::write_atomic;

pub use crate::ncx::generate_ncx;
pub use crate::opf::{generate_opf, NCX_HREF};

pub struct OebOutputPlugin;

impl OutputPlugin for OebOutputPlugin {
    fn name(&self) -> &str {
        "OEB Output"
    }

    fn write(
        &self,
        book: &BookDocument,
        out_dir: &Path,
        options: &DecodeOptions,
        ctx: &DecodeContext<'_>,
    ) -> Result<UnpackResult> {
        log::info!("Writing OEB: {}", out_dir.display());
        ctx.check_cancelled()?;
        let created_dir = !out_dir.exists();
        std::fs::create_dir_all(out_dir)?;

        let mut written = Vec::new();
        let result = write_files(book, out_dir, options, ctx, &mut written);
        if matches!(result, Err(MobiError::Cancelled)) {
            remove_written(out_dir, &written, created_dir, ctx);
        }
        result
    }
}

/// Write every artifact, checking for cancellation before each phase.
/// Paths are pushed to `written` as they land on disk.
fn write_files(
    book: &BookDocument,
    out_dir: &Path,
    options: &DecodeOptions,
    ctx: &DecodeContext<'_>,
    written: &mut Vec<PathBuf>,
) -> Result<UnpackResult> {
    let mut result = UnpackResult {
        html_path: out_dir.join(book.html_filename()),
        opf_path: out_dir.join(book.opf_filename()),
        ..Default::default()
    };

    // Text items first, then the images in parallel
    let (images, documents): (Vec<_>, Vec<_>) =
        book.manifest.iter().partition(|item| item.is_image());
    for item in documents {
        ctx.check_cancelled()?;
        let path = out_dir.join(&item.href);
        write_atomic(&path, item.data.as_bytes())?;
        written.push(path.clone());
        if item.is_css() {
            result.css_path = path;
        }
    }
    ctx.report_progress(0.88, "Wrote HTML and stylesheet");
    ctx.check_cancelled()?;

    let image_paths = images
        .par_iter()
        .map(|item| -> Result<PathBuf> {
            let path = out_dir.join(&item.href);
            write_atomic(&path, item.data.as_bytes())?;
            Ok(path)
        })
        .collect::<Result<Vec<_>>>()?;
    written.extend(image_paths.iter().cloned());
    result.images = image_paths;
    ctx.report_progress(0.95, "Wrote images");
    ctx.check_cancelled()?;

    let with_ncx = options.generate_ncx && !book.toc.is_empty();
    if with_ncx {
        let path = out_dir.join(NCX_HREF);
        write_atomic(&path, generate_ncx(book).as_bytes())?;
        written.push(path.clone());
        result.ncx_path = Some(path);
    }
    write_atomic(&result.opf_path, generate_opf(book, with_ncx).as_bytes())?;
    written.push(result.opf_path.clone());

    if let Some(raw) = book.raw_markup.as_deref().filter(|_| options.debug) {
        let path = out_dir.join(format!("{}.raw.html", book.name));
        write_atomic(&path, raw.as_bytes())?;
        written.push(path.clone());
        result.raw_markup_path = Some(path);
    }

    result.metadata = ResultMetadata::from_book(book);
    log::info!(
        "OEB written: {} ({} images)",
        result.opf_path.display(),
        result.images.len()
    );
    Ok(result)
}

/// Undo a cancelled write: remove the files written so far, then the
/// directories this run created if they are left empty.
fn remove_written(out_dir: &Path, written: &[PathBuf], created_dir: bool, ctx: &DecodeContext<'_>) {
    for path in written {
        if let Err(e) = std::fs::remove_file(path) {
            ctx.log.warn(&format!("Could not remove {}: {}", path.display(), e));
        }
    }
    let mut dirs: Vec<&Path> = written
        .iter()
        .filter_map(|path| path.parent())
        .filter(|dir| *dir != out_dir)
        .collect();
    dirs.sort();
    dirs.dedup();
    for dir in dirs {
        let _ = std::fs::remove_dir(dir);
    }
    if created_dir {
        let _ = std::fs::remove_dir(out_dir);
    }
    ctx.log.debug(&format!("Cancelled; removed {} written files", written.len()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobi_core::book::{ManifestData, ManifestItem, TocEntry};
    use mobi_core::cancel::CancellationToken;
    use mobi_core::diagnostics::MemoryLog;
    use mobi_core::plugin::{ImageCodec, ProgressReporter, Raster};

    struct NoopCodec;
    impl ImageCodec for NoopCodec {
        fn decode(&self, _bytes: &[u8]) -> Result<Raster> {
            unreachable!("the packager never decodes")
        }
        fn encode_jpeg(&self, _raster: &Raster, _quality: u8) -> Result<Vec<u8>> {
            unreachable!("the packager never encodes")
        }
    }

    fn make_book() -> BookDocument {
        let mut book = BookDocument::new("Book");
        book.metadata.set_title("Book");
        book.metadata.add("creator", "Jane Doe");
        book.metadata.add("identifier", "urn:uuid:abcd");
        book.uid = Some("urn:uuid:abcd".to_string());
        book.manifest.add(ManifestItem::new(
            "html",
            "Book.html",
            "text/html",
            ManifestData::Html("<html><body>hi</body></html>".to_string()),
        ));
        book.manifest.add(ManifestItem::new(
            "css",
            "styles.css",
            "text/css",
            ManifestData::Css("p { margin: 0em }".to_string()),
        ));
        for i in 1..=3 {
            book.manifest.add(ManifestItem::new(
                format!("image{:05}", i),
                format!("images/{:05}.jpg", i),
                "image/jpeg",
                ManifestData::Binary(vec![0xff, 0xd8, i as u8]),
            ));
        }
        book.spine.push("html", true);
        book.cover = Some("images/00001.jpg".to_string());
        book
    }

    fn write(book: &BookDocument, options: &DecodeOptions, out: &Path) -> Result<UnpackResult> {
        let log = MemoryLog::new();
        let ctx = DecodeContext::new(&log, &NoopCodec);
        OebOutputPlugin.write(book, out, options, &ctx)
    }

    #[test]
    fn test_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = make_book();
        book.toc.add(TocEntry::new("Start", "Book.html#filepos1"));
        book.toc.rationalize_play_orders();

        let result = write(&book, &DecodeOptions::default(), dir.path()).unwrap();
        assert_eq!(result.html_path, dir.path().join("Book.html"));
        assert_eq!(result.css_path, dir.path().join("styles.css"));
        assert_eq!(result.ncx_path, Some(dir.path().join("toc.ncx")));
        assert_eq!(result.images.len(), 3);
        assert_eq!(
            std::fs::read(dir.path().join("images/00002.jpg")).unwrap(),
            vec![0xff, 0xd8, 2]
        );
        let opf = std::fs::read_to_string(&result.opf_path).unwrap();
        assert!(opf.contains("href=\"toc.ncx\""));
        assert!(opf.contains("<meta name=\"cover\" content=\"image00001\"/>"));
        assert_eq!(result.metadata.authors, vec!["Jane Doe"]);
        assert_eq!(result.metadata.cover.as_deref(), Some("images/00001.jpg"));
        assert!(result.raw_markup_path.is_none());
    }

    #[test]
    fn test_no_ncx_for_empty_toc() {
        let dir = tempfile::tempdir().unwrap();
        let result = write(&make_book(), &DecodeOptions::default(), dir.path()).unwrap();
        assert!(result.ncx_path.is_none());
        assert!(!dir.path().join("toc.ncx").exists());
        let opf = std::fs::read_to_string(&result.opf_path).unwrap();
        assert!(!opf.contains("toc.ncx"));
    }

    #[test]
    fn test_debug_writes_raw_markup() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = make_book();
        book.raw_markup = Some("<html>raw</html>".to_string());
        let options = DecodeOptions {
            debug: true,
            ..Default::default()
        };
        let result = write(&book, &options, dir.path()).unwrap();
        let raw_path = result.raw_markup_path.unwrap();
        assert_eq!(raw_path, dir.path().join("Book.raw.html"));
        assert_eq!(std::fs::read_to_string(raw_path).unwrap(), "<html>raw</html>");
    }

    #[test]
    fn test_cancelled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let log = MemoryLog::new();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = DecodeContext::new(&log, &NoopCodec).with_cancel(token);
        let err = OebOutputPlugin
            .write(&make_book(), &out, &DecodeOptions::default(), &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert!(!out.exists());
    }

    #[test]
    fn test_cancel_between_phases_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let log = MemoryLog::new();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let reporter: ProgressReporter = Box::new(move |_: f64, msg: &str| {
            if msg == "Wrote HTML and stylesheet" {
                trigger.cancel();
            }
        });
        let ctx = DecodeContext::new(&log, &NoopCodec)
            .with_cancel(token)
            .with_progress(&reporter);
        let err = OebOutputPlugin
            .write(&make_book(), &out, &DecodeOptions::default(), &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert!(!out.join("Book.html").exists());
        assert!(!out.join("styles.css").exists());
        assert!(!out.join("images").exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_cancel_keeps_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"mine").unwrap();
        let log = MemoryLog::new();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let reporter: ProgressReporter = Box::new(move |_: f64, msg: &str| {
            if msg == "Wrote images" {
                trigger.cancel();
            }
        });
        let ctx = DecodeContext::new(&log, &NoopCodec)
            .with_cancel(token)
            .with_progress(&reporter);
        let err = OebOutputPlugin
            .write(&make_book(), dir.path(), &DecodeOptions::default(), &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert!(!dir.path().join("images").exists());
        assert!(!dir.path().join("Book.opf").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
