// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page counting for uploaded documents, used to price a job at registration.

use std::path::Path;

use lopdf::Document;
use tracing::{debug, instrument};

use kioskprint_core::error::{KioskError, Result};

/// Image formats accepted for upload.  Each prints as a single page.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "svg"];

/// Count printable pages in `path`.
///
/// PDFs are parsed with `lopdf`; images count as one page.  Anything else,
/// or a PDF that cannot be parsed or has no pages, is a `Document` error.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn count_pages(path: &Path) -> Result<u32> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extension == "pdf" {
        let document = Document::load(path).map_err(|err| {
            KioskError::Document(format!("failed to open {}: {err}", path.display()))
        })?;
        let pages = document.get_pages().len();
        debug!(pages, "PDF pages counted");
        if pages == 0 {
            return Err(KioskError::Document(format!(
                "{} has no pages",
                path.display()
            )));
        }
        return u32::try_from(pages)
            .map_err(|_| KioskError::Document(format!("{} has too many pages", path.display())));
    }

    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(1);
    }

    Err(KioskError::Document(format!(
        "unsupported file type: {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Object, dictionary};

    fn write_pdf(path: &Path, pages: usize) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn counts_pdf_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.pdf");
        write_pdf(&path, 3);
        assert_eq!(count_pages(&path).unwrap(), 3);
    }

    #[test]
    fn extension_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SCAN.PDF");
        write_pdf(&path, 2);
        assert_eq!(count_pages(&path).unwrap(), 2);
        assert_eq!(count_pages(Path::new("/tmp/photo.JPG")).unwrap(), 1);
    }

    #[test]
    fn images_are_one_page() {
        for name in ["a.png", "b.jpeg", "c.webp", "d.tif"] {
            assert_eq!(count_pages(Path::new(name)).unwrap(), 1);
        }
    }

    #[test]
    fn corrupt_pdf_is_a_document_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        assert!(matches!(count_pages(&path), Err(KioskError::Document(_))));
    }

    #[test]
    fn unsupported_type_is_rejected() {
        assert!(matches!(
            count_pages(Path::new("notes.docx")),
            Err(KioskError::Document(_))
        ));
    }
}
