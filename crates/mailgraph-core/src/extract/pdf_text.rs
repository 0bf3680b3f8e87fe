//! Embedded-text PDF analysis.
//!
//! The free extraction path: pull the text layer with lopdf, count pages,
//! and scan object streams for image XObjects so the router can tell a
//! digital PDF from a scan. Encrypted documents are rejected here, before
//! any paid extraction is considered.

use crate::error::MailgraphError;
use lopdf::{Document, Object};

/// Image XObjects below this pixel count (logos, signature marks) do not
/// make a document "scanned"
const SIGNIFICANT_IMAGE_PIXELS: i64 = 100 * 100;

#[derive(Debug, Clone)]
pub struct PdfAnalysis {
    pub page_count: usize,
    pub has_embedded_images: bool,
    pub text: String,
}

/// Parses PDF bytes and extracts the embedded text layer.
///
/// CPU-bound; callers on the async path wrap this in `spawn_blocking`.
pub fn analyze_pdf(bytes: &[u8]) -> Result<PdfAnalysis, MailgraphError> {
    let document = Document::load_mem(bytes).map_err(|e| {
        let message = e.to_string();
        if message.to_lowercase().contains("encrypt") {
            MailgraphError::EncryptedPdf(message)
        } else {
            MailgraphError::CorruptedDocument(format!("pdf parse: {}", message))
        }
    })?;

    if document.is_encrypted() {
        return Err(MailgraphError::EncryptedPdf(
            "password-protected PDF".to_string(),
        ));
    }

    let pages = document.get_pages();
    if pages.is_empty() {
        return Err(MailgraphError::CorruptedDocument(
            "pdf has no pages".to_string(),
        ));
    }

    let page_numbers: Vec<u32> = pages.keys().cloned().collect();
    // Text extraction is best-effort; a pure-image PDF yields empty text
    let text = document.extract_text(&page_numbers).unwrap_or_default();

    Ok(PdfAnalysis {
        page_count: pages.len(),
        has_embedded_images: has_significant_images(&document),
        text: text.trim().to_string(),
    })
}

/// Scans object streams for image XObjects above the size threshold
fn has_significant_images(document: &Document) -> bool {
    document.objects.values().any(|object| {
        let Object::Stream(stream) = object else {
            return false;
        };
        let is_image = matches!(
            stream.dict.get(b"Subtype"),
            Ok(Object::Name(name)) if name == b"Image"
        );
        if !is_image {
            return false;
        }

        let dim = |key: &[u8]| -> i64 {
            match stream.dict.get(key) {
                Ok(Object::Integer(v)) => *v,
                _ => 0,
            }
        };
        dim(b"Width") * dim(b"Height") >= SIGNIFICANT_IMAGE_PIXELS
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Builds a minimal single-page PDF whose text layer contains `text`
    pub fn pdf_with_text(text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }

    /// Same, plus a full-page image XObject the scanner should flag
    pub fn pdf_with_image(text: &str) -> Vec<u8> {
        let mut bytes = pdf_with_text(text);
        let mut doc = Document::load_mem(&bytes).expect("reload");
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1700,
                "Height" => 2200,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0u8; 16],
        ));
        bytes.clear();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }
}
