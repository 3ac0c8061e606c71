//! Converting one document into cleaned text.
//!
//! A document is all-or-nothing. If rasterization fails, or any single page
//! fails OCR, we throw away whatever we've recognized so far and report the
//! whole document as failed. There are no retries here.

use std::sync::Arc;

use crate::{
    async_utils::blocking::BlockingIter,
    ocr::{OcrEngine, OcrPageInput},
    prelude::*,
    rasterize::Rasterizer,
    text::{clean_text, reduce_document, reduce_lines},
};

/// A document to convert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// The file name, including extension. Unique within the source directory.
    pub id: String,

    /// Where to read the document from.
    pub path: PathBuf,
}

/// Why a document could not be converted.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// The document could not be turned into page images.
    #[error("could not rasterize {document}")]
    Rasterization {
        document: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The OCR engine failed on one page.
    #[error("OCR failed on page {} of {document}", .page_index + 1)]
    Ocr {
        document: String,
        page_index: usize,
        #[source]
        cause: anyhow::Error,
    },
}

impl ProcessingError {
    /// The ID of the document that failed.
    pub fn document(&self) -> &str {
        match self {
            ProcessingError::Rasterization { document, .. } => document,
            ProcessingError::Ocr { document, .. } => document,
        }
    }
}

/// Runs a document through rasterization, OCR and text cleanup.
#[derive(Clone)]
pub struct DocumentProcessor {
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn OcrEngine>,
}

impl DocumentProcessor {
    /// Create a new processor.
    pub fn new(rasterizer: Arc<dyn Rasterizer>, engine: Arc<dyn OcrEngine>) -> Self {
        Self { rasterizer, engine }
    }

    /// Convert `doc` to text.
    ///
    /// Pages are OCRed one at a time, in page order. A successful result may
    /// be empty if no page contained any text; deciding what to do about that
    /// is up to the caller.
    #[instrument(level = "debug", skip_all, fields(id = %doc.id))]
    pub async fn process(
        &self,
        doc: &Document,
        language_hints: &[String],
    ) -> Result<String, ProcessingError> {
        let rasterization_error = |cause: anyhow::Error| ProcessingError::Rasterization {
            document: doc.id.clone(),
            cause,
        };

        let pages = self
            .rasterizer
            .rasterize(&doc.path)
            .await
            .map_err(rasterization_error)?;

        // Decoding pages is CPU-heavy, so pull them on the blocking pool. Only
        // one page is ever in flight.
        let mut pages = BlockingIter::new(pages);
        let mut page_texts = vec![];
        while let Some(page) = pages.next().await {
            let page_idx = page_texts.len();
            let page = page
                .with_context(|| format!("failed to load page {}", page_idx + 1))
                .map_err(rasterization_error)?;
            let prediction = self
                .engine
                .recognize(OcrPageInput {
                    document_id: &doc.id,
                    page_idx,
                    image: page.into_rgb8(),
                    language_hints,
                })
                .await
                .map_err(|cause| ProcessingError::Ocr {
                    document: doc.id.clone(),
                    page_index: page_idx,
                    cause,
                })?;
            let page_text = clean_text(&reduce_lines(&prediction.line_texts()));
            debug!(
                page = page_idx + 1,
                lines = prediction.text_lines.len(),
                chars = page_text.len(),
                "OCRed page"
            );
            page_texts.push(page_text);
        }

        Ok(reduce_document(&page_texts))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use image::{DynamicImage, RgbaImage};

    use super::*;
    use crate::{ocr::OcrPrediction, rasterize::PageImages};

    /// How a fake document should rasterize.
    #[derive(Clone, Debug)]
    pub enum FakePages {
        /// This many blank pages.
        Count(usize),
        /// Rasterization fails outright.
        Fail,
        /// The first `n` pages load, then the next one fails to load.
        FailAfter(usize),
    }

    /// A [`Rasterizer`] that produces blank pages according to a table keyed
    /// by file name.
    #[derive(Default)]
    pub struct FakeRasterizer {
        pub documents: HashMap<String, FakePages>,
        pub calls: AtomicUsize,
    }

    impl FakeRasterizer {
        pub fn with(mut self, id: &str, pages: FakePages) -> Self {
            self.documents.insert(id.to_owned(), pages);
            self
        }
    }

    #[async_trait]
    impl Rasterizer for FakeRasterizer {
        async fn rasterize(&self, path: &Path) -> Result<PageImages> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = path
                .file_name()
                .context("no file name")?
                .to_string_lossy()
                .into_owned();
            // Use RGBA pages, so that the processor has to convert them.
            let blank = || -> Result<DynamicImage> {
                Ok(DynamicImage::ImageRgba8(RgbaImage::new(4, 4)))
            };
            match self.documents.get(&id) {
                Some(FakePages::Count(n)) => {
                    Ok(Box::new((0..*n).map(move |_| blank())) as PageImages)
                }
                Some(FakePages::FailAfter(n)) => Ok(Box::new(
                    (0..*n)
                        .map(move |_| blank())
                        .chain(std::iter::once(Err(anyhow!("truncated page stream")))),
                ) as PageImages),
                Some(FakePages::Fail) => Err(anyhow!("{} is not a valid PDF", id)),
                None => Err(anyhow!("unknown fake document {}", id)),
            }
        }
    }

    /// An [`OcrEngine`] that returns canned lines for each `(document, page)`.
    /// Pages without an entry OCR to nothing. `None` entries fail.
    #[derive(Default)]
    pub struct FakeOcrEngine {
        pub pages: HashMap<(String, usize), Option<Vec<String>>>,
        pub seen: Mutex<Vec<(String, usize, Vec<String>)>>,
    }

    impl FakeOcrEngine {
        pub fn with(mut self, id: &str, page_idx: usize, lines: &[&str]) -> Self {
            self.pages.insert(
                (id.to_owned(), page_idx),
                Some(lines.iter().map(|s| s.to_string()).collect()),
            );
            self
        }

        pub fn failing(mut self, id: &str, page_idx: usize) -> Self {
            self.pages.insert((id.to_owned(), page_idx), None);
            self
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcrEngine {
        async fn recognize(&self, input: OcrPageInput<'_>) -> Result<OcrPrediction> {
            self.seen.lock().expect("lock poisoned").push((
                input.document_id.to_owned(),
                input.page_idx,
                input.language_hints.to_vec(),
            ));
            match self.pages.get(&(input.document_id.to_owned(), input.page_idx)) {
                Some(Some(lines)) => Ok(OcrPrediction::from_lines(lines.clone())),
                Some(None) => Err(anyhow!("engine crashed")),
                None => Ok(OcrPrediction::default()),
            }
        }
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_owned(),
            path: PathBuf::from("/books").join(id),
        }
    }

    fn hints() -> Vec<String> {
        vec!["ara".to_owned()]
    }

    #[tokio::test]
    async fn pages_are_reduced_and_cleaned_in_order() -> Result<()> {
        let rasterizer = FakeRasterizer::default().with("a.pdf", FakePages::Count(2));
        let engine = Arc::new(
            FakeOcrEngine::default()
                .with("a.pdf", 0, &["Hello", "World"])
                .with("a.pdf", 1, &["Foo"]),
        );
        let processor = DocumentProcessor::new(Arc::new(rasterizer), engine.clone());
        let text = processor.process(&doc("a.pdf"), &hints()).await?;
        assert_eq!(text, "Hello World Foo");

        let seen = engine.seen.lock().expect("lock poisoned").clone();
        assert_eq!(
            seen,
            vec![
                ("a.pdf".to_owned(), 0, hints()),
                ("a.pdf".to_owned(), 1, hints()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn messy_whitespace_is_collapsed_across_lines_and_pages() -> Result<()> {
        let rasterizer = FakeRasterizer::default().with("a.pdf", FakePages::Count(3));
        let engine = FakeOcrEngine::default()
            .with("a.pdf", 0, &["  مرحبا\t", "\n", "بالعالم  "])
            .with("a.pdf", 2, &[" last\npage "]);
        let processor = DocumentProcessor::new(Arc::new(rasterizer), Arc::new(engine));
        let text = processor.process(&doc("a.pdf"), &hints()).await?;
        assert_eq!(text, "مرحبا بالعالم last page");
        Ok(())
    }

    #[tokio::test]
    async fn rasterization_failure_is_reported() {
        let rasterizer = FakeRasterizer::default().with("b.pdf", FakePages::Fail);
        let engine = Arc::new(FakeOcrEngine::default());
        let processor = DocumentProcessor::new(Arc::new(rasterizer), engine.clone());
        let err = processor
            .process(&doc("b.pdf"), &hints())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Rasterization { .. }));
        assert_eq!(err.document(), "b.pdf");
        assert!(engine.seen.lock().expect("lock poisoned").is_empty());
    }

    #[tokio::test]
    async fn page_load_failure_is_a_rasterization_error() {
        let rasterizer = FakeRasterizer::default().with("c.pdf", FakePages::FailAfter(1));
        let engine = FakeOcrEngine::default().with("c.pdf", 0, &["text"]);
        let processor = DocumentProcessor::new(Arc::new(rasterizer), Arc::new(engine));
        let err = processor
            .process(&doc("c.pdf"), &hints())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Rasterization { .. }));
        let msg = format!("{:#}", anyhow::Error::from(err));
        assert!(msg.contains("page 2"), "{msg}");
    }

    #[tokio::test]
    async fn ocr_failure_discards_the_whole_document() {
        let rasterizer = FakeRasterizer::default().with("d.pdf", FakePages::Count(3));
        let engine = Arc::new(
            FakeOcrEngine::default()
                .with("d.pdf", 0, &["first page"])
                .failing("d.pdf", 1)
                .with("d.pdf", 2, &["never reached"]),
        );
        let processor = DocumentProcessor::new(Arc::new(rasterizer), engine.clone());
        let err = processor
            .process(&doc("d.pdf"), &hints())
            .await
            .unwrap_err();
        match &err {
            ProcessingError::Ocr {
                document,
                page_index,
                ..
            } => {
                assert_eq!(document, "d.pdf");
                assert_eq!(*page_index, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "OCR failed on page 2 of d.pdf");
        // We stop at the first failing page.
        assert_eq!(engine.seen.lock().expect("lock poisoned").len(), 2);
    }

    #[tokio::test]
    async fn blank_document_is_an_empty_success() -> Result<()> {
        let rasterizer = FakeRasterizer::default().with("e.pdf", FakePages::Count(2));
        let engine = FakeOcrEngine::default().with("e.pdf", 1, &["   ", "\t"]);
        let processor = DocumentProcessor::new(Arc::new(rasterizer), Arc::new(engine));
        assert_eq!(processor.process(&doc("e.pdf"), &hints()).await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn zero_page_document_is_an_empty_success() -> Result<()> {
        let rasterizer = FakeRasterizer::default().with("f.pdf", FakePages::Count(0));
        let processor = DocumentProcessor::new(
            Arc::new(rasterizer),
            Arc::new(FakeOcrEngine::default()),
        );
        assert_eq!(processor.process(&doc("f.pdf"), &hints()).await?, "");
        Ok(())
    }
}
