//! Turning PDF documents into page images.

use std::{fs, sync::LazyLock, vec};

use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{DEFAULT_ERROR_REGEX, check_for_command_failure},
    prelude::*,
};

/// The only input type we know how to rasterize.
const PDF_MIME_TYPE: &str = "application/pdf";

/// Poppler prints this when it repairs a damaged cross-reference table. The
/// output is usually fine.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of Poppler output contain an error?
fn is_error_line(line: &str) -> bool {
    DEFAULT_ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// The pages of one document, in page order. Pages are loaded lazily, so a
/// page that can't be loaded shows up as an `Err` item.
pub type PageImages = Box<dyn Iterator<Item = Result<DynamicImage>> + Send>;

/// Something that can turn a document into page images.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Rasterize the document at `path`.
    async fn rasterize(&self, path: &Path) -> Result<PageImages>;
}

/// A [`Rasterizer`] using Poppler's `pdfinfo` and `pdftocairo` CLI tools.
pub struct PopplerRasterizer {
    /// Resolution of the rendered pages.
    dpi: u32,
}

impl PopplerRasterizer {
    /// Create a rasterizer rendering at `dpi` dots per inch.
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi = self.dpi))]
    async fn rasterize(&self, path: &Path) -> Result<PageImages> {
        // Check the contents, not the extension, so we fail early and clearly
        // on files that were misnamed.
        let mime_type = get_mime_type(path)?;
        if mime_type != PDF_MIME_TYPE {
            return Err(anyhow!(
                "unsupported MIME type {} for {:?} (expected {})",
                mime_type,
                path.display(),
                PDF_MIME_TYPE
            ));
        }

        let total_pages = get_pdf_page_count(path).await?;
        let filename = path
            .file_name()
            .context("failed to get filename from PDF path")?;

        // Render every page into a temporary directory. pdftocairo adds
        // zero-padded page numbers to this name.
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let out_path = tmpdir.path().join(filename).with_extension("");
        let output = Command::new("pdftocairo")
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(path)
            .arg(&out_path)
            .output()
            .await
            .with_context(|| format!("failed to run pdftocairo on {:?}", path.display()))?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let pages = RenderedPages::from_tempdir(tmpdir)?;
        if pages.len() != total_pages {
            return Err(anyhow!(
                "pdftocairo produced {} pages for {:?}, but pdfinfo reported {}",
                pages.len(),
                path.display(),
                total_pages
            ));
        }
        Ok(Box::new(pages))
    }
}

/// An iterator over page images rendered into a temporary directory.
///
/// Each page file is deleted as soon as it has been decoded, and the whole
/// directory goes away on drop.
struct RenderedPages {
    /// Released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    /// Page files, sorted into page order.
    paths: vec::IntoIter<PathBuf>,
}

impl RenderedPages {
    /// Collect the PNG files in `tmpdir`. pdftocairo zero-pads page numbers,
    /// so lexical order is page order.
    fn from_tempdir(tmpdir: tempfile::TempDir) -> Result<Self> {
        let mut paths = vec![];
        let entries = fs::read_dir(tmpdir.path())
            .with_context(|| format!("cannot list rendered pages in {:?}", tmpdir.path()))?;
        for entry in entries {
            let path = entry.context("cannot read rendered page entry")?.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self {
            tmpdir: Some(tmpdir),
            paths: paths.into_iter(),
        })
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

impl Drop for RenderedPages {
    fn drop(&mut self) {
        let Some(tmpdir) = self.tmpdir.take() else {
            return;
        };
        let dir = tmpdir.path().to_owned();
        if let Err(err) = tmpdir.close() {
            warn!(dir = %dir.display(), "could not remove rendered pages: {}", err);
        }
    }
}

impl Iterator for RenderedPages {
    type Item = Result<DynamicImage>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        Some(load_page(&path))
    }
}

/// Decode one rendered page, then delete it to recover space early.
fn load_page(path: &Path) -> Result<DynamicImage> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read file {:?}", path.display()))?;
    fs::remove_file(path)
        .with_context(|| format!("failed to delete file {:?}", path.display()))?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .with_context(|| format!("failed to decode page image {:?}", path.display()))
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output).with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Pull the `Pages:` property out of `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let value = output
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == "Pages").then(|| value.trim())
        })
        .ok_or_else(|| anyhow!("no \"Pages\" line in pdfinfo output"))?;
    value
        .parse::<usize>()
        .with_context(|| format!("bad page count {:?} in pdfinfo output", value))
}

/// Get the MIME type of a file.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}
