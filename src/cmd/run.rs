//! The `run` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    config::ConfigOpts,
    ocr::ocr_engine_for_kind,
    prelude::*,
    processor::DocumentProcessor,
    rasterize::PopplerRasterizer,
    runner::BatchRunner,
    ui::Ui,
};

/// Options for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// Convert every document that hasn't been converted yet.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(ui: Ui, opts: &RunOpts) -> Result<()> {
    let config = opts.config.load().await?;

    let engine = ocr_engine_for_kind(config.engine, config.ocrs_model_dir.as_deref())?;
    let rasterizer = Arc::new(PopplerRasterizer::new(config.rasterize_dpi));
    let processor = DocumentProcessor::new(rasterizer, engine);

    let summary = BatchRunner::new(config, processor, ui).run().await?;
    debug!(?summary, "Batch finished");
    Ok(())
}
