use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod config;
mod error_log;
mod ocr;
mod prelude;
mod processed_set;
mod processor;
mod rasterize;
mod runner;
mod text;
mod ui;

/// Convert a directory of scanned PDFs into cleaned plain text, resuming where
/// the last run left off.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
External tools:
  - pdfinfo and pdftocairo (from poppler-utils) are used to rasterize PDFs.
  - tesseract is used for OCR, with the language packs you ask for.

Environment Variables:
  - RUST_LOG (optional): Logging filter, such as `debug` or
    `pdf_ocr_batch=trace`. Defaults to `info`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Convert every PDF in the source directory that hasn't been converted yet.
    Run(cmd::run::RunOpts),
    /// Show how many documents are converted and how many are pending.
    Status(cmd::status::StatusOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Run(_) => false,
            Cmd::Status(_) => true,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Run(run_opts) => cmd::run::cmd_run(ui, run_opts).await?,
        Cmd::Status(status_opts) => cmd::status::cmd_status(status_opts).await?,
    }
    Ok(())
}
