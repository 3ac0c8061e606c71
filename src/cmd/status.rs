//! The `status` subcommand.

use clap::Args;

use crate::{
    config::ConfigOpts, prelude::*, processed_set::ProcessedSetStore,
    runner::find_documents,
};

/// Options for the `status` subcommand.
#[derive(Args, Debug)]
pub struct StatusOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,

    /// List the documents that still need converting.
    #[clap(long)]
    pub list_pending: bool,
}

/// Report how far the batch has got, without converting anything.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_status(opts: &StatusOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let scan = find_documents(&config).await?;
    let documents = scan.documents;
    let processed = ProcessedSetStore::new(&config.processed_set_path)
        .load()
        .await?;

    let pending = documents
        .iter()
        .filter(|doc| !processed.contains(&doc.id))
        .collect::<Vec<_>>();
    println!("Documents: {}", documents.len());
    println!("Processed: {}", documents.len() - pending.len());
    println!("Pending:   {}", pending.len());
    if !scan.rejected.is_empty() {
        println!("Unusable:  {} (rename to convert)", scan.rejected.len());
    }
    if opts.list_pending {
        for doc in pending {
            println!("{}", doc.id);
        }
        for candidate in &scan.rejected {
            println!("{:?} ({})", candidate.path.display(), candidate.reason);
        }
    }
    Ok(())
}
