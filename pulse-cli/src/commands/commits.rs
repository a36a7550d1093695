//! Commit extract command

use pulse_github::{fetch_commits, CommitQuery, CommitRow};

use super::{warn_incomplete, Context};
use crate::output::write_csv;

pub async fn execute(ctx: &Context) -> anyhow::Result<()> {
    let query = CommitQuery::from_config(&ctx.config)?;
    let extract = fetch_commits(ctx.executor.as_ref(), &query, &ctx.budget).await?;

    let path = ctx.config.output.commits_path();
    write_csv(&path, &CommitRow::HEADERS, &extract.rows)?;

    println!(
        "Wrote {} commits from {} to {}",
        extract.rows.len(),
        extract.branch,
        path.display()
    );
    warn_incomplete("commit", extract.stopped_early.as_ref());

    Ok(())
}
