//! Pull-request metrics command

use pulse_github::{fetch_pr_metrics, PrMetricsRow, PullQuery};

use super::{warn_incomplete, Context};
use crate::output::write_csv;

pub async fn execute(ctx: &Context) -> anyhow::Result<()> {
    let query = PullQuery::from_config(&ctx.config)?;
    if query.date_range.is_none() {
        tracing::info!("No date range set, including every pull request");
    }

    let extract = fetch_pr_metrics(ctx.executor.as_ref(), &query, &ctx.budget).await?;

    let path = ctx.config.output.prs_path();
    write_csv(&path, &PrMetricsRow::HEADERS, &extract.rows)?;

    let merged = extract.rows.iter().filter(|r| r.was_merged == 1).count();
    println!(
        "Wrote {} pull requests ({} merged) to {}",
        extract.rows.len(),
        merged,
        path.display()
    );
    warn_incomplete("pull request", extract.stopped_early.as_ref());

    Ok(())
}
