//! Issue extract command

use clap::Args;
use pulse_github::{IssuePipeline, IssueRow};

use super::{warn_incomplete, Context};
use crate::output::write_csv;

/// Issue extract options
#[derive(Args, Debug, Default)]
pub struct IssuesArgs {
    /// Only scan the first `timeline_window` timeline events of each issue
    #[arg(long)]
    pub bounded_timeline: bool,
}

impl IssuesArgs {
    /// Execute the issue extract
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let mut config = ctx.config.clone();
        if self.bounded_timeline {
            config.fetch.full_timeline = false;
        }

        let pipeline = IssuePipeline::from_config(ctx.executor.clone(), &config)?.with_budget(ctx.budget.clone());
        let report = pipeline.run().await?;

        let path = config.output.issues_path();
        write_csv(&path, &IssueRow::HEADERS, &report.rows)?;

        println!(
            "Wrote {} issues to {} ({} linked pull requests, {} unresolved)",
            report.stats.issues,
            path.display(),
            report.stats.unique_prs,
            report.stats.failed_prs
        );

        warn_incomplete("issue", report.issue_listing_error.as_ref());
        if !report.failures.is_empty() {
            eprintln!("Contributors could not be resolved for:");
            for failure in &report.failures {
                eprintln!("  {}: {}", failure.key, failure.error);
            }
        }

        Ok(())
    }
}
