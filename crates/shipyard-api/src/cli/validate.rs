//! `validate` command: check a shipyard file without starting the service.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use shipyard_types::shipyard::{Shipyard, parse_shipyard};

/// Parse and validate `file`, then print its stages and sequences.
pub async fn validate(file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let shipyard = parse_shipyard(&content)
        .with_context(|| format!("{} is not a valid shipyard", file.display()))?;

    print!("{}", render(&shipyard));
    Ok(())
}

fn render(shipyard: &Shipyard) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "  {} {} ({})\n\n",
        style("✓").green(),
        style(&shipyard.metadata.name).cyan(),
        shipyard.api_version
    ));

    for stage in &shipyard.spec.stages {
        out.push_str(&format!("  {}\n", style(&stage.name).bold()));
        for sequence in &stage.sequences {
            let tasks: Vec<&str> = sequence.tasks.iter().map(|t| t.name.as_str()).collect();
            out.push_str(&format!("    {}: {}\n", sequence.name, tasks.join(" -> ")));
            for trigger in &sequence.triggered_on {
                out.push_str(&format!(
                    "      {} {}\n",
                    style("on").dim(),
                    trigger.event
                ));
            }
        }
    }
    out.push('\n');
    out
}
