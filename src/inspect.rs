//! Read-only views: the reconstructed commit graph of an origin and the
//! parsed contents of a single `,v` file.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use cvs_loader_core::changeset::CommitGraph;
use cvs_loader_core::models::FileHistory;
use cvs_loader_core::rcs::parse_rcs;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::loader::{open_origin, reconstruct_origin};
use crate::progress::LoadProgressReporter;

/// Print the commit graph reconstructed from the configured origin.
pub async fn run_graph(
    config: &Config,
    json: bool,
    cancel: &CancelToken,
    progress: Arc<dyn LoadProgressReporter>,
) -> Result<()> {
    let origin = open_origin(config)?;
    let reconstructed = reconstruct_origin(&origin, config, cancel, progress).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reconstructed.graph)?);
    } else {
        print!("{}", render_graph(&reconstructed.graph));
        for w in reconstructed.warnings.iter().chain(&reconstructed.graph.warnings) {
            eprintln!("warning: {}", w);
        }
    }
    Ok(())
}

fn render_graph(graph: &CommitGraph) -> String {
    let mut out = String::new();
    for c in &graph.commits {
        let parents: Vec<String> = c.parents.iter().map(|p| p.to_string()).collect();
        out.push_str(&format!(
            "#{} {} {} {} parents=[{}]\n",
            c.id,
            c.timestamp.format("%Y-%m-%d %H:%M:%S"),
            c.branch,
            c.author,
            parents.join(",")
        ));
        if let Some(first) = c.message.lines().next() {
            out.push_str(&format!("    {}\n", first));
        }
        for m in &c.members {
            out.push_str(&format!("    {} {}{}\n", m.revision, m.path, if m.dead { " (removed)" } else { "" }));
        }
    }
    if !graph.branches.is_empty() {
        out.push_str("\nbranches:\n");
        for (name, c) in &graph.branches {
            out.push_str(&format!("  {} -> #{}\n", name, c));
        }
    }
    if !graph.tags.is_empty() {
        out.push_str("\ntags:\n");
        for (name, c) in &graph.tags {
            out.push_str(&format!("  {} -> #{}\n", name, c));
        }
    }
    out
}

/// Parse one RCS file and print its revisions.
pub fn run_inspect(path: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(",v").to_string())
        .unwrap_or_default();
    let deleted = path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|d| d == "Attic");
    let history = parse_rcs(&name, &bytes, deleted)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else {
        print!("{}", render_history(&history));
    }
    Ok(())
}

fn render_history(history: &FileHistory) -> String {
    let mut out = format!("{}\n", history.rcs_filename());
    if let Some(head) = &history.head {
        out.push_str(&format!("  head:      {}\n", head));
    }
    if let Some(branch) = &history.default_branch {
        out.push_str(&format!("  branch:    {}\n", branch));
    }
    out.push_str(&format!("  expand:    {:?}\n", history.expand));
    out.push_str(&format!("  revisions: {}\n", history.revision_count()));
    for (name, number) in &history.symbols {
        out.push_str(&format!("  symbol:    {} = {}\n", name, number));
    }
    out.push('\n');
    for r in history.revisions() {
        let parent = history.parent(&r.number).map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        out.push_str(&format!(
            "{:<12} {} {:<10} {:<6} parent {}\n",
            r.number.to_string(),
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.author,
            r.state_label,
            parent
        ));
        if let Some(first) = r.message.lines().next() {
            out.push_str(&format!("             {}\n", first));
        }
    }
    out
}
