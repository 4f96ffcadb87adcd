// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Graph command - visualize task references

use miette::Result;
use std::path::PathBuf;

use super::GraphFormat;
use crate::config::BuildFile;
use crate::pipeline::TaskGraph;

/// Run the graph command
pub async fn run(file: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let build_file = BuildFile::from_file(&file)?;
    let graph = TaskGraph::build(&build_file.tasks)?;

    let output = match format {
        GraphFormat::Text => graph.to_text()?,
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
