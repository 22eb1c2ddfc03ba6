use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use search_syntax::sql_compiler::SqlCompiler;
use search_syntax::{collect_filters, parse_search_with_config, LogicTree, SearchConfig};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Load the config named on the command line, or the defaults.
fn load_config() -> Result<SearchConfig> {
    match std::env::args().nth(1) {
        Some(path) => SearchConfig::from_json_file(&path)
            .with_context(|| format!("failed to load search config from {path}")),
        None => Ok(SearchConfig::default()),
    }
}

fn run_query(line: &str, config: &Arc<SearchConfig>, compiler: &SqlCompiler) -> Result<()> {
    let tokens = match parse_search_with_config(line, Arc::clone(config)) {
        Ok(tokens) => tokens,
        Err(e) => {
            println!("✗ parse failed: {e}");
            if let Some(span) = e.span() {
                println!("  {line}");
                println!("  {}^", " ".repeat(line[..span.start.min(line.len())].chars().count()));
            }
            return Ok(());
        }
    };

    println!("[tokens]:");
    println!(
        "{}",
        serde_json::to_string_pretty(&tokens).context("failed to serialize tokens")?
    );

    let invalid: Vec<_> = collect_filters(&tokens)
        .into_iter()
        .filter_map(|filter| filter.invalid.as_ref().map(|invalid| (filter, invalid)))
        .collect();
    if !invalid.is_empty() {
        println!("\n[diagnostics]:");
        for (filter, invalid) in invalid {
            println!(
                "• {}-{} `{}{}`: {} ({})",
                filter.key.location.start,
                filter.value.location.end,
                filter.key.text,
                filter.operator.symbol(),
                invalid.message,
                invalid.reason
            );
        }
    }

    match LogicTree::build(&tokens) {
        Some(tree) => println!("\n[logic]: {tree}"),
        None => println!("\n[logic]: (no terms)"),
    }

    match compiler.compile(&tokens) {
        Ok(result) => {
            println!("\n[sql]: {}", result.sql);
            for opt in &result.optimizations {
                println!("• {:?}", opt);
            }
        }
        Err(e) => println!("\n[sql]: ✗ {e}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(load_config()?);
    let compiler = SqlCompiler::new();

    println!("--- search syntax: query to token tree and SQL ---");
    println!("Enter a query, or Ctrl-D to exit.");

    let mut rl = DefaultEditor::new().context("failed to start line editor")?;
    loop {
        match rl.readline("search> ") {
            Ok(line) => {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(line) {
                    warn!(error = %e, "failed to record history");
                }
                run_query(line, &config, &compiler)?;
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("failed to read line"),
        }
    }
    Ok(())
}
