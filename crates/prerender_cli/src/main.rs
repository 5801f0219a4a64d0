use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prerender::{sanitize_error, PlatformConfig, PoolConfig, RenderPool, StaticPage};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prerender - Render an HTML document on the server
#[derive(Parser, Debug)]
#[command(name = "prerender")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Document to render; reads stdin when omitted or "-"
    document: Option<PathBuf>,

    /// Request URL the page is rendered for
    #[arg(long, env = "PRERENDER_URL")]
    url: Option<String>,

    /// Base URL used to make outbound requests absolute
    #[arg(long, env = "PRERENDER_BASE_URL")]
    base_url: Option<String>,

    /// Resolve relative outbound requests against the base URL
    #[arg(long, env = "PRERENDER_USE_ABSOLUTE_URL")]
    use_absolute_url: bool,

    /// Application id used to tag injected styles
    #[arg(long, env = "PRERENDER_APP_ID")]
    app_id: Option<String>,

    /// Selector of the application root element
    #[arg(long, env = "PRERENDER_ROOT")]
    root: Option<String>,

    /// Document title to set
    #[arg(long)]
    title: Option<String>,

    /// JSON object file embedded as transfer state
    #[arg(long)]
    state: Option<PathBuf>,

    /// Number of render workers
    #[arg(long, default_value = "1", env = "PRERENDER_WORKERS")]
    workers: usize,

    /// Render timeout in milliseconds
    #[arg(long, default_value = "10000", env = "PRERENDER_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Output file; writes stdout when omitted
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber; stdout carries the rendered document
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prerender=info,prerender_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let document = read_document(cli.document.as_deref())?;
    let config = build_config(&cli, document)?;
    let page = build_page(&cli)?;

    let pool = RenderPool::new(PoolConfig::new(cli.workers, 1, cli.timeout_ms)?)?;
    let html = pool
        .render(Arc::new(page), config)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Render failed");
            anyhow::anyhow!(sanitize_error(&e))
        })?;

    match &cli.output {
        Some(path) => {
            std::fs::write(path, &html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = html.len(), "Document written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(html.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    Ok(())
}

/// Read the document from `path`, or from stdin for `None` and `-`.
fn read_document(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document {}", path.display())),
        _ => {
            let mut document = String::new();
            std::io::stdin()
                .read_to_string(&mut document)
                .context("Failed to read document from stdin")?;
            Ok(document)
        }
    }
}

fn build_config(cli: &Cli, document: String) -> Result<PlatformConfig> {
    let mut builder = PlatformConfig::builder(document).use_absolute_url(cli.use_absolute_url);
    if let Some(url) = &cli.url {
        builder = builder.url(url);
    }
    if let Some(base_url) = &cli.base_url {
        builder = builder.base_url(base_url);
    }
    if let Some(app_id) = &cli.app_id {
        builder = builder.app_id(app_id);
    }
    Ok(builder.build()?)
}

fn build_page(cli: &Cli) -> Result<StaticPage> {
    let mut page = StaticPage::new();
    if let Some(root) = &cli.root {
        page = page.root(root);
    }
    if let Some(title) = &cli.title {
        page = page.title(title);
    }
    if let Some(path) = &cli.state {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state {}", path.display()))?;
        page = page.state(parse_state(&raw)?);
    }
    Ok(page)
}

/// Transfer state must be a JSON object.
fn parse_state(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("Transfer state is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Transfer state must be a JSON object, got {other}"),
    }
}
