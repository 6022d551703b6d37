use anyhow::{Context, Result};
use clap::Parser;
use mapsite::config::ParserConfig;
use mapsite::sitemap::{MapSiteResult, SitemapParser, XmlExtractor};
use secrecy::SecretString;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// Get the default config file path (~/.config/mapsite/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("mapsite")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "mapsite",
    about = "Fetch a sitemap or sitemap index and print every page URL it lists"
)]
struct Args {
    /// Sitemap URL (http, https, file) or local path
    #[arg(required_unless_present = "stdin")]
    source: Option<String>,

    /// Read the root document from standard input instead
    #[arg(long, conflicts_with = "source")]
    stdin: bool,

    /// Config file (defaults to ~/.config/mapsite/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Index levels to expand below the root (1-10)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Extra attempts per fetch (1-10)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Connect and read timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    user_agent: Option<String>,

    /// Proxy URI; upstream certificates are not validated through it
    #[arg(long, value_name = "URI")]
    proxy: Option<String>,

    /// Accept any Content-Type
    #[arg(long)]
    no_validate_content_type: bool,

    /// Maximum concurrent child fetches per index level
    #[arg(long)]
    concurrency: Option<usize>,

    /// Use the strict XML extractor instead of the line scanner
    #[arg(long)]
    strict_xml: bool,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    /// CLI flags take precedence over the config file.
    fn apply(&self, config: &mut ParserConfig) {
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(retries) = self.max_retries {
            config.fetch.max_retries = retries;
        }
        if let Some(timeout) = self.timeout_ms {
            config.fetch.timeout_ms = timeout;
        }
        if let Some(agent) = &self.user_agent {
            config.fetch.user_agent = agent.clone();
        }
        if let Some(proxy) = &self.proxy {
            config.fetch.proxy_uri = Some(SecretString::from(proxy.clone()));
        }
        if self.no_validate_content_type {
            config.fetch.validate_content_type = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = ParserConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    args.apply(&mut config);

    let mut parser = SitemapParser::new(config).context("Invalid configuration")?;
    if args.strict_xml {
        parser = parser.with_extractor(XmlExtractor);
    }

    let result = if args.stdin {
        let mut buffer = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buffer)
            .await
            .context("Failed to read standard input")?;
        parser.from_buffer(&buffer).await
    } else {
        let source = args
            .source
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No sitemap source given"))?;
        parser.run(source).await
    };

    print_result(&result, args.json)?;

    if result.urls.is_empty() && !result.errors.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &MapSiteResult, json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if json {
        serde_json::to_writer_pretty(&mut out, result).context("Failed to write JSON")?;
        writeln!(out)?;
        return Ok(());
    }

    for url in &result.urls {
        writeln!(out, "{url}")?;
    }
    for error in &result.errors {
        eprintln!("error: {}: {}", error.url, error.reason);
    }
    if result.is_empty() {
        eprintln!("No URLs found ({})", result.kind);
    }
    Ok(())
}
