use chrono::Utc;
use usagedeck::pricing::{CLAUDE_PRICE_PREFIXES, CODEX_MODEL_ALIASES, CODEX_PRICE_PREFIXES};
use usagedeck::{Aggregator, FilterMode, PricingCache, ProviderId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug)]
struct CliArgs {
    command: String,
    format: OutputFormat,
    provider: Option<String>,
    filter: FilterMode,
    page: usize,
    page_size: usize,
    model: Option<String>,
    pretty: bool,
}

#[tokio::main]
async fn main() {
    usagedeck::init_logging();

    let args = parse_args(std::env::args().skip(1).collect());
    if args.command == "--help" || args.command == "-h" {
        print_help();
        return;
    }
    if args.command == "--version" || args.command == "-V" {
        println!("usagedeck {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match args.command.as_str() {
        "usages" => run_usages(args).await,
        "pricing" => run_pricing(args).await,
        _ => Err(format!(
            "Unknown command: {}. Use --help for usage.",
            args.command
        )),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn parse_args(mut argv: Vec<String>) -> CliArgs {
    let mut format = OutputFormat::Text;
    let mut pretty = false;
    let mut provider = None;
    let mut filter = FilterMode::Monthly;
    let mut page = 1usize;
    let mut page_size = 50usize;
    let mut model = None;
    let mut command = String::new();

    if let Some(first) = argv.first() {
        if !first.starts_with('-') {
            command = argv.remove(0);
        }
    }
    if command.is_empty() {
        command = "usages".to_string();
    }

    let mut iter = argv.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                if let Some(value) = iter.next() {
                    if value == "json" {
                        format = OutputFormat::Json;
                    } else if value == "text" {
                        format = OutputFormat::Text;
                    }
                }
            }
            "--json" => {
                format = OutputFormat::Json;
            }
            "--pretty" => pretty = true,
            "--provider" => provider = iter.next(),
            "--filter" => {
                if let Some(value) = iter.next() {
                    if value == "session" {
                        filter = FilterMode::Session;
                    } else if value == "monthly" {
                        filter = FilterMode::Monthly;
                    }
                }
            }
            "--page" => {
                if let Some(value) = iter.next() {
                    page = value.parse().unwrap_or(page);
                }
            }
            "--page-size" => {
                if let Some(value) = iter.next() {
                    page_size = value.parse().unwrap_or(page_size);
                }
            }
            "--model" => model = iter.next(),
            "--help" | "-h" | "--version" | "-V" => {
                command = arg;
                break;
            }
            _ => {}
        }
    }

    CliArgs {
        command,
        format,
        provider,
        filter,
        page,
        page_size,
        model,
        pretty,
    }
}

fn select_providers(provider: Option<&str>) -> Result<Vec<ProviderId>, String> {
    match provider {
        Some("all") | None => Ok(Vec::new()),
        Some("claude") => Ok(vec![ProviderId::Claude]),
        Some("codex") => Ok(vec![ProviderId::Codex]),
        Some("cursor") => Ok(vec![ProviderId::Cursor]),
        Some(other) => Err(format!("Unknown provider: {other}")),
    }
}

async fn run_usages(args: CliArgs) -> Result<(), String> {
    let providers = select_providers(args.provider.as_deref())?;
    let aggregator = Aggregator::new(Utc::now());
    let result = aggregator
        .usages(args.page, args.page_size, args.filter, &providers)
        .await;

    match args.format {
        OutputFormat::Json => print_json(&result, args.pretty),
        OutputFormat::Text => {
            for entry in &result.entries {
                println!(
                    "{}  {:<6}  {:<34}  {:>10} tok  {:>10}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.provider.as_str(),
                    entry.model,
                    entry.total_tokens,
                    format_usd(entry.cost),
                );
            }
            println!(
                "\n{} entries, {} total (page {} of {})",
                result.total_count,
                format_usd(result.total_cost),
                result.page,
                result.total_pages.max(1),
            );
            Ok(())
        }
    }
}

async fn run_pricing(args: CliArgs) -> Result<(), String> {
    let cache = PricingCache::new();
    let table = cache.get().await;

    match args.model.as_deref() {
        Some(model) => {
            let rates = usagedeck::pricing::resolve(&table, model, CLAUDE_PRICE_PREFIXES, &[])
                .or_else(|| {
                    usagedeck::pricing::resolve(
                        &table,
                        model,
                        CODEX_PRICE_PREFIXES,
                        CODEX_MODEL_ALIASES,
                    )
                });
            match rates {
                Some(rates) => {
                    println!("{model}");
                    println!(
                        "  input: {}/token",
                        rate(rates.input_cost_per_token)
                    );
                    println!(
                        "  output: {}/token",
                        rate(rates.output_cost_per_token)
                    );
                    println!(
                        "  cache write: {}/token",
                        rate(rates.cache_creation_input_token_cost)
                    );
                    println!(
                        "  cache read: {}/token",
                        rate(rates.cache_read_input_token_cost)
                    );
                    Ok(())
                }
                None => Err(format!("No pricing found for model: {model}")),
            }
        }
        None => {
            println!("{} models priced", table.len());
            Ok(())
        }
    }
}

fn rate(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("${value}"),
        None => "n/a".to_string(),
    }
}

fn format_usd(amount: f64) -> String {
    format!("${:.4}", amount)
}

fn print_json<T: serde::Serialize>(payload: &T, pretty: bool) -> Result<(), String> {
    let output = if pretty {
        serde_json::to_string_pretty(payload)
    } else {
        serde_json::to_string(payload)
    }
    .map_err(|err| err.to_string())?;
    println!("{output}");
    Ok(())
}

fn print_help() {
    println!(
        "usagedeck {}\n\nUsage:\n  usagedeck usages [--filter session|monthly] [--provider <id|all>] [--page N] [--page-size N] [--format text|json] [--pretty]\n  usagedeck pricing [--model <name>]\n\nCommands:\n  usages   Print merged usage entries across providers\n  pricing  Inspect the model price table\n\nFlags:\n  --filter <session|monthly>  Time window (default monthly)\n  --provider <id|all>         claude, codex, cursor or all\n  --page <N>                  Page number, 1-indexed\n  --page-size <N>             Entries per page\n  --format <text|json>        Output format\n  --json                      Shortcut for --format json\n  --pretty                    Pretty-print JSON output\n  --model <name>              Model to look up (pricing command)\n  -h, --help                  Show help\n  -V, --version               Show version",
        env!("CARGO_PKG_VERSION")
    );
}
