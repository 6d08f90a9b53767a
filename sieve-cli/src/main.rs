// Sieve command line interface
// Loads a field catalog and a JSON dataset and runs queries against them

use anyhow::Context;
use clap::{Parser, Subcommand};
use sieve_catalog::{CatalogSpec, ComputeTable};
use sieve_core::{LoggingConfig, SieveConfig};
use sieve_engine::{ResultAssembler, VirtualFieldEngine};
use sieve_query::RequestParams;
use sieve_storage::{CacheStore, InMemoryStore, MemoryCacheStore};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Filter, sort and paginate entities with persisted and virtual fields", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<String>,

    /// Log at debug level regardless of configuration
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query and print the JSON response
    Query {
        /// Catalog definition file
        #[arg(long)]
        catalog: String,

        /// JSON dataset shaped {"<entity_type>": [records]}
        #[arg(long)]
        data: String,

        /// Entity type to query
        #[arg(long, short)]
        entity: String,

        /// Query string, e.g. "age=>=18&sort_by=full_name&page=2"
        #[arg(default_value = "")]
        query: String,

        /// Reject invalid clauses instead of dropping them
        #[arg(long)]
        strict: bool,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a catalog definition file
    Check {
        /// Catalog definition file
        #[arg(long)]
        catalog: String,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Query {
            catalog,
            data,
            entity,
            query,
            strict,
            pretty,
        } => {
            let mut config = config;
            config.filter.strict |= strict;
            run_query(config, &catalog, &data, &entity, &query, pretty)?;
        }
        Commands::Check { catalog } => {
            let catalog = load_catalog(&catalog)?;
            println!(
                "{} fields, {} virtual fields, {} aliases",
                catalog.fields().count(),
                catalog.virtual_fields().count(),
                catalog.aliases().len()
            );
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> anyhow::Result<SieveConfig> {
    let config = match path {
        Some(path) => SieveConfig::from_file(path)?,
        None => SieveConfig::default(),
    }
    .with_env();
    config.validate()?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_catalog(path: &str) -> anyhow::Result<sieve_catalog::FieldCatalog> {
    let spec = CatalogSpec::from_file(path)?;
    let catalog = spec
        .into_catalog(&ComputeTable::with_builtins())
        .with_context(|| format!("invalid catalog definition in {}", path))?;
    Ok(catalog)
}

fn run_query(
    config: SieveConfig,
    catalog: &str,
    data: &str,
    entity: &str,
    query: &str,
    pretty: bool,
) -> anyhow::Result<()> {
    let catalog = Arc::new(load_catalog(catalog)?);

    let raw = std::fs::read_to_string(data).with_context(|| format!("failed to read {}", data))?;
    let dataset: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", data))?;
    let store = Arc::new(InMemoryStore::from_json(&dataset)?);

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new(config.cache.max_entries));
    let engine = Arc::new(
        VirtualFieldEngine::new(catalog, config.computation.clone())
            .with_cache(cache.clone(), config.cache.clone()),
    );
    let assembler = ResultAssembler::new(engine, store, config).with_sort_cache(cache);

    let params = RequestParams::parse_query(query);
    info!("Running query on {}: {}", entity, query);

    let output = match assembler.execute(entity, &params) {
        Ok(response) => serde_json::to_value(&response)?,
        Err(err) => {
            error!("Query failed: {}", err);
            let response = err.to_response();
            print_json(&serde_json::to_value(&response)?, pretty)?;
            std::process::exit(1);
        }
    };
    print_json(&output, pretty)
}

fn print_json(value: &serde_json::Value, pretty: bool) -> anyhow::Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}
