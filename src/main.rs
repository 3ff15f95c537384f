use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use restmodel::{Attr, ClientConfig, EntityDef, Resolved, Session};
use serde_json::{Map, Value};

#[derive(Parser, Debug)]
#[command(name = "restmodel")]
#[command(about = "Query an object/relation REST API from the command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the configured API url
    #[arg(long, global = true)]
    url: Option<String>,

    /// Override the configured API key
    #[arg(long, global = true)]
    key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one object by id, or list a collection
    Get {
        /// Wire tag of the object type (e.g. "ticket")
        tag: String,

        /// Object id; lists the collection when omitted
        id: Option<String>,

        /// Structured filter, `key=value` (repeatable)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Free expression `key == value`, ANDed into `q` (repeatable)
        #[arg(long = "expr", value_name = "KEY=VALUE")]
        exprs: Vec<String>,

        /// Projected field (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Ordering key, e.g. `-created_at` (repeatable)
        #[arg(long = "order")]
        order: Vec<String>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        offset: Option<u64>,
    },
}

fn split_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    pair.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", pair))
}

/// JSON when it parses, a plain string otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load()?;
    if let Some(url) = cli.url {
        config.api.url = url;
    }
    if let Some(key) = cli.key {
        config.api.key = Some(key);
    }
    log::info!("Using API at {}", config.api.url);

    let mut session = Session::connect(config)?;

    match cli.command {
        Commands::Get {
            tag,
            id,
            filters,
            exprs,
            fields,
            order,
            limit,
            offset,
        } => {
            session.register(EntityDef::new(tag.clone()).object(tag.clone()))?;

            let plan = match id {
                Some(id) => session.query(&tag)?.get(&id)?,
                None => {
                    let mut query = session.query(&tag)?;
                    for pair in &filters {
                        let (key, value) = split_pair(pair)?;
                        let mut map = Map::new();
                        map.insert(key.to_string(), Value::String(value.to_string()));
                        query = query.filter_by(map);
                    }
                    for pair in &exprs {
                        let (key, value) = split_pair(pair)?;
                        query = query.filter(Attr::root().field(key).eq(parse_value(value)));
                    }
                    if !fields.is_empty() {
                        query = query.select(fields)?;
                    }
                    if !order.is_empty() {
                        query = query.order_by(order);
                    }
                    if let Some(limit) = limit {
                        query = query.limit(limit);
                    }
                    if let Some(offset) = offset {
                        query = query.offset(offset);
                    }
                    query.all()?
                }
            };

            let resolved = session.send(plan).await?;
            let output = match &resolved {
                Resolved::One(data) => session.to_json(data),
                Resolved::List(items) => Value::Array(items.iter().map(|d| session.to_json(d)).collect()),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to render response")?
            );
        }
    }

    Ok(())
}
