use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jira_server_mcp::config::load_config;
use jira_server_mcp::field_filter::{filter_fields, FilterOptions};
use jira_server_mcp::field_gate::{hoist_issue_fields, FieldGate};
use jira_server_mcp::schema::EntityType;
use jira_server_mcp::server::{build_registry, run_stdio_server};
use jira_server_mcp::validator::validate_field_paths;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "jira-server-mcp")]
#[command(version)]
#[command(about = "MCP server for Jira Server / Data Center with dot-path field filtering")]
struct Cli {
    /// Validate --fields against ENTITY's catalog and print the result as JSON
    #[arg(long, value_name = "ENTITY", conflicts_with_all = ["list_paths", "filter"])]
    validate: Option<String>,

    /// Print every known path for ENTITY, one per line
    #[arg(long, value_name = "ENTITY", conflicts_with = "filter")]
    list_paths: Option<String>,

    /// Project a JSON file (`-` for stdin) down to --fields
    #[arg(long, value_name = "FILE")]
    filter: Option<PathBuf>,

    /// Comma-separated dot paths, e.g. key,status.name
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Entity type for --filter; validates the fields first (issue payloads are flattened)
    #[arg(long, value_name = "ENTITY", requires = "filter")]
    entity: Option<String>,

    /// Key --filter output by full dot path instead of nesting
    #[arg(long, requires = "filter")]
    flat: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start MCP stdio server
    Mcp,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.cmd, Some(Command::Mcp)) {
        return run_stdio_server();
    }

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let cfg = load_config(&cwd);
    let registry = &build_registry(&cfg)?;

    let fields: Vec<String> = cli
        .fields
        .iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    if let Some(entity) = cli.validate.as_deref() {
        if fields.is_empty() {
            bail!("--validate requires --fields");
        }
        let result = validate_field_paths(registry, entity, &fields)?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(entity) = cli.list_paths.as_deref() {
        let def = registry.get(entity)?;
        for path in def.all_paths() {
            println!("{path}");
        }
        return Ok(());
    }

    if let Some(file) = cli.filter.as_ref() {
        let text = if file.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        } else {
            std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
        };
        let mut value: Value = serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;

        let mut paths = fields;
        if let Some(entity) = cli.entity.as_deref() {
            let sel = FieldGate::new(registry, &cfg.field_filter).select(entity, Some(paths))?;
            if let Some(w) = sel.warning.as_deref() {
                eprintln!("[filter] WARN: {w}");
            }
            paths = sel.paths.unwrap_or_default();
            if EntityType::parse(entity) == Some(EntityType::Issue) {
                value = match value {
                    Value::Array(items) => Value::Array(items.into_iter().map(hoist_issue_fields).collect()),
                    other => hoist_issue_fields(other),
                };
            }
        }

        let opts = FilterOptions {
            entity_type: cli.entity.clone().unwrap_or_default(),
            respect_nesting: !cli.flat,
            log_filtering: cfg.field_filter.log_filtering,
        };
        let out = filter_fields(&value, Some(&paths), &opts)?;
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    eprintln!("Nothing to do. Run `jira-server-mcp mcp` to start the server, or see --help.");
    Ok(())
}
