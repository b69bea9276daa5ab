use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;

use stratus_core::config::{ENV_ENDPOINT_URL, ENV_PROFILE, ENV_REGION, ProviderConfig};
use stratus_core::provider::Provider;
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::result_file::write_result_file;
use stratus_core::schema::{AttributeSchema, ResourceSchema};
use stratus_provider_aws::AwsProvider;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Manage AWS resources through the Cloud Control API", long_about = None)]
struct Cli {
    /// AWS region
    #[arg(long, global = true, env = "STRATUS_REGION")]
    region: Option<String>,

    /// Named credentials profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Endpoint override, e.g. a local emulator
    #[arg(long, global = true, env = "STRATUS_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported resource types
    Types,
    /// Show the attribute schema of a resource type
    Schema {
        /// Resource type, e.g. ec2_vpc
        resource_type: String,
    },
    /// Read the current state of a resource
    Read {
        resource_type: String,
        name: String,
        /// State key, e.g. vpc-0a1b or vpc-0a1b#igw-9f8e
        identifier: String,

        /// Also write the state as JSON to this file
        #[arg(long)]
        result_output_file: Option<PathBuf>,
    },
    /// Adopt an existing remote object; fails if it does not exist
    Import {
        resource_type: String,
        name: String,
        identifier: String,

        /// Also write the state as JSON to this file
        #[arg(long)]
        result_output_file: Option<PathBuf>,
    },
    /// Create a resource from a JSON attribute file
    Create {
        resource_type: String,
        name: String,
        /// JSON object of attributes
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Update a resource in place from a JSON attribute file
    Update {
        resource_type: String,
        name: String,
        identifier: String,
        /// JSON object of attributes
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Delete a resource
    Delete {
        resource_type: String,
        name: String,
        identifier: String,

        /// Disable deletion protection first
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Types => run_types(),
        Commands::Schema { resource_type } => run_schema(resource_type),
        command => run_remote(&cli, command).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn schemas() -> HashMap<&'static str, ResourceSchema> {
    stratus_provider_aws::resources::resource_types()
        .into_iter()
        .map(|t| (t.name(), t.schema()))
        .collect()
}

fn run_types() -> Result<(), String> {
    let mut schemas: Vec<_> = schemas().into_iter().collect();
    schemas.sort_by_key(|(name, _)| *name);

    for (name, schema) in schemas {
        match &schema.description {
            Some(desc) => println!("{}  {}", name.cyan().bold(), desc),
            None => println!("{}", name.cyan().bold()),
        }
    }
    Ok(())
}

fn run_schema(resource_type: &str) -> Result<(), String> {
    let schema = schemas()
        .remove(resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource_type))?;
    print!("{}", render_schema(&schema));
    Ok(())
}

fn render_schema(schema: &ResourceSchema) -> String {
    let mut out = format!("{}\n", schema.resource_type);
    if let Some(desc) = &schema.description {
        out.push_str(&format!("  {}\n", desc));
    }
    out.push('\n');

    let mut attributes: Vec<&AttributeSchema> = schema.attributes.values().collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));
    for attr in attributes {
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        }
        if attr.computed {
            flags.push("computed");
        }
        if attr.force_new {
            flags.push("force-new");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        out.push_str(&format!("  {}: {}{}\n", attr.name, attr.attr_type, flags));
        if let Some(desc) = &attr.description {
            out.push_str(&format!("      {}\n", desc));
        }
    }
    out
}

/// Environment overlaid with the global flags
fn provider_config(
    mut vars: HashMap<String, String>,
    cli: &Cli,
) -> Result<ProviderConfig, String> {
    let overrides = [
        (ENV_REGION, &cli.region),
        (ENV_PROFILE, &cli.profile),
        (ENV_ENDPOINT_URL, &cli.endpoint_url),
    ];
    for (key, value) in overrides {
        if let Some(value) = value {
            vars.insert(key.to_string(), value.clone());
        }
    }
    ProviderConfig::from_vars(&vars).map_err(|e| e.to_string())
}

/// Parse a JSON object of attributes
fn load_attributes(path: &Path) -> Result<HashMap<String, Value>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let attributes: HashMap<String, Value> = serde_json::from_str(&content).map_err(|e| {
        format!(
            "{} must be a JSON object of attributes: {}",
            path.display(),
            e
        )
    })?;
    debug!("loaded {} attribute(s) from {}", attributes.len(), path.display());
    Ok(attributes)
}

/// Write a state as pretty JSON; this is the only thing remote commands put on stdout
fn write_state(out: &mut impl Write, state: &State) -> Result<(), String> {
    let json = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
    writeln!(out, "{}", json).map_err(|e| e.to_string())
}

fn print_state(state: &State) -> Result<(), String> {
    write_state(&mut io::stdout().lock(), state)
}

async fn run_remote(cli: &Cli, command: &Commands) -> Result<(), String> {
    let config = provider_config(std::env::vars().collect(), cli)?;
    eprintln!(
        "{}",
        format!("Using AWS provider (region: {})", config.region).cyan()
    );
    let provider = AwsProvider::new(&config).await;

    match command {
        Commands::Read {
            resource_type,
            name,
            identifier,
            result_output_file,
        } => {
            let id = ResourceId::new(resource_type, name);
            let state = provider
                .read(&id, Some(identifier.as_str()))
                .await
                .map_err(|e| e.to_string())?;
            if !state.exists {
                eprintln!("{}", format!("{} does not exist", id).yellow());
            }
            finish_read(&state, result_output_file.as_deref())
        }
        Commands::Import {
            resource_type,
            name,
            identifier,
            result_output_file,
        } => {
            let id = ResourceId::new(resource_type, name);
            let state = provider
                .import(&id, identifier)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("  {} imported {}", "✓".green(), id);
            finish_read(&state, result_output_file.as_deref())
        }
        Commands::Create {
            resource_type,
            name,
            config,
        } => {
            let resource = Resource {
                id: ResourceId::new(resource_type, name),
                attributes: load_attributes(config)?,
            };
            let state = provider
                .create(&resource)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("  {} created {}", "✓".green(), resource.id);
            print_state(&state)
        }
        Commands::Update {
            resource_type,
            name,
            identifier,
            config,
        } => {
            let id = ResourceId::new(resource_type, name);
            let to = Resource {
                id: id.clone(),
                attributes: load_attributes(config)?,
            };
            let from = provider
                .read(&id, Some(identifier.as_str()))
                .await
                .map_err(|e| e.to_string())?;
            if !from.exists {
                return Err(format!("{} ({}) does not exist", id, identifier));
            }
            let state = provider
                .update(&id, identifier, &from, &to)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("  {} updated {}", "✓".green(), id);
            print_state(&state)
        }
        Commands::Delete {
            resource_type,
            name,
            identifier,
            force,
        } => {
            let id = ResourceId::new(resource_type, name);
            if *force {
                eprintln!(
                    "{}",
                    "Forced delete: deletion protection will be disabled.".yellow()
                );
            }
            provider
                .delete_resource(&id, identifier, *force)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("  {} deleted {}", "✓".green(), id);
            Ok(())
        }
        Commands::Types | Commands::Schema { .. } => Ok(()),
    }
}

fn finish_read(state: &State, result_output_file: Option<&Path>) -> Result<(), String> {
    if let Some(path) = result_output_file {
        write_result_file(path, state).map_err(|e| e.to_string())?;
    }
    print_state(state)
}
