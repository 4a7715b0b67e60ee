//! Operator CLI for inspecting and watching configuration sources.
use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use clap::{Parser, Subcommand};
use nexus_config::{
    ConfigFormat, DEFAULT_GROUP, FileProvider, FileProviderOptions, RemoteOptions, RemoteProvider,
    manager::parse_content,
    provider::{ConfigKey, Provider},
    schema::redact,
    tracing_config,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "nexus-config")]
#[command(about = "Inspect and watch configuration documents")]
struct Cli {
    /// Directory served by the file provider
    #[arg(long, default_value = "configs")]
    base_path: PathBuf,

    /// Extension appended to ids that have none
    #[arg(long, default_value = "json")]
    format: ConfigFormat,

    /// Config-center address; repeat for a cluster. Selects the Nacos provider
    #[arg(long, conflicts_with = "base_path")]
    server: Vec<String>,

    /// Config-center namespace (empty for public)
    #[arg(long, default_value = "")]
    namespace: String,

    /// Config-center login name
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Config-center password
    #[arg(long, requires = "username")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a document as parsed, with sensitive fields hidden
    Get {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
        /// Print the raw text instead
        #[arg(long)]
        raw: bool,
    },
    /// Print every change to a document until interrupted
    Watch {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
        /// Polling interval in seconds (file provider)
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
    },
    /// Write a document into the file provider's tree
    Init {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
        /// Document content as a JSON object
        #[arg(long)]
        data: String,
    },
    /// Print provider details
    Info,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_config::init()?;

    let interval = match &cli.command {
        Commands::Watch { interval, .. } => Duration::try_from_secs_f64(*interval)?,
        _ => Duration::from_secs(1),
    };

    match &cli.command {
        Commands::Init { id, group, data } => {
            if !cli.server.is_empty() {
                return Err("init only works with the file provider".into());
            }
            let data: Value = serde_json::from_str(data)?;
            let path = file_provider(&cli, interval).create_sample_config(id, group, &data)?;
            println!("Wrote {}", path.display());
        }
        Commands::Get { id, group, raw } => {
            let provider = connect(&cli, interval)?;
            let content = provider.get_config(id, group)?;
            provider.disconnect();

            if *raw {
                println!("{content}");
            } else {
                let mapping = parse_content(&content, &ConfigKey::new(id.as_str(), group.as_str()))?;
                println!("{}", serde_json::to_string_pretty(&redact(mapping))?);
            }
        }
        Commands::Watch { id, group, .. } => {
            let provider = connect(&cli, interval)?;
            let key = ConfigKey::new(id.as_str(), group.as_str());

            provider.watch(
                id,
                group,
                Arc::new(move |content: &str| match parse_content(content, &key) {
                    Ok(mapping) => match serde_json::to_string_pretty(&redact(mapping)) {
                        Ok(text) => println!("{text}"),
                        Err(e) => eprintln!("{key}: {e}"),
                    },
                    Err(e) => eprintln!("{e}"),
                }),
            )?;

            eprintln!("Watching {group}/{id}; press Ctrl-C to stop");
            loop {
                thread::park();
            }
        }
        Commands::Info => {
            let provider = connect(&cli, interval)?;
            println!("{}", serde_json::to_string_pretty(&provider.info())?);
            provider.disconnect();
        }
    }

    Ok(())
}

fn file_provider(cli: &Cli, interval: Duration) -> FileProvider {
    FileProvider::new(
        FileProviderOptions::new(&cli.base_path)
            .with_format(cli.format)
            .with_watch_interval(interval),
    )
}

fn connect(cli: &Cli, interval: Duration) -> Result<Box<dyn Provider>, Box<dyn std::error::Error>> {
    let provider: Box<dyn Provider> = if cli.server.is_empty() {
        Box::new(file_provider(cli, interval))
    } else {
        let mut options = RemoteOptions::with_servers(&cli.server).with_namespace(&cli.namespace);
        if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
            options = options.with_credentials(username, password);
        }
        Box::new(RemoteProvider::nacos(options))
    };

    provider.connect()?;
    Ok(provider)
}
