//! Command-line interface for the harvester.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::validate_date;
use crate::credentials::CredentialSource;
use crate::error::Result;
use crate::harvester::{Harvester, HarvestOptions, TokenMode};
use crate::record::Record;
use crate::registry::{MapperRegistry, MappingStrategy};

/// CONTENTdm Harvester - Pull Qualified Dublin Core records from CONTENTdm servers.
#[derive(Parser)]
#[command(name = "contentdm-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the collections published by an installation.
    Collections {
        /// Installation base URL (e.g., http://cdm.example.edu)
        base_url: String,
    },

    /// Fetch the record behind a single item URL.
    Get {
        /// Item URL in either the u?/collection,id or the
        /// CISOROOT/CISOPTR form
        url: String,

        /// Output rendering
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Xml)]
        format: OutputFormat,
    },

    /// Harvest all records of a collection.
    Harvest {
        /// Installation base URL (e.g., http://cdm.example.edu)
        base_url: String,

        /// Collection identifier (e.g., photos)
        collection: String,

        /// Stop after this many records
        #[arg(short, long)]
        max: Option<usize>,

        /// Lower datestamp bound in YYYY-MM-DD format
        #[arg(long)]
        from: Option<String>,

        /// Upper datestamp bound in YYYY-MM-DD format
        #[arg(long)]
        until: Option<String>,

        /// Synthesize the initial resumption token client-side, for
        /// gateways that do not accept set/metadataPrefix parameters
        #[arg(long)]
        legacy_tokens: bool,

        /// Output rendering
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Xml)]
        format: OutputFormat,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scrape field labels from the administrator screen instead of
        /// the static configuration file
        #[arg(long)]
        admin_scrape: bool,

        /// Administrator username for the admin scrape
        #[arg(long, requires = "password")]
        user: Option<String>,

        /// Administrator password for the admin scrape
        #[arg(long, requires = "user")]
        password: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Xml,
    Html,
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Collections { base_url } => collections_command(&base_url),
        Commands::Get { url, format } => get_command(&url, format),
        Commands::Harvest {
            base_url,
            collection,
            max,
            from,
            until,
            legacy_tokens,
            format,
            output,
            admin_scrape,
            user,
            password,
        } => harvest_command(&HarvestArgs {
            base_url,
            collection,
            max,
            from,
            until,
            legacy_tokens,
            format,
            output,
            admin_scrape,
            user,
            password,
        }),
    }
}

struct HarvestArgs {
    base_url: String,
    collection: String,
    max: Option<usize>,
    from: Option<String>,
    until: Option<String>,
    legacy_tokens: bool,
    format: OutputFormat,
    output: Option<PathBuf>,
    admin_scrape: bool,
    user: Option<String>,
    password: Option<String>,
}

fn collections_command(base_url: &str) -> Result<()> {
    let harvester = Harvester::new(base_url, Arc::new(MapperRegistry::new()))?;
    let sets = harvester.collections()?;

    println!(
        "{} collections at {}",
        style(sets.len()).bold(),
        style(harvester.base_uri().as_str()).cyan()
    );
    for (id, name) in &sets {
        println!("  {}  {}", style(id).green(), name);
    }
    Ok(())
}

fn get_command(url: &str, format: OutputFormat) -> Result<()> {
    let record = Harvester::record_from_url(url, Arc::new(MapperRegistry::new()))?;
    print!("{}", render(&record, format));
    Ok(())
}

fn harvest_command(args: &HarvestArgs) -> Result<()> {
    // Validate bounds before making HTTP requests
    if let Some(from) = args.from.as_deref() {
        validate_date(from)?;
    }
    if let Some(until) = args.until.as_deref() {
        validate_date(until)?;
    }

    let mut harvester = Harvester::new(&args.base_url, Arc::new(MapperRegistry::new()))?;
    if args.legacy_tokens {
        harvester = harvester.with_token_mode(TokenMode::ClientSynthesized);
    }

    println!(
        "{} {} from {}",
        style("Harvesting").bold(),
        style(&args.collection).cyan(),
        style(harvester.base_uri().as_str()).green()
    );
    println!();

    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    // A missing field configuration is not fatal; records fall back to
    // the generic rendering.
    pb.set_message("Loading field configuration...");
    let strategy = mapping_strategy(args);
    if let Err(e) = harvester.init_mapper(&args.collection, &strategy) {
        pb.suspend(|| {
            println!(
                "  {} {e}",
                style("No field configuration:").yellow().bold()
            );
        });
    }

    pb.set_message("Harvesting records...");
    let options = HarvestOptions {
        max: args.max,
        from: args.from.clone(),
        until: args.until.clone(),
        first: 0,
    };
    let records = match harvester.get_records(&args.collection, &options) {
        Ok(records) => records,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };

    pb.set_message("Rendering...");
    let mut rendered = String::new();
    for record in &records {
        rendered.push_str(&render(record, args.format));
        rendered.push('\n');
    }

    pb.finish_and_clear();

    match &args.output {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            file.write_all(rendered.as_bytes())?;
            println!(
                "{} {} records to {}",
                style("Saved").green().bold(),
                records.len(),
                path.display()
            );
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn mapping_strategy(args: &HarvestArgs) -> MappingStrategy {
    if !args.admin_scrape {
        return MappingStrategy::StaticFile;
    }
    let credentials = match (&args.user, &args.password) {
        (Some(user), Some(password)) => CredentialSource::basic(user, password),
        _ => CredentialSource::None,
    };
    MappingStrategy::AdminScrape { credentials }
}

fn render(record: &Record, format: OutputFormat) -> String {
    match format {
        OutputFormat::Xml => record.to_xml(),
        OutputFormat::Html => record.to_html(),
    }
}
