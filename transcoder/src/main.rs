//! Avails CLI - convert between Avails spreadsheets and Avails XML
//!
//! # Commands
//!
//! ```bash
//! avails ingest avails.xlsx -o avails.xml     # Spreadsheet → XML
//! avails extract avails.xml -d out/           # XML → one CSV per sheet
//! avails mapping list                         # Known mapping versions
//! avails mapping show 2.3                     # Columns of one mapping
//! avails mapping check my-mapping.json        # Validate a mapping file
//! ```

use avails::{
    logging, pipeline, BuildLog, ExtractOptions, IngestOptions, LogLevel, MappingCatalog, MappingRule,
    MappingSpec, StaticSchema,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "avails")]
#[command(about = "Convert Avails spreadsheets to Avails XML and back", long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory of extra mapping files (`*.json`)
    #[arg(long, global = true)]
    mapping_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a CSV or XLSX spreadsheet to Avails XML
    Ingest {
        /// Input spreadsheet
        input: PathBuf,

        /// Workbook sheet (default: first sheet)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Mapping version (default: latest)
        #[arg(short, long)]
        mapping_version: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Consecutive blank rows tolerated before the sheet ends
        #[arg(long, default_value = "5")]
        empty_rows: usize,

        /// Exit with an error status when the build log has errors
        #[arg(long)]
        strict: bool,
    },

    /// Convert an Avails XML document to CSV sheets
    Extract {
        /// Input XML file
        input: PathBuf,

        /// Output directory (default: current directory)
        #[arg(short = 'd', long, default_value = ".")]
        output_dir: PathBuf,

        /// Drop columns that are blank in every row
        #[arg(long)]
        hide_empty: bool,

        /// CSV delimiter
        #[arg(long, default_value = ";")]
        delimiter: char,
    },

    /// Inspect mapping specifications
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },
}

#[derive(Subcommand)]
enum MappingAction {
    /// List known mapping versions
    List,

    /// Show the columns of a mapping
    Show {
        /// Mapping version
        version: String,
    },

    /// Validate a mapping file
    Check {
        /// Mapping JSON file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Ingest {
            input,
            sheet,
            mapping_version,
            output,
            empty_rows,
            strict,
        } => cmd_ingest(
            &input,
            sheet.as_deref(),
            mapping_version.as_deref(),
            cli.mapping_dir.as_deref(),
            output.as_deref(),
            empty_rows,
            strict,
        ),

        Commands::Extract {
            input,
            output_dir,
            hide_empty,
            delimiter,
        } => cmd_extract(&input, cli.mapping_dir.as_deref(), &output_dir, hide_empty, delimiter),

        Commands::Mapping { action } => cmd_mapping(action, cli.mapping_dir.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_catalog(mapping_dir: Option<&Path>) -> Result<MappingCatalog, Box<dyn std::error::Error>> {
    Ok(match mapping_dir {
        Some(dir) => MappingCatalog::with_dir(dir)?,
        None => MappingCatalog::builtin()?,
    })
}

fn select_mapping(
    catalog: &MappingCatalog,
    version: Option<&str>,
) -> Result<Arc<MappingSpec>, Box<dyn std::error::Error>> {
    match version {
        Some(v) => Ok(catalog.get(v)?),
        None => catalog.latest().ok_or_else(|| "No mapping available".into()),
    }
}

fn cmd_ingest(
    input: &Path,
    sheet: Option<&str>,
    version: Option<&str>,
    mapping_dir: Option<&Path>,
    output: Option<&Path>,
    empty_rows: usize,
    strict: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Ingesting: {}", input.display());

    let catalog = load_catalog(mapping_dir)?;
    let spec = select_mapping(&catalog, version)?;
    eprintln!("   Mapping: {}", spec.version());

    let options = IngestOptions {
        empty_row_threshold: empty_rows,
        ..IngestOptions::default()
    };
    let outcome = pipeline::ingest_path(input, sheet, &spec, &StaticSchema::avails(), options)?;

    eprintln!("   Rows: {} ({} failed)", outcome.stats.data_rows, outcome.stats.failed);
    eprintln!(
        "   Avails: {}, Assets: {}, Transactions: {}",
        outcome.stats.avails, outcome.stats.assets, outcome.stats.transactions
    );
    print_log(&outcome.log);

    let xml = pipeline::render_xml(&outcome)?;
    write_output(&xml, output)?;

    if strict && outcome.log.has_errors() {
        return Err(format!("{} error(s) in build log", outcome.log.count(LogLevel::Error)).into());
    }
    Ok(())
}

fn cmd_extract(
    input: &Path,
    mapping_dir: Option<&Path>,
    output_dir: &Path,
    hide_empty: bool,
    delimiter: char,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Extracting: {}", input.display());

    if !delimiter.is_ascii() {
        return Err(format!("Delimiter must be a single ASCII character: {:?}", delimiter).into());
    }
    let catalog = load_catalog(mapping_dir)?;
    let options = ExtractOptions {
        hide_empty_columns: hide_empty,
        ..ExtractOptions::default()
    };
    let (spec, outcome) = pipeline::extract_path(input, &catalog, &StaticSchema::avails(), options)?;
    eprintln!("   Mapping: {} (detected)", spec.version());
    print_log(&outcome.log);

    fs::create_dir_all(output_dir)?;
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("avails");
    for sheet in &outcome.sheets {
        let path = output_dir.join(format!("{}_{}.csv", stem, sheet.name));
        avails::sheet::write_csv_file(sheet, &path, delimiter as u8)?;
        eprintln!("💾 {} ({} rows) → {}", sheet.name, sheet.rows.len(), path.display());
    }
    Ok(())
}

fn cmd_mapping(action: MappingAction, mapping_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        MappingAction::List => {
            let catalog = load_catalog(mapping_dir)?;
            eprintln!("📋 Mappings ({}):\n", catalog.versions().len());
            for version in catalog.versions() {
                let spec = catalog.get(version)?;
                println!("  📄 {} - {}", spec.version(), spec.description());
                println!("     Namespace: {}", spec.avail_namespace());
                println!("     Columns: {}", spec.entries().len());
            }
        }

        MappingAction::Show { version } => {
            let catalog = load_catalog(mapping_dir)?;
            let spec = catalog.get(&version)?;
            println!("📄 Mapping {} - {}\n", spec.version(), spec.description());
            for sheet in spec.sheets() {
                if sheet.work_types.is_empty() {
                    println!("Sheet {}: all work types", sheet.name);
                } else {
                    println!("Sheet {}: {}", sheet.name, sheet.work_types.join(", "));
                }
            }
            println!();
            for entry in spec.entries() {
                println!("  {} → {}", entry.key, describe_rule(&entry.rule));
            }
        }

        MappingAction::Check { file } => {
            eprintln!("✔️  Checking: {}", file.display());
            let text = fs::read_to_string(&file)?;
            let spec = MappingSpec::from_json(&text)?;
            eprintln!("✅ Mapping {} is valid ({} columns)", spec.version(), spec.entries().len());
        }
    }
    Ok(())
}

fn describe_rule(rule: &MappingRule) -> String {
    match rule {
        MappingRule::Path(path) => path.source().to_string(),
        MappingRule::Alternatives(paths) => paths.iter().map(|p| p.source()).collect::<Vec<_>>().join(" | "),
        MappingRule::ByWorkType(by_type) => by_type
            .iter()
            .map(|(work_type, path)| format!("{}: {}", work_type, path.source()))
            .collect::<Vec<_>>()
            .join("; "),
        MappingRule::Transform(kind) => format!("function {}", kind.name()),
    }
}

fn print_log(log: &BuildLog) {
    for entry in log.entries() {
        let marker = match entry.level {
            LogLevel::Info => "ℹ️ ",
            LogLevel::Success => "✅",
            LogLevel::Warning => "⚠️ ",
            LogLevel::Error => "❌",
        };
        eprintln!("{} {}", marker, entry);
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
