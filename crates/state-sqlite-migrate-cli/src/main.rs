//! state-sqlite-migrate CLI - migrate a project's state.json into SQLite.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use state_sqlite_migrate::{
    Config, MigrateError, MigrationStats, Migrator, NoopStore, RunOptions, SqliteStore,
    StateStore,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "state-sqlite-migrate")]
#[command(about = "Migrate a project's state.json snapshot into a SQLite index")]
#[command(version)]
struct Cli {
    /// Project root containing state.json
    #[arg(long, value_name = "DIR")]
    project_root: PathBuf,

    /// Classify and report without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Skip the pre-migration backup of state.json
    #[arg(long)]
    no_backup: bool,

    /// Only log warnings and errors
    #[arg(long)]
    quiet: bool,

    /// Print the statistics as JSON on stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.quiet, &cli.log_format);

    match run(&cli) {
        Ok(stats) if stats.errors > 0 => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<MigrationStats, MigrateError> {
    let config = Config::from_project_root(&cli.project_root);

    info!("Starting migration: state.json -> SQLite");
    info!("  project:    {}", config.project_root.display());
    info!("  state file: {}", config.state_file.display());
    info!("  index db:   {}", config.index_db.display());

    // Dry runs and absent snapshots never open the database, so neither
    // leaves an index.db behind.
    let store: Box<dyn StateStore> = if cli.dry_run || !config.state_file.exists() {
        Box::new(NoopStore::new())
    } else {
        Box::new(SqliteStore::open(&config.index_db)?)
    };

    let mut migrator = Migrator::new(config, store);
    let stats = migrator.run(&RunOptions {
        dry_run: cli.dry_run,
        backup: !cli.no_backup,
    })?;

    if cli.output_json {
        println!("{}", stats.to_json()?);
    } else {
        print_summary(&stats, cli.dry_run);
    }

    Ok(stats)
}

fn print_summary(stats: &MigrationStats, dry_run: bool) {
    let heading = if dry_run {
        "Dry run completed"
    } else {
        "Migration completed"
    };
    println!("\n{}", heading);
    println!("  Entities:      {}", stats.entities);
    println!("  Aliases:       {}", stats.aliases);
    println!("  State changes: {}", stats.state_changes);
    println!("  Relationships: {}", stats.relationships);
    println!("  Skipped:       {}", stats.skipped);
    println!("  Errors:        {}", stats.errors);
    if dry_run {
        println!("\nDry run: no data was written.");
    }
}

fn setup_logging(quiet: bool, format: &str) {
    let level = if quiet { Level::WARN } else { Level::INFO };

    // Logs go to stderr so stdout stays clean for --output-json.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
