use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use gpxview_core::{
    ActionDispatcher, Activation, AffordanceKind, Collaborators, RouteView, Shown, ViewError,
};
use gpxview_routes::{OutlineKind, RouteKey};
use gpxview_settings::{default_config_path, ConfigStore, ViewerConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gpxview",
    about = "Render GPX tracks as annotated text and open maps or elevation profiles",
    author,
    version
)]
struct Cli {
    /// Configuration file (defaults to $GPXVIEW_CONFIG or ~/.config/gpxview/config.json).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log external tool invocations to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the converted text with map/elevation affordances.
    Render(RenderArgs),
    /// Print the outline: byte offset and label per entry.
    Outline(FileArgs),
    /// List the selectable track/segment labels.
    Routes(FileArgs),
    /// Generate and open the map of one segment.
    Map(RouteArgs),
    /// Generate and show the elevation profile of one segment.
    Elevation(RouteArgs),
    /// Print the GPX source exactly as stored on disk.
    Raw(FileArgs),
    /// Inspect or create the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
struct FileArgs {
    /// GPX file to read.
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct RenderArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Write the rendered view to PATH instead of stdout. The GPX source itself is refused.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["route", "label"])))]
struct RouteArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Segment as TRACK:SEGMENT, e.g. `0:1`.
    #[arg(long, value_name = "TRACK:SEGMENT")]
    route: Option<RouteKey>,
    /// Segment header as listed by `gpxview routes`.
    #[arg(long, value_name = "LABEL")]
    label: Option<String>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configuration file location.
    Path,
    /// Print the effective configuration (file plus environment overrides).
    Show,
    /// Write a configuration file with default values.
    Init {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        config,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    let config_path = config.or_else(|| default_config_path(|key| std::env::var(key).ok()));
    let tools = || -> Result<Collaborators> {
        let config = load_config(config_path.as_deref())?;
        Collaborators::from_config(&config).context("invalid header_pattern in configuration")
    };

    match command {
        Commands::Render(args) => render(args, &tools()?),
        Commands::Outline(args) => print_outline(&args.file, &tools()?),
        Commands::Routes(args) => print_routes(&args.file, &tools()?),
        Commands::Map(args) => show_route(args, &tools()?, AffordanceKind::ShowMap),
        Commands::Elevation(args) => show_route(args, &tools()?, AffordanceKind::ShowElevation),
        Commands::Raw(args) => {
            let view = RouteView::open_raw(&args.file)
                .with_context(|| format!("cannot open {}", args.file.display()))?;
            io::stdout().lock().write_all(view.raw_bytes())?;
            Ok(())
        }
        Commands::Config(subcommand) => execute_config_command(subcommand, config_path.as_deref()),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    let mut config = match path {
        Some(path) => ConfigStore::load(path)?.into_config(),
        None => ViewerConfig::default(),
    };
    config.apply_process_env();
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn print_outline(file: &Path, tools: &Collaborators) -> Result<()> {
    let view = open_view(file, tools)?;
    let mut stdout = io::stdout().lock();
    for entry in view.outline(&tools.scanner)? {
        let marker = match entry.kind {
            OutlineKind::File => "file",
            OutlineKind::Route(_) => "route",
        };
        writeln!(stdout, "{}\t{}\t{}", entry.position, marker, entry.label)?;
    }
    Ok(())
}

fn print_routes(file: &Path, tools: &Collaborators) -> Result<()> {
    let view = open_view(file, tools)?;
    let mut stdout = io::stdout().lock();
    for label in ActionDispatcher::new(tools).menu(&view)? {
        writeln!(stdout, "{label}")?;
    }
    Ok(())
}

fn render(args: RenderArgs, tools: &Collaborators) -> Result<()> {
    let mut view = open_view(&args.file, tools)?;
    if let Some(failure) = view.conversion_failure() {
        if !failure.diagnostics().is_empty() {
            eprintln!("{}", failure.diagnostics());
        }
    }
    match args.output {
        Some(output) => match view.persist_to(&output) {
            Ok(()) => Ok(()),
            Err(err @ ViewError::PersistRejected { .. }) => {
                bail!("{err}; choose another --output path")
            }
            Err(err) => Err(err.into()),
        },
        None => {
            io::stdout().lock().write_all(view.text().as_bytes())?;
            Ok(())
        }
    }
}

fn show_route(args: RouteArgs, tools: &Collaborators, kind: AffordanceKind) -> Result<()> {
    let mut view = open_view(&args.file, tools)?;
    let dispatcher = ActionDispatcher::new(tools);
    let key = match (args.route, args.label) {
        (Some(key), _) => key,
        (None, Some(label)) => dispatcher.resolve(&view, &label)?,
        (None, None) => bail!("either --route or --label is required"),
    };

    let activation = match kind {
        AffordanceKind::ShowMap => dispatcher.show_map(key, view.source()).map(Activation::Map),
        AffordanceKind::ShowElevation => dispatcher.show_elevation_for(&mut view, key),
    }
    .with_context(|| format!("{} for {}", describe(kind), key.label()))?;

    match activation {
        Activation::Map(shown) | Activation::Elevation(shown) => report(kind, &shown),
        Activation::AlreadyRendered => {}
    }
    Ok(())
}

fn describe(kind: AffordanceKind) -> &'static str {
    match kind {
        AffordanceKind::ShowMap => "map",
        AffordanceKind::ShowElevation => "elevation profile",
    }
}

fn report(kind: AffordanceKind, shown: &Shown) {
    match shown {
        Shown::Opened(path) => println!("Opened {} {}", describe(kind), path.display()),
        Shown::Fallback { path, reason } => {
            eprintln!("Cannot display {} ({reason})", describe(kind));
            println!("{}", path.display());
        }
    }
}

fn open_view(file: &Path, tools: &Collaborators) -> Result<RouteView> {
    RouteView::open(file, tools).with_context(|| format!("cannot open {}", file.display()))
}

fn execute_config_command(command: ConfigCommand, path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Path => {
            let path = path.context("no configuration path: set $GPXVIEW_CONFIG or $HOME")?;
            println!("{}", path.display());
        }
        ConfigCommand::Show => {
            let config = load_config(path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommand::Init { force } => {
            let path = path.context("no configuration path: set $GPXVIEW_CONFIG or $HOME")?;
            if path.exists() && !force {
                bail!(
                    "configuration '{}' already exists (use --force to replace it)",
                    path.display()
                );
            }
            ConfigStore::new(&path, ViewerConfig::default()).save()?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
