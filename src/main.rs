//! Driftstack CLI entrypoint.
//!
//! This is the main entrypoint for the driftstack command-line tool. The CLI
//! is an offline driver: it resolves module graphs, previews plans against
//! the stored stack record, and inspects state. Live applies go through the
//! library API with a real provisioning backend.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use driftstack::cli::{
    find_stack_file, Cli, Commands, OutputFormatter, StackFile, StateCommands, STACK_FILE_NAME,
};
use driftstack::backend::ScopeQuery;
use driftstack::error::Result;
use driftstack::graph::Resolver;
use driftstack::planner::DiffEngine;
use driftstack::registry::{DirModuleSource, FileScopeQuery};
use driftstack::state::{LocalStackStore, StackStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate => cmd_validate(cli.stack.as_ref()).await,
        Commands::Resolve => cmd_resolve(cli.stack.as_ref(), &formatter).await,
        Commands::Preview { detailed, live } => {
            cmd_preview(cli.stack.as_ref(), detailed, live, &formatter).await
        }
        Commands::State { command } => cmd_state(cli.stack.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new stack project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new stack project in: {}", path.display());

    let stack_path = path.join(STACK_FILE_NAME);
    let modules_dir = path.join("modules");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && stack_path.exists() {
        println!("Stack file already exists: {}", stack_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directories if needed
    if !modules_dir.exists() {
        std::fs::create_dir_all(&modules_dir)?;
    }

    // Write stack file template
    let stack_template = include_str!("../templates/driftstack.stack.yaml");
    std::fs::write(&stack_path, stack_template)?;
    println!("Created: {}", stack_path.display());

    // Write sample module registry
    let modules = [
        ("rbac.yaml", include_str!("../templates/modules/rbac.yaml")),
        (
            "iam-resources.yaml",
            include_str!("../templates/modules/iam-resources.yaml"),
        ),
        (
            "resource-group.yaml",
            include_str!("../templates/modules/resource-group.yaml"),
        ),
    ];
    for (name, content) in modules {
        let module_path = modules_dir.join(name);
        std::fs::write(&module_path, content)?;
        println!("Created: {}", module_path.display());
    }

    // Write/update .gitignore
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".driftstack") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n.driftstack/")?;
            println!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".driftstack/\n")?;
        println!("Created: {}", gitignore_path.display());
    }

    println!("\nStack project initialized!");
    println!("Next steps:");
    println!("  1. Edit {STACK_FILE_NAME} with your stack parameters");
    println!("  2. Add module definitions under modules/");
    println!("  3. Run 'driftstack validate' to check the module graph");
    println!("  4. Run 'driftstack preview' to see the plan");

    Ok(())
}

/// Validate the stack file and its module graph.
async fn cmd_validate(stack_path: Option<&PathBuf>) -> Result<()> {
    let (stack_file_path, stack) = load_stack(stack_path)?;
    info!("Validating stack file: {}", stack_file_path.display());

    let registry = DirModuleSource::load(&stack.registry_dir(&stack_file_path))?;
    let resolver = Resolver::new(&registry);
    let snapshot = resolver.resolve(&stack.resolve_request()).await?;

    println!("Stack definition is valid!");
    println!("\nStack summary:");
    println!("  Stack: {}", stack.key());
    println!("  Scope: {}", stack.stack.scope);
    println!("  Root module: {}", snapshot.root_module);
    println!("  Modules in registry: {}", registry.module_names().len());
    println!("  Resources declared: {}", snapshot.resources.len());

    Ok(())
}

/// Resolve the module graph and display the snapshot.
async fn cmd_resolve(stack_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (stack_file_path, stack) = load_stack(stack_path)?;

    let registry = DirModuleSource::load(&stack.registry_dir(&stack_file_path))?;
    let resolver = Resolver::new(&registry);
    let snapshot = resolver.resolve(&stack.resolve_request()).await?;

    let output = formatter.format_snapshot(&snapshot);
    println!("{output}");
    Ok(())
}

/// Compute and display the plan against the stored record.
async fn cmd_preview(
    stack_path: Option<&PathBuf>,
    detailed: bool,
    live_listing: Option<PathBuf>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (stack_file_path, stack) = load_stack(stack_path)?;

    let registry = DirModuleSource::load(&stack.registry_dir(&stack_file_path))?;
    let resolver = Resolver::new(&registry);
    let snapshot = resolver.resolve(&stack.resolve_request()).await?;

    let store = open_store(&stack, &stack_file_path);
    // The stack file's unmanage policy governs the plan even for stacks
    // that have never been applied.
    let record = stack.effective_record(store.get(&stack.key()).await?);

    // Offline preview: the live scope is empty unless a captured listing
    // is supplied.
    let live = match live_listing {
        Some(path) => {
            FileScopeQuery::new(path)
                .query_resources(&stack.stack.scope)
                .await?
        }
        None => vec![],
    };
    let plan = DiffEngine::new().plan(&snapshot, Some(&record), &live)?;

    let output = formatter.format_plan(&plan, detailed);
    println!("{output}");
    Ok(())
}

/// State management commands.
async fn cmd_state(
    stack_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (stack_file_path, stack) = load_stack(stack_path)?;
    let store = open_store(&stack, &stack_file_path);
    let key = stack.key();

    match command {
        StateCommands::Show => {
            if let Some(record) = store.get(&key).await? {
                let output = formatter.format_record(&key, &record);
                println!("{output}");
                println!("   Backend: {}", store.backend_type());
            } else {
                println!("No record found for stack {key} ({} backend).", store.backend_type());
            }
        }
        StateCommands::List => {
            let keys = store.list().await?;
            let output = formatter.format_stack_list(&keys);
            println!("{output}");
        }
        StateCommands::Rm { yes } => {
            if !yes {
                print!("Remove the record for stack {key}? [y/N]: ");
                std::io::stdout().flush()?;

                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("Removal cancelled.");
                    return Ok(());
                }
            }
            store.delete(&key).await?;
            println!("Record for stack {key} removed.");
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Locates and loads the stack file.
fn load_stack(stack_path: Option<&PathBuf>) -> Result<(PathBuf, StackFile)> {
    let path = find_stack_file(stack_path)?;
    debug!("Loading stack file from: {}", path.display());
    let stack = StackFile::load(&path)?;
    Ok((path, stack))
}

/// Opens the local stack store configured by the stack file.
fn open_store(stack: &StackFile, stack_file_path: &Path) -> LocalStackStore {
    LocalStackStore::with_base_dir(stack.resolved_state_dir(stack_file_path))
}
