//! Ferraform CLI entrypoint.
//!
//! This is the main entrypoint for the ferraform command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ferraform::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use ferraform::config::{
    ConfigParser, ConfigValidator, DEFAULT_INFRA_FILE, DEFAULT_SETTINGS_FILE, INFRA_ENV_VAR,
    InfraConfig, SETTINGS_ENV_VAR, StateBackend, UserSettings, resolve_config_path,
};
use ferraform::error::{ConfigError, FerraformError, Result};
use ferraform::provider::{PollConfig, ProviderSet};
use ferraform::reconciler::Reconciler;
use ferraform::resources::HandlerRegistry;
use ferraform::state::{LocalStateStore, S3StateStore, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over the flags.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a command needs, loaded once.
struct Context {
    infra_path: PathBuf,
    settings: UserSettings,
    state_override: Option<PathBuf>,
    formatter: OutputFormatter,
}

/// Main async entry point. Returns false when some resource did not
/// reconcile.
async fn run(cli: Cli) -> Result<bool> {
    let infra_path = resolve_config_path(cli.infra.as_deref(), INFRA_ENV_VAR, DEFAULT_INFRA_FILE, ".")?;
    let base = parent_dir(&infra_path);
    let parser = ConfigParser::new().with_base_path(base.clone());
    parser.load_dotenv()?;

    let mut settings = match resolve_config_path(cli.settings.as_deref(), SETTINGS_ENV_VAR, DEFAULT_SETTINGS_FILE, &base) {
        Ok(path) => parser.load_settings(&path)?,
        Err(e) if cli.settings.is_none() => {
            debug!("No settings file ({e}), using environment only");
            parser.settings_from_env()
        }
        Err(e) => return Err(e),
    };
    if let Some(provider) = &cli.provider {
        settings.provider.clone_from(provider);
    }

    let ctx = Context {
        infra_path,
        settings,
        state_override: cli.state,
        formatter: OutputFormatter::new(cli.output),
    };

    match cli.command {
        Commands::Plan { destroy } => cmd_plan(&ctx, &parser, destroy).await,
        Commands::Deploy { yes } => cmd_deploy(&ctx, &parser, yes, cli.output).await,
        Commands::Destroy { yes } => cmd_destroy(&ctx, yes, cli.output).await,
        Commands::Validate { warnings } => cmd_validate(&ctx, &parser, warnings),
        Commands::State { command } => cmd_state(&ctx, command).await,
    }
}

/// Show what a deploy or destroy would change.
async fn cmd_plan(ctx: &Context, parser: &ConfigParser, destroy: bool) -> Result<bool> {
    let store = create_state_store(ctx).await?;
    let registry = HandlerRegistry::with_defaults();
    let providers = ProviderSet::new(&ctx.settings.provider);
    let reconciler = Reconciler::new(&store, &providers, &registry);

    let plan = if destroy {
        reconciler.destroy_plan().await?
    } else {
        let infra = load_infrastructure(ctx, parser, &registry)?;
        reconciler.plan(&infra.resources).await?
    };

    emit(&ctx.formatter.format_plan(&plan))?;
    Ok(true)
}

/// Create and update resources.
async fn cmd_deploy(ctx: &Context, parser: &ConfigParser, auto_approve: bool, format: OutputFormat) -> Result<bool> {
    let registry = HandlerRegistry::with_defaults();
    let infra = load_infrastructure(ctx, parser, &registry)?;
    ConfigValidator::new().validate_settings(&ctx.settings)?;

    let store = create_state_store(ctx).await?;
    let providers = ProviderSet::from_settings(&ctx.settings)?;
    let reconciler = Reconciler::new(&store, &providers, &registry)
        .with_poll(PollConfig::from(ctx.settings.poll));

    let plan = reconciler.plan(&infra.resources).await?;
    if !plan.has_changes() {
        info!("{}", plan.summary_line());
        eprintln!("No changes. Infrastructure is up to date.");
        return Ok(true);
    }

    if !auto_approve {
        if format == OutputFormat::Json {
            return Err(FerraformError::internal("--output json needs --yes for deploy"));
        }
        emit(&ctx.formatter.format_plan(&plan))?;
        if !confirm("Do you want to apply this plan? [y/N]: ", |input| input.eq_ignore_ascii_case("y"))? {
            eprintln!("Deploy cancelled.");
            return Ok(true);
        }
    }

    let result = reconciler.deploy(&infra.resources).await?;
    emit(&ctx.formatter.format_result(&result))?;
    Ok(result.success)
}

/// Destroy every recorded resource.
async fn cmd_destroy(ctx: &Context, auto_approve: bool, format: OutputFormat) -> Result<bool> {
    ConfigValidator::new().validate_settings(&ctx.settings)?;
    let registry = HandlerRegistry::with_defaults();
    let store = create_state_store(ctx).await?;
    let providers = ProviderSet::from_settings(&ctx.settings)?;
    let reconciler = Reconciler::new(&store, &providers, &registry)
        .with_poll(PollConfig::from(ctx.settings.poll));

    let plan = reconciler.destroy_plan().await?;
    if plan.is_empty() {
        eprintln!("Nothing recorded, nothing to destroy.");
        return Ok(true);
    }

    if !auto_approve {
        if format == OutputFormat::Json {
            return Err(FerraformError::internal("--output json needs --yes for destroy"));
        }
        emit(&ctx.formatter.format_plan(&plan))?;
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", |input| input == "destroy")? {
            eprintln!("Destroy cancelled.");
            return Ok(true);
        }
    }

    let result = reconciler.destroy().await?;
    emit(&ctx.formatter.format_result(&result))?;
    Ok(result.success)
}

/// Validate the infrastructure and settings files.
fn cmd_validate(ctx: &Context, parser: &ConfigParser, show_warnings: bool) -> Result<bool> {
    let registry = HandlerRegistry::with_defaults();
    let infra = parser.load_infrastructure(&ctx.infra_path)?;
    let mut result = ConfigValidator::new().validate(&infra, &registry)?;
    let settings_result = ConfigValidator::new().validate_settings(&ctx.settings)?;
    result.warnings.extend(settings_result.warnings);

    let providers = ProviderSet::from_settings(&ctx.settings)?;
    if !providers.has(providers.default_provider()) {
        result.warnings.push(format!(
            "No credentials configured for default provider '{}'",
            providers.default_provider()
        ));
    }

    emit(&ctx.formatter.format_validation(&result, infra.resources.len(), show_warnings))?;
    Ok(true)
}

/// State management commands.
async fn cmd_state(ctx: &Context, command: StateCommands) -> Result<bool> {
    let store = create_state_store(ctx).await?;

    match command {
        StateCommands::Show => {
            match store.load().await? {
                Some(state) => emit(&ctx.formatter.format_state(&state))?,
                None => eprintln!("No state recorded at {}.", store.location()),
            }
            let lock = store.get_lock_info().await?;
            emit(&ctx.formatter.format_lock(lock.as_ref()))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                match store.get_lock_info().await? {
                    Some(lock) => eprintln!("{lock}\nPass --lock-id {} or use --force.", lock.lock_id),
                    None => eprintln!("State is not locked."),
                }
            }
        }
    }

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Directory holding a file, `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads and validates the infrastructure file, printing warnings.
fn load_infrastructure(ctx: &Context, parser: &ConfigParser, registry: &HandlerRegistry) -> Result<InfraConfig> {
    let infra = parser.load_infrastructure(&ctx.infra_path)?;
    let result = ConfigValidator::new().validate(&infra, registry)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok(infra)
}

/// Creates the state store named by the settings.
async fn create_state_store(ctx: &Context) -> Result<Box<dyn StateStore>> {
    if let Some(path) = &ctx.state_override {
        return Ok(Box::new(LocalStateStore::with_state_path(path)));
    }

    let config = &ctx.settings.state;
    let store: Box<dyn StateStore> = match config.backend {
        StateBackend::Local => match &config.path {
            Some(path) => Box::new(LocalStateStore::with_state_path(path)),
            None => Box::new(LocalStateStore::with_base_dir(parent_dir(&ctx.infra_path))),
        },
        StateBackend::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation("S3 bucket not configured", "state.bucket")
            })?;
            Box::new(S3StateStore::new(bucket, config.prefix.as_deref(), config.region.as_deref()).await)
        }
    };
    debug!("Using {} state at {}", store.backend_type(), store.location());
    Ok(store)
}

/// Prompts on stderr and checks the answer.
fn confirm(prompt: &str, accept: impl Fn(&str) -> bool) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(accept(input.trim()))
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}
