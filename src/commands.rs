// src/commands.rs
//! Command handlers for the pacforge CLI

use crate::cli::{BuildArgs, CacheCommands, Cli, Commands};
use anyhow::{Context, Result, bail};
use pacforge::process::cancel_on_interrupt;
use pacforge::review::render;
use pacforge::{
    AurRegistry, BubblewrapExecutor, BuildOptions, Builder, CancelToken, Config, GitCli,
    InteractiveReview, LogProgress, Pacman, RecipeParser, Registry, Sandbox,
};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{info, warn};

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    let verbose = cli.verbose > 0;

    match cli.command {
        Commands::Build { packages, opts } => cmd_build(&config, &packages, &opts, verbose, None),
        Commands::Install {
            packages,
            opts,
            asdeps,
        } => cmd_build(&config, &packages, &opts, verbose, Some(asdeps)),
        Commands::Show { package, raw } => cmd_show(&config, &package, raw),
        Commands::Cache { command } => match command {
            CacheCommands::List => cmd_cache_list(&config),
            CacheCommands::Clean { package, all } => cmd_cache_clean(&config, package, all),
        },
    }
}

fn registry(config: &Config) -> Result<Arc<AurRegistry>> {
    Ok(Arc::new(
        AurRegistry::new(&config.registry).context("Failed to set up registry client")?,
    ))
}

fn builder(config: &Config) -> Result<Builder> {
    let sandbox: Arc<dyn Sandbox> = Arc::new(BubblewrapExecutor::from_config(&config.sandbox));
    Ok(Builder::new(
        &config.cache_dir,
        registry(config)?,
        Arc::new(GitCli::from_config(&config.git)),
        Arc::new(Pacman::from_config(&config.native)),
        sandbox.clone(),
    )
    .with_parser(RecipeParser::sandboxed(&config.parser, sandbox))
    .with_makepkg(&config.build.makepkg))
}

fn build_options(config: &Config, args: &BuildArgs, verbose: bool, as_deps: bool) -> BuildOptions {
    let review = config.review.enabled && !args.no_review;
    let mut options = BuildOptions {
        force: args.force,
        clean: args.clean,
        skip_pgp_check: args.skippgpcheck,
        no_confirm: args.noconfirm,
        sandbox: config.sandbox.enabled && !args.no_sandbox,
        keep_sources: args.keep_sources,
        install_deps: !args.no_deps,
        as_deps,
        verbose,
        review,
        progress: Arc::new(LogProgress::new("pacforge")),
        cancel: CancelToken::new(),
        ..Default::default()
    };
    if review {
        options.reviewer = Arc::new(InteractiveReview::stdio());
    }
    options
}

/// Build (and optionally install) each package in turn
///
/// `install` is `None` for build-only runs, otherwise the as-deps flag.
fn cmd_build(
    config: &Config,
    packages: &[String],
    args: &BuildArgs,
    verbose: bool,
    install: Option<bool>,
) -> Result<()> {
    let options = build_options(config, args, verbose, install.unwrap_or(false));
    if let Err(e) = cancel_on_interrupt(&options.cancel) {
        warn!("Cannot install interrupt handler: {}", e);
    }
    let builder = builder(config)?.with_options(options);

    let mut rejected = Vec::new();
    for name in packages {
        let result = match install {
            Some(_) => builder.build_and_install(name),
            None => builder.build(name),
        };

        match result {
            Ok(outcome) => {
                if !outcome.sandboxed {
                    warn!("{} was built without a sandbox", outcome.recipe.name());
                }
                for path in &outcome.artifacts {
                    println!("{}", path.display());
                }
                if outcome.installed {
                    info!(
                        "Installed {} {}",
                        outcome.recipe.name(),
                        outcome.recipe.full_version()
                    );
                }
            }
            Err(e) if e.is_user_abort() => {
                println!("Skipped {}: rejected during review", name);
                rejected.push(name.clone());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to build {name}")),
        }
    }

    if !rejected.is_empty() && rejected.len() == packages.len() {
        bail!("Nothing was built");
    }
    Ok(())
}

fn cmd_show(config: &Config, package: &str, raw: bool) -> Result<()> {
    let info = registry(config)?
        .package(package)?
        .with_context(|| format!("Package '{package}' not found in registry"))?;

    let builder = builder(config)?;
    let recipe = match builder.load_cached(&info.package_base) {
        Ok(recipe) => recipe,
        Err(pacforge::Error::NotCached(_)) => {
            println!("{} {}", info.name, info.version);
            if let Some(desc) = &info.description {
                println!("  {desc}");
            }
            println!("  Maintainer: {}", info.maintainer.as_deref().unwrap_or("ORPHANED"));
            println!("  Votes: {}  Popularity: {:.2}", info.votes, info.popularity);
            println!(
                "Recipe not cached; run `pacforge build {}` to fetch and review it.",
                package
            );
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to read cached recipe"),
    };

    let mut stdout = io::stdout().lock();
    render(&mut stdout, &recipe, &info)?;
    if raw {
        for (idx, line) in recipe.raw.lines().enumerate() {
            writeln!(stdout, "{:>4} | {}", idx + 1, line)?;
        }
    }
    Ok(())
}

fn cmd_cache_list(config: &Config) -> Result<()> {
    let builder = builder(config)?;
    let cached = builder.list_cached()?;
    if cached.is_empty() {
        println!("Cache {} is empty", config.cache_dir.display());
        return Ok(());
    }
    for name in cached {
        match builder.load_cached(&name) {
            Ok(recipe) => println!("{} {}", name, recipe.full_version()),
            Err(_) => println!("{} (no PKGBUILD)", name),
        }
    }
    Ok(())
}

fn cmd_cache_clean(config: &Config, package: Option<String>, all: bool) -> Result<()> {
    let builder = builder(config)?;
    match (package, all) {
        (_, true) => {
            builder.clean_all()?;
            println!("Removed {}", config.cache_dir.display());
        }
        (Some(package), false) => {
            builder.clean_package(&package)?;
            println!("Removed {} from the cache", package);
        }
        (None, false) => bail!("Specify a package or --all"),
    }
    Ok(())
}
