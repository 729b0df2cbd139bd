use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use ludou::logging::init_standard_tracing;
use ludou::{CacheConfig, CompileStatus, Engine, EngineConfig};
use miette::{IntoDiagnostic, WrapErr};

/// Compile and render Ludou templates
#[derive(Parser, Debug)]
#[command(name = "ludoc", version, about)]
struct Cli {
    /// JSON engine config
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Template root, searched after the configured ones (repeatable)
    #[arg(long = "root", global = true)]
    roots: Vec<Utf8PathBuf>,

    /// Store artifacts in this directory instead of the configured backend
    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    /// Skip the optimizer
    #[arg(long, global = true)]
    no_optimize: bool,

    /// Log cache hits and misses
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile every template under a directory
    CompileAll {
        root: Utf8PathBuf,
        /// Recompile even when a fresh artifact is cached
        #[arg(long)]
        force: bool,
    },
    /// Compile one template by logical name or path
    Compile {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Render a template to stdout
    Render {
        name: String,
        /// JSON object used as the data context
        #[arg(long)]
        data: Option<Utf8PathBuf>,
    },
    /// Remove every cached artifact
    Clear,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_standard_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::new(),
    };
    config.roots.extend(cli.roots.iter().cloned());
    if let Some(dir) = &cli.cache_dir {
        config.cache = CacheConfig::File { dir: dir.clone() };
    }
    if cli.no_optimize {
        config.optimize = false;
    }
    if let Command::CompileAll { root, .. } = &cli.command {
        if config.roots.is_empty() {
            config.roots.push(root.clone());
        }
    }

    let engine = Engine::new(config)?;

    match cli.command {
        Command::CompileAll { root, force } => {
            let report = engine.compile_all(&root, force);
            for path in &report.compiled {
                println!("compiled  {path}");
            }
            for path in &report.cached {
                println!("fresh     {path}");
            }
            println!(
                "{} compiled, {} fresh, {} failed ({} total)",
                report.compiled.len(),
                report.cached.len(),
                report.failed.len(),
                report.total
            );
            let failures = report.failed.len();
            for failed in report.failed {
                eprintln!("failed    {}", failed.path);
                eprintln!("{:?}", miette::Report::new(failed.error));
            }
            if failures > 0 {
                miette::bail!("{failures} template(s) failed to compile");
            }
        }
        Command::Compile { name, force } => {
            let outcome = if force {
                engine.recompile(&name)?
            } else {
                engine.compile(&name)?
            };
            let status = match outcome.status {
                CompileStatus::Compiled => "compiled",
                CompileStatus::Cached => "fresh",
            };
            match outcome.artifact_path {
                Some(path) => println!("{status} {} -> {path}", outcome.name),
                None => println!("{status} {} ({})", outcome.name, outcome.key),
            }
        }
        Command::Render { name, data } => {
            let data = match data {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .into_diagnostic()
                        .wrap_err_with(|| format!("reading data file `{path}`"))?;
                    serde_json::from_str(&text)
                        .into_diagnostic()
                        .wrap_err_with(|| format!("parsing data file `{path}`"))?
                }
                None => serde_json::Value::Object(Default::default()),
            };
            print!("{}", engine.render_json(&name, data)?);
        }
        Command::Clear => {
            if !engine.flush_cache() {
                miette::bail!("failed to clear the {} cache", engine.cache().name());
            }
        }
    }
    Ok(())
}
