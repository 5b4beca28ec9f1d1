use anyhow::Result;
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use shared::config::{self, ConfigOverrides};
use shared::{
    io, AiProvider, AudioStatus, Config, ContentFetcher, Pipeline, PipelineEvent, PipelineReport,
    ProgressObserver, TtsEngine,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "wsws-bulletin")]
#[command(about = "Synthesize a daily political bulletin from recent WSWS articles")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch recent articles, write the bulletin and narrate it
    Generate(GenerateArgs),
    /// List the articles inside the recency window without downloading them
    ListArticles(ListArgs),
    /// Validate configuration and report what is set
    Check(CheckArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Path to a .env file (default: ./.env, then the config dir)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Number of hours to look back for articles
    #[arg(long)]
    hours: Option<u32>,

    /// Skip audio rendering
    #[arg(long)]
    no_audio: bool,

    /// Directory for the bulletin and audio files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// AI provider (anthropic, openai)
    #[arg(long)]
    ai_provider: Option<AiProvider>,

    /// TTS engine (piper, openai)
    #[arg(long)]
    tts_engine: Option<TtsEngine>,

    /// Print the bulletin to the terminal as well
    #[arg(long)]
    print_summary: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct ListArgs {
    /// Number of hours to look back for articles
    #[arg(long)]
    hours: Option<u32>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CheckArgs {
    /// Also check that the news source is reachable
    #[arg(long)]
    probe: bool,

    #[command(flatten)]
    common: CommonArgs,
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Generate(args) => args.common.verbose,
            Command::ListArticles(args) => args.common.verbose,
            Command::Check(args) => args.common.verbose,
        }
    }
}

/// Prints stage progress to stdout.
struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        match event {
            PipelineEvent::Fetching {
                source,
                window_hours,
            } => {
                println!(
                    "\n📚 Fetching articles from the past {} hours ({})...",
                    window_hours, source
                );
            }
            PipelineEvent::Fetched { articles, featured } => {
                println!("✓ Found {} recent articles", articles);
                match featured {
                    Some(title) => println!("✓ Perspective: {}", title),
                    None => println!("⚠ No perspective found"),
                }
            }
            PipelineEvent::NothingFound => {
                println!("⚠ No recent articles and no perspective found");
            }
            PipelineEvent::Synthesizing { provider, model } => {
                println!("\n🤖 Synthesizing bulletin with {} ({})...", provider, model);
                println!("  (This may take a minute...)");
            }
            PipelineEvent::BulletinWritten { path, citations } => {
                println!(
                    "✓ Bulletin written to {} ({} sources)",
                    path.display(),
                    citations
                );
            }
            PipelineEvent::RenderingAudio { backend } => {
                println!("\n🔊 Rendering audio with {}...", backend);
            }
            PipelineEvent::AudioWritten(artifact) => {
                println!("✓ Audio written to {}", artifact.path.display());
            }
            PipelineEvent::AudioSkipped(reason) => {
                println!("\n🔇 Audio skipped ({})", reason);
            }
            PipelineEvent::AudioFailed(reason) => {
                println!("⚠ Audio failed: {}", reason);
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    shared::logging::init(cli.command.verbose());

    let result = match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::ListArticles(args) => list_articles(args).await,
        Command::Check(args) => check(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\n❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn generate(args: GenerateArgs) -> Result<ExitCode> {
    let overrides = ConfigOverrides {
        recency_hours: args.hours,
        ai_provider: args.ai_provider,
        tts_engine: args.tts_engine,
        output_dir: args.output_dir,
        no_audio: args.no_audio,
    };
    let config = Config::load(args.common.env_file.as_deref(), &overrides)?;

    println!("📰 WSWS Daily Bulletin");
    println!("  Provider: {} ({})", config.ai_provider, config.model());
    if config.audio_enabled {
        println!("  TTS:      {}", config.tts_engine);
    }

    let pipeline = Pipeline::from_config(&config)?;
    let report = pipeline.run(Local::now(), &ConsoleProgress).await?;

    match report {
        PipelineReport::NothingToDo => {
            println!(
                "\nNothing to do: no articles found in the past {} hours.",
                config.recency_hours
            );
        }
        PipelineReport::Produced {
            bulletin,
            bulletin_path,
            audio,
        } => {
            if args.print_summary {
                println!("\n{}", bulletin.render());
            }

            println!("\n✅ Done!");
            println!("  Bulletin: {}", bulletin_path.display());
            match audio {
                AudioStatus::Written(artifact) => println!(
                    "  Audio:    {} ({}, {} bytes)",
                    artifact.path.display(),
                    artifact.format,
                    artifact.bytes
                ),
                AudioStatus::Skipped(reason) => println!("  Audio:    skipped ({})", reason),
                AudioStatus::Failed(err) => println!("  Audio:    ⚠ not produced ({})", err),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn list_articles(args: ListArgs) -> Result<ExitCode> {
    let vars = config::load_vars(args.common.env_file.as_deref())?;
    let overrides = ConfigOverrides {
        recency_hours: args.hours,
        no_audio: true,
        ..Default::default()
    };
    // Listing needs no credentials; other problems are reported but not fatal.
    let (config, problems) = Config::resolve_with_problems(&vars, &overrides);
    for problem in problems.iter().filter(|p| !p.starts_with("Missing API key")) {
        println!("⚠ {}", problem);
    }

    let fetcher = ContentFetcher::new(&config.source)?;
    println!(
        "📚 Articles from the past {} hours ({})\n",
        config.recency_hours,
        fetcher.source_url()
    );
    let listing = fetcher.list(config.recency_hours, Utc::now()).await?;

    match &listing.featured {
        Some(featured) => {
            println!("[PERSPECTIVE] {}", featured.title);
            println!("    {}\n", featured.url);
        }
        None => println!("⚠ No perspective found\n"),
    }

    for (i, entry) in listing.entries.iter().enumerate() {
        println!("{:>3}. {} ({})", i + 1, entry.title, entry.published);
        println!("     {}", entry.url);
    }

    println!("\nTotal: {} articles", listing.entries.len());
    Ok(ExitCode::SUCCESS)
}

async fn check(args: CheckArgs) -> Result<ExitCode> {
    println!("🔍 Checking configuration...\n");

    let env_file = args
        .common
        .env_file
        .clone()
        .or_else(config::default_env_file);
    match &env_file {
        Some(path) => println!("  Env file:      {}", path.display()),
        None => println!("  Env file:      (none found, using process environment)"),
    }

    let vars = config::load_vars(args.common.env_file.as_deref())?;
    let (config, problems) = Config::resolve_with_problems(&vars, &ConfigOverrides::default());
    let mut ok = problems.is_empty();

    println!("  AI provider:   {} ({})", config.ai_provider, config.model());
    println!("  TTS engine:    {}", config.tts_engine);
    println!("  Audio:         {}", if config.audio_enabled { "enabled" } else { "disabled" });
    println!("  Output dir:    {}", config.output_dir.display());
    println!("  Window:        {} hours", config.recency_hours);
    println!("  Source:        {}", config.source.base_url);

    println!("\n🔑 API keys:");
    print_key("ANTHROPIC_API_KEY", config.anthropic_api_key.is_some());
    print_key("OPENAI_API_KEY", config.openai_api_key.is_some());

    println!("\n🗣  Piper:");
    match find_executable(&config.piper.binary) {
        Some(path) => println!("  ✓ binary:      {}", path.display()),
        None => println!("  ✗ binary:      {} not found", config.piper.binary.display()),
    }
    if config.piper.model.exists() {
        println!("  ✓ model:       {}", config.piper.model.display());
    } else if config.piper.model_url.is_some() {
        println!(
            "  ✗ model:       {} (downloaded on first use)",
            config.piper.model.display()
        );
    } else {
        println!(
            "  ✗ model:       {} (download disabled)",
            config.piper.model.display()
        );
    }

    println!();
    match io::check_writable(&config.output_dir) {
        Ok(()) => println!("✓ Output directory is writable"),
        Err(e) => {
            println!("✗ Output directory is not writable: {}", e);
            ok = false;
        }
    }

    if args.probe {
        let fetcher = ContentFetcher::new(&config.source)?;
        match fetcher.probe().await {
            Ok(()) => println!("✓ {} is reachable", fetcher.source_url()),
            Err(e) => {
                println!("✗ {}", e);
                ok = false;
            }
        }
    }

    if problems.is_empty() {
        println!("\n✓ Configuration is valid");
    } else {
        write_problems(&mut std::io::stderr().lock(), &problems)?;
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Configuration problems go to stderr, apart from the report on stdout.
fn write_problems(out: &mut impl Write, problems: &[String]) -> std::io::Result<()> {
    writeln!(out, "\n❌ Configuration problems:")?;
    for problem in problems {
        writeln!(out, "  • {}", problem)?;
    }
    Ok(())
}

fn print_key(name: &str, present: bool) {
    if present {
        println!("  ✓ {} is set", name);
    } else {
        println!("  ✗ {} is not set", name);
    }
}

fn find_executable(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
