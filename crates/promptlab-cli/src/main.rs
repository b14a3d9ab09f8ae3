use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use promptlab_core::{
    normalize_host, AppConfig, ArtifactRef, Credential, GenerationRequest, GenerationResult,
    Profile, ProfileConfig, SamplingLimits, SamplingParams, DEFAULT_PROMPT, TOKEN_ENV,
};
use promptlab_services::{Output, Services};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "promptlab")]
#[command(about = "PromptLab - prompt a GGUF model fetched from Hugging Face", long_about = None)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Default)]
struct ModelArgs {
    /// Profile to run (gguf, lora-compare)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Ollama host URL
    #[arg(long, global = true)]
    ollama_host: Option<String>,

    /// Hub repository of the model
    #[arg(long, global = true)]
    repo: Option<String>,

    /// GGUF file inside the repository
    #[arg(long, global = true)]
    file: Option<String>,

    /// Hub repository of the LoRA adapter
    #[arg(long, global = true)]
    adapter_repo: Option<String>,

    /// Adapter file inside its repository, may include a subfolder
    #[arg(long, global = true)]
    adapter_file: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct SamplingArgs {
    /// Prompt text
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Sampling temperature
    #[arg(short, long, default_value = "1.0")]
    temperature: f32,

    /// Maximum number of new tokens
    #[arg(short, long, default_value = "128")]
    max_tokens: u32,

    /// Nucleus sampling threshold
    #[arg(long, default_value = "0.9")]
    top_p: f32,
}

impl From<SamplingArgs> for GenerationRequest {
    fn from(args: SamplingArgs) -> Self {
        GenerationRequest::new(
            args.prompt,
            SamplingParams {
                temperature: args.temperature,
                top_p: args.top_p,
                max_new_tokens: args.max_tokens,
            },
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate text for one prompt
    Generate(SamplingArgs),

    /// Answer one prompt with the adapted model and its base model
    Compare(SamplingArgs),

    /// Show details of the loaded model
    Info,

    /// Show configuration and runtime status
    Status,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let compare = matches!(cli.command, Some(Commands::Compare(_)));
    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if compare && cli.model.profile.is_none() && !config.profile.is_compare() {
        config.profile = ProfileConfig::preset(Profile::LoraCompare);
    }
    cli.model.apply(&mut config)?;
    if compare && !config.profile.is_compare() {
        anyhow::bail!("compare needs the lora-compare profile");
    }
    debug!(
        profile = config.profile.profile.label(),
        host = %config.ollama.host,
        "Configuration resolved"
    );

    // status works without a token; everything that loads a model needs one
    if let Some(Commands::Status) = cli.command {
        return cmd_status(&config, None);
    }

    let credential = Credential::from_env(TOKEN_ENV)
        .with_context(|| format!("{} must be set (environment or .env)", TOKEN_ENV))?;
    let services = Services::new(&config, Some(credential));

    let outcome = match cli.command {
        Some(Commands::Generate(args)) | Some(Commands::Compare(args)) => {
            cmd_generate(&services, args.into(), cli.model.json)
        }
        Some(Commands::Info) => cmd_info(&services),
        Some(Commands::Status) => Ok(()),
        None => run_interactive(&config, &services),
    };

    services.shutdown();
    outcome
}

impl ModelArgs {
    /// Flags override the environment
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(name) = &self.profile {
            config.profile = ProfileConfig::preset(Profile::parse(name)?);
        }
        if let Some(host) = &self.ollama_host {
            config.ollama.host = normalize_host(host);
        }
        if let Some(repo) = &self.repo {
            config.profile.base.repo_id = repo.clone();
        }
        if let Some(file) = &self.file {
            config.profile.base = split_file(&config.profile.base.repo_id, file);
        }

        if self.adapter_repo.is_some() || self.adapter_file.is_some() {
            let current = config.profile.adapter.clone();
            let repo = self
                .adapter_repo
                .clone()
                .or_else(|| current.as_ref().map(|a| a.repo_id.clone()))
                .unwrap_or_else(|| config.profile.base.repo_id.clone());
            let adapter = match (&self.adapter_file, current) {
                (Some(file), _) => split_file(&repo, file),
                (None, Some(mut existing)) => {
                    existing.repo_id = repo;
                    existing
                }
                (None, None) => ArtifactRef::new(repo, "adapter.gguf"),
            };
            config.profile.adapter = Some(adapter);
        }
        Ok(())
    }
}

/// `lora_model/adapter.gguf` -> subfolder + filename
fn split_file(repo: &str, path: &str) -> ArtifactRef {
    match path.trim_matches('/').rsplit_once('/') {
        Some((dir, file)) => ArtifactRef::new(repo, file).with_subfolder(dir),
        None => ArtifactRef::new(repo, path),
    }
}

fn cmd_generate(services: &Services, request: GenerationRequest, json: bool) -> Result<()> {
    SamplingLimits::default().validate(&request)?;

    // progress on stderr keeps --json output parseable
    eprintln!("Loading model...");
    let handle = services.load()?;
    eprintln!("✅ Model loaded! ({}, {})", handle.name(), handle.device().label());
    eprintln!("Generating...");

    let output = services.run(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match &output {
        Output::Result(result) => print_result("Output", result),
        Output::Comparison(comparison) => {
            print_result("Fine-tuned (LoRA)", &comparison.adapted);
            print_result("Base model", &comparison.base);
        }
    }
    println!("✅ Done!");
    println!();
    Ok(())
}

fn print_result(heading: &str, result: &GenerationResult) {
    println!();
    println!("{}:", heading);
    println!("{:-<60}", "");
    println!("{}", result.text);
    println!("{:-<60}", "");
    println!("  {} ({})", result.model, result);
}

fn cmd_info(services: &Services) -> Result<()> {
    let info = services.info()?;

    println!();
    println!("Model Info:");
    println!("{:-<60}", "");
    println!("  Runtime name:  {}", info.runtime_name);
    println!("  Device:        {}", info.device);
    if let Some(base) = &info.adapter_of {
        println!("  Adapter of:    {}", base);
    }
    println!(
        "  Architecture:  {}",
        info.artifact.architecture.as_deref().unwrap_or("-")
    );
    println!("  Weights:       {}", info.artifact.file_type_label());
    println!("  File size:     {:.1} MB", info.artifact.size_bytes as f64 / 1e6);
    println!("  Parameters:    {}", info.parameter_size.as_deref().unwrap_or("-"));
    println!("  Quantization:  {}", info.quantization.as_deref().unwrap_or("-"));
    if let Some(url) = info.hf_url() {
        println!("  Hub:           {}", url);
    }
    if let Some(license) = &info.hf_license {
        println!("  License:       {}", license);
    }
    if let Some(downloads) = info.hf_downloads {
        println!("  Downloads:     {}", downloads);
    }
    println!();
    Ok(())
}

fn cmd_status(config: &AppConfig, services: Option<&Services>) -> Result<()> {
    println!("System Status:");
    println!("{:-<60}", "");
    println!("  Profile:     {} ({})", config.profile.profile.label(), config.profile.profile.title());
    println!("  Model:       {}", config.profile.model_config()?.display_name());
    println!("  Cache dir:   {}", config.hub.cache_dir.display());
    println!("  Ollama Host: {}", config.ollama.host);

    let client = promptlab_services::OllamaClient::new(&config.ollama.host);
    match client.version() {
        Ok(version) => println!("  Ollama:      connected (v{})", version),
        Err(e) => println!("  Ollama:      disconnected ({})", e),
    }

    let token = if Credential::from_env(TOKEN_ENV).is_ok() { "set" } else { "missing" };
    println!("  {}:    {}", TOKEN_ENV, token);

    if let Some(services) = services {
        println!("  Load status: {}", services.status()?);
    }
    Ok(())
}

fn run_interactive(config: &AppConfig, services: &Services) -> Result<()> {
    display_welcome(config);
    cmd_status(config, Some(services))?;
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let limits = SamplingLimits::default();
    let mut params = limits.defaults();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (cmd, rest) = trimmed
            .split_once(char::is_whitespace)
            .map(|(c, r)| (c, r.trim()))
            .unwrap_or((trimmed, ""));

        match cmd.to_lowercase().as_str() {
            "help" | "h" | "?" => display_help(),
            "status" | "s" => {
                if let Err(e) = cmd_status(config, Some(services)) {
                    println!("Error: {}", e);
                }
            }
            "info" | "i" => {
                if let Err(e) = cmd_info(services) {
                    println!("Error: {}", e);
                }
            }
            "generate" | "gen" | "g" => {
                let prompt = if rest.is_empty() { DEFAULT_PROMPT } else { rest };
                let request = GenerationRequest::new(prompt, params);
                if let Err(e) = cmd_generate(services, request, false) {
                    println!("Error: {}", e);
                }
            }
            "set" => match apply_setting(&mut params, &limits, rest) {
                Ok(()) => print_params(&params),
                Err(e) => println!("Error: {}", e),
            },
            "params" | "p" => print_params(&params),
            "clear" | "cls" => {
                print!("\x1B[2J\x1B[1;1H");
                stdout.flush()?;
            }
            "exit" | "quit" | "q" => {
                println!("  Goodbye!");
                break;
            }
            other => {
                println!("Unknown command: {}. Type 'help' for available commands.", other);
            }
        }
    }

    Ok(())
}

/// `set temperature 0.7`, `set max_tokens 256`, `set top_p 0.95`
fn apply_setting(params: &mut SamplingParams, limits: &SamplingLimits, args: &str) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
        anyhow::bail!("Usage: set <temperature|max_tokens|top_p> <value>");
    };

    match name.to_lowercase().replace('-', "_").as_str() {
        "temperature" | "temp" | "t" => {
            let v: f32 = value.parse().context("temperature must be a number")?;
            limits.temperature.check(v as f64)?;
            params.temperature = v;
        }
        "max_tokens" | "tokens" | "m" => {
            let v: u32 = value.parse().context("max_tokens must be a whole number")?;
            limits.max_tokens.check(v as f64)?;
            params.max_new_tokens = v;
        }
        "top_p" => {
            let v: f32 = value.parse().context("top_p must be a number")?;
            limits.top_p.check(v as f64)?;
            params.top_p = v;
        }
        other => anyhow::bail!("Unknown setting: {}", other),
    }
    Ok(())
}

fn print_params(params: &SamplingParams) {
    println!(
        "  temperature={} max_tokens={} top_p={}",
        params.temperature, params.max_new_tokens, params.top_p
    );
}

fn display_welcome(config: &AppConfig) {
    println!();
    println!("  PromptLab - {}", config.profile.profile.title());
    println!();
    println!("  {}", config.profile.profile.description());
    println!();
    println!("  generate, g [prompt]   # Generate (default prompt if none given)");
    println!("  set <name> <value>     # Change temperature, max_tokens or top_p");
    println!("  info, i                # Show model details");
    println!("  status, s              # Show system status");
    println!("  help                   # Show all command options");
    println!("  exit, quit, q          # Leave");
    println!();
}

fn display_help() {
    println!();
    println!("Available Commands:");
    println!("  generate, g [prompt]   Generate text; without a prompt uses:");
    println!("                         \"{}\"", DEFAULT_PROMPT);
    println!("  set <name> <value>     Change a sampling setting");
    println!("    temperature          0.1 - 2.0 (default 1.0)");
    println!("    max_tokens           32 - 512 (default 128)");
    println!("    top_p                0.1 - 1.0 (default 0.9)");
    println!("  params, p              Show current sampling settings");
    println!("  info, i                Show details of the loaded model");
    println!("  status, s              Show system status");
    println!("  clear, cls             Clear screen");
    println!("  help, h                Show this help message");
    println!("  exit, quit, q          Leave");
    println!();
}
