use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use qwen3vl_nodes::config::{Config, DEFAULT_CONFIG_FILE};
use qwen3vl_nodes::media::{ImageTensor, VideoInput};
use qwen3vl_nodes::node::{
    format_response, ApiNode, ApiNodeInputs, DEFAULT_PROMPT, RETURN_NAMES,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "qwen3vl-nodes")]
#[command(about = "Ask Qwen3-VL models about images and videos")]
struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a prompt, with optional image and video, to the model.
    Ask(AskArgs),
    /// List configured API providers.
    Providers,
    /// List configured models.
    Models,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(default_value = DEFAULT_PROMPT)]
    prompt: String,

    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    /// Model name or display name; `[...]` tags are ignored.
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_p: Option<f32>,

    /// Image file to attach.
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Local video file, http(s) URL or `data:` URI to attach.
    #[arg(long, value_name = "PATH_OR_URL", value_parser = parse_video_arg)]
    video: Option<VideoInput>,

    #[arg(long)]
    stream: bool,

    /// Also print the raw provider response.
    #[arg(long)]
    raw: bool,

    /// Title printed above the response.
    #[arg(long)]
    title: Option<String>,
}

fn parse_video_arg(input: &str) -> std::result::Result<VideoInput, String> {
    VideoInput::parse(input).ok_or_else(|| "Video path or URL must not be empty".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::load(&args.config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging().filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.log_source();

    let outcome = match args.command {
        Command::Ask(ask) => run_ask(config, ask).await,
        Command::Providers => {
            list_providers(&config);
            Ok(())
        }
        Command::Models => {
            list_models(&config);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        error!("Request failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_ask(config: Config, args: AskArgs) -> Result<()> {
    let image = match &args.image {
        Some(path) => {
            let decoded = image::open(path)
                .with_context(|| format!("Failed to open image {}", path.display()))?;
            Some(ImageTensor::from_image(&decoded))
        }
        None => None,
    };

    let node = ApiNode::new(config)?;
    let inputs = ApiNodeInputs {
        text_prompt: args.prompt,
        provider: args.provider,
        api_key: args.api_key,
        model_name: args.model,
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        top_p: args.top_p,
        image,
        video: args.video,
        stream: args.stream,
    };

    let (text, raw) = node.process(inputs).await?;
    info!("Received {} characters", text.chars().count());

    println!(
        "{}",
        render_outputs(&text, &raw, args.title.as_deref(), args.raw)
    );
    Ok(())
}

/// Formatted text, followed by the raw response under its output name when
/// requested.
fn render_outputs(text: &str, raw: &str, title: Option<&str>, include_raw: bool) -> String {
    let formatted = format_response(text, title);
    if !include_raw {
        return formatted;
    }

    let [text_name, raw_name] = RETURN_NAMES;
    format!(
        "[{}]\n{}\n\n[{}]\n{}",
        text_name, formatted, raw_name, raw
    )
}

fn list_providers(config: &Config) {
    let current = config.provider();
    for id in config.available_providers() {
        let profile = config.provider_profile(Some(id.as_str()));
        let marker = if id == current { "*" } else { " " };
        println!("{} {:<12} {:<16} {}", marker, id, profile.name, profile.base_url);
    }
}

fn list_models(config: &Config) {
    let default = config.default_model();
    for model in config.available_models() {
        let marker = if model.name == default { "*" } else { " " };
        let max_tokens = model
            .max_tokens
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} {:<32} {:<28} {}", marker, model.name, model.label(), max_tokens);
    }
}
