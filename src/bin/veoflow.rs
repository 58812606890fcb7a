//! CLI for veoflow - Veo video generation through an API proxy.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use veoflow::{
    decode_to_file, encode_image, DownloadResult, GenerationParameters, ReferenceImage, Stage,
    VeoConfig, VideoGenerationRequest, VideoWorkflow, WorkflowError,
};

#[derive(Parser)]
#[command(name = "veoflow")]
#[command(about = "Generate videos with Veo: submit, poll until done, download")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (overrides LITELLM_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key (overrides LITELLM_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model resource (overrides VEO_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a video from a text prompt and download it
    Generate(GenerateArgs),

    /// Wait for an existing operation and download its video
    Wait(WaitArgs),

    /// Download an artifact URI
    Download(DownloadArgs),

    /// Print an image file as base64
    Encode(EncodeArgs),

    /// Write base64 text (or a data URL) from a file as raw bytes
    Decode(DecodeArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the video
    prompt: String,

    /// Output file path (default: result/veo_video_<prompt>_<timestamp>.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reference image, repeatable
    #[arg(short = 'r', long = "reference-image")]
    reference_images: Vec<PathBuf>,

    /// Reference type sent with every reference image (e.g. asset)
    #[arg(long)]
    reference_type: Option<String>,

    /// Image to use as the first frame
    #[arg(long)]
    first_frame: Option<PathBuf>,

    /// Aspect ratio (e.g., 16:9)
    #[arg(long)]
    aspect_ratio: Option<String>,

    /// Video duration in seconds
    #[arg(short, long)]
    duration: Option<u32>,

    /// Resolution (e.g., 720p, 1080p)
    #[arg(long)]
    resolution: Option<String>,

    /// What to avoid in the video
    #[arg(long)]
    negative_prompt: Option<String>,

    /// Seed for deterministic generation
    #[arg(long)]
    seed: Option<u32>,

    /// Number of videos to generate
    #[arg(long)]
    sample_count: Option<u32>,

    /// Person generation policy (e.g., allow_adult)
    #[arg(long)]
    person_generation: Option<String>,

    /// Generate an audio track
    #[arg(long)]
    generate_audio: bool,

    /// Let the provider enhance the prompt
    #[arg(long)]
    enhance_prompt: bool,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct WaitArgs {
    /// Operation name returned by a previous submission
    operation: String,

    /// Output file path
    #[arg(short, long, default_value = "generated_video.mp4")]
    output: PathBuf,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct DownloadArgs {
    /// Artifact URI as reported by the provider
    uri: String,

    /// Output file path
    #[arg(short, long, default_value = "generated_video.mp4")]
    output: PathBuf,
}

#[derive(Args)]
struct EncodeArgs {
    /// Image file to encode
    image: PathBuf,

    /// Print a data URL instead of bare base64
    #[arg(long)]
    data_url: bool,
}

#[derive(Args)]
struct DecodeArgs {
    /// File holding base64 text
    input: PathBuf,

    /// Where to write the decoded bytes
    #[arg(short, long)]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("veoflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e, json);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Encode(args) => encode(args, cli.json),
        Commands::Decode(args) => decode(args, cli.json),
        Commands::Generate(args) => {
            let config = build_config(&cli, args.timeout)?;
            generate(args, &config, cli.json).await
        }
        Commands::Wait(args) => {
            let config = build_config(&cli, args.timeout)?;
            wait(args, &config, cli.json).await
        }
        Commands::Download(args) => {
            let config = build_config(&cli, None)?;
            download(args, &config, cli.json).await
        }
    }
}

fn build_config(cli: &Cli, timeout: Option<u64>) -> anyhow::Result<VeoConfig> {
    let mut builder = VeoConfig::builder();
    if let Some(url) = &cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(key) = &cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(secs) = timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    let config = builder.build().context("invalid configuration")?;
    tracing::info!(base_url = %config.base_url, model = %config.model, "using API");
    Ok(config)
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping");
            child.cancel();
        }
    });
    token
}

fn build_request(args: &GenerateArgs) -> Result<VideoGenerationRequest, WorkflowError> {
    let parameters = GenerationParameters {
        aspect_ratio: args.aspect_ratio.clone(),
        duration_secs: args.duration,
        resolution: args.resolution.clone(),
        negative_prompt: args.negative_prompt.clone(),
        seed: args.seed,
        sample_count: args.sample_count,
        person_generation: args.person_generation.clone(),
        generate_audio: args.generate_audio.then_some(true),
        enhance_prompt: args.enhance_prompt.then_some(true),
        ..GenerationParameters::default()
    };
    let mut request = VideoGenerationRequest::new(&args.prompt).with_parameters(parameters);

    for path in &args.reference_images {
        tracing::info!(path = %path.display(), "using reference image");
        let image = encode_image(path).map_err(WorkflowError::at(Stage::Encode))?;
        let mut reference = ReferenceImage::new(image);
        if let Some(kind) = &args.reference_type {
            reference = reference.with_reference_type(kind);
        }
        request = request.with_reference_image(reference);
    }

    if let Some(path) = &args.first_frame {
        let image = encode_image(path).map_err(WorkflowError::at(Stage::Encode))?;
        request = request.with_first_frame(image);
    }

    Ok(request)
}

async fn generate(args: &GenerateArgs, config: &VeoConfig, json: bool) -> anyhow::Result<()> {
    let request = build_request(args)?;
    let workflow = VideoWorkflow::new(config)?;
    let cancel = shutdown_token();

    let result = workflow.run(&request, args.output.clone(), &cancel).await?;
    print_download(&result, json)
}

async fn wait(args: &WaitArgs, config: &VeoConfig, json: bool) -> anyhow::Result<()> {
    let workflow = VideoWorkflow::new(config)?;
    let handle = workflow.handle(&args.operation);
    let cancel = shutdown_token();

    let result = workflow.resume(&handle, &args.output, &cancel).await?;
    print_download(&result, json)
}

async fn download(args: &DownloadArgs, config: &VeoConfig, json: bool) -> anyhow::Result<()> {
    let workflow = VideoWorkflow::new(config)?;
    let cancel = shutdown_token();
    let result = workflow
        .fetcher()
        .download(&args.uri, &args.output, &cancel)
        .await
        .map_err(WorkflowError::at(Stage::Download))?;
    print_download(&result, json)
}

fn encode(args: &EncodeArgs, json: bool) -> anyhow::Result<()> {
    let image = encode_image(&args.image).map_err(WorkflowError::at(Stage::Encode))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&image)?);
    } else if args.data_url {
        println!("{}", image.to_data_url());
    } else {
        println!("{}", image.data);
    }
    Ok(())
}

fn decode(args: &DecodeArgs, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    decode_to_file(&text, &args.output)?;
    let size_bytes = std::fs::metadata(&args.output)?.len();
    print_file(&args.output, size_bytes, json)
}

fn print_download(result: &DownloadResult, json: bool) -> anyhow::Result<()> {
    if json {
        let value = serde_json::json!({
            "success": true,
            "output": result.path.display().to_string(),
            "size_bytes": result.size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "Saved video: {} ({:.2} MB)",
            result.path.display(),
            result.size_mb()
        );
    }
    Ok(())
}

fn print_file(path: &Path, size_bytes: u64, json: bool) -> anyhow::Result<()> {
    if json {
        let value = serde_json::json!({
            "success": true,
            "output": path.display().to_string(),
            "size_bytes": size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Wrote {} ({} bytes)", path.display(), size_bytes);
    }
    Ok(())
}

fn report_failure(err: &anyhow::Error, json: bool) {
    let workflow = err.downcast_ref::<WorkflowError>();
    let stage = workflow.map(|w| w.stage.to_string());
    let status = workflow.and_then(|w| w.source.status_code());
    let headers = workflow.map(|w| w.source.headers()).unwrap_or_default();

    if json {
        let value = serde_json::json!({
            "success": false,
            "stage": stage,
            "error": failure_message(err),
            "status": status,
            "headers": headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect::<serde_json::Map<_, _>>(),
        });
        println!("{value}");
        return;
    }

    eprintln!("Failed: {}", failure_message(err));
    if let Some(status) = status {
        eprintln!("Status code: {status}");
    }
    for (name, value) in headers {
        eprintln!("  {name}: {value}");
    }
}

/// One-line description of a failure. A [`WorkflowError`] already names its
/// cause, so only other errors get their context chain appended.
fn failure_message(err: &anyhow::Error) -> String {
    if err.is::<WorkflowError>() {
        err.to_string()
    } else {
        format!("{err:#}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veoflow::{ProviderErrorDetail, VeoFlowError};

    #[test]
    fn test_failure_message_names_cause_once() {
        let detail = ProviderErrorDetail::from_value(
            serde_json::json!({"code": 3, "message": "prompt blocked"}),
        );
        let err = anyhow::Error::from(WorkflowError {
            stage: Stage::Poll,
            source: VeoFlowError::Provider(detail),
        });

        let message = failure_message(&err);
        assert!(message.starts_with("poll failed: "), "{message}");
        assert_eq!(message.matches("prompt blocked").count(), 1, "{message}");
    }

    #[test]
    fn test_failure_message_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("invalid configuration");
        assert_eq!(
            failure_message(&err),
            "invalid configuration: connection refused"
        );
    }
}
