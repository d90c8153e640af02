use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use media_preview::{
    signature, LogConfig, PipelineOutcome, PreviewPipeline, ScratchDir, setup_logging,
};

/// Generate a preview image for a remote URL.
#[derive(Parser)]
#[command(name = "media-preview", version)]
struct Cli {
    /// Target URL, or the base64url-encoded URL when --sig is given
    url: String,

    /// base64url HMAC-SHA1 signature of the encoded URL; verified against
    /// the SECRET_KEY_BASE environment variable before anything runs
    #[arg(long)]
    sig: Option<String>,

    /// Write the preview bytes to this file
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Print the outcome as JSON to stdout
    #[arg(long)]
    json: bool,

    /// Log level filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(LogConfig {
        log_level: cli.log_level.clone(),
        ..LogConfig::default()
    });

    let url = match resolve_url(&cli) {
        Ok(url) => url,
        Err(code) => return code,
    };

    let scratch = match ScratchDir::create_in_temp().await {
        Ok(scratch) => scratch,
        Err(e) => {
            e.log();
            return ExitCode::from(2);
        }
    };

    let pipeline = PreviewPipeline::new();
    let result = pipeline.run(&url, scratch.path()).await;

    if let Err(e) = scratch.cleanup().await {
        e.log();
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            e.log();
            return ExitCode::from(2);
        }
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).expect("outcome serializes")
        );
    }

    match outcome {
        PipelineOutcome::Success(preview) => {
            if let Err(e) = tokio::fs::write(&cli.output, &preview.content).await {
                eprintln!("failed to write {}: {e}", cli.output.display());
                return ExitCode::from(2);
            }
            info!(
                output = %cli.output.display(),
                content_type = %preview.content_type,
                bytes = preview.content.len(),
                digest = %preview.digest,
                "Preview written"
            );
            ExitCode::SUCCESS
        }
        PipelineOutcome::Rejected { status } => {
            eprintln!("{status} rejected by origin");
            ExitCode::from(1)
        }
        PipelineOutcome::UpstreamError => {
            eprintln!("502 upstream error");
            ExitCode::from(1)
        }
        PipelineOutcome::Unsupported => {
            eprintln!("502 the resource is not an image nor a video");
            ExitCode::from(1)
        }
        PipelineOutcome::TimedOut => {
            eprintln!("504 timed out");
            ExitCode::from(1)
        }
    }
}

/// Plain mode takes the URL as-is; signed mode verifies the signature over
/// the encoded URL first and never runs the pipeline on a failed check.
fn resolve_url(cli: &Cli) -> Result<String, ExitCode> {
    let Some(sig) = &cli.sig else {
        return Ok(cli.url.clone());
    };

    let secret = match std::env::var("SECRET_KEY_BASE") {
        Ok(secret) => secret,
        Err(_) => {
            eprintln!("SECRET_KEY_BASE is not set");
            return Err(ExitCode::from(2));
        }
    };

    if !signature::verify(sig, &cli.url, secret.as_bytes()) {
        eprintln!("invalid signature");
        return Err(ExitCode::from(1));
    }

    signature::decode_url(&cli.url).map_err(|_| {
        eprintln!("invalid signature");
        ExitCode::from(1)
    })
}
