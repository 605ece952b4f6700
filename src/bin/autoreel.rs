//! CLI for autoreel - prompt, render and publish a daily AI video.

use anyhow::Context;
use autoreel::{Pipeline, PipelineConfig, PollPolicy};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "autoreel")]
#[command(about = "Generate a prompt, render it with Veo and publish the video to YouTube")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Env file to load instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Args)]
struct PollArgs {
    /// Seconds between job status requests
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,

    /// Give up after this many status requests
    #[arg(long, global = true, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    max_poll_attempts: Option<u32>,

    /// Give up after polling this many seconds
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    poll_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: prompt, video, download, upload
    Run,

    /// Generate and save today's prompt only
    Prompt,

    /// Produce the video file without publishing it
    Render {
        /// Use this prompt instead of generating one
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Upload an existing video file
    Publish {
        /// Video file to upload
        path: PathBuf,

        /// Video title
        #[arg(long)]
        title: String,

        /// Video description
        #[arg(long)]
        description: String,
    },

    /// Print the resolved configuration (secrets redacted)
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter_layer)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let pipeline = || Pipeline::from_config(&config);
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Commands::Check => {
            println!("{}", serde_json::to_string_pretty(&config.summary())?);
        }
        Commands::Run => {
            let report = pipeline()?.run(&cancel).await?;
            let output = render_output(cli.json, &report, |r| {
                format!(
                    "Published: {}\nPrompt: {}\nVideo: {} ({} bytes)",
                    r.published.url,
                    r.prompt_file.display(),
                    r.video_path.display(),
                    r.video_size_bytes
                )
            })?;
            println!("{}", output);
        }
        Commands::Prompt => {
            let prompt = pipeline()?.generate_prompt(&cancel).await?;
            let output = render_output(cli.json, &prompt, |p| {
                format!("{}\n\nSaved to {}", p.text, p.path.display())
            })?;
            println!("{}", output);
        }
        Commands::Render { prompt } => {
            let pipeline = pipeline()?;
            let text = match prompt {
                Some(text) => text,
                None => pipeline.generate_prompt(&cancel).await?.text,
            };
            let rendered = pipeline.render(&text, &cancel).await?;
            let output = render_output(cli.json, &rendered, |r| {
                format!(
                    "Rendered video: {} ({} bytes), operation {}",
                    r.path.display(),
                    r.size_bytes,
                    r.operation
                )
            })?;
            println!("{}", output);
        }
        Commands::Publish {
            path,
            title,
            description,
        } => {
            let published = pipeline()?
                .publish_file(&path, &title, &description, &cancel)
                .await
                .with_context(|| format!("failed to publish {}", path.display()))?;
            let output = render_output(cli.json, &published, |p| format!("Published: {}", p.url))?;
            println!("{}", output);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.env_file {
        Some(path) => PipelineConfig::from_env_file(path)?,
        None => PipelineConfig::from_env()?,
    };
    config.poll = cli.poll.apply(config.poll);
    Ok(config)
}

impl PollArgs {
    /// Command-line values win over the environment.
    fn apply(&self, mut policy: PollPolicy) -> PollPolicy {
        if let Some(secs) = self.poll_interval {
            policy = policy.interval(Duration::from_secs(secs));
        }
        if let Some(attempts) = self.max_poll_attempts {
            policy = policy.max_attempts(attempts);
        }
        if let Some(secs) = self.poll_timeout {
            policy = policy.timeout(Duration::from_secs(secs));
        }
        policy
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

fn render_output<T: serde::Serialize>(
    json: bool,
    value: &T,
    human: impl FnOnce(&T) -> String,
) -> anyhow::Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(human(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoreel::PublishResult;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "autoreel",
            "run",
            "--json",
            "--poll-interval",
            "5",
            "--max-poll-attempts",
            "40",
            "--env-file",
            "prod.env",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert!(cli.json);
        assert_eq!(cli.poll.poll_interval, Some(5));
        assert_eq!(cli.poll.max_poll_attempts, Some(40));
        assert_eq!(cli.poll.poll_timeout, None);
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
    }

    #[test]
    fn test_zero_poll_limits_rejected() {
        for flag in ["--poll-interval", "--max-poll-attempts", "--poll-timeout"] {
            let result = Cli::try_parse_from(["autoreel", "render", flag, "0"]);
            assert!(result.is_err(), "{} 0 was accepted", flag);
        }
    }

    #[test]
    fn test_publish_requires_title_and_description() {
        assert!(Cli::try_parse_from(["autoreel", "publish", "video.mp4"]).is_err());

        let cli = Cli::try_parse_from([
            "autoreel",
            "publish",
            "video.mp4",
            "--title",
            "T",
            "--description",
            "D",
        ])
        .unwrap();
        match cli.command {
            Commands::Publish {
                path,
                title,
                description,
            } => {
                assert_eq!(path, PathBuf::from("video.mp4"));
                assert_eq!(title, "T");
                assert_eq!(description, "D");
            }
            _ => panic!("Expected publish command"),
        }
    }

    #[test]
    fn test_poll_overrides() {
        let cli = Cli::try_parse_from([
            "autoreel",
            "render",
            "--poll-interval",
            "2",
            "--poll-timeout",
            "600",
        ])
        .unwrap();
        let policy = cli.poll.apply(PollPolicy::default().max_attempts(9));
        assert_eq!(policy.interval, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, Some(9));
        assert_eq!(policy.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_missing_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.env");
        let cli = Cli::try_parse_from([
            "autoreel",
            "check",
            "--env-file",
            missing.to_str().unwrap(),
        ])
        .unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(err.to_string().contains("missing.env"));
    }

    #[test]
    fn test_render_output() {
        let published = PublishResult {
            video_id: "abc".into(),
            url: "https://www.youtube.com/watch?v=abc".into(),
        };

        let human = render_output(false, &published, |p| format!("Published: {}", p.url)).unwrap();
        assert_eq!(human, "Published: https://www.youtube.com/watch?v=abc");

        let json = render_output(true, &published, |_| unreachable!()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["video_id"], "abc");
        assert_eq!(value["url"], "https://www.youtube.com/watch?v=abc");
    }
}
