use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{error::ErrorKind, CommandFactory, Parser};
use futures::StreamExt;
use pagegen::{
    compress::sniff_mime,
    logger::{self, LoggerConfig},
    AppConfig, BuiltinTemplates, FileTemplateStore, ImageService, ImageTaskRequest,
    OutlineService, ProviderFactory,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Generate an illustrated outline for a topic and render every page.
#[derive(Debug, Parser)]
#[command(name = "pagegen", version, about)]
struct Args {
    /// Reference image to guide the style; repeat for several images.
    #[arg(long = "ref", value_name = "IMAGE")]
    references: Vec<PathBuf>,

    /// Topic of the outline.
    #[arg(required = true, num_args = 1..)]
    topic: Vec<String>,
}

impl Args {
    fn topic(&self) -> String {
        self.topic.join(" ")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let env_loaded = dotenv::dotenv().is_ok();
    logger::init_with_config(LoggerConfig::from_env())?;
    if env_loaded {
        log::info!("✅ .env file loaded");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let topic = args.topic();
    if topic.trim().is_empty() {
        Args::command()
            .error(ErrorKind::ValueValidation, "the topic must not be blank")
            .exit();
    }

    let config = AppConfig::from_env()?;
    logger::log_config_info(&config);

    let factory = Arc::new(
        ProviderFactory::new(config.text.clone(), config.image.clone()).with_retry(config.retry),
    );
    let templates = Arc::new(
        FileTemplateStore::with_default_dirs(config.prompts_dir.as_deref())
            .with_fallback(Arc::new(BuiltinTemplates)),
    );
    let outline_service = OutlineService::new(factory.clone(), templates.clone());
    let image_service = ImageService::from_config(&config, factory, templates);

    let mut reference_images = Vec::new();
    for path in &args.references {
        let bytes = tokio::fs::read(path).await?;
        log::info!("🖼️  Reference image {} ({} bytes)", path.display(), bytes.len());
        reference_images.push(bytes);
    }
    let image_uris: Vec<String> = reference_images
        .iter()
        .map(|bytes| {
            let mime = sniff_mime(bytes).unwrap_or("image/png");
            format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
        })
        .collect();

    log::info!("🔄 Generating outline for: {}", topic);
    let outline = outline_service.generate_outline(&topic, image_uris).await;
    if !outline.success {
        log::error!(
            "❌ Outline failed: {}",
            outline.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
    for page in &outline.pages {
        log::info!("  [{}] {}", page.page_type, page.content.lines().next().unwrap_or(""));
    }

    let task_id = format!("task_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("⚠️  Interrupted, cancelling remaining pages");
            on_interrupt.cancel();
        }
    });

    let request = ImageTaskRequest::new(task_id, outline.pages)
        .with_full_outline(outline.outline)
        .with_reference_images(reference_images)
        .with_user_topic(topic)
        .with_cancellation(cancel);

    let mut events = image_service.generate_images(request);
    while let Some(event) = events.next().await {
        println!("event: {}\ndata: {}\n", event.name(), event.payload());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_collect_references_and_topic() {
        let args =
            Args::try_parse_from(["pagegen", "--ref", "a.png", "--ref", "b.jpg", "spring", "trip"])
                .unwrap();
        assert_eq!(
            args.references,
            vec![PathBuf::from("a.png"), PathBuf::from("b.jpg")]
        );
        assert_eq!(args.topic(), "spring trip");
    }

    #[test]
    fn test_args_reject_help_missing_topic_and_dangling_ref() {
        let help = Args::try_parse_from(["pagegen", "--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);

        let missing = Args::try_parse_from(["pagegen", "--ref", "a.png"]).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::MissingRequiredArgument);

        let dangling = Args::try_parse_from(["pagegen", "cats", "--ref"]).unwrap_err();
        assert_eq!(dangling.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_args_definition_is_consistent() {
        Args::command().debug_assert();
    }
}
