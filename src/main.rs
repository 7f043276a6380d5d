use anyhow::Result;
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use page_cloner::{CloneCommand, CloneEvent, CloneOptions, EventSink, PageCloner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = CloneCommand::parse();
    let verbose = args.verbose;

    let (sink, mut events) = EventSink::channel();
    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);

    let printer = {
        let progress = progress.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    CloneEvent::Step(step) => {
                        progress.println(format!("{} {:?}", "▶".blue(), step));
                    }
                    CloneEvent::Pipeline(msg) => progress.set_message(msg),
                    CloneEvent::Console(msg) if verbose => {
                        progress.println(format!("{} {msg}", "console".dimmed()));
                    }
                    CloneEvent::Network(msg) if verbose => {
                        progress.println(format!("{} {msg}", "network".dimmed()));
                    }
                    CloneEvent::Error(msg) => {
                        progress.println(format!("{} {msg}", "error:".red().bold()));
                    }
                    _ => {}
                }
            }
        })
    };

    let cloner = PageCloner::new(
        CloneOptions {
            output_root: args.output_dir,
            headless: !args.headed,
            chrome_path: args.chrome_path,
            ..Default::default()
        },
        sink,
    );

    let result = cloner.clone_page(&args.url).await;
    // Sink inside the cloner is dropped with it; wait for the printer to
    // drain the remaining events.
    drop(cloner);
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            progress.finish_with_message("done");
            println!(
                "{} {} ({} assets downloaded, {} failed)",
                "✅ Clone saved to".green(),
                outcome.output_dir.display(),
                outcome.assets_downloaded,
                outcome.assets_failed
            );
            println!("   open {}/{}", outcome.output_dir.display(), outcome.index_path);
            println!(
                "   static preview {}/{}",
                outcome.output_dir.display(),
                outcome.static_path
            );
            Ok(())
        }
        Err(err) => {
            progress.finish_and_clear();
            Err(err.into())
        }
    }
}
