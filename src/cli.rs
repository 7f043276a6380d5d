use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "page-cloner",
    about = "Clone a JavaScript-rendered web page into a self-contained local copy",
    version,
    long_about = "Renders the target page in a headless browser (auto-scrolling to trigger \
lazy-loaded content), downloads every referenced asset, rewrites all references to local \
paths, and writes index.html plus a script-stripped index-static.html preview."
)]
pub struct CloneCommand {
    /// The URL of the page to clone
    #[arg(required = true)]
    pub url: String,

    /// Root directory for clone output folders
    #[arg(short, long, default_value = "./output")]
    pub output_dir: PathBuf,

    /// Run the browser with a visible window instead of headless
    #[arg(long)]
    pub headed: bool,

    /// Path to a Chrome/Chromium executable (auto-detected when omitted)
    #[arg(long)]
    pub chrome_path: Option<PathBuf>,

    /// Also print console/network diagnostics from the rendered page
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_args() {
        let args = CloneCommand::try_parse_from(&["page-cloner", "https://example.com"]).unwrap();

        assert_eq!(args.url, "https://example.com");
        assert_eq!(args.output_dir, PathBuf::from("./output"));
        assert!(!args.headed);
        assert!(!args.verbose);
        assert!(args.chrome_path.is_none());
    }

    #[test]
    fn test_parse_all_args() {
        let args = CloneCommand::try_parse_from(&[
            "page-cloner",
            "example.com/shop",
            "-o",
            "./clones",
            "--headed",
            "--chrome-path",
            "/usr/bin/chromium",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.url, "example.com/shop");
        assert_eq!(args.output_dir, PathBuf::from("./clones"));
        assert!(args.headed);
        assert!(args.verbose);
        assert_eq!(args.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn test_parse_missing_url() {
        let result = CloneCommand::try_parse_from(&["page-cloner", "-o", "./output"]);
        assert!(result.is_err());
    }
}
