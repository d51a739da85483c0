//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Capture the PDF behind a paper URL.
///
/// Loads the URL the way a browser would (following redirects, keeping
/// cookies), then tries every acquisition strategy until it holds bytes that
/// start with `%PDF`, or gives up after the retry schedule.
#[derive(Parser, Debug)]
#[command(name = "paper-capture")]
#[command(author, version, about)]
pub struct Args {
    /// URL of the paper, landing page, or PDF viewer
    pub url: String,

    /// Directory to save the captured PDF into (default: current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Netscape-format cookie file to seed the session with ("-" reads stdin)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Author list used for the fallback filename ("Last, First; ...")
    #[arg(long)]
    pub author: Option<String>,

    /// Publication year used for the fallback filename
    #[arg(long)]
    pub year: Option<String>,

    /// Title used for the fallback filename
    #[arg(long)]
    pub title: Option<String>,

    /// Library proxy prefix or template containing {url}
    #[arg(long, value_name = "URL")]
    pub library_proxy: Option<String>,

    /// Retry once through the library proxy when no PDF is found
    #[arg(long)]
    pub use_proxy: bool,

    /// Attempt offsets in milliseconds (comma-separated, e.g. 0,1000,2000,3000)
    #[arg(long, value_delimiter = ',', value_name = "MS", num_args = 1..=10)]
    pub retry_offsets: Option<Vec<u64>>,

    /// Directory for temporary download artifacts
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/paper-capture/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the capture report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// True when `--cookies -` asks for stdin.
    #[must_use]
    pub fn cookies_from_stdin(&self) -> bool {
        self.cookies.as_deref().is_some_and(|path| path.as_os_str() == "-")
    }
}
