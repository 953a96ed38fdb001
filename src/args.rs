use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ga_extract")]
#[command(about = "Extract Google Analytics report rows into one delimited file per property")]
#[command(version)]
pub struct Args {
    /// Directory the per-property files are written to
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Rows requested per page (1-10000)
    #[arg(long, value_name = "ROWS")]
    pub page_size: Option<usize>,

    /// Enter the authorization code by hand instead of using a local redirect listener
    #[arg(long)]
    pub no_browser: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to config file
    #[arg(long, default_value = "config/config.toml")]
    pub config: String,
}
