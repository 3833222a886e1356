use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shotsub")]
#[command(about = "Submit image-sequence review media as movies", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct EncodeArgs {
    /// A movie file, or any member frame of an image sequence
    pub input: PathBuf,

    /// Output movie path
    pub output: PathBuf,

    /// Output codec: h264 or mjpeg (defaults from config)
    #[arg(long)]
    pub codec: Option<String>,

    /// Playback frame rate (defaults from config)
    #[arg(long)]
    pub fps: Option<f64>,

    /// Scale and letterbox the output into a 720x480 box
    #[arg(long)]
    pub scale: bool,

    /// 3D LUT file applied during encoding
    #[arg(long, value_name = "PATH")]
    pub lut: Option<PathBuf>,

    /// Encode deadline in seconds (overrides config; 0 waits indefinitely)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Treat the input as a single movie, skipping sequence resolution
    #[arg(long)]
    pub single: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the encoder binary can be located
    CheckFfmpeg,

    /// Resolve the image sequence a file belongs to
    Resolve {
        /// Any member frame of the sequence
        file: PathBuf,
    },

    /// Encode a movie or image sequence to a review movie
    Encode {
        #[command(flatten)]
        args: EncodeArgs,
    },

    /// Show the encoder command without executing (dry run)
    DryRun {
        #[command(flatten)]
        args: EncodeArgs,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,

    /// Delete cached tracking-service credentials
    ClearCredentials,
}

pub fn parse() -> Cli {
    Cli::parse()
}
