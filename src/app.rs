use crate::cli::{Cli, Commands, EncodeArgs};
use anyhow::Result;
use shotsub::config::Config;
use shotsub::engine::{
    self, Codec, EncodeError, EncodeInput, EncodeOptions, EncodeRequest, Encoder,
};
use shotsub::tracking::CredentialStore;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

pub fn run(cli: Cli) {
    match cli.command {
        Commands::CheckFfmpeg => handle_check_ffmpeg(),
        Commands::Resolve { file } => handle_resolve(file),
        Commands::Encode { args } => handle_encode(args),
        Commands::DryRun { args } => handle_dry_run(args),
        Commands::InitConfig => handle_init_config(),
        Commands::ClearCredentials => handle_clear_credentials(),
    }
}

fn locate_encoder(config: &Config) -> Result<Encoder, EncodeError> {
    Encoder::locate(config.encoder.path.as_deref())
}

fn handle_check_ffmpeg() {
    let config = Config::load().unwrap_or_default();
    match locate_encoder(&config) {
        Ok(encoder) => match encoder.version() {
            Ok(version) => {
                println!("encoder found: {version}");
                println!("({})", encoder.exe().display());
            }
            Err(e) => {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn handle_resolve(file: PathBuf) {
    match engine::resolve(&file) {
        Ok(seq) => {
            println!("stem:        {}", seq.stem);
            println!("start frame: {}", seq.start_frame);
            println!("frame count: {}", seq.frame_count);
            println!("first file:  {}", seq.first_file_path.display());
            println!("extension:   {}", seq.extension);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn build_request(args: &EncodeArgs, config: &Config) -> Result<(EncodeRequest, EncodeOptions)> {
    let codec: Codec = args
        .codec
        .as_deref()
        .unwrap_or(&config.defaults.codec)
        .parse()?;

    let input = if args.single {
        EncodeInput::Movie(args.input.clone())
    } else {
        EncodeInput::Sequence(engine::resolve(&args.input)?)
    };

    let mut request = EncodeRequest::new(input, args.output.clone());
    request.codec = codec;
    request.frame_rate = args.fps.unwrap_or(config.defaults.frame_rate);
    request.scale = args.scale || config.defaults.scale;
    request.lut_3d = args.lut.clone();
    if !config.encoder.extra_args.is_empty() {
        request.extra_args = Some(config.encoder.extra_args.clone());
    }

    let timeout = match args.timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.defaults.timeout(),
    };

    Ok((request, EncodeOptions {
        timeout,
        cancel: None,
    }))
}

fn handle_encode(args: EncodeArgs) {
    let config = Config::load().unwrap_or_default();

    let result = (|| -> Result<()> {
        let encoder = locate_encoder(&config)?;
        let (request, opts) = build_request(&args, &config)?;

        engine::encode(&encoder, &request, &opts, |frame| {
            print!("\rframe {frame}");
            std::io::stdout().flush().ok();
        })?;
        println!();
        println!("Wrote {}", request.output_path.display());
        Ok(())
    })();

    if let Err(e) = result {
        eprintln!();
        if let Some(EncodeError::ProcessFailure { code, detail }) = e.downcast_ref() {
            eprintln!("Error: encoder exited with status {code:?}");
            if !detail.is_empty() {
                eprintln!("{detail}");
            }
        } else {
            eprintln!("Error: {e:#}");
        }
        process::exit(1);
    }
}

fn handle_dry_run(args: EncodeArgs) {
    let config = Config::load().unwrap_or_default();

    let result = (|| -> Result<()> {
        let encoder = locate_encoder(&config)?;
        let (request, _opts) = build_request(&args, &config)?;
        let cmd = engine::build_encode_cmd(&encoder, &request)?;
        if let Some(dir) = cmd.get_current_dir() {
            println!("cd {}", dir.display());
        }
        println!("{}", engine::format_cmd(&cmd));
        Ok(())
    })();

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn handle_init_config() {
    match Config::config_path() {
        Ok(path) => {
            if Config::exists() {
                println!("Config file already exists: {}", path.display());
            } else {
                match Config::ensure_default() {
                    Ok(()) => println!("Created default config: {}", path.display()),
                    Err(e) => {
                        eprintln!("Error: {e:#}");
                        process::exit(1);
                    }
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn handle_clear_credentials() {
    let result = CredentialStore::open_default().and_then(|store| {
        if store.exists() {
            store.clear()?;
            println!("Removed {}", store.path().display());
        } else {
            println!("No cached credentials");
        }
        Ok(())
    });

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
