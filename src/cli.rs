use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

const USAGE: &str = "usage: crosstalk [config-path] [--buffered] < request.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    /// Print one outcome JSON instead of streaming SSE frames.
    pub buffered: bool,
}

pub fn parse_args() -> Result<CliArgs> {
    parse_from(env::args().skip(1))
}

pub fn parse_from(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut config_path = None;
    let mut buffered = false;

    for arg in args {
        match arg.as_str() {
            "--buffered" => buffered = true,
            flag if flag.starts_with("--") => {
                return Err(anyhow!("unknown flag {}. {}", flag, USAGE));
            }
            _ if config_path.is_some() => {
                return Err(anyhow!("expected at most one config path. {}", USAGE));
            }
            _ => config_path = Some(PathBuf::from(&arg)),
        }
    }

    let config_path = match config_path {
        Some(path) => path,
        None => env::current_dir()?.join("crosstalk.jsonc"),
    };
    Ok(CliArgs {
        config_path,
        buffered,
    })
}
