use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mznatcorrer::{MZNatCorrer, MZNatCorrerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn configure_log(log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(fs::File::create(path)?);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(tracing::Level::DEBUG.into())
                        .from_env_lossy(),
                );
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()))
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(tracing::Level::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .with(file_layer);

    subscriber.init();
    Ok(guard)
}

const LOCAL_CONFIG: &str = "mznatcorrer.toml";

/// The configuration files that exist and were merged over the command line
fn merged_config_files(config_file: Option<&Path>) -> Vec<PathBuf> {
    let local = Path::new(LOCAL_CONFIG);
    local
        .is_file()
        .then(|| local.to_path_buf())
        .into_iter()
        .chain(config_file.map(Path::to_path_buf))
        .collect()
}

fn main() -> Result<(), MZNatCorrerError> {
    let args = MZNatCorrer::parse();

    let mut config = Figment::new()
        .merge(Serialized::defaults(&args))
        .merge(Toml::file(LOCAL_CONFIG));
    if let Some(path) = args.config_file.as_ref() {
        config = config.merge(Toml::file_exact(path));
    }
    let merged = merged_config_files(args.config_file.as_deref());
    let args: MZNatCorrer = config.merge(Env::prefixed("MZNATCORRER_")).extract()?;

    let _guard = configure_log(args.log_file.as_deref())?;
    for path in merged {
        debug!(
            "Merged configuration from {}, its values override the command line",
            path.display()
        );
    }
    args.main()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_merged_config_files() {
        // Tests run from the package root, which has no local configuration file
        assert!(merged_config_files(None).is_empty());
        let extra = Path::new("tests/data/labeled.toml");
        assert_eq!(merged_config_files(Some(extra)), vec![extra.to_path_buf()]);
    }
}
