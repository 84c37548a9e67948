//! Command Line Interface (CLI) arguments.

use crate::precision::MAX_PRECISION;

use byte_unit::Byte;
use clap::Parser;

/// fluxvis command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "FLUXVIS_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "FLUXVIS_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "FLUXVIS_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/fluxvis/certs/cert.pem",
        env = "FLUXVIS_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/fluxvis/certs/key.pem",
        env = "FLUXVIS_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "FLUXVIS_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "FLUXVIS_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "FLUXVIS_USE_RAYON")]
    pub use_rayon: bool,
    /// Path to the sled database holding scenarios and their data
    #[arg(
        long,
        default_value = "~/.local/share/fluxvis/db",
        env = "FLUXVIS_STORE_PATH"
    )]
    pub store_path: String,
    /// Decimal places of output values, for scenarios that do not set a precision
    #[arg(
        long,
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_PRECISION)),
        env = "FLUXVIS_PRECISION"
    )]
    pub precision: u32,
    /// Memory limit for aggregations, e.g. 512MiB. Unlimited if unset. A single request may
    /// hold at most 4GiB - 1B of it.
    #[arg(long, value_parser = parse_memory_limit, env = "FLUXVIS_MEMORY_LIMIT")]
    pub memory_limit: Option<usize>,
    /// Maximum number of concurrent aggregation tasks. Defaults to one less than the number of
    /// CPUs.
    #[arg(long, env = "FLUXVIS_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
}

fn parse_memory_limit(value: &str) -> Result<usize, String> {
    let bytes = Byte::parse_str(value, true).map_err(|err| err.to_string())?;
    usize::try_from(bytes.as_u64()).map_err(|err| err.to_string())
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limit_units() {
        assert_eq!(Ok(512 * 1024 * 1024), parse_memory_limit("512MiB"));
        assert_eq!(Ok(1000), parse_memory_limit("1KB"));
        assert_eq!(Ok(100), parse_memory_limit("100"));
        assert!(parse_memory_limit("lots").is_err());
    }

    #[test]
    fn precision_out_of_range() {
        let result = CommandLineArgs::try_parse_from(["fluxvis", "--precision", "16"]);
        assert!(result.is_err());
    }

    #[test]
    fn explicit_flags() {
        let args = CommandLineArgs::try_parse_from([
            "fluxvis",
            "--port",
            "9000",
            "--precision",
            "4",
            "--memory-limit",
            "1MiB",
            "--thread-limit",
            "3",
        ])
        .unwrap();
        assert_eq!(9000, args.port);
        assert_eq!(4, args.precision);
        assert_eq!(Some(1024 * 1024), args.memory_limit);
        assert_eq!(Some(3), args.thread_limit);
    }
}
