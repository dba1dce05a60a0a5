//! Command-line parsing for the `bos` binary.

use std::env;
use std::path::PathBuf;

/// What the binary should do, as parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliOptions),
    Help,
}

/// Parsed options for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub topology: Option<PathBuf>,
    pub preset: Option<String>,
    pub telemetry_out: Option<PathBuf>,
    /// Serve the node protocol after building the topology.
    pub serve: bool,
    /// Overrides `node.listen` from the topology.
    pub listen: Option<String>,
    #[cfg(feature = "api")]
    pub api: bool,
    #[cfg(feature = "api")]
    pub port: u16,
    #[cfg(feature = "tui")]
    pub tui: bool,
}

/// Default port for the REST API.
#[cfg(feature = "api")]
pub const DEFAULT_API_PORT: u16 = 3000;

/// Parses the process arguments.
///
/// # Errors
///
/// Returns a message describing the first malformed argument.
pub fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(&args)
}

fn parse_args_from(args: &[String]) -> Result<Command, String> {
    let mut i = 0usize;
    let mut topology = None;
    let mut preset = None;
    let mut telemetry_out = None;
    let mut serve = false;
    let mut listen = None;
    #[cfg(feature = "api")]
    let mut api = false;
    #[cfg(feature = "api")]
    let mut port = None;
    #[cfg(feature = "tui")]
    let mut tui = false;

    while i < args.len() {
        match args[i].as_str() {
            "--topology" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --topology (expected a TOML file path)",
                )?;
                if topology.replace(PathBuf::from(path)).is_some() {
                    return Err("--topology provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name =
                    args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--telemetry-out" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --telemetry-out (expected a file path)",
                )?;
                if telemetry_out.replace(PathBuf::from(path)).is_some() {
                    return Err("--telemetry-out provided more than once".to_string());
                }
            }
            "--serve" => serve = true,
            "--listen" => {
                i += 1;
                let addr = args.next_or_err(
                    i,
                    "missing value for --listen (expected a socket address)",
                )?;
                if listen.replace(addr.to_string()).is_some() {
                    return Err("--listen provided more than once".to_string());
                }
            }
            #[cfg(feature = "api")]
            "--api" => api = true,
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                let value =
                    args.next_or_err(i, "missing value for --port (expected a u16 port)")?;
                let parsed = value
                    .parse::<u16>()
                    .map_err(|_| format!("--port value \"{value}\" is not a valid u16"))?;
                if port.replace(parsed).is_some() {
                    return Err("--port provided more than once".to_string());
                }
            }
            #[cfg(feature = "tui")]
            "--tui" => tui = true,
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if topology.is_some() && preset.is_some() {
        return Err(
            "arguments `--topology` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    if topology.is_none() && preset.is_none() {
        preset = Some("demo".to_string());
    }

    if listen.is_some() {
        serve = true;
    }

    Ok(Command::Run(CliOptions {
        topology,
        preset,
        telemetry_out,
        serve,
        listen,
        #[cfg(feature = "api")]
        api,
        #[cfg(feature = "api")]
        port: port.unwrap_or(DEFAULT_API_PORT),
        #[cfg(feature = "tui")]
        tui,
    }))
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("bos - battery virtualization node");
    eprintln!();
    eprintln!("Usage: bos [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --topology <path>        Load the battery topology from a TOML file");
    eprintln!("  --preset <name>          Use a built-in topology (demo, tranche)");
    eprintln!("  --telemetry-out <path>   Export a status snapshot to CSV");
    eprintln!("  --serve                  Serve the node protocol (address from node.listen)");
    eprintln!("  --listen <addr>          Node protocol address, implies --serve");
    #[cfg(feature = "api")]
    {
        eprintln!("  --api                    Start the REST API");
        eprintln!("  --port <u16>             REST API port (default: {DEFAULT_API_PORT})");
    }
    #[cfg(feature = "tui")]
    eprintln!("  --tui                    Open the live status monitor");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --topology or --preset is given, the demo preset is used.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn run(list: &[&str]) -> CliOptions {
        match parse_args_from(&args(list)).expect("parse should succeed") {
            Command::Run(opts) => opts,
            Command::Help => panic!("expected a run command"),
        }
    }

    #[test]
    fn defaults_to_demo_preset() {
        let opts = run(&[]);
        assert_eq!(opts.preset.as_deref(), Some("demo"));
        assert!(opts.topology.is_none());
        assert!(!opts.serve);
    }

    #[test]
    fn supports_topology_cli() {
        let opts = run(&["--topology", "site.toml"]);
        assert_eq!(
            opts.topology.as_deref().and_then(|p| p.to_str()),
            Some("site.toml")
        );
        assert!(opts.preset.is_none());
    }

    #[test]
    fn topology_and_preset_are_exclusive() {
        let err = parse_args_from(&args(&["--topology", "a.toml", "--preset", "demo"]))
            .expect_err("should conflict");
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn listen_implies_serve() {
        let opts = run(&["--listen", "127.0.0.1:4004"]);
        assert!(opts.serve);
        assert_eq!(opts.listen.as_deref(), Some("127.0.0.1:4004"));
    }

    #[test]
    fn rejects_duplicates_and_unknown_flags() {
        assert!(parse_args_from(&args(&["--preset", "a", "--preset", "b"])).is_err());
        assert!(parse_args_from(&args(&["--telemetry-out"])).is_err());
        assert_eq!(
            parse_args_from(&args(&["--bogus"])),
            Err("unknown argument: --bogus".to_string())
        );
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(
            parse_args_from(&args(&["--serve", "-h"])),
            Ok(Command::Help)
        );
    }

    #[cfg(feature = "api")]
    #[test]
    fn parses_api_port() {
        let opts = run(&["--api", "--port", "8080"]);
        assert!(opts.api);
        assert_eq!(opts.port, 8080);
        assert!(parse_args_from(&args(&["--port", "http"])).is_err());
    }
}
