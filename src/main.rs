//! BOS node entry point: CLI wiring and config-driven topology construction.

mod cli;

use std::path::Path;
use std::process;
use std::sync::Arc;

use tracing::{Level, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt as subscriber_fmt};

use bos::bos::Bos;
use bos::clock::SystemClock;
use bos::config::TopologyConfig;
use bos::net::NodeServer;
use bos::telemetry::{export_csv, snapshot};

use cli::{CliOptions, Command};

fn init_logging() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn load_topology(cli: &CliOptions) -> TopologyConfig {
    // --topology takes priority, then --preset
    let loaded = if let Some(ref path) = cli.topology {
        TopologyConfig::from_toml_file(path)
    } else {
        TopologyConfig::from_preset(cli.preset.as_deref().unwrap_or("demo"))
    };
    let topology = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let errors = topology.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    topology
}

fn main() {
    let cli = match cli::parse_args() {
        Ok(Command::Run(opts)) => opts,
        Ok(Command::Help) => {
            cli::print_usage();
            return;
        }
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(1);
        }
    };
    init_logging();

    let topology = load_topology(&cli);
    let node = Arc::new(Bos::with_clock(
        SystemClock::shared(),
        topology.node.sample_period(),
    ));
    if let Err(e) = topology.build(&node) {
        eprintln!("error: failed to build topology: {e}");
        process::exit(1);
    }
    info!(nodes = node.list().len(), "topology built");

    let rows = snapshot(&node);
    for r in &rows {
        println!("{r}");
    }

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&rows, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Status written to {}", path.display());
    }

    #[cfg(all(feature = "api", feature = "tui"))]
    if cli.api && cli.tui {
        eprintln!("error: --api and --tui cannot be combined");
        process::exit(1);
    }

    let listen = cli.listen.clone().or_else(|| topology.node.listen.clone());
    let server = if cli.serve {
        let Some(addr) = listen else {
            eprintln!("error: --serve needs --listen or node.listen in the topology");
            process::exit(1);
        };
        let server = NodeServer::bind(addr.as_str(), node.clone()).unwrap_or_else(|e| {
            eprintln!("error: failed to bind node server on {addr}: {e}");
            process::exit(1);
        });
        Some(server)
    } else {
        None
    };

    #[cfg(feature = "tui")]
    if cli.tui {
        let handle = server.map(|s| {
            s.spawn().unwrap_or_else(|e| {
                eprintln!("error: failed to start node server: {e}");
                process::exit(1);
            })
        });
        if let Err(e) = bos::tui::run(node.clone()) {
            eprintln!("error: TUI crashed: {e}");
            process::exit(1);
        }
        if let Some(handle) = handle {
            let _ = handle.shutdown();
        }
        return;
    }

    #[cfg(feature = "api")]
    if cli.api {
        use std::net::SocketAddr;

        let _handle = server.map(|s| {
            s.spawn().unwrap_or_else(|e| {
                eprintln!("error: failed to start node server: {e}");
                process::exit(1);
            })
        });
        let state = Arc::new(bos::api::AppState { bos: node.clone() });
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
            eprintln!("error: failed to create tokio runtime: {e}");
            process::exit(1);
        });
        if let Err(e) = rt.block_on(bos::api::serve(state, addr)) {
            eprintln!("error: API server failed: {e}");
            process::exit(1);
        }
        return;
    }

    if let Some(server) = server {
        if let Err(e) = server.run() {
            eprintln!("error: node server failed: {e}");
            process::exit(1);
        }
    }
}
