use clap::{Args, Parser, Subcommand};
use serial_keepalive::config::{Config, ConfigLoader};
use serial_keepalive::port::discovery::{self, PortFilter, PortInfo};
use serial_keepalive::port::{MockBus, MockReply};
use serial_keepalive::{
    logging, KeepAliveConnection, KeepAliveError, LineFramer, PollMode, ResponseQueue,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Keep a serial device connection alive across unplugs and resets.",
    long_about = "Waits for a serial port to appear, connects, and reconnects whenever the device drops off. Lines read from stdin are sent as requests and the replies printed."
)]
struct Cli {
    /// Configuration file (overrides the standard search locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this path and exit
    #[arg(long, global = true)]
    write_config: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG still wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    List(ListArgs),
    /// Print the first port that accepts a connection
    Find(FindArgs),
    /// Connect to a port and run requests read from stdin
    Connect(ConnectArgs),
}

#[derive(Args, Debug)]
struct FindArgs {
    /// Baud rate to test each port with
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Pause between failed tests in milliseconds
    #[arg(long = "delay-ms", default_value_t = 100)]
    delay_ms: u64,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Include ports that refuse a test connection and keep non-matching
    /// ports after the `--vid-pid` matches
    #[arg(long)]
    all: bool,

    /// Only USB ports with this `vid:pid` (repeatable)
    #[arg(long = "vid-pid", value_name = "VID:PID")]
    vid_pid: Vec<String>,

    /// Print the port table as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Port name or alias; defaults to `connection.port` from the config
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Connection and response timeout in milliseconds
    #[arg(short, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Busy-poll for responses
    #[arg(long, conflicts_with = "block")]
    poll: bool,

    /// Block on the response queue
    #[arg(long)]
    block: bool,

    /// Run against a simulated port that echoes every line
    #[arg(long)]
    mock: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(level) = &cli.log_level {
        loader.config_mut().logging.level = level.clone();
    }
    logging::init_or_warn(&loader.config().logging, &mut std::io::stderr());
    debug!(config_path = ?loader.config_path, "Configuration loaded");

    if let Some(path) = &cli.write_config {
        loader.save_to(path)?;
        info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    match cli.command {
        Some(Command::List(args)) => list(&args),
        Some(Command::Find(args)) => find(&args),
        Some(Command::Connect(args)) => connect(loader.config(), &args),
        None => list(&ListArgs {
            all: false,
            vid_pid: Vec::new(),
            json: false,
        }),
    }
}

fn list(args: &ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let table = discovery::port_table()?;
    let rows: Vec<PortInfo> = if args.vid_pid.is_empty() {
        table
            .into_iter()
            .filter(|info| discovery::is_candidate_port(&info.port))
            .filter(|info| args.all || discovery::probe_port(&info.port, None))
            .collect()
    } else {
        PortFilter {
            vid_pid: args.vid_pid.clone(),
            include_all: args.all,
            ..PortFilter::default()
        }
        .apply(table)
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No serial ports found.");
    }
    for info in rows {
        println!(
            "{:<16} {:<10} {}",
            info.port,
            info.vid_pid().unwrap_or_else(|| "-".to_string()),
            info.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn find(args: &FindArgs) -> Result<(), Box<dyn std::error::Error>> {
    let port = discovery::find_port(args.baud, Duration::from_millis(args.delay_ms), |port, baud| {
        discovery::probe_port(port, Some(baud))
    })?;
    println!("{port}");
    Ok(())
}

fn connect(config: &Config, args: &ConnectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let port = args
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .map(|name| config.connection.resolve_port(&name))
        .ok_or("no port given and `connection.port` is not configured")?;

    let mut port_config = config.connection.port_configuration();
    if let Some(baud) = args.baud {
        port_config.baud_rate = baud;
    }

    let mut options = config.keepalive.options();
    if args.poll {
        options.poll_mode = PollMode::Polling;
    } else if args.block {
        options.poll_mode = PollMode::Blocking;
    }
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .or(options.default_timeout);
    options.default_timeout = timeout;

    let responses = ResponseQueue::new();
    let framer = Arc::new(LineFramer::new(
        config.keepalive.terminator.as_bytes().to_vec(),
        responses.clone(),
    ));

    let connection = if args.mock {
        let bus = MockBus::new();
        bus.plug(&port);
        bus.set_reply(&port, MockReply::Echo);
        KeepAliveConnection::with_backend(
            port.as_str(),
            port_config,
            options,
            framer,
            Arc::new(bus.clone()),
            Arc::new(bus),
        )
    } else {
        KeepAliveConnection::new(port.as_str(), port_config, options, framer)
    };

    let connection = match connection.enter() {
        Ok(connection) => connection,
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    };
    info!(port = %port, "Ready; reading requests from stdin");

    let terminator = config.keepalive.terminator.as_bytes();
    for line in std::io::stdin().lock().lines() {
        let mut payload = line?.into_bytes();
        payload.extend_from_slice(terminator);

        match connection.request(&responses, &payload, timeout, None) {
            Ok(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            Err(e) if e.is_no_response() => eprintln!("{e}"),
            Err(KeepAliveError::Closed) => break,
            Err(e) => eprintln!("Request failed: {e}"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&connection.status())?);
    Ok(())
}

/// Print an error and its causes to stderr.
fn report(error: &dyn std::error::Error) {
    eprintln!("Error: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}
