use getopts::{Matches, Options};
use metrics_exporter_dogstatsd::DogStatsDBuilder;
use metrics_ingest::{LoggingPlugin, ServerBuilder};
use std::{env, process, str::FromStr, sync::Arc, thread, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("l", "listen", "address to listen on for statsd datagrams (default: 127.0.0.1:8126)", "ADDRESS");
    opts.optopt("w", "workers", "number of aggregation workers (default: available parallelism)", "INTEGER");
    opts.optopt("r", "readers", "number of socket readers, more than one requires --reuseport (default: 1)", "INTEGER");
    opts.optflag("", "reuseport", "bind every reader socket to the same port and let the kernel balance them");
    opts.optopt("", "rcvbuf", "kernel receive buffer size per socket, in bytes (default: 2097152)", "BYTES");
    opts.optopt("", "buffer-size", "maximum datagram size, in bytes (default: 8192)", "BYTES");
    opts.optopt("", "queue-size", "per-worker queue capacity, or 'unbounded' (default: 4096)", "INTEGER");
    opts.optopt("i", "interval", "flush interval, in seconds (default: 10)", "SECONDS");
    opts.optopt("", "stats-address", "statsd server to send self-telemetry to", "ADDRESS");
    opts.optflag("d", "debug", "enable debug logging");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt<T>(matches: &Matches, name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    matches
        .opt_str(name)
        .map(|value| value.parse::<T>().map_err(|e| format!("invalid value '{}' for --{}: {}", value, name, e)))
        .transpose()
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn configure(matches: &Matches) -> Result<(ServerBuilder, Duration), String> {
    let mut builder = ServerBuilder::default();

    if let Some(listen) = matches.opt_str("listen") {
        builder = builder.with_listen_address(listen).map_err(|e| e.to_string())?;
    }
    if let Some(workers) = parse_opt(matches, "workers")? {
        builder = builder.with_workers(workers);
    }
    if let Some(readers) = parse_opt(matches, "readers")? {
        builder = builder.with_readers(readers);
    }
    if let Some(rcvbuf) = parse_opt(matches, "rcvbuf")? {
        builder = builder.with_recv_buffer_size(rcvbuf);
    }
    if let Some(buffer_size) = parse_opt(matches, "buffer-size")? {
        builder = builder.with_buffer_size(buffer_size);
    }
    match matches.opt_str("queue-size").as_deref() {
        None => {}
        Some("unbounded") => builder = builder.with_queue_size(None),
        Some(_) => builder = builder.with_queue_size(parse_opt(matches, "queue-size")?),
    }
    builder = builder.with_reuse_port(matches.opt_present("reuseport"));

    let interval = parse_opt::<u64>(matches, "interval")?.unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS);
    if interval == 0 {
        return Err("flush interval must be at least one second".to_owned());
    }

    Ok((builder.with_plugin(Arc::new(LoggingPlugin)), Duration::from_secs(interval)))
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("Failed to parse command line args: {}", f);
            print_usage(program, &opts);
            process::exit(2);
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    init_logging(matches.opt_present("debug"));

    // The exporter has to be installed before the server is built, so that self-telemetry registers against it.
    if let Some(stats_address) = matches.opt_str("stats-address") {
        let installed = DogStatsDBuilder::default().with_remote_address(&stats_address).and_then(|b| b.install());
        match installed {
            Ok(()) => info!(address = %stats_address, "Sending self-telemetry."),
            Err(e) => {
                error!(error = %e, address = %stats_address, "Failed to install self-telemetry exporter.");
                process::exit(1);
            }
        }
    }

    let (builder, interval) = match configure(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration.");
            process::exit(1);
        }
    };

    let mut server = match builder.build() {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to build ingestion server.");
            process::exit(1);
        }
    };

    if let Err(e) = server.start() {
        error!(error = %e, "Failed to start ingestion server.");
        process::exit(1);
    }

    info!(interval_secs = interval.as_secs(), "Flushing periodically.");
    loop {
        thread::sleep(interval);
        server.flush();
    }
}
