//! webprobe CLI
//!
//! Flags override the matching keys of the TOML config file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use webprobe::{
    ProbeEngine, ProbeSettings,
    error::Result,
    models::Config,
    services::TargetInput,
    storage::{LineSink, OutputFormat, ResultSink},
};

/// Exit status of a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// webprobe - mass HTTP/HTTPS prober
#[derive(Parser, Debug)]
#[command(name = "webprobe", version, about = "Mass HTTP/HTTPS probing engine")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "webprobe.toml")]
    config: PathBuf,

    /// File with one target per line (stdin when no targets are given)
    #[arg(short, long)]
    list: Option<PathBuf>,

    /// Target to probe (repeatable)
    #[arg(short = 'u', long = "target")]
    targets: Vec<String>,

    /// Write results to a file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(long)]
    silent: bool,

    #[command(flatten)]
    probe: ProbeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and exit
    Validate,
}

#[derive(clap::Args, Debug, Default)]
struct ProbeArgs {
    // Input
    /// Ports to probe (nmap syntax, e.g. http:8080,https:8443,1-3)
    #[arg(short, long)]
    ports: Option<String>,
    /// Paths to probe (comma list or file)
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    probe_all_ips: bool,
    #[arg(long)]
    exclude_cdn: bool,
    #[arg(long)]
    leave_default_ports: bool,
    #[arg(long)]
    stream: bool,
    #[arg(long)]
    skip_dedupe: bool,
    /// Input lines are host[:port],vhost pairs
    #[arg(long)]
    vhost_input: bool,
    /// Allowed CIDR (repeatable)
    #[arg(long)]
    allow: Vec<String>,
    /// Denied CIDR (repeatable)
    #[arg(long)]
    deny: Vec<String>,
    /// File containing a raw HTTP request to send to every target
    #[arg(long = "request")]
    raw_request: Option<String>,

    // Request
    /// Request methods (comma list or "all")
    #[arg(short = 'x', long)]
    methods: Option<String>,
    #[arg(long)]
    body: Option<String>,
    /// Custom header "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Send the request line byte-for-byte over a raw connection
    #[arg(long = "unsafe")]
    unsafe_mode: bool,
    /// Timeout per attempt in seconds
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    retries: Option<u32>,
    /// HTTP proxy to use (e.g. http://127.0.0.1:8080)
    #[arg(long)]
    proxy: Option<String>,

    // Scheme
    /// Probe both http and https
    #[arg(long)]
    no_fallback: bool,
    /// Only probe the preferred scheme
    #[arg(long)]
    no_fallback_scheme: bool,
    /// Errors allowed per host before its targets are skipped
    #[arg(long)]
    max_host_error: Option<u32>,

    // Redirects
    #[arg(long)]
    follow_redirects: bool,
    #[arg(long)]
    follow_host_redirects: bool,
    #[arg(long)]
    max_redirects: Option<usize>,
    #[arg(long)]
    include_chain: bool,

    // Throughput
    #[arg(short, long)]
    threads: Option<usize>,
    /// Requests per second
    #[arg(long)]
    rate_limit: Option<u32>,
    /// Requests per minute (overrides --rate-limit)
    #[arg(long)]
    rate_limit_minute: Option<u32>,

    // Response
    /// Hashes to compute (md5,sha1,sha256,sha512,mmh3,simhash)
    #[arg(long)]
    hash: Option<String>,
    #[arg(long)]
    extract_regex: Option<String>,
    #[arg(long)]
    favicon: bool,
    #[arg(long)]
    include_response: bool,

    // Display
    #[arg(long)]
    status_code: bool,
    #[arg(long)]
    content_length: bool,
    #[arg(long)]
    content_type: bool,
    #[arg(long)]
    location: bool,
    #[arg(long)]
    title: bool,
    #[arg(long)]
    web_server: bool,
    #[arg(long)]
    response_time: bool,
    #[arg(long)]
    method: bool,
    #[arg(long)]
    ip: bool,
    /// Show the host's CNAME
    #[arg(long)]
    cname: bool,
    #[arg(long)]
    cdn: bool,
    #[arg(long)]
    line_count: bool,
    #[arg(long)]
    word_count: bool,
    /// Show success/failure of every target
    #[arg(long)]
    probe: bool,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    csv: bool,
    #[arg(long)]
    no_color: bool,

    // Matchers
    #[arg(long = "match-code")]
    match_code: Option<String>,
    #[arg(long = "match-length")]
    match_length: Option<String>,
    #[arg(long = "match-line-count")]
    match_line_count: Option<String>,
    #[arg(long = "match-word-count")]
    match_word_count: Option<String>,
    #[arg(long = "match-favicon")]
    match_favicon: Vec<String>,
    #[arg(long = "match-string")]
    match_string: Vec<String>,
    #[arg(long = "match-regex")]
    match_regex: Vec<String>,

    // Filters
    #[arg(long = "filter-code")]
    filter_code: Option<String>,
    #[arg(long = "filter-length")]
    filter_length: Option<String>,
    #[arg(long = "filter-line-count")]
    filter_line_count: Option<String>,
    #[arg(long = "filter-word-count")]
    filter_word_count: Option<String>,
    #[arg(long = "filter-favicon")]
    filter_favicon: Vec<String>,
    #[arg(long = "filter-string")]
    filter_string: Vec<String>,
    #[arg(long = "filter-regex")]
    filter_regex: Vec<String>,

    // Bookkeeping
    /// Resume from (and keep) the checkpoint file
    #[arg(long)]
    resume: bool,
    #[arg(long)]
    resume_file: Option<String>,
    /// Log progress periodically
    #[arg(long)]
    stats: bool,
    /// Log every request sent
    #[arg(long = "debug-req")]
    debug_request: bool,
    /// Log every response received
    #[arg(long = "debug-resp")]
    debug_response: bool,
}

impl ProbeArgs {
    /// Overlay the flags that were given onto `config`.
    fn apply(self, config: &mut Config) {
        let input = &mut config.input;
        set(&mut input.ports, self.ports);
        set(&mut input.paths, self.path);
        input.probe_all_ips |= self.probe_all_ips;
        input.exclude_cdn |= self.exclude_cdn;
        input.leave_default_ports |= self.leave_default_ports;
        input.stream |= self.stream;
        input.skip_dedupe |= self.skip_dedupe;
        input.vhost_input |= self.vhost_input;
        input.allow.extend(self.allow);
        input.deny.extend(self.deny);
        if self.raw_request.is_some() {
            input.raw_request = self.raw_request;
        }

        let request = &mut config.request;
        set(&mut request.methods, self.methods);
        set(&mut request.body, self.body);
        request.headers.extend(self.headers);
        request.unsafe_mode |= self.unsafe_mode;
        set(&mut request.timeout_secs, self.timeout);
        set(&mut request.retries, self.retries);
        set(&mut request.proxy, self.proxy);

        let scheme = &mut config.scheme;
        scheme.no_fallback |= self.no_fallback;
        scheme.no_fallback_scheme |= self.no_fallback_scheme;
        set(&mut scheme.host_max_errors, self.max_host_error);

        let redirects = &mut config.redirects;
        redirects.follow |= self.follow_redirects;
        redirects.follow_same_host |= self.follow_host_redirects;
        set(&mut redirects.max_redirects, self.max_redirects);
        redirects.include_chain |= self.include_chain;

        let rate = &mut config.rate_limit;
        set(&mut rate.threads, self.threads);
        set(&mut rate.per_second, self.rate_limit);
        set(&mut rate.per_minute, self.rate_limit_minute);

        let response = &mut config.response;
        set(&mut response.hashes, self.hash);
        set(&mut response.extract_regex, self.extract_regex);
        response.favicon |= self.favicon;
        response.include_response |= self.include_response;

        let output = &mut config.output;
        output.status_code |= self.status_code;
        output.content_length |= self.content_length;
        output.content_type |= self.content_type;
        output.location |= self.location;
        output.title |= self.title;
        output.server |= self.web_server;
        output.response_time |= self.response_time;
        output.method |= self.method;
        output.ip |= self.ip;
        output.cname |= self.cname;
        output.cdn |= self.cdn;
        output.line_count |= self.line_count;
        output.word_count |= self.word_count;
        output.probe |= self.probe;
        output.json |= self.json;
        output.csv |= self.csv;
        output.no_color |= self.no_color;

        let matchers = &mut config.matchers;
        set(&mut matchers.status_codes, self.match_code);
        set(&mut matchers.content_lengths, self.match_length);
        set(&mut matchers.line_counts, self.match_line_count);
        set(&mut matchers.word_counts, self.match_word_count);
        matchers.favicon_hashes.extend(self.match_favicon);
        matchers.strings.extend(self.match_string);
        matchers.regexes.extend(self.match_regex);

        let filters = &mut config.filters;
        set(&mut filters.status_codes, self.filter_code);
        set(&mut filters.content_lengths, self.filter_length);
        set(&mut filters.line_counts, self.filter_line_count);
        set(&mut filters.word_counts, self.filter_word_count);
        filters.favicon_hashes.extend(self.filter_favicon);
        filters.strings.extend(self.filter_string);
        filters.regexes.extend(self.filter_regex);

        config.resume.enabled |= self.resume;
        set(&mut config.resume.file, self.resume_file);
        config.logging.stats |= self.stats;
        config.logging.debug_request |= self.debug_request;
        config.logging.debug_response |= self.debug_response;
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Initialize logging. Results go to stdout, logs to stderr.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config);
    cli.probe.apply(&mut config);
    if cli.output.is_some() {
        config.output.file = cli.output;
    }

    let level = if cli.silent {
        "error".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    init_logging(&level);

    let settings = match ProbeSettings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
    };
    if let Some(Command::Validate) = cli.command {
        log::info!("Configuration OK");
        return Ok(ExitCode::SUCCESS);
    }

    if config.output.csv {
        log::warn!("CSV output is not supported; writing plain lines");
    }
    let format = if config.output.json {
        OutputFormat::Json
    } else {
        OutputFormat::Line
    };
    let sink: Box<dyn ResultSink> = match &settings.output_file {
        Some(path) => Box::new(LineSink::file(path, settings.display.clone(), format).await?),
        None => Box::new(LineSink::stdout(settings.display.clone(), format)),
    };

    let input = if !cli.targets.is_empty() {
        TargetInput::Lines(cli.targets)
    } else if let Some(list) = cli.list {
        TargetInput::File(list)
    } else if let Some(host) = settings.raw_request_host.clone() {
        log::info!("No targets given; probing {} from the raw request", host);
        TargetInput::Lines(vec![host])
    } else {
        TargetInput::Stdin
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl-C received, finishing in-flight probes...");
            on_signal.cancel();
        }
    });

    let engine = ProbeEngine::new(settings)?;
    let summary = engine.run(input, sink.as_ref(), cancel).await?;

    if summary.interrupted {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(ExitCode::SUCCESS)
}
