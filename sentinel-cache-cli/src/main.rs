use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use sentinel_cache::memory::MemoryCluster;
use sentinel_cache::{Cache, CacheConfig, Endpoint, SetOptions, Timeout};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sentinel-cache-cli")]
#[command(about = "Sentinel Cache CLI - inspect a sentinel-managed cache", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Connection descriptor (overrides the configuration file)
    #[arg(short, long, default_value = "mymaster/127.0.0.1:26379/0")]
    location: String,

    /// Key prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Client class: sentinel or direct
    #[arg(long)]
    client_class: Option<String>,

    /// Route reads to replicas
    #[arg(long)]
    read_from_replicas: bool,

    /// Run against an in-process sentinel deployment instead of real nodes
    #[arg(long)]
    memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

struct Shell {
    cache: Cache,
}

impl Shell {
    fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "SET" => self.cmd_set(args)?,
            "ADD" => self.cmd_add(args)?,
            "GET" => self.cmd_get(args)?,
            "DEL" | "DELETE" => self.cmd_del(args)?,
            "EXISTS" => self.cmd_exists(args)?,
            "INCR" => self.cmd_incr(args, false)?,
            "DECR" => self.cmd_incr(args, true)?,
            "EXPIRE" => self.cmd_expire(args)?,
            "TTL" => self.cmd_ttl(args)?,
            "PERSIST" => self.cmd_persist(args)?,
            "KEYS" => self.cmd_keys(args)?,
            "DELPATTERN" => self.cmd_delpattern(args)?,
            "FLUSHDB" => self.cmd_flushdb()?,
            "ROUTE" | "INFO" => self.cmd_route()?,
            "PING" => self.cmd_ping()?,
            "HELP" => help_text(),
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: SET key value [ttl]"));
        }

        let mut options = SetOptions::new();
        if let Some(ttl) = args.get(2) {
            let secs = ttl.parse::<i64>().context("TTL must be a valid number")?;
            options = options.timeout(Timeout::Seconds(secs));
        }

        if self.cache.set(&args[0], &parse_value(&args[1]), options)? {
            Ok("OK".green().to_string())
        } else {
            Ok("(nil)".dimmed().to_string())
        }
    }

    fn cmd_add(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: ADD key value"));
        }

        let added = self
            .cache
            .add(&args[0], &parse_value(&args[1]), Timeout::Default)?;
        Ok(format!("(integer) {}", added as u8))
    }

    fn cmd_get(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: GET key"));
        }

        match self.cache.get::<Value, _>(&args[0], None)? {
            Some(value) => Ok(format_value(&value)),
            None => Ok("(nil)".dimmed().to_string()),
        }
    }

    fn cmd_del(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DEL key [key ...]"));
        }

        let deleted = self.cache.delete_many(args, None)?;
        Ok(format!("(integer) {}", deleted))
    }

    fn cmd_exists(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: EXISTS key"));
        }

        let exists = self.cache.has_key(&args[0], None)?;
        Ok(format!("(integer) {}", exists as u8))
    }

    fn cmd_incr(&self, args: &[String], negate: bool) -> Result<String> {
        if args.is_empty() {
            let name = if negate { "DECR" } else { "INCR" };
            return Err(anyhow::anyhow!("Usage: {} key [amount]", name));
        }

        let amount = match args.get(1) {
            Some(raw) => raw.parse::<i64>().context("amount must be a valid number")?,
            None => 1,
        };

        let value = if negate {
            self.cache.decr(&args[0], amount, None)?
        } else {
            self.cache.incr(&args[0], amount, None)?
        };
        Ok(format!("(integer) {}", value))
    }

    fn cmd_expire(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: EXPIRE key seconds"));
        }

        let secs = args[1]
            .parse::<i64>()
            .context("TTL must be a valid number")?;
        let result = self.cache.expire(&args[0], secs, None)?;
        Ok(format!("(integer) {}", result as u8))
    }

    fn cmd_ttl(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: TTL key"));
        }

        match self.cache.ttl(&args[0], None)? {
            Some(ttl) => Ok(format!("(integer) {}", ttl)),
            None => Ok("(integer) -1".to_string()), // No expiration
        }
    }

    fn cmd_persist(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: PERSIST key"));
        }

        let result = self.cache.persist(&args[0], None)?;
        Ok(format!("(integer) {}", result as u8))
    }

    fn cmd_keys(&self, args: &[String]) -> Result<String> {
        let pattern = args.first().map(String::as_str).unwrap_or("*");

        let mut keys = self.cache.keys(pattern, None)?;
        if keys.is_empty() {
            return Ok("(empty list)".dimmed().to_string());
        }
        keys.sort();

        Ok(keys
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{}) \"{}\"", i + 1, k))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn cmd_delpattern(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DELPATTERN pattern [batch]"));
        }

        let batch = match args.get(1) {
            Some(raw) => Some(raw.parse::<usize>().context("batch must be a valid number")?),
            None => None,
        };
        let deleted = self.cache.delete_pattern(&args[0], None, batch)?;
        Ok(format!("(integer) {}", deleted))
    }

    fn cmd_flushdb(&self) -> Result<String> {
        self.cache.clear()?;
        Ok("OK".green().to_string())
    }

    fn cmd_route(&self) -> Result<String> {
        let client = self.cache.client();
        let route = client.route()?;
        let stats = client.stats();

        let mut output = Vec::new();
        output.push("# Route".to_string());
        output.push(format!("client: {}", client.describe()));
        output.push(format!("master: {}", route.master));
        output.push(format!(
            "replicas: {}",
            route
                .replicas
                .iter()
                .map(Endpoint::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));
        output.push(format!("generation: {}", route.generation));
        output.push(format!("resolved_at: {}", route.resolved_at.to_rfc3339()));
        output.push(String::new());
        output.push("# Connections".to_string());
        output.push(format!(
            "write: created={} reused={} discarded={} idle={}",
            stats.write.created, stats.write.reused, stats.write.discarded, stats.write.idle
        ));
        output.push(format!(
            "read: created={} reused={} discarded={} idle={}",
            stats.read.created, stats.read.reused, stats.read.discarded, stats.read.idle
        ));

        Ok(output.join("\n"))
    }

    fn cmd_ping(&self) -> Result<String> {
        self.cache
            .client()
            .execute(&sentinel_cache::command::Command::Ping, sentinel_cache::Routing::Write)?;
        Ok("PONG".green().to_string())
    }
}

/// Values that parse as JSON are stored as such, anything else as a string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

fn help_text() -> String {
    format!(
        r#"{}

{}
  SET key value [ttl]        Set key to hold value with optional TTL
  ADD key value              Set key only if it does not exist
  GET key                    Get the value of key
  DEL key [key ...]          Delete one or more keys
  EXISTS key                 Check if key exists
  INCR key [amount]          Increment value by amount (default 1)
  DECR key [amount]          Decrement value by amount (default 1)

{}
  EXPIRE key seconds         Set timeout on key
  TTL key                    Get remaining time to live
  PERSIST key                Remove timeout from key

{}
  KEYS [pattern]             Find all keys matching pattern
  DELPATTERN pattern [batch] Delete all keys matching pattern
  FLUSHDB                    Remove all keys from database

{}
  ROUTE                      Show the resolved master and replicas
  PING                       Ping the master
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
        "Sentinel Cache CLI - Available Commands".bold().cyan(),
        "Basic Commands:".bold(),
        "TTL Commands:".bold(),
        "Key Discovery:".bold(),
        "Server Commands:".bold(),
    )
}

fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

fn build_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => CacheConfig::new(args.location.clone()),
    };

    if let Some(prefix) = &args.prefix {
        config = config.with_key_prefix(prefix.clone());
    }
    if let Some(class) = &args.client_class {
        config = config.with_client_class(class.clone());
    }
    if args.read_from_replicas {
        config = config.with_read_from_replicas(true);
    }
    Ok(config)
}

fn build_cache(args: &Args) -> Result<Cache> {
    let config = build_config(args)?;
    if !args.memory {
        return Ok(Cache::new(config)?);
    }

    let cluster = MemoryCluster::new("mymaster")
        .with_sentinel(Endpoint::new("127.0.0.1", 26379))
        .with_master(Endpoint::new("127.0.0.1", 6379))
        .with_replica(Endpoint::new("127.0.0.1", 6380));
    let config = CacheConfig {
        location: cluster.sentinel_location(0),
        ..config
    };
    Ok(Cache::with_connector(config, Arc::new(cluster))?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);

    let cache = build_cache(&args)?;
    let shell = Shell { cache };

    // Check if running in command mode or interactive mode
    if !args.command.is_empty() {
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match shell.execute_command(cmd, &cmd_args) {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(shell)
    }
}

fn run_interactive(shell: Shell) -> Result<()> {
    let target = shell.cache.client().describe();
    info!(
        "{}",
        format!("Sentinel Cache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Using {}", target);
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{}> ", "sentinel-cache".green());
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match shell.execute_command(cmd, args) {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    shell.cache.close();
    Ok(())
}
