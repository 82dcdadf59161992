//! tipbot daemon - CLI entry point
//!
//! Pid-file daemon management plus the hidden `run` command that drives the
//! actual event loop.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::process::{Command, Stdio};
use std::time::Duration;
use tipbot::config::Config;
use tipbot::daemon;
use tipbot::sessions::SessionRegistry;
use tipbot::users::UserStore;
use tracing_subscriber::EnvFilter;

/// Tipbot - Telegram tipster-bot supervisor
#[derive(Parser)]
#[command(name = "tipbot")]
#[command(about = "Manage the tipbot daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start,

    /// Stop the daemon
    Stop,

    /// Restart the daemon
    Restart,

    /// Show daemon status
    Status,

    /// Tail the log file
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: u32,

        /// Don't follow the log
        #[arg(long = "no-follow")]
        no_follow: bool,
    },

    /// Run the daemon (internal)
    #[command(hide = true)]
    Run,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::default();

    match cli.command {
        Commands::Start => cmd_start(&config),
        Commands::Stop => cmd_stop(&config),
        Commands::Restart => cmd_restart(&config),
        Commands::Status => cmd_status(&config),
        Commands::Logs { lines, no_follow } => cmd_logs(&config, lines, !no_follow),
        Commands::Run => cmd_run(config),
    }
}

// ============================================================================
// CLI Commands
// ============================================================================

fn get_pid(config: &Config) -> Option<u32> {
    let pid_file = config.state_dir.join("daemon.pid");
    if !pid_file.exists() {
        return None;
    }

    let content = fs::read_to_string(&pid_file).ok()?;
    let pid: u32 = content.trim().parse().ok()?;

    // Check if process is running
    let status = Command::new("kill").args(["-0", &pid.to_string()]).status();

    if status.map(|s| s.success()).unwrap_or(false) {
        Some(pid)
    } else {
        // PID file exists but process is dead
        let _ = fs::remove_file(&pid_file);
        None
    }
}

fn is_running(config: &Config) -> bool {
    get_pid(config).is_some()
}

fn cmd_start(config: &Config) -> anyhow::Result<()> {
    if is_running(config) {
        println!("Daemon already running (PID {})", get_pid(config).unwrap());
        return Ok(());
    }

    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(&config.logs_dir)?;

    let log_file = config.logs_dir.join("tipbot.log");
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    let exe = std::env::current_exe()?;
    let child = Command::new(&exe)
        .arg("run")
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()
        .context("Failed to spawn daemon process")?;

    let pid_file = config.state_dir.join("daemon.pid");
    fs::write(&pid_file, child.id().to_string())?;

    println!("Daemon started (PID {})", child.id());
    println!("Logs: {}", log_file.display());

    Ok(())
}

fn cmd_stop(config: &Config) -> anyhow::Result<()> {
    let pid = match get_pid(config) {
        Some(p) => p,
        None => {
            println!("Daemon not running");
            return Ok(());
        }
    };

    println!("Stopping daemon (PID {})...", pid);

    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();

    // Wait for it to die
    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(500));
        let status = Command::new("kill").args(["-0", &pid.to_string()]).status();
        if !status.map(|s| s.success()).unwrap_or(false) {
            break;
        }
    }

    // Force kill if still running
    let status = Command::new("kill").args(["-0", &pid.to_string()]).status();
    if status.map(|s| s.success()).unwrap_or(false) {
        println!("Force killing...");
        let _ = Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status();
    }

    let pid_file = config.state_dir.join("daemon.pid");
    let _ = fs::remove_file(&pid_file);

    println!("Daemon stopped");
    Ok(())
}

fn cmd_restart(config: &Config) -> anyhow::Result<()> {
    if is_running(config) {
        cmd_stop(config)?;
        std::thread::sleep(Duration::from_secs(1));
    }
    cmd_start(config)
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    match get_pid(config) {
        Some(pid) => {
            let result = Command::new("ps")
                .args(["-p", &pid.to_string(), "-o", "etime="])
                .output();

            if let Ok(output) = result {
                let uptime = String::from_utf8_lossy(&output.stdout);
                println!("Daemon running (PID {}, uptime {})", pid, uptime.trim());
            } else {
                println!("Daemon running (PID {})", pid);
            }
        }
        None => println!("Daemon not running"),
    }

    // Persisted state is readable whether or not the daemon is up
    let mut users = UserStore::new(&config.users_file);
    if let Ok(count) = users.load() {
        println!("Users: {}", count);
    }

    let mut registry = SessionRegistry::new(&config.sessions_file);
    if let Ok(count) = registry.load() {
        println!(
            "Relay sessions: {} ({} marked connected)",
            count,
            registry.connected_phones().len()
        );
    }

    Ok(())
}

fn cmd_logs(config: &Config, lines: u32, follow: bool) -> anyhow::Result<()> {
    let log_file = config.logs_dir.join("tipbot.log");
    if !log_file.exists() {
        println!("Log file not found: {}", log_file.display());
        return Ok(());
    }

    let mut cmd = Command::new("tail");
    if follow {
        cmd.arg("-f");
    }
    cmd.args(["-n", &lines.to_string()]);
    cmd.arg(&log_file);

    let _ = cmd.status();
    Ok(())
}

fn cmd_run(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
    runtime
        .block_on(daemon::run_daemon(config))
        .context("Daemon exited with error")?;
    Ok(())
}
