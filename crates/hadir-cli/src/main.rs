use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod capture;
mod client;
mod roster_build;
mod watch;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "hadir", about = "Hadir attendance CLI — sessions, kiosk watch loop, roster building")]
struct Cli {
    /// Daemon base URL.
    #[arg(long, default_value = "http://127.0.0.1:5000", env = "HADIR_SERVER")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show session status and loaded embedding count
    Status,
    /// Manage the attendance session window
    #[command(subcommand)]
    Session(SessionCommands),
    /// Reload the daemon's master embeddings
    Reload,
    /// Show the attendance log of the open session
    Recent,
    /// Run the kiosk capture/polling loop
    Watch {
        /// V4L2 camera device
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        /// Seconds between session status polls
        #[arg(long, default_value_t = 10)]
        poll_interval: u64,
        /// Minimum seconds between frame submissions
        #[arg(long, default_value_t = 2)]
        submit_interval: u64,
    },
    /// Roster snapshot tooling
    #[command(subcommand)]
    Roster(RosterCommands),
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Open an attendance window
    Start {
        /// Schedule (jadwal) id the session belongs to
        #[arg(long)]
        jadwal: i64,
        /// Meeting number within the course (1-16)
        #[arg(long)]
        pertemuan: Option<i64>,
    },
    /// Close the open attendance window
    End,
}

#[derive(Subcommand)]
enum RosterCommands {
    /// Extract, average, and write reference embeddings
    Build {
        /// Dataset directory: one subdirectory of images per identity
        #[arg(long)]
        dataset: PathBuf,
        /// Output snapshot path
        #[arg(long, default_value = "master_embeddings.json")]
        out: PathBuf,
        /// Directory containing the ONNX model files
        #[arg(long, env = "HADIR_MODEL_DIR")]
        model_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server);

    match cli.command {
        Commands::Status => {
            let status = client.session_status()?;
            if status.is_active() {
                println!(
                    "Session active (id: {})",
                    status.sesi_id.as_deref().unwrap_or("-")
                );
            } else {
                println!("No active session");
            }
            println!("Embeddings loaded: {}", status.embeddings_loaded);
        }
        Commands::Session(SessionCommands::Start { jadwal, pertemuan }) => {
            println!("{}", client.start_session(jadwal, pertemuan)?);
        }
        Commands::Session(SessionCommands::End) => {
            println!("{}", client.end_session()?);
        }
        Commands::Reload => {
            println!("{}", client.reload_embeddings()?);
        }
        Commands::Recent => {
            let rows = client.recent_log()?;
            if rows.is_empty() {
                println!("No attendance recorded");
            }
            for row in rows {
                println!("{}  {}", row.waktu_absen, row.nama_mahasiswa);
            }
        }
        Commands::Watch {
            device,
            poll_interval,
            submit_interval,
        } => {
            watch::run(&watch::WatchOptions {
                server: cli.server,
                device,
                poll_interval: Duration::from_secs(poll_interval),
                submit_interval: Duration::from_secs(submit_interval),
            })?;
        }
        Commands::Roster(RosterCommands::Build {
            dataset,
            out,
            model_dir,
        }) => {
            roster_build::run(&roster_build::BuildOptions {
                dataset_dir: dataset,
                output_path: out,
                model_dir,
            })?;
        }
    }

    Ok(())
}
