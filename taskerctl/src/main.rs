/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! taskerctl is the CLI for Tasker.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client::identity::Role;
use client::TaskerClient;
use proto::tasker::{
    IoLimits, Job, JobPhase, ResourceLimits, StartJobRequest,
};
use taskerd::TaskerdRuntime;
use tonic::Code;
use tracing_subscriber::EnvFilter;

mod certs;

#[derive(Parser, Debug)]
#[command(name = "taskerctl", about = "taskerctl is the CLI for Tasker")]
struct Cli {
    /// Certificates directory
    #[arg(
        short = 'C',
        long = "certs-dir",
        default_value = "certs",
        global = true
    )]
    certs_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate Tasker TLS certificates
    Cert {
        #[command(subcommand)]
        command: CertCommands,
    },
    /// Start a Tasker server
    Server {
        /// Server name (cert name)
        #[arg(short, long, default_value = "wolfpack1")]
        name: String,
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:50051")]
        addr: SocketAddr,
    },
    /// Manage Tasker jobs
    Job {
        /// User name
        #[arg(short, long)]
        user: String,
        /// Server address (e.g. localhost:50051)
        #[arg(short, long)]
        addr: String,
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CertCommands {
    /// Generate a Tasker CA
    Ca,
    /// Generate a Tasker server certificate
    Server {
        /// Server name
        #[arg(short, long)]
        name: String,
        /// Comma separated hostnames or IPs
        #[arg(short = 'H', long)]
        hosts: String,
    },
    /// Generate a Tasker client certificate
    Client {
        /// User name
        #[arg(short, long)]
        user: String,
        /// User role (admin or user)
        #[arg(short, long)]
        role: String,
    },
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// Start a new Tasker job
    Start {
        /// CPU limit in cores (e.g. 0.5)
        #[arg(short, long)]
        cpu: Option<f32>,
        /// Memory limit in MB
        #[arg(short, long)]
        memory: Option<u32>,
        /// Block device for IO limits
        #[arg(short, long)]
        device: Option<String>,
        /// IO read limit in MB/s (requires -d)
        #[arg(short, long)]
        read: Option<u32>,
        /// IO write limit in MB/s (requires -d)
        #[arg(short, long)]
        write: Option<u32>,
        /// Command to run
        command: String,
        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop a Tasker job
    Stop { id: String },
    /// Get a Tasker job status
    Get { id: String },
    /// Attach to a Tasker job
    Attach { id: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Cert { command } => match command {
            CertCommands::Ca => certs::generate_ca(&cli.certs_dir)?,
            CertCommands::Server { name, hosts } => {
                let hosts: Vec<String> = hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(ToOwned::to_owned)
                    .collect();

                certs::generate_server(&cli.certs_dir, &name, &hosts)?;
            }
            CertCommands::Client { user, role } => {
                certs::generate_client(
                    &cli.certs_dir,
                    &user,
                    &Role::from(role.as_str()),
                )?;
            }
        },
        Commands::Server { name, addr } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            TaskerdRuntime { certs_dir: cli.certs_dir, name, addr }
                .run()
                .await?;
        }
        Commands::Job { user, addr, command } => {
            let mut client =
                TaskerClient::connect(&cli.certs_dir, &user, &addr).await?;

            match command {
                JobCommands::Start {
                    cpu,
                    memory,
                    device,
                    read,
                    write,
                    command,
                    args,
                } => {
                    if (read.is_some() || write.is_some()) && device.is_none()
                    {
                        anyhow::bail!(
                            "-d is required when -r or -w is set"
                        );
                    }

                    let limits = (cpu.is_some()
                        || memory.is_some()
                        || device.is_some())
                    .then(|| ResourceLimits {
                        cpu,
                        memory,
                        io: device
                            .map(|device| IoLimits { device, read, write }),
                    });

                    let job = client
                        .start_job(StartJobRequest { command, args, limits })
                        .await?;
                    print_job(&job);
                }
                JobCommands::Stop { id } => {
                    print_job(&client.stop_job(&id).await?);
                }
                JobCommands::Get { id } => {
                    print_job(&client.get_job(&id).await?);
                }
                JobCommands::Attach { id } => {
                    let mut stream = client.attach_job(&id).await?;
                    let mut stdout = std::io::stdout();

                    loop {
                        match stream.message().await {
                            Ok(Some(response)) => {
                                stdout.write_all(&response.data)?;
                                stdout.flush()?;
                            }
                            // End of stream and client-side cancellation
                            // both exit cleanly
                            Ok(None) => break,
                            Err(status)
                                if status.code() == Code::Cancelled =>
                            {
                                break
                            }
                            Err(status) => return Err(status.into()),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Prints a job's info to stdout.
fn print_job(job: &Job) {
    let phase = match JobPhase::try_from(job.phase) {
        Ok(JobPhase::Running) => "running",
        Ok(JobPhase::Stopped) => "stopped",
        Ok(JobPhase::Completed) => "completed",
        _ => "unknown",
    };

    println!("id: {}", job.id);
    println!("owner: {}", job.owner);
    println!("command: {}", job.command);
    println!("args: {:?}", job.args);
    println!("phase: {phase}");

    if let Some(limits) = &job.limits {
        if let Some(cpu) = limits.cpu {
            println!("cpu limit: {cpu:.2} cores");
        }

        if let Some(memory) = limits.memory {
            println!("memory limit: {memory} MB");
        }

        if let Some(io_limits) = &limits.io {
            println!("io device: {}", io_limits.device);
            if let Some(read) = io_limits.read {
                println!("io read limit: {read} MB/s");
            }
            if let Some(write) = io_limits.write {
                println!("io write limit: {write} MB/s");
            }
        }
    }
}
