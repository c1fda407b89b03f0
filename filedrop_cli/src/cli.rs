use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "filedrop")]
#[command(about = "Send and receive files over authenticated TLS", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive files until interrupted
    Serve {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        receive_dir: Option<PathBuf>,

        /// Users file (`username:base64(sha256(password))` per line)
        #[arg(long)]
        users: Option<PathBuf>,

        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        /// Write filenames exactly as sent, subdirectories included
        #[arg(long)]
        raw_filenames: bool,
    },

    /// Send files, one connection each. Folders are sent as zip archives.
    Send {
        host: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Bundle all files into one zip archive
        #[arg(long)]
        zip: bool,

        /// Archive name on the receiver (with --zip, or for a single folder)
        #[arg(long)]
        zip_name: Option<String>,

        /// Defaults to the last username used
        #[arg(long)]
        user: Option<String>,

        #[arg(long, env = "FILEDROP_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        port: Option<u16>,

        /// Name to use on the receiver (single file only)
        #[arg(long)]
        name: Option<String>,

        /// Require this SHA-256 certificate fingerprint
        #[arg(long, conflicts_with = "ca")]
        pin: Option<String>,

        /// Validate the receiver against CA certificates in this PEM file
        #[arg(long)]
        ca: Option<PathBuf>,
    },

    #[command(subcommand)]
    Users(UsersCommand),

    #[command(subcommand)]
    Cert(CertCommand),

    /// List files in the receive directory
    Received {
        #[arg(long)]
        receive_dir: Option<PathBuf>,

        /// Delete this file instead of listing
        #[arg(long, value_name = "NAME")]
        delete: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    Add {
        username: String,

        #[arg(long, env = "FILEDROP_PASSWORD", hide_env_values = true)]
        password: String,
    },

    Remove {
        username: String,
    },

    List,
}

#[derive(Subcommand, Debug)]
pub enum CertCommand {
    /// Write a self-signed cert.pem and key.pem
    Generate {
        #[arg(long)]
        out: PathBuf,

        #[arg(long = "host", default_value = "localhost")]
        hosts: Vec<String>,
    },
}
