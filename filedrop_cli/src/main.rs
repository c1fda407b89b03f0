use anyhow::{Context, Result, bail};
use clap::Parser;
use filedrop_core::archive::{Archive, zip_directory, zip_files};
use filedrop_core::config::{AppConfig, TlsSettings, TrustPolicy};
use filedrop_core::transfer::tls::{certificate_fingerprint, generate_self_signed_cert};
use filedrop_core::transfer::{
    ClientCredentials, FileSender, SendItem, ServerOptions, TransferServer,
};
use filedrop_core::{EventSink, FileCredentialStore, ReceiveDir, TransferError, TransferEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CertCommand, Cli, Command, UsersCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load();

    match cli.command {
        Command::Serve {
            port,
            receive_dir,
            users,
            cert,
            key,
            raw_filenames,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(dir) = receive_dir {
                config.receive_dir = dir;
            }
            if let Some(users) = users {
                config.users_file = users;
            }
            if cert.is_some() {
                config.tls = TlsSettings {
                    cert_path: cert,
                    key_path: key,
                };
            }
            if raw_filenames {
                config.sanitize_filenames = false;
            }
            serve(&config).await
        }
        Command::Send {
            host,
            files,
            user,
            password,
            zip,
            zip_name,
            port,
            name,
            pin,
            ca,
        } => {
            let username = user
                .or_else(|| config.last_username.clone())
                .context("no username given and none remembered, pass --user")?;
            let trust = match (pin, ca) {
                (Some(sha256), _) => TrustPolicy::Pinned { sha256 },
                (None, Some(path)) => TrustPolicy::CaFile { path },
                (None, None) => config.trust.clone(),
            };
            // Archives are temporary files, deleted when dropped after the send
            let (items, _archives) = prepare_items(files, name, zip, zip_name).await?;

            send(
                &host,
                port.unwrap_or(config.port),
                &username,
                &password,
                &trust,
                &config,
                &items,
            )
            .await?;

            config.last_host = Some(host);
            config.last_username = Some(username);
            if let Err(e) = config.save() {
                tracing::warn!("Could not save settings: {:#}", e);
            }
            Ok(())
        }
        Command::Users(command) => users(&config.users_file, command),
        Command::Cert(CertCommand::Generate { out, hosts }) => generate_cert(&out, &hosts),
        Command::Received {
            receive_dir,
            delete,
        } => {
            let dir = receive_dir.unwrap_or(config.receive_dir);
            match delete {
                Some(file_name) => delete_received(&dir, &file_name).await,
                None => list_received(&dir).await,
            }
        }
    }
}

async fn serve(config: &AppConfig) -> Result<()> {
    let (events, mut rx) = EventSink::channel(256);
    let mut options = ServerOptions::from_config(config);
    options.events = events;

    let server = TransferServer::bind(options)
        .await
        .with_context(|| format!("cannot start server on port {}", config.port))?;

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let TransferEvent::FileReceived {
                peer,
                file_name,
                path,
                bytes,
            } = event
            {
                println!(
                    "Received {} ({} bytes) from {} -> {}",
                    file_name,
                    bytes,
                    peer,
                    path.display()
                );
            }
        }
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server.run(cancel).await;
    Ok(())
}

/// Turn the command line's paths into send items. Folders are always
/// zipped; `--zip` bundles plain files into a single archive.
async fn prepare_items(
    paths: Vec<PathBuf>,
    name: Option<String>,
    zip: bool,
    zip_name: Option<String>,
) -> Result<(Vec<SendItem>, Vec<Archive>)> {
    let folders = paths.iter().filter(|p| p.is_dir()).count();
    if name.is_some() && (paths.len() > 1 || folders > 0) {
        bail!("--name only applies when sending a single file, use --zip-name for archives");
    }

    if zip {
        if folders > 0 {
            bail!("--zip bundles plain files, send folders on their own");
        }
        let archive = zip_files(paths, zip_name).await?;
        return Ok((vec![archive.send_item()], vec![archive]));
    }

    if zip_name.is_some() && !(paths.len() == 1 && folders == 1) {
        bail!("--zip-name needs --zip or a single folder");
    }
    let mut items = Vec::with_capacity(paths.len());
    let mut archives = Vec::new();
    for path in paths {
        if path.is_dir() {
            let archive = zip_directory(&path, zip_name.clone())
                .await
                .with_context(|| format!("zipping {}", path.display()))?;
            items.push(archive.send_item());
            archives.push(archive);
        } else {
            items.push(SendItem {
                path,
                display_name: name.clone(),
            });
        }
    }
    Ok((items, archives))
}

async fn send(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    trust: &TrustPolicy,
    config: &AppConfig,
    items: &[SendItem],
) -> Result<()> {
    let credentials = ClientCredentials::from_password(username, password)?;
    let (events, rx) = EventSink::channel(256);
    let sender = FileSender::new(host, port, credentials, trust)?
        .with_handshake_timeout(config.handshake_timeout())
        .with_events(events);

    let printer = tokio::spawn(print_progress(rx));
    let result = sender.send_files(items).await;
    drop(sender);
    let _ = printer.await;

    match result {
        Ok(reports) => {
            for report in reports {
                println!(
                    "Sent {} ({} bytes) to {}",
                    report.file_name, report.bytes, report.peer
                );
            }
            Ok(())
        }
        Err(TransferError::AuthRejected) => {
            bail!("{} rejected the login for {}", host, username)
        }
        Err(e) => Err(e).with_context(|| format!("transfer to {}:{} failed", host, port)),
    }
}

async fn print_progress(mut rx: mpsc::Receiver<TransferEvent>) {
    let mut stderr = std::io::stderr();
    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::Progress {
                file_name,
                percent,
                speed,
                ..
            } => {
                let _ = write!(stderr, "\r{}: {:5.1}% {}   ", file_name, percent, speed);
                let _ = stderr.flush();
            }
            TransferEvent::Completed { .. } => {
                let _ = writeln!(stderr);
            }
            _ => {}
        }
    }
}

fn users(users_file: &Path, command: UsersCommand) -> Result<()> {
    let store = FileCredentialStore::new(users_file);
    match command {
        UsersCommand::Add { username, password } => {
            store.add_user(&username, &password)?;
            println!("Added {} to {}", username, store.path().display());
        }
        UsersCommand::Remove { username } => {
            if !store.remove_user(&username)? {
                bail!("no user named {}", username);
            }
            println!("Removed {}", username);
        }
        UsersCommand::List => {
            for (username, _) in store.list_users()? {
                println!("{}", username);
            }
        }
    }
    Ok(())
}

fn generate_cert(out: &Path, hosts: &[String]) -> Result<()> {
    let generated = generate_self_signed_cert(hosts)?;
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let cert_path = out.join("cert.pem");
    let key_path = out.join("key.pem");
    std::fs::write(&cert_path, &generated.cert_pem)
        .with_context(|| format!("writing {}", cert_path.display()))?;
    write_private(&key_path, generated.key_pem.as_bytes())?;

    let fingerprint = generated
        .certs
        .first()
        .map(certificate_fingerprint)
        .context("no certificate generated")?;
    println!("Certificate: {}", cert_path.display());
    println!("Key:         {}", key_path.display());
    println!("SHA-256:     {}", fingerprint);
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("writing {}", path.display()))?;
    file.write_all(contents)?;
    Ok(())
}

async fn list_received(dir: &Path) -> Result<()> {
    let entries = ReceiveDir::new(dir).list().await?;
    if entries.is_empty() {
        println!("No files in {}", dir.display());
        return Ok(());
    }
    for entry in entries {
        println!("{:>12}  {}", entry.size, entry.file_name);
    }
    Ok(())
}

async fn delete_received(dir: &Path, file_name: &str) -> Result<()> {
    if !ReceiveDir::new(dir).remove(file_name).await? {
        bail!("no file named {} in {}", file_name, dir.display());
    }
    println!("Deleted {}", file_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_folder_becomes_one_archive() {
        let src = tempfile::tempdir().unwrap();
        let folder = src.path().join("photos");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("a.jpg"), b"a").unwrap();
        let note = src.path().join("note.txt");
        std::fs::write(&note, b"n").unwrap();

        let (items, archives) = prepare_items(vec![folder, note.clone()], None, false, None)
            .await
            .unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(items[0].display_name.as_deref(), Some("photos.zip"));
        assert_eq!(items[0].path, archives[0].path());
        assert_eq!(items[1].path, note);

        let temp = archives[0].path().to_path_buf();
        drop(archives);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_zip_flag_bundles_files() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.txt");
        let b = src.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let (items, archives) = prepare_items(vec![a, b], None, true, Some("both.zip".into()))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(archives[0].name(), "both.zip");
    }

    #[tokio::test]
    async fn test_conflicting_names_rejected() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.txt");
        std::fs::write(&a, b"a").unwrap();

        assert!(
            prepare_items(vec![a.clone()], None, false, Some("x.zip".into()))
                .await
                .is_err()
        );
        assert!(
            prepare_items(vec![src.path().to_path_buf()], Some("x".into()), false, None)
                .await
                .is_err()
        );
        assert!(
            prepare_items(vec![a, src.path().to_path_buf()], None, true, None)
                .await
                .is_err()
        );
    }
}
