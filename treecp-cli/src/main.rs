use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use treecp::{transfer_tree, NodePath, TransferOptions, TransferSession};
use treecp_core::config::{default_config_path, STORE_ROOT_ENV};
use treecp_core::{Profile, ProfileList};

#[derive(Parser)]
#[command(name = "treecp")]
#[command(about = "Copy file trees between the local filesystem and a remote tree store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a file or directory; prefix the remote side with remote://
    Scp {
        /// Source location
        source: String,
        /// Target location
        target: String,
        /// Show what would be copied without copying
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of files copied at once
        #[arg(long)]
        queue_size: Option<usize>,
        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
        /// Copy the source as the target instead of into it
        #[arg(long, conflicts_with = "no_rename")]
        rename: bool,
        /// Always copy the source into the target
        #[arg(long)]
        no_rename: bool,
    },
    /// Show the active profile
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage profiles
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// List profiles
    Ls,
    /// Make a profile the active one
    Use { label: String },
    /// Remove a profile
    Rm { label: String },
    /// Add a directory-backed profile and make it active
    Add {
        label: String,
        /// Directory exposed as the remote tree
        #[arg(long)]
        root: PathBuf,
    },
    /// Delete every profile and the config file
    Clear {
        /// Required, nothing is deleted without it
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    debug!("Using config file {}", config_path.display());

    match cli.command {
        Commands::Scp {
            source,
            target,
            dry_run,
            queue_size,
            quiet,
            rename,
            no_rename,
        } => {
            let rename = match (rename, no_rename) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let request = CopyRequest {
                source,
                target,
                dry_run,
                queue_size,
                quiet,
                rename,
            };
            let failed = copy(&config_path, request).await?;
            if failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Info { json } => show_info(&config_path, json).await,
        Commands::Config { action } => manage_profiles(&config_path, action).await,
    }
}

fn init_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "error" => "error",
        _ => "warn",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("treecp={0},treecp_core={0}", level))
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

struct CopyRequest {
    source: String,
    target: String,
    dry_run: bool,
    queue_size: Option<usize>,
    quiet: bool,
    rename: Option<bool>,
}

/// Run one copy and return the number of failed files
async fn copy(config_path: &Path, request: CopyRequest) -> Result<usize> {
    let profile = load_profiles(config_path).await?.resolve()?;

    let mut options = TransferOptions::from(&profile.transfer);
    options.dry_run = request.dry_run;
    options.quiet = request.quiet;
    if let Some(queue_size) = request.queue_size {
        options.queue_size = queue_size.max(1);
    }

    let session = TransferSession::new(profile.store.open(), options);
    let source = NodePath::parse(&request.source);
    let target = NodePath::parse(&request.target);
    info!("Copying {} to {} via {}", source, target, session.store().describe());

    let report = transfer_tree(&session, &source, &target, request.rename)
        .await
        .with_context(|| format!("Failed to copy {} to {}", source, target))?;

    for failure in &report.errors {
        error!("{}", failure);
    }
    if report.is_successful() {
        if !request.quiet {
            println!("✅ {}", report);
        }
    } else {
        eprintln!("❌ {}", report);
    }
    Ok(report.failed_files())
}

async fn load_profiles(config_path: &Path) -> Result<ProfileList> {
    ProfileList::load(config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))
}

async fn show_info(config_path: &Path, json: bool) -> Result<()> {
    let profiles = load_profiles(config_path).await?;
    let profile = profiles.resolve()?;
    let label = if Profile::from_env().is_some() {
        format!("${}", STORE_ROOT_ENV)
    } else {
        profiles
            .active_profile()
            .map(|(label, _)| label.to_string())
            .unwrap_or_default()
    };

    if json {
        let info = serde_json::json!({
            "label": label,
            "config": config_path,
            "store": profile.store.open().describe(),
            "profile": profile,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Profile:           {}", label);
    println!("Config file:       {}", config_path.display());
    println!("Store:             {}", profile.store.open().describe());
    println!("Queue size:        {}", profile.transfer.queue_size);
    println!("Refresh interval:  {} ms", profile.transfer.refresh_interval_ms);
    println!(
        "Chunked uploads:   from {}",
        treecp::format_bytes(profile.transfer.chunked_threshold)
    );
    println!(
        "Hashed uploads:    from {}",
        treecp::format_bytes(profile.transfer.hash_threshold)
    );
    Ok(())
}

async fn manage_profiles(config_path: &Path, action: ConfigActions) -> Result<()> {
    let mut profiles = load_profiles(config_path).await?;

    match action {
        ConfigActions::Ls => {
            if profiles.profiles.is_empty() {
                println!("No profiles configured");
            }
            for (label, profile) in &profiles.profiles {
                let marker = if profiles.active.as_deref() == Some(label.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {:<16} {}", marker, label, profile.store.open().describe());
            }
            return Ok(());
        }
        ConfigActions::Use { label } => {
            profiles.set_active(&label)?;
            println!("✅ Active profile: {}", label);
        }
        ConfigActions::Rm { label } => {
            profiles.remove(&label)?;
            println!("✅ Removed profile {}", label);
        }
        ConfigActions::Add { label, root } => {
            profiles.add(label.clone(), Profile::directory(root))?;
            println!("✅ Added profile {}", label);
        }
        ConfigActions::Clear { force } => {
            if !force {
                anyhow::bail!(
                    "Refusing to delete {} profile(s) in {} without --force",
                    profiles.profiles.len(),
                    config_path.display()
                );
            }
            ProfileList::clear(config_path)
                .await
                .with_context(|| format!("Failed to remove {}", config_path.display()))?;
            println!("✅ Removed {} profile(s)", profiles.profiles.len());
            return Ok(());
        }
    }

    profiles
        .save(config_path)
        .await
        .with_context(|| format!("Failed to save {}", config_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scp() {
        let cli = Cli::try_parse_from([
            "treecp",
            "scp",
            "./photos",
            "remote://backup/photos",
            "--dry-run",
            "--queue-size",
            "5",
            "--no-rename",
        ])
        .unwrap();
        match cli.command {
            Commands::Scp {
                source,
                target,
                dry_run,
                queue_size,
                rename,
                no_rename,
                ..
            } => {
                assert_eq!(source, "./photos");
                assert_eq!(target, "remote://backup/photos");
                assert!(dry_run);
                assert_eq!(queue_size, Some(5));
                assert!(!rename);
                assert!(no_rename);
            }
            _ => panic!("expected scp"),
        }
    }

    #[test]
    fn test_rename_flags_conflict() {
        let result = Cli::try_parse_from(["treecp", "scp", "a", "remote://b", "--rename", "--no-rename"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_manage_profiles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        manage_profiles(
            &path,
            ConfigActions::Add {
                label: "home".to_string(),
                root: temp_dir.path().join("store"),
            },
        )
        .await
        .unwrap();
        manage_profiles(
            &path,
            ConfigActions::Add {
                label: "work".to_string(),
                root: temp_dir.path().join("work"),
            },
        )
        .await
        .unwrap();
        manage_profiles(&path, ConfigActions::Use { label: "home".to_string() })
            .await
            .unwrap();

        let profiles = ProfileList::load(&path).await.unwrap();
        assert_eq!(profiles.active.as_deref(), Some("home"));
        assert_eq!(profiles.profiles.len(), 2);

        let duplicate = manage_profiles(
            &path,
            ConfigActions::Add {
                label: "home".to_string(),
                root: temp_dir.path().to_path_buf(),
            },
        )
        .await;
        assert!(duplicate.is_err());

        manage_profiles(&path, ConfigActions::Rm { label: "home".to_string() })
            .await
            .unwrap();
        let profiles = ProfileList::load(&path).await.unwrap();
        assert!(profiles.active.is_none());
        assert!(manage_profiles(&path, ConfigActions::Use { label: "home".to_string() })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_clear_profiles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        manage_profiles(
            &path,
            ConfigActions::Add {
                label: "home".to_string(),
                root: temp_dir.path().join("store"),
            },
        )
        .await
        .unwrap();

        assert!(manage_profiles(&path, ConfigActions::Clear { force: false })
            .await
            .is_err());
        assert!(path.exists());

        manage_profiles(&path, ConfigActions::Clear { force: true })
            .await
            .unwrap();
        assert!(!path.exists());
        assert!(ProfileList::load(&path).await.unwrap().profiles.is_empty());
    }

    #[test]
    fn test_parse_config_clear() {
        let cli = Cli::try_parse_from(["treecp", "config", "clear", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigActions::Clear { force: true }
            }
        ));
    }
}
