use anyhow::{bail, Context};
use clap::Parser;
use profile_sync::config::CONFIG_FILE;
use profile_sync::{
    read_config, read_ignore_list, write_config, GitHubClient, NoopSession, ProcessLauncher,
    RepoRef, SessionRunner, SyncConfig, SyncOrchestrator, SyncPhase,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Profile Sync - keeps local profiles in sync with a GitHub repository around a game session
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folder holding the config file and ignore list; relative paths resolve against it
    #[arg(long, env = "PROFILE_SYNC_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Config file (default: <base-dir>/profile-sync.json)
    #[arg(short, long, env = "PROFILE_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Local profiles folder
    #[arg(long)]
    profiles_dir: Option<PathBuf>,

    /// Root folder for backups
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// GitHub repository holding the profiles
    #[arg(long, env = "PROFILE_SYNC_REPO_URL")]
    repo_url: Option<String>,

    /// GitHub personal access token
    #[arg(long, env = "GITHUB_PAT", hide_env_values = true)]
    token: Option<String>,

    /// Hold back pushes for profiles changed on the remote during the session
    #[arg(long)]
    conflict_check: bool,

    /// Sync without launching the session program
    #[arg(long)]
    no_launch: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Session program and its arguments (after `--`)
    #[arg(last = true)]
    command: Vec<String>,
}

fn build_session(args: &Args, config: &SyncConfig) -> anyhow::Result<Box<dyn SessionRunner>> {
    if args.no_launch {
        return Ok(Box::new(NoopSession));
    }

    if let Some((program, rest)) = args.command.split_first() {
        let mut launcher = ProcessLauncher::new(program).args(rest.iter().cloned());
        if let Some(dir) = &config.session.working_dir {
            launcher = launcher.working_dir(dir);
        }
        return Ok(Box::new(launcher));
    }

    let launcher = ProcessLauncher::from_config(&config.session)
        .context("set session.program in the config, pass a command after `--`, or use --no-launch")?;
    Ok(Box::new(launcher))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let base_dir = match &args.base_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(CONFIG_FILE));

    let mut config = match read_config(&config_path).await? {
        Some(config) => config,
        None => {
            let config = SyncConfig::default();
            write_config(&config_path, &config).await?;
            info!(path = %config_path.display(), "Created default config file");
            config
        }
    };

    if let Some(dir) = &args.profiles_dir {
        config.profiles_dir = dir.clone();
    }
    if let Some(dir) = &args.backup_dir {
        config.backup_dir = dir.clone();
    }
    if args.repo_url.is_some() {
        config.repo_url = args.repo_url.clone();
    }
    if args.token.is_some() {
        config.github_token = args.token.clone();
    }
    if args.conflict_check {
        config.conflict_check = true;
    }
    config.resolve_paths(&base_dir);

    info!(profiles = %config.profiles_dir.display(), "Loaded configuration");

    let Some(repo_url) = config.repo_url.as_deref() else {
        bail!("no repository configured; set repoUrl or pass --repo-url");
    };
    let Some(token) = config.github_token.as_deref() else {
        bail!("no GitHub token configured; set githubToken or GITHUB_PAT");
    };

    let repo = RepoRef::parse(repo_url)?;
    let client = GitHubClient::new(token, config.oracle_timeout())?;
    let session = build_session(&args, &config)?;

    if let Err(e) = client.verify_token().await {
        error!(error = %e, "GitHub authentication failed, running without sync");
        let outcome = session.run().await?;
        if !outcome.success {
            bail!("session exited with code {:?}", outcome.exit_code);
        }
        return Ok(());
    }
    info!(repo = %repo, "Target repository");

    let ignore = read_ignore_list(&base_dir).await;
    let orchestrator =
        SyncOrchestrator::new(&config, &repo, &client, &*session).with_ignore_list(ignore);
    let report = orchestrator.run().await;

    if let Some(pull) = &report.pull {
        info!(
            updated = pull.updated,
            skipped = pull.skipped,
            local_newer = pull.local_newer,
            errors = pull.errors,
            fetch_failed = pull.fetch_failed,
            "Pull summary"
        );
    }
    if let Some(push) = &report.push {
        info!(
            pushed = push.pushed,
            unchanged = push.unchanged,
            conflicts = push.conflicts,
            errors = push.errors,
            "Push summary"
        );
    }

    if report.phase == SyncPhase::Failed {
        bail!(
            "sync failed: {}",
            report.failure.as_deref().unwrap_or("unknown error")
        );
    }
    if report.error_count() > 0 {
        warn!(errors = report.error_count(), "Sync finished with errors");
    }

    Ok(())
}
