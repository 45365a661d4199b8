//! Casdoor CLI entry point

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, Select, Text};
use tracing_subscriber::EnvFilter;

use casdoor_cli::api::{check_endpoint, CasdoorClient, Directory, Group, User};
use casdoor_cli::auth::{CasdoorAuthProvider, SessionManager, SessionOrigin, TokenData};
use casdoor_cli::commands::{self, Outcome};
use casdoor_cli::config::{self, CasdoorConfig};
use casdoor_cli::{ui, Error};

#[derive(Parser)]
#[command(name = "casdoor")]
#[command(about = "Manage the users and groups of a Casdoor organization")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the Casdoor application configuration
    Init {
        /// Plain config.json to import (prompted when omitted)
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Log in to Casdoor through the browser
    Login {
        /// Show the logged-in user's details
        #[arg(short, long)]
        info: bool,

        /// Seconds to wait for the browser to return
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Log out and remove the stored session
    Logout {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage users
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage groups (roles)
    Groups {
        #[command(subcommand)]
        action: GroupAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// List users
    List,

    /// Add a user
    Add,

    /// Update a user
    Update {
        #[arg(short, long)]
        name: String,
    },

    /// Delete a user
    Delete {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// List groups
    List,

    /// Add a group
    Add,

    /// Update a group
    Update {
        #[arg(short, long)]
        name: String,
    },

    /// Delete a group
    Delete {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli).await {
        ui::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("casdoor=debug,casdoor_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { from } => {
            config::init(from)?;
        }

        Commands::Login { info, timeout } => {
            let config = config::load()?;
            run_login(&config, info, Duration::from_secs(timeout)).await?;
        }

        Commands::Logout { yes } => {
            let config = config::load()?;
            run_logout(&config, yes).await?;
        }

        Commands::Users { action } => {
            let config = config::load()?;
            let (session, client) = connect(&config).await?;
            run_users(&config, &session, &client, action).await?;
        }

        Commands::Groups { action } => {
            let config = config::load()?;
            let (session, client) = connect(&config).await?;
            run_groups(&config, &session, &client, action).await?;
        }
    }

    Ok(())
}

async fn run_login(config: &CasdoorConfig, info: bool, timeout: Duration) -> Result<()> {
    let sessions = SessionManager::keyring();
    let provider = CasdoorAuthProvider::new(config.clone()).with_callback_timeout(timeout);

    let (session, origin) = sessions.ensure_session(&provider).await?;
    let name = &session.id_token_claims.name;

    match origin {
        SessionOrigin::Existing => ui::print_success(&format!("You are already logged in as {}", name)),
        SessionOrigin::Fresh => ui::print_success(&format!("Logged in as {}", name)),
    }

    if info {
        print_session(&session);
    }
    Ok(())
}

async fn run_logout(config: &CasdoorConfig, yes: bool) -> Result<()> {
    let sessions = SessionManager::keyring();
    let session = match sessions.load_session() {
        Ok(session) => session,
        Err(e) if e.is_not_found() => {
            ui::print_warning("You are not logged in");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if !yes
        && !Confirm::new("Do you really want to log out?")
            .with_default(false)
            .prompt()?
    {
        ui::print_step("Logout cancelled");
        return Ok(());
    }

    let token_name = session.id_token_claims.token_name();
    if !token_name.is_empty() {
        let client = CasdoorClient::new(config, session.oauth2_token.access_token.clone());
        if let Err(e) = client.revoke_token(token_name).await {
            tracing::warn!("token revocation failed: {}", e);
            ui::print_warning(&format!("Could not revoke the token on the server: {}", e));
        }
    }

    sessions.clear_session()?;
    ui::print_success("Logged out successfully");
    Ok(())
}

/// Load the stored session and make sure Casdoor is reachable
async fn connect(config: &CasdoorConfig) -> Result<(TokenData, CasdoorClient)> {
    let session = match SessionManager::keyring().load_session() {
        Ok(session) => session,
        Err(e) if e.is_not_found() => {
            anyhow::bail!("You are not logged in. You can log in with 'casdoor login'")
        }
        Err(e) => return Err(e.into()),
    };

    check_endpoint(&reqwest::Client::new(), &config.endpoint).await?;
    let client = CasdoorClient::new(config, session.oauth2_token.access_token.clone());
    Ok((session, client))
}

async fn run_users(
    config: &CasdoorConfig,
    session: &TokenData,
    client: &CasdoorClient,
    action: UserAction,
) -> Result<()> {
    match action {
        UserAction::List => {
            let users = commands::list_users(session, client).await?;
            print_users(&users);
        }

        UserAction::Add => {
            let user = commands::add_user(session, client, |groups| prompt_new_user(config, groups)).await?;
            ui::print_success(&format!("User {} added", user.name));
        }

        UserAction::Update { name } => {
            let outcome = commands::update_user(session, client, &name, prompt_user_update).await?;
            report("User", &name, outcome, "updated");
        }

        UserAction::Delete { name, yes } => {
            let outcome = commands::delete_user(session, client, &name, |user| {
                confirm(yes, &format!("Delete user {}?", user.name))
            })
            .await?;
            report("User", &name, outcome, "deleted");
        }
    }
    Ok(())
}

async fn run_groups(
    config: &CasdoorConfig,
    session: &TokenData,
    client: &CasdoorClient,
    action: GroupAction,
) -> Result<()> {
    match action {
        GroupAction::List => {
            let groups = commands::list_groups(session, client).await?;
            print_groups(&groups);
        }

        GroupAction::Add => {
            let group = commands::add_group(session, client, || prompt_new_group(config)).await?;
            ui::print_success(&format!("Group {} added", group.name));
        }

        GroupAction::Update { name } => {
            let outcome = commands::update_group(session, client, &name, prompt_group_update).await?;
            report("Group", &name, outcome, "updated");
        }

        GroupAction::Delete { name, yes } => {
            let outcome = commands::delete_group(session, client, &name, |group| {
                confirm(yes, &format!("Delete group {}?", group.name))
            })
            .await?;
            report("Group", &name, outcome, "deleted");
        }
    }
    Ok(())
}

fn report(kind: &str, name: &str, outcome: Outcome, verb: &str) {
    match outcome {
        Outcome::Done => ui::print_success(&format!("{} {} {}", kind, name, verb)),
        Outcome::Missing => ui::print_warning(&format!("{} {} doesn't exist", kind, name)),
        Outcome::Cancelled => ui::print_step("Cancelled"),
    }
}

fn confirm(skip: bool, question: &str) -> casdoor_cli::Result<bool> {
    if skip {
        return Ok(true);
    }
    Ok(Confirm::new(question).with_default(false).prompt()?)
}

fn prompt_required(label: &str, default: Option<&str>) -> casdoor_cli::Result<String> {
    let mut prompt = Text::new(label);
    if let Some(default) = default {
        prompt = prompt.with_default(default);
    }

    let answer = prompt.prompt()?.trim().to_string();
    if answer.is_empty() {
        return Err(Error::Prompt(format!("{} cannot be empty", label.trim_end_matches(':'))));
    }
    Ok(answer)
}

fn prompt_role(groups: &[Group], current: Option<&str>) -> casdoor_cli::Result<String> {
    if groups.is_empty() {
        return Err(Error::Other(
            "No groups exist yet. Create one with 'casdoor groups add'".to_string(),
        ));
    }

    let names: Vec<String> = groups.iter().map(|g| g.name.clone()).collect();
    let cursor = current
        .and_then(|c| names.iter().position(|n| n == c))
        .unwrap_or(0);

    let role = Select::new("Role:", names).with_starting_cursor(cursor).prompt()?;
    groups
        .iter()
        .find(|g| g.name == role)
        .map(Group::membership)
        .ok_or_else(|| Error::Other(format!("unknown group {}", role)))
}

fn prompt_new_user(config: &CasdoorConfig, groups: &[Group]) -> casdoor_cli::Result<User> {
    let name = prompt_required("Username:", None)?;
    let email = prompt_required("Email:", None)?;
    let password = Password::new("Password:").prompt()?;
    let membership = prompt_role(groups, None)?;

    Ok(User {
        owner: config.organization_name.clone(),
        name: name.clone(),
        created_time: chrono::Utc::now().to_rfc3339(),
        user_type: "normal-user".to_string(),
        password,
        display_name: name,
        email,
        groups: vec![membership],
        signup_application: config.application_name.clone(),
        ..Default::default()
    })
}

fn prompt_user_update(mut user: User, groups: &[Group]) -> casdoor_cli::Result<User> {
    user.email = prompt_required("Email:", Some(user.email.as_str()))?;

    let password = Password::new("New password (leave empty to keep the current one):")
        .without_confirmation()
        .prompt()?;
    if !password.is_empty() {
        user.password = password;
    }

    let current = user.roles().into_iter().next();
    user.groups = vec![prompt_role(groups, current.as_deref())?];
    Ok(user)
}

fn prompt_new_group(config: &CasdoorConfig) -> casdoor_cli::Result<Group> {
    let name = prompt_required("Group name:", None)?;
    let display_name = prompt_required("Display name:", Some(name.as_str()))?;

    Ok(Group {
        owner: config.organization_name.clone(),
        name,
        created_time: chrono::Utc::now().to_rfc3339(),
        display_name,
        group_type: "Virtual".to_string(),
        parent_id: config.organization_name.clone(),
        is_top_group: true,
        is_enabled: true,
        ..Default::default()
    })
}

fn prompt_group_update(mut group: Group) -> casdoor_cli::Result<Group> {
    group.display_name = prompt_required("Display name:", Some(group.display_name.as_str()))?;
    Ok(group)
}

fn print_session(session: &TokenData) {
    let claims = &session.id_token_claims;
    let expiry = match session.oauth2_token.expiry {
        Some(expiry) if session.is_expired() => format!("{} (expired)", expiry.to_rfc3339()),
        Some(expiry) => expiry.to_rfc3339(),
        None => "unknown".to_string(),
    };

    ui::print_table(
        &["Name", "Owner", "Id", "Roles", "Admin", "Token expiry"],
        &[vec![
            claims.name.clone(),
            claims.owner.clone(),
            claims.sub.clone(),
            claims.group_names().join(", "),
            claims.is_admin.to_string(),
            expiry,
        ]],
    );
}

fn print_users(users: &[User]) {
    if users.is_empty() {
        ui::print_step("No users found");
        return;
    }

    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|u| {
            vec![
                u.name.clone(),
                u.display_name.clone(),
                u.email.clone(),
                u.roles().join(", "),
                u.created_time.clone(),
            ]
        })
        .collect();
    ui::print_table(&["Name", "Display name", "Email", "Roles", "Created"], &rows);
}

fn print_groups(groups: &[Group]) {
    if groups.is_empty() {
        ui::print_step("No groups found");
        return;
    }

    let rows: Vec<Vec<String>> = groups
        .iter()
        .map(|g| {
            vec![
                g.name.clone(),
                g.display_name.clone(),
                g.group_type.clone(),
                g.created_time.clone(),
            ]
        })
        .collect();
    ui::print_table(&["Name", "Display name", "Type", "Created"], &rows);
}
