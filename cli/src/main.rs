use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ias::cv::CvDraft;
use ias::form::Attachment;
use ias::types::{
    ApplicationQuery, ApplicationStatus, ApplicationSubmission, AuthResponse, Credentials, OpportunityKind, OpportunityQuery,
    ProfileUpdate, RegisterRequest, Role,
};
use ias::{
    ApiClient, ApiError, ClientConfig, FileStorage, SessionState, SessionStore, Storage, Theme, ThemeStore,
    spawn_navigation_listener,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const STORAGE_DIR: &str = ".ias";
const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("could not read {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("not logged in; run `ias login` first")]
    NotLoggedIn,
    #[error("could not determine the opportunity type; pass --kind")]
    UnknownKind,
    #[error("CV draft has no content")]
    EmptyCv,
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            Self::Api(err) => err.display_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ias", about = "Industrial attachment placement platform CLI")]
struct Cli {
    /// Backend base URL; `/api` is appended.
    #[arg(long, env = ias::config::API_URL_ENV)]
    api_url: Option<String>,

    /// Host used when no backend URL is set.
    #[arg(long, env = ias::config::ORIGIN_ENV, default_value = ias::config::DEFAULT_ORIGIN)]
    origin: String,

    /// File holding the session token and theme.
    #[arg(long, env = "IAS_STORAGE")]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "IAS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "IAS_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "student")]
        role: Role,
    },
    /// Confirm an email address with the one-time code.
    Verify {
        #[arg(long)]
        email: String,
        #[arg(long)]
        otp: String,
    },
    ResendCode {
        #[arg(long)]
        email: Option<String>,
    },
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    ResetPassword {
        #[arg(long)]
        token: String,
        #[arg(long, env = "IAS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    Dashboard(DashboardCommand),
    Opportunities(OpportunitiesCommand),
    Apply(ApplyArgs),
    Applications(ApplicationsCommand),
    Profile(ProfileCommand),
    Messages(MessagesCommand),
    Theme(ThemeCommand),
    /// Render a JSON CV draft as plain text.
    Cv {
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DashboardCommand {
    #[command(subcommand)]
    command: DashboardSubcommand,
}

#[derive(Subcommand, Debug)]
enum DashboardSubcommand {
    Stats,
    Activity {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct OpportunitiesCommand {
    #[command(subcommand)]
    command: OpportunitiesSubcommand,
}

#[derive(Subcommand, Debug)]
enum OpportunitiesSubcommand {
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        kind: Option<OpportunityKind>,
    },
    Show {
        id: String,
    },
    Recommended,
    Saved,
    Save {
        id: String,
    },
    Unsave {
        id: String,
    },
}

#[derive(Args, Debug)]
struct ApplyArgs {
    opportunity_id: String,

    /// Opportunity type; looked up from the server when omitted.
    #[arg(long)]
    kind: Option<OpportunityKind>,

    #[arg(long, conflicts_with = "cover_letter_file")]
    cover_letter: Option<String>,

    #[arg(long)]
    cover_letter_file: Option<PathBuf>,

    #[arg(long)]
    resume: PathBuf,

    #[arg(long)]
    recommendation_letter: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ApplicationsCommand {
    #[command(subcommand)]
    command: ApplicationsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ApplicationsSubcommand {
    List {
        #[arg(long)]
        status: Option<ApplicationStatus>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Show {
        id: String,
    },
    Pay {
        id: String,
    },
    Withdraw {
        id: String,
    },
    VerifyPayment {
        reference: String,
    },
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    UploadCv {
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MessagesCommand {
    #[command(subcommand)]
    command: MessagesSubcommand,
}

#[derive(Subcommand, Debug)]
enum MessagesSubcommand {
    List,
    Read { id: String },
}

#[derive(Args, Debug)]
struct ThemeCommand {
    #[arg(long, default_value_t = false)]
    prefers_dark: bool,

    #[command(subcommand)]
    command: ThemeSubcommand,
}

#[derive(Subcommand, Debug)]
enum ThemeSubcommand {
    Show,
    Toggle,
    Set {
        #[arg(value_parser = parse_theme)]
        theme: Theme,
    },
}

fn parse_theme(raw: &str) -> Result<Theme, String> {
    Theme::parse(raw).ok_or_else(|| format!("unknown theme `{raw}`; expected light or dark"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = %err, "command failed");
            eprintln!("error: {}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

fn storage_path(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| {
        directories::UserDirs::new()
            .map_or_else(|| PathBuf::from("."), |dirs| dirs.home_dir().to_path_buf())
            .join(STORAGE_DIR)
            .join(STORAGE_FILE)
    })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(storage_path(cli.storage)));
    let mut config = ClientConfig::with_origin(cli.origin);
    if let Some(api_url) = cli.api_url {
        config = config.api_url(api_url);
    }
    tracing::debug!(base_url = %config.base_url(), "client configured");

    let client = ApiClient::new(config, storage.clone())?;
    let listener = spawn_navigation_listener(client.subscribe_events(), |path| {
        eprintln!("session expired; run `ias login` again (redirect to {path})");
    });

    let session = SessionStore::new(client);
    let result = dispatch(&session, storage, cli.command).await;

    // Dropping the last sender lets the listener drain pending events and exit.
    drop(session);
    if let Err(err) = listener.await {
        tracing::warn!(error = %err, "expiry listener failed");
    }
    result
}

async fn dispatch(session: &SessionStore, storage: Arc<dyn Storage>, command: Command) -> Result<(), CliError> {
    let client = session.client();
    match command {
        Command::Login { email, password } => {
            let response = session.login(&Credentials::new(email, password)).await?;
            finish_auth(response)
        }
        Command::Register { name, email, password, role } => {
            let response = session.register(&RegisterRequest { name, email, password, role }).await?;
            finish_auth(response)
        }
        Command::Verify { email, otp } => {
            let response = session.verify_email(&email, &otp).await?;
            finish_auth(response)
        }
        Command::ResendCode { email } => print_json(&client.auth().resend_verification(email.as_deref()).await?),
        Command::ForgotPassword { email } => print_json(&client.auth().forgot_password(&email).await?),
        Command::ResetPassword { token, password } => {
            print_json(&client.auth().reset_password(&token, &password).await?)
        }
        Command::Logout => {
            session.logout().await;
            println!("logged out");
            Ok(())
        }
        Command::Whoami => match session.initialize().await {
            SessionState::Authenticated(user) => print_json(&serde_json::to_value(user)?),
            _ => Err(CliError::NotLoggedIn),
        },
        Command::Dashboard(dashboard) => match dashboard.command {
            DashboardSubcommand::Stats => print_json(&client.dashboard().stats().await?),
            DashboardSubcommand::Activity { limit } => print_json(&client.dashboard().activity(limit).await?),
        },
        Command::Opportunities(opportunities) => run_opportunities(client, opportunities.command).await,
        Command::Apply(args) => run_apply(client, args).await,
        Command::Applications(applications) => run_applications(client, applications.command).await,
        Command::Profile(profile) => match profile.command {
            ProfileSubcommand::Show => print_json(&client.profile().get().await?),
            ProfileSubcommand::Update { name, email } => {
                print_json(&client.profile().update(&ProfileUpdate { name, email }).await?)
            }
            ProfileSubcommand::UploadCv { path } => {
                let file = Attachment::from_path(&path).await?;
                print_json(&client.profile().upload_cv(file).await?)
            }
        },
        Command::Messages(messages) => match messages.command {
            MessagesSubcommand::List => print_json(&client.messages().list().await?),
            MessagesSubcommand::Read { id } => print_json(&client.messages().mark_read(&id).await?),
        },
        Command::Theme(theme) => {
            let store = ThemeStore::load(storage, theme.prefers_dark);
            let current = match theme.command {
                ThemeSubcommand::Show => store.current(),
                ThemeSubcommand::Toggle => store.toggle(),
                ThemeSubcommand::Set { theme } => {
                    store.set(theme);
                    theme
                }
            };
            println!("{current}");
            Ok(())
        }
        Command::Cv { path } => {
            let raw = read_text(&path).await?;
            let draft: CvDraft = serde_json::from_str(&raw)?;
            if !draft.has_content() {
                return Err(CliError::EmptyCv);
            }
            println!("{}", draft.render_text());
            Ok(())
        }
    }
}

async fn run_opportunities(client: &ApiClient, command: OpportunitiesSubcommand) -> Result<(), CliError> {
    let service = client.opportunities();
    let json = match command {
        OpportunitiesSubcommand::List { page, limit, search, kind } => {
            service.list(&OpportunityQuery { page, limit, search, kind }).await?
        }
        OpportunitiesSubcommand::Show { id } => service.get(&id).await?,
        OpportunitiesSubcommand::Recommended => service.recommended().await?,
        OpportunitiesSubcommand::Saved => service.saved().await?,
        OpportunitiesSubcommand::Save { id } => service.save(&id).await?,
        OpportunitiesSubcommand::Unsave { id } => service.unsave(&id).await?,
    };
    print_json(&json)
}

async fn run_applications(client: &ApiClient, command: ApplicationsSubcommand) -> Result<(), CliError> {
    let service = client.applications();
    let json = match command {
        ApplicationsSubcommand::List { status, page, limit } => {
            service.list(&ApplicationQuery { status, page, limit }).await?
        }
        ApplicationsSubcommand::Show { id } => service.get(&id).await?,
        ApplicationsSubcommand::Pay { id } => service.pay(&id).await?,
        ApplicationsSubcommand::Withdraw { id } => service.withdraw(&id).await?,
        ApplicationsSubcommand::VerifyPayment { reference } => service.verify_payment(&reference).await?,
    };
    print_json(&json)
}

async fn run_apply(client: &ApiClient, args: ApplyArgs) -> Result<(), CliError> {
    let kind = match args.kind {
        Some(kind) => kind,
        None => {
            let opportunity = client.opportunities().get(&args.opportunity_id).await?;
            opportunity_kind(&opportunity).ok_or(CliError::UnknownKind)?
        }
    };
    let cover_letter = match (args.cover_letter, args.cover_letter_file) {
        (Some(text), _) => text,
        (None, Some(path)) => read_text(&path).await?,
        (None, None) => String::new(),
    };
    let resume = Attachment::from_path(&args.resume).await?;
    let letter = match args.recommendation_letter {
        Some(path) => Some(Attachment::from_path(&path).await?),
        None => None,
    };

    let submission = ApplicationSubmission::new(args.opportunity_id, &kind, &cover_letter, resume, letter)?;
    print_json(&client.applications().create(submission).await?)
}

/// Reads `type` from either a bare opportunity or an `{ opportunity: .. }` envelope.
fn opportunity_kind(value: &Value) -> Option<OpportunityKind> {
    let raw = value
        .get("type")
        .or_else(|| value.get("opportunity").and_then(|inner| inner.get("type")))?
        .as_str()?;
    raw.parse().ok()
}

/// Prints the signed-in user, or the verification prompt when no token was issued.
fn finish_auth(response: AuthResponse) -> Result<(), CliError> {
    if response.is_pending_verification() {
        let message = response.message.as_deref().unwrap_or("check your email for a verification code");
        println!("{message}; then run `ias verify`");
        return Ok(());
    }
    match response.user {
        Some(user) => print_json(&serde_json::to_value(user)?),
        None => Ok(()),
    }
}

async fn read_text(path: &PathBuf) -> Result<String, CliError> {
    tokio::fs::read_to_string(path).await.map_err(|source| CliError::Read { path: path.clone(), source })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
