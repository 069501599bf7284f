use crate::demo::{print_catalog, run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use gopac::config::AppConfig;
use gopac::error::AppError;
use gopac::mail::HttpMailer;

#[derive(Parser, Debug)]
#[command(
    name = "GOPAC",
    about = "Run and administer the administrative request portal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a transcript request through its whole lifecycle in memory
    Demo(DemoArgs),
    /// Print the request types students can submit
    Catalog,
    /// Manage the email-sending identity
    Sender {
        #[command(subcommand)]
        command: SenderCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SenderCommand {
    /// Register a sending identity with the email provider
    Register(SenderArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct SenderArgs {
    /// Display name shown to recipients
    #[arg(long)]
    pub(crate) name: String,
    /// Sending address, which must belong to a verified domain
    #[arg(long)]
    pub(crate) email: String,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Catalog => {
            print_catalog();
            Ok(())
        }
        Command::Sender {
            command: SenderCommand::Register(args),
        } => register_sender(args).await,
    }
}

async fn register_sender(args: SenderArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let mailer = HttpMailer::from_config(&config.email)?;
    let answer = mailer.register_sender(&args.name, &args.email).await?;
    println!("Sender registered: {} <{}>", args.name, args.email);
    println!("{answer:#}");
    Ok(())
}
