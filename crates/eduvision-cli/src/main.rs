use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.eduvision.Attendance1",
    default_service = "org.eduvision.Attendance1",
    default_path = "/org/eduvision/Attendance1"
)]
trait Attendance {
    async fn start(&self) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn restart(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn feed(&self, cursor: u64) -> zbus::Result<(String, u64)>;
    async fn add_user(
        &self,
        name: &str,
        surname: &str,
        patronymic: &str,
        group: &str,
        photo_path: &str,
    ) -> zbus::Result<i64>;
    async fn remove_user(&self, user_id: i64) -> zbus::Result<bool>;
    async fn enroll(&self, user_id: i64) -> zbus::Result<String>;
    async fn rebuild_gallery(&self) -> zbus::Result<String>;
    async fn group_attendance(&self, group: &str) -> zbus::Result<String>;
    async fn student_attendance(&self, name: &str, surname: &str) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "eduvision", about = "EduVision attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start recognition
    Start,
    /// Stop recognition
    Stop,
    /// Restart recognition
    Restart,
    /// Show daemon status
    Status,
    /// Print recognition events
    Feed {
        /// Keep polling for new events
        #[arg(short, long)]
        follow: bool,
        /// Poll interval in milliseconds when following
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Register a new user
    AddUser {
        name: String,
        surname: String,
        group: String,
        #[arg(long, default_value = "")]
        patronymic: String,
        #[arg(long, default_value = "")]
        photo: String,
    },
    /// Remove a user with their attendance and gallery entries
    RemoveUser { id: i64 },
    /// Enroll a user from their photo directory
    Enroll { id: i64 },
    /// Rebuild the gallery from every user's photos
    Rebuild,
    /// Attendance report for a group
    Group { group: String },
    /// Attendance report for one student
    Student { name: String, surname: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::debug!(system_bus = cli.system, "connecting to eduvisiond");
    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("eduvisiond is not reachable")?;

    match cli.command {
        Commands::Start => {
            proxy.start().await?;
            println!("Recognition started");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Recognition stopped");
        }
        Commands::Restart => {
            proxy.restart().await?;
            println!("Recognition restarted");
        }
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Feed { follow, interval_ms } => {
            let mut cursor = 0;
            loop {
                let (entries, next) = proxy.feed(cursor).await?;
                let entries: Vec<serde_json::Value> = serde_json::from_str(&entries)?;
                for entry in &entries {
                    let at = entry["at"].as_str().unwrap_or_default();
                    let text = entry["text"].as_str().unwrap_or_default();
                    println!("{at}  {text}");
                }
                cursor = next;
                if !follow {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
            }
        }
        Commands::AddUser {
            name,
            surname,
            group,
            patronymic,
            photo,
        } => {
            let id = proxy
                .add_user(&name, &surname, &patronymic, &group, &photo)
                .await?;
            println!("Created user {id}");
        }
        Commands::RemoveUser { id } => {
            if proxy.remove_user(id).await? {
                println!("Removed user {id}");
            } else {
                println!("No user {id}");
            }
        }
        Commands::Enroll { id } => {
            println!("Enrolling user {id}...");
            print_json(&proxy.enroll(id).await?)?;
        }
        Commands::Rebuild => {
            println!("Rebuilding gallery...");
            print_json(&proxy.rebuild_gallery().await?)?;
        }
        Commands::Group { group } => print_json(&proxy.group_attendance(&group).await?)?,
        Commands::Student { name, surname } => {
            print_json(&proxy.student_attendance(&name, &surname).await?)?
        }
    }

    Ok(())
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
