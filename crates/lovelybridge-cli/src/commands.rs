//! Command handlers. Each one talks to the backend through the shared,
//! intercepted client held by the session manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tracing::debug;

use lovelybridge_core::auth::{is_valid_session_timeout, MAX_SESSION_TIMEOUT_MINUTES};
use lovelybridge_core::models::{
    AttendanceStatus, CoupleRequest, CoupleStatus, Memory, MemoryQuery, MemoryUpdate, NewMemory,
    PasswordChangeRequest, ProfileUpdate, RegisterRequest,
};
use lovelybridge_core::{ApiError, AuthSessionManager, Config, SessionFreshness};

use crate::{AttendanceCommand, Command, CoupleCommand, MemoryCommand, PasswordCommand, ProfileCommand};

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

pub struct App {
    manager: AuthSessionManager,
    expired: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: &Config) -> Result<Self> {
        let store = config.open_store()?;
        let client = config.build_client()?;
        let manager = AuthSessionManager::new(client, store);

        let expired = Arc::new(AtomicBool::new(false));
        let flag = expired.clone();
        manager.install_auth_interceptor(
            &config.refresh_path,
            Some(Arc::new(move || flag.store(true, Ordering::SeqCst))),
        );

        Ok(Self { manager, expired })
    }

    /// Set once a refresh failed or the stored session timed out
    pub fn session_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Login { email } => self.login(&email).await,
            Command::Register {
                username,
                email,
                first_name,
                last_name,
            } => {
                self.register(RegisterRequest {
                    username,
                    password: String::new(),
                    email,
                    first_name,
                    last_name,
                })
                .await
            }
            Command::Logout => {
                self.manager.logout().await?;
                println!("Logged out.");
                Ok(())
            }
            Command::Status => self.status().await,
            Command::Timeout { minutes } => self.timeout(minutes).await,
            Command::Profile(cmd) => {
                self.require_session().await?;
                self.profile(cmd).await
            }
            Command::Couple(cmd) => {
                self.require_session().await?;
                self.couple(cmd).await
            }
            Command::Attendance(cmd) => {
                self.require_session().await?;
                self.attendance(cmd).await
            }
            Command::Memory(cmd) => {
                self.require_session().await?;
                self.memory(cmd).await
            }
            Command::Password(cmd) => {
                self.require_session().await?;
                self.password(cmd).await
            }
        }
    }

    /// Restore the stored session, failing when there is none or it timed out.
    async fn require_session(&self) -> Result<()> {
        match self.manager.restore_session(Utc::now()).await? {
            SessionFreshness::Active => Ok(()),
            SessionFreshness::NoSession => {
                anyhow::bail!("Not logged in. Run `lovelybridge login --email <EMAIL>` first.")
            }
            SessionFreshness::Expired => {
                self.expired.store(true, Ordering::SeqCst);
                anyhow::bail!("Stored session timed out")
            }
        }
    }

    async fn login(&self, email: &str) -> Result<()> {
        let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

        // A stale refresh token must not be spent on a credentials 401
        self.manager.clear_session().await?;
        let response = self
            .manager
            .login(email, &password)
            .await
            .map_err(describe)?;

        println!("Logged in as {}.", response.username);
        if !response.has_profile {
            println!("Your profile is not set up yet. Run `lovelybridge profile set`.");
        }
        Ok(())
    }

    async fn register(&self, mut request: RegisterRequest) -> Result<()> {
        let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
        let confirm =
            rpassword::prompt_password("Confirm password: ").context("Failed to read password")?;
        if password != confirm {
            anyhow::bail!("Passwords do not match");
        }
        request.password = password;

        let account = self
            .manager
            .client()
            .register(&request)
            .await
            .map_err(describe)?;
        println!(
            "Account {} created. Log in with `lovelybridge login --email {}`.",
            account.username, account.email
        );
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let timeout = self.manager.load_session_timeout_minutes().await;
        match self.manager.restore_session(Utc::now()).await? {
            SessionFreshness::NoSession => {
                println!("Not logged in.");
                return Ok(());
            }
            SessionFreshness::Expired => {
                self.expired.store(true, Ordering::SeqCst);
                return Ok(());
            }
            SessionFreshness::Active => {}
        }

        if let Some(session) = self.manager.load_session().await {
            let who = session
                .username
                .as_deref()
                .or(session.email.as_deref())
                .unwrap_or("unknown user");
            println!("Logged in as {}", who);
            if let Some(at) = session.last_login() {
                println!(
                    "Last login: {} (timeout {} min)",
                    at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    timeout
                );
            }
        }

        let client = self.manager.client();
        let (couple, attendance) =
            futures::try_join!(client.couple_status(), client.attendance_status())
                .map_err(describe)?;
        println!("{}", format_couple(&couple));
        println!("{}", format_attendance(&attendance));
        Ok(())
    }

    async fn timeout(&self, minutes: Option<u32>) -> Result<()> {
        match minutes {
            None => {
                let current = self.manager.load_session_timeout_minutes().await;
                println!("Session timeout: {} minutes", current);
            }
            Some(minutes) => {
                if !is_valid_session_timeout(minutes) {
                    anyhow::bail!(
                        "Timeout must be between 1 and {} minutes",
                        MAX_SESSION_TIMEOUT_MINUTES
                    );
                }
                self.manager.save_session_timeout_minutes(minutes).await?;
                println!("Session timeout set to {} minutes.", minutes);
            }
        }
        Ok(())
    }

    async fn profile(&self, cmd: ProfileCommand) -> Result<()> {
        let client = self.manager.client();
        match cmd {
            ProfileCommand::Show => {
                let profile = client.get_profile().await.map_err(describe)?;
                println!("Name:   {}", profile.display_name());
                if let Some(ref email) = profile.email {
                    println!("Email:  {}", email);
                }
                if let Some(gender) = profile.gender {
                    println!("Gender: {}", gender);
                }
            }
            ProfileCommand::Set { nickname, gender } => {
                if nickname.is_none() && gender.is_none() {
                    anyhow::bail!("Nothing to update; pass --nickname and/or --gender");
                }
                let profile = client
                    .complete_profile(&ProfileUpdate { nickname, gender })
                    .await
                    .map_err(describe)?;
                println!("Profile saved for {}.", profile.display_name());
            }
        }
        Ok(())
    }

    async fn couple(&self, cmd: CoupleCommand) -> Result<()> {
        let client = self.manager.client();
        match cmd {
            CoupleCommand::Status => {
                let status = client.couple_status().await.map_err(describe)?;
                println!("{}", format_couple(&status));
            }
            CoupleCommand::Request { partner_username } => {
                let request = client
                    .request_couple(&partner_username)
                    .await
                    .map_err(describe)?;
                println!("Request #{} sent to {}.", request.id, request.recipient_username);
            }
            CoupleCommand::Incoming => {
                print_requests(&client.incoming_couple_requests().await.map_err(describe)?)
            }
            CoupleCommand::Sent => {
                print_requests(&client.sent_couple_requests().await.map_err(describe)?)
            }
            CoupleCommand::Accept { request_id } => {
                let status = client
                    .accept_couple_request(request_id)
                    .await
                    .map_err(describe)?;
                println!("{}", format_couple(&status));
            }
            CoupleCommand::Reject { request_id } => {
                let remaining = client
                    .reject_couple_request(request_id)
                    .await
                    .map_err(describe)?;
                println!("Request #{} rejected.", request_id);
                print_requests(&remaining);
            }
            CoupleCommand::Cancel { request_id } => {
                let remaining = client
                    .cancel_couple_request(request_id)
                    .await
                    .map_err(describe)?;
                println!("Request #{} cancelled.", request_id);
                print_requests(&remaining);
            }
        }
        Ok(())
    }

    async fn attendance(&self, cmd: AttendanceCommand) -> Result<()> {
        let client = self.manager.client();
        match cmd {
            AttendanceCommand::Status => {
                let status = client.attendance_status().await.map_err(describe)?;
                println!("{}", format_attendance(&status));
            }
            AttendanceCommand::CheckIn => {
                let result = client.check_in_attendance().await.map_err(describe)?;
                if result.already_checked_in {
                    println!("Already checked in today.");
                } else {
                    println!("Checked in!");
                }
                println!("{}", format_attendance(&result.status));
            }
        }
        Ok(())
    }

    async fn memory(&self, cmd: MemoryCommand) -> Result<()> {
        let client = self.manager.client();
        match cmd {
            MemoryCommand::List {
                search,
                order,
                json,
            } => {
                let query = MemoryQuery {
                    q: search,
                    ordering: order,
                };
                let memories = client.list_memories(&query).await.map_err(describe)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&memories)?);
                } else if memories.is_empty() {
                    println!("No memories yet.");
                } else {
                    for memory in &memories {
                        println!("{}", format_memory_line(memory));
                    }
                }
            }
            MemoryCommand::Show { id } => {
                let memory = client.get_memory(id).await.map_err(describe)?;
                println!("{}", format_memory_line(&memory));
                println!();
                println!("{}", memory.content);
            }
            MemoryCommand::Create { title, content } => {
                let memory = client
                    .create_memory(&NewMemory { title, content })
                    .await
                    .map_err(describe)?;
                println!("Saved memory #{}.", memory.id);
            }
            MemoryCommand::Edit { id, title, content } => {
                let update = MemoryUpdate { title, content };
                if update.is_empty() {
                    anyhow::bail!("Nothing to update; pass --title and/or --content");
                }
                let memory = client.update_memory(id, &update).await.map_err(describe)?;
                println!("Updated memory #{}.", memory.id);
            }
            MemoryCommand::Delete { id } => {
                client.delete_memory(id).await.map_err(describe)?;
                println!("Deleted memory #{}.", id);
            }
        }
        Ok(())
    }

    async fn password(&self, cmd: PasswordCommand) -> Result<()> {
        let client = self.manager.client();
        let current =
            rpassword::prompt_password("Current password: ").context("Failed to read password")?;
        match cmd {
            PasswordCommand::Verify => {
                if client.verify_password(&current).await.map_err(describe)? {
                    println!("Password verified.");
                } else {
                    println!("Password does not match.");
                }
            }
            PasswordCommand::Change => {
                let new_password =
                    rpassword::prompt_password("New password: ").context("Failed to read password")?;
                let new_password_confirm = rpassword::prompt_password("Confirm new password: ")
                    .context("Failed to read password")?;
                let response = client
                    .change_password(&PasswordChangeRequest {
                        current_password: current,
                        new_password,
                        new_password_confirm,
                    })
                    .await
                    .map_err(describe)?;
                debug!(changed = response.changed, "Password change answered");
                println!("Password changed.");
            }
        }
        Ok(())
    }
}

/// Wrap an API error so the server's own message is shown first.
fn describe(error: ApiError) -> anyhow::Error {
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}

fn format_couple(status: &CoupleStatus) -> String {
    match status.partner_display_name() {
        Some(partner) if status.is_coupled => format!("Coupled with {}", partner),
        _ => "Not coupled yet".to_string(),
    }
}

fn format_attendance(status: &AttendanceStatus) -> String {
    let today = if status.checked_in_today {
        "checked in"
    } else {
        "not checked in"
    };
    let days = if status.streak_count == 1 { "day" } else { "days" };
    format!(
        "{}: {}, streak {} {}",
        status.today, today, status.streak_count, days
    )
}

fn format_request(request: &CoupleRequest) -> String {
    format!(
        "#{:<5} {} -> {} ({:?}, {})",
        request.id,
        request.requester_username,
        request.recipient_username,
        request.status,
        request.created_at
    )
}

fn print_requests(requests: &[CoupleRequest]) {
    if requests.is_empty() {
        println!("No pending requests.");
    }
    for request in requests {
        println!("{}", format_request(request));
    }
}

fn format_memory_line(memory: &Memory) -> String {
    format!("#{:<5} {}  {}", memory.id, memory.created_at, memory.title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovelybridge_core::api::StatusCode;

    #[test]
    fn test_format_attendance_pluralizes_streak() {
        let mut status = AttendanceStatus {
            today: "2024-05-01".to_string(),
            checked_in_today: true,
            streak_count: 1,
        };
        assert_eq!(format_attendance(&status), "2024-05-01: checked in, streak 1 day");

        status.checked_in_today = false;
        status.streak_count = 0;
        assert_eq!(format_attendance(&status), "2024-05-01: not checked in, streak 0 days");
    }

    #[test]
    fn test_format_couple_without_partner() {
        let status: CoupleStatus = serde_json::from_str(r#"{"is_coupled": false}"#).unwrap();
        assert_eq!(format_couple(&status), "Not coupled yet");
    }

    #[test]
    fn test_describe_prefers_server_message() {
        let error = ApiError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"non_field_errors": ["You are already in a couple."]}"#,
        );
        assert_eq!(describe(error).to_string(), "You are already in a couple.");
    }
}
