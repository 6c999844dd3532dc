// Command-line surface over the library operations

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use dialoguer::Password;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{
    AuthManager, CaptchaVerification, CodeLogin, Credential, EmailCodeRequest, EmailLogin,
    LoginResult, PasswordLogin, SmsCodeRequest, SmsLogin, SqliteCredentialStore, AUTH_TOKEN_KEY,
};
use crate::gateway::{RequestBody, RequestGateway, RequestOptions};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Obtain and store credentials
    #[command(subcommand)]
    Login(LoginCommand),

    /// Dispatch a verification code
    #[command(subcommand)]
    SendCode(SendCodeCommand),

    /// Image CAPTCHA operations
    #[command(subcommand)]
    Captcha(CaptchaCommand),

    /// End the session and clear local credentials
    Logout {
        /// Also revoke the token server-side
        #[arg(long)]
        revoke: bool,
    },

    /// Call the API through the gateway
    Request {
        /// HTTP method
        method: String,
        /// Path relative to the API base, or an absolute URL
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },

    /// Show stored credential state
    Status,
}

#[derive(Subcommand, Debug)]
pub enum LoginCommand {
    /// Username and password
    Password {
        #[arg(short, long)]
        username: String,
        /// Prompted when omitted
        #[arg(short, long, env = "AUTH_PASSWORD")]
        password: Option<String>,
    },
    /// SMS one-time code
    Sms {
        #[arg(long)]
        phone: String,
        #[command(flatten)]
        code: CodeArgs,
    },
    /// Email code
    Email {
        #[arg(long)]
        email: String,
        #[command(flatten)]
        code: CodeArgs,
    },
}

#[derive(Args, Debug)]
pub struct CodeArgs {
    /// Verification code received
    #[arg(long)]
    pub code: String,
    #[arg(long)]
    pub captcha_token: Option<String>,
    #[arg(long)]
    pub captcha_code: Option<String>,
}

impl From<CodeArgs> for CodeLogin {
    fn from(args: CodeArgs) -> Self {
        CodeLogin {
            code: args.code,
            captcha_token: args.captcha_token,
            captcha_code: args.captcha_code,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SendCodeCommand {
    Sms {
        #[arg(long)]
        phone: String,
        #[arg(long, default_value_t = SmsCodeRequest::LOGIN_PURPOSE)]
        purpose: u32,
    },
    Email {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "Login")]
        message_type: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CaptchaCommand {
    /// Issue a CAPTCHA and print its token and data URI
    Create,
    /// Verify a CAPTCHA answer
    Verify {
        #[arg(long)]
        token: String,
        #[arg(long)]
        code: String,
    },
}

/// Everything a command needs
pub struct CommandContext {
    pub auth: Arc<AuthManager>,
    pub gateway: RequestGateway,
    /// Durable store when it could be opened
    pub sqlite: Option<Arc<SqliteCredentialStore>>,
}

pub async fn run(command: Command, ctx: &CommandContext) -> Result<()> {
    match command {
        Command::Login(login) => run_login(login, ctx).await,
        Command::SendCode(send) => run_send_code(send, ctx).await,
        Command::Captcha(captcha) => run_captcha(captcha, ctx).await,
        Command::Logout { revoke } => run_logout(revoke, ctx).await,
        Command::Request { method, path, data } => run_request(&method, &path, data, ctx).await,
        Command::Status => {
            print_status(ctx);
            Ok(())
        }
    }
}

async fn run_login(command: LoginCommand, ctx: &CommandContext) -> Result<()> {
    let identity = ctx.auth.identity();
    let result: LoginResult = match command {
        LoginCommand::Password { username, password } => {
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt(format!("Password for {}", username))
                    .interact()
                    .context("Failed to read password")?,
            };
            identity
                .login_with_password(&PasswordLogin { username, password }, None)
                .await?
        }
        LoginCommand::Sms { phone, code } => {
            identity
                .login_with_sms_code(
                    &SmsLogin {
                        phone_number: phone,
                        code: code.into(),
                    },
                    None,
                )
                .await?
        }
        LoginCommand::Email { email, code } => {
            identity
                .login_with_email_code(
                    &EmailLogin {
                        email,
                        code: code.into(),
                    },
                    None,
                )
                .await?
        }
    };

    if !ctx.auth.persist_login(&result) {
        anyhow::bail!(
            "Login succeeded but the response had no token: {}",
            result.raw
        );
    }
    println!("✅ Logged in");
    Ok(())
}

async fn run_send_code(command: SendCodeCommand, ctx: &CommandContext) -> Result<()> {
    let identity = ctx.auth.identity();
    match command {
        SendCodeCommand::Sms { phone, purpose } => {
            identity
                .send_sms_verification_code(
                    &SmsCodeRequest {
                        phone_number: phone,
                        purpose,
                    },
                    None,
                )
                .await?
        }
        SendCodeCommand::Email {
            email,
            message_type,
        } => {
            identity
                .send_email_verification_code(
                    &EmailCodeRequest {
                        email,
                        message_type,
                    },
                    None,
                )
                .await?
        }
    }
    println!("✅ Verification code sent");
    Ok(())
}

async fn run_captcha(command: CaptchaCommand, ctx: &CommandContext) -> Result<()> {
    let identity = ctx.auth.identity();
    match command {
        CaptchaCommand::Create => {
            let captcha = identity.create_captcha(None).await?;
            println!("token: {}", captcha.token);
            println!("image: {}", captcha.image_url);
        }
        CaptchaCommand::Verify { token, code } => {
            identity
                .verify_captcha(&CaptchaVerification { token, code }, None)
                .await?;
            println!("✅ Captcha accepted");
        }
    }
    Ok(())
}

async fn run_logout(revoke: bool, ctx: &CommandContext) -> Result<()> {
    let identity = ctx.auth.identity();

    // Server-side calls are best-effort; local state is cleared regardless
    if let Err(e) = identity.server_logout(None).await {
        tracing::warn!("Server logout failed: {}", e);
    }
    if revoke {
        if let Err(e) = identity.revoke_token(None).await {
            tracing::warn!("Token revocation failed: {}", e);
        }
    }

    ctx.auth.sign_out();
    println!("✅ Logged out");
    Ok(())
}

async fn run_request(
    method: &str,
    path: &str,
    data: Option<String>,
    ctx: &CommandContext,
) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut options = RequestOptions::new().method(method);
    if let Some(data) = data {
        let body: Value = serde_json::from_str(&data).context("--data must be valid JSON")?;
        options = options.body(RequestBody::Json(body));
    }

    let response = ctx.gateway.request(path, options).await?;
    match response {
        Value::String(text) => println!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

fn print_status(ctx: &CommandContext) {
    match Credential::load(ctx.auth.store()) {
        Some(credential) => {
            let preview: String = credential.access_token.chars().take(20).collect();
            println!("access token:  {}...", preview);
            println!(
                "refresh token: {}",
                if credential.refresh_token.is_some() {
                    "present"
                } else {
                    "absent"
                }
            );
            if let Some(updated) = ctx
                .sqlite
                .as_ref()
                .and_then(|store| store.updated_at(AUTH_TOKEN_KEY))
            {
                println!("updated:       {}", updated.to_rfc3339());
            }
        }
        None => println!("Not logged in"),
    }

    if let Some(path) = ctx.sqlite.as_ref().and_then(|store| store.path()) {
        println!("store:         {}", path.display());
    }
}
