//! Command-line adapter for identity reconciliation.
//!
//! # Responsibility
//! - Resolve settings from arguments, then environment, then defaults.
//! - Reject empty submissions before the store is opened.
//! - Open the contact store, run one `identify`, close the store.
//! - Print the `/identify` JSON envelope, or the JSON error envelope.

use clap::Parser;
use identity_core::config::MAX_ATTEMPTS_ENV;
use identity_core::{
    default_log_level, init_logging, IdentifyError, IdentifyRequest, IdentityService,
    ResolverConfig, SqliteContactStore,
};
use log::error;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const EXIT_SERVER_ERROR: u8 = 1;
const EXIT_CLIENT_ERROR: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "identity-cli", version, about = "Resolve one contact submission into its identity graph")]
struct Args {
    /// SQLite database file, created when missing.
    #[arg(long, env = "IDENTITY_DB_PATH", default_value = "identity.sqlite3")]
    db: PathBuf,

    #[arg(long)]
    email: Option<String>,

    #[arg(long = "phone", alias = "phone-number")]
    phone_number: Option<String>,

    /// Transaction attempts before a store conflict is reported.
    /// Falls back to `IDENTITY_MAX_ATTEMPTS`, then the default.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Absolute directory for rolling log files. Logging stays off when unset.
    #[arg(long, env = "IDENTITY_LOG_DIR")]
    log_dir: Option<String>,

    #[arg(long, env = "IDENTITY_LOG_LEVEL")]
    log_level: Option<String>,
}

/// Failure body mirroring the HTTP error envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    error: &'static str,
    message: String,
    status_code: u16,
}

impl ErrorEnvelope {
    fn from_identify(err: &IdentifyError) -> Self {
        let error = match err {
            IdentifyError::Validation(_) => "Validation Error",
            IdentifyError::TransientStore { .. } | IdentifyError::Store(_) => "Database Error",
            IdentifyError::InternalInconsistency(_) => "Internal Server Error",
        };
        Self {
            error,
            message: err.to_string(),
            status_code: err.status_code(),
        }
    }

    fn internal(message: String) -> Self {
        Self {
            error: "Internal Server Error",
            message,
            status_code: 500,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(log_dir) = args.log_dir.as_deref() {
        let level = args.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("identity-cli: logging disabled: {err}");
        }
    }

    let request = IdentifyRequest {
        email: args.email,
        phone_number: args.phone_number,
    };
    let env_attempts = std::env::var(MAX_ATTEMPTS_ENV).ok();
    let config = ResolverConfig::resolve(args.max_attempts, env_attempts.as_deref());

    match run(&args.db, &request, config) {
        Ok(body) => {
            println!("{body}");
            ExitCode::SUCCESS
        }
        Err((envelope, code)) => {
            match serde_json::to_string_pretty(&envelope) {
                Ok(body) => println!("{body}"),
                Err(_) => eprintln!("identity-cli: {}", envelope.message),
            }
            ExitCode::from(code)
        }
    }
}

fn run(
    db: &Path,
    request: &IdentifyRequest,
    config: ResolverConfig,
) -> Result<String, (ErrorEnvelope, u8)> {
    if request.is_empty() {
        let envelope = ErrorEnvelope::from_identify(&IdentifyError::missing_fields());
        return Err((envelope, EXIT_CLIENT_ERROR));
    }

    let store = SqliteContactStore::open(db).map_err(|err| {
        error!("event=cli_run module=cli status=error error_code=store_open_failed error={err}");
        (
            ErrorEnvelope::internal(format!("failed to open contact store: {err}")),
            EXIT_SERVER_ERROR,
        )
    })?;

    let mut service = IdentityService::with_config(store, config);
    let outcome = service.identify(request);

    if let Err(err) = service.into_store().close() {
        error!("event=cli_run module=cli status=error error_code=store_close_failed error={err}");
    }

    let response = outcome.map_err(|err| {
        let code = if err.is_client_error() {
            EXIT_CLIENT_ERROR
        } else {
            EXIT_SERVER_ERROR
        };
        (ErrorEnvelope::from_identify(&err), code)
    })?;

    serde_json::to_string_pretty(&response).map_err(|err| {
        (
            ErrorEnvelope::internal(format!("failed to encode response: {err}")),
            EXIT_SERVER_ERROR,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{run, Args, ErrorEnvelope, EXIT_CLIENT_ERROR};
    use clap::Parser;
    use identity_core::{IdentifyError, IdentifyRequest, ResolverConfig};

    #[test]
    fn args_accept_phone_alias() {
        let args = Args::try_parse_from([
            "identity-cli",
            "--db",
            "/tmp/x.db",
            "--phone-number",
            "111",
        ])
        .unwrap();
        assert_eq!(args.phone_number.as_deref(), Some("111"));
        assert_eq!(args.email, None);
    }

    #[test]
    fn validation_errors_map_to_client_envelope() {
        let envelope =
            ErrorEnvelope::from_identify(&IdentifyError::Validation("missing".to_string()));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "error": "Validation Error",
                "message": "missing",
                "statusCode": 400,
            })
        );
    }

    #[test]
    fn run_prints_identify_envelope_and_rejects_empty_request() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");

        let body = run(
            &db,
            &IdentifyRequest::new(Some("a@x.com"), Some("111")),
            ResolverConfig::default(),
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["contact"]["emails"], serde_json::json!(["a@x.com"]));

        let (envelope, code) = run(&db, &IdentifyRequest::default(), ResolverConfig::default())
            .unwrap_err();
        assert_eq!(envelope.status_code, 400);
        assert_eq!(code, EXIT_CLIENT_ERROR);
    }

    #[test]
    fn empty_request_is_rejected_without_creating_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("untouched.db");

        let (envelope, code) = run(
            &db,
            &IdentifyRequest::new(Some(""), None),
            ResolverConfig::default(),
        )
        .unwrap_err();

        assert_eq!(envelope.error, "Validation Error");
        assert_eq!(envelope.status_code, 400);
        assert_eq!(code, EXIT_CLIENT_ERROR);
        assert!(!db.exists());
    }
}
