//! authz - access checks against a policy document.
//!
//! Loads a JSON policy (storage backend, role graph, grants), then either
//! evaluates an access check or lists the records stored for a role.
//!
//! ```text
//! authz check --policy policy.json --resource report --action read editor
//! authz records --policy policy.json --role editor --resource report
//! ```
//!
//! `check` exits with status 0 when access is allowed and 1 when denied.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use authz_core::config::load_policy;
use authz_core::{ResourceId, RoleId};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "authz")]
#[command(about = "Role-hierarchy access checks against a policy document")]
#[command(version)]
struct Cli {
    /// Log at info level (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether any of the given roles may perform an action
    Check {
        /// Policy document (JSON)
        #[arg(long, env = "AUTHZ_POLICY")]
        policy: PathBuf,

        /// Resource identifier
        #[arg(long)]
        resource: String,

        /// Action to check
        #[arg(long)]
        action: String,

        /// Roles held by the caller
        #[arg(value_name = "ROLE", required = true)]
        roles: Vec<String>,
    },
    /// List the records stored for a role and resource
    Records {
        /// Policy document (JSON)
        #[arg(long, env = "AUTHZ_POLICY")]
        policy: PathBuf,

        /// Role identifier
        #[arg(long)]
        role: String,

        /// Resource identifier
        #[arg(long)]
        resource: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Execute a command, writing its report to `out`.
/// Returns false when a check was denied.
fn run(cli: &Cli, out: &mut impl Write) -> anyhow::Result<bool> {
    match &cli.command {
        Commands::Check {
            policy,
            resource,
            action,
            roles,
        } => {
            let engine = load_policy(policy)
                .and_then(|p| p.build_engine())
                .with_context(|| format!("failed to load policy {}", policy.display()))?;

            let roles: Vec<RoleId> = roles.iter().map(|r| RoleId::from(r.as_str())).collect();
            let resource = ResourceId::from(resource.as_str());
            let result = engine
                .evaluate(&roles, action, &resource)
                .context("access check failed")?;

            tracing::info!(
                ?roles,
                action = action.as_str(),
                %resource,
                %result,
                explicit = result.is_explicit(),
                "access evaluated"
            );
            let verdict = if result.is_allowed() { "allow" } else { "deny" };
            writeln!(out, "{verdict} ({result})")?;
            Ok(result.is_allowed())
        }
        Commands::Records {
            policy,
            role,
            resource,
        } => {
            let engine = load_policy(policy)
                .and_then(|p| p.build_engine())
                .with_context(|| format!("failed to load policy {}", policy.display()))?;

            let records = engine
                .records(&RoleId::from(role.as_str()), &ResourceId::from(resource.as_str()))
                .context("failed to list records")?;
            for record in &records {
                writeln!(
                    out,
                    "{}\t{}",
                    record.kind,
                    record.action.as_deref().unwrap_or("*")
                )?;
            }
            tracing::info!(%role, %resource, count = records.len(), "records listed");
            Ok(true)
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = std::io::stdout();
    let allowed = run(&cli, &mut stdout.lock())?;
    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "roles": { "admin": ["editor"] },
        "grants": [
            { "role": "editor", "resource": "report", "action": "read", "effect": "allow" },
            { "role": "editor", "resource": "report", "action": "write", "effect": "deny" },
            { "role": "admin", "resource": "report", "effect": "allow" }
        ]
    }"#;

    fn write_policy(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("policy.json");
        std::fs::write(&path, POLICY).unwrap();
        path
    }

    fn run_args(args: &[&str]) -> (anyhow::Result<bool>, String) {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut out = Vec::new();
        let result = run(&cli, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_check_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let policy = write_policy(&dir);
        let policy = policy.to_str().unwrap();

        let (result, out) = run_args(&[
            "authz", "check", "--policy", policy, "--resource", "report", "--action", "read",
            "editor",
        ]);
        assert!(result.unwrap());
        assert_eq!(out.trim(), "allow (ALLOW_EXPLICITLY)");
    }

    #[test]
    fn test_check_denied() {
        let dir = tempfile::tempdir().unwrap();
        let policy = write_policy(&dir);
        let policy = policy.to_str().unwrap();

        let (result, out) = run_args(&[
            "authz", "check", "--policy", policy, "--resource", "report", "--action", "write",
            "editor",
        ]);
        assert!(!result.unwrap());
        assert_eq!(out.trim(), "deny (DENY_EXPLICITLY)");

        let (result, out) = run_args(&[
            "authz", "check", "--policy", policy, "--resource", "report", "--action", "read",
            "guest",
        ]);
        assert!(!result.unwrap());
        assert_eq!(out.trim(), "deny (DENY_IMPLICITLY)");
    }

    #[test]
    fn test_check_any_role_in_set() {
        let dir = tempfile::tempdir().unwrap();
        let policy = write_policy(&dir);
        let policy = policy.to_str().unwrap();

        let (result, _) = run_args(&[
            "authz", "check", "--policy", policy, "--resource", "report", "--action", "write",
            "guest", "admin",
        ]);
        assert!(result.unwrap());
    }

    #[test]
    fn test_records_listing() {
        let dir = tempfile::tempdir().unwrap();
        let policy = write_policy(&dir);
        let policy = policy.to_str().unwrap();

        let (result, out) = run_args(&[
            "authz", "records", "--policy", policy, "--role", "editor", "--resource", "report",
        ]);
        assert!(result.unwrap());
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines, vec!["ALLOW\tread", "DENY\twrite"]);

        let (_, out) = run_args(&[
            "authz", "records", "--policy", policy, "--role", "admin", "--resource", "report",
        ]);
        assert_eq!(out.trim(), "ALLOW_ALL\t*");
    }

    #[test]
    fn test_edited_policy_replaces_persisted_grants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let policy = path.to_str().unwrap();
        std::fs::write(
            &path,
            r#"{"storage":{"backend":"redb","path":"authz.redb"},
                "grants":[{"role":"editor","resource":"report","action":"read","effect":"allow"}]}"#,
        )
        .unwrap();

        let (result, out) = run_args(&[
            "authz", "check", "--policy", policy, "--resource", "report", "--action", "read",
            "guest",
        ]);
        assert!(!result.unwrap());
        assert_eq!(out.trim(), "deny (DENY_IMPLICITLY)");

        std::fs::write(
            &path,
            r#"{"storage":{"backend":"redb","path":"authz.redb"},"grants":[]}"#,
        )
        .unwrap();

        let (result, out) = run_args(&[
            "authz", "check", "--policy", policy, "--resource", "report", "--action", "read",
            "guest",
        ]);
        assert!(result.unwrap());
        assert_eq!(out.trim(), "allow (ALLOW_IMPLICITLY)");

        let (result, out) = run_args(&[
            "authz", "records", "--policy", policy, "--role", "editor", "--resource", "report",
        ]);
        assert!(result.unwrap());
        assert!(out.is_empty());
        assert!(dir.path().join("authz.redb").exists());
    }

    #[test]
    fn test_missing_policy_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let (result, _) = run_args(&[
            "authz",
            "check",
            "--policy",
            missing.to_str().unwrap(),
            "--resource",
            "report",
            "--action",
            "read",
            "editor",
        ]);
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to load policy"));
    }

    #[test]
    fn test_check_requires_role() {
        assert!(Cli::try_parse_from([
            "authz",
            "check",
            "--policy",
            "p.json",
            "--resource",
            "r",
            "--action",
            "a"
        ])
        .is_err());
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from([
            "authz", "records", "--policy", "p.json", "--role", "r", "--resource", "x", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
    }
}
