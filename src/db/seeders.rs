//! Database seeders for built-in data.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

use super::AdminUser;
use crate::api::auth::hash_password;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Ensure at least one admin account exists, creating it from the configured
/// credentials when missing. Existing accounts are never overwritten here;
/// use the `reset-admin-password` subcommand for that.
///
/// When no password is configured a random one is generated and printed once,
/// so a fresh install never ships a known credential.
pub async fn ensure_admin_user(db: &SqlitePool, username: &str, password: Option<&str>) -> Result<()> {
    if AdminUser::find_by_username(db, username).await?.is_some() {
        return Ok(());
    }

    let generated;
    let password = match password {
        Some(p) => p,
        None => {
            generated = uuid::Uuid::new_v4().to_string();
            info!(
                username = username,
                password = %generated,
                "No admin password configured; generated one (change it with reset-admin-password)"
            );
            &generated
        }
    };

    if password.len() < 12 {
        warn!(
            username = username,
            "Seeded admin password is short; change it with the reset-admin-password subcommand"
        );
    }

    let password_hash = hash_password(password)?;
    AdminUser::create(db, username, &password_hash).await?;
    info!(username = username, "Seeded admin user");

    Ok(())
}
