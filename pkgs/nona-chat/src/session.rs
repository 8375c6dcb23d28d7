//! Anonymous identity session

use crate::backend::{bounded, AuthFeed, IdentityProvider};
use crate::error::{ChatError, Result};
use crate::types::UserIdentity;
use crate::ChatConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

const ADJECTIVES: &[&str] = &[
    "Happy", "Quick", "Wise", "Brave", "Calm", "Bright", "Gentle", "Strong", "Clear", "Dark",
    "Light", "Deep", "Warm", "Cool", "Noble", "Humble",
];

const NOUNS: &[&str] = &[
    "Lion", "Eagle", "Wolf", "Bear", "Fox", "Cat", "Dog", "Horse", "Dragon", "Phoenix", "Tiger",
    "Panther", "Leopard", "Lynx", "Hawk", "Owl",
];

/// Random display name such as `BraveOwl417`
pub fn generate_username() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Guest");
    let number: u16 = rng.gen_range(0..1000);
    format!("{}{}{}", adjective, noun, number)
}

/// Signed-in state on top of the identity provider
pub struct Session {
    provider: Arc<dyn IdentityProvider>,
    config: ChatConfig,
}

impl Session {
    pub fn new(provider: Arc<dyn IdentityProvider>, config: ChatConfig) -> Self {
        Self { provider, config }
    }

    /// Sign in anonymously and assign a generated display name
    pub async fn sign_in_as_guest(&self) -> Result<UserIdentity> {
        let user = bounded(
            self.config.remote_timeout,
            "anonymous sign-in",
            self.provider.sign_in_anonymous(),
        )
        .await
        .map_err(|e| {
            warn!("Anonymous sign-in failed: {}", e);
            e
        })?;

        let username = generate_username();
        let user = match bounded(
            self.config.remote_timeout,
            "display name update",
            self.provider.update_display_name(&username),
        )
        .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!("Signed in as {} but could not set display name: {}", user.uid, e);
                user
            }
        };

        info!(uid = %user.uid, "Signed in as {}", username);
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<()> {
        bounded(
            self.config.remote_timeout,
            "sign-out",
            self.provider.sign_out(),
        )
        .await?;
        info!("Signed out");
        Ok(())
    }

    /// Change the display name of the signed-in user
    pub async fn update_username(&self, username: &str) -> Result<UserIdentity> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::validation("username is empty"));
        }
        self.require_user()?;

        let user = bounded(
            self.config.remote_timeout,
            "display name update",
            self.provider.update_display_name(username),
        )
        .await?;
        info!(uid = %user.uid, "Username changed to {}", username);
        Ok(user)
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.provider.current_user()
    }

    /// The signed-in user, or `AuthenticationRequired`
    pub fn require_user(&self) -> Result<UserIdentity> {
        self.provider
            .current_user()
            .ok_or(ChatError::AuthenticationRequired)
    }

    /// Feed of auth state changes
    pub fn watch(&self) -> AuthFeed {
        self.provider.on_auth_state_changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_username_shape() {
        for _ in 0..50 {
            let name = generate_username();
            let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
            let number = &name[prefix.len()..];

            assert!(ADJECTIVES.iter().any(|a| prefix.starts_with(a)), "{}", name);
            assert!(NOUNS.iter().any(|n| prefix.ends_with(n)), "{}", name);
            assert!(!number.is_empty() && number.parse::<u16>().unwrap() < 1000);
        }
    }
}
