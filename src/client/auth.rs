use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::info;

use super::Identity;
use super::Session;
use super::SessionInner;
use crate::network::Credentials;
use crate::network::LoginRequest;
use crate::Error;
use crate::ErrorCode;
use crate::Result;

impl SessionInner {
    async fn login(
        &self,
        username: String,
        password: String,
    ) -> Result<()> {
        let request = LoginRequest {
            context: self.anonymous_context(),
            credentials: Credentials {
                username: username.clone(),
                password,
            },
        };
        let token = self
            .call("login", |t, ep| {
                let request = request.clone();
                async move { t.login(&ep, request).await }
            })
            .await?;

        info!(user = %username, "Logged in");
        self.identity.store(Some(Arc::new(Identity { username, token })));
        self.login_expired.store(false, Ordering::Release);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let identity = self
            .identity
            .load_full()
            .ok_or_else(|| Error::status(ErrorCode::UnknownUser, "not logged in"))?;

        let token = identity.token.clone();
        let result = self
            .call("logout", |t, ep| {
                let token = token.clone();
                async move { t.logout(&ep, token).await }
            })
            .await;

        // A token the cluster no longer knows is as good as logged out
        if result.is_ok() || matches!(&result, Err(e) if e.code() == ErrorCode::UnknownUser) {
            self.identity.store(None);
            info!(user = %identity.username, "Logged out");
        }
        result
    }

    async fn register(
        &self,
        username: String,
        password: String,
    ) -> Result<()> {
        let request = Credentials { username, password };
        self.call("register", |t, ep| {
            let request = request.clone();
            async move { t.register(&ep, request).await }
        })
        .await
    }
}

impl Session {
    /// Logs in as `username`; later data operations act in that user's key space.
    ///
    /// # Errors
    /// - `UnknownUser` if the user is not registered
    /// - `PasswordError` on a wrong password
    /// - `UserExists` if the user is already logged in elsewhere
    pub fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<()> {
        self.run(
            "client::login",
            self.inner().login(username.to_string(), password.to_string()),
        )
    }

    /// Ends the current login.
    ///
    /// # Errors
    /// `UnknownUser` when not logged in.
    pub fn logout(&self) -> Result<()> {
        self.run("client::logout", self.inner().logout())
    }

    /// Creates a user.
    ///
    /// # Errors
    /// `UserExists` for a taken or empty name.
    pub fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<()> {
        self.run(
            "client::register",
            self.inner().register(username.to_string(), password.to_string()),
        )
    }
}
