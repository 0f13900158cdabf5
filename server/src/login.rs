//! Login manager globals for the AI and UberDOG.
//!
//! Clients talk to the UberDOG's login manager, which authenticates the
//! account, promotes the client connection to the established state and
//! opens the base interest the client waits on.

use crate::repository::InternalContext;
use log::{info, warn};
use serde_json::{json, Map};
use shared::channel::sender_channel;
use shared::constants::{
    GlobalObjectId, AUTH_FAILURE_INVALID_CREDENTIALS, CLIENT_STATE_ESTABLISHED, GLOBAL_GAME_ROOT,
    STARTING_NETWORK_ZONES,
};
use shared::field_args;
use shared::schema::LOGIN_MANAGER;
use shared::{DistributedClass, DistributedObject, FieldArgs, FieldHandler, ObjectCore, ObjectError};
use std::collections::HashMap;

/// Interest handle used for the base interest opened on login.
pub const BASE_INTEREST_HANDLE: u16 = 1;
/// Context reported back to the client for the base interest.
pub const BASE_INTEREST_CONTEXT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub code: u16,
    pub message: String,
}

impl AuthFailure {
    pub fn invalid_credentials() -> Self {
        Self {
            code: AUTH_FAILURE_INVALID_CREDENTIALS,
            message: "Invalid email or password".to_string(),
        }
    }
}

/// Resolves credentials to an account id.
pub trait Authenticator: Send {
    fn authenticate_email(&self, email: &str, password: &str) -> Result<u32, AuthFailure>;

    fn authenticate_token(&self, token: &str) -> Result<u32, AuthFailure>;
}

/// In-memory account table.
///
/// Accounts are numbered from 1 in the order they were configured.
#[derive(Debug, Clone, Default)]
pub struct AccountTable {
    accounts: Vec<(String, String)>,
    tokens: HashMap<String, u32>,
}

impl AccountTable {
    pub fn new(accounts: Vec<(String, String)>) -> Self {
        Self {
            accounts,
            tokens: HashMap::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, account_id: u32) -> Self {
        self.tokens.insert(token.into(), account_id);
        self
    }
}

impl Authenticator for AccountTable {
    fn authenticate_email(&self, email: &str, password: &str) -> Result<u32, AuthFailure> {
        self.accounts
            .iter()
            .position(|(known_email, known_password)| {
                known_email == email && known_password == password
            })
            .map(|index| index as u32 + 1)
            .ok_or_else(AuthFailure::invalid_credentials)
    }

    fn authenticate_token(&self, token: &str) -> Result<u32, AuthFailure> {
        self.tokens.get(token).copied().ok_or_else(|| AuthFailure {
            code: AUTH_FAILURE_INVALID_CREDENTIALS,
            message: "Invalid or expired token".to_string(),
        })
    }
}

/// UberDOG side of the login manager.
pub struct LoginManagerUD {
    core: ObjectCore,
}

impl LoginManagerUD {
    fn login_with_email(
        &mut self,
        ctx: &mut InternalContext,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let email = args.str_at(0).map_err(|source| ObjectError::BadArguments {
            field: "login_with_email".to_string(),
            source,
        })?;
        let password = args.str_at(1).map_err(|source| ObjectError::BadArguments {
            field: "login_with_email".to_string(),
            source,
        })?;

        let outcome = ctx.authenticator().authenticate_email(email, password);
        self.complete_login(ctx, email, outcome)
    }

    fn login_with_token(
        &mut self,
        ctx: &mut InternalContext,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let token = args.str_at(0).map_err(|source| ObjectError::BadArguments {
            field: "login_with_token".to_string(),
            source,
        })?;

        let outcome = ctx.authenticator().authenticate_token(token);
        self.complete_login(ctx, "<token>", outcome)
    }

    fn complete_login(
        &mut self,
        ctx: &mut InternalContext,
        user: &str,
        outcome: Result<u32, AuthFailure>,
    ) -> Result<(), ObjectError> {
        let do_id = self.core.do_id().ok_or(ObjectError::NotGenerated)?;
        let client = ctx
            .msg_sender()
            .ok_or_else(|| ObjectError::Handler("login request without a sender".to_string()))?;

        match outcome {
            Ok(account_id) => {
                let client_channel = sender_channel(account_id, 0);
                ctx.set_client_state(client, CLIENT_STATE_ESTABLISHED)?;
                ctx.set_client_id(client, client_channel)?;
                ctx.send_update_to_channel(
                    client_channel,
                    do_id,
                    "authentication_success",
                    field_args![],
                )?;
                ctx.client_add_interest(
                    client_channel,
                    BASE_INTEREST_CONTEXT,
                    BASE_INTEREST_HANDLE,
                    GLOBAL_GAME_ROOT,
                    STARTING_NETWORK_ZONES,
                )?;

                info!("Login successful (user: {}, account: {})", user, account_id);
                let mut body = Map::new();
                body.insert("account_id".to_string(), json!(account_id));
                ctx.write_server_event("account-login", body)?;
            }
            Err(failure) => {
                warn!("Login failed (user: {}): {}", user, failure.message);
                ctx.send_update_to_channel(
                    client,
                    do_id,
                    "authentication_failure",
                    field_args![failure.code, failure.message],
                )?;
            }
        }

        Ok(())
    }
}

impl DistributedObject<InternalContext> for LoginManagerUD {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }
}

impl DistributedClass<InternalContext> for LoginManagerUD {
    const CLASS_NAME: &'static str = LOGIN_MANAGER;

    fn create() -> Self {
        Self {
            core: ObjectCore::global(GlobalObjectId::LoginManager),
        }
    }

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, InternalContext>)> {
        vec![
            ("login_with_email", Self::login_with_email),
            ("login_with_token", Self::login_with_token),
        ]
    }
}

/// AI side of the login manager. Present so the AI owns the global slot.
pub struct LoginManagerAI {
    core: ObjectCore,
}

impl DistributedObject<InternalContext> for LoginManagerAI {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }
}

impl DistributedClass<InternalContext> for LoginManagerAI {
    const CLASS_NAME: &'static str = LOGIN_MANAGER;

    fn create() -> Self {
        Self {
            core: ObjectCore::global(GlobalObjectId::LoginManager),
        }
    }

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, InternalContext>)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AccountTable {
        AccountTable::new(vec![
            ("guest".to_string(), "guest".to_string()),
            ("dev@quest".to_string(), "hunter2".to_string()),
        ])
    }

    #[test]
    fn test_account_ids_follow_table_order() {
        let table = table();
        assert_eq!(table.authenticate_email("guest", "guest"), Ok(1));
        assert_eq!(table.authenticate_email("dev@quest", "hunter2"), Ok(2));
    }

    #[test]
    fn test_wrong_password_fails_with_code_100() {
        let failure = table().authenticate_email("guest", "nope").unwrap_err();
        assert_eq!(failure.code, AUTH_FAILURE_INVALID_CREDENTIALS);
    }

    #[test]
    fn test_token_login() {
        let table = table().with_token("abc123", 2);
        assert_eq!(table.authenticate_token("abc123"), Ok(2));
        assert!(table.authenticate_token("stale").is_err());
    }
}
