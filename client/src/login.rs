//! Client view of the login manager global.

use crate::repository::{ClientContext, ClientEvent};
use log::{info, warn};
use shared::constants::GlobalObjectId;
use shared::field_args;
use shared::schema::LOGIN_MANAGER;
use shared::{DistributedClass, DistributedObject, FieldArgs, FieldHandler, ObjectCore, ObjectError};

pub struct LoginManager {
    core: ObjectCore,
}

impl LoginManager {
    pub fn authenticate_with_email_password(
        &self,
        ctx: &mut ClientContext,
        email: &str,
        password: &str,
    ) -> Result<(), ObjectError> {
        info!("Authenticating as {}", email);
        self.core
            .send_field_update(ctx, "login_with_email", field_args![email, password])
    }

    pub fn authenticate_with_token(
        &self,
        ctx: &mut ClientContext,
        token: &str,
    ) -> Result<(), ObjectError> {
        info!("Authenticating with session token");
        self.core
            .send_field_update(ctx, "login_with_token", field_args![token])
    }

    fn authentication_success(
        &mut self,
        ctx: &mut ClientContext,
        _args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        info!("Authentication with UberDOG complete.");
        ctx.raise(ClientEvent::AuthenticationSucceeded);
        Ok(())
    }

    fn authentication_failure(
        &mut self,
        ctx: &mut ClientContext,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let bad_args = |source| ObjectError::BadArguments {
            field: "authentication_failure".to_string(),
            source,
        };
        let code = args.uint_at(0).map_err(bad_args)?;
        let message = args.str_at(1).map_err(bad_args)?.to_string();

        warn!("Authentication failed ({}). Reason: {}", code, message);
        ctx.raise(ClientEvent::AuthenticationFailed {
            code: u16::try_from(code).unwrap_or(u16::MAX),
            message,
        });
        Ok(())
    }
}

impl DistributedObject<ClientContext> for LoginManager {
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

impl DistributedClass<ClientContext> for LoginManager {
    const CLASS_NAME: &'static str = LOGIN_MANAGER;

    fn create() -> Self {
        Self {
            core: ObjectCore::global(GlobalObjectId::LoginManager),
        }
    }

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, ClientContext>)> {
        vec![
            ("authentication_success", Self::authentication_success),
            ("authentication_failure", Self::authentication_failure),
        ]
    }
}
