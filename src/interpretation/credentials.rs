use std::env;

use async_trait::async_trait;

use crate::interpretation::{
    error::{InterpretError, InterpretErrorKind, configuration_error},
    types::{CredentialRef, ResolvedCredential},
};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, reference: &CredentialRef)
    -> Result<ResolvedCredential, InterpretError>;
}

#[derive(Default)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(
        &self,
        reference: &CredentialRef,
    ) -> Result<ResolvedCredential, InterpretError> {
        match reference {
            CredentialRef::Env { var } => {
                let token = env::var(var).map_err(|_| {
                    InterpretError::new(
                        InterpretErrorKind::Authentication,
                        format!("missing credential environment variable {}", var),
                    )
                })?;
                if token.trim().is_empty() {
                    return Err(InterpretError::new(
                        InterpretErrorKind::Authentication,
                        format!("credential environment variable {} is empty", var),
                    ));
                }
                Ok(ResolvedCredential {
                    secret: Some(token),
                })
            }
            CredentialRef::InlineToken { token } => {
                if token.trim().is_empty() {
                    return Err(configuration_error("inline credential token cannot be empty"));
                }
                Ok(ResolvedCredential {
                    secret: Some(token.clone()),
                })
            }
            CredentialRef::None => Ok(ResolvedCredential::none()),
        }
    }
}
