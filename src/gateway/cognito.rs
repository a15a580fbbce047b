//! Amazon Cognito user-pool client speaking the JSON 1.1 target protocol.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ClientMetadata, ConfirmSignUpInput, ConfirmSignUpResponse, GatewayError, IdentityGateway,
    SignUpInput, SignUpResponse, UserAttribute,
};
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::token::TokensFromRefresh;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// [`IdentityGateway`] backed by the Cognito user-pools API.
///
/// # Example
/// ```no_run
/// use passflow::config::FlowConfig;
/// use passflow::gateway::CognitoGateway;
///
/// let gateway = CognitoGateway::new(&FlowConfig::new("client-id").with_region("eu-west-1"))?;
/// # Ok::<(), passflow::error::FlowError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CognitoGateway {
    client: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl CognitoGateway {
    pub fn new(config: &FlowConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|err| FlowError::Configuration(format!("http client: {err}")))?;
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            endpoint: config.resolved_endpoint(),
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<B, R>(
        &self,
        operation: &str,
        body: &B,
        cancel: Option<&CancellationToken>,
    ) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static(AMZ_JSON))
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .json(body);
        let exchange = async {
            let resp = request.send().await?;
            let status = resp.status();
            let text = resp.text().await?;
            Ok::<_, GatewayError>((status, text))
        };
        let (status, text) = match cancel {
            Some(cancel) => tokio::select! {
                result = exchange => result?,
                _ = cancel.cancelled() => {
                    debug!(operation, "Cognito request aborted");
                    return Err(GatewayError::cancelled());
                }
            },
            None => exchange.await?,
        };
        if !status.is_success() {
            return Err(parse_error(status.as_u16(), &text));
        }
        let body = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(body).map_err(|err| {
            GatewayError::provider("InvalidResponse", format!("{operation}: {err}"))
                .with_status(status.as_u16())
        })
    }
}

#[async_trait]
impl IdentityGateway for CognitoGateway {
    async fn sign_up(
        &self,
        input: SignUpInput,
        cancel: CancellationToken,
    ) -> Result<SignUpResponse, GatewayError> {
        let body = SignUpBody {
            client_id: &self.client_id,
            username: &input.username,
            password: &input.password,
            user_attributes: &input.user_attributes,
            client_metadata: input.client_metadata.as_ref(),
        };
        self.call("SignUp", &body, Some(&cancel)).await
    }

    async fn confirm_sign_up(
        &self,
        input: ConfirmSignUpInput,
        cancel: CancellationToken,
    ) -> Result<ConfirmSignUpResponse, GatewayError> {
        let body = ConfirmSignUpBody {
            client_id: &self.client_id,
            username: &input.username,
            confirmation_code: &input.confirmation_code,
            client_metadata: input.client_metadata.as_ref(),
        };
        self.call("ConfirmSignUp", &body, Some(&cancel)).await
    }

    async fn revoke_token(
        &self,
        refresh_token: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<(), GatewayError> {
        let body = RevokeTokenBody {
            token: refresh_token,
            client_id: &self.client_id,
        };
        let _: serde_json::Value = self.call("RevokeToken", &body, cancel.as_ref()).await?;
        Ok(())
    }

    async fn refresh_tokens(
        &self,
        username: &str,
        refresh_token: &str,
        cancel: CancellationToken,
    ) -> Result<TokensFromRefresh, GatewayError> {
        let mut auth_parameters = HashMap::new();
        auth_parameters.insert("REFRESH_TOKEN", refresh_token);
        auth_parameters.insert("USERNAME", username);
        let body = InitiateAuthBody {
            auth_flow: "REFRESH_TOKEN_AUTH",
            client_id: &self.client_id,
            auth_parameters,
        };
        let resp: InitiateAuthResponse = self.call("InitiateAuth", &body, Some(&cancel)).await?;
        let result = resp.authentication_result.ok_or_else(|| {
            GatewayError::provider("InvalidResponse", "InitiateAuth returned no AuthenticationResult")
        })?;
        Ok(TokensFromRefresh {
            id_token: result.id_token,
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            expire_at: result
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }
}

fn parse_error(status: u16, body: &str) -> GatewayError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(err) => {
            let code = err
                .error_type
                .as_deref()
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
                .unwrap_or_else(|| "UnknownError".to_string());
            (code, err.message.unwrap_or_default())
        }
        None => ("UnknownError".to_string(), body.to_string()),
    };
    GatewayError::provider(code, message).with_status(status)
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SignUpBody<'a> {
    client_id: &'a str,
    username: &'a str,
    password: &'a str,
    user_attributes: &'a [UserAttribute],
    #[serde(skip_serializing_if = "Option::is_none")]
    client_metadata: Option<&'a ClientMetadata>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConfirmSignUpBody<'a> {
    client_id: &'a str,
    username: &'a str,
    confirmation_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_metadata: Option<&'a ClientMetadata>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RevokeTokenBody<'a> {
    token: &'a str,
    client_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthBody<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: HashMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    message: Option<String>,
}
