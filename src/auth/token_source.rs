//! Where the bearer token comes from.
//!
//! The token never appears in the DOM; it only shows up in the headers of the
//! API calls the dashboard makes on its own. An [`AuthTokenSource`] decides
//! which captured request to trust.

use serde_json::Value;

use super::AuthContext;
use crate::browser::CapturedRequest;

pub trait AuthTokenSource: Send + Sync {
    /// Pick the auth context out of the captured requests, if present.
    fn extract(&self, requests: &[CapturedRequest]) -> Option<AuthContext>;
}

/// Takes the first request that carries an `authorization` header and a JSON
/// body naming an account in its GraphQL variables.
#[derive(Debug, Clone)]
pub struct GraphqlAccountTokenSource {
    /// Variable names checked, in order, for the account id.
    account_keys: Vec<String>,
}

impl Default for GraphqlAccountTokenSource {
    fn default() -> Self {
        Self {
            account_keys: vec!["accountId".to_string(), "id".to_string()],
        }
    }
}

impl GraphqlAccountTokenSource {
    pub fn with_account_keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            account_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    fn account_id(&self, body: &Value) -> Option<String> {
        match body {
            // Batched operations arrive as an array.
            Value::Array(operations) => operations.iter().find_map(|op| self.account_id(op)),
            Value::Object(_) => {
                let variables = body.get("variables")?;
                self.account_keys.iter().find_map(|key| {
                    variables
                        .get(key)
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                })
            }
            _ => None,
        }
    }
}

impl AuthTokenSource for GraphqlAccountTokenSource {
    fn extract(&self, requests: &[CapturedRequest]) -> Option<AuthContext> {
        requests.iter().find_map(|request| {
            let token = request
                .header("authorization")
                .map(str::trim)
                .filter(|t| !t.is_empty())?;
            let body: Value = serde_json::from_str(request.body.as_deref()?).ok()?;
            let account_id = self.account_id(&body)?;
            Some(AuthContext::new(account_id, token))
        })
    }
}
