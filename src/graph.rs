//! Microsoft Graph mail sending with an application (client credentials) token.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GraphError;

pub const LOGIN_BASE: &str = "https://login.microsoftonline.com/";
pub const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0/";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Graph app registration as stored in the secrets store.
#[derive(Clone, Deserialize)]
pub struct GraphCredentials {
    #[serde(alias = "tenant")]
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret_value: String,
    #[serde(default, alias = "SharepointHostName")]
    pub hostname: Option<String>,
}

impl std::fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Authenticated Graph client. The token is fetched once in [`GraphClient::connect`].
pub struct GraphClient {
    http: Client,
    graph_base: Url,
    access_token: String,
}

impl GraphClient {
    /// # Errors
    ///
    /// [`GraphError::Token`] if the tenant refuses the client credentials.
    pub async fn connect(creds: &GraphCredentials, http: Client) -> Result<Self, GraphError> {
        let login = Url::parse(LOGIN_BASE).map_err(|e| GraphError::Token(e.to_string()))?;
        let graph = Url::parse(GRAPH_BASE).map_err(|e| GraphError::Token(e.to_string()))?;
        Self::connect_to(creds, http, &login, graph).await
    }

    /// Same as [`GraphClient::connect`] against other login and Graph hosts.
    ///
    /// # Errors
    ///
    /// [`GraphError::Token`] if the tenant refuses the client credentials.
    pub async fn connect_to(
        creds: &GraphCredentials,
        http: Client,
        login_base: &Url,
        graph_base: Url,
    ) -> Result<Self, GraphError> {
        log::info!("Getting Graph access token");
        let url = login_base
            .join(&format!("{}/oauth2/v2.0/token", creds.tenant_id))
            .map_err(|e| GraphError::Token(e.to_string()))?;

        let response = http
            .post(url)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("scope", GRAPH_SCOPE),
                ("client_secret", creds.client_secret_value.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::Token(format!("{status} - {}", body.trim())));
        }

        let access_token = response
            .json::<TokenResponse>()
            .await?
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GraphError::Token("response carried no access_token".into()))?;

        Ok(Self {
            http,
            graph_base,
            access_token,
        })
    }

    /// Sends `request` from the mailbox `sender`.
    ///
    /// # Errors
    ///
    /// [`GraphError::SendFailed`] unless Graph answers `202 Accepted`.
    pub async fn send_mail(&self, sender: &str, request: &SendMailRequest) -> Result<(), GraphError> {
        let url = self
            .graph_base
            .join(&format!("users/{sender}/sendMail"))
            .map_err(|e| GraphError::SendFailed {
                status: 0,
                body: e.to_string(),
            })?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            log::error!("Error sending email: {status} {body}");
            return Err(GraphError::SendFailed {
                status: status.as_u16(),
                body,
            });
        }

        log::info!(
            "Email '{}' sent from {sender}",
            request.message.subject
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest {
    pub message: Message,
    pub save_to_sent_items: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc_recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailAddress {
    pub address: String,
}

impl Recipient {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            email_address: EmailAddress {
                address: address.into(),
            },
        }
    }
}

impl SendMailRequest {
    /// An HTML message that is not kept in the sender's Sent Items.
    #[must_use]
    pub fn html(subject: impl Into<String>, html: impl Into<String>, to: &[&str], bcc: &[&str]) -> Self {
        Self {
            message: Message {
                subject: subject.into(),
                body: ItemBody {
                    content_type: "HTML".into(),
                    content: html.into(),
                },
                to_recipients: to.iter().map(|a| Recipient::new(*a)).collect(),
                bcc_recipients: bcc.iter().map(|a| Recipient::new(*a)).collect(),
            },
            save_to_sent_items: false,
        }
    }

    #[must_use]
    pub fn save_to_sent_items(self, save: bool) -> Self {
        Self {
            save_to_sent_items: save,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;
    use serde_json::json;
    use url::Url;
    use wiremock::{
        matchers::{body_json, body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn creds() -> GraphCredentials {
        serde_json::from_value(json!({
            "tenant": "contoso-tenant",
            "client_id": "graph-app",
            "client_secret_value": "graph-secret"
        }))
        .unwrap()
    }

    async fn connect(server: &MockServer) -> Result<GraphClient, GraphError> {
        let login = Url::parse(&format!("{}/", server.uri())).unwrap();
        let graph = Url::parse(&format!("{}/v1.0/", server.uri())).unwrap();
        GraphClient::connect_to(&creds(), Client::new(), &login, graph).await
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_secret=graph-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer", "expires_in": 3599, "access_token": "graph-token"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn html_request_serializes_to_graph_shape() {
        let request = SendMailRequest::html("Invoices Sent Today", "<p>hi</p>", &["books@firm.test"], &["ops@firm.test"]);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "message": {
                    "subject": "Invoices Sent Today",
                    "body": {"contentType": "HTML", "content": "<p>hi</p>"},
                    "toRecipients": [{"emailAddress": {"address": "books@firm.test"}}],
                    "bccRecipients": [{"emailAddress": {"address": "ops@firm.test"}}]
                },
                "saveToSentItems": false
            })
        );
        let no_bcc = SendMailRequest::html("s", "b", &["a@b.test"], &[]).save_to_sent_items(true);
        let value = serde_json::to_value(&no_bcc).unwrap();
        assert!(value["message"].get("bccRecipients").is_none());
        assert_eq!(value["saveToSentItems"], true);
    }

    #[tokio::test]
    async fn mail_is_sent_with_the_app_token() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let request = SendMailRequest::html("Subject", "<b>x</b>", &["books@firm.test"], &[]);
        Mock::given(method("POST"))
            .and(path("/v1.0/users/billing@firm.test/sendMail"))
            .and(header("authorization", "Bearer graph-token"))
            .and(body_json(serde_json::to_value(&request).unwrap()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let graph = connect(&server).await.unwrap();
        graph.send_mail("billing@firm.test", &request).await.unwrap();
    }

    #[tokio::test]
    async fn only_accepted_counts_as_sent() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1.0/users/billing@firm.test/sendMail"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let graph = connect(&server).await.unwrap();
        let err = graph
            .send_mail("billing@firm.test", &SendMailRequest::html("s", "b", &["a@b.test"], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::SendFailed { status: 200, .. }));
    }

    #[tokio::test]
    async fn refused_credentials_fail_to_connect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = connect(&server).await.err().unwrap();
        assert!(matches!(err, GraphError::Token(ref m) if m.contains("invalid_client")));
    }
}
