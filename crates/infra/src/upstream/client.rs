use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use payrelay_core::{PayoutState, TransactionId, UpstreamPayout};

use super::{Upstream, UpstreamError};
use crate::config::UpstreamConfig;

/// `reqwest` implementation of [`Upstream`].
///
/// Every request is bounded by the configured timeout, connect included.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    base_url: Url,
}

impl HttpUpstream {
    /// Build a client for `config.base_url`. A base without a scheme is
    /// taken as plain `http`.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let raw = config.base_url.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let base_url = Url::parse(&with_scheme).map_err(|e| UpstreamError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::from_reqwest("build_client", e))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        // Absolute paths replace whatever path the base carries.
        self.base_url.join(path).map_err(|e| UpstreamError::InvalidUrl {
            url: format!("{}{}", self.base_url, path),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    #[instrument(skip(self), err)]
    async fn fetch_payouts(&self) -> Result<Vec<UpstreamPayout>, UpstreamError> {
        const OP: &str = "fetch_payouts";

        let response = self
            .client
            .post(self.endpoint("/api/transaction/")?)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(OP, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::from_status(OP, status));
        }

        let payouts: Vec<UpstreamPayout> = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(OP, e))?;
        debug!(count = payouts.len(), "fetched payouts");
        Ok(payouts)
    }

    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn mark_processing(&self, id: TransactionId) -> Result<(), UpstreamError> {
        const OP: &str = "mark_processing";

        let response = self
            .client
            .post(self.endpoint(&format!("/api/transaction/{id}/"))?)
            .form(&[("state", PayoutState::Processing.as_str())])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(OP, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::from_status(OP, status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> HttpUpstream {
        HttpUpstream::new(&UpstreamConfig {
            base_url: server.uri(),
            timeout: Duration::from_millis(500),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_payouts_decodes_the_list() {
        let server = MockServer::start().await;
        let id = TransactionId::new();
        Mock::given(method("POST"))
            .and(path("/api/transaction/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": id.to_string(),
                    "create_time": "Mon, 10 Jun 2024 12:30:00 GMT",
                    "amount": "125.50",
                    "recipient_account_identifier": "FI2112345600000785",
                    "state": "notifying"
                },
                {
                    "id": TransactionId::new().to_string(),
                    "create_time": "Mon, 10 Jun 2024 12:31:00 GMT",
                    "amount": 10,
                    "recipient_account_identifier": "FI2112345600000786",
                    "state": "paid"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let payouts = client_for(&server).fetch_payouts().await.unwrap();

        assert_eq!(payouts.len(), 2);
        assert_eq!(payouts[0].id, id.to_string());
        assert_eq!(payouts[0].amount, Some(Decimal::new(12550, 2)));
        assert_eq!(payouts[0].state, PayoutState::Notifying);
        assert_eq!(payouts[1].state, PayoutState::Other("paid".to_string()));
    }

    #[tokio::test]
    async fn mark_processing_posts_form_to_transaction_path() {
        let server = MockServer::start().await;
        let id = TransactionId::new();
        Mock::given(method("POST"))
            .and(path(format!("/api/transaction/{id}/")))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("state=processing"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).mark_processing(id).await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_are_transient_client_errors_are_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/transaction/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let fetch_err = client.fetch_payouts().await.unwrap_err();
        assert_eq!(
            fetch_err,
            UpstreamError::Server {
                operation: "fetch_payouts",
                status: 503
            }
        );
        assert!(fetch_err.is_transient());

        let push_err = client.mark_processing(TransactionId::new()).await.unwrap_err();
        assert!(!push_err.is_transient());
    }

    #[tokio::test]
    async fn slow_upstream_times_out_transiently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .mark_processing(TransactionId::new())
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Timeout { operation: "mark_processing" });
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_payouts().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Decode { .. }), "{err:?}");
        assert!(!err.is_transient());
    }

    #[test]
    fn base_url_without_scheme_defaults_to_http() {
        let client = HttpUpstream::new(&UpstreamConfig {
            base_url: "expenzy-api:5001".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(client.base_url().as_str(), "http://expenzy-api:5001/");
        assert_eq!(
            client.endpoint("/api/transaction/").unwrap().as_str(),
            "http://expenzy-api:5001/api/transaction/"
        );
    }
}
