use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Deserialize;
use tracing::{debug, info};

use crate::discovery::{CandidateServer, parse_resources};
use crate::error::PlexError;

const AUTH_APP_URL: &str = "https://app.plex.tv/auth";
const JSON: &str = "application/json";

/// Client for the upstream identity service: pin OAuth, account lookup and
/// the resource listing used for server discovery.
#[derive(Clone)]
pub struct PlexTv {
    http: Client,
    base: Url,
    client_identifier: String,
    product: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub id: i64,
    pub code: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlexAccount {
    pub id: i64,
    #[serde(default)]
    pub uuid: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl PlexTv {
    pub fn new(http: Client, base_url: &str, client_identifier: &str, product: &str) -> Result<Self, PlexError> {
        Ok(Self {
            http,
            base: Url::parse(base_url.trim_end_matches('/'))?,
            client_identifier: client_identifier.to_string(),
            product: product.to_string(),
        })
    }

    pub fn client_identifier(&self) -> &str {
        &self.client_identifier
    }

    fn request(&self, method: Method, path: &str, accept: &str) -> Result<RequestBuilder, PlexError> {
        let url = Url::parse(&format!("{}{}", self.base.as_str().trim_end_matches('/'), path))?;
        Ok(self
            .http
            .request(method, url)
            .header("Accept", accept)
            .header("X-Plex-Product", &self.product)
            .header("X-Plex-Client-Identifier", &self.client_identifier))
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, PlexError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlexError::Status(status.as_u16()));
        }
        Ok(resp)
    }

    /// POST /api/v2/pins: start a pin login.
    pub async fn create_pin(&self) -> Result<Pin, PlexError> {
        let builder = self.request(Method::POST, "/api/v2/pins", JSON)?.query(&[("strong", "true")]);
        let pin: Pin = Self::send(builder).await?.json().await?;
        info!("Created upstream pin {}", pin.id);
        Ok(pin)
    }

    /// Where the browser goes to approve the pin.
    pub fn auth_url(&self, pin: &Pin) -> String {
        let mut url = String::from(AUTH_APP_URL);
        url.push_str("#?");
        url.push_str(
            &url::form_urlencoded::Serializer::new(String::new())
                .append_pair("clientID", &self.client_identifier)
                .append_pair("code", &pin.code)
                .append_pair("context[device][product]", &self.product)
                .finish(),
        );
        url
    }

    /// GET /api/v2/pins/{id}. `auth_token` is set once the user approved.
    pub async fn check_pin(&self, pin_id: i64) -> Result<Pin, PlexError> {
        let builder = self.request(Method::GET, &format!("/api/v2/pins/{}", pin_id), JSON)?;
        let mut pin: Pin = Self::send(builder).await?.json().await?;
        pin.auth_token = pin.auth_token.filter(|t| !t.is_empty());
        Ok(pin)
    }

    /// GET /api/v2/user
    pub async fn account(&self, auth_token: &str) -> Result<PlexAccount, PlexError> {
        let builder = self
            .request(Method::GET, "/api/v2/user", JSON)?
            .header("X-Plex-Token", auth_token);
        Ok(Self::send(builder).await?.json().await?)
    }

    /// Servers the account may use: owned, or shared with it.
    pub async fn list_accessible_servers(&self, auth_token: &str) -> Result<Vec<CandidateServer>, PlexError> {
        let builder = self
            .request(Method::GET, "/api/resources", "application/xml")?
            .query(&[("includeHttps", "1"), ("includeRelay", "1")])
            .header("X-Plex-Token", auth_token);
        let body = Self::send(builder).await?.text().await?;

        let all = parse_resources(&body)?;
        let total = all.len();
        let accessible: Vec<_> = all.into_iter().filter(CandidateServer::is_accessible).collect();
        debug!("Resource listing: {} devices, {} accessible servers", total, accessible.len());
        Ok(accessible)
    }
}
