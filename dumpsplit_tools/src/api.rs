use std::collections::HashMap;

use anyhow::Context;
use dumpsplit_core::verify::PageLookup;
use dumpsplit_core::DumpError;
use serde::Deserialize;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!(
    "dumpsplit/",
    env!("CARGO_PKG_VERSION"),
    " (XML dumps page range check)"
);

/// `{host}` and `{revid}` are substituted per request.
const DEFAULT_URL_TEMPLATE: &str = "https://{host}/w/api.php?action=query&format=json&revids={revid}";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    query: Option<ApiQuery>,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    #[serde(default)]
    pages: HashMap<String, ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiPage {
    pageid: Option<u64>,
}

/// Extract the page id from an `action=query&revids=` JSON response.
///
/// ```text
/// {"batchcomplete":"","query":{"pages":{"22086":{"pageid":22086,"ns":1,"title":"..."}}}}
/// ```
pub fn page_id_from_response(body: &str) -> anyhow::Result<Option<u64>> {
    let response: ApiResponse = serde_json::from_str(body).context("decoding api response")?;
    Ok(response
        .query
        .and_then(|q| q.pages.into_values().find_map(|p| p.pageid)))
}

/// Revision → page lookups against a MediaWiki action API.
pub struct ApiPageLookup {
    client: reqwest::blocking::Client,
    url_template: String,
}

impl ApiPageLookup {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_url_template(DEFAULT_URL_TEMPLATE)
    }

    pub fn with_url_template(template: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            url_template: template.into(),
        })
    }

    fn url(&self, host: &str, revision_id: u64) -> String {
        self.url_template
            .replace("{host}", host)
            .replace("{revid}", &revision_id.to_string())
    }

    fn fetch(&self, url: &str) -> anyhow::Result<Option<u64>> {
        let resp = self.client.get(url).send().with_context(|| format!("requesting {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            warn!(%url, %status, "bad response from api");
            return Ok(None);
        }
        let body = resp.text().with_context(|| format!("reading body of {url}"))?;
        page_id_from_response(&body)
    }
}

impl PageLookup for ApiPageLookup {
    fn page_for_revision(
        &self,
        host: &str,
        revision_id: u64,
    ) -> dumpsplit_core::Result<Option<u64>> {
        let url = self.url(host, revision_id);
        debug!(%url, "looking up page of revision");
        self.fetch(&url).map_err(|e| DumpError::Tool {
            tool: url.into(),
            message: format!("{e:#}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_substitution() {
        let lookup = ApiPageLookup::with_url_template("http://{host}/api?revids={revid}").unwrap();
        assert_eq!(lookup.url("en.wikipedia.org", 42), "http://en.wikipedia.org/api?revids=42");
    }
}
