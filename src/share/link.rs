//! Share links
//!
//! A share link carries `share=<share_id>&ref=<user_id>`. The visiting page
//! hands the query string over for processing and then strips both
//! parameters from the visible URL.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

/// Query parameter carrying the share id
pub const SHARE_PARAM: &str = "share";

/// Query parameter carrying the sharer's user id
pub const REF_PARAM: &str = "ref";

/// Share parameters extracted from a visit URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShareLinkParams {
    #[serde(rename = "share")]
    pub share_id: Option<String>,
    #[serde(rename = "ref")]
    pub ref_user_id: Option<String>,
}

impl ShareLinkParams {
    /// Parse from a raw query string (leading `?` allowed)
    ///
    /// Malformed queries yield empty params rather than an error; a visit
    /// without a usable share id is simply not attributed.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();

        let mut params = ShareLinkParams::default();
        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                SHARE_PARAM => params.share_id = Some(value.to_string()),
                REF_PARAM => params.ref_user_id = Some(value.to_string()),
                _ => {}
            }
        }
        params
    }

    pub fn is_share_visit(&self) -> bool {
        self.share_id.is_some()
    }
}

/// Remove the share parameters from a query string, keeping the rest
pub fn strip_from_query(query: &str) -> String {
    let query = query.trim_start_matches('?');
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
    let kept: Vec<(String, String)> = pairs
        .into_iter()
        .filter(|(k, _)| k != SHARE_PARAM && k != REF_PARAM)
        .collect();
    serde_urlencoded::to_string(kept).unwrap_or_default()
}

/// Fresh time-ordered share id: `share_<unix-millis>_<8 hex>`
pub fn new_share_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("share_{}_{}", Utc::now().timestamp_millis(), &random[..8])
}

/// Build the link handed to the sharing user
pub fn build_share_url(base_url: &str, project_id: &str, share_id: &str, user_id: &str) -> String {
    let query = serde_urlencoded::to_string([(SHARE_PARAM, share_id), (REF_PARAM, user_id)])
        .unwrap_or_default();
    format!(
        "{}/projects/{}?{}",
        base_url.trim_end_matches('/'),
        urlencode_segment(project_id),
        query
    )
}

fn urlencode_segment(segment: &str) -> String {
    // form encoding of a single value, with spaces as %20 for path use
    serde_urlencoded::to_string([("", segment)])
        .map(|s| s.trim_start_matches('=').replace('+', "%20"))
        .unwrap_or_else(|_| segment.to_string())
}
