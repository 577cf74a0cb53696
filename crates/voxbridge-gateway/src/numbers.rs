//! Available phone number search through the telephony REST API.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use voxbridge_core::config::TelephonyConfig;
use voxbridge_core::error::{RelayError, Result};

use crate::state::GatewayState;

pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct AvailableNumbersPage {
    #[serde(default)]
    available_phone_numbers: Vec<AvailableNumber>,
}

#[derive(Debug, Deserialize)]
struct AvailableNumber {
    phone_number: String,
}

/// List local numbers available for purchase in `country`, as E.164 strings.
///
/// Fails with [`RelayError::Config`] when credentials are missing and
/// [`RelayError::Other`] when the API call itself fails.
pub async fn search_available_numbers(
    http: &reqwest::Client,
    telephony: &TelephonyConfig,
    country: &str,
    limit: u32,
) -> Result<Vec<String>> {
    let (Some(account_sid), Some(auth_token)) =
        (telephony.resolve_account_sid(), telephony.resolve_auth_token())
    else {
        return Err(RelayError::Config(
            "Telephony account SID and auth token are not configured".into(),
        ));
    };

    let url = format!(
        "{}/2010-04-01/Accounts/{account_sid}/AvailablePhoneNumbers/{}/Local.json",
        telephony.api_base_url.trim_end_matches('/'),
        country.to_uppercase()
    );
    let limit = limit.clamp(1, MAX_LIMIT);
    debug!(%url, limit, "Searching available numbers");

    let response = http
        .get(&url)
        .basic_auth(&account_sid, Some(&auth_token))
        .query(&[("PageSize", limit.to_string())])
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Number search request failed: {e}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("Telephony API error {status}: {body}").into());
    }

    let page: AvailableNumbersPage = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Unexpected number search response: {e}"))?;

    Ok(page
        .available_phone_numbers
        .into_iter()
        .map(|n| n.phone_number)
        .take(limit as usize)
        .collect())
}

#[derive(Debug, Deserialize)]
pub struct NumbersQuery {
    pub country: Option<String>,
    pub limit: Option<u32>,
}

/// `GET /numbers?country=US&limit=10`
pub async fn list_numbers(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<NumbersQuery>,
) -> Response {
    let country = query.country.as_deref().unwrap_or(DEFAULT_COUNTRY);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    match search_available_numbers(&state.http, &state.config.telephony(), country, limit).await {
        Ok(numbers) => Json(numbers).into_response(),
        Err(e) => {
            let status = match e {
                RelayError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            warn!(%e, country, "Number search failed");
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
