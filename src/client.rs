// data.go.kr HTTP client
//
// The importer only sees the two source traits, so tests drive it with
// in-memory fakes instead of the network.

use crate::config::ImporterConfig;
use crate::error::{ImportError, ImportResult};
use crate::parser::{parse_region_page, parse_trade_response, RegionPage, TradePage};
use async_trait::async_trait;
use tracing::{debug, instrument};

pub const REGION_API_URL: &str = "https://apis.data.go.kr/1741000/StanReginCd/getStanReginCdList";
pub const TRADE_API_URL: &str =
    "https://apis.data.go.kr/1613000/RTMSDataSvcAptTrade/getRTMSDataSvcAptTrade";

/// One month of trades for one district is requested in a single page
pub const TRADE_ROWS_PER_REQUEST: u32 = 5000;

/// Paginated legal-dong code listing
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn fetch_region_page(&self, page_no: u32, num_of_rows: u32) -> ImportResult<RegionPage>;
}

/// Apartment trades for a district (`LAWD_CD`) and month (`DEAL_YMD`, `YYYYMM`)
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch_trades(&self, sgg_cd: &str, deal_ymd: &str) -> ImportResult<TradePage>;
}

/// data.go.kr hands out keys in percent-encoded form as well as plain form.
/// reqwest encodes query values itself, so an encoded key is decoded once.
pub fn normalize_service_key(key: &str) -> String {
    let key = key.trim();
    if key.contains('%') {
        urlencoding::decode(key)
            .map(|k| k.into_owned())
            .unwrap_or_else(|_| key.to_string())
    } else {
        key.to_string()
    }
}

pub struct PublicDataClient {
    http: reqwest::Client,
    region_key: Option<String>,
    trade_key: Option<String>,
    region_url: String,
    trade_url: String,
}

impl PublicDataClient {
    pub fn new(config: &ImporterConfig) -> ImportResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            region_key: config.legal_dong_api_key.as_deref().map(normalize_service_key),
            trade_key: config.public_data_api_key.as_deref().map(normalize_service_key),
            region_url: REGION_API_URL.to_string(),
            trade_url: TRADE_API_URL.to_string(),
        })
    }

    /// Point the client at another host (staging mirror, local proxy)
    pub fn with_base_urls(mut self, region_url: &str, trade_url: &str) -> Self {
        self.region_url = region_url.to_string();
        self.trade_url = trade_url.to_string();
        self
    }

    fn key<'a>(key: &'a Option<String>, name: &str) -> ImportResult<&'a str> {
        key.as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ImportError::Config(format!("{} is not set", name)))
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> ImportResult<String> {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl RegionSource for PublicDataClient {
    #[instrument(skip(self))]
    async fn fetch_region_page(&self, page_no: u32, num_of_rows: u32) -> ImportResult<RegionPage> {
        let key = Self::key(&self.region_key, "LEGAL_DONG_API_KEY")?;
        let body = self
            .get_text(
                &self.region_url,
                &[
                    ("serviceKey", key.to_string()),
                    ("pageNo", page_no.to_string()),
                    ("numOfRows", num_of_rows.to_string()),
                    ("type", "json".to_string()),
                ],
            )
            .await?;
        debug!(bytes = body.len(), "Fetched region page");
        parse_region_page(&body)
    }
}

#[async_trait]
impl TradeSource for PublicDataClient {
    #[instrument(skip(self))]
    async fn fetch_trades(&self, sgg_cd: &str, deal_ymd: &str) -> ImportResult<TradePage> {
        let key = Self::key(&self.trade_key, "PUBLIC_DATA_API_KEY")?;
        let body = self
            .get_text(
                &self.trade_url,
                &[
                    ("serviceKey", key.to_string()),
                    ("pageNo", "1".to_string()),
                    ("numOfRows", TRADE_ROWS_PER_REQUEST.to_string()),
                    ("LAWD_CD", sgg_cd.to_string()),
                    ("DEAL_YMD", deal_ymd.to_string()),
                ],
            )
            .await?;
        debug!(bytes = body.len(), "Fetched trade page");
        parse_trade_response(&body)
    }
}
